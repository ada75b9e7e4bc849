//! Best-effort per-task output capture (§6.3). Tasks opt in by calling
//! `TaskContext::output()` and writing lines explicitly; this hub never
//! redirects real process stdout/stderr — the plumbing that would do that
//! for a terminal UI is an out-of-scope collaborator (spec.md §1), so the
//! core only specifies the interface it would be driven through.

use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;

use crate::task::TaskTypeId;

const DEFAULT_TAIL_LINES: usize = 200;

#[derive(Default)]
pub struct OutputHub {
    lines: Mutex<HashMap<TaskTypeId, VecDeque<String>>>,
    capacity: usize,
}

impl OutputHub {
    pub fn new() -> Self {
        OutputHub { lines: Mutex::new(HashMap::new()), capacity: DEFAULT_TAIL_LINES }
    }

    pub(crate) fn write_line(&self, task: TaskTypeId, line: impl Into<String>) {
        let mut guard = self.lines.lock();
        let buf = guard.entry(task).or_default();
        buf.push_back(line.into());
        while buf.len() > self.capacity {
            buf.pop_front();
        }
    }

    /// The most recent captured lines for `task`, oldest first. Always
    /// safe to return empty — a task that never wrote anything, or one this
    /// hub has never heard of, looks the same to callers.
    pub fn tail(&self, task: TaskTypeId) -> Vec<String> {
        self.lines
            .lock()
            .get(&task)
            .map(|buf| buf.iter().cloned().collect())
            .unwrap_or_default()
    }
}

/// A per-task write handle into the hub, handed out by
/// `TaskContext::output()` so task bodies never need to know their own
/// `TaskTypeId`.
pub struct TaskOutputHandle<'a> {
    hub: &'a OutputHub,
    task: TaskTypeId,
}

impl<'a> TaskOutputHandle<'a> {
    pub(crate) fn new(hub: &'a OutputHub, task: TaskTypeId) -> Self {
        TaskOutputHandle { hub, task }
    }

    pub fn write_line(&self, line: impl Into<String>) {
        self.hub.write_line(self.task, line);
    }

    pub fn tail(&self) -> Vec<String> {
        self.hub.tail(self.task)
    }
}
