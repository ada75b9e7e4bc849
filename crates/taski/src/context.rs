//! The execution-scoped facade (C4, §4.4) and the per-task context handed
//! to `Task::run`/`Task::clean`.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::SystemTime;

use dashmap::DashSet;
use parking_lot::Mutex;

use crate::args::Args;
use crate::error::TaskError;
use crate::executor;
use crate::graph::DependencyGraph;
use crate::output::{OutputHub, TaskOutputHandle};
use crate::registry::Registry;
use crate::task::{Task, TaskTypeId};
use crate::wrapper::{TaskState, ValueOutcome};

/// Which half of a `RunAndClean` call is in progress. Each wrapper tracks
/// its `state` and `clean_state` independently (§3), so the same
/// `TaskWrapper` participates in both phases without interference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Run,
    Clean,
}

/// Pull-based lifecycle notifications (§6.2). Every method defaults to a
/// no-op so an observer only implements the events it cares about — the
/// explicit-interface-with-defaults replacement for a duck-typed mixin
/// (Design Notes §9).
pub trait Observer: Send + Sync {
    fn on_ready(&self) {}
    fn on_start(&self) {}
    fn on_phase_started(&self, _phase: Phase) {}
    fn on_phase_completed(&self, _phase: Phase) {}
    fn on_task_updated(
        &self,
        _task: TaskTypeId,
        _previous: TaskState,
        _current: TaskState,
        _phase: Phase,
        _at: SystemTime,
    ) {
    }
    fn on_group_started(&self, _task: TaskTypeId, _group: &str) {}
    fn on_group_completed(&self, _task: TaskTypeId, _group: &str) {}
    fn on_stop(&self) {}
}

/// One execution's worth of shared state: the registry, the static graph,
/// the observer list, output capture, and the runtime-dependency set.
/// Never reused across two `Run`/`Clean`/`RunAndClean` calls.
pub struct ExecutionContext {
    pub(crate) registry: Registry,
    pub(crate) graph: DependencyGraph,
    pub(crate) args: Args,
    pub(crate) observers: Vec<Arc<dyn Observer>>,
    pub(crate) output: OutputHub,
    pub(crate) phase: Mutex<Phase>,
    /// Edges actually traversed at runtime, static or not — recorded on
    /// every `TaskContext::value` call, purely a diagnostic superset of the
    /// static graph (§4.1 point 5 / §4.3.3 step 2).
    pub(crate) runtime_dependencies: DashSet<(TaskTypeId, TaskTypeId)>,
}

impl ExecutionContext {
    pub(crate) fn new(
        registry: Registry,
        graph: DependencyGraph,
        args: Args,
        observers: Vec<Arc<dyn Observer>>,
    ) -> Self {
        ExecutionContext {
            registry,
            graph,
            args,
            observers,
            output: OutputHub::new(),
            phase: Mutex::new(Phase::Run),
            runtime_dependencies: DashSet::new(),
        }
    }

    pub fn args(&self) -> &Args {
        &self.args
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    pub fn phase(&self) -> Phase {
        *self.phase.lock()
    }

    pub(crate) fn set_phase(&self, phase: Phase) {
        *self.phase.lock() = phase;
    }

    pub fn runtime_dependencies(&self) -> Vec<(TaskTypeId, TaskTypeId)> {
        self.runtime_dependencies.iter().map(|e| *e).collect()
    }

    pub(crate) fn notify_ready(&self) {
        self.dispatch(|o| o.on_ready());
    }

    pub(crate) fn notify_start(&self) {
        self.dispatch(|o| o.on_start());
    }

    pub(crate) fn notify_phase_started(&self, phase: Phase) {
        self.dispatch(|o| o.on_phase_started(phase));
    }

    pub(crate) fn notify_phase_completed(&self, phase: Phase) {
        self.dispatch(|o| o.on_phase_completed(phase));
    }

    pub(crate) fn notify_stop(&self) {
        self.dispatch(|o| o.on_stop());
    }

    pub(crate) fn notify_task_updated(
        &self,
        task: TaskTypeId,
        previous: TaskState,
        current: TaskState,
        phase: Phase,
    ) {
        let at = SystemTime::now();
        self.dispatch(|o| o.on_task_updated(task, previous, current, phase, at));
    }

    /// Dispatches an event to every observer in order, catching and logging
    /// any panic so one misbehaving observer cannot block the rest
    /// (grounded in the teacher's pervasive `catch_unwind` usage around
    /// externally supplied callbacks).
    fn dispatch(&self, f: impl Fn(&dyn Observer)) {
        for observer in &self.observers {
            let observer = observer.as_ref();
            let result = std::panic::catch_unwind(AssertUnwindSafe(|| f(observer)));
            if let Err(panic) = result {
                let message = panic_message(&panic);
                tracing::error!(error = %message, "observer callback panicked; continuing with remaining observers");
            }
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// The explicit, passed-by-reference stand-in for the "thread-local fiber
/// context" the source runtime carries: since a resumed coroutine may run
/// on any worker, the current task's identity travels as plain data instead
/// of through TLS (Design Notes §9(a)).
#[derive(Clone)]
pub struct TaskContext {
    pub(crate) exec: Arc<ExecutionContext>,
    pub(crate) current: TaskTypeId,
}

impl TaskContext {
    pub(crate) fn new(exec: Arc<ExecutionContext>, current: TaskTypeId) -> Self {
        TaskContext { exec, current }
    }

    pub fn args(&self) -> &Args {
        self.exec.args()
    }

    pub fn output(&self) -> TaskOutputHandle<'_> {
        TaskOutputHandle::new(&self.exec.output, self.current)
    }

    pub fn current_task(&self) -> TaskTypeId {
        self.current
    }

    /// Resolves to `T`'s exported value, suspending (via `.await`, not a
    /// blocked OS thread) until it is ready if some other coroutine already
    /// claimed the right to produce it, or running it here — inline, on
    /// this worker — if nobody has (§4.3.3's `start` case).
    pub async fn value<T: Task>(&self) -> Result<Arc<T::Output>, Arc<TaskError>> {
        let dep_id = TaskTypeId::of::<T>();
        self.exec.runtime_dependencies.insert((self.current, dep_id));

        let wrapper = self.exec.registry.get_or_create::<T>();
        let result = match wrapper.request_value().await {
            ValueOutcome::Ready(result) => result,
            ValueOutcome::Start => {
                let child_ctx = TaskContext::new(self.exec.clone(), dep_id);
                executor::run_task::<T>(wrapper, child_ctx).await
            }
        };

        // §7: "waiters see DependencyFailed wrapping err" — the dependency's
        // own stored error (whatever terminated it: a body failure, a panic,
        // a further DependencyFailed) always reaches the caller wrapped, so
        // every hop up the chain records which edge it crossed.
        result.map_err(|source| Arc::new(TaskError::DependencyFailed { dependency: dep_id, source }))
    }
}
