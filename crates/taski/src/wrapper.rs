//! `TaskWrapper<T>`: per-task state machine and the `request_value`
//! coordination primitive (§4.2, §4.3.3).

use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::error::TaskError;
use crate::task::{Task, TaskTypeId};

/// A task wrapper's lifecycle. `Completed`/`Failed`/`Skipped` are terminal;
/// `clean_state` reuses the same enum for the clean phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Failed | TaskState::Skipped)
    }
}

/// What `request_value`/`request_value`-equivalent calls collapse spec.md's
/// five-way table down to: either the value is already settled, or the
/// caller has just atomically claimed the right (and responsibility) to run
/// it.
pub enum ValueOutcome<O> {
    Ready(Result<Arc<O>, Arc<TaskError>>),
    Start,
}

struct Inner<T: Task> {
    state: TaskState,
    clean_state: TaskState,
    result: Option<Arc<T::Output>>,
    error: Option<Arc<TaskError>>,
    waiters: Vec<oneshot::Sender<()>>,
    clean_waiters: Vec<oneshot::Sender<()>>,
    started_at: Option<Instant>,
    ended_at: Option<Instant>,
}

/// Type-erased handle to a `TaskWrapper<T>`, stored in the `Registry`. The
/// downcast in `Registry::get_or_create` is the only place this erasure is
/// ever undone — everywhere else a wrapper is handled generically.
pub trait AnyWrapper: Send + Sync {
    fn type_id(&self) -> TaskTypeId;
    fn state(&self) -> TaskState;
    fn clean_state(&self) -> TaskState;
    fn started_at(&self) -> Option<Instant>;
    fn ended_at(&self) -> Option<Instant>;

    /// The settled error, once `state` is `Failed` — `None` otherwise. Typed
    /// as `Arc<TaskError>` rather than `Arc<T::Output>`, so unlike `result`
    /// this can be exposed through the type-erased trait without a downcast.
    fn error(&self) -> Option<Arc<TaskError>>;

    /// Transitions `Pending -> Skipped`. Returns whether the transition was
    /// made (a no-op on an already-terminal wrapper).
    fn mark_skipped(&self) -> bool;

    /// Transitions `clean_state` `Pending -> Skipped`, same semantics.
    fn mark_clean_skipped(&self) -> bool;

    /// Recovers the concrete `Arc<TaskWrapper<T>>` this trait object erases
    /// — the one downcast point typed access goes through.
    fn as_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

pub struct TaskWrapper<T: Task> {
    task_type: TaskTypeId,
    inner: Mutex<Inner<T>>,
}

impl<T: Task> TaskWrapper<T> {
    pub fn new() -> Self {
        TaskWrapper {
            task_type: TaskTypeId::of::<T>(),
            inner: Mutex::new(Inner {
                state: TaskState::Pending,
                clean_state: TaskState::Pending,
                result: None,
                error: None,
                waiters: Vec::new(),
                clean_waiters: Vec::new(),
                started_at: None,
                ended_at: None,
            }),
        }
    }

    /// Atomically claims the right to run this task when there is no
    /// requester waiting on the result — used by the executor to kick off
    /// the root task, which nobody else `request_value`s its way into.
    pub fn mark_running(&self) -> bool {
        let mut guard = self.inner.lock();
        if guard.state == TaskState::Pending {
            guard.state = TaskState::Running;
            guard.started_at = Some(Instant::now());
            true
        } else {
            false
        }
    }

    pub fn mark_completed(&self, value: T::Output) {
        let waiters = {
            let mut guard = self.inner.lock();
            debug_assert_eq!(guard.state, TaskState::Running);
            guard.state = TaskState::Completed;
            guard.result = Some(Arc::new(value));
            guard.ended_at = Some(Instant::now());
            std::mem::take(&mut guard.waiters)
        };
        for tx in waiters {
            let _ = tx.send(());
        }
    }

    pub fn mark_failed(&self, error: TaskError) {
        let waiters = {
            let mut guard = self.inner.lock();
            debug_assert_eq!(guard.state, TaskState::Running);
            guard.state = TaskState::Failed;
            guard.error = Some(Arc::new(error));
            guard.ended_at = Some(Instant::now());
            std::mem::take(&mut guard.waiters)
        };
        for tx in waiters {
            let _ = tx.send(());
        }
    }

    /// The coordination primitive of §4.3.3: resolves immediately for a
    /// terminal wrapper, internally waits out a `Running` one (looping until
    /// it observes a terminal state, at which point it returns `Ready`
    /// rather than leaking the intermediate wait to the caller), and
    /// reports `Start` exactly once per wrapper — to whichever caller wins
    /// the race to observe `Pending`.
    pub async fn request_value(&self) -> ValueOutcome<T::Output> {
        loop {
            let wait_rx = {
                let mut guard = self.inner.lock();
                match guard.state {
                    TaskState::Completed => {
                        return ValueOutcome::Ready(Ok(guard.result.clone().unwrap()))
                    }
                    TaskState::Failed => {
                        return ValueOutcome::Ready(Err(guard.error.clone().unwrap()))
                    }
                    TaskState::Skipped => {
                        return ValueOutcome::Ready(Err(Arc::new(TaskError::Skipped)))
                    }
                    TaskState::Running => {
                        let (tx, rx) = oneshot::channel();
                        guard.waiters.push(tx);
                        Some(rx)
                    }
                    TaskState::Pending => {
                        guard.state = TaskState::Running;
                        guard.started_at = Some(Instant::now());
                        None
                    }
                }
            };

            match wait_rx {
                None => return ValueOutcome::Start,
                Some(rx) => {
                    let _ = rx.await;
                    // Wrapper is now terminal; loop back around to read it.
                }
            }
        }
    }

    pub fn clean_state(&self) -> TaskState {
        self.inner.lock().clean_state
    }

    /// The settled value, once `state` is `Completed` — `None` otherwise.
    pub fn result(&self) -> Option<Arc<T::Output>> {
        self.inner.lock().result.clone()
    }

    /// The settled error, once `state` is `Failed` — `None` otherwise.
    pub fn error(&self) -> Option<Arc<TaskError>> {
        self.inner.lock().error.clone()
    }

    pub fn mark_clean_running(&self) -> bool {
        let mut guard = self.inner.lock();
        if guard.clean_state == TaskState::Pending {
            guard.clean_state = TaskState::Running;
            true
        } else {
            false
        }
    }

    pub fn mark_clean_completed(&self) {
        let waiters = {
            let mut guard = self.inner.lock();
            guard.clean_state = TaskState::Completed;
            std::mem::take(&mut guard.clean_waiters)
        };
        for tx in waiters {
            let _ = tx.send(());
        }
    }

    pub fn mark_clean_failed(&self) {
        let waiters = {
            let mut guard = self.inner.lock();
            guard.clean_state = TaskState::Failed;
            std::mem::take(&mut guard.clean_waiters)
        };
        for tx in waiters {
            let _ = tx.send(());
        }
    }

}

impl<T: Task> Default for TaskWrapper<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Task> AnyWrapper for TaskWrapper<T> {
    fn type_id(&self) -> TaskTypeId {
        self.task_type
    }

    fn state(&self) -> TaskState {
        self.inner.lock().state
    }

    fn clean_state(&self) -> TaskState {
        self.inner.lock().clean_state
    }

    fn started_at(&self) -> Option<Instant> {
        self.inner.lock().started_at
    }

    fn ended_at(&self) -> Option<Instant> {
        self.inner.lock().ended_at
    }

    fn error(&self) -> Option<Arc<TaskError>> {
        self.inner.lock().error.clone()
    }

    fn mark_skipped(&self) -> bool {
        let waiters = {
            let mut guard = self.inner.lock();
            if guard.state != TaskState::Pending {
                return false;
            }
            guard.state = TaskState::Skipped;
            std::mem::take(&mut guard.waiters)
        };
        for tx in waiters {
            let _ = tx.send(());
        }
        true
    }

    fn mark_clean_skipped(&self) -> bool {
        let waiters = {
            let mut guard = self.inner.lock();
            if guard.clean_state != TaskState::Pending {
                return false;
            }
            guard.clean_state = TaskState::Skipped;
            std::mem::take(&mut guard.clean_waiters)
        };
        for tx in waiters {
            let _ = tx.send(());
        }
        true
    }

    fn as_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

impl<T: Task> fmt::Debug for TaskWrapper<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskWrapper")
            .field("task_type", &self.task_type)
            .field("state", &self.state())
            .finish()
    }
}

/// Function-pointer constructor used by `TaskDescriptor::spawn_wrapper` —
/// the monomorphized erasure boundary each registered task type crosses
/// exactly once, at registration.
pub fn spawn_wrapper<T: Task>() -> Arc<dyn AnyWrapper> {
    Arc::new(TaskWrapper::<T>::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[derive(Debug, Default)]
    struct Probe;

    impl Task for Probe {
        type Output = ();
        async fn run(&mut self, _ctx: &crate::context::TaskContext) -> Result<(), TaskError> {
            Ok(())
        }
    }

    proptest! {
        /// `mark_running` succeeds for exactly one caller, regardless of how
        /// many times it is attempted against a fresh wrapper (§8 quantified
        /// invariant: "mark_running succeeds for exactly one caller").
        #[test]
        fn mark_running_succeeds_exactly_once(attempts in 1usize..20) {
            let wrapper = TaskWrapper::<Probe>::new();
            let successes = (0..attempts).filter(|_| wrapper.mark_running()).count();
            prop_assert_eq!(successes, 1);
        }

        /// Once a wrapper reaches a terminal state it stays terminal: neither
        /// `mark_skipped` nor a second `mark_running` can move it again (§8:
        /// "no wrapper left Pending or Running").
        #[test]
        fn terminal_state_is_sticky(skip_first in any::<bool>()) {
            let wrapper = TaskWrapper::<Probe>::new();
            if skip_first {
                prop_assert!(AnyWrapper::mark_skipped(&wrapper));
                prop_assert!(!wrapper.mark_running());
                prop_assert!(wrapper.state().is_terminal());
            } else {
                prop_assert!(wrapper.mark_running());
                prop_assert!(!AnyWrapper::mark_skipped(&wrapper));
                prop_assert_eq!(wrapper.state(), TaskState::Running);
            }
        }
    }
}
