//! The five task-level error kinds, plus the two aggregate failure types
//! returned from a whole execution (§6.4).

use std::sync::Arc;

use thiserror::Error;

use crate::task::TaskTypeId;

/// What can go wrong while a single task runs.
#[derive(Debug, Clone, Error)]
pub enum TaskError {
    #[error("{0}")]
    Failed(String),

    #[error("dependency {dependency} failed: {source}")]
    DependencyFailed {
        dependency: TaskTypeId,
        #[source]
        source: Arc<TaskError>,
    },

    #[error("task was skipped because the execution it belonged to never reached it")]
    Skipped,

    #[error("task was aborted: {0}")]
    Aborted(String),

    #[error("task panicked: {0}")]
    Panic(String),
}

impl TaskError {
    pub fn failed(message: impl Into<String>) -> Self {
        TaskError::Failed(message.into())
    }

    /// Whether this error (or its chain of dependency-failure causes)
    /// contains one originating from `dependency`.
    pub fn caused_by(&self, dependency: TaskTypeId) -> bool {
        match self {
            TaskError::DependencyFailed { dependency: d, source } => {
                *d == dependency || source.caused_by(dependency)
            }
            _ => false,
        }
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self, TaskError::Aborted(_))
    }
}

/// A cycle detected during static dependency analysis (§4.1 step 5, §7
/// `CycleError`). Construction of the dependency graph fails atomically
/// before any wrapper is created and before any task body runs.
#[derive(Debug, Clone, Error)]
#[error("cyclic task dependencies detected: {}", format_components(.components))]
pub struct CycleError {
    /// Every strongly connected component of size > 1, plus every
    /// self-loop, found in the attempted graph.
    pub components: Vec<Vec<TaskTypeId>>,
}

fn format_components(components: &[Vec<TaskTypeId>]) -> String {
    components
        .iter()
        .map(|c| {
            let names: Vec<&str> = c.iter().map(TaskTypeId::name).collect();
            format!("[{}]", names.join(" -> "))
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// One task's failure, identified by the task class it came from, carrying
/// whatever captured output that task produced before it failed (§6.4:
/// `TaskFailure(task_class, underlying_error, output_tail)`).
#[derive(Debug, Clone)]
pub struct TaskFailure {
    pub task: TaskTypeId,
    pub error: Arc<TaskError>,
    pub output_tail: Vec<String>,
}

/// The aggregate failure surface for a whole `Run`/`Clean`/`RunAndClean`
/// call: every distinct failure observed, deduplicated by error identity
/// (`Arc::ptr_eq`), in the order first observed.
#[derive(Debug, Clone, Error)]
#[error("execution failed: {}", summarize(.failures))]
pub struct ExecutionFailure {
    pub failures: Vec<TaskFailure>,
}

fn summarize(failures: &[TaskFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("{}: {}", f.task.name(), f.error))
        .collect::<Vec<_>>()
        .join("; ")
}

impl ExecutionFailure {
    pub fn errors(&self) -> impl Iterator<Item = &Arc<TaskError>> {
        self.failures.iter().map(|f| &f.error)
    }

    /// The first failure recorded, if any — usually the most actionable one
    /// since failures are pushed in the order they were observed by the
    /// executor's completion stream.
    pub fn cause(&self) -> Option<&TaskFailure> {
        self.failures.first()
    }

    pub fn caused_by(&self, task: TaskTypeId) -> bool {
        self.failures.iter().any(|f| f.task == task || f.error.caused_by(task))
    }

    /// Go-style `errors.Is`: whether any recorded failure originated from
    /// `task`, directly or via a `DependencyFailed` chain (§6.4's
    /// `includes?(type)`; the Rust stand-in for a per-`TaskClass`-generated
    /// nested error type matched by custom `===` is matching on the task's
    /// `TaskTypeId` instead).
    pub fn includes(&self, task: TaskTypeId) -> bool {
        self.caused_by(task)
    }

    pub fn message(&self) -> String {
        summarize(&self.failures)
    }

    /// The first recorded failure whose underlying error is `Aborted`, if
    /// any (§7: "the final raised value is the aggregate, except when any
    /// recorded underlying error is Aborted, in which case the Aborted
    /// error is raised verbatim").
    pub fn aborted_cause(&self) -> Option<Arc<TaskError>> {
        self.failures.iter().map(|f| &f.error).find(|e| e.is_aborted()).cloned()
    }

    /// Dedups purely by error identity (`Arc::ptr_eq`), matching the
    /// quantified invariant that `errors()` never contains two entries
    /// whose underlying error objects are identical — the same failure can
    /// reach this call from more than one dependent, but it is only ever
    /// recorded once.
    pub(crate) fn push_dedup(&mut self, task: TaskTypeId, error: Arc<TaskError>, output_tail: Vec<String>) {
        if self.failures.iter().any(|f| Arc::ptr_eq(&f.error, &error)) {
            return;
        }
        self.failures.push(TaskFailure { task, error, output_tail });
    }
}

impl Default for ExecutionFailure {
    fn default() -> Self {
        ExecutionFailure { failures: Vec::new() }
    }
}

/// What `Executor::run`/`clean`/`run_and_clean` actually raise (§7's
/// propagation policy): ordinarily the aggregate, but an `Aborted`
/// underlying error bypasses aggregation entirely and is raised verbatim,
/// which an `ExecutionFailure`-only return type has no way to express.
#[derive(Debug, Clone, Error)]
pub enum ExecutionError {
    #[error("{0}")]
    Failed(ExecutionFailure),
    #[error("{0}")]
    Aborted(Arc<TaskError>),
}

impl ExecutionError {
    /// The recorded per-task failures, or an empty slice for the `Aborted`
    /// bypass (which carries no aggregate — see §7).
    pub fn failures(&self) -> &[TaskFailure] {
        match self {
            ExecutionError::Failed(f) => &f.failures,
            ExecutionError::Aborted(_) => &[],
        }
    }

    pub fn message(&self) -> String {
        match self {
            ExecutionError::Failed(f) => f.message(),
            ExecutionError::Aborted(e) => e.to_string(),
        }
    }
}

impl From<ExecutionFailure> for ExecutionError {
    fn from(failure: ExecutionFailure) -> Self {
        match failure.aborted_cause() {
            Some(aborted) => ExecutionError::Aborted(aborted),
            None => ExecutionError::Failed(failure),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn task_id(n: usize) -> TaskTypeId {
        // TaskTypeId carries no constructor from a plain integer, but we only
        // need `n` distinct, stable identifiers for this test; reuse a
        // handful of concrete zero-sized types instead.
        macro_rules! nth {
            ($n:expr, $($ty:ty),+) => {{
                let types: &[fn() -> TaskTypeId] = &[$(TaskTypeId::of::<$ty> as fn() -> TaskTypeId),+];
                types[$n % types.len()]()
            }};
        }
        struct A;
        struct B;
        struct C;
        nth!(n, A, B, C)
    }

    proptest! {
        /// `errors()` never contains two entries whose underlying error
        /// objects are identical (§8 quantified invariant: dedup law),
        /// no matter how many times the same `Arc<TaskError>` is pushed
        /// for the same task.
        #[test]
        fn push_dedup_never_duplicates_the_same_error(
            task_indices in proptest::collection::vec(0usize..3, 1..10),
            repeat_same_arc in any::<bool>(),
        ) {
            let mut failure = ExecutionFailure::default();
            let shared = Arc::new(TaskError::failed("boom"));

            for &idx in &task_indices {
                let error = if repeat_same_arc { shared.clone() } else { Arc::new(TaskError::failed("boom")) };
                failure.push_dedup(task_id(idx), error, Vec::new());
            }

            let mut seen: Vec<(*const TaskError, usize)> = Vec::new();
            for f in &failure.failures {
                let ptr = Arc::as_ptr(&f.error);
                prop_assert!(
                    !seen.iter().any(|(p, _)| *p == ptr),
                    "duplicate Arc identity recorded in aggregated failures"
                );
                seen.push((ptr, 1));
            }
        }
    }
}
