//! The worker pool and main execution loop (C3, §4.3). The fixed worker
//! pool is a dedicated `tokio` multi-thread runtime; a "task coroutine" is
//! a `tokio::spawn`ed async task, and suspending on a dependency miss is a
//! plain `.await` — tokio's own scheduler does the parking/resuming the
//! spec asks of a hand-rolled coroutine runtime, for free.

use std::num::NonZeroUsize;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;

use crate::args::Args;
use crate::context::{ExecutionContext, Observer, Phase, TaskContext};
use crate::error::{ExecutionError, ExecutionFailure, TaskError};
use crate::graph::DependencyGraph;
use crate::registry::Registry;
use crate::task::{CleanFuture, Task, TaskTypeId};
use crate::wrapper::{TaskState, TaskWrapper};

/// Construction-time knobs for an execution. `workers` uses
/// `Option<NonZeroUsize>` rather than a raw integer so that "0 workers" and
/// "negative workers" are unrepresentable instead of being runtime-rejected
/// input (§6.1, Open Questions).
#[derive(Clone, Default)]
pub struct ExecutorOptions {
    pub workers: Option<NonZeroUsize>,
    pub observers: Vec<Arc<dyn Observer>>,
}

impl ExecutorOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_workers(mut self, workers: NonZeroUsize) -> Self {
        self.workers = Some(workers);
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn Observer>) -> Self {
        self.observers.push(observer);
        self
    }
}

/// Entry points mirroring spec.md §6.1: `run`, `clean`, `run_and_clean`,
/// each parameterized by the root task type.
pub struct Executor;

impl Executor {
    /// Builds the static graph rooted at `R`, runs it to completion, and
    /// returns `R`'s output or the aggregated failure.
    pub fn run<R: Task>(
        args: Args,
        options: ExecutorOptions,
    ) -> Result<Arc<R::Output>, ExecutionError> {
        let runtime = build_runtime(&options);
        runtime.block_on(run_async::<R>(args, options))
    }

    pub fn clean<R: Task>(args: Args, options: ExecutorOptions) -> Result<(), ExecutionError> {
        let runtime = build_runtime(&options);
        runtime.block_on(clean_async::<R>(args, options))
    }

    /// Always runs `clean` after `run`, even when `run` fails, and returns
    /// `run`'s outcome. A `clean` failure that would otherwise be silently
    /// dropped is logged instead.
    pub fn run_and_clean<R: Task>(
        args: Args,
        options: ExecutorOptions,
    ) -> Result<Arc<R::Output>, ExecutionError> {
        let runtime = build_runtime(&options);
        runtime.block_on(async {
            let run_result = run_async::<R>(args.clone(), options.clone()).await;
            if let Err(clean_failure) = clean_async::<R>(args, options).await {
                tracing::error!(
                    error = %clean_failure.message(),
                    "clean phase failed after run; run's own outcome is still returned"
                );
            }
            run_result
        })
    }
}

fn build_runtime(options: &ExecutorOptions) -> tokio::runtime::Runtime {
    let workers = options
        .workers
        .map(NonZeroUsize::get)
        .unwrap_or_else(default_worker_count);
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .worker_threads(workers)
        .build()
        .expect("taski couldn't start its worker pool")
}

fn default_worker_count() -> usize {
    std::thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(4)
}

fn prepare_context<R: Task>(
    args: Args,
    options: ExecutorOptions,
) -> Result<(Arc<ExecutionContext>, TaskTypeId), ExecutionError> {
    let root = TaskTypeId::of::<R>();

    let graph = DependencyGraph::build(root)
        .map_err(|cycle| {
            ExecutionFailure {
                failures: vec![crate::error::TaskFailure {
                    task: root,
                    error: Arc::new(TaskError::failed(cycle.to_string())),
                    output_tail: Vec::new(),
                }],
            }
            .into()
        })?;

    let registry = Registry::new();
    for &node in graph.nodes() {
        if let Some(descriptor) = crate::task::descriptor_of(node) {
            registry.ensure(node, descriptor.spawn_wrapper);
        }
    }

    let exec = Arc::new(ExecutionContext::new(registry, graph, args, options.observers));
    Ok((exec, root))
}

async fn run_async<R: Task>(
    args: Args,
    options: ExecutorOptions,
) -> Result<Arc<R::Output>, ExecutionError> {
    let (exec, root) = prepare_context::<R>(args, options)?;

    exec.notify_ready();
    exec.notify_start();
    exec.set_phase(Phase::Run);
    exec.notify_phase_started(Phase::Run);

    let wrapper = exec.registry.get_or_create::<R>();
    wrapper.mark_running();
    exec.notify_task_updated(root, TaskState::Pending, TaskState::Running, Phase::Run);

    let root_ctx = TaskContext::new(exec.clone(), root);
    let result = run_body::<R>(wrapper.clone(), root_ctx).await;

    match &result {
        Ok(_) => exec.notify_task_updated(root, TaskState::Running, TaskState::Completed, Phase::Run),
        Err(_) => exec.notify_task_updated(root, TaskState::Running, TaskState::Failed, Phase::Run),
    }

    // Every wrapper still Pending at this point was never reached by any
    // await chain from the root; skip-sweep them (§4.3.5 step 6). Wrappers
    // still Running belong to in-flight sibling work spawned off the root's
    // call graph and are left alone — no mid-flight cancellation. The same
    // pass collects every wrapper left Failed (the root's own wrapper
    // included, since `run_body` marks it the same way any dependency's
    // wrapper gets marked) into the aggregate, attributed to the task it
    // actually originated from rather than just the root's own propagated
    // error (§6.4's `TaskFailure(task_class, ...)` contract).
    let mut failure = ExecutionFailure::default();
    for any in exec.registry.all() {
        match any.state() {
            TaskState::Pending => {
                if any.mark_skipped() {
                    exec.notify_task_updated(any.type_id(), TaskState::Pending, TaskState::Skipped, Phase::Run);
                }
            }
            TaskState::Failed => {
                if let Some(error) = any.error() {
                    let tail = exec.output.tail(any.type_id());
                    failure.push_dedup(any.type_id(), error, tail);
                }
            }
            _ => {}
        }
    }

    exec.notify_phase_completed(Phase::Run);
    exec.notify_stop();

    if let Some(aborted) = failure.aborted_cause() {
        return Err(ExecutionError::Aborted(aborted));
    }

    if failure.failures.is_empty() {
        Ok(result.expect("root wrapper only settles Ok when nothing in the registry is Failed"))
    } else {
        Err(ExecutionError::Failed(failure))
    }
}

async fn clean_async<R: Task>(args: Args, options: ExecutorOptions) -> Result<(), ExecutionError> {
    let (exec, _root) = prepare_context::<R>(args, options)?;

    exec.notify_ready();
    exec.notify_start();
    exec.set_phase(Phase::Clean);
    exec.notify_phase_started(Phase::Clean);

    // Clean runs dependents-before-dependencies: the reverse of run order.
    let mut order = exec.graph.topological_order();
    order.reverse();

    let mut failure = ExecutionFailure::default();
    for node in order {
        let Some(descriptor) = crate::task::descriptor_of(node) else {
            continue;
        };

        exec.notify_task_updated(node, TaskState::Pending, TaskState::Running, Phase::Clean);
        match (descriptor.clean)(exec.clone()).await {
            Ok(()) => {
                exec.notify_task_updated(node, TaskState::Running, TaskState::Completed, Phase::Clean)
            }
            Err(e) => {
                exec.notify_task_updated(node, TaskState::Running, TaskState::Failed, Phase::Clean);
                let tail = exec.output.tail(node);
                failure.push_dedup(node, Arc::new(e), tail);
            }
        }
    }

    exec.notify_phase_completed(Phase::Clean);
    exec.notify_stop();

    if let Some(aborted) = failure.aborted_cause() {
        return Err(ExecutionError::Aborted(aborted));
    }

    if failure.failures.is_empty() {
        Ok(())
    } else {
        Err(ExecutionError::Failed(failure))
    }
}

/// The per-task-type erasure boundary for the clean phase — stored as a
/// function pointer on every `TaskDescriptor` (the macro emits
/// `dispatch_clean::<Self>` at registration), the clean-phase counterpart
/// of `spawn_wrapper`.
pub fn dispatch_clean<T: Task>(exec: Arc<ExecutionContext>) -> CleanFuture {
    Box::pin(async move {
        let wrapper = exec.registry.get_or_create::<T>();
        if !wrapper.mark_clean_running() {
            return Ok(());
        }

        let ctx = TaskContext::new(exec, TaskTypeId::of::<T>());
        let mut task = T::default();

        let outcome = AssertUnwindSafe(task.clean(&ctx)).catch_unwind().await;

        match outcome {
            Ok(Ok(())) => {
                wrapper.mark_clean_completed();
                Ok(())
            }
            Ok(Err(error)) => {
                wrapper.mark_clean_failed();
                Err(error)
            }
            Err(panic) => {
                let error = TaskError::Panic(panic_message(panic.as_ref()));
                wrapper.mark_clean_failed();
                Err(error)
            }
        }
    })
}

/// Runs `T::run` to completion, settling `wrapper` and returning the typed
/// outcome the caller (another task's `TaskContext::value`, via the
/// `Start` branch of `request_value`) is waiting for.
pub(crate) async fn run_task<T: Task>(
    wrapper: Arc<TaskWrapper<T>>,
    ctx: TaskContext,
) -> Result<Arc<T::Output>, Arc<TaskError>> {
    let exec = ctx.exec.clone();
    let node = ctx.current;

    let handle = tokio::spawn(run_body::<T>(wrapper, ctx));

    let result = match handle.await {
        Ok(r) => r,
        Err(join_error) => Err(Arc::new(TaskError::Panic(join_error.to_string()))),
    };

    match &result {
        Ok(_) => exec.notify_task_updated(node, TaskState::Running, TaskState::Completed, exec.phase()),
        Err(_) => exec.notify_task_updated(node, TaskState::Running, TaskState::Failed, exec.phase()),
    }

    result
}

async fn run_body<T: Task>(
    wrapper: Arc<TaskWrapper<T>>,
    ctx: TaskContext,
) -> Result<Arc<T::Output>, Arc<TaskError>> {
    let mut task = T::default();

    let outcome = AssertUnwindSafe(task.run(&ctx)).catch_unwind().await;

    match outcome {
        Ok(Ok(value)) => {
            wrapper.mark_completed(value);
            Ok(wrapper.result().expect("wrapper was just marked Completed"))
        }
        Ok(Err(error)) => {
            wrapper.mark_failed(error);
            Err(wrapper.error().expect("wrapper was just marked Failed"))
        }
        Err(panic) => {
            let error = TaskError::Panic(panic_message(panic.as_ref()));
            wrapper.mark_failed(error);
            Err(wrapper.error().expect("wrapper was just marked Failed"))
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
