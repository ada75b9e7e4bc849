//! Taski: a parallel task executor that derives its dependency DAG by
//! static analysis, runs tasks as suspendable coroutines over a fixed
//! worker pool, and exposes a pull-based observer protocol for progress
//! reporting.
//!
//! ```ignore
//! #[derive(Debug, Default)]
//! struct Fetch;
//!
//! #[taski::task]
//! impl Task for Fetch {
//!     type Output = String;
//!     async fn run(&mut self, _ctx: &TaskContext) -> Result<String, TaskError> {
//!         Ok("payload".into())
//!     }
//! }
//!
//! let output = Executor::run::<Fetch>(Args::new(), ExecutorOptions::new())?;
//! ```

mod args;
mod context;
mod error;
pub mod executor;
mod graph;
mod logging;
mod output;
mod registry;
mod task;
mod wrapper;

pub use args::Args;
pub use context::{ExecutionContext, Observer, Phase, TaskContext};
pub use error::{CycleError, ExecutionError, ExecutionFailure, TaskError, TaskFailure};
pub use executor::{Executor, ExecutorOptions};
pub use graph::DependencyGraph;
pub use logging::init as init_logging;
pub use output::TaskOutputHandle;
pub use registry::Registry;
pub use task::{descriptor_of, CleanFuture, Task, TaskDescriptor, TaskTypeId};
pub use wrapper::{AnyWrapper, TaskState, TaskWrapper, ValueOutcome};

pub use wrapper::spawn_wrapper;

/// Re-exported so `#[taski::task]`'s expansion can refer to `::taski::inventory::submit!`
/// without requiring consumers to depend on `inventory` themselves.
pub use inventory;

/// The attribute macro that derives a task's static dependency list and
/// registers it with the global descriptor table.
pub use taski_macros::task;
