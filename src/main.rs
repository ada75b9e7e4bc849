//! Demo CLI for the `taski` executor: builds a small dependency graph and
//! runs it, printing progress through an `Observer` as it goes.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::SystemTime;

use clap::{Parser, Subcommand};
use taski::{
    Args, ExecutionError, Executor, ExecutorOptions, Observer, Phase, Task, TaskContext,
    TaskError, TaskState, TaskTypeId,
};

#[derive(Parser, Debug)]
#[command(name = "taski-demo", author, version, about = "Taski executor demo")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Worker pool size. Defaults to the number of available CPUs.
    #[arg(long, global = true)]
    workers: Option<NonZeroUsize>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build and download a small fan-out/fan-in artifact graph.
    Build,

    /// Run the build graph, then clean up everything it produced.
    BuildAndClean,
}

fn main() {
    taski::init_logging();

    let cli = Cli::parse();
    let options = |observers: Vec<Arc<dyn Observer>>| {
        let mut opts = ExecutorOptions::new();
        if let Some(workers) = cli.workers {
            opts = opts.with_workers(workers);
        }
        for observer in observers {
            opts = opts.with_observer(observer);
        }
        opts
    };

    let logger: Arc<dyn Observer> = Arc::new(LoggingObserver);

    match cli.command.unwrap_or(Command::Build) {
        Command::Build => match Executor::run::<Deploy>(Args::new(), options(vec![logger])) {
            Ok(artifact) => tracing::info!(%artifact, "build finished"),
            Err(failure) => report_failure(&failure),
        },
        Command::BuildAndClean => {
            match Executor::run_and_clean::<Deploy>(Args::new(), options(vec![logger])) {
                Ok(artifact) => tracing::info!(%artifact, "build and clean finished"),
                Err(failure) => report_failure(&failure),
            }
        }
    }
}

fn report_failure(failure: &ExecutionError) {
    tracing::error!(error = %failure.message(), "execution failed");
    std::process::exit(1);
}

/// Prints every state transition as it happens, demonstrating the
/// pull-based observer protocol.
struct LoggingObserver;

impl Observer for LoggingObserver {
    fn on_ready(&self) {
        tracing::debug!("executor ready");
    }

    fn on_phase_started(&self, phase: Phase) {
        tracing::info!(?phase, "phase started");
    }

    fn on_task_updated(
        &self,
        task: TaskTypeId,
        previous: TaskState,
        current: TaskState,
        phase: Phase,
        _at: SystemTime,
    ) {
        tracing::info!(task = task.name(), ?previous, ?current, ?phase, "task updated");
    }

    fn on_phase_completed(&self, phase: Phase) {
        tracing::info!(?phase, "phase completed");
    }
}

#[derive(Debug, Default)]
struct FetchSources;

#[taski::task]
impl Task for FetchSources {
    type Output = String;

    async fn run(&mut self, _ctx: &TaskContext) -> Result<String, TaskError> {
        Ok("source.tar.gz".to_string())
    }
}

#[derive(Debug, Default)]
struct FetchDependencies;

#[taski::task]
impl Task for FetchDependencies {
    type Output = String;

    async fn run(&mut self, _ctx: &TaskContext) -> Result<String, TaskError> {
        Ok("vendor/".to_string())
    }
}

#[derive(Debug, Default)]
struct Compile;

#[taski::task]
impl Task for Compile {
    type Output = String;

    async fn run(&mut self, ctx: &TaskContext) -> Result<String, TaskError> {
        let (sources, deps) = futures::future::join(
            ctx.value::<FetchSources>(),
            ctx.value::<FetchDependencies>(),
        )
        .await;
        let sources = sources.map_err(|e| TaskError::failed(e.to_string()))?;
        let deps = deps.map_err(|e| TaskError::failed(e.to_string()))?;
        Ok(format!("binary(built from {sources} with {deps})"))
    }

    async fn clean(&mut self, _ctx: &TaskContext) -> Result<(), TaskError> {
        tracing::info!("removed build artifacts");
        Ok(())
    }
}

#[derive(Debug, Default)]
struct Deploy;

#[taski::task]
impl Task for Deploy {
    type Output = String;

    async fn run(&mut self, ctx: &TaskContext) -> Result<String, TaskError> {
        let artifact = ctx
            .value::<Compile>()
            .await
            .map_err(|e| TaskError::failed(e.to_string()))?;
        Ok(format!("deployed({artifact})"))
    }

    async fn clean(&mut self, _ctx: &TaskContext) -> Result<(), TaskError> {
        tracing::info!("rolled back deployment");
        Ok(())
    }
}
