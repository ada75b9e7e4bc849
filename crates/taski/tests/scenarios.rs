//! End-to-end scenarios from the design notes: a linear chain, a diamond
//! DAG, independent parallel timing, a cycle, a dependency failure, and a
//! bounded-termination parallel failure.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use taski::{Args, ExecutionError, Executor, ExecutorOptions, Task, TaskContext, TaskError, TaskTypeId};
use taski_macros::task;

fn opts(workers: usize) -> ExecutorOptions {
    ExecutorOptions::new().with_workers(NonZeroUsize::new(workers).unwrap())
}

mod linear_chain {
    use super::*;

    #[derive(Debug, Default)]
    pub struct A;
    #[task]
    impl Task for A {
        type Output = String;
        async fn run(&mut self, _ctx: &TaskContext) -> Result<String, TaskError> {
            Ok("A".to_string())
        }
    }

    #[derive(Debug, Default)]
    pub struct B;
    #[task]
    impl Task for B {
        type Output = String;
        async fn run(&mut self, ctx: &TaskContext) -> Result<String, TaskError> {
            let a = ctx.value::<A>().await.map_err(|e| TaskError::failed(e.to_string()))?;
            Ok(format!("{a}->B"))
        }
    }

    #[derive(Debug, Default)]
    pub struct C;
    #[task]
    impl Task for C {
        type Output = String;
        async fn run(&mut self, ctx: &TaskContext) -> Result<String, TaskError> {
            let b = ctx.value::<B>().await.map_err(|e| TaskError::failed(e.to_string()))?;
            Ok(format!("{b}->C"))
        }
    }
}

#[test]
fn linear_chain_composes_in_order() {
    let result = Executor::run::<linear_chain::C>(Args::new(), opts(4));
    let value = result.expect("chain should succeed");
    assert_eq!(*value, "A->B->C");
}

mod diamond {
    use super::*;

    pub static C_STARTS: AtomicUsize = AtomicUsize::new(0);

    #[derive(Debug, Default)]
    pub struct Leaf;
    #[task]
    impl Task for Leaf {
        type Output = String;
        async fn run(&mut self, _ctx: &TaskContext) -> Result<String, TaskError> {
            C_STARTS.fetch_add(1, Ordering::SeqCst);
            Ok("C".to_string())
        }
    }

    #[derive(Debug, Default)]
    pub struct Left;
    #[task]
    impl Task for Left {
        type Output = String;
        async fn run(&mut self, ctx: &TaskContext) -> Result<String, TaskError> {
            let c = ctx.value::<Leaf>().await.map_err(|e| TaskError::failed(e.to_string()))?;
            Ok(format!("A({c})"))
        }
    }

    #[derive(Debug, Default)]
    pub struct Right;
    #[task]
    impl Task for Right {
        type Output = String;
        async fn run(&mut self, ctx: &TaskContext) -> Result<String, TaskError> {
            let c = ctx.value::<Leaf>().await.map_err(|e| TaskError::failed(e.to_string()))?;
            Ok(format!("B({c})"))
        }
    }

    #[derive(Debug, Default)]
    pub struct Root;
    #[task]
    impl Task for Root {
        type Output = String;
        async fn run(&mut self, ctx: &TaskContext) -> Result<String, TaskError> {
            let (left, right) = futures::future::join(ctx.value::<Left>(), ctx.value::<Right>()).await;
            let left = left.map_err(|e| TaskError::failed(e.to_string()))?;
            let right = right.map_err(|e| TaskError::failed(e.to_string()))?;
            Ok(format!("Root({left}, {right})"))
        }
    }
}

#[test]
fn diamond_dependency_runs_exactly_once() {
    let result = Executor::run::<diamond::Root>(Args::new(), opts(4));
    let value = result.expect("diamond should succeed");
    assert_eq!(*value, "Root(A(C), B(C))");
    assert_eq!(diamond::C_STARTS.load(Ordering::SeqCst), 1);
}

mod parallel_independence {
    use super::*;

    #[derive(Debug, Default)]
    pub struct SleepA;
    #[task]
    impl Task for SleepA {
        type Output = String;
        async fn run(&mut self, _ctx: &TaskContext) -> Result<String, TaskError> {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok("A".to_string())
        }
    }

    #[derive(Debug, Default)]
    pub struct SleepB;
    #[task]
    impl Task for SleepB {
        type Output = String;
        async fn run(&mut self, _ctx: &TaskContext) -> Result<String, TaskError> {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok("B".to_string())
        }
    }

    #[derive(Debug, Default)]
    pub struct Both;
    #[task]
    impl Task for Both {
        type Output = String;
        async fn run(&mut self, ctx: &TaskContext) -> Result<String, TaskError> {
            let (a, b) = futures::future::join(ctx.value::<SleepA>(), ctx.value::<SleepB>()).await;
            let a = a.map_err(|e| TaskError::failed(e.to_string()))?;
            let b = b.map_err(|e| TaskError::failed(e.to_string()))?;
            Ok(format!("{a}+{b}"))
        }
    }
}

#[test]
fn independent_parallel_tasks_run_concurrently() {
    let start = Instant::now();
    let result = Executor::run::<parallel_independence::Both>(Args::new(), opts(2));
    let value = result.expect("parallel run should succeed");
    assert_eq!(*value, "A+B");
    assert!(
        start.elapsed() < Duration::from_millis(350),
        "expected the two 100ms sleeps to overlap, took {:?}",
        start.elapsed()
    );
}

mod cycle {
    use super::*;

    #[derive(Debug, Default)]
    pub struct Ping;
    #[task]
    impl Task for Ping {
        type Output = ();
        async fn run(&mut self, ctx: &TaskContext) -> Result<(), TaskError> {
            ctx.value::<Pong>().await.map_err(|e| TaskError::failed(e.to_string()))?;
            Ok(())
        }
    }

    #[derive(Debug, Default)]
    pub struct Pong;
    #[task]
    impl Task for Pong {
        type Output = ();
        async fn run(&mut self, ctx: &TaskContext) -> Result<(), TaskError> {
            ctx.value::<Relay>().await.map_err(|e| TaskError::failed(e.to_string()))?;
            Ok(())
        }
    }

    #[derive(Debug, Default)]
    pub struct Relay;
    #[task]
    impl Task for Relay {
        type Output = ();
        async fn run(&mut self, ctx: &TaskContext) -> Result<(), TaskError> {
            ctx.value::<Ping>().await.map_err(|e| TaskError::failed(e.to_string()))?;
            Ok(())
        }
    }
}

#[test]
fn cycle_is_rejected_before_any_task_runs() {
    let result = Executor::run::<cycle::Ping>(Args::new(), opts(2));
    let failure = result.expect_err("a 3-cycle must be rejected");
    let message = failure.message();
    assert!(message.contains("Ping"), "{message}");
    assert!(message.contains("Pong"), "{message}");
    assert!(message.contains("Relay"), "{message}");
}

mod dependency_failure {
    use super::*;

    #[derive(Debug, Default)]
    pub struct Flaky;
    #[task]
    impl Task for Flaky {
        type Output = ();
        async fn run(&mut self, _ctx: &TaskContext) -> Result<(), TaskError> {
            Err(TaskError::failed("Task A failed"))
        }
    }

    #[derive(Debug, Default)]
    pub struct Dependent;
    #[task]
    impl Task for Dependent {
        type Output = ();
        async fn run(&mut self, ctx: &TaskContext) -> Result<(), TaskError> {
            ctx.value::<Flaky>().await.map_err(|e| TaskError::failed(e.to_string()))?;
            Ok(())
        }
    }
}

#[test]
fn dependency_failure_surfaces_once() {
    let result = Executor::run::<dependency_failure::Dependent>(Args::new(), opts(2));
    let failure: ExecutionError = result.expect_err("dependent must fail");
    assert_eq!(failure.failures().len(), 1);
    assert_eq!(failure.failures()[0].task, TaskTypeId::of::<dependency_failure::Flaky>());
    assert!(failure.message().contains("Task A failed"));
}

mod bounded_parallel_failure {
    use super::*;

    #[derive(Debug, Default)]
    pub struct FastFail;
    #[task]
    impl Task for FastFail {
        type Output = ();
        async fn run(&mut self, _ctx: &TaskContext) -> Result<(), TaskError> {
            Err(TaskError::failed("fast failure"))
        }
    }

    #[derive(Debug, Default)]
    pub struct SlowSleep;
    #[task]
    impl Task for SlowSleep {
        type Output = ();
        async fn run(&mut self, _ctx: &TaskContext) -> Result<(), TaskError> {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(())
        }
    }

    #[derive(Debug, Default)]
    pub struct Root;
    #[task]
    impl Task for Root {
        type Output = ();
        async fn run(&mut self, ctx: &TaskContext) -> Result<(), TaskError> {
            let (fast, slow) = futures::future::join(ctx.value::<FastFail>(), ctx.value::<SlowSleep>()).await;
            fast.map_err(|e| TaskError::failed(e.to_string()))?;
            slow.map_err(|e| TaskError::failed(e.to_string()))?;
            Ok(())
        }
    }
}

mod aborted_bypass {
    use super::*;

    #[derive(Debug, Default)]
    pub struct AbortSignal;
    #[task]
    impl Task for AbortSignal {
        type Output = ();
        async fn run(&mut self, _ctx: &TaskContext) -> Result<(), TaskError> {
            Err(TaskError::Aborted("user requested abort".to_string()))
        }
    }

    #[derive(Debug, Default)]
    pub struct Root;
    #[task]
    impl Task for Root {
        type Output = ();
        async fn run(&mut self, ctx: &TaskContext) -> Result<(), TaskError> {
            ctx.value::<AbortSignal>().await.map_err(|e| (*e).clone())?;
            Ok(())
        }
    }
}

#[test]
fn aborted_dependency_bypasses_aggregation() {
    let result = Executor::run::<aborted_bypass::Root>(Args::new(), opts(2));
    match result.expect_err("an Aborted dependency must surface") {
        ExecutionError::Aborted(err) => {
            assert!(err.to_string().contains("user requested abort"), "{err}");
        }
        ExecutionError::Failed(failure) => {
            panic!("expected a verbatim Aborted error, got an aggregate instead: {}", failure.message())
        }
    }
}

#[test]
fn parallel_failure_terminates_in_bounded_time() {
    let start = Instant::now();
    let result = Executor::run::<bounded_parallel_failure::Root>(Args::new(), opts(2));
    let failure = result.expect_err("fast failure must surface");
    assert!(start.elapsed() < Duration::from_secs(2));
    assert!(failure.message().contains("fast failure"));
}
