//! # Task groups
//!
//! Runs named tasks concurrently under one shared [`CancellationScope`].
//!
//! ```text
//! register("a") ┐
//! register("b") ├─ run() ─► RunningGroup ─ join() ─► first TaskFailure / Ok
//! register("c") ┘
//! ```
//!
//! ## Rules
//! - Every task receives a clone of the same group scope
//! - The first task to return an error cancels the group scope immediately
//! - A task that returns `Ok(())` never cancels anything
//! - `join()` waits for **every** task, even after a failure has been seen
//! - Cancellation is cooperative: the group never aborts a task. A task that
//!   ignores its scope keeps `join()` waiting
//! - A panicking task is reported as a failure like any other error

use futures::future::BoxFuture;
use futures::FutureExt;
use log::{debug, info, warn};
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use tokio::task::JoinSet;

use crate::error::TaskFailure;
use crate::scope::CancellationScope;

type TaskFn = Box<dyn FnOnce(CancellationScope) -> BoxFuture<'static, anyhow::Result<()>> + Send>;

/// Collects named tasks before they are started.
pub struct TaskGroup {
    scope: CancellationScope,
    pending: Vec<(String, TaskFn)>,
}

impl TaskGroup {
    /// Creates a group whose scope is a child of `parent`.
    ///
    /// Cancelling `parent` cancels the group; a failing task cancels only the
    /// group scope.
    pub fn new(parent: &CancellationScope) -> Self {
        Self {
            scope: parent.child(),
            pending: Vec::new(),
        }
    }

    /// The scope every task of this group receives
    pub fn scope(&self) -> CancellationScope {
        self.scope.clone()
    }

    pub fn register<F, Fut>(&mut self, name: impl Into<String>, task: F)
    where
        F: FnOnce(CancellationScope) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let name = name.into();
        debug!("Registered task `{}`", name);
        self.pending
            .push((name, Box::new(move |scope| task(scope).boxed())));
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Starts every registered task on the tokio runtime.
    pub fn run(self) -> RunningGroup {
        let mut tasks = JoinSet::new();

        for (name, task) in self.pending {
            let scope = self.scope.clone();
            info!("Starting task `{}`", name);
            tasks.spawn(async move {
                let result = match AssertUnwindSafe(task(scope.clone())).catch_unwind().await {
                    Ok(result) => result,
                    Err(panic) => Err(anyhow::anyhow!("panicked: {}", panic_message(&*panic))),
                };
                if result.is_err() {
                    scope.cancel();
                }
                (name, result)
            });
        }

        RunningGroup {
            scope: self.scope,
            tasks,
        }
    }
}

/// Handle over the tasks of a started [`TaskGroup`].
pub struct RunningGroup {
    scope: CancellationScope,
    tasks: JoinSet<(String, anyhow::Result<()>)>,
}

impl RunningGroup {
    pub fn scope(&self) -> CancellationScope {
        self.scope.clone()
    }

    /// Number of tasks that have not been joined yet
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Waits for every task to return and yields the first failure observed.
    pub async fn join(mut self) -> Result<(), TaskFailure> {
        let mut first: Option<TaskFailure> = None;

        while let Some(joined) = self.tasks.join_next().await {
            let (name, result) = match joined {
                Ok(outcome) => outcome,
                Err(e) => (String::from("<unknown>"), Err(anyhow::Error::new(e))),
            };

            match result {
                Ok(()) => info!("Task `{}` finished", name),
                Err(error) if first.is_none() => {
                    warn!("Task `{}` failed: {:#}", name, error);
                    // Normally done by the task wrapper already
                    self.scope.cancel();
                    first = Some(TaskFailure::new(name, error));
                }
                Err(error) => {
                    debug!("Task `{}` failed after the group was cancelled: {:#}", name, error);
                }
            }
        }

        match first {
            Some(failure) => Err(failure),
            None => Ok(()),
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
