use thiserror::Error;

/// The first error reported by a task of a [`crate::TaskGroup`].
#[derive(Error, Debug)]
#[error("task `{task}` failed: {source:#}")]
pub struct TaskFailure {
    task: String,
    #[source]
    source: anyhow::Error,
}

impl TaskFailure {
    pub fn new(task: impl Into<String>, source: anyhow::Error) -> Self {
        Self {
            task: task.into(),
            source,
        }
    }

    /// Name the failing task was registered under
    pub fn task(&self) -> &str {
        &self.task
    }

    pub fn error(&self) -> &anyhow::Error {
        &self.source
    }
}
