//! Core error types for task orchestration.

use wf_client_api::ClientApiError;

/// Core error type for all task and registry operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Task {task_id} not found")]
    TaskNotFound { task_id: String },

    #[error("Task has not been created yet")]
    TaskNotCreated,

    #[error("Task {task_id} was already started")]
    AlreadyStarted { task_id: String },

    #[error("Task {task_id} has failed and no longer accepts events")]
    TaskFailed { task_id: String },

    #[error(transparent)]
    Api(#[from] ClientApiError),
}

impl Error {
    /// Create a new task-not-found error.
    pub fn task_not_found<S: Into<String>>(task_id: S) -> Self {
        Self::TaskNotFound {
            task_id: task_id.into(),
        }
    }
}
