//! Per-task callbacks.

use wf_api_contract::WorkflowEvent;
use wf_client_api::ClientApiError;

use crate::task::TaskStatus;

/// Receives a task's progress.
///
/// `on_event` sees each newly recorded event exactly once, in order;
/// replayed history is never reported twice. `on_error` is called once per
/// failure.
pub trait TaskObserver: Send + Sync {
    fn on_event(&self, _task_id: &str, _event: &WorkflowEvent) {}

    fn on_status(&self, _task_id: &str, _status: TaskStatus) {}

    fn on_error(&self, _task_id: &str, _error: &ClientApiError) {}
}

/// Observer that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl TaskObserver for NoopObserver {}
