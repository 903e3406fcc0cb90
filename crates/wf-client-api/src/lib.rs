//! Client API trait for workflow deployments
//!
//! [`WorkflowApi`] is the seam between task orchestration and the wire: the
//! REST client implements it over HTTP and the mock client implements it from
//! scripted responses. Both decode the event stream with
//! [`drive_event_stream`], so framing and classification behave identically.

pub mod sink;
pub mod stream;

pub use sink::EventSink;
pub use stream::drive_event_stream;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use wf_api_contract::{TaskDefinition, WorkflowEvent};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientApiError {
    #[error("session creation failed: {0}")]
    SessionCreation(String),
    #[error("task creation failed: {0}")]
    TaskCreation(String),
    #[error("sending event failed: {0}")]
    EventSend(String),
    #[error("reading event stream failed: {0}")]
    StreamRead(String),
    #[error("no session has been established")]
    NoSession,
    #[error("session {requested} does not match established session {established}")]
    SessionMismatch {
        established: String,
        requested: String,
    },
}

pub type ClientApiResult<T> = Result<T, ClientApiError>;

#[async_trait]
pub trait WorkflowApi: Send + Sync {
    /// The session every task of this client runs under, once established.
    fn session_id(&self) -> Option<String>;

    /// Create a brand new session. Calling this twice creates two sessions.
    async fn create_session(&self) -> ClientApiResult<String>;

    /// Return the client's session, creating it on first use.
    ///
    /// Concurrent first callers share a single creation request.
    async fn ensure_session(&self) -> ClientApiResult<String>;

    /// Bind the client to an externally known session.
    async fn adopt_session(&self, session_id: &str) -> ClientApiResult<()>;

    /// Start a task with the given JSON input, creating the session if needed.
    async fn create_task(&self, input: &Value) -> ClientApiResult<TaskDefinition>;

    /// Deliver `event` to a running task.
    async fn send_event_to_task(&self, task_id: &str, event: &WorkflowEvent)
        -> ClientApiResult<()>;

    /// Read the task's event log until the server closes it, the sink
    /// breaks, or `cancel` fires.
    async fn stream_task_events(
        &self,
        task_id: &str,
        sink: &mut (dyn EventSink + Send),
        cancel: CancellationToken,
    ) -> ClientApiResult<Vec<WorkflowEvent>>;
}
