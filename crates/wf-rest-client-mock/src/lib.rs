//! Mock workflow client backed by scripted responses
//!
//! Task ids are handed out as `task-1`, `task-2`, ... in creation order so a
//! test can script each task's event stream before the task exists. Every
//! call to `stream_task_events` consumes the next script queued for that
//! task; an unscripted read yields an empty body.
//!
//! [`StreamScript::Interactive`] models a task paused for human input: its
//! event log stays open until an event is sent, then carries the reaction.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use serde_json::Value;
use tokio::sync::{watch, OnceCell};
use tokio_util::sync::CancellationToken;
use wf_api_contract::{RawEventEnvelope, TaskDefinition, WorkflowEvent};
use wf_client_api::{
    drive_event_stream, ClientApiError, ClientApiResult, EventSink, WorkflowApi,
};

pub const MOCK_SERVICE_ID: &str = "mock_workflow";

/// One scripted response of the task event endpoint
#[derive(Debug, Clone)]
pub enum StreamScript {
    /// Body chunks delivered in order, then the server closes the body
    Body(Vec<String>),
    /// Error status returned before any byte of the body
    Status(u16),
    /// Body chunks followed by a read failure
    BodyThenError(Vec<String>, String),
    /// Body chunks after which the connection stays open until cancelled
    BodyThenHang(Vec<String>),
    /// `before` chunks, then nothing until an event is sent after the stream
    /// was opened, then `after` chunks and a clean close
    Interactive {
        before: Vec<String>,
        after: Vec<String>,
    },
}

impl StreamScript {
    /// A well-formed body carrying `events`, one envelope per line
    pub fn events(events: &[WorkflowEvent]) -> Self {
        Self::Body(vec![ndjson(events)])
    }
}

/// Encode `event` as one wire envelope line
pub fn envelope_line(event: &WorkflowEvent) -> String {
    let envelope = serde_json::to_string(&RawEventEnvelope::from(event))
        .expect("event envelope serializes to JSON");
    format!("{envelope}\n")
}

/// Encode `events` as a newline-delimited body
pub fn ndjson(events: &[WorkflowEvent]) -> String {
    events.iter().map(envelope_line).collect()
}

#[derive(Debug, Default)]
struct MockState {
    sessions_created: usize,
    tasks_created: usize,
    fail_session_creation: bool,
    fail_task_creation: bool,
    fail_sends: bool,
    streams: HashMap<String, VecDeque<StreamScript>>,
    stream_reads: HashMap<String, usize>,
    inputs: Vec<Value>,
    sent: Vec<(String, WorkflowEvent)>,
}

#[derive(Debug)]
pub struct MockClient {
    session: OnceCell<String>,
    state: Mutex<MockState>,
    sends: watch::Sender<usize>,
}

impl Default for MockClient {
    fn default() -> Self {
        Self {
            session: OnceCell::new(),
            state: Mutex::default(),
            sends: watch::channel(0).0,
        }
    }
}

impl MockClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_session_id(session_id: impl Into<String>) -> Self {
        Self {
            session: OnceCell::new_with(Some(session_id.into())),
            ..Self::default()
        }
    }

    /// Queue the next response of the event endpoint for `task_id`.
    pub fn script_stream(&self, task_id: &str, script: StreamScript) -> &Self {
        self.state()
            .streams
            .entry(task_id.to_string())
            .or_default()
            .push_back(script);
        self
    }

    pub fn fail_session_creation(&self) -> &Self {
        self.state().fail_session_creation = true;
        self
    }

    pub fn fail_task_creation(&self) -> &Self {
        self.state().fail_task_creation = true;
        self
    }

    pub fn fail_sends(&self) -> &Self {
        self.state().fail_sends = true;
        self
    }

    pub fn sessions_created(&self) -> usize {
        self.state().sessions_created
    }

    pub fn tasks_created(&self) -> usize {
        self.state().tasks_created
    }

    /// Number of times the event endpoint was opened for `task_id`
    pub fn stream_reads(&self, task_id: &str) -> usize {
        self.state().stream_reads.get(task_id).copied().unwrap_or(0)
    }

    /// Task inputs in creation order
    pub fn inputs(&self) -> Vec<Value> {
        self.state().inputs.clone()
    }

    /// Events delivered through `send_event_to_task`, in order
    pub fn sent_events(&self) -> Vec<(String, WorkflowEvent)> {
        self.state().sent.clone()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn next_script(&self, task_id: &str) -> Option<StreamScript> {
        let mut state = self.state();
        *state.stream_reads.entry(task_id.to_string()).or_default() += 1;
        state
            .streams
            .get_mut(task_id)
            .and_then(VecDeque::pop_front)
    }
}

fn chunk_stream(chunks: Vec<String>) -> BoxStream<'static, Result<Vec<u8>, String>> {
    stream::iter(chunks.into_iter().map(|chunk| Ok(chunk.into_bytes()))).boxed()
}

#[async_trait]
impl WorkflowApi for MockClient {
    fn session_id(&self) -> Option<String> {
        self.session.get().cloned()
    }

    async fn create_session(&self) -> ClientApiResult<String> {
        tokio::task::yield_now().await;
        let mut state = self.state();
        if state.fail_session_creation {
            return Err(ClientApiError::SessionCreation(
                "HTTP 500 Internal Server Error".into(),
            ));
        }
        state.sessions_created += 1;
        Ok(format!("session-{}", state.sessions_created))
    }

    async fn ensure_session(&self) -> ClientApiResult<String> {
        self.session
            .get_or_try_init(|| self.create_session())
            .await
            .cloned()
    }

    async fn adopt_session(&self, session_id: &str) -> ClientApiResult<()> {
        if self.session.get().is_none() {
            let _ = self.session.set(session_id.to_string());
        }
        match self.session.get() {
            Some(established) if established == session_id => Ok(()),
            Some(established) => Err(ClientApiError::SessionMismatch {
                established: established.clone(),
                requested: session_id.to_string(),
            }),
            None => Err(ClientApiError::NoSession),
        }
    }

    async fn create_task(&self, input: &Value) -> ClientApiResult<TaskDefinition> {
        let session_id = self.ensure_session().await?;
        let mut state = self.state();
        if state.fail_task_creation {
            return Err(ClientApiError::TaskCreation(
                "HTTP 500 Internal Server Error".into(),
            ));
        }
        state.tasks_created += 1;
        state.inputs.push(input.clone());
        Ok(TaskDefinition {
            task_id: format!("task-{}", state.tasks_created),
            session_id,
            service_id: MOCK_SERVICE_ID.to_string(),
            input: input.to_string(),
        })
    }

    async fn send_event_to_task(
        &self,
        task_id: &str,
        event: &WorkflowEvent,
    ) -> ClientApiResult<()> {
        if self.session.get().is_none() {
            return Err(ClientApiError::NoSession);
        }
        let mut state = self.state();
        if state.fail_sends {
            return Err(ClientApiError::EventSend("HTTP 500 Internal Server Error".into()));
        }
        state.sent.push((task_id.to_string(), event.clone()));
        drop(state);
        self.sends.send_modify(|count| *count += 1);
        Ok(())
    }

    async fn stream_task_events(
        &self,
        task_id: &str,
        sink: &mut (dyn EventSink + Send),
        cancel: CancellationToken,
    ) -> ClientApiResult<Vec<WorkflowEvent>> {
        if self.session.get().is_none() {
            let error = ClientApiError::NoSession;
            sink.on_error(&error);
            return Err(error);
        }

        let body = match self.next_script(task_id) {
            None => chunk_stream(Vec::new()),
            Some(StreamScript::Body(chunks)) => chunk_stream(chunks),
            Some(StreamScript::Status(status)) => {
                let error = ClientApiError::StreamRead(format!("HTTP {status}"));
                tracing::warn!(task_id, %error, "scripted stream failure");
                sink.on_error(&error);
                return Err(error);
            }
            Some(StreamScript::BodyThenError(chunks, message)) => chunk_stream(chunks)
                .chain(stream::once(async move { Err(message) }))
                .boxed(),
            Some(StreamScript::BodyThenHang(chunks)) => {
                chunk_stream(chunks).chain(stream::pending()).boxed()
            }
            Some(StreamScript::Interactive { before, after }) => {
                let mut sends = self.sends.subscribe();
                let opened_at = *sends.borrow_and_update();
                let reaction = async move {
                    loop {
                        if *sends.borrow_and_update() > opened_at {
                            break;
                        }
                        if sends.changed().await.is_err() {
                            break;
                        }
                    }
                    chunk_stream(after)
                };
                chunk_stream(before)
                    .chain(stream::once(reaction).flatten())
                    .boxed()
            }
        };

        drive_event_stream(body, sink, &cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_tasks_share_lazily_created_session() {
        let client = MockClient::new();
        let first = client.create_task(&json!({"n": 1})).await.unwrap();
        let second = client.create_task(&json!({"n": 2})).await.unwrap();

        assert_eq!(client.sessions_created(), 1);
        assert_eq!(first.task_id, "task-1");
        assert_eq!(second.task_id, "task-2");
        assert_eq!(first.session_id, second.session_id);
        assert_eq!(client.inputs(), vec![json!({"n": 1}), json!({"n": 2})]);
    }

    #[tokio::test]
    async fn test_scripts_are_consumed_in_order() {
        let client = MockClient::with_session_id("s-1");
        let event = WorkflowEvent::new("app.Progress", json!(1));
        client
            .script_stream("task-1", StreamScript::events(&[event.clone()]))
            .script_stream("task-1", StreamScript::Status(502));

        let first = client
            .stream_task_events("task-1", &mut (), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(first, vec![event]);

        let second = client
            .stream_task_events("task-1", &mut (), CancellationToken::new())
            .await;
        assert!(matches!(second, Err(ClientApiError::StreamRead(_))));

        let third = client
            .stream_task_events("task-1", &mut (), CancellationToken::new())
            .await
            .unwrap();
        assert!(third.is_empty());
        assert_eq!(client.stream_reads("task-1"), 3);
    }

    #[tokio::test]
    async fn test_interactive_stream_waits_for_send() {
        let client = MockClient::with_session_id("s-1");
        let asked = WorkflowEvent::new("app.InputRequiredEvent", json!({}));
        let answer = WorkflowEvent::new("app.Progress", json!(2));
        client.script_stream(
            "task-1",
            StreamScript::Interactive {
                before: vec![envelope_line(&asked)],
                after: vec![envelope_line(&answer)],
            },
        );

        let reader = async {
            client
                .stream_task_events("task-1", &mut (), CancellationToken::new())
                .await
                .unwrap()
        };
        let sender = async {
            tokio::task::yield_now().await;
            assert_eq!(client.stream_reads("task-1"), 1);
            client
                .send_event_to_task("task-1", &WorkflowEvent::new("app.Reply", json!({})))
                .await
                .unwrap();
        };
        let (events, ()) = tokio::join!(reader, sender);

        assert_eq!(events, vec![asked, answer]);
    }

    #[tokio::test]
    async fn test_send_requires_session() {
        let client = MockClient::new();
        let result = client
            .send_event_to_task("task-1", &WorkflowEvent::new("a.B", json!({})))
            .await;
        assert_eq!(result, Err(ClientApiError::NoSession));
    }
}
