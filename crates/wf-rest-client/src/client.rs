//! Main REST API client implementation

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use reqwest::{Client as HttpClient, Method, Response};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use url::Url;
use validator::Validate;
use wf_api_contract::*;
use wf_client_api::{
    drive_event_stream, ClientApiError, ClientApiResult, EventSink, WorkflowApi,
};

use crate::config::ClientConfig;
use crate::error::{RestClientError, RestClientResult};

/// REST API client for one workflow deployment.
///
/// Clones share the HTTP connection pool and the session, so a single client
/// can be handed to every task of an application.
#[derive(Debug, Clone)]
pub struct RestClient {
    http_client: HttpClient,
    config: Arc<ClientConfig>,
    session: Arc<OnceCell<String>>,
    services: Arc<Mutex<HashMap<String, String>>>,
}

impl RestClient {
    /// Create a new REST client
    pub fn new(config: ClientConfig) -> RestClientResult<Self> {
        config.validate()?;
        let http_client = HttpClient::builder()
            .user_agent(config.user_agent.as_str())
            .build()?;

        Ok(Self {
            http_client,
            config: Arc::new(config),
            session: Arc::new(OnceCell::new()),
            services: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Create a client from a base URL string
    pub fn from_url(base_url: &str, deployment: impl Into<String>) -> RestClientResult<Self> {
        Self::new(ClientConfig::from_url(base_url, deployment)?)
    }

    /// Start from a session created elsewhere instead of creating one lazily.
    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session = Arc::new(OnceCell::new_with(Some(session_id.into())));
        self
    }

    /// Get the client configuration
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// POST `sessions/create`
    pub async fn request_session(&self) -> RestClientResult<String> {
        let url = self.endpoint(&["sessions", "create"])?;
        let response: CreateSessionResponse = self.request(Method::POST, url, None::<&()>).await?;
        tracing::info!(session_id = %response.session_id, deployment = %self.config.deployment, "created session");
        Ok(response.session_id)
    }

    /// POST `tasks/create` under `session_id`
    pub async fn request_task(
        &self,
        session_id: &str,
        request: &CreateTaskRequest,
    ) -> RestClientResult<TaskDefinition> {
        let mut url = self.endpoint(&["tasks", "create"])?;
        url.query_pairs_mut().append_pair("session_id", session_id);
        let task: TaskDefinition = self.request(Method::POST, url, Some(request)).await?;

        self.services
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(task.task_id.clone(), task.service_id.clone());
        tracing::info!(task_id = %task.task_id, session_id, "created task");
        Ok(task)
    }

    /// POST an event to `tasks/{task_id}/events`
    pub async fn post_event(
        &self,
        session_id: &str,
        task_id: &str,
        event: &WorkflowEvent,
    ) -> RestClientResult<()> {
        let mut url = self.endpoint(&["tasks", task_id, "events"])?;
        url.query_pairs_mut().append_pair("session_id", session_id);
        let body = EventDefinition {
            service_id: self.service_id_for(task_id),
            event_obj_str: serde_json::to_string(event)?,
        };

        let response: SendEventResponse = self.request(Method::POST, url, Some(&body)).await?;
        if !response.success {
            return Err(RestClientError::Rejected(format!(
                "event {} was not accepted by task {task_id}",
                event.event_type
            )));
        }
        tracing::debug!(task_id, event_type = %event.event_type, "sent event");
        Ok(())
    }

    /// GET `tasks/{task_id}/events` and return the still-unread response
    pub async fn open_event_stream(&self, task_id: &str) -> RestClientResult<Response> {
        let session_id = self.session.get().ok_or(RestClientError::NoSession)?;
        let mut url = self.endpoint(&["tasks", task_id, "events"])?;
        url.query_pairs_mut()
            .append_pair("session_id", session_id)
            .append_pair("raw_event", "true");

        let response = self.http_client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RestClientError::ServerError { status, body });
        }
        Ok(response)
    }

    // Private helper methods

    fn endpoint(&self, segments: &[&str]) -> RestClientResult<Url> {
        let mut url = self.config.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| RestClientError::InvalidBaseUrl(self.config.base_url.to_string()))?
            .pop_if_empty()
            .push("deployments")
            .push(&self.config.deployment)
            .extend(segments);
        Ok(url)
    }

    fn service_id_for(&self, task_id: &str) -> String {
        self.services
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(task_id)
            .cloned()
            .unwrap_or_else(|| self.config.deployment.clone())
    }

    async fn request<T: DeserializeOwned, B: serde::Serialize>(
        &self,
        method: Method,
        url: Url,
        body: Option<&B>,
    ) -> RestClientResult<T> {
        let mut request = self.http_client.request(method, url);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        self.handle_response(response).await
    }

    async fn handle_response<T: DeserializeOwned>(
        &self,
        response: Response,
    ) -> RestClientResult<T> {
        let status = response.status();
        let text = response.text().await?;

        if status.is_success() {
            serde_json::from_str(&text).map_err(RestClientError::from)
        } else {
            Err(RestClientError::ServerError { status, body: text })
        }
    }
}

#[async_trait]
impl WorkflowApi for RestClient {
    fn session_id(&self) -> Option<String> {
        self.session.get().cloned()
    }

    async fn create_session(&self) -> ClientApiResult<String> {
        self.request_session()
            .await
            .map_err(|e| ClientApiError::SessionCreation(e.to_string()))
    }

    async fn ensure_session(&self) -> ClientApiResult<String> {
        self.session
            .get_or_try_init(|| self.create_session())
            .await
            .cloned()
    }

    async fn adopt_session(&self, session_id: &str) -> ClientApiResult<()> {
        if self.session.get().is_none() {
            // Losing a race against a concurrent initialisation is settled below.
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
        let request = CreateTaskRequest::from_payload(input)
            .map_err(|e| ClientApiError::TaskCreation(e.to_string()))?;
        self.request_task(&session_id, &request)
            .await
            .map_err(|e| ClientApiError::TaskCreation(e.to_string()))
    }

    async fn send_event_to_task(
        &self,
        task_id: &str,
        event: &WorkflowEvent,
    ) -> ClientApiResult<()> {
        let session_id = self.session.get().ok_or(ClientApiError::NoSession)?;
        self.post_event(session_id, task_id, event)
            .await
            .map_err(|e| ClientApiError::EventSend(e.to_string()))
    }

    async fn stream_task_events(
        &self,
        task_id: &str,
        sink: &mut (dyn EventSink + Send),
        cancel: CancellationToken,
    ) -> ClientApiResult<Vec<WorkflowEvent>> {
        let opened = tokio::select! {
            _ = cancel.cancelled() => return Ok(Vec::new()),
            opened = self.open_event_stream(task_id) => opened,
        };

        let response = match opened {
            Ok(response) => response,
            Err(err) => {
                let error = match err {
                    RestClientError::NoSession => ClientApiError::NoSession,
                    other => ClientApiError::StreamRead(other.to_string()),
                };
                tracing::warn!(task_id, %error, "could not open event stream");
                sink.on_error(&error);
                return Err(error);
            }
        };

        drive_event_stream(response.bytes_stream(), sink, &cancel).await
    }
}
