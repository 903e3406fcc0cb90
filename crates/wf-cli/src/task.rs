use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Args;
use serde_json::{json, Value};
use wf_api_contract::WorkflowEvent;
use wf_client_api::WorkflowApi;
use wf_core::{NoopObserver, TaskRegistry, TaskStatus};

use crate::output::Printer;

#[derive(Args, Debug)]
pub struct RunOptions {
    /// Task input as a JSON object
    #[arg(long, value_name = "JSON", conflicts_with = "message")]
    pub input: Option<String>,

    /// Chat message, sent as `{"user_msg": MESSAGE}`
    #[arg(value_name = "MESSAGE")]
    pub message: Option<String>,
}

impl RunOptions {
    pub fn payload(&self) -> Result<Value> {
        match (&self.input, &self.message) {
            (Some(raw), _) => {
                let payload: Value =
                    serde_json::from_str(raw).context("--input is not valid JSON")?;
                if !payload.is_object() {
                    bail!("--input must be a JSON object");
                }
                Ok(payload)
            }
            (None, Some(message)) => Ok(json!({ "user_msg": message })),
            (None, None) => Ok(json!({})),
        }
    }

    pub async fn run(&self, api: Arc<dyn WorkflowApi>, printer: Arc<Printer>) -> Result<TaskStatus> {
        let payload = self.payload()?;
        let registry = TaskRegistry::new(api);
        let task_id = registry
            .create_task(&payload, Some(printer))
            .await
            .context("failed to start task")?;

        let session_id = registry.session_id().unwrap_or_default();
        tracing::info!(%task_id, %session_id, "following task");
        eprintln!("task {task_id} (session {session_id})");

        settle(&registry, &task_id).await
    }
}

#[derive(Args, Debug)]
pub struct ResumeOptions {
    /// Task to attach to
    #[arg(value_name = "TASK_ID")]
    pub task_id: String,
}

impl ResumeOptions {
    pub async fn run(
        &self,
        api: Arc<dyn WorkflowApi>,
        session_id: &str,
        printer: Arc<Printer>,
    ) -> Result<TaskStatus> {
        let registry = TaskRegistry::new(api);
        registry
            .resume_task(&self.task_id, session_id, Some(printer))
            .await
            .with_context(|| format!("failed to resume task {}", self.task_id))?;
        settle(&registry, &self.task_id).await
    }
}

#[derive(Args, Debug)]
pub struct SendOptions {
    /// Task that receives the event
    #[arg(value_name = "TASK_ID")]
    pub task_id: String,

    /// Qualified name of the event type
    #[arg(long = "type", value_name = "QUALIFIED_NAME")]
    pub event_type: String,

    /// Event payload as JSON
    #[arg(long, value_name = "JSON", default_value = "{}")]
    pub data: String,

    /// Silence on the history read after which the task counts as waiting
    #[arg(long, value_name = "MS", default_value_t = 300)]
    pub history_idle_ms: u64,
}

impl SendOptions {
    pub fn event(&self) -> Result<WorkflowEvent> {
        let data: Value = serde_json::from_str(&self.data).context("--data is not valid JSON")?;
        Ok(WorkflowEvent::new(&self.event_type, data))
    }

    /// Backfill the task's history quietly, then send and print only what the
    /// event produced.
    ///
    /// A task paused for input keeps its event log open, so the send happens
    /// once history has stopped arriving rather than when the read ends. The
    /// open read then carries the reaction.
    pub async fn run(
        &self,
        api: Arc<dyn WorkflowApi>,
        session_id: &str,
        printer: Arc<Printer>,
    ) -> Result<TaskStatus> {
        let event = self.event()?;
        let registry = TaskRegistry::new(api);
        registry
            .resume_task(&self.task_id, session_id, Some(Arc::new(NoopObserver)))
            .await
            .with_context(|| format!("failed to attach to task {}", self.task_id))?;
        let idle = Duration::from_millis(self.history_idle_ms);
        if settle_or_idle(&registry, &self.task_id, idle).await? == TaskStatus::Error {
            bail!("could not read the history of task {}", self.task_id);
        }

        registry
            .send_event_to_task(&self.task_id, &event, Some(printer))
            .await
            .with_context(|| format!("failed to send {} to task {}", event.event_type, self.task_id))?;
        settle(&registry, &self.task_id).await
    }
}

/// Wait until the task settles or records nothing new for `idle`.
async fn settle_or_idle(registry: &TaskRegistry, task_id: &str, idle: Duration) -> Result<TaskStatus> {
    let view = registry
        .get_task(task_id)
        .await
        .with_context(|| format!("task {task_id} is not tracked"))?;
    let runner = view.runner();
    let mut changes = runner.subscribe();
    loop {
        let status = runner.status();
        if status.is_settled() {
            return Ok(status);
        }
        match tokio::time::timeout(idle, changes.changed()).await {
            Ok(Ok(())) => continue,
            Ok(Err(_)) => return Ok(runner.status()),
            Err(_) => {
                tracing::debug!(task_id, events = runner.events().len(), "history read went idle");
                return Ok(status);
            }
        }
    }
}

async fn settle(registry: &TaskRegistry, task_id: &str) -> Result<TaskStatus> {
    let view = registry
        .get_task(task_id)
        .await
        .with_context(|| format!("task {task_id} is not tracked"))?;
    Ok(view.runner().wait_until_settled().await)
}
