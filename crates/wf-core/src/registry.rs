//! Registry of concurrently running tasks sharing one session.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{watch, RwLock};
use wf_api_contract::WorkflowEvent;
use wf_client_api::WorkflowApi;

use crate::observer::TaskObserver;
use crate::task::{TaskRunner, TaskView};
use crate::{Error, Result};

/// Manages the lifecycle of tasks in the system.
///
/// Every task is an independent state machine; the only thing they share is
/// the client, and through it the session.
pub struct TaskRegistry {
    api: Arc<dyn WorkflowApi>,
    tasks: RwLock<BTreeMap<String, TaskRunner>>,
    current: RwLock<Option<String>>,
    changes: Arc<watch::Sender<u64>>,
}

impl TaskRegistry {
    /// Create a new registry on top of `api`.
    pub fn new(api: Arc<dyn WorkflowApi>) -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            api,
            tasks: RwLock::new(BTreeMap::new()),
            current: RwLock::new(None),
            changes: Arc::new(changes),
        }
    }

    /// The shared session, once established.
    pub fn session_id(&self) -> Option<String> {
        self.api.session_id()
    }

    /// Start a task, register it and make it the current one.
    ///
    /// Fails only when the task could not be created; later failures go to
    /// `observer.on_error` and the task's status.
    pub async fn create_task(
        &self,
        input: &Value,
        observer: Option<Arc<dyn TaskObserver>>,
    ) -> Result<String> {
        let runner = TaskRunner::with_changes(self.api.clone(), observer, self.changes.clone());
        let task_id = runner.start(input).await?;
        self.register(task_id.clone(), runner).await;
        Ok(task_id)
    }

    /// Register a task created elsewhere and backfill its events.
    ///
    /// An existing entry for the same id is aborted and replaced.
    pub async fn resume_task(
        &self,
        task_id: &str,
        session_id: &str,
        observer: Option<Arc<dyn TaskObserver>>,
    ) -> Result<()> {
        let runner = TaskRunner::with_changes(self.api.clone(), observer, self.changes.clone());
        runner.resume(task_id, session_id).await?;
        self.register(task_id.to_string(), runner).await;
        Ok(())
    }

    /// Send an event to a registered task.
    ///
    /// A supplied observer replaces the one stored for the task.
    pub async fn send_event_to_task(
        &self,
        task_id: &str,
        event: &WorkflowEvent,
        observer: Option<Arc<dyn TaskObserver>>,
    ) -> Result<()> {
        let runner = self.runner(task_id).await?;
        if let Some(observer) = observer {
            runner.set_observer(observer);
        }
        runner.send_event(event).await
    }

    /// Get a task by its ID.
    pub async fn get_task(&self, task_id: &str) -> Option<TaskView> {
        self.tasks
            .read()
            .await
            .get(task_id)
            .and_then(TaskRunner::view)
    }

    /// Read model of every tracked task.
    pub async fn tasks(&self) -> BTreeMap<String, TaskView> {
        self.tasks
            .read()
            .await
            .iter()
            .filter_map(|(id, runner)| runner.view().map(|view| (id.clone(), view)))
            .collect()
    }

    pub async fn current_task_id(&self) -> Option<String> {
        self.current.read().await.clone()
    }

    /// The most recently created or resumed task.
    pub async fn current_task(&self) -> Option<TaskView> {
        let task_id = self.current_task_id().await?;
        self.get_task(&task_id).await
    }

    /// Receiver marked changed whenever any tracked task changes.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }

    /// Stop tracking a task and abort its stream.
    pub async fn remove_task(&self, task_id: &str) -> Result<TaskView> {
        let runner = self
            .tasks
            .write()
            .await
            .remove(task_id)
            .ok_or_else(|| Error::task_not_found(task_id))?;
        runner.abort();

        let mut current = self.current.write().await;
        if current.as_deref() == Some(task_id) {
            *current = None;
        }
        drop(current);
        self.notify();

        runner.view().ok_or(Error::TaskNotCreated)
    }

    async fn runner(&self, task_id: &str) -> Result<TaskRunner> {
        self.tasks
            .read()
            .await
            .get(task_id)
            .cloned()
            .ok_or_else(|| Error::task_not_found(task_id))
    }

    async fn register(&self, task_id: String, runner: TaskRunner) {
        if let Some(previous) = self.tasks.write().await.insert(task_id.clone(), runner) {
            previous.abort();
        }
        *self.current.write().await = Some(task_id);
        self.notify();
    }

    fn notify(&self) {
        self.changes
            .send_modify(|version| *version = version.wrapping_add(1));
    }
}

impl Drop for TaskRegistry {
    fn drop(&mut self) {
        for runner in self.tasks.get_mut().values() {
            runner.abort();
        }
    }
}
