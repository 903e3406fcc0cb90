//! Task lifecycle management and orchestration.
//!
//! A [`TaskRunner`] drives one remote task: it creates (or resumes) the task,
//! reads its event stream in a background tokio task, records accepted
//! events in arrival order and settles the status when the stream ends.

use std::fmt;
use std::ops::ControlFlow;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use wf_api_contract::{is_stop_event, WorkflowEvent};
use wf_client_api::{ClientApiError, EventSink, WorkflowApi};

use crate::observer::{NoopObserver, TaskObserver};
use crate::{Error, Result};

/// Status of a task in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// No task has been created or resumed yet.
    Idle,
    /// The event stream is being read.
    Running,
    /// A stop event was observed or the stream closed cleanly.
    Complete,
    /// Transport failure or explicit abort.
    Error,
}

impl TaskStatus {
    pub fn is_settled(self) -> bool {
        !matches!(self, TaskStatus::Running)
    }
}

#[derive(Debug)]
struct TaskRecord {
    task_id: Option<String>,
    events: Vec<WorkflowEvent>,
    status: TaskStatus,
    updated_at: DateTime<Utc>,
}

impl TaskRecord {
    fn new() -> Self {
        Self {
            task_id: None,
            events: Vec::new(),
            status: TaskStatus::Idle,
            updated_at: Utc::now(),
        }
    }

    /// Update the task status and modification time.
    fn update_status(&mut self, status: TaskStatus) -> bool {
        if self.status == status {
            return false;
        }
        self.status = status;
        self.updated_at = Utc::now();
        true
    }
}

struct Inner {
    api: Arc<dyn WorkflowApi>,
    record: Mutex<TaskRecord>,
    observer: Mutex<Arc<dyn TaskObserver>>,
    reads: tokio::sync::Mutex<()>,
    cancel: CancellationToken,
    changes: Arc<watch::Sender<u64>>,
}

/// Drives the lifecycle of a single task.
///
/// Clones share state; all of them observe and control the same task.
#[derive(Clone)]
pub struct TaskRunner {
    inner: Arc<Inner>,
}

impl fmt::Debug for TaskRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let record = self.record();
        f.debug_struct("TaskRunner")
            .field("task_id", &record.task_id)
            .field("status", &record.status)
            .field("events", &record.events.len())
            .finish_non_exhaustive()
    }
}

impl TaskRunner {
    /// Create an idle runner.
    pub fn new(api: Arc<dyn WorkflowApi>, observer: Option<Arc<dyn TaskObserver>>) -> Self {
        let (changes, _) = watch::channel(0);
        Self::with_changes(api, observer, Arc::new(changes))
    }

    /// Create an idle runner that reports state changes on a shared channel.
    pub(crate) fn with_changes(
        api: Arc<dyn WorkflowApi>,
        observer: Option<Arc<dyn TaskObserver>>,
        changes: Arc<watch::Sender<u64>>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                api,
                record: Mutex::new(TaskRecord::new()),
                observer: Mutex::new(observer.unwrap_or_else(|| Arc::new(NoopObserver))),
                reads: tokio::sync::Mutex::new(()),
                cancel: CancellationToken::new(),
                changes,
            }),
        }
    }

    /// Create the remote task and begin reading its events.
    ///
    /// Returns as soon as the task exists; events arrive in the background.
    pub async fn start(&self, input: &Value) -> Result<String> {
        if let Some(task_id) = self.task_id() {
            return Err(Error::AlreadyStarted { task_id });
        }

        let task = match self.inner.api.create_task(input).await {
            Ok(task) => task,
            Err(error) => {
                tracing::warn!(%error, "task creation failed");
                self.settle(TaskStatus::Error);
                return Err(error.into());
            }
        };

        self.begin(&task.task_id);
        tracing::info!(task_id = %task.task_id, session_id = %task.session_id, "task started");
        self.spawn_read();
        Ok(task.task_id)
    }

    /// Attach to an existing task and backfill its events from the stream.
    pub async fn resume(&self, task_id: &str, session_id: &str) -> Result<()> {
        if let Some(existing) = self.task_id() {
            return Err(Error::AlreadyStarted { task_id: existing });
        }
        self.inner.api.adopt_session(session_id).await?;

        self.begin(task_id);
        tracing::info!(task_id, session_id, "task resumed");
        self.spawn_read();
        Ok(())
    }

    /// Deliver `event` to the task and read the events it produces.
    pub async fn send_event(&self, event: &WorkflowEvent) -> Result<()> {
        let (task_id, status) = {
            let record = self.record();
            (record.task_id.clone(), record.status)
        };
        let task_id = task_id.ok_or(Error::TaskNotCreated)?;
        if status == TaskStatus::Error {
            return Err(Error::TaskFailed { task_id });
        }

        if let Err(error) = self.inner.api.send_event_to_task(&task_id, event).await {
            self.fail(&task_id, &error);
            return Err(error.into());
        }

        self.transition(TaskStatus::Running);
        self.spawn_read();
        Ok(())
    }

    /// Stop reading. Recorded events stay; a running task becomes `Error`.
    pub fn abort(&self) {
        self.inner.cancel.cancel();
        if self.settle(TaskStatus::Error) {
            tracing::info!(task_id = ?self.task_id(), "task aborted");
        }
    }

    /// Replace the observer used for subsequent events.
    pub fn set_observer(&self, observer: Arc<dyn TaskObserver>) {
        *self
            .inner
            .observer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = observer;
    }

    pub fn task_id(&self) -> Option<String> {
        self.record().task_id.clone()
    }

    pub fn status(&self) -> TaskStatus {
        self.record().status
    }

    /// Snapshot of the recorded events, in arrival order.
    pub fn events(&self) -> Vec<WorkflowEvent> {
        self.record().events.clone()
    }

    /// Snapshot for display; `None` until the task has an id.
    pub fn view(&self) -> Option<TaskView> {
        let record = self.record();
        Some(TaskView {
            task_id: record.task_id.clone()?,
            events: record.events.clone(),
            status: record.status,
            updated_at: record.updated_at,
            runner: self.clone(),
        })
    }

    /// Receiver that is marked changed whenever this task's state changes.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.inner.changes.subscribe()
    }

    /// Wait until the task is no longer running and return its status.
    pub async fn wait_until_settled(&self) -> TaskStatus {
        let mut changes = self.subscribe();
        loop {
            let status = self.status();
            if status.is_settled() {
                return status;
            }
            if changes.changed().await.is_err() {
                return self.status();
            }
        }
    }

    fn record(&self) -> MutexGuard<'_, TaskRecord> {
        self.inner
            .record
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn observer(&self) -> Arc<dyn TaskObserver> {
        self.inner
            .observer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn notify(&self) {
        self.inner.changes.send_modify(|version| *version = version.wrapping_add(1));
    }

    fn begin(&self, task_id: &str) {
        {
            let mut record = self.record();
            record.task_id = Some(task_id.to_string());
            record.events.clear();
            record.update_status(TaskStatus::Running);
        }
        self.notify();
        self.observer().on_status(task_id, TaskStatus::Running);
    }

    /// Move to `status` unless the task has failed.
    fn transition(&self, status: TaskStatus) -> bool {
        let (changed, task_id) = {
            let mut record = self.record();
            if record.status == TaskStatus::Error {
                return false;
            }
            (record.update_status(status), record.task_id.clone())
        };
        if changed {
            self.notify();
            if let Some(task_id) = task_id {
                self.observer().on_status(&task_id, status);
            }
        }
        changed
    }

    /// Leave `Running` for a terminal status; no-op for settled tasks.
    fn settle(&self, status: TaskStatus) -> bool {
        let (changed, task_id) = {
            let mut record = self.record();
            if record.status != TaskStatus::Running && record.status != TaskStatus::Idle {
                return false;
            }
            (record.update_status(status), record.task_id.clone())
        };
        if changed {
            self.notify();
            if let Some(task_id) = task_id {
                self.observer().on_status(&task_id, status);
            }
        }
        changed
    }

    fn fail(&self, task_id: &str, error: &ClientApiError) {
        tracing::warn!(task_id, %error, "task failed");
        {
            let mut record = self.record();
            if record.update_status(TaskStatus::Error) {
                drop(record);
                self.notify();
                self.observer().on_status(task_id, TaskStatus::Error);
            }
        }
        self.observer().on_error(task_id, error);
    }

    fn spawn_read(&self) {
        let runner = self.clone();
        tokio::spawn(async move {
            runner.read_events().await;
        });
    }

    /// One pass over the task's event log. Passes are serialized per task.
    async fn read_events(&self) {
        let _pass = self.inner.reads.lock().await;
        if self.inner.cancel.is_cancelled() {
            return;
        }
        let Some(task_id) = self.task_id() else {
            return;
        };
        if !self.transition(TaskStatus::Running) && self.status() == TaskStatus::Error {
            tracing::debug!(%task_id, "skipping event read for failed task");
            return;
        }

        let baseline = self.record().events.len();
        let mut sink = TaskSink {
            runner: self.clone(),
            task_id: task_id.clone(),
            replay: ReplayFilter::new(baseline),
            failed: false,
        };

        let result = self
            .inner
            .api
            .stream_task_events(&task_id, &mut sink, self.inner.cancel.clone())
            .await;

        match result {
            Ok(_) if self.inner.cancel.is_cancelled() => {
                self.settle(TaskStatus::Error);
            }
            Ok(events) => {
                tracing::debug!(%task_id, read = events.len(), "event stream closed");
                if self.settle(TaskStatus::Complete) {
                    tracing::info!(%task_id, "task complete");
                }
            }
            Err(error) => {
                if !sink.failed {
                    self.fail(&task_id, &error);
                }
            }
        }
    }
}

/// Skips events that repeat already recorded history.
///
/// A read that starts with `baseline` recorded events compares incoming
/// events position by position with that history. While they match they are
/// replays; the first mismatch, or reaching the baseline, switches to append
/// mode for the rest of the read. This works whether the server replays the
/// full log or only sends what is new.
///
/// Events are compared by value, so when the server sends only new events,
/// a new event identical to the recorded one at the same position (a repeated
/// progress update, say) is treated as a replay and dropped.
#[derive(Debug, Clone)]
pub(crate) struct ReplayFilter {
    cursor: usize,
    baseline: usize,
    replaying: bool,
}

impl ReplayFilter {
    pub(crate) fn new(baseline: usize) -> Self {
        Self {
            cursor: 0,
            baseline,
            replaying: baseline > 0,
        }
    }

    pub(crate) fn is_replay(&mut self, recorded: &[WorkflowEvent], event: &WorkflowEvent) -> bool {
        if self.replaying
            && self.cursor < self.baseline
            && recorded.get(self.cursor) == Some(event)
        {
            self.cursor += 1;
            return true;
        }
        self.replaying = false;
        false
    }
}

struct TaskSink {
    runner: TaskRunner,
    task_id: String,
    replay: ReplayFilter,
    failed: bool,
}

impl EventSink for TaskSink {
    fn on_data(&mut self, event: &WorkflowEvent) -> ControlFlow<()> {
        {
            let mut record = self.runner.record();
            if self.replay.is_replay(&record.events, event) {
                return ControlFlow::Continue(());
            }
            if record.status != TaskStatus::Running {
                return ControlFlow::Break(());
            }
            record.events.push(event.clone());
            record.updated_at = Utc::now();
        }

        self.runner.notify();
        self.runner.observer().on_event(&self.task_id, event);

        if is_stop_event(event) {
            if self.runner.settle(TaskStatus::Complete) {
                tracing::info!(task_id = %self.task_id, "task complete");
            }
            return ControlFlow::Break(());
        }
        ControlFlow::Continue(())
    }

    fn on_error(&mut self, error: &ClientApiError) {
        self.failed = true;
        self.runner.fail(&self.task_id, error);
    }
}

/// Read model of a task, as shown to a UI.
#[derive(Debug, Clone)]
pub struct TaskView {
    pub task_id: String,
    pub events: Vec<WorkflowEvent>,
    pub status: TaskStatus,
    pub updated_at: DateTime<Utc>,
    runner: TaskRunner,
}

impl TaskView {
    /// Send an event to the task this view was taken from.
    pub async fn send_event(&self, event: &WorkflowEvent) -> Result<()> {
        self.runner.send_event(event).await
    }

    pub fn runner(&self) -> &TaskRunner {
        &self.runner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(n: u32) -> WorkflowEvent {
        WorkflowEvent::new("app.Progress", json!(n))
    }

    #[test]
    fn test_replay_filter_skips_full_history() {
        let recorded = vec![event(1), event(2)];
        let mut filter = ReplayFilter::new(recorded.len());

        assert!(filter.is_replay(&recorded, &event(1)));
        assert!(filter.is_replay(&recorded, &event(2)));
        assert!(!filter.is_replay(&recorded, &event(3)));
    }

    #[test]
    fn test_replay_filter_accepts_only_new_events() {
        let recorded = vec![event(1), event(2)];
        let mut filter = ReplayFilter::new(recorded.len());

        assert!(!filter.is_replay(&recorded, &event(3)));
        // Once appending, matching history is no longer skipped.
        assert!(!filter.is_replay(&recorded, &event(1)));
    }

    #[test]
    fn test_replay_filter_drops_identical_leading_event() {
        let recorded = vec![event(1), event(2)];
        let mut filter = ReplayFilter::new(recorded.len());

        // A fresh event equal to the first recorded one reads as history.
        assert!(filter.is_replay(&recorded, &event(1)));
        assert!(!filter.is_replay(&recorded, &event(3)));
    }

    #[test]
    fn test_replay_filter_without_history() {
        let mut filter = ReplayFilter::new(0);
        assert!(!filter.is_replay(&[], &event(1)));
    }

    #[test]
    fn test_status_serialization() {
        assert_eq!(serde_json::to_value(TaskStatus::Complete).unwrap(), json!("complete"));
        assert!(TaskStatus::Idle.is_settled());
        assert!(!TaskStatus::Running.is_settled());
    }
}
