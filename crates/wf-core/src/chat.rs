//! Folding of chat-oriented workflow events into a message list.

use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;
use wf_api_contract::{EventKind, WorkflowEvent};

use crate::observer::TaskObserver;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// Extra data attached to an assistant message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Annotation {
    Sources { nodes: Vec<Value> },
    Ui { kind: String, data: Value },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: Uuid,
    pub role: Role,
    pub content: String,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub annotations: Vec<Annotation>,
}

impl ChatMessage {
    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            content: content.into(),
            annotations: Vec::new(),
        }
    }
}

/// Builds a conversation from one task's events.
///
/// Attach it as the task's observer; every newly recorded event is folded
/// into the trailing assistant message.
#[derive(Debug, Default)]
pub struct ChatAdapter {
    messages: Mutex<Vec<ChatMessage>>,
}

impl ChatAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a user turn and return its id.
    pub fn push_user(&self, text: impl Into<String>) -> Uuid {
        let message = ChatMessage::new(Role::User, text);
        let id = message.id;
        self.messages().push(message);
        id
    }

    /// Current conversation.
    pub fn snapshot(&self) -> Vec<ChatMessage> {
        self.messages().clone()
    }

    pub fn apply(&self, event: &WorkflowEvent) {
        match event.kind() {
            EventKind::AgentStream { delta, .. } => {
                if !delta.is_empty() {
                    self.with_assistant(|message| message.content.push_str(&delta));
                }
            }
            EventKind::SourceNodes { nodes } => {
                self.with_assistant(|message| message.annotations.push(Annotation::Sources { nodes }));
            }
            EventKind::Ui { kind, data } => {
                self.with_assistant(|message| message.annotations.push(Annotation::Ui { kind, data }));
            }
            EventKind::Stop { result } => {
                if let Value::String(text) = result {
                    self.with_assistant(|message| {
                        if message.content.is_empty() {
                            message.content = text;
                        }
                    });
                }
            }
            EventKind::Unknown => {
                tracing::trace!(event_type = %event.event_type, "ignoring event in chat adapter");
            }
        }
    }

    fn messages(&self) -> MutexGuard<'_, Vec<ChatMessage>> {
        self.messages
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn with_assistant(&self, update: impl FnOnce(&mut ChatMessage)) {
        let mut messages = self.messages();
        if messages.last().map(|m| m.role) != Some(Role::Assistant) {
            messages.push(ChatMessage::new(Role::Assistant, ""));
        }
        if let Some(message) = messages.last_mut() {
            update(message);
        }
    }
}

impl TaskObserver for ChatAdapter {
    fn on_event(&self, _task_id: &str, event: &WorkflowEvent) {
        self.apply(event);
    }
}
