//! Caller-facing workflow events and their typed interpretation

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Qualified name of the event that terminates a task
pub const STOP_EVENT_QUALIFIED_NAME: &str = "llama_index.core.workflow.events.StopEvent";

/// Trailing qualified-name segment of streamed agent text
pub const AGENT_STREAM_EVENT: &str = "AgentStream";

/// Trailing qualified-name segment of retrieval citations
pub const SOURCE_NODES_EVENT: &str = "SourceNodesEvent";

/// Trailing qualified-name segment of custom UI annotations
pub const UI_EVENT: &str = "UIEvent";

/// A workflow event as seen by every consumer downstream of the classifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default, alias = "value")]
    pub data: Value,
}

impl WorkflowEvent {
    pub fn new(event_type: impl Into<String>, data: Value) -> Self {
        Self {
            event_type: event_type.into(),
            data,
        }
    }

    /// Build a stop event carrying `result`
    pub fn stop(result: Value) -> Self {
        Self::new(STOP_EVENT_QUALIFIED_NAME, serde_json::json!({ "result": result }))
    }

    /// Last dotted segment of the qualified name
    pub fn short_name(&self) -> &str {
        self.event_type
            .rsplit('.')
            .next()
            .unwrap_or(&self.event_type)
    }

    /// Interpret the event as one of the known kinds.
    pub fn kind(&self) -> EventKind {
        if self.event_type == STOP_EVENT_QUALIFIED_NAME {
            return EventKind::Stop {
                result: self.data.get("result").cloned().unwrap_or(Value::Null),
            };
        }

        match self.short_name() {
            AGENT_STREAM_EVENT => EventKind::AgentStream {
                delta: string_field(&self.data, "delta"),
                response: string_field(&self.data, "response"),
                current_agent_name: self
                    .data
                    .get("current_agent_name")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            },
            SOURCE_NODES_EVENT => EventKind::SourceNodes {
                nodes: self
                    .data
                    .get("nodes")
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default(),
            },
            UI_EVENT => EventKind::Ui {
                kind: string_field(&self.data, "type"),
                data: self.data.get("data").cloned().unwrap_or(Value::Null),
            },
            _ => EventKind::Unknown,
        }
    }
}

fn string_field(data: &Value, key: &str) -> String {
    data.get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// Closed set of event shapes that domain adapters know how to fold
#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    /// Task finished; `result` is the workflow's return value
    Stop { result: Value },
    /// Incremental agent output
    AgentStream {
        delta: String,
        response: String,
        current_agent_name: Option<String>,
    },
    /// Retrieved source nodes backing an answer
    SourceNodes { nodes: Vec<Value> },
    /// Application-defined UI annotation
    Ui { kind: String, data: Value },
    /// Anything else; consumers read the raw event
    Unknown,
}
