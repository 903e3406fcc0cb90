//! Request and response bodies for the workflow deployment endpoints

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::event::WorkflowEvent;

/// Response of `POST /deployments/{name}/sessions/create`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateSessionResponse {
    pub session_id: String,
}

/// Task creation request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateTaskRequest {
    /// JSON-encoded start payload
    pub input: String,
}

impl CreateTaskRequest {
    /// Build a request from an arbitrary JSON start payload.
    pub fn from_payload(payload: &Value) -> serde_json::Result<Self> {
        Ok(Self {
            input: serde_json::to_string(payload)?,
        })
    }
}

/// Task creation response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDefinition {
    pub task_id: String,
    pub session_id: String,
    pub service_id: String,
    #[serde(default)]
    pub input: String,
}

/// Body of `POST /deployments/{name}/tasks/{task_id}/events`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventDefinition {
    pub service_id: String,
    /// The JSON serialization of the caller-facing event
    pub event_obj_str: String,
}

/// Response to an event send
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendEventResponse {
    pub success: bool,
}

/// Wire-level envelope in which the deployment wraps every streamed event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEventEnvelope {
    /// Any value counts; only the key's presence marks an envelope.
    #[serde(rename = "__is_pydantic", deserialize_with = "marker_present")]
    pub is_pydantic: bool,
    pub qualified_name: String,
    pub value: Value,
}

fn marker_present<'de, D: serde::Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    Value::deserialize(deserializer).map(|_| true)
}

impl From<&WorkflowEvent> for RawEventEnvelope {
    fn from(event: &WorkflowEvent) -> Self {
        Self {
            is_pydantic: true,
            qualified_name: event.event_type.clone(),
            value: event.data.clone(),
        }
    }
}

impl From<RawEventEnvelope> for WorkflowEvent {
    fn from(envelope: RawEventEnvelope) -> Self {
        WorkflowEvent {
            event_type: envelope.qualified_name,
            data: envelope.value,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_create_task_request_stringifies_payload() {
        let request = CreateTaskRequest::from_payload(&json!({"message": "hi"})).unwrap();
        assert_eq!(request.input, r#"{"message":"hi"}"#);
    }

    #[test]
    fn test_task_definition_parsing() {
        let body = r#"{
            "task_id": "t-1",
            "session_id": "s-1",
            "service_id": "chat_workflow",
            "input": "{}"
        }"#;

        let task: TaskDefinition = serde_json::from_str(body).unwrap();
        assert_eq!(task.task_id, "t-1");
        assert_eq!(task.service_id, "chat_workflow");
    }

    #[test]
    fn test_envelope_field_names() {
        let envelope = RawEventEnvelope {
            is_pydantic: true,
            qualified_name: "pkg.Event".into(),
            value: json!({}),
        };
        let value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(value["__is_pydantic"], json!(true));
        assert_eq!(value["qualified_name"], json!("pkg.Event"));
    }

    #[test]
    fn test_envelope_wraps_event() {
        let event = WorkflowEvent::new("pkg.Event", json!({"x": 1}));
        let envelope = RawEventEnvelope::from(&event);
        assert!(envelope.is_pydantic);
        assert_eq!(envelope.value, json!({"x": 1}));
        assert_eq!(WorkflowEvent::from(envelope), event);
    }
}
