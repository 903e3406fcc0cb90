//! Classification of raw streamed payloads
//!
//! A streamed line is only a workflow event if it parses to an envelope
//! object; everything else is noise and is filtered out, never reported as
//! an error.

use serde_json::Value;

use crate::event::{WorkflowEvent, STOP_EVENT_QUALIFIED_NAME};
use crate::types::RawEventEnvelope;

/// Whether `raw` is a well-formed event envelope.
pub fn is_workflow_event(raw: &Value) -> bool {
    let Some(object) = raw.as_object() else {
        return false;
    };
    object.contains_key("__is_pydantic")
        && object.contains_key("value")
        && object.get("qualified_name").is_some_and(Value::is_string)
}

/// Whether `event` is the stop event.
pub fn is_stop_event(event: &WorkflowEvent) -> bool {
    event.event_type == STOP_EVENT_QUALIFIED_NAME
}

/// Convert an envelope into the caller-facing shape.
pub fn unwrap_envelope(raw: Value) -> Option<WorkflowEvent> {
    if !is_workflow_event(&raw) {
        return None;
    }
    serde_json::from_value::<RawEventEnvelope>(raw)
        .ok()
        .map(WorkflowEvent::from)
}

/// Parse and classify one stream line.
pub fn classify_line(line: &str) -> Option<WorkflowEvent> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    serde_json::from_str::<Value>(line)
        .ok()
        .and_then(unwrap_envelope)
}
