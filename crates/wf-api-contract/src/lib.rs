//! Workflow deployment API contract types
//!
//! This crate defines the request/response shapes exchanged with a workflow
//! deployment, the caller-facing [`WorkflowEvent`] model, the pure functions
//! that classify raw streamed payloads, and the line framing used to decode
//! the newline-delimited event stream. These types are shared between the
//! REST client, the mock client and the task orchestration layer.

pub mod classify;
pub mod event;
pub mod line_buffer;
pub mod types;

pub use classify::*;
pub use event::*;
pub use line_buffer::LineBuffer;
pub use types::*;
