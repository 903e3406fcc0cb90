//! Callbacks invoked while a task's event stream is read

use std::ops::ControlFlow;

use wf_api_contract::WorkflowEvent;

use crate::ClientApiError;

/// Receiver of stream progress.
///
/// Every method has a no-op default so sinks only implement what they need.
pub trait EventSink {
    /// Called for each classified event in arrival order. Returning
    /// `Break` stops the read.
    fn on_data(&mut self, _event: &WorkflowEvent) -> ControlFlow<()> {
        ControlFlow::Continue(())
    }

    /// Called after `on_data` when the event is the stop event.
    fn on_stop_event(&mut self, _event: &WorkflowEvent) {}

    /// Called once the read ends without error.
    fn on_finish(&mut self, _events: &[WorkflowEvent]) {}

    /// Called once when the read fails.
    fn on_error(&mut self, _error: &ClientApiError) {}
}

/// A sink that only accumulates; useful when the caller just wants the list.
impl EventSink for () {}
