//! Printing of task events to the terminal

use std::io::{self, Write};
use std::sync::{Mutex, MutexGuard};

use clap::ValueEnum;
use wf_api_contract::{is_stop_event, WorkflowEvent};
use wf_client_api::ClientApiError;
use wf_core::{ChatAdapter, Role, TaskObserver};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// One JSON object per event
    Events,
    /// Assistant text as it streams in
    Chat,
}

/// How much of the trailing assistant message is already on screen.
#[derive(Debug, Default)]
struct PrintedReply {
    index: usize,
    len: usize,
}

impl PrintedReply {
    /// Text of message `index` not printed yet.
    fn advance<'a>(&mut self, index: usize, content: &'a str) -> &'a str {
        if self.index != index {
            self.index = index;
            self.len = 0;
        }
        let fresh = content.get(self.len..).unwrap_or_default();
        self.len = content.len();
        fresh
    }
}

struct State {
    out: Box<dyn Write + Send>,
    reply: PrintedReply,
}

/// Task observer that writes events as they are recorded.
pub struct Printer {
    format: OutputFormat,
    chat: ChatAdapter,
    state: Mutex<State>,
}

impl Printer {
    pub fn new(format: OutputFormat, out: impl Write + Send + 'static) -> Self {
        Self {
            format,
            chat: ChatAdapter::new(),
            state: Mutex::new(State {
                out: Box::new(out),
                reply: PrintedReply::default(),
            }),
        }
    }

    pub fn stdout(format: OutputFormat) -> Self {
        Self::new(format, io::stdout())
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_event(&self, event: &WorkflowEvent) -> io::Result<()> {
        let line = serde_json::to_string(event)?;
        let mut state = self.state();
        writeln!(state.out, "{line}")?;
        state.out.flush()
    }

    fn write_chat(&self, event: &WorkflowEvent) -> io::Result<()> {
        self.chat.apply(event);
        let messages = self.chat.snapshot();
        let reply = messages
            .last()
            .filter(|message| message.role == Role::Assistant)
            .map(|message| (messages.len(), message.content.as_str()));

        let mut state = self.state();
        let State { out, reply: printed } = &mut *state;
        if let Some((index, content)) = reply {
            let fresh = printed.advance(index, content);
            if !fresh.is_empty() {
                write!(out, "{fresh}")?;
            }
        }
        if is_stop_event(event) {
            writeln!(out)?;
        }
        out.flush()
    }
}

impl TaskObserver for Printer {
    fn on_event(&self, task_id: &str, event: &WorkflowEvent) {
        let written = match self.format {
            OutputFormat::Events => self.write_event(event),
            OutputFormat::Chat => self.write_chat(event),
        };
        if let Err(error) = written {
            tracing::warn!(task_id, %error, "failed to print event");
        }
    }

    fn on_error(&self, task_id: &str, error: &ClientApiError) {
        tracing::error!(task_id, %error, "task failed");
    }
}
