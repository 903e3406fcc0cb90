//! Core task and session orchestration for workflow deployments.
//!
//! This crate turns the raw transport of [`wf_client_api::WorkflowApi`] into
//! per-task state machines ([`TaskRunner`]), a registry of concurrently
//! running tasks ([`TaskRegistry`]) and a chat-oriented consumer of task
//! events ([`ChatAdapter`]).

pub mod chat;
pub mod error;
pub mod observer;
pub mod registry;
pub mod task;

/// Core result type used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type that encompasses all task operations.
pub use error::Error;

/// Task lifecycle management and orchestration.
pub use task::{TaskRunner, TaskStatus, TaskView};

/// Registry of concurrent tasks.
pub use registry::TaskRegistry;

/// Per-task callbacks.
pub use observer::{NoopObserver, TaskObserver};

/// Chat message folding.
pub use chat::{Annotation, ChatAdapter, ChatMessage, Role};
