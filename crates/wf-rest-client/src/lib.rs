//! REST API client for workflow deployments
//!
//! This crate talks to the deployment endpoints that create sessions, start
//! tasks, deliver events into running tasks and stream task events back as
//! newline-delimited JSON. The client owns the session id once it has been
//! established and exposes everything through [`wf_client_api::WorkflowApi`].

pub mod client;
pub mod config;
pub mod error;

pub use client::*;
pub use config::*;
pub use error::*;
