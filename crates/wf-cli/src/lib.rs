//! Workflow CLI library

pub mod output;
pub mod task;

use std::sync::Arc;

use anyhow::{Context, Result};
use url::Url;
use wf_client_api::WorkflowApi;
use wf_core::TaskStatus;
use wf_rest_client::{ClientConfig, RestClient};

use crate::output::{OutputFormat, Printer};

// Re-export CLI types for testing
pub use clap::{Args, Parser, Subcommand};

pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:4501";

#[derive(Parser, Debug)]
#[command(name = "wf")]
#[command(about = "Drive tasks on a workflow deployment")]
#[command(version, long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub connection: ConnectionOptions,

    /// How task events are printed
    #[arg(long, value_enum, default_value_t = OutputFormat::Events)]
    pub output: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Args, Debug, Clone)]
pub struct ConnectionOptions {
    /// Base URL of the API server
    #[arg(long, env = "WF_BASE_URL", default_value = DEFAULT_BASE_URL)]
    pub base_url: Url,

    /// Deployment that serves the workflow
    #[arg(long, env = "WF_DEPLOYMENT")]
    pub deployment: String,

    /// Existing session to work in
    #[arg(long, env = "WF_SESSION_ID")]
    pub session_id: Option<String>,
}

impl ConnectionOptions {
    pub fn client(&self) -> Result<RestClient> {
        let config = ClientConfig::new(self.base_url.clone(), &self.deployment);
        let client = RestClient::new(config).context("invalid connection settings")?;
        Ok(match &self.session_id {
            Some(session_id) => client.with_session_id(session_id),
            None => client,
        })
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start a task and follow its events until it settles
    Run(task::RunOptions),
    /// Attach to an existing task and replay its events
    Resume(task::ResumeOptions),
    /// Send an event into a task and follow what it produces
    Send(task::SendOptions),
}

impl Cli {
    pub async fn run(self) -> Result<TaskStatus> {
        let api: Arc<dyn WorkflowApi> = Arc::new(self.connection.client()?);
        let printer = Arc::new(Printer::stdout(self.output));
        self.command
            .run(api, self.connection.session_id.as_deref(), printer)
            .await
    }
}

impl Commands {
    pub async fn run(
        &self,
        api: Arc<dyn WorkflowApi>,
        session_id: Option<&str>,
        printer: Arc<Printer>,
    ) -> Result<TaskStatus> {
        match self {
            Commands::Run(opts) => opts.run(api, printer).await,
            Commands::Resume(opts) => opts.run(api, require_session(session_id)?, printer).await,
            Commands::Send(opts) => opts.run(api, require_session(session_id)?, printer).await,
        }
    }
}

fn require_session(session_id: Option<&str>) -> Result<&str> {
    session_id.context("a session id is required (--session-id or WF_SESSION_ID)")
}
