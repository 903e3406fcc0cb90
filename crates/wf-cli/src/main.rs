//! `wf` binary entry point

use std::process::ExitCode;

use tracing_subscriber::EnvFilter;
use wf_cli::{Cli, Parser};
use wf_core::TaskStatus;

#[tokio::main]
async fn main() -> ExitCode {
    // Events go to stdout; keep logs on stderr
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.run().await {
        Ok(TaskStatus::Complete) => ExitCode::SUCCESS,
        Ok(status) => {
            eprintln!("task ended with status {status:?}");
            ExitCode::FAILURE
        }
        Err(error) => {
            eprintln!("error: {error:#}");
            ExitCode::FAILURE
        }
    }
}
