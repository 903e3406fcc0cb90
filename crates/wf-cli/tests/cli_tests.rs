use std::io::{self, Write};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;
use wf_api_contract::WorkflowEvent;
use wf_cli::output::{OutputFormat, Printer};
use wf_cli::{Cli, Commands, Parser};
use wf_core::TaskStatus;
use wf_rest_client_mock::{envelope_line, MockClient, StreamScript};

#[derive(Clone, Default)]
struct Buffer(Arc<Mutex<Vec<u8>>>);

impl Write for Buffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Buffer {
    fn events(&self) -> Vec<WorkflowEvent> {
        String::from_utf8(self.0.lock().unwrap().clone())
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }
}

fn ui(n: u32) -> WorkflowEvent {
    WorkflowEvent::new("app.events.UIEvent", json!({"type": "progress", "data": n}))
}

#[test]
fn test_cli_parsing_run_message() {
    let cli = Cli::try_parse_from([
        "wf",
        "--base-url",
        "http://localhost:4501",
        "--deployment",
        "chat",
        "run",
        "hello there",
    ])
    .unwrap();

    assert_eq!(cli.connection.deployment, "chat");
    assert_eq!(cli.connection.base_url.as_str(), "http://localhost:4501/");
    assert_eq!(cli.output, OutputFormat::Events);
    let Commands::Run(opts) = cli.command else {
        panic!("expected run command");
    };
    assert_eq!(opts.payload().unwrap(), json!({"user_msg": "hello there"}));
}

#[test]
fn test_cli_parsing_run_input_json() {
    let cli = Cli::try_parse_from([
        "wf",
        "--deployment",
        "chat",
        "--output",
        "chat",
        "run",
        "--input",
        r#"{"message": "hi"}"#,
    ])
    .unwrap();

    assert_eq!(cli.output, OutputFormat::Chat);
    let Commands::Run(opts) = cli.command else {
        panic!("expected run command");
    };
    assert_eq!(opts.payload().unwrap(), json!({"message": "hi"}));
}

#[test]
fn test_cli_rejects_non_object_input() {
    let cli = Cli::try_parse_from(["wf", "--deployment", "chat", "run", "--input", "[1, 2]"]).unwrap();
    let Commands::Run(opts) = cli.command else {
        panic!("expected run command");
    };
    assert!(opts.payload().is_err());
}

#[test]
fn test_cli_parsing_send() {
    let cli = Cli::try_parse_from([
        "wf",
        "--deployment",
        "chat",
        "--session-id",
        "session-1",
        "send",
        "task-1",
        "--type",
        "app.events.HumanResponseEvent",
        "--data",
        r#"{"response": "yes"}"#,
    ])
    .unwrap();

    assert_eq!(cli.connection.session_id.as_deref(), Some("session-1"));
    let Commands::Send(opts) = cli.command else {
        panic!("expected send command");
    };
    assert_eq!(opts.task_id, "task-1");
    assert_eq!(
        opts.event().unwrap(),
        WorkflowEvent::new("app.events.HumanResponseEvent", json!({"response": "yes"}))
    );
}

#[test]
fn test_cli_rejects_bad_base_url() {
    let result = Cli::try_parse_from(["wf", "--base-url", "not a url", "--deployment", "chat", "run"]);
    assert!(result.is_err());
}

#[tokio::test]
async fn test_run_prints_every_event() {
    let client = Arc::new(MockClient::new());
    client.script_stream(
        "task-1",
        StreamScript::events(&[ui(1), ui(2), WorkflowEvent::stop(json!("done"))]),
    );
    let buffer = Buffer::default();
    let printer = Arc::new(Printer::new(OutputFormat::Events, buffer.clone()));
    let cli = Cli::try_parse_from(["wf", "--deployment", "chat", "run", "hi"]).unwrap();

    let status = cli.command.run(client.clone(), None, printer).await.unwrap();

    assert_eq!(status, TaskStatus::Complete);
    assert_eq!(buffer.events().len(), 3);
    assert_eq!(client.inputs(), vec![json!({"user_msg": "hi"})]);
}

#[tokio::test]
async fn test_resume_requires_session() {
    let client = Arc::new(MockClient::new());
    let printer = Arc::new(Printer::new(OutputFormat::Events, Buffer::default()));
    let cli = Cli::try_parse_from(["wf", "--deployment", "chat", "resume", "task-1"]).unwrap();

    let result = cli.command.run(client.clone(), None, printer).await;

    assert!(result.is_err());
    assert_eq!(client.stream_reads("task-1"), 0);
}

#[tokio::test]
async fn test_send_prints_only_new_events() {
    let client = Arc::new(MockClient::new());
    let asked = WorkflowEvent::new("app.events.InputRequiredEvent", json!({"prefix": "Proceed?"}));
    let stop = WorkflowEvent::stop(json!("done"));
    client
        .script_stream("task-1", StreamScript::events(&[ui(1), asked.clone()]))
        .script_stream(
            "task-1",
            StreamScript::events(&[ui(1), asked.clone(), ui(2), stop.clone()]),
        );
    let buffer = Buffer::default();
    let printer = Arc::new(Printer::new(OutputFormat::Events, buffer.clone()));
    let cli = send_answer_cli();

    let status = cli
        .command
        .run(client.clone(), Some("session-1"), printer)
        .await
        .unwrap();

    assert_eq!(status, TaskStatus::Complete);
    assert_eq!(buffer.events(), vec![ui(2), stop]);
    assert_eq!(client.sent_events().len(), 1);
}

fn send_answer_cli() -> Cli {
    Cli::try_parse_from([
        "wf",
        "--deployment",
        "chat",
        "send",
        "task-1",
        "--type",
        "app.events.HumanResponseEvent",
        "--data",
        r#"{"response": "yes"}"#,
    ])
    .unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_send_reaches_task_waiting_for_input() {
    let client = Arc::new(MockClient::new());
    let asked = WorkflowEvent::new("app.events.InputRequiredEvent", json!({"prefix": "Proceed?"}));
    client.script_stream(
        "task-1",
        StreamScript::BodyThenHang(vec![envelope_line(&asked)]),
    );
    let buffer = Buffer::default();
    let printer = Arc::new(Printer::new(OutputFormat::Events, buffer.clone()));
    let cli = send_answer_cli();

    let api = client.clone();
    let command = tokio::spawn(async move {
        cli.command.run(api, Some("session-1"), printer).await
    });
    let delivered = tokio::time::timeout(Duration::from_secs(3), async {
        while client.sent_events().is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    command.abort();

    assert!(delivered.is_ok(), "event was never sent to the waiting task");
    assert_eq!(
        client.sent_events(),
        vec![(
            "task-1".to_string(),
            WorkflowEvent::new("app.events.HumanResponseEvent", json!({"response": "yes"}))
        )]
    );
    assert!(buffer.events().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_send_to_waiting_task_prints_reaction() {
    let client = Arc::new(MockClient::new());
    let asked = WorkflowEvent::new("app.events.InputRequiredEvent", json!({"prefix": "Proceed?"}));
    let stop = WorkflowEvent::stop(json!("done"));
    client.script_stream(
        "task-1",
        StreamScript::Interactive {
            before: vec![envelope_line(&ui(1)), envelope_line(&asked)],
            after: vec![envelope_line(&ui(2)), envelope_line(&stop)],
        },
    );
    let buffer = Buffer::default();
    let printer = Arc::new(Printer::new(OutputFormat::Events, buffer.clone()));
    let cli = send_answer_cli();

    let status = tokio::time::timeout(
        Duration::from_secs(3),
        cli.command.run(client.clone(), Some("session-1"), printer),
    )
    .await
    .expect("send did not finish")
    .unwrap();

    assert_eq!(status, TaskStatus::Complete);
    assert_eq!(buffer.events(), vec![ui(2), stop]);
    assert_eq!(client.sent_events().len(), 1);
}
