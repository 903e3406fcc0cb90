//! Decoding of the newline-delimited task event stream

use std::fmt::Display;
use std::ops::ControlFlow;

use futures::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use wf_api_contract::{classify_line, is_stop_event, LineBuffer, WorkflowEvent};

use crate::{ClientApiError, ClientApiResult, EventSink};

const LOGGED_LINE_PREFIX: usize = 200;

/// Pump a body of byte chunks through line framing and classification.
///
/// Malformed lines are skipped with a debug log. A read error is reported to
/// `sink.on_error` and returned. Cancellation ends the read quietly with the
/// events gathered so far and no further callbacks.
pub async fn drive_event_stream<S, B, E>(
    chunks: S,
    sink: &mut (dyn EventSink + Send),
    cancel: &CancellationToken,
) -> ClientApiResult<Vec<WorkflowEvent>>
where
    S: Stream<Item = Result<B, E>> + Send,
    B: AsRef<[u8]> + Send,
    E: Display + Send,
{
    futures::pin_mut!(chunks);
    let mut lines = LineBuffer::new();
    let mut events = Vec::new();

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!(received = events.len(), "event stream cancelled");
                return Ok(events);
            }
            next = chunks.next() => next,
        };

        match next {
            Some(Ok(chunk)) => {
                for line in lines.push(chunk.as_ref()) {
                    if cancel.is_cancelled() {
                        return Ok(events);
                    }
                    if deliver(&line, sink, &mut events).is_break() {
                        sink.on_finish(&events);
                        return Ok(events);
                    }
                }
            }
            Some(Err(err)) => {
                let error = ClientApiError::StreamRead(err.to_string());
                tracing::warn!(%error, received = events.len(), "event stream failed");
                sink.on_error(&error);
                return Err(error);
            }
            None => break,
        }
    }

    if let Some(line) = lines.finish() {
        let _ = deliver(&line, sink, &mut events);
    }
    sink.on_finish(&events);
    Ok(events)
}

fn deliver(
    line: &str,
    sink: &mut (dyn EventSink + Send),
    events: &mut Vec<WorkflowEvent>,
) -> ControlFlow<()> {
    let Some(event) = classify_line(line) else {
        if !line.trim().is_empty() {
            let prefix: String = line.chars().take(LOGGED_LINE_PREFIX).collect();
            tracing::debug!(line = %prefix, "skipping malformed event line");
        }
        return ControlFlow::Continue(());
    };

    let flow = sink.on_data(&event);
    if is_stop_event(&event) {
        sink.on_stop_event(&event);
    }
    events.push(event);
    flow
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use serde_json::json;
    use wf_api_contract::STOP_EVENT_QUALIFIED_NAME;

    #[derive(Default)]
    struct Recorder {
        data: Vec<String>,
        stops: usize,
        finished: Option<usize>,
        errors: Vec<ClientApiError>,
        break_after: Option<usize>,
    }

    impl EventSink for Recorder {
        fn on_data(&mut self, event: &WorkflowEvent) -> ControlFlow<()> {
            self.data.push(event.event_type.clone());
            match self.break_after {
                Some(limit) if self.data.len() >= limit => ControlFlow::Break(()),
                _ => ControlFlow::Continue(()),
            }
        }

        fn on_stop_event(&mut self, _event: &WorkflowEvent) {
            self.stops += 1;
        }

        fn on_finish(&mut self, events: &[WorkflowEvent]) {
            self.finished = Some(events.len());
        }

        fn on_error(&mut self, error: &ClientApiError) {
            self.errors.push(error.clone());
        }
    }

    fn envelope(name: &str) -> String {
        format!(
            "{}\n",
            json!({"__is_pydantic": true, "qualified_name": name, "value": {"n": name}})
        )
    }

    fn ok_chunks(parts: Vec<String>) -> impl Stream<Item = Result<Vec<u8>, String>> + Send {
        stream::iter(parts.into_iter().map(|p| Ok(p.into_bytes())))
    }

    #[tokio::test]
    async fn test_delivers_events_and_stop() {
        let body = [envelope("a.UIEvent"), envelope("a.UIEvent"), envelope(STOP_EVENT_QUALIFIED_NAME)];
        let mut sink = Recorder::default();
        let events = drive_event_stream(ok_chunks(body.to_vec()), &mut sink, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(events.len(), 3);
        assert_eq!(sink.data.len(), 3);
        assert_eq!(sink.stops, 1);
        assert_eq!(sink.finished, Some(3));
        assert!(sink.errors.is_empty());
    }

    #[tokio::test]
    async fn test_same_events_for_any_chunking() {
        let body = format!("{}{}{}", envelope("a.One"), envelope("a.Two"), envelope("a.Three"));
        let bytes = body.as_bytes().to_vec();

        let mut whole = Recorder::default();
        let expected = drive_event_stream(
            ok_chunks(vec![body.clone()]),
            &mut whole,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        for size in [1, 2, 3, 7, 16, 61] {
            let chunks: Vec<Result<Vec<u8>, String>> =
                bytes.chunks(size).map(|c| Ok(c.to_vec())).collect();
            let mut sink = Recorder::default();
            let events = drive_event_stream(stream::iter(chunks), &mut sink, &CancellationToken::new())
                .await
                .unwrap();
            assert_eq!(events, expected, "chunk size {size}");
        }
    }

    #[tokio::test]
    async fn test_malformed_lines_are_skipped() {
        let body = vec![
            "not json\n".to_string(),
            envelope("a.First"),
            "{\"unrelated\": true}\n".to_string(),
            "12\n\n".to_string(),
            envelope("a.Second"),
        ];
        let mut sink = Recorder::default();
        let events = drive_event_stream(ok_chunks(body), &mut sink, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(sink.data, vec!["a.First".to_string(), "a.Second".to_string()]);
        assert_eq!(events.len(), 2);
        assert!(sink.errors.is_empty());
    }

    #[tokio::test]
    async fn test_unterminated_last_line_is_parsed() {
        let last = envelope("a.Last");
        let body = vec![envelope("a.First"), last.trim_end().to_string()];
        let mut sink = Recorder::default();
        let events = drive_event_stream(ok_chunks(body), &mut sink, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(events.len(), 2);
    }

    #[tokio::test]
    async fn test_read_error_keeps_partial_events_in_sink() {
        let chunks: Vec<Result<Vec<u8>, String>> = vec![
            Ok(envelope("a.First").into_bytes()),
            Err("connection reset".to_string()),
            Ok(envelope("a.Never").into_bytes()),
        ];
        let mut sink = Recorder::default();
        let result = drive_event_stream(stream::iter(chunks), &mut sink, &CancellationToken::new()).await;

        assert_eq!(
            result,
            Err(ClientApiError::StreamRead("connection reset".to_string()))
        );
        assert_eq!(sink.data, vec!["a.First".to_string()]);
        assert_eq!(sink.errors.len(), 1);
        assert_eq!(sink.finished, None);
    }

    #[tokio::test]
    async fn test_sink_break_stops_reading() {
        let body = vec![envelope("a.One"), envelope("a.Two"), envelope("a.Three")];
        let mut sink = Recorder {
            break_after: Some(2),
            ..Default::default()
        };
        let events = drive_event_stream(ok_chunks(body), &mut sink, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(sink.finished, Some(2));
    }

    #[tokio::test]
    async fn test_cancellation_is_quiet() {
        let first = stream::iter(vec![Ok::<_, String>(envelope("a.One").into_bytes())]);
        let chunks = first.chain(stream::pending());
        let cancel = CancellationToken::new();
        let mut sink = Recorder::default();

        let trigger = cancel.clone();
        let handle = tokio::spawn(async move {
            tokio::task::yield_now().await;
            trigger.cancel();
        });

        let events = drive_event_stream(chunks, &mut sink, &cancel).await.unwrap();
        handle.await.unwrap();

        assert_eq!(events.len(), 1);
        assert!(sink.errors.is_empty());
        assert_eq!(sink.finished, None);
    }
}
