//! Subscriber for the runner's SSE log stream.
//!
//! A malformed event payload is reported locally and the stream stays up;
//! transport errors are surfaced and the underlying source retries.

use futures::StreamExt;
use reqwest_eventsource::{Error as SourceError, Event, EventSource};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::runner::{LogLine, RunnerStatus};

/// Events delivered to the local consumer.
#[derive(Debug, Clone)]
pub enum RunnerStreamEvent {
    Status(RunnerStatus),
    Log(String),
    /// Transport-level failure; the stream reconnects on its own.
    TransportError(String),
}

/// Controls a running log stream subscription.
pub struct LogStreamHandle {
    task: JoinHandle<()>,
}

impl LogStreamHandle {
    pub fn stop(&self) {
        self.task.abort();
    }
}

/// Connect to `/api/runner/logs` and forward events on `tx` until the
/// consumer goes away.
pub fn subscribe(base_url: &str, tx: mpsc::UnboundedSender<RunnerStreamEvent>) -> LogStreamHandle {
    let url = format!("{}/api/runner/logs", base_url.trim_end_matches('/'));

    let task = tokio::spawn(async move {
        let mut source = EventSource::get(&url);
        while let Some(event) = source.next().await {
            match event {
                Ok(Event::Open) => tracing::debug!("Log stream connected"),
                Ok(Event::Message(message)) => {
                    if !handle_message(&message.event, &message.data, &tx) {
                        break;
                    }
                }
                Err(SourceError::StreamEnded) => break,
                Err(e) => {
                    if tx
                        .send(RunnerStreamEvent::TransportError(e.to_string()))
                        .is_err()
                    {
                        break;
                    }
                }
            }
        }
        source.close();
    });

    LogStreamHandle { task }
}

/// Decode one event. Returns false once the consumer is gone.
fn handle_message(event: &str, data: &str, tx: &mpsc::UnboundedSender<RunnerStreamEvent>) -> bool {
    match event {
        "status" => match serde_json::from_str::<RunnerStatus>(data) {
            Ok(status) => tx.send(RunnerStreamEvent::Status(status)).is_ok(),
            Err(e) => {
                // Malformed payload: report and keep listening.
                tracing::warn!("Malformed status event: {}", e);
                true
            }
        },
        "log" => match serde_json::from_str::<LogLine>(data) {
            Ok(payload) => tx.send(RunnerStreamEvent::Log(payload.line)).is_ok(),
            Err(e) => {
                tracing::warn!("Malformed log event: {}", e);
                true
            }
        },
        other => {
            tracing::debug!("Ignoring unknown event type: {}", other);
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_status_and_log_events_are_decoded() {
        let (tx, mut rx) = mpsc::unbounded_channel();

        assert!(handle_message(
            "status",
            r#"{"running":true,"command":"echo hi"}"#,
            &tx
        ));
        assert!(handle_message("log", r#"{"line":"hi"}"#, &tx));

        match rx.recv().await.unwrap() {
            RunnerStreamEvent::Status(status) => {
                assert!(status.running);
                assert_eq!(status.command.as_deref(), Some("echo hi"));
            }
            other => panic!("unexpected event: {:?}", other),
        }
        match rx.recv().await.unwrap() {
            RunnerStreamEvent::Log(line) => assert_eq!(line, "hi"),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_malformed_payload_keeps_stream_alive() {
        let (tx, mut rx) = mpsc::unbounded_channel();

        assert!(handle_message("status", "{not json", &tx));
        assert!(handle_message("log", r#"{"line":"still here"}"#, &tx));

        // Only the well-formed event came through.
        match rx.recv().await.unwrap() {
            RunnerStreamEvent::Log(line) => assert_eq!(line, "still here"),
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
