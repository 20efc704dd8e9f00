//! Fixed-interval polling of the task document and progress log.
//!
//! Each tick fetches both resources independently and forwards a resource
//! only when its content actually changed from the last forwarded value, so
//! a no-op poll causes no reconciliation churn. A failure on one resource is
//! scoped to that resource and retried on the next tick; it never stops the
//! timer or the other fetch.

use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// One poll outcome, scoped to a single resource.
#[derive(Debug, Clone)]
pub enum PollUpdate {
    /// Raw task document body; only sent when it changed.
    Document(String),
    /// Raw progress text; only sent when it changed.
    Progress(String),
    DocumentError(String),
    ProgressError(String),
}

#[derive(Debug, Error)]
pub enum PollError {
    #[error("{0}")]
    Http(#[from] reqwest::Error),

    #[error("{resource} request failed with status {status}")]
    Status {
        resource: &'static str,
        status: reqwest::StatusCode,
    },
}

/// Controls a running poll loop.
pub struct PollerHandle {
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl PollerHandle {
    /// Cancel future ticks. A fetch already in flight completes and its
    /// result is discarded.
    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

pub struct Poller {
    client: reqwest::Client,
    base_url: String,
    last_document: Option<String>,
    last_progress: Option<String>,
}

impl Poller {
    /// Begin polling at a fixed interval, sending updates on `tx`.
    pub fn start(
        base_url: impl Into<String>,
        interval: Duration,
        tx: mpsc::UnboundedSender<PollUpdate>,
    ) -> PollerHandle {
        let mut poller = Poller {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            last_document: None,
            last_progress: None,
        };

        let (stop_tx, mut stop_rx) = watch::channel(false);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = stop_rx.changed() => break,
                    _ = ticker.tick() => {}
                }

                let updates = poller.tick().await;
                if *stop_rx.borrow() {
                    break;
                }
                for update in updates {
                    if tx.send(update).is_err() {
                        return;
                    }
                }
            }
        });

        PollerHandle { stop_tx, task }
    }

    async fn tick(&mut self) -> Vec<PollUpdate> {
        let mut updates = Vec::new();

        match self.fetch("task document", "/api/tasks").await {
            Ok(body) => {
                if changed(&mut self.last_document, body.clone()) {
                    updates.push(PollUpdate::Document(body));
                }
            }
            Err(e) => updates.push(PollUpdate::DocumentError(e.to_string())),
        }

        match self.fetch("progress file", "/api/progress").await {
            Ok(body) => {
                if changed(&mut self.last_progress, body.clone()) {
                    updates.push(PollUpdate::Progress(body));
                }
            }
            Err(e) => updates.push(PollUpdate::ProgressError(e.to_string())),
        }

        updates
    }

    async fn fetch(&self, resource: &'static str, path: &str) -> Result<String, PollError> {
        let response = self
            .client
            .get(format!("{}{}", self.base_url, path))
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(PollError::Status { resource, status });
        }
        Ok(response.text().await?)
    }
}

/// Record `body` as the last forwarded value; true when it differed.
fn changed(last: &mut Option<String>, body: String) -> bool {
    if last.as_deref() == Some(body.as_str()) {
        return false;
    }
    *last = Some(body);
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_changed_forwards_first_value_and_real_changes_only() {
        let mut last = None;
        assert!(changed(&mut last, "a".to_string()));
        assert!(!changed(&mut last, "a".to_string()));
        assert!(changed(&mut last, "b".to_string()));
        assert!(!changed(&mut last, "b".to_string()));
        assert_eq!(last.as_deref(), Some("b"));
    }
}
