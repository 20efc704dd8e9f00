//! Client half: keeps an editable working copy consistent with the server.
//!
//! The presentation layer sits on top of [`Session`]; everything here is
//! independent of how the document is rendered.

pub mod events;
pub mod poller;
pub mod reconciler;

pub use events::{LogStreamHandle, RunnerStreamEvent};
pub use poller::{PollUpdate, Poller, PollerHandle};
pub use reconciler::{Reconciler, SaveBlocked};

use thiserror::Error;

use crate::document::TaskDocument;
use crate::validate::{validate_document, Strictness};

#[derive(Debug, Error)]
pub enum SaveError {
    #[error(transparent)]
    Blocked(#[from] SaveBlocked),

    #[error("Save request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Server rejected the save: {0}")]
    Rejected(String),
}

/// One editing session: the document reconciler plus the latest progress
/// text. Fed from a [`Poller`] and driven by the (excluded) UI layer.
pub struct Session {
    pub reconciler: Reconciler,
    pub progress: String,
}

impl Session {
    pub fn new() -> Self {
        Self {
            reconciler: Reconciler::new(),
            progress: String::new(),
        }
    }

    /// Feed one poller update into the session. Failures are scoped to
    /// their resource and never clear local state.
    pub fn handle_update(&mut self, update: PollUpdate) {
        match update {
            PollUpdate::Document(body) => self.apply_document_body(&body),
            PollUpdate::Progress(text) => self.progress = text,
            PollUpdate::DocumentError(e) => tracing::warn!("Task document poll failed: {}", e),
            PollUpdate::ProgressError(e) => tracing::warn!("Progress poll failed: {}", e),
        }
    }

    fn apply_document_body(&mut self, body: &str) {
        let value: serde_json::Value = match serde_json::from_str(body) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!("Task document is not valid JSON: {}", e);
                return;
            }
        };
        // Load-time validation tolerates an empty document.
        if let Err(e) = validate_document(&value, Strictness::Load) {
            tracing::warn!("Task document failed validation: {}", e);
            return;
        }
        match serde_json::from_value::<TaskDocument>(value) {
            Ok(document) => self.reconciler.apply_snapshot(document),
            Err(e) => tracing::warn!("Task document has an unexpected shape: {}", e),
        }
    }

    /// Write the working copy back through the server, if the reconciler
    /// currently permits a save.
    pub async fn save(
        &mut self,
        client: &reqwest::Client,
        base_url: &str,
    ) -> Result<(), SaveError> {
        let payload = self.reconciler.save_payload()?.clone();

        let response = client
            .put(format!("{}/api/tasks", base_url.trim_end_matches('/')))
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            let message = response
                .json::<serde_json::Value>()
                .await
                .ok()
                .and_then(|body| body.get("error").and_then(|e| e.as_str()).map(String::from))
                .unwrap_or_else(|| "unknown error".to_string());
            return Err(SaveError::Rejected(message));
        }

        self.reconciler.mark_saved();
        Ok(())
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn document_body() -> String {
        serde_json::json!([{
            "name": "main",
            "stories": [{
                "id": "STORY-001",
                "title": "A",
                "acceptanceCriteria": ["x"],
                "priority": 1,
                "passes": false
            }]
        }])
        .to_string()
    }

    #[test]
    fn test_document_update_reaches_the_reconciler() {
        let mut session = Session::new();
        session.handle_update(PollUpdate::Document(document_body()));
        assert_eq!(session.reconciler.working_copy().len(), 1);
        assert_eq!(session.reconciler.selected_story(), Some("STORY-001"));
    }

    #[test]
    fn test_malformed_document_is_tolerated() {
        let mut session = Session::new();
        session.handle_update(PollUpdate::Document(document_body()));
        session.handle_update(PollUpdate::Document("{broken".to_string()));
        // Previous state survives a bad read.
        assert_eq!(session.reconciler.working_copy().len(), 1);
    }

    #[test]
    fn test_empty_document_is_accepted_on_load() {
        let mut session = Session::new();
        session.handle_update(PollUpdate::Document("[]".to_string()));
        assert!(session.reconciler.working_copy().is_empty());
    }

    #[test]
    fn test_progress_and_errors_are_resource_scoped() {
        let mut session = Session::new();
        session.handle_update(PollUpdate::Document(document_body()));
        session.handle_update(PollUpdate::Progress("iteration 3".to_string()));
        session.handle_update(PollUpdate::DocumentError("boom".to_string()));

        assert_eq!(session.progress, "iteration 3");
        assert_eq!(session.reconciler.working_copy().len(), 1);
    }
}
