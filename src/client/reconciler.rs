//! Reconciliation between server snapshots and local edits.
//!
//! The automation loop may rewrite the task document at any moment, so the
//! editable working copy can never just adopt whatever a poll returns. The
//! rule is: never clobber an unseen external change, and never drop local
//! edits because a poll landed mid-edit.
//!
//! The reconciler is a state machine over `{dirty, locked}`:
//!
//! - **Synced**: snapshots are adopted directly.
//! - **Editing** (`dirty`): a snapshot that actually differs from the last
//!   known one transitions to **Locked**; an identical snapshot is a no-op.
//! - **Locked**: snapshots keep updating the last known server state (last
//!   one wins) but the working copy is frozen; only an explicit reload —
//!   which discards local edits — exits this state.
//!
//! `dirty` is recomputed from canonical snapshot text after every edit, so
//! an edit that exactly reverts to the server state clears it again.

use thiserror::Error;

use crate::document::{canonical_json, TaskDocument};
use crate::validate::{validate_document, Strictness, ValidationError};

#[derive(Debug, Error)]
pub enum EditError {
    #[error("An external change arrived while editing. Reload to continue.")]
    Locked,
}

/// Why a save is not currently permitted.
#[derive(Debug, Error)]
pub enum SaveBlocked {
    #[error("An external change arrived while editing. Reload to continue.")]
    Locked,

    #[error("Nothing to save.")]
    Clean,

    #[error(transparent)]
    Invalid(#[from] ValidationError),
}

/// Per-session reconciliation state. Single-writer by construction: all
/// mutation goes through `&mut self` on the owning task.
pub struct Reconciler {
    last_server_snapshot: String,
    working_copy: TaskDocument,
    dirty: bool,
    locked: bool,
    selected_story: Option<String>,
}

// Serialization of the document types cannot fail; the fallback only keeps
// the error type out of every signature.
fn snapshot_of(document: &TaskDocument) -> String {
    canonical_json(document).unwrap_or_default()
}

impl Reconciler {
    pub fn new() -> Self {
        let empty = TaskDocument::new();
        Self {
            last_server_snapshot: snapshot_of(&empty),
            working_copy: empty,
            dirty: false,
            locked: false,
            selected_story: None,
        }
    }

    pub fn dirty(&self) -> bool {
        self.dirty
    }

    pub fn locked(&self) -> bool {
        self.locked
    }

    pub fn working_copy(&self) -> &TaskDocument {
        &self.working_copy
    }

    pub fn last_server_snapshot(&self) -> &str {
        &self.last_server_snapshot
    }

    pub fn selected_story(&self) -> Option<&str> {
        self.selected_story.as_deref()
    }

    /// Feed an incoming server snapshot into the state machine.
    pub fn apply_snapshot(&mut self, document: TaskDocument) {
        let snapshot = snapshot_of(&document);

        if self.locked {
            // Absorb silently; last one wins. The working copy stays frozen.
            self.last_server_snapshot = snapshot;
            return;
        }

        if self.dirty {
            if snapshot != self.last_server_snapshot {
                tracing::info!("External change detected while editing; session locked");
                self.last_server_snapshot = snapshot;
                self.locked = true;
            }
            return;
        }

        self.last_server_snapshot = snapshot;
        self.working_copy = document;
        self.ensure_selection();
    }

    /// Apply a local edit to the working copy and recompute `dirty`.
    pub fn edit(&mut self, apply: impl FnOnce(&mut TaskDocument)) -> Result<(), EditError> {
        if self.locked {
            return Err(EditError::Locked);
        }
        apply(&mut self.working_copy);
        self.dirty = snapshot_of(&self.working_copy) != self.last_server_snapshot;
        Ok(())
    }

    /// Select a story by id. Returns false if no such story exists.
    pub fn select_story(&mut self, id: &str) -> bool {
        let exists = self
            .working_copy
            .iter()
            .flat_map(|branch| branch.stories.iter())
            .any(|story| story.id == id);
        if exists {
            self.selected_story = Some(id.to_string());
        }
        exists
    }

    /// The working copy, if it is currently allowed to be saved: not locked,
    /// actually changed, and valid under save-time rules.
    pub fn save_payload(&self) -> Result<&TaskDocument, SaveBlocked> {
        if self.locked {
            return Err(SaveBlocked::Locked);
        }
        if !self.dirty {
            return Err(SaveBlocked::Clean);
        }
        let value = serde_json::to_value(&self.working_copy).map_err(|e| {
            SaveBlocked::Invalid(ValidationError(format!(
                "Task document could not be serialized: {}",
                e
            )))
        })?;
        validate_document(&value, Strictness::Save)?;
        Ok(&self.working_copy)
    }

    pub fn can_save(&self) -> bool {
        self.save_payload().is_ok()
    }

    /// Record that the working copy was written successfully: it becomes the
    /// new last known server state.
    pub fn mark_saved(&mut self) {
        self.last_server_snapshot = snapshot_of(&self.working_copy);
        self.dirty = false;
    }

    /// Discard local edits and adopt the last observed server snapshot.
    /// This is the only way out of the locked state.
    pub fn reload(&mut self) -> Result<(), serde_json::Error> {
        let document: TaskDocument = serde_json::from_str(&self.last_server_snapshot)?;
        self.working_copy = document;
        self.dirty = false;
        self.locked = false;
        self.ensure_selection();
        Ok(())
    }

    fn ensure_selection(&mut self) {
        let still_present = self.selected_story.as_deref().is_some_and(|id| {
            self.working_copy
                .iter()
                .flat_map(|branch| branch.stories.iter())
                .any(|story| story.id == id)
        });
        if !still_present {
            self.selected_story = self
                .working_copy
                .iter()
                .flat_map(|branch| branch.stories.iter())
                .next()
                .map(|story| story.id.clone());
        }
    }
}

impl Default for Reconciler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{Branch, Story};

    fn story(id: &str, title: &str) -> Story {
        Story {
            id: id.to_string(),
            title: title.to_string(),
            acceptance_criteria: vec!["x".to_string()],
            priority: 1.0,
            passes: false,
            notes: None,
        }
    }

    fn doc(titles: &[(&str, &str)]) -> TaskDocument {
        vec![Branch {
            name: "main".to_string(),
            stories: titles.iter().map(|(id, t)| story(id, t)).collect(),
        }]
    }

    #[test]
    fn test_synced_adopts_snapshot_and_selects_default_story() {
        let mut r = Reconciler::new();
        r.apply_snapshot(doc(&[("STORY-001", "A")]));
        assert!(!r.dirty());
        assert!(!r.locked());
        assert_eq!(r.selected_story(), Some("STORY-001"));
        assert_eq!(r.working_copy(), &doc(&[("STORY-001", "A")]));
    }

    #[test]
    fn test_edit_then_revert_clears_dirty() {
        let mut r = Reconciler::new();
        r.apply_snapshot(doc(&[("STORY-001", "A")]));

        r.edit(|d| d[0].stories[0].title = "B".to_string()).unwrap();
        assert!(r.dirty());

        r.edit(|d| d[0].stories[0].title = "A".to_string()).unwrap();
        assert!(!r.dirty());
    }

    #[test]
    fn test_external_change_while_dirty_locks_without_touching_edits() {
        let mut r = Reconciler::new();
        r.apply_snapshot(doc(&[("STORY-001", "A")]));
        r.edit(|d| d[0].stories[0].title = "edited".to_string()).unwrap();

        r.apply_snapshot(doc(&[("STORY-001", "rewritten")]));
        assert!(r.locked());
        assert!(r.dirty());
        assert_eq!(r.working_copy()[0].stories[0].title, "edited");
    }

    #[test]
    fn test_unchanged_snapshot_while_dirty_stays_editing() {
        let mut r = Reconciler::new();
        r.apply_snapshot(doc(&[("STORY-001", "A")]));
        r.edit(|d| d[0].stories[0].title = "edited".to_string()).unwrap();

        // Poll returns the same server state; no conflict.
        r.apply_snapshot(doc(&[("STORY-001", "A")]));
        assert!(!r.locked());
        assert!(r.dirty());
    }

    #[test]
    fn test_locked_absorbs_snapshots_and_reload_adopts_the_last() {
        let mut r = Reconciler::new();
        r.apply_snapshot(doc(&[("STORY-001", "A")]));
        r.edit(|d| d[0].stories[0].title = "edited".to_string()).unwrap();
        r.apply_snapshot(doc(&[("STORY-001", "v2")]));
        r.apply_snapshot(doc(&[("STORY-001", "v3")]));
        assert!(r.locked());

        assert!(matches!(r.edit(|_| {}), Err(EditError::Locked)));
        assert!(matches!(r.save_payload(), Err(SaveBlocked::Locked)));

        r.reload().unwrap();
        assert!(!r.locked());
        assert!(!r.dirty());
        assert_eq!(r.working_copy()[0].stories[0].title, "v3");
    }

    #[test]
    fn test_save_gating() {
        let mut r = Reconciler::new();
        r.apply_snapshot(doc(&[("STORY-001", "A")]));
        assert!(matches!(r.save_payload(), Err(SaveBlocked::Clean)));

        r.edit(|d| d[0].stories[0].title = String::new()).unwrap();
        assert!(matches!(r.save_payload(), Err(SaveBlocked::Invalid(_))));

        r.edit(|d| d[0].stories[0].title = "B".to_string()).unwrap();
        assert!(r.can_save());

        r.mark_saved();
        assert!(!r.dirty());
        assert!(matches!(r.save_payload(), Err(SaveBlocked::Clean)));
    }

    #[test]
    fn test_selection_survives_snapshots_while_present() {
        let mut r = Reconciler::new();
        r.apply_snapshot(doc(&[("STORY-001", "A"), ("STORY-002", "B")]));
        assert!(r.select_story("STORY-002"));

        r.apply_snapshot(doc(&[("STORY-001", "A"), ("STORY-002", "B2")]));
        assert_eq!(r.selected_story(), Some("STORY-002"));

        // Selected story disappears; fall back to the first one.
        r.apply_snapshot(doc(&[("STORY-001", "A")]));
        assert_eq!(r.selected_story(), Some("STORY-001"));
    }

    #[test]
    fn test_formatting_differences_do_not_count_as_changes() {
        let mut r = Reconciler::new();
        r.apply_snapshot(doc(&[("STORY-001", "A")]));
        r.edit(|d| d[0].stories[0].title = "edited".to_string()).unwrap();

        // A structurally identical document arriving as a fresh value must
        // compare equal to the stored snapshot.
        let same = doc(&[("STORY-001", "A")]);
        r.apply_snapshot(same);
        assert!(!r.locked());
    }
}
