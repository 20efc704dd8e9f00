//! Document store: whole-file access to the task document and progress log.
//!
//! Both files are shared with an external automation loop that may rewrite
//! them at any time. There is no file locking: every read takes the whole
//! file, every write replaces the whole file, and conflicts are handled one
//! level up by the reconciliation protocol rather than at the filesystem.

use std::path::{Path, PathBuf};

use serde_json::Value;
use thiserror::Error;

use crate::document::{canonical_json, TaskDocument};

/// Errors scoped to a single store resource. A failure reading one file
/// never affects access to the other.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0} not found at {1}")]
    NotFound(&'static str, PathBuf),

    #[error("Failed to read {0}: {1}")]
    Read(&'static str, std::io::Error),

    #[error("Task document is not valid JSON: {0}")]
    Parse(serde_json::Error),

    #[error("Failed to write {0}: {1}")]
    Write(&'static str, std::io::Error),

    #[error("Failed to serialize task document: {0}")]
    Serialize(serde_json::Error),
}

/// Filesystem accessor for the two files the dashboard observes.
#[derive(Debug, Clone)]
pub struct DocumentStore {
    tasks_path: PathBuf,
    progress_path: PathBuf,
}

impl DocumentStore {
    pub fn new(tasks_path: impl Into<PathBuf>, progress_path: impl Into<PathBuf>) -> Self {
        Self {
            tasks_path: tasks_path.into(),
            progress_path: progress_path.into(),
        }
    }

    pub fn tasks_path(&self) -> &Path {
        &self.tasks_path
    }

    /// Read and decode the task document. Malformed JSON is reported
    /// distinctly from I/O failures so callers can tell a missing file from
    /// a half-written one.
    pub async fn read_document(&self) -> Result<Value, StoreError> {
        let contents = read_file("task document", &self.tasks_path).await?;
        serde_json::from_str(&contents).map_err(StoreError::Parse)
    }

    /// Replace the task document on disk with the canonical serialization of
    /// `document`. Last writer wins.
    pub async fn write_document(&self, document: &TaskDocument) -> Result<(), StoreError> {
        let text = canonical_json(document).map_err(StoreError::Serialize)?;
        tokio::fs::write(&self.tasks_path, text)
            .await
            .map_err(|e| StoreError::Write("task document", e))
    }

    /// Read the progress log as raw text.
    pub async fn read_progress(&self) -> Result<String, StoreError> {
        read_file("progress file", &self.progress_path).await
    }
}

async fn read_file(resource: &'static str, path: &Path) -> Result<String, StoreError> {
    match tokio::fs::read_to_string(path).await {
        Ok(contents) => Ok(contents),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(StoreError::NotFound(resource, path.to_path_buf()))
        }
        Err(e) => Err(StoreError::Read(resource, e)),
    }
}
