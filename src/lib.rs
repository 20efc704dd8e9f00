//! # Taskboard
//!
//! A local dashboard for editing a structured task document while an
//! external automation loop rewrites it on disk.
//!
//! The server half owns the files and the runner process:
//!
//! ```text
//!   tasks.json / progress.txt          user command
//!          │                                │
//!          ▼                                ▼
//!   ┌──────────────┐              ┌──────────────────┐
//!   │ DocumentStore│              │ RunnerSupervisor │
//!   └──────┬───────┘              └───────┬──────────┘
//!          │        HTTP + SSE            │ log fan-out
//!          └──────────►  api  ◄───────────┘
//! ```
//!
//! The client half keeps an editable working copy consistent with the file
//! without ever silently dropping either side:
//!
//! 1. The [`client::Poller`] fetches the document and progress log on a
//!    fixed interval, forwarding only real changes.
//! 2. The [`client::Reconciler`] merges incoming snapshots with local edits;
//!    an external change landing on top of unsaved edits locks the session
//!    until the user explicitly reloads.
//!
//! ## Modules
//! - `document`: data model and canonical serialization
//! - `validate`: schema checks (load-tolerant, save-strict)
//! - `store`: whole-file document and progress access
//! - `runner`: single-process supervisor with bounded log replay
//! - `api`: axum routes, including the SSE log stream
//! - `client`: reconciler, poller, and log stream subscriber

pub mod api;
pub mod client;
pub mod config;
pub mod document;
pub mod runner;
pub mod store;
pub mod validate;

pub use config::Config;
