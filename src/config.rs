//! Application configuration.
//!
//! All settings come from environment variables with local-tool defaults, so
//! `taskboard` started in a project directory just works against
//! `./tasks.json` and `./progress.txt`.

use std::path::PathBuf;
use std::time::Duration;

/// Runtime configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Bind host (default `127.0.0.1`; the tool is local-only).
    pub host: String,
    /// Bind port (default 4400).
    pub port: u16,
    /// Path to the task document.
    pub tasks_path: PathBuf,
    /// Path to the progress log.
    pub progress_path: PathBuf,
    /// Client poll interval.
    pub poll_interval: Duration,
}

impl Config {
    /// Load configuration from the environment:
    /// - `TASKBOARD_HOST`
    /// - `TASKBOARD_PORT`
    /// - `TASKBOARD_TASKS_FILE`
    /// - `TASKBOARD_PROGRESS_FILE`
    /// - `TASKBOARD_POLL_MS`
    pub fn from_env() -> Self {
        let host = std::env::var("TASKBOARD_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = std::env::var("TASKBOARD_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(4400);
        let tasks_path = std::env::var("TASKBOARD_TASKS_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("tasks.json"));
        let progress_path = std::env::var("TASKBOARD_PROGRESS_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("progress.txt"));
        let poll_interval = std::env::var("TASKBOARD_POLL_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .map(Duration::from_millis)
            .unwrap_or(Duration::from_millis(2000));

        Self {
            host,
            port,
            tasks_path,
            progress_path,
            poll_interval,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 4400,
            tasks_path: PathBuf::from("tasks.json"),
            progress_path: PathBuf::from("progress.txt"),
            poll_interval: Duration::from_millis(2000),
        }
    }
}
