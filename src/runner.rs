//! Runner supervision.
//!
//! At most one external process runs at a time, process-wide. The supervisor
//! owns its lifecycle, folds stdout and stderr into a single bounded line
//! buffer, and fans every status change and log line out over a broadcast
//! channel so any number of observers can follow along. New observers get an
//! atomic snapshot (current status plus the buffered backlog) together with a
//! receiver subscribed under the same lock, so there is no gap between the
//! replay and the live stream.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{broadcast, mpsc, Mutex};

/// How many log lines are retained for replay to new subscribers.
pub const LOG_BUFFER_CAPACITY: usize = 500;

/// How long a stop request waits before escalating to a forced kill.
const STOP_GRACE: Duration = Duration::from_secs(5);

/// Snapshot of the runner lifecycle, safe to hand to any caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerStatus {
    pub running: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(rename = "startedAt", default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
}

/// One log line as carried on the event stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogLine {
    pub line: String,
}

/// Events fanned out to every subscriber, in arrival order.
#[derive(Debug, Clone)]
pub enum RunnerEvent {
    Status(RunnerStatus),
    Log(String),
}

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("A runner is already active. Stop it before starting another.")]
    AlreadyRunning,

    #[error("No runner is currently active.")]
    NotRunning,

    #[error("Runner command must not be empty.")]
    InvalidCommand,
}

struct ActiveRunner {
    command: String,
    started_at: DateTime<Utc>,
    pid: Option<u32>,
    /// Asks the monitor task to force-kill the child.
    kill_tx: mpsc::Sender<()>,
}

struct Inner {
    active: Option<ActiveRunner>,
    buffer: VecDeque<String>,
    capacity: usize,
}

/// Owner of the single runner process and its log fan-out.
pub struct RunnerSupervisor {
    inner: Mutex<Inner>,
    events: broadcast::Sender<RunnerEvent>,
}

impl RunnerSupervisor {
    pub fn new() -> Self {
        Self::with_capacity(LOG_BUFFER_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            inner: Mutex::new(Inner {
                active: None,
                buffer: VecDeque::with_capacity(capacity.min(LOG_BUFFER_CAPACITY)),
                capacity,
            }),
            events,
        }
    }

    /// Launch a process. Fire-and-forget: returns as soon as the process is
    /// spawned, without waiting for output. A spawn failure is reported as a
    /// synthetic log line rather than an error, so observers watching the
    /// stream see it in context.
    pub async fn start(
        self: Arc<Self>,
        command: &str,
        args: &[String],
        cwd: Option<PathBuf>,
    ) -> Result<(), RunnerError> {
        let command = command.trim();
        if command.is_empty() {
            return Err(RunnerError::InvalidCommand);
        }

        let mut inner = self.inner.lock().await;
        if inner.active.is_some() {
            return Err(RunnerError::AlreadyRunning);
        }

        let mut cmd = Command::new(command);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }

        let invocation = if args.is_empty() {
            command.to_string()
        } else {
            format!("{} {}", command, args.join(" "))
        };

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                tracing::warn!("Failed to spawn runner `{}`: {}", invocation, e);
                self.push_line_locked(&mut inner, format!("failed to start `{}`: {}", invocation, e));
                self.emit_status_locked(&inner);
                return Ok(());
            }
        };

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let (kill_tx, kill_rx) = mpsc::channel(1);

        inner.active = Some(ActiveRunner {
            command: invocation.clone(),
            started_at: Utc::now(),
            pid: child.id(),
            kill_tx,
        });
        self.push_line_locked(&mut inner, format!("$ {}", invocation));
        self.emit_status_locked(&inner);
        drop(inner);

        tracing::info!("Runner started: {}", invocation);

        tokio::spawn(async move {
            self.monitor(child, stdout, stderr, kill_rx).await;
        });

        Ok(())
    }

    /// Request termination of the active process. Returns as soon as the
    /// request is issued; a forced kill follows if the process has not
    /// exited within the grace period.
    pub async fn stop(&self) -> Result<(), RunnerError> {
        let inner = self.inner.lock().await;
        let active = inner.active.as_ref().ok_or(RunnerError::NotRunning)?;
        let kill_tx = active.kill_tx.clone();
        let pid = active.pid;
        let command = active.command.clone();
        drop(inner);

        tracing::info!("Stopping runner: {}", command);

        if request_graceful_terminate(pid) {
            // Escalate once the grace period elapses. If the process has
            // already exited the monitor is gone and the send is a no-op.
            tokio::spawn(async move {
                tokio::time::sleep(STOP_GRACE).await;
                let _ = kill_tx.send(()).await;
            });
        } else {
            let _ = kill_tx.send(()).await;
        }

        Ok(())
    }

    /// Current lifecycle snapshot. Pure read.
    pub async fn status(&self) -> RunnerStatus {
        let inner = self.inner.lock().await;
        status_of(&inner)
    }

    /// Subscribe to the event stream. The returned status and backlog are
    /// captured under the same lock that orders all event sends, so the
    /// receiver picks up exactly the events that follow the snapshot.
    pub async fn subscribe(
        &self,
    ) -> (RunnerStatus, Vec<String>, broadcast::Receiver<RunnerEvent>) {
        let inner = self.inner.lock().await;
        let receiver = self.events.subscribe();
        let backlog = inner.buffer.iter().cloned().collect();
        (status_of(&inner), backlog, receiver)
    }

    async fn monitor(
        self: Arc<Self>,
        mut child: Child,
        stdout: Option<impl AsyncRead + Unpin + Send + 'static>,
        stderr: Option<impl AsyncRead + Unpin + Send + 'static>,
        mut kill_rx: mpsc::Receiver<()>,
    ) {
        let mut pumps = Vec::new();
        if let Some(out) = stdout {
            let supervisor = Arc::clone(&self);
            pumps.push(tokio::spawn(async move { supervisor.pump_lines(out).await }));
        }
        if let Some(err) = stderr {
            let supervisor = Arc::clone(&self);
            pumps.push(tokio::spawn(async move { supervisor.pump_lines(err).await }));
        }

        let status = tokio::select! {
            status = child.wait() => status,
            _ = kill_rx.recv() => {
                let _ = child.start_kill();
                child.wait().await
            }
        };

        // Drain remaining output before reporting the exit.
        for pump in pumps {
            let _ = pump.await;
        }

        let exit_line = match &status {
            Ok(status) => describe_exit(status),
            Err(e) => format!("runner wait failed: {}", e),
        };
        tracing::info!("{}", exit_line);

        let mut inner = self.inner.lock().await;
        inner.active = None;
        self.push_line_locked(&mut inner, exit_line);
        self.emit_status_locked(&inner);
    }

    async fn pump_lines(self: Arc<Self>, reader: impl AsyncRead + Unpin) {
        let mut lines = BufReader::new(reader).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let line = line.trim_end_matches('\r');
                    if line.is_empty() {
                        continue;
                    }
                    let mut inner = self.inner.lock().await;
                    self.push_line_locked(&mut inner, line.to_string());
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::debug!("Runner output stream closed: {}", e);
                    break;
                }
            }
        }
    }

    fn push_line_locked(&self, inner: &mut Inner, line: String) {
        if inner.buffer.len() == inner.capacity {
            inner.buffer.pop_front();
        }
        inner.buffer.push_back(line.clone());
        let _ = self.events.send(RunnerEvent::Log(line));
    }

    fn emit_status_locked(&self, inner: &Inner) {
        let _ = self.events.send(RunnerEvent::Status(status_of(inner)));
    }
}

impl Default for RunnerSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

fn status_of(inner: &Inner) -> RunnerStatus {
    RunnerStatus {
        running: inner.active.is_some(),
        command: inner.active.as_ref().map(|a| a.command.clone()),
        started_at: inner.active.as_ref().map(|a| a.started_at),
    }
}

fn describe_exit(status: &std::process::ExitStatus) -> String {
    if let Some(code) = status.code() {
        return format!("runner exited with code {}", code);
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return format!("runner terminated by signal {}", signal);
        }
    }
    "runner exited".to_string()
}

/// Ask the process to terminate (SIGTERM on Unix). Returns false when no
/// graceful mechanism is available and the caller should kill outright.
fn request_graceful_terminate(pid: Option<u32>) -> bool {
    #[cfg(unix)]
    {
        if let Some(pid) = pid {
            return unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) } == 0;
        }
        false
    }
    #[cfg(not(unix))]
    {
        let _ = pid;
        false
    }
}
