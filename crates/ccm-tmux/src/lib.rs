//! Tmux-backed session processes.
//!
//! Each agent runs in its own detached tmux session. Tmux owns the
//! pseudo-terminal and renders the agent's escape sequences, so
//! `capture-pane -p` yields exactly the plain-text frame the state
//! detectors expect.
//!
//! # Panic-Free Guarantees
//!
//! This module follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations use `?`, pattern matching, or `unwrap_or`
//! - Tmux command failures are returned as errors

use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info, trace};

use ccm_core::{AppError, AppResult, ProcessSpawner, SessionProcess, SpawnRequest, TerminalSnapshot};

/// Pane width for new sessions.
pub const PANE_WIDTH: u16 = 200;

/// Pane height for new sessions.
pub const PANE_HEIGHT: u16 = 50;

/// How long a freshly spawned agent must survive to count as started.
pub const DEFAULT_SPAWN_SETTLE: Duration = Duration::from_millis(300);

/// Prefix of every tmux session created by ccm.
pub const SESSION_PREFIX: &str = "ccm";

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur during tmux operations.
#[derive(Debug, Error)]
pub enum TmuxError {
    /// The tmux binary could not be executed
    #[error("failed to run tmux: {0}")]
    NotAvailable(String),

    /// Tmux ran but reported failure
    #[error("tmux {command} failed (exit code {code:?}): {stderr}")]
    CommandFailed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    /// The agent exited right after starting
    #[error("session {0} exited immediately after start")]
    ExitedImmediately(String),
}

impl TmuxError {
    /// Converts into a process error for the session's command.
    pub fn into_app_error(self, command: &str, process_id: &str) -> AppError {
        let exit_code = match &self {
            Self::CommandFailed { code, .. } => *code,
            _ => None,
        };
        AppError::Process {
            process_id: Some(process_id.to_string()),
            command: command.to_string(),
            signal: None,
            exit_code,
            message: self.to_string(),
        }
    }
}

// ============================================================================
// Tmux Commands
// ============================================================================

/// Runs tmux with `args` and returns its stdout.
async fn run_tmux(args: &[&str]) -> Result<String, TmuxError> {
    trace!(?args, "Running tmux");
    let output = Command::new("tmux")
        .args(args)
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| TmuxError::NotAvailable(e.to_string()))?;

    if !output.status.success() {
        return Err(TmuxError::CommandFailed {
            command: args.first().copied().unwrap_or_default().to_string(),
            code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Checks if tmux is available on the system.
pub async fn is_tmux_available() -> bool {
    run_tmux(&["-V"]).await.is_ok()
}

/// Returns true if a tmux session with this exact name exists.
pub async fn has_session(name: &str) -> bool {
    let target = exact_target(name);
    run_tmux(&["has-session", "-t", &target]).await.is_ok()
}

/// `=name` makes tmux match the session name exactly instead of by prefix.
fn exact_target(name: &str) -> String {
    format!("={name}")
}

/// Active pane of the session. Pane commands reject a bare `=name`.
fn pane_target(name: &str) -> String {
    format!("={name}:")
}

/// Builds a tmux-safe session name from a worktree directory.
///
/// Tmux treats `.` and `:` specially in targets, so anything outside
/// `[A-Za-z0-9_-]` becomes `-`.
pub fn session_name_for(working_dir: &Path, sequence: u64) -> String {
    let base = working_dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "root".to_string());
    let safe: String = base
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '-' })
        .collect();
    format!("{SESSION_PREFIX}-{}-{sequence}-{safe}", std::process::id())
}

// ============================================================================
// Spawner
// ============================================================================

/// Spawns agent processes inside detached tmux sessions.
#[derive(Debug)]
pub struct TmuxSpawner {
    sequence: AtomicU64,
    settle: Duration,
}

impl TmuxSpawner {
    pub fn new() -> Self {
        Self::with_settle(DEFAULT_SPAWN_SETTLE)
    }

    /// Creates a spawner that waits `settle` before confirming a start.
    pub fn with_settle(settle: Duration) -> Self {
        Self {
            sequence: AtomicU64::new(0),
            settle,
        }
    }
}

impl Default for TmuxSpawner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProcessSpawner for TmuxSpawner {
    async fn spawn(&self, request: &SpawnRequest) -> AppResult<Box<dyn SessionProcess>> {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);
        let name = session_name_for(&request.working_dir, sequence);
        let command_line = request.command_line();
        let dir = request.working_dir.to_string_lossy().into_owned();
        let width = PANE_WIDTH.to_string();
        let height = PANE_HEIGHT.to_string();

        let mut args: Vec<&str> = vec![
            "new-session",
            "-d",
            "-s",
            name.as_str(),
            "-c",
            dir.as_str(),
            "-x",
            width.as_str(),
            "-y",
            height.as_str(),
            "--",
            request.command.as_str(),
        ];
        args.extend(request.args.iter().map(String::as_str));

        run_tmux(&args)
            .await
            .map_err(|e| e.into_app_error(&command_line, &name))?;

        tokio::time::sleep(self.settle).await;
        if !has_session(&name).await {
            return Err(TmuxError::ExitedImmediately(name.clone()).into_app_error(&command_line, &name));
        }

        info!(session = %name, command = %command_line, dir = %dir, "Started tmux session");
        Ok(Box::new(TmuxProcess {
            name,
            command: command_line,
        }))
    }
}

// ============================================================================
// Process
// ============================================================================

/// An agent running in a tmux session.
#[derive(Debug, Clone)]
pub struct TmuxProcess {
    name: String,
    command: String,
}

impl TmuxProcess {
    fn app_error(&self, err: TmuxError) -> AppError {
        err.into_app_error(&self.command, &self.name)
    }
}

#[async_trait]
impl SessionProcess for TmuxProcess {
    fn process_id(&self) -> &str {
        &self.name
    }

    async fn capture(&self) -> AppResult<TerminalSnapshot> {
        let target = pane_target(&self.name);
        let text = run_tmux(&["capture-pane", "-p", "-t", &target])
            .await
            .map_err(|e| self.app_error(e))?;
        Ok(TerminalSnapshot::from_text(&text))
    }

    async fn write_input(&self, input: &str) -> AppResult<()> {
        let target = pane_target(&self.name);
        // `--` keeps input such as "- item" from being read as flags
        run_tmux(&["send-keys", "-t", &target, "-l", "--", input])
            .await
            .map_err(|e| self.app_error(e))?;
        run_tmux(&["send-keys", "-t", &target, "Enter"])
            .await
            .map_err(|e| self.app_error(e))?;
        debug!(session = %self.name, bytes = input.len(), "Sent input");
        Ok(())
    }

    async fn is_alive(&self) -> bool {
        has_session(&self.name).await
    }

    async fn terminate(&self) -> AppResult<()> {
        let target = exact_target(&self.name);
        match run_tmux(&["kill-session", "-t", &target]).await {
            Ok(_) => {
                info!(session = %self.name, "Killed tmux session");
                Ok(())
            }
            // Already gone
            Err(_) if !self.is_alive().await => Ok(()),
            Err(e) => Err(self.app_error(e)),
        }
    }
}
