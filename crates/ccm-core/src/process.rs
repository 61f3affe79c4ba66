//! Process collaborator interfaces.
//!
//! A session's agent runs in its own pseudo-terminal owned by a
//! collaborator (tmux in production, an in-memory fake in tests). The
//! manager only sees these traits.

use std::fmt;
use std::path::PathBuf;

use async_trait::async_trait;

use crate::{AppResult, TerminalSnapshot};

/// What to launch, and where.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnRequest {
    pub working_dir: PathBuf,
    pub command: String,
    pub args: Vec<String>,
}

impl SpawnRequest {
    pub fn new(working_dir: impl Into<PathBuf>, command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            working_dir: working_dir.into(),
            command: command.into(),
            args,
        }
    }

    /// Returns the command line for logs and error messages.
    pub fn command_line(&self) -> String {
        if self.args.is_empty() {
            self.command.clone()
        } else {
            format!("{} {}", self.command, self.args.join(" "))
        }
    }
}

impl fmt::Display for SpawnRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (in {})", self.command_line(), self.working_dir.display())
    }
}

/// Launches agent processes.
#[async_trait]
pub trait ProcessSpawner: Send + Sync {
    /// Starts a process for `request`.
    ///
    /// # Errors
    ///
    /// `AppError::Process` if the process could not be started.
    async fn spawn(&self, request: &SpawnRequest) -> AppResult<Box<dyn SessionProcess>>;
}

/// A running agent process and its rendered terminal.
#[async_trait]
pub trait SessionProcess: Send + Sync {
    /// Collaborator-specific identifier (tmux session name, pid, ...).
    fn process_id(&self) -> &str;

    /// Captures the currently rendered terminal.
    async fn capture(&self) -> AppResult<TerminalSnapshot>;

    /// Types `input` followed by Enter.
    async fn write_input(&self, input: &str) -> AppResult<()>;

    async fn is_alive(&self) -> bool;

    /// Terminates the process and releases its terminal.
    async fn terminate(&self) -> AppResult<()>;
}
