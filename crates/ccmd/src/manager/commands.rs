//! Session manager commands, errors, and events.
//!
//! This module defines the message types for communicating with the
//! `SessionManagerActor`:
//! - `ManagerCommand`: Commands sent to the actor
//! - `ManagerError`: Errors that can occur during manager operations
//! - `SessionEvent`: Events published by the manager for subscribers
//!
//! All types are designed for async message passing and follow the panic-free policy.

use std::path::PathBuf;
use std::sync::Arc;

use ccm_core::{AppError, CommandPreset, SessionId, SessionState, SessionView, TerminalSnapshot};
use thiserror::Error;
use tokio::sync::oneshot;

// ============================================================================
// Session Options
// ============================================================================

/// How to launch a session's agent process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    pub preset: CommandPreset,
}

/// Preset id recorded for sessions started from an ad-hoc command.
pub const CUSTOM_PRESET_ID: &str = "custom";

impl SessionOptions {
    pub fn from_preset(preset: CommandPreset) -> Self {
        Self { preset }
    }

    /// Launches `command` with `args` and the default detector.
    pub fn command(command: impl Into<String>, args: Vec<String>) -> Self {
        let command = command.into();
        let mut preset = CommandPreset::new(CUSTOM_PRESET_ID, command.clone(), command);
        preset.args = args;
        Self { preset }
    }
}

// ============================================================================
// Manager Commands
// ============================================================================

/// Commands sent to the session manager actor.
///
/// Each command uses a oneshot channel for the response, enabling
/// request-response patterns in async code without blocking.
#[derive(Debug)]
pub enum ManagerCommand {
    /// Spawn a process for a worktree and start tracking it.
    ///
    /// Returns the existing view if the path is already tracked.
    ///
    /// # Errors
    /// - `AppError::Process` if spawning fails (with and without fallback args)
    Create {
        path: PathBuf,
        options: Box<SessionOptions>,
        respond_to: oneshot::Sender<Result<SessionView, AppError>>,
    },

    /// Get a single session by ID.
    GetSession {
        session_id: SessionId,
        respond_to: oneshot::Sender<Option<SessionView>>,
    },

    /// Get all sessions in creation order.
    GetAllSessions {
        respond_to: oneshot::Sender<Vec<SessionView>>,
    },

    /// Get the last captured terminal of a session.
    GetTerminal {
        session_id: SessionId,
        respond_to: oneshot::Sender<Option<Arc<TerminalSnapshot>>>,
    },

    /// Write a line of input to a session's process.
    ///
    /// # Errors
    /// - `AppError::Process` if the session is unknown or the write fails
    SendInput {
        session_id: SessionId,
        input: String,
        respond_to: oneshot::Sender<Result<(), AppError>>,
    },

    /// Run a detection pass for one session right away.
    Refresh {
        session_id: SessionId,
        respond_to: oneshot::Sender<Option<SessionView>>,
    },

    /// Terminate and forget one session. Unknown ids are a no-op.
    Destroy {
        session_id: SessionId,
        respond_to: oneshot::Sender<()>,
    },

    /// Terminate and forget every session.
    DestroyAll { respond_to: oneshot::Sender<()> },

    /// Number of tracked sessions.
    Count { respond_to: oneshot::Sender<usize> },

    /// Periodic detection pass over every session.
    ///
    /// Fire-and-forget, sent by the poll task.
    Poll,
}

// ============================================================================
// Manager Errors
// ============================================================================

/// Errors that can occur during manager operations.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ManagerError {
    /// The actor stopped before answering.
    #[error("session manager channel closed")]
    ChannelClosed,

    #[error(transparent)]
    App(#[from] AppError),
}

impl ManagerError {
    /// Returns the application error, if this is one.
    pub fn as_app_error(&self) -> Option<&AppError> {
        match self {
            Self::App(e) => Some(e),
            Self::ChannelClosed => None,
        }
    }
}

// ============================================================================
// Session Events
// ============================================================================

/// Events published by a session manager to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// A session was spawned and is now tracked.
    Created {
        /// Boxed for size optimization
        session: Box<SessionView>,
    },

    /// The detector classified a session differently than before.
    StateChanged {
        session_id: SessionId,
        previous: SessionState,
        state: SessionState,
    },

    /// The background-task flag flipped.
    BackgroundTaskChanged { session_id: SessionId, active: bool },

    /// A session was terminated and forgotten.
    Destroyed {
        session_id: SessionId,
        reason: RemovalReason,
    },
}

impl SessionEvent {
    /// The session this event is about.
    pub fn session_id(&self) -> &SessionId {
        match self {
            Self::Created { session } => &session.id,
            Self::StateChanged { session_id, .. }
            | Self::BackgroundTaskChanged { session_id, .. }
            | Self::Destroyed { session_id, .. } => session_id,
        }
    }
}

/// Reason why a session was removed from its manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalReason {
    /// Caller destroyed this session.
    Explicit,

    /// The agent process exited on its own.
    ProcessExited,

    /// The whole manager was torn down.
    ManagerDestroyed,
}

impl std::fmt::Display for RemovalReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Explicit => write!(f, "explicitly destroyed"),
            Self::ProcessExited => write!(f, "process exited"),
            Self::ManagerDestroyed => write!(f, "manager destroyed"),
        }
    }
}
