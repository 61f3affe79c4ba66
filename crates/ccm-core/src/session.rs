//! Session identity, state and read-only views.

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::AgentKind;

// ============================================================================
// Type-Safe Identifiers
// ============================================================================

/// Identity of a session: the worktree path it runs in.
///
/// One session per worktree path per manager.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(PathBuf);

impl SessionId {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self(path.into())
    }

    pub fn as_path(&self) -> &Path {
        &self.0
    }

    /// Returns the last path component, or the whole path if there is none.
    ///
    /// Useful for compact display and for deriving process names.
    #[must_use]
    pub fn short(&self) -> String {
        self.0
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.0.display().to_string())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

impl From<PathBuf> for SessionId {
    fn from(p: PathBuf) -> Self {
        Self(p)
    }
}

impl From<&Path> for SessionId {
    fn from(p: &Path) -> Self {
        Self(p.to_path_buf())
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(PathBuf::from(s))
    }
}

impl AsRef<Path> for SessionId {
    fn as_ref(&self) -> &Path {
        &self.0
    }
}

// ============================================================================
// Session State (3-State Model)
// ============================================================================

/// Conversational state of a session, as inferred from its terminal.
///
/// - **Idle**: the agent finished and is waiting for the next prompt
/// - **Busy**: the agent is working; the user just waits
/// - **WaitingInput**: the agent is blocked on a confirmation or choice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    #[default]
    Idle,
    Busy,
    WaitingInput,
}

impl SessionState {
    /// Returns the wire/display label for this state.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Busy => "busy",
            Self::WaitingInput => "waiting_input",
        }
    }

    /// Returns true if the user must act for the session to proceed.
    #[must_use]
    pub fn needs_attention(&self) -> bool {
        matches!(self, Self::WaitingInput)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// ============================================================================
// Session View
// ============================================================================

/// Read-only snapshot of a tracked session.
///
/// Views are owned copies; mutating one never affects manager state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionView {
    pub id: SessionId,
    /// Identifier of the underlying process (e.g. tmux session name)
    pub process_id: String,
    pub state: SessionState,
    /// When the detector last classified this session
    pub state_checked_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    /// Whether the agent reports a running background task
    pub background_task: bool,
    pub agent: AgentKind,
    /// Preset the session was started from, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preset_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_id_short() {
        let id = SessionId::new("/home/user/repo/.worktrees/feature-x");
        assert_eq!(id.short(), "feature-x");
        assert_eq!(id.to_string(), "/home/user/repo/.worktrees/feature-x");

        let root = SessionId::new("/");
        assert_eq!(root.short(), "/");
    }

    #[test]
    fn test_session_state_labels() {
        assert_eq!(SessionState::default(), SessionState::Idle);
        assert_eq!(SessionState::Busy.to_string(), "busy");
        assert_eq!(SessionState::WaitingInput.label(), "waiting_input");
        assert!(SessionState::WaitingInput.needs_attention());
        assert!(!SessionState::Busy.needs_attention());
    }

    #[test]
    fn test_session_state_serde() {
        let json = serde_json::to_string(&SessionState::WaitingInput).unwrap();
        assert_eq!(json, "\"waiting_input\"");
    }
}
