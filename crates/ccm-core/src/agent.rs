//! Agent type identification.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of terminal agent running inside a session.
///
/// Selects which state detector interprets the session's terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    /// Claude Code CLI
    #[default]
    Claude,

    /// Gemini CLI
    Gemini,

    /// Codex CLI
    Codex,
}

impl AgentKind {
    /// Returns a short identifier for display and configuration.
    pub fn short_name(&self) -> &'static str {
        match self {
            Self::Claude => "claude",
            Self::Gemini => "gemini",
            Self::Codex => "codex",
        }
    }

    /// Parses a detection strategy name, falling back to Claude.
    pub fn from_strategy(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "gemini" => Self::Gemini,
            "codex" => Self::Codex,
            _ => Self::Claude,
        }
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short_name())
    }
}
