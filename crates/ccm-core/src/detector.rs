//! Terminal state detection.
//!
//! Each agent CLI renders its own affordances ("esc to interrupt",
//! confirmation menus). A [`StateDetector`] maps the rendered terminal to a
//! [`SessionState`]. Detectors never fail: empty or unrecognised content
//! classifies as idle.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::{AgentKind, SessionState, Terminal};

/// Number of trailing lines that make up the status-bar region.
pub const STATUS_BAR_LINES: usize = 3;

/// Confirmation prompt: a question followed, after one or more newlines,
/// by a "yes" option or the cursor marker of a selection menu.
static CLAUDE_PROMPT: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"(?i)(?:do you want|would you like).+\n+[\s\S]*?(?:yes|❯)").ok());

/// Maps terminal content to a session state for one agent type.
pub trait StateDetector: Send + Sync {
    /// Classifies the terminal. `current` is the state before this pass.
    fn detect_state(&self, terminal: &dyn Terminal, current: SessionState) -> SessionState;

    /// Returns true if the status-bar region reports a background task.
    ///
    /// Independent of [`detect_state`](Self::detect_state).
    fn detect_background_task(&self, terminal: &dyn Terminal) -> bool {
        terminal
            .last_lines(STATUS_BAR_LINES)
            .iter()
            .map(|line| line.to_lowercase())
            .any(|line| line.contains("background task") || line.contains("(running)"))
    }
}

/// Returns the detector for an agent kind.
pub fn detector_for(kind: AgentKind) -> Box<dyn StateDetector> {
    match kind {
        AgentKind::Claude => Box::new(ClaudeDetector),
        AgentKind::Gemini => Box::new(GeminiDetector),
        AgentKind::Codex => Box::new(CodexDetector),
    }
}

// ============================================================================
// Claude
// ============================================================================

/// Detector for the Claude Code CLI.
///
/// Rules are order-sensitive:
/// 1. "ctrl+r to toggle" holds the current state (transient transcript hint)
/// 2. a confirmation question with options means waiting for input
/// 3. "esc to cancel" means waiting for input
/// 4. "esc to interrupt" / "ctrl+c to interrupt" means busy
/// 5. anything else is idle
#[derive(Debug, Clone, Copy, Default)]
pub struct ClaudeDetector;

impl StateDetector for ClaudeDetector {
    fn detect_state(&self, terminal: &dyn Terminal, current: SessionState) -> SessionState {
        let content = terminal.full_content();
        let lower = content.to_lowercase();

        if lower.contains("ctrl+r to toggle") {
            return current;
        }

        if CLAUDE_PROMPT
            .as_ref()
            .is_some_and(|re| re.is_match(&content))
        {
            return SessionState::WaitingInput;
        }

        if lower.contains("esc to cancel") {
            return SessionState::WaitingInput;
        }

        if lower.contains("esc to interrupt") || lower.contains("ctrl+c to interrupt") {
            return SessionState::Busy;
        }

        SessionState::Idle
    }
}

// ============================================================================
// Gemini
// ============================================================================

/// Detector for the Gemini CLI.
#[derive(Debug, Clone, Copy, Default)]
pub struct GeminiDetector;

impl StateDetector for GeminiDetector {
    fn detect_state(&self, terminal: &dyn Terminal, _current: SessionState) -> SessionState {
        let lower = terminal.full_content().to_lowercase();

        let confirmations = [
            "apply this change",
            "allow execution",
            "do you want to proceed",
            "waiting for user confirmation",
        ];
        if confirmations.iter().any(|marker| lower.contains(marker)) {
            return SessionState::WaitingInput;
        }

        if lower.contains("esc to cancel") {
            return SessionState::Busy;
        }

        SessionState::Idle
    }
}

// ============================================================================
// Codex
// ============================================================================

/// Detector for the Codex CLI.
#[derive(Debug, Clone, Copy, Default)]
pub struct CodexDetector;

impl StateDetector for CodexDetector {
    fn detect_state(&self, terminal: &dyn Terminal, _current: SessionState) -> SessionState {
        let lower = terminal.full_content().to_lowercase();

        if lower.contains("press enter to confirm or esc to cancel") || lower.contains("allow command?") {
            return SessionState::WaitingInput;
        }

        if lower.contains("esc to interrupt") {
            return SessionState::Busy;
        }

        SessionState::Idle
    }
}
