//! Read-only view over a session's rendered terminal.
//!
//! The process collaborator renders escape sequences; everything here
//! deals in plain text lines only.

/// Windowed, read-only view over a scrollback buffer.
pub trait Terminal {
    /// Number of rendered lines available.
    fn total_line_count(&self) -> usize;

    /// Returns the rendered line at `index`, or `None` past the end.
    fn line(&self, index: usize) -> Option<&str>;

    /// Returns the last `n` rendered lines, oldest first.
    fn last_lines(&self, n: usize) -> Vec<&str> {
        let total = self.total_line_count();
        let start = total.saturating_sub(n);
        (start..total).filter_map(|i| self.line(i)).collect()
    }

    /// Returns every rendered line joined with `\n`.
    fn full_content(&self) -> String {
        let total = self.total_line_count();
        (0..total)
            .filter_map(|i| self.line(i))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// A captured terminal frame.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TerminalSnapshot {
    lines: Vec<String>,
}

impl TerminalSnapshot {
    /// Builds a snapshot from rendered text.
    ///
    /// Trailing whitespace is stripped from each line and trailing blank
    /// lines (pane padding) are dropped, so the last lines are the status
    /// region of the agent's UI.
    pub fn from_text(text: &str) -> Self {
        let mut lines: Vec<String> = text.lines().map(|l| l.trim_end().to_string()).collect();
        while lines.last().is_some_and(|l| l.is_empty()) {
            lines.pop();
        }
        Self { lines }
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

impl Terminal for TerminalSnapshot {
    fn total_line_count(&self) -> usize {
        self.lines.len()
    }

    fn line(&self, index: usize) -> Option<&str> {
        self.lines.get(index).map(String::as_str)
    }
}
