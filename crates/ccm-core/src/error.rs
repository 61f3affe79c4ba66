//! Application error taxonomy following panic-free policy.
//!
//! Every failure that crosses a core boundary is one of five tagged
//! variants. Callers branch on [`AppError::kind`] (or match the variant)
//! rather than inspecting message text.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Filesystem operation that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileSystemOperation {
    Read,
    Write,
    Delete,
    Mkdir,
    Stat,
}

impl fmt::Display for FileSystemOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Delete => "delete",
            Self::Mkdir => "mkdir",
            Self::Stat => "stat",
        };
        f.write_str(name)
    }
}

/// Why a configuration source was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigErrorReason {
    Parse,
    Validation,
    Missing,
    Migration,
}

impl fmt::Display for ConfigErrorReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Parse => "parse",
            Self::Validation => "validation",
            Self::Missing => "missing",
            Self::Migration => "migration",
        };
        f.write_str(name)
    }
}

/// Discriminant of an [`AppError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Git,
    FileSystem,
    Config,
    Process,
    Validation,
}

/// Errors surfaced by core operations.
///
/// Values are immutable once built; construct them with the helper
/// constructors below so optional fields stay consistent.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AppError {
    /// A git command exited non-zero or could not be run.
    #[error("git command failed: {command} (exit code {exit_code}): {stderr}")]
    Git {
        command: String,
        exit_code: i32,
        stderr: String,
        stdout: Option<String>,
    },

    /// A filesystem operation failed.
    #[error("failed to {operation} {}: {cause}", path.display())]
    FileSystem {
        operation: FileSystemOperation,
        path: PathBuf,
        cause: String,
    },

    /// A configuration source is missing or invalid.
    #[error("config error ({reason}) in {config_path}: {details}")]
    Config {
        config_path: String,
        reason: ConfigErrorReason,
        details: String,
    },

    /// Spawning, signalling or writing to a session process failed.
    #[error("process error running {command}: {message}")]
    Process {
        process_id: Option<String>,
        command: String,
        signal: Option<String>,
        exit_code: Option<i32>,
        message: String,
    },

    /// A value violated a constraint.
    #[error("invalid {field}: {received_value} ({constraint})")]
    Validation {
        field: String,
        constraint: String,
        received_value: String,
    },
}

impl AppError {
    /// Returns the tag of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Git { .. } => ErrorKind::Git,
            Self::FileSystem { .. } => ErrorKind::FileSystem,
            Self::Config { .. } => ErrorKind::Config,
            Self::Process { .. } => ErrorKind::Process,
            Self::Validation { .. } => ErrorKind::Validation,
        }
    }

    pub fn git(
        command: impl Into<String>,
        exit_code: i32,
        stderr: impl Into<String>,
        stdout: Option<String>,
    ) -> Self {
        Self::Git {
            command: command.into(),
            exit_code,
            stderr: stderr.into(),
            stdout,
        }
    }

    pub fn file_system(
        operation: FileSystemOperation,
        path: impl Into<PathBuf>,
        cause: impl fmt::Display,
    ) -> Self {
        Self::FileSystem {
            operation,
            path: path.into(),
            cause: cause.to_string(),
        }
    }

    pub fn config(
        config_path: impl Into<String>,
        reason: ConfigErrorReason,
        details: impl Into<String>,
    ) -> Self {
        Self::Config {
            config_path: config_path.into(),
            reason,
            details: details.into(),
        }
    }

    /// Creates a process error carrying only a command and message.
    pub fn process(command: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Process {
            process_id: None,
            command: command.into(),
            signal: None,
            exit_code: None,
            message: message.into(),
        }
    }

    /// Attaches a process identifier to a process error.
    ///
    /// Other variants are returned unchanged.
    #[must_use]
    pub fn with_process_id(self, id: impl Into<String>) -> Self {
        match self {
            Self::Process {
                command,
                signal,
                exit_code,
                message,
                ..
            } => Self::Process {
                process_id: Some(id.into()),
                command,
                signal,
                exit_code,
                message,
            },
            other => other,
        }
    }

    pub fn validation(
        field: impl Into<String>,
        constraint: impl Into<String>,
        received_value: impl fmt::Display,
    ) -> Self {
        Self::Validation {
            field: field.into(),
            constraint: constraint.into(),
            received_value: received_value.to_string(),
        }
    }
}

/// Result type for core operations.
pub type AppResult<T> = Result<T, AppError>;
