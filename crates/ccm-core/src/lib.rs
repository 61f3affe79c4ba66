//! ccm Core - Shared types for worktree agent sessions
//!
//! This crate provides the domain types and pure logic shared between the
//! runtime (ccmd) and the process collaborators (ccm-tmux):
//! - terminal state detection per agent type
//! - the guidance pipeline and its concurrency limiter
//! - the process collaborator traits
//! - configuration and the application error taxonomy
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod agent;
pub mod config;
pub mod detector;
pub mod error;
pub mod guidance;
pub mod limiter;
pub mod process;
pub mod session;
pub mod terminal;

// Re-exports for convenience
pub use agent::AgentKind;
pub use config::{AutopilotConfig, CommandPreset, Config, PresetConfig, MULTI_PROJECT_ROOT_ENV};
pub use detector::{detector_for, ClaudeDetector, CodexDetector, GeminiDetector, StateDetector};
pub use error::{AppError, AppResult, ConfigErrorReason, ErrorKind, FileSystemOperation};
pub use guidance::{
    AnalysisClient, AnalysisContext, AnalysisDecision, AnalysisError, BaseGuidanceSource,
    GuidancePipeline, GuidanceResult, GuidanceSource, PipelineOutcome, SelectionPolicy,
};
pub use limiter::{ConcurrencyLimiter, Limited};
pub use process::{ProcessSpawner, SessionProcess, SpawnRequest};
pub use session::{SessionId, SessionState, SessionView};
pub use terminal::{Terminal, TerminalSnapshot};
