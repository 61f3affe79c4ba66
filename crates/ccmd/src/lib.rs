//! ccmd - Session runtime for worktree agents
//!
//! This crate provides the runtime that drives agent sessions:
//! - `manager` - Per-project session manager actor
//! - `orchestrator` - One manager per project plus a default manager
//! - `autopilot` - Guidance evaluation and injection on state changes
//! - `analyzer` - External-command analysis client
//! - `git` / `projects` - Git collaborator commands and multi-project discovery
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   SessionOrchestrator                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                             │
//! │  ┌─────────────────┐     ┌─────────────────────────────┐    │
//! │  │ default manager │     │ project managers (by path)  │    │
//! │  └────────┬────────┘     └──────────────┬──────────────┘    │
//! │           │ SessionEvent                │                   │
//! │           ▼                             ▼                   │
//! │  ┌─────────────────┐     ┌─────────────────────────────┐    │
//! │  │    Autopilot    │────▶│ GuidancePipeline / analyzer │    │
//! │  └─────────────────┘     └─────────────────────────────┘    │
//! │                                                             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! All production code in this crate follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations return `Result` or `Option`
//! - Channel operations handle closure gracefully

pub mod analyzer;
pub mod autopilot;
pub mod git;
pub mod manager;
pub mod orchestrator;
pub mod projects;

pub use analyzer::CommandAnalysisClient;
pub use autopilot::{spawn_autopilot, Autopilot};
pub use manager::{
    spawn_session_manager, ManagerConfig, ManagerError, RemovalReason, SessionEvent,
    SessionManagerHandle, SessionOptions,
};
pub use orchestrator::SessionOrchestrator;
