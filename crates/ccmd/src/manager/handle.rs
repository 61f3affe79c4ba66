//! Client interface for interacting with the SessionManagerActor.
//!
//! The `SessionManagerHandle` is a cheap-to-clone interface for sending
//! commands to one project's manager and subscribing to its events.
//!
//! # Panic-Free Guarantees
//!
//! This module follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations use `?`, pattern matching, or `unwrap_or`
//! - Channel errors are mapped to `ManagerError::ChannelClosed`

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use ccm_core::{SessionId, SessionView, Terminal, TerminalSnapshot};

use super::commands::{ManagerCommand, ManagerError, SessionEvent, SessionOptions};

// ============================================================================
// Manager Handle
// ============================================================================

/// Handle for interacting with a session manager actor.
///
/// Clones talk to the same actor. Reads return owned copies, so nothing a
/// caller does to a returned value affects manager state.
///
/// # Usage
///
/// ```ignore
/// let view = manager.create_session("/repo/.worktrees/feat", options).await?;
///
/// let mut events = manager.subscribe();
/// while let Ok(event) = events.recv().await {
///     // Handle event
/// }
/// ```
#[derive(Clone)]
pub struct SessionManagerHandle {
    sender: mpsc::Sender<ManagerCommand>,
    event_sender: broadcast::Sender<SessionEvent>,
    /// Stops the poll task
    cancel: CancellationToken,
}

impl SessionManagerHandle {
    pub fn new(
        sender: mpsc::Sender<ManagerCommand>,
        event_sender: broadcast::Sender<SessionEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            sender,
            event_sender,
            cancel,
        }
    }

    /// Sends a command and waits for the actor's answer.
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> ManagerCommand,
    ) -> Result<T, ManagerError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(build(tx))
            .await
            .map_err(|_| ManagerError::ChannelClosed)?;
        rx.await.map_err(|_| ManagerError::ChannelClosed)
    }

    /// Spawn a session for the worktree at `path`.
    ///
    /// If `path` is already tracked, returns the existing session.
    ///
    /// # Errors
    ///
    /// - `ManagerError::App(AppError::Process)` if the process could not be spawned
    /// - `ManagerError::ChannelClosed` if the actor has shut down
    pub async fn create_session(
        &self,
        path: impl Into<PathBuf>,
        options: SessionOptions,
    ) -> Result<SessionView, ManagerError> {
        let path = path.into();
        let result = self
            .request(|respond_to| ManagerCommand::Create {
                path,
                options: Box::new(options),
                respond_to,
            })
            .await?;
        Ok(result?)
    }

    /// Get a single session by ID.
    ///
    /// Returns `None` if the session doesn't exist or the actor is gone.
    pub async fn get_session(&self, session_id: &SessionId) -> Option<SessionView> {
        let session_id = session_id.clone();
        self.request(|respond_to| ManagerCommand::GetSession {
            session_id,
            respond_to,
        })
        .await
        .ok()
        .flatten()
    }

    /// All sessions keyed by path.
    pub async fn get_sessions(&self) -> HashMap<SessionId, SessionView> {
        self.get_all_sessions()
            .await
            .into_iter()
            .map(|view| (view.id.clone(), view))
            .collect()
    }

    /// All sessions in creation order.
    ///
    /// Returns an empty vector if the actor is gone.
    pub async fn get_all_sessions(&self) -> Vec<SessionView> {
        self.request(|respond_to| ManagerCommand::GetAllSessions { respond_to })
            .await
            .unwrap_or_default()
    }

    /// The last captured screen of a session.
    pub async fn terminal(&self, session_id: &SessionId) -> Option<Arc<TerminalSnapshot>> {
        let session_id = session_id.clone();
        self.request(|respond_to| ManagerCommand::GetTerminal {
            session_id,
            respond_to,
        })
        .await
        .ok()
        .flatten()
    }

    /// Full text of the last captured screen.
    pub async fn terminal_content(&self, session_id: &SessionId) -> Option<String> {
        self.terminal(session_id).await.map(|t| t.full_content())
    }

    /// Type `input` into a session, followed by Enter.
    ///
    /// # Errors
    ///
    /// - `ManagerError::App(AppError::Process)` if the session is unknown or the write failed
    /// - `ManagerError::ChannelClosed` if the actor has shut down
    pub async fn send_input(&self, session_id: &SessionId, input: impl Into<String>) -> Result<(), ManagerError> {
        let session_id = session_id.clone();
        let input = input.into();
        let result = self
            .request(|respond_to| ManagerCommand::SendInput {
                session_id,
                input,
                respond_to,
            })
            .await?;
        Ok(result?)
    }

    /// Re-detect one session's state now instead of waiting for the next poll.
    pub async fn refresh(&self, session_id: &SessionId) -> Option<SessionView> {
        let session_id = session_id.clone();
        self.request(|respond_to| ManagerCommand::Refresh {
            session_id,
            respond_to,
        })
        .await
        .ok()
        .flatten()
    }

    /// Terminate one session. Unknown sessions are a no-op.
    ///
    /// # Errors
    ///
    /// - `ManagerError::ChannelClosed` if the actor has shut down
    pub async fn destroy_session(&self, session_id: &SessionId) -> Result<(), ManagerError> {
        let session_id = session_id.clone();
        self.request(|respond_to| ManagerCommand::Destroy {
            session_id,
            respond_to,
        })
        .await
    }

    /// Terminate every session. The manager stays usable.
    ///
    /// # Errors
    ///
    /// - `ManagerError::ChannelClosed` if the actor has shut down
    pub async fn destroy(&self) -> Result<(), ManagerError> {
        self.request(|respond_to| ManagerCommand::DestroyAll { respond_to })
            .await
    }

    /// Number of tracked sessions, or 0 if the actor is gone.
    pub async fn session_count(&self) -> usize {
        self.request(|respond_to| ManagerCommand::Count { respond_to })
            .await
            .unwrap_or(0)
    }

    /// Subscribe to session events.
    ///
    /// Dropping the receiver unsubscribes. This does not talk to the actor.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.event_sender.subscribe()
    }

    /// Returns true if both handles drive the same actor.
    pub fn same_manager(&self, other: &SessionManagerHandle) -> bool {
        self.sender.same_channel(&other.sender)
    }

    /// Stop polling. Sessions are left alone; call [`destroy`](Self::destroy) first.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Returns true until the manager has been shut down.
    pub fn is_running(&self) -> bool {
        !self.cancel.is_cancelled() && !self.sender.is_closed()
    }
}

impl std::fmt::Debug for SessionManagerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManagerHandle")
            .field("running", &self.is_running())
            .finish()
    }
}
