//! Session manager actor - owns one project's sessions and processes commands.
//!
//! # Panic-Free Guarantees
//!
//! This module follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations use `?`, pattern matching, or `unwrap_or`
//! - Channel send failures are logged but don't panic

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use ccm_core::{
    detector_for, AgentKind, AppError, AppResult, ProcessSpawner, SessionId, SessionProcess,
    SessionState, SessionView, SpawnRequest, StateDetector, TerminalSnapshot,
};

use super::commands::{ManagerCommand, RemovalReason, SessionEvent, SessionOptions};

// ============================================================================
// Session
// ============================================================================

/// A tracked session. Only the actor touches it.
struct Session {
    process: Box<dyn SessionProcess>,
    detector: Box<dyn StateDetector>,
    state: SessionState,
    state_checked_at: DateTime<Utc>,
    /// Last captured screen, shared read-only with callers
    terminal: Arc<TerminalSnapshot>,
    background_task: bool,
    created_at: DateTime<Utc>,
    agent: AgentKind,
    preset_id: Option<String>,
    /// Creation order
    seq: u64,
}

impl Session {
    fn view(&self, id: &SessionId) -> SessionView {
        SessionView {
            id: id.clone(),
            process_id: self.process.process_id().to_string(),
            state: self.state,
            state_checked_at: self.state_checked_at,
            created_at: self.created_at,
            background_task: self.background_task,
            agent: self.agent,
            preset_id: self.preset_id.clone(),
        }
    }
}

// ============================================================================
// Manager Actor
// ============================================================================

/// The session manager actor.
///
/// Receives commands via mpsc, processes them one at a time and
/// publishes state changes to subscribers. All session mutations happen
/// inside this single task.
pub struct SessionManagerActor {
    receiver: mpsc::Receiver<ManagerCommand>,
    spawner: Arc<dyn ProcessSpawner>,
    sessions: HashMap<SessionId, Session>,
    next_seq: u64,
    event_publisher: broadcast::Sender<SessionEvent>,
}

impl SessionManagerActor {
    pub fn new(
        receiver: mpsc::Receiver<ManagerCommand>,
        spawner: Arc<dyn ProcessSpawner>,
        event_publisher: broadcast::Sender<SessionEvent>,
    ) -> Self {
        Self {
            receiver,
            spawner,
            sessions: HashMap::new(),
            next_seq: 0,
            event_publisher,
        }
    }

    /// Runs the actor event loop until every sender is dropped.
    ///
    /// Sessions still tracked at that point are terminated.
    pub async fn run(mut self) {
        debug!("Session manager actor starting");

        while let Some(cmd) = self.receiver.recv().await {
            self.handle_command(cmd).await;
        }

        if !self.sessions.is_empty() {
            self.handle_destroy_all().await;
        }
        debug!("Session manager actor stopped");
    }

    /// Dispatches a command to the appropriate handler.
    async fn handle_command(&mut self, cmd: ManagerCommand) {
        match cmd {
            ManagerCommand::Create {
                path,
                options,
                respond_to,
            } => {
                let result = self.handle_create(path, *options).await;
                // Ignore send error - caller may have dropped the receiver
                let _ = respond_to.send(result);
            }
            ManagerCommand::GetSession {
                session_id,
                respond_to,
            } => {
                let view = self.sessions.get(&session_id).map(|s| s.view(&session_id));
                let _ = respond_to.send(view);
            }
            ManagerCommand::GetAllSessions { respond_to } => {
                let _ = respond_to.send(self.views_in_order());
            }
            ManagerCommand::GetTerminal {
                session_id,
                respond_to,
            } => {
                let terminal = self.sessions.get(&session_id).map(|s| Arc::clone(&s.terminal));
                let _ = respond_to.send(terminal);
            }
            ManagerCommand::SendInput {
                session_id,
                input,
                respond_to,
            } => {
                let result = self.handle_send_input(&session_id, &input).await;
                let _ = respond_to.send(result);
            }
            ManagerCommand::Refresh {
                session_id,
                respond_to,
            } => {
                self.detect(&session_id).await;
                let view = self.sessions.get(&session_id).map(|s| s.view(&session_id));
                let _ = respond_to.send(view);
            }
            ManagerCommand::Destroy {
                session_id,
                respond_to,
            } => {
                self.handle_destroy(&session_id, RemovalReason::Explicit).await;
                let _ = respond_to.send(());
            }
            ManagerCommand::DestroyAll { respond_to } => {
                self.handle_destroy_all().await;
                let _ = respond_to.send(());
            }
            ManagerCommand::Count { respond_to } => {
                let _ = respond_to.send(self.sessions.len());
            }
            ManagerCommand::Poll => {
                self.handle_poll().await;
            }
        }
    }

    // ========================================================================
    // Command Handlers
    // ========================================================================

    async fn handle_create(&mut self, path: PathBuf, options: SessionOptions) -> AppResult<SessionView> {
        let session_id = SessionId::new(path);
        if let Some(existing) = self.sessions.get(&session_id) {
            debug!(session = %session_id, "Session already tracked, reusing");
            return Ok(existing.view(&session_id));
        }

        let process = self.spawn_with_fallback(&session_id, &options).await?;
        let preset = options.preset;
        let agent = preset.detection_strategy;
        let now = Utc::now();
        let session = Session {
            process,
            detector: detector_for(agent),
            state: SessionState::Idle,
            state_checked_at: now,
            terminal: Arc::new(TerminalSnapshot::default()),
            background_task: false,
            created_at: now,
            agent,
            preset_id: Some(preset.id),
            seq: self.next_seq,
        };
        self.next_seq += 1;

        let view = session.view(&session_id);
        self.sessions.insert(session_id.clone(), session);

        info!(
            session = %session_id,
            process = %view.process_id,
            agent = %agent,
            total_sessions = self.sessions.len(),
            "Session created"
        );

        let _ = self.event_publisher.send(SessionEvent::Created {
            session: Box::new(view.clone()),
        });

        Ok(view)
    }

    /// Spawns with the preset's args, retrying once with `fallback_args`.
    async fn spawn_with_fallback(
        &self,
        session_id: &SessionId,
        options: &SessionOptions,
    ) -> AppResult<Box<dyn SessionProcess>> {
        let preset = &options.preset;
        let request = SpawnRequest::new(session_id.as_path(), preset.command.as_str(), preset.args.clone());

        match self.spawner.spawn(&request).await {
            Ok(process) => Ok(process),
            Err(primary) => {
                let Some(fallback_args) = &preset.fallback_args else {
                    warn!(session = %session_id, error = %primary, "Failed to spawn session");
                    return Err(primary);
                };
                warn!(
                    session = %session_id,
                    error = %primary,
                    "Spawn failed, retrying with fallback args"
                );
                let retry = SpawnRequest::new(
                    session_id.as_path(),
                    preset.command.as_str(),
                    fallback_args.clone(),
                );
                self.spawner.spawn(&retry).await.map_err(|e| {
                    warn!(session = %session_id, error = %e, "Fallback spawn failed");
                    e
                })
            }
        }
    }

    async fn handle_send_input(&mut self, session_id: &SessionId, input: &str) -> AppResult<()> {
        let Some(session) = self.sessions.get(session_id) else {
            return Err(AppError::process(
                session_id.to_string(),
                "session is not tracked by this manager",
            ));
        };
        session.process.write_input(input).await
    }

    async fn handle_destroy(&mut self, session_id: &SessionId, reason: RemovalReason) {
        let Some(session) = self.sessions.remove(session_id) else {
            debug!(session = %session_id, "Destroy of unknown session ignored");
            return;
        };

        if reason != RemovalReason::ProcessExited {
            if let Err(e) = session.process.terminate().await {
                warn!(session = %session_id, error = %e, "Failed to terminate process");
            }
        }

        info!(
            session = %session_id,
            reason = %reason,
            remaining = self.sessions.len(),
            "Session destroyed"
        );

        let _ = self.event_publisher.send(SessionEvent::Destroyed {
            session_id: session_id.clone(),
            reason,
        });
    }

    async fn handle_destroy_all(&mut self) {
        for session_id in self.ids_in_order() {
            self.handle_destroy(&session_id, RemovalReason::ManagerDestroyed).await;
        }
    }

    async fn handle_poll(&mut self) {
        let ids = self.ids_in_order();
        if !ids.is_empty() {
            debug!(sessions = ids.len(), "Polling sessions");
        }
        for session_id in ids {
            self.detect(&session_id).await;
        }
    }

    // ========================================================================
    // Detection
    // ========================================================================

    /// Captures a session's screen and re-runs its detector.
    ///
    /// A failed capture of a dead process removes the session.
    async fn detect(&mut self, session_id: &SessionId) {
        let Some(session) = self.sessions.get(session_id) else {
            return;
        };

        let captured = session.process.capture().await;
        match captured {
            Ok(snapshot) => self.apply_snapshot(session_id, snapshot),
            Err(e) => {
                if session.process.is_alive().await {
                    debug!(session = %session_id, error = %e, "Capture failed, will retry");
                } else {
                    self.handle_destroy(session_id, RemovalReason::ProcessExited).await;
                }
            }
        }
    }

    fn apply_snapshot(&mut self, session_id: &SessionId, snapshot: TerminalSnapshot) {
        let Some(session) = self.sessions.get_mut(session_id) else {
            return;
        };

        let previous = session.state;
        let state = session.detector.detect_state(&snapshot, previous);
        let background_task = session.detector.detect_background_task(&snapshot);
        session.terminal = Arc::new(snapshot);
        session.state_checked_at = Utc::now();

        if state != previous {
            session.state = state;
            info!(session = %session_id, previous = %previous, state = %state, "Session state changed");
            let _ = self.event_publisher.send(SessionEvent::StateChanged {
                session_id: session_id.clone(),
                previous,
                state,
            });
        }

        if background_task != session.background_task {
            session.background_task = background_task;
            debug!(session = %session_id, active = background_task, "Background task flag changed");
            let _ = self.event_publisher.send(SessionEvent::BackgroundTaskChanged {
                session_id: session_id.clone(),
                active: background_task,
            });
        }
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn ids_in_order(&self) -> Vec<SessionId> {
        let mut entries: Vec<(&SessionId, u64)> =
            self.sessions.iter().map(|(id, s)| (id, s.seq)).collect();
        entries.sort_by_key(|(_, seq)| *seq);
        entries.into_iter().map(|(id, _)| id.clone()).collect()
    }

    fn views_in_order(&self) -> Vec<SessionView> {
        let mut sessions: Vec<(&SessionId, &Session)> = self.sessions.iter().collect();
        sessions.sort_by_key(|(_, s)| s.seq);
        sessions.into_iter().map(|(id, s)| s.view(id)).collect()
    }

    /// Returns the number of tracked sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}
