//! Per-project session manager using the Actor pattern.
//!
//! A manager owns every session of one project. It receives commands via a
//! tokio mpsc channel, polls each session's terminal on a fixed interval and
//! publishes detector-derived state changes on a broadcast channel.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌──────────────────────┐     ┌──────────────────┐
//! │ Handle / Poller │────▶│ SessionManagerActor  │────▶│ Broadcast Channel│
//! └─────────────────┘     └──────────────────────┘     └──────────────────┘
//!         │                        │                           │
//!         │   ManagerCommand       │   SessionEvent            │
//!         │   (mpsc channel)       │   (broadcast)             │
//!         ▼                        ▼                           ▼
//!   Create/Destroy/          HashMap<SessionId,          Autopilot, CLI
//!   SendInput/Poll           Session>                    subscribers
//! ```
//!
//! # Panic-Free Guarantees
//!
//! All operations in this module follow the panic-free policy:
//! - No `.unwrap()` or `.expect()` in production code
//! - All fallible operations return `Result` or `Option`
//! - Channel operations handle closure gracefully

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tokio::time::{interval, Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use ccm_core::ProcessSpawner;

mod actor;
mod commands;
mod handle;

pub use actor::SessionManagerActor;
pub use commands::{
    ManagerCommand, ManagerError, RemovalReason, SessionEvent, SessionOptions, CUSTOM_PRESET_ID,
};
pub use handle::SessionManagerHandle;

/// Channel buffer sizes
const COMMAND_BUFFER: usize = 100;
const EVENT_BUFFER: usize = 256;

/// Default time between detection passes.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Manager tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManagerConfig {
    pub poll_interval: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

/// Spawn a session manager actor and return a handle for interaction.
///
/// This function:
/// 1. Creates command and event channels
/// 2. Spawns the SessionManagerActor on a tokio task
/// 3. Spawns the poll task
/// 4. Returns a SessionManagerHandle for client use
///
/// Must be called from within a tokio runtime.
pub fn spawn_session_manager(spawner: Arc<dyn ProcessSpawner>, config: ManagerConfig) -> SessionManagerHandle {
    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
    let (event_tx, _) = broadcast::channel(EVENT_BUFFER);
    let cancel = CancellationToken::new();

    let actor = SessionManagerActor::new(cmd_rx, spawner, event_tx.clone());
    tokio::spawn(actor.run());

    spawn_poll_task(cmd_tx.downgrade(), config.poll_interval, cancel.clone());

    SessionManagerHandle::new(cmd_tx, event_tx, cancel)
}

/// Spawn a background task that triggers periodic detection passes.
///
/// Holds only a weak sender so dropping every handle still stops the actor.
fn spawn_poll_task(sender: mpsc::WeakSender<ManagerCommand>, period: Duration, cancel: CancellationToken) {
    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Poll task stopping: manager shut down");
                    break;
                }
                _ = ticker.tick() => {}
            }

            let Some(sender) = sender.upgrade() else {
                debug!("Poll task stopping: manager dropped");
                break;
            };
            // Fire-and-forget poll command
            if sender.send(ManagerCommand::Poll).await.is_err() {
                debug!("Poll task stopping: manager channel closed");
                break;
            }
            trace!("Triggered session poll");
        }
    });
}
