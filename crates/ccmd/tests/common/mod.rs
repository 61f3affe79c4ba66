//! Shared fixtures for ccmd integration tests.
//!
//! Tests CAN use `.unwrap()` and `.expect()` - this is allowed.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ccm_core::{AppError, AppResult, ProcessSpawner, SessionProcess, SpawnRequest, TerminalSnapshot};
use ccmd::{spawn_session_manager, ManagerConfig, SessionEvent, SessionManagerHandle};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::time::{sleep, timeout};

pub const POLL: Duration = Duration::from_millis(50);

pub const BUSY: &str = "✻ Thinking… (esc to interrupt)";
pub const PROMPT: &str = "Do you want to proceed?\n❯ Yes\n  No";
pub const IDLE: &str = "> ";

// ============================================================================
// Fake Process
// ============================================================================

/// What a fake agent shows, plus what it was sent.
#[derive(Debug)]
pub struct FakeScreen {
    text: Mutex<String>,
    alive: AtomicBool,
    inputs: Mutex<Vec<String>>,
}

impl FakeScreen {
    fn new() -> Self {
        Self {
            text: Mutex::new(String::new()),
            alive: AtomicBool::new(true),
            inputs: Mutex::new(Vec::new()),
        }
    }

    pub fn show(&self, text: &str) {
        *self.text.lock() = text.to_string();
    }

    /// Simulates the agent exiting on its own.
    pub fn exit(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    pub fn inputs(&self) -> Vec<String> {
        self.inputs.lock().clone()
    }
}

struct FakeProcess {
    id: String,
    screen: Arc<FakeScreen>,
}

#[async_trait]
impl SessionProcess for FakeProcess {
    fn process_id(&self) -> &str {
        &self.id
    }

    async fn capture(&self) -> AppResult<TerminalSnapshot> {
        if !self.screen.is_alive() {
            return Err(AppError::process(&self.id, "no such session"));
        }
        Ok(TerminalSnapshot::from_text(&self.screen.text.lock()))
    }

    async fn write_input(&self, input: &str) -> AppResult<()> {
        if !self.screen.is_alive() {
            return Err(AppError::process(&self.id, "no such session"));
        }
        self.screen.inputs.lock().push(input.to_string());
        Ok(())
    }

    async fn is_alive(&self) -> bool {
        self.screen.is_alive()
    }

    async fn terminate(&self) -> AppResult<()> {
        self.screen.exit();
        Ok(())
    }
}

// ============================================================================
// Fake Spawner
// ============================================================================

/// In-memory spawner: one [`FakeScreen`] per working directory.
#[derive(Default)]
pub struct FakeSpawner {
    screens: Mutex<HashMap<PathBuf, Arc<FakeScreen>>>,
    failing: Mutex<HashSet<PathBuf>>,
    requests: Mutex<Vec<SpawnRequest>>,
    spawned: AtomicUsize,
}

impl FakeSpawner {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// The screen of the session at `path`, created on demand.
    pub fn screen(&self, path: impl AsRef<Path>) -> Arc<FakeScreen> {
        Arc::clone(
            self.screens
                .lock()
                .entry(path.as_ref().to_path_buf())
                .or_insert_with(|| Arc::new(FakeScreen::new())),
        )
    }

    /// Every spawn in `path` fails from now on.
    pub fn fail_in(&self, path: impl AsRef<Path>) {
        self.failing.lock().insert(path.as_ref().to_path_buf());
    }

    pub fn spawn_count(&self) -> usize {
        self.spawned.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<SpawnRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl ProcessSpawner for FakeSpawner {
    async fn spawn(&self, request: &SpawnRequest) -> AppResult<Box<dyn SessionProcess>> {
        self.requests.lock().push(request.clone());
        if self.failing.lock().contains(&request.working_dir) {
            return Err(AppError::process(request.command_line(), "command not found"));
        }

        let n = self.spawned.fetch_add(1, Ordering::SeqCst);
        // A respawn in the same directory starts a fresh agent.
        let screen = Arc::new(FakeScreen::new());
        self.screens
            .lock()
            .insert(request.working_dir.clone(), Arc::clone(&screen));
        Ok(Box::new(FakeProcess {
            id: format!("fake-{n}"),
            screen,
        }))
    }
}

// ============================================================================
// Helpers
// ============================================================================

pub fn manager(spawner: &Arc<FakeSpawner>) -> SessionManagerHandle {
    spawn_session_manager(spawner.clone(), ManagerConfig { poll_interval: POLL })
}

/// Next event, failing the test after a (virtual) 5 seconds.
pub async fn next_event(events: &mut broadcast::Receiver<SessionEvent>) -> SessionEvent {
    timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

/// Skips events until one matches.
pub async fn wait_for(
    events: &mut broadcast::Receiver<SessionEvent>,
    matches: impl Fn(&SessionEvent) -> bool,
) -> SessionEvent {
    loop {
        let event = next_event(events).await;
        if matches(&event) {
            return event;
        }
    }
}

/// Lets several poll periods pass.
pub async fn settle() {
    sleep(POLL * 5).await;
}

/// Polls `condition` for up to a (virtual) 5 seconds.
pub async fn eventually(condition: impl Fn() -> bool) -> bool {
    for _ in 0..100 {
        if condition() {
            return true;
        }
        sleep(POLL).await;
    }
    condition()
}
