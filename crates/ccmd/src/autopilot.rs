//! Autopilot: watches a manager's sessions and injects guidance.
//!
//! When a session stops working (`busy` to `idle` or `waiting_input`) the
//! autopilot snapshots its terminal, runs the guidance pipeline and, if the
//! selected result clears every gate, types the guidance into the session.
//!
//! Gates, in order:
//! 1. autopilot enabled
//! 2. a result selected by the [`SelectionPolicy`]
//! 3. `confidence >= intervention_threshold`
//! 4. non-empty guidance text
//! 5. the session's hourly budget is not used up

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use ccm_core::{AnalysisContext, AutopilotConfig, GuidancePipeline, SelectionPolicy, SessionId, SessionState};

use crate::manager::{SessionEvent, SessionManagerHandle};

/// Window over which `max_guidances_per_hour` is counted.
pub const BUDGET_WINDOW: Duration = Duration::from_secs(60 * 60);

// ============================================================================
// Budget
// ============================================================================

/// Rolling per-session count of sent guidances.
#[derive(Debug)]
pub struct GuidanceBudget {
    max_per_window: u32,
    window: Duration,
    sent: HashMap<SessionId, VecDeque<Instant>>,
}

impl GuidanceBudget {
    pub fn new(max_per_window: u32, window: Duration) -> Self {
        Self {
            max_per_window,
            window,
            sent: HashMap::new(),
        }
    }

    /// Records a send at `now` if the session has budget left.
    pub fn try_acquire(&mut self, session_id: &SessionId, now: Instant) -> bool {
        let sent = self.sent.entry(session_id.clone()).or_default();
        while sent
            .front()
            .is_some_and(|at| now.saturating_duration_since(*at) >= self.window)
        {
            sent.pop_front();
        }

        if sent.len() >= self.max_per_window as usize {
            return false;
        }
        sent.push_back(now);
        true
    }

    /// Forgets a session's history.
    pub fn forget(&mut self, session_id: &SessionId) {
        self.sent.remove(session_id);
    }
}

// ============================================================================
// Autopilot
// ============================================================================

/// Autopilot for one manager's sessions.
pub struct Autopilot {
    manager: SessionManagerHandle,
    pipeline: GuidancePipeline,
    config: AutopilotConfig,
    project_path: PathBuf,
    policy: SelectionPolicy,
    budget: Mutex<GuidanceBudget>,
    /// Sessions with an evaluation running
    in_flight: Mutex<HashSet<SessionId>>,
}

impl Autopilot {
    pub fn new(
        manager: SessionManagerHandle,
        pipeline: GuidancePipeline,
        config: AutopilotConfig,
        project_path: impl Into<PathBuf>,
    ) -> Self {
        let budget = GuidanceBudget::new(config.max_guidances_per_hour, BUDGET_WINDOW);
        Self {
            manager,
            pipeline,
            config,
            project_path: project_path.into(),
            policy: SelectionPolicy::default(),
            budget: Mutex::new(budget),
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    #[must_use]
    pub fn with_policy(mut self, policy: SelectionPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Runs until `cancel` fires. Pending evaluations are aborted on exit.
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        let autopilot = Arc::new(self);
        let mut events = autopilot.manager.subscribe();

        tokio::spawn(async move {
            if autopilot.config.enabled && !autopilot.pipeline.has_available_source() {
                warn!("Autopilot enabled but no guidance source is available");
            }
            info!(
                project = %autopilot.project_path.display(),
                enabled = autopilot.config.enabled,
                threshold = autopilot.config.intervention_threshold,
                "Autopilot started"
            );

            let mut evaluations = JoinSet::new();
            loop {
                tokio::select! {
                    biased;

                    _ = cancel.cancelled() => {
                        debug!("Autopilot shutting down");
                        break;
                    }

                    Some(_) = evaluations.join_next(), if !evaluations.is_empty() => {}

                    result = events.recv() => {
                        match result {
                            Ok(event) => autopilot.on_event(event, &mut evaluations),
                            Err(broadcast::error::RecvError::Lagged(n)) => {
                                warn!(skipped = n, "Autopilot lagged, skipped events");
                            }
                            Err(broadcast::error::RecvError::Closed) => {
                                debug!("Event channel closed");
                                break;
                            }
                        }
                    }
                }
            }

            evaluations.shutdown().await;
            debug!("Autopilot task completed");
        })
    }

    fn on_event(self: &Arc<Self>, event: SessionEvent, evaluations: &mut JoinSet<()>) {
        match event {
            SessionEvent::StateChanged {
                session_id,
                previous,
                state,
            } if is_trigger(previous, state) => {
                if !self.config.enabled {
                    return;
                }
                if !self.in_flight.lock().insert(session_id.clone()) {
                    debug!(session = %session_id, "Evaluation already running, skipping");
                    return;
                }
                let autopilot = Arc::clone(self);
                evaluations.spawn(async move {
                    autopilot.evaluate(&session_id).await;
                    autopilot.in_flight.lock().remove(&session_id);
                });
            }
            SessionEvent::Destroyed { session_id, .. } => {
                self.budget.lock().forget(&session_id);
            }
            _ => {}
        }
    }

    async fn evaluate(&self, session_id: &SessionId) {
        let Some(output) = self.manager.terminal_content(session_id).await else {
            debug!(session = %session_id, "Session gone before evaluation");
            return;
        };

        let context = AnalysisContext::new(output, self.project_path.clone());
        let outcome = self.pipeline.evaluate(&context).await;

        let Some(result) = self.policy.select(&outcome) else {
            debug!(session = %session_id, "No source recommends intervening");
            return;
        };
        if result.confidence < self.config.intervention_threshold {
            debug!(
                session = %session_id,
                source = %result.source,
                confidence = result.confidence,
                threshold = self.config.intervention_threshold,
                "Confidence below threshold"
            );
            return;
        }
        let Some(guidance) = result
            .guidance
            .as_deref()
            .map(str::trim)
            .filter(|g| !g.is_empty())
        else {
            debug!(session = %session_id, source = %result.source, "Intervention without guidance text");
            return;
        };
        if !self.budget.lock().try_acquire(session_id, Instant::now()) {
            info!(
                session = %session_id,
                max_per_hour = self.config.max_guidances_per_hour,
                "Guidance budget exhausted"
            );
            return;
        }

        match self.manager.send_input(session_id, guidance).await {
            Ok(()) => info!(
                session = %session_id,
                source = %result.source,
                confidence = result.confidence,
                "Guidance sent"
            ),
            // Destroyed mid-evaluation
            Err(e) => warn!(session = %session_id, error = %e, "Failed to deliver guidance"),
        }
    }
}

/// Spawns an autopilot with the default selection policy.
pub fn spawn_autopilot(
    manager: SessionManagerHandle,
    pipeline: GuidancePipeline,
    config: AutopilotConfig,
    project_path: impl Into<PathBuf>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    Autopilot::new(manager, pipeline, config, project_path).spawn(cancel)
}

/// The agent just finished working.
fn is_trigger(previous: SessionState, state: SessionState) -> bool {
    previous == SessionState::Busy && matches!(state, SessionState::Idle | SessionState::WaitingInput)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_trigger() {
        assert!(is_trigger(SessionState::Busy, SessionState::Idle));
        assert!(is_trigger(SessionState::Busy, SessionState::WaitingInput));
        assert!(!is_trigger(SessionState::Idle, SessionState::Busy));
        assert!(!is_trigger(SessionState::WaitingInput, SessionState::Idle));
    }

    #[tokio::test(start_paused = true)]
    async fn test_budget_rolls_over() {
        let mut budget = GuidanceBudget::new(2, BUDGET_WINDOW);
        let a = SessionId::new("/repo/a");
        let b = SessionId::new("/repo/b");
        let start = Instant::now();

        assert!(budget.try_acquire(&a, start));
        assert!(budget.try_acquire(&a, start + Duration::from_secs(10)));
        assert!(!budget.try_acquire(&a, start + Duration::from_secs(20)));
        // Budgets are per session
        assert!(budget.try_acquire(&b, start + Duration::from_secs(20)));

        // First send leaves the window
        assert!(budget.try_acquire(&a, start + BUDGET_WINDOW));
        assert!(!budget.try_acquire(&a, start + BUDGET_WINDOW + Duration::from_secs(5)));

        budget.forget(&a);
        assert!(budget.try_acquire(&a, start + BUDGET_WINDOW + Duration::from_secs(5)));
    }

    #[tokio::test]
    async fn test_zero_budget_never_sends() {
        let mut budget = GuidanceBudget::new(0, BUDGET_WINDOW);
        assert!(!budget.try_acquire(&SessionId::new("/repo/a"), Instant::now()));
    }
}
