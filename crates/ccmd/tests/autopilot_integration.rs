//! Integration tests for the autopilot.
//!
//! A real session manager runs over the in-memory spawner; guidance comes
//! from scripted sources so every gate can be exercised.
//!
//! Tests CAN use `.unwrap()` and `.expect()` - this is allowed.

mod common;

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ccm_core::{
    AnalysisClient, AnalysisContext, AnalysisDecision, AnalysisError, AutopilotConfig, BaseGuidanceSource,
    CommandPreset, ConcurrencyLimiter, GuidancePipeline, GuidanceResult, GuidanceSource, SelectionPolicy,
    SessionState,
};
use ccmd::{spawn_autopilot, Autopilot, SessionEvent, SessionManagerHandle, SessionOptions};
use common::{eventually, manager, settle, wait_for, FakeScreen, FakeSpawner, BUSY, IDLE, PROMPT};
use tokio::sync::broadcast;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

const WORKTREE: &str = "/repo/.worktrees/feature";

// ============================================================================
// Scripted guidance
// ============================================================================

struct FixedSource {
    id: &'static str,
    priority: i32,
    intervene: bool,
    confidence: f64,
    guidance: Option<String>,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl FixedSource {
    fn intervening(id: &'static str, confidence: f64, guidance: &str) -> Self {
        Self {
            id,
            priority: 10,
            intervene: true,
            confidence,
            guidance: Some(guidance.to_string()),
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GuidanceSource for FixedSource {
    fn id(&self) -> &str {
        self.id
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn can_short_circuit(&self) -> bool {
        false
    }

    async fn analyze(&self, _context: &AnalysisContext) -> GuidanceResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            sleep(delay).await;
        }
        GuidanceResult {
            should_intervene: self.intervene,
            confidence: self.confidence,
            guidance: self.guidance.clone(),
            reasoning: "scripted".to_string(),
            source: self.id.to_string(),
            priority: self.priority,
            metadata: Default::default(),
        }
    }
}

struct BrokenClient {
    calls: AtomicUsize,
}

#[async_trait]
impl AnalysisClient for BrokenClient {
    async fn analyze_claude_output(
        &self,
        _terminal_output: &str,
        _project_path: &Path,
    ) -> Result<AnalysisDecision, AnalysisError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(AnalysisError::Failed("connection refused".to_string()))
    }

    fn current_provider_name(&self) -> String {
        "broken".to_string()
    }

    fn is_available(&self) -> bool {
        true
    }

    fn update_config(&self, _config: &AutopilotConfig) {}
}

// ============================================================================
// Helpers
// ============================================================================

fn enabled() -> AutopilotConfig {
    AutopilotConfig {
        enabled: true,
        ..AutopilotConfig::default()
    }
}

fn pipeline_of(sources: &[&Arc<FixedSource>]) -> GuidancePipeline {
    GuidancePipeline::new(
        sources
            .iter()
            .map(|s| Arc::clone(s) as Arc<dyn GuidanceSource>)
            .collect(),
    )
}

/// A manager with one Claude session, plus its screen and an event receiver.
async fn session_under_watch(
    spawner: &Arc<FakeSpawner>,
) -> (SessionManagerHandle, Arc<FakeScreen>, broadcast::Receiver<SessionEvent>) {
    let manager = manager(spawner);
    let events = manager.subscribe();
    manager
        .create_session(
            WORKTREE,
            SessionOptions::from_preset(CommandPreset::new("claude", "Claude", "claude")),
        )
        .await
        .unwrap();
    (manager, spawner.screen(WORKTREE), events)
}

/// Takes the session through one busy turn ending on `end`.
async fn finish_turn(events: &mut broadcast::Receiver<SessionEvent>, screen: &FakeScreen, end: &str) {
    screen.show(BUSY);
    wait_for(events, |e| {
        matches!(e, SessionEvent::StateChanged { state: SessionState::Busy, .. })
    })
    .await;
    screen.show(end);
    wait_for(events, |e| {
        matches!(
            e,
            SessionEvent::StateChanged {
                previous: SessionState::Busy,
                ..
            }
        )
    })
    .await;
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_guidance_sent_when_agent_goes_idle() {
    let spawner = FakeSpawner::new();
    let (manager, screen, mut events) = session_under_watch(&spawner).await;
    let source = Arc::new(FixedSource::intervening("rules", 0.9, "  run the tests  "));
    let cancel = CancellationToken::new();
    let task = spawn_autopilot(manager.clone(), pipeline_of(&[&source]), enabled(), "/repo", cancel.clone());

    finish_turn(&mut events, &screen, IDLE).await;

    assert!(eventually(|| !screen.inputs().is_empty()).await);
    // Guidance is trimmed before sending
    assert_eq!(screen.inputs(), vec!["run the tests".to_string()]);
    assert_eq!(source.calls(), 1);

    cancel.cancel();
    task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_waiting_input_also_triggers() {
    let spawner = FakeSpawner::new();
    let (manager, screen, mut events) = session_under_watch(&spawner).await;
    let source = Arc::new(FixedSource::intervening("rules", 0.8, "1"));
    let _task = spawn_autopilot(
        manager.clone(),
        pipeline_of(&[&source]),
        enabled(),
        "/repo",
        CancellationToken::new(),
    );

    finish_turn(&mut events, &screen, PROMPT).await;
    assert!(eventually(|| screen.inputs() == vec!["1".to_string()]).await);
}

#[tokio::test(start_paused = true)]
async fn test_going_busy_does_not_trigger() {
    let spawner = FakeSpawner::new();
    let (manager, screen, mut events) = session_under_watch(&spawner).await;
    let source = Arc::new(FixedSource::intervening("rules", 0.9, "hello"));
    let _task = spawn_autopilot(
        manager.clone(),
        pipeline_of(&[&source]),
        enabled(),
        "/repo",
        CancellationToken::new(),
    );

    screen.show(BUSY);
    wait_for(&mut events, |e| {
        matches!(e, SessionEvent::StateChanged { state: SessionState::Busy, .. })
    })
    .await;
    settle().await;

    assert_eq!(source.calls(), 0);
    assert!(screen.inputs().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_low_confidence_is_not_sent() {
    let spawner = FakeSpawner::new();
    let (manager, screen, mut events) = session_under_watch(&spawner).await;
    let source = Arc::new(FixedSource::intervening("rules", 0.5, "maybe"));
    let _task = spawn_autopilot(
        manager.clone(),
        pipeline_of(&[&source]),
        enabled(),
        "/repo",
        CancellationToken::new(),
    );

    finish_turn(&mut events, &screen, IDLE).await;
    assert!(eventually(|| source.calls() == 1).await);
    settle().await;
    assert!(screen.inputs().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_blank_guidance_is_not_sent() {
    let spawner = FakeSpawner::new();
    let (manager, screen, mut events) = session_under_watch(&spawner).await;
    let source = Arc::new(FixedSource::intervening("rules", 1.0, "   \n"));
    let _task = spawn_autopilot(
        manager.clone(),
        pipeline_of(&[&source]),
        enabled(),
        "/repo",
        CancellationToken::new(),
    );

    finish_turn(&mut events, &screen, IDLE).await;
    assert!(eventually(|| source.calls() == 1).await);
    settle().await;
    assert!(screen.inputs().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_disabled_autopilot_never_analyzes() {
    let spawner = FakeSpawner::new();
    let (manager, screen, mut events) = session_under_watch(&spawner).await;
    let source = Arc::new(FixedSource::intervening("rules", 0.9, "hello"));
    let _task = spawn_autopilot(
        manager.clone(),
        pipeline_of(&[&source]),
        AutopilotConfig::default(),
        "/repo",
        CancellationToken::new(),
    );

    finish_turn(&mut events, &screen, IDLE).await;
    settle().await;
    assert_eq!(source.calls(), 0);
    assert!(screen.inputs().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_hourly_budget_limits_sends() {
    let spawner = FakeSpawner::new();
    let (manager, screen, mut events) = session_under_watch(&spawner).await;
    let source = Arc::new(FixedSource::intervening("rules", 0.9, "keep going"));
    let config = AutopilotConfig {
        max_guidances_per_hour: 1,
        ..enabled()
    };
    let _task = spawn_autopilot(manager.clone(), pipeline_of(&[&source]), config, "/repo", CancellationToken::new());

    finish_turn(&mut events, &screen, IDLE).await;
    assert!(eventually(|| screen.inputs().len() == 1).await);

    finish_turn(&mut events, &screen, IDLE).await;
    assert!(eventually(|| source.calls() == 2).await);
    settle().await;
    assert_eq!(screen.inputs().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_highest_confidence_policy() {
    let spawner = FakeSpawner::new();
    let (manager, screen, mut events) = session_under_watch(&spawner).await;
    let early = Arc::new(FixedSource::intervening("early", 0.75, "from early").with_priority(1));
    let sure = Arc::new(FixedSource::intervening("sure", 0.95, "from sure").with_priority(2));
    let _task = Autopilot::new(manager.clone(), pipeline_of(&[&early, &sure]), enabled(), "/repo")
        .with_policy(SelectionPolicy::HighestConfidence)
        .spawn(CancellationToken::new());

    finish_turn(&mut events, &screen, IDLE).await;
    assert!(eventually(|| !screen.inputs().is_empty()).await);
    assert_eq!(screen.inputs(), vec!["from sure".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_default_policy_takes_first_by_priority() {
    let spawner = FakeSpawner::new();
    let (manager, screen, mut events) = session_under_watch(&spawner).await;
    let early = Arc::new(FixedSource::intervening("early", 0.75, "from early").with_priority(1));
    let sure = Arc::new(FixedSource::intervening("sure", 0.95, "from sure").with_priority(2));
    let _task = spawn_autopilot(
        manager.clone(),
        pipeline_of(&[&sure, &early]),
        enabled(),
        "/repo",
        CancellationToken::new(),
    );

    finish_turn(&mut events, &screen, IDLE).await;
    assert!(eventually(|| !screen.inputs().is_empty()).await);
    assert_eq!(screen.inputs(), vec!["from early".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_failing_analyzer_is_harmless() {
    let spawner = FakeSpawner::new();
    let (manager, screen, mut events) = session_under_watch(&spawner).await;
    let client = Arc::new(BrokenClient {
        calls: AtomicUsize::new(0),
    });
    let config = enabled();
    let base = BaseGuidanceSource::new(
        Arc::clone(&client) as Arc<dyn AnalysisClient>,
        ConcurrencyLimiter::new(config.max_concurrency).unwrap(),
        &config,
    );
    let pipeline = GuidancePipeline::new(vec![Arc::new(base) as Arc<dyn GuidanceSource>]);
    let task = spawn_autopilot(manager.clone(), pipeline, config, "/repo", CancellationToken::new());

    finish_turn(&mut events, &screen, IDLE).await;
    assert!(eventually(|| client.calls.load(Ordering::SeqCst) == 1).await);
    settle().await;

    assert!(screen.inputs().is_empty());
    assert!(!task.is_finished());
    assert_eq!(manager.session_count().await, 1);
}

#[tokio::test(start_paused = true)]
async fn test_session_destroyed_during_evaluation() {
    let spawner = FakeSpawner::new();
    let (manager, screen, mut events) = session_under_watch(&spawner).await;
    let source = Arc::new(FixedSource::intervening("slow", 0.9, "too late").with_delay(Duration::from_secs(2)));
    let task = spawn_autopilot(
        manager.clone(),
        pipeline_of(&[&source]),
        enabled(),
        "/repo",
        CancellationToken::new(),
    );

    finish_turn(&mut events, &screen, IDLE).await;
    assert!(eventually(|| source.calls() == 1).await);
    let id = manager.get_all_sessions().await[0].id.clone();
    manager.destroy_session(&id).await;

    sleep(Duration::from_secs(3)).await;
    assert!(screen.inputs().is_empty());
    assert!(!task.is_finished());
}

#[tokio::test(start_paused = true)]
async fn test_cancel_stops_autopilot() {
    let spawner = FakeSpawner::new();
    let (manager, screen, mut events) = session_under_watch(&spawner).await;
    let source = Arc::new(FixedSource::intervening("slow", 0.9, "never").with_delay(Duration::from_secs(30)));
    let cancel = CancellationToken::new();
    let task = spawn_autopilot(manager.clone(), pipeline_of(&[&source]), enabled(), "/repo", cancel.clone());

    // Cancel while an evaluation is pending
    finish_turn(&mut events, &screen, IDLE).await;
    assert!(eventually(|| source.calls() == 1).await);
    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(1), task)
        .await
        .expect("autopilot should stop promptly")
        .unwrap();

    finish_turn(&mut events, &screen, IDLE).await;
    sleep(Duration::from_secs(60)).await;
    assert_eq!(source.calls(), 1);
    assert!(screen.inputs().is_empty());
}
