//! Guidance backed by an external analysis client.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use super::{AnalysisContext, GuidanceResult, GuidanceSource};
use crate::{AutopilotConfig, ConcurrencyLimiter};

/// Id of the base source.
pub const BASE_SOURCE_ID: &str = "base-llm";

/// Priority of the base source: last, as a fallback behind cheaper sources.
pub const BASE_SOURCE_PRIORITY: i32 = 100;

/// Decision returned by an analysis client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisDecision {
    pub should_intervene: bool,
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guidance: Option<String>,
    #[serde(default)]
    pub reasoning: String,
}

/// Errors raised by analysis clients.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum AnalysisError {
    /// The backend is not configured or cannot be reached.
    #[error("analysis backend unavailable: {0}")]
    Unavailable(String),

    /// The call itself failed.
    #[error("analysis request failed: {0}")]
    Failed(String),

    /// The backend answered with something unparseable.
    #[error("invalid analysis response: {0}")]
    InvalidResponse(String),

    /// The call exceeded its deadline.
    #[error("analysis timed out after {0:?}")]
    TimedOut(Duration),
}

/// External analyzer of agent terminal output.
#[async_trait]
pub trait AnalysisClient: Send + Sync {
    async fn analyze_claude_output(
        &self,
        terminal_output: &str,
        project_path: &Path,
    ) -> Result<AnalysisDecision, AnalysisError>;

    fn current_provider_name(&self) -> String;

    fn is_available(&self) -> bool;

    /// Swaps configuration; in-flight calls finish with the old one.
    fn update_config(&self, config: &AutopilotConfig);
}

/// Guidance source wrapping an [`AnalysisClient`].
///
/// Calls go through the shared [`ConcurrencyLimiter`]; any failure,
/// including an expired deadline, becomes a non-intervening result.
pub struct BaseGuidanceSource {
    client: Arc<dyn AnalysisClient>,
    limiter: ConcurrencyLimiter,
    priority: i32,
    timeout: RwLock<Option<Duration>>,
}

impl BaseGuidanceSource {
    pub fn new(client: Arc<dyn AnalysisClient>, limiter: ConcurrencyLimiter, config: &AutopilotConfig) -> Self {
        Self {
            client,
            limiter,
            priority: BASE_SOURCE_PRIORITY,
            timeout: RwLock::new(config.analysis_timeout()),
        }
    }

    /// Overrides the default priority.
    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    async fn call_client(&self, context: &AnalysisContext) -> Result<AnalysisDecision, AnalysisError> {
        let deadline = *self.timeout.read();
        self.limiter
            .run(move || async move {
                let call = self
                    .client
                    .analyze_claude_output(&context.terminal_output, &context.project_path);
                match deadline {
                    Some(limit) => tokio::time::timeout(limit, call)
                        .await
                        .unwrap_or(Err(AnalysisError::TimedOut(limit))),
                    None => call.await,
                }
            })
            .await
    }
}

#[async_trait]
impl GuidanceSource for BaseGuidanceSource {
    fn id(&self) -> &str {
        BASE_SOURCE_ID
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn can_short_circuit(&self) -> bool {
        false
    }

    async fn analyze(&self, context: &AnalysisContext) -> GuidanceResult {
        let provider = self.client.current_provider_name();

        match self.call_client(context).await {
            Ok(decision) => {
                debug!(
                    provider = %provider,
                    should_intervene = decision.should_intervene,
                    confidence = decision.confidence,
                    "Analysis complete"
                );
                let mut result = GuidanceResult {
                    should_intervene: decision.should_intervene,
                    confidence: decision.confidence.clamp(0.0, 1.0),
                    guidance: decision.guidance,
                    reasoning: decision.reasoning,
                    source: BASE_SOURCE_ID.to_string(),
                    priority: self.priority,
                    metadata: Default::default(),
                };
                result.metadata.insert("provider".to_string(), Value::String(provider));
                result
                    .metadata
                    .insert("analyzed_at".to_string(), Value::String(Utc::now().to_rfc3339()));
                result
            }
            Err(e) => {
                warn!(provider = %provider, error = %e, "Analysis failed, not intervening");
                let mut result = GuidanceResult::fallback(BASE_SOURCE_ID, self.priority, &e);
                result.metadata.insert("provider".to_string(), Value::String(provider));
                if matches!(e, AnalysisError::TimedOut(_)) {
                    result.metadata.insert("timed_out".to_string(), Value::Bool(true));
                }
                result
            }
        }
    }

    fn is_available(&self) -> bool {
        self.client.is_available()
    }

    fn update_config(&self, config: &AutopilotConfig) {
        *self.timeout.write() = config.analysis_timeout();
        self.client.update_config(config);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct StubClient {
        response: Mutex<Result<AnalysisDecision, AnalysisError>>,
        delay: Option<Duration>,
        available: bool,
        configs: Mutex<Vec<AutopilotConfig>>,
    }

    impl StubClient {
        fn answering(response: Result<AnalysisDecision, AnalysisError>) -> Self {
            Self {
                response: Mutex::new(response),
                delay: None,
                available: true,
                configs: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl AnalysisClient for StubClient {
        async fn analyze_claude_output(
            &self,
            _terminal_output: &str,
            _project_path: &Path,
        ) -> Result<AnalysisDecision, AnalysisError> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.response.lock().clone()
        }

        fn current_provider_name(&self) -> String {
            "stub".to_string()
        }

        fn is_available(&self) -> bool {
            self.available
        }

        fn update_config(&self, config: &AutopilotConfig) {
            self.configs.lock().push(config.clone());
        }
    }

    fn source(client: Arc<StubClient>) -> BaseGuidanceSource {
        let limiter = ConcurrencyLimiter::new(1).unwrap();
        BaseGuidanceSource::new(client, limiter, &AutopilotConfig::default())
    }

    fn context() -> AnalysisContext {
        AnalysisContext::new("Do you want to proceed?\n❯ Yes", "/repo")
    }

    #[tokio::test]
    async fn test_maps_decision() {
        let client = Arc::new(StubClient::answering(Ok(AnalysisDecision {
            should_intervene: true,
            confidence: 0.9,
            guidance: Some("Run the tests first".to_string()),
            reasoning: "Agent skipped tests".to_string(),
        })));
        let result = source(client).analyze(&context()).await;

        assert!(result.should_intervene);
        assert_eq!(result.confidence, 0.9);
        assert_eq!(result.guidance.as_deref(), Some("Run the tests first"));
        assert_eq!(result.reasoning, "Agent skipped tests");
        assert_eq!(result.source, BASE_SOURCE_ID);
        assert_eq!(result.priority, BASE_SOURCE_PRIORITY);
        assert_eq!(result.metadata.get("provider"), Some(&Value::String("stub".into())));
        assert!(result.metadata.contains_key("analyzed_at"));
        assert!(!result.is_error());
    }

    #[tokio::test]
    async fn test_failure_is_fail_safe() {
        let client = Arc::new(StubClient::answering(Err(AnalysisError::Failed(
            "HTTP 500".to_string(),
        ))));
        let result = source(client).analyze(&context()).await;

        assert!(!result.should_intervene);
        assert_eq!(result.confidence, 0.0);
        assert!(result.is_error());
        assert!(result.reasoning.contains("HTTP 500"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_fail_safe() {
        let client = Arc::new(StubClient {
            delay: Some(Duration::from_secs(600)),
            ..StubClient::answering(Ok(AnalysisDecision {
                should_intervene: true,
                confidence: 1.0,
                guidance: Some("late".to_string()),
                reasoning: String::new(),
            }))
        });
        let result = source(client).analyze(&context()).await;

        assert!(!result.should_intervene);
        assert!(result.is_error());
        assert_eq!(result.metadata.get("timed_out"), Some(&Value::Bool(true)));
    }

    #[tokio::test]
    async fn test_confidence_is_clamped() {
        let client = Arc::new(StubClient::answering(Ok(AnalysisDecision {
            should_intervene: true,
            confidence: 4.2,
            guidance: None,
            reasoning: String::new(),
        })));
        let result = source(client).analyze(&context()).await;
        assert_eq!(result.confidence, 1.0);
    }

    #[test]
    fn test_availability_and_config_delegate() {
        let client = Arc::new(StubClient {
            available: false,
            ..StubClient::answering(Err(AnalysisError::Unavailable("no key".into())))
        });
        let base = source(Arc::clone(&client));
        assert!(!base.is_available());

        let config = AutopilotConfig {
            analysis_timeout_secs: None,
            ..AutopilotConfig::default()
        };
        base.update_config(&config);
        assert_eq!(*base.timeout.read(), None);
        assert_eq!(client.configs.lock().len(), 1);
    }

    #[test]
    fn test_decision_json() {
        let decision: AnalysisDecision = serde_json::from_str(
            r#"{"shouldIntervene": true, "confidence": 0.8, "guidance": "Add a test", "reasoning": "no tests"}"#,
        )
        .unwrap();
        assert!(decision.should_intervene);
        assert_eq!(decision.guidance.as_deref(), Some("Add a test"));

        let decision: AnalysisDecision =
            serde_json::from_str(r#"{"shouldIntervene": false, "confidence": 0}"#).unwrap();
        assert_eq!(decision.reasoning, "");
    }
}
