//! Guidance sources and the pipeline that consults them.
//!
//! A [`GuidanceSource`] looks at a session's terminal and recommends
//! whether the autopilot should intervene. Sources must be fail-safe: an
//! analyzer that errors yields a non-intervening result, never a panic or
//! an `Err` past the source boundary.
//!
//! ```text
//! AnalysisContext ──▶ GuidancePipeline ──▶ [source p=10] ──▶ [source p=100] ──▶ PipelineOutcome
//!                       (ascending priority, stop on short-circuit)              │
//!                                                                   SelectionPolicy::select
//! ```

use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::AutopilotConfig;

mod base;
mod pipeline;

pub use base::{
    AnalysisClient, AnalysisDecision, AnalysisError, BaseGuidanceSource, BASE_SOURCE_ID,
    BASE_SOURCE_PRIORITY,
};
pub use pipeline::{GuidancePipeline, PipelineOutcome, SelectionPolicy};

/// Input to one guidance evaluation.
///
/// Built fresh for every evaluation and never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisContext {
    pub terminal_output: String,
    pub project_path: PathBuf,
}

impl AnalysisContext {
    pub fn new(terminal_output: impl Into<String>, project_path: impl Into<PathBuf>) -> Self {
        Self {
            terminal_output: terminal_output.into(),
            project_path: project_path.into(),
        }
    }
}

/// A source's recommendation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuidanceResult {
    pub should_intervene: bool,
    /// Confidence in `0.0..=1.0`
    pub confidence: f64,
    /// Text to send to the session when intervening
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guidance: Option<String>,
    pub reasoning: String,
    /// Id of the source that produced this result
    pub source: String,
    pub priority: i32,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

impl GuidanceResult {
    /// A "do not intervene" result.
    pub fn no_intervention(source: impl Into<String>, priority: i32, reasoning: impl Into<String>) -> Self {
        Self {
            should_intervene: false,
            confidence: 0.0,
            guidance: None,
            reasoning: reasoning.into(),
            source: source.into(),
            priority,
            metadata: BTreeMap::new(),
        }
    }

    /// The fail-safe result returned when a source's analysis failed.
    pub fn fallback(source: impl Into<String>, priority: i32, error: impl std::fmt::Display) -> Self {
        let message = error.to_string();
        let mut result = Self::no_intervention(source, priority, format!("Analysis failed: {message}"));
        result.metadata.insert("error".to_string(), Value::Bool(true));
        result.metadata.insert("error_message".to_string(), Value::String(message));
        result
    }

    /// Returns true if this result carries the error marker.
    pub fn is_error(&self) -> bool {
        self.metadata
            .get("error")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

/// A pluggable analysis strategy.
#[async_trait]
pub trait GuidanceSource: Send + Sync {
    /// Stable identifier, stamped into every result.
    fn id(&self) -> &str;

    /// Lower is consulted first.
    fn priority(&self) -> i32;

    /// Whether a positive decision from this source ends the pipeline.
    fn can_short_circuit(&self) -> bool;

    /// Produces a recommendation. Must not fail; see the module docs.
    async fn analyze(&self, context: &AnalysisContext) -> GuidanceResult;

    /// Whether the source's backend is currently usable.
    fn is_available(&self) -> bool {
        true
    }

    /// Applies a new configuration snapshot.
    fn update_config(&self, _config: &AutopilotConfig) {}
}
