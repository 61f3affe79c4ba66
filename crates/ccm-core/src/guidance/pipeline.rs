//! Priority-ordered evaluation of guidance sources.

use std::sync::Arc;

use tracing::debug;

use super::{AnalysisContext, GuidanceResult, GuidanceSource};
use crate::AutopilotConfig;

/// Results of one pipeline pass, in the order sources were consulted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PipelineOutcome {
    pub results: Vec<GuidanceResult>,
    /// True if a short-circuiting source ended the pass early
    pub short_circuited: bool,
}

/// How the caller picks one result out of a [`PipelineOutcome`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SelectionPolicy {
    /// First intervening result in priority order.
    #[default]
    FirstInterveningByPriority,

    /// Intervening result with the highest confidence; ties go to the
    /// higher-priority source.
    HighestConfidence,
}

impl SelectionPolicy {
    /// Picks the result to act on, or `None` if nothing intervenes.
    pub fn select<'a>(&self, outcome: &'a PipelineOutcome) -> Option<&'a GuidanceResult> {
        let mut intervening = outcome.results.iter().filter(|r| r.should_intervene);
        match self {
            Self::FirstInterveningByPriority => intervening.next(),
            Self::HighestConfidence => intervening.fold(None, |best: Option<&GuidanceResult>, r| match best {
                Some(b) if b.confidence >= r.confidence => Some(b),
                _ => Some(r),
            }),
        }
    }
}

/// Ordered set of guidance sources.
#[derive(Clone, Default)]
pub struct GuidancePipeline {
    sources: Vec<Arc<dyn GuidanceSource>>,
}

impl GuidancePipeline {
    pub fn new(sources: Vec<Arc<dyn GuidanceSource>>) -> Self {
        let mut pipeline = Self { sources };
        pipeline.sort();
        pipeline
    }

    /// Adds a source, keeping ascending priority order.
    pub fn add_source(&mut self, source: Arc<dyn GuidanceSource>) {
        self.sources.push(source);
        self.sort();
    }

    /// Source ids in evaluation order.
    pub fn source_ids(&self) -> Vec<&str> {
        self.sources.iter().map(|s| s.id()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Returns true if any source's backend is usable.
    pub fn has_available_source(&self) -> bool {
        self.sources.iter().any(|s| s.is_available())
    }

    /// Pushes a configuration snapshot to every source.
    pub fn update_config(&self, config: &AutopilotConfig) {
        for source in &self.sources {
            source.update_config(config);
        }
    }

    /// Consults sources in ascending priority order.
    ///
    /// Stops early only when a source that can short-circuit decides to
    /// intervene. Choosing among the collected results is left to the
    /// caller (see [`SelectionPolicy`]).
    pub async fn evaluate(&self, context: &AnalysisContext) -> PipelineOutcome {
        let mut outcome = PipelineOutcome::default();

        for source in &self.sources {
            let result = source.analyze(context).await;
            let stop = result.should_intervene && source.can_short_circuit();
            debug!(
                source = source.id(),
                priority = source.priority(),
                should_intervene = result.should_intervene,
                confidence = result.confidence,
                "Guidance source evaluated"
            );
            outcome.results.push(result);

            if stop {
                debug!(source = source.id(), "Pipeline short-circuited");
                outcome.short_circuited = true;
                break;
            }
        }

        outcome
    }

    fn sort(&mut self) {
        // Stable: equal priorities keep insertion order.
        self.sources.sort_by_key(|s| s.priority());
    }
}
