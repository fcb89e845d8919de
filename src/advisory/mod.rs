//! Advisory integration for opportunity risk scoring.
//!
//! Defines the `AdvisoryService` trait and provides the OpenAI
//! implementation plus a fixed-score advisor for keyless operation.
//! The advisory's internal reasoning is out of scope — only its contract
//! (score in [0, 1], narrative, timeout/failure behavior) matters to the
//! risk evaluator.

pub mod openai;

use anyhow::Result;
use async_trait::async_trait;

use crate::types::OpportunitySummary;

/// A scored assessment of one opportunity.
#[derive(Debug, Clone)]
pub struct Assessment {
    /// Confidence that the opportunity is worth executing, in [0, 1].
    pub score: f64,
    /// Free-form reasoning from the advisory service.
    pub narrative: String,
    pub tokens_used: u32,
    /// API cost of this assessment in USD.
    pub cost: f64,
}

/// Abstraction over advisory risk/sentiment scorers.
///
/// Implementors send an opportunity summary to an external service and
/// parse a calibrated confidence score from the response. Callers bound
/// every call with a timeout; an error or timeout is substituted with the
/// configured neutral score, never treated as an accept.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AdvisoryService: Send + Sync {
    /// Assess a single opportunity.
    async fn assess(&self, summary: &OpportunitySummary) -> Result<Assessment>;

    /// Model identifier string.
    fn model_name(&self) -> String;
}

// ---------------------------------------------------------------------------
// Fixed-score advisor
// ---------------------------------------------------------------------------

/// Advisor that returns a constant score. Used when no API key is
/// configured (scan-only / simulation mode) and in tests.
pub struct StaticAdvisor {
    score: f64,
}

impl StaticAdvisor {
    pub fn new(score: f64) -> Self {
        Self {
            score: score.clamp(0.0, 1.0),
        }
    }
}

#[async_trait]
impl AdvisoryService for StaticAdvisor {
    async fn assess(&self, _summary: &OpportunitySummary) -> Result<Assessment> {
        Ok(Assessment {
            score: self.score,
            narrative: "static advisor (no external service configured)".to_string(),
            tokens_used: 0,
            cost: 0.0,
        })
    }

    fn model_name(&self) -> String {
        "static".to_string()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
