//! Risk evaluator.
//!
//! A pure decision function over one opportunity: deterministic gates run
//! first, and only if every gate passes is the external advisory signal
//! consulted — a gate failure never spends an advisory call. Advisory
//! failure or timeout substitutes the configured neutral score; it is
//! logged distinctly from a hard reject and is never an automatic accept.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::advisory::AdvisoryService;
use crate::config::RuntimeSettings;
use crate::error::EngineError;
use crate::types::{Opportunity, RiskResult};

pub struct RiskEvaluator {
    advisory: Arc<dyn AdvisoryService>,
    advisory_timeout: Duration,
}

impl RiskEvaluator {
    pub fn new(advisory: Arc<dyn AdvisoryService>, advisory_timeout: Duration) -> Self {
        Self {
            advisory,
            advisory_timeout,
        }
    }

    /// Evaluate one opportunity against the current settings snapshot.
    ///
    /// Deterministic gates, in order:
    /// 1. net profit % ≥ minimum threshold (independent re-check of the
    ///    scanner's filter, against stale or recomputed data),
    /// 2. total gas across all legs ≤ estimated profit,
    /// 3. required capital ≤ maximum capital per trade.
    ///
    /// Final accept = all gates pass AND confidence ≥ acceptance threshold.
    pub async fn evaluate(&self, opportunity: &Opportunity, settings: &RuntimeSettings) -> RiskResult {
        let mut reasons = Vec::new();
        let mut gates_passed = true;

        if opportunity.profit_pct < settings.min_profit_pct {
            gates_passed = false;
            reasons.push(
                EngineError::InsufficientMargin {
                    reason: format!(
                        "net profit {:.2}% below minimum {:.2}%",
                        opportunity.profit_pct, settings.min_profit_pct
                    ),
                }
                .to_string(),
            );
        }

        if opportunity.total_gas_usd() > opportunity.estimated_profit_usd {
            gates_passed = false;
            reasons.push(
                EngineError::InsufficientMargin {
                    reason: format!(
                        "gas ${:.2} exceeds estimated profit ${:.2}",
                        opportunity.total_gas_usd(),
                        opportunity.estimated_profit_usd
                    ),
                }
                .to_string(),
            );
        }

        if opportunity.required_capital_usd > settings.max_capital_per_trade_usd {
            gates_passed = false;
            reasons.push(
                EngineError::InsufficientMargin {
                    reason: format!(
                        "capital ${:.0} exceeds per-trade maximum ${:.0}",
                        opportunity.required_capital_usd, settings.max_capital_per_trade_usd
                    ),
                }
                .to_string(),
            );
        }

        if !gates_passed {
            debug!(%opportunity, reasons = ?reasons, "Deterministic gates failed; advisory not consulted");
            return RiskResult {
                accept: false,
                score: 0.0,
                reasons,
                evaluated_at: Utc::now(),
            };
        }
        reasons.push("deterministic gates passed".to_string());

        // Advisory signal, bounded by its own timeout.
        let summary = opportunity.summary();
        let score = match tokio::time::timeout(self.advisory_timeout, self.advisory.assess(&summary))
            .await
        {
            Ok(Ok(assessment)) => {
                reasons.push(format!(
                    "advisory score {:.2} ({})",
                    assessment.score,
                    self.advisory.model_name()
                ));
                debug!(
                    score = assessment.score,
                    narrative = %assessment.narrative,
                    "Advisory assessment received"
                );
                assessment.score
            }
            Ok(Err(e)) => {
                let err = EngineError::AdvisoryUnavailable {
                    message: e.to_string(),
                };
                warn!(error = %err, "Applying neutral score");
                reasons.push(format!(
                    "{err}; neutral score {:.2} applied",
                    settings.advisory_neutral_score
                ));
                settings.advisory_neutral_score
            }
            Err(_) => {
                let err = EngineError::AdvisoryUnavailable {
                    message: "timeout".to_string(),
                };
                warn!(
                    timeout_ms = self.advisory_timeout.as_millis() as u64,
                    error = %err,
                    "Applying neutral score"
                );
                reasons.push(format!(
                    "{err}; neutral score {:.2} applied",
                    settings.advisory_neutral_score
                ));
                settings.advisory_neutral_score
            }
        };

        let accept = score >= settings.advisory_accept_threshold;
        reasons.push(if accept {
            format!(
                "accepted: confidence {:.2} >= threshold {:.2}",
                score, settings.advisory_accept_threshold
            )
        } else {
            format!(
                "rejected: confidence {:.2} below threshold {:.2}",
                score, settings.advisory_accept_threshold
            )
        });

        info!(
            %opportunity,
            accept,
            score,
            "Risk evaluation complete"
        );

        RiskResult {
            accept,
            score,
            reasons,
            evaluated_at: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
