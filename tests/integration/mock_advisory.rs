//! Scripted advisory service for integration testing.
//!
//! Plays back a queue of responses (scores, failures, delays) and records
//! every summary it was asked to assess — all in-memory with no external
//! dependencies.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use spanner::advisory::{AdvisoryService, Assessment};
use spanner::types::OpportunitySummary;

/// One scripted advisory response.
#[derive(Debug, Clone)]
pub enum Scripted {
    /// Respond with this score.
    Score(f64),
    /// Fail with this message.
    Fail(String),
    /// Sleep, then respond with this score (for timeout tests).
    Slow(Duration, f64),
}

pub struct ScriptedAdvisor {
    script: Mutex<VecDeque<Scripted>>,
    /// Summaries received, in call order.
    seen: Mutex<Vec<OpportunitySummary>>,
    /// Response when the script runs dry.
    fallback_score: f64,
}

impl ScriptedAdvisor {
    pub fn new(script: Vec<Scripted>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            seen: Mutex::new(Vec::new()),
            fallback_score: 0.8,
        }
    }

    pub fn with_fallback(mut self, score: f64) -> Self {
        self.fallback_score = score;
        self
    }

    pub fn calls(&self) -> usize {
        self.seen.lock().unwrap().len()
    }

    pub fn seen_routes(&self) -> Vec<String> {
        self.seen.lock().unwrap().iter().map(|s| s.route.clone()).collect()
    }
}

#[async_trait]
impl AdvisoryService for ScriptedAdvisor {
    async fn assess(&self, summary: &OpportunitySummary) -> Result<Assessment> {
        self.seen.lock().unwrap().push(summary.clone());

        let next = self.script.lock().unwrap().pop_front();
        let score = match next {
            Some(Scripted::Score(score)) => score,
            Some(Scripted::Fail(message)) => return Err(anyhow!(message)),
            Some(Scripted::Slow(delay, score)) => {
                tokio::time::sleep(delay).await;
                score
            }
            None => self.fallback_score,
        };

        Ok(Assessment {
            score,
            narrative: format!("scripted assessment for {}", summary.route),
            tokens_used: 0,
            cost: 0.0,
        })
    }

    fn model_name(&self) -> String {
        "scripted".to_string()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

use rust_decimal_macros::dec;

fn summary() -> OpportunitySummary {
    OpportunitySummary {
        route: "ethereum (uniswap) -> polygon (quickswap)".into(),
        pair: "WETH/USDT".into(),
        profit_pct: dec!(2.45),
        estimated_profit_usd: dec!(24.50),
        required_capital_usd: dec!(1000),
        cross_chain: true,
    }
}

#[tokio::test]
async fn test_scripted_plays_back_in_order() {
    let advisor = ScriptedAdvisor::new(vec![
        Scripted::Score(0.9),
        Scripted::Fail("down".into()),
        Scripted::Score(0.2),
    ]);

    assert_eq!(advisor.assess(&summary()).await.unwrap().score, 0.9);
    assert!(advisor.assess(&summary()).await.is_err());
    assert_eq!(advisor.assess(&summary()).await.unwrap().score, 0.2);
    assert_eq!(advisor.calls(), 3);
}

#[tokio::test]
async fn test_scripted_fallback_when_dry() {
    let advisor = ScriptedAdvisor::new(vec![]).with_fallback(0.33);
    assert_eq!(advisor.assess(&summary()).await.unwrap().score, 0.33);
}

#[tokio::test]
async fn test_scripted_records_summaries() {
    let advisor = ScriptedAdvisor::new(vec![Scripted::Score(0.5)]);
    advisor.assess(&summary()).await.unwrap();
    assert_eq!(advisor.seen_routes(), vec!["ethereum (uniswap) -> polygon (quickswap)"]);
}
