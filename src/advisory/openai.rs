//! OpenAI GPT advisory integration.
//!
//! Implements the `AdvisoryService` trait against the OpenAI Chat
//! Completions API. The model is asked to assess an arbitrage opportunity
//! and reply with a `SCORE:` line followed by its reasoning; the score is
//! parsed and clamped to [0, 1].

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{AdvisoryService, Assessment};
use crate::types::OpportunitySummary;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";
const DEFAULT_MODEL: &str = "gpt-4o";
const DEFAULT_MAX_TOKENS: u32 = 1024;

const MAX_RETRIES: u32 = 3;
const BASE_BACKOFF_MS: u64 = 1000;

/// Approximate cost per 1K input tokens (GPT-4o).
const INPUT_COST_PER_1K: f64 = 0.005;
/// Approximate cost per 1K output tokens (GPT-4o).
const OUTPUT_COST_PER_1K: f64 = 0.015;

const SYSTEM_PROMPT: &str = "You are an expert crypto arbitrage analyst with deep \
knowledge of DeFi protocols, market dynamics, and risk assessment. You assess \
cross-chain arbitrage opportunities and reply with a confidence score. The first \
line of your reply must be `SCORE: <value between 0.00 and 1.00>`, followed by \
a short risk analysis.";

// ---------------------------------------------------------------------------
// API types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    max_tokens: u32,
    temperature: f32,
    messages: Vec<ChatMessage>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    #[serde(default)]
    message: Option<ChatMessage>,
}

#[derive(Debug, Deserialize, Default)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
    #[serde(default)]
    total_tokens: u32,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct OpenAiAdvisor {
    http: Client,
    api_key: SecretString,
    model: String,
    max_tokens: u32,
    total_cost: std::sync::atomic::AtomicU64,
    total_calls: std::sync::atomic::AtomicU64,
}

impl OpenAiAdvisor {
    pub fn new(api_key: SecretString, model: Option<String>, max_tokens: Option<u32>) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()
            .context("Failed to build OpenAI HTTP client")?;

        Ok(Self {
            http,
            api_key,
            model: model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            max_tokens: max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            total_cost: std::sync::atomic::AtomicU64::new(0),
            total_calls: std::sync::atomic::AtomicU64::new(0),
        })
    }

    /// Build the assessment prompt for one opportunity.
    fn build_prompt(summary: &OpportunitySummary) -> String {
        format!(
            "Analyze this arbitrage opportunity:\n\n\
             Route: {}\n\
             Token Pair: {}\n\
             Expected Profit: ${:.2} ({:.2}%)\n\
             Required Capital: ${:.2}\n\
             Cross-chain: {}\n\n\
             Consider:\n\
             1. Historical volatility of the token pair\n\
             2. Current market conditions\n\
             3. Gas costs and potential slippage\n\
             4. Bridge reliability and speed\n\
             5. Smart contract risks\n\n\
             Reply with the SCORE line, then your risk assessment.",
            summary.route,
            summary.pair,
            summary.estimated_profit_usd,
            summary.profit_pct,
            summary.required_capital_usd,
            if summary.cross_chain { "yes" } else { "no" },
        )
    }

    /// Parse `SCORE: 0.82` from the first matching line; the remainder is
    /// the narrative. A reply with no parseable score is an error — the
    /// evaluator's neutral-score fallback handles it.
    fn parse_assessment(text: &str) -> Result<(f64, String)> {
        for line in text.lines() {
            let trimmed = line.trim();
            if let Some(rest) = trimmed.strip_prefix("SCORE:") {
                let score: f64 = rest
                    .trim()
                    .parse()
                    .with_context(|| format!("Unparseable score: {rest}"))?;
                let narrative = text
                    .lines()
                    .filter(|l| !l.trim().starts_with("SCORE:"))
                    .collect::<Vec<_>>()
                    .join("\n")
                    .trim()
                    .to_string();
                return Ok((score.clamp(0.0, 1.0), narrative));
            }
        }
        anyhow::bail!("Advisory reply contained no SCORE line")
    }

    async fn call_api(&self, user_message: &str) -> Result<(String, u32, f64)> {
        let request = ChatRequest {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            temperature: 0.3,
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: user_message.to_string(),
                },
            ],
        };

        let mut last_error = None;

        for attempt in 0..=MAX_RETRIES {
            if attempt > 0 {
                let delay = BASE_BACKOFF_MS * 2u64.pow(attempt - 1);
                tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
            }

            let resp = self
                .http
                .post(OPENAI_API_URL)
                .header(
                    "Authorization",
                    format!("Bearer {}", self.api_key.expose_secret()),
                )
                .header("Content-Type", "application/json")
                .json(&request)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let body: ChatResponse = response
                            .json()
                            .await
                            .context("Failed to parse OpenAI response")?;

                        let text = body
                            .choices
                            .first()
                            .and_then(|c| c.message.as_ref())
                            .map(|m| m.content.clone())
                            .unwrap_or_default();

                        let usage = body.usage.unwrap_or_default();
                        let cost = (usage.prompt_tokens as f64 / 1000.0) * INPUT_COST_PER_1K
                            + (usage.completion_tokens as f64 / 1000.0) * OUTPUT_COST_PER_1K;

                        let cost_micro = (cost * 1_000_000.0) as u64;
                        self.total_cost
                            .fetch_add(cost_micro, std::sync::atomic::Ordering::Relaxed);
                        self.total_calls
                            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);

                        return Ok((text, usage.total_tokens, cost));
                    }

                    if status.as_u16() == 429 || status.as_u16() >= 500 {
                        let error_text = response.text().await.unwrap_or_default();
                        warn!(status = %status, attempt, "Retryable OpenAI error");
                        last_error = Some(format!("HTTP {status}: {error_text}"));
                        continue;
                    }

                    let error_text = response.text().await.unwrap_or_default();
                    anyhow::bail!("OpenAI API error {status}: {error_text}");
                }
                Err(e) => {
                    last_error = Some(format!("Request error: {e}"));
                    continue;
                }
            }
        }

        anyhow::bail!(
            "OpenAI API failed after {MAX_RETRIES} retries: {}",
            last_error.unwrap_or_default()
        )
    }

    pub fn cumulative_cost(&self) -> f64 {
        self.total_cost.load(std::sync::atomic::Ordering::Relaxed) as f64 / 1_000_000.0
    }

    pub fn total_calls(&self) -> u64 {
        self.total_calls.load(std::sync::atomic::Ordering::Relaxed)
    }
}

#[async_trait]
impl AdvisoryService for OpenAiAdvisor {
    async fn assess(&self, summary: &OpportunitySummary) -> Result<Assessment> {
        let prompt = Self::build_prompt(summary);

        debug!(route = %summary.route, model = %self.model, "Requesting advisory assessment");

        let (response_text, tokens, cost) = self.call_api(&prompt).await?;
        let (score, narrative) = Self::parse_assessment(&response_text)?;

        Ok(Assessment {
            score,
            narrative,
            tokens_used: tokens,
            cost,
        })
    }

    fn model_name(&self) -> String {
        self.model.clone()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_client_construction() {
        let advisor = OpenAiAdvisor::new("test-key".to_string().into(), None, None).unwrap();
        assert_eq!(advisor.model_name(), DEFAULT_MODEL);
        assert_eq!(advisor.cumulative_cost(), 0.0);
    }

    #[test]
    fn test_client_custom_model() {
        let advisor =
            OpenAiAdvisor::new("key".to_string().into(), Some("gpt-4-turbo".into()), Some(2048))
                .unwrap();
        assert_eq!(advisor.model_name(), "gpt-4-turbo");
    }

    #[test]
    fn test_parse_assessment_score_line() {
        let (score, narrative) =
            OpenAiAdvisor::parse_assessment("SCORE: 0.82\nLooks solid: deep liquidity both sides.")
                .unwrap();
        assert!((score - 0.82).abs() < 1e-10);
        assert!(narrative.contains("deep liquidity"));
    }

    #[test]
    fn test_parse_assessment_clamps_out_of_range() {
        let (score, _) = OpenAiAdvisor::parse_assessment("SCORE: 1.4\nover-eager").unwrap();
        assert_eq!(score, 1.0);
        let (score, _) = OpenAiAdvisor::parse_assessment("SCORE: -0.2\nhmm").unwrap();
        assert_eq!(score, 0.0);
    }

    #[test]
    fn test_parse_assessment_score_not_on_first_line() {
        let text = "Assessment follows.\nSCORE: 0.55\nMiddling conviction.";
        let (score, _) = OpenAiAdvisor::parse_assessment(text).unwrap();
        assert!((score - 0.55).abs() < 1e-10);
    }

    #[test]
    fn test_parse_assessment_missing_score_errors() {
        assert!(OpenAiAdvisor::parse_assessment("no score here at all").is_err());
        assert!(OpenAiAdvisor::parse_assessment("SCORE: not-a-number").is_err());
    }

    #[test]
    fn test_prompt_includes_route_and_amounts() {
        let summary = crate::types::OpportunitySummary {
            route: "ethereum (uniswap) -> polygon (quickswap)".into(),
            pair: "WETH/USDT".into(),
            profit_pct: dec!(2.45),
            estimated_profit_usd: dec!(24.50),
            required_capital_usd: dec!(1000),
            cross_chain: true,
        };
        let prompt = OpenAiAdvisor::build_prompt(&summary);
        assert!(prompt.contains("ethereum (uniswap) -> polygon (quickswap)"));
        assert!(prompt.contains("$24.50"));
        assert!(prompt.contains("2.45%"));
        assert!(prompt.contains("Cross-chain: yes"));
    }
}
