//! HTTP venue client.
//!
//! Talks to a per-venue quote/order gateway over JSON. The wire format is
//! the narrow boundary this crate owns: `GET /quote?pair=` and
//! `POST /orders`; everything venue-specific lives behind the gateway.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use super::Venue;
use crate::types::{Chain, TokenPair, VenueQuote, VenueReceipt};

const MAX_RETRIES: u32 = 2;
const BASE_BACKOFF_MS: u64 = 250;

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct QuoteResponse {
    price: Decimal,
    #[serde(default)]
    gas_estimate_usd: Decimal,
}

#[derive(Debug, Serialize)]
struct OrderRequest<'a> {
    pair: String,
    side: &'a str,
    amount: Decimal,
}

#[derive(Debug, Deserialize)]
struct OrderResponse {
    reference_id: String,
    received: Decimal,
    fill_price: Decimal,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct HttpVenue {
    http: Client,
    base_url: String,
    name: String,
    chain: Chain,
    pairs: Vec<TokenPair>,
}

impl HttpVenue {
    pub fn new(
        name: &str,
        chain: Chain,
        base_url: &str,
        pairs: Vec<TokenPair>,
        timeout: Duration,
    ) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build venue HTTP client")?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            name: name.to_string(),
            chain,
            pairs,
        })
    }

    /// POST an order with bounded retry on retryable statuses (429/5xx).
    /// Client errors are surfaced immediately — a rejected order must not
    /// be resubmitted blindly.
    async fn submit_order(&self, pair: &TokenPair, side: &str, amount: Decimal) -> Result<OrderResponse> {
        let request = OrderRequest {
            pair: pair.to_string(),
            side,
            amount,
        };
        let url = format!("{}/orders", self.base_url);

        let mut last_error = None;

        for attempt in 0..=MAX_RETRIES {
            if attempt > 0 {
                let delay = BASE_BACKOFF_MS * 2u64.pow(attempt - 1);
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }

            let resp = self.http.post(&url).json(&request).send().await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        return response
                            .json::<OrderResponse>()
                            .await
                            .context("Failed to parse order response");
                    }

                    if status.as_u16() == 429 || status.as_u16() >= 500 {
                        let error_text = response.text().await.unwrap_or_default();
                        warn!(venue = %self.name, status = %status, attempt, "Retryable venue error");
                        last_error = Some(format!("HTTP {status}: {error_text}"));
                        continue;
                    }

                    let error_text = response.text().await.unwrap_or_default();
                    anyhow::bail!("Venue {} rejected order ({status}): {error_text}", self.name);
                }
                Err(e) => {
                    last_error = Some(format!("Request error: {e}"));
                    continue;
                }
            }
        }

        anyhow::bail!(
            "Venue {} order failed after {MAX_RETRIES} retries: {}",
            self.name,
            last_error.unwrap_or_default()
        )
    }
}

#[async_trait]
impl Venue for HttpVenue {
    async fn quote(&self, pair: &TokenPair) -> Result<VenueQuote> {
        let url = format!(
            "{}/quote?pair={}",
            self.base_url,
            urlencoding::encode(&pair.to_string())
        );

        debug!(venue = %self.name, chain = %self.chain, %pair, "Fetching quote");

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .with_context(|| format!("Quote request to {} failed", self.name))?
            .error_for_status()
            .with_context(|| format!("Quote from {} returned error status", self.name))?;

        let body: QuoteResponse = response
            .json()
            .await
            .context("Failed to parse quote response")?;

        Ok(VenueQuote {
            price: body.price,
            gas_estimate_usd: body.gas_estimate_usd,
            fetched_at: Utc::now(),
        })
    }

    async fn buy(&self, pair: &TokenPair, capital: Decimal) -> Result<VenueReceipt> {
        let order = self.submit_order(pair, "buy", capital).await?;
        Ok(VenueReceipt {
            reference_id: order.reference_id,
            requested: capital,
            received: order.received,
            fill_price: order.fill_price,
            executed_at: Utc::now(),
        })
    }

    async fn sell(&self, pair: &TokenPair, amount: Decimal) -> Result<VenueReceipt> {
        let order = self.submit_order(pair, "sell", amount).await?;
        Ok(VenueReceipt {
            reference_id: order.reference_id,
            requested: amount,
            received: order.received,
            fill_price: order.fill_price,
            executed_at: Utc::now(),
        })
    }

    fn supports(&self, pair: &TokenPair) -> bool {
        self.pairs.contains(pair)
    }

    fn chain(&self) -> Chain {
        self.chain
    }

    fn name(&self) -> &str {
        &self.name
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
