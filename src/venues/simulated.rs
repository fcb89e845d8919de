//! Deterministic in-process venue.
//!
//! The default keyless mode: quotes come from a configurable price table and
//! executions fill with a fixed slippage haircut, so the whole pipeline runs
//! end-to-end with no credentials and no network. Also the workhorse of the
//! integration tests, which control prices and force failures per venue.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use super::Venue;
use crate::types::{Chain, TokenPair, VenueQuote, VenueReceipt};

/// Fraction of value retained through a simulated fill (1% slippage).
const FILL_FACTOR: Decimal = dec!(0.99);

pub struct SimulatedVenue {
    name: String,
    chain: Chain,
    prices: Mutex<HashMap<TokenPair, Decimal>>,
    gas_estimate_usd: Decimal,
    /// Artificial latency per call, for cancellation-timing tests.
    latency: Duration,
    /// If set, all operations will return this error.
    force_error: Mutex<Option<String>>,
}

impl SimulatedVenue {
    pub fn new(
        name: &str,
        chain: Chain,
        prices: HashMap<TokenPair, Decimal>,
        gas_estimate_usd: Decimal,
    ) -> Self {
        Self {
            name: name.to_string(),
            chain,
            prices: Mutex::new(prices),
            gas_estimate_usd,
            latency: Duration::ZERO,
            force_error: Mutex::new(None),
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Force all subsequent operations to return an error.
    pub fn set_error(&self, msg: &str) {
        *self.force_error.lock().unwrap() = Some(msg.to_string());
    }

    /// Clear any forced error.
    pub fn clear_error(&self) {
        *self.force_error.lock().unwrap() = None;
    }

    /// Move the simulated price for a pair.
    pub fn set_price(&self, pair: TokenPair, price: Decimal) {
        self.prices.lock().unwrap().insert(pair, price);
    }

    fn check_error(&self) -> Result<()> {
        if let Some(err) = self.force_error.lock().unwrap().as_ref() {
            return Err(anyhow!("{}", err));
        }
        Ok(())
    }

    fn price_of(&self, pair: &TokenPair) -> Result<Decimal> {
        self.prices
            .lock()
            .unwrap()
            .get(pair)
            .copied()
            .ok_or_else(|| anyhow!("Pair {pair} not listed on {}", self.name))
    }
}

#[async_trait]
impl Venue for SimulatedVenue {
    async fn quote(&self, pair: &TokenPair) -> Result<VenueQuote> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.check_error()?;
        Ok(VenueQuote {
            price: self.price_of(pair)?,
            gas_estimate_usd: self.gas_estimate_usd,
            fetched_at: Utc::now(),
        })
    }

    async fn buy(&self, pair: &TokenPair, capital: Decimal) -> Result<VenueReceipt> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.check_error()?;
        if capital <= Decimal::ZERO {
            return Err(anyhow!("buy amount must be positive"));
        }
        let price = self.price_of(pair)?;
        Ok(VenueReceipt {
            reference_id: format!("sim-{}", uuid::Uuid::new_v4()),
            requested: capital,
            received: capital / price * FILL_FACTOR,
            fill_price: price,
            executed_at: Utc::now(),
        })
    }

    async fn sell(&self, pair: &TokenPair, amount: Decimal) -> Result<VenueReceipt> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.check_error()?;
        if amount <= Decimal::ZERO {
            return Err(anyhow!("sell amount must be positive"));
        }
        let price = self.price_of(pair)?;
        Ok(VenueReceipt {
            reference_id: format!("sim-{}", uuid::Uuid::new_v4()),
            requested: amount,
            received: amount * price * FILL_FACTOR,
            fill_price: price,
            executed_at: Utc::now(),
        })
    }

    fn supports(&self, pair: &TokenPair) -> bool {
        self.prices.lock().unwrap().contains_key(pair)
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
