//! Cross-chain bridging service.
//!
//! Defines the `BridgeService` trait and provides an HTTP gateway client
//! plus a deterministic simulator (0.5% fee) for keyless operation. The
//! concrete bridge protocol is out of scope — only the transfer contract
//! (sent amount, received amount, reference id, failure mode) is
//! load-bearing here.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use std::time::Duration;
use tracing::debug;

use crate::types::{BridgeReceipt, Chain};

/// Abstraction over value transfer between chains.
#[async_trait]
pub trait BridgeService: Send + Sync {
    /// Transfer `amount` of `token` from one chain to another.
    /// The received amount is net of the bridge fee.
    async fn transfer(
        &self,
        from: Chain,
        to: Chain,
        token: &str,
        amount: Decimal,
    ) -> Result<BridgeReceipt>;

    fn name(&self) -> &str;
}

// ---------------------------------------------------------------------------
// HTTP gateway client
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct TransferRequest<'a> {
    from_chain: String,
    to_chain: String,
    token: &'a str,
    amount: Decimal,
}

#[derive(Debug, Deserialize)]
struct TransferResponse {
    reference_id: String,
    received_amount: Decimal,
}

pub struct HttpBridge {
    http: Client,
    base_url: String,
    name: String,
}

impl HttpBridge {
    pub fn new(name: &str, base_url: &str, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build bridge HTTP client")?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            name: name.to_string(),
        })
    }
}

#[async_trait]
impl BridgeService for HttpBridge {
    async fn transfer(
        &self,
        from: Chain,
        to: Chain,
        token: &str,
        amount: Decimal,
    ) -> Result<BridgeReceipt> {
        let request = TransferRequest {
            from_chain: from.to_string(),
            to_chain: to.to_string(),
            token,
            amount,
        };

        debug!(bridge = %self.name, %from, %to, %amount, token, "Submitting transfer");

        // No retry here: a bridge submission is not idempotent and a blind
        // resubmit risks double-spending the transferred amount.
        let response = self
            .http
            .post(format!("{}/transfers", self.base_url))
            .json(&request)
            .send()
            .await
            .with_context(|| format!("Bridge transfer request to {} failed", self.name))?
            .error_for_status()
            .with_context(|| format!("Bridge {} returned error status", self.name))?;

        let body: TransferResponse = response
            .json()
            .await
            .context("Failed to parse transfer response")?;

        Ok(BridgeReceipt {
            reference_id: body.reference_id,
            sent: amount,
            received: body.received_amount,
            executed_at: Utc::now(),
        })
    }

    fn name(&self) -> &str {
        &self.name
    }
}

// ---------------------------------------------------------------------------
// Simulated bridge
// ---------------------------------------------------------------------------

/// Fraction of value retained through a simulated transfer (0.5% fee).
const TRANSFER_FACTOR: Decimal = dec!(0.995);

pub struct SimulatedBridge {
    fee_factor: Decimal,
    latency: Duration,
    force_error: Mutex<Option<String>>,
}

impl Default for SimulatedBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedBridge {
    pub fn new() -> Self {
        Self {
            fee_factor: TRANSFER_FACTOR,
            latency: Duration::ZERO,
            force_error: Mutex::new(None),
        }
    }

    pub fn with_fee_pct(mut self, fee_pct: Decimal) -> Self {
        self.fee_factor = Decimal::ONE - fee_pct / dec!(100);
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Force all subsequent transfers to fail.
    pub fn set_error(&self, msg: &str) {
        *self.force_error.lock().unwrap() = Some(msg.to_string());
    }

    pub fn clear_error(&self) {
        *self.force_error.lock().unwrap() = None;
    }
}

#[async_trait]
impl BridgeService for SimulatedBridge {
    async fn transfer(
        &self,
        from: Chain,
        to: Chain,
        token: &str,
        amount: Decimal,
    ) -> Result<BridgeReceipt> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if let Some(err) = self.force_error.lock().unwrap().as_ref() {
            return Err(anyhow!("{}", err));
        }
        if from == to {
            return Err(anyhow!("transfer {from} -> {to} is not cross-chain"));
        }
        if amount <= Decimal::ZERO {
            return Err(anyhow!("transfer amount must be positive"));
        }
        let _ = token;

        Ok(BridgeReceipt {
            reference_id: format!("bridge-{}", uuid::Uuid::new_v4()),
            sent: amount,
            received: amount * self.fee_factor,
            executed_at: Utc::now(),
        })
    }

    fn name(&self) -> &str {
        "simulated-bridge"
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
