//! Venue integrations.
//!
//! Defines the `Venue` trait and provides implementations for:
//! - HTTP quote/order endpoints (per-venue RPC gateways)
//! - A deterministic in-process simulator for keyless/dry-run operation
//!
//! A venue is a trading platform on a specific chain capable of quoting and
//! executing a token-pair trade. The scanner only uses `quote`; the
//! execution coordinator uses `buy` and `sell`.

pub mod http;
pub mod simulated;

use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::types::{Chain, TokenPair, VenueQuote, VenueReceipt};

/// Abstraction over trading venues.
///
/// Every method that touches the network carries an explicit timeout in its
/// implementation; callers additionally bound quote calls per scan cycle.
#[async_trait]
pub trait Venue: Send + Sync {
    /// Current price and gas estimate for a token pair.
    async fn quote(&self, pair: &TokenPair) -> Result<VenueQuote>;

    /// Buy base tokens with `capital` quote currency.
    /// Returns the amount of base received after realized slippage.
    async fn buy(&self, pair: &TokenPair, capital: Decimal) -> Result<VenueReceipt>;

    /// Sell `amount` base tokens for quote currency.
    /// Returns the proceeds after realized slippage.
    async fn sell(&self, pair: &TokenPair, amount: Decimal) -> Result<VenueReceipt>;

    /// Whether this venue lists the pair. An unsupported pair yields no
    /// opportunity for the combination — it is not an error.
    fn supports(&self, pair: &TokenPair) -> bool;

    /// The chain this venue trades on.
    fn chain(&self) -> Chain;

    /// Venue name for logging and identification.
    fn name(&self) -> &str;
}
