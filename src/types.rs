//! Shared types for the SPANNER agent.
//!
//! These types form the data model used across all modules: chains, token
//! pairs, detected opportunities, trade execution records, and the session
//! statistics consumed by the dashboard. They are designed to be stable so
//! that venue, engine, and registry modules can depend on them without
//! circular references.
//!
//! All money amounts are `rust_decimal::Decimal` in USD (or token units
//! where noted); confidence scores are `f64` in [0, 1].

use chrono::{DateTime, Duration, Utc};
use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::error::{EngineError, EngineResult};

/// Convert an `f64` to a `Decimal`, truncating on pathological inputs.
/// Test and config convenience only — hot paths stay in `Decimal`.
pub fn d(v: f64) -> Decimal {
    Decimal::from_f64_retain(v).unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Chain
// ---------------------------------------------------------------------------

/// A supported blockchain network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Chain {
    Ethereum,
    Bsc,
    Polygon,
    Avalanche,
}

impl Chain {
    /// All known chains (useful for iteration).
    pub const ALL: &'static [Chain] = &[
        Chain::Ethereum,
        Chain::Bsc,
        Chain::Polygon,
        Chain::Avalanche,
    ];
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Chain::Ethereum => write!(f, "ethereum"),
            Chain::Bsc => write!(f, "bsc"),
            Chain::Polygon => write!(f, "polygon"),
            Chain::Avalanche => write!(f, "avalanche"),
        }
    }
}

impl std::str::FromStr for Chain {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ethereum" | "eth" => Ok(Chain::Ethereum),
            "bsc" | "binance" => Ok(Chain::Bsc),
            "polygon" | "matic" => Ok(Chain::Polygon),
            "avalanche" | "avax" => Ok(Chain::Avalanche),
            _ => Err(anyhow::anyhow!("Unknown chain: {s}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Token pair
// ---------------------------------------------------------------------------

/// An ordered token pair, e.g. WETH/USDT: `base` is acquired and bridged,
/// `quote` is the funding and settlement currency.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TokenPair {
    pub base: String,
    pub quote: String,
}

impl TokenPair {
    /// Build a validated pair. Both symbols must be non-empty and distinct.
    pub fn new(base: &str, quote: &str) -> EngineResult<Self> {
        if base.trim().is_empty() || quote.trim().is_empty() {
            return Err(EngineError::Malformed {
                reason: "token pair symbols must be non-empty".into(),
            });
        }
        if base.eq_ignore_ascii_case(quote) {
            return Err(EngineError::Malformed {
                reason: format!("token pair {base}/{quote} is degenerate"),
            });
        }
        Ok(Self {
            base: base.trim().to_uppercase(),
            quote: quote.trim().to_uppercase(),
        })
    }
}

impl fmt::Display for TokenPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.base, self.quote)
    }
}

impl std::str::FromStr for TokenPair {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (base, quote) = s
            .split_once('/')
            .ok_or_else(|| anyhow::anyhow!("Token pair must be BASE/QUOTE, got: {s}"))?;
        Ok(TokenPair::new(base, quote)?)
    }
}

// ---------------------------------------------------------------------------
// Quotes & receipts
// ---------------------------------------------------------------------------

/// A price observation from a single venue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VenueQuote {
    /// Price of one base unit in quote currency.
    pub price: Decimal,
    /// Estimated gas cost of one trade on this venue, USD.
    pub gas_estimate_usd: Decimal,
    pub fetched_at: DateTime<Utc>,
}

/// Receipt returned by a venue after a buy or sell leg fills.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VenueReceipt {
    pub reference_id: String,
    /// Amount submitted (quote currency for buys, base units for sells).
    pub requested: Decimal,
    /// Amount received after realized slippage and venue fees.
    pub received: Decimal,
    pub fill_price: Decimal,
    pub executed_at: DateTime<Utc>,
}

/// Receipt returned by the bridging service after a transfer settles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeReceipt {
    pub reference_id: String,
    pub sent: Decimal,
    /// Amount received on the destination chain after the bridge fee.
    pub received: Decimal,
    pub executed_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Execution plan
// ---------------------------------------------------------------------------

/// One step of a multi-leg execution plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum ExecutionStep {
    Acquire { chain: Chain, venue: String },
    Bridge { from: Chain, to: Chain },
    Dispose { chain: Chain, venue: String },
}

impl fmt::Display for ExecutionStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionStep::Acquire { chain, venue } => write!(f, "acquire on {venue}@{chain}"),
            ExecutionStep::Bridge { from, to } => write!(f, "bridge {from} -> {to}"),
            ExecutionStep::Dispose { chain, venue } => write!(f, "dispose on {venue}@{chain}"),
        }
    }
}

/// Which leg of a trade an event refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LegKind {
    Acquire,
    Bridge,
    Dispose,
}

impl fmt::Display for LegKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LegKind::Acquire => write!(f, "acquire"),
            LegKind::Bridge => write!(f, "bridge"),
            LegKind::Dispose => write!(f, "dispose"),
        }
    }
}

// ---------------------------------------------------------------------------
// Fingerprint
// ---------------------------------------------------------------------------

/// Deduplication key identifying "the same" opportunity across scan cycles:
/// (source chain, target chain, pair, source-price bucket). Also the key the
/// coordinator and registry use to enforce at-most-one in-flight execution.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Derive a fingerprint. `bucket_width` is the price bucket size in the
    /// quote currency; prices in the same bucket collapse to one key so an
    /// unchanged discrepancy keeps a stable fingerprint across cycles.
    pub fn derive(
        source_chain: Chain,
        target_chain: Chain,
        pair: &TokenPair,
        source_price: Decimal,
        bucket_width: Decimal,
    ) -> Self {
        let width = if bucket_width > Decimal::ZERO {
            bucket_width
        } else {
            dec!(0.5)
        };
        let bucket = (source_price / width).floor().to_i64().unwrap_or(0);
        Fingerprint(format!("{source_chain}->{target_chain}:{pair}:{bucket}"))
    }

    /// Reconstruct a fingerprint from its string form (dashboard cancel path).
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Fingerprint(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Risk result
// ---------------------------------------------------------------------------

/// Outcome of risk evaluation for one opportunity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskResult {
    pub accept: bool,
    /// Combined confidence score in [0, 1].
    pub score: f64,
    /// Human-readable gate and advisory outcomes, in evaluation order.
    pub reasons: Vec<String>,
    pub evaluated_at: DateTime<Utc>,
}

/// Compact opportunity description handed to the advisory service.
#[derive(Debug, Clone, Serialize)]
pub struct OpportunitySummary {
    pub route: String,
    pub pair: String,
    pub profit_pct: Decimal,
    pub estimated_profit_usd: Decimal,
    pub required_capital_usd: Decimal,
    pub cross_chain: bool,
}

// ---------------------------------------------------------------------------
// Opportunity
// ---------------------------------------------------------------------------

/// Cost inputs for net-profit computation at detection time.
#[derive(Debug, Clone, Copy)]
pub struct CostEstimate {
    pub source_gas_usd: Decimal,
    pub target_gas_usd: Decimal,
    /// Bridge fee as a percentage of capital; applied only cross-chain.
    pub bridge_fee_pct: Decimal,
    /// Estimated slippage as a percentage of capital at this trade size.
    pub slippage_pct: Decimal,
}

/// A detected price discrepancy between two venues.
///
/// Profit fields are derived from the price inputs in [`Opportunity::detect`]
/// and are never set independently; re-evaluation at new prices produces a
/// new `Opportunity`. The value is immutable once handed to the coordinator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Opportunity {
    pub id: String,
    pub source_chain: Chain,
    pub source_venue: String,
    pub target_chain: Chain,
    pub target_venue: String,
    pub pair: TokenPair,
    pub source_price: Decimal,
    pub target_price: Decimal,
    /// Net profit as a percentage of required capital (derived).
    pub profit_pct: Decimal,
    /// Net profit in quote currency (derived).
    pub estimated_profit_usd: Decimal,
    pub required_capital_usd: Decimal,
    /// Ordered execution plan: acquire, bridge (cross-chain only), dispose.
    pub plan: Vec<ExecutionStep>,
    pub gas_costs_usd: HashMap<Chain, Decimal>,
    pub discovered_at: DateTime<Utc>,
    /// Attached by the risk evaluator; never mutated afterwards.
    pub risk: Option<RiskResult>,
}

impl Opportunity {
    /// Construct an opportunity from raw price observations, computing the
    /// derived profit fields.
    ///
    /// Net profit = gross spread − source gas − target gas − bridge fee
    /// (cross-chain only) − estimated slippage, all in quote currency.
    #[allow(clippy::too_many_arguments)]
    pub fn detect(
        source_chain: Chain,
        source_venue: &str,
        target_chain: Chain,
        target_venue: &str,
        pair: TokenPair,
        source_price: Decimal,
        target_price: Decimal,
        required_capital_usd: Decimal,
        costs: CostEstimate,
    ) -> EngineResult<Self> {
        if required_capital_usd <= Decimal::ZERO {
            return Err(EngineError::Malformed {
                reason: format!("required capital must be positive, got {required_capital_usd}"),
            });
        }
        if source_price <= Decimal::ZERO || target_price <= Decimal::ZERO {
            return Err(EngineError::Malformed {
                reason: "prices must be positive".into(),
            });
        }
        if source_chain == target_chain && source_venue == target_venue {
            return Err(EngineError::Malformed {
                reason: "source and target venue are identical".into(),
            });
        }

        let cross_chain = source_chain != target_chain;
        let gross = required_capital_usd * (target_price - source_price) / source_price;
        let bridge_cost = if cross_chain {
            required_capital_usd * costs.bridge_fee_pct / dec!(100)
        } else {
            Decimal::ZERO
        };
        let slippage_cost = required_capital_usd * costs.slippage_pct / dec!(100);
        let net = gross - costs.source_gas_usd - costs.target_gas_usd - bridge_cost - slippage_cost;
        let profit_pct = net / required_capital_usd * dec!(100);

        let mut gas_costs_usd = HashMap::new();
        *gas_costs_usd.entry(source_chain).or_insert(Decimal::ZERO) += costs.source_gas_usd;
        *gas_costs_usd.entry(target_chain).or_insert(Decimal::ZERO) += costs.target_gas_usd;

        let mut plan = vec![ExecutionStep::Acquire {
            chain: source_chain,
            venue: source_venue.to_string(),
        }];
        if cross_chain {
            plan.push(ExecutionStep::Bridge {
                from: source_chain,
                to: target_chain,
            });
        }
        plan.push(ExecutionStep::Dispose {
            chain: target_chain,
            venue: target_venue.to_string(),
        });

        Ok(Self {
            id: uuid::Uuid::new_v4().to_string(),
            source_chain,
            source_venue: source_venue.to_string(),
            target_chain,
            target_venue: target_venue.to_string(),
            pair,
            source_price,
            target_price,
            profit_pct,
            estimated_profit_usd: net,
            required_capital_usd,
            plan,
            gas_costs_usd,
            discovered_at: Utc::now(),
            risk: None,
        })
    }

    pub fn is_cross_chain(&self) -> bool {
        self.source_chain != self.target_chain
    }

    /// Sum of gas estimates across all legs, USD.
    pub fn total_gas_usd(&self) -> Decimal {
        self.gas_costs_usd.values().copied().sum()
    }

    /// Price data older than the staleness window is invalid and must be
    /// dropped, never executed.
    pub fn is_stale(&self, window: Duration) -> bool {
        Utc::now() - self.discovered_at > window
    }

    pub fn age(&self) -> Duration {
        Utc::now() - self.discovered_at
    }

    pub fn fingerprint(&self, bucket_width: Decimal) -> Fingerprint {
        Fingerprint::derive(
            self.source_chain,
            self.target_chain,
            &self.pair,
            self.source_price,
            bucket_width,
        )
    }

    /// Annotate with a risk evaluation, consuming self. The evaluator
    /// annotates; it never rewrites the detected fields.
    pub fn with_risk(mut self, risk: RiskResult) -> Self {
        self.risk = Some(risk);
        self
    }

    pub fn summary(&self) -> OpportunitySummary {
        OpportunitySummary {
            route: format!(
                "{} ({}) -> {} ({})",
                self.source_chain, self.source_venue, self.target_chain, self.target_venue
            ),
            pair: self.pair.to_string(),
            profit_pct: self.profit_pct,
            estimated_profit_usd: self.estimated_profit_usd,
            required_capital_usd: self.required_capital_usd,
            cross_chain: self.is_cross_chain(),
        }
    }
}

impl fmt::Display for Opportunity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}@{} -> {}@{} | net ${:.2} ({:.2}%) on ${:.0}",
            self.pair,
            self.source_venue,
            self.source_chain,
            self.target_venue,
            self.target_chain,
            self.estimated_profit_usd,
            self.profit_pct,
            self.required_capital_usd,
        )
    }
}

// ---------------------------------------------------------------------------
// Trade state machine
// ---------------------------------------------------------------------------

/// Lifecycle state of a trade.
///
/// `Pending -> Acquiring -> Acquired -> Bridging -> Bridged -> Disposing ->
/// Settled` (the bridge pair is skipped for single-chain routes). `Failed`
/// is reachable from any non-terminal state. `Cancelled` only before the
/// disposal leg has started, and never through an in-flight leg.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeState {
    Pending,
    Acquiring,
    Acquired,
    Bridging,
    Bridged,
    Disposing,
    Settled,
    Failed,
    Cancelled,
}

impl TradeState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TradeState::Settled | TradeState::Failed | TradeState::Cancelled
        )
    }

    /// States from which a user cancellation may be applied.
    pub fn cancellable(&self) -> bool {
        matches!(
            self,
            TradeState::Pending | TradeState::Acquired | TradeState::Bridged
        )
    }

    pub fn can_transition_to(&self, next: TradeState) -> bool {
        use TradeState::*;
        if self.is_terminal() {
            return false;
        }
        match (self, next) {
            (_, Failed) => true,
            (Pending, Acquiring) => true,
            // Disposal-only recovery trades go straight to their sell leg.
            (Pending, Disposing) => true,
            (Acquiring, Acquired) => true,
            (Acquired, Bridging) | (Acquired, Disposing) => true,
            (Bridging, Bridged) => true,
            (Bridged, Disposing) => true,
            (Disposing, Settled) => true,
            (from, Cancelled) => from.cancellable(),
            _ => false,
        }
    }
}

impl fmt::Display for TradeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TradeState::Pending => "pending",
            TradeState::Acquiring => "acquiring",
            TradeState::Acquired => "acquired",
            TradeState::Bridging => "bridging",
            TradeState::Bridged => "bridged",
            TradeState::Disposing => "disposing",
            TradeState::Settled => "settled",
            TradeState::Failed => "failed",
            TradeState::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// Trade
// ---------------------------------------------------------------------------

/// Result of one completed leg.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LegResult {
    pub kind: LegKind,
    pub chain: Chain,
    /// Venue name for acquire/dispose; None for bridge legs.
    pub venue: Option<String>,
    pub requested: Decimal,
    pub received: Decimal,
    pub reference_id: String,
    pub completed_at: DateTime<Utc>,
}

/// Capital held in an intermediate token/chain after a failed or cancelled
/// leg, pending manual or explicit recovery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrandedPosition {
    pub chain: Chain,
    pub token: String,
    pub amount: Decimal,
}

impl fmt::Display for StrandedPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} on {}", self.amount, self.token, self.chain)
    }
}

/// The execution record for an accepted opportunity.
///
/// Created by the coordinator, mutated only by the coordinator as legs
/// complete, immutable once terminal and moved to history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub id: String,
    pub fingerprint: Fingerprint,
    pub opportunity: Opportunity,
    pub state: TradeState,
    pub legs: Vec<LegResult>,
    pub stranded: Option<StrandedPosition>,
    /// Proceeds − original required capital; known only once disposed.
    pub realized_profit_usd: Option<Decimal>,
    pub error: Option<String>,
    pub cancel_requested: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Trade {
    pub fn new(opportunity: Opportunity, fingerprint: Fingerprint) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            fingerprint,
            opportunity,
            state: TradeState::Pending,
            legs: Vec::new(),
            stranded: None,
            realized_profit_usd: None,
            error: None,
            cancel_requested: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply a state transition, rejecting anything the state machine
    /// does not allow.
    pub fn transition(&mut self, next: TradeState) -> EngineResult<()> {
        if !self.state.can_transition_to(next) {
            return Err(EngineError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Record a completed leg, enforcing the value-conservation invariants:
    /// a leg can never put more value in flight than the previous leg
    /// returned, and a bridge transfer only sheds value (fees). Disposal
    /// proceeds are denominated in the quote currency and are not bounded
    /// by token units.
    pub fn record_leg(&mut self, leg: LegResult) -> EngineResult<()> {
        if let Some(prev) = self.legs.last() {
            if leg.requested > prev.received {
                return Err(EngineError::LegFailure {
                    leg: leg.kind,
                    message: format!(
                        "leg requested {} exceeds prior received {}",
                        leg.requested, prev.received
                    ),
                });
            }
        }
        if leg.kind == LegKind::Bridge && leg.received > leg.requested {
            return Err(EngineError::LegFailure {
                leg: leg.kind,
                message: format!(
                    "bridge received {} exceeds sent {}",
                    leg.received, leg.requested
                ),
            });
        }
        self.legs.push(leg);
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Amount produced by the most recent leg, if any.
    pub fn last_received(&self) -> Option<Decimal> {
        self.legs.last().map(|l| l.received)
    }

    /// Terminal failure: stop further legs, record which leg failed and the
    /// raw error, preserve the last-known-good position for recovery.
    pub fn fail(&mut self, leg: LegKind, error: &str, stranded: Option<StrandedPosition>) {
        self.error = Some(
            EngineError::LegFailure {
                leg,
                message: error.to_string(),
            }
            .to_string(),
        );
        self.stranded = stranded;
        self.state = TradeState::Failed;
        self.updated_at = Utc::now();
    }

    /// Terminal success: realized profit is proceeds − original capital,
    /// not the detection-time estimate.
    pub fn settle(&mut self, proceeds_usd: Decimal) -> EngineResult<()> {
        self.transition(TradeState::Settled)?;
        self.realized_profit_usd = Some(proceeds_usd - self.opportunity.required_capital_usd);
        Ok(())
    }

    /// Terminal cancellation. Any tokens already acquired or bridged are
    /// recorded as a held position for reconciliation.
    pub fn cancel(&mut self, held: Option<StrandedPosition>) -> EngineResult<()> {
        self.transition(TradeState::Cancelled)?;
        self.stranded = held;
        Ok(())
    }
}

impl fmt::Display for Trade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} {} (legs: {}{})",
            self.state,
            self.opportunity.pair,
            self.fingerprint,
            self.legs.len(),
            self.stranded
                .as_ref()
                .map(|s| format!(", stranded: {s}"))
                .unwrap_or_default(),
        )
    }
}

// ---------------------------------------------------------------------------
// Session statistics
// ---------------------------------------------------------------------------

/// Rolling counters for the current process lifetime, consumed by the
/// dashboard and the shutdown summary.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineStats {
    pub cycles_run: u64,
    pub quotes_fetched: u64,
    pub quote_failures: u64,
    pub opportunities_found: u64,
    pub opportunities_approved: u64,
    pub trades_settled: u64,
    pub trades_failed: u64,
    pub trades_cancelled: u64,
    pub total_realized_profit_usd: Decimal,
}

impl EngineStats {
    /// Settled / (settled + failed), 0.0 with no completed trades.
    pub fn success_rate(&self) -> f64 {
        let done = self.trades_settled + self.trades_failed;
        if done == 0 {
            return 0.0;
        }
        self.trades_settled as f64 / done as f64
    }

    pub fn avg_profit_per_trade(&self) -> Decimal {
        if self.trades_settled == 0 {
            return Decimal::ZERO;
        }
        self.total_realized_profit_usd / Decimal::from(self.trades_settled)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
