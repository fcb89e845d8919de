//! Execution coordinator.
//!
//! Drives the three-leg state machine for an accepted opportunity:
//! acquire on the source venue, bridge cross-chain, dispose on the target
//! venue. The legs are not atomic; every failure mode is handled
//! explicitly and leaves a reconcilable record.
//!
//! Guarantees enforced here:
//! - at most one in-flight trade per fingerprint (with the registry's
//!   atomic check-and-insert as the enforcement point),
//! - a counting admission gate bounds concurrent executions,
//! - stale opportunities are rejected, never executed,
//! - a failed leg stops all subsequent legs and records the last-known-good
//!   amount and its location,
//! - cancellation applies only at leg boundaries; a submitted leg is always
//!   awaited to its outcome first,
//! - no automatic cross-leg retry — recovery of a stranded position is the
//!   explicit [`ExecutionCoordinator::recover`] operation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::bridge::BridgeService;
use crate::config::RuntimeSettings;
use crate::error::{EngineError, EngineResult};
use crate::registry::Registry;
use crate::types::{
    Chain, Fingerprint, LegKind, LegResult, Opportunity, StrandedPosition, TokenPair, Trade,
    TradeState,
};
use crate::venues::Venue;

pub struct ExecutionCoordinator {
    venues: HashMap<(Chain, String), Arc<dyn Venue>>,
    bridge: Arc<dyn BridgeService>,
    registry: Arc<Registry>,
    /// Opportunities older than this are rejected outright.
    staleness_window: chrono::Duration,
    /// Timeout applied to each leg submission.
    leg_timeout: Duration,
    in_flight: AtomicUsize,
}

/// Decrements the admission counter when an execution finishes, however
/// it finishes.
struct AdmissionPermit<'a> {
    counter: &'a AtomicUsize,
}

impl Drop for AdmissionPermit<'_> {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::Release);
    }
}

impl ExecutionCoordinator {
    pub fn new(
        venues: Vec<Arc<dyn Venue>>,
        bridge: Arc<dyn BridgeService>,
        registry: Arc<Registry>,
        staleness_window: chrono::Duration,
        leg_timeout: Duration,
    ) -> Self {
        let venues = venues
            .into_iter()
            .map(|v| ((v.chain(), v.name().to_string()), v))
            .collect();
        Self {
            venues,
            bridge,
            registry,
            staleness_window,
            leg_timeout,
            in_flight: AtomicUsize::new(0),
        }
    }

    /// Execute an accepted opportunity end to end.
    ///
    /// Returns the terminal `Trade` record — including failed and cancelled
    /// outcomes, which are results, not errors. `Err` is reserved for
    /// requests that never started a trade: stale data, duplicate
    /// in-flight fingerprints, and admission-gate rejections.
    pub async fn execute(
        &self,
        opportunity: Opportunity,
        settings: &RuntimeSettings,
    ) -> EngineResult<Trade> {
        if opportunity.is_stale(self.staleness_window) {
            return Err(EngineError::StaleOpportunity {
                age_secs: opportunity.age().num_seconds(),
                window_secs: self.staleness_window.num_seconds(),
            });
        }

        let fingerprint = opportunity.fingerprint(settings.price_bucket_width);
        let _permit = self.admit(settings.max_concurrent_executions)?;

        let mut trade = Trade::new(opportunity, fingerprint.clone());
        self.registry.begin_trade(trade.clone())?;
        info!(%fingerprint, trade_id = %trade.id, "Execution started");

        // Cancellation may already have landed between acceptance and start.
        if self.check_cancel(&fingerprint, &mut trade, None).await? {
            return Ok(trade);
        }

        let pair = trade.opportunity.pair.clone();
        let capital = trade.opportunity.required_capital_usd;
        let source_chain = trade.opportunity.source_chain;
        let target_chain = trade.opportunity.target_chain;

        // ---- Acquire ----------------------------------------------------
        // Failure here is the cheapest outcome: nothing irreversible has
        // happened and the capital is still un-deployed.

        trade.transition(TradeState::Acquiring)?;
        self.sync(&fingerprint, &trade);

        let source_venue =
            match self.venue_for(source_chain, &trade.opportunity.source_venue) {
                Some(v) => v,
                None => {
                    return self
                        .fail_trade(trade, LegKind::Acquire, "source venue not configured", None)
                        .await;
                }
            };

        let acquire = match tokio::time::timeout(
            self.leg_timeout,
            source_venue.buy(&pair, capital),
        )
        .await
        {
            Ok(Ok(receipt)) => receipt,
            Ok(Err(e)) => {
                return self
                    .fail_trade(trade, LegKind::Acquire, &e.to_string(), None)
                    .await;
            }
            Err(_) => {
                return self
                    .fail_trade(trade, LegKind::Acquire, "submission timed out", None)
                    .await;
            }
        };

        trade.record_leg(LegResult {
            kind: LegKind::Acquire,
            chain: source_chain,
            venue: Some(trade.opportunity.source_venue.clone()),
            requested: capital,
            received: acquire.received,
            reference_id: acquire.reference_id.clone(),
            completed_at: acquire.executed_at,
        })?;
        trade.transition(TradeState::Acquired)?;
        self.sync(&fingerprint, &trade);

        // From here on we hold real tokens somewhere.
        let mut held = StrandedPosition {
            chain: source_chain,
            token: pair.base.clone(),
            amount: acquire.received,
        };

        if self
            .check_cancel(&fingerprint, &mut trade, Some(held.clone()))
            .await?
        {
            return Ok(trade);
        }

        // ---- Bridge -----------------------------------------------------
        // The critical failure point: the capital is now in the acquired
        // token on the source chain and cannot be rolled back by reversing
        // the acquire (the price may have moved).

        if trade.opportunity.is_cross_chain() {
            trade.transition(TradeState::Bridging)?;
            self.sync(&fingerprint, &trade);

            let bridged = match tokio::time::timeout(
                self.leg_timeout,
                self.bridge
                    .transfer(source_chain, target_chain, &pair.base, held.amount),
            )
            .await
            {
                Ok(Ok(receipt)) => receipt,
                Ok(Err(e)) => {
                    return self
                        .fail_trade(trade, LegKind::Bridge, &e.to_string(), Some(held))
                        .await;
                }
                Err(_) => {
                    return self
                        .fail_trade(trade, LegKind::Bridge, "submission timed out", Some(held))
                        .await;
                }
            };

            trade.record_leg(LegResult {
                kind: LegKind::Bridge,
                chain: target_chain,
                venue: None,
                requested: bridged.sent,
                received: bridged.received,
                reference_id: bridged.reference_id.clone(),
                completed_at: bridged.executed_at,
            })?;
            trade.transition(TradeState::Bridged)?;
            self.sync(&fingerprint, &trade);

            held = StrandedPosition {
                chain: target_chain,
                token: pair.base.clone(),
                amount: bridged.received,
            };

            if self
                .check_cancel(&fingerprint, &mut trade, Some(held.clone()))
                .await?
            {
                return Ok(trade);
            }
        }

        // ---- Dispose ----------------------------------------------------

        trade.transition(TradeState::Disposing)?;
        self.sync(&fingerprint, &trade);

        let target_venue =
            match self.venue_for(target_chain, &trade.opportunity.target_venue) {
                Some(v) => v,
                None => {
                    return self
                        .fail_trade(
                            trade,
                            LegKind::Dispose,
                            "target venue not configured",
                            Some(held),
                        )
                        .await;
                }
            };

        let dispose = match tokio::time::timeout(
            self.leg_timeout,
            target_venue.sell(&pair, held.amount),
        )
        .await
        {
            Ok(Ok(receipt)) => receipt,
            Ok(Err(e)) => {
                return self
                    .fail_trade(trade, LegKind::Dispose, &e.to_string(), Some(held))
                    .await;
            }
            Err(_) => {
                return self
                    .fail_trade(trade, LegKind::Dispose, "submission timed out", Some(held))
                    .await;
            }
        };

        trade.record_leg(LegResult {
            kind: LegKind::Dispose,
            chain: target_chain,
            venue: Some(trade.opportunity.target_venue.clone()),
            requested: held.amount,
            received: dispose.received,
            reference_id: dispose.reference_id.clone(),
            completed_at: dispose.executed_at,
        })?;
        trade.settle(dispose.received)?;
        self.sync(&fingerprint, &trade);
        self.registry.finalize(&fingerprint).await?;

        info!(
            %fingerprint,
            realized = %trade.realized_profit_usd.unwrap_or_default(),
            estimated = %trade.opportunity.estimated_profit_usd,
            "Trade settled"
        );

        Ok(trade)
    }

    /// Re-submit a stranded position as a standalone disposal-only trade:
    /// sell the held token on its chain on any venue that lists the pair.
    ///
    /// The recovery trade keeps the original opportunity for context, so
    /// its realized profit reflects the whole episode (recovered proceeds
    /// minus the capital originally deployed).
    pub async fn recover(
        &self,
        failed: &Trade,
        settings: &RuntimeSettings,
    ) -> EngineResult<Trade> {
        if !failed.state.is_terminal() {
            return Err(EngineError::Malformed {
                reason: "recovery requires a terminal trade".into(),
            });
        }
        let stranded = failed.stranded.clone().ok_or_else(|| EngineError::Malformed {
            reason: "trade has no stranded position to recover".into(),
        })?;

        let pair = failed.opportunity.pair.clone();
        let venue = self
            .venues
            .values()
            .find(|v| v.chain() == stranded.chain && v.supports(&pair))
            .cloned()
            .ok_or_else(|| EngineError::Malformed {
                reason: format!("no venue on {} lists {}", stranded.chain, pair),
            })?;

        // Distinct fingerprint per source trade: re-running recovery for
        // the same stranded position is still single-flight.
        let fingerprint = Fingerprint::from_raw(format!("{}#recovery:{}", failed.fingerprint, failed.id));
        let _permit = self.admit(settings.max_concurrent_executions)?;

        let mut trade = Trade::new(failed.opportunity.clone(), fingerprint.clone());
        self.registry.begin_trade(trade.clone())?;
        info!(%fingerprint, position = %stranded, venue = venue.name(), "Recovery disposal started");

        trade.transition(TradeState::Disposing)?;
        self.sync(&fingerprint, &trade);

        let receipt = match tokio::time::timeout(
            self.leg_timeout,
            venue.sell(&pair, stranded.amount),
        )
        .await
        {
            Ok(Ok(receipt)) => receipt,
            Ok(Err(e)) => {
                return self
                    .fail_trade(trade, LegKind::Dispose, &e.to_string(), Some(stranded))
                    .await;
            }
            Err(_) => {
                return self
                    .fail_trade(trade, LegKind::Dispose, "submission timed out", Some(stranded))
                    .await;
            }
        };

        trade.record_leg(LegResult {
            kind: LegKind::Dispose,
            chain: stranded.chain,
            venue: Some(venue.name().to_string()),
            requested: stranded.amount,
            received: receipt.received,
            reference_id: receipt.reference_id.clone(),
            completed_at: receipt.executed_at,
        })?;
        trade.settle(receipt.received)?;
        self.sync(&fingerprint, &trade);
        self.registry.finalize(&fingerprint).await?;

        Ok(trade)
    }

    // -- Internals -------------------------------------------------------

    /// Counting admission gate. The limit is read at admission time, so a
    /// settings change applies to the next admission, never retroactively.
    fn admit(&self, limit: usize) -> EngineResult<AdmissionPermit<'_>> {
        let mut current = self.in_flight.load(Ordering::Acquire);
        loop {
            if current >= limit {
                return Err(EngineError::CapacityExhausted { limit });
            }
            match self.in_flight.compare_exchange(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    return Ok(AdmissionPermit {
                        counter: &self.in_flight,
                    })
                }
                Err(actual) => current = actual,
            }
        }
    }

    fn venue_for(&self, chain: Chain, name: &str) -> Option<Arc<dyn Venue>> {
        self.venues.get(&(chain, name.to_string())).cloned()
    }

    /// Mirror the working trade into the registry so readers see live
    /// state. The cancel flag is owned by the registry copy and preserved.
    fn sync(&self, fingerprint: &Fingerprint, trade: &Trade) {
        let snapshot = trade.clone();
        let _ = self.registry.update_trade(fingerprint, move |t| {
            let cancel_requested = t.cancel_requested;
            *t = snapshot;
            t.cancel_requested = cancel_requested;
            Ok(())
        });
    }

    /// Apply a pending cancellation at a leg boundary, recording whatever
    /// tokens are currently held. Returns true if the trade was cancelled.
    async fn check_cancel(
        &self,
        fingerprint: &Fingerprint,
        trade: &mut Trade,
        held: Option<StrandedPosition>,
    ) -> EngineResult<bool> {
        if !self.registry.cancel_requested(fingerprint) {
            return Ok(false);
        }
        trade.cancel(held)?;
        self.sync(fingerprint, trade);
        self.registry.finalize(fingerprint).await?;
        info!(%fingerprint, state = %trade.state, "Trade cancelled at leg boundary");
        Ok(true)
    }

    async fn fail_trade(
        &self,
        mut trade: Trade,
        leg: LegKind,
        error: &str,
        stranded: Option<StrandedPosition>,
    ) -> EngineResult<Trade> {
        warn!(
            fingerprint = %trade.fingerprint,
            %leg,
            error,
            stranded = stranded.as_ref().map(|s| s.to_string()).unwrap_or_else(|| "none".into()),
            "Leg failed, trade terminal"
        );
        trade.fail(leg, error, stranded);
        self.sync(&trade.fingerprint, &trade);
        self.registry.finalize(&trade.fingerprint).await?;
        Ok(trade)
    }

    /// Venue lookup table size — used by startup logging.
    pub fn venue_count(&self) -> usize {
        self.venues.len()
    }

    /// Convenience used by dispose-capable callers to verify coverage of
    /// a pair on a chain.
    pub fn can_dispose_on(&self, chain: Chain, pair: &TokenPair) -> bool {
        self.venues
            .values()
            .any(|v| v.chain() == chain && v.supports(pair))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::SimulatedBridge;
    use crate::types::CostEstimate;
    use crate::venues::simulated::SimulatedVenue;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn weth_usdt() -> TokenPair {
        TokenPair::new("WETH", "USDT").unwrap()
    }

    fn venue(name: &str, chain: Chain, price: Decimal) -> Arc<SimulatedVenue> {
        let prices = HashMap::from([(weth_usdt(), price)]);
        Arc::new(SimulatedVenue::new(name, chain, prices, dec!(0.25)))
    }

    fn opportunity() -> Opportunity {
        Opportunity::detect(
            Chain::Ethereum,
            "uniswap",
            Chain::Polygon,
            "quickswap",
            weth_usdt(),
            dec!(100),
            dec!(103),
            dec!(1000),
            CostEstimate {
                source_gas_usd: dec!(0.25),
                target_gas_usd: dec!(0.25),
                bridge_fee_pct: dec!(0.5),
                slippage_pct: dec!(0),
            },
        )
        .unwrap()
    }

    fn settings() -> RuntimeSettings {
        RuntimeSettings::default()
    }

    struct Harness {
        coordinator: ExecutionCoordinator,
        registry: Arc<Registry>,
        source: Arc<SimulatedVenue>,
        bridge: Arc<SimulatedBridge>,
    }

    fn harness() -> Harness {
        harness_with_latency(Duration::ZERO)
    }

    fn harness_with_latency(latency: Duration) -> Harness {
        let registry = Arc::new(Registry::new());
        let source = Arc::new(
            SimulatedVenue::new(
                "uniswap",
                Chain::Ethereum,
                HashMap::from([(weth_usdt(), dec!(100))]),
                dec!(0.25),
            )
            .with_latency(latency),
        );
        let target = venue("quickswap", Chain::Polygon, dec!(103));
        let bridge = Arc::new(SimulatedBridge::new());
        let coordinator = ExecutionCoordinator::new(
            vec![source.clone() as Arc<dyn Venue>, target as Arc<dyn Venue>],
            bridge.clone() as Arc<dyn BridgeService>,
            registry.clone(),
            chrono::Duration::seconds(30),
            Duration::from_secs(2),
        );
        Harness {
            coordinator,
            registry,
            source,
            bridge,
        }
    }

    #[tokio::test]
    async fn test_happy_path_settles() {
        let h = harness();
        let trade = h.coordinator.execute(opportunity(), &settings()).await.unwrap();

        assert_eq!(trade.state, TradeState::Settled);
        assert_eq!(trade.legs.len(), 3);
        assert!(trade.stranded.is_none());

        // 1000 @ $100 with 1% slippage = 9.9 WETH; bridge -0.5% = 9.8505;
        // sold @ $103 with 1% slippage.
        let proceeds = dec!(9.8505) * dec!(103) * dec!(0.99);
        assert_eq!(trade.realized_profit_usd, Some(proceeds - dec!(1000)));

        // Terminal trades live in history only.
        assert_eq!(h.registry.active_count(), 0);
        assert_eq!(h.registry.list_historical().await.len(), 1);
    }

    #[tokio::test]
    async fn test_single_chain_route_skips_bridge() {
        let registry = Arc::new(Registry::new());
        let a = venue("uniswap", Chain::Ethereum, dec!(100));
        let b = venue("sushiswap", Chain::Ethereum, dec!(102));
        let coordinator = ExecutionCoordinator::new(
            vec![a as Arc<dyn Venue>, b as Arc<dyn Venue>],
            Arc::new(SimulatedBridge::new()),
            registry,
            chrono::Duration::seconds(30),
            Duration::from_secs(2),
        );

        let opp = Opportunity::detect(
            Chain::Ethereum,
            "uniswap",
            Chain::Ethereum,
            "sushiswap",
            weth_usdt(),
            dec!(100),
            dec!(102),
            dec!(1000),
            CostEstimate {
                source_gas_usd: dec!(0.25),
                target_gas_usd: dec!(0.25),
                bridge_fee_pct: dec!(0.5),
                slippage_pct: dec!(0),
            },
        )
        .unwrap();

        let trade = coordinator.execute(opp, &settings()).await.unwrap();
        assert_eq!(trade.state, TradeState::Settled);
        assert_eq!(trade.legs.len(), 2);
        assert!(!trade.legs.iter().any(|l| l.kind == LegKind::Bridge));
    }

    #[tokio::test]
    async fn test_acquire_failure_leaves_no_stranded_position() {
        let h = harness();
        h.source.set_error("execution reverted");

        let trade = h.coordinator.execute(opportunity(), &settings()).await.unwrap();
        assert_eq!(trade.state, TradeState::Failed);
        // Capital never deployed: no stranded record, no legs.
        assert!(trade.stranded.is_none());
        assert!(trade.legs.is_empty());
        assert!(trade.error.unwrap().contains("acquire"));
    }

    #[tokio::test]
    async fn test_bridge_failure_strands_on_source_chain() {
        let h = harness();
        h.bridge.set_error("bridge timeout");

        let trade = h.coordinator.execute(opportunity(), &settings()).await.unwrap();
        assert_eq!(trade.state, TradeState::Failed);

        // Acquire filled 9.9 units; they are stranded on the source chain
        // and no dispose leg was attempted.
        let stranded = trade.stranded.as_ref().unwrap();
        assert_eq!(stranded.chain, Chain::Ethereum);
        assert_eq!(stranded.token, "WETH");
        assert_eq!(stranded.amount, dec!(9.90));
        assert_eq!(trade.legs.len(), 1);
        assert!(!trade.legs.iter().any(|l| l.kind == LegKind::Dispose));
    }

    #[tokio::test]
    async fn test_dispose_failure_strands_on_target_chain() {
        let registry = Arc::new(Registry::new());
        let source = venue("uniswap", Chain::Ethereum, dec!(100));
        let target = venue("quickswap", Chain::Polygon, dec!(103));
        target.set_error("insufficient liquidity");
        let coordinator = ExecutionCoordinator::new(
            vec![source as Arc<dyn Venue>, target as Arc<dyn Venue>],
            Arc::new(SimulatedBridge::new()),
            registry,
            chrono::Duration::seconds(30),
            Duration::from_secs(2),
        );

        let trade = coordinator.execute(opportunity(), &settings()).await.unwrap();
        assert_eq!(trade.state, TradeState::Failed);
        let stranded = trade.stranded.as_ref().unwrap();
        assert_eq!(stranded.chain, Chain::Polygon);
        assert_eq!(stranded.amount, dec!(9.8505));
    }

    #[tokio::test]
    async fn test_duplicate_in_flight_rejected_exactly_once() {
        let h = harness_with_latency(Duration::from_millis(100));
        let coordinator = Arc::new(h.coordinator);
        let opp = opportunity();

        let c1 = Arc::clone(&coordinator);
        let c2 = Arc::clone(&coordinator);
        let (o1, o2) = (opp.clone(), opp);
        let (r1, r2) = tokio::join!(
            tokio::spawn(async move { c1.execute(o1, &settings()).await }),
            tokio::spawn(async move { c2.execute(o2, &settings()).await }),
        );

        let results = [r1.unwrap(), r2.unwrap()];
        let ok = results.iter().filter(|r| r.is_ok()).count();
        let dup = results
            .iter()
            .filter(|r| matches!(r, Err(EngineError::DuplicateInFlight { .. })))
            .count();
        assert_eq!(ok, 1);
        assert_eq!(dup, 1);

        // Exactly one trade record exists.
        assert_eq!(h.registry.list_historical().await.len(), 1);
    }

    #[tokio::test]
    async fn test_stale_opportunity_never_executes() {
        let h = harness();
        let mut opp = opportunity();
        opp.discovered_at = chrono::Utc::now() - chrono::Duration::seconds(120);

        let result = h.coordinator.execute(opp, &settings()).await;
        assert!(matches!(result, Err(EngineError::StaleOpportunity { .. })));
        assert_eq!(h.registry.active_count(), 0);
    }

    #[tokio::test]
    async fn test_admission_gate_rejects_at_capacity() {
        let h = harness_with_latency(Duration::from_millis(200));
        let coordinator = Arc::new(h.coordinator);
        let mut cfg = settings();
        cfg.max_concurrent_executions = 1;

        // Two distinct fingerprints so the duplicate guard is not in play.
        let first = opportunity();
        let second = Opportunity::detect(
            Chain::Bsc,
            "pancakeswap",
            Chain::Polygon,
            "quickswap",
            weth_usdt(),
            dec!(100),
            dec!(103),
            dec!(1000),
            CostEstimate {
                source_gas_usd: dec!(0.25),
                target_gas_usd: dec!(0.25),
                bridge_fee_pct: dec!(0.5),
                slippage_pct: dec!(0),
            },
        )
        .unwrap();

        let c1 = Arc::clone(&coordinator);
        let cfg1 = cfg.clone();
        let slow = tokio::spawn(async move { c1.execute(first, &cfg1).await });

        // Give the first execution time to take the only slot.
        tokio::time::sleep(Duration::from_millis(50)).await;
        let result = coordinator.execute(second, &cfg).await;
        assert!(matches!(result, Err(EngineError::CapacityExhausted { limit: 1 })));

        slow.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_cancellation_deferred_until_leg_outcome() {
        let h = harness_with_latency(Duration::from_millis(150));
        let coordinator = Arc::new(h.coordinator);
        let registry = h.registry.clone();
        let opp = opportunity();
        let fingerprint = opp.fingerprint(settings().price_bucket_width);

        let c = Arc::clone(&coordinator);
        let handle = tokio::spawn(async move { c.execute(opp, &settings()).await });

        // Request cancellation while the acquire leg is in flight.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(registry.request_cancel(&fingerprint));

        let trade = handle.await.unwrap().unwrap();

        // The acquire leg ran to completion, then cancellation applied at
        // the boundary; the filled tokens are recorded for reconciliation.
        assert_eq!(trade.state, TradeState::Cancelled);
        assert_eq!(trade.legs.len(), 1);
        assert_eq!(trade.legs[0].kind, LegKind::Acquire);
        let held = trade.stranded.as_ref().unwrap();
        assert_eq!(held.amount, dec!(9.90));
        assert_eq!(held.chain, Chain::Ethereum);
    }

    #[tokio::test]
    async fn test_recover_sells_stranded_position() {
        let h = harness();
        h.bridge.set_error("bridge down");

        let failed = h.coordinator.execute(opportunity(), &settings()).await.unwrap();
        assert_eq!(failed.state, TradeState::Failed);

        h.bridge.clear_error();
        let recovery = h.coordinator.recover(&failed, &settings()).await.unwrap();

        assert_eq!(recovery.state, TradeState::Settled);
        assert_eq!(recovery.legs.len(), 1);
        assert_eq!(recovery.legs[0].kind, LegKind::Dispose);
        // 9.9 WETH sold back at $100 with 1% slippage recovers $980.10 of
        // the original $1000.
        assert_eq!(recovery.realized_profit_usd, Some(dec!(980.10) - dec!(1000)));
        assert_eq!(h.registry.list_historical().await.len(), 2);
    }

    #[tokio::test]
    async fn test_recover_requires_stranded_position() {
        let h = harness();
        let settled = h.coordinator.execute(opportunity(), &settings()).await.unwrap();
        assert_eq!(settled.state, TradeState::Settled);

        let result = h.coordinator.recover(&settled, &settings()).await;
        assert!(matches!(result, Err(EngineError::Malformed { .. })));
    }

    #[tokio::test]
    async fn test_fingerprint_free_after_terminal() {
        // A settled trade releases its fingerprint for later re-execution.
        let h = harness();
        let first = h.coordinator.execute(opportunity(), &settings()).await.unwrap();
        assert_eq!(first.state, TradeState::Settled);

        let second = h.coordinator.execute(opportunity(), &settings()).await.unwrap();
        assert_eq!(second.state, TradeState::Settled);
        assert_eq!(h.registry.list_historical().await.len(), 2);
    }

    #[tokio::test]
    async fn test_can_dispose_on_lookup() {
        let h = harness();
        assert!(h.coordinator.can_dispose_on(Chain::Ethereum, &weth_usdt()));
        assert!(!h.coordinator.can_dispose_on(Chain::Bsc, &weth_usdt()));
        assert_eq!(h.coordinator.venue_count(), 2);
    }
}
