//! Registry — the single source of truth for opportunities and trades.
//!
//! Holds the current set of open opportunities, in-flight trades, and
//! completed trade history. Ownership is exclusive: the scanner creates
//! opportunities, only the coordinator mutates trades, and the display
//! layer reads snapshots but never mutates.
//!
//! Active maps are fingerprint-sharded (`DashMap`) so writers on unrelated
//! fingerprints never contend and readers never block writers; there is no
//! global lock. The at-most-one-non-terminal-trade-per-fingerprint property
//! is enforced here, in cooperation with the coordinator's guard, via an
//! atomic check-and-insert on the shard entry.

use dashmap::DashMap;
use rust_decimal::Decimal;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::{EngineError, EngineResult};
use crate::types::{EngineStats, Fingerprint, Opportunity, Trade, TradeState};

#[derive(Default)]
pub struct Registry {
    /// Open opportunities, keyed by fingerprint. One per fingerprint:
    /// concurrently-discovered duplicates collapse to the freshest.
    opportunities: DashMap<Fingerprint, Opportunity>,
    /// Non-terminal trades, keyed by fingerprint.
    active: DashMap<Fingerprint, Trade>,
    /// Terminal trades, append-only, immutable.
    history: RwLock<Vec<Trade>>,
    stats: RwLock<EngineStats>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    // -- Opportunities ---------------------------------------------------

    /// Insert or refresh an open opportunity. A newer observation of the
    /// same fingerprint replaces the older one.
    pub fn put_opportunity(&self, fingerprint: Fingerprint, opportunity: Opportunity) {
        self.opportunities.insert(fingerprint, opportunity);
    }

    /// Consume an opportunity exactly once. Returns None if it was already
    /// taken, expired, or never existed.
    pub fn take_opportunity(&self, fingerprint: &Fingerprint) -> Option<Opportunity> {
        self.opportunities.remove(fingerprint).map(|(_, opp)| opp)
    }

    /// Drop opportunities older than the staleness window. Stale price data
    /// must never reach execution.
    pub fn prune_stale_opportunities(&self, window: chrono::Duration) -> usize {
        let before = self.opportunities.len();
        self.opportunities.retain(|_, opp| !opp.is_stale(window));
        let dropped = before - self.opportunities.len();
        if dropped > 0 {
            debug!(dropped, "Pruned stale opportunities");
        }
        dropped
    }

    pub fn list_opportunities(&self) -> Vec<Opportunity> {
        self.opportunities.iter().map(|e| e.value().clone()).collect()
    }

    // -- Trades ----------------------------------------------------------

    /// Atomically register a new trade for its fingerprint.
    ///
    /// This is the enforcement point for the single-flight property: if a
    /// non-terminal trade already occupies the shard, the write fails with
    /// `DuplicateInFlight` rather than being queued.
    pub fn begin_trade(&self, trade: Trade) -> EngineResult<()> {
        let entry = self.active.entry(trade.fingerprint.clone());
        match entry {
            dashmap::mapref::entry::Entry::Occupied(mut occupied) => {
                if !occupied.get().state.is_terminal() {
                    return Err(EngineError::DuplicateInFlight {
                        fingerprint: trade.fingerprint.clone(),
                    });
                }
                // A terminal trade still parked here is a finalize race
                // leftover; replace it.
                let fingerprint = trade.fingerprint.clone();
                occupied.insert(trade);
                debug!(%fingerprint, "Replaced terminal leftover in active shard");
                Ok(())
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(trade);
                Ok(())
            }
        }
    }

    /// Apply a mutation to an active trade under its shard lock.
    pub fn update_trade<F>(&self, fingerprint: &Fingerprint, mutate: F) -> EngineResult<()>
    where
        F: FnOnce(&mut Trade) -> EngineResult<()>,
    {
        match self.active.get_mut(fingerprint) {
            Some(mut entry) => mutate(entry.value_mut()),
            None => Err(EngineError::Malformed {
                reason: format!("no active trade for fingerprint {fingerprint}"),
            }),
        }
    }

    /// Flag an active trade for cancellation. The coordinator applies the
    /// flag at the next leg boundary; a leg already submitted always runs
    /// to its outcome first. Returns false if nothing is in flight or the
    /// trade can no longer be cancelled.
    pub fn request_cancel(&self, fingerprint: &Fingerprint) -> bool {
        match self.active.get_mut(fingerprint) {
            Some(mut entry) => {
                let trade = entry.value_mut();
                if trade.state.is_terminal() || trade.state == TradeState::Disposing {
                    return false;
                }
                trade.cancel_requested = true;
                info!(%fingerprint, state = %trade.state, "Cancellation requested");
                true
            }
            None => false,
        }
    }

    pub fn cancel_requested(&self, fingerprint: &Fingerprint) -> bool {
        self.active
            .get(fingerprint)
            .map(|t| t.cancel_requested)
            .unwrap_or(false)
    }

    /// Move a terminal trade out of the active shard into history and fold
    /// its outcome into the session stats.
    pub async fn finalize(&self, fingerprint: &Fingerprint) -> EngineResult<Trade> {
        let (_, trade) = self.active.remove(fingerprint).ok_or_else(|| EngineError::Malformed {
            reason: format!("no active trade for fingerprint {fingerprint}"),
        })?;
        if !trade.state.is_terminal() {
            // Put it back; finalizing a live trade is a coordinator bug.
            let state = trade.state;
            self.active.insert(fingerprint.clone(), trade);
            return Err(EngineError::InvalidTransition {
                from: state,
                to: state,
            });
        }

        {
            let mut stats = self.stats.write().await;
            match trade.state {
                TradeState::Settled => {
                    stats.trades_settled += 1;
                    stats.total_realized_profit_usd +=
                        trade.realized_profit_usd.unwrap_or(Decimal::ZERO);
                }
                TradeState::Failed => stats.trades_failed += 1,
                TradeState::Cancelled => stats.trades_cancelled += 1,
                _ => {}
            }
        }

        self.history.write().await.push(trade.clone());
        Ok(trade)
    }

    pub fn get_active(&self, fingerprint: &Fingerprint) -> Option<Trade> {
        self.active.get(fingerprint).map(|t| t.value().clone())
    }

    pub fn has_in_flight(&self, fingerprint: &Fingerprint) -> bool {
        self.active
            .get(fingerprint)
            .map(|t| !t.state.is_terminal())
            .unwrap_or(false)
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn list_active(&self) -> Vec<Trade> {
        self.active.iter().map(|e| e.value().clone()).collect()
    }

    pub async fn list_historical(&self) -> Vec<Trade> {
        self.history.read().await.clone()
    }

    /// Seed history from a persisted snapshot.
    pub async fn restore_history(&self, trades: Vec<Trade>) {
        let mut history = self.history.write().await;
        *history = trades;
    }

    // -- Stats -----------------------------------------------------------

    pub async fn snapshot_stats(&self) -> EngineStats {
        self.stats.read().await.clone()
    }

    pub async fn update_stats<F>(&self, mutate: F)
    where
        F: FnOnce(&mut EngineStats),
    {
        let mut stats = self.stats.write().await;
        mutate(&mut stats);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
