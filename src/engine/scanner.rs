//! Opportunity scanner.
//!
//! Fans out one quote request per (chain, venue, pair) combination
//! concurrently, fans in under a bounded per-call timeout, and computes
//! pairwise net profit for every ordered source/target combination quoting
//! the same pair. A venue that errors or exceeds the timeout is excluded
//! from the cycle — it never blocks the others and never fails the scan.
//!
//! The scanner does not deduplicate against in-flight trades; that is the
//! coordinator's job via the fingerprint guard.

use futures::future::join_all;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::RuntimeSettings;
use crate::error::EngineError;
use crate::types::{Chain, CostEstimate, Opportunity, TokenPair, VenueQuote};
use crate::venues::Venue;

/// One successful quote observation within a scan cycle.
#[derive(Debug, Clone)]
struct QuoteRow {
    chain: Chain,
    venue: String,
    pair: TokenPair,
    quote: VenueQuote,
}

/// Outcome of one scan cycle.
#[derive(Debug, Default)]
pub struct ScanReport {
    pub opportunities: Vec<Opportunity>,
    pub quotes_ok: usize,
    pub quotes_failed: usize,
    /// Candidate combinations whose net profit fell below the threshold.
    pub below_threshold: usize,
}

pub struct Scanner {
    venues: Vec<Arc<dyn Venue>>,
    pairs: Vec<TokenPair>,
    quote_timeout: Duration,
}

impl Scanner {
    pub fn new(venues: Vec<Arc<dyn Venue>>, pairs: Vec<TokenPair>, quote_timeout: Duration) -> Self {
        Self {
            venues,
            pairs,
            quote_timeout,
        }
    }

    /// Run one scan cycle against the current settings snapshot.
    pub async fn scan(&self, settings: &RuntimeSettings) -> ScanReport {
        let mut report = ScanReport::default();

        let rows = self.gather_quotes(settings, &mut report).await;
        debug!(
            quotes = rows.len(),
            failed = report.quotes_failed,
            "Quote fan-in complete"
        );

        for pair in &self.pairs {
            let pair_rows: Vec<&QuoteRow> = rows.iter().filter(|r| &r.pair == pair).collect();
            self.cross_quotes(&pair_rows, settings, &mut report);
        }

        info!(
            emitted = report.opportunities.len(),
            below_threshold = report.below_threshold,
            quotes = report.quotes_ok,
            failed = report.quotes_failed,
            "Scan cycle complete"
        );

        report
    }

    /// Fan out one quote request per (venue, pair) concurrently; exclude
    /// anything that errors or misses the per-call timeout.
    async fn gather_quotes(&self, settings: &RuntimeSettings, report: &mut ScanReport) -> Vec<QuoteRow> {
        let mut futures = Vec::new();

        for venue in &self.venues {
            if !settings.enabled_chains.contains(&venue.chain()) {
                continue;
            }
            for pair in &self.pairs {
                // An unsupported pair yields no candidate; not an error.
                if !venue.supports(pair) {
                    continue;
                }
                let venue = Arc::clone(venue);
                let pair = pair.clone();
                let timeout = self.quote_timeout;
                futures.push(async move {
                    let result = tokio::time::timeout(timeout, venue.quote(&pair)).await;
                    (venue.chain(), venue.name().to_string(), pair, result)
                });
            }
        }

        let mut rows = Vec::new();
        for (chain, venue, pair, result) in join_all(futures).await {
            match result {
                Ok(Ok(quote)) => {
                    report.quotes_ok += 1;
                    rows.push(QuoteRow {
                        chain,
                        venue,
                        pair,
                        quote,
                    });
                }
                Ok(Err(e)) => {
                    report.quotes_failed += 1;
                    let err = EngineError::TransientNetwork {
                        source_name: format!("{venue}@{chain}"),
                        message: e.to_string(),
                    };
                    warn!(%pair, error = %err, "Quote failed, excluding from cycle");
                }
                Err(_) => {
                    report.quotes_failed += 1;
                    let err = EngineError::TransientNetwork {
                        source_name: format!("{venue}@{chain}"),
                        message: format!("no response within {}ms", self.quote_timeout.as_millis()),
                    };
                    warn!(%pair, error = %err, "Quote timed out, excluding from cycle");
                }
            }
        }
        rows
    }

    /// Compute net profit for every ordered (source, target) combination of
    /// the given rows and emit the ones at or above the threshold.
    fn cross_quotes(&self, rows: &[&QuoteRow], settings: &RuntimeSettings, report: &mut ScanReport) {
        for source in rows {
            for target in rows {
                if source.chain == target.chain && source.venue == target.venue {
                    continue;
                }
                // Only a positive spread can clear any sane threshold;
                // skip the degenerate direction early.
                if target.quote.price <= source.quote.price {
                    continue;
                }

                let costs = CostEstimate {
                    source_gas_usd: source.quote.gas_estimate_usd,
                    target_gas_usd: target.quote.gas_estimate_usd,
                    bridge_fee_pct: settings.bridge_fee_pct,
                    slippage_pct: settings.max_slippage_pct,
                };

                let opportunity = match Opportunity::detect(
                    source.chain,
                    &source.venue,
                    target.chain,
                    &target.venue,
                    source.pair.clone(),
                    source.quote.price,
                    target.quote.price,
                    settings.capital_per_trade_usd,
                    costs,
                ) {
                    Ok(opp) => opp,
                    Err(e) => {
                        debug!(error = %e, "Skipping malformed combination");
                        continue;
                    }
                };

                if opportunity.profit_pct < settings.min_profit_pct {
                    report.below_threshold += 1;
                    continue;
                }

                debug!(%opportunity, "Opportunity emitted");
                report.opportunities.push(opportunity);
            }
        }
    }
}

/// Net profit helper shared by tests and sanity checks: the same formula
/// `Opportunity::detect` applies, exposed for direct verification.
pub fn net_profit_usd(
    capital: Decimal,
    source_price: Decimal,
    target_price: Decimal,
    costs: &CostEstimate,
    cross_chain: bool,
) -> Decimal {
    let gross = capital * (target_price - source_price) / source_price;
    let bridge = if cross_chain {
        capital * costs.bridge_fee_pct / Decimal::from(100)
    } else {
        Decimal::ZERO
    };
    gross
        - costs.source_gas_usd
        - costs.target_gas_usd
        - bridge
        - capital * costs.slippage_pct / Decimal::from(100)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
