//! End-to-end pipeline scenarios: scanner → risk evaluator → execution
//! coordinator → registry, wired against simulated venues, a simulated
//! bridge, and scripted advisory responses.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio_test::assert_ok;

use spanner::advisory::{AdvisoryService, StaticAdvisor};
use spanner::bridge::{BridgeService, SimulatedBridge};
use spanner::config::RuntimeSettings;
use spanner::engine::coordinator::ExecutionCoordinator;
use spanner::engine::risk::RiskEvaluator;
use spanner::engine::scanner::Scanner;
use spanner::registry::Registry;
use spanner::types::{Chain, LegKind, TokenPair, TradeState};
use spanner::venues::simulated::SimulatedVenue;
use spanner::venues::Venue;

use crate::mock_advisory::{Scripted, ScriptedAdvisor};

fn weth_usdt() -> TokenPair {
    TokenPair::new("WETH", "USDT").unwrap()
}

fn venue(name: &str, chain: Chain, price: Decimal) -> Arc<SimulatedVenue> {
    let prices = HashMap::from([(weth_usdt(), price)]);
    Arc::new(SimulatedVenue::new(name, chain, prices, dec!(0.25)))
}

fn settings() -> RuntimeSettings {
    RuntimeSettings {
        min_profit_pct: dec!(1.0),
        capital_per_trade_usd: dec!(1000),
        max_slippage_pct: dec!(0),
        bridge_fee_pct: dec!(0.5),
        advisory_accept_threshold: 0.7,
        advisory_neutral_score: 0.5,
        ..Default::default()
    }
}

/// A fully wired pipeline over simulated collaborators.
struct Pipeline {
    scanner: Scanner,
    evaluator: RiskEvaluator,
    coordinator: Arc<ExecutionCoordinator>,
    registry: Arc<Registry>,
    bridge: Arc<SimulatedBridge>,
    source: Arc<SimulatedVenue>,
}

fn pipeline(advisory: Arc<dyn AdvisoryService>) -> Pipeline {
    pipeline_with_latency(advisory, Duration::ZERO)
}

fn pipeline_with_latency(advisory: Arc<dyn AdvisoryService>, venue_latency: Duration) -> Pipeline {
    let registry = Arc::new(Registry::new());
    let source = Arc::new(
        SimulatedVenue::new(
            "uniswap",
            Chain::Ethereum,
            HashMap::from([(weth_usdt(), dec!(100))]),
            dec!(0.25),
        )
        .with_latency(venue_latency),
    );
    let target = venue("quickswap", Chain::Polygon, dec!(103));
    let venues: Vec<Arc<dyn Venue>> = vec![source.clone(), target];
    let bridge = Arc::new(SimulatedBridge::new());

    let scanner = Scanner::new(venues.clone(), vec![weth_usdt()], Duration::from_millis(200));
    let evaluator = RiskEvaluator::new(advisory, Duration::from_millis(100));
    let coordinator = Arc::new(ExecutionCoordinator::new(
        venues,
        bridge.clone() as Arc<dyn BridgeService>,
        Arc::clone(&registry),
        chrono::Duration::seconds(30),
        Duration::from_secs(2),
    ));

    Pipeline {
        scanner,
        evaluator,
        coordinator,
        registry,
        bridge,
        source,
    }
}

/// Run one full cycle: scan, evaluate, execute everything approved.
async fn run_cycle(p: &Pipeline, cfg: &RuntimeSettings) -> Vec<TradeState> {
    let report = p.scanner.scan(cfg).await;
    let mut outcomes = Vec::new();

    for opportunity in report.opportunities {
        let risk = p.evaluator.evaluate(&opportunity, cfg).await;
        if !risk.accept {
            continue;
        }
        let annotated = opportunity.with_risk(risk);
        match p.coordinator.execute(annotated, cfg).await {
            Ok(trade) => outcomes.push(trade.state),
            Err(_) => {}
        }
    }
    outcomes
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_full_pipeline_detects_and_settles() {
    let p = pipeline(Arc::new(StaticAdvisor::new(0.9)));
    let outcomes = run_cycle(&p, &settings()).await;

    assert_eq!(outcomes, vec![TradeState::Settled]);

    let history = p.registry.list_historical().await;
    assert_eq!(history.len(), 1);
    let trade = &history[0];
    assert_eq!(trade.legs.len(), 3);
    assert!(trade.realized_profit_usd.unwrap() > Decimal::ZERO);

    // The opportunity carried its risk annotation into the record.
    let risk = trade.opportunity.risk.as_ref().unwrap();
    assert!(risk.accept);
    assert!((risk.score - 0.9).abs() < 1e-10);

    let stats = p.registry.snapshot_stats().await;
    assert_eq!(stats.trades_settled, 1);
    assert!(stats.total_realized_profit_usd > Decimal::ZERO);
}

#[tokio::test]
async fn test_sub_threshold_spread_never_reaches_execution() {
    // 0.6% spread: below the 1% minimum after costs.
    let p = {
        let registry = Arc::new(Registry::new());
        let a = venue("uniswap", Chain::Ethereum, dec!(100));
        let b = venue("quickswap", Chain::Polygon, dec!(100.6));
        let venues: Vec<Arc<dyn Venue>> = vec![a.clone(), b];
        Pipeline {
            scanner: Scanner::new(venues.clone(), vec![weth_usdt()], Duration::from_millis(200)),
            evaluator: RiskEvaluator::new(Arc::new(StaticAdvisor::new(1.0)), Duration::from_millis(100)),
            coordinator: Arc::new(ExecutionCoordinator::new(
                venues,
                Arc::new(SimulatedBridge::new()),
                Arc::clone(&registry),
                chrono::Duration::seconds(30),
                Duration::from_secs(2),
            )),
            registry,
            bridge: Arc::new(SimulatedBridge::new()),
            source: a,
        }
    };

    let outcomes = run_cycle(&p, &settings()).await;
    assert!(outcomes.is_empty());
    assert!(p.registry.list_historical().await.is_empty());
}

#[tokio::test]
async fn test_advisory_outage_rejects_with_distinct_reason() {
    // Deterministic gates pass, the advisory errors, the neutral 0.5 falls
    // short of the 0.7 acceptance bar: rejected as advisory-unavailable,
    // never as insufficient margin.
    let advisor = Arc::new(ScriptedAdvisor::new(vec![Scripted::Fail("503 from gateway".into())]));
    let p = pipeline(advisor.clone());

    let report = p.scanner.scan(&settings()).await;
    assert_eq!(report.opportunities.len(), 1);

    let risk = p.evaluator.evaluate(&report.opportunities[0], &settings()).await;
    assert!(!risk.accept);
    assert!((risk.score - 0.5).abs() < 1e-10);
    assert!(risk.reasons.iter().any(|r| r.contains("advisory unavailable")));
    assert!(!risk.reasons.iter().any(|r| r.contains("insufficient margin")));
    assert_eq!(advisor.calls(), 1);
}

#[tokio::test]
async fn test_advisory_timeout_treated_as_neutral() {
    let advisor = Arc::new(ScriptedAdvisor::new(vec![Scripted::Slow(
        Duration::from_secs(10),
        0.99,
    )]));
    let p = pipeline(advisor);

    let report = p.scanner.scan(&settings()).await;
    let risk = p.evaluator.evaluate(&report.opportunities[0], &settings()).await;

    assert!(!risk.accept);
    assert!(risk
        .reasons
        .iter()
        .any(|r| r.contains("advisory unavailable: timeout")));
}

#[tokio::test]
async fn test_gate_failure_spends_no_advisory_call() {
    let advisor = Arc::new(ScriptedAdvisor::new(vec![]));
    let p = pipeline(advisor.clone());

    let mut strict = settings();
    strict.min_profit_pct = dec!(50.0);

    let report = p.scanner.scan(&settings()).await;
    let risk = p.evaluator.evaluate(&report.opportunities[0], &strict).await;

    assert!(!risk.accept);
    assert_eq!(advisor.calls(), 0);
}

#[tokio::test]
async fn test_bridge_failure_strands_then_recovers() {
    let p = pipeline(Arc::new(StaticAdvisor::new(0.9)));
    p.bridge.set_error("relayer unreachable");

    let outcomes = run_cycle(&p, &settings()).await;
    assert_eq!(outcomes, vec![TradeState::Failed]);

    let history = p.registry.list_historical().await;
    let failed = &history[0];
    let stranded = failed.stranded.as_ref().unwrap();
    assert_eq!(stranded.chain, Chain::Ethereum);
    assert_eq!(stranded.amount, dec!(9.90));
    assert!(!failed.legs.iter().any(|l| l.kind == LegKind::Dispose));

    // Explicit recovery: sell the stranded tokens back on the source chain.
    p.bridge.clear_error();
    let recovery = assert_ok!(p.coordinator.recover(failed, &settings()).await);
    assert_eq!(recovery.state, TradeState::Settled);
    // 9.9 WETH at $100 less 1% slippage recovers $980.10 of the $1000.
    assert_eq!(recovery.realized_profit_usd, Some(dec!(-19.90)));
}

#[tokio::test]
async fn test_duplicate_submission_yields_one_trade() {
    let p = pipeline_with_latency(Arc::new(StaticAdvisor::new(0.9)), Duration::from_millis(100));
    let report = p.scanner.scan(&settings()).await;
    let opportunity = report.opportunities.into_iter().next().unwrap();

    let c1 = Arc::clone(&p.coordinator);
    let c2 = Arc::clone(&p.coordinator);
    let (o1, o2) = (opportunity.clone(), opportunity);
    let (r1, r2) = tokio::join!(
        tokio::spawn(async move { c1.execute(o1, &settings()).await }),
        tokio::spawn(async move { c2.execute(o2, &settings()).await }),
    );

    let results = [r1.unwrap(), r2.unwrap()];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert_eq!(
        results
            .iter()
            .filter(|r| matches!(
                r,
                Err(spanner::error::EngineError::DuplicateInFlight { .. })
            ))
            .count(),
        1
    );
    assert_eq!(p.registry.list_historical().await.len(), 1);
}

#[tokio::test]
async fn test_settings_change_applies_next_cycle() {
    let p = pipeline(Arc::new(StaticAdvisor::new(0.9)));
    let shared = spanner::config::shared(settings());

    // First cycle with an impossible threshold: nothing emitted.
    {
        let mut s = shared.write().await;
        s.min_profit_pct = dec!(50.0);
    }
    let snapshot = shared.read().await.clone();
    let report = p.scanner.scan(&snapshot).await;
    assert!(report.opportunities.is_empty());

    // The display layer relaxes the threshold; the next cycle's snapshot
    // picks it up.
    {
        let mut s = shared.write().await;
        s.min_profit_pct = dec!(1.0);
    }
    let snapshot = shared.read().await.clone();
    let report = p.scanner.scan(&snapshot).await;
    assert_eq!(report.opportunities.len(), 1);
}

#[tokio::test]
async fn test_dashboard_cancel_defers_to_leg_boundary() {
    use axum::extract::{Path, State};
    use spanner::dashboard::routes::{post_cancel, DashboardState};

    let p = pipeline_with_latency(Arc::new(StaticAdvisor::new(0.9)), Duration::from_millis(150));
    let dashboard_state = Arc::new(DashboardState::new(
        Arc::clone(&p.registry),
        spanner::config::shared(settings()),
    ));

    let report = p.scanner.scan(&settings()).await;
    let opportunity = report.opportunities.into_iter().next().unwrap();
    let fingerprint = opportunity.fingerprint(settings().price_bucket_width);

    let coordinator = Arc::clone(&p.coordinator);
    let handle = tokio::spawn(async move { coordinator.execute(opportunity, &settings()).await });

    // Cancel through the display-layer endpoint while acquire is in flight.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let (code, _) = post_cancel(
        State(dashboard_state),
        Path(fingerprint.to_string()),
    )
    .await;
    assert_eq!(code, axum::http::StatusCode::ACCEPTED);

    let trade = handle.await.unwrap().unwrap();
    // The submitted acquire ran to completion before cancellation applied.
    assert_eq!(trade.state, TradeState::Cancelled);
    assert_eq!(trade.legs.len(), 1);
    assert!(trade.stranded.is_some());

    let stats = p.registry.snapshot_stats().await;
    assert_eq!(stats.trades_cancelled, 1);
}

#[tokio::test]
async fn test_received_amounts_never_increase_across_legs() {
    let p = pipeline(Arc::new(StaticAdvisor::new(0.9)));
    run_cycle(&p, &settings()).await;

    let history = p.registry.list_historical().await;
    let trade = &history[0];
    assert_eq!(trade.legs.len(), 3);

    // Token-denominated legs only shed value: bridge received <= acquired.
    let acquired = trade.legs[0].received;
    let bridged = trade.legs[1].received;
    assert!(bridged <= acquired);
    // And each leg's input is bounded by the prior leg's output.
    for pair in trade.legs.windows(2) {
        assert!(pair[1].requested <= pair[0].received);
    }
}

#[tokio::test]
async fn test_venue_outage_degrades_coverage_not_availability() {
    let p = pipeline(Arc::new(StaticAdvisor::new(0.9)));
    p.source.set_error("rpc 502");

    // Scan still completes; the broken venue is just absent this cycle.
    let report = p.scanner.scan(&settings()).await;
    assert_eq!(report.quotes_failed, 1);
    assert!(report.opportunities.is_empty());

    // Recovery next cycle.
    p.source.clear_error();
    let report = p.scanner.scan(&settings()).await;
    assert_eq!(report.opportunities.len(), 1);
}
