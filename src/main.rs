//! SPANNER — Autonomous Cross-Chain Arbitrage Agent
//!
//! Entry point. Loads configuration, initialises structured logging,
//! restores trade history from disk (or starts fresh), and runs the main
//! scan→gate→execute loop with graceful shutdown: new work stops
//! immediately on Ctrl+C, but legs already submitted to a network run to
//! completion before the process exits.

use anyhow::Result;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use spanner::advisory::openai::OpenAiAdvisor;
use spanner::advisory::{AdvisoryService, StaticAdvisor};
use spanner::bridge::{BridgeService, HttpBridge, SimulatedBridge};
use spanner::config::{self, AppConfig, SharedSettings};
use spanner::dashboard;
use spanner::dashboard::routes::DashboardState;
use spanner::engine::coordinator::ExecutionCoordinator;
use spanner::engine::risk::RiskEvaluator;
use spanner::engine::scanner::Scanner;
use spanner::error::EngineError;
use spanner::registry::Registry;
use spanner::storage;
use spanner::types::{d, EngineStats, Trade};
use spanner::venues::http::HttpVenue;
use spanner::venues::simulated::SimulatedVenue;
use spanner::venues::Venue;

const BANNER: &str = r#"
 ____  ____   _    _   _ _   _ _____ ____
/ ___||  _ \ / \  | \ | | \ | | ____|  _ \
\___ \| |_) / _ \ |  \| |  \| |  _| | |_) |
 ___) |  __/ ___ \| |\  | |\  | |___|  _ <
|____/|_| /_/   \_\_| \_|_| \_|_____|_| \_\

  Cross-Chain Spread Capture & Execution Agent
  v0.1.0
"#;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    // Load configuration from TOML
    let cfg = AppConfig::load("config.toml")?;

    // Initialise structured logging
    init_logging();

    // Print startup banner
    println!("{BANNER}");
    info!(
        agent_name = %cfg.agent.name,
        scan_interval_secs = cfg.agent.scan_interval_secs,
        min_profit_pct = cfg.trading.min_profit_pct,
        capital_per_trade = cfg.trading.capital_per_trade_usd,
        auto_execute = cfg.trading.auto_execute,
        "SPANNER starting up"
    );

    // -- Restore history ---------------------------------------------------

    let registry = Arc::new(Registry::new());
    if let Some(history) = storage::load_history(cfg.agent.history_file.as_deref())? {
        registry.restore_history(history).await;
    }

    // -- Initialise components ---------------------------------------------

    let pairs = cfg.token_pairs();
    let venues = build_venues(&cfg)?;
    info!(
        venues = venues.len(),
        pairs = pairs.len(),
        chains = cfg.enabled_chains().len(),
        "Venue matrix initialised"
    );
    if venues.len() < 2 {
        warn!("Fewer than two venues configured; no spread can ever be detected");
    }

    let bridge: Arc<dyn BridgeService> = match cfg.bridge.mode.as_str() {
        "http" => {
            let endpoint = cfg
                .bridge
                .endpoint
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("bridge.endpoint required for http mode"))?;
            Arc::new(HttpBridge::new(
                "bridge-gateway",
                endpoint,
                Duration::from_secs(cfg.bridge.timeout_secs),
            )?)
        }
        _ => Arc::new(SimulatedBridge::new().with_fee_pct(d(cfg.bridge.fee_pct))),
    };

    let advisory = build_advisory(&cfg)?;
    info!(model = %advisory.model_name(), "Advisory initialised");

    let settings = config::shared(cfg.runtime_settings());
    let staleness_window = chrono::Duration::seconds(cfg.agent.scan_interval_secs as i64);

    let scanner = Scanner::new(
        venues.clone(),
        pairs,
        Duration::from_millis(cfg.agent.quote_timeout_ms),
    );
    let evaluator = RiskEvaluator::new(advisory, Duration::from_secs(cfg.advisory.timeout_secs));
    let coordinator = Arc::new(ExecutionCoordinator::new(
        venues,
        bridge,
        Arc::clone(&registry),
        staleness_window,
        Duration::from_secs(cfg.bridge.timeout_secs),
    ));

    if cfg.dashboard.enabled {
        let state = Arc::new(DashboardState::new(
            Arc::clone(&registry),
            Arc::clone(&settings),
        ));
        dashboard::spawn_dashboard(state, cfg.dashboard.port)?;
    }

    // -- Main loop ---------------------------------------------------------

    let mut interval = tokio::time::interval(Duration::from_secs(cfg.agent.scan_interval_secs));
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    let mut executions: JoinSet<Result<Trade, EngineError>> = JoinSet::new();

    info!(
        interval_secs = cfg.agent.scan_interval_secs,
        "Entering main loop. Press Ctrl+C to stop."
    );

    loop {
        tokio::select! {
            _ = interval.tick() => {
                run_cycle(
                    &scanner,
                    &evaluator,
                    &coordinator,
                    &registry,
                    &settings,
                    staleness_window,
                    &mut executions,
                ).await;
                reap_finished(&mut executions);
            }
            _ = &mut shutdown => {
                info!("Shutdown signal received; no new cycles will be scheduled.");
                break;
            }
        }
    }

    // Submitted legs run to completion or timeout; never force-abort an
    // on-chain action whose outcome is externally determined.
    if !executions.is_empty() {
        info!(outstanding = executions.len(), "Waiting for in-flight executions to finish");
        while let Some(result) = executions.join_next().await {
            log_execution_result(result);
        }
    }

    // Persist history and summarise the session.
    storage::save_history(
        &registry.list_historical().await,
        cfg.agent.history_file.as_deref(),
    )?;
    print_final_statistics(&registry.snapshot_stats().await);

    Ok(())
}

/// Run one scan→gate→execute cycle.
async fn run_cycle(
    scanner: &Scanner,
    evaluator: &RiskEvaluator,
    coordinator: &Arc<ExecutionCoordinator>,
    registry: &Arc<Registry>,
    settings: &SharedSettings,
    staleness_window: chrono::Duration,
    executions: &mut JoinSet<Result<Trade, EngineError>>,
) {
    // Settings snapshot: display-layer changes land here, on the next
    // cycle, never mid-trade.
    let snapshot = settings.read().await.clone();

    let report = scanner.scan(&snapshot).await;
    registry.prune_stale_opportunities(staleness_window);
    registry
        .update_stats(|stats| {
            stats.cycles_run += 1;
            stats.quotes_fetched += report.quotes_ok as u64;
            stats.quote_failures += report.quotes_failed as u64;
            stats.opportunities_found += report.opportunities.len() as u64;
        })
        .await;

    for opportunity in report.opportunities {
        let fingerprint = opportunity.fingerprint(snapshot.price_bucket_width);

        // The coordinator's guard is authoritative; this pre-check just
        // avoids spending advisory calls on a fingerprint already running.
        if registry.has_in_flight(&fingerprint) {
            debug!(%fingerprint, "Fingerprint already executing; skipping evaluation");
            continue;
        }

        let risk = evaluator.evaluate(&opportunity, &snapshot).await;
        let accepted = risk.accept;
        let annotated = opportunity.with_risk(risk);
        registry.put_opportunity(fingerprint.clone(), annotated);

        if !accepted {
            continue;
        }
        registry
            .update_stats(|stats| stats.opportunities_approved += 1)
            .await;

        if snapshot.auto_execute {
            // Exactly-once consumption: the opportunity leaves the registry
            // before execution starts.
            if let Some(consumed) = registry.take_opportunity(&fingerprint) {
                let coordinator = Arc::clone(coordinator);
                let run_settings = snapshot.clone();
                executions.spawn(async move {
                    coordinator.execute(consumed, &run_settings).await
                });
            }
        }
    }
}

/// Collect finished execution tasks without blocking the loop.
fn reap_finished(executions: &mut JoinSet<Result<Trade, EngineError>>) {
    while let Some(result) = executions.try_join_next() {
        log_execution_result(result);
    }
}

fn log_execution_result(result: Result<Result<Trade, EngineError>, tokio::task::JoinError>) {
    match result {
        Ok(Ok(trade)) => {
            info!(
                state = %trade.state,
                fingerprint = %trade.fingerprint,
                realized = ?trade.realized_profit_usd,
                "Execution finished"
            );
        }
        Ok(Err(e)) => match e {
            EngineError::DuplicateInFlight { .. }
            | EngineError::StaleOpportunity { .. }
            | EngineError::CapacityExhausted { .. } => {
                debug!(error = %e, "Execution not started");
            }
            other => error!(error = %other, "Execution error"),
        },
        Err(join_err) => error!(error = %join_err, "Execution task panicked"),
    }
}

/// Build the venue set from config: one instance per (chain, venue) entry.
fn build_venues(cfg: &AppConfig) -> Result<Vec<Arc<dyn Venue>>> {
    let pairs = cfg.token_pairs();
    let quote_timeout = Duration::from_millis(cfg.agent.quote_timeout_ms);
    let mut venues: Vec<Arc<dyn Venue>> = Vec::new();

    for (chain, chain_cfg) in cfg.enabled_chains() {
        for venue_cfg in &chain_cfg.venues {
            match venue_cfg.mode.as_str() {
                "http" => {
                    let endpoint = venue_cfg.endpoint.as_deref().ok_or_else(|| {
                        anyhow::anyhow!("venue {} requires an endpoint in http mode", venue_cfg.name)
                    })?;
                    venues.push(Arc::new(HttpVenue::new(
                        &venue_cfg.name,
                        chain,
                        endpoint,
                        pairs.clone(),
                        quote_timeout,
                    )?));
                }
                _ => {
                    let price = d(venue_cfg.sim_price.unwrap_or(100.0));
                    let prices: HashMap<_, _> =
                        pairs.iter().cloned().map(|p| (p, price)).collect();
                    venues.push(Arc::new(SimulatedVenue::new(
                        &venue_cfg.name,
                        chain,
                        prices,
                        d(venue_cfg.gas_estimate_usd),
                    )));
                }
            }
        }
    }

    Ok(venues)
}

/// Build the advisory service: OpenAI when a key is configured, otherwise
/// the fixed-score advisor (scan/simulate-only operation).
fn build_advisory(cfg: &AppConfig) -> Result<Arc<dyn AdvisoryService>> {
    if cfg.advisory.provider == "openai" {
        let api_key = std::env::var(&cfg.advisory.api_key_env).unwrap_or_default();
        if api_key.is_empty() {
            warn!(
                env = %cfg.advisory.api_key_env,
                "No advisory API key configured; using static advisor"
            );
        } else {
            return Ok(Arc::new(OpenAiAdvisor::new(
                api_key.into(),
                Some(cfg.advisory.model.clone()),
                Some(cfg.advisory.max_tokens),
            )?));
        }
    }
    Ok(Arc::new(StaticAdvisor::new(cfg.advisory.static_score)))
}

/// Print final statistics on shutdown.
fn print_final_statistics(stats: &EngineStats) {
    info!("Shutting down gracefully. Session summary:");
    info!("   Cycles run: {}", stats.cycles_run);
    info!(
        "   Quotes fetched: {} ({} failed)",
        stats.quotes_fetched, stats.quote_failures
    );
    info!("   Opportunities found: {}", stats.opportunities_found);
    info!("   Opportunities approved: {}", stats.opportunities_approved);
    info!(
        "   Trades: {} settled, {} failed, {} cancelled",
        stats.trades_settled, stats.trades_failed, stats.trades_cancelled
    );
    info!(
        "   Realized profit: ${:.2} (success rate {:.1}%)",
        stats.total_realized_profit_usd,
        stats.success_rate() * 100.0
    );
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("spanner=info"));

    let json_logging = std::env::var("SPANNER_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt().with_env_filter(env_filter).with_target(true).init();
    }
}
