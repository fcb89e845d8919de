//! Dashboard API route handlers.
//!
//! All endpoints return JSON. The display layer reads registry snapshots
//! and session stats, requests trade cancellation, and adjusts the runtime
//! settings; it never mutates opportunities or trades directly.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;
use std::sync::Arc;

use crate::config::SharedSettings;
use crate::registry::Registry;
use crate::types::{Fingerprint, Opportunity, Trade};

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

/// Shared state accessible by all route handlers.
pub struct DashboardState {
    pub registry: Arc<Registry>,
    pub settings: SharedSettings,
    pub started_at: chrono::DateTime<chrono::Utc>,
}

impl DashboardState {
    pub fn new(registry: Arc<Registry>, settings: SharedSettings) -> Self {
        Self {
            registry,
            settings,
            started_at: chrono::Utc::now(),
        }
    }
}

pub type AppState = Arc<DashboardState>;

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    pub agent: &'static str,
    pub uptime_secs: i64,
    pub cycles_run: u64,
    pub opportunities_open: usize,
    pub trades_active: usize,
    pub trades_settled: u64,
    pub trades_failed: u64,
    pub trades_cancelled: u64,
    pub success_rate: f64,
    pub total_realized_profit_usd: f64,
    pub avg_profit_per_trade_usd: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CancelResponse {
    pub fingerprint: String,
    pub accepted: bool,
}

// ---------------------------------------------------------------------------
// Route handlers
// ---------------------------------------------------------------------------

/// GET /api/status
pub async fn get_status(State(state): State<AppState>) -> Json<StatusResponse> {
    let stats = state.registry.snapshot_stats().await;
    let uptime = (chrono::Utc::now() - state.started_at).num_seconds();

    use rust_decimal::prelude::ToPrimitive;
    Json(StatusResponse {
        agent: "spanner",
        uptime_secs: uptime,
        cycles_run: stats.cycles_run,
        opportunities_open: state.registry.list_opportunities().len(),
        trades_active: state.registry.active_count(),
        trades_settled: stats.trades_settled,
        trades_failed: stats.trades_failed,
        trades_cancelled: stats.trades_cancelled,
        success_rate: stats.success_rate(),
        total_realized_profit_usd: stats.total_realized_profit_usd.to_f64().unwrap_or(0.0),
        avg_profit_per_trade_usd: stats.avg_profit_per_trade().to_f64().unwrap_or(0.0),
    })
}

/// GET /api/opportunities
pub async fn get_opportunities(State(state): State<AppState>) -> Json<Vec<Opportunity>> {
    let mut opportunities = state.registry.list_opportunities();
    opportunities.sort_by(|a, b| {
        b.profit_pct
            .partial_cmp(&a.profit_pct)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    Json(opportunities)
}

/// GET /api/trades/active
pub async fn get_active_trades(State(state): State<AppState>) -> Json<Vec<Trade>> {
    Json(state.registry.list_active())
}

/// GET /api/trades/history
pub async fn get_trade_history(State(state): State<AppState>) -> Json<Vec<Trade>> {
    let mut history = state.registry.list_historical().await;
    // Most recent first; cap the payload like any sane list endpoint.
    history.reverse();
    history.truncate(200);
    Json(history)
}

/// POST /api/trades/:fingerprint/cancel
///
/// Flags the in-flight trade for cancellation. The coordinator applies the
/// flag at the next leg boundary — a submitted leg always runs to its
/// outcome first, so acceptance here does not guarantee cancellation.
pub async fn post_cancel(
    State(state): State<AppState>,
    Path(fingerprint): Path<String>,
) -> (StatusCode, Json<CancelResponse>) {
    let fp = Fingerprint::from_raw(fingerprint.clone());
    let accepted = state.registry.request_cancel(&fp);
    let code = if accepted {
        StatusCode::ACCEPTED
    } else {
        StatusCode::CONFLICT
    };
    (
        code,
        Json(CancelResponse {
            fingerprint,
            accepted,
        }),
    )
}

/// GET /api/settings
pub async fn get_settings(State(state): State<AppState>) -> Json<crate::config::RuntimeSettings> {
    Json(state.settings.read().await.clone())
}

/// PUT /api/settings
///
/// Replaces the runtime-adjustable settings. Changes take effect on the
/// next scan cycle; in-flight trades keep the parameters they started with.
pub async fn put_settings(
    State(state): State<AppState>,
    Json(new_settings): Json<crate::config::RuntimeSettings>,
) -> (StatusCode, Json<crate::config::RuntimeSettings>) {
    if new_settings.max_concurrent_executions == 0
        || !(0.0..=1.0).contains(&new_settings.advisory_accept_threshold)
        || !(0.0..=1.0).contains(&new_settings.advisory_neutral_score)
    {
        let current = state.settings.read().await.clone();
        return (StatusCode::UNPROCESSABLE_ENTITY, Json(current));
    }
    let mut settings = state.settings.write().await;
    *settings = new_settings.clone();
    (StatusCode::OK, Json(new_settings))
}

/// GET /health
pub async fn health() -> StatusCode {
    StatusCode::OK
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
