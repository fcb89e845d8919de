//! Engine error taxonomy.
//!
//! Scanner- and evaluator-level errors are local: they are logged and the
//! monitoring loop moves on. Only coordinator leg failures become persisted,
//! user-visible trade history. Nothing here is fatal to the process.

use thiserror::Error;

use crate::types::{Fingerprint, LegKind, TradeState};

#[derive(Error, Debug)]
pub enum EngineError {
    /// A quote source, venue, or bridge call failed or timed out.
    /// Retried on the next scan cycle, never mid-execution.
    #[error("transient network error from {source_name}: {message}")]
    TransientNetwork {
        source_name: String,
        message: String,
    },

    /// A deterministic risk gate failed. The opportunity is silently
    /// discarded; this is not surfaced as a user-facing error.
    #[error("insufficient margin: {reason}")]
    InsufficientMargin { reason: String },

    /// The advisory service errored or timed out. The evaluator substitutes
    /// the configured neutral score; logged distinctly from a hard reject.
    #[error("advisory unavailable: {message}")]
    AdvisoryUnavailable { message: String },

    /// A trade leg submission failed or reverted. The trade moves to
    /// `Failed` with a stranded-position record where applicable.
    #[error("{leg} leg failed: {message}")]
    LegFailure { leg: LegKind, message: String },

    /// Another non-terminal trade already exists for this fingerprint.
    /// The request is rejected, not queued.
    #[error("duplicate in-flight trade for fingerprint {fingerprint}")]
    DuplicateInFlight { fingerprint: Fingerprint },

    /// Opportunity data predates the staleness window and must never
    /// be executed.
    #[error("opportunity is stale ({age_secs}s old, window {window_secs}s)")]
    StaleOpportunity { age_secs: i64, window_secs: i64 },

    /// The counting admission gate is full. The candidate is dropped for
    /// this cycle; a still-live discrepancy is re-discovered next scan.
    #[error("execution capacity exhausted ({limit} concurrent)")]
    CapacityExhausted { limit: usize },

    /// Attempted an illegal trade state transition.
    #[error("invalid trade transition {from} -> {to}")]
    InvalidTransition { from: TradeState, to: TradeState },

    /// Opportunity inputs failed construction-time validation.
    #[error("malformed opportunity: {reason}")]
    Malformed { reason: String },
}

pub type EngineResult<T> = Result<T, EngineError>;
