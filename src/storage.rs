//! Persistence layer.
//!
//! Saves and loads the trade history to/from a JSON file. The core holds
//! history in memory for the process lifetime; this snapshot is the
//! optional external persistence written on shutdown and restored on the
//! next start. Absence of the file is a fresh start, not an error.

use anyhow::{Context, Result};
use std::path::Path;
use tracing::{debug, info};

use crate::types::Trade;

/// Default history file path.
const DEFAULT_HISTORY_FILE: &str = "spanner_history.json";

/// Save the trade history to a JSON file.
pub fn save_history(trades: &[Trade], path: Option<&str>) -> Result<()> {
    let path = path.unwrap_or(DEFAULT_HISTORY_FILE);
    let json = serde_json::to_string_pretty(trades)
        .context("Failed to serialise trade history")?;

    std::fs::write(path, &json)
        .context(format!("Failed to write history to {path}"))?;

    debug!(path, trades = trades.len(), "History saved");
    Ok(())
}

/// Load the trade history from a JSON file.
/// Returns None if the file doesn't exist (fresh start).
pub fn load_history(path: Option<&str>) -> Result<Option<Vec<Trade>>> {
    let path = path.unwrap_or(DEFAULT_HISTORY_FILE);

    if !Path::new(path).exists() {
        info!(path, "No saved history found, starting fresh");
        return Ok(None);
    }

    let json = std::fs::read_to_string(path)
        .context(format!("Failed to read history from {path}"))?;

    let trades: Vec<Trade> = serde_json::from_str(&json)
        .context(format!("Failed to parse history from {path}"))?;

    info!(path, trades = trades.len(), "History loaded from disk");

    Ok(Some(trades))
}

/// Delete the history file (for testing or reset).
pub fn delete_history(path: Option<&str>) -> Result<()> {
    let path = path.unwrap_or(DEFAULT_HISTORY_FILE);
    if Path::new(path).exists() {
        std::fs::remove_file(path)
            .context(format!("Failed to delete history file {path}"))?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
