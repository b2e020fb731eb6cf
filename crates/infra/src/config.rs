//! Runtime configuration for the stock core.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Thresholds and defaults consumed by the stock service and workers.
///
/// Values come from `Default`, overridden by environment variables:
///
/// - `APOTHECA_DEFAULT_LOW_STOCK_THRESHOLD`: per-batch threshold used when
///   the caller does not supply one at receipt.
/// - `APOTHECA_EXPIRY_SCAN_INTERVAL_SECS`: seconds between expiry scans.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockConfig {
    pub default_low_stock_threshold: i64,
    pub expiry_scan_interval_secs: u64,
}

impl Default for StockConfig {
    fn default() -> Self {
        Self {
            default_low_stock_threshold: 10,
            // Daily scan.
            expiry_scan_interval_secs: 24 * 60 * 60,
        }
    }
}

impl StockConfig {
    /// Load configuration from the environment, falling back to defaults.
    ///
    /// Unparseable values are ignored with a warning rather than failing
    /// startup.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(v) = read_env_i64("APOTHECA_DEFAULT_LOW_STOCK_THRESHOLD") {
            if v >= 0 {
                config.default_low_stock_threshold = v;
            } else {
                warn!(value = v, "ignoring negative low stock threshold");
            }
        }

        if let Some(v) = read_env_i64("APOTHECA_EXPIRY_SCAN_INTERVAL_SECS") {
            if v > 0 {
                config.expiry_scan_interval_secs = v as u64;
            } else {
                warn!(value = v, "ignoring non-positive expiry scan interval");
            }
        }

        config
    }

    pub fn expiry_scan_interval(&self) -> Duration {
        Duration::from_secs(self.expiry_scan_interval_secs)
    }
}

fn read_env_i64(key: &str) -> Option<i64> {
    let raw = std::env::var(key).ok()?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(key, value = %raw, "ignoring unparseable config value");
            None
        }
    }
}
