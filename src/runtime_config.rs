// =============================================================================
// Runtime Configuration — Engine settings with per-field serde defaults
// =============================================================================
//
// Every tunable parameter of the scanner lives here. The file is loaded once
// at startup; a missing file falls back to defaults with a warning, while a
// file that exists but does not parse is a fatal startup error.
//
// Persistence uses an atomic tmp + rename pattern so a crash mid-write can
// never corrupt the config. All fields carry `#[serde(default)]` so adding
// new fields never breaks loading an older file.
// =============================================================================

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_symbols() -> Vec<String> {
    vec![
        "BTCUSDT".to_string(),
        "ETHUSDT".to_string(),
        "SOLUSDT".to_string(),
        "BNBUSDT".to_string(),
        "XRPUSDT".to_string(),
    ]
}

fn default_database_path() -> String {
    "vega_scanner.db".to_string()
}

fn default_imbalance_entry_threshold() -> f64 {
    0.15
}

fn default_min_large_trades() -> u32 {
    2
}

fn default_volume_confirmation_multiplier() -> f64 {
    1.5
}

fn default_large_trade_percentile() -> u32 {
    99
}

fn default_large_trade_floor_usd() -> f64 {
    10_000.0
}

fn default_persistence_entry_samples() -> u32 {
    50
}

fn default_imbalance_reversal_threshold() -> f64 {
    0.4
}

fn default_persistence_reversal_samples() -> u32 {
    75
}

fn default_min_hold_seconds() -> u64 {
    30
}

fn default_priority_high() -> f64 {
    0.25
}

fn default_priority_medium() -> f64 {
    0.20
}

fn default_max_stop_pct() -> f64 {
    1.5
}

fn default_min_tp_pct() -> f64 {
    0.50
}

fn default_min_rr() -> f64 {
    0.8
}

fn default_atr_period() -> usize {
    14
}

fn default_working_range_multiplier() -> f64 {
    3.0
}

fn default_orderbook_depth_analysis() -> usize {
    500
}

fn default_bin_size_pct() -> f64 {
    0.2
}

fn default_fast_tick_interval_ms() -> u64 {
    100
}

fn default_cache_sync_interval_secs() -> u64 {
    5
}

fn default_universe_rescan_interval_secs() -> u64 {
    3600
}

fn default_metrics_interval_secs() -> u64 {
    3600
}

fn default_universe_min_quote_volume() -> f64 {
    50_000_000.0
}

fn default_universe_max_spread() -> f64 {
    0.0002
}

fn default_universe_max_symbols() -> usize {
    30
}

fn default_rate_limit_weight_per_minute() -> u32 {
    2400
}

// =============================================================================
// EngineConfig
// =============================================================================

/// Top-level configuration for the Vega scanner.
///
/// Every field has a serde default so older JSON files missing new fields
/// still deserialise correctly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    // --- Instruments --------------------------------------------------------

    /// Fallback instrument list used when the universe scan is unavailable.
    /// The live active set is maintained by the universe selector.
    #[serde(default = "default_symbols")]
    pub symbols: Vec<String>,

    /// Path of the SQLite database file.
    #[serde(default = "default_database_path")]
    pub database_path: String,

    // --- Entry gate ---------------------------------------------------------

    /// Minimum |global imbalance| to propose a signal.
    #[serde(default = "default_imbalance_entry_threshold")]
    pub imbalance_entry_threshold: f64,

    /// Minimum count of side-matching large trades in the 5-minute window.
    #[serde(default = "default_min_large_trades")]
    pub min_large_trades: u32,

    /// Minimum volume intensity (current vol/min vs 15m-candle baseline).
    #[serde(default = "default_volume_confirmation_multiplier")]
    pub volume_confirmation_multiplier: f64,

    /// Percentile of window notional sizes used for the dynamic large-trade
    /// threshold.
    #[serde(default = "default_large_trade_percentile")]
    pub large_trade_percentile: u32,

    /// Absolute floor (USD notional) under the dynamic large-trade threshold.
    #[serde(default = "default_large_trade_floor_usd")]
    pub large_trade_floor_usd: f64,

    /// Consecutive 100 ms samples the full confluence must hold before a
    /// signal is emitted (50 ≈ 5 s).
    #[serde(default = "default_persistence_entry_samples")]
    pub persistence_entry_samples: u32,

    // --- Exit gate ----------------------------------------------------------

    /// Opposing |imbalance| beyond which the reversal counter advances.
    #[serde(default = "default_imbalance_reversal_threshold")]
    pub imbalance_reversal_threshold: f64,

    /// Consecutive reversed samples required to close (75 ≈ 7.5 s).
    #[serde(default = "default_persistence_reversal_samples")]
    pub persistence_reversal_samples: u32,

    /// Reversal exits are suppressed until the signal is this old.
    #[serde(default = "default_min_hold_seconds")]
    pub min_hold_seconds: u64,

    // --- Priority & risk ----------------------------------------------------

    /// |imbalance| cutoff for HIGH priority.
    #[serde(default = "default_priority_high")]
    pub priority_high: f64,

    /// |imbalance| cutoff for MEDIUM priority.
    #[serde(default = "default_priority_medium")]
    pub priority_medium: f64,

    /// Maximum stop distance as a percentage of entry.
    #[serde(default = "default_max_stop_pct")]
    pub max_stop_pct: f64,

    /// Minimum TP1 distance as a percentage of entry (commission safety).
    #[serde(default = "default_min_tp_pct")]
    pub min_tp_pct: f64,

    /// Minimum risk/reward at TP1.
    #[serde(default = "default_min_rr")]
    pub min_rr: f64,

    // --- Volatility & levels ------------------------------------------------

    /// ATR look-back period (1-minute candles).
    #[serde(default = "default_atr_period")]
    pub atr_period: usize,

    /// Working range half-width in ATR multiples around the mid price.
    #[serde(default = "default_working_range_multiplier")]
    pub working_range_multiplier: f64,

    /// Depth levels requested from REST for the levels pass.
    #[serde(default = "default_orderbook_depth_analysis")]
    pub orderbook_depth_analysis: usize,

    /// Price-bucket width for clustering, as a percentage of price.
    #[serde(default = "default_bin_size_pct")]
    pub bin_size_pct: f64,

    // --- Cadences -----------------------------------------------------------

    /// Entry-gate and fast-tracker tick interval.
    #[serde(default = "default_fast_tick_interval_ms")]
    pub fast_tick_interval_ms: u64,

    /// How often the fast tracker reloads the open-signal set from the store.
    #[serde(default = "default_cache_sync_interval_secs")]
    pub cache_sync_interval_secs: u64,

    /// How often the instrument universe is rescanned.
    #[serde(default = "default_universe_rescan_interval_secs")]
    pub universe_rescan_interval_secs: u64,

    /// How often performance metrics are aggregated.
    #[serde(default = "default_metrics_interval_secs")]
    pub metrics_interval_secs: u64,

    // --- Universe selection -------------------------------------------------

    /// Minimum 24 h quote volume (USD) for an instrument to qualify.
    #[serde(default = "default_universe_min_quote_volume")]
    pub universe_min_quote_volume: f64,

    /// Maximum relative spread for an instrument to qualify.
    #[serde(default = "default_universe_max_spread")]
    pub universe_max_spread: f64,

    /// Hard cap on the active instrument set.
    #[serde(default = "default_universe_max_symbols")]
    pub universe_max_symbols: usize,

    // --- Exchange REST ------------------------------------------------------

    /// Outbound REST weight budget per minute.
    #[serde(default = "default_rate_limit_weight_per_minute")]
    pub rate_limit_weight_per_minute: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        // Deserialising an empty object applies every serde default; keeps
        // Default and the serde defaults from drifting apart.
        serde_json::from_str("{}").expect("defaults must deserialise")
    }
}

impl EngineConfig {
    /// Load configuration from a JSON file at `path`.
    ///
    /// Returns `Ok(None)` when the file does not exist (caller falls back to
    /// defaults); a file that exists but fails to parse is an error the
    /// caller must treat as fatal.
    pub fn load(path: impl AsRef<Path>) -> Result<Option<Self>> {
        let path = path.as_ref();

        if !path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read engine config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse engine config from {}", path.display()))?;

        info!(
            path = %path.display(),
            symbols = ?config.symbols,
            "engine config loaded"
        );

        Ok(Some(config))
    }

    /// Persist the current configuration to `path` using an atomic write
    /// (write to `.tmp`, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content = serde_json::to_string_pretty(self)
            .context("failed to serialise engine config to JSON")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "engine config saved (atomic)");
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_specified_values() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.imbalance_entry_threshold, 0.15);
        assert_eq!(cfg.min_large_trades, 2);
        assert_eq!(cfg.volume_confirmation_multiplier, 1.5);
        assert_eq!(cfg.large_trade_percentile, 99);
        assert_eq!(cfg.large_trade_floor_usd, 10_000.0);
        assert_eq!(cfg.persistence_entry_samples, 50);
        assert_eq!(cfg.imbalance_reversal_threshold, 0.4);
        assert_eq!(cfg.persistence_reversal_samples, 75);
        assert_eq!(cfg.min_hold_seconds, 30);
        assert_eq!(cfg.priority_high, 0.25);
        assert_eq!(cfg.priority_medium, 0.20);
        assert_eq!(cfg.max_stop_pct, 1.5);
        assert_eq!(cfg.min_tp_pct, 0.50);
        assert_eq!(cfg.min_rr, 0.8);
        assert_eq!(cfg.atr_period, 14);
        assert_eq!(cfg.working_range_multiplier, 3.0);
        assert_eq!(cfg.orderbook_depth_analysis, 500);
        assert_eq!(cfg.bin_size_pct, 0.2);
        assert_eq!(cfg.fast_tick_interval_ms, 100);
        assert_eq!(cfg.cache_sync_interval_secs, 5);
        assert_eq!(cfg.universe_rescan_interval_secs, 3600);
    }

    #[test]
    fn deserialise_empty_json_uses_defaults() {
        let cfg: EngineConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.persistence_entry_samples, 50);
        assert_eq!(cfg.persistence_reversal_samples, 75);
        assert_eq!(cfg.symbols.len(), 5);
    }

    #[test]
    fn deserialise_partial_json_fills_defaults() {
        let json = r#"{ "symbols": ["ETHUSDT"], "min_large_trades": 4 }"#;
        let cfg: EngineConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.symbols, vec!["ETHUSDT"]);
        assert_eq!(cfg.min_large_trades, 4);
        assert_eq!(cfg.imbalance_entry_threshold, 0.15);
    }

    #[test]
    fn roundtrip_serialisation() {
        let cfg = EngineConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let cfg2: EngineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg.symbols, cfg2.symbols);
        assert_eq!(cfg.max_stop_pct, cfg2.max_stop_pct);
        assert_eq!(cfg.persistence_reversal_samples, cfg2.persistence_reversal_samples);
    }

    #[test]
    fn load_missing_file_returns_none() {
        let loaded = EngineConfig::load("/nonexistent/vega_config.json").unwrap();
        assert!(loaded.is_none());
    }
}
