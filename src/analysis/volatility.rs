// =============================================================================
// Volatility Estimator — ATR(14) over minute candles
// =============================================================================
//
// True Range per candle:
//   TR = max(H − L, |H − prevClose|, |L − prevClose|)
//
// ATR is the arithmetic mean of the most recent `period` TR values (no
// Wilder smoothing). The result feeds the stop buffer and the ±3·ATR
// working range bounding the levels search.
//
// Estimates are cached per instrument for 60 seconds.
// =============================================================================

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::market_data::Candle;
use crate::types::VolatilityClass;

/// Cache lifetime of a per-symbol estimate.
const CACHE_TTL: Duration = Duration::from_secs(60);

/// Volatility class boundaries on ATR as a percentage of price.
const LOW_BOUNDARY_PCT: f64 = 0.3;
const HIGH_BOUNDARY_PCT: f64 = 0.7;

/// One volatility estimate for an instrument.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolatilityEstimate {
    /// ATR in price units.
    pub atr: f64,
    /// ATR as a percentage of the latest close.
    pub volatility_pct: f64,
    pub class: VolatilityClass,
    /// Close of the newest candle the estimate was computed from.
    pub current_price: f64,
}

/// Price band the levels analyzer searches within.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct WorkingRange {
    pub lower: f64,
    pub upper: f64,
    pub current_price: f64,
    pub atr: f64,
}

impl VolatilityEstimate {
    /// Working range = current price ± multiplier·ATR.
    pub fn working_range(&self, multiplier: f64) -> WorkingRange {
        WorkingRange {
            lower: self.current_price - multiplier * self.atr,
            upper: self.current_price + multiplier * self.atr,
            current_price: self.current_price,
            atr: self.atr,
        }
    }
}

/// Compute the ATR over the most recent `period` true ranges.
///
/// `candles` must be closed minute candles, oldest first. Returns `None`
/// when `period` is zero, fewer than `period + 1` candles exist, or any
/// intermediate value is non-finite.
pub fn calculate_atr(candles: &[Candle], period: usize) -> Option<f64> {
    if period == 0 || candles.len() < period + 1 {
        return None;
    }

    // Only the newest period+1 candles participate.
    let window = &candles[candles.len() - (period + 1)..];

    let mut sum = 0.0;
    for i in 1..window.len() {
        let high = window[i].high;
        let low = window[i].low;
        let prev_close = window[i - 1].close;

        let tr = (high - low)
            .max((high - prev_close).abs())
            .max((low - prev_close).abs());
        sum += tr;
    }

    let atr = sum / period as f64;
    atr.is_finite().then_some(atr)
}

/// Classify ATR-as-percentage into LOW / MEDIUM / HIGH.
fn classify(volatility_pct: f64) -> VolatilityClass {
    if volatility_pct < LOW_BOUNDARY_PCT {
        VolatilityClass::Low
    } else if volatility_pct < HIGH_BOUNDARY_PCT {
        VolatilityClass::Medium
    } else {
        VolatilityClass::High
    }
}

/// Per-instrument estimator with a 60 s result cache.
pub struct VolatilityEstimator {
    atr_period: usize,
    cache: RwLock<HashMap<String, (Instant, VolatilityEstimate)>>,
}

impl VolatilityEstimator {
    pub fn new(atr_period: usize) -> Self {
        Self {
            atr_period,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Estimate volatility for `symbol` from its closed minute candles
    /// (oldest first). Returns `None` when history is insufficient.
    pub fn estimate(&self, symbol: &str, candles: &[Candle]) -> Option<VolatilityEstimate> {
        if let Some((at, cached)) = self.cache.read().get(symbol) {
            if at.elapsed() < CACHE_TTL {
                return Some(cached.clone());
            }
        }

        let atr = calculate_atr(candles, self.atr_period)?;
        let current_price = candles.last()?.close;
        if current_price <= 0.0 {
            return None;
        }

        let volatility_pct = (atr / current_price) * 100.0;
        let estimate = VolatilityEstimate {
            atr,
            volatility_pct,
            class: classify(volatility_pct),
            current_price,
        };

        debug!(
            symbol = %symbol,
            atr = format!("{atr:.6}"),
            volatility_pct = format!("{volatility_pct:.4}"),
            class = %estimate.class,
            "volatility estimated"
        );

        self.cache
            .write()
            .insert(symbol.to_string(), (Instant::now(), estimate.clone()));
        Some(estimate)
    }

    /// Drop cached estimates for instruments outside the active set.
    pub fn retain_symbols(&self, active: &[String]) {
        self.cache
            .write()
            .retain(|sym, _| active.iter().any(|s| s == sym));
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn candle(open: f64, high: f64, low: f64, close: f64) -> Candle {
        Candle {
            open_time: 0,
            close_time: 59_999,
            open,
            high,
            low,
            close,
            volume: 100.0,
            is_closed: true,
        }
    }

    fn flat_series(n: usize, range: f64) -> Vec<Candle> {
        (0..n)
            .map(|_| candle(100.0, 100.0 + range / 2.0, 100.0 - range / 2.0, 100.0))
            .collect()
    }

    #[test]
    fn atr_needs_period_plus_one_candles() {
        let candles = flat_series(14, 1.0);
        assert!(calculate_atr(&candles, 14).is_none());

        let candles = flat_series(15, 1.0);
        assert!(calculate_atr(&candles, 14).is_some());
    }

    #[test]
    fn atr_period_zero_is_none() {
        assert!(calculate_atr(&flat_series(20, 1.0), 0).is_none());
    }

    #[test]
    fn atr_of_constant_range_equals_range() {
        // Every candle spans exactly 1.0 and closes at the midpoint, so
        // TR == 1.0 for each pair and the mean is 1.0.
        let atr = calculate_atr(&flat_series(20, 1.0), 14).unwrap();
        assert!((atr - 1.0).abs() < 1e-9);
    }

    #[test]
    fn atr_uses_prev_close_on_gaps() {
        // Gap up: |high − prevClose| dominates H−L.
        let candles = vec![
            candle(100.0, 101.0, 99.0, 99.0),
            candle(110.0, 111.0, 109.0, 110.0), // TR = |111−99| = 12
            candle(110.0, 111.0, 109.0, 110.0), // TR = 2
            candle(110.0, 111.0, 109.0, 110.0), // TR = 2
        ];
        let atr = calculate_atr(&candles, 3).unwrap();
        assert!((atr - (12.0 + 2.0 + 2.0) / 3.0).abs() < 1e-9);
    }

    #[test]
    fn atr_nan_is_none() {
        let mut candles = flat_series(16, 1.0);
        candles[10].high = f64::NAN;
        assert!(calculate_atr(&candles, 14).is_none());
    }

    #[test]
    fn classification_boundaries() {
        assert_eq!(classify(0.29), VolatilityClass::Low);
        assert_eq!(classify(0.3), VolatilityClass::Medium);
        assert_eq!(classify(0.69), VolatilityClass::Medium);
        assert_eq!(classify(0.7), VolatilityClass::High);
    }

    #[test]
    fn estimate_and_working_range() {
        let est = VolatilityEstimator::new(14);
        let candles = flat_series(20, 1.0);
        let stats = est.estimate("BTCUSDT", &candles).unwrap();

        assert!((stats.atr - 1.0).abs() < 1e-9);
        assert!((stats.volatility_pct - 1.0).abs() < 1e-9);
        assert_eq!(stats.class, VolatilityClass::High);

        let range = stats.working_range(3.0);
        assert!((range.lower - 97.0).abs() < 1e-9);
        assert!((range.upper - 103.0).abs() < 1e-9);
    }

    #[test]
    fn estimate_cached_within_ttl() {
        let est = VolatilityEstimator::new(14);
        let candles = flat_series(20, 1.0);
        let first = est.estimate("BTCUSDT", &candles).unwrap();

        // Different data, same symbol: the cached value is served.
        let wider = flat_series(20, 5.0);
        let second = est.estimate("BTCUSDT", &wider).unwrap();
        assert_eq!(first.atr, second.atr);
    }

    #[test]
    fn insufficient_history_is_none() {
        let est = VolatilityEstimator::new(14);
        assert!(est.estimate("BTCUSDT", &flat_series(10, 1.0)).is_none());
    }
}
