// =============================================================================
// Entry Persistence Tracker — consecutive-sample gate against noise spikes
// =============================================================================
//
// A signal proposal requires the full confluence to hold for N consecutive
// 100 ms samples (default 50 ≈ 5 s). Any failed sample zeroes the counter;
// reaching the threshold fires exactly once and zeroes it again.
//
// Data absence is abstention, not failure: the caller simply does not call
// `update` for that tick and the counter keeps its value.
// =============================================================================

use std::collections::HashMap;

use parking_lot::RwLock;
use tracing::{debug, info};

pub struct EntryPersistenceTracker {
    counters: RwLock<HashMap<String, u32>>,
    threshold: u32,
}

impl EntryPersistenceTracker {
    pub fn new(threshold: u32) -> Self {
        Self {
            counters: RwLock::new(HashMap::new()),
            threshold,
        }
    }

    /// Feed one evaluated sample for `symbol`.
    ///
    /// Returns `true` exactly when the counter reaches the threshold — the
    /// caller should build and emit one signal proposal. The counter resets
    /// both on firing and on any failed sample.
    pub fn update(&self, symbol: &str, all_conditions_met: bool) -> bool {
        let mut counters = self.counters.write();
        let counter = counters.entry(symbol.to_string()).or_insert(0);

        if !all_conditions_met {
            if *counter > 0 {
                debug!(symbol = %symbol, from = *counter, "confluence broke — counter reset");
            }
            *counter = 0;
            return false;
        }

        *counter += 1;
        if *counter >= self.threshold {
            info!(
                symbol = %symbol,
                samples = *counter,
                seconds = *counter as f64 * 0.1,
                "entry confluence confirmed"
            );
            *counter = 0;
            return true;
        }
        false
    }

    /// Current counter value for a symbol (0 when untracked).
    pub fn counter(&self, symbol: &str) -> u32 {
        self.counters.read().get(symbol).copied().unwrap_or(0)
    }

    /// Zero one symbol's counter.
    pub fn reset(&self, symbol: &str) {
        if let Some(counter) = self.counters.write().get_mut(symbol) {
            *counter = 0;
        }
    }

    /// Remove counters for instruments that left the active set.
    pub fn retain_symbols(&self, active: &[String]) {
        let mut counters = self.counters.write();
        let before = counters.len();
        counters.retain(|sym, _| active.iter().any(|s| s == sym));
        let removed = before - counters.len();
        if removed > 0 {
            info!(removed, "persistence counters cleaned up");
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fires_exactly_at_threshold_then_resets() {
        let tracker = EntryPersistenceTracker::new(50);

        for i in 1..50 {
            assert!(!tracker.update("BTCUSDT", true), "fired early at {i}");
            assert_eq!(tracker.counter("BTCUSDT"), i);
        }
        assert!(tracker.update("BTCUSDT", true), "should fire at 50");
        assert_eq!(tracker.counter("BTCUSDT"), 0);
    }

    #[test]
    fn any_miss_resets_to_zero() {
        let tracker = EntryPersistenceTracker::new(50);

        // 49 good samples, then the confluence breaks on sample 50.
        for _ in 0..49 {
            tracker.update("BTCUSDT", true);
        }
        assert_eq!(tracker.counter("BTCUSDT"), 49);
        assert!(!tracker.update("BTCUSDT", false));
        assert_eq!(tracker.counter("BTCUSDT"), 0);

        // The very next good sample counts as 1 again.
        assert!(!tracker.update("BTCUSDT", true));
        assert_eq!(tracker.counter("BTCUSDT"), 1);
    }

    #[test]
    fn counter_strictly_increases_on_success() {
        let tracker = EntryPersistenceTracker::new(10);
        for expected in 1..=9 {
            tracker.update("ETHUSDT", true);
            assert_eq!(tracker.counter("ETHUSDT"), expected);
        }
    }

    #[test]
    fn symbols_are_independent() {
        let tracker = EntryPersistenceTracker::new(3);
        tracker.update("BTCUSDT", true);
        tracker.update("BTCUSDT", true);
        tracker.update("ETHUSDT", true);

        assert_eq!(tracker.counter("BTCUSDT"), 2);
        assert_eq!(tracker.counter("ETHUSDT"), 1);

        tracker.update("ETHUSDT", false);
        assert_eq!(tracker.counter("BTCUSDT"), 2);
        assert_eq!(tracker.counter("ETHUSDT"), 0);
    }

    #[test]
    fn manual_reset() {
        let tracker = EntryPersistenceTracker::new(10);
        tracker.update("BTCUSDT", true);
        tracker.reset("BTCUSDT");
        assert_eq!(tracker.counter("BTCUSDT"), 0);
    }

    #[test]
    fn inactive_cleanup_removes_counters() {
        let tracker = EntryPersistenceTracker::new(10);
        tracker.update("BTCUSDT", true);
        tracker.update("DOGEUSDT", true);

        tracker.retain_symbols(&["BTCUSDT".to_string()]);
        assert_eq!(tracker.counter("BTCUSDT"), 1);
        assert_eq!(tracker.counter("DOGEUSDT"), 0);
        assert!(!tracker.counters.read().contains_key("DOGEUSDT"));
    }
}
