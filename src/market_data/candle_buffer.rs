use std::collections::{HashMap, VecDeque};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Data types
// ---------------------------------------------------------------------------

/// A single OHLCV candle from the futures kline stream or REST backfill.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: i64,
    pub close_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub is_closed: bool,
}

/// Composite key identifying a unique candle series.
#[derive(Debug, Clone, Hash, Eq, PartialEq)]
pub struct CandleKey {
    pub symbol: String,
    pub interval: String,
}

impl CandleKey {
    pub fn new(symbol: impl Into<String>, interval: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            interval: interval.into(),
        }
    }
}

impl std::fmt::Display for CandleKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.symbol, self.interval)
    }
}

// ---------------------------------------------------------------------------
// CandleBuffer -- thread-safe ring buffer per (symbol, interval)
// ---------------------------------------------------------------------------

/// Ring buffer of the most recent candles per `(symbol, interval)`. The live
/// (unclosed) candle is updated in place; once it closes it becomes permanent
/// and the ring is trimmed to `max_candles`.
pub struct CandleBuffer {
    rings: RwLock<HashMap<CandleKey, VecDeque<Candle>>>,
    max_candles: usize,
}

impl CandleBuffer {
    /// Retains at most `max_candles` closed candles per key, plus one
    /// in-progress candle.
    pub fn new(max_candles: usize) -> Self {
        Self {
            rings: RwLock::new(HashMap::new()),
            max_candles,
        }
    }

    /// Insert or replace the latest candle for the given key.
    ///
    /// An incoming candle whose `open_time` matches the current in-progress
    /// tail replaces it (live update or finalisation); anything else is
    /// appended. Closed appends trim the ring back to `max_candles`.
    pub fn push(&self, key: CandleKey, candle: Candle) {
        let mut map = self.rings.write();
        let ring = map
            .entry(key)
            .or_insert_with(|| VecDeque::with_capacity(self.max_candles + 1));

        if let Some(last) = ring.back() {
            if !last.is_closed && last.open_time == candle.open_time {
                ring.pop_back();
            }
        }
        let trim = candle.is_closed;
        ring.push_back(candle);

        if trim {
            while ring.len() > self.max_candles {
                ring.pop_front();
            }
        }
    }

    /// The most recent `count` **closed** candles, oldest first.
    pub fn closed(&self, key: &CandleKey, count: usize) -> Vec<Candle> {
        let map = self.rings.read();
        match map.get(key) {
            Some(ring) => {
                let closed: Vec<&Candle> = ring.iter().filter(|c| c.is_closed).collect();
                let start = closed.len().saturating_sub(count);
                closed[start..].iter().map(|c| (*c).clone()).collect()
            }
            None => Vec::new(),
        }
    }

    /// The latest candle for a key, closed or not.
    pub fn latest(&self, key: &CandleKey) -> Option<Candle> {
        self.rings.read().get(key).and_then(|r| r.back().cloned())
    }

    /// Close price of the most recent closed candle, if any.
    pub fn last_close(&self, key: &CandleKey) -> Option<f64> {
        self.rings
            .read()
            .get(key)
            .and_then(|ring| ring.iter().rev().find(|c| c.is_closed).map(|c| c.close))
    }

    /// Total candles (including any in-progress one) stored for a key.
    pub fn count(&self, key: &CandleKey) -> usize {
        self.rings.read().get(key).map_or(0, VecDeque::len)
    }

    /// Drop series for symbols that left the active set.
    pub fn retain_symbols(&self, active: &[String]) {
        let mut map = self.rings.write();
        map.retain(|key, _| active.iter().any(|s| s == &key.symbol));
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(open_time: i64, close: f64, is_closed: bool) -> Candle {
        Candle {
            open_time,
            close_time: open_time + 59_999,
            open: close,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume: 100.0,
            is_closed,
        }
    }

    fn key(sym: &str, iv: &str) -> CandleKey {
        CandleKey::new(sym, iv)
    }

    #[test]
    fn ring_trims_to_capacity() {
        let buf = CandleBuffer::new(3);
        let k = key("BTCUSDT", "1m");

        for i in 0..5 {
            buf.push(k.clone(), sample(i * 60_000, 100.0 + i as f64, true));
        }

        assert_eq!(buf.count(&k), 3);
        let closes: Vec<f64> = buf.closed(&k, 10).iter().map(|c| c.close).collect();
        assert_eq!(closes, vec![102.0, 103.0, 104.0]);
    }

    #[test]
    fn in_progress_candle_replaced_in_place() {
        let buf = CandleBuffer::new(10);
        let k = key("ETHUSDT", "15m");

        buf.push(k.clone(), sample(0, 50.0, false));
        buf.push(k.clone(), sample(0, 51.0, false));
        assert_eq!(buf.count(&k), 1);

        // Finalisation replaces the live version.
        buf.push(k.clone(), sample(0, 52.0, true));
        assert_eq!(buf.count(&k), 1);
        assert_eq!(buf.last_close(&k), Some(52.0));
    }

    #[test]
    fn closed_excludes_live_candle() {
        let buf = CandleBuffer::new(10);
        let k = key("BTCUSDT", "1m");

        buf.push(k.clone(), sample(0, 100.0, true));
        buf.push(k.clone(), sample(60_000, 101.0, true));
        buf.push(k.clone(), sample(120_000, 102.0, false));

        assert_eq!(buf.closed(&k, 10).len(), 2);
        assert_eq!(buf.latest(&k).unwrap().close, 102.0);
    }

    #[test]
    fn empty_series() {
        let buf = CandleBuffer::new(10);
        let k = key("XYZUSDT", "1m");
        assert_eq!(buf.last_close(&k), None);
        assert!(buf.closed(&k, 5).is_empty());
        assert!(buf.latest(&k).is_none());
    }

    #[test]
    fn retain_symbols_drops_inactive() {
        let buf = CandleBuffer::new(10);
        buf.push(key("BTCUSDT", "1m"), sample(0, 100.0, true));
        buf.push(key("DOGEUSDT", "1m"), sample(0, 0.1, true));

        buf.retain_symbols(&["BTCUSDT".to_string()]);
        assert_eq!(buf.count(&key("BTCUSDT", "1m")), 1);
        assert_eq!(buf.count(&key("DOGEUSDT", "1m")), 0);
    }
}
