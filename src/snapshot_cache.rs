// =============================================================================
// Snapshot Cache — process-wide keyed store with per-key TTL
// =============================================================================
//
// Holds the latest market snapshots consumed by the entry gate and the fast
// tracker: order book, global imbalance, best bid/ask price point, trade
// flow summary, and the latest 15-minute candle. One writer per key (the
// ingest pipeline); readers treat absence as "skip this tick".
//
// This is the in-process mode of the cache wire contract. It is not shared
// across processes; values are JSON objects so the contract stays identical
// if an external backing is ever wired in.
// =============================================================================

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

// ── Standard TTLs per key family ─────────────────────────────────────────────

/// Depth, imbalance and price snapshots go stale quickly.
pub const TTL_FAST: Duration = Duration::from_secs(10);
/// Trade-flow summaries survive a little longer.
pub const TTL_TRADE_FLOW: Duration = Duration::from_secs(60);
/// The 15-minute candle is refreshed on every stream update anyway.
pub const TTL_KLINE_15M: Duration = Duration::from_secs(900);

// ── Key builders ─────────────────────────────────────────────────────────────

pub fn key_orderbook(symbol: &str) -> String {
    format!("orderbook:{symbol}")
}

pub fn key_imbalance(symbol: &str) -> String {
    format!("imbalance:{symbol}")
}

pub fn key_price(symbol: &str) -> String {
    format!("price:{symbol}")
}

pub fn key_trade_flow(symbol: &str) -> String {
    format!("trade_flow:{symbol}")
}

pub fn key_large_orders(symbol: &str) -> String {
    format!("large_orders:{symbol}")
}

pub fn key_kline_15m(symbol: &str) -> String {
    format!("kline_15m:{symbol}")
}

// ── Cached payload shapes ────────────────────────────────────────────────────

/// Best bid/ask point published from the bookTicker stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricePoint {
    pub bid: f64,
    pub ask: f64,
    pub mid: f64,
    /// Exchange event time, milliseconds.
    pub timestamp: i64,
}

/// Global imbalance payload. Kept as an object (not a bare float) so the
/// wire shape matches what the fast tracker reads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImbalancePayload {
    pub imbalance: f64,
}

// ── Cache implementation ─────────────────────────────────────────────────────

struct CacheEntry {
    value: serde_json::Value,
    expires_at: Instant,
}

/// Keyed TTL store. Cheap to clone behind an `Arc`.
pub struct SnapshotCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl SnapshotCache {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Store a serialisable value under `key` with the given TTL.
    pub fn set<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) {
        let json = match serde_json::to_value(value) {
            Ok(v) => v,
            Err(e) => {
                warn!(key = %key, error = %e, "failed to serialise cache value");
                return;
            }
        };

        self.entries.write().insert(
            key.to_string(),
            CacheEntry {
                value: json,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    /// Fetch and deserialise the value under `key`.
    ///
    /// Returns `None` when the key is missing, expired, or fails to
    /// deserialise into `T`. Expired entries are removed on the spot.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = self.get_raw(key)?;
        match serde_json::from_value(raw) {
            Ok(v) => Some(v),
            Err(e) => {
                warn!(key = %key, error = %e, "cache value failed to deserialise");
                None
            }
        }
    }

    /// Fetch the raw JSON value under `key`, honouring expiry.
    pub fn get_raw(&self, key: &str) -> Option<serde_json::Value> {
        {
            let entries = self.entries.read();
            match entries.get(key) {
                Some(entry) if entry.expires_at > Instant::now() => {
                    return Some(entry.value.clone());
                }
                Some(_) => {} // expired, fall through to removal
                None => return None,
            }
        }

        // Lazily drop the expired entry.
        self.entries.write().remove(key);
        None
    }

    /// Remove a key outright.
    pub fn remove(&self, key: &str) {
        self.entries.write().remove(key);
    }

    /// Drop every expired entry. Called from a periodic housekeeping task so
    /// keys for instruments that left the universe do not accumulate.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, e| e.expires_at > now);
        let removed = before - entries.len();
        if removed > 0 {
            debug!(removed, "snapshot cache sweep");
        }
        removed
    }

    /// Number of live (possibly expired-but-unswept) entries.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl Default for SnapshotCache {
    fn default() -> Self {
        Self::new()
    }
}
