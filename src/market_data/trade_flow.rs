// =============================================================================
// Trade Flow Aggregator — rolling 5-minute large-trade analysis
// =============================================================================
//
// Per instrument, two parallel deques hold the recent trades and their
// notional sizes. Pruning always walks both from the head together, so the
// indices can never drift. The large-trade threshold is dynamic: the 99th
// percentile of notional sizes in the window, floored by a configured
// minimum, with the floor alone used until the window holds 20 trades.
//
// All pruning is driven by exchange event time, never wall-clock.
// =============================================================================

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Rolling window width in milliseconds.
const WINDOW_MS: i64 = 5 * 60 * 1000;

/// Minimum window population before the percentile is meaningful.
const MIN_TRADES_FOR_PERCENTILE: usize = 20;

/// A single aggregated trade from the `aggTrade` stream.
#[derive(Debug, Clone, Copy)]
pub struct FlowTrade {
    /// Exchange event time, milliseconds.
    pub time: i64,
    pub price: f64,
    pub qty: f64,
    /// Buyer was the maker ⇒ the aggressor sold.
    pub buyer_is_maker: bool,
}

/// Snapshot of the window computed on demand; published to the snapshot
/// cache under `trade_flow:<symbol>`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TradeFlowSummary {
    pub large_buys: u32,
    pub large_sells: u32,
    pub total_volume: f64,
    pub buy_volume: f64,
    pub sell_volume: f64,
    pub volume_per_minute: f64,
    pub trade_count: usize,
    pub avg_trade_size: f64,
    pub dynamic_threshold: f64,
    pub vwap: f64,
}

struct SymbolWindow {
    trades: VecDeque<FlowTrade>,
    notionals: VecDeque<f64>,
}

impl SymbolWindow {
    fn new() -> Self {
        Self {
            trades: VecDeque::new(),
            notionals: VecDeque::new(),
        }
    }

    /// Drop head entries older than the window relative to `now_ms`.
    /// Both deques advance together.
    fn prune(&mut self, now_ms: i64) {
        while let Some(front) = self.trades.front() {
            if now_ms - front.time > WINDOW_MS {
                self.trades.pop_front();
                self.notionals.pop_front();
            } else {
                break;
            }
        }
        debug_assert_eq!(self.trades.len(), self.notionals.len());
    }
}

/// Registry of per-instrument rolling windows. Single logical writer per
/// symbol (the ingest handler); summaries are computed under the same lock.
pub struct TradeFlowAggregator {
    windows: RwLock<HashMap<String, SymbolWindow>>,
    percentile: u32,
    floor_usd: f64,
    /// Malformed trades dropped without aborting the window.
    rejected: AtomicU64,
}

impl TradeFlowAggregator {
    pub fn new(percentile: u32, floor_usd: f64) -> Self {
        Self {
            windows: RwLock::new(HashMap::new()),
            percentile: percentile.clamp(1, 100),
            floor_usd,
            rejected: AtomicU64::new(0),
        }
    }

    /// Ingest one trade. Malformed trades (non-finite or non-positive price
    /// or quantity) are dropped and counted; they never abort the window.
    /// Returns whether the trade was accepted.
    pub fn record(&self, symbol: &str, trade: FlowTrade) -> bool {
        if !trade.price.is_finite()
            || !trade.qty.is_finite()
            || trade.price <= 0.0
            || trade.qty <= 0.0
        {
            let n = self.rejected.fetch_add(1, Ordering::Relaxed) + 1;
            warn!(symbol = %symbol, rejected_total = n, "dropping malformed trade");
            return false;
        }

        let notional = trade.price * trade.qty;

        let mut windows = self.windows.write();
        let window = windows
            .entry(symbol.to_string())
            .or_insert_with(SymbolWindow::new);

        window.prune(trade.time);
        window.trades.push_back(trade);
        window.notionals.push_back(notional);
        true
    }

    /// Compute the window summary as of `now_ms` (normally the event time of
    /// the trade that triggered the refresh). Returns `None` when the symbol
    /// has no window yet.
    pub fn summarize(&self, symbol: &str, now_ms: i64) -> Option<TradeFlowSummary> {
        let mut windows = self.windows.write();
        let window = windows.get_mut(symbol)?;
        window.prune(now_ms);

        if window.trades.is_empty() {
            return Some(TradeFlowSummary::default());
        }

        let threshold = self.dynamic_threshold(&window.notionals);

        let mut summary = TradeFlowSummary {
            dynamic_threshold: threshold,
            trade_count: window.trades.len(),
            ..TradeFlowSummary::default()
        };

        let mut price_qty_sum = 0.0;
        let mut qty_sum = 0.0;

        for (trade, &notional) in window.trades.iter().zip(window.notionals.iter()) {
            summary.total_volume += notional;
            price_qty_sum += trade.price * trade.qty;
            qty_sum += trade.qty;

            if trade.buyer_is_maker {
                // Aggressor sold.
                summary.sell_volume += notional;
                if notional >= threshold {
                    summary.large_sells += 1;
                }
            } else {
                summary.buy_volume += notional;
                if notional >= threshold {
                    summary.large_buys += 1;
                }
            }
        }

        summary.volume_per_minute = summary.total_volume / (WINDOW_MS as f64 / 60_000.0);
        summary.avg_trade_size = summary.total_volume / summary.trade_count as f64;
        summary.vwap = if qty_sum > 0.0 {
            price_qty_sum / qty_sum
        } else {
            0.0
        };

        Some(summary)
    }

    /// 99th-percentile (nearest-rank) of the window notionals, floored.
    /// Below the minimum population the floor stands alone.
    fn dynamic_threshold(&self, notionals: &VecDeque<f64>) -> f64 {
        if notionals.len() < MIN_TRADES_FOR_PERCENTILE {
            return self.floor_usd;
        }

        let mut sorted: Vec<f64> = notionals.iter().copied().collect();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        let rank = ((self.percentile as f64 / 100.0) * sorted.len() as f64).ceil() as usize;
        let idx = rank.saturating_sub(1).min(sorted.len() - 1);

        sorted[idx].max(self.floor_usd)
    }

    /// Number of trades currently held for a symbol.
    pub fn window_len(&self, symbol: &str) -> usize {
        self.windows
            .read()
            .get(symbol)
            .map_or(0, |w| w.trades.len())
    }

    /// Total malformed trades dropped since startup.
    pub fn rejected_count(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    /// Drop windows for instruments that left the active set.
    pub fn retain_symbols(&self, active: &[String]) {
        let mut windows = self.windows.write();
        let before = windows.len();
        windows.retain(|sym, _| active.iter().any(|s| s == sym));
        let removed = before - windows.len();
        if removed > 0 {
            debug!(removed, "trade-flow windows cleaned up");
        }
    }
}
