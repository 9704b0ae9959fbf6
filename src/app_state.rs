// =============================================================================
// Central Application State — Vega signal engine
// =============================================================================
//
// Ties every subsystem together behind one `Arc<AppState>`: the snapshot
// cache, market-data aggregators, signal engine, fast tracker, store, and
// the universe selector. Each subsystem manages its own interior
// mutability; AppState provides construction and the status snapshot the
// REST surface serves.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;

use crate::binance::rate_limit::RateLimitSnapshot;
use crate::binance::{BinanceClient, RateLimitGate};
use crate::market_data::orderbook::LargeOrder;
use crate::market_data::{CandleBuffer, DepthSnapshot, TradeFlowAggregator};
use crate::notifier::TelegramNotifier;
use crate::runtime_config::EngineConfig;
use crate::signal::{SignalEmitter, SignalEngine};
use crate::snapshot_cache::{self, ImbalancePayload, PricePoint, SnapshotCache};
use crate::store::{SignalRecord, SignalStore};
use crate::tracker::FastSignalTracker;
use crate::universe::UniverseSelector;

/// Closed candles retained in memory per (symbol, interval).
const CANDLE_BUFFER_DEPTH: usize = 500;

pub struct AppState {
    pub config: Arc<EngineConfig>,
    pub cache: Arc<SnapshotCache>,
    pub trade_flow: Arc<TradeFlowAggregator>,
    pub candles: Arc<CandleBuffer>,
    pub store: Arc<SignalStore>,
    pub notifier: Arc<TelegramNotifier>,
    pub rate_gate: Arc<RateLimitGate>,
    pub client: Arc<BinanceClient>,
    pub universe: Arc<UniverseSelector>,
    pub engine: Arc<SignalEngine>,
    pub tracker: Arc<FastSignalTracker>,
    pub start_time: std::time::Instant,
}

impl AppState {
    /// Wire up every subsystem from the loaded configuration.
    pub fn new(config: EngineConfig) -> Result<Self> {
        let config = Arc::new(config);
        let cache = Arc::new(SnapshotCache::new());
        let trade_flow = Arc::new(TradeFlowAggregator::new(
            config.large_trade_percentile,
            config.large_trade_floor_usd,
        ));
        let candles = Arc::new(CandleBuffer::new(CANDLE_BUFFER_DEPTH));
        let store = Arc::new(SignalStore::open(&config.database_path)?);
        let notifier = Arc::new(TelegramNotifier::from_env());
        let rate_gate = Arc::new(RateLimitGate::new(config.rate_limit_weight_per_minute));
        let client = Arc::new(BinanceClient::new(rate_gate.clone()));
        let universe = Arc::new(UniverseSelector::new(config.clone(), client.clone()));

        let emitter = SignalEmitter::new(store.clone(), notifier.clone());
        let engine = Arc::new(SignalEngine::new(
            config.clone(),
            cache.clone(),
            candles.clone(),
            store.clone(),
            client.clone(),
            emitter,
        ));
        let tracker = Arc::new(FastSignalTracker::new(
            &config,
            cache.clone(),
            store.clone(),
            notifier.clone(),
        ));

        Ok(Self {
            config,
            cache,
            trade_flow,
            candles,
            store,
            notifier,
            rate_gate,
            client,
            universe,
            engine,
            tracker,
            start_time: std::time::Instant::now(),
        })
    }

    /// Drop per-instrument state for symbols no longer in the active set.
    /// Open signals on dropped symbols keep being tracked until they close.
    pub fn cleanup_inactive(&self, active: &[String]) {
        self.trade_flow.retain_symbols(active);
        self.candles.retain_symbols(active);
        self.engine.retain_symbols(active);
    }

    /// Build the status payload served by the REST surface.
    pub fn status_snapshot(&self) -> StatusSnapshot {
        let active = self.universe.active_symbols();
        let market = self.build_market_snapshot(&active);
        StatusSnapshot {
            uptime_secs: self.start_time.elapsed().as_secs(),
            active_symbols: active.len(),
            symbols: active,
            open_signals: self.tracker.open_count(),
            cache_entries: self.cache.len(),
            rejected_trades: self.trade_flow.rejected_count(),
            rate_limit: self.rate_gate.snapshot(),
            notifier_enabled: self.notifier.is_enabled(),
            market,
        }
    }

    /// Per-symbol market snapshot from the cache; symbols whose snapshots
    /// have expired are simply absent.
    fn build_market_snapshot(&self, symbols: &[String]) -> HashMap<String, SymbolMarket> {
        let mut out = HashMap::new();
        for symbol in symbols {
            let Some(price) = self
                .cache
                .get::<PricePoint>(&snapshot_cache::key_price(symbol))
            else {
                continue;
            };

            let imbalance = self
                .cache
                .get::<ImbalancePayload>(&snapshot_cache::key_imbalance(symbol))
                .map(|p| p.imbalance)
                .unwrap_or(0.0);

            let spread = self
                .cache
                .get::<DepthSnapshot>(&snapshot_cache::key_orderbook(symbol))
                .map(|book| book.spread())
                .unwrap_or(0.0);

            let large_orders = self
                .cache
                .get::<Vec<LargeOrder>>(&snapshot_cache::key_large_orders(symbol))
                .map(|orders| orders.len())
                .unwrap_or(0);

            out.insert(
                symbol.clone(),
                SymbolMarket {
                    mid: price.mid,
                    imbalance,
                    spread,
                    large_orders,
                },
            );
        }
        out
    }

    /// Reflected open signals for the REST surface.
    pub fn open_signals(&self) -> Vec<SignalRecord> {
        self.tracker.open_signals()
    }
}

/// Engine status payload for `GET /api/v1/status`.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub uptime_secs: u64,
    pub active_symbols: usize,
    pub symbols: Vec<String>,
    pub open_signals: usize,
    pub cache_entries: usize,
    pub rejected_trades: u64,
    pub rate_limit: RateLimitSnapshot,
    pub notifier_enabled: bool,
    pub market: HashMap<String, SymbolMarket>,
}

/// Per-symbol market data block inside the status payload.
#[derive(Debug, Clone, Serialize)]
pub struct SymbolMarket {
    pub mid: f64,
    pub imbalance: f64,
    /// Relative best-bid/ask spread from the cached book snapshot.
    pub spread: f64,
    /// Count of resting orders above 5× the average level size.
    pub large_orders: usize,
}
