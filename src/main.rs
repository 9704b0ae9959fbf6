// =============================================================================
// Vega Futures Scanner — Main Entry Point
// =============================================================================
//
// Signal-only engine: ingests futures market data for a liquid universe,
// emits entry signals when the confluence persists, and manages exits on a
// 100 ms loop. No orders are ever placed.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod analysis;
mod api;
mod app_state;
mod binance;
mod market_data;
mod notifier;
mod runtime_config;
mod signal;
mod snapshot_cache;
mod store;
mod tracker;
mod types;
mod universe;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Notify;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::app_state::AppState;
use crate::market_data::stream::{self, IngestSinks};
use crate::market_data::CandleKey;
use crate::runtime_config::EngineConfig;

/// Stream reconnect backoff bounds.
const BACKOFF_START: Duration = Duration::from_secs(1);
const BACKOFF_MAX: Duration = Duration::from_secs(60);

/// Kline rows older than this are pruned (the profile needs six hours).
const KLINE_RETENTION_HOURS: i64 = 12;

/// Candles pulled per symbol on startup so ATR works immediately.
const BACKFILL_CANDLES: u32 = 20;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║        Vega Futures Scanner — Starting Up               ║");
    info!("╚══════════════════════════════════════════════════════════╝");

    // A missing config file falls back to defaults; a malformed one is a
    // fatal startup error.
    let mut config = match EngineConfig::load("engine_config.json")? {
        Some(cfg) => cfg,
        None => {
            warn!("engine_config.json not found — using defaults");
            EngineConfig::default()
        }
    };

    // Override the fallback symbol list from env if provided.
    if let Ok(syms) = std::env::var("VEGA_SYMBOLS") {
        config.symbols = syms
            .split(',')
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty())
            .collect();
    }

    info!(
        fallback_symbols = ?config.symbols,
        entry_samples = config.persistence_entry_samples,
        reversal_samples = config.persistence_reversal_samples,
        "engine configured"
    );

    // ── 2. Build shared state ────────────────────────────────────────────
    let state = Arc::new(AppState::new(config)?);

    // ── 3. Initial universe scan ─────────────────────────────────────────
    match state.universe.scan().await {
        Ok(symbols) => info!(count = symbols.len(), "initial universe selected"),
        Err(e) => warn!(error = %e, "initial universe scan failed — using fallback symbols"),
    }

    // ── 4. Kline backfill (ATR ready immediately) ────────────────────────
    backfill_klines(&state).await;

    if state.notifier.is_enabled() {
        let n = state.notifier.clone();
        let count = state.universe.active_symbols().len();
        tokio::spawn(async move {
            let _ = n
                .send_status(&format!("🚀 Vega scanner started — {count} instruments"))
                .await;
        });
    }

    // ── 5. Market data stream (single multiplexed connection) ────────────
    let resubscribe = Arc::new(Notify::new());
    {
        let stream_state = state.clone();
        let notify = resubscribe.clone();
        tokio::spawn(async move {
            let sinks = IngestSinks {
                cache: stream_state.cache.clone(),
                trade_flow: stream_state.trade_flow.clone(),
                candles: stream_state.candles.clone(),
                store: stream_state.store.clone(),
            };

            let mut backoff = BACKOFF_START;
            loop {
                let symbols = stream_state.universe.active_symbols();
                if symbols.is_empty() {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    continue;
                }

                let connected_at = std::time::Instant::now();
                tokio::select! {
                    result = stream::run_market_stream(&symbols, &sinks) => {
                        if let Err(e) = result {
                            error!(error = %e, "market stream error");
                        }
                        // A healthy long-lived connection resets the backoff.
                        if connected_at.elapsed() > Duration::from_secs(60) {
                            backoff = BACKOFF_START;
                        }
                        warn!(delay_secs = backoff.as_secs(), "market stream down — reconnecting");
                        tokio::time::sleep(backoff).await;
                        backoff = (backoff * 2).min(BACKOFF_MAX);
                    }
                    _ = notify.notified() => {
                        info!("universe changed — resubscribing market stream");
                        backoff = BACKOFF_START;
                    }
                }
            }
        });
    }

    // ── 6. Entry engine loop (100 ms) ────────────────────────────────────
    {
        let engine_state = state.clone();
        tokio::spawn(async move {
            // Let the stream populate the cache first.
            tokio::time::sleep(Duration::from_secs(10)).await;
            info!("entry engine loop starting");

            let mut interval = tokio::time::interval(Duration::from_millis(
                engine_state.config.fast_tick_interval_ms,
            ));
            loop {
                interval.tick().await;
                let symbols = engine_state.universe.active_symbols();
                engine_state.engine.tick(&symbols).await;
            }
        });
    }

    // ── 7. Fast tracker loop (100 ms) ────────────────────────────────────
    {
        let tracker_state = state.clone();
        tokio::spawn(async move {
            if let Err(e) = tracker_state.tracker.sync_from_store() {
                error!(error = %e, "initial tracker sync failed");
            }
            info!("fast tracker loop starting");

            let mut interval = tokio::time::interval(Duration::from_millis(
                tracker_state.config.fast_tick_interval_ms,
            ));
            loop {
                interval.tick().await;
                tracker_state.tracker.tick().await;
            }
        });
    }

    // ── 8. Cache resync loop (5 s) ───────────────────────────────────────
    {
        let sync_state = state.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(
                sync_state.config.cache_sync_interval_secs,
            ));
            loop {
                interval.tick().await;
                if let Err(e) = sync_state.tracker.sync_from_store() {
                    warn!(error = %e, "tracker resync failed");
                }
                sync_state.cache.sweep_expired();
            }
        });
    }

    // ── 9. Universe rescan loop (1 h) ────────────────────────────────────
    {
        let rescan_state = state.clone();
        let notify = resubscribe.clone();
        tokio::spawn(async move {
            let period = Duration::from_secs(rescan_state.config.universe_rescan_interval_secs);
            let mut interval = tokio::time::interval(period);
            interval.tick().await; // the initial scan already ran
            loop {
                interval.tick().await;
                let before = rescan_state.universe.active_symbols();
                match rescan_state.universe.scan().await {
                    Ok(after) => {
                        rescan_state.cleanup_inactive(&after);
                        if after != before {
                            notify.notify_waiters();
                        }
                        info!(count = after.len(), "universe rescanned");
                    }
                    Err(e) => warn!(error = %e, "universe rescan failed — keeping current set"),
                }
            }
        });
    }

    // ── 10. Metrics loop (1 h) ───────────────────────────────────────────
    {
        let metrics_state = state.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(
                metrics_state.config.metrics_interval_secs,
            ));
            interval.tick().await;
            loop {
                interval.tick().await;
                let now_ms = Utc::now().timestamp_millis();
                if let Err(e) = metrics_state.store.write_performance_metrics(now_ms) {
                    warn!(error = %e, "metrics aggregation failed");
                }
                let cutoff = now_ms - KLINE_RETENTION_HOURS * 3600 * 1000;
                if let Err(e) = metrics_state.store.prune_klines(cutoff) {
                    warn!(error = %e, "kline pruning failed");
                }
            }
        });
    }

    // ── 11. Status API server ────────────────────────────────────────────
    {
        let api_state = state.clone();
        let bind_addr =
            std::env::var("VEGA_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3001".into());
        tokio::spawn(async move {
            let app = api::rest::router(api_state);
            match tokio::net::TcpListener::bind(&bind_addr).await {
                Ok(listener) => {
                    info!(addr = %bind_addr, "status API listening");
                    if let Err(e) = axum::serve(listener, app).await {
                        error!(error = %e, "status API server failed");
                    }
                }
                Err(e) => error!(addr = %bind_addr, error = %e, "failed to bind status API"),
            }
        });
    }

    info!("all subsystems running — press Ctrl+C to stop");

    // ── 12. Graceful shutdown ────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    warn!("shutdown signal received — draining");

    // Closure batches commit synchronously inside the tracker tick; one
    // final resync confirms the canonical state before exit.
    if let Err(e) = state.tracker.sync_from_store() {
        warn!(error = %e, "final tracker sync failed");
    }

    if state.notifier.is_enabled() {
        let _ = state.notifier.send_status("🛑 Vega scanner shutting down").await;
    }

    info!("Vega scanner shut down complete");
    Ok(())
}

/// Pull the last few 1-minute candles per active instrument into the store
/// and the in-memory buffer so ATR has history from the first tick.
async fn backfill_klines(state: &Arc<AppState>) {
    let symbols = state.universe.active_symbols();
    info!(count = symbols.len(), "backfilling 1m klines");

    let mut backfilled = 0usize;
    for symbol in &symbols {
        match state.client.get_klines(symbol, "1m", BACKFILL_CANDLES).await {
            Ok(candles) => {
                for candle in &candles {
                    if let Err(e) = state.store.insert_kline(symbol, "1m", candle) {
                        warn!(symbol = %symbol, error = %e, "backfill kline insert failed");
                        break;
                    }
                    state
                        .candles
                        .push(CandleKey::new(symbol.clone(), "1m"), candle.clone());
                }
                backfilled += 1;
            }
            Err(e) => warn!(symbol = %symbol, error = %e, "kline backfill failed"),
        }
    }

    info!(
        symbols = backfilled,
        total = symbols.len(),
        "kline backfill complete"
    );
}
