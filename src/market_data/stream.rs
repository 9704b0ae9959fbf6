// =============================================================================
// Market Stream Ingest — one combined WebSocket for every instrument
// =============================================================================
//
// Subscribes a single multiplexed connection to, per instrument:
//   <sym>@bookTicker      best bid/ask (accurate pricing)
//   <sym>@depth20@100ms   top-20 book levels for hot-path imbalance
//   <sym>@aggTrade        aggregated trades feeding the flow window
//   <sym>@kline_1m        minute candles (closed ones persisted for ATR)
//   <sym>@kline_15m       15-minute candle for the volume baseline
//
// Each frame is a `{stream, data}` envelope; the stream name encodes the
// instrument and feed kind. The function returns on disconnect or parse-level
// connection errors so the caller can reconnect with bounded backoff.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures_util::StreamExt;
use tokio_tungstenite::connect_async;
use tracing::{debug, error, info, warn};

use crate::market_data::candle_buffer::{Candle, CandleBuffer, CandleKey};
use crate::market_data::orderbook::DepthSnapshot;
use crate::market_data::trade_flow::{FlowTrade, TradeFlowAggregator};
use crate::snapshot_cache::{
    self, ImbalancePayload, PricePoint, SnapshotCache, TTL_FAST, TTL_KLINE_15M, TTL_TRADE_FLOW,
};
use crate::store::SignalStore;

const STREAM_BASE: &str = "wss://fstream.binance.com";

/// Idle timeout on the stream read; a silent connection this long is dead.
const READ_IDLE_TIMEOUT: Duration = Duration::from_secs(300);

/// Everything the ingest pipeline writes into.
pub struct IngestSinks {
    pub cache: Arc<SnapshotCache>,
    pub trade_flow: Arc<TradeFlowAggregator>,
    pub candles: Arc<CandleBuffer>,
    pub store: Arc<SignalStore>,
}

/// Build the combined-stream URL for the active instrument set.
pub fn combined_stream_url(symbols: &[String]) -> String {
    let mut streams: Vec<String> = Vec::with_capacity(symbols.len() * 5);
    for sym in symbols {
        let lower = sym.to_lowercase();
        streams.push(format!("{lower}@bookTicker"));
        streams.push(format!("{lower}@depth20@100ms"));
        streams.push(format!("{lower}@aggTrade"));
        streams.push(format!("{lower}@kline_1m"));
        streams.push(format!("{lower}@kline_15m"));
    }
    format!("{STREAM_BASE}/stream?streams={}", streams.join("/"))
}

/// Connect the combined stream and pump frames into the sinks until the
/// connection drops. The caller owns the reconnect loop.
pub async fn run_market_stream(symbols: &[String], sinks: &IngestSinks) -> Result<()> {
    let url = combined_stream_url(symbols);
    info!(
        symbols = symbols.len(),
        streams = symbols.len() * 5,
        "connecting combined market WebSocket"
    );

    let (ws_stream, _response) = connect_async(&url)
        .await
        .context("failed to connect combined market WebSocket")?;

    info!("combined market WebSocket connected");
    let (_write, mut read) = ws_stream.split();

    loop {
        let frame = tokio::time::timeout(READ_IDLE_TIMEOUT, read.next()).await;

        match frame {
            Err(_) => {
                warn!(
                    idle_secs = READ_IDLE_TIMEOUT.as_secs(),
                    "market stream idle timeout — forcing reconnect"
                );
                return Ok(());
            }
            Ok(Some(Ok(msg))) => {
                if let tokio_tungstenite::tungstenite::Message::Text(text) = msg {
                    if let Err(e) = dispatch_frame(&text, sinks) {
                        // A malformed frame never takes the connection down.
                        warn!(error = %e, "failed to process market frame");
                    }
                }
                // Ping/Pong/Binary/Close frames are handled by tungstenite.
            }
            Ok(Some(Err(e))) => {
                error!(error = %e, "market WebSocket read error");
                return Err(e.into());
            }
            Ok(None) => {
                warn!("market WebSocket stream ended");
                return Ok(());
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Frame dispatch
// ---------------------------------------------------------------------------

/// Route one combined-stream frame by its feed kind.
fn dispatch_frame(text: &str, sinks: &IngestSinks) -> Result<()> {
    let root: serde_json::Value =
        serde_json::from_str(text).context("failed to parse stream envelope")?;

    let stream = root["stream"].as_str().unwrap_or_default();
    if stream.is_empty() {
        // Subscription acks and similar control frames have no stream name.
        return Ok(());
    }
    let data = &root["data"];

    let symbol = stream
        .split('@')
        .next()
        .unwrap_or_default()
        .to_uppercase();

    if stream.contains("bookTicker") {
        handle_book_ticker(&symbol, data, sinks);
    } else if stream.contains("depth") {
        handle_depth(&symbol, data, sinks);
    } else if stream.contains("aggTrade") {
        handle_agg_trade(&symbol, data, sinks);
    } else if stream.contains("kline") {
        handle_kline(&symbol, data, sinks);
    }

    Ok(())
}

/// Best bid/ask → `price:<S>` snapshot.
fn handle_book_ticker(symbol: &str, data: &serde_json::Value, sinks: &IngestSinks) {
    let bid = parse_value_f64(&data["b"]).unwrap_or(0.0);
    let ask = parse_value_f64(&data["a"]).unwrap_or(0.0);
    if bid <= 0.0 || ask <= 0.0 {
        return;
    }

    let point = PricePoint {
        bid,
        ask,
        mid: (bid + ask) / 2.0,
        timestamp: data["E"].as_i64().unwrap_or(0),
    };
    sinks
        .cache
        .set(&snapshot_cache::key_price(symbol), &point, TTL_FAST);
}

/// Top-20 depth → `orderbook:<S>` + `imbalance:<S>` snapshots.
fn handle_depth(symbol: &str, data: &serde_json::Value, sinks: &IngestSinks) {
    // Futures partial depth uses short keys; tolerate the long form too.
    let bids = parse_levels(data.get("b").or_else(|| data.get("bids")));
    let asks = parse_levels(data.get("a").or_else(|| data.get("asks")));
    if bids.is_empty() || asks.is_empty() {
        return;
    }

    let snapshot = DepthSnapshot {
        bids,
        asks,
        event_time: data["E"].as_i64().unwrap_or(0),
    };

    let imbalance = snapshot.global_imbalance();
    let large_orders = snapshot.large_orders();

    sinks
        .cache
        .set(&snapshot_cache::key_orderbook(symbol), &snapshot, TTL_FAST);
    sinks.cache.set(
        &snapshot_cache::key_imbalance(symbol),
        &ImbalancePayload { imbalance },
        TTL_FAST,
    );
    sinks.cache.set(
        &snapshot_cache::key_large_orders(symbol),
        &large_orders,
        TTL_FAST,
    );
}

/// Aggregated trade → flow window → `trade_flow:<S>` summary.
fn handle_agg_trade(symbol: &str, data: &serde_json::Value, sinks: &IngestSinks) {
    let trade = FlowTrade {
        time: data["T"].as_i64().unwrap_or(0),
        price: parse_value_f64(&data["p"]).unwrap_or(f64::NAN),
        qty: parse_value_f64(&data["q"]).unwrap_or(f64::NAN),
        buyer_is_maker: data["m"].as_bool().unwrap_or(false),
    };
    let time = trade.time;

    if !sinks.trade_flow.record(symbol, trade) {
        return;
    }

    if let Some(summary) = sinks.trade_flow.summarize(symbol, time) {
        sinks.cache.set(
            &snapshot_cache::key_trade_flow(symbol),
            &summary,
            TTL_TRADE_FLOW,
        );
    }
}

/// Kline update: 1 m closed candles are persisted for ATR and the volume
/// profile; the 15 m candle (open or closed) feeds the volume baseline.
fn handle_kline(symbol: &str, data: &serde_json::Value, sinks: &IngestSinks) {
    let k = &data["k"];
    let interval = k["i"].as_str().unwrap_or_default().to_string();

    let candle = match parse_kline_candle(k) {
        Ok(c) => c,
        Err(e) => {
            warn!(symbol = %symbol, error = %e, "failed to parse kline payload");
            return;
        }
    };

    match interval.as_str() {
        "1m" => {
            sinks
                .candles
                .push(CandleKey::new(symbol, "1m"), candle.clone());

            if candle.is_closed {
                match sinks.store.insert_kline(symbol, "1m", &candle) {
                    Ok(true) => debug!(symbol = %symbol, open_time = candle.open_time, "1m candle persisted"),
                    Ok(false) => {} // duplicate open_time, uniqueness held
                    Err(e) => warn!(symbol = %symbol, error = %e, "failed to persist 1m candle"),
                }
            }
        }
        "15m" => {
            sinks
                .candles
                .push(CandleKey::new(symbol, "15m"), candle.clone());
            sinks.cache.set(
                &snapshot_cache::key_kline_15m(symbol),
                &candle,
                TTL_KLINE_15M,
            );
        }
        other => {
            debug!(symbol = %symbol, interval = %other, "ignoring unsubscribed kline interval");
        }
    }
}

// ---------------------------------------------------------------------------
// Payload parsing helpers
// ---------------------------------------------------------------------------

/// Binance sends numeric fields as JSON strings; tolerate raw numbers too.
fn parse_value_f64(val: &serde_json::Value) -> Option<f64> {
    match val {
        serde_json::Value::String(s) => s.parse::<f64>().ok(),
        serde_json::Value::Number(n) => n.as_f64(),
        _ => None,
    }
}

/// Parse an array of `[price, size]` string pairs.
fn parse_levels(val: Option<&serde_json::Value>) -> Vec<(f64, f64)> {
    let Some(arr) = val.and_then(|v| v.as_array()) else {
        return Vec::new();
    };

    arr.iter()
        .filter_map(|level| {
            let price = parse_value_f64(level.get(0)?)?;
            let size = parse_value_f64(level.get(1)?)?;
            Some((price, size))
        })
        .collect()
}

/// Parse the `k` object of a kline event into a [`Candle`].
fn parse_kline_candle(k: &serde_json::Value) -> Result<Candle> {
    let open_time = k["t"].as_i64().context("missing field k.t")?;
    let close_time = k["T"].as_i64().context("missing field k.T")?;
    let open = parse_value_f64(&k["o"]).context("missing field k.o")?;
    let high = parse_value_f64(&k["h"]).context("missing field k.h")?;
    let low = parse_value_f64(&k["l"]).context("missing field k.l")?;
    let close = parse_value_f64(&k["c"]).context("missing field k.c")?;
    let volume = parse_value_f64(&k["v"]).context("missing field k.v")?;
    let is_closed = k["x"].as_bool().context("missing field k.x")?;

    Ok(Candle {
        open_time,
        close_time,
        open,
        high,
        low,
        close,
        volume,
        is_closed,
    })
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_contains_all_feeds_per_symbol() {
        let url = combined_stream_url(&["BTCUSDT".to_string(), "ETHUSDT".to_string()]);
        assert!(url.starts_with("wss://fstream.binance.com/stream?streams="));
        for feed in [
            "btcusdt@bookTicker",
            "btcusdt@depth20@100ms",
            "btcusdt@aggTrade",
            "btcusdt@kline_1m",
            "btcusdt@kline_15m",
            "ethusdt@aggTrade",
        ] {
            assert!(url.contains(feed), "missing {feed}");
        }
    }

    #[test]
    fn levels_parse_string_pairs() {
        let json: serde_json::Value =
            serde_json::from_str(r#"[["100.5", "2.0"], ["100.4", "1.5"]]"#).unwrap();
        let levels = parse_levels(Some(&json));
        assert_eq!(levels, vec![(100.5, 2.0), (100.4, 1.5)]);
    }

    #[test]
    fn levels_skip_malformed_entries() {
        let json: serde_json::Value =
            serde_json::from_str(r#"[["100.5", "2.0"], ["bad", "x"], ["99.0"]]"#).unwrap();
        let levels = parse_levels(Some(&json));
        assert_eq!(levels, vec![(100.5, 2.0)]);
        assert!(parse_levels(None).is_empty());
    }

    #[test]
    fn kline_candle_parses() {
        let k: serde_json::Value = serde_json::from_str(
            r#"{
                "t": 1700000000000, "T": 1700000059999, "i": "1m",
                "o": "37000.00", "h": "37050.00", "l": "36990.00",
                "c": "37020.00", "v": "123.456", "x": true
            }"#,
        )
        .unwrap();
        let candle = parse_kline_candle(&k).expect("parses");
        assert_eq!(candle.open_time, 1_700_000_000_000);
        assert!((candle.close - 37_020.0).abs() < f64::EPSILON);
        assert!(candle.is_closed);
    }

    #[test]
    fn kline_candle_missing_field_errors() {
        let k: serde_json::Value =
            serde_json::from_str(r#"{ "t": 1, "T": 2, "o": "1", "h": "1", "l": "1" }"#).unwrap();
        assert!(parse_kline_candle(&k).is_err());
    }

    #[test]
    fn value_f64_accepts_strings_and_numbers() {
        assert_eq!(parse_value_f64(&serde_json::json!("1.5")), Some(1.5));
        assert_eq!(parse_value_f64(&serde_json::json!(2.5)), Some(2.5));
        assert_eq!(parse_value_f64(&serde_json::json!(null)), None);
        assert_eq!(parse_value_f64(&serde_json::json!("abc")), None);
    }
}
