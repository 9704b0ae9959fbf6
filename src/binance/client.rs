// =============================================================================
// Binance Futures REST Client — public market data behind the weight gate
// =============================================================================
//
// The engine emits signals only, so every endpoint here is public market
// data: kline backfill, deep depth snapshots for the levels pass, and the
// 24 h ticker / bookTicker universe scan. Each call spends weight through
// the shared [`RateLimitGate`] and feeds the server's used-weight header
// back into it.
// =============================================================================

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, warn};

use crate::binance::rate_limit::{endpoint_weight, RateLimitGate};
use crate::market_data::{Candle, DepthSnapshot};

/// Request timeout for all REST calls.
const REST_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

/// 24 h ticker row reduced to what the universe selector needs.
#[derive(Debug, Clone)]
pub struct Ticker24h {
    pub symbol: String,
    pub quote_volume: f64,
    pub last_price: f64,
}

/// Best bid/ask row from the bookTicker endpoint.
#[derive(Debug, Clone)]
pub struct BookTicker {
    pub symbol: String,
    pub bid: f64,
    pub ask: f64,
}

pub struct BinanceClient {
    base_url: String,
    client: reqwest::Client,
    gate: Arc<RateLimitGate>,
}

impl BinanceClient {
    pub fn new(gate: Arc<RateLimitGate>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REST_TIMEOUT)
            .build()
            .expect("failed to build REST client");

        Self {
            base_url: "https://fapi.binance.com".to_string(),
            client,
            gate,
        }
    }

    #[cfg(test)]
    fn with_base_url(gate: Arc<RateLimitGate>, base_url: String) -> Self {
        let mut c = Self::new(gate);
        c.base_url = base_url;
        c
    }

    async fn get_json(&self, path: &str, query: &str) -> Result<serde_json::Value> {
        self.gate.acquire(endpoint_weight(path)).await;

        let url = if query.is_empty() {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}{}?{}", self.base_url, path, query)
        };

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("GET {path} request failed"))?;

        self.gate.correct_from_headers(resp.headers());

        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .with_context(|| format!("failed to parse {path} response"))?;

        if !status.is_success() {
            anyhow::bail!("GET {path} returned {status}: {body}");
        }
        Ok(body)
    }

    // -------------------------------------------------------------------------
    // Klines
    // -------------------------------------------------------------------------

    /// GET /fapi/v1/klines — historical candles, oldest first.
    ///
    /// Array indices: [0] openTime, [1] open, [2] high, [3] low, [4] close,
    /// [5] volume, [6] closeTime.
    pub async fn get_klines(&self, symbol: &str, interval: &str, limit: u32) -> Result<Vec<Candle>> {
        let body = self
            .get_json(
                "/fapi/v1/klines",
                &format!("symbol={symbol}&interval={interval}&limit={limit}"),
            )
            .await?;

        let raw = body.as_array().context("klines response is not an array")?;
        let mut candles = Vec::with_capacity(raw.len());

        for entry in raw {
            let Some(arr) = entry.as_array() else {
                warn!("skipping non-array kline entry");
                continue;
            };
            if arr.len() < 7 {
                warn!(len = arr.len(), "skipping short kline entry");
                continue;
            }

            candles.push(Candle {
                open_time: arr[0].as_i64().unwrap_or(0),
                open: parse_str_f64(&arr[1])?,
                high: parse_str_f64(&arr[2])?,
                low: parse_str_f64(&arr[3])?,
                close: parse_str_f64(&arr[4])?,
                volume: parse_str_f64(&arr[5])?,
                close_time: arr[6].as_i64().unwrap_or(0),
                is_closed: true,
            });
        }

        debug!(symbol, interval, count = candles.len(), "klines fetched");
        Ok(candles)
    }

    // -------------------------------------------------------------------------
    // Depth
    // -------------------------------------------------------------------------

    /// GET /fapi/v1/depth — a deep snapshot for the levels pass (limit up
    /// to 500).
    pub async fn get_depth(&self, symbol: &str, limit: usize) -> Result<DepthSnapshot> {
        let body = self
            .get_json("/fapi/v1/depth", &format!("symbol={symbol}&limit={limit}"))
            .await?;

        let bids = parse_depth_side(&body["bids"])?;
        let asks = parse_depth_side(&body["asks"])?;
        let event_time = body["E"].as_i64().or_else(|| body["T"].as_i64()).unwrap_or(0);

        debug!(
            symbol,
            bids = bids.len(),
            asks = asks.len(),
            "depth snapshot fetched"
        );
        Ok(DepthSnapshot {
            bids,
            asks,
            event_time,
        })
    }

    // -------------------------------------------------------------------------
    // Universe scan
    // -------------------------------------------------------------------------

    /// GET /fapi/v1/ticker/24hr — all symbols.
    pub async fn get_24h_tickers(&self) -> Result<Vec<Ticker24h>> {
        let body = self.get_json("/fapi/v1/ticker/24hr", "").await?;
        let raw = body.as_array().context("ticker response is not an array")?;

        let tickers = raw
            .iter()
            .filter_map(|row| {
                Some(Ticker24h {
                    symbol: row["symbol"].as_str()?.to_string(),
                    quote_volume: parse_str_f64(&row["quoteVolume"]).ok()?,
                    last_price: parse_str_f64(&row["lastPrice"]).ok()?,
                })
            })
            .collect();
        Ok(tickers)
    }

    /// GET /fapi/v1/ticker/bookTicker — best bid/ask for all symbols.
    pub async fn get_book_tickers(&self) -> Result<Vec<BookTicker>> {
        let body = self.get_json("/fapi/v1/ticker/bookTicker", "").await?;
        let raw = body
            .as_array()
            .context("bookTicker response is not an array")?;

        let tickers = raw
            .iter()
            .filter_map(|row| {
                Some(BookTicker {
                    symbol: row["symbol"].as_str()?.to_string(),
                    bid: parse_str_f64(&row["bidPrice"]).ok()?,
                    ask: parse_str_f64(&row["askPrice"]).ok()?,
                })
            })
            .collect();
        Ok(tickers)
    }
}

impl std::fmt::Debug for BinanceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BinanceClient")
            .field("base_url", &self.base_url)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Parsing helpers
// ---------------------------------------------------------------------------

/// Parse a JSON value that may be either a string or a number into `f64`.
fn parse_str_f64(val: &serde_json::Value) -> Result<f64> {
    if let Some(s) = val.as_str() {
        s.parse::<f64>()
            .with_context(|| format!("failed to parse '{s}' as f64"))
    } else if let Some(n) = val.as_f64() {
        Ok(n)
    } else {
        anyhow::bail!("expected string or number, got: {val}")
    }
}

fn parse_depth_side(val: &serde_json::Value) -> Result<Vec<(f64, f64)>> {
    let arr = val.as_array().context("depth side is not an array")?;
    let mut out = Vec::with_capacity(arr.len());
    for level in arr {
        let pair = level.as_array().context("depth level is not an array")?;
        if pair.len() < 2 {
            continue;
        }
        out.push((parse_str_f64(&pair[0])?, parse_str_f64(&pair[1])?));
    }
    Ok(out)
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_str_f64_accepts_both_forms() {
        assert_eq!(parse_str_f64(&serde_json::json!("1.25")).unwrap(), 1.25);
        assert_eq!(parse_str_f64(&serde_json::json!(2.5)).unwrap(), 2.5);
        assert!(parse_str_f64(&serde_json::json!(null)).is_err());
    }

    #[test]
    fn parse_depth_side_pairs() {
        let val = serde_json::json!([["100.5", "2.0"], ["100.4", "1.5"]]);
        let side = parse_depth_side(&val).unwrap();
        assert_eq!(side, vec![(100.5, 2.0), (100.4, 1.5)]);
    }

    #[test]
    fn parse_depth_side_rejects_non_array() {
        assert!(parse_depth_side(&serde_json::json!("nope")).is_err());
    }

    #[test]
    fn client_debug_omits_internals() {
        let gate = Arc::new(RateLimitGate::new(100));
        let client = BinanceClient::with_base_url(gate, "http://localhost:1".to_string());
        let dbg = format!("{client:?}");
        assert!(dbg.contains("localhost"));
    }
}
