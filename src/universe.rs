// =============================================================================
// Universe Selector — maintains the active instrument set
// =============================================================================
//
// Scans the futures 24 h ticker universe, keeps liquid USDT perpetuals
// (volume floor, spread ceiling), caps the set, and republishes it for the
// rest of the engine. Per-instrument engine state for symbols that drop out
// is cleaned up by the callers observing the new set.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use parking_lot::RwLock;
use tracing::info;

use crate::binance::client::{BookTicker, Ticker24h};
use crate::binance::BinanceClient;
use crate::runtime_config::EngineConfig;

pub struct UniverseSelector {
    config: Arc<EngineConfig>,
    client: Arc<BinanceClient>,
    active: RwLock<Vec<String>>,
}

impl UniverseSelector {
    pub fn new(config: Arc<EngineConfig>, client: Arc<BinanceClient>) -> Self {
        let fallback = config.symbols.clone();
        Self {
            config,
            client,
            active: RwLock::new(fallback),
        }
    }

    /// The current active set (starts as the configured fallback list).
    pub fn active_symbols(&self) -> Vec<String> {
        self.active.read().clone()
    }

    /// Rescan the exchange and replace the active set. On scan failure the
    /// previous set stays in place.
    pub async fn scan(&self) -> Result<Vec<String>> {
        let tickers = self.client.get_24h_tickers().await?;
        let books = self.client.get_book_tickers().await?;

        let selected = select_universe(
            &tickers,
            &books,
            self.config.universe_min_quote_volume,
            self.config.universe_max_spread,
            self.config.universe_max_symbols,
        );

        info!(
            candidates = tickers.len(),
            selected = selected.len(),
            "universe scan complete"
        );

        *self.active.write() = selected.clone();
        Ok(selected)
    }
}

/// Pure selection: liquid USDT perpetuals by 24 h quote volume, bounded
/// spread, sorted most-liquid first, capped.
fn select_universe(
    tickers: &[Ticker24h],
    books: &[BookTicker],
    min_quote_volume: f64,
    max_spread: f64,
    max_symbols: usize,
) -> Vec<String> {
    let spreads: HashMap<&str, f64> = books
        .iter()
        .filter(|b| b.bid > 0.0 && b.ask >= b.bid)
        .map(|b| (b.symbol.as_str(), (b.ask - b.bid) / b.bid))
        .collect();

    let mut qualified: Vec<&Ticker24h> = tickers
        .iter()
        .filter(|t| t.symbol.ends_with("USDT"))
        .filter(|t| t.last_price > 0.0)
        .filter(|t| t.quote_volume >= min_quote_volume)
        .filter(|t| {
            spreads
                .get(t.symbol.as_str())
                .is_some_and(|&s| s <= max_spread)
        })
        .collect();

    qualified.sort_by(|a, b| {
        b.quote_volume
            .partial_cmp(&a.quote_volume)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    qualified
        .into_iter()
        .take(max_symbols)
        .map(|t| t.symbol.clone())
        .collect()
}
