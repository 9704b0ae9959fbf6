// =============================================================================
// Levels Analyzer — fused order-book clusters and historical volume profile
// =============================================================================
//
// Both sources are bucketed on the same grid (0.2 % of the current price) so
// they stay comparable:
//
//   1. Order-book clustering: bid/ask sizes bucketed inside the working
//      range; a bucket is significant above 2× the average bucket size.
//   2. Historical profile: each 1-minute candle of the last six hours
//      spreads its volume uniformly across the bins its H−L range covers.
//   3. Fusion: book clusters are normalised by (max volume / 10) and joined
//      with profile levels carrying at least 10 % of the maximum volume.
//
// "Strongest" support/resistance denotes volume dominance on each side of
// the current price, not proximity; the nearest-first sorted lists drive
// take-profit target selection separately.
// =============================================================================

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::analysis::volatility::WorkingRange;
use crate::market_data::{Candle, DepthSnapshot};

/// A bucket is a significant book cluster above this multiple of the mean.
const CLUSTER_THRESHOLD: f64 = 2.0;

/// Fused levels must carry at least this share of the maximum volume.
const MIN_VOLUME_PCT: f64 = 10.0;

/// Book cluster sizes are normalised by (max volume / this divisor).
const BOOK_NORMALISATION_DIVISOR: f64 = 10.0;

/// A profile bin is "low volume" below this fraction of the mean.
const LOW_VOLUME_FRACTION: f64 = 0.5;

/// At most this many low-volume zones are reported.
const MAX_LOW_VOLUME_ZONES: usize = 3;

/// Levels kept per side in the nearest-first lists.
const MAX_LEVELS_PER_SIDE: usize = 5;

/// Outcome of a full levels pass for one instrument.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LevelsAnalysis {
    /// Significant levels below the current price, nearest first.
    pub support_levels: Vec<f64>,
    /// Significant levels above the current price, nearest first.
    pub resistance_levels: Vec<f64>,
    /// Maximum-volume cluster below the current price.
    pub strongest_support: Option<f64>,
    /// Maximum-volume cluster above the current price.
    pub strongest_resistance: Option<f64>,
    /// Level carrying the largest fused volume inside the working range.
    pub poc: Option<f64>,
    /// Contiguous low-volume bands (lower, upper), at most three.
    pub low_volume_zones: Vec<(f64, f64)>,
    /// Count of significant levels before the per-side cap.
    pub total_levels: usize,
}

/// Run the full levels pass.
///
/// `history` is the closed 1-minute candles of the last six hours (oldest
/// first); `depth` is the deep REST snapshot (up to 500 levels per side).
pub fn analyze(
    range: &WorkingRange,
    depth: &DepthSnapshot,
    history: &[Candle],
    bin_size_pct: f64,
) -> LevelsAnalysis {
    let current_price = range.current_price;
    let bin = current_price * bin_size_pct / 100.0;
    if bin <= 0.0 || !bin.is_finite() {
        return empty_analysis();
    }

    // ── 1. Order-book clustering ────────────────────────────────────────
    let (bid_clusters, ask_clusters) = book_clusters(depth, range, bin);

    // ── 2. Historical volume profile ────────────────────────────────────
    let profile = volume_profile(history, range, bin);

    // ── 3. Fusion ───────────────────────────────────────────────────────
    let max_volume = profile
        .values()
        .chain(bid_clusters.values())
        .chain(ask_clusters.values())
        .fold(0.0_f64, |acc, &v| acc.max(v));

    if max_volume <= 0.0 {
        return empty_analysis();
    }

    let min_threshold = max_volume * (MIN_VOLUME_PCT / 100.0);
    let mut fused: BTreeMap<i64, f64> = BTreeMap::new();

    for (&idx, &vol) in &profile {
        if vol >= min_threshold {
            fused.insert(idx, vol);
        }
    }
    for (&idx, &vol) in bid_clusters.iter().chain(ask_clusters.iter()) {
        let normalised = vol * (max_volume / BOOK_NORMALISATION_DIVISOR);
        if normalised >= min_threshold {
            fused.insert(idx, normalised);
        }
    }

    let total_levels = fused.len();

    let poc = fused
        .iter()
        .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(&idx, _)| idx as f64 * bin);

    // ── 4. Support/resistance split ─────────────────────────────────────
    let mut supports: Vec<(f64, f64)> = Vec::new();
    let mut resistances: Vec<(f64, f64)> = Vec::new();
    for (&idx, &vol) in &fused {
        let price = idx as f64 * bin;
        if price < current_price {
            supports.push((price, vol));
        } else if price > current_price {
            resistances.push((price, vol));
        }
    }

    // Nearest first: supports descend from the price, resistances ascend.
    supports.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    resistances.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));

    let strongest_support = max_volume_level(&supports);
    let strongest_resistance = max_volume_level(&resistances);

    let analysis = LevelsAnalysis {
        support_levels: supports
            .iter()
            .take(MAX_LEVELS_PER_SIDE)
            .map(|&(p, _)| p)
            .collect(),
        resistance_levels: resistances
            .iter()
            .take(MAX_LEVELS_PER_SIDE)
            .map(|&(p, _)| p)
            .collect(),
        strongest_support,
        strongest_resistance,
        poc,
        low_volume_zones: low_volume_zones(&profile, bin),
        total_levels,
    };

    debug!(
        supports = analysis.support_levels.len(),
        resistances = analysis.resistance_levels.len(),
        total = analysis.total_levels,
        "levels analysis complete"
    );

    analysis
}

fn empty_analysis() -> LevelsAnalysis {
    LevelsAnalysis {
        support_levels: Vec::new(),
        resistance_levels: Vec::new(),
        strongest_support: None,
        strongest_resistance: None,
        poc: None,
        low_volume_zones: Vec::new(),
        total_levels: 0,
    }
}

fn bin_index(price: f64, bin: f64) -> i64 {
    (price / bin).round() as i64
}

/// Bucket bid/ask sizes inside the working range; keep buckets above 2× the
/// average across all populated buckets on both sides.
fn book_clusters(
    depth: &DepthSnapshot,
    range: &WorkingRange,
    bin: f64,
) -> (BTreeMap<i64, f64>, BTreeMap<i64, f64>) {
    let mut bids: BTreeMap<i64, f64> = BTreeMap::new();
    let mut asks: BTreeMap<i64, f64> = BTreeMap::new();

    for &(price, size) in &depth.bids {
        if price >= range.lower && price <= range.upper {
            *bids.entry(bin_index(price, bin)).or_insert(0.0) += size;
        }
    }
    for &(price, size) in &depth.asks {
        if price >= range.lower && price <= range.upper {
            *asks.entry(bin_index(price, bin)).or_insert(0.0) += size;
        }
    }

    let count = bids.len() + asks.len();
    if count == 0 {
        return (BTreeMap::new(), BTreeMap::new());
    }
    let avg: f64 = bids.values().chain(asks.values()).sum::<f64>() / count as f64;
    let threshold = avg * CLUSTER_THRESHOLD;

    bids.retain(|_, v| *v > threshold);
    asks.retain(|_, v| *v > threshold);
    (bids, asks)
}

/// Uniformly distribute each candle's volume across the bins its H−L range
/// covers, keeping only bins inside the working range.
fn volume_profile(history: &[Candle], range: &WorkingRange, bin: f64) -> BTreeMap<i64, f64> {
    let mut profile: BTreeMap<i64, f64> = BTreeMap::new();

    for candle in history {
        if candle.high <= candle.low {
            continue;
        }
        let levels = ((candle.high - candle.low) / bin) as usize + 1;
        let volume_per_level = candle.volume / levels as f64;

        for i in 0..levels {
            let price = candle.low + i as f64 * bin;
            if price >= range.lower && price <= range.upper {
                *profile.entry(bin_index(price, bin)).or_insert(0.0) += volume_per_level;
            }
        }
    }

    profile
}

/// Contiguous runs of populated profile bins below half the mean volume,
/// reported as (lower, upper) price bands. At most three.
fn low_volume_zones(profile: &BTreeMap<i64, f64>, bin: f64) -> Vec<(f64, f64)> {
    if profile.is_empty() {
        return Vec::new();
    }

    let avg: f64 = profile.values().sum::<f64>() / profile.len() as f64;
    let threshold = avg * LOW_VOLUME_FRACTION;

    let mut zones = Vec::new();
    let mut zone_start: Option<f64> = None;
    let mut prev_price = 0.0;

    for (&idx, &vol) in profile {
        let price = idx as f64 * bin;
        if vol < threshold {
            if zone_start.is_none() {
                zone_start = Some(price);
            }
        } else if let Some(start) = zone_start.take() {
            zones.push((start, prev_price));
        }
        prev_price = price;
    }
    if let Some(start) = zone_start {
        zones.push((start, prev_price));
    }

    zones.truncate(MAX_LOW_VOLUME_ZONES);
    zones
}

fn max_volume_level(levels: &[(f64, f64)]) -> Option<f64> {
    levels
        .iter()
        .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
        .map(|&(p, _)| p)
}
