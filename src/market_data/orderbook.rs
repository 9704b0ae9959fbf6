// =============================================================================
// Order-Book Analyzer — global imbalance, large resting orders, spread
// =============================================================================

use serde::{Deserialize, Serialize};

/// Levels included in the global imbalance calculation.
const IMBALANCE_DEPTH: usize = 200;

/// A resting order is "large" above this multiple of the average level size.
const LARGE_ORDER_MULTIPLE: f64 = 5.0;

/// A depth snapshot: bids descending by price, asks ascending, with the
/// exchange event time. Up to 500 levels from REST, top-20 from the stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepthSnapshot {
    pub bids: Vec<(f64, f64)>,
    pub asks: Vec<(f64, f64)>,
    /// Exchange event time, milliseconds.
    pub event_time: i64,
}

/// A resting order noticeably larger than its book's average level.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LargeOrder {
    pub side: BookSide,
    pub price: f64,
    pub size: f64,
    pub size_multiple: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookSide {
    #[serde(rename = "bid")]
    Bid,
    #[serde(rename = "ask")]
    Ask,
}

impl DepthSnapshot {
    pub fn best_bid(&self) -> Option<f64> {
        self.bids.first().map(|&(p, _)| p)
    }

    pub fn best_ask(&self) -> Option<f64> {
        self.asks.first().map(|&(p, _)| p)
    }

    pub fn mid(&self) -> Option<f64> {
        match (self.best_bid(), self.best_ask()) {
            (Some(b), Some(a)) => Some((b + a) / 2.0),
            _ => None,
        }
    }

    /// Global imbalance over the first min(len, 200) levels of each side:
    /// `(Σbid.size − Σask.size) / (Σbid.size + Σask.size)`, in [−1, 1].
    /// A zero denominator yields 0.
    pub fn global_imbalance(&self) -> f64 {
        let bid_volume: f64 = self
            .bids
            .iter()
            .take(IMBALANCE_DEPTH)
            .map(|&(_, size)| size)
            .sum();
        let ask_volume: f64 = self
            .asks
            .iter()
            .take(IMBALANCE_DEPTH)
            .map(|&(_, size)| size)
            .sum();

        let total = bid_volume + ask_volume;
        if total == 0.0 {
            return 0.0;
        }
        (bid_volume - ask_volume) / total
    }

    /// Levels whose size exceeds 5× the average size across both sides.
    pub fn large_orders(&self) -> Vec<LargeOrder> {
        let count = self.bids.len() + self.asks.len();
        if count == 0 {
            return Vec::new();
        }

        let total: f64 = self
            .bids
            .iter()
            .chain(self.asks.iter())
            .map(|&(_, size)| size)
            .sum();
        let avg = total / count as f64;
        if avg <= 0.0 {
            return Vec::new();
        }
        let threshold = avg * LARGE_ORDER_MULTIPLE;

        let mut out = Vec::new();
        for &(price, size) in &self.bids {
            if size > threshold {
                out.push(LargeOrder {
                    side: BookSide::Bid,
                    price,
                    size,
                    size_multiple: size / avg,
                });
            }
        }
        for &(price, size) in &self.asks {
            if size > threshold {
                out.push(LargeOrder {
                    side: BookSide::Ask,
                    price,
                    size,
                    size_multiple: size / avg,
                });
            }
        }
        out
    }

    /// Relative spread `(best_ask − best_bid) / best_bid`; 0 on a zero or
    /// missing bid.
    pub fn spread(&self) -> f64 {
        let (bid, ask) = match (self.best_bid(), self.best_ask()) {
            (Some(b), Some(a)) => (b, a),
            _ => return 0.0,
        };
        if bid == 0.0 {
            return 0.0;
        }
        (ask - bid) / bid
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(bids: Vec<(f64, f64)>, asks: Vec<(f64, f64)>) -> DepthSnapshot {
        DepthSnapshot {
            bids,
            asks,
            event_time: 0,
        }
    }

    #[test]
    fn imbalance_formula() {
        // 30 bid size vs 10 ask size -> (30-10)/40 = 0.5
        let s = snapshot(vec![(100.0, 30.0)], vec![(100.1, 10.0)]);
        assert!((s.global_imbalance() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn imbalance_zero_denominator() {
        let s = snapshot(vec![(100.0, 0.0)], vec![(100.1, 0.0)]);
        assert_eq!(s.global_imbalance(), 0.0);

        let empty = snapshot(vec![], vec![]);
        assert_eq!(empty.global_imbalance(), 0.0);
    }

    #[test]
    fn imbalance_caps_at_200_levels() {
        // 250 bid levels of size 1; only the first 200 count.
        let bids: Vec<(f64, f64)> = (0..250).map(|i| (100.0 - i as f64 * 0.01, 1.0)).collect();
        let asks = vec![(100.1, 200.0)];
        let s = snapshot(bids, asks);
        // 200 vs 200 -> 0
        assert!(s.global_imbalance().abs() < 1e-12);
    }

    #[test]
    fn imbalance_bounds() {
        let s = snapshot(vec![(100.0, 50.0)], vec![]);
        assert_eq!(s.global_imbalance(), 1.0);
        let s = snapshot(vec![], vec![(100.1, 50.0)]);
        assert_eq!(s.global_imbalance(), -1.0);
    }

    #[test]
    fn large_orders_above_five_times_average() {
        // Sizes: 1, 1, 1, 1, 16 -> avg 4; threshold 20 -> none large.
        let s = snapshot(
            vec![(100.0, 1.0), (99.9, 1.0), (99.8, 1.0)],
            vec![(100.1, 1.0), (100.2, 16.0)],
        );
        assert!(s.large_orders().is_empty());

        // Sizes: 1, 1, 1, 1, 26 -> avg 6; threshold 30 -> still none.
        // Sizes: 1, 1, 1, 1, 96 -> avg 20; threshold 100 -> none; need > 5x.
        // One dominant level: 1,1,1,1,1000 -> avg 200.8, threshold 1004 -> none.
        // A level must exceed 5x the average including itself:
        // sizes 1 (x9), 100 -> avg 10.9, threshold 54.5 -> 100 qualifies.
        let mut bids: Vec<(f64, f64)> = (0..9).map(|i| (100.0 - i as f64 * 0.01, 1.0)).collect();
        bids.push((99.0, 100.0));
        let s = snapshot(bids, vec![]);
        let large = s.large_orders();
        assert_eq!(large.len(), 1);
        assert_eq!(large[0].side, BookSide::Bid);
        assert_eq!(large[0].size, 100.0);
        assert!(large[0].size_multiple > 5.0);
    }

    #[test]
    fn spread_formula_and_zero_bid() {
        let s = snapshot(vec![(100.0, 1.0)], vec![(100.2, 1.0)]);
        assert!((s.spread() - 0.002).abs() < 1e-9);

        let s = snapshot(vec![(0.0, 1.0)], vec![(100.2, 1.0)]);
        assert_eq!(s.spread(), 0.0);

        let s = snapshot(vec![], vec![(100.2, 1.0)]);
        assert_eq!(s.spread(), 0.0);
    }

    #[test]
    fn mid_price() {
        let s = snapshot(vec![(100.0, 1.0)], vec![(100.2, 1.0)]);
        assert!((s.mid().unwrap() - 100.1).abs() < 1e-9);
        assert!(snapshot(vec![], vec![]).mid().is_none());
    }
}
