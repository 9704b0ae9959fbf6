// =============================================================================
// REST Rate-Limit Gate — sliding one-minute weight window with header sync
// =============================================================================
//
// Every outbound REST call spends endpoint weight from a 60-second sliding
// window. The gate blocks callers that would exceed the budget, and
// auto-corrects its internal tally from the `X-MBX-USED-WEIGHT-1M` response
// header whenever the two diverge by more than a small tolerance (other
// clients may share the same IP budget).
// =============================================================================

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Width of the sliding weight window.
const WINDOW: Duration = Duration::from_secs(60);

/// Internal vs server weight divergence that triggers a correction.
const CORRECTION_TOLERANCE: u32 = 50;

/// Poll interval while a caller waits for budget.
const ACQUIRE_RETRY: Duration = Duration::from_millis(500);

/// Known endpoint weights (futures API).
pub fn endpoint_weight(path: &str) -> u32 {
    match path {
        "/fapi/v1/exchangeInfo" => 1,
        "/fapi/v1/ticker/24hr" => 40,
        "/fapi/v1/ticker/bookTicker" => 2,
        "/fapi/v1/depth" => 10,
        "/fapi/v1/klines" => 5,
        _ => 1,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitSnapshot {
    pub current_weight: u32,
    pub max_weight: u32,
    pub server_weight: Option<u32>,
    pub requests_in_window: usize,
}

struct GateState {
    requests: VecDeque<(Instant, u32)>,
    current_weight: u32,
    server_weight: Option<u32>,
}

pub struct RateLimitGate {
    max_weight: u32,
    state: Mutex<GateState>,
}

impl RateLimitGate {
    pub fn new(max_weight: u32) -> Self {
        Self {
            max_weight,
            state: Mutex::new(GateState {
                requests: VecDeque::new(),
                current_weight: 0,
                server_weight: None,
            }),
        }
    }

    /// Try to spend `weight` now. Returns false when the window is full.
    pub fn try_acquire(&self, weight: u32) -> bool {
        let now = Instant::now();
        let mut state = self.state.lock();
        Self::prune(&mut state, now);

        if state.current_weight + weight > self.max_weight {
            warn!(
                current = state.current_weight,
                requested = weight,
                max = self.max_weight,
                "rate-limit gate refused request"
            );
            return false;
        }

        state.requests.push_back((now, weight));
        state.current_weight += weight;
        true
    }

    /// Spend `weight`, sleeping until the window has room.
    pub async fn acquire(&self, weight: u32) {
        loop {
            if self.try_acquire(weight) {
                return;
            }
            tokio::time::sleep(ACQUIRE_RETRY).await;
        }
    }

    /// Reconcile the internal tally with the server-reported used weight.
    /// A divergence above the tolerance adopts the server value outright.
    pub fn correct_from_headers(&self, headers: &reqwest::header::HeaderMap) {
        let Some(server) = headers
            .get("X-MBX-USED-WEIGHT-1M")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u32>().ok())
        else {
            return;
        };

        let mut state = self.state.lock();
        let diff = state.current_weight.abs_diff(server);

        if diff > CORRECTION_TOLERANCE {
            warn!(
                internal = state.current_weight,
                server, diff, "weight divergence — adopting server value"
            );
            state.current_weight = server;
        } else {
            debug!(internal = state.current_weight, server, "weight verified");
        }
        state.server_weight = Some(server);
    }

    pub fn snapshot(&self) -> RateLimitSnapshot {
        let now = Instant::now();
        let mut state = self.state.lock();
        Self::prune(&mut state, now);

        RateLimitSnapshot {
            current_weight: state.current_weight,
            max_weight: self.max_weight,
            server_weight: state.server_weight,
            requests_in_window: state.requests.len(),
        }
    }

    fn prune(state: &mut GateState, now: Instant) {
        while let Some(&(at, weight)) = state.requests.front() {
            if now.duration_since(at) >= WINDOW {
                state.requests.pop_front();
                state.current_weight = state.current_weight.saturating_sub(weight);
            } else {
                break;
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_within_budget() {
        let gate = RateLimitGate::new(100);
        assert!(gate.try_acquire(40));
        assert!(gate.try_acquire(40));
        assert_eq!(gate.snapshot().current_weight, 80);
    }

    #[test]
    fn refuses_over_budget() {
        let gate = RateLimitGate::new(100);
        assert!(gate.try_acquire(80));
        assert!(!gate.try_acquire(30));
        // The refused request spends nothing.
        assert_eq!(gate.snapshot().current_weight, 80);
        // A smaller one still fits.
        assert!(gate.try_acquire(20));
    }

    #[test]
    fn header_correction_above_tolerance() {
        let gate = RateLimitGate::new(2400);
        gate.try_acquire(10);

        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert("X-MBX-USED-WEIGHT-1M", "500".parse().unwrap());
        gate.correct_from_headers(&headers);

        let snap = gate.snapshot();
        assert_eq!(snap.current_weight, 500);
        assert_eq!(snap.server_weight, Some(500));
    }

    #[test]
    fn header_within_tolerance_keeps_internal_tally() {
        let gate = RateLimitGate::new(2400);
        gate.try_acquire(100);

        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert("X-MBX-USED-WEIGHT-1M", "120".parse().unwrap());
        gate.correct_from_headers(&headers);

        let snap = gate.snapshot();
        assert_eq!(snap.current_weight, 100);
        assert_eq!(snap.server_weight, Some(120));
    }

    #[test]
    fn missing_header_is_ignored() {
        let gate = RateLimitGate::new(2400);
        gate.try_acquire(10);
        gate.correct_from_headers(&reqwest::header::HeaderMap::new());
        assert_eq!(gate.snapshot().current_weight, 10);
        assert_eq!(gate.snapshot().server_weight, None);
    }

    #[test]
    fn known_endpoint_weights() {
        assert_eq!(endpoint_weight("/fapi/v1/klines"), 5);
        assert_eq!(endpoint_weight("/fapi/v1/depth"), 10);
        assert_eq!(endpoint_weight("/fapi/v1/ticker/24hr"), 40);
        assert_eq!(endpoint_weight("/fapi/v1/unknown"), 1);
    }
}
