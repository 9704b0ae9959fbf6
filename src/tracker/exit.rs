// =============================================================================
// Exit State Machine — TP2 / TP1 partial / stop / sustained reversal
// =============================================================================
//
// Layered exit policy for one open signal, evaluated every 100 ms:
//
//   1. **TP2** (only after the TP1 half is gone) — closes the remainder.
//   2. **TP1** — closes 50 %, promotes the stop to break-even (the entry
//      price), and keeps the signal open.
//   3. **Stop** — against the *current* stop; after TP1 this is the
//      break-even stop and the closure keeps the banked TP1 profit.
//   4. **Sustained reversal** — two protective layers: nothing fires before
//      the minimum hold time, and the opposing imbalance must persist for
//      the configured number of consecutive samples (75 ≈ 7.5 s). Any
//      non-reversed sample zeroes the persistence counter.
//
// The priority order above is the tie-break when several conditions are
// simultaneously true. All PnL values are percentages of the entry price;
// partial legs weigh 0.5 each.
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::store::SignalRecord;
use crate::types::{Direction, PartialCloseStatus};

/// Per-signal mutable exit state held by the fast tracker. Rebuilt from the
/// store row on resync, so a restart resumes with a clean gate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartialState {
    pub status: PartialCloseStatus,
    pub breakeven_moved: bool,
    /// Current effective stop (entry price once TP1 has filled).
    pub current_sl: f64,
    /// Banked PnL of the TP1 half, percent of entry.
    pub tp1_pnl: f64,
}

impl PartialState {
    pub fn from_signal(signal: &SignalRecord) -> Self {
        Self {
            status: signal.partial_close_status,
            breakeven_moved: signal.breakeven_moved,
            current_sl: signal.current_stop,
            tp1_pnl: signal.tp1_pnl.unwrap_or(0.0),
        }
    }
}

/// Exit-gate parameters lifted from the engine config.
#[derive(Debug, Clone, Copy)]
pub struct ExitPolicy {
    /// Opposing |imbalance| beyond which a sample counts as reversed.
    pub reversal_threshold: f64,
    /// Consecutive reversed samples required to close.
    pub reversal_samples: u32,
    /// Reversal exits are suppressed before this hold time.
    pub min_hold_seconds: u64,
}

/// The tracker's decision for one signal on one tick.
#[derive(Debug, Clone, PartialEq)]
pub enum ExitDecision {
    None,
    /// TP1 hit: half closes, the stop moves to entry, the signal stays open.
    Tp1Partial {
        fill_price: f64,
        new_stop: f64,
        tp1_pnl: f64,
    },
    /// TP2 hit on the remaining half.
    Tp2Full { tp2_pnl: f64, total_pnl: f64 },
    /// Break-even stop after TP1: the banked half is the final result.
    StopBreakeven { total_pnl: f64 },
    /// Plain stop before any partial fill.
    StopFull { total_pnl: f64 },
    /// Sustained opposing imbalance.
    Reversal { total_pnl: f64 },
    /// The record violates its own ordering invariants; close with an error.
    Invariant { detail: String },
}

impl ExitDecision {
    /// Whether this decision fully removes the signal from tracking.
    pub fn is_full_closure(&self) -> bool {
        !matches!(self, Self::None | Self::Tp1Partial { .. })
    }
}

/// PnL of one whole position leg at `price`, percent of entry, signed for
/// the direction.
fn leg_pnl_pct(direction: Direction, entry: f64, price: f64) -> f64 {
    direction.sign() * (price - entry) / entry * 100.0
}

/// Evaluate the exit machine for one signal against the current mid price
/// and global imbalance.
///
/// Mutates `state` on a TP1 fill (status, break-even stop) and
/// `reversal_counter` on reversal-gate samples. `hold_seconds` is measured
/// from the stored `created_at` using exchange-aligned time.
pub fn evaluate(
    policy: &ExitPolicy,
    signal: &SignalRecord,
    state: &mut PartialState,
    reversal_counter: &mut u32,
    mid: f64,
    imbalance: f64,
    hold_seconds: f64,
) -> ExitDecision {
    let direction = signal.direction;
    let entry = signal.entry_price;
    let is_long = direction == Direction::Long;

    // ── Invariant sanity: ordering must hold for the direction ──────────
    let ordered = if is_long {
        signal.stop_loss < entry && entry < signal.take_profit_1
            && signal.take_profit_1 <= signal.take_profit_2
    } else {
        signal.stop_loss > entry && entry > signal.take_profit_1
            && signal.take_profit_1 >= signal.take_profit_2
    };
    if !ordered {
        return ExitDecision::Invariant {
            detail: format!(
                "SL/TP ordering violated: sl={} entry={} tp1={} tp2={}",
                signal.stop_loss, entry, signal.take_profit_1, signal.take_profit_2
            ),
        };
    }

    // ── 1. TP2 — only once the TP1 half is banked ───────────────────────
    if state.status == PartialCloseStatus::Tp1Closed {
        let hit = if is_long {
            mid >= signal.take_profit_2
        } else {
            mid <= signal.take_profit_2
        };
        if hit {
            let tp2_pnl = 0.5 * leg_pnl_pct(direction, entry, signal.take_profit_2);
            return ExitDecision::Tp2Full {
                tp2_pnl,
                total_pnl: state.tp1_pnl + tp2_pnl,
            };
        }
    }

    // ── 2. TP1 — only from the unfilled state ───────────────────────────
    if state.status == PartialCloseStatus::None {
        let hit = if is_long {
            mid >= signal.take_profit_1
        } else {
            mid <= signal.take_profit_1
        };
        if hit {
            let tp1_pnl = 0.5 * leg_pnl_pct(direction, entry, signal.take_profit_1);
            state.status = PartialCloseStatus::Tp1Closed;
            state.breakeven_moved = true;
            state.current_sl = entry;
            state.tp1_pnl = tp1_pnl;
            return ExitDecision::Tp1Partial {
                fill_price: mid,
                new_stop: entry,
                tp1_pnl,
            };
        }
    }

    // ── 3. Stop — against the current (possibly break-even) stop ────────
    let stopped = if is_long {
        mid <= state.current_sl
    } else {
        mid >= state.current_sl
    };
    if stopped {
        return if state.status == PartialCloseStatus::Tp1Closed {
            ExitDecision::StopBreakeven {
                total_pnl: state.tp1_pnl,
            }
        } else {
            ExitDecision::StopFull {
                total_pnl: leg_pnl_pct(direction, entry, mid),
            }
        };
    }

    // ── 4. Sustained reversal ───────────────────────────────────────────
    // Layer 1: time. Nothing moves before the minimum hold.
    if hold_seconds < policy.min_hold_seconds as f64 {
        return ExitDecision::None;
    }

    // Layer 2: persistence of the opposing imbalance.
    let reversed = if is_long {
        imbalance < -policy.reversal_threshold
    } else {
        imbalance > policy.reversal_threshold
    };

    if reversed {
        *reversal_counter += 1;
        if *reversal_counter >= policy.reversal_samples {
            let total_pnl = if state.status == PartialCloseStatus::Tp1Closed {
                state.tp1_pnl + 0.5 * leg_pnl_pct(direction, entry, mid)
            } else {
                leg_pnl_pct(direction, entry, mid)
            };
            return ExitDecision::Reversal { total_pnl };
        }
    } else {
        *reversal_counter = 0;
    }

    ExitDecision::None
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Priority, SignalStatus};

    fn policy() -> ExitPolicy {
        ExitPolicy {
            reversal_threshold: 0.4,
            reversal_samples: 75,
            min_hold_seconds: 30,
        }
    }

    /// The reference LONG: entry 100.00, stop 99.20, TP1 100.95, TP2 101.90.
    fn long_signal() -> SignalRecord {
        SignalRecord {
            id: "sig-1".to_string(),
            symbol: "BTCUSDT".to_string(),
            direction: Direction::Long,
            priority: Priority::High,
            entry_price: 100.0,
            stop_loss: 99.2,
            current_stop: 99.2,
            take_profit_1: 100.95,
            take_profit_2: 101.9,
            quality_score: 85.0,
            imbalance: 0.31,
            large_trades: 4,
            volume_intensity: 2.1,
            confidence: 0.9,
            risk_reward: 1.1875,
            status: SignalStatus::Open,
            partial_close_status: PartialCloseStatus::None,
            breakeven_moved: false,
            tp1_fill_price: None,
            tp1_fill_time: None,
            tp1_pnl: None,
            tp2_fill_price: None,
            tp2_fill_time: None,
            tp2_pnl: None,
            sl_reasoning: String::new(),
            tp1_reasoning: String::new(),
            tp2_reasoning: String::new(),
            support_level: 99.5,
            resistance_level: 101.0,
            created_at: 0,
            updated_at: 0,
            telegram_message_id: None,
        }
    }

    fn short_signal() -> SignalRecord {
        let mut s = long_signal();
        s.direction = Direction::Short;
        s.stop_loss = 100.8;
        s.current_stop = 100.8;
        s.take_profit_1 = 99.05;
        s.take_profit_2 = 98.1;
        s
    }

    fn fresh_state(signal: &SignalRecord) -> PartialState {
        PartialState::from_signal(signal)
    }

    #[test]
    fn scenario_clean_long_tp1_then_tp2() {
        let signal = long_signal();
        let mut state = fresh_state(&signal);
        let mut counter = 0;

        // Price reaches TP1.
        let d = evaluate(&policy(), &signal, &mut state, &mut counter, 101.0, 0.2, 10.0);
        match d {
            ExitDecision::Tp1Partial {
                new_stop, tp1_pnl, ..
            } => {
                assert_eq!(new_stop, 100.0);
                // 0.5 · 0.95 % = 0.475 %.
                assert!((tp1_pnl - 0.475).abs() < 1e-9);
            }
            other => panic!("expected TP1 partial, got {other:?}"),
        }

        // State machine promoted the stop to break-even.
        assert_eq!(state.status, PartialCloseStatus::Tp1Closed);
        assert!(state.breakeven_moved);
        assert_eq!(state.current_sl, 100.0);

        // Price runs to TP2.
        let d = evaluate(&policy(), &signal, &mut state, &mut counter, 102.0, 0.2, 20.0);
        match d {
            ExitDecision::Tp2Full { tp2_pnl, total_pnl } => {
                // 0.5 · 1.90 % = 0.95 %; total = 0.475 + 0.95 = 1.425 %.
                assert!((tp2_pnl - 0.95).abs() < 1e-9);
                assert!((total_pnl - 1.425).abs() < 1e-9);
            }
            other => panic!("expected TP2, got {other:?}"),
        }
    }

    #[test]
    fn scenario_stop_out_before_tp1() {
        let signal = long_signal();
        let mut state = fresh_state(&signal);
        let mut counter = 0;

        let d = evaluate(&policy(), &signal, &mut state, &mut counter, 99.19, 0.2, 5.0);
        match d {
            ExitDecision::StopFull { total_pnl } => {
                assert!((total_pnl + 0.81).abs() < 1e-9);
            }
            other => panic!("expected full stop, got {other:?}"),
        }
    }

    #[test]
    fn scenario_breakeven_stop_after_tp1() {
        let signal = long_signal();
        let mut state = fresh_state(&signal);
        let mut counter = 0;

        evaluate(&policy(), &signal, &mut state, &mut counter, 100.95, 0.2, 10.0);
        assert_eq!(state.status, PartialCloseStatus::Tp1Closed);

        // Price retraces to the entry — the break-even stop fires with the
        // banked TP1 profit as the final result.
        let d = evaluate(&policy(), &signal, &mut state, &mut counter, 100.0, 0.2, 20.0);
        match d {
            ExitDecision::StopBreakeven { total_pnl } => {
                assert!((total_pnl - 0.475).abs() < 1e-9);
            }
            other => panic!("expected break-even stop, got {other:?}"),
        }
    }

    #[test]
    fn scenario_sustained_reversal_fires_at_75_samples() {
        let signal = long_signal();
        let mut state = fresh_state(&signal);
        let mut counter = 0;

        // Before the 30 s hold the reversal is suppressed entirely.
        for _ in 0..80 {
            let d = evaluate(&policy(), &signal, &mut state, &mut counter, 100.1, -0.45, 20.0);
            assert_eq!(d, ExitDecision::None);
        }
        assert_eq!(counter, 0, "time layer must not advance the counter");

        // After 30 s the counter builds; sample 75 closes.
        for i in 1..75 {
            let d = evaluate(&policy(), &signal, &mut state, &mut counter, 100.1, -0.45, 31.0);
            assert_eq!(d, ExitDecision::None, "fired early at sample {i}");
            assert_eq!(counter, i);
        }
        let d = evaluate(&policy(), &signal, &mut state, &mut counter, 100.1, -0.45, 31.0);
        match d {
            ExitDecision::Reversal { total_pnl } => {
                assert!((total_pnl - 0.1).abs() < 1e-9);
            }
            other => panic!("expected reversal, got {other:?}"),
        }
    }

    #[test]
    fn scenario_reversal_dissipates() {
        let signal = long_signal();
        let mut state = fresh_state(&signal);
        let mut counter = 0;

        // Alternating reversed / calm samples never accumulate 75.
        for _ in 0..200 {
            let d = evaluate(&policy(), &signal, &mut state, &mut counter, 100.1, -0.45, 35.0);
            assert_eq!(d, ExitDecision::None);
            let d = evaluate(&policy(), &signal, &mut state, &mut counter, 100.1, -0.10, 35.0);
            assert_eq!(d, ExitDecision::None);
            assert_eq!(counter, 0, "calm sample must reset the counter");
        }
    }

    #[test]
    fn hold_time_boundary_exactly_30s_activates_gate() {
        let signal = long_signal();
        let mut state = fresh_state(&signal);
        let mut counter = 0;

        // 29.999 s: suppressed.
        evaluate(&policy(), &signal, &mut state, &mut counter, 100.1, -0.45, 29.999);
        assert_eq!(counter, 0);

        // Exactly 30.000 s: the gate is active and the counter advances.
        evaluate(&policy(), &signal, &mut state, &mut counter, 100.1, -0.45, 30.0);
        assert_eq!(counter, 1);
    }

    #[test]
    fn reversal_threshold_is_strict() {
        let signal = long_signal();
        let mut state = fresh_state(&signal);
        let mut counter = 0;

        // |imbalance| exactly 0.4 does not count as reversed (strict >).
        evaluate(&policy(), &signal, &mut state, &mut counter, 100.1, -0.4, 40.0);
        assert_eq!(counter, 0);

        evaluate(&policy(), &signal, &mut state, &mut counter, 100.1, -0.41, 40.0);
        assert_eq!(counter, 1);
    }

    #[test]
    fn long_reversal_requires_opposing_sign() {
        let signal = long_signal();
        let mut state = fresh_state(&signal);
        let mut counter = 0;

        // Strong imbalance in the position's own direction is not a threat.
        evaluate(&policy(), &signal, &mut state, &mut counter, 100.1, 0.9, 40.0);
        assert_eq!(counter, 0);
    }

    #[test]
    fn short_side_mirrors() {
        let signal = short_signal();
        let mut state = fresh_state(&signal);
        let mut counter = 0;

        // TP1 for a short: mid at/below 99.05.
        let d = evaluate(&policy(), &signal, &mut state, &mut counter, 99.0, -0.2, 10.0);
        match d {
            ExitDecision::Tp1Partial { tp1_pnl, new_stop, .. } => {
                assert!((tp1_pnl - 0.475).abs() < 1e-9);
                assert_eq!(new_stop, 100.0);
            }
            other => panic!("expected TP1 partial, got {other:?}"),
        }

        // Break-even stop for a short: mid back at/above entry.
        let d = evaluate(&policy(), &signal, &mut state, &mut counter, 100.0, -0.2, 20.0);
        assert!(matches!(d, ExitDecision::StopBreakeven { .. }));

        // Short reversal requires strong positive imbalance.
        let mut state = fresh_state(&short_signal());
        let mut counter = 0;
        evaluate(&policy(), &short_signal(), &mut state, &mut counter, 100.1, 0.45, 40.0);
        assert_eq!(counter, 1);
    }

    #[test]
    fn tp2_before_tp1_is_treated_as_tp1_first() {
        // A violent move through both targets in one tick: the machine takes
        // the TP1 partial first (TP2 requires the TP1_CLOSED state).
        let signal = long_signal();
        let mut state = fresh_state(&signal);
        let mut counter = 0;

        let d = evaluate(&policy(), &signal, &mut state, &mut counter, 102.5, 0.2, 10.0);
        assert!(matches!(d, ExitDecision::Tp1Partial { .. }));

        // The very next tick at the same price completes via TP2.
        let d = evaluate(&policy(), &signal, &mut state, &mut counter, 102.5, 0.2, 10.1);
        assert!(matches!(d, ExitDecision::Tp2Full { .. }));
    }

    #[test]
    fn partial_status_sequence_is_prefix_law() {
        // NONE → TP1_CLOSED is the only in-place transition the machine
        // performs; full closures are terminal.
        let signal = long_signal();
        let mut state = fresh_state(&signal);
        let mut counter = 0;

        assert_eq!(state.status, PartialCloseStatus::None);
        evaluate(&policy(), &signal, &mut state, &mut counter, 101.0, 0.2, 10.0);
        assert_eq!(state.status, PartialCloseStatus::Tp1Closed);

        // Re-evaluating in TP1_CLOSED never regresses to NONE.
        evaluate(&policy(), &signal, &mut state, &mut counter, 100.5, 0.2, 11.0);
        assert_eq!(state.status, PartialCloseStatus::Tp1Closed);
    }

    #[test]
    fn invariant_violation_is_terminal() {
        let mut signal = long_signal();
        signal.stop_loss = 101.0; // stop above entry for a LONG
        let mut state = fresh_state(&signal);
        let mut counter = 0;

        let d = evaluate(&policy(), &signal, &mut state, &mut counter, 100.5, 0.2, 10.0);
        assert!(matches!(d, ExitDecision::Invariant { .. }));
    }

    #[test]
    fn quiet_market_no_exit() {
        let signal = long_signal();
        let mut state = fresh_state(&signal);
        let mut counter = 0;

        let d = evaluate(&policy(), &signal, &mut state, &mut counter, 100.3, 0.1, 60.0);
        assert_eq!(d, ExitDecision::None);
        assert!(!d.is_full_closure());
    }
}
