// =============================================================================
// Fast Signal Tracker — the 100 ms exit loop over all open signals
// =============================================================================
//
// Holds a reflected, read-mostly copy of the OPEN signal set plus the
// per-signal exit state (partial status, break-even stop, banked TP1 PnL)
// and reversal counters. Every tick:
//
//   1. Read `price:<S>` and `imbalance:<S>` from the snapshot cache; either
//      missing means this signal is skipped this tick (no counters move).
//   2. Run the exit state machine.
//   3. Commit all resulting mutations in ONE store transaction (conditional
//      on `status = 'OPEN'`, so duplicate-closure races degrade to no-ops).
//   4. Dispatch reply-threaded notifications fire-and-forget.
//   5. Resync the in-memory map from the store immediately after a batch.
//
// A second, independent task calls `sync_from_store` every 5 seconds so the
// map converges even without closures (e.g. rows closed by another party).
//
// A signal is tracked even when its symbol has left the active universe:
// as long as snapshot data is still flowing it will close naturally, and
// when the data dries up the checks simply skip.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use parking_lot::RwLock;
use tracing::{debug, error, info, warn};

use crate::notifier::{ClosureNotice, TelegramNotifier};
use crate::runtime_config::EngineConfig;
use crate::snapshot_cache::{self, ImbalancePayload, PricePoint, SnapshotCache};
use crate::store::{ClosureOp, ClosureOutcome, SignalRecord, SignalStore};
use crate::tracker::exit::{self, ExitDecision, ExitPolicy, PartialState};
use crate::types::{ExitReason, PartialCloseStatus};

pub struct FastSignalTracker {
    policy: ExitPolicy,
    cache: Arc<SnapshotCache>,
    store: Arc<SignalStore>,
    notifier: Arc<TelegramNotifier>,

    /// Reflected open signals keyed by id. Written by resync and by this
    /// tracker's own closure handler; read-only to everyone else.
    open: RwLock<HashMap<String, SignalRecord>>,
    /// Per-signal partial-close exit state.
    partial: RwLock<HashMap<String, PartialState>>,
    /// Per-signal reversal persistence counters.
    reversal: RwLock<HashMap<String, u32>>,
}

impl FastSignalTracker {
    pub fn new(
        config: &EngineConfig,
        cache: Arc<SnapshotCache>,
        store: Arc<SignalStore>,
        notifier: Arc<TelegramNotifier>,
    ) -> Self {
        Self {
            policy: ExitPolicy {
                reversal_threshold: config.imbalance_reversal_threshold,
                reversal_samples: config.persistence_reversal_samples,
                min_hold_seconds: config.min_hold_seconds,
            },
            cache,
            store,
            notifier,
            open: RwLock::new(HashMap::new()),
            partial: RwLock::new(HashMap::new()),
            reversal: RwLock::new(HashMap::new()),
        }
    }

    /// Number of signals currently tracked.
    pub fn open_count(&self) -> usize {
        self.open.read().len()
    }

    /// Reflected open signals (for the status API).
    pub fn open_signals(&self) -> Vec<SignalRecord> {
        self.open.read().values().cloned().collect()
    }

    // -------------------------------------------------------------------------
    // Cache sync
    // -------------------------------------------------------------------------

    /// Rebuild the open map from the store. Partial state survives for ids
    /// still open; counters and state for ids no longer open are dropped.
    pub fn sync_from_store(&self) -> Result<usize> {
        let rows = self.store.load_open_signals()?;

        let mut open = self.open.write();
        let mut partial = self.partial.write();
        let mut reversal = self.reversal.write();

        open.clear();
        for row in rows {
            partial
                .entry(row.id.clone())
                .and_modify(|state| {
                    // The store is canonical for anything it already knows.
                    if row.partial_close_status == PartialCloseStatus::Tp1Closed {
                        state.status = row.partial_close_status;
                        state.breakeven_moved = row.breakeven_moved;
                        state.current_sl = row.current_stop;
                        state.tp1_pnl = row.tp1_pnl.unwrap_or(state.tp1_pnl);
                    }
                })
                .or_insert_with(|| PartialState::from_signal(&row));
            open.insert(row.id.clone(), row);
        }

        partial.retain(|id, _| open.contains_key(id));
        reversal.retain(|id, _| open.contains_key(id));

        debug!(open = open.len(), "fast tracker cache synced");
        Ok(open.len())
    }

    // -------------------------------------------------------------------------
    // The 100 ms tick
    // -------------------------------------------------------------------------

    /// Evaluate every open signal once and commit any resulting closures.
    /// Errors on a single signal never abort the tick.
    pub async fn tick(&self) {
        let now_ms = Utc::now().timestamp_millis();
        let signals: Vec<SignalRecord> = self.open.read().values().cloned().collect();
        if signals.is_empty() {
            return;
        }

        let mut ops: Vec<ClosureOp> = Vec::new();
        let mut notices: Vec<(ClosureNotice, Option<i64>)> = Vec::new();

        {
            let mut partial = self.partial.write();
            let mut reversal = self.reversal.write();

            for signal in &signals {
                let Some(price) = self
                    .cache
                    .get::<PricePoint>(&snapshot_cache::key_price(&signal.symbol))
                else {
                    continue; // skip this tick, counters untouched
                };
                let Some(imbalance) = self
                    .cache
                    .get::<ImbalancePayload>(&snapshot_cache::key_imbalance(&signal.symbol))
                else {
                    continue;
                };

                let mid = price.mid;
                if mid <= 0.0 {
                    warn!(symbol = %signal.symbol, "invalid mid price — skipping check");
                    continue;
                }

                // Hold time from the stored created_at, on the exchange
                // event clock when the price point carries one.
                let reference_ms = if price.timestamp > 0 {
                    price.timestamp
                } else {
                    now_ms
                };
                let hold_seconds = (reference_ms - signal.created_at).max(0) as f64 / 1000.0;

                let state = partial
                    .entry(signal.id.clone())
                    .or_insert_with(|| PartialState::from_signal(signal));
                let counter = reversal.entry(signal.id.clone()).or_insert(0);

                let decision = exit::evaluate(
                    &self.policy,
                    signal,
                    state,
                    counter,
                    mid,
                    imbalance.imbalance,
                    hold_seconds,
                );

                if let Some((op, notice)) =
                    self.decision_to_op(signal, state, &decision, mid, now_ms)
                {
                    info!(
                        signal_id = %signal.id,
                        symbol = %signal.symbol,
                        direction = %signal.direction,
                        mid,
                        decision = ?decision,
                        "exit decision"
                    );
                    ops.push(op);
                    notices.push((notice, signal.telegram_message_id));
                }
            }
        }

        if ops.is_empty() {
            return;
        }

        // ── Batched, conditional commit ─────────────────────────────────
        let outcomes = match self.store.apply_closures(&ops) {
            Ok(outcomes) => outcomes,
            Err(e) => {
                error!(error = %e, batch = ops.len(), "closure batch failed — state left to resync");
                return;
            }
        };

        // ── In-memory map maintenance ───────────────────────────────────
        for (op, outcome) in ops.iter().zip(outcomes.iter()) {
            let id = op.signal_id();
            if *outcome == ClosureOutcome::AlreadyClosed {
                // Race loser: drop our view, resync below restores truth.
                self.open.write().remove(id);
                self.partial.write().remove(id);
                self.reversal.write().remove(id);
                continue;
            }

            match op {
                ClosureOp::Tp1Partial { new_stop, tp1_pnl, fill_price, fill_time_ms, .. } => {
                    // Partial fill keeps the signal tracked, updated.
                    if let Some(record) = self.open.write().get_mut(id) {
                        record.partial_close_status = PartialCloseStatus::Tp1Closed;
                        record.breakeven_moved = true;
                        record.current_stop = *new_stop;
                        record.tp1_fill_price = Some(*fill_price);
                        record.tp1_fill_time = Some(*fill_time_ms);
                        record.tp1_pnl = Some(*tp1_pnl);
                    }
                }
                ClosureOp::Close { .. } => {
                    self.open.write().remove(id);
                    self.partial.write().remove(id);
                    self.reversal.write().remove(id);
                }
            }
        }

        // ── Fire-and-forget notifications ───────────────────────────────
        if self.notifier.is_enabled() {
            for (notice, reply_to) in notices {
                let notifier = self.notifier.clone();
                tokio::spawn(async move {
                    if let Err(e) = notifier.send_closure_update(&notice, reply_to).await {
                        warn!(
                            signal_id = %notice.signal_id,
                            error = %e,
                            "closure notification failed"
                        );
                    }
                });
            }
        }

        // ── Immediate resync so we observe the canonical post-batch state
        if let Err(e) = self.sync_from_store() {
            warn!(error = %e, "post-closure resync failed");
        }
    }

    /// Translate an exit decision into a store op plus its notification.
    fn decision_to_op(
        &self,
        signal: &SignalRecord,
        state: &PartialState,
        decision: &ExitDecision,
        mid: f64,
        now_ms: i64,
    ) -> Option<(ClosureOp, ClosureNotice)> {
        let hold_minutes = (now_ms - signal.created_at).max(0) / 60_000;

        let notice = |reason: ExitReason, exit_price: f64, pnl: f64| ClosureNotice {
            signal_id: signal.id.clone(),
            symbol: signal.symbol.clone(),
            direction: signal.direction,
            exit_reason: reason,
            entry_price: signal.entry_price,
            exit_price,
            pnl_percent: pnl,
            hold_minutes,
        };

        match decision {
            ExitDecision::None => None,

            ExitDecision::Tp1Partial {
                fill_price,
                new_stop,
                tp1_pnl,
            } => Some((
                ClosureOp::Tp1Partial {
                    signal_id: signal.id.clone(),
                    fill_price: *fill_price,
                    fill_time_ms: now_ms,
                    tp1_pnl: *tp1_pnl,
                    new_stop: *new_stop,
                },
                notice(ExitReason::TakeProfit1Partial, *fill_price, *tp1_pnl),
            )),

            ExitDecision::Tp2Full { tp2_pnl, total_pnl } => Some((
                ClosureOp::Close {
                    signal_id: signal.id.clone(),
                    exit_reason: ExitReason::TakeProfit2,
                    exit_price: mid,
                    exit_time_ms: now_ms,
                    pnl_percent: *total_pnl,
                    final_partial: PartialCloseStatus::FullyClosed,
                    tp2_fill: Some((mid, now_ms, *tp2_pnl)),
                },
                notice(ExitReason::TakeProfit2, mid, *total_pnl),
            )),

            ExitDecision::StopBreakeven { total_pnl } => Some((
                ClosureOp::Close {
                    signal_id: signal.id.clone(),
                    exit_reason: ExitReason::StopLossBreakeven,
                    exit_price: mid,
                    exit_time_ms: now_ms,
                    pnl_percent: *total_pnl,
                    final_partial: PartialCloseStatus::FullyClosed,
                    tp2_fill: None,
                },
                notice(ExitReason::StopLossBreakeven, mid, *total_pnl),
            )),

            ExitDecision::StopFull { total_pnl } => Some((
                ClosureOp::Close {
                    signal_id: signal.id.clone(),
                    exit_reason: ExitReason::StopLoss,
                    exit_price: mid,
                    exit_time_ms: now_ms,
                    pnl_percent: *total_pnl,
                    final_partial: PartialCloseStatus::None,
                    tp2_fill: None,
                },
                notice(ExitReason::StopLoss, mid, *total_pnl),
            )),

            ExitDecision::Reversal { total_pnl } => {
                let final_partial = if state.status == PartialCloseStatus::Tp1Closed {
                    PartialCloseStatus::FullyClosed
                } else {
                    PartialCloseStatus::None
                };
                Some((
                    ClosureOp::Close {
                        signal_id: signal.id.clone(),
                        exit_reason: ExitReason::ImbalanceReversed,
                        exit_price: mid,
                        exit_time_ms: now_ms,
                        pnl_percent: *total_pnl,
                        final_partial,
                        tp2_fill: None,
                    },
                    notice(ExitReason::ImbalanceReversed, mid, *total_pnl),
                ))
            }

            ExitDecision::Invariant { detail } => {
                // Fatal for this signal only: close with an error reason and
                // exclude it from further evaluation.
                error!(
                    signal_id = %signal.id,
                    symbol = %signal.symbol,
                    detail = %detail,
                    "invariant violation — closing signal with error"
                );
                Some((
                    ClosureOp::Close {
                        signal_id: signal.id.clone(),
                        exit_reason: ExitReason::InvariantError,
                        exit_price: mid,
                        exit_time_ms: now_ms,
                        pnl_percent: 0.0,
                        final_partial: signal.partial_close_status,
                        tp2_fill: None,
                    },
                    notice(ExitReason::InvariantError, mid, 0.0),
                ))
            }
        }
    }
}
