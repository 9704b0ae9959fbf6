// =============================================================================
// Signal Engine — the 100 ms entry gate and proposal builder
// =============================================================================
//
// Every 100 ms tick, each active instrument's confluence is checked from the
// snapshot cache alone (no I/O on the hot path):
//
//   1. directional global imbalance beyond the entry threshold,
//   2. enough side-matching large trades in the flow window,
//   3. volume intensity above the confirmation multiplier,
//   4. price on the right side of VWAP.
//
// Missing data is abstention — the tick is skipped and the persistence
// counter keeps its value. A failed condition resets it. Once the counter
// reaches the configured sample count, the expensive proposal pass runs:
// ATR estimate, deep REST depth, six-hour volume profile, level fusion,
// SL/TP placement, validation, and finally emission.
// =============================================================================

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{debug, info, warn};

use crate::analysis::{levels, risk_placement, VolatilityEstimator};
use crate::binance::BinanceClient;
use crate::market_data::{CandleBuffer, CandleKey, TradeFlowSummary};
use crate::runtime_config::EngineConfig;
use crate::signal::emitter::SignalEmitter;
use crate::signal::entry_tracker::EntryPersistenceTracker;
use crate::signal::validator;
use crate::snapshot_cache::{self, ImbalancePayload, PricePoint, SnapshotCache};
use crate::store::{SignalRecord, SignalStore};
use crate::types::{Direction, PartialCloseStatus, SignalStatus};

/// Minutes spanned by the 15-minute baseline candle.
const BASELINE_CANDLE_MINUTES: f64 = 15.0;

/// Hours of 1-minute history feeding the volume profile.
const PROFILE_HOURS: i64 = 6;

/// Features captured at the moment the gate passed.
#[derive(Debug, Clone)]
pub struct GateSnapshot {
    pub direction: Direction,
    pub imbalance: f64,
    /// Large trades on the signal's side only.
    pub large_trades: u32,
    pub volume_intensity: f64,
    pub mid_price: f64,
    pub vwap: f64,
}

/// Outcome of one gate evaluation.
#[derive(Debug, Clone)]
pub enum GateOutcome {
    /// Required data missing — skip the tick, leave the counter alone.
    Abstain,
    /// Conditions evaluated and failed — the counter resets.
    Fail,
    /// All four conditions hold.
    Pass(GateSnapshot),
}

pub struct SignalEngine {
    config: Arc<EngineConfig>,
    cache: Arc<SnapshotCache>,
    candles: Arc<CandleBuffer>,
    store: Arc<SignalStore>,
    client: Arc<BinanceClient>,
    volatility: VolatilityEstimator,
    pub tracker: EntryPersistenceTracker,
    emitter: SignalEmitter,
}

impl SignalEngine {
    pub fn new(
        config: Arc<EngineConfig>,
        cache: Arc<SnapshotCache>,
        candles: Arc<CandleBuffer>,
        store: Arc<SignalStore>,
        client: Arc<BinanceClient>,
        emitter: SignalEmitter,
    ) -> Self {
        let volatility = VolatilityEstimator::new(config.atr_period);
        let tracker = EntryPersistenceTracker::new(config.persistence_entry_samples);
        Self {
            config,
            cache,
            candles,
            store,
            client,
            volatility,
            tracker,
            emitter,
        }
    }

    /// One 100 ms tick over the active instrument set.
    pub async fn tick(&self, symbols: &[String]) {
        for symbol in symbols {
            match self.evaluate_gate(symbol) {
                GateOutcome::Abstain => {}
                GateOutcome::Fail => {
                    self.tracker.update(symbol, false);
                }
                GateOutcome::Pass(snapshot) => {
                    if self.tracker.update(symbol, true) {
                        if let Err(e) = self.propose(symbol, &snapshot).await {
                            // Errors are isolated per instrument.
                            warn!(symbol = %symbol, error = %e, "proposal pass failed");
                        }
                    }
                }
            }
        }
    }

    /// Evaluate the four entry preconditions from the snapshot cache.
    pub fn evaluate_gate(&self, symbol: &str) -> GateOutcome {
        let Some(imbalance) = self
            .cache
            .get::<ImbalancePayload>(&snapshot_cache::key_imbalance(symbol))
        else {
            return GateOutcome::Abstain;
        };
        let Some(price) = self
            .cache
            .get::<PricePoint>(&snapshot_cache::key_price(symbol))
        else {
            return GateOutcome::Abstain;
        };
        let Some(flow) = self
            .cache
            .get::<TradeFlowSummary>(&snapshot_cache::key_trade_flow(symbol))
        else {
            return GateOutcome::Abstain;
        };
        // The 15-minute candle is required; absence is abstention, never an
        // implicit baseline.
        let Some(baseline_candle) = self
            .cache
            .get::<crate::market_data::Candle>(&snapshot_cache::key_kline_15m(symbol))
        else {
            return GateOutcome::Abstain;
        };

        if flow.vwap <= 0.0 || price.mid <= 0.0 {
            return GateOutcome::Abstain;
        }

        let baseline_per_minute =
            baseline_candle.volume * baseline_candle.close / BASELINE_CANDLE_MINUTES;
        if baseline_per_minute <= 0.0 {
            return GateOutcome::Abstain;
        }
        let volume_intensity = flow.volume_per_minute / baseline_per_minute;

        let imb = imbalance.imbalance;
        let threshold = self.config.imbalance_entry_threshold;

        let direction = if imb > threshold {
            Direction::Long
        } else if imb < -threshold {
            Direction::Short
        } else {
            return GateOutcome::Fail;
        };

        let large_trades = match direction {
            Direction::Long => flow.large_buys,
            Direction::Short => flow.large_sells,
        };

        let conditions = large_trades >= self.config.min_large_trades
            && volume_intensity >= self.config.volume_confirmation_multiplier
            && match direction {
                Direction::Long => price.mid > flow.vwap,
                Direction::Short => price.mid < flow.vwap,
            };

        if !conditions {
            return GateOutcome::Fail;
        }

        GateOutcome::Pass(GateSnapshot {
            direction,
            imbalance: imb,
            large_trades,
            volume_intensity,
            mid_price: price.mid,
            vwap: flow.vwap,
        })
    }

    /// The expensive pass: levels, placement, validation, emission.
    async fn propose(&self, symbol: &str, gate: &GateSnapshot) -> Result<()> {
        if self.store.has_open_signal(symbol)? {
            debug!(symbol = %symbol, "open signal exists — proposal suppressed");
            return Ok(());
        }

        let closed = self
            .candles
            .closed(&CandleKey::new(symbol, "1m"), self.config.atr_period * 2);
        let Some(estimate) = self.volatility.estimate(symbol, &closed) else {
            debug!(symbol = %symbol, "insufficient candle history for ATR — skipping");
            return Ok(());
        };

        let range = estimate.working_range(self.config.working_range_multiplier);
        let entry_price = gate.mid_price;

        let depth = self
            .client
            .get_depth(symbol, self.config.orderbook_depth_analysis)
            .await
            .context("deep depth snapshot failed")?;

        let now_ms = Utc::now().timestamp_millis();
        let history = self
            .store
            .klines_since(symbol, "1m", now_ms - PROFILE_HOURS * 3600 * 1000)
            .context("volume-profile history query failed")?;

        let analysis = levels::analyze(&range, &depth, &history, self.config.bin_size_pct);

        let stop = risk_placement::plan_stop(
            gate.direction,
            entry_price,
            &analysis,
            estimate.atr,
            self.config.max_stop_pct,
        );
        let targets = match &stop {
            Ok(plan) => risk_placement::plan_targets(
                gate.direction,
                entry_price,
                plan,
                &analysis,
                self.config.min_tp_pct,
                self.config.min_rr,
            ),
            Err(_) => Err("invalid stop loss".to_string()),
        };

        let verdict = validator::validate(
            &self.config,
            gate.imbalance,
            gate.large_trades,
            gate.volume_intensity,
            &stop,
            &targets,
            analysis.total_levels,
        );

        if !verdict.is_valid {
            // Rejections are recorded, not surfaced as errors.
            debug!(
                symbol = %symbol,
                direction = %gate.direction,
                reasons = ?verdict.rejection_reasons,
                "proposal rejected"
            );
            return Ok(());
        }

        let (Ok(stop), Ok(targets)) = (stop, targets) else {
            return Ok(());
        };

        let (support_anchor, resistance_anchor) = match gate.direction {
            Direction::Long => (stop.anchor, targets.anchor),
            Direction::Short => (targets.anchor, stop.anchor),
        };

        let confidence =
            (verdict.quality_score / 100.0 * (1.0 + gate.imbalance.abs())).min(1.0);

        let record = SignalRecord {
            id: uuid::Uuid::new_v4().to_string(),
            symbol: symbol.to_string(),
            direction: gate.direction,
            priority: verdict.priority,
            entry_price,
            stop_loss: stop.price,
            current_stop: stop.price,
            take_profit_1: targets.tp1,
            take_profit_2: targets.tp2,
            quality_score: verdict.quality_score,
            imbalance: gate.imbalance,
            large_trades: gate.large_trades,
            volume_intensity: gate.volume_intensity,
            confidence,
            risk_reward: targets.tp1_rr,
            status: SignalStatus::Open,
            partial_close_status: PartialCloseStatus::None,
            breakeven_moved: false,
            tp1_fill_price: None,
            tp1_fill_time: None,
            tp1_pnl: None,
            tp2_fill_price: None,
            tp2_fill_time: None,
            tp2_pnl: None,
            sl_reasoning: stop.reason.clone(),
            tp1_reasoning: targets.tp1_reason.clone(),
            tp2_reasoning: targets.tp2_reason.clone(),
            support_level: support_anchor,
            resistance_level: resistance_anchor,
            created_at: now_ms,
            updated_at: now_ms,
            telegram_message_id: None,
        };

        info!(
            symbol = %symbol,
            direction = %gate.direction,
            priority = %verdict.priority,
            quality = verdict.quality_score,
            warnings = ?verdict.warnings,
            "proposal accepted"
        );

        self.emitter.emit(record)
    }

    /// Drop per-instrument state for symbols outside the active set.
    pub fn retain_symbols(&self, active: &[String]) {
        self.tracker.retain_symbols(active);
        self.volatility.retain_symbols(active);
    }
}
