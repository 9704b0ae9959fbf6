// =============================================================================
// Signal Store — SQLite persistence for signals, trades, klines and metrics
// =============================================================================
//
// The store is the only cross-process synchronisation point: every closure
// is a conditional UPDATE guarded by `status = 'OPEN'` so a racing second
// attempt becomes a no-op instead of a double close.
//
// WAL mode keeps reads cheap while the fast tracker commits its batches.
// Timestamps are epoch milliseconds throughout.
// =============================================================================

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::market_data::Candle;
use crate::types::{Direction, ExitReason, PartialCloseStatus, Priority, SignalStatus};

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS signals (
    id                   TEXT PRIMARY KEY,
    symbol               TEXT NOT NULL,
    direction            TEXT NOT NULL,
    priority             TEXT NOT NULL,
    entry_price          REAL NOT NULL,
    stop_loss            REAL NOT NULL,
    current_stop         REAL NOT NULL,
    take_profit_1        REAL NOT NULL,
    take_profit_2        REAL NOT NULL,
    quality_score        REAL NOT NULL,
    imbalance            REAL NOT NULL,
    large_trades         INTEGER NOT NULL,
    volume_intensity     REAL NOT NULL,
    confidence           REAL NOT NULL,
    risk_reward          REAL NOT NULL,
    hold_time_minutes    INTEGER,
    status               TEXT NOT NULL DEFAULT 'OPEN',
    partial_close_status TEXT NOT NULL DEFAULT 'NONE',
    breakeven_moved      INTEGER NOT NULL DEFAULT 0,
    tp1_fill_price       REAL,
    tp1_fill_time        INTEGER,
    tp1_pnl              REAL,
    tp2_fill_price       REAL,
    tp2_fill_time        INTEGER,
    tp2_pnl              REAL,
    exit_reason          TEXT,
    sl_reasoning         TEXT NOT NULL DEFAULT '',
    tp1_reasoning        TEXT NOT NULL DEFAULT '',
    tp2_reasoning        TEXT NOT NULL DEFAULT '',
    support_level        REAL NOT NULL DEFAULT 0,
    resistance_level     REAL NOT NULL DEFAULT 0,
    created_at           INTEGER NOT NULL,
    updated_at           INTEGER NOT NULL,
    telegram_message_id  INTEGER
);

CREATE INDEX IF NOT EXISTS idx_signals_status ON signals(status);
CREATE INDEX IF NOT EXISTS idx_signals_symbol_status ON signals(symbol, status);
CREATE INDEX IF NOT EXISTS idx_signals_created ON signals(created_at);

CREATE TABLE IF NOT EXISTS trades (
    id                   TEXT PRIMARY KEY,
    signal_id            TEXT NOT NULL,
    symbol               TEXT NOT NULL,
    direction            TEXT NOT NULL,
    entry_price          REAL NOT NULL,
    exit_price           REAL NOT NULL,
    stop_loss            REAL NOT NULL,
    take_profit_1        REAL NOT NULL,
    take_profit_2        REAL NOT NULL,
    exit_reason          TEXT NOT NULL,
    pnl_percent          REAL NOT NULL,
    hold_time_minutes    INTEGER NOT NULL,
    partial_close_status TEXT NOT NULL,
    breakeven_moved      INTEGER NOT NULL,
    tp1_pnl              REAL,
    status               TEXT NOT NULL DEFAULT 'CLOSED',
    entry_time           INTEGER NOT NULL,
    exit_time            INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_trades_signal ON trades(signal_id);
CREATE INDEX IF NOT EXISTS idx_trades_exit_time ON trades(exit_time);

CREATE TABLE IF NOT EXISTS klines (
    symbol    TEXT NOT NULL,
    interval  TEXT NOT NULL,
    open_time INTEGER NOT NULL,
    open      REAL NOT NULL,
    high      REAL NOT NULL,
    low       REAL NOT NULL,
    close     REAL NOT NULL,
    volume    REAL NOT NULL,
    UNIQUE(symbol, interval, open_time)
);

CREATE INDEX IF NOT EXISTS idx_klines_lookup ON klines(symbol, interval, open_time);

CREATE TABLE IF NOT EXISTS performance_metrics (
    id                 TEXT PRIMARY KEY,
    date               INTEGER NOT NULL,
    signals_generated  INTEGER NOT NULL,
    win_count          INTEGER NOT NULL,
    loss_count         INTEGER NOT NULL,
    win_rate           REAL NOT NULL,
    total_pnl_percent  REAL NOT NULL,
    average_pnl        REAL NOT NULL,
    max_profit         REAL NOT NULL,
    max_loss           REAL NOT NULL,
    average_hold_time  REAL NOT NULL,
    tp1_hit_count      INTEGER NOT NULL,
    tp2_hit_count      INTEGER NOT NULL,
    sl_hit_count       INTEGER NOT NULL,
    created_at         INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS daily_stats (
    date                    INTEGER PRIMARY KEY,
    total_signals           INTEGER NOT NULL,
    high_priority_signals   INTEGER NOT NULL,
    medium_priority_signals INTEGER NOT NULL,
    low_priority_signals    INTEGER NOT NULL,
    win_rate                REAL NOT NULL,
    total_pnl_percent       REAL NOT NULL,
    updated_at              INTEGER NOT NULL
);
"#;

// ---------------------------------------------------------------------------
// Row types
// ---------------------------------------------------------------------------

/// A full signal row as the engine and API see it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalRecord {
    pub id: String,
    pub symbol: String,
    pub direction: Direction,
    pub priority: Priority,
    pub entry_price: f64,
    pub stop_loss: f64,
    /// Mutable stop: promoted to the entry price after TP1.
    pub current_stop: f64,
    pub take_profit_1: f64,
    pub take_profit_2: f64,
    pub quality_score: f64,
    pub imbalance: f64,
    pub large_trades: u32,
    pub volume_intensity: f64,
    pub confidence: f64,
    pub risk_reward: f64,
    pub status: SignalStatus,
    pub partial_close_status: PartialCloseStatus,
    pub breakeven_moved: bool,
    pub tp1_fill_price: Option<f64>,
    pub tp1_fill_time: Option<i64>,
    pub tp1_pnl: Option<f64>,
    pub tp2_fill_price: Option<f64>,
    pub tp2_fill_time: Option<i64>,
    pub tp2_pnl: Option<f64>,
    pub sl_reasoning: String,
    pub tp1_reasoning: String,
    pub tp2_reasoning: String,
    pub support_level: f64,
    pub resistance_level: f64,
    pub created_at: i64,
    pub updated_at: i64,
    pub telegram_message_id: Option<i64>,
}

/// Immutable closure history row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRow {
    pub id: String,
    pub signal_id: String,
    pub symbol: String,
    pub direction: Direction,
    pub entry_price: f64,
    pub exit_price: f64,
    pub exit_reason: String,
    pub pnl_percent: f64,
    pub hold_time_minutes: i64,
    pub entry_time: i64,
    pub exit_time: i64,
}

/// One mutation the fast tracker wants committed.
#[derive(Debug, Clone)]
pub enum ClosureOp {
    /// TP1 hit: close half, promote the stop to break-even, keep OPEN.
    Tp1Partial {
        signal_id: String,
        fill_price: f64,
        fill_time_ms: i64,
        tp1_pnl: f64,
        new_stop: f64,
    },
    /// Any full closure (TP2, stop, break-even stop, reversal, error).
    Close {
        signal_id: String,
        exit_reason: ExitReason,
        exit_price: f64,
        exit_time_ms: i64,
        pnl_percent: f64,
        final_partial: PartialCloseStatus,
        /// Present only for TP2 closures: (fill price, fill time, tp2 pnl).
        tp2_fill: Option<(f64, i64, f64)>,
    },
}

impl ClosureOp {
    pub fn signal_id(&self) -> &str {
        match self {
            Self::Tp1Partial { signal_id, .. } | Self::Close { signal_id, .. } => signal_id,
        }
    }
}

/// What happened to each op in a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClosureOutcome {
    Applied,
    /// The conditional update matched no row — someone closed it first.
    AlreadyClosed,
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// SQLite-backed store shared across tasks via `Arc<SignalStore>`.
pub struct SignalStore {
    conn: Arc<Mutex<Connection>>,
}

impl SignalStore {
    /// Open (or create) the database at `path` and apply the schema.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())
            .with_context(|| format!("failed to open database at {}", path.as_ref().display()))?;
        Self::init(conn)
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory().context("failed to open in-memory database")?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        conn.pragma_update(None, "synchronous", "NORMAL").ok();
        conn.busy_timeout(std::time::Duration::from_secs(30))
            .context("failed to set busy timeout")?;
        conn.execute_batch(SCHEMA_SQL)
            .context("failed to apply schema")?;

        info!("signal store initialised");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    // -------------------------------------------------------------------------
    // Signals
    // -------------------------------------------------------------------------

    /// Insert a freshly validated signal with status OPEN.
    pub fn insert_signal(&self, record: &SignalRecord) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO signals (
                id, symbol, direction, priority, entry_price, stop_loss,
                current_stop, take_profit_1, take_profit_2, quality_score,
                imbalance, large_trades, volume_intensity, confidence,
                risk_reward, status, partial_close_status, breakeven_moved,
                sl_reasoning, tp1_reasoning, tp2_reasoning,
                support_level, resistance_level, created_at, updated_at,
                telegram_message_id
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13,
                      ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24,
                      ?25, ?26)",
            params![
                record.id,
                record.symbol,
                record.direction.as_str(),
                record.priority.as_str(),
                record.entry_price,
                record.stop_loss,
                record.current_stop,
                record.take_profit_1,
                record.take_profit_2,
                record.quality_score,
                record.imbalance,
                record.large_trades,
                record.volume_intensity,
                record.confidence,
                record.risk_reward,
                record.status.as_str(),
                record.partial_close_status.as_str(),
                record.breakeven_moved as i64,
                record.sl_reasoning,
                record.tp1_reasoning,
                record.tp2_reasoning,
                record.support_level,
                record.resistance_level,
                record.created_at,
                record.updated_at,
                record.telegram_message_id,
            ],
        )
        .context("failed to insert signal")?;
        Ok(())
    }

    /// Record the notifier message id for later reply-threading.
    pub fn set_notification_id(&self, signal_id: &str, message_id: i64) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE signals SET telegram_message_id = ?1 WHERE id = ?2",
            params![message_id, signal_id],
        )
        .context("failed to record notification id")?;
        Ok(())
    }

    /// Load every OPEN signal; the fast tracker rebuilds its map from this.
    pub fn load_open_signals(&self) -> Result<Vec<SignalRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT id, symbol, direction, priority, entry_price, stop_loss,
                        current_stop, take_profit_1, take_profit_2, quality_score,
                        imbalance, large_trades, volume_intensity, confidence,
                        risk_reward, status, partial_close_status, breakeven_moved,
                        tp1_fill_price, tp1_fill_time, tp1_pnl,
                        tp2_fill_price, tp2_fill_time, tp2_pnl,
                        sl_reasoning, tp1_reasoning, tp2_reasoning,
                        support_level, resistance_level, created_at, updated_at,
                        telegram_message_id
                 FROM signals WHERE status = 'OPEN' ORDER BY created_at",
            )
            .context("failed to prepare open-signal query")?;

        let rows = stmt
            .query_map([], Self::row_to_signal)
            .context("failed to query open signals")?;

        let mut out = Vec::new();
        for row in rows {
            match row {
                Ok(record) => out.push(record),
                Err(e) => warn!(error = %e, "skipping unreadable signal row"),
            }
        }
        Ok(out)
    }

    fn row_to_signal(row: &rusqlite::Row<'_>) -> rusqlite::Result<SignalRecord> {
        let direction: String = row.get(2)?;
        let priority: String = row.get(3)?;
        let status: String = row.get(15)?;
        let partial: String = row.get(16)?;

        Ok(SignalRecord {
            id: row.get(0)?,
            symbol: row.get(1)?,
            direction: Direction::parse(&direction).unwrap_or(Direction::Long),
            priority: Priority::parse(&priority).unwrap_or(Priority::Low),
            entry_price: row.get(4)?,
            stop_loss: row.get(5)?,
            current_stop: row.get(6)?,
            take_profit_1: row.get(7)?,
            take_profit_2: row.get(8)?,
            quality_score: row.get(9)?,
            imbalance: row.get(10)?,
            large_trades: row.get(11)?,
            volume_intensity: row.get(12)?,
            confidence: row.get(13)?,
            risk_reward: row.get(14)?,
            status: if status == "CLOSED" {
                SignalStatus::Closed
            } else {
                SignalStatus::Open
            },
            partial_close_status: PartialCloseStatus::parse(&partial)
                .unwrap_or(PartialCloseStatus::None),
            breakeven_moved: row.get::<_, i64>(17)? != 0,
            tp1_fill_price: row.get(18)?,
            tp1_fill_time: row.get(19)?,
            tp1_pnl: row.get(20)?,
            tp2_fill_price: row.get(21)?,
            tp2_fill_time: row.get(22)?,
            tp2_pnl: row.get(23)?,
            sl_reasoning: row.get(24)?,
            tp1_reasoning: row.get(25)?,
            tp2_reasoning: row.get(26)?,
            support_level: row.get(27)?,
            resistance_level: row.get(28)?,
            created_at: row.get(29)?,
            updated_at: row.get(30)?,
            telegram_message_id: row.get(31)?,
        })
    }

    /// Apply a batch of closures in one transaction.
    ///
    /// Each op is guarded: partial fills require `partial_close_status =
    /// 'NONE'`, full closes require `status = 'OPEN'`. Ops whose guard
    /// matches no row report [`ClosureOutcome::AlreadyClosed`] and are
    /// skipped with a warning — the race loser backs off.
    pub fn apply_closures(&self, ops: &[ClosureOp]) -> Result<Vec<ClosureOutcome>> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction().context("failed to begin closure tx")?;

        let mut outcomes = Vec::with_capacity(ops.len());

        for op in ops {
            let outcome = match op {
                ClosureOp::Tp1Partial {
                    signal_id,
                    fill_price,
                    fill_time_ms,
                    tp1_pnl,
                    new_stop,
                } => {
                    let affected = tx.execute(
                        "UPDATE signals SET
                            partial_close_status = 'TP1_CLOSED',
                            breakeven_moved = 1,
                            current_stop = ?1,
                            tp1_fill_price = ?2,
                            tp1_fill_time = ?3,
                            tp1_pnl = ?4,
                            updated_at = ?3
                         WHERE id = ?5 AND status = 'OPEN'
                           AND partial_close_status = 'NONE'",
                        params![new_stop, fill_price, fill_time_ms, tp1_pnl, signal_id],
                    )?;
                    if affected == 0 {
                        warn!(signal_id = %signal_id, "TP1 partial skipped — signal not open/unfilled");
                        ClosureOutcome::AlreadyClosed
                    } else {
                        ClosureOutcome::Applied
                    }
                }

                ClosureOp::Close {
                    signal_id,
                    exit_reason,
                    exit_price,
                    exit_time_ms,
                    pnl_percent,
                    final_partial,
                    tp2_fill,
                } => {
                    let (tp2_price, tp2_time, tp2_pnl) = match tp2_fill {
                        Some((p, t, pnl)) => (Some(*p), Some(*t), Some(*pnl)),
                        None => (None, None, None),
                    };

                    let affected = tx.execute(
                        "UPDATE signals SET
                            status = 'CLOSED',
                            partial_close_status = ?1,
                            exit_reason = ?2,
                            tp2_fill_price = COALESCE(?3, tp2_fill_price),
                            tp2_fill_time = COALESCE(?4, tp2_fill_time),
                            tp2_pnl = COALESCE(?5, tp2_pnl),
                            hold_time_minutes = (?6 - created_at) / 60000,
                            updated_at = ?6
                         WHERE id = ?7 AND status = 'OPEN'",
                        params![
                            final_partial.as_str(),
                            exit_reason.as_str(),
                            tp2_price,
                            tp2_time,
                            tp2_pnl,
                            exit_time_ms,
                            signal_id
                        ],
                    )?;

                    if affected == 0 {
                        warn!(signal_id = %signal_id, "closure skipped — signal already closed");
                        ClosureOutcome::AlreadyClosed
                    } else {
                        // Copy the final values into the immutable trade row.
                        tx.execute(
                            "INSERT INTO trades (
                                id, signal_id, symbol, direction, entry_price,
                                exit_price, stop_loss, take_profit_1,
                                take_profit_2, exit_reason, pnl_percent,
                                hold_time_minutes, partial_close_status,
                                breakeven_moved, tp1_pnl, status, entry_time,
                                exit_time
                             )
                             SELECT ?1, id, symbol, direction, entry_price,
                                    ?2, stop_loss, take_profit_1,
                                    take_profit_2, ?3, ?4,
                                    (?5 - created_at) / 60000,
                                    partial_close_status, breakeven_moved,
                                    tp1_pnl, 'CLOSED', created_at, ?5
                             FROM signals WHERE id = ?6",
                            params![
                                uuid::Uuid::new_v4().to_string(),
                                exit_price,
                                exit_reason.as_str(),
                                pnl_percent,
                                exit_time_ms,
                                signal_id
                            ],
                        )?;
                        ClosureOutcome::Applied
                    }
                }
            };
            outcomes.push(outcome);
        }

        tx.commit().context("failed to commit closure batch")?;
        Ok(outcomes)
    }

    // -------------------------------------------------------------------------
    // Klines
    // -------------------------------------------------------------------------

    /// Persist one closed candle. Returns whether a new row was written
    /// (false when the (symbol, interval, open_time) key already existed).
    pub fn insert_kline(&self, symbol: &str, interval: &str, candle: &Candle) -> Result<bool> {
        let conn = self.conn.lock();
        let affected = conn
            .execute(
                "INSERT OR IGNORE INTO klines
                    (symbol, interval, open_time, open, high, low, close, volume)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    symbol,
                    interval,
                    candle.open_time,
                    candle.open,
                    candle.high,
                    candle.low,
                    candle.close,
                    candle.volume
                ],
            )
            .context("failed to insert kline")?;
        Ok(affected > 0)
    }

    /// Closed candles with `open_time >= since_ms`, oldest first. Feeds the
    /// 6-hour historical volume profile.
    pub fn klines_since(
        &self,
        symbol: &str,
        interval: &str,
        since_ms: i64,
    ) -> Result<Vec<Candle>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT open_time, open, high, low, close, volume
                 FROM klines
                 WHERE symbol = ?1 AND interval = ?2 AND open_time >= ?3
                 ORDER BY open_time",
            )
            .context("failed to prepare kline query")?;

        let rows = stmt
            .query_map(params![symbol, interval, since_ms], |row| {
                let open_time: i64 = row.get(0)?;
                Ok(Candle {
                    open_time,
                    close_time: open_time + 59_999,
                    open: row.get(1)?,
                    high: row.get(2)?,
                    low: row.get(3)?,
                    close: row.get(4)?,
                    volume: row.get(5)?,
                    is_closed: true,
                })
            })
            .context("failed to query klines")?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row.context("failed to read kline row")?);
        }
        Ok(out)
    }

    /// Delete candles older than `cutoff_ms` (periodic housekeeping).
    pub fn prune_klines(&self, cutoff_ms: i64) -> Result<usize> {
        let conn = self.conn.lock();
        let deleted = conn
            .execute("DELETE FROM klines WHERE open_time < ?1", params![cutoff_ms])
            .context("failed to prune klines")?;
        if deleted > 0 {
            debug!(deleted, "old klines pruned");
        }
        Ok(deleted)
    }

    // -------------------------------------------------------------------------
    // Metrics aggregation (hourly cadence)
    // -------------------------------------------------------------------------

    /// Aggregate the last 24 h of trades into a `performance_metrics` row and
    /// upsert today's `daily_stats`.
    pub fn write_performance_metrics(&self, now_ms: i64) -> Result<()> {
        let day_ms: i64 = 24 * 3600 * 1000;
        let since = now_ms - day_ms;
        let day_start = now_ms - now_ms.rem_euclid(day_ms);

        let conn = self.conn.lock();

        let (wins, losses, total_pnl, max_profit, max_loss, avg_hold): (
            i64,
            i64,
            f64,
            f64,
            f64,
            f64,
        ) = conn.query_row(
            "SELECT
                COALESCE(SUM(CASE WHEN pnl_percent > 0 THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN pnl_percent <= 0 THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(pnl_percent), 0),
                COALESCE(MAX(pnl_percent), 0),
                COALESCE(MIN(pnl_percent), 0),
                COALESCE(AVG(hold_time_minutes), 0)
             FROM trades WHERE exit_time >= ?1",
            params![since],
            |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                ))
            },
        )?;

        let (tp1_hits, tp2_hits, sl_hits): (i64, i64, i64) = conn.query_row(
            "SELECT
                COALESCE(SUM(CASE WHEN partial_close_status != 'NONE' THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN exit_reason = 'TAKE_PROFIT_2' THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN exit_reason LIKE 'STOP_LOSS%' THEN 1 ELSE 0 END), 0)
             FROM trades WHERE exit_time >= ?1",
            params![since],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;

        let signals_generated: i64 = conn.query_row(
            "SELECT COUNT(*) FROM signals WHERE created_at >= ?1",
            params![since],
            |row| row.get(0),
        )?;

        let closed = wins + losses;
        let win_rate = if closed > 0 {
            wins as f64 / closed as f64
        } else {
            0.0
        };
        let average_pnl = if closed > 0 {
            total_pnl / closed as f64
        } else {
            0.0
        };

        conn.execute(
            "INSERT INTO performance_metrics (
                id, date, signals_generated, win_count, loss_count, win_rate,
                total_pnl_percent, average_pnl, max_profit, max_loss,
                average_hold_time, tp1_hit_count, tp2_hit_count, sl_hit_count,
                created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13,
                      ?14, ?15)",
            params![
                uuid::Uuid::new_v4().to_string(),
                day_start,
                signals_generated,
                wins,
                losses,
                win_rate,
                total_pnl,
                average_pnl,
                max_profit,
                max_loss,
                avg_hold,
                tp1_hits,
                tp2_hits,
                sl_hits,
                now_ms
            ],
        )?;

        let (high, medium, low): (i64, i64, i64) = conn.query_row(
            "SELECT
                COALESCE(SUM(CASE WHEN priority = 'HIGH' THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN priority = 'MEDIUM' THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN priority = 'LOW' THEN 1 ELSE 0 END), 0)
             FROM signals WHERE created_at >= ?1",
            params![day_start],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;

        conn.execute(
            "INSERT INTO daily_stats (
                date, total_signals, high_priority_signals,
                medium_priority_signals, low_priority_signals, win_rate,
                total_pnl_percent, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT(date) DO UPDATE SET
                total_signals = excluded.total_signals,
                high_priority_signals = excluded.high_priority_signals,
                medium_priority_signals = excluded.medium_priority_signals,
                low_priority_signals = excluded.low_priority_signals,
                win_rate = excluded.win_rate,
                total_pnl_percent = excluded.total_pnl_percent,
                updated_at = excluded.updated_at",
            params![
                day_start,
                high + medium + low,
                high,
                medium,
                low,
                win_rate,
                total_pnl,
                now_ms
            ],
        )?;

        debug!(closed, win_rate, "performance metrics written");
        Ok(())
    }

    /// Whether the symbol already has an OPEN signal (one live signal per
    /// instrument at a time).
    pub fn has_open_signal(&self, symbol: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM signals WHERE symbol = ?1 AND status = 'OPEN'",
                params![symbol],
                |row| row.get(0),
            )
            .context("failed to check for open signal")?;
        Ok(count > 0)
    }

    /// Count of OPEN signals (status surface).
    pub fn open_signal_count(&self) -> Result<i64> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT COUNT(*) FROM signals WHERE status = 'OPEN'",
            [],
            |row| row.get(0),
        )
        .context("failed to count open signals")
    }

    /// Recent closed trades, newest first (status surface).
    pub fn recent_trades(&self, limit: usize) -> Result<Vec<TradeRow>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, signal_id, symbol, direction, entry_price, exit_price,
                    exit_reason, pnl_percent, hold_time_minutes, entry_time,
                    exit_time
             FROM trades ORDER BY exit_time DESC LIMIT ?1",
        )?;

        let rows = stmt.query_map(params![limit as i64], |row| {
            let direction: String = row.get(3)?;
            Ok(TradeRow {
                id: row.get(0)?,
                signal_id: row.get(1)?,
                symbol: row.get(2)?,
                direction: Direction::parse(&direction).unwrap_or(Direction::Long),
                entry_price: row.get(4)?,
                exit_price: row.get(5)?,
                exit_reason: row.get(6)?,
                pnl_percent: row.get(7)?,
                hold_time_minutes: row.get(8)?,
                entry_time: row.get(9)?,
                exit_time: row.get(10)?,
            })
        })?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row.context("failed to read trade row")?);
        }
        Ok(out)
    }
}
