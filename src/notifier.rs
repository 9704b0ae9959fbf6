// =============================================================================
// Telegram Notifier — signal creation and closure updates
// =============================================================================
//
// Thin wrapper over the Bot API `sendMessage` endpoint. Creation messages
// return the Telegram message id, which is stored on the signal so closure
// updates can be threaded as replies to the original message.
//
// Dispatch is fire-and-forget from the callers' perspective: failures are
// logged and never retried, and closure persistence never blocks on this.
// =============================================================================

use anyhow::{bail, Context, Result};
use serde_json::json;
use tracing::{info, warn};

use crate::store::SignalRecord;
use crate::types::{Direction, ExitReason, Priority};

/// Outbound request timeout.
const NOTIFIER_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);

/// What a closure update needs to say.
#[derive(Debug, Clone)]
pub struct ClosureNotice {
    pub signal_id: String,
    pub symbol: String,
    pub direction: Direction,
    pub exit_reason: ExitReason,
    pub entry_price: f64,
    pub exit_price: f64,
    pub pnl_percent: f64,
    pub hold_minutes: i64,
}

pub struct TelegramNotifier {
    token: String,
    chat_id: String,
    client: reqwest::Client,
    enabled: bool,
}

impl TelegramNotifier {
    pub fn new(token: String, chat_id: String) -> Self {
        let enabled = !token.is_empty() && !chat_id.is_empty();
        if !enabled {
            warn!("telegram credentials missing — notifications disabled");
        }

        let client = reqwest::Client::builder()
            .timeout(NOTIFIER_TIMEOUT)
            .build()
            .expect("failed to build notifier HTTP client");

        Self {
            token,
            chat_id,
            client,
            enabled,
        }
    }

    /// Build from `TELEGRAM_BOT_TOKEN` / `TELEGRAM_CHAT_ID` env vars.
    pub fn from_env() -> Self {
        Self::new(
            std::env::var("TELEGRAM_BOT_TOKEN").unwrap_or_default(),
            std::env::var("TELEGRAM_CHAT_ID").unwrap_or_default(),
        )
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Send raw text, optionally as a reply. Returns the message id.
    pub async fn send_message(&self, text: &str, reply_to: Option<i64>) -> Result<i64> {
        if !self.enabled {
            bail!("notifier disabled");
        }

        let url = format!("https://api.telegram.org/bot{}/sendMessage", self.token);
        let mut body = json!({
            "chat_id": self.chat_id,
            "text": text,
            "parse_mode": "Markdown",
        });
        if let Some(id) = reply_to {
            body["reply_to_message_id"] = json!(id);
        }

        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .context("telegram sendMessage request failed")?;

        let status = resp.status();
        let payload: serde_json::Value = resp
            .json()
            .await
            .context("failed to parse telegram response")?;

        if !status.is_success() || payload["ok"].as_bool() != Some(true) {
            bail!("telegram sendMessage returned {status}: {payload}");
        }

        payload["result"]["message_id"]
            .as_i64()
            .context("telegram response missing message_id")
    }

    /// Announce a freshly emitted signal. Returns the message id for
    /// reply-threading.
    pub async fn send_signal_created(&self, signal: &SignalRecord) -> Result<i64> {
        let message_id = self
            .send_message(&format_signal_message(signal), None)
            .await?;
        info!(
            signal_id = %signal.id,
            symbol = %signal.symbol,
            message_id,
            "signal notification sent"
        );
        Ok(message_id)
    }

    /// Announce a partial or full closure, threaded to the original message
    /// when its id is known.
    pub async fn send_closure_update(
        &self,
        notice: &ClosureNotice,
        reply_to: Option<i64>,
    ) -> Result<i64> {
        self.send_message(&format_closure_message(notice), reply_to)
            .await
    }

    /// One-line status message (startup / shutdown / universe updates).
    pub async fn send_status(&self, text: &str) -> Result<i64> {
        self.send_message(text, None).await
    }
}

// ---------------------------------------------------------------------------
// Message formatting
// ---------------------------------------------------------------------------

fn direction_emoji(direction: Direction) -> &'static str {
    match direction {
        Direction::Long => "🟢",
        Direction::Short => "🔴",
    }
}

fn priority_emoji(priority: Priority) -> &'static str {
    match priority {
        Priority::High => "🔥",
        Priority::Medium => "⚡",
        Priority::Low => "💡",
    }
}

/// Creation message listing every actionable parameter of the signal.
pub fn format_signal_message(signal: &SignalRecord) -> String {
    format!(
        "{dir_emoji} {prio_emoji} *{priority} PRIORITY {direction} SIGNAL*\n\n\
         📊 *Symbol:* {symbol}\n\
         💰 *Entry:* ${entry:.4}\n\
         🛑 *Stop Loss:* ${stop:.4} ({sl_reason})\n\
         🎯 *TP1:* ${tp1:.4}\n\
         🎯 *TP2:* ${tp2:.4}\n\n\
         📈 *Quality Score:* {quality:.1}/100\n\
         ⚖️ *Imbalance:* {imbalance:.3}\n\
         🔢 *Large Trades:* {large_trades}\n\
         📊 *Volume Intensity:* {volume_intensity:.2}x\n\
         📊 *R:R Ratio:* {rr:.2}\n\n\
         🆔 `{id}`",
        dir_emoji = direction_emoji(signal.direction),
        prio_emoji = priority_emoji(signal.priority),
        priority = signal.priority,
        direction = signal.direction,
        symbol = signal.symbol,
        entry = signal.entry_price,
        stop = signal.stop_loss,
        sl_reason = signal.sl_reasoning,
        tp1 = signal.take_profit_1,
        tp2 = signal.take_profit_2,
        quality = signal.quality_score,
        imbalance = signal.imbalance,
        large_trades = signal.large_trades,
        volume_intensity = signal.volume_intensity,
        rr = signal.risk_reward,
        id = signal.id,
    )
}

/// Closure update message; partial TP1 fills get their own shape since the
/// position stays half open with the stop at break-even.
pub fn format_closure_message(notice: &ClosureNotice) -> String {
    match notice.exit_reason {
        ExitReason::TakeProfit1Partial => format!(
            "🎯 *TP1 HIT — PARTIAL CLOSE*\n\n\
             📊 *Symbol:* {symbol}\n\
             📍 *Entry:* ${entry:.4}\n\
             📍 *Fill:* ${exit:.4}\n\
             💰 *Closed 50%:* {pnl:+.2}%\n\
             🛡️ *SL → Breakeven* (entry price)\n\
             ⏱️ *Hold:* {hold} min\n\n\
             🚀 Remaining 50% runs for TP2\n\n\
             🆔 `{id}`",
            symbol = notice.symbol,
            entry = notice.entry_price,
            exit = notice.exit_price,
            pnl = notice.pnl_percent,
            hold = notice.hold_minutes,
            id = notice.signal_id,
        ),
        reason => {
            let emoji = match reason {
                ExitReason::TakeProfit2 => "🏆",
                ExitReason::StopLossBreakeven => "🛡️",
                ExitReason::ImbalanceReversed => "🚨",
                _ => "🛑",
            };
            format!(
                "{emoji} *CLOSED — {reason}*\n\n\
                 📊 *Symbol:* {symbol} {direction}\n\
                 📍 *Entry:* ${entry:.4}\n\
                 📍 *Exit:* ${exit:.4}\n\
                 💰 *PnL:* {pnl:+.2}%\n\
                 ⏱️ *Hold:* {hold} min\n\n\
                 🆔 `{id}`",
                symbol = notice.symbol,
                direction = notice.direction,
                entry = notice.entry_price,
                exit = notice.exit_price,
                pnl = notice.pnl_percent,
                hold = notice.hold_minutes,
                id = notice.signal_id,
            )
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PartialCloseStatus, SignalStatus};

    fn sample_signal() -> SignalRecord {
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
            risk_reward: 1.19,
            status: SignalStatus::Open,
            partial_close_status: PartialCloseStatus::None,
            breakeven_moved: false,
            tp1_fill_price: None,
            tp1_fill_time: None,
            tp1_pnl: None,
            tp2_fill_price: None,
            tp2_fill_time: None,
            tp2_pnl: None,
            sl_reasoning: "below support cluster at 99.5000".to_string(),
            tp1_reasoning: String::new(),
            tp2_reasoning: String::new(),
            support_level: 99.5,
            resistance_level: 101.0,
            created_at: 0,
            updated_at: 0,
            telegram_message_id: None,
        }
    }

    #[test]
    fn signal_message_contains_parameters() {
        let text = format_signal_message(&sample_signal());
        assert!(text.contains("HIGH PRIORITY LONG SIGNAL"));
        assert!(text.contains("BTCUSDT"));
        assert!(text.contains("$100.0000"));
        assert!(text.contains("$99.2000"));
        assert!(text.contains("$100.9500"));
        assert!(text.contains("$101.9000"));
        assert!(text.contains("85.0/100"));
        assert!(text.contains("sig-1"));
    }

    #[test]
    fn partial_close_message_shape() {
        let notice = ClosureNotice {
            signal_id: "sig-1".to_string(),
            symbol: "BTCUSDT".to_string(),
            direction: Direction::Long,
            exit_reason: ExitReason::TakeProfit1Partial,
            entry_price: 100.0,
            exit_price: 100.95,
            pnl_percent: 0.475,
            hold_minutes: 12,
        };
        let text = format_closure_message(&notice);
        assert!(text.contains("PARTIAL CLOSE"));
        assert!(text.contains("+0.47%") || text.contains("+0.48%"));
        assert!(text.contains("Breakeven"));
    }

    #[test]
    fn full_close_message_shape() {
        let notice = ClosureNotice {
            signal_id: "sig-1".to_string(),
            symbol: "BTCUSDT".to_string(),
            direction: Direction::Long,
            exit_reason: ExitReason::StopLoss,
            entry_price: 100.0,
            exit_price: 99.19,
            pnl_percent: -0.81,
            hold_minutes: 3,
        };
        let text = format_closure_message(&notice);
        assert!(text.contains("CLOSED — STOP_LOSS"));
        assert!(text.contains("-0.81%"));
    }

    #[test]
    fn disabled_without_credentials() {
        let notifier = TelegramNotifier::new(String::new(), String::new());
        assert!(!notifier.is_enabled());
    }
}
