// =============================================================================
// Signal Emitter — persist the accepted signal, notify fire-and-forget
// =============================================================================

use std::sync::Arc;

use anyhow::Result;
use tracing::{error, info, warn};

use crate::notifier::TelegramNotifier;
use crate::store::{SignalRecord, SignalStore};

pub struct SignalEmitter {
    store: Arc<SignalStore>,
    notifier: Arc<TelegramNotifier>,
}

impl SignalEmitter {
    pub fn new(store: Arc<SignalStore>, notifier: Arc<TelegramNotifier>) -> Self {
        Self { store, notifier }
    }

    /// Persist the signal with status OPEN and dispatch the notification.
    ///
    /// The notification is fire-and-forget: a delivery failure is logged and
    /// never rolls the signal back. When delivery succeeds, the returned
    /// message id is written back onto the row for reply-threading.
    pub fn emit(&self, record: SignalRecord) -> Result<()> {
        self.store.insert_signal(&record)?;

        info!(
            signal_id = %record.id,
            symbol = %record.symbol,
            direction = %record.direction,
            priority = %record.priority,
            entry = record.entry_price,
            stop = record.stop_loss,
            tp1 = record.take_profit_1,
            tp2 = record.take_profit_2,
            quality = record.quality_score,
            "signal emitted"
        );

        if !self.notifier.is_enabled() {
            return Ok(());
        }

        let store = self.store.clone();
        let notifier = self.notifier.clone();
        tokio::spawn(async move {
            match notifier.send_signal_created(&record).await {
                Ok(message_id) => {
                    if let Err(e) = store.set_notification_id(&record.id, message_id) {
                        error!(signal_id = %record.id, error = %e, "failed to store message id");
                    }
                }
                Err(e) => {
                    warn!(signal_id = %record.id, error = %e, "signal notification failed");
                }
            }
        });

        Ok(())
    }
}
