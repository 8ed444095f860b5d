use std::sync::Arc;

use error_stack::Report;
use tracing::{info, warn};

use crate::error::StorageError;
use crate::model::Signal;
use crate::notifier::Notifier;
use crate::storage::Storage;
use crate::watcher::PositionWatcher;

/// Routes a matched signal to its three consumers, in a fixed order:
///
///   1. the audit store — signal row plus market snapshot in one
///      transaction; a failure here aborts the dispatch so no position
///      can exist without its audit record,
///   2. the notifier — best-effort, a failure is logged and ignored,
///   3. the watcher — enrollment for virtual TP/SL tracking.
pub struct SignalDispatcher {
    storage: Arc<dyn Storage>,
    notifier: Arc<dyn Notifier>,
    watcher: Arc<PositionWatcher>,
}

impl SignalDispatcher {
    pub fn new(
        storage: Arc<dyn Storage>,
        notifier: Arc<dyn Notifier>,
        watcher: Arc<PositionWatcher>,
    ) -> Self {
        Self {
            storage,
            notifier,
            watcher,
        }
    }

    pub async fn dispatch(&self, signal: &Signal) -> Result<i64, Report<StorageError>> {
        let signal_id = self.storage.insert_signal(signal).await?;

        if let Err(e) = self.notifier.send(&format_signal_message(signal)).await {
            warn!(error = ?e, symbol = %signal.symbol, "signal notification failed");
        }

        if !self.watcher.track(signal, signal_id) {
            warn!(symbol = %signal.symbol, "symbol already tracked, signal not enrolled");
        }

        info!(
            symbol = %signal.symbol,
            side = %signal.side,
            signal_id,
            "signal dispatched"
        );
        Ok(signal_id)
    }

    /// General-purpose announcement (startup, shutdown). Best-effort.
    pub async fn send_notification(&self, text: &str) {
        if let Err(e) = self.notifier.send(text).await {
            warn!(error = ?e, "notification failed");
        }
    }
}

fn format_signal_message(signal: &Signal) -> String {
    format!(
        "🔔 <b>#{} {}</b>\n📈 Entry: {}\n🎯 TP: {}\n🛡 SL: {}\n📊 Volume spike: {}x\n⏱ {} UTC",
        signal.symbol,
        signal.side,
        signal.entry_price,
        signal.tp_price,
        signal.sl_price,
        signal.spike_ratio,
        signal.timestamp.format("%H:%M:%S"),
    )
}
