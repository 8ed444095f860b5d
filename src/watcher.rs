use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::model::{CloseReason, Side, Signal, VirtualPosition, round_dp};
use crate::notifier::Notifier;
use crate::storage::Storage;
use crate::store::MemoryStore;

/// Paper-trading watcher: holds one virtual position per symbol and
/// closes each on take-profit, stop-loss or timeout, judged against the
/// live mark-price cache.
///
/// No real orders are ever placed. The position map is guarded by a
/// short mutex, which serializes `track` against the check loop; the
/// lock is never held across an await point.
pub struct PositionWatcher {
    store: Arc<MemoryStore>,
    storage: Arc<dyn Storage>,
    notifier: Arc<dyn Notifier>,
    positions: Mutex<HashMap<String, VirtualPosition>>,
    check_interval: Duration,
    time_stop: TimeDelta,
}

impl PositionWatcher {
    pub fn new(
        store: Arc<MemoryStore>,
        storage: Arc<dyn Storage>,
        notifier: Arc<dyn Notifier>,
        trade_control_seconds: u64,
        time_stop_hours: u64,
    ) -> Self {
        Self {
            store,
            storage,
            notifier,
            positions: Mutex::new(HashMap::new()),
            check_interval: Duration::from_secs(trade_control_seconds),
            time_stop: TimeDelta::hours(time_stop_hours as i64),
        }
    }

    /// Open a virtual position for a dispatched signal. Returns `false`
    /// without replacing anything when the symbol is already tracked —
    /// the scan loop filters tracked symbols, so a duplicate here is a
    /// race worth surfacing to the caller.
    pub fn track(&self, signal: &Signal, signal_id: i64) -> bool {
        let mut positions = self.positions.lock();
        if positions.contains_key(&signal.symbol) {
            return false;
        }
        positions.insert(
            signal.symbol.clone(),
            VirtualPosition {
                signal_id,
                symbol: signal.symbol.clone(),
                side: signal.side,
                entry_price: signal.entry_price,
                tp_price: signal.tp_price,
                sl_price: signal.sl_price,
                opened_at: Utc::now(),
            },
        );
        info!(
            symbol = %signal.symbol,
            side = %signal.side,
            entry = signal.entry_price,
            "virtual position opened"
        );
        true
    }

    /// Symbols with a live virtual position.
    pub fn tracked_symbols(&self) -> HashSet<String> {
        self.positions.lock().keys().cloned().collect()
    }

    /// Check loop; runs until cancelled.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(
            interval_secs = self.check_interval.as_secs(),
            "position watcher started"
        );
        loop {
            self.check_positions(Utc::now()).await;
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = sleep(self.check_interval) => {}
            }
        }
        info!(
            open_positions = self.positions.lock().len(),
            "position watcher stopped"
        );
    }

    /// One tick of the exit check. Positions without a known price are
    /// skipped until the next tick. Taking `now` as a parameter keeps
    /// the timeout path testable.
    pub(crate) async fn check_positions(&self, now: DateTime<Utc>) {
        let mut exits: Vec<(VirtualPosition, f64, CloseReason)> = Vec::new();
        {
            let mut positions = self.positions.lock();
            positions.retain(|symbol, position| {
                let Some(price) = self.store.get_price(symbol) else {
                    return true;
                };
                match classify_exit(position, price, now, self.time_stop) {
                    Some(reason) => {
                        exits.push((position.clone(), price, reason));
                        false
                    }
                    None => true,
                }
            });
        }

        for (position, price, reason) in exits {
            self.close_position(position, price, reason).await;
        }
    }

    async fn close_position(&self, position: VirtualPosition, close_price: f64, reason: CloseReason) {
        let pnl_percent = round_dp(pnl_percent(&position, close_price), 4);

        if let Err(e) = self
            .storage
            .insert_trade(position.signal_id, reason, close_price, pnl_percent, Utc::now())
            .await
        {
            error!(error = ?e, symbol = %position.symbol, "trade record save failed");
        }

        let message = format_close_message(&position, close_price, pnl_percent, reason);
        if let Err(e) = self.notifier.send(&message).await {
            error!(error = ?e, symbol = %position.symbol, "close notification failed");
        }

        info!(
            symbol = %position.symbol,
            reason = %reason,
            pnl_percent,
            "virtual position closed"
        );
    }
}

/// Exit classification; first match wins: TP, then SL, then timeout.
fn classify_exit(
    position: &VirtualPosition,
    price: f64,
    now: DateTime<Utc>,
    time_stop: TimeDelta,
) -> Option<CloseReason> {
    match position.side {
        Side::Long if price >= position.tp_price => Some(CloseReason::Tp),
        Side::Short if price <= position.tp_price => Some(CloseReason::Tp),
        Side::Long if price <= position.sl_price => Some(CloseReason::Sl),
        Side::Short if price >= position.sl_price => Some(CloseReason::Sl),
        _ if now - position.opened_at >= time_stop => Some(CloseReason::Timeout),
        _ => None,
    }
}

fn pnl_percent(position: &VirtualPosition, close_price: f64) -> f64 {
    match position.side {
        Side::Long => (close_price - position.entry_price) / position.entry_price * 100.0,
        Side::Short => (position.entry_price - close_price) / position.entry_price * 100.0,
    }
}

fn format_close_message(
    position: &VirtualPosition,
    close_price: f64,
    pnl_percent: f64,
    reason: CloseReason,
) -> String {
    let icon = match reason {
        CloseReason::Tp => "✅ TP",
        CloseReason::Sl => "❌ SL",
        CloseReason::Timeout => "⏱ TIMEOUT",
    };
    let pnl_icon = if pnl_percent >= 0.0 { "🟢" } else { "🔴" };
    format!(
        "{icon} | <b>{}</b> closed\n📍 Entry: {} → Exit: {close_price}\n{pnl_icon} PnL: {pnl_percent:+.2}%",
        position.symbol, position.entry_price
    )
}
