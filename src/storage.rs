pub mod sqlite;

use chrono::{DateTime, Utc};
use error_stack::Report;
use futures::future::BoxFuture;

use crate::error::StorageError;
use crate::model::{CloseReason, MarketSnapshotRecord, Signal, SignalRecord, TradeRecord};

/// Relational audit store for signals, trades and market snapshots.
///
/// Uses `BoxFuture` instead of `async fn` in trait to keep the trait
/// object-safe (`dyn Storage`).
pub trait Storage: Send + Sync {
    /// Persist a signal together with its market snapshot in one
    /// transaction and return the assigned signal id.
    fn insert_signal(&self, signal: &Signal) -> BoxFuture<'_, Result<i64, Report<StorageError>>>;

    /// Record the close of the virtual position belonging to a signal.
    fn insert_trade(
        &self,
        signal_id: i64,
        close_reason: CloseReason,
        close_price: f64,
        pnl_percent: f64,
        closed_at: DateTime<Utc>,
    ) -> BoxFuture<'_, Result<(), Report<StorageError>>>;

    fn list_recent_signals(
        &self,
        limit: usize,
    ) -> BoxFuture<'_, Result<Vec<SignalRecord>, Report<StorageError>>>;

    fn get_signal(
        &self,
        signal_id: i64,
    ) -> BoxFuture<'_, Result<Option<SignalRecord>, Report<StorageError>>>;

    fn get_trade(
        &self,
        signal_id: i64,
    ) -> BoxFuture<'_, Result<Option<TradeRecord>, Report<StorageError>>>;

    fn get_snapshot(
        &self,
        signal_id: i64,
    ) -> BoxFuture<'_, Result<Option<MarketSnapshotRecord>, Report<StorageError>>>;

    /// Close the underlying pool. Called once during shutdown.
    fn close(&self) -> BoxFuture<'_, ()>;
}
