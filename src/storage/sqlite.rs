use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use error_stack::{Report, ResultExt};
use futures::future::BoxFuture;
use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqliteJournalMode},
};

use crate::error::StorageError;
use crate::model::{CloseReason, MarketSnapshotRecord, Side, Signal, SignalRecord, TradeRecord};
use crate::storage::Storage;

type SignalRow = (i64, String, String, f64, f64, f64, f64, String);
type TradeRow = (i64, i64, String, f64, f64, String);
type SnapshotRow = (i64, i64, f64, f64, f64, f64, Option<String>);

pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Open (or create) a SQLite database at `path` and run migrations.
    pub async fn open(path: &Path) -> Result<Self, Report<StorageError>> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .change_context(StorageError::Migration)
                .attach_with(|| format!("cannot create data directory: {}", parent.display()))?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))
            .change_context(StorageError::Migration)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePool::connect_with(opts)
            .await
            .change_context(StorageError::Migration)
            .attach_with(|| format!("database path: {}", path.display()))?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .change_context(StorageError::Migration)?;

        Ok(Self { pool })
    }
}

impl Storage for SqliteStorage {
    fn insert_signal(&self, signal: &Signal) -> BoxFuture<'_, Result<i64, Report<StorageError>>> {
        let signal = signal.clone();
        Box::pin(async move {
            let mut tx = self
                .pool
                .begin()
                .await
                .change_context(StorageError::Insert)?;

            let result = sqlx::query(
                "INSERT INTO signals \
                 (symbol, side, entry_price, tp_price, sl_price, spike_ratio, created_at) \
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&signal.symbol)
            .bind(signal.side.as_str())
            .bind(signal.entry_price)
            .bind(signal.tp_price)
            .bind(signal.sl_price)
            .bind(signal.spike_ratio)
            .bind(signal.timestamp.to_rfc3339())
            .execute(&mut *tx)
            .await
            .change_context(StorageError::Insert)?;

            let signal_id = result.last_insert_rowid();

            sqlx::query(
                "INSERT INTO market_snapshots \
                 (signal_id, ema_fast_value, ema_slow_value, current_volume, avg_volume, \
                  candle_data_json) \
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(signal_id)
            .bind(signal.ema_fast_value)
            .bind(signal.ema_slow_value)
            .bind(signal.current_volume)
            .bind(signal.avg_volume)
            .bind(None::<String>)
            .execute(&mut *tx)
            .await
            .change_context(StorageError::Insert)?;

            tx.commit().await.change_context(StorageError::Insert)?;
            Ok(signal_id)
        })
    }

    fn insert_trade(
        &self,
        signal_id: i64,
        close_reason: CloseReason,
        close_price: f64,
        pnl_percent: f64,
        closed_at: DateTime<Utc>,
    ) -> BoxFuture<'_, Result<(), Report<StorageError>>> {
        Box::pin(async move {
            sqlx::query(
                "INSERT INTO trades (signal_id, close_reason, close_price, pnl_percent, closed_at) \
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(signal_id)
            .bind(close_reason.as_str())
            .bind(close_price)
            .bind(pnl_percent)
            .bind(closed_at.to_rfc3339())
            .execute(&self.pool)
            .await
            .change_context(StorageError::Insert)?;
            Ok(())
        })
    }

    fn list_recent_signals(
        &self,
        limit: usize,
    ) -> BoxFuture<'_, Result<Vec<SignalRecord>, Report<StorageError>>> {
        Box::pin(async move {
            let rows: Vec<SignalRow> = sqlx::query_as(
                "SELECT id, symbol, side, entry_price, tp_price, sl_price, spike_ratio, created_at \
                 FROM signals ORDER BY id DESC LIMIT ?",
            )
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .change_context(StorageError::Query)?;

            Ok(rows.into_iter().map(map_signal_row).collect())
        })
    }

    fn get_signal(
        &self,
        signal_id: i64,
    ) -> BoxFuture<'_, Result<Option<SignalRecord>, Report<StorageError>>> {
        Box::pin(async move {
            let row: Option<SignalRow> = sqlx::query_as(
                "SELECT id, symbol, side, entry_price, tp_price, sl_price, spike_ratio, created_at \
                 FROM signals WHERE id = ? LIMIT 1",
            )
            .bind(signal_id)
            .fetch_optional(&self.pool)
            .await
            .change_context(StorageError::Query)?;

            Ok(row.map(map_signal_row))
        })
    }

    fn get_trade(
        &self,
        signal_id: i64,
    ) -> BoxFuture<'_, Result<Option<TradeRecord>, Report<StorageError>>> {
        Box::pin(async move {
            let row: Option<TradeRow> = sqlx::query_as(
                "SELECT id, signal_id, close_reason, close_price, pnl_percent, closed_at \
                 FROM trades WHERE signal_id = ? LIMIT 1",
            )
            .bind(signal_id)
            .fetch_optional(&self.pool)
            .await
            .change_context(StorageError::Query)?;

            Ok(row.map(map_trade_row))
        })
    }

    fn get_snapshot(
        &self,
        signal_id: i64,
    ) -> BoxFuture<'_, Result<Option<MarketSnapshotRecord>, Report<StorageError>>> {
        Box::pin(async move {
            let row: Option<SnapshotRow> = sqlx::query_as(
                "SELECT id, signal_id, ema_fast_value, ema_slow_value, current_volume, \
                 avg_volume, candle_data_json \
                 FROM market_snapshots WHERE signal_id = ? LIMIT 1",
            )
            .bind(signal_id)
            .fetch_optional(&self.pool)
            .await
            .change_context(StorageError::Query)?;

            Ok(row.map(map_snapshot_row))
        })
    }

    fn close(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.pool.close().await;
        })
    }
}

fn map_signal_row(
    (id, symbol, side, entry_price, tp_price, sl_price, spike_ratio, created_at): SignalRow,
) -> SignalRecord {
    SignalRecord {
        id,
        symbol,
        side: Side::from_str(&side).unwrap_or(Side::Long),
        entry_price,
        tp_price,
        sl_price,
        spike_ratio,
        created_at: parse_time_utc(&created_at),
    }
}

fn map_trade_row(
    (id, signal_id, close_reason, close_price, pnl_percent, closed_at): TradeRow,
) -> TradeRecord {
    TradeRecord {
        id,
        signal_id,
        close_reason: CloseReason::from_str(&close_reason).unwrap_or(CloseReason::Timeout),
        close_price,
        pnl_percent,
        closed_at: parse_time_utc(&closed_at),
    }
}

fn map_snapshot_row(
    (id, signal_id, ema_fast_value, ema_slow_value, current_volume, avg_volume, candle_data_json): SnapshotRow,
) -> MarketSnapshotRecord {
    MarketSnapshotRecord {
        id,
        signal_id,
        ema_fast_value,
        ema_slow_value,
        current_volume,
        avg_volume,
        candle_data_json,
    }
}

fn parse_time_utc(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

/// Migrated `:memory:` storage for tests across the crate.
#[cfg(test)]
pub(crate) async fn in_memory_storage() -> SqliteStorage {
    let opts = SqliteConnectOptions::from_str("sqlite::memory:")
        .unwrap()
        .create_if_missing(true);
    let pool = SqlitePool::connect_with(opts).await.unwrap();
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    SqliteStorage { pool }
}
