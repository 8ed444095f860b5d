use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Candle timeframe supported by the application.
///
/// String representations match both the config file format and the
/// Binance kline interval / stream suffix (e.g. `"1m"`, `"15m"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimeFrame {
    Min1,
    Min3,
    Min5,
    Min15,
    Min30,
    Hour1,
    Hour4,
    Day1,
}

impl TimeFrame {
    /// Parse a config-format string into a `TimeFrame`.
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "1m" => Some(Self::Min1),
            "3m" => Some(Self::Min3),
            "5m" => Some(Self::Min5),
            "15m" => Some(Self::Min15),
            "30m" => Some(Self::Min30),
            "1h" => Some(Self::Hour1),
            "4h" => Some(Self::Hour4),
            "1d" => Some(Self::Day1),
            _ => None,
        }
    }

    /// Return the config-format string representation.
    ///
    /// Identical to the Binance kline interval string.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Min1 => "1m",
            Self::Min3 => "3m",
            Self::Min5 => "5m",
            Self::Min15 => "15m",
            Self::Min30 => "30m",
            Self::Hour1 => "1h",
            Self::Hour4 => "4h",
            Self::Day1 => "1d",
        }
    }
}

impl fmt::Display for TimeFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Direction of a signal / virtual position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Long,
    Short,
}

impl Side {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "LONG" => Some(Self::Long),
            "SHORT" => Some(Self::Short),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Long => "LONG",
            Self::Short => "SHORT",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Why a virtual position was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    Tp,
    Sl,
    Timeout,
}

impl CloseReason {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "TP" => Some(Self::Tp),
            "SL" => Some(Self::Sl),
            "TIMEOUT" => Some(Self::Timeout),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tp => "TP",
            Self::Sl => "SL",
            Self::Timeout => "TIMEOUT",
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One OHLCV bar.
///
/// `ts` is the bar open time in epoch milliseconds, aligned to the
/// timeframe boundary. It is the bar's identity within a buffer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candle {
    pub ts: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// A trading signal produced by a strategy.
#[derive(Debug, Clone)]
pub struct Signal {
    pub symbol: String,
    pub side: Side,
    pub entry_price: f64,
    pub sl_price: f64,
    pub tp_price: f64,
    pub spike_ratio: f64,
    pub ema_fast_value: f64,
    pub ema_slow_value: f64,
    pub current_volume: f64,
    pub avg_volume: f64,
    pub timestamp: DateTime<Utc>,
}

/// In-memory record of a simulated position, owned by the watcher.
#[derive(Debug, Clone)]
pub struct VirtualPosition {
    pub signal_id: i64,
    pub symbol: String,
    pub side: Side,
    pub entry_price: f64,
    pub tp_price: f64,
    pub sl_price: f64,
    pub opened_at: DateTime<Utc>,
}

/// Persisted signal row.
#[derive(Debug, Clone)]
pub struct SignalRecord {
    pub id: i64,
    pub symbol: String,
    pub side: Side,
    pub entry_price: f64,
    pub tp_price: f64,
    pub sl_price: f64,
    pub spike_ratio: f64,
    pub created_at: DateTime<Utc>,
}

/// Persisted close record, 1:1 with a signal.
#[derive(Debug, Clone)]
pub struct TradeRecord {
    pub id: i64,
    pub signal_id: i64,
    pub close_reason: CloseReason,
    pub close_price: f64,
    pub pnl_percent: f64,
    pub closed_at: DateTime<Utc>,
}

/// Persisted indicator snapshot taken at signal time, 1:1 with a signal.
#[derive(Debug, Clone)]
pub struct MarketSnapshotRecord {
    pub id: i64,
    pub signal_id: i64,
    pub ema_fast_value: f64,
    pub ema_slow_value: f64,
    pub current_volume: f64,
    pub avg_volume: f64,
    pub candle_data_json: Option<String>,
}

/// Round to `dp` decimal places.
pub(crate) fn round_dp(value: f64, dp: u32) -> f64 {
    let factor = 10f64.powi(dp as i32);
    (value * factor).round() / factor
}
