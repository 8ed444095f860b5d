use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::model::{Candle, TimeFrame};

/// Default number of candles retained per (symbol, timeframe).
pub const DEFAULT_CAPACITY: usize = 200;

/// Fixed-capacity FIFO of candles for one (symbol, timeframe).
///
/// Timestamps are non-decreasing; the tail candle may still be open and
/// is overwritten in place until its closed successor arrives.
#[derive(Debug)]
pub struct CandleBuffer {
    capacity: usize,
    candles: VecDeque<Candle>,
}

impl CandleBuffer {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            candles: VecDeque::with_capacity(capacity),
        }
    }

    /// Append a closed candle, evicting the oldest when full.
    fn push_closed(&mut self, candle: Candle) {
        if self.candles.len() == self.capacity {
            self.candles.pop_front();
        }
        self.candles.push_back(candle);
    }

    /// Overwrite the open tail candle when the timestamp matches,
    /// otherwise append as a new bar.
    fn update_open(&mut self, candle: Candle) {
        match self.candles.back_mut() {
            Some(last) if last.ts == candle.ts => *last = candle,
            _ => self.push_closed(candle),
        }
    }

    fn len(&self) -> usize {
        self.candles.len()
    }

    fn snapshot(&self) -> Vec<Candle> {
        self.candles.iter().copied().collect()
    }
}

type BufferHandle = Arc<RwLock<CandleBuffer>>;

/// In-memory market data store shared between the stream client, the
/// history preloader, the strategies and the position watcher.
///
/// Buffers are locked per (symbol, timeframe); readers always receive a
/// defensive copy so no lock outlives the call. All methods are
/// synchronous — no lock is ever held across an await point.
pub struct MemoryStore {
    capacity: usize,
    buffers: RwLock<HashMap<String, HashMap<TimeFrame, BufferHandle>>>,
    prices: RwLock<HashMap<String, f64>>,
}

impl MemoryStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            buffers: RwLock::new(HashMap::new()),
            prices: RwLock::new(HashMap::new()),
        }
    }

    /// Write one candle. `is_closed = true` appends a new bar (evicting
    /// the oldest at capacity); `false` updates the open tail bar.
    pub fn update_candle(
        &self,
        symbol: &str,
        timeframe: TimeFrame,
        candle: Candle,
        is_closed: bool,
    ) {
        let buffer = self.buffer_handle(symbol, timeframe);
        let mut buffer = buffer.write();
        if is_closed {
            buffer.push_closed(candle);
        } else {
            buffer.update_open(candle);
        }
    }

    /// Snapshot of the buffer for (symbol, timeframe), oldest first.
    /// Unknown keys yield an empty vector.
    pub fn get_candles(&self, symbol: &str, timeframe: TimeFrame) -> Vec<Candle> {
        let buffer = self
            .buffers
            .read()
            .get(symbol)
            .and_then(|frames| frames.get(&timeframe))
            .map(Arc::clone);
        match buffer {
            Some(buffer) => buffer.read().snapshot(),
            None => Vec::new(),
        }
    }

    pub fn update_price(&self, symbol: &str, price: f64) {
        self.prices.write().insert(symbol.to_owned(), price);
    }

    pub fn get_price(&self, symbol: &str) -> Option<f64> {
        self.prices.read().get(symbol).copied()
    }

    /// Symbols with at least one candle in any timeframe, sorted.
    pub fn available_symbols(&self) -> Vec<String> {
        let buffers = self.buffers.read();
        let mut symbols: Vec<String> = buffers
            .iter()
            .filter(|(_, frames)| frames.values().any(|buffer| buffer.read().len() > 0))
            .map(|(symbol, _)| symbol.clone())
            .collect();
        symbols.sort();
        symbols
    }

    fn buffer_handle(&self, symbol: &str, timeframe: TimeFrame) -> BufferHandle {
        if let Some(buffer) = self
            .buffers
            .read()
            .get(symbol)
            .and_then(|frames| frames.get(&timeframe))
        {
            return Arc::clone(buffer);
        }

        let mut buffers = self.buffers.write();
        let frames = buffers.entry(symbol.to_owned()).or_default();
        Arc::clone(
            frames
                .entry(timeframe)
                .or_insert_with(|| Arc::new(RwLock::new(CandleBuffer::new(self.capacity)))),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_candle(ts: i64, close: f64) -> Candle {
        Candle {
            ts,
            open: close,
            high: close,
            low: close,
            close,
            volume: 1.0,
        }
    }

    #[test]
    fn unknown_key_returns_empty_snapshot() {
        let store = MemoryStore::new(10);
        assert!(store.get_candles("BTCUSDT", TimeFrame::Min1).is_empty());
    }

    #[test]
    fn closed_candles_append_in_order() {
        let store = MemoryStore::new(10);
        for i in 0..3 {
            store.update_candle(
                "BTCUSDT",
                TimeFrame::Min1,
                make_candle(i * 60_000, 100.0 + i as f64),
                true,
            );
        }
        let candles = store.get_candles("BTCUSDT", TimeFrame::Min1);
        assert_eq!(candles.len(), 3);
        assert!(candles.windows(2).all(|w| w[0].ts < w[1].ts));
    }

    #[test]
    fn capacity_bound_evicts_oldest() {
        let capacity = 5;
        let total = 12;
        let store = MemoryStore::new(capacity);
        for i in 0..total {
            store.update_candle(
                "BTCUSDT",
                TimeFrame::Min1,
                make_candle(i * 60_000, 100.0),
                true,
            );
        }
        let candles = store.get_candles("BTCUSDT", TimeFrame::Min1);
        assert_eq!(candles.len(), capacity);
        // Earliest surviving timestamp is the (total - capacity + 1)-th input.
        assert_eq!(candles[0].ts, (total - capacity as i64) * 60_000);
        assert_eq!(candles[capacity - 1].ts, (total - 1) as i64 * 60_000);
    }

    #[test]
    fn open_candle_overwrites_matching_tail() {
        let store = MemoryStore::new(10);
        store.update_candle("BTCUSDT", TimeFrame::Min1, make_candle(0, 100.0), true);
        store.update_candle("BTCUSDT", TimeFrame::Min1, make_candle(60_000, 101.0), false);
        store.update_candle("BTCUSDT", TimeFrame::Min1, make_candle(60_000, 102.0), false);

        let candles = store.get_candles("BTCUSDT", TimeFrame::Min1);
        assert_eq!(candles.len(), 2);
        assert_eq!(candles[1].close, 102.0);
    }

    #[test]
    fn open_candle_with_new_timestamp_appends() {
        let store = MemoryStore::new(10);
        store.update_candle("BTCUSDT", TimeFrame::Min1, make_candle(0, 100.0), false);
        store.update_candle("BTCUSDT", TimeFrame::Min1, make_candle(60_000, 101.0), false);

        let candles = store.get_candles("BTCUSDT", TimeFrame::Min1);
        assert_eq!(candles.len(), 2);
    }

    #[test]
    fn snapshot_is_a_defensive_copy() {
        let store = MemoryStore::new(10);
        store.update_candle("BTCUSDT", TimeFrame::Min1, make_candle(0, 100.0), true);
        let mut snapshot = store.get_candles("BTCUSDT", TimeFrame::Min1);
        snapshot[0].close = 0.0;
        assert_eq!(store.get_candles("BTCUSDT", TimeFrame::Min1)[0].close, 100.0);
    }

    #[test]
    fn timeframes_are_isolated() {
        let store = MemoryStore::new(10);
        store.update_candle("BTCUSDT", TimeFrame::Min1, make_candle(0, 100.0), true);
        assert!(store.get_candles("BTCUSDT", TimeFrame::Min5).is_empty());
        assert_eq!(store.get_candles("BTCUSDT", TimeFrame::Min1).len(), 1);
    }

    #[test]
    fn price_round_trip() {
        let store = MemoryStore::new(10);
        assert_eq!(store.get_price("BTCUSDT"), None);
        store.update_price("BTCUSDT", 42_000.5);
        assert_eq!(store.get_price("BTCUSDT"), Some(42_000.5));
        store.update_price("BTCUSDT", 42_001.0);
        assert_eq!(store.get_price("BTCUSDT"), Some(42_001.0));
    }

    #[test]
    fn available_symbols_sorted_and_nonempty_only() {
        let store = MemoryStore::new(10);
        store.update_candle("ETHUSDT", TimeFrame::Min1, make_candle(0, 1.0), true);
        store.update_candle("BTCUSDT", TimeFrame::Min5, make_candle(0, 1.0), true);
        assert_eq!(store.available_symbols(), vec!["BTCUSDT", "ETHUSDT"]);
    }
}
