use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use error_stack::{Report, ResultExt};
use futures::{SinkExt, StreamExt};
use parking_lot::RwLock;
use serde::Deserialize;
use tokio::time::sleep;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::ExchangeError;
use crate::exchange::{FUTURES_WS_BASE, MAX_STREAMS_PER_SOCKET};
use crate::model::{Candle, TimeFrame};
use crate::store::MemoryStore;

/// Public WebSocket client for Binance USDT-M futures.
///
/// Runs two independent workers until cancelled:
///   * kline streams feeding the candle buffers, and
///   * the all-symbol mark-price broadcast feeding the price map.
///
/// Both reconnect after `reconnect_delay` on any disconnect and pick up
/// the current symbol set when they do.
pub struct StreamClient {
    store: Arc<MemoryStore>,
    symbols: RwLock<Vec<String>>,
    timeframes: Vec<TimeFrame>,
    reconnect_delay: Duration,
}

impl StreamClient {
    pub fn new(
        store: Arc<MemoryStore>,
        symbols: Vec<String>,
        timeframes: Vec<TimeFrame>,
        reconnect_delay: Duration,
    ) -> Self {
        Self {
            store,
            symbols: RwLock::new(symbols),
            timeframes,
            reconnect_delay,
        }
    }

    /// Replace the symbol set. Running sockets are left untouched; the
    /// workers pick up the new set on their next reconnect.
    pub fn update_symbols(&self, symbols: Vec<String>) {
        let count = symbols.len();
        *self.symbols.write() = symbols;
        info!(count, "stream symbol set updated");
    }

    fn current_symbols(&self) -> Vec<String> {
        self.symbols.read().clone()
    }

    /// Drive both workers until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(
            symbol_count = self.current_symbols().len(),
            timeframes = ?self.timeframes,
            "stream client started"
        );
        tokio::join!(
            self.run_kline_worker(&cancel),
            self.run_mark_price_worker(&cancel),
        );
        info!("stream client stopped");
    }

    // ── Kline worker ──────────────────────────────────────────────────

    async fn run_kline_worker(&self, cancel: &CancellationToken) {
        while !cancel.is_cancelled() {
            let urls = build_kline_urls(&self.current_symbols(), &self.timeframes);

            if urls.is_empty() {
                debug!("no kline streams to open yet");
            } else {
                info!(sockets = urls.len(), "kline streams connecting");
                // One socket per 200-stream shard. When any socket drops,
                // the whole cycle reconnects so every shard sees the
                // current symbol set again.
                let sockets: Vec<_> = urls
                    .iter()
                    .map(|url| Box::pin(self.read_kline_socket(url, cancel)))
                    .collect();
                let (result, index, _) = futures::future::select_all(sockets).await;
                match result {
                    Ok(()) => debug!(socket = index, "kline socket closed"),
                    Err(e) => warn!(error = ?e, socket = index, "kline socket disconnected"),
                }
            }

            if cancel.is_cancelled() {
                break;
            }
            debug!(delay_secs = self.reconnect_delay.as_secs(), "kline reconnecting");
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = sleep(self.reconnect_delay) => {}
            }
        }
    }

    async fn read_kline_socket(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<(), Report<ExchangeError>> {
        let (ws_stream, _) =
            connect_async(url)
                .await
                .change_context(ExchangeError::Connection {
                    endpoint: "kline stream".into(),
                })?;
        let (mut write, mut read) = ws_stream.split();
        info!("kline socket connected");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("kline socket cancelled");
                    return Ok(());
                }
                msg = read.next() => {
                    match msg {
                        None => {
                            return Err(Report::new(ExchangeError::Connection {
                                endpoint: "kline stream".into(),
                            })
                            .attach("stream ended"));
                        }
                        Some(Err(e)) => {
                            return Err(Report::new(e).change_context(ExchangeError::Connection {
                                endpoint: "kline stream".into(),
                            }));
                        }
                        Some(Ok(Message::Text(text))) => self.handle_kline_msg(&text),
                        Some(Ok(Message::Ping(data))) => {
                            let _ = write.send(Message::Pong(data)).await;
                        }
                        Some(Ok(_)) => {}
                    }
                }
            }
        }
    }

    /// Parse one combined-stream kline message into the store. Malformed
    /// payloads are dropped — market data is best-effort.
    fn handle_kline_msg(&self, raw: &str) {
        let msg: CombinedKlineMsg = match serde_json::from_str(raw) {
            Ok(msg) => msg,
            Err(e) => {
                debug!(error = %e, "kline parse skipped");
                return;
            }
        };

        let k = msg.data.kline;
        let Some(timeframe) = TimeFrame::from_str(&k.interval) else {
            debug!(interval = %k.interval, "unknown kline interval skipped");
            return;
        };
        let Some(candle) = k.to_candle() else {
            debug!(symbol = %k.symbol, "kline float parse skipped");
            return;
        };

        self.store
            .update_candle(&k.symbol, timeframe, candle, k.is_closed);
        // The close price doubles as a price-map fallback between
        // mark-price broadcasts.
        self.store.update_price(&k.symbol, candle.close);
    }

    // ── Mark-price worker ─────────────────────────────────────────────

    async fn run_mark_price_worker(&self, cancel: &CancellationToken) {
        let url = format!("{FUTURES_WS_BASE}/ws/!markPrice@arr@1s");

        while !cancel.is_cancelled() {
            match self.read_mark_price_socket(&url, cancel).await {
                Ok(()) => debug!("mark price socket closed"),
                Err(e) => warn!(error = ?e, "mark price socket disconnected"),
            }

            if cancel.is_cancelled() {
                break;
            }
            debug!(delay_secs = self.reconnect_delay.as_secs(), "mark price reconnecting");
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = sleep(self.reconnect_delay) => {}
            }
        }
    }

    async fn read_mark_price_socket(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<(), Report<ExchangeError>> {
        let (ws_stream, _) =
            connect_async(url)
                .await
                .change_context(ExchangeError::Connection {
                    endpoint: "mark price stream".into(),
                })?;
        let (mut write, mut read) = ws_stream.split();
        info!("mark price socket connected");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("mark price socket cancelled");
                    return Ok(());
                }
                msg = read.next() => {
                    match msg {
                        None => {
                            return Err(Report::new(ExchangeError::Connection {
                                endpoint: "mark price stream".into(),
                            })
                            .attach("stream ended"));
                        }
                        Some(Err(e)) => {
                            return Err(Report::new(e).change_context(ExchangeError::Connection {
                                endpoint: "mark price stream".into(),
                            }));
                        }
                        Some(Ok(Message::Text(text))) => self.handle_mark_price_msg(&text),
                        Some(Ok(Message::Ping(data))) => {
                            let _ = write.send(Message::Pong(data)).await;
                        }
                        Some(Ok(_)) => {}
                    }
                }
            }
        }
    }

    /// The broadcast covers every listed symbol; only tracked ones are
    /// written into the price map.
    fn handle_mark_price_msg(&self, raw: &str) {
        let items: Vec<MarkPriceItem> = match serde_json::from_str(raw) {
            Ok(items) => items,
            Err(e) => {
                debug!(error = %e, "mark price parse skipped");
                return;
            }
        };

        let tracked: HashSet<String> = self.current_symbols().into_iter().collect();
        for item in items {
            if !tracked.contains(&item.symbol) {
                continue;
            }
            match item.price.parse::<f64>() {
                Ok(price) => self.store.update_price(&item.symbol, price),
                Err(e) => debug!(symbol = %item.symbol, error = %e, "mark price value skipped"),
            }
        }
    }
}

/// Combined-stream URLs for the symbol set, one per 200-stream shard.
pub(crate) fn build_kline_urls(symbols: &[String], timeframes: &[TimeFrame]) -> Vec<String> {
    let streams: Vec<String> = symbols
        .iter()
        .flat_map(|symbol| {
            timeframes
                .iter()
                .map(move |tf| format!("{}@kline_{}", symbol.to_lowercase(), tf.as_str()))
        })
        .collect();

    streams
        .chunks(MAX_STREAMS_PER_SOCKET)
        .map(|chunk| format!("{FUTURES_WS_BASE}/stream?streams={}", chunk.join("/")))
        .collect()
}

// ── WebSocket message types ───────────────────────────────────────────────────

/// Combined stream wrapper: `{ "stream": "...", "data": { ... } }`
#[derive(Debug, Deserialize)]
struct CombinedKlineMsg {
    data: KlineEvent,
}

#[derive(Debug, Deserialize)]
struct KlineEvent {
    #[serde(rename = "k")]
    kline: KlinePayload,
}

#[derive(Debug, Deserialize)]
struct KlinePayload {
    /// Bar open time (ms epoch)
    #[serde(rename = "t")]
    open_time: i64,
    #[serde(rename = "o")]
    open: String,
    #[serde(rename = "h")]
    high: String,
    #[serde(rename = "l")]
    low: String,
    #[serde(rename = "c")]
    close: String,
    #[serde(rename = "v")]
    volume: String,
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "i")]
    interval: String,
    /// Whether the bar is closed
    #[serde(rename = "x")]
    is_closed: bool,
}

impl KlinePayload {
    fn to_candle(&self) -> Option<Candle> {
        Some(Candle {
            ts: self.open_time,
            open: self.open.parse().ok()?,
            high: self.high.parse().ok()?,
            low: self.low.parse().ok()?,
            close: self.close.parse().ok()?,
            volume: self.volume.parse().ok()?,
        })
    }
}

#[derive(Debug, Deserialize)]
struct MarkPriceItem {
    #[serde(rename = "s")]
    symbol: String,
    /// Mark price
    #[serde(rename = "p")]
    price: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client_with(symbols: &[&str]) -> StreamClient {
        StreamClient::new(
            Arc::new(MemoryStore::new(16)),
            symbols.iter().map(|s| s.to_string()).collect(),
            vec![TimeFrame::Min1, TimeFrame::Min5],
            Duration::from_secs(5),
        )
    }

    fn kline_json(symbol: &str, interval: &str, close: &str, is_closed: bool) -> String {
        format!(
            r#"{{"stream":"{sym}@kline_{interval}","data":{{"e":"kline","E":1700000000100,"s":"{symbol}","k":{{"t":1700000000000,"T":1700000059999,"s":"{symbol}","i":"{interval}","o":"100.0","h":"101.0","l":"99.0","c":"{close}","v":"12.5","x":{is_closed}}}}}}}"#,
            sym = symbol.to_lowercase(),
        )
    }

    #[test]
    fn single_shard_url_lists_every_stream() {
        let urls = build_kline_urls(
            &["BTCUSDT".into(), "ETHUSDT".into()],
            &[TimeFrame::Min1, TimeFrame::Min5],
        );
        assert_eq!(urls.len(), 1);
        for stream in [
            "btcusdt@kline_1m",
            "btcusdt@kline_5m",
            "ethusdt@kline_1m",
            "ethusdt@kline_5m",
        ] {
            assert!(urls[0].contains(stream), "missing {stream} in {}", urls[0]);
        }
    }

    #[test]
    fn large_symbol_sets_shard_at_200_streams() {
        let symbols: Vec<String> = (0..150).map(|i| format!("SYM{i}USDT")).collect();
        let urls = build_kline_urls(&symbols, &[TimeFrame::Min1, TimeFrame::Min5]);
        // 300 streams -> two sockets.
        assert_eq!(urls.len(), 2);
        let count = |url: &str| url.split("streams=").nth(1).unwrap().split('/').count();
        assert_eq!(count(&urls[0]), 200);
        assert_eq!(count(&urls[1]), 100);
    }

    #[test]
    fn empty_symbol_set_produces_no_urls() {
        assert!(build_kline_urls(&[], &[TimeFrame::Min1]).is_empty());
    }

    #[test]
    fn reconnect_url_reflects_updated_symbol_set() {
        // The worker rebuilds URLs from the live set on each cycle, so a
        // symbol swap shows up in the next connect attempt.
        let client = client_with(&["AAAUSDT", "BBBUSDT"]);
        let before = build_kline_urls(&client.current_symbols(), &client.timeframes);
        assert!(before[0].contains("aaausdt@kline_1m"));
        assert!(before[0].contains("bbbusdt@kline_5m"));

        client.update_symbols(vec!["AAAUSDT".into(), "CCCUSDT".into()]);
        let after = build_kline_urls(&client.current_symbols(), &client.timeframes);
        assert_eq!(after.len(), 1);
        for stream in [
            "aaausdt@kline_1m",
            "aaausdt@kline_5m",
            "cccusdt@kline_1m",
            "cccusdt@kline_5m",
        ] {
            assert!(after[0].contains(stream));
        }
        assert!(!after[0].contains("bbbusdt"));
    }

    #[test]
    fn closed_kline_appends_and_mirrors_price() {
        let client = client_with(&["BTCUSDT"]);
        client.handle_kline_msg(&kline_json("BTCUSDT", "1m", "100.5", true));

        let candles = client.store.get_candles("BTCUSDT", TimeFrame::Min1);
        assert_eq!(candles.len(), 1);
        assert_eq!(candles[0].ts, 1700000000000);
        assert_eq!(candles[0].close, 100.5);
        assert_eq!(client.store.get_price("BTCUSDT"), Some(100.5));
    }

    #[test]
    fn open_kline_overwrites_same_bar() {
        let client = client_with(&["BTCUSDT"]);
        client.handle_kline_msg(&kline_json("BTCUSDT", "1m", "100.1", false));
        client.handle_kline_msg(&kline_json("BTCUSDT", "1m", "100.9", false));

        let candles = client.store.get_candles("BTCUSDT", TimeFrame::Min1);
        assert_eq!(candles.len(), 1);
        assert_eq!(candles[0].close, 100.9);
    }

    #[test]
    fn unknown_interval_is_dropped() {
        let client = client_with(&["BTCUSDT"]);
        client.handle_kline_msg(&kline_json("BTCUSDT", "2m", "100.0", true));
        assert!(client.store.available_symbols().is_empty());
    }

    #[test]
    fn malformed_kline_payload_is_dropped() {
        let client = client_with(&["BTCUSDT"]);
        client.handle_kline_msg("{not json");
        client.handle_kline_msg(r#"{"data":{"e":"aggTrade"}}"#);
        assert!(client.store.available_symbols().is_empty());
    }

    #[test]
    fn mark_price_updates_tracked_symbols_only() {
        let client = client_with(&["BTCUSDT", "ETHUSDT"]);
        client.handle_mark_price_msg(
            r#"[
                {"e":"markPriceUpdate","s":"BTCUSDT","p":"43000.10","T":0},
                {"e":"markPriceUpdate","s":"DOGEUSDT","p":"0.08","T":0},
                {"e":"markPriceUpdate","s":"ETHUSDT","p":"2300.55","T":0}
            ]"#,
        );
        assert_eq!(client.store.get_price("BTCUSDT"), Some(43000.10));
        assert_eq!(client.store.get_price("ETHUSDT"), Some(2300.55));
        assert_eq!(client.store.get_price("DOGEUSDT"), None);
    }

    #[test]
    fn malformed_mark_price_payload_is_dropped() {
        let client = client_with(&["BTCUSDT"]);
        client.handle_mark_price_msg(r#"{"s":"BTCUSDT","p":"1.0"}"#);
        client.handle_mark_price_msg(r#"[{"s":"BTCUSDT","p":"abc"}]"#);
        assert_eq!(client.store.get_price("BTCUSDT"), None);
    }
}
