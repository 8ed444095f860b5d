use std::num::NonZeroU32;
use std::sync::Arc;

use error_stack::{Report, ResultExt};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use nonzero_ext::nonzero;
use serde::Deserialize;
use tracing::{debug, info};

use crate::error::ExchangeError;
use crate::exchange::FUTURES_REST_BASE;
use crate::model::{Candle, TimeFrame};

/// 20 requests per second keeps a bulk preload at roughly one request
/// every 50 ms, well inside the futures API weight budget.
const REQUESTS_PER_SECOND: NonZeroU32 = nonzero!(20u32);

/// Public REST client for Binance USDT-M futures.
pub struct FuturesRestClient {
    client: reqwest::Client,
    rate_limiter: Arc<DefaultDirectRateLimiter>,
}

impl FuturesRestClient {
    pub fn new() -> Self {
        let quota = Quota::per_second(REQUESTS_PER_SECOND);
        Self {
            client: reqwest::Client::new(),
            rate_limiter: Arc::new(RateLimiter::direct(quota)),
        }
    }

    /// Symbols currently tradable as USDT perpetuals, truncated to
    /// `limit`, from `/fapi/v1/exchangeInfo`.
    pub async fn fetch_tradable_symbols(
        &self,
        limit: usize,
    ) -> Result<Vec<String>, Report<ExchangeError>> {
        self.rate_limiter.until_ready().await;

        let url = format!("{FUTURES_REST_BASE}/fapi/v1/exchangeInfo");
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .change_context(ExchangeError::Request {
                endpoint: "exchangeInfo".into(),
            })?;

        if !response.status().is_success() {
            return Err(Report::new(ExchangeError::Request {
                endpoint: "exchangeInfo".into(),
            })
            .attach(format!("HTTP status: {}", response.status())));
        }

        let info: ExchangeInfoResponse =
            response
                .json()
                .await
                .change_context(ExchangeError::ResponseParse {
                    endpoint: "exchangeInfo".into(),
                })?;

        let symbols = filter_tradable(info.symbols, limit);
        info!(count = symbols.len(), "tradable symbols fetched");
        Ok(symbols)
    }

    /// The last `limit` klines for one symbol and timeframe from
    /// `/fapi/v1/klines`, oldest first. Only closed bars are requested
    /// in practice since the preloader runs before streaming catches up.
    pub async fn fetch_klines(
        &self,
        symbol: &str,
        timeframe: TimeFrame,
        limit: usize,
    ) -> Result<Vec<Candle>, Report<ExchangeError>> {
        self.rate_limiter.until_ready().await;

        let url = format!("{FUTURES_REST_BASE}/fapi/v1/klines");
        let limit_str = limit.to_string();
        let params = [
            ("symbol", symbol),
            ("interval", timeframe.as_str()),
            ("limit", limit_str.as_str()),
        ];

        let response = self
            .client
            .get(&url)
            .query(&params)
            .send()
            .await
            .change_context(ExchangeError::Request {
                endpoint: "klines".into(),
            })?;

        if !response.status().is_success() {
            return Err(Report::new(ExchangeError::Request {
                endpoint: "klines".into(),
            })
            .attach(format!("HTTP status: {}", response.status())));
        }

        let raw: Vec<KlineRow> = response
            .json()
            .await
            .change_context(ExchangeError::ResponseParse {
                endpoint: "klines".into(),
            })?;

        debug!(symbol, timeframe = %timeframe, fetched = raw.len(), "klines fetched");

        raw.into_iter().map(KlineRow::into_candle).collect()
    }
}

impl Default for FuturesRestClient {
    fn default() -> Self {
        Self::new()
    }
}

fn filter_tradable(symbols: Vec<SymbolInfo>, limit: usize) -> Vec<String> {
    symbols
        .into_iter()
        .filter(|s| s.status == "TRADING" && s.contract_type == "PERPETUAL" && s.quote_asset == "USDT")
        .map(|s| s.symbol)
        .take(limit)
        .collect()
}

// ── REST response types ───────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ExchangeInfoResponse {
    #[serde(default)]
    symbols: Vec<SymbolInfo>,
}

#[derive(Debug, Deserialize)]
struct SymbolInfo {
    symbol: String,
    #[serde(default)]
    status: String,
    #[serde(default, rename = "contractType")]
    contract_type: String,
    #[serde(default, rename = "quoteAsset")]
    quote_asset: String,
}

/// Binance kline row: 12-element array
/// [open_time, open, high, low, close, volume, close_time, ...]
#[derive(Debug, Deserialize)]
struct KlineRow(
    i64,                        // 0: open_time (ms)
    String,                     // 1: open
    String,                     // 2: high
    String,                     // 3: low
    String,                     // 4: close
    String,                     // 5: volume
    #[allow(dead_code)] i64,    // 6: close_time
    #[allow(dead_code)] String, // 7: quote asset volume
    #[allow(dead_code)] i64,    // 8: number of trades
    #[allow(dead_code)] String, // 9: taker buy base volume
    #[allow(dead_code)] String, // 10: taker buy quote volume
    #[allow(dead_code)] String, // 11: ignore
);

impl KlineRow {
    fn into_candle(self) -> Result<Candle, Report<ExchangeError>> {
        let parse_f64 = |s: &str| -> Result<f64, Report<ExchangeError>> {
            s.parse::<f64>()
                .change_context(ExchangeError::ResponseParse {
                    endpoint: "klines".into(),
                })
        };

        Ok(Candle {
            ts: self.0,
            open: parse_f64(&self.1)?,
            high: parse_f64(&self.2)?,
            low: parse_f64(&self.3)?,
            close: parse_f64(&self.4)?,
            volume: parse_f64(&self.5)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kline_row_parses_into_candle() {
        let row = KlineRow(
            1704067200000,
            "42000.0".into(),
            "43000.0".into(),
            "41500.0".into(),
            "42500.0".into(),
            "100.5".into(),
            1704067259999,
            "0".into(),
            10,
            "0".into(),
            "0".into(),
            "0".into(),
        );
        let candle = row.into_candle().unwrap();
        assert_eq!(candle.ts, 1704067200000);
        assert_eq!(candle.open, 42000.0);
        assert_eq!(candle.high, 43000.0);
        assert_eq!(candle.low, 41500.0);
        assert_eq!(candle.close, 42500.0);
        assert_eq!(candle.volume, 100.5);
    }

    #[test]
    fn kline_row_rejects_malformed_floats() {
        let row = KlineRow(
            0,
            "not-a-number".into(),
            "1".into(),
            "1".into(),
            "1".into(),
            "1".into(),
            0,
            "0".into(),
            0,
            "0".into(),
            "0".into(),
            "0".into(),
        );
        assert!(row.into_candle().is_err());
    }

    fn symbol_info(symbol: &str, status: &str, contract: &str, quote: &str) -> SymbolInfo {
        SymbolInfo {
            symbol: symbol.into(),
            status: status.into(),
            contract_type: contract.into(),
            quote_asset: quote.into(),
        }
    }

    #[test]
    fn filter_keeps_trading_usdt_perpetuals_only() {
        let symbols = vec![
            symbol_info("BTCUSDT", "TRADING", "PERPETUAL", "USDT"),
            symbol_info("ETHBTC", "TRADING", "PERPETUAL", "BTC"),
            symbol_info("XRPUSDT", "BREAK", "PERPETUAL", "USDT"),
            symbol_info("BTCUSDT_240628", "TRADING", "CURRENT_QUARTER", "USDT"),
            symbol_info("SOLUSDT", "TRADING", "PERPETUAL", "USDT"),
        ];
        assert_eq!(filter_tradable(symbols, 10), vec!["BTCUSDT", "SOLUSDT"]);
    }

    #[test]
    fn filter_truncates_to_limit() {
        let symbols = vec![
            symbol_info("AUSDT", "TRADING", "PERPETUAL", "USDT"),
            symbol_info("BUSDT", "TRADING", "PERPETUAL", "USDT"),
            symbol_info("CUSDT", "TRADING", "PERPETUAL", "USDT"),
        ];
        assert_eq!(filter_tradable(symbols, 2).len(), 2);
    }

    #[test]
    fn exchange_info_deserializes_from_json() {
        let payload = r#"{
            "timezone": "UTC",
            "symbols": [
                {"symbol": "BTCUSDT", "status": "TRADING", "contractType": "PERPETUAL", "quoteAsset": "USDT", "pricePrecision": 2}
            ]
        }"#;
        let info: ExchangeInfoResponse = serde_json::from_str(payload).unwrap();
        assert_eq!(info.symbols.len(), 1);
        assert_eq!(info.symbols[0].symbol, "BTCUSDT");
    }

    /// Integration test: requires network access. Run with `cargo test -- --ignored`
    #[tokio::test]
    #[ignore]
    async fn integration_fetch_klines() {
        let rest = FuturesRestClient::new();
        let candles = rest
            .fetch_klines("BTCUSDT", TimeFrame::Min1, 10)
            .await
            .unwrap();
        assert!(!candles.is_empty());
        assert!(candles.len() <= 10);
    }

    /// Integration test: requires network access. Run with `cargo test -- --ignored`
    #[tokio::test]
    #[ignore]
    async fn integration_fetch_tradable_symbols() {
        let rest = FuturesRestClient::new();
        let symbols = rest.fetch_tradable_symbols(5).await.unwrap();
        assert!(!symbols.is_empty());
        assert!(symbols.len() <= 5);
    }
}
