use std::sync::Arc;

use chrono::Utc;
use tracing::info;

use crate::config::StrategyConfig;
use crate::indicator::atr::atr;
use crate::indicator::ema::ema;
use crate::indicator::{closes, highs, lows, volumes};
use crate::model::{Side, Signal, TimeFrame, round_dp};
use crate::store::MemoryStore;
use crate::strategy::Strategy;

const VOLUME_MA: usize = 20;
const MIN_SPIKE: f64 = 4.0;
const MAX_SPIKE: f64 = 12.0;
const RR_RATIO: f64 = 1.5;
const ATR_PERIOD: usize = 14;
const ATR_STOP_MULT: f64 = 1.5;

/// EMA crossover on the 15m chart, gated by a wide volume-spike band
/// and stopped at 1.5x ATR(14).
pub struct VolatilityEma {
    store: Arc<MemoryStore>,
    ema_fast: usize,
    ema_slow: usize,
    required: [TimeFrame; 1],
}

impl VolatilityEma {
    pub fn new(strategy: &StrategyConfig, store: Arc<MemoryStore>) -> Self {
        Self {
            store,
            ema_fast: strategy.ema_fast,
            ema_slow: strategy.ema_slow,
            required: [TimeFrame::Min15],
        }
    }
}

impl Strategy for VolatilityEma {
    fn id(&self) -> &'static str {
        "volatility_ema"
    }

    fn required_timeframes(&self) -> &[TimeFrame] {
        &self.required
    }

    fn evaluate(&self, symbol: &str) -> Option<Signal> {
        let candles = self.store.get_candles(symbol, TimeFrame::Min15);
        if candles.len() < self.ema_slow.max(VOLUME_MA).max(15) + 2 {
            return None;
        }

        let close = closes(&candles);
        let high = highs(&candles);
        let low = lows(&candles);
        let volume = volumes(&candles);
        let n = close.len();

        let ema_f = ema(&close, self.ema_fast);
        let ema_s = ema(&close, self.ema_slow);
        let atr_values = atr(&high, &low, &close, ATR_PERIOD);

        let avg_vol = volume[n - VOLUME_MA - 1..n - 1].iter().sum::<f64>() / VOLUME_MA as f64;
        let current_vol = volume[n - 1];
        let spike_ratio = if avg_vol > 0.0 { current_vol / avg_vol } else { 0.0 };
        if !(MIN_SPIKE..=MAX_SPIKE).contains(&spike_ratio) {
            return None;
        }

        // Crossover must have happened on the last bar.
        let side = if ema_f[n - 1] > ema_s[n - 1] && ema_f[n - 2] <= ema_s[n - 2] {
            Side::Long
        } else if ema_f[n - 1] < ema_s[n - 1] && ema_f[n - 2] >= ema_s[n - 2] {
            Side::Short
        } else {
            return None;
        };

        let entry_price = self.store.get_price(symbol).unwrap_or(close[n - 1]);
        let atr_value = atr_values[n - 1];
        if atr_value <= 0.0 {
            return None;
        }

        let (sl, tp) = match side {
            Side::Long => {
                let sl = entry_price - ATR_STOP_MULT * atr_value;
                (sl, entry_price + (entry_price - sl) * RR_RATIO)
            }
            Side::Short => {
                let sl = entry_price + ATR_STOP_MULT * atr_value;
                (sl, entry_price - (sl - entry_price) * RR_RATIO)
            }
        };

        let signal = Signal {
            symbol: symbol.to_owned(),
            side,
            entry_price: round_dp(entry_price, 6),
            sl_price: round_dp(sl, 6),
            tp_price: round_dp(tp, 6),
            spike_ratio: round_dp(spike_ratio, 4),
            ema_fast_value: round_dp(ema_f[n - 1], 6),
            ema_slow_value: round_dp(ema_s[n - 1], 6),
            current_volume: round_dp(current_vol, 2),
            avg_volume: round_dp(avg_vol, 2),
            timestamp: Utc::now(),
        };

        info!(
            symbol,
            side = %signal.side,
            entry = signal.entry_price,
            spike = signal.spike_ratio,
            "signal generated"
        );
        Some(signal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Candle;

    fn make_candle(ts: i64, close: f64, volume: f64) -> Candle {
        Candle {
            ts,
            open: close,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume,
        }
    }

    /// 40 flat bars at 100, then one bar jumping to 105 with `spike`
    /// times the baseline volume of 10. The jump drags the fast EMA
    /// through the slow one on the final bar.
    fn crossover_store(spike: f64) -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new(200));
        for i in 0..40 {
            store.update_candle(
                "TESTUSDT",
                TimeFrame::Min15,
                make_candle(i * 900_000, 100.0, 10.0),
                true,
            );
        }
        store.update_candle(
            "TESTUSDT",
            TimeFrame::Min15,
            make_candle(40 * 900_000, 105.0, 10.0 * spike),
            true,
        );
        store
    }

    fn strategy_on(store: Arc<MemoryStore>) -> VolatilityEma {
        VolatilityEma::new(&StrategyConfig::default(), store)
    }

    #[test]
    fn crossover_with_spike_emits_long() {
        let strategy = strategy_on(crossover_store(5.0));
        let signal = strategy.evaluate("TESTUSDT").expect("expected a signal");

        assert_eq!(signal.side, Side::Long);
        assert!((signal.spike_ratio - 5.0).abs() < 1e-9);
        assert!((signal.entry_price - 105.0).abs() < 1e-9);
        assert!(signal.sl_price < signal.entry_price && signal.entry_price < signal.tp_price);
        // Risk distance is exactly 1.5x the last ATR value.
        let risk = signal.entry_price - signal.sl_price;
        let reward = signal.tp_price - signal.entry_price;
        assert!((reward - risk * RR_RATIO).abs() < 1e-6);
    }

    #[test]
    fn spike_outside_band_is_rejected() {
        let strategy = strategy_on(crossover_store(3.0));
        assert!(strategy.evaluate("TESTUSDT").is_none());
        let strategy = strategy_on(crossover_store(15.0));
        assert!(strategy.evaluate("TESTUSDT").is_none());
    }

    #[test]
    fn no_crossover_yields_none() {
        // Steady rise: the fast EMA has been above the slow one for a
        // long time, so the final bar is not a crossover bar.
        let store = Arc::new(MemoryStore::new(200));
        for i in 0..41 {
            let volume = if i == 40 { 50.0 } else { 10.0 };
            store.update_candle(
                "TESTUSDT",
                TimeFrame::Min15,
                make_candle(i * 900_000, 100.0 + i as f64, volume),
                true,
            );
        }
        let strategy = strategy_on(store);
        assert!(strategy.evaluate("TESTUSDT").is_none());
    }

    #[test]
    fn breakdown_crossover_emits_short() {
        let store = Arc::new(MemoryStore::new(200));
        for i in 0..40 {
            store.update_candle(
                "TESTUSDT",
                TimeFrame::Min15,
                make_candle(i * 900_000, 100.0, 10.0),
                true,
            );
        }
        store.update_candle(
            "TESTUSDT",
            TimeFrame::Min15,
            make_candle(40 * 900_000, 95.0, 50.0),
            true,
        );

        let strategy = strategy_on(store);
        let signal = strategy.evaluate("TESTUSDT").expect("expected a signal");
        assert_eq!(signal.side, Side::Short);
        assert!(signal.tp_price < signal.entry_price && signal.entry_price < signal.sl_price);
    }

    #[test]
    fn live_price_overrides_last_close() {
        let store = crossover_store(5.0);
        store.update_price("TESTUSDT", 105.4);
        let strategy = strategy_on(store);
        let signal = strategy.evaluate("TESTUSDT").expect("expected a signal");
        assert!((signal.entry_price - 105.4).abs() < 1e-9);
    }

    #[test]
    fn insufficient_candles_yield_none() {
        let store = Arc::new(MemoryStore::new(200));
        for i in 0..10 {
            store.update_candle(
                "TESTUSDT",
                TimeFrame::Min15,
                make_candle(i * 900_000, 100.0, 10.0),
                true,
            );
        }
        let strategy = strategy_on(store);
        assert!(strategy.evaluate("TESTUSDT").is_none());
    }
}
