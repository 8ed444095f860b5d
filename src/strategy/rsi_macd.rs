use std::sync::Arc;

use chrono::Utc;
use tracing::info;

use crate::indicator::macd::macd;
use crate::indicator::rsi::rsi;
use crate::indicator::{closes, highs, lows, volumes};
use crate::model::{Side, Signal, TimeFrame, round_dp};
use crate::store::MemoryStore;
use crate::strategy::Strategy;

const RSI_PERIOD: usize = 14;
const RSI_OVERSOLD: f64 = 30.0;
const RSI_OVERBOUGHT: f64 = 70.0;
const MACD_FAST: usize = 12;
const MACD_SLOW: usize = 26;
const MACD_SIGNAL: usize = 9;
const RR_RATIO: f64 = 2.0;
/// Fallback stop distance when the reference bar extreme sits on the
/// wrong side of the live entry price.
const STOP_NUDGE: f64 = 0.002;

/// RSI extreme + MACD/signal crossover on the 15m chart.
///
/// LONG when RSI is oversold and the MACD line crossed above its signal
/// between the last two bars; SHORT mirrored. The stop goes at the
/// reference bar's low/high, nudged past the entry if the live price
/// has already moved through it.
pub struct RsiMacd {
    store: Arc<MemoryStore>,
    required: [TimeFrame; 1],
}

impl RsiMacd {
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self {
            store,
            required: [TimeFrame::Min15],
        }
    }
}

impl Strategy for RsiMacd {
    fn id(&self) -> &'static str {
        "rsi_macd"
    }

    fn required_timeframes(&self) -> &[TimeFrame] {
        &self.required
    }

    fn evaluate(&self, symbol: &str) -> Option<Signal> {
        let candles = self.store.get_candles(symbol, TimeFrame::Min15);

        let min_len = MACD_SLOW.max(RSI_PERIOD) + 10;
        if candles.len() < min_len {
            return None;
        }

        let close = closes(&candles);
        let high = highs(&candles);
        let low = lows(&candles);
        let volume = volumes(&candles);
        let n = close.len();

        let rsi_values = rsi(&close, RSI_PERIOD);
        let (macd_line, signal_line) = macd(&close, MACD_FAST, MACD_SLOW, MACD_SIGNAL);

        let last_rsi = rsi_values[n - 1];
        let prev_macd = macd_line[n - 2];
        let prev_signal = signal_line[n - 2];
        let curr_macd = macd_line[n - 1];
        let curr_signal = signal_line[n - 1];

        let crossed_up = prev_macd < prev_signal && curr_macd > curr_signal;
        let crossed_down = prev_macd > prev_signal && curr_macd < curr_signal;

        let side = if last_rsi < RSI_OVERSOLD && crossed_up {
            Side::Long
        } else if last_rsi > RSI_OVERBOUGHT && crossed_down {
            Side::Short
        } else {
            return None;
        };

        let entry_price = self.store.get_price(symbol).unwrap_or(close[n - 1]);

        let (sl, tp) = match side {
            Side::Long => {
                let mut sl = low[n - 1];
                if sl >= entry_price {
                    sl = entry_price * (1.0 - STOP_NUDGE);
                }
                let risk = entry_price - sl;
                (sl, entry_price + risk * RR_RATIO)
            }
            Side::Short => {
                let mut sl = high[n - 1];
                if sl <= entry_price {
                    sl = entry_price * (1.0 + STOP_NUDGE);
                }
                let risk = sl - entry_price;
                (sl, entry_price - risk * RR_RATIO)
            }
        };

        let current_vol = volume[n - 1];
        let avg_vol = if n >= 11 {
            volume[n - 11..n - 1].iter().sum::<f64>() / 10.0
        } else {
            0.0
        };
        let spike_ratio = if avg_vol > 0.0 { current_vol / avg_vol } else { 0.0 };

        let signal = Signal {
            symbol: symbol.to_owned(),
            side,
            entry_price: round_dp(entry_price, 6),
            sl_price: round_dp(sl, 6),
            tp_price: round_dp(tp, 6),
            spike_ratio: round_dp(spike_ratio, 4),
            // MACD line and signal values are carried in the EMA slots so
            // the snapshot schema stays uniform across strategies.
            ema_fast_value: round_dp(curr_macd, 6),
            ema_slow_value: round_dp(curr_signal, 6),
            current_volume: round_dp(current_vol, 2),
            avg_volume: round_dp(avg_vol, 2),
            timestamp: Utc::now(),
        };

        info!(
            symbol,
            side = %signal.side,
            entry = signal.entry_price,
            rsi = round_dp(last_rsi, 2),
            "signal generated"
        );
        Some(signal)
    }
}
