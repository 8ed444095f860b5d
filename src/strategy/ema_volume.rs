use std::sync::Arc;

use chrono::Utc;
use tracing::info;

use crate::config::{RiskConfig, StrategyConfig};
use crate::indicator::ema::ema;
use crate::indicator::{closes, volumes};
use crate::model::{Side, Signal, TimeFrame, round_dp};
use crate::store::MemoryStore;
use crate::strategy::Strategy;

/// Candles needed beyond the slow EMA span before trend values are
/// considered settled.
const MIN_1M_FLOOR: usize = 50;
/// Volume baseline width: the last closed bar is compared against the
/// mean of the 10 bars before it.
const VOLUME_BASELINE: usize = 10;

/// EMA trend + 5m range breakout + volume spike.
///
/// LONG when the last 1m close breaks above the recent 5m high with the
/// fast EMA above the slow one; SHORT mirrored. Both gated by the
/// volume spike band.
pub struct EmaVolume {
    store: Arc<MemoryStore>,
    ema_fast: usize,
    ema_slow: usize,
    volume_spike_min: f64,
    volume_spike_max: f64,
    breakout_range_period: usize,
    rr_ratio: f64,
    max_stop_percent: f64,
    stop_offset: f64,
    required: [TimeFrame; 2],
}

impl EmaVolume {
    pub fn new(strategy: &StrategyConfig, risk: &RiskConfig, store: Arc<MemoryStore>) -> Self {
        Self {
            store,
            ema_fast: strategy.ema_fast,
            ema_slow: strategy.ema_slow,
            volume_spike_min: strategy.volume_spike_min,
            volume_spike_max: strategy.volume_spike_max,
            breakout_range_period: strategy.breakout_range_period,
            rr_ratio: risk.rr_ratio,
            max_stop_percent: risk.max_stop_percent,
            stop_offset: risk.stop_offset,
            required: [TimeFrame::Min1, TimeFrame::Min5],
        }
    }
}

impl Strategy for EmaVolume {
    fn id(&self) -> &'static str {
        "ema_volume"
    }

    fn required_timeframes(&self) -> &[TimeFrame] {
        &self.required
    }

    fn evaluate(&self, symbol: &str) -> Option<Signal> {
        let candles_1m = self.store.get_candles(symbol, TimeFrame::Min1);
        let candles_5m = self.store.get_candles(symbol, TimeFrame::Min5);

        let min_1m = (self.ema_slow + 10).max(MIN_1M_FLOOR);
        let min_5m = self.breakout_range_period + 1;
        if candles_1m.len() < min_1m || candles_5m.len() < min_5m {
            return None;
        }

        let close_1m = closes(&candles_1m);
        let volume_1m = volumes(&candles_1m);

        let ema_f = ema(&close_1m, self.ema_fast);
        let ema_s = ema(&close_1m, self.ema_slow);
        let last_close = close_1m[close_1m.len() - 1];
        let last_ema_f = ema_f[ema_f.len() - 1];
        let last_ema_s = ema_s[ema_s.len() - 1];

        // Breakout range over the last N closed 5m bars; the final
        // element is the still-forming bar and is deliberately left out.
        let n5 = candles_5m.len();
        let range = &candles_5m[n5 - (self.breakout_range_period + 1)..n5 - 1];
        let r_high = range.iter().map(|c| c.high).fold(f64::MIN, f64::max);
        let r_low = range.iter().map(|c| c.low).fold(f64::MAX, f64::min);

        // Volume spike: last bar against the mean of the 10 before it.
        let n1 = volume_1m.len();
        if n1 < VOLUME_BASELINE + 1 {
            return None;
        }
        let current_vol = volume_1m[n1 - 1];
        let avg_vol =
            volume_1m[n1 - VOLUME_BASELINE - 1..n1 - 1].iter().sum::<f64>() / VOLUME_BASELINE as f64;
        if avg_vol <= 0.0 {
            return None;
        }
        let spike_ratio = current_vol / avg_vol;
        if !(self.volume_spike_min..=self.volume_spike_max).contains(&spike_ratio) {
            return None;
        }

        let side = if last_close > r_high && last_ema_f > last_ema_s {
            Side::Long
        } else if last_close < r_low && last_ema_f < last_ema_s {
            Side::Short
        } else {
            return None;
        };

        let (sl, tp) = match side {
            Side::Long => {
                let sl = (r_low * (1.0 - self.stop_offset))
                    .max(last_close * (1.0 - self.max_stop_percent));
                (sl, last_close + (last_close - sl) * self.rr_ratio)
            }
            Side::Short => {
                let sl = (r_high * (1.0 + self.stop_offset))
                    .min(last_close * (1.0 + self.max_stop_percent));
                (sl, last_close - (sl - last_close) * self.rr_ratio)
            }
        };

        let signal = Signal {
            symbol: symbol.to_owned(),
            side,
            entry_price: round_dp(last_close, 6),
            sl_price: round_dp(sl, 6),
            tp_price: round_dp(tp, 6),
            spike_ratio: round_dp(spike_ratio, 4),
            ema_fast_value: round_dp(last_ema_f, 6),
            ema_slow_value: round_dp(last_ema_s, 6),
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
