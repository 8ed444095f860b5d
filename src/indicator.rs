pub mod atr;
pub mod ema;
pub mod macd;
pub mod rsi;

use crate::model::Candle;

/// Extract close prices from a slice of candles.
pub fn closes(candles: &[Candle]) -> Vec<f64> {
    candles.iter().map(|c| c.close).collect()
}

/// Extract highs from a slice of candles.
pub fn highs(candles: &[Candle]) -> Vec<f64> {
    candles.iter().map(|c| c.high).collect()
}

/// Extract lows from a slice of candles.
pub fn lows(candles: &[Candle]) -> Vec<f64> {
    candles.iter().map(|c| c.low).collect()
}

/// Extract volumes from a slice of candles.
pub fn volumes(candles: &[Candle]) -> Vec<f64> {
    candles.iter().map(|c| c.volume).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn column_helpers_extract_in_order() {
        let candles = vec![
            Candle {
                ts: 0,
                open: 1.0,
                high: 2.0,
                low: 0.5,
                close: 1.5,
                volume: 10.0,
            },
            Candle {
                ts: 60_000,
                open: 1.5,
                high: 3.0,
                low: 1.0,
                close: 2.5,
                volume: 20.0,
            },
        ];
        assert_eq!(closes(&candles), vec![1.5, 2.5]);
        assert_eq!(highs(&candles), vec![2.0, 3.0]);
        assert_eq!(lows(&candles), vec![0.5, 1.0]);
        assert_eq!(volumes(&candles), vec![10.0, 20.0]);
    }
}
