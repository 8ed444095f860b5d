use crate::indicator::ema::ema;

/// MACD line and signal line over a close series.
///
/// `macd_line = ema(series, fast) - ema(series, slow)`;
/// `signal_line = ema(macd_line, signal)`. Both outputs have the same
/// length as the input.
pub fn macd(series: &[f64], fast: usize, slow: usize, signal: usize) -> (Vec<f64>, Vec<f64>) {
    let ema_fast = ema(series, fast);
    let ema_slow = ema(series, slow);
    let macd_line: Vec<f64> = ema_fast
        .iter()
        .zip(&ema_slow)
        .map(|(f, s)| f - s)
        .collect();
    let signal_line = ema(&macd_line, signal);
    (macd_line, signal_line)
}
