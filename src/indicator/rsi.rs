/// Relative strength index with Wilder smoothing.
///
/// The first `period` outputs carry the seed value computed from the
/// simple average gain/loss of the first `period` deltas. A zero loss
/// average yields `rs = 0` and therefore `rsi = 0` — not the
/// conventional 100. This mirrors the behavior the audit records were
/// produced with.
pub fn rsi(series: &[f64], period: usize) -> Vec<f64> {
    let n = series.len();
    let mut out = vec![0.0; n];
    if n < 2 || period == 0 {
        return out;
    }

    let deltas: Vec<f64> = series.windows(2).map(|w| w[1] - w[0]).collect();
    let seed_len = period.min(deltas.len());
    let mut up = deltas[..seed_len]
        .iter()
        .filter(|d| **d >= 0.0)
        .sum::<f64>()
        / period as f64;
    let mut down = -deltas[..seed_len]
        .iter()
        .filter(|d| **d < 0.0)
        .sum::<f64>()
        / period as f64;

    let seed = rsi_value(up, down);
    for value in out.iter_mut().take(period.min(n)) {
        *value = seed;
    }

    for i in period..n {
        let delta = deltas[i - 1];
        let (gain, loss) = if delta > 0.0 { (delta, 0.0) } else { (0.0, -delta) };
        up = (up * (period - 1) as f64 + gain) / period as f64;
        down = (down * (period - 1) as f64 + loss) / period as f64;
        out[i] = rsi_value(up, down);
    }

    out
}

fn rsi_value(up: f64, down: f64) -> f64 {
    let rs = if down == 0.0 { 0.0 } else { up / down };
    100.0 - 100.0 / (1.0 + rs)
}
