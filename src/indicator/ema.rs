/// Exponential moving average with `adjust = false` semantics:
/// `alpha = 2 / (span + 1)`, seeded with the first element.
///
/// Returns one value per input element; empty input yields an empty
/// vector.
pub fn ema(series: &[f64], span: usize) -> Vec<f64> {
    if series.is_empty() || span == 0 {
        return Vec::new();
    }

    let alpha = 2.0 / (span as f64 + 1.0);
    let mut out = Vec::with_capacity(series.len());
    out.push(series[0]);
    for &value in &series[1..] {
        let prev = out[out.len() - 1];
        out.push(alpha * value + (1.0 - alpha) * prev);
    }
    out
}
