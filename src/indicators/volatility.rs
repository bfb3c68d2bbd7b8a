/// Average True Range (Wilder smoothing)
///
/// True Range is the greatest of:
/// - high - low
/// - |high - previous close|
/// - |low - previous close|
use crate::models::Candle;

fn true_range(candle: &Candle, prev_close: f64) -> f64 {
    (candle.high - candle.low)
        .max((candle.high - prev_close).abs())
        .max((candle.low - prev_close).abs())
}

/// Current ATR, or None if there are fewer than `period + 1` candles
pub fn calculate_atr(candles: &[Candle], period: usize) -> Option<f64> {
    if period == 0 || candles.len() < period + 1 {
        return None;
    }

    let ranges: Vec<f64> = candles
        .windows(2)
        .map(|w| true_range(&w[1], w[0].close))
        .collect();

    let n = period as f64;
    let seed = ranges[..period].iter().sum::<f64>() / n;
    Some(
        ranges[period..]
            .iter()
            .fold(seed, |atr, tr| (atr * (n - 1.0) + tr) / n),
    )
}
