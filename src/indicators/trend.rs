use crate::models::Trend;

/// Simple Moving Average of the last `period` values
pub fn calculate_sma(values: &[f64], period: usize) -> Option<f64> {
    if period == 0 || values.len() < period {
        return None;
    }

    let window = &values[values.len() - period..];
    Some(window.iter().sum::<f64>() / period as f64)
}

/// Exponential Moving Average, seeded with the SMA of the first `period` values
pub fn calculate_ema(values: &[f64], period: usize) -> Option<f64> {
    if period == 0 || values.len() < period {
        return None;
    }

    let alpha = 2.0 / (period as f64 + 1.0);
    let seed = values[..period].iter().sum::<f64>() / period as f64;

    Some(
        values[period..]
            .iter()
            .fold(seed, |ema, value| ema + alpha * (value - ema)),
    )
}

/// Classify trend from price stacked against a fast and a slow EMA.
///
/// Up when price > fast > slow, Down when price < fast < slow, Flat otherwise.
pub fn classify_trend(closes: &[f64], fast: usize, slow: usize) -> Option<Trend> {
    let price = *closes.last()?;
    let fast_ema = calculate_ema(closes, fast)?;
    let slow_ema = calculate_ema(closes, slow)?;

    let trend = if price > fast_ema && fast_ema > slow_ema {
        Trend::Up
    } else if price < fast_ema && fast_ema < slow_ema {
        Trend::Down
    } else {
        Trend::Flat
    };

    Some(trend)
}
