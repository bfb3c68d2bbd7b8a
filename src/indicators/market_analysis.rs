/// Market structure, key levels and volume analysis
use serde::{Deserialize, Serialize};

use crate::models::Candle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarketStructure {
    HigherHighsHigherLows, // Uptrend
    LowerHighsLowerLows,   // Downtrend
    Mixed,                 // No clear structure
}

/// Classify swing structure of the last `lookback` closes.
///
/// Swing points are local extremes against both neighbours. At least two swing
/// highs and two swing lows are needed, and one side must win by a margin of
/// three or more comparisons.
pub fn analyze_market_structure(candles: &[Candle], lookback: usize) -> MarketStructure {
    if lookback < 4 || candles.len() < lookback {
        return MarketStructure::Mixed;
    }

    let closes: Vec<f64> = candles[candles.len() - lookback..]
        .iter()
        .map(|c| c.close)
        .collect();

    let mut swing_highs = Vec::new();
    let mut swing_lows = Vec::new();
    for w in closes.windows(3) {
        if w[1] > w[0] && w[1] > w[2] {
            swing_highs.push(w[1]);
        } else if w[1] < w[0] && w[1] < w[2] {
            swing_lows.push(w[1]);
        }
    }

    if swing_highs.len() < 2 || swing_lows.len() < 2 {
        return MarketStructure::Mixed;
    }

    let rising = |points: &[f64]| points.windows(2).filter(|w| w[1] > w[0]).count();
    let up = rising(&swing_highs) + rising(&swing_lows);
    let down = (swing_highs.len() - 1) + (swing_lows.len() - 1) - up;

    if up > down && up >= 3 {
        MarketStructure::HigherHighsHigherLows
    } else if down > up && down >= 3 {
        MarketStructure::LowerHighsLowerLows
    } else {
        MarketStructure::Mixed
    }
}

/// Lowest low and highest high of the `lookback` candles before the latest one
pub fn support_resistance(candles: &[Candle], lookback: usize) -> Option<(f64, f64)> {
    if lookback == 0 || candles.len() < lookback + 1 {
        return None;
    }

    let window = &candles[candles.len() - lookback - 1..candles.len() - 1];
    let support = window.iter().map(|c| c.low).fold(f64::INFINITY, f64::min);
    let resistance = window
        .iter()
        .map(|c| c.high)
        .fold(f64::NEG_INFINITY, f64::max);

    Some((support, resistance))
}

/// Latest volume relative to the average of the `lookback` candles before it
pub fn volume_ratio(candles: &[Candle], lookback: usize) -> Option<f64> {
    if lookback == 0 || candles.len() < lookback + 1 {
        return None;
    }

    let current = candles[candles.len() - 1].volume;
    let window = &candles[candles.len() - lookback - 1..candles.len() - 1];
    let average = window.iter().map(|c| c.volume).sum::<f64>() / lookback as f64;

    if average <= 0.0 {
        // No usable volume history (e.g. backfilled data with zero volume)
        return None;
    }

    Some(current / average)
}

/// Percent change of the close over the last `bars` candles
pub fn percent_change(candles: &[Candle], bars: usize) -> Option<f64> {
    if bars == 0 || candles.len() < bars + 1 {
        return None;
    }

    let last = candles[candles.len() - 1].close;
    let base = candles[candles.len() - 1 - bars].close;
    if base <= 0.0 {
        return None;
    }

    Some((last - base) / base * 100.0)
}
