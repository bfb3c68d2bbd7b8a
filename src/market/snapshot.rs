use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::indicators::{
    analyze_market_structure, calculate_atr, calculate_rsi, classify_trend, percent_change,
    support_resistance, volume_ratio,
};
use crate::models::{Candle, MarketAnalytics, MarketSnapshot};

/// Indicator windows used to derive snapshot analytics
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AnalyticsConfig {
    pub short_interval: String, // Candle interval for the short timeframe
    pub long_interval: String,
    pub candle_count: usize, // Candles requested per timeframe
    pub rsi_period: usize,
    pub trend_fast: usize,
    pub trend_slow: usize,
    pub momentum_bars: usize,
    pub chase_bars: usize,
    pub volume_lookback: usize,
    pub level_lookback: usize,
    pub structure_lookback: usize,
    pub atr_period: usize,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            short_interval: "15m".to_string(),
            long_interval: "4h".to_string(),
            candle_count: 100,
            rsi_period: 14,
            trend_fast: 20,
            trend_slow: 50,
            momentum_bars: 4,   // 1 hour at 15m
            chase_bars: 16,     // 4 hours at 15m
            volume_lookback: 20,
            level_lookback: 48, // 12 hours at 15m
            structure_lookback: 30,
            atr_period: 14,
        }
    }
}

/// Per-asset market context reported by the exchange
#[derive(Debug, Clone, PartialEq)]
pub struct AssetContext {
    pub symbol: String,
    pub mark_price: f64,
    pub prev_day_price: Option<f64>,
    pub day_notional_volume: f64,
    pub funding_rate: Option<f64>,
    pub open_interest: Option<f64>,
    pub max_leverage: Option<f64>,
}

/// Derive analytics from short and long timeframe candles (oldest first).
///
/// Any indicator without enough history is left as None.
pub fn build_analytics(
    short: &[Candle],
    long: &[Candle],
    config: &AnalyticsConfig,
) -> MarketAnalytics {
    let short_closes: Vec<f64> = short.iter().map(|c| c.close).collect();
    let long_closes: Vec<f64> = long.iter().map(|c| c.close).collect();

    let (support, resistance) = match support_resistance(short, config.level_lookback) {
        Some((s, r)) => (Some(s), Some(r)),
        None => (None, None),
    };

    let structure = (short.len() >= config.structure_lookback)
        .then(|| analyze_market_structure(short, config.structure_lookback));

    MarketAnalytics {
        rsi: calculate_rsi(&short_closes, config.rsi_period),
        trend_short: classify_trend(&short_closes, config.trend_fast, config.trend_slow),
        trend_long: classify_trend(&long_closes, config.trend_fast, config.trend_slow),
        momentum_pct: percent_change(short, config.momentum_bars),
        recent_move_pct: percent_change(short, config.chase_bars),
        volume_ratio: volume_ratio(short, config.volume_lookback),
        support,
        resistance,
        structure,
        atr: calculate_atr(short, config.atr_period),
    }
}

/// Assemble a snapshot from the exchange context and candle history.
///
/// Returns None when the mark price is not a positive number.
pub fn build_snapshot(
    context: &AssetContext,
    short: &[Candle],
    long: &[Candle],
    config: &AnalyticsConfig,
    now: DateTime<Utc>,
) -> Option<MarketSnapshot> {
    if !context.mark_price.is_finite() || context.mark_price <= 0.0 {
        return None;
    }

    let change_24h_pct = match context.prev_day_price {
        Some(prev) if prev > 0.0 => (context.mark_price - prev) / prev * 100.0,
        _ => 0.0,
    };

    Some(MarketSnapshot {
        symbol: context.symbol.clone(),
        price: context.mark_price,
        timestamp: now,
        volume_24h: context.day_notional_volume,
        change_24h_pct,
        funding_rate: context.funding_rate,
        open_interest: context.open_interest,
        analytics: build_analytics(short, long, config),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Trend;
    use chrono::Duration;

    fn rising_candles(count: usize, start: f64) -> Vec<Candle> {
        let t0 = Utc::now() - Duration::minutes(15 * count as i64);
        (0..count)
            .map(|i| {
                let close = start + i as f64;
                Candle {
                    symbol: "BTC".to_string(),
                    timestamp: t0 + Duration::minutes(15 * i as i64),
                    open: close - 0.5,
                    high: close + 1.0,
                    low: close - 1.0,
                    close,
                    volume: 1000.0,
                }
            })
            .collect()
    }

    fn context(mark: f64, prev: Option<f64>) -> AssetContext {
        AssetContext {
            symbol: "BTC".to_string(),
            mark_price: mark,
            prev_day_price: prev,
            day_notional_volume: 5_000_000.0,
            funding_rate: Some(0.0001),
            open_interest: Some(1200.0),
            max_leverage: Some(50.0),
        }
    }

    #[test]
    fn test_full_history_populates_analytics() {
        let short = rising_candles(100, 100.0);
        let long = rising_candles(100, 50.0);

        let analytics = build_analytics(&short, &long, &AnalyticsConfig::default());
        assert_eq!(analytics.trend_short, Some(Trend::Up));
        assert_eq!(analytics.trend_long, Some(Trend::Up));
        assert_eq!(analytics.rsi, Some(100.0));
        assert_eq!(analytics.volume_ratio, Some(1.0));
        assert!(analytics.momentum_pct.unwrap() > 0.0);
        assert!(analytics.atr.is_some());
        assert!(analytics.structure.is_some());
    }

    #[test]
    fn test_short_history_leaves_gaps() {
        let short = rising_candles(10, 100.0);

        let analytics = build_analytics(&short, &[], &AnalyticsConfig::default());
        assert!(analytics.trend_short.is_none());
        assert!(analytics.trend_long.is_none());
        assert!(analytics.structure.is_none());
        assert!(analytics.support.is_none());
        assert!(analytics.momentum_pct.is_some());
        assert!(analytics.coverage() < 0.5);
    }

    #[test]
    fn test_snapshot_change_24h() {
        let snapshot = build_snapshot(
            &context(110.0, Some(100.0)),
            &[],
            &[],
            &AnalyticsConfig::default(),
            Utc::now(),
        )
        .unwrap();
        assert!((snapshot.change_24h_pct - 10.0).abs() < 1e-9);
        assert_eq!(snapshot.funding_rate, Some(0.0001));

        let snapshot = build_snapshot(
            &context(110.0, None),
            &[],
            &[],
            &AnalyticsConfig::default(),
            Utc::now(),
        )
        .unwrap();
        assert_eq!(snapshot.change_24h_pct, 0.0);
    }

    #[test]
    fn test_snapshot_requires_positive_mark() {
        let config = AnalyticsConfig::default();
        let now = Utc::now();
        assert!(build_snapshot(&context(0.0, Some(100.0)), &[], &[], &config, now).is_none());
        assert!(build_snapshot(&context(-1.0, None), &[], &[], &config, now).is_none());
    }
}
