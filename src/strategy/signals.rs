use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::CollaboratorError;
use crate::models::{
    CandidateSignal, MarketSnapshot, RankQuality, RankedAsset, RejectedSignal, Side,
    SignalDirection, Trend,
};
use crate::strategy::{AccountSummary, SignalBatch, SignalGenerator};

/// Configuration for signal generation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SignalConfig {
    pub rsi_oversold: f64,
    pub rsi_overbought: f64,
    pub volume_threshold: f64,  // Multiple of average volume
    pub atr_stop_multiple: f64, // Stop distance in ATRs
    pub max_funding_rate: f64,  // Hourly funding the entry side may pay
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            rsi_oversold: 30.0,
            rsi_overbought: 70.0,
            volume_threshold: 1.5,
            atr_stop_multiple: 2.0,
            max_funding_rate: 0.0005, // 0.05% per hour
        }
    }
}

/// Result of checking entry conditions for one side
#[derive(Debug, Clone, PartialEq)]
struct SideConditions {
    met: usize,
    total: usize,
    triggered: bool,
    description: String,
}

/// Rule-based generator over snapshot analytics
///
/// Counts trend, momentum, RSI and volume conditions per side. With volume data
/// 3 of 4 conditions are required; without it all 3 others must hold.
#[derive(Debug, Clone, Default)]
pub struct IndicatorSignalGenerator {
    config: SignalConfig,
}

impl IndicatorSignalGenerator {
    pub fn new(config: SignalConfig) -> Self {
        Self { config }
    }

    fn conditions(&self, snapshot: &MarketSnapshot, side: Side) -> SideConditions {
        let analytics = &snapshot.analytics;
        let (trend_wanted, rsi_ok) = match side {
            Side::Long => (
                Trend::Up,
                analytics.rsi.is_some_and(|r| r < self.config.rsi_overbought),
            ),
            Side::Short => (
                Trend::Down,
                analytics.rsi.is_some_and(|r| r > self.config.rsi_oversold),
            ),
        };

        let trend_ok = analytics.trend_short == Some(trend_wanted);
        let momentum_ok = analytics
            .momentum_pct
            .is_some_and(|m| m * side.sign() > 0.0);

        match analytics.volume_ratio {
            Some(ratio) => {
                let volume_ok = ratio > self.config.volume_threshold;
                let met = [rsi_ok, trend_ok, momentum_ok, volume_ok]
                    .iter()
                    .filter(|&&x| x)
                    .count();
                SideConditions {
                    met,
                    total: 4,
                    triggered: met >= 3,
                    description: format!(
                        "{} conditions: RSI={}, Trend={}, Momentum={}, Vol↑={} ({}/4 met)",
                        side, rsi_ok, trend_ok, momentum_ok, volume_ok, met
                    ),
                }
            }
            None => {
                // No volume data: require all 3 conditions (conservative mode)
                let met = [rsi_ok, trend_ok, momentum_ok].iter().filter(|&&x| x).count();
                SideConditions {
                    met,
                    total: 3,
                    triggered: met == 3,
                    description: format!(
                        "{} (NO VOLUME): RSI={}, Trend={}, Momentum={} ({}/3 met, all required)",
                        side, rsi_ok, trend_ok, momentum_ok, met
                    ),
                }
            }
        }
    }

    fn confidence(conditions: &SideConditions, coverage: f64) -> f64 {
        (0.8 * conditions.met as f64 / conditions.total as f64 + 0.2 * coverage).clamp(0.0, 1.0)
    }

    fn protective_stop(&self, snapshot: &MarketSnapshot, side: Side) -> Option<f64> {
        let atr = snapshot.analytics.atr?;
        let stop = snapshot.price - side.sign() * atr * self.config.atr_stop_multiple;
        (stop > 0.0).then_some(stop)
    }

    fn entry_signal(
        &self,
        snapshot: &MarketSnapshot,
        side: Side,
        direction: SignalDirection,
        conditions: &SideConditions,
    ) -> CandidateSignal {
        let mut signal = CandidateSignal::new(
            snapshot.symbol.clone(),
            direction,
            Self::confidence(conditions, snapshot.analytics.coverage()),
        )
        .with_rationale(conditions.description.clone());
        signal.entry_price = Some(snapshot.price);
        if let Some(stop) = self.protective_stop(snapshot, side) {
            signal = signal.with_stop_loss(stop);
        }
        signal
    }

    /// Funding the entry side would pay, if above the limit
    fn funding_veto(&self, snapshot: &MarketSnapshot, side: Side) -> Option<String> {
        let funding = snapshot.funding_rate?;
        let paid = funding * side.sign();
        (paid > self.config.max_funding_rate).then(|| {
            format!(
                "funding rate {:.4}% > {:.4}% against {}",
                funding * 100.0,
                self.config.max_funding_rate * 100.0,
                side
            )
        })
    }
}

#[async_trait]
impl SignalGenerator for IndicatorSignalGenerator {
    fn name(&self) -> &str {
        "indicator"
    }

    async fn generate(
        &self,
        symbols: &[String],
        market: &HashMap<String, MarketSnapshot>,
        account: &AccountSummary,
        ranking: &[RankedAsset],
    ) -> Result<SignalBatch, CollaboratorError> {
        let mut batch = SignalBatch::default();

        for symbol in symbols {
            let Some(snapshot) = market.get(symbol) else {
                tracing::debug!(symbol = %symbol, "No market data, no signal");
                continue;
            };

            let long = self.conditions(snapshot, Side::Long);
            let short = self.conditions(snapshot, Side::Short);
            let quality = ranking
                .iter()
                .find(|r| &r.symbol == symbol)
                .map(|r| r.quality);

            let wanted = match (long.triggered, short.triggered) {
                (true, false) => Some((Side::Long, &long)),
                (false, true) => Some((Side::Short, &short)),
                _ => None,
            };

            match (account.position(symbol), wanted) {
                (Some(position), Some((side, conditions))) if side == position.side => {
                    // Full agreement on a strong asset scales in, anything less just confirms
                    let direction = if conditions.met == conditions.total
                        && quality == Some(RankQuality::Strong)
                    {
                        SignalDirection::Add
                    } else {
                        SignalDirection::for_side(side)
                    };
                    batch
                        .signals
                        .push(self.entry_signal(snapshot, side, direction, conditions));
                }
                (Some(_), Some((side, conditions))) => {
                    tracing::info!(symbol = %symbol, "{}", conditions.description);
                    batch.signals.push(self.entry_signal(
                        snapshot,
                        side,
                        SignalDirection::for_side(side),
                        conditions,
                    ));
                }
                (Some(_), None) => {
                    batch.signals.push(
                        CandidateSignal::new(symbol.clone(), SignalDirection::Hold, 0.5)
                            .with_rationale("entry conditions not met"),
                    );
                }
                (None, Some((side, conditions))) => {
                    let signal = self.entry_signal(
                        snapshot,
                        side,
                        SignalDirection::for_side(side),
                        conditions,
                    );
                    if let Some(reason) = self.funding_veto(snapshot, side) {
                        tracing::info!(symbol = %symbol, "Signal dropped: {}", reason);
                        batch.rejected.push(RejectedSignal::new(signal, reason));
                    } else {
                        tracing::info!(symbol = %symbol, "{}", conditions.description);
                        batch.signals.push(signal);
                    }
                }
                (None, None) => {
                    tracing::debug!(
                        symbol = %symbol,
                        "HOLD: {} | {}",
                        long.description,
                        short.description
                    );
                }
            }
        }

        Ok(batch)
    }
}
