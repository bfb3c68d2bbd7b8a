use serde::{Deserialize, Serialize};

use crate::indicators::MarketStructure;
use crate::models::{
    CandidateSignal, ExitReason, MarketSnapshot, Position, RankedAsset, Side, Trend,
};

/// Scale-out level: close `exit_pct` of the position once it is `gain_pct` in profit
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct TakeProfitTier {
    pub gain_pct: f64,
    pub exit_pct: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExitConfig {
    pub default_stop_loss_pct: f64,
    pub take_profit_tiers: Vec<TakeProfitTier>,
    pub trailing_activation_pct: f64,
    pub trailing_distance_pct: f64,
    pub reversal_min_confidence: f64,
    pub ranking_top_n: usize,
    pub ranking_drop_cycles: u32,
    pub rsi_exit_high: f64, // Adverse RSI for shorts
    pub rsi_exit_low: f64,  // Adverse RSI for longs
}

impl Default for ExitConfig {
    fn default() -> Self {
        Self {
            default_stop_loss_pct: 8.0, // -8% from (average) entry
            take_profit_tiers: vec![
                TakeProfitTier {
                    gain_pct: 5.0,
                    exit_pct: 25.0,
                },
                TakeProfitTier {
                    gain_pct: 10.0,
                    exit_pct: 50.0,
                },
            ],
            trailing_activation_pct: 12.0, // Trailing stop arms at +12%
            trailing_distance_pct: 5.0,    // ...and trails 5% behind the extreme
            reversal_min_confidence: 0.70,
            ranking_top_n: 10,
            ranking_drop_cycles: 3,
            rsi_exit_high: 70.0,
            rsi_exit_low: 30.0,
        }
    }
}

/// Exit conditions in priority order. Capital protection comes first.
pub const EXIT_PRIORITY: [ExitReason; 6] = [
    ExitReason::StopLoss,
    ExitReason::TakeProfit,
    ExitReason::TrailingStop,
    ExitReason::SignalReversal,
    ExitReason::RankingDrop,
    ExitReason::IndicatorExit,
];

/// What the evaluator sees for one position this cycle
#[derive(Debug, Clone, Copy)]
pub struct ExitInputs<'a> {
    pub price: f64,
    pub signal: Option<&'a CandidateSignal>,
    pub ranking: Option<&'a [RankedAsset]>, // None when ranking failed this cycle
    pub snapshot: Option<&'a MarketSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExitDecision {
    pub symbol: String,
    pub side: Side,
    pub exit_pct: f64, // 0 < exit_pct <= 100
    pub reason: ExitReason,
    pub trigger_price: f64,
    pub description: String,
    pub tier: Option<usize>, // Take-profit tier index, for partial scale-outs
}

impl ExitDecision {
    pub fn is_full_exit(&self) -> bool {
        self.exit_pct >= 100.0
    }
}

/// True when `symbol` is within the first `top_n` ranked assets
pub fn in_top_n(ranking: &[RankedAsset], symbol: &str, top_n: usize) -> bool {
    ranking.iter().take(top_n).any(|r| r.symbol == symbol)
}

/// Stateless exit state machine. Everything it needs lives on the position or in the inputs.
#[derive(Debug, Clone, Default)]
pub struct ExitEvaluator {
    config: ExitConfig,
}

impl ExitEvaluator {
    pub fn new(config: ExitConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ExitConfig {
        &self.config
    }

    /// First matching exit condition in priority order, or None to keep holding
    pub fn evaluate(&self, position: &Position, inputs: &ExitInputs<'_>) -> Option<ExitDecision> {
        if !inputs.price.is_finite() || inputs.price <= 0.0 {
            return None;
        }

        EXIT_PRIORITY
            .iter()
            .find_map(|reason| self.check(*reason, position, inputs))
    }

    /// Every condition that currently holds, in priority order (audit trail)
    pub fn triggered(&self, position: &Position, inputs: &ExitInputs<'_>) -> Vec<ExitReason> {
        if !inputs.price.is_finite() || inputs.price <= 0.0 {
            return Vec::new();
        }

        EXIT_PRIORITY
            .iter()
            .filter(|reason| self.check(**reason, position, inputs).is_some())
            .copied()
            .collect()
    }

    fn check(
        &self,
        reason: ExitReason,
        position: &Position,
        inputs: &ExitInputs<'_>,
    ) -> Option<ExitDecision> {
        match reason {
            ExitReason::StopLoss => self.stop_loss(position, inputs.price),
            ExitReason::TakeProfit => self.take_profit(position, inputs.price),
            ExitReason::TrailingStop => self.trailing_stop(position, inputs.price),
            ExitReason::SignalReversal => self.signal_reversal(position, inputs),
            ExitReason::RankingDrop => self.ranking_drop(position, inputs),
            ExitReason::IndicatorExit => self.indicator_exit(position, inputs),
            ExitReason::ExternalClose => None,
        }
    }

    fn full_exit(
        position: &Position,
        reason: ExitReason,
        price: f64,
        description: String,
    ) -> ExitDecision {
        ExitDecision {
            symbol: position.symbol.clone(),
            side: position.side,
            exit_pct: 100.0,
            reason,
            trigger_price: price,
            description,
            tier: None,
        }
    }

    pub fn effective_stop(&self, position: &Position) -> f64 {
        position.stop_loss.unwrap_or_else(|| {
            position.entry_price
                * (1.0 - self.config.default_stop_loss_pct / 100.0 * position.side.sign())
        })
    }

    fn stop_loss(&self, position: &Position, price: f64) -> Option<ExitDecision> {
        let stop = self.effective_stop(position);
        let breached = match position.side {
            Side::Long => price <= stop,
            Side::Short => price >= stop,
        };

        breached.then(|| {
            Self::full_exit(
                position,
                ExitReason::StopLoss,
                price,
                format!("price {:.4} breached stop {:.4}", price, stop),
            )
        })
    }

    fn take_profit(&self, position: &Position, price: f64) -> Option<ExitDecision> {
        if let Some(target) = position.take_profit {
            let reached = match position.side {
                Side::Long => price >= target,
                Side::Short => price <= target,
            };
            return reached.then(|| {
                Self::full_exit(
                    position,
                    ExitReason::TakeProfit,
                    price,
                    format!("price {:.4} reached target {:.4}", price, target),
                )
            });
        }

        let index = position.tp_tiers_taken;
        let tier = self.config.take_profit_tiers.get(index)?;
        let gain = position.favorable_move_pct(price);
        if gain < tier.gain_pct {
            return None;
        }

        Some(ExitDecision {
            symbol: position.symbol.clone(),
            side: position.side,
            exit_pct: tier.exit_pct.min(100.0),
            reason: ExitReason::TakeProfit,
            trigger_price: price,
            description: format!(
                "tier {} reached: +{:.2}% >= +{:.2}%, closing {:.0}%",
                index + 1,
                gain,
                tier.gain_pct,
                tier.exit_pct
            ),
            tier: Some(index),
        })
    }

    fn trailing_stop(&self, position: &Position, price: f64) -> Option<ExitDecision> {
        let extreme = match position.side {
            Side::Long => position.trailing_extreme.max(price),
            Side::Short => position.trailing_extreme.min(price),
        };

        // Not armed until the best excursion reached the activation level
        if position.favorable_move_pct(extreme) < self.config.trailing_activation_pct {
            return None;
        }

        let retrace_pct = (extreme - price) / extreme * 100.0 * position.side.sign();
        (retrace_pct >= self.config.trailing_distance_pct).then(|| {
            Self::full_exit(
                position,
                ExitReason::TrailingStop,
                price,
                format!("retraced {:.2}% from extreme {:.4}", retrace_pct, extreme),
            )
        })
    }

    fn signal_reversal(
        &self,
        position: &Position,
        inputs: &ExitInputs<'_>,
    ) -> Option<ExitDecision> {
        let signal = inputs.signal?;
        if signal.direction.entry_side() != Some(position.side.opposite()) {
            return None;
        }
        if !signal.has_valid_confidence() || signal.confidence < self.config.reversal_min_confidence
        {
            return None;
        }

        Some(Self::full_exit(
            position,
            ExitReason::SignalReversal,
            inputs.price,
            format!(
                "{} signal at {:.0}% confidence",
                position.side.opposite(),
                signal.confidence * 100.0
            ),
        ))
    }

    fn ranking_drop(&self, position: &Position, inputs: &ExitInputs<'_>) -> Option<ExitDecision> {
        let ranking = inputs.ranking?;
        if self.config.ranking_drop_cycles == 0
            || in_top_n(ranking, &position.symbol, self.config.ranking_top_n)
        {
            return None;
        }
        if position.rank_miss_cycles < self.config.ranking_drop_cycles {
            return None;
        }

        Some(Self::full_exit(
            position,
            ExitReason::RankingDrop,
            inputs.price,
            format!(
                "outside top {} for {} cycles",
                self.config.ranking_top_n, position.rank_miss_cycles
            ),
        ))
    }

    fn indicator_exit(&self, position: &Position, inputs: &ExitInputs<'_>) -> Option<ExitDecision> {
        let analytics = &inputs.snapshot?.analytics;
        let rsi = analytics.rsi?;
        let price = inputs.price;

        let adverse_rsi = match position.side {
            Side::Long => rsi <= self.config.rsi_exit_low,
            Side::Short => rsi >= self.config.rsi_exit_high,
        };
        if !adverse_rsi {
            return None;
        }

        let structure_break = match position.side {
            Side::Long => {
                analytics.support.is_some_and(|s| price < s)
                    || analytics.structure == Some(MarketStructure::LowerHighsLowerLows)
                    || analytics.trend_short == Some(Trend::Down)
            }
            Side::Short => {
                analytics.resistance.is_some_and(|r| price > r)
                    || analytics.structure == Some(MarketStructure::HigherHighsHigherLows)
                    || analytics.trend_short == Some(Trend::Up)
            }
        };

        structure_break.then(|| {
            Self::full_exit(
                position,
                ExitReason::IndicatorExit,
                price,
                format!("RSI {:.1} with structural break", rsi),
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MarketAnalytics, RankQuality, SignalDirection};
    use chrono::Utc;

    fn long_at(entry: f64) -> Position {
        Position::open("BTC", Side::Long, 1.0, entry, 1.0, None, None, Utc::now())
    }

    fn at_price(price: f64) -> ExitInputs<'static> {
        ExitInputs {
            price,
            signal: None,
            ranking: None,
            snapshot: None,
        }
    }

    fn ranked(symbols: &[&str]) -> Vec<RankedAsset> {
        symbols
            .iter()
            .map(|s| RankedAsset {
                symbol: s.to_string(),
                score: 1.0,
                quality: RankQuality::Moderate,
                indicator_coverage: 1.0,
            })
            .collect()
    }

    #[test]
    fn test_hold_inside_range() {
        let evaluator = ExitEvaluator::default();
        assert!(evaluator.evaluate(&long_at(100.0), &at_price(101.0)).is_none());
    }

    #[test]
    fn test_default_stop_loss() {
        let evaluator = ExitEvaluator::default();
        let position = long_at(100.0);

        // -8% stop at 92
        assert!(evaluator.evaluate(&position, &at_price(92.5)).is_none());
        let decision = evaluator.evaluate(&position, &at_price(91.0)).unwrap();
        assert_eq!(decision.reason, ExitReason::StopLoss);
        assert!(decision.is_full_exit());
    }

    #[test]
    fn test_short_stop_loss_is_above_entry() {
        let evaluator = ExitEvaluator::default();
        let position = Position::open("ETH", Side::Short, 1.0, 100.0, 1.0, None, None, Utc::now());

        assert!((evaluator.effective_stop(&position) - 108.0).abs() < 1e-9);
        let decision = evaluator.evaluate(&position, &at_price(109.0)).unwrap();
        assert_eq!(decision.reason, ExitReason::StopLoss);
    }

    #[test]
    fn test_stop_loss_wins_tie_with_take_profit() {
        let evaluator = ExitEvaluator::default();
        // Misconfigured levels: both trigger at 100
        let position =
            Position::open("BTC", Side::Long, 1.0, 100.0, 1.0, Some(101.0), Some(99.0), Utc::now());

        let decision = evaluator.evaluate(&position, &at_price(100.0)).unwrap();
        assert_eq!(decision.reason, ExitReason::StopLoss);
        assert_eq!(
            evaluator.triggered(&position, &at_price(100.0)),
            vec![ExitReason::StopLoss, ExitReason::TakeProfit]
        );
    }

    #[test]
    fn test_take_profit_tiers_scale_out() {
        let evaluator = ExitEvaluator::default();
        let mut position = long_at(100.0);

        let decision = evaluator.evaluate(&position, &at_price(106.0)).unwrap();
        assert_eq!(decision.reason, ExitReason::TakeProfit);
        assert_eq!(decision.exit_pct, 25.0);
        assert_eq!(decision.tier, Some(0));

        // First tier already taken, second needs +10%
        position.tp_tiers_taken = 1;
        assert!(evaluator.evaluate(&position, &at_price(106.0)).is_none());
        let decision = evaluator.evaluate(&position, &at_price(111.0)).unwrap();
        assert_eq!(decision.exit_pct, 50.0);
        assert_eq!(decision.tier, Some(1));
    }

    #[test]
    fn test_trailing_stop() {
        let evaluator = ExitEvaluator::default();
        let mut position = long_at(100.0);
        position.tp_tiers_taken = 2;

        // +15% arms the trail at 5% below 115 = 109.25
        position.mark_price(115.0);
        assert!(evaluator.evaluate(&position, &at_price(112.0)).is_none());

        let decision = evaluator.evaluate(&position, &at_price(109.0)).unwrap();
        assert_eq!(decision.reason, ExitReason::TrailingStop);
    }

    #[test]
    fn test_trailing_not_armed_below_activation() {
        let evaluator = ExitEvaluator::default();
        let mut position = long_at(100.0);
        position.tp_tiers_taken = 2;
        position.mark_price(110.0);

        // 6% retrace but the trail never armed (+10% < +12%)
        assert!(evaluator.evaluate(&position, &at_price(103.4)).is_none());
    }

    #[test]
    fn test_signal_reversal_needs_confidence() {
        let evaluator = ExitEvaluator::default();
        let position = long_at(100.0);

        let weak = CandidateSignal::new("BTC", SignalDirection::EnterShort, 0.65);
        let inputs = ExitInputs {
            signal: Some(&weak),
            ..at_price(100.0)
        };
        assert!(evaluator.evaluate(&position, &inputs).is_none());

        let strong = CandidateSignal::new("BTC", SignalDirection::EnterShort, 0.8);
        let inputs = ExitInputs {
            signal: Some(&strong),
            ..at_price(100.0)
        };
        let decision = evaluator.evaluate(&position, &inputs).unwrap();
        assert_eq!(decision.reason, ExitReason::SignalReversal);

        // Same-direction signal is not a reversal
        let same = CandidateSignal::new("BTC", SignalDirection::EnterLong, 0.9);
        let inputs = ExitInputs {
            signal: Some(&same),
            ..at_price(100.0)
        };
        assert!(evaluator.evaluate(&position, &inputs).is_none());
    }

    #[test]
    fn test_ranking_drop_requires_confirming_cycles() {
        let evaluator = ExitEvaluator::default();
        let mut position = long_at(100.0);
        let ranking = ranked(&["ETH", "SOL"]);

        position.rank_miss_cycles = 2;
        let inputs = ExitInputs {
            ranking: Some(&ranking),
            ..at_price(100.0)
        };
        assert!(evaluator.evaluate(&position, &inputs).is_none());

        position.rank_miss_cycles = 3;
        let decision = evaluator.evaluate(&position, &inputs).unwrap();
        assert_eq!(decision.reason, ExitReason::RankingDrop);

        // Unknown ranking never triggers
        assert!(evaluator.evaluate(&position, &at_price(100.0)).is_none());
    }

    #[test]
    fn test_indicator_exit_needs_structure_break() {
        let evaluator = ExitEvaluator::default();
        let position = long_at(100.0);

        let oversold_only = MarketSnapshot::new("BTC", 97.0, Utc::now()).with_analytics(
            MarketAnalytics {
                rsi: Some(25.0),
                ..Default::default()
            },
        );
        let inputs = ExitInputs {
            snapshot: Some(&oversold_only),
            ..at_price(97.0)
        };
        assert!(evaluator.evaluate(&position, &inputs).is_none());

        let breakdown = MarketSnapshot::new("BTC", 97.0, Utc::now()).with_analytics(
            MarketAnalytics {
                rsi: Some(25.0),
                support: Some(98.0),
                ..Default::default()
            },
        );
        let inputs = ExitInputs {
            snapshot: Some(&breakdown),
            ..at_price(97.0)
        };
        let decision = evaluator.evaluate(&position, &inputs).unwrap();
        assert_eq!(decision.reason, ExitReason::IndicatorExit);
    }
}
