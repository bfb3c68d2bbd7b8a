use serde::{Deserialize, Serialize};

use crate::models::{MarketSnapshot, Side, Trend};

/// Veto thresholds for the pre-trade heuristics
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GuardConfig {
    pub momentum_veto_pct: f64,     // Short-term move against the entry
    pub chase_move_pct: f64,        // Recent move in the entry direction
    pub chase_volume_ratio: f64,    // ...combined with a volume spike
    pub min_level_distance_pct: f64, // Room to the next resistance/support
    pub rsi_overbought: f64,
    pub rsi_oversold: f64,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            momentum_veto_pct: 2.0,
            chase_move_pct: 5.0,
            chase_volume_ratio: 2.0,
            min_level_distance_pct: 0.5,
            rsi_overbought: 75.0,
            rsi_oversold: 25.0,
        }
    }
}

/// Result of a single heuristic
#[derive(Debug, Clone, PartialEq)]
pub enum RuleOutcome {
    Pass,
    Veto(String),
    NoData, // Required analytics missing: fail open
}

type GuardRule = fn(&GuardConfig, Side, &MarketSnapshot) -> RuleOutcome;

/// Rules run in this order; every rule runs so all reasons are reported
const RULES: [(&str, GuardRule); 5] = [
    ("trend_alignment", trend_alignment),
    ("momentum", momentum),
    ("chasing", chasing),
    ("level_proximity", level_proximity),
    ("rsi_extreme", rsi_extreme),
];

#[derive(Debug, Clone, PartialEq, Default)]
pub struct GuardVerdict {
    pub vetoes: Vec<(String, String)>, // (rule, reason)
    pub skipped: Vec<String>,          // Rules without data
}

impl GuardVerdict {
    pub fn allowed(&self) -> bool {
        self.vetoes.is_empty()
    }

    pub fn reasons(&self) -> Vec<String> {
        self.vetoes.iter().map(|(_, reason)| reason.clone()).collect()
    }
}

/// Heuristic veto layer in front of every entry
#[derive(Debug, Clone, Default)]
pub struct PreTradeGuard {
    config: GuardConfig,
}

impl PreTradeGuard {
    pub fn new(config: GuardConfig) -> Self {
        Self { config }
    }

    pub fn check(
        &self,
        symbol: &str,
        side: Side,
        snapshot: Option<&MarketSnapshot>,
    ) -> GuardVerdict {
        let mut verdict = GuardVerdict::default();

        let Some(snapshot) = snapshot else {
            tracing::debug!(symbol = %symbol, "No market snapshot, pre-trade guard skipped");
            verdict.skipped = RULES.iter().map(|(name, _)| name.to_string()).collect();
            return verdict;
        };

        for (name, rule) in RULES.iter() {
            match rule(&self.config, side, snapshot) {
                RuleOutcome::Pass => {}
                RuleOutcome::Veto(reason) => {
                    tracing::info!(
                        symbol = %symbol,
                        rule = %name,
                        "🛑 {} entry vetoed: {}",
                        side,
                        reason
                    );
                    verdict.vetoes.push((name.to_string(), reason));
                }
                RuleOutcome::NoData => verdict.skipped.push(name.to_string()),
            }
        }

        verdict
    }
}

fn trend_alignment(_config: &GuardConfig, side: Side, snapshot: &MarketSnapshot) -> RuleOutcome {
    match snapshot.analytics.trend_long {
        None => RuleOutcome::NoData,
        Some(trend) if trend.opposes(side) => {
            let label = if trend == Trend::Down { "down" } else { "up" };
            RuleOutcome::Veto(format!("long-timeframe trend is {} against {}", label, side))
        }
        Some(_) => RuleOutcome::Pass,
    }
}

fn momentum(config: &GuardConfig, side: Side, snapshot: &MarketSnapshot) -> RuleOutcome {
    let Some(momentum) = snapshot.analytics.momentum_pct else {
        return RuleOutcome::NoData;
    };

    let against = -momentum * side.sign();
    if against >= config.momentum_veto_pct {
        RuleOutcome::Veto(format!(
            "short-term momentum {:+.2}% against {}",
            momentum, side
        ))
    } else {
        RuleOutcome::Pass
    }
}

fn chasing(config: &GuardConfig, side: Side, snapshot: &MarketSnapshot) -> RuleOutcome {
    let (Some(moved), Some(volume_ratio)) = (
        snapshot.analytics.recent_move_pct,
        snapshot.analytics.volume_ratio,
    ) else {
        return RuleOutcome::NoData;
    };

    let with_entry = moved * side.sign();
    if with_entry >= config.chase_move_pct && volume_ratio >= config.chase_volume_ratio {
        RuleOutcome::Veto(format!(
            "chasing: moved {:+.2}% on {:.1}x volume",
            moved, volume_ratio
        ))
    } else {
        RuleOutcome::Pass
    }
}

fn level_proximity(config: &GuardConfig, side: Side, snapshot: &MarketSnapshot) -> RuleOutcome {
    let price = snapshot.price;
    if price <= 0.0 {
        return RuleOutcome::NoData;
    }

    match side {
        Side::Long => {
            let Some(resistance) = snapshot.analytics.resistance else {
                return RuleOutcome::NoData;
            };
            let distance_pct = (resistance - price) / price * 100.0;
            if (0.0..config.min_level_distance_pct).contains(&distance_pct) {
                return RuleOutcome::Veto(format!(
                    "{:.2}% below resistance {:.4}",
                    distance_pct, resistance
                ));
            }
        }
        Side::Short => {
            let Some(support) = snapshot.analytics.support else {
                return RuleOutcome::NoData;
            };
            let distance_pct = (price - support) / price * 100.0;
            if (0.0..config.min_level_distance_pct).contains(&distance_pct) {
                return RuleOutcome::Veto(format!(
                    "{:.2}% above support {:.4}",
                    distance_pct, support
                ));
            }
        }
    }

    RuleOutcome::Pass
}

fn rsi_extreme(config: &GuardConfig, side: Side, snapshot: &MarketSnapshot) -> RuleOutcome {
    let Some(rsi) = snapshot.analytics.rsi else {
        return RuleOutcome::NoData;
    };

    match side {
        Side::Long if rsi >= config.rsi_overbought => {
            RuleOutcome::Veto(format!("RSI {:.1} overbought", rsi))
        }
        Side::Short if rsi <= config.rsi_oversold => {
            RuleOutcome::Veto(format!("RSI {:.1} oversold", rsi))
        }
        _ => RuleOutcome::Pass,
    }
}
