use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::CollaboratorError;
use crate::models::{MarketSnapshot, RankQuality, RankedAsset, Trend};

/// Orders assets by attractiveness. Positive scores favour longs, negative favour shorts.
#[async_trait]
pub trait AssetRanker: Send + Sync {
    async fn rank(
        &self,
        snapshots: &HashMap<String, MarketSnapshot>,
    ) -> Result<Vec<RankedAsset>, CollaboratorError>;
}

/// Which side of the ranking feeds signal generation
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SelectionPolicy {
    #[default]
    TopAbsolute, // Strongest moves either way
    LongBias,
    ShortBias,
    Balanced, // Half long candidates, half short
}

/// Score from 24h change, momentum and trend agreement, boosted by volume
#[derive(Debug, Clone)]
pub struct MomentumRanker {
    pub min_coverage: f64, // Below this, quality is capped at Weak
}

impl Default for MomentumRanker {
    fn default() -> Self {
        Self { min_coverage: 0.5 }
    }
}

fn trend_score(trend: Option<Trend>) -> f64 {
    match trend {
        Some(Trend::Up) => 1.0,
        Some(Trend::Down) => -1.0,
        _ => 0.0,
    }
}

impl MomentumRanker {
    pub fn score(&self, snapshot: &MarketSnapshot) -> RankedAsset {
        let analytics = &snapshot.analytics;

        let change = (snapshot.change_24h_pct / 10.0).clamp(-1.0, 1.0);
        let momentum = analytics
            .momentum_pct
            .map(|m| (m / 2.0).clamp(-1.0, 1.0))
            .unwrap_or(0.0);
        let trend = (trend_score(analytics.trend_short) + trend_score(analytics.trend_long)) / 2.0;

        let mut score = 0.4 * change + 0.3 * momentum + 0.3 * trend;

        // Volume confirms the move
        if analytics.volume_ratio.is_some_and(|v| v >= 1.5) {
            score *= 1.2;
        }

        // Stretched RSI in the direction of the move weakens it
        if let Some(rsi) = analytics.rsi {
            if (score > 0.0 && rsi > 75.0) || (score < 0.0 && rsi < 25.0) {
                score *= 0.8;
            }
        }

        let coverage = analytics.coverage();
        let quality = if coverage < self.min_coverage {
            RankQuality::Weak
        } else if score.abs() >= 0.6 {
            RankQuality::Strong
        } else if score.abs() >= 0.3 {
            RankQuality::Moderate
        } else {
            RankQuality::Weak
        };

        RankedAsset {
            symbol: snapshot.symbol.clone(),
            score,
            quality,
            indicator_coverage: coverage,
        }
    }
}

#[async_trait]
impl AssetRanker for MomentumRanker {
    async fn rank(
        &self,
        snapshots: &HashMap<String, MarketSnapshot>,
    ) -> Result<Vec<RankedAsset>, CollaboratorError> {
        let mut ranked: Vec<RankedAsset> = snapshots
            .values()
            .filter(|s| s.price.is_finite() && s.price > 0.0)
            .map(|s| self.score(s))
            .collect();

        // Strongest first, ties broken by symbol for a stable order
        ranked.sort_by(|a, b| {
            b.score
                .abs()
                .total_cmp(&a.score.abs())
                .then_with(|| a.symbol.cmp(&b.symbol))
        });

        Ok(ranked)
    }
}

/// Pick at most `top_k` symbols from a ranking (strongest first) under `policy`
pub fn select_top_k(ranking: &[RankedAsset], policy: SelectionPolicy, top_k: usize) -> Vec<String> {
    let longs = || ranking.iter().filter(|r| r.score > 0.0);
    let shorts = || ranking.iter().filter(|r| r.score < 0.0);

    let selected: Vec<&RankedAsset> = match policy {
        SelectionPolicy::TopAbsolute => ranking.iter().take(top_k).collect(),
        SelectionPolicy::LongBias => longs().take(top_k).collect(),
        SelectionPolicy::ShortBias => shorts().take(top_k).collect(),
        SelectionPolicy::Balanced => {
            let long_count = longs().count();
            let short_count = shorts().count();

            // Even split, the unused share goes to the other side
            let mut long_take = top_k.div_ceil(2).min(long_count);
            let short_take = (top_k - long_take).min(short_count);
            long_take = (top_k - short_take).min(long_count);

            let mut picked: Vec<&RankedAsset> = longs().take(long_take).collect();
            picked.extend(shorts().take(short_take));
            picked
        }
    };

    selected.into_iter().map(|r| r.symbol.clone()).collect()
}
