// Trading signal generation
pub mod signals;

pub use signals::{IndicatorSignalGenerator, SignalConfig};

use async_trait::async_trait;
use std::collections::HashMap;

use crate::error::CollaboratorError;
use crate::models::{CandidateSignal, MarketSnapshot, Position, RankedAsset, RejectedSignal};

/// Account view handed to signal generators
#[derive(Debug, Clone, Default)]
pub struct AccountSummary {
    pub account_value: f64,
    pub open_positions: Vec<Position>,
}

impl AccountSummary {
    pub fn position(&self, symbol: &str) -> Option<&Position> {
        self.open_positions.iter().find(|p| p.symbol == symbol)
    }
}

/// Output of one generation round. Generator-side rejections are explicit.
#[derive(Debug, Clone, Default)]
pub struct SignalBatch {
    pub signals: Vec<CandidateSignal>,
    pub rejected: Vec<RejectedSignal>,
}

/// Produces candidate signals for a set of symbols. May return fewer signals than symbols.
#[async_trait]
pub trait SignalGenerator: Send + Sync {
    fn name(&self) -> &str;

    async fn generate(
        &self,
        symbols: &[String],
        market: &HashMap<String, MarketSnapshot>,
        account: &AccountSummary,
        ranking: &[RankedAsset],
    ) -> Result<SignalBatch, CollaboratorError>;
}
