use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::CollaboratorError;
use crate::models::{CandidateSignal, ExitReason, Fill, Position, Side};

/// Order submission collaborator. Wire protocol and signing live behind this trait.
#[async_trait]
pub trait OrderExecutor: Send + Sync {
    /// Open or add to a position on `side` at roughly `price`
    async fn execute_entry(
        &self,
        signal: &CandidateSignal,
        side: Side,
        price: f64,
        account_value: f64,
    ) -> Result<Fill, CollaboratorError>;

    /// Close `pct` percent of `position`
    async fn execute_exit(
        &self,
        position: &Position,
        pct: f64,
        reason: ExitReason,
        price: f64,
    ) -> Result<Fill, CollaboratorError>;
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PaperConfig {
    pub position_size_pct: f64, // Of account value, before leverage
    pub default_leverage: f64,
    pub max_leverage: f64,
    pub slippage_bps: f64,
    pub fill_ratio: f64, // < 1.0 simulates partial fills
    pub min_notional: f64,
}

impl Default for PaperConfig {
    fn default() -> Self {
        Self {
            position_size_pct: 5.0, // Max 5% per position
            default_leverage: 1.0,
            max_leverage: 5.0,
            slippage_bps: 5.0,
            fill_ratio: 1.0,
            min_notional: 10.0,
        }
    }
}

/// Simulated executor for paper trading and tests
#[derive(Debug, Clone, Default)]
pub struct PaperExecutor {
    config: PaperConfig,
}

impl PaperExecutor {
    pub fn new(config: PaperConfig) -> Self {
        Self { config }
    }

    /// Calculate position size based on account value and leverage
    pub fn position_size(&self, account_value: f64, price: f64, leverage: f64) -> f64 {
        let max_position_value = account_value * self.config.position_size_pct / 100.0;
        max_position_value * leverage / price
    }

    /// Fill price after slippage against the trader
    fn slipped(&self, price: f64, trade_side: Side) -> f64 {
        price * (1.0 + self.config.slippage_bps / 10_000.0 * trade_side.sign())
    }

    /// Simulated fill. Reduce-only orders skip the minimum notional so a shrunken
    /// position can always be closed.
    fn fill(&self, quantity: f64, price: f64, reduce_only: bool) -> Fill {
        let ratio = self.config.fill_ratio.clamp(0.0, 1.0);
        let filled = quantity * ratio;

        if filled <= 0.0 {
            return Fill::rejected("nothing to fill");
        }

        if !reduce_only && filled * price < self.config.min_notional {
            return Fill::rejected(format!(
                "order notional {:.2} below minimum {:.2}",
                filled * price,
                self.config.min_notional
            ));
        }

        if ratio < 1.0 {
            Fill::partial(filled, price)
        } else {
            Fill::filled(filled, price)
        }
    }
}

#[async_trait]
impl OrderExecutor for PaperExecutor {
    async fn execute_entry(
        &self,
        signal: &CandidateSignal,
        side: Side,
        price: f64,
        account_value: f64,
    ) -> Result<Fill, CollaboratorError> {
        if !price.is_finite() || price <= 0.0 {
            return Ok(Fill::rejected(format!("invalid price {}", price)));
        }

        let leverage = signal
            .leverage
            .unwrap_or(self.config.default_leverage)
            .clamp(1.0, self.config.max_leverage.max(1.0));
        let quantity = self.position_size(account_value, price, leverage);
        let fill = self.fill(quantity, self.slipped(price, side), false);

        tracing::debug!(
            symbol = %signal.symbol,
            "Paper {} entry: {:?} {:.6} @ {:.4}",
            side,
            fill.status,
            fill.filled_qty,
            fill.filled_price
        );
        Ok(fill)
    }

    async fn execute_exit(
        &self,
        position: &Position,
        pct: f64,
        reason: ExitReason,
        price: f64,
    ) -> Result<Fill, CollaboratorError> {
        if !price.is_finite() || price <= 0.0 {
            return Ok(Fill::rejected(format!("invalid price {}", price)));
        }

        let quantity = position.quantity * pct.clamp(0.0, 100.0) / 100.0;
        let fill = self.fill(quantity, self.slipped(price, position.side.opposite()), true);

        tracing::debug!(
            symbol = %position.symbol,
            "Paper exit ({}): {:?} {:.6} @ {:.4}",
            reason,
            fill.status,
            fill.filled_qty,
            fill.filled_price
        );
        Ok(fill)
    }
}
