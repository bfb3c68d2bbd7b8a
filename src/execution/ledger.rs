use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::error::LedgerError;
use crate::models::{ExitReason, Position, Side, TradeRecord};

/// Default threshold below which a remaining quantity counts as zero
pub const DEFAULT_QUANTITY_EPSILON: f64 = 1e-9;

/// Local position book, at most one position per symbol.
///
/// Backed by a BTreeMap so every iteration (exits, reconciliation, logs) runs
/// in symbol order.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PositionBook {
    positions: BTreeMap<String, Position>,
}

impl PositionBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, symbol: &str) -> Option<&Position> {
        self.positions.get(symbol)
    }

    pub fn get_mut(&mut self, symbol: &str) -> Option<&mut Position> {
        self.positions.get_mut(symbol)
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.positions.contains_key(symbol)
    }

    pub fn insert(&mut self, position: Position) -> Option<Position> {
        self.positions.insert(position.symbol.clone(), position)
    }

    pub fn remove(&mut self, symbol: &str) -> Option<Position> {
        self.positions.remove(symbol)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Position> {
        self.positions.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Position> {
        self.positions.values_mut()
    }

    pub fn symbols(&self) -> Vec<String> {
        self.positions.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn total_unrealized_pnl(&self) -> f64 {
        self.positions.values().map(|p| p.unrealized_pnl).sum()
    }
}

/// An executed quantity at a price, in the direction of `side`
#[derive(Debug, Clone, PartialEq)]
pub struct FillEvent {
    pub symbol: String,
    pub side: Side,
    pub quantity: f64,
    pub price: f64,
    pub timestamp: DateTime<Utc>,
    pub leverage: f64,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    pub exit_reason: Option<ExitReason>, // Recorded on the trade if this fill closes it
}

impl FillEvent {
    pub fn entry(
        symbol: impl Into<String>,
        side: Side,
        quantity: f64,
        price: f64,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            quantity,
            price,
            timestamp,
            leverage: 1.0,
            stop_loss: None,
            take_profit: None,
            exit_reason: None,
        }
    }

    /// Fill reducing `position`: it trades the opposite side
    pub fn exit(
        position: &Position,
        quantity: f64,
        price: f64,
        timestamp: DateTime<Utc>,
        reason: ExitReason,
    ) -> Self {
        Self {
            symbol: position.symbol.clone(),
            side: position.side.opposite(),
            quantity,
            price,
            timestamp,
            leverage: position.leverage,
            stop_loss: None,
            take_profit: None,
            exit_reason: Some(reason),
        }
    }

    pub fn with_leverage(mut self, leverage: f64) -> Self {
        self.leverage = leverage;
        self
    }

    pub fn with_stops(mut self, stop_loss: Option<f64>, take_profit: Option<f64>) -> Self {
        self.stop_loss = stop_loss;
        self.take_profit = take_profit;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LedgerOutcome {
    Opened,
    Increased { new_entry_price: f64, new_quantity: f64 },
    Reduced { closed_quantity: f64, realized_pnl: f64 },
    Closed(TradeRecord),
}

/// Applies fills to the position book with weighted-average cost accounting
#[derive(Debug, Clone)]
pub struct OrderLedger {
    epsilon: f64,
}

impl Default for OrderLedger {
    fn default() -> Self {
        Self::new(DEFAULT_QUANTITY_EPSILON)
    }
}

impl OrderLedger {
    pub fn new(epsilon: f64) -> Self {
        Self { epsilon }
    }

    pub fn epsilon(&self) -> f64 {
        self.epsilon
    }

    /// Apply one fill. An invalid fill is rejected before the book is touched.
    pub fn apply_fill(
        &self,
        book: &mut PositionBook,
        fill: &FillEvent,
    ) -> Result<LedgerOutcome, LedgerError> {
        Self::validate(fill)?;

        let Some(position) = book.get_mut(&fill.symbol) else {
            let position = Position::open(
                fill.symbol.clone(),
                fill.side,
                fill.quantity,
                fill.price,
                fill.leverage,
                fill.stop_loss,
                fill.take_profit,
                fill.timestamp,
            );
            tracing::debug!(
                symbol = %fill.symbol,
                "Opened {} {:.6} @ {:.4}",
                fill.side,
                fill.quantity,
                fill.price
            );
            book.insert(position);
            return Ok(LedgerOutcome::Opened);
        };

        if position.side == fill.side {
            let new_quantity = position.quantity + fill.quantity;
            position.entry_price = (position.quantity * position.entry_price
                + fill.quantity * fill.price)
                / new_quantity;
            position.quantity = new_quantity;
            if fill.stop_loss.is_some() {
                position.stop_loss = fill.stop_loss;
                position.initial_stop = position.initial_stop.or(fill.stop_loss);
            }
            if fill.take_profit.is_some() {
                position.take_profit = fill.take_profit;
            }
            position.mark_price(fill.price);

            return Ok(LedgerOutcome::Increased {
                new_entry_price: position.entry_price,
                new_quantity,
            });
        }

        // Opposite side: reduce, never flip
        let closed_quantity = if fill.quantity > position.quantity + self.epsilon {
            tracing::warn!(
                symbol = %fill.symbol,
                "Fill of {:.6} exceeds position {:.6}, clamping (no flip)",
                fill.quantity,
                position.quantity
            );
            position.quantity
        } else {
            fill.quantity.min(position.quantity)
        };

        let realized_pnl =
            (fill.price - position.entry_price) * closed_quantity * position.side.sign();
        position.realized_pnl += realized_pnl;
        position.closed_quantity += closed_quantity;
        position.exit_notional += fill.price * closed_quantity;
        position.quantity -= closed_quantity;

        if position.quantity > self.epsilon {
            position.mark_price(fill.price);
            return Ok(LedgerOutcome::Reduced {
                closed_quantity,
                realized_pnl,
            });
        }

        let closed = book.remove(&fill.symbol).ok_or_else(|| LedgerError::InvalidFill {
            symbol: fill.symbol.clone(),
            reason: "position vanished during close".to_string(),
        })?;
        let reason = fill.exit_reason.unwrap_or(ExitReason::ExternalClose);

        Ok(LedgerOutcome::Closed(self.trade_record(
            &closed,
            fill.timestamp,
            reason,
        )))
    }

    fn validate(fill: &FillEvent) -> Result<(), LedgerError> {
        let invalid = |reason: String| LedgerError::InvalidFill {
            symbol: fill.symbol.clone(),
            reason,
        };

        if !fill.quantity.is_finite() || fill.quantity <= 0.0 {
            return Err(invalid(format!("quantity {} must be positive", fill.quantity)));
        }
        if !fill.price.is_finite() || fill.price <= 0.0 {
            return Err(invalid(format!("price {} must be positive", fill.price)));
        }
        Ok(())
    }

    /// Trade record for a fully closed position (all partial reductions included)
    fn trade_record(
        &self,
        position: &Position,
        exit_time: DateTime<Utc>,
        reason: ExitReason,
    ) -> TradeRecord {
        let quantity = position.closed_quantity;
        let exit_price = if quantity > self.epsilon {
            position.exit_notional / quantity
        } else {
            position.current_price
        };

        let r_multiple = position.initial_stop.and_then(|stop| {
            let risk = (position.entry_price - stop).abs() * quantity;
            (risk > self.epsilon).then(|| position.realized_pnl / risk)
        });

        TradeRecord {
            id: Uuid::new_v4(),
            symbol: position.symbol.clone(),
            side: position.side,
            quantity,
            entry_price: position.entry_price,
            exit_price,
            realized_pnl: position.realized_pnl,
            r_multiple,
            entry_time: position.entry_time,
            exit_time,
            holding_secs: (exit_time - position.entry_time).num_seconds(),
            exit_reason: reason,
            leverage: position.leverage,
        }
    }
}
