use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::execution::ledger::{FillEvent, LedgerOutcome, OrderLedger, PositionBook};
use crate::models::{AccountState, ExitReason, Position, RemotePosition, Side, TradeRecord};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReconcileConfig {
    pub quantity_tolerance_pct: f64, // Relative to the local quantity
    pub import_untracked: bool,      // Adopt remote-only positions
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            quantity_tolerance_pct: 1.0,
            import_untracked: false,
        }
    }
}

/// Local quantity overwritten with the exchange's value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SizeFix {
    pub symbol: String,
    pub local_quantity: f64,
    pub remote_quantity: f64,
}

/// Local and remote disagree on direction. Resolved remote-authoritative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Divergence {
    pub symbol: String,
    pub local_side: Side,
    pub remote_side: Side,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReconciliationOutcome {
    pub updated: PositionBook,
    pub synthetic_closes: Vec<TradeRecord>,
    pub size_fixes: Vec<SizeFix>,
    pub divergences: Vec<Divergence>,
    pub imported: Vec<String>,
    pub ignored_remote: Vec<String>, // Remote-only, import disabled
    pub account_value: Option<f64>,
}

impl ReconciliationOutcome {
    /// True when nothing in the local book had to change
    pub fn is_noop(&self) -> bool {
        self.synthetic_closes.is_empty()
            && self.size_fixes.is_empty()
            && self.divergences.is_empty()
            && self.imported.is_empty()
    }
}

/// Diffs the local book against the exchange's positions. Remote is authoritative.
///
/// Works on a copy of the book: the caller swaps the outcome in with a single
/// assignment, so a failed remote read leaves the local book untouched.
#[derive(Debug, Clone, Default)]
pub struct PositionReconciler {
    config: ReconcileConfig,
    ledger: OrderLedger,
}

impl PositionReconciler {
    pub fn new(config: ReconcileConfig, ledger: OrderLedger) -> Self {
        Self { config, ledger }
    }

    pub fn reconcile(
        &self,
        local: &PositionBook,
        remote: &AccountState,
        now: DateTime<Utc>,
    ) -> ReconciliationOutcome {
        let epsilon = self.ledger.epsilon();
        let mut updated = local.clone();
        let mut synthetic_closes = Vec::new();
        let mut size_fixes = Vec::new();
        let mut divergences = Vec::new();
        let mut imported = Vec::new();
        let mut ignored_remote = Vec::new();

        let remote_by_symbol: BTreeMap<&str, &RemotePosition> = remote
            .positions
            .iter()
            .filter(|p| p.quantity.is_finite() && p.quantity > epsilon)
            .map(|p| (p.symbol.as_str(), p))
            .collect();

        for symbol in local.symbols() {
            let Some(position) = updated.get(&symbol).cloned() else {
                continue;
            };

            match remote_by_symbol.get(symbol.as_str()) {
                None => {
                    tracing::warn!(
                        symbol = %symbol,
                        "Position closed outside the bot, booking synthetic close @ {:.4}",
                        position.current_price
                    );
                    if let Some(record) = self.synthetic_close(&mut updated, &position, now) {
                        synthetic_closes.push(record);
                    }
                }
                Some(remote_pos) if remote_pos.side != position.side => {
                    tracing::warn!(
                        symbol = %symbol,
                        "Side divergence: local {} vs remote {}, adopting remote",
                        position.side,
                        remote_pos.side
                    );
                    if let Some(record) = self.synthetic_close(&mut updated, &position, now) {
                        synthetic_closes.push(record);
                    }
                    updated.insert(Self::import(remote_pos, now));
                    divergences.push(Divergence {
                        symbol: symbol.clone(),
                        local_side: position.side,
                        remote_side: remote_pos.side,
                    });
                }
                Some(remote_pos) => {
                    let tolerance = (position.quantity * self.config.quantity_tolerance_pct / 100.0)
                        .max(epsilon);
                    if (position.quantity - remote_pos.quantity).abs() > tolerance {
                        tracing::warn!(
                            symbol = %symbol,
                            "Quantity mismatch: local {:.6} vs remote {:.6}, adopting remote",
                            position.quantity,
                            remote_pos.quantity
                        );
                        if let Some(local_pos) = updated.get_mut(&symbol) {
                            local_pos.quantity = remote_pos.quantity;
                            local_pos.unrealized_pnl = local_pos.pnl_at(local_pos.current_price);
                        }
                        size_fixes.push(SizeFix {
                            symbol: symbol.clone(),
                            local_quantity: position.quantity,
                            remote_quantity: remote_pos.quantity,
                        });
                    }
                }
            }
        }

        for (symbol, remote_pos) in &remote_by_symbol {
            if local.contains(symbol) {
                continue;
            }
            if self.config.import_untracked {
                tracing::info!(
                    symbol = %symbol,
                    "Importing untracked {} {:.6} @ {:.4}",
                    remote_pos.side,
                    remote_pos.quantity,
                    remote_pos.entry_price
                );
                updated.insert(Self::import(remote_pos, now));
                imported.push(symbol.to_string());
            } else {
                tracing::debug!(symbol = %symbol, "Ignoring untracked remote position");
                ignored_remote.push(symbol.to_string());
            }
        }

        let account_value = (remote.account_value.is_finite() && remote.account_value > 0.0)
            .then_some(remote.account_value);

        ReconciliationOutcome {
            updated,
            synthetic_closes,
            size_fixes,
            divergences,
            imported,
            ignored_remote,
            account_value,
        }
    }

    /// Close the whole local position at its last known price, or at entry
    /// when no usable price was ever seen.
    ///
    /// A close that the ledger refuses leaves the position in the book.
    fn synthetic_close(
        &self,
        book: &mut PositionBook,
        position: &Position,
        now: DateTime<Utc>,
    ) -> Option<TradeRecord> {
        let price = if position.current_price.is_finite() && position.current_price > 0.0 {
            position.current_price
        } else {
            tracing::warn!(
                symbol = %position.symbol,
                "No valid mark price ({}), closing at entry {:.4}",
                position.current_price,
                position.entry_price
            );
            position.entry_price
        };
        let fill = FillEvent::exit(
            position,
            position.quantity,
            price,
            now,
            ExitReason::ExternalClose,
        );

        match self.ledger.apply_fill(book, &fill) {
            Ok(LedgerOutcome::Closed(record)) => Some(record),
            Ok(outcome) => {
                tracing::error!(
                    symbol = %position.symbol,
                    "Synthetic close left the position open: {:?}",
                    outcome
                );
                None
            }
            Err(e) => {
                tracing::error!(
                    symbol = %position.symbol,
                    "Synthetic close failed, position kept: {}",
                    e
                );
                None
            }
        }
    }

    fn import(remote: &RemotePosition, now: DateTime<Utc>) -> Position {
        let mut position = Position::open(
            remote.symbol.clone(),
            remote.side,
            remote.quantity,
            remote.entry_price,
            remote.leverage,
            None,
            None,
            now,
        );
        position.unrealized_pnl = remote.unrealized_pnl;
        position
    }
}
