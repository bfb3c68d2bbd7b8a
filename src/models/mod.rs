use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::indicators::MarketStructure;

/// Direction of an exposure (or of a fill)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Side {
    Long,
    Short,
}

impl Side {
    pub fn opposite(self) -> Self {
        match self {
            Side::Long => Side::Short,
            Side::Short => Side::Long,
        }
    }

    /// +1 for long, -1 for short
    pub fn sign(self) -> f64 {
        match self {
            Side::Long => 1.0,
            Side::Short => -1.0,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Long => write!(f, "LONG"),
            Side::Short => write!(f, "SHORT"),
        }
    }
}

/// Open exposure to one asset.
///
/// `quantity` is always a positive magnitude; the sign lives in `side`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Position {
    pub symbol: String,
    pub side: Side,
    pub quantity: f64,
    pub entry_price: f64, // Weighted-average entry price
    pub leverage: f64,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    pub current_price: f64,
    pub unrealized_pnl: f64,
    pub entry_time: DateTime<Utc>,
    pub initial_stop: Option<f64>, // Stop at entry, used for planned risk
    pub trailing_extreme: f64,     // Best price seen since entry
    pub tp_tiers_taken: usize,
    pub rank_miss_cycles: u32,
    pub realized_pnl: f64,    // From partial reductions so far
    pub closed_quantity: f64, // Quantity already closed by partial reductions
    pub exit_notional: f64,   // Sum of exit_price * qty over partial reductions
}

impl Position {
    #[allow(clippy::too_many_arguments)]
    pub fn open(
        symbol: impl Into<String>,
        side: Side,
        quantity: f64,
        entry_price: f64,
        leverage: f64,
        stop_loss: Option<f64>,
        take_profit: Option<f64>,
        entry_time: DateTime<Utc>,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            quantity,
            entry_price,
            leverage,
            stop_loss,
            take_profit,
            current_price: entry_price,
            unrealized_pnl: 0.0,
            entry_time,
            initial_stop: stop_loss,
            trailing_extreme: entry_price,
            tp_tiers_taken: 0,
            rank_miss_cycles: 0,
            realized_pnl: 0.0,
            closed_quantity: 0.0,
            exit_notional: 0.0,
        }
    }

    /// PnL of the open quantity at `price`
    pub fn pnl_at(&self, price: f64) -> f64 {
        (price - self.entry_price) * self.quantity * self.side.sign()
    }

    /// Move in the position's favour since entry, in percent (negative when losing)
    pub fn favorable_move_pct(&self, price: f64) -> f64 {
        if self.entry_price <= 0.0 {
            return 0.0;
        }
        (price - self.entry_price) / self.entry_price * 100.0 * self.side.sign()
    }

    /// Refresh mark price, unrealized PnL and the trailing high/low water mark
    pub fn mark_price(&mut self, price: f64) {
        self.current_price = price;
        self.unrealized_pnl = self.pnl_at(price);
        self.trailing_extreme = match self.side {
            Side::Long => self.trailing_extreme.max(price),
            Side::Short => self.trailing_extreme.min(price),
        };
    }

    pub fn notional(&self) -> f64 {
        self.quantity * self.current_price
    }
}

/// What a signal generator proposes for a symbol
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SignalDirection {
    EnterLong,
    EnterShort,
    Hold,
    Add,
}

impl SignalDirection {
    /// Side implied by an entry direction (Hold/Add carry no side of their own)
    pub fn entry_side(self) -> Option<Side> {
        match self {
            SignalDirection::EnterLong => Some(Side::Long),
            SignalDirection::EnterShort => Some(Side::Short),
            SignalDirection::Hold | SignalDirection::Add => None,
        }
    }

    pub fn for_side(side: Side) -> Self {
        match side {
            Side::Long => SignalDirection::EnterLong,
            Side::Short => SignalDirection::EnterShort,
        }
    }
}

/// Externally produced trade proposal
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CandidateSignal {
    pub symbol: String,
    pub direction: SignalDirection,
    pub confidence: f64, // In [0, 1]
    pub entry_price: Option<f64>,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    pub leverage: Option<f64>,
    pub rationale: String,
}

impl CandidateSignal {
    pub fn new(symbol: impl Into<String>, direction: SignalDirection, confidence: f64) -> Self {
        Self {
            symbol: symbol.into(),
            direction,
            confidence,
            entry_price: None,
            stop_loss: None,
            take_profit: None,
            leverage: None,
            rationale: String::new(),
        }
    }

    pub fn with_stop_loss(mut self, stop_loss: f64) -> Self {
        self.stop_loss = Some(stop_loss);
        self
    }

    pub fn with_take_profit(mut self, take_profit: f64) -> Self {
        self.take_profit = Some(take_profit);
        self
    }

    pub fn with_leverage(mut self, leverage: f64) -> Self {
        self.leverage = Some(leverage);
        self
    }

    pub fn with_rationale(mut self, rationale: impl Into<String>) -> Self {
        self.rationale = rationale.into();
        self
    }

    pub fn has_valid_confidence(&self) -> bool {
        self.confidence.is_finite() && (0.0..=1.0).contains(&self.confidence)
    }
}

/// A signal that was not acted on, with the reason why
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RejectedSignal {
    pub signal: CandidateSignal,
    pub reason: String,
}

impl RejectedSignal {
    pub fn new(signal: CandidateSignal, reason: impl Into<String>) -> Self {
        Self {
            signal,
            reason: reason.into(),
        }
    }
}

/// OHLCV candlestick data
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candle {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Trend {
    Up,
    Down,
    Flat,
}

impl Trend {
    /// True when the trend runs against an entry on `side`
    pub fn opposes(self, side: Side) -> bool {
        matches!(
            (self, side),
            (Trend::Down, Side::Long) | (Trend::Up, Side::Short)
        )
    }
}

/// Derived analytics attached to a snapshot. Every field is optional:
/// consumers must treat a missing value as "unknown", never as a veto.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MarketAnalytics {
    pub rsi: Option<f64>,
    pub trend_short: Option<Trend>,
    pub trend_long: Option<Trend>,
    pub momentum_pct: Option<f64>,    // Short-term % change
    pub recent_move_pct: Option<f64>, // % change over the chase lookback
    pub volume_ratio: Option<f64>,    // Latest volume / average volume
    pub support: Option<f64>,
    pub resistance: Option<f64>,
    pub structure: Option<MarketStructure>,
    pub atr: Option<f64>,
}

impl MarketAnalytics {
    /// Fraction of analytics fields that are populated
    pub fn coverage(&self) -> f64 {
        let present = [
            self.rsi.is_some(),
            self.trend_short.is_some(),
            self.trend_long.is_some(),
            self.momentum_pct.is_some(),
            self.recent_move_pct.is_some(),
            self.volume_ratio.is_some(),
            self.support.is_some(),
            self.resistance.is_some(),
            self.structure.is_some(),
            self.atr.is_some(),
        ];
        present.iter().filter(|&&p| p).count() as f64 / present.len() as f64
    }
}

/// Latest market state for one asset
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MarketSnapshot {
    pub symbol: String,
    pub price: f64,
    pub timestamp: DateTime<Utc>,
    pub volume_24h: f64,
    pub change_24h_pct: f64,
    pub funding_rate: Option<f64>,
    pub open_interest: Option<f64>,
    pub analytics: MarketAnalytics,
}

impl MarketSnapshot {
    pub fn new(symbol: impl Into<String>, price: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            symbol: symbol.into(),
            price,
            timestamp,
            volume_24h: 0.0,
            change_24h_pct: 0.0,
            funding_rate: None,
            open_interest: None,
            analytics: MarketAnalytics::default(),
        }
    }

    pub fn with_analytics(mut self, analytics: MarketAnalytics) -> Self {
        self.analytics = analytics;
        self
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RankQuality {
    Strong,
    Moderate,
    Weak,
}

/// One entry of the asset ranking. Positive scores are bullish, negative bearish.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RankedAsset {
    pub symbol: String,
    pub score: f64,
    pub quality: RankQuality,
    pub indicator_coverage: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum FillStatus {
    Filled,
    PartialFilled,
    Rejected,
}

/// Result of an order submission
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Fill {
    pub status: FillStatus,
    pub filled_qty: f64,
    pub filled_price: f64,
    pub reason: Option<String>, // Exchange-supplied rejection reason
}

impl Fill {
    pub fn filled(qty: f64, price: f64) -> Self {
        Self {
            status: FillStatus::Filled,
            filled_qty: qty,
            filled_price: price,
            reason: None,
        }
    }

    pub fn partial(qty: f64, price: f64) -> Self {
        Self {
            status: FillStatus::PartialFilled,
            filled_qty: qty,
            filled_price: price,
            reason: None,
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            status: FillStatus::Rejected,
            filled_qty: 0.0,
            filled_price: 0.0,
            reason: Some(reason.into()),
        }
    }

    pub fn is_executed(&self) -> bool {
        self.status != FillStatus::Rejected && self.filled_qty > 0.0
    }
}

/// Why a position (or part of it) was closed
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ExitReason {
    StopLoss,
    TakeProfit,
    TrailingStop,
    SignalReversal,
    RankingDrop,
    IndicatorExit,
    ExternalClose, // Closed outside the bot, detected by reconciliation
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::StopLoss => "StopLoss",
            ExitReason::TakeProfit => "TakeProfit",
            ExitReason::TrailingStop => "TrailingStop",
            ExitReason::SignalReversal => "SignalReversal",
            ExitReason::RankingDrop => "RankingDrop",
            ExitReason::IndicatorExit => "IndicatorExit",
            ExitReason::ExternalClose => "ExternalClose",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "StopLoss" => Some(ExitReason::StopLoss),
            "TakeProfit" => Some(ExitReason::TakeProfit),
            "TrailingStop" => Some(ExitReason::TrailingStop),
            "SignalReversal" => Some(ExitReason::SignalReversal),
            "RankingDrop" => Some(ExitReason::RankingDrop),
            "IndicatorExit" => Some(ExitReason::IndicatorExit),
            "ExternalClose" => Some(ExitReason::ExternalClose),
            _ => None,
        }
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Realized outcome of a closed position
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TradeRecord {
    pub id: Uuid,
    pub symbol: String,
    pub side: Side,
    pub quantity: f64,
    pub entry_price: f64,
    pub exit_price: f64, // Quantity-weighted average over all reductions
    pub realized_pnl: f64,
    pub r_multiple: Option<f64>,
    pub entry_time: DateTime<Utc>,
    pub exit_time: DateTime<Utc>,
    pub holding_secs: i64,
    pub exit_reason: ExitReason,
    pub leverage: f64,
}

impl TradeRecord {
    pub fn is_loss(&self) -> bool {
        self.realized_pnl < 0.0
    }
}

/// Position as reported by the exchange
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RemotePosition {
    pub symbol: String,
    pub side: Side,
    pub quantity: f64,
    pub entry_price: f64,
    pub leverage: f64,
    pub unrealized_pnl: f64,
}

/// Account state as reported by the exchange
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AccountState {
    pub account_value: f64,
    pub positions: Vec<RemotePosition>,
}
