use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::models::TradeRecord;

/// Circuit breakers to prevent catastrophic losses
///
/// All limits are percentages (5.0 = 5%).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CircuitBreakers {
    pub max_daily_loss_pct: f64,
    pub max_drawdown_pct: f64,
    pub max_consecutive_losses: u32,
    pub max_api_error_rate_pct: f64,
}

impl Default for CircuitBreakers {
    fn default() -> Self {
        Self {
            max_daily_loss_pct: 5.0,      // -5% daily
            max_drawdown_pct: 20.0,       // -20% from peak
            max_consecutive_losses: 5,    // 5 losses in a row
            max_api_error_rate_pct: 50.0, // Half of collaborator calls failing
        }
    }
}

/// Ordered by severity: Normal < Paused < Halted
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub enum BreakerStatus {
    Normal,
    Paused, // New entries suspended
    Halted, // New entries suspended, operator attention required
}

impl fmt::Display for BreakerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BreakerStatus::Normal => write!(f, "NORMAL"),
            BreakerStatus::Paused => write!(f, "PAUSED"),
            BreakerStatus::Halted => write!(f, "HALTED"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CircuitBreakerTrip {
    DailyLoss { loss_pct: f64 },
    MaxDrawdown { drawdown_pct: f64 },
    ConsecutiveLosses { count: u32 },
    ApiErrorRate { rate_pct: f64 },
}

impl CircuitBreakerTrip {
    pub fn severity(&self) -> BreakerStatus {
        match self {
            CircuitBreakerTrip::DailyLoss { .. } | CircuitBreakerTrip::MaxDrawdown { .. } => {
                BreakerStatus::Halted
            }
            CircuitBreakerTrip::ConsecutiveLosses { .. }
            | CircuitBreakerTrip::ApiErrorRate { .. } => BreakerStatus::Paused,
        }
    }
}

impl fmt::Display for CircuitBreakerTrip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitBreakerTrip::DailyLoss { loss_pct } => {
                write!(f, "daily loss {:.2}%", loss_pct)
            }
            CircuitBreakerTrip::MaxDrawdown { drawdown_pct } => {
                write!(f, "drawdown {:.2}% from peak", drawdown_pct)
            }
            CircuitBreakerTrip::ConsecutiveLosses { count } => {
                write!(f, "{} consecutive losses", count)
            }
            CircuitBreakerTrip::ApiErrorRate { rate_pct } => {
                write!(f, "API error rate {:.1}%", rate_pct)
            }
        }
    }
}

/// Outcome of a pure breaker evaluation
#[derive(Debug, Clone, PartialEq)]
pub struct BreakerEvaluation {
    pub status: BreakerStatus,
    pub reason: Option<String>,
    pub trips: Vec<CircuitBreakerTrip>,
    pub daily_realized_pnl: f64,
    pub consecutive_losses: u32,
    pub api_error_rate_pct: Option<f64>,
    pub equity: f64,
}

/// Breaker state carried across cycles
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CircuitBreakerState {
    pub status: BreakerStatus,
    pub reason: Option<String>,
    pub trading_day: NaiveDate,
    pub window_start: DateTime<Utc>, // Trades before this are not counted
    pub day_start_equity: f64,
    pub peak_equity: f64,
    pub daily_realized_pnl: f64,
    pub consecutive_losses: u32,
    pub api_error_rate_pct: Option<f64>,
    pub tripped_at: Option<DateTime<Utc>>,
}

fn start_of_day(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive()
        .and_hms_opt(0, 0, 0)
        .map(|midnight| midnight.and_utc())
        .unwrap_or(now)
}

impl CircuitBreakerState {
    pub fn new(now: DateTime<Utc>, equity: f64) -> Self {
        Self {
            status: BreakerStatus::Normal,
            reason: None,
            trading_day: now.date_naive(),
            window_start: start_of_day(now),
            day_start_equity: equity,
            peak_equity: equity,
            daily_realized_pnl: 0.0,
            consecutive_losses: 0,
            api_error_rate_pct: None,
            tripped_at: None,
        }
    }

    /// Reset on the UTC calendar boundary. Returns true if a new day started.
    pub fn roll_day(&mut self, now: DateTime<Utc>, equity: f64) -> bool {
        if now.date_naive() <= self.trading_day {
            return false;
        }

        if self.status != BreakerStatus::Normal {
            tracing::info!(
                "Circuit breaker reset at day boundary (was {}: {})",
                self.status,
                self.reason.as_deref().unwrap_or("-")
            );
        }

        let peak_equity = self.peak_equity.max(equity);
        *self = Self::new(now, equity);
        self.peak_equity = peak_equity;
        true
    }

    /// Explicit operator reset: clears the status and restarts loss counting from now
    pub fn operator_reset(&mut self, now: DateTime<Utc>, equity: f64) {
        tracing::warn!(
            "Circuit breaker manually reset (was {}: {})",
            self.status,
            self.reason.as_deref().unwrap_or("-")
        );

        self.status = BreakerStatus::Normal;
        self.reason = None;
        self.tripped_at = None;
        self.window_start = now;
        self.day_start_equity = equity;
        self.peak_equity = equity;
        self.daily_realized_pnl = 0.0;
        self.consecutive_losses = 0;
    }

    /// Fold an evaluation into the state. Status only ever worsens here;
    /// it improves through `roll_day` or `operator_reset`.
    pub fn apply(&mut self, evaluation: &BreakerEvaluation, now: DateTime<Utc>) {
        self.daily_realized_pnl = evaluation.daily_realized_pnl;
        self.consecutive_losses = evaluation.consecutive_losses;
        self.api_error_rate_pct = evaluation.api_error_rate_pct;
        self.peak_equity = self.peak_equity.max(evaluation.equity);

        if evaluation.status > self.status {
            tracing::error!(
                "🚨 Circuit breaker {} -> {}: {}",
                self.status,
                evaluation.status,
                evaluation.reason.as_deref().unwrap_or("-")
            );
            self.status = evaluation.status;
            self.reason = evaluation.reason.clone();
            self.tripped_at = Some(now);
        }
    }

    pub fn entries_allowed(&self) -> bool {
        self.status == BreakerStatus::Normal
    }
}

impl CircuitBreakers {
    /// Evaluate the breaker against recent outcomes. Pure: the caller applies the result.
    ///
    /// # Arguments
    /// * `history` - Closed trades, oldest first
    /// * `live_error_rate` - Rolling collaborator error rate in percent, None while too few samples
    /// * `equity` - Current account equity
    pub fn evaluate(
        &self,
        state: &CircuitBreakerState,
        history: &[TradeRecord],
        live_error_rate: Option<f64>,
        equity: f64,
    ) -> BreakerEvaluation {
        let in_window: Vec<&TradeRecord> = history
            .iter()
            .filter(|t| t.exit_time >= state.window_start)
            .collect();

        let daily_realized_pnl: f64 = in_window.iter().map(|t| t.realized_pnl).sum();
        let consecutive_losses = in_window
            .iter()
            .rev()
            .take_while(|t| t.is_loss())
            .count() as u32;

        let mut trips = Vec::new();

        // Check daily loss
        if state.day_start_equity > 0.0 && daily_realized_pnl < 0.0 {
            let loss_pct = -daily_realized_pnl / state.day_start_equity * 100.0;
            if loss_pct >= self.max_daily_loss_pct {
                trips.push(CircuitBreakerTrip::DailyLoss { loss_pct });
            }
        }

        // Check drawdown
        let peak = state.peak_equity.max(equity);
        if peak > 0.0 {
            let drawdown_pct = (peak - equity) / peak * 100.0;
            if drawdown_pct >= self.max_drawdown_pct {
                trips.push(CircuitBreakerTrip::MaxDrawdown { drawdown_pct });
            }
        }

        // Check consecutive losses
        if self.max_consecutive_losses > 0 && consecutive_losses >= self.max_consecutive_losses {
            trips.push(CircuitBreakerTrip::ConsecutiveLosses {
                count: consecutive_losses,
            });
        }

        // Check collaborator error rate
        if let Some(rate_pct) = live_error_rate {
            if rate_pct >= self.max_api_error_rate_pct {
                trips.push(CircuitBreakerTrip::ApiErrorRate { rate_pct });
            }
        }

        let status = trips
            .iter()
            .map(CircuitBreakerTrip::severity)
            .max()
            .unwrap_or(BreakerStatus::Normal);
        let reason = if trips.is_empty() {
            None
        } else {
            Some(
                trips
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", "),
            )
        };

        BreakerEvaluation {
            status,
            reason,
            trips,
            daily_realized_pnl,
            consecutive_losses,
            api_error_rate_pct: live_error_rate,
            equity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ExitReason, Side};
    use chrono::{Duration, TimeZone};
    use uuid::Uuid;

    fn noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 10, 12, 0, 0).unwrap()
    }

    fn trade(pnl: f64, exit_time: DateTime<Utc>) -> TradeRecord {
        TradeRecord {
            id: Uuid::new_v4(),
            symbol: "BTC".to_string(),
            side: Side::Long,
            quantity: 1.0,
            entry_price: 100.0,
            exit_price: 100.0 + pnl,
            realized_pnl: pnl,
            r_multiple: None,
            entry_time: exit_time - Duration::hours(1),
            exit_time,
            holding_secs: 3600,
            exit_reason: ExitReason::StopLoss,
            leverage: 1.0,
        }
    }

    #[test]
    fn test_circuit_breaker_ok() {
        let breakers = CircuitBreakers::default();
        let state = CircuitBreakerState::new(noon(), 10000.0);

        let evaluation = breakers.evaluate(&state, &[], Some(0.0), 10000.0);
        assert_eq!(evaluation.status, BreakerStatus::Normal);
        assert!(evaluation.reason.is_none());
    }

    #[test]
    fn test_circuit_breaker_daily_loss_halts() {
        let breakers = CircuitBreakers::default();
        let state = CircuitBreakerState::new(noon(), 10000.0);

        // -6% realized today
        let history = vec![trade(-600.0, noon() - Duration::hours(1))];
        let evaluation = breakers.evaluate(&state, &history, None, 9400.0);

        assert_eq!(evaluation.status, BreakerStatus::Halted);
        assert!(matches!(
            evaluation.trips[0],
            CircuitBreakerTrip::DailyLoss { .. }
        ));
        assert!(evaluation.reason.unwrap().contains("daily loss 6.00%"));
    }

    #[test]
    fn test_circuit_breaker_drawdown() {
        let breakers = CircuitBreakers::default();
        let mut state = CircuitBreakerState::new(noon(), 12000.0);
        state.day_start_equity = 9000.0;

        // Peak was 12000, now 9000 = 25% drawdown
        let evaluation = breakers.evaluate(&state, &[], None, 9000.0);
        assert_eq!(evaluation.status, BreakerStatus::Halted);
        assert!(evaluation
            .trips
            .contains(&CircuitBreakerTrip::MaxDrawdown { drawdown_pct: 25.0 }));
    }

    #[test]
    fn test_circuit_breaker_consecutive_losses_pause() {
        let breakers = CircuitBreakers::default();
        let state = CircuitBreakerState::new(noon(), 100000.0);

        let history: Vec<TradeRecord> = (0..5)
            .map(|i| trade(-10.0, noon() - Duration::minutes(50 - i)))
            .collect();

        let evaluation = breakers.evaluate(&state, &history, None, 99950.0);
        assert_eq!(evaluation.status, BreakerStatus::Paused);
        assert_eq!(evaluation.consecutive_losses, 5);
    }

    #[test]
    fn test_win_breaks_loss_streak() {
        let breakers = CircuitBreakers::default();
        let state = CircuitBreakerState::new(noon(), 100000.0);

        let mut history: Vec<TradeRecord> = (0..4)
            .map(|i| trade(-10.0, noon() - Duration::minutes(50 - i)))
            .collect();
        history.push(trade(25.0, noon() - Duration::minutes(20)));
        history.push(trade(-10.0, noon() - Duration::minutes(10)));

        let evaluation = breakers.evaluate(&state, &history, None, 100000.0);
        assert_eq!(evaluation.consecutive_losses, 1);
        assert_eq!(evaluation.status, BreakerStatus::Normal);
    }

    #[test]
    fn test_api_error_rate_pause() {
        let breakers = CircuitBreakers::default();
        let state = CircuitBreakerState::new(noon(), 10000.0);

        let evaluation = breakers.evaluate(&state, &[], Some(60.0), 10000.0);
        assert_eq!(evaluation.status, BreakerStatus::Paused);
        assert!(evaluation.reason.unwrap().contains("API error rate"));
    }

    #[test]
    fn test_status_never_clears_mid_day() {
        let breakers = CircuitBreakers::default();
        let mut state = CircuitBreakerState::new(noon(), 10000.0);

        let tripped = breakers.evaluate(&state, &[], Some(80.0), 10000.0);
        state.apply(&tripped, noon());
        assert_eq!(state.status, BreakerStatus::Paused);

        // Error rate recovers, status stays
        let healthy = breakers.evaluate(&state, &[], Some(0.0), 10000.0);
        state.apply(&healthy, noon() + Duration::hours(1));
        assert_eq!(state.status, BreakerStatus::Paused);
        assert!(!state.entries_allowed());

        // Escalation is still possible
        let history = vec![trade(-900.0, noon() + Duration::minutes(90))];
        let worse = breakers.evaluate(&state, &history, None, 9100.0);
        state.apply(&worse, noon() + Duration::hours(2));
        assert_eq!(state.status, BreakerStatus::Halted);
    }

    #[test]
    fn test_day_rollover_resets() {
        let breakers = CircuitBreakers::default();
        let mut state = CircuitBreakerState::new(noon(), 10000.0);

        let history = vec![trade(-600.0, noon())];
        let evaluation = breakers.evaluate(&state, &history, None, 9400.0);
        state.apply(&evaluation, noon());
        assert_eq!(state.status, BreakerStatus::Halted);

        // Same day: no reset
        assert!(!state.roll_day(noon() + Duration::hours(3), 9400.0));
        assert_eq!(state.status, BreakerStatus::Halted);

        // Next day: reset, yesterday's loss no longer counts
        let tomorrow = noon() + Duration::hours(14);
        assert!(state.roll_day(tomorrow, 9400.0));
        assert_eq!(state.status, BreakerStatus::Normal);
        assert_eq!(state.peak_equity, 10000.0);

        let evaluation = breakers.evaluate(&state, &history, None, 9400.0);
        assert_eq!(evaluation.daily_realized_pnl, 0.0);
        assert!(!evaluation
            .trips
            .iter()
            .any(|t| matches!(t, CircuitBreakerTrip::DailyLoss { .. })));
    }

    #[test]
    fn test_operator_reset() {
        let breakers = CircuitBreakers::default();
        let mut state = CircuitBreakerState::new(noon(), 100000.0);

        let history: Vec<TradeRecord> = (0..5)
            .map(|i| trade(-10.0, noon() - Duration::minutes(50 - i)))
            .collect();
        let evaluation = breakers.evaluate(&state, &history, None, 99950.0);
        state.apply(&evaluation, noon());
        assert_eq!(state.status, BreakerStatus::Paused);

        state.operator_reset(noon() + Duration::minutes(5), 99950.0);
        assert!(state.entries_allowed());

        // The old streak is outside the new window
        let evaluation = breakers.evaluate(&state, &history, None, 99950.0);
        assert_eq!(evaluation.consecutive_losses, 0);
        assert_eq!(evaluation.status, BreakerStatus::Normal);
    }
}
