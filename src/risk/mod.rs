// Risk management module
pub mod circuit_breakers;
pub mod error_rate;
pub mod pre_trade_guard;

pub use circuit_breakers::{
    BreakerEvaluation, BreakerStatus, CircuitBreakerState, CircuitBreakerTrip, CircuitBreakers,
};
pub use error_rate::ErrorRateTracker;
pub use pre_trade_guard::{GuardConfig, GuardVerdict, PreTradeGuard, RuleOutcome};
