use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::api::HyperliquidConfig;
use crate::error::ConfigError;
use crate::execution::{ExitConfig, PaperConfig, ReconcileConfig, DEFAULT_QUANTITY_EPSILON};
use crate::market::{AnalyticsConfig, SelectionPolicy};
use crate::risk::{CircuitBreakers, GuardConfig};
use crate::strategy::SignalConfig;

const DEFAULT_CONFIG_FILE: &str = "perpcycle.toml";
const ENV_PREFIX: &str = "PERPCYCLE";

/// Top-level configuration: file, then `PERPCYCLE__*` environment variables
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BotConfig {
    pub trading: TradingConfig,
    pub runtime: RuntimeConfig,
    pub exchange: HyperliquidConfig,
    pub analytics: AnalyticsConfig,
    pub signals: SignalConfig,
    pub paper: PaperConfig,
}

/// Process-level settings that never reach the cycle itself
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RuntimeConfig {
    pub cycle_interval_secs: u64,
    pub account_id: String, // Key for persisted state
    pub initial_equity: f64,
    pub redis_url: Option<String>,
    pub database_url: Option<String>,
    pub log_filter: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            cycle_interval_secs: 300, // 5 minutes
            account_id: "paper".to_string(),
            initial_equity: 10_000.0,
            redis_url: None,
            database_url: None,
            log_filter: "perpcycle=info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LedgerConfig {
    pub quantity_epsilon: f64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            quantity_epsilon: DEFAULT_QUANTITY_EPSILON,
        }
    }
}

/// Everything one trading cycle reads. Validated at the start of every cycle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TradingConfig {
    pub universe: Vec<String>,
    pub account_address: Option<String>, // Enables reconciliation
    pub top_k: usize,
    pub selection_policy: SelectionPolicy,
    pub min_confidence: f64, // In [0, 1]
    pub max_open_positions: usize,
    pub collaborator_timeout_secs: u64,
    pub history_limit: usize,
    pub error_rate_window_secs: u64,
    pub min_error_samples: usize,
    pub circuit_breakers: CircuitBreakers,
    pub exits: ExitConfig,
    pub guard: GuardConfig,
    pub reconcile: ReconcileConfig,
    pub ledger: LedgerConfig,
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            universe: ["BTC", "ETH", "SOL"].iter().map(|s| s.to_string()).collect(),
            account_address: None,
            top_k: 5,
            selection_policy: SelectionPolicy::default(),
            min_confidence: 0.60,
            max_open_positions: 5,
            collaborator_timeout_secs: 30,
            history_limit: 500,
            error_rate_window_secs: 900, // 15 minutes
            min_error_samples: 10,
            circuit_breakers: CircuitBreakers::default(),
            exits: ExitConfig::default(),
            guard: GuardConfig::default(),
            reconcile: ReconcileConfig::default(),
            ledger: LedgerConfig::default(),
        }
    }
}

fn check(condition: bool, field: &str, reason: &str) -> Result<(), ConfigError> {
    if condition {
        Ok(())
    } else {
        Err(ConfigError::new(field, reason))
    }
}

fn positive(value: f64) -> bool {
    value.is_finite() && value > 0.0
}

fn percentage(value: f64) -> bool {
    value.is_finite() && value > 0.0 && value <= 100.0
}

impl TradingConfig {
    pub fn collaborator_timeout(&self) -> Duration {
        Duration::from_secs(self.collaborator_timeout_secs)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check(!self.universe.is_empty(), "trading.universe", "must not be empty")?;
        check(
            self.universe.iter().all(|s| !s.trim().is_empty()),
            "trading.universe",
            "contains an empty symbol",
        )?;
        check(self.top_k >= 1, "trading.top_k", "must be at least 1")?;
        check(
            self.min_confidence.is_finite() && (0.0..=1.0).contains(&self.min_confidence),
            "trading.min_confidence",
            "must be within [0, 1]",
        )?;
        check(self.max_open_positions >= 1, "trading.max_open_positions", "must be at least 1")?;
        check(
            self.collaborator_timeout_secs >= 1,
            "trading.collaborator_timeout_secs",
            "must be at least 1",
        )?;
        check(self.history_limit >= 1, "trading.history_limit", "must be at least 1")?;
        check(
            self.error_rate_window_secs >= 1,
            "trading.error_rate_window_secs",
            "must be at least 1",
        )?;

        let breakers = &self.circuit_breakers;
        check(
            percentage(breakers.max_daily_loss_pct),
            "trading.circuit_breakers.max_daily_loss_pct",
            "must be within (0, 100]",
        )?;
        check(
            percentage(breakers.max_drawdown_pct),
            "trading.circuit_breakers.max_drawdown_pct",
            "must be within (0, 100]",
        )?;
        check(
            breakers.max_consecutive_losses >= 1,
            "trading.circuit_breakers.max_consecutive_losses",
            "must be at least 1",
        )?;
        check(
            percentage(breakers.max_api_error_rate_pct),
            "trading.circuit_breakers.max_api_error_rate_pct",
            "must be within (0, 100]",
        )?;

        let exits = &self.exits;
        check(
            percentage(exits.default_stop_loss_pct),
            "trading.exits.default_stop_loss_pct",
            "must be within (0, 100]",
        )?;
        for (i, tier) in exits.take_profit_tiers.iter().enumerate() {
            check(
                positive(tier.gain_pct),
                "trading.exits.take_profit_tiers",
                &format!("tier {} gain must be positive", i + 1),
            )?;
            check(
                percentage(tier.exit_pct),
                "trading.exits.take_profit_tiers",
                &format!("tier {} exit must be within (0, 100]", i + 1),
            )?;
        }
        check(
            exits
                .take_profit_tiers
                .windows(2)
                .all(|w| w[0].gain_pct < w[1].gain_pct),
            "trading.exits.take_profit_tiers",
            "tiers must be in ascending gain order",
        )?;
        check(
            positive(exits.trailing_activation_pct),
            "trading.exits.trailing_activation_pct",
            "must be positive",
        )?;
        check(
            percentage(exits.trailing_distance_pct),
            "trading.exits.trailing_distance_pct",
            "must be within (0, 100]",
        )?;
        check(
            exits.reversal_min_confidence.is_finite()
                && (0.0..=1.0).contains(&exits.reversal_min_confidence),
            "trading.exits.reversal_min_confidence",
            "must be within [0, 1]",
        )?;
        check(exits.ranking_top_n >= 1, "trading.exits.ranking_top_n", "must be at least 1")?;
        check(
            exits.rsi_exit_low < exits.rsi_exit_high,
            "trading.exits.rsi_exit_low",
            "must be below rsi_exit_high",
        )?;

        let guard = &self.guard;
        check(
            guard.momentum_veto_pct >= 0.0
                && guard.chase_move_pct >= 0.0
                && guard.chase_volume_ratio >= 0.0
                && guard.min_level_distance_pct >= 0.0,
            "trading.guard",
            "thresholds must not be negative",
        )?;
        check(
            guard.rsi_oversold < guard.rsi_overbought,
            "trading.guard.rsi_oversold",
            "must be below rsi_overbought",
        )?;

        check(
            self.reconcile.quantity_tolerance_pct.is_finite()
                && self.reconcile.quantity_tolerance_pct >= 0.0,
            "trading.reconcile.quantity_tolerance_pct",
            "must not be negative",
        )?;
        check(
            positive(self.ledger.quantity_epsilon),
            "trading.ledger.quantity_epsilon",
            "must be positive",
        )?;

        Ok(())
    }
}

impl BotConfig {
    /// Load `.env`, then the config file (optional), then environment overrides
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let file = match path {
            Some(p) => config::File::from(p).required(true),
            None => config::File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };

        let config: BotConfig = config::Config::builder()
            .add_source(file)
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("trading.universe")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to read configuration")?
            .try_deserialize()
            .context("Failed to parse configuration")?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.trading.validate()?;
        check(
            self.runtime.cycle_interval_secs >= 1,
            "runtime.cycle_interval_secs",
            "must be at least 1",
        )?;
        check(
            !self.runtime.account_id.trim().is_empty(),
            "runtime.account_id",
            "must not be empty",
        )?;
        check(
            positive(self.runtime.initial_equity),
            "runtime.initial_equity",
            "must be positive",
        )?;
        check(
            self.exchange.requests_per_minute >= 1,
            "exchange.requests_per_minute",
            "must be at least 1",
        )?;
        check(
            positive(self.paper.position_size_pct) && self.paper.position_size_pct <= 100.0,
            "paper.position_size_pct",
            "must be within (0, 100]",
        )?;
        Ok(())
    }
}
