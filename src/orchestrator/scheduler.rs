use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{Duration, MissedTickBehavior};

use crate::config::TradingConfig;
use crate::orchestrator::{CycleOrchestrator, CycleResult, TraderState};
use crate::persistence::RedisStateStore;

/// Drives the orchestrator on a fixed interval, one cycle at a time.
///
/// Ticks that arrive while a cycle is running are dropped. Shutdown is only
/// observed between cycles, so a cycle always runs to completion.
pub struct Scheduler {
    orchestrator: Arc<CycleOrchestrator>,
    config: TradingConfig,
    interval: Duration,
    state_store: Option<RedisStateStore>,
    account_id: String,
}

impl Scheduler {
    pub fn new(
        orchestrator: Arc<CycleOrchestrator>,
        config: TradingConfig,
        interval: Duration,
    ) -> Self {
        Self {
            orchestrator,
            config,
            interval,
            state_store: None,
            account_id: "paper".to_string(),
        }
    }

    /// Save state to Redis after every cycle
    pub fn with_state_store(
        mut self,
        store: RedisStateStore,
        account_id: impl Into<String>,
    ) -> Self {
        self.state_store = Some(store);
        self.account_id = account_id.into();
        self
    }

    /// Run until `shutdown` turns true (or its sender is dropped). Returns the last state.
    pub async fn run(
        mut self,
        mut state: TraderState,
        mut shutdown: watch::Receiver<bool>,
    ) -> TraderState {
        tracing::info!("💹 Scheduler starting, cycle every {:?}", self.interval);

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                _ = ticker.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
            }

            let result = self.orchestrator.run_cycle(state.clone(), &self.config).await;
            log_cycle(&result);
            state = result.new_state;

            if let Some(store) = self.state_store.as_mut() {
                if let Err(e) = store.save(&self.account_id, &state).await {
                    tracing::warn!("Failed to save state to Redis: {}", e);
                }
            }
        }

        tracing::info!("👋 Scheduler stopped after {} cycles", state.cycle_count);
        state
    }
}

/// Cycle outcome plus a portfolio summary
pub fn log_cycle(result: &CycleResult) {
    if let Some(error) = &result.error {
        tracing::error!("Cycle failed: {}", error);
    }

    for rejection in &result.rejected_signals {
        tracing::info!(
            symbol = %rejection.signal.symbol,
            "  Rejected {:?}: {}",
            rejection.signal.direction,
            rejection.reason
        );
    }

    let state = &result.new_state;
    tracing::info!("\n📊 Portfolio Summary:");
    tracing::info!("  Equity: ${:.2}", state.account_value);
    tracing::info!("  Portfolio Value: ${:.2}", state.portfolio_value());
    tracing::info!(
        "  Breaker: {}{}",
        state.breaker.status,
        state
            .breaker
            .reason
            .as_deref()
            .map(|r| format!(" ({})", r))
            .unwrap_or_default()
    );
    tracing::info!("  Open Positions: {}", state.book.len());

    for position in state.book.iter() {
        tracing::info!(
            "    {} {} | Entry: ${:.4} | Current: ${:.4} | P&L: ${:.2} ({:.2}%)",
            position.symbol,
            position.side,
            position.entry_price,
            position.current_price,
            position.unrealized_pnl,
            position.favorable_move_pct(position.current_price)
        );
    }
}
