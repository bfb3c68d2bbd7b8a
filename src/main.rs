use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use perpcycle::api::{AccountStateProvider, HyperliquidClient};
use perpcycle::config::BotConfig;
use perpcycle::db::PostgresPerformanceSink;
use perpcycle::execution::PaperExecutor;
use perpcycle::market::MomentumRanker;
use perpcycle::orchestrator::scheduler::log_cycle;
use perpcycle::orchestrator::{Collaborators, CycleOrchestrator, Scheduler, TraderState};
use perpcycle::persistence::{PerformanceRecorder, PerformanceSummary, RedisStateStore};
use perpcycle::strategy::IndicatorSignalGenerator;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "perpcycle", about = "Periodic perpetuals trading cycle")]
struct Cli {
    /// Config file (defaults to ./perpcycle.toml if present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run cycles on the configured interval until Ctrl+C
    Run,
    /// Run a single cycle and print the result
    Once,
    /// Clear a tripped circuit breaker in the persisted state
    ResetBreaker,
    /// Print the persisted state
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = BotConfig::load(cli.config.as_deref())?;
    setup_logging(&config.runtime.log_filter);

    match cli.command {
        Command::Run => run(config).await,
        Command::Once => once(config).await,
        Command::ResetBreaker => reset_breaker(config).await,
        Command::Status => status(config).await,
    }
}

// ============================================================================
// Initialization Functions
// ============================================================================

fn setup_logging(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn connect_to_redis(config: &BotConfig) -> Option<RedisStateStore> {
    let url = config.runtime.redis_url.as_deref()?;

    match RedisStateStore::new(url).await {
        Ok(store) => Some(store),
        Err(e) => {
            tracing::warn!("Redis unavailable, state will not persist: {}", e);
            None
        }
    }
}

async fn build_recorder(config: &BotConfig) -> PerformanceRecorder {
    let recorder = PerformanceRecorder::new();
    let Some(url) = config.runtime.database_url.as_deref() else {
        return recorder;
    };

    match PostgresPerformanceSink::new(url, &config.runtime.account_id).await {
        Ok(sink) => {
            tracing::info!("Postgres trade recording enabled");
            recorder.with_sink(Arc::new(sink))
        }
        Err(e) => {
            tracing::warn!("Postgres not available, trades kept in memory only: {}", e);
            recorder
        }
    }
}

async fn build_orchestrator(config: &BotConfig) -> anyhow::Result<CycleOrchestrator> {
    let client = Arc::new(
        HyperliquidClient::new(config.exchange.clone(), config.analytics.clone())
            .context("Failed to create Hyperliquid client")?,
    );

    let account: Option<Arc<dyn AccountStateProvider>> = match &config.trading.account_address {
        Some(address) => {
            tracing::warn!(
                "Reconciling against {}: positions missing on the exchange will be closed locally",
                address
            );
            Some(client.clone() as Arc<dyn AccountStateProvider>)
        }
        None => None,
    };

    let collaborators = Collaborators {
        market: client,
        ranker: Arc::new(MomentumRanker::default()),
        signals: Arc::new(IndicatorSignalGenerator::new(config.signals.clone())),
        executor: Arc::new(PaperExecutor::new(config.paper.clone())),
        account,
        recorder: build_recorder(config).await,
    };

    Ok(CycleOrchestrator::new(collaborators, &config.trading))
}

async fn load_state(store: Option<&mut RedisStateStore>, config: &BotConfig) -> TraderState {
    if let Some(store) = store {
        match store.load::<TraderState>(&config.runtime.account_id).await {
            Ok(Some(state)) => {
                tracing::info!(
                    "Restored state: {} positions, {} cycles, equity ${:.2}",
                    state.book.len(),
                    state.cycle_count,
                    state.account_value
                );
                return state;
            }
            Ok(None) => tracing::info!("No saved state, starting fresh"),
            Err(e) => tracing::warn!("Failed to load saved state, starting fresh: {}", e),
        }
    }

    TraderState::new(config.runtime.initial_equity, Utc::now())
}

fn log_configuration(config: &BotConfig) {
    let trading = &config.trading;
    tracing::info!("\n📊 Configuration:");
    tracing::info!("  Universe: {}", trading.universe.join(", "));
    tracing::info!("  Top K: {} ({:?})", trading.top_k, trading.selection_policy);
    tracing::info!("  Min Confidence: {:.0}%", trading.min_confidence * 100.0);
    tracing::info!("  Max Open Positions: {}", trading.max_open_positions);
    tracing::info!(
        "  Max Daily Loss: {}%",
        trading.circuit_breakers.max_daily_loss_pct
    );
    tracing::info!("  Max Drawdown: {}%", trading.circuit_breakers.max_drawdown_pct);
    tracing::info!("  Cycle Interval: {}s", config.runtime.cycle_interval_secs);
}

// ============================================================================
// Commands
// ============================================================================

async fn run(config: BotConfig) -> anyhow::Result<()> {
    tracing::info!("🚀 perpcycle starting");
    log_configuration(&config);

    let orchestrator = Arc::new(build_orchestrator(&config).await?);
    let mut store = connect_to_redis(&config).await;
    let state = load_state(store.as_mut(), &config).await;

    let mut scheduler = Scheduler::new(
        orchestrator,
        config.trading.clone(),
        Duration::from_secs(config.runtime.cycle_interval_secs),
    );
    if let Some(store) = store {
        scheduler = scheduler.with_state_store(store, config.runtime.account_id.clone());
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let task = tokio::spawn(scheduler.run(state, shutdown_rx));

    tracing::info!("\nPress Ctrl+C to stop...\n");
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;
    tracing::info!("\n⚠️  Received Ctrl+C, finishing current cycle...");
    shutdown_tx.send(true).ok();

    let state = task.await.context("Scheduler task failed")?;
    tracing::info!(
        "👋 perpcycle stopped: {} cycles, equity ${:.2}",
        state.cycle_count,
        state.account_value
    );
    Ok(())
}

async fn once(config: BotConfig) -> anyhow::Result<()> {
    let orchestrator = build_orchestrator(&config).await?;
    let mut store = connect_to_redis(&config).await;
    let state = load_state(store.as_mut(), &config).await;

    let result = orchestrator.run_cycle(state, &config.trading).await;
    log_cycle(&result);

    if let Some(store) = store.as_mut() {
        store
            .save(&config.runtime.account_id, &result.new_state)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to save state: {}", e))?;
    }

    println!("{}", result.summary());
    match result.error {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}

async fn reset_breaker(config: BotConfig) -> anyhow::Result<()> {
    let mut store = connect_to_redis(&config)
        .await
        .context("reset-breaker needs runtime.redis_url and a reachable Redis")?;

    let mut state: TraderState = store
        .load(&config.runtime.account_id)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to load state: {}", e))?
        .context("No saved state for this account")?;

    let previous = state.breaker.status;
    state.breaker.operator_reset(Utc::now(), state.account_value);
    store
        .save(&config.runtime.account_id, &state)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to save state: {}", e))?;

    println!("Circuit breaker reset ({} -> {})", previous, state.breaker.status);
    Ok(())
}

async fn status(config: BotConfig) -> anyhow::Result<()> {
    let mut store = connect_to_redis(&config).await;
    let state = load_state(store.as_mut(), &config).await;
    let summary = PerformanceSummary::from_trades(&state.trade_history);

    println!("Account:        {}", config.runtime.account_id);
    println!("Cycles:         {}", state.cycle_count);
    println!(
        "Last cycle:     {}",
        state
            .last_cycle_at
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "never".to_string())
    );
    println!("Equity:         ${:.2}", state.account_value);
    println!("Portfolio:      ${:.2}", state.portfolio_value());
    println!(
        "Breaker:        {} {}",
        state.breaker.status,
        state.breaker.reason.as_deref().unwrap_or("")
    );
    println!(
        "Trades:         {} (win rate {:.1}%, P&L ${:.2}, profit factor {})",
        summary.total_trades,
        summary.win_rate,
        summary.total_pnl,
        summary
            .profit_factor
            .map(|pf| format!("{:.2}", pf))
            .unwrap_or_else(|| "-".to_string())
    );
    println!("Open positions: {}", state.book.len());
    for position in state.book.iter() {
        println!(
            "  {:<8} {:<5} qty {:.4} @ ${:.4} | mark ${:.4} | P&L ${:.2}",
            position.symbol,
            position.side,
            position.quantity,
            position.entry_price,
            position.current_price,
            position.unrealized_pnl
        );
    }
    Ok(())
}
