use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use perpcycle::api::{AccountStateProvider, MarketDataProvider, MarketFetch};
use perpcycle::config::TradingConfig;
use perpcycle::error::{CollaboratorError, CycleError};
use perpcycle::execution::OrderExecutor;
use perpcycle::market::MomentumRanker;
use perpcycle::models::{
    AccountState, CandidateSignal, ExitReason, Fill, MarketSnapshot, Position, RankedAsset, Side,
    SignalDirection, TradeRecord,
};
use perpcycle::orchestrator::{Collaborators, CycleOrchestrator, Scheduler, TraderState};
use perpcycle::persistence::{MemoryPerformanceSink, PerformanceRecorder};
use perpcycle::risk::BreakerStatus;
use perpcycle::strategy::{AccountSummary, SignalBatch, SignalGenerator};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

// ============================================================================
// Mock collaborators
// ============================================================================

#[derive(Default)]
struct MockMarket {
    prices: HashMap<String, f64>,
    delay: Option<Duration>,
    down: bool,
}

impl MockMarket {
    fn with_prices(prices: &[(&str, f64)]) -> Self {
        Self {
            prices: prices.iter().map(|(s, p)| (s.to_string(), *p)).collect(),
            ..Default::default()
        }
    }
}

#[async_trait]
impl MarketDataProvider for MockMarket {
    async fn fetch(&self, assets: &[String]) -> Result<MarketFetch, CollaboratorError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.down {
            return Err(CollaboratorError::Unavailable("exchange down".to_string()));
        }

        let mut fetch = MarketFetch::default();
        for asset in assets {
            match self.prices.get(asset) {
                Some(price) => {
                    fetch
                        .snapshots
                        .insert(asset.clone(), MarketSnapshot::new(asset, *price, Utc::now()));
                }
                None => fetch.failures.push((asset.clone(), "no candles".to_string())),
            }
        }
        Ok(fetch)
    }
}

struct FixedSignals(Vec<CandidateSignal>);

#[async_trait]
impl SignalGenerator for FixedSignals {
    fn name(&self) -> &str {
        "fixed"
    }

    async fn generate(
        &self,
        _symbols: &[String],
        _market: &HashMap<String, MarketSnapshot>,
        _account: &AccountSummary,
        _ranking: &[RankedAsset],
    ) -> Result<SignalBatch, CollaboratorError> {
        Ok(SignalBatch {
            signals: self.0.clone(),
            rejected: Vec::new(),
        })
    }
}

#[derive(Default)]
struct RecordingExecutor {
    entries: Mutex<Vec<String>>,
    exits: Mutex<Vec<(String, ExitReason)>>,
    failing_exits: HashSet<String>,
    /// Fill only this share of every order
    partial_ratio: Option<f64>,
}

impl RecordingExecutor {
    fn partially_filling(ratio: f64) -> Self {
        Self {
            partial_ratio: Some(ratio),
            ..Default::default()
        }
    }

    fn fill(&self, quantity: f64, price: f64) -> Fill {
        match self.partial_ratio {
            Some(ratio) => Fill::partial(quantity * ratio, price),
            None => Fill::filled(quantity, price),
        }
    }
}

#[async_trait]
impl OrderExecutor for RecordingExecutor {
    async fn execute_entry(
        &self,
        signal: &CandidateSignal,
        _side: Side,
        price: f64,
        _account_value: f64,
    ) -> Result<Fill, CollaboratorError> {
        self.entries.lock().unwrap().push(signal.symbol.clone());
        Ok(self.fill(1.0, price))
    }

    async fn execute_exit(
        &self,
        position: &Position,
        pct: f64,
        reason: ExitReason,
        price: f64,
    ) -> Result<Fill, CollaboratorError> {
        if self.failing_exits.contains(&position.symbol) {
            return Err(CollaboratorError::Transport("connection reset".to_string()));
        }
        self.exits
            .lock()
            .unwrap()
            .push((position.symbol.clone(), reason));
        Ok(self.fill(position.quantity * pct / 100.0, price))
    }
}

struct MockAccount(Option<AccountState>);

#[async_trait]
impl AccountStateProvider for MockAccount {
    async fn get_user_state(&self, _address: &str) -> Result<AccountState, CollaboratorError> {
        self.0
            .clone()
            .ok_or_else(|| CollaboratorError::Transport("timeout reading account".to_string()))
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn noon() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 10, 12, 0, 0).unwrap()
}

fn config() -> TradingConfig {
    TradingConfig {
        universe: vec!["BTC".to_string(), "ETH".to_string(), "SOL".to_string()],
        ..Default::default()
    }
}

struct Harness {
    orchestrator: Arc<CycleOrchestrator>,
    executor: Arc<RecordingExecutor>,
    sink: Arc<MemoryPerformanceSink>,
}

fn harness(
    market: MockMarket,
    signals: Vec<CandidateSignal>,
    executor: RecordingExecutor,
    account: Option<MockAccount>,
) -> Harness {
    let executor = Arc::new(executor);
    let sink = Arc::new(MemoryPerformanceSink::new());
    let collaborators = Collaborators {
        market: Arc::new(market),
        ranker: Arc::new(MomentumRanker::default()),
        signals: Arc::new(FixedSignals(signals)),
        executor: executor.clone(),
        account: account.map(|a| Arc::new(a) as Arc<dyn AccountStateProvider>),
        recorder: PerformanceRecorder::new().with_sink(sink.clone()),
    };

    Harness {
        orchestrator: Arc::new(CycleOrchestrator::new(collaborators, &config())),
        executor,
        sink,
    }
}

fn state_with(positions: Vec<Position>) -> TraderState {
    let mut state = TraderState::new(10_000.0, noon());
    for position in positions {
        state.book.insert(position);
    }
    state
}

fn long(symbol: &str, quantity: f64, entry: f64) -> Position {
    Position::open(
        symbol,
        Side::Long,
        quantity,
        entry,
        1.0,
        None,
        None,
        noon() - ChronoDuration::hours(3),
    )
}

fn losing_trade(minutes_ago: i64) -> TradeRecord {
    let exit_time = noon() - ChronoDuration::minutes(minutes_ago);
    TradeRecord {
        id: Uuid::new_v4(),
        symbol: "SOL".to_string(),
        side: Side::Long,
        quantity: 1.0,
        entry_price: 100.0,
        exit_price: 90.0,
        realized_pnl: -10.0,
        r_multiple: Some(-1.0),
        entry_time: exit_time - ChronoDuration::hours(1),
        exit_time,
        holding_secs: 3600,
        exit_reason: ExitReason::StopLoss,
        leverage: 1.0,
    }
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test]
async fn test_low_confidence_signal_rejected() {
    let h = harness(
        MockMarket::with_prices(&[("BTC", 100.0), ("ETH", 2000.0)]),
        vec![
            CandidateSignal::new("BTC", SignalDirection::EnterLong, 0.55),
            CandidateSignal::new("ETH", SignalDirection::EnterShort, 0.75)
                .with_stop_loss(2100.0)
                .with_take_profit(1800.0),
        ],
        RecordingExecutor::default(),
        None,
    );

    let result = h
        .orchestrator
        .run_cycle_at(state_with(vec![]), &config(), noon())
        .await;

    assert!(result.success);
    let rejection = result
        .rejected_signals
        .iter()
        .find(|r| r.signal.symbol == "BTC")
        .expect("BTC should be rejected");
    assert!(rejection.reason.contains("60%"), "reason: {}", rejection.reason);
    assert_eq!(rejection.reason, "confidence 55% < 60%");

    assert!(result.executed_entries.iter().all(|e| e.symbol != "BTC"));
    assert_eq!(result.executed_entries.len(), 1);
    assert_eq!(*h.executor.entries.lock().unwrap(), vec!["ETH".to_string()]);
    let eth = result.new_state.book.get("ETH").unwrap();
    assert_eq!(eth.side, Side::Short);
    assert_eq!(eth.stop_loss, Some(2100.0));
    assert_eq!(eth.take_profit, Some(1800.0));
}

#[tokio::test]
async fn test_stop_loss_wins_tie_with_take_profit() {
    let mut position = long("BTC", 1.0, 100.0);
    position.stop_loss = Some(95.0);
    position.initial_stop = Some(95.0);
    position.take_profit = Some(90.0);

    let h = harness(
        MockMarket::with_prices(&[("BTC", 92.0)]),
        vec![],
        RecordingExecutor::default(),
        None,
    );

    let result = h
        .orchestrator
        .run_cycle_at(state_with(vec![position]), &config(), noon())
        .await;

    assert_eq!(result.executed_exits.len(), 1);
    assert_eq!(result.executed_exits[0].decision.reason, ExitReason::StopLoss);
    assert!(!result.new_state.book.contains("BTC"));

    let trade = result.executed_exits[0].trade.as_ref().unwrap();
    assert_eq!(trade.realized_pnl, -8.0);
    assert_eq!(h.sink.trades().await.len(), 1);
}

#[tokio::test]
async fn test_consecutive_losses_block_entries_but_not_exits() {
    let _ = tracing_subscriber::fmt::try_init();

    let h = harness(
        MockMarket::with_prices(&[("BTC", 90.0), ("ETH", 2000.0)]),
        vec![CandidateSignal::new("ETH", SignalDirection::EnterLong, 0.9)],
        RecordingExecutor::default(),
        None,
    );

    let mut state = state_with(vec![long("BTC", 1.0, 100.0)]);
    state.trade_history = (1..=5).rev().map(|i| losing_trade(i * 10)).collect();

    let result = h.orchestrator.run_cycle_at(state, &config(), noon()).await;

    assert!(result.success);
    assert_eq!(result.diagnostics.breaker_status, Some(BreakerStatus::Paused));
    assert!(result.executed_entries.is_empty());
    assert!(h.executor.entries.lock().unwrap().is_empty());

    // The ETH entry is rejected with the breaker reason
    let rejection = &result.rejected_signals[0];
    assert_eq!(rejection.signal.symbol, "ETH");
    assert!(rejection.reason.starts_with("circuit breaker PAUSED"));

    // The BTC stop (default -8%) still fires
    assert_eq!(
        *h.executor.exits.lock().unwrap(),
        vec![("BTC".to_string(), ExitReason::StopLoss)]
    );
    assert!(!result.new_state.book.contains("BTC"));
}

#[tokio::test]
async fn test_external_close_synthesized_by_reconciliation() {
    let h = harness(
        MockMarket::with_prices(&[("BTC", 101.0), ("ETH", 2000.0)]),
        vec![],
        RecordingExecutor::default(),
        Some(MockAccount(Some(AccountState {
            account_value: 9_990.0,
            positions: vec![],
        }))),
    );
    let mut cfg = config();
    cfg.account_address = Some("0xabc".to_string());

    let result = h
        .orchestrator
        .run_cycle_at(state_with(vec![long("BTC", 1.0, 100.0)]), &cfg, noon())
        .await;

    assert!(result.success);
    assert_eq!(result.diagnostics.synthetic_closes, 1);
    assert!(!result.new_state.book.contains("BTC"));
    assert_eq!(result.diagnostics.realized_trades.len(), 1);
    assert_eq!(
        result.diagnostics.realized_trades[0].exit_reason,
        ExitReason::ExternalClose
    );
    // Remote equity is authoritative and already includes the close
    assert_eq!(result.new_state.account_value, 9_990.0);
    assert!(h.executor.exits.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_reconciliation_failure_is_skipped() {
    let h = harness(
        MockMarket::with_prices(&[("BTC", 101.0)]),
        vec![],
        RecordingExecutor::default(),
        Some(MockAccount(None)),
    );
    let mut cfg = config();
    cfg.account_address = Some("0xabc".to_string());

    let result = h
        .orchestrator
        .run_cycle_at(state_with(vec![long("BTC", 1.0, 100.0)]), &cfg, noon())
        .await;

    assert!(result.success);
    assert!(result.diagnostics.reconciliation_skipped.is_some());
    let position = result.new_state.book.get("BTC").unwrap();
    assert_eq!(position.quantity, 1.0);
    assert_eq!(position.current_price, 101.0);
}

#[tokio::test]
async fn test_market_data_unavailable_fails_cycle() {
    let h = harness(
        MockMarket {
            down: true,
            ..Default::default()
        },
        vec![CandidateSignal::new("BTC", SignalDirection::EnterLong, 0.9)],
        RecordingExecutor::default(),
        None,
    );

    let result = h
        .orchestrator
        .run_cycle_at(state_with(vec![]), &config(), noon())
        .await;

    assert!(!result.success);
    assert!(matches!(
        result.error,
        Some(CycleError::MarketDataUnavailable(_))
    ));
    assert!(h.executor.entries.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_failed_asset_excluded_not_fatal() {
    let h = harness(
        MockMarket::with_prices(&[("ETH", 2000.0)]),
        vec![CandidateSignal::new("ETH", SignalDirection::EnterLong, 0.8)],
        RecordingExecutor::default(),
        None,
    );

    let result = h
        .orchestrator
        .run_cycle_at(state_with(vec![]), &config(), noon())
        .await;

    assert!(result.success);
    let failed: Vec<&str> = result
        .diagnostics
        .failed_assets
        .iter()
        .map(|(s, _)| s.as_str())
        .collect();
    assert_eq!(failed, vec!["BTC", "SOL"]);
    assert_eq!(result.executed_entries.len(), 1);
}

#[tokio::test]
async fn test_invalid_config_returns_previous_state() {
    let h = harness(
        MockMarket::with_prices(&[("BTC", 100.0)]),
        vec![],
        RecordingExecutor::default(),
        None,
    );
    let previous = state_with(vec![long("BTC", 1.0, 100.0)]);
    let mut cfg = config();
    cfg.min_confidence = 1.5;

    let result = h
        .orchestrator
        .run_cycle_at(previous.clone(), &cfg, noon())
        .await;

    assert!(!result.success);
    assert!(matches!(result.error, Some(CycleError::Configuration(_))));
    assert_eq!(result.new_state, previous);
}

#[tokio::test]
async fn test_overlapping_cycle_rejected() {
    let h = harness(
        MockMarket {
            delay: Some(Duration::from_millis(200)),
            ..MockMarket::with_prices(&[("BTC", 100.0)])
        },
        vec![],
        RecordingExecutor::default(),
        None,
    );
    let cfg = config();

    let (first, second) = tokio::join!(
        h.orchestrator.run_cycle_at(state_with(vec![]), &cfg, noon()),
        h.orchestrator.run_cycle_at(state_with(vec![]), &cfg, noon())
    );

    let in_progress = [&first, &second]
        .iter()
        .filter(|r| r.error == Some(CycleError::CycleInProgress))
        .count();
    assert_eq!(in_progress, 1);
    assert!(first.success || second.success);
}

#[tokio::test]
async fn test_signal_reclassification() {
    let h = harness(
        MockMarket::with_prices(&[("BTC", 101.0), ("ETH", 2000.0), ("SOL", 150.0)]),
        vec![
            // Same side as the open BTC long: hold
            CandidateSignal::new("BTC", SignalDirection::EnterLong, 0.9),
            // Hold without a position: invalid
            CandidateSignal::new("SOL", SignalDirection::Hold, 0.8),
            // Add without a position: invalid
            CandidateSignal::new("ETH", SignalDirection::Add, 0.8),
        ],
        RecordingExecutor::default(),
        None,
    );

    let result = h
        .orchestrator
        .run_cycle_at(state_with(vec![long("BTC", 1.0, 100.0)]), &config(), noon())
        .await;

    assert!(result.executed_entries.is_empty());
    assert_eq!(result.new_state.book.get("BTC").unwrap().quantity, 1.0);

    let reasons: HashMap<&str, &str> = result
        .rejected_signals
        .iter()
        .map(|r| (r.signal.symbol.as_str(), r.reason.as_str()))
        .collect();
    assert_eq!(reasons.get("SOL"), Some(&"hold signal without an open position"));
    assert_eq!(reasons.get("ETH"), Some(&"add signal without an open position"));
    assert!(!reasons.contains_key("BTC"));
}

#[tokio::test]
async fn test_reversal_signal_closes_but_does_not_enter() {
    let h = harness(
        MockMarket::with_prices(&[("BTC", 101.0)]),
        vec![CandidateSignal::new("BTC", SignalDirection::EnterShort, 0.8)],
        RecordingExecutor::default(),
        None,
    );

    let result = h
        .orchestrator
        .run_cycle_at(state_with(vec![long("BTC", 1.0, 100.0)]), &config(), noon())
        .await;

    assert_eq!(result.executed_exits.len(), 1);
    assert_eq!(
        result.executed_exits[0].decision.reason,
        ExitReason::SignalReversal
    );
    assert!(result.executed_entries.is_empty());
    assert!(result.new_state.book.is_empty());
}

#[tokio::test]
async fn test_weak_reversal_rejected_with_reason() {
    let h = harness(
        MockMarket::with_prices(&[("BTC", 101.0)]),
        vec![CandidateSignal::new("BTC", SignalDirection::EnterShort, 0.65)],
        RecordingExecutor::default(),
        None,
    );

    let result = h
        .orchestrator
        .run_cycle_at(state_with(vec![long("BTC", 1.0, 100.0)]), &config(), noon())
        .await;

    assert!(result.executed_exits.is_empty());
    assert_eq!(result.rejected_signals.len(), 1);
    assert!(result.rejected_signals[0]
        .reason
        .contains("reversal exit not triggered"));
    assert!(result.new_state.book.contains("BTC"));
}

#[tokio::test]
async fn test_take_profit_tier_scales_out() {
    let h = harness(
        MockMarket::with_prices(&[("BTC", 106.0)]),
        vec![],
        RecordingExecutor::default(),
        None,
    );

    let result = h
        .orchestrator
        .run_cycle_at(state_with(vec![long("BTC", 4.0, 100.0)]), &config(), noon())
        .await;

    assert_eq!(result.executed_exits.len(), 1);
    assert_eq!(result.executed_exits[0].decision.tier, Some(0));
    assert!(result.executed_exits[0].trade.is_none());

    let position = result.new_state.book.get("BTC").unwrap();
    assert_eq!(position.quantity, 3.0);
    assert_eq!(position.tp_tiers_taken, 1);
    assert_eq!(position.entry_price, 100.0);
}

#[tokio::test]
async fn test_partial_stop_fill_reduces_position() {
    let h = harness(
        MockMarket::with_prices(&[("BTC", 90.0)]),
        vec![],
        RecordingExecutor::partially_filling(0.5),
        None,
    );

    let result = h
        .orchestrator
        .run_cycle_at(state_with(vec![long("BTC", 2.0, 100.0)]), &config(), noon())
        .await;

    assert!(result.success);
    assert_eq!(result.executed_exits.len(), 1);
    assert_eq!(result.executed_exits[0].decision.reason, ExitReason::StopLoss);
    assert_eq!(result.executed_exits[0].quantity, 1.0);
    assert!(result.executed_exits[0].trade.is_none());

    let position = result.new_state.book.get("BTC").unwrap();
    assert_eq!(position.quantity, 1.0);
    assert_eq!(position.entry_price, 100.0);
    assert!(result.diagnostics.realized_trades.is_empty());
    assert!(result.new_state.trade_history.is_empty());
    assert!(h.sink.trades().await.is_empty());
}

#[tokio::test]
async fn test_partial_entry_opens_filled_quantity_only() {
    let h = harness(
        MockMarket::with_prices(&[("ETH", 2000.0)]),
        vec![CandidateSignal::new("ETH", SignalDirection::EnterLong, 0.8)],
        RecordingExecutor::partially_filling(0.5),
        None,
    );

    let result = h
        .orchestrator
        .run_cycle_at(state_with(vec![]), &config(), noon())
        .await;

    assert_eq!(result.executed_entries.len(), 1);
    assert_eq!(result.executed_entries[0].quantity, 0.5);
    let eth = result.new_state.book.get("ETH").unwrap();
    assert_eq!(eth.quantity, 0.5);
    assert_eq!(eth.entry_price, 2000.0);
}

#[tokio::test]
async fn test_partially_filled_tier_is_not_marked_taken() {
    let h = harness(
        MockMarket::with_prices(&[("BTC", 106.0)]),
        vec![],
        RecordingExecutor::partially_filling(0.5),
        None,
    );

    let result = h
        .orchestrator
        .run_cycle_at(state_with(vec![long("BTC", 4.0, 100.0)]), &config(), noon())
        .await;

    assert_eq!(result.executed_exits.len(), 1);
    assert_eq!(result.executed_exits[0].decision.tier, Some(0));

    let position = result.new_state.book.get("BTC").unwrap();
    assert_eq!(position.quantity, 3.5);
    assert_eq!(position.tp_tiers_taken, 0);
}

#[tokio::test]
async fn test_zero_mark_price_keeps_last_price_for_external_close() {
    let first = harness(
        MockMarket::with_prices(&[("BTC", 0.0), ("ETH", 2000.0)]),
        vec![],
        RecordingExecutor::default(),
        None,
    );

    let result = first
        .orchestrator
        .run_cycle_at(state_with(vec![long("BTC", 1.0, 100.0)]), &config(), noon())
        .await;

    assert!(result.success);
    let position = result.new_state.book.get("BTC").unwrap();
    assert_eq!(position.current_price, 100.0);
    assert!(first.executor.exits.lock().unwrap().is_empty());

    // The account then reports the position gone
    let second = harness(
        MockMarket::with_prices(&[("BTC", 0.0), ("ETH", 2000.0)]),
        vec![],
        RecordingExecutor::default(),
        Some(MockAccount(Some(AccountState {
            account_value: 10_000.0,
            positions: vec![],
        }))),
    );
    let mut cfg = config();
    cfg.account_address = Some("0xabc".to_string());

    let result = second
        .orchestrator
        .run_cycle_at(result.new_state, &cfg, noon() + ChronoDuration::minutes(15))
        .await;

    assert!(result.success);
    assert_eq!(result.diagnostics.synthetic_closes, 1);
    assert!(!result.new_state.book.contains("BTC"));

    let trades = &result.diagnostics.realized_trades;
    assert_eq!(trades.len(), 1);
    assert_eq!(trades[0].exit_reason, ExitReason::ExternalClose);
    assert_eq!(trades[0].exit_price, 100.0);
    assert_eq!(trades[0].realized_pnl, 0.0);
    assert_eq!(second.sink.trades().await.len(), 1);
}

#[tokio::test]
async fn test_exit_failure_does_not_block_other_positions() {
    let executor = RecordingExecutor {
        failing_exits: ["BTC".to_string()].into_iter().collect(),
        ..Default::default()
    };
    let h = harness(
        MockMarket::with_prices(&[("BTC", 90.0), ("ETH", 1800.0)]),
        vec![],
        executor,
        None,
    );

    let result = h
        .orchestrator
        .run_cycle_at(
            state_with(vec![long("BTC", 1.0, 100.0), long("ETH", 1.0, 2000.0)]),
            &config(),
            noon(),
        )
        .await;

    assert!(result.success);
    assert_eq!(result.diagnostics.exit_failures.len(), 1);
    assert!(result.diagnostics.exit_failures[0].starts_with("BTC"));
    assert!(result.new_state.book.contains("BTC"));
    assert!(!result.new_state.book.contains("ETH"));
}

#[tokio::test]
async fn test_realized_pnl_updates_equity_and_history() {
    let h = harness(
        MockMarket::with_prices(&[("BTC", 90.0)]),
        vec![],
        RecordingExecutor::default(),
        None,
    );

    let result = h
        .orchestrator
        .run_cycle_at(state_with(vec![long("BTC", 2.0, 100.0)]), &config(), noon())
        .await;

    assert_eq!(result.new_state.account_value, 9_980.0);
    assert_eq!(result.new_state.trade_history.len(), 1);
    assert_eq!(result.new_state.cycle_count, 1);
    assert_eq!(result.new_state.last_cycle_at, Some(noon()));
    assert_eq!(result.diagnostics.persisted, 1);
}

#[tokio::test]
async fn test_scheduler_stops_on_shutdown() {
    let h = harness(
        MockMarket::with_prices(&[("BTC", 100.0)]),
        vec![],
        RecordingExecutor::default(),
        None,
    );
    let scheduler = Scheduler::new(h.orchestrator.clone(), config(), Duration::from_millis(20));
    let (tx, rx) = tokio::sync::watch::channel(false);

    let task = tokio::spawn(scheduler.run(TraderState::new(10_000.0, Utc::now()), rx));
    tokio::time::sleep(Duration::from_millis(100)).await;
    tx.send(true).unwrap();

    let state = tokio::time::timeout(Duration::from_secs(2), task)
        .await
        .expect("scheduler should stop")
        .unwrap();
    assert!(state.cycle_count >= 1);
}
