// Trading cycle orchestration
pub mod scheduler;

pub use scheduler::Scheduler;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::api::{AccountStateProvider, MarketDataProvider};
use crate::config::TradingConfig;
use crate::error::{CollaboratorError, CycleError};
use crate::execution::{
    in_top_n, Divergence, ExitDecision, ExitEvaluator, ExitInputs, FillEvent, LedgerOutcome,
    OrderExecutor, OrderLedger, PositionBook, PositionReconciler, SizeFix,
};
use crate::market::{select_top_k, AssetRanker};
use crate::models::{
    CandidateSignal, ExitReason, FillStatus, MarketSnapshot, RankedAsset, RejectedSignal, Side,
    SignalDirection, TradeRecord,
};
use crate::persistence::PerformanceRecorder;
use crate::risk::{BreakerStatus, CircuitBreakerState, ErrorRateTracker, PreTradeGuard};
use crate::strategy::{AccountSummary, SignalGenerator};

/// Everything carried from one cycle to the next
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TraderState {
    pub book: PositionBook,
    pub breaker: CircuitBreakerState,
    pub trade_history: Vec<TradeRecord>, // Oldest first, bounded by history_limit
    pub account_value: f64,
    pub cycle_count: u64,
    pub last_cycle_at: Option<DateTime<Utc>>,
}

impl TraderState {
    pub fn new(account_value: f64, now: DateTime<Utc>) -> Self {
        Self {
            book: PositionBook::new(),
            breaker: CircuitBreakerState::new(now, account_value),
            trade_history: Vec::new(),
            account_value,
            cycle_count: 0,
            last_cycle_at: None,
        }
    }

    /// Realized equity plus open PnL
    pub fn portfolio_value(&self) -> f64 {
        self.account_value + self.book.total_unrealized_pnl()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExecutedEntry {
    pub symbol: String,
    pub side: Side,
    pub quantity: f64,
    pub price: f64,
    pub confidence: f64,
    pub scale_in: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExecutedExit {
    pub decision: ExitDecision,
    pub quantity: f64,
    pub price: f64,
    pub trade: Option<TradeRecord>, // Set when the exit closed the position
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleDiagnostics {
    pub breaker_status: Option<BreakerStatus>,
    pub breaker_reason: Option<String>,
    pub api_error_rate_pct: Option<f64>,
    pub reconciliation_skipped: Option<String>,
    pub synthetic_closes: usize,
    pub size_fixes: Vec<SizeFix>,
    pub divergences: Vec<Divergence>,
    pub imported: Vec<String>,
    pub failed_assets: Vec<(String, String)>,
    pub ranked: usize,
    pub selected: Vec<String>,
    pub ranking_error: Option<String>,
    pub signal_error: Option<String>,
    pub exit_failures: Vec<String>,
    pub realized_trades: Vec<TradeRecord>,
    pub persisted: usize,
    pub persistence_failures: Vec<String>,
    pub duration_ms: u128,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CycleResult {
    pub success: bool,
    pub new_state: TraderState,
    pub executed_entries: Vec<ExecutedEntry>,
    pub executed_exits: Vec<ExecutedExit>,
    pub rejected_signals: Vec<RejectedSignal>,
    pub diagnostics: CycleDiagnostics,
    pub error: Option<CycleError>,
}

impl CycleResult {
    /// Whole-cycle failure: the previous state is returned untouched
    fn failed(previous: TraderState, error: CycleError) -> Self {
        Self {
            success: false,
            new_state: previous,
            executed_entries: Vec::new(),
            executed_exits: Vec::new(),
            rejected_signals: Vec::new(),
            diagnostics: CycleDiagnostics::default(),
            error: Some(error),
        }
    }

    pub fn summary(&self) -> String {
        match &self.error {
            Some(e) => format!("cycle failed: {}", e),
            None => format!(
                "{} entries, {} exits, {} rejected, {} realized, {} open positions",
                self.executed_entries.len(),
                self.executed_exits.len(),
                self.rejected_signals.len(),
                self.diagnostics.realized_trades.len(),
                self.new_state.book.len()
            ),
        }
    }
}

fn is_usable_price(price: f64) -> bool {
    price.is_finite() && price > 0.0
}

/// External collaborators the cycle consumes
#[derive(Clone)]
pub struct Collaborators {
    pub market: Arc<dyn MarketDataProvider>,
    pub ranker: Arc<dyn AssetRanker>,
    pub signals: Arc<dyn SignalGenerator>,
    pub executor: Arc<dyn OrderExecutor>,
    pub account: Option<Arc<dyn AccountStateProvider>>,
    pub recorder: PerformanceRecorder,
}

/// Entry candidate after reclassification against the book
struct EntryCandidate {
    signal: CandidateSignal,
    side: Side,
    scale_in: bool,
}

/// Runs one trading cycle at a time against a single position book
pub struct CycleOrchestrator {
    collaborators: Collaborators,
    errors: ErrorRateTracker,
    cycle_lock: tokio::sync::Mutex<()>,
}

impl CycleOrchestrator {
    pub fn new(collaborators: Collaborators, config: &TradingConfig) -> Self {
        Self {
            collaborators,
            errors: ErrorRateTracker::new(config.error_rate_window_secs, config.min_error_samples),
            cycle_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn error_rate(&self, now: DateTime<Utc>) -> Option<f64> {
        self.errors.rate_at(now)
    }

    pub async fn run_cycle(&self, previous: TraderState, config: &TradingConfig) -> CycleResult {
        self.run_cycle_at(previous, config, Utc::now()).await
    }

    /// Run one cycle as of `now`. Overlapping calls fail with `CycleInProgress`.
    pub async fn run_cycle_at(
        &self,
        previous: TraderState,
        config: &TradingConfig,
        now: DateTime<Utc>,
    ) -> CycleResult {
        let Ok(_guard) = self.cycle_lock.try_lock() else {
            tracing::warn!("⏭️  Cycle already in progress, skipping");
            return CycleResult::failed(previous, CycleError::CycleInProgress);
        };

        if let Err(e) = config.validate() {
            tracing::error!("❌ Invalid configuration, cycle aborted: {}", e);
            return CycleResult::failed(previous, e.into());
        }

        let started = Instant::now();
        let timeout = config.collaborator_timeout();
        let ledger = OrderLedger::new(config.ledger.quantity_epsilon);
        let evaluator = ExitEvaluator::new(config.exits.clone());
        let guard = PreTradeGuard::new(config.guard.clone());

        let mut state = previous;
        let mut diagnostics = CycleDiagnostics::default();
        let mut rejected = Vec::new();
        let mut executed_exits = Vec::new();
        let mut executed_entries = Vec::new();
        let mut realized: Vec<TradeRecord> = Vec::new();

        tracing::info!(
            "💹 [CYCLE {}] Starting at {}",
            state.cycle_count + 1,
            now.format("%H:%M:%S")
        );

        // 1. Circuit breaker
        state.breaker.roll_day(now, state.account_value);
        let evaluation = config.circuit_breakers.evaluate(
            &state.breaker,
            &state.trade_history,
            self.errors.rate_at(now),
            state.account_value,
        );
        state.breaker.apply(&evaluation, now);
        let entries_allowed = state.breaker.entries_allowed();
        diagnostics.breaker_status = Some(state.breaker.status);
        diagnostics.breaker_reason = state.breaker.reason.clone();
        diagnostics.api_error_rate_pct = evaluation.api_error_rate_pct;
        if !entries_allowed {
            tracing::warn!(
                "🚨 Circuit breaker {} ({}), entries suspended this cycle",
                state.breaker.status,
                state.breaker.reason.as_deref().unwrap_or("-")
            );
        }

        // 2. Reconciliation, best effort
        let mut remote_equity = false;
        match (&self.collaborators.account, &config.account_address) {
            (Some(provider), Some(address)) => {
                match self
                    .call("account", timeout, now, provider.get_user_state(address))
                    .await
                {
                    Ok(remote) => {
                        let reconciler =
                            PositionReconciler::new(config.reconcile.clone(), ledger.clone());
                        let outcome = reconciler.reconcile(&state.book, &remote, now);
                        if !outcome.is_noop() {
                            tracing::info!(
                                "🔁 Reconciled: {} closes, {} resized, {} diverged, {} imported",
                                outcome.synthetic_closes.len(),
                                outcome.size_fixes.len(),
                                outcome.divergences.len(),
                                outcome.imported.len()
                            );
                        }
                        state.book = outcome.updated;
                        if let Some(value) = outcome.account_value {
                            state.account_value = value;
                            remote_equity = true;
                        }
                        diagnostics.synthetic_closes = outcome.synthetic_closes.len();
                        diagnostics.size_fixes = outcome.size_fixes;
                        diagnostics.divergences = outcome.divergences;
                        diagnostics.imported = outcome.imported;
                        realized.extend(outcome.synthetic_closes);
                    }
                    Err(e) => {
                        tracing::warn!("Reconciliation skipped: {}", e);
                        diagnostics.reconciliation_skipped = Some(e.to_string());
                    }
                }
            }
            _ => {
                diagnostics.reconciliation_skipped = Some("no account provider".to_string());
            }
        }
        let synthetic_count = realized.len();

        // 3. Market data for the universe plus everything held
        let mut assets: Vec<String> = config.universe.clone();
        for symbol in state.book.symbols() {
            if !assets.contains(&symbol) {
                assets.push(symbol);
            }
        }

        let market: HashMap<String, MarketSnapshot> = match self
            .call("market data", timeout, now, self.collaborators.market.fetch(&assets))
            .await
        {
            Ok(fetch) => {
                for (symbol, reason) in &fetch.failures {
                    tracing::warn!(symbol = %symbol, "  ✗ Market data unavailable: {}", reason);
                }
                diagnostics.failed_assets = fetch.failures;
                fetch.snapshots
            }
            Err(e) => {
                diagnostics.failed_assets = assets
                    .iter()
                    .map(|s| (s.clone(), e.to_string()))
                    .collect();
                HashMap::new()
            }
        };

        if market.is_empty() {
            tracing::error!("❌ No market data for any of {} assets", assets.len());
            let error = CycleError::MarketDataUnavailable(format!(
                "no snapshot for any of {} assets",
                assets.len()
            ));
            // Reconciliation results still stand
            self.finish_trades(
                &mut state,
                &realized,
                synthetic_count,
                remote_equity,
                config,
                &mut diagnostics,
            )
            .await;
            diagnostics.duration_ms = started.elapsed().as_millis();
            return CycleResult {
                success: false,
                new_state: state,
                executed_entries,
                executed_exits,
                rejected_signals: rejected,
                diagnostics,
                error: Some(error),
            };
        }

        // 4. Rank and select
        let ranking: Option<Vec<RankedAsset>> = match self
            .call("ranker", timeout, now, self.collaborators.ranker.rank(&market))
            .await
        {
            Ok(ranking) => Some(ranking),
            Err(e) => {
                tracing::warn!("Ranking unavailable: {}", e);
                diagnostics.ranking_error = Some(e.to_string());
                None
            }
        };

        let mut selected = ranking
            .as_deref()
            .map(|r| select_top_k(r, config.selection_policy, config.top_k))
            .unwrap_or_default();
        diagnostics.ranked = ranking.as_ref().map_or(0, Vec::len);
        for symbol in state.book.symbols() {
            if !selected.contains(&symbol) {
                selected.push(symbol);
            }
        }
        diagnostics.selected = selected.clone();

        // 5. Refresh tracked positions
        for position in state.book.iter_mut() {
            match market.get(&position.symbol).map(|s| s.price) {
                Some(price) if is_usable_price(price) => position.mark_price(price),
                Some(price) => tracing::warn!(
                    symbol = %position.symbol,
                    "Ignoring unusable market price {}",
                    price
                ),
                None => {}
            }
            if let Some(ranking) = ranking.as_deref() {
                if in_top_n(ranking, &position.symbol, config.exits.ranking_top_n) {
                    position.rank_miss_cycles = 0;
                } else {
                    position.rank_miss_cycles += 1;
                }
            }
        }

        // 6. Candidate signals
        let account = AccountSummary {
            account_value: state.account_value,
            open_positions: state.book.iter().cloned().collect(),
        };
        let signals = match self
            .call(
                "signals",
                timeout,
                now,
                self.collaborators.signals.generate(
                    &selected,
                    &market,
                    &account,
                    ranking.as_deref().unwrap_or(&[]),
                ),
            )
            .await
        {
            Ok(batch) => {
                rejected.extend(batch.rejected);
                batch.signals
            }
            Err(e) => {
                tracing::warn!("Signal generation failed: {}", e);
                diagnostics.signal_error = Some(e.to_string());
                Vec::new()
            }
        };

        // 7. Reclassify against the book
        let mut entries: Vec<EntryCandidate> = Vec::new();
        let mut reversals: HashMap<String, (CandidateSignal, Side)> = HashMap::new();
        let mut seen: HashSet<String> = HashSet::new();

        for signal in signals {
            if !signal.has_valid_confidence() {
                let reason = format!("invalid confidence {}", signal.confidence);
                rejected.push(RejectedSignal::new(signal, reason));
                continue;
            }

            let held = state.book.get(&signal.symbol).map(|p| p.side);
            match (signal.direction, held) {
                (SignalDirection::EnterLong | SignalDirection::EnterShort, Some(held_side)) => {
                    let Some(side) = signal.direction.entry_side() else {
                        continue;
                    };
                    if side == held_side {
                        tracing::debug!(symbol = %signal.symbol, "Same-side signal, holding");
                    } else {
                        let replace = reversals
                            .get(&signal.symbol)
                            .map_or(true, |(existing, _)| existing.confidence < signal.confidence);
                        if replace {
                            reversals.insert(signal.symbol.clone(), (signal, held_side));
                        }
                    }
                }
                (SignalDirection::EnterLong | SignalDirection::EnterShort, None) => {
                    let Some(side) = signal.direction.entry_side() else {
                        continue;
                    };
                    if seen.insert(signal.symbol.clone()) {
                        entries.push(EntryCandidate {
                            signal,
                            side,
                            scale_in: false,
                        });
                    } else {
                        rejected.push(RejectedSignal::new(signal, "duplicate signal for symbol"));
                    }
                }
                (SignalDirection::Hold, Some(_)) => {}
                (SignalDirection::Hold, None) => {
                    rejected.push(RejectedSignal::new(
                        signal,
                        "hold signal without an open position",
                    ));
                }
                (SignalDirection::Add, Some(side)) => {
                    if seen.insert(signal.symbol.clone()) {
                        entries.push(EntryCandidate {
                            signal,
                            side,
                            scale_in: true,
                        });
                    } else {
                        rejected.push(RejectedSignal::new(signal, "duplicate signal for symbol"));
                    }
                }
                (SignalDirection::Add, None) => {
                    rejected.push(RejectedSignal::new(
                        signal,
                        "add signal without an open position",
                    ));
                }
            }
        }

        // 8. Exits, one position at a time
        let mut reversal_exits: HashSet<String> = HashSet::new();
        for symbol in state.book.symbols() {
            let Some(position) = state.book.get(&symbol).cloned() else {
                continue;
            };
            let snapshot = market.get(&symbol);
            let price = snapshot
                .map(|s| s.price)
                .filter(|p| is_usable_price(*p))
                .unwrap_or(position.current_price);
            if !is_usable_price(price) {
                diagnostics
                    .exit_failures
                    .push(format!("{}: no usable price", symbol));
                continue;
            }
            let inputs = ExitInputs {
                price,
                signal: reversals.get(&symbol).map(|(signal, _)| signal),
                ranking: ranking.as_deref(),
                snapshot,
            };

            let Some(decision) = evaluator.evaluate(&position, &inputs) else {
                continue;
            };
            tracing::info!(
                symbol = %symbol,
                "🔻 Exit {}: {}",
                decision.reason,
                decision.description
            );

            let fill = match self
                .call(
                    "executor",
                    timeout,
                    now,
                    self.collaborators.executor.execute_exit(
                        &position,
                        decision.exit_pct,
                        decision.reason,
                        price,
                    ),
                )
                .await
            {
                Ok(fill) => fill,
                Err(e) => {
                    tracing::error!(symbol = %symbol, "  ✗ Exit failed: {}", e);
                    diagnostics
                        .exit_failures
                        .push(format!("{} {}: {}", symbol, decision.reason, e));
                    continue;
                }
            };

            if !fill.is_executed() {
                let reason = fill.reason.as_deref().unwrap_or("no quantity filled");
                tracing::warn!(symbol = %symbol, "  ✗ Exit rejected: {}", reason);
                diagnostics
                    .exit_failures
                    .push(format!("{} {} rejected: {}", symbol, decision.reason, reason));
                continue;
            }

            let quantity = fill.filled_qty.min(position.quantity);
            let event =
                FillEvent::exit(&position, quantity, fill.filled_price, now, decision.reason);
            match ledger.apply_fill(&mut state.book, &event) {
                Ok(LedgerOutcome::Closed(trade)) => {
                    tracing::info!(
                        symbol = %symbol,
                        "  ✓ Closed {} @ ${:.4}, P&L ${:.2}",
                        trade.side,
                        trade.exit_price,
                        trade.realized_pnl
                    );
                    if decision.reason == ExitReason::SignalReversal {
                        reversal_exits.insert(symbol.clone());
                    }
                    realized.push(trade.clone());
                    executed_exits.push(ExecutedExit {
                        decision,
                        quantity,
                        price: fill.filled_price,
                        trade: Some(trade),
                    });
                }
                Ok(LedgerOutcome::Reduced {
                    closed_quantity,
                    realized_pnl,
                }) => {
                    tracing::info!(
                        symbol = %symbol,
                        "  ✓ Reduced by {:.4} @ ${:.4}, P&L ${:.2}",
                        closed_quantity,
                        fill.filled_price,
                        realized_pnl
                    );
                    // A partially filled tier is retried next cycle.
                    if decision.tier.is_some() && fill.status == FillStatus::Filled {
                        if let Some(open) = state.book.get_mut(&symbol) {
                            open.tp_tiers_taken += 1;
                        }
                    }
                    if decision.reason == ExitReason::SignalReversal {
                        reversal_exits.insert(symbol.clone());
                    }
                    executed_exits.push(ExecutedExit {
                        decision,
                        quantity,
                        price: fill.filled_price,
                        trade: None,
                    });
                }
                Ok(other) => {
                    tracing::warn!(
                        symbol = %symbol,
                        "Unexpected ledger outcome on exit: {:?}",
                        other
                    );
                }
                Err(e) => {
                    tracing::error!(symbol = %symbol, "  ✗ Exit fill not applied: {}", e);
                    diagnostics.exit_failures.push(e.to_string());
                }
            }
        }

        for (symbol, (signal, held_side)) in reversals {
            if !reversal_exits.contains(&symbol) {
                let reason = format!(
                    "opposes open {} position, reversal exit not triggered",
                    held_side
                );
                rejected.push(RejectedSignal::new(signal, reason));
            }
        }

        // 9. Entries
        if !entries_allowed {
            let reason = format!(
                "circuit breaker {}: {}",
                state.breaker.status,
                state.breaker.reason.as_deref().unwrap_or("-")
            );
            for candidate in entries {
                rejected.push(RejectedSignal::new(candidate.signal, reason.clone()));
            }
        } else {
            for candidate in entries {
                let outcome = self
                    .enter(
                        &mut state,
                        &candidate.signal,
                        candidate.side,
                        candidate.scale_in,
                        &market,
                        &guard,
                        &ledger,
                        config,
                        now,
                    )
                    .await;
                match outcome {
                    Ok(entry) => executed_entries.push(entry),
                    Err(reason) => {
                        tracing::info!(
                            symbol = %candidate.signal.symbol,
                            "  ✗ Entry rejected: {}",
                            reason
                        );
                        rejected.push(RejectedSignal::new(candidate.signal, reason));
                    }
                }
            }
        }

        // 10. Persist and assemble
        self.finish_trades(
            &mut state,
            &realized,
            synthetic_count,
            remote_equity,
            config,
            &mut diagnostics,
        )
        .await;

        state.cycle_count += 1;
        state.last_cycle_at = Some(now);
        diagnostics.duration_ms = started.elapsed().as_millis();

        tracing::info!(
            "✅ [CYCLE {}] {} entries, {} exits, {} rejected in {}ms",
            state.cycle_count,
            executed_entries.len(),
            executed_exits.len(),
            rejected.len(),
            diagnostics.duration_ms
        );

        CycleResult {
            success: true,
            new_state: state,
            executed_entries,
            executed_exits,
            rejected_signals: rejected,
            diagnostics,
            error: None,
        }
    }

    /// Gate and execute one entry. Returns the rejection reason on failure.
    #[allow(clippy::too_many_arguments)]
    async fn enter(
        &self,
        state: &mut TraderState,
        signal: &CandidateSignal,
        side: Side,
        scale_in: bool,
        market: &HashMap<String, MarketSnapshot>,
        guard: &PreTradeGuard,
        ledger: &OrderLedger,
        config: &TradingConfig,
        now: DateTime<Utc>,
    ) -> Result<ExecutedEntry, String> {
        let symbol = signal.symbol.clone();
        let snapshot = market.get(&symbol);
        let mut reasons = Vec::new();

        let verdict = guard.check(&symbol, side, snapshot);
        if !verdict.allowed() {
            reasons.extend(verdict.reasons());
        }

        if signal.confidence < config.min_confidence {
            reasons.push(format!(
                "confidence {:.0}% < {:.0}%",
                signal.confidence * 100.0,
                config.min_confidence * 100.0
            ));
        }

        if scale_in {
            match state.book.get(&symbol) {
                Some(position) if position.side == side => {}
                _ => reasons.push("position closed this cycle".to_string()),
            }
        } else if state.book.contains(&symbol) {
            reasons.push("position already open".to_string());
        } else if state.book.len() >= config.max_open_positions {
            reasons.push(format!(
                "max open positions reached ({})",
                config.max_open_positions
            ));
        }

        let Some(snapshot) = snapshot.filter(|s| is_usable_price(s.price)) else {
            reasons.push("no market price".to_string());
            return Err(reasons.join("; "));
        };

        if !reasons.is_empty() {
            return Err(reasons.join("; "));
        }

        let fill = self
            .call(
                "executor",
                config.collaborator_timeout(),
                now,
                self.collaborators.executor.execute_entry(
                    signal,
                    side,
                    snapshot.price,
                    state.account_value,
                ),
            )
            .await
            .map_err(|e| format!("execution failed: {}", e))?;

        if !fill.is_executed() {
            return Err(format!(
                "order rejected: {}",
                fill.reason.as_deref().unwrap_or("no quantity filled")
            ));
        }

        let event = FillEvent::entry(&symbol, side, fill.filled_qty, fill.filled_price, now)
            .with_leverage(signal.leverage.unwrap_or(1.0))
            .with_stops(signal.stop_loss, signal.take_profit);
        ledger
            .apply_fill(&mut state.book, &event)
            .map_err(|e| format!("fill not applied: {}", e))?;

        tracing::info!(
            symbol = %symbol,
            "  ✓ {} {} {:.4} @ ${:.4} (confidence {:.0}%)",
            if scale_in { "Added" } else { "Opened" },
            side,
            fill.filled_qty,
            fill.filled_price,
            signal.confidence * 100.0
        );

        Ok(ExecutedEntry {
            symbol,
            side,
            quantity: fill.filled_qty,
            price: fill.filled_price,
            confidence: signal.confidence,
            scale_in,
        })
    }

    /// Record realized trades, update history and equity
    async fn finish_trades(
        &self,
        state: &mut TraderState,
        realized: &[TradeRecord],
        synthetic_count: usize,
        remote_equity: bool,
        config: &TradingConfig,
        diagnostics: &mut CycleDiagnostics,
    ) {
        if realized.is_empty() {
            return;
        }

        for (i, trade) in realized.iter().enumerate() {
            // A remote account value already includes externally closed trades
            if !(remote_equity && i < synthetic_count) {
                state.account_value += trade.realized_pnl;
            }
        }

        state.trade_history.extend(realized.iter().cloned());
        if state.trade_history.len() > config.history_limit {
            let excess = state.trade_history.len() - config.history_limit;
            state.trade_history.drain(..excess);
        }
        diagnostics.realized_trades = realized.to_vec();

        match tokio::time::timeout(
            config.collaborator_timeout(),
            self.collaborators.recorder.record_all(realized),
        )
        .await
        {
            Ok(report) => {
                diagnostics.persisted = report.persisted;
                diagnostics.persistence_failures = report.failures;
            }
            Err(_) => {
                tracing::warn!("Recording {} trades timed out", realized.len());
                diagnostics.persistence_failures.push(format!(
                    "recording timed out after {}s",
                    config.collaborator_timeout_secs
                ));
            }
        }
    }

    /// Await a collaborator with a timeout and track the outcome in the error rate
    async fn call<T, F>(
        &self,
        collaborator: &str,
        timeout: Duration,
        now: DateTime<Utc>,
        fut: F,
    ) -> Result<T, CollaboratorError>
    where
        F: Future<Output = Result<T, CollaboratorError>>,
    {
        let result = match tokio::time::timeout(timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(CollaboratorError::Timeout {
                collaborator: collaborator.to_string(),
                secs: timeout.as_secs(),
            }),
        };

        match &result {
            Ok(_) => self.errors.record_success(now),
            Err(_) => self.errors.record_failure(now),
        }
        result
    }
}
