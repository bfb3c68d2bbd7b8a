// Realized-trade recording and state storage
pub mod state;

pub use state::RedisStateStore;

use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::models::TradeRecord;
use crate::Result;

/// Destination for realized trades (database, memory, ...)
#[async_trait]
pub trait PerformanceSink: Send + Sync {
    fn name(&self) -> &str;

    async fn record(&self, trade: &TradeRecord) -> Result<()>;
}

/// Keeps trades in memory. Used in paper mode and tests.
#[derive(Debug, Default)]
pub struct MemoryPerformanceSink {
    trades: Mutex<Vec<TradeRecord>>,
}

impl MemoryPerformanceSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn trades(&self) -> Vec<TradeRecord> {
        self.trades.lock().await.clone()
    }
}

#[async_trait]
impl PerformanceSink for MemoryPerformanceSink {
    fn name(&self) -> &str {
        "memory"
    }

    async fn record(&self, trade: &TradeRecord) -> Result<()> {
        self.trades.lock().await.push(trade.clone());
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordReport {
    pub persisted: usize,
    pub failures: Vec<String>,
}

/// Fans realized trades out to every sink. A failing sink never blocks the others.
#[derive(Clone, Default)]
pub struct PerformanceRecorder {
    sinks: Vec<Arc<dyn PerformanceSink>>,
}

impl PerformanceRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sink(mut self, sink: Arc<dyn PerformanceSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn sink_count(&self) -> usize {
        self.sinks.len()
    }

    /// Record every trade in every sink. `persisted` counts trades stored by all sinks.
    pub async fn record_all(&self, trades: &[TradeRecord]) -> RecordReport {
        let mut report = RecordReport::default();

        for trade in trades {
            let mut stored_everywhere = true;
            for sink in &self.sinks {
                if let Err(e) = sink.record(trade).await {
                    tracing::error!(
                        symbol = %trade.symbol,
                        "Failed to record trade {} in {}: {}",
                        trade.id,
                        sink.name(),
                        e
                    );
                    report
                        .failures
                        .push(format!("{} ({}): {}", trade.symbol, sink.name(), e));
                    stored_everywhere = false;
                }
            }
            if stored_everywhere {
                report.persisted += 1;
            }
        }

        report
    }
}

/// Aggregate statistics over closed trades
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PerformanceSummary {
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub win_rate: f64, // Percent
    pub total_pnl: f64,
    pub average_r: Option<f64>,
    pub profit_factor: Option<f64>, // Gross profit / gross loss
}

impl PerformanceSummary {
    pub fn from_trades(trades: &[TradeRecord]) -> Self {
        if trades.is_empty() {
            return Self::default();
        }

        let winning_trades = trades.iter().filter(|t| t.realized_pnl > 0.0).count();
        let losing_trades = trades.iter().filter(|t| t.is_loss()).count();
        let total_pnl = trades.iter().map(|t| t.realized_pnl).sum();

        let r_values: Vec<f64> = trades.iter().filter_map(|t| t.r_multiple).collect();
        let average_r = (!r_values.is_empty())
            .then(|| r_values.iter().sum::<f64>() / r_values.len() as f64);

        let gross_profit: f64 = trades
            .iter()
            .filter(|t| t.realized_pnl > 0.0)
            .map(|t| t.realized_pnl)
            .sum();
        let gross_loss: f64 = trades
            .iter()
            .filter(|t| t.is_loss())
            .map(|t| -t.realized_pnl)
            .sum();
        let profit_factor = (gross_loss > 0.0).then(|| gross_profit / gross_loss);

        Self {
            total_trades: trades.len(),
            winning_trades,
            losing_trades,
            win_rate: winning_trades as f64 / trades.len() as f64 * 100.0,
            total_pnl,
            average_r,
            profit_factor,
        }
    }
}
