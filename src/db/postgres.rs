use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use sqlx::{postgres::PgPoolOptions, postgres::PgRow, PgPool, Row};
use uuid::Uuid;

use crate::models::{ExitReason, Side, TradeRecord};
use crate::persistence::PerformanceSink;
use crate::Result;

/// Postgres storage for realized trades
pub struct PostgresPerformanceSink {
    pool: PgPool,
    account: String,
}

fn decimal_to_f64(value: Decimal, column: &str) -> Result<f64> {
    value
        .to_f64()
        .ok_or_else(|| format!("{} out of range: {}", column, value).into())
}

impl PostgresPerformanceSink {
    /// Connect to Postgres
    ///
    /// # Arguments
    /// * `database_url` - Postgres connection URL
    /// * `account` - Account the trades belong to
    pub async fn new(database_url: &str, account: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        // Run migrations
        sqlx::migrate!("./migrations").run(&pool).await?;

        tracing::info!("Connected to Postgres at {}", database_url);

        Ok(Self {
            pool,
            account: account.to_string(),
        })
    }

    pub async fn save_trade(&self, trade: &TradeRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO trade_records (
                id, account, symbol, side, quantity, entry_price, exit_price,
                realized_pnl, r_multiple, entry_time, exit_time, holding_secs,
                exit_reason, leverage
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(trade.id)
        .bind(&self.account)
        .bind(&trade.symbol)
        .bind(trade.side.to_string())
        .bind(trade.quantity)
        .bind(trade.entry_price)
        .bind(trade.exit_price)
        .bind(trade.realized_pnl)
        .bind(trade.r_multiple)
        .bind(trade.entry_time)
        .bind(trade.exit_time)
        .bind(trade.holding_secs)
        .bind(trade.exit_reason.as_str())
        .bind(trade.leverage)
        .execute(&self.pool)
        .await?;

        tracing::debug!(
            "Saved trade {} for {} to Postgres",
            trade.id,
            trade.symbol
        );

        Ok(())
    }

    /// Most recent trades first
    pub async fn load_recent_trades(&self, limit: i64) -> Result<Vec<TradeRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, symbol, side, quantity, entry_price, exit_price,
                   realized_pnl, r_multiple, entry_time, exit_time, holding_secs,
                   exit_reason, leverage
            FROM trade_records
            WHERE account = $1
            ORDER BY exit_time DESC
            LIMIT $2
            "#,
        )
        .bind(&self.account)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let trades = rows
            .iter()
            .map(Self::trade_from_row)
            .collect::<Result<Vec<_>>>()?;

        tracing::info!("Loaded {} trades from Postgres", trades.len());

        Ok(trades)
    }

    fn trade_from_row(row: &PgRow) -> Result<TradeRecord> {
        let side = match row.get::<String, _>("side").as_str() {
            "LONG" => Side::Long,
            "SHORT" => Side::Short,
            other => return Err(format!("Invalid side: {}", other).into()),
        };

        let exit_reason_str: String = row.get("exit_reason");
        let exit_reason = ExitReason::parse(&exit_reason_str)
            .ok_or_else(|| format!("Invalid exit reason: {}", exit_reason_str))?;

        let r_multiple: Option<Decimal> = row.get("r_multiple");
        let entry_time: DateTime<Utc> = row.get("entry_time");
        let exit_time: DateTime<Utc> = row.get("exit_time");
        let id: Uuid = row.get("id");

        Ok(TradeRecord {
            id,
            symbol: row.get("symbol"),
            side,
            quantity: decimal_to_f64(row.get("quantity"), "quantity")?,
            entry_price: decimal_to_f64(row.get("entry_price"), "entry_price")?,
            exit_price: decimal_to_f64(row.get("exit_price"), "exit_price")?,
            realized_pnl: decimal_to_f64(row.get("realized_pnl"), "realized_pnl")?,
            r_multiple: r_multiple
                .map(|r| decimal_to_f64(r, "r_multiple"))
                .transpose()?,
            entry_time,
            exit_time,
            holding_secs: row.get("holding_secs"),
            exit_reason,
            leverage: decimal_to_f64(row.get("leverage"), "leverage")?,
        })
    }

    /// Sum of realized PnL over all trades of the account
    pub async fn total_pnl(&self) -> Result<f64> {
        let row = sqlx::query(
            "SELECT COALESCE(SUM(realized_pnl), 0) AS total FROM trade_records WHERE account = $1",
        )
        .bind(&self.account)
        .fetch_one(&self.pool)
        .await?;

        decimal_to_f64(row.get("total"), "total")
    }

    /// Delete all trades of the account (for testing)
    pub async fn clear_trades(&self) -> Result<()> {
        sqlx::query("DELETE FROM trade_records WHERE account = $1")
            .bind(&self.account)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl PerformanceSink for PostgresPerformanceSink {
    fn name(&self) -> &str {
        "postgres"
    }

    async fn record(&self, trade: &TradeRecord) -> Result<()> {
        self.save_trade(trade).await
    }
}
