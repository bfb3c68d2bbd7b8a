use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use governor::{Quota, RateLimiter};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::Arc;

use crate::api::{AccountStateProvider, MarketDataProvider, MarketFetch};
use crate::error::CollaboratorError;
use crate::market::{build_snapshot, AnalyticsConfig, AssetContext};
use crate::models::{AccountState, Candle, MarketSnapshot, RemotePosition, Side};

const HYPERLIQUID_API_BASE: &str = "https://api.hyperliquid.xyz";

// Type alias for the rate limiter to simplify signatures
type HyperliquidRateLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HyperliquidConfig {
    pub base_url: String,
    pub requests_per_minute: u32,
    pub request_timeout_secs: u64,
    pub max_retries: u32,
}

impl Default for HyperliquidConfig {
    fn default() -> Self {
        Self {
            base_url: HYPERLIQUID_API_BASE.to_string(),
            requests_per_minute: 600,
            request_timeout_secs: 10,
            max_retries: 3,
        }
    }
}

/// Response of `{"type": "metaAndAssetCtxs"}`: universe plus per-asset contexts, same order
#[derive(Debug, Deserialize)]
struct Meta {
    universe: Vec<UniverseAsset>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UniverseAsset {
    name: String,
    max_leverage: Option<u32>,
    #[serde(default)]
    is_delisted: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireAssetCtx {
    funding: Option<String>,
    open_interest: Option<String>,
    prev_day_px: Option<String>,
    day_ntl_vlm: Option<String>,
    mark_px: Option<String>,
    mid_px: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireCandle {
    t: i64, // Open time, ms
    o: String,
    h: String,
    l: String,
    c: String,
    v: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClearinghouseState {
    margin_summary: MarginSummary,
    asset_positions: Vec<AssetPosition>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MarginSummary {
    account_value: String,
}

#[derive(Debug, Deserialize)]
struct AssetPosition {
    position: WirePosition,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WirePosition {
    coin: String,
    szi: String, // Signed size: negative is short
    entry_px: Option<String>,
    leverage: Option<WireLeverage>,
    unrealized_pnl: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireLeverage {
    value: f64,
}

fn parse_num(value: &str, field: &str) -> Result<f64, CollaboratorError> {
    value
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| {
            CollaboratorError::InvalidResponse(format!("{} is not a number: {}", field, value))
        })
}

fn parse_opt(value: Option<&String>, field: &str) -> Result<Option<f64>, CollaboratorError> {
    value.map(|v| parse_num(v, field)).transpose()
}

/// Milliseconds per candle for Hyperliquid interval strings ("15m", "1h", "4h", "1d", ...)
pub fn interval_millis(interval: &str) -> Option<i64> {
    let unit = interval.chars().last()?;
    let count: i64 = interval[..interval.len() - unit.len_utf8()].parse().ok()?;
    let unit_ms = match unit {
        'm' => 60_000,
        'h' => 3_600_000,
        'd' => 86_400_000,
        'w' => 604_800_000,
        _ => return None,
    };
    (count > 0).then_some(count * unit_ms)
}

/// Hyperliquid info API client with rate limiting
///
/// This struct is cloneable to allow sharing across async tasks.
/// All clones share the same rate limiter.
#[derive(Clone)]
pub struct HyperliquidClient {
    client: Client,
    config: HyperliquidConfig,
    analytics: AnalyticsConfig,
    rate_limiter: Arc<HyperliquidRateLimiter>,
}

impl HyperliquidClient {
    pub fn new(config: HyperliquidConfig, analytics: AnalyticsConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(config.request_timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;

        let rpm = NonZeroU32::new(config.requests_per_minute).unwrap_or(NonZeroU32::MIN);
        let rate_limiter = Arc::new(RateLimiter::direct(Quota::per_minute(rpm)));

        Ok(Self {
            client,
            config,
            analytics,
            rate_limiter,
        })
    }

    /// Rate-limited POST to /info with retry on 429 and 5xx
    async fn post_info<T: DeserializeOwned>(
        &self,
        body: &serde_json::Value,
    ) -> Result<T, CollaboratorError> {
        let url = format!("{}/info", self.config.base_url.trim_end_matches('/'));
        let max_retries = self.config.max_retries.max(1);
        let mut last_error = CollaboratorError::Unavailable("no attempt made".to_string());

        for attempt in 1..=max_retries {
            // Wait for rate limiter
            self.rate_limiter.until_ready().await;

            match self.client.post(&url).json(body).send().await {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        return response.json::<T>().await.map_err(CollaboratorError::from);
                    }

                    let error_text = response
                        .text()
                        .await
                        .unwrap_or_else(|_| "Unknown error".to_string());

                    // Other errors (4xx) - don't retry
                    if status.as_u16() != 429 && !status.is_server_error() {
                        return Err(CollaboratorError::InvalidResponse(format!(
                            "Hyperliquid API error ({}): {}",
                            status, error_text
                        )));
                    }

                    last_error = CollaboratorError::Unavailable(format!(
                        "Hyperliquid API error ({}): {}",
                        status, error_text
                    ));
                }
                Err(e) => {
                    last_error = CollaboratorError::from(e);
                }
            }

            if attempt < max_retries {
                let backoff_secs = 2u64.pow(attempt);
                tracing::warn!(
                    "Hyperliquid request failed ({}), retrying in {}s (attempt {}/{})",
                    last_error,
                    backoff_secs,
                    attempt,
                    max_retries
                );
                tokio::time::sleep(std::time::Duration::from_secs(backoff_secs)).await;
            }
        }

        Err(last_error)
    }

    /// Exchange context of every listed perpetual, keyed by symbol
    pub async fn asset_contexts(&self) -> Result<HashMap<String, AssetContext>, CollaboratorError> {
        let (meta, contexts): (Meta, Vec<WireAssetCtx>) =
            self.post_info(&json!({ "type": "metaAndAssetCtxs" })).await?;

        if meta.universe.len() != contexts.len() {
            return Err(CollaboratorError::InvalidResponse(format!(
                "universe has {} assets but {} contexts",
                meta.universe.len(),
                contexts.len()
            )));
        }

        let mut result = HashMap::new();
        for (asset, ctx) in meta.universe.into_iter().zip(contexts) {
            if asset.is_delisted {
                continue;
            }

            // A malformed asset is left out; fetch reports it as unlisted
            match Self::asset_context(&asset, &ctx) {
                Ok(Some(context)) => {
                    result.insert(asset.name.clone(), context);
                }
                Ok(None) => {
                    tracing::debug!(symbol = %asset.name, "No usable mark price, skipping");
                }
                Err(e) => {
                    tracing::warn!(symbol = %asset.name, "Skipping malformed asset context: {}", e);
                }
            }
        }

        Ok(result)
    }

    fn asset_context(
        asset: &UniverseAsset,
        ctx: &WireAssetCtx,
    ) -> Result<Option<AssetContext>, CollaboratorError> {
        let positive = |price: Option<f64>| price.filter(|p| *p > 0.0);
        let mark = positive(parse_opt(ctx.mark_px.as_ref(), "markPx")?)
            .or(positive(parse_opt(ctx.mid_px.as_ref(), "midPx")?));
        let Some(mark_price) = mark else {
            return Ok(None);
        };

        Ok(Some(AssetContext {
            symbol: asset.name.clone(),
            mark_price,
            prev_day_price: parse_opt(ctx.prev_day_px.as_ref(), "prevDayPx")?,
            day_notional_volume: parse_opt(ctx.day_ntl_vlm.as_ref(), "dayNtlVlm")?.unwrap_or(0.0),
            funding_rate: parse_opt(ctx.funding.as_ref(), "funding")?,
            open_interest: parse_opt(ctx.open_interest.as_ref(), "openInterest")?,
            max_leverage: asset.max_leverage.map(f64::from),
        }))
    }

    /// Candles for `coin` between `start_ms` and `end_ms`, oldest first
    pub async fn candles(
        &self,
        coin: &str,
        interval: &str,
        start_ms: i64,
        end_ms: i64,
    ) -> Result<Vec<Candle>, CollaboratorError> {
        let body = json!({
            "type": "candleSnapshot",
            "req": {
                "coin": coin,
                "interval": interval,
                "startTime": start_ms,
                "endTime": end_ms,
            }
        });
        let wire: Vec<WireCandle> = self.post_info(&body).await?;

        let mut candles = wire
            .into_iter()
            .map(|c| {
                let timestamp = DateTime::<Utc>::from_timestamp_millis(c.t).ok_or_else(|| {
                    CollaboratorError::InvalidResponse(format!("invalid candle time {}", c.t))
                })?;
                Ok(Candle {
                    symbol: coin.to_string(),
                    timestamp,
                    open: parse_num(&c.o, "o")?,
                    high: parse_num(&c.h, "h")?,
                    low: parse_num(&c.l, "l")?,
                    close: parse_num(&c.c, "c")?,
                    volume: parse_num(&c.v, "v")?,
                })
            })
            .collect::<Result<Vec<_>, CollaboratorError>>()?;

        candles.sort_by_key(|c| c.timestamp);
        Ok(candles)
    }

    async fn candle_window(
        &self,
        coin: &str,
        interval: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<Candle>, CollaboratorError> {
        let step = interval_millis(interval).ok_or_else(|| {
            CollaboratorError::InvalidResponse(format!("unsupported candle interval {}", interval))
        })?;
        let end_ms = now.timestamp_millis();
        let start_ms = end_ms - step * self.analytics.candle_count as i64;
        self.candles(coin, interval, start_ms, end_ms).await
    }

    async fn fetch_asset(
        &self,
        symbol: &str,
        context: Option<&AssetContext>,
        now: DateTime<Utc>,
    ) -> Result<MarketSnapshot, CollaboratorError> {
        let context = context.ok_or_else(|| {
            CollaboratorError::Unavailable(format!("{} is not listed on the exchange", symbol))
        })?;

        let (short, long) = futures::try_join!(
            self.candle_window(symbol, &self.analytics.short_interval, now),
            self.candle_window(symbol, &self.analytics.long_interval, now),
        )?;

        build_snapshot(context, &short, &long, &self.analytics, now).ok_or_else(|| {
            CollaboratorError::InvalidResponse(format!(
                "{} mark price {} is not positive",
                symbol, context.mark_price
            ))
        })
    }
}

#[async_trait]
impl MarketDataProvider for HyperliquidClient {
    async fn fetch(&self, assets: &[String]) -> Result<MarketFetch, CollaboratorError> {
        let contexts = self.asset_contexts().await?;
        let now = Utc::now();

        let futures = assets.iter().map(|symbol| {
            let contexts = &contexts;
            async move {
                let result = self.fetch_asset(symbol, contexts.get(symbol), now).await;
                (symbol.clone(), result)
            }
        });
        let results = join_all(futures).await;

        let mut fetch = MarketFetch::default();
        for (symbol, result) in results {
            match result {
                Ok(snapshot) => {
                    fetch.snapshots.insert(symbol, snapshot);
                }
                Err(e) => {
                    tracing::warn!(symbol = %symbol, "Market data unavailable: {}", e);
                    fetch.failures.push((symbol, e.to_string()));
                }
            }
        }

        tracing::debug!(
            "Fetched {}/{} assets from Hyperliquid",
            fetch.snapshots.len(),
            assets.len()
        );

        Ok(fetch)
    }
}

#[async_trait]
impl AccountStateProvider for HyperliquidClient {
    async fn get_user_state(&self, address: &str) -> Result<AccountState, CollaboratorError> {
        let state: ClearinghouseState = self
            .post_info(&json!({ "type": "clearinghouseState", "user": address }))
            .await?;

        let mut positions = Vec::new();
        for asset in state.asset_positions {
            let wire = asset.position;
            let signed_size = parse_num(&wire.szi, "szi")?;
            if signed_size == 0.0 {
                continue;
            }

            let entry_price = wire
                .entry_px
                .as_deref()
                .map(|px| parse_num(px, "entryPx"))
                .transpose()?
                .ok_or_else(|| {
                    CollaboratorError::InvalidResponse(format!("{} has no entry price", wire.coin))
                })?;

            positions.push(RemotePosition {
                side: if signed_size > 0.0 { Side::Long } else { Side::Short },
                quantity: signed_size.abs(),
                entry_price,
                leverage: wire.leverage.map(|l| l.value).unwrap_or(1.0),
                unrealized_pnl: parse_opt(wire.unrealized_pnl.as_ref(), "unrealizedPnl")?
                    .unwrap_or(0.0),
                symbol: wire.coin,
            });
        }

        Ok(AccountState {
            account_value: parse_num(&state.margin_summary.account_value, "accountValue")?,
            positions,
        })
    }
}
