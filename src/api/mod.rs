// Exchange data collaborators
pub mod hyperliquid;

pub use hyperliquid::{HyperliquidClient, HyperliquidConfig};

use async_trait::async_trait;
use std::collections::HashMap;

use crate::error::CollaboratorError;
use crate::models::{AccountState, MarketSnapshot};

/// Per-asset market data. Assets that failed are listed in `failures`,
/// never turned into an error for the whole call.
#[derive(Debug, Clone, Default)]
pub struct MarketFetch {
    pub snapshots: HashMap<String, MarketSnapshot>,
    pub failures: Vec<(String, String)>, // (symbol, reason)
}

#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    async fn fetch(&self, assets: &[String]) -> Result<MarketFetch, CollaboratorError>;
}

#[async_trait]
pub trait AccountStateProvider: Send + Sync {
    async fn get_user_state(&self, address: &str) -> Result<AccountState, CollaboratorError>;
}
