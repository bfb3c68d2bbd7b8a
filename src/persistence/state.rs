use crate::Result;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::time::{timeout, Duration};

/// Redis storage for the trader state between cycles and restarts
///
/// One JSON document per account under `perpcycle:state:{account}`.
pub struct RedisStateStore {
    conn: ConnectionManager,
}

impl RedisStateStore {
    /// Connect to Redis
    ///
    /// # Arguments
    /// * `redis_url` - Redis connection URL (e.g., "redis://127.0.0.1:6379")
    pub async fn new(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url)?;

        // Add 5 second timeout to connection attempt
        let conn = timeout(Duration::from_secs(5), ConnectionManager::new(client))
            .await
            .map_err(|_| "Redis connection timeout after 5 seconds")??;

        tracing::info!("Connected to Redis at {}", redis_url);

        Ok(Self { conn })
    }

    pub fn state_key(account: &str) -> String {
        format!("perpcycle:state:{}", account)
    }

    pub async fn save<T: Serialize>(&mut self, account: &str, state: &T) -> Result<()> {
        let value = serde_json::to_string(state)?;
        self.conn
            .set::<_, _, ()>(Self::state_key(account), value)
            .await?;

        tracing::debug!("Saved state for {} to Redis", account);
        Ok(())
    }

    /// None when no state was saved yet
    pub async fn load<T: DeserializeOwned>(&mut self, account: &str) -> Result<Option<T>> {
        let value: Option<String> = self.conn.get(Self::state_key(account)).await?;

        match value {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    pub async fn clear(&mut self, account: &str) -> Result<()> {
        self.conn.del::<_, ()>(Self::state_key(account)).await?;
        Ok(())
    }
}
