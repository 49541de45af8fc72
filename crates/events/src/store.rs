//! Key-value persistence of job snapshots.
//!
//! Writes are plain overwrites (last write wins, no TTL, no version check).

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use tokio::sync::{Mutex, RwLock};

/// Upper bound on a single Redis write, connection setup included.
pub const REDIS_WRITE_TIMEOUT: Duration = Duration::from_secs(2);

/// Error type for state store failures.
#[derive(Debug, thiserror::Error)]
pub enum StateStoreError {
    /// The Redis connection or command failed.
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// The snapshot could not be serialized.
    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("State write timed out after {0:?}")]
    Timeout(Duration),
}

/// A key-value sink for serialized job snapshots.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Store `value` under `key`, replacing any previous value.
    async fn put(&self, key: &str, value: &serde_json::Value) -> Result<(), StateStoreError>;
}

// ---------------------------------------------------------------------------
// RedisStateStore
// ---------------------------------------------------------------------------

/// Redis-backed store.
///
/// One multiplexed connection is shared across writes and re-established
/// after a failure. Every write is bounded by the store timeout.
pub struct RedisStateStore {
    client: redis::Client,
    conn: Mutex<Option<MultiplexedConnection>>,
    timeout: Duration,
}

impl RedisStateStore {
    /// Create a store from a `redis://` connection URL.
    ///
    /// The URL is validated here; no connection is made until the first write.
    pub fn open(url: &str) -> Result<Self, StateStoreError> {
        Ok(Self {
            client: redis::Client::open(url)?,
            conn: Mutex::new(None),
            timeout: REDIS_WRITE_TIMEOUT,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn connection(&self) -> Result<MultiplexedConnection, StateStoreError> {
        let mut cached = self.conn.lock().await;
        if let Some(conn) = cached.as_ref() {
            return Ok(conn.clone());
        }
        let conn = self
            .client
            .get_multiplexed_async_connection_with_timeouts(self.timeout, self.timeout)
            .await?;
        *cached = Some(conn.clone());
        Ok(conn)
    }

    async fn set(&self, key: &str, payload: String) -> Result<(), StateStoreError> {
        use redis::AsyncCommands;

        let mut conn = self.connection().await?;
        if let Err(e) = conn.set::<_, _, ()>(key, payload).await {
            self.conn.lock().await.take();
            return Err(e.into());
        }
        Ok(())
    }
}

#[async_trait]
impl StateStore for RedisStateStore {
    async fn put(&self, key: &str, value: &serde_json::Value) -> Result<(), StateStoreError> {
        let payload = serde_json::to_string(value)?;
        match tokio::time::timeout(self.timeout, self.set(key, payload)).await {
            Ok(result) => result,
            Err(_) => {
                self.conn.lock().await.take();
                Err(StateStoreError::Timeout(self.timeout))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// MemoryStateStore
// ---------------------------------------------------------------------------

/// In-process store used when no Redis URL is configured, and in tests.
#[derive(Default)]
pub struct MemoryStateStore {
    entries: RwLock<HashMap<String, serde_json::Value>>,
    history: RwLock<Vec<(String, serde_json::Value)>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest value stored under `key`.
    pub async fn get(&self, key: &str) -> Option<serde_json::Value> {
        self.entries.read().await.get(key).cloned()
    }

    /// Every write in order, for asserting state progressions.
    pub async fn history(&self) -> Vec<(String, serde_json::Value)> {
        self.history.read().await.clone()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn put(&self, key: &str, value: &serde_json::Value) -> Result<(), StateStoreError> {
        self.entries
            .write()
            .await
            .insert(key.to_string(), value.clone());
        self.history
            .write()
            .await
            .push((key.to_string(), value.clone()));
        Ok(())
    }
}
