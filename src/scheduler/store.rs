//! Result store and task queues over one key-value backend.
//!
//! The same backend holds two kinds of data:
//!
//! - Result values: `GET`/`SET` on the fingerprint key, JSON-encoded.
//! - Task queues: one list per queue name. Producers `LPUSH` fingerprints and
//!   workers pop them from the right with `BRPOP`, giving FIFO order. The
//!   pop removes the entry atomically, so one entry is handed to exactly one
//!   worker.
//!
//! A third primitive, `try_claim`, is a conditional set with expiry. The
//! coordinator uses it so that concurrent producers of the same fingerprint
//! enqueue one work item between them.
//!
//! Two backends implement [`ResultStore`]:
//!
//! - [`RedisStore`]: the production backend.
//! - [`MemoryStore`]: an in-process backend with the same semantics, used by
//!   tests and single-process runs.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use thiserror::Error;
use tokio::sync::Notify;
use tokio::time::Instant;

use super::job::ResultRecord;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Failed to connect to the backend.
    #[error("Store connection failed: {0}")]
    ConnectionFailed(String),

    /// Redis operation failed.
    #[error("Redis operation failed: {0}")]
    RedisError(#[from] redis::RedisError),

    /// The in-memory backend's lock was poisoned by a panicking holder.
    #[error("Store state poisoned")]
    Poisoned,
}

/// Key-value store that doubles as a FIFO task queue.
#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Checks that the backend is reachable.
    async fn ping(&self) -> Result<(), StoreError>;

    /// Returns the raw value stored under `key`, if any.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Overwrites the value under `key`.
    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Appends `key` to the named queue.
    async fn enqueue(&self, queue: &str, key: &str) -> Result<(), StoreError>;

    /// Pops the oldest entry of the named queue, blocking up to `timeout`.
    ///
    /// A zero timeout blocks until an entry arrives. Returns `Ok(None)` when
    /// the timeout expires with the queue still empty.
    async fn dequeue(&self, queue: &str, timeout: Duration) -> Result<Option<String>, StoreError>;

    /// Atomically sets `key` if it is absent, expiring it after `ttl`.
    ///
    /// Returns `true` when this caller created the key.
    async fn try_claim(&self, key: &str, ttl: Duration) -> Result<bool, StoreError>;

    /// Returns the number of entries waiting in the named queue.
    async fn queue_len(&self, queue: &str) -> Result<usize, StoreError>;

    /// Publishes a record under `key`.
    async fn publish(&self, key: &str, record: &ResultRecord) -> Result<(), StoreError> {
        self.set(key, &record.to_json()).await
    }
}

/// Redis-backed store.
///
/// Blocking pops run on their own connection: a `BRPOP` parks the
/// connection it is sent on, and other commands must not queue behind it.
pub struct RedisStore {
    /// Connection for point reads and writes.
    redis: ConnectionManager,
    /// Connection reserved for blocking pops.
    blocking: ConnectionManager,
}

impl RedisStore {
    /// Connects to Redis.
    ///
    /// # Arguments
    ///
    /// * `redis_url` - Redis connection URL (e.g., "redis://localhost:6379")
    ///
    /// # Errors
    ///
    /// Returns `StoreError::ConnectionFailed` if the connection fails.
    pub async fn connect(redis_url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| StoreError::ConnectionFailed(e.to_string()))?;

        let redis = ConnectionManager::new(client.clone())
            .await
            .map_err(|e| StoreError::ConnectionFailed(e.to_string()))?;

        let blocking = ConnectionManager::new(client)
            .await
            .map_err(|e| StoreError::ConnectionFailed(e.to_string()))?;

        Ok(Self { redis, blocking })
    }
}

#[async_trait]
impl ResultStore for RedisStore {
    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.redis.clone();
        redis::cmd("PING").query_async::<_, String>(&mut conn).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.redis.clone();
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut conn = self.redis.clone();
        conn.set::<_, _, ()>(key, value).await?;
        Ok(())
    }

    async fn enqueue(&self, queue: &str, key: &str) -> Result<(), StoreError> {
        let mut conn = self.redis.clone();
        conn.lpush::<_, _, ()>(queue, key).await?;
        Ok(())
    }

    async fn dequeue(&self, queue: &str, timeout: Duration) -> Result<Option<String>, StoreError> {
        let mut conn = self.blocking.clone();
        // BRPOP treats 0 as "block forever"
        let timeout_secs = if timeout.is_zero() {
            0
        } else {
            timeout.as_secs().max(1)
        };

        let popped: Option<(String, String)> = redis::cmd("BRPOP")
            .arg(queue)
            .arg(timeout_secs)
            .query_async(&mut conn)
            .await?;

        Ok(popped.map(|(_, key)| key))
    }

    async fn try_claim(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        let mut conn = self.redis.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(uuid::Uuid::new_v4().to_string())
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn queue_len(&self, queue: &str) -> Result<usize, StoreError> {
        let mut conn = self.redis.clone();
        let len: usize = conn.llen(queue).await?;
        Ok(len)
    }
}

#[derive(Default)]
struct MemoryState {
    values: HashMap<String, (String, Option<Instant>)>,
    queues: HashMap<String, VecDeque<String>>,
}

impl MemoryState {
    fn live_value(&mut self, key: &str) -> Option<&String> {
        let expired = matches!(
            self.values.get(key),
            Some((_, Some(expires_at))) if *expires_at <= Instant::now()
        );
        if expired {
            self.values.remove(key);
        }
        self.values.get(key).map(|(value, _)| value)
    }
}

/// In-process store with the same semantics as [`RedisStore`].
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    pushed: Notify,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut MemoryState) -> T) -> Result<T, StoreError> {
        let mut state = self.state.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(f(&mut state))
    }
}

#[async_trait]
impl ResultStore for MemoryStore {
    async fn ping(&self) -> Result<(), StoreError> {
        self.with_state(|_| ())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.with_state(|state| state.live_value(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.with_state(|state| {
            state
                .values
                .insert(key.to_string(), (value.to_string(), None));
        })
    }

    async fn enqueue(&self, queue: &str, key: &str) -> Result<(), StoreError> {
        self.with_state(|state| {
            state
                .queues
                .entry(queue.to_string())
                .or_default()
                .push_back(key.to_string());
        })?;
        self.pushed.notify_waiters();
        Ok(())
    }

    async fn dequeue(&self, queue: &str, timeout: Duration) -> Result<Option<String>, StoreError> {
        let deadline = (!timeout.is_zero()).then(|| Instant::now() + timeout);

        loop {
            // Register for wakeups before checking, so a push between the
            // check and the wait is not missed.
            let notified = self.pushed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let popped = self.with_state(|state| {
                state
                    .queues
                    .get_mut(queue)
                    .and_then(|entries| entries.pop_front())
            })?;
            if popped.is_some() {
                return Ok(popped);
            }

            match deadline {
                None => notified.await,
                Some(deadline) => {
                    if tokio::time::timeout_at(deadline, notified).await.is_err() {
                        return Ok(None);
                    }
                }
            }
        }
    }

    async fn try_claim(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        self.with_state(|state| {
            if state.live_value(key).is_some() {
                return false;
            }
            let claim = uuid::Uuid::new_v4().to_string();
            state
                .values
                .insert(key.to_string(), (claim, Some(Instant::now() + ttl)));
            true
        })
    }

    async fn queue_len(&self, queue: &str) -> Result<usize, StoreError> {
        self.with_state(|state| state.queues.get(queue).map_or(0, VecDeque::len))
    }
}
