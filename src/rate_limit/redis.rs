use super::store::{Commit, QuotaStore, StoreError, WatchedKey};
use crate::config::StoreConfig;
use crate::error::DispatchError;
use async_trait::async_trait;
use redis::aio::{Connection, ConnectionManager};
use redis::RedisResult;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info};

/// Redis-backed quota store.
///
/// Plain reads and increments go through a shared [`ConnectionManager`].
/// `WATCH` state is per connection, so every watched key opens its own
/// connection for the lifetime of the transaction.
pub struct RedisQuotaStore {
    client: redis::Client,
    connection: ConnectionManager,
    op_timeout: Duration,
}

impl RedisQuotaStore {
    /// Connect to the Redis instance described by `config`
    pub async fn connect(config: &StoreConfig) -> Result<Self, DispatchError> {
        let client = redis::Client::open(config.redis_url.as_str()).map_err(StoreError::from)?;
        let op_timeout = config.op_timeout();
        let connection = with_timeout(op_timeout, ConnectionManager::new(client.clone())).await?;

        info!(op_timeout_ms = op_timeout.as_millis() as u64, "Connected quota store to Redis");

        Ok(Self {
            client,
            connection,
            op_timeout,
        })
    }

    /// Test Redis connection
    pub async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        with_timeout(self.op_timeout, redis::cmd("PING").query_async(&mut conn)).await
    }

    // `aio::Connection` is the only async connection type that is not
    // multiplexed, which WATCH requires.
    #[allow(deprecated)]
    async fn dedicated_connection(&self) -> Result<Connection, StoreError> {
        with_timeout(self.op_timeout, self.client.get_async_connection()).await
    }
}

async fn with_timeout<T, F>(limit: Duration, fut: F) -> Result<T, StoreError>
where
    F: Future<Output = RedisResult<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result.map_err(StoreError::from),
        Err(_) => Err(StoreError::Timeout(limit)),
    }
}

#[async_trait]
impl QuotaStore for RedisQuotaStore {
    async fn watch(&self, key: &str) -> Result<Box<dyn WatchedKey>, StoreError> {
        let mut conn = self.dedicated_connection().await?;
        with_timeout(
            self.op_timeout,
            redis::cmd("WATCH").arg(key).query_async::<_, ()>(&mut conn),
        )
        .await?;

        Ok(Box::new(RedisWatchedKey {
            conn,
            key: key.to_string(),
            op_timeout: self.op_timeout,
        }))
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.connection.clone();
        with_timeout(
            self.op_timeout,
            redis::cmd("GET").arg(key).query_async(&mut conn),
        )
        .await
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        with_timeout(
            self.op_timeout,
            redis::cmd("SET")
                .arg(key)
                .arg(value)
                .arg("EX")
                .arg(ttl_secs.max(1))
                .query_async(&mut conn),
        )
        .await
    }

    async fn increment(&self, key: &str, ttl_secs: u64) -> Result<i64, StoreError> {
        let mut conn = self.connection.clone();
        let (count,): (i64,) = with_timeout(
            self.op_timeout,
            redis::pipe()
                .atomic()
                .cmd("SET")
                .arg(key)
                .arg(0)
                .arg("NX")
                .arg("EX")
                .arg(ttl_secs.max(1))
                .ignore()
                .cmd("INCR")
                .arg(key)
                .query_async(&mut conn),
        )
        .await?;

        debug!(key, count, "Incremented counter");
        Ok(count)
    }
}

struct RedisWatchedKey {
    conn: Connection,
    key: String,
    op_timeout: Duration,
}

#[async_trait]
impl WatchedKey for RedisWatchedKey {
    async fn get(&mut self) -> Result<Option<String>, StoreError> {
        with_timeout(
            self.op_timeout,
            redis::cmd("GET").arg(&self.key).query_async(&mut self.conn),
        )
        .await
    }

    async fn commit(self: Box<Self>, value: String, ttl_secs: u64) -> Result<Commit, StoreError> {
        let mut this = self;
        // EXEC replies nil when a watched key changed
        let reply: Option<redis::Value> = with_timeout(
            this.op_timeout,
            redis::pipe()
                .atomic()
                .cmd("SET")
                .arg(&this.key)
                .arg(value)
                .arg("EX")
                .arg(ttl_secs.max(1))
                .query_async(&mut this.conn),
        )
        .await?;

        Ok(match reply {
            Some(_) => Commit::Applied,
            None => Commit::Conflict,
        })
    }

    async fn unwatch(self: Box<Self>) -> Result<(), StoreError> {
        let mut this = self;
        with_timeout(
            this.op_timeout,
            redis::cmd("UNWATCH").query_async(&mut this.conn),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Note: These tests require a running Redis instance
    // They are ignored by default. Run with: cargo test -- --ignored

    async fn create_test_store() -> RedisQuotaStore {
        RedisQuotaStore::connect(&StoreConfig {
            redis_url: "redis://127.0.0.1:6379".to_string(),
            op_timeout_ms: 1000,
        })
        .await
        .expect("Failed to connect to Redis")
    }

    #[tokio::test]
    async fn test_connect_rejects_invalid_url() {
        let result = RedisQuotaStore::connect(&StoreConfig {
            redis_url: "not a redis url".to_string(),
            op_timeout_ms: 100,
        })
        .await;

        assert!(matches!(
            result,
            Err(DispatchError::Store(StoreError::Redis(_)))
        ));
    }

    fn test_key(name: &str) -> String {
        format!("dispatch:test:{}:{}", name, rand::random::<u32>())
    }

    #[tokio::test]
    #[ignore]
    async fn test_redis_connection() {
        let store = create_test_store().await;
        assert!(store.ping().await.is_ok());
    }

    #[tokio::test]
    #[ignore]
    async fn test_redis_watch_commit() {
        let store = create_test_store().await;
        let key = test_key("watch");

        let mut watched = store.watch(&key).await.unwrap();
        assert_eq!(watched.get().await.unwrap(), None);
        assert_eq!(
            watched.commit("1".to_string(), 10).await.unwrap(),
            Commit::Applied
        );
        assert_eq!(store.get(&key).await.unwrap().as_deref(), Some("1"));
    }

    #[tokio::test]
    #[ignore]
    async fn test_redis_watch_conflict() {
        let store = create_test_store().await;
        let key = test_key("conflict");

        let watched = store.watch(&key).await.unwrap();
        store.set_ex(&key, "other", 10).await.unwrap();
        assert_eq!(
            watched.commit("mine".to_string(), 10).await.unwrap(),
            Commit::Conflict
        );
        assert_eq!(store.get(&key).await.unwrap().as_deref(), Some("other"));
    }

    #[tokio::test]
    #[ignore]
    async fn test_redis_increment() {
        let store = create_test_store().await;
        let key = test_key("incr");

        assert_eq!(store.increment(&key, 10).await.unwrap(), 1);
        assert_eq!(store.increment(&key, 10).await.unwrap(), 2);
    }
}
