//! Redis cache implementation
//!
//! Provides a shared store so that several gateway instances see the same
//! sessions and logout tokens.
//!
//! # Features
//! - TTL-based expiration via Redis SET EX
//! - Atomic read-and-delete via GETDEL
//! - TTL refresh of existing keys via EXPIRE
//! - Thread-safe async access over a multiplexed connection

use super::CacheLayer;
use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client};
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;

/// Redis cache implementation
///
/// Values are stored as JSON strings to support generic types.
pub struct RedisCache {
    /// Multiplexed connection for async operations
    connection: MultiplexedConnection,
}

impl std::fmt::Debug for RedisCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisCache").finish_non_exhaustive()
    }
}

impl RedisCache {
    /// Create a new Redis cache with the given connection URL
    ///
    /// # Arguments
    /// * `redis_url` - Redis connection URL (e.g., "redis://localhost:6379")
    ///
    /// # Errors
    /// Returns an error if the connection cannot be established.
    pub async fn new(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url)
            .context("Failed to create Redis client")?;

        let connection = client
            .get_multiplexed_async_connection()
            .await
            .context("Failed to connect to Redis")?;

        Ok(Self { connection })
    }

    fn decode<T: DeserializeOwned>(raw: Option<String>) -> Result<Option<T>> {
        match raw {
            Some(json) => {
                let value = serde_json::from_str(&json)
                    .context("Failed to deserialize cached value")?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }
}

#[async_trait]
impl CacheLayer for RedisCache {
    async fn get<T: DeserializeOwned + Send>(&self, key: &str) -> Result<Option<T>> {
        let mut conn = self.connection.clone();

        let result: Option<String> = conn
            .get(key)
            .await
            .context("Failed to get value from Redis")?;

        Self::decode(result)
    }

    async fn set<T: Serialize + Send + Sync>(&self, key: &str, value: &T, ttl: Duration) -> Result<()> {
        let mut conn = self.connection.clone();

        let json = serde_json::to_string(value)
            .context("Failed to serialize cache value")?;

        // Redis expiry has one-second resolution
        let ttl_secs = ttl.as_secs().max(1);

        let _: () = conn.set_ex(key, json, ttl_secs)
            .await
            .context("Failed to set value in Redis")?;

        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.connection.clone();

        let _: () = conn
            .del(key)
            .await
            .context("Failed to delete key from Redis")?;

        Ok(())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.connection.clone();

        let existed: bool = conn
            .expire(key, ttl.as_secs().max(1) as i64)
            .await
            .context("Failed to extend key in Redis")?;

        Ok(existed)
    }

    async fn take<T: DeserializeOwned + Send>(&self, key: &str) -> Result<Option<T>> {
        let mut conn = self.connection.clone();

        let result: Option<String> = redis::cmd("GETDEL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .context("Failed to take value from Redis")?;

        Self::decode(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Helper to get Redis URL from environment or use default
    fn get_redis_url() -> String {
        std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string())
    }

    // Run with: cargo test -- --ignored

    #[tokio::test]
    #[ignore = "requires running Redis server"]
    async fn test_set_and_get() {
        let cache = RedisCache::new(&get_redis_url()).await.unwrap();
        cache.delete("test:key1").await.unwrap();

        cache.set("test:key1", &"value1".to_string(), Duration::from_secs(60)).await.unwrap();

        let result: Option<String> = cache.get("test:key1").await.unwrap();
        assert_eq!(result, Some("value1".to_string()));

        cache.delete("test:key1").await.unwrap();
    }

    #[tokio::test]
    #[ignore = "requires running Redis server"]
    async fn test_take_is_single_use() {
        let cache = RedisCache::new(&get_redis_url()).await.unwrap();

        cache.set("test:slo:token", &"sid".to_string(), Duration::from_secs(60)).await.unwrap();

        let first: Option<String> = cache.take("test:slo:token").await.unwrap();
        let second: Option<String> = cache.take("test:slo:token").await.unwrap();
        assert_eq!(first, Some("sid".to_string()));
        assert_eq!(second, None);
    }

    #[tokio::test]
    #[ignore = "requires running Redis server"]
    async fn test_expire_missing_key() {
        let cache = RedisCache::new(&get_redis_url()).await.unwrap();
        cache.delete("test:expire_missing").await.unwrap();

        assert!(!cache.expire("test:expire_missing", Duration::from_secs(60)).await.unwrap());
        let result: Option<String> = cache.get("test:expire_missing").await.unwrap();
        assert_eq!(result, None);
    }

    #[tokio::test]
    #[ignore = "requires running Redis server"]
    async fn test_ttl_expiration() {
        let cache = RedisCache::new(&get_redis_url()).await.unwrap();

        cache.set("test:ttl_key", &"value".to_string(), Duration::from_secs(1)).await.unwrap();
        let result: Option<String> = cache.get("test:ttl_key").await.unwrap();
        assert_eq!(result, Some("value".to_string()));

        tokio::time::sleep(Duration::from_secs(2)).await;

        let result: Option<String> = cache.get("test:ttl_key").await.unwrap();
        assert_eq!(result, None);
    }
}
