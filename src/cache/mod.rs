//! Cache layer
//!
//! Key/value backend the session store is built on. It supports:
//! - In-memory cache (moka) - default, for single-instance deployment
//! - Redis cache - for deployments where several gateway instances share sessions
//!
//! The cache driver is selected based on configuration.
//!
//! # Usage
//!
//! ```rust,ignore
//! use evaka_apigw::cache::{create_cache, CacheLayer};
//! use evaka_apigw::config::CacheConfig;
//!
//! let config = CacheConfig::default();
//! let cache = create_cache(&config).await?;
//! cache.set("key", &"value", Duration::from_secs(60)).await?;
//! ```

pub mod memory;
#[cfg(feature = "redis-cache")]
pub mod redis;

use anyhow::Result;
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::config::{CacheConfig, CacheDriver};

/// Cache layer trait
///
/// Every operation on a single key is atomic in the backend. Multi-key
/// sequences are not.
///
/// Note: Due to Rust's object safety rules, this trait cannot be used
/// as a trait object (`dyn CacheLayer`). Use the `Cache` enum instead
/// for runtime polymorphism.
#[async_trait]
pub trait CacheLayer: Send + Sync {
    /// Get a value from cache
    async fn get<T: DeserializeOwned + Send>(&self, key: &str) -> Result<Option<T>>;

    /// Set a value in cache with TTL, replacing any previous value and TTL
    async fn set<T: Serialize + Send + Sync>(&self, key: &str, value: &T, ttl: Duration) -> Result<()>;

    /// Delete a value from cache. Missing keys are not an error.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Restart the TTL of an existing entry without touching its value
    ///
    /// Returns `false`, and creates nothing, when the key is missing.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool>;

    /// Read and delete a value in one step
    ///
    /// Of several concurrent callers at most one observes `Some`.
    async fn take<T: DeserializeOwned + Send>(&self, key: &str) -> Result<Option<T>>;
}

pub use memory::MemoryCache;
#[cfg(feature = "redis-cache")]
pub use redis::RedisCache;

/// Unified cache enum for runtime polymorphism
///
/// Since `CacheLayer` trait has generic methods, it cannot be used as a trait object.
/// This enum provides runtime polymorphism by wrapping concrete cache implementations.
#[derive(Debug)]
pub enum Cache {
    /// In-memory cache using moka
    Memory(MemoryCache),
    /// Redis cache for distributed deployment
    #[cfg(feature = "redis-cache")]
    Redis(RedisCache),
}

#[async_trait]
impl CacheLayer for Cache {
    async fn get<T: DeserializeOwned + Send>(&self, key: &str) -> Result<Option<T>> {
        match self {
            Cache::Memory(cache) => cache.get(key).await,
            #[cfg(feature = "redis-cache")]
            Cache::Redis(cache) => cache.get(key).await,
        }
    }

    async fn set<T: Serialize + Send + Sync>(&self, key: &str, value: &T, ttl: Duration) -> Result<()> {
        match self {
            Cache::Memory(cache) => cache.set(key, value, ttl).await,
            #[cfg(feature = "redis-cache")]
            Cache::Redis(cache) => cache.set(key, value, ttl).await,
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        match self {
            Cache::Memory(cache) => cache.delete(key).await,
            #[cfg(feature = "redis-cache")]
            Cache::Redis(cache) => cache.delete(key).await,
        }
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        match self {
            Cache::Memory(cache) => cache.expire(key, ttl).await,
            #[cfg(feature = "redis-cache")]
            Cache::Redis(cache) => cache.expire(key, ttl).await,
        }
    }

    async fn take<T: DeserializeOwned + Send>(&self, key: &str) -> Result<Option<T>> {
        match self {
            Cache::Memory(cache) => cache.take(key).await,
            #[cfg(feature = "redis-cache")]
            Cache::Redis(cache) => cache.take(key).await,
        }
    }
}

/// Create a cache instance based on configuration
///
/// - `CacheDriver::Memory` - Creates an in-memory cache using moka
/// - `CacheDriver::Redis` - Creates a Redis cache (requires `redis-cache` feature)
///
/// # Errors
/// - Returns an error if Redis is configured but the `redis-cache` feature is not enabled
/// - Returns an error if Redis connection fails
pub async fn create_cache(config: &CacheConfig) -> Result<Arc<Cache>> {
    match config.driver {
        CacheDriver::Memory => {
            let cache = MemoryCache::with_capacity(config.max_capacity);
            Ok(Arc::new(Cache::Memory(cache)))
        }
        CacheDriver::Redis => {
            #[cfg(feature = "redis-cache")]
            {
                let redis_url = config.redis_url.as_ref()
                    .ok_or_else(|| anyhow::anyhow!(
                        "Redis URL is required when using Redis cache driver. \
                         Set 'redis_url' in cache configuration or use EVAKA_CACHE_REDIS_URL environment variable."
                    ))?;

                let cache = RedisCache::new(redis_url).await?;
                Ok(Arc::new(Cache::Redis(cache)))
            }

            #[cfg(not(feature = "redis-cache"))]
            {
                anyhow::bail!(
                    "Redis cache driver is configured but the 'redis-cache' feature is not enabled. \
                     Either enable the feature with `--features redis-cache` or use 'memory' cache driver."
                )
            }
        }
    }
}
