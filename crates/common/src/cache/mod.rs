//! Redis integration
//!
//! Provides:
//! - Connection management
//! - JSON get/set operations with TTL
//! - Capped JSON lists (conversation history)
//! - Atomic state + history writes for a conversation turn

use crate::config::RedisConfig;
use crate::errors::{AppError, Result};
use redis::{aio::MultiplexedConnection, AsyncCommands, Client};
use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::RwLock;
use tracing::debug;

/// Redis cache configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Redis URL (redis://host:port)
    pub url: String,
    /// Default TTL in seconds
    pub default_ttl_secs: u64,
    /// Key prefix for namespacing
    pub key_prefix: String,
}

impl CacheConfig {
    /// Build from the `redis` config section; `None` when no URL is set
    pub fn from_redis(config: &RedisConfig) -> Option<Self> {
        config.url.as_ref().map(|url| Self {
            url: url.clone(),
            default_ttl_secs: config.default_ttl_secs,
            key_prefix: config.key_prefix.clone(),
        })
    }
}

/// Redis client
pub struct Cache {
    connection: RwLock<MultiplexedConnection>,
    config: CacheConfig,
}

impl Cache {
    /// Create a new cache client
    pub async fn new(config: CacheConfig) -> Result<Self> {
        let client = Client::open(config.url.as_str()).map_err(|e| AppError::CacheError {
            message: format!("Failed to create Redis client: {}", e),
        })?;

        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| AppError::CacheError {
                message: format!("Failed to connect to Redis: {}", e),
            })?;

        Ok(Self {
            connection: RwLock::new(connection),
            config,
        })
    }

    pub fn default_ttl_secs(&self) -> u64 {
        self.config.default_ttl_secs
    }

    /// Build a prefixed key
    fn key(&self, key: &str) -> String {
        format!("{}:{}", self.config.key_prefix, key)
    }

    /// Get a raw JSON value, leaving interpretation to the caller
    pub async fn get_json(&self, key: &str) -> Result<Option<serde_json::Value>> {
        let full_key = self.key(key);
        let mut conn = self.connection.write().await;

        let value: Option<String> = conn.get(&full_key).await.map_err(|e| AppError::CacheError {
            message: format!("Failed to get key '{}': {}", full_key, e),
        })?;

        match value {
            Some(json) => {
                debug!(key = %full_key, "Cache hit");
                // An unparsable blob is handed over as a plain string.
                Ok(Some(
                    serde_json::from_str(&json).unwrap_or(serde_json::Value::String(json)),
                ))
            }
            None => {
                debug!(key = %full_key, "Cache miss");
                Ok(None)
            }
        }
    }

    /// Get a typed value
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.get_json(key).await? {
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|e| AppError::CacheError {
                    message: format!("Failed to parse cached value: {}", e),
                }),
            None => Ok(None),
        }
    }

    /// Set a value with custom TTL
    pub async fn set_with_ttl<T: Serialize>(&self, key: &str, value: &T, ttl_secs: u64) -> Result<()> {
        let full_key = self.key(key);
        let json = serde_json::to_string(value)?;

        let mut conn = self.connection.write().await;
        conn.set_ex::<_, _, ()>(&full_key, &json, ttl_secs)
            .await
            .map_err(|e| AppError::CacheError {
                message: format!("Failed to set key '{}': {}", full_key, e),
            })?;

        debug!(key = %full_key, ttl_secs, "Cache set");
        Ok(())
    }

    /// Append to a list, keep only the newest `cap` entries and refresh the TTL
    pub async fn push_capped<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        cap: usize,
        ttl_secs: u64,
    ) -> Result<()> {
        let full_key = self.key(key);
        let json = serde_json::to_string(value)?;
        let keep_from = -(cap.max(1) as isize);

        let mut conn = self.connection.write().await;
        redis::pipe()
            .atomic()
            .rpush(&full_key, &json)
            .ignore()
            .ltrim(&full_key, keep_from, -1)
            .ignore()
            .expire(&full_key, ttl_secs as i64)
            .ignore()
            .query_async::<()>(&mut *conn)
            .await
            .map_err(|e| AppError::CacheError {
                message: format!("Failed to append to '{}': {}", full_key, e),
            })?;

        Ok(())
    }

    /// Set `key` and append to the capped list `list_key` in one MULTI/EXEC
    /// transaction, refreshing both TTLs
    pub async fn set_and_push_capped<T: Serialize, U: Serialize>(
        &self,
        key: &str,
        value: &T,
        list_key: &str,
        item: &U,
        cap: usize,
        ttl_secs: u64,
    ) -> Result<()> {
        let full_key = self.key(key);
        let full_list_key = self.key(list_key);
        let json = serde_json::to_string(value)?;
        let item_json = serde_json::to_string(item)?;
        let keep_from = -(cap.max(1) as isize);

        let mut conn = self.connection.write().await;
        redis::pipe()
            .atomic()
            .set_ex(&full_key, &json, ttl_secs)
            .ignore()
            .rpush(&full_list_key, &item_json)
            .ignore()
            .ltrim(&full_list_key, keep_from, -1)
            .ignore()
            .expire(&full_list_key, ttl_secs as i64)
            .ignore()
            .query_async::<()>(&mut *conn)
            .await
            .map_err(|e| AppError::CacheError {
                message: format!("Failed to write '{}' and '{}': {}", full_key, full_list_key, e),
            })?;

        debug!(key = %full_key, list = %full_list_key, ttl_secs, "Cache set and append");
        Ok(())
    }

    /// Read the newest `count` list entries, oldest first.
    /// Entries that do not parse are skipped.
    pub async fn list_tail<T: DeserializeOwned>(&self, key: &str, count: usize) -> Result<Vec<T>> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let full_key = self.key(key);
        let mut conn = self.connection.write().await;

        let raw: Vec<String> = conn
            .lrange(&full_key, -(count as isize), -1)
            .await
            .map_err(|e| AppError::CacheError {
                message: format!("Failed to read '{}': {}", full_key, e),
            })?;

        Ok(raw
            .iter()
            .filter_map(|json| serde_json::from_str(json).ok())
            .collect())
    }

    /// Delete a key
    pub async fn delete(&self, key: &str) -> Result<bool> {
        let full_key = self.key(key);
        let mut conn = self.connection.write().await;

        let deleted: i32 = conn.del(&full_key).await.map_err(|e| AppError::CacheError {
            message: format!("Failed to delete key '{}': {}", full_key, e),
        })?;

        debug!(key = %full_key, deleted = deleted > 0, "Cache delete");
        Ok(deleted > 0)
    }

    /// Ping Redis to check connectivity
    pub async fn ping(&self) -> Result<()> {
        let mut conn = self.connection.write().await;
        redis::cmd("PING")
            .query_async::<String>(&mut *conn)
            .await
            .map_err(|e| AppError::CacheError {
                message: format!("Redis ping failed: {}", e),
            })?;
        Ok(())
    }
}

/// Key builder helpers
pub mod keys {
    /// Carry-over state of a conversation
    pub fn conversation_state(conversation_id: &str) -> String {
        format!("conversation:{}:state", conversation_id)
    }

    /// Message history of a conversation
    pub fn conversation_messages(conversation_id: &str) -> String {
        format!("conversation:{}:messages", conversation_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_builders() {
        assert_eq!(keys::conversation_state("c-9"), "conversation:c-9:state");
        assert_eq!(keys::conversation_messages("c-9"), "conversation:c-9:messages");
    }

    #[test]
    fn test_cache_config_requires_url() {
        let mut redis = RedisConfig::default();
        assert!(CacheConfig::from_redis(&redis).is_none());

        redis.url = Some("redis://localhost:6379".to_string());
        let config = CacheConfig::from_redis(&redis).unwrap();
        assert_eq!(config.key_prefix, "citeforge");
    }
}
