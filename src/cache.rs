//! Redis JSON cache.
//!
//! The cache is strictly best-effort: every failure is logged and reported
//! to the caller as a miss, and without Redis every lookup misses.

use metrics::counter;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use serde::{Serialize, de::DeserializeOwned};
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

/// TTL of cached project summaries.
pub const PROJECT_SUMMARY_TTL_SECS: u64 = 300;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache backend error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("cache payload error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub fn user_key(user_id: Uuid) -> String {
    format!("user:{user_id}")
}

pub fn project_summary_key(project_id: Uuid) -> String {
    format!("project_summary:{project_id}")
}

#[derive(Clone, Default)]
pub struct Cache {
    conn: Option<ConnectionManager>,
}

impl Cache {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn: Some(conn) }
    }

    pub fn disabled() -> Self {
        Self { conn: None }
    }

    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let mut conn = self.conn.clone()?;
        let result: Result<Option<T>, CacheError> = async {
            let raw: Option<String> = conn.get(key).await?;
            Ok(raw.map(|raw| serde_json::from_str(&raw)).transpose()?)
        }
        .await;

        match result {
            Ok(Some(value)) => {
                counter!("cache_hits_total").increment(1);
                Some(value)
            }
            Ok(None) => {
                counter!("cache_misses_total").increment(1);
                None
            }
            Err(err) => {
                counter!("cache_misses_total").increment(1);
                warn!(key, error = %err, "Cache read failed");
                None
            }
        }
    }

    pub async fn set_json<T: Serialize>(&self, key: &str, value: &T, ttl_secs: u64) {
        let Some(mut conn) = self.conn.clone() else {
            return;
        };
        let result: Result<(), CacheError> = async {
            let payload = serde_json::to_string(value)?;
            redis::cmd("SET")
                .arg(key)
                .arg(payload)
                .arg("EX")
                .arg(ttl_secs)
                .query_async::<_, ()>(&mut conn)
                .await?;
            Ok(())
        }
        .await;

        if let Err(err) = result {
            warn!(key, error = %err, "Cache write failed");
        }
    }

    pub async fn delete(&self, key: &str) {
        let Some(mut conn) = self.conn.clone() else {
            return;
        };
        if let Err(err) = conn.del::<_, ()>(key).await {
            warn!(key, error = %err, "Cache delete failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disabled_cache_always_misses() {
        let cache = Cache::disabled();
        cache.set_json("k", &42u32, 10).await;
        assert_eq!(cache.get_json::<u32>("k").await, None);
        cache.delete("k").await;
    }

    #[test]
    fn key_layout() {
        let id = Uuid::nil();
        assert_eq!(user_key(id), format!("user:{id}"));
        assert_eq!(project_summary_key(id), format!("project_summary:{id}"));
    }
}
