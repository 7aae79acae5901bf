//! Flat key→JSON-document cache capability.
//!
//! The engine never talks to Redis directly: every component takes a
//! `CacheStore` so the query layer and the ingestion workers can be
//! exercised against the in-memory implementation.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use serde_json::Value;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::error::CacheError;

/// Canonical cache key for an event's odds document.
pub fn odds_key(sport_id: i64, event_id: i64) -> String {
    format!("odds:{sport_id}:{event_id}")
}

#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Store a JSON document under `key`. `ttl_seconds == 0` means no expiry.
    async fn set(&self, key: &str, value: &Value, ttl_seconds: u64) -> Result<(), CacheError>;

    async fn get(&self, key: &str) -> Result<Option<Value>, CacheError>;

    /// All keys matching a glob pattern (`*` wildcard). Not a consistent
    /// snapshot; concurrent writers may or may not be observed.
    async fn scan_keys(&self, pattern: &str) -> Result<Vec<String>, CacheError>;

    async fn delete(&self, key: &str) -> Result<(), CacheError>;
}

// ---------------------------------------------------------------------------
// Redis
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct RedisCache {
    conn: redis::aio::ConnectionManager,
}

impl RedisCache {
    /// Connect with bounded exponential-backoff retry.
    pub async fn connect_with_retry(url: &str, max_retries: u32) -> anyhow::Result<Self> {
        let mut attempt = 0;
        loop {
            match redis::Client::open(url) {
                Ok(client) => match redis::aio::ConnectionManager::new(client).await {
                    Ok(conn) => {
                        info!("Connected to Redis");
                        return Ok(Self { conn });
                    }
                    Err(e) => {
                        attempt += 1;
                        if attempt >= max_retries {
                            anyhow::bail!(
                                "Failed to connect to Redis after {} attempts: {}",
                                max_retries,
                                e
                            );
                        }
                        warn!("Redis connection attempt {} failed: {}. Retrying...", attempt, e);
                        tokio::time::sleep(Duration::from_secs(2u64.pow(attempt))).await;
                    }
                },
                Err(e) => {
                    attempt += 1;
                    if attempt >= max_retries {
                        anyhow::bail!(
                            "Failed to create Redis client after {} attempts: {}",
                            max_retries,
                            e
                        );
                    }
                    warn!("Redis client creation attempt {} failed: {}. Retrying...", attempt, e);
                    tokio::time::sleep(Duration::from_secs(2u64.pow(attempt))).await;
                }
            }
        }
    }
}

#[async_trait]
impl CacheStore for RedisCache {
    async fn set(&self, key: &str, value: &Value, ttl_seconds: u64) -> Result<(), CacheError> {
        let payload = serde_json::to_string(value)?;
        let mut conn = self.conn.clone();
        if ttl_seconds == 0 {
            redis::cmd("SET")
                .arg(key)
                .arg(payload)
                .query_async::<_, ()>(&mut conn)
                .await?;
        } else {
            redis::cmd("SETEX")
                .arg(key)
                .arg(ttl_seconds)
                .arg(payload)
                .query_async::<_, ()>(&mut conn)
                .await?;
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Value>, CacheError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(key).await?;
        match raw {
            Some(s) => Ok(Some(serde_json::from_str(&s)?)),
            None => Ok(None),
        }
    }

    async fn scan_keys(&self, pattern: &str) -> Result<Vec<String>, CacheError> {
        let mut conn = self.conn.clone();
        let mut iter: redis::AsyncIter<String> = conn.scan_match(pattern).await?;
        let mut keys = Vec::new();
        while let Some(key) = iter.next_item().await {
            keys.push(key);
        }
        Ok(keys)
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.del(key).await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// In-memory
// ---------------------------------------------------------------------------

/// TTL-aware in-memory cache. Backs unit tests and single-node deployments
/// without a Redis instance.
#[derive(Default)]
pub struct InMemoryCache {
    entries: RwLock<HashMap<String, (Value, Option<Instant>)>>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStore for InMemoryCache {
    async fn set(&self, key: &str, value: &Value, ttl_seconds: u64) -> Result<(), CacheError> {
        let expires_at = (ttl_seconds > 0).then(|| Instant::now() + Duration::from_secs(ttl_seconds));
        let mut entries = self.entries.write().await;
        entries.insert(key.to_string(), (value.clone(), expires_at));
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Value>, CacheError> {
        let entries = self.entries.read().await;
        match entries.get(key) {
            Some((_, Some(expires_at))) if *expires_at <= Instant::now() => Ok(None),
            Some((value, _)) => Ok(Some(value.clone())),
            None => Ok(None),
        }
    }

    async fn scan_keys(&self, pattern: &str) -> Result<Vec<String>, CacheError> {
        let now = Instant::now();
        let entries = self.entries.read().await;
        let mut keys: Vec<String> = entries
            .iter()
            .filter(|(_, (_, expires_at))| expires_at.map_or(true, |at| at > now))
            .filter(|(key, _)| glob_match(pattern, key))
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let mut entries = self.entries.write().await;
        entries.remove(key);
        Ok(())
    }
}

/// Minimal glob matcher covering the `*` wildcard, the only one the key
/// scheme uses.
fn glob_match(pattern: &str, input: &str) -> bool {
    let pat: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = input.chars().collect();

    // Iterative matcher with single-star backtracking.
    let (mut p, mut t) = (0usize, 0usize);
    let (mut star, mut star_t) = (None::<usize>, 0usize);

    while t < text.len() {
        if p < pat.len() && (pat[p] == text[t]) {
            p += 1;
            t += 1;
        } else if p < pat.len() && pat[p] == '*' {
            star = Some(p);
            star_t = t;
            p += 1;
        } else if let Some(sp) = star {
            p = sp + 1;
            star_t += 1;
            t = star_t;
        } else {
            return false;
        }
    }
    while p < pat.len() && pat[p] == '*' {
        p += 1;
    }
    p == pat.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn glob_matches_key_scheme_patterns() {
        assert!(glob_match("odds:*:*", "odds:4:5611233"));
        assert!(glob_match("odds:*", "odds:4:5611233"));
        assert!(glob_match("odds:*:5611233", "odds:4:5611233"));
        assert!(!glob_match("odds:*:5611233", "odds:4:999"));
        assert!(!glob_match("odds:*", "tree:4"));
        assert!(glob_match("odds:4:5611233", "odds:4:5611233"));
        assert!(!glob_match("odds:*:*", "odds:"));
    }

    #[tokio::test]
    async fn memory_cache_set_get_delete() {
        let cache = InMemoryCache::new();
        cache.set("odds:4:1", &json!({"eventid": "1"}), 60).await.unwrap();

        let value = cache.get("odds:4:1").await.unwrap().unwrap();
        assert_eq!(value["eventid"], "1");

        cache.delete("odds:4:1").await.unwrap();
        assert!(cache.get("odds:4:1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn memory_cache_scan_filters_by_pattern() {
        let cache = InMemoryCache::new();
        cache.set("odds:4:1", &json!(1), 0).await.unwrap();
        cache.set("odds:2:7", &json!(2), 0).await.unwrap();
        cache.set("tree:snapshot", &json!(3), 0).await.unwrap();

        let keys = cache.scan_keys("odds:*").await.unwrap();
        assert_eq!(keys, vec!["odds:2:7", "odds:4:1"]);

        let keys = cache.scan_keys("odds:*:7").await.unwrap();
        assert_eq!(keys, vec!["odds:2:7"]);
    }

    #[tokio::test]
    async fn memory_cache_honors_ttl() {
        tokio::time::pause();
        let cache = InMemoryCache::new();
        cache.set("odds:4:1", &json!(1), 30).await.unwrap();

        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(cache.get("odds:4:1").await.unwrap().is_none());
        assert!(cache.scan_keys("odds:*").await.unwrap().is_empty());
    }
}
