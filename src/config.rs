use std::env;

use anyhow::{anyhow, Context, Result};

/// Service configuration.
///
/// Secrets resolve from the environment first, then from Docker secret
/// files under /run/secrets (Compose deployments mount them there).
#[derive(Clone)]
pub struct Config {
    pub database_url: String,
    pub redis_url: String,
    /// Upstream provider base URL.
    pub feed_base_url: String,
    /// Shared password for the provider's encrypted payloads.
    pub decryption_key: String,
    /// Optional session cookie attached to upstream requests. Refreshed out
    /// of band by the token bot; absent means the provider allows anonymous
    /// reads.
    pub feed_session_token: Option<String>,
    pub feed_requests_per_minute: u32,
    pub tree_sync_interval_seconds: u64,
    pub odds_sync_interval_seconds: u64,
    /// TTL applied to cached canonical event documents.
    pub odds_cache_ttl_seconds: u64,
    pub fanout_workers: usize,
    pub api_port: u16,
    /// If true, run one tree sync + one odds cycle and exit (no loops).
    pub run_once: bool,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        // Database URL - composed from parts when not given directly
        let database_url = match env::var("DATABASE_URL") {
            Ok(v) if !v.trim().is_empty() => v,
            Ok(_) => return Err(anyhow!("DATABASE_URL is set but empty")),
            Err(_) => {
                let db_user = env::var("DB_USER").unwrap_or_else(|_| "exchange".to_string());
                let db_name = env::var("DB_NAME").unwrap_or_else(|_| "exchange".to_string());
                let db_host = env::var("DB_HOST").unwrap_or_else(|_| "postgres".to_string());
                let db_port = env::var("DB_PORT").unwrap_or_else(|_| "5432".to_string());
                let db_password = read_secret_file("/run/secrets/db_password", "db_password")?;
                format!("postgresql://{}:{}@{}:{}/{}", db_user, db_password, db_host, db_port, db_name)
            }
        };

        // Redis URL
        let redis_url = match env::var("REDIS_URL") {
            Ok(v) if !v.trim().is_empty() => v,
            Ok(_) => return Err(anyhow!("REDIS_URL is set but empty")),
            Err(_) => {
                let redis_password =
                    read_secret_file("/run/secrets/redis_password", "redis_password")?;
                format!("redis://:{}@redis:6379", redis_password)
            }
        };

        // Decryption key for upstream payloads
        let decryption_key = match env::var("DECRYPTION_KEY") {
            Ok(v) if !v.trim().is_empty() => v,
            Ok(_) => return Err(anyhow!("DECRYPTION_KEY is set but empty")),
            Err(_) => read_secret_file("/run/secrets/decryption_key", "decryption_key")?,
        };

        let feed_base_url = env::var("FEED_BASE_URL")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| anyhow!("FEED_BASE_URL is required"))?;

        Ok(Self {
            database_url,
            redis_url,
            feed_base_url,
            decryption_key,
            feed_session_token: env::var("FEED_SESSION_TOKEN")
                .ok()
                .filter(|v| !v.trim().is_empty()),
            feed_requests_per_minute: parse_env("FEED_REQUESTS_PER_MINUTE", 90),
            tree_sync_interval_seconds: parse_env("TREE_SYNC_INTERVAL_SECONDS", 2700),
            odds_sync_interval_seconds: parse_env("ODDS_SYNC_INTERVAL_SECONDS", 120),
            odds_cache_ttl_seconds: parse_env("ODDS_CACHE_TTL_SECONDS", 300),
            fanout_workers: parse_env("FANOUT_WORKERS", 8),
            api_port: parse_env("API_PORT", 8084),
            run_once: env::var("RUN_ONCE")
                .unwrap_or_else(|_| "false".to_string())
                .to_lowercase()
                == "true",
        })
    }
}

fn parse_env<T: std::str::FromStr + Copy>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Read a secret from a Docker secret file - REQUIRED, no fallbacks.
fn read_secret_file(file_path: &str, secret_name: &str) -> Result<String> {
    std::fs::read_to_string(file_path)
        .map(|s| s.trim().to_string())
        .context(format!(
            "Secret file not found at {} ({}). Container must have secrets mounted.",
            file_path, secret_name
        ))
}
