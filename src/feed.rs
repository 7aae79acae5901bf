//! Upstream feed client.
//!
//! Every provider endpoint returns an encrypted blob (see `crate::crypto`);
//! this client owns the HTTP plumbing, rate limiting and decryption, and
//! hands raw JSON documents to the normalizer/reconciler.

use std::num::NonZeroU32;
use std::time::Duration;

use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use reqwest::header::COOKIE;
use serde_json::Value;
use tracing::info;

use crate::config::Config;
use crate::crypto;
use crate::error::{AppError, Result};

pub struct FeedClient {
    http: reqwest::Client,
    base_url: String,
    decryption_key: String,
    session_token: Option<String>,
    rate_limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
}

impl FeedClient {
    pub fn new(config: &Config) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .pool_max_idle_per_host(5)
            .build()
            .map_err(AppError::Http)?;

        let per_minute = NonZeroU32::new(config.feed_requests_per_minute.max(1))
            .unwrap_or(NonZeroU32::MIN);
        let rate_limiter = RateLimiter::direct(Quota::per_minute(per_minute));

        Ok(Self {
            http,
            base_url: config.feed_base_url.trim_end_matches('/').to_string(),
            decryption_key: config.decryption_key.clone(),
            session_token: config.feed_session_token.clone(),
            rate_limiter,
        })
    }

    /// Full sport → competition → event tree snapshot.
    pub async fn fetch_tree_record(&self) -> Result<Value> {
        self.fetch_decrypted(format!("{}/exchange/tree", self.base_url)).await
    }

    /// Odds payload for one event.
    pub async fn fetch_odds(&self, sport_id: i64, event_id: i64) -> Result<Value> {
        self.fetch_decrypted(format!(
            "{}/exchange/odds?sid={sport_id}&eid={event_id}",
            self.base_url
        ))
        .await
    }

    /// Highlight/home listing for one sport.
    pub async fn fetch_highlight(&self, event_type_id: i64) -> Result<Value> {
        self.fetch_decrypted(format!(
            "{}/exchange/highlight?etid={event_type_id}",
            self.base_url
        ))
        .await
    }

    async fn fetch_decrypted(&self, url: String) -> Result<Value> {
        self.rate_limiter.until_ready().await;

        let mut request = self.http.get(&url);
        if let Some(token) = &self.session_token {
            request = request.header(COOKIE, token.clone());
        }

        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(AppError::Feed(format!("upstream error (status {status}): {body}")));
        }

        let ciphertext = extract_ciphertext(&body);
        let payload = crypto::decrypt(&ciphertext, &self.decryption_key)?;
        info!(url = %url, "fetched upstream payload");
        Ok(payload)
    }
}

/// Provider responses are either the bare base64 blob or a JSON envelope
/// with the blob under `data`.
fn extract_ciphertext(body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<Value>(body) {
        if let Some(data) = value.get("data").and_then(Value::as_str) {
            return data.to_string();
        }
        if let Some(s) = value.as_str() {
            return s.to_string();
        }
    }
    body.trim().to_string()
}
