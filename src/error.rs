use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Decryption failures. The only error class that is allowed to surface to
/// API callers (everything else degrades to an empty result).
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecryptError {
    #[error("invalid ciphertext format")]
    InvalidFormat,

    #[error("invalid padding")]
    InvalidPadding,

    #[error("decrypted payload is not valid UTF-8")]
    InvalidUtf8,

    #[error("base64 decode failed: {0}")]
    Base64(#[from] base64::DecodeError),
}

/// Cache failures. Callers treat these as a miss for the affected key.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache backend error: {0}")]
    Backend(#[from] redis::RedisError),

    #[error("cache serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Upstream payload didn't match any recognized structure.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("no usable record list found in upstream payload")]
    NoData,
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("decryption error: {0}")]
    Decrypt(#[from] DecryptError),

    #[error("upstream feed error: {0}")]
    Feed(String),

    #[error("{0} not found")]
    NotFound(String),
}

pub type Result<T> = std::result::Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            // Expired or misconfigured upstream session surfaces as auth failure.
            AppError::Decrypt(_) => StatusCode::UNAUTHORIZED,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Json(json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}
