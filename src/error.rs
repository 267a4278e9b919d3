use std::time::Duration;
use thiserror::Error;

/// Closed set of errors produced by Bitbucket API interactions.
///
/// The engine branches on these kinds deterministically: `Authentication`
/// aborts the remaining work for that account, `Permission`/`NotFound` mark
/// the affected operation failed and the run continues, `RateLimited` and
/// `Transient` are handled by the retry layer and only surface once retries
/// are exhausted.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Credentials rejected (401). Fatal for the whole account.
    #[error("authentication failed for {account}: check email and API token")]
    Authentication { account: String },

    /// Token lacks a required scope (403). Fatal for the specific operation.
    #[error("permission denied for {endpoint}")]
    Permission { endpoint: String },

    /// Workspace or repository missing (404).
    #[error("not found: {endpoint}")]
    NotFound { endpoint: String },

    /// Request rejected as invalid (422).
    #[error("request rejected by server for {endpoint}: {detail}")]
    Rejected { endpoint: String, detail: String },

    /// Rate limited (429) after exhausting retries.
    #[error("rate limited on {endpoint} after {attempts} attempts")]
    RateLimited { endpoint: String, attempts: u32 },

    /// Connection/timeout/5xx after exhausting retries.
    #[error("transient failure on {endpoint} after {attempts} attempts: {detail}")]
    Transient {
        endpoint: String,
        attempts: u32,
        detail: String,
    },

    /// Response body could not be decoded into the expected shape.
    #[error("failed to decode response from {endpoint}: {source}")]
    Decode {
        endpoint: String,
        #[source]
        source: serde_json::Error,
    },

    /// Malformed configuration. Fatal at startup, before any work begins.
    #[error("invalid configuration: {0}")]
    Validation(String),
}

impl ApiError {
    /// Whether this error invalidates the whole account, not just the
    /// operation that produced it.
    pub fn is_account_fatal(&self) -> bool {
        matches!(self, ApiError::Authentication { .. })
    }
}

/// Result alias used by all API-facing components.
pub type ApiResult<T> = Result<T, ApiError>;

/// How the retry layer should treat a response or transport failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Success,
    /// 429 / 5xx / connection reset / timeout. Worth another attempt.
    Retryable,
    /// 401 / 403 / 404 / 422. Retrying cannot change the outcome.
    Fatal,
}

/// Classify an HTTP status code for the retry layer.
pub fn classify_status(status: reqwest::StatusCode) -> Disposition {
    if status.is_success() {
        Disposition::Success
    } else if status.as_u16() == 429 || status.is_server_error() {
        Disposition::Retryable
    } else {
        Disposition::Fatal
    }
}

/// Parse a server-supplied `Retry-After` header value (seconds form only).
pub fn retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}
