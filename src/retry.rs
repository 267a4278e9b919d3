//! Shared retry policy for all remote API calls.
//!
//! Every HTTP request the engine makes goes through [`RetryPolicy::run`].
//! Responses are classified into success / retryable / fatal; retryable
//! failures (429, 5xx, connection errors, timeouts) are retried with
//! exponential backoff up to a fixed attempt cap, and a 429 honors a
//! server-supplied `Retry-After` delay when present. Fatal responses
//! (401, 403, 404, 422) surface immediately: retrying cannot change the
//! outcome. Git transport does not use this layer; it has its own timeouts.

use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{classify_status, retry_after, ApiError, ApiResult, Disposition};

/// Reusable retry policy: max attempts and the base delay for the
/// exponential schedule (base, 2*base, 4*base, ...).
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Backoff delay before the next attempt (1-based attempt index).
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt.saturating_sub(1))
    }

    /// Execute `send` until it succeeds, a fatal response arrives, or the
    /// attempt cap is reached. `send` is re-invoked for every attempt and
    /// must build a fresh request each time.
    pub async fn run<F, Fut>(&self, endpoint: &str, send: F) -> ApiResult<reqwest::Response>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<reqwest::Response, reqwest::Error>>,
    {
        let mut attempt = 0u32;
        let mut rate_limited = false;

        loop {
            attempt += 1;

            match send().await {
                Ok(response) => {
                    let status = response.status();
                    match classify_status(status) {
                        Disposition::Success => return Ok(response),
                        Disposition::Fatal => {
                            return Err(fatal_error(endpoint, status, response).await)
                        }
                        Disposition::Retryable => {
                            rate_limited = status.as_u16() == 429;

                            if attempt >= self.max_attempts {
                                return Err(if rate_limited {
                                    ApiError::RateLimited {
                                        endpoint: endpoint.to_string(),
                                        attempts: attempt,
                                    }
                                } else {
                                    ApiError::Transient {
                                        endpoint: endpoint.to_string(),
                                        attempts: attempt,
                                        detail: format!("server returned {}", status),
                                    }
                                });
                            }

                            // 429 honors the server-supplied delay when given
                            let delay = if rate_limited {
                                retry_after(response.headers())
                                    .unwrap_or_else(|| self.backoff_delay(attempt))
                            } else {
                                self.backoff_delay(attempt)
                            };

                            warn!(
                                endpoint,
                                %status,
                                attempt,
                                delay_ms = delay.as_millis() as u64,
                                "Retryable API response, backing off"
                            );
                            tokio::time::sleep(delay).await;
                        }
                    }
                }
                Err(e) if e.is_timeout() || e.is_connect() || e.is_request() => {
                    if attempt >= self.max_attempts {
                        return Err(ApiError::Transient {
                            endpoint: endpoint.to_string(),
                            attempts: attempt,
                            detail: e.to_string(),
                        });
                    }
                    let delay = self.backoff_delay(attempt);
                    warn!(
                        endpoint,
                        error = %e,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Transport failure, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    return Err(ApiError::Transient {
                        endpoint: endpoint.to_string(),
                        attempts: attempt,
                        detail: e.to_string(),
                    })
                }
            }
        }
    }
}

/// Map a fatal HTTP status to its typed error, draining the body for detail
/// where the status carries one.
async fn fatal_error(endpoint: &str, status: reqwest::StatusCode, response: reqwest::Response) -> ApiError {
    match status.as_u16() {
        401 => ApiError::Authentication {
            account: endpoint.to_string(),
        },
        403 => ApiError::Permission {
            endpoint: endpoint.to_string(),
        },
        404 => ApiError::NotFound {
            endpoint: endpoint.to_string(),
        },
        _ => {
            let detail = response.text().await.unwrap_or_default();
            debug!(endpoint, %status, "Non-retryable API response");
            ApiError::Rejected {
                endpoint: endpoint.to_string(),
                detail: if detail.is_empty() {
                    status.to_string()
                } else {
                    detail
                },
            }
        }
    }
}
