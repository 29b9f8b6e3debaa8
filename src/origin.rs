//! Origin fetcher: pooled outbound HTTP with retries and a circuit breaker.
//!
//! One `reqwest::Client` (and thus one connection pool per origin host)
//! serves every cache miss. Transport failures map onto the proxy's error
//! taxonomy; responses with status >= 400 are returned to the caller
//! untouched so the pipeline can pass them through.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use reqwest::header::HeaderMap;
use reqwest::{Client, Method, Response};
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use crate::config::OriginConfig;

/// Transport-level failures. Origin HTTP statuses are not errors here.
#[derive(Debug, Error)]
pub enum OriginError {
    #[error("origin request timed out")]
    Timeout,
    #[error("origin connection refused")]
    Refused,
    #[error("origin circuit open for {host}")]
    CircuitOpen { host: String },
    #[error("origin transport error: {0}")]
    Transport(String),
}

#[derive(Default)]
struct BreakerState {
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

pub struct OriginClient {
    client: Client,
    retry_max_attempts: u32,
    backoff_min: Duration,
    backoff_max: Duration,
    breaker_enabled: bool,
    breaker_threshold: u32,
    breaker_cooldown: Duration,
    breakers: DashMap<String, BreakerState>,
}

impl OriginClient {
    pub fn new(config: &OriginConfig) -> Self {
        let client = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .pool_idle_timeout(config.idle_conn_timeout)
            .pool_max_idle_per_host(config.max_idle_per_host)
            .build()
            .expect("origin HTTP client construction cannot fail with static options");

        Self {
            client,
            retry_max_attempts: config.retry.max_attempts.max(1),
            backoff_min: config.retry.backoff_min,
            backoff_max: config.retry.backoff_max,
            breaker_enabled: config.circuit_breaker.enabled,
            breaker_threshold: config.circuit_breaker.failure_threshold.max(1),
            breaker_cooldown: config.circuit_breaker.cooldown,
            breakers: DashMap::new(),
        }
    }

    /// The shared client, for collaborators that need plain HTTP (JWKS).
    pub fn http_client(&self) -> Client {
        self.client.clone()
    }

    /// Issue one request with retries.
    ///
    /// Only idempotent methods are retried, and only on transport errors or
    /// 5xx responses; 4xx responses return immediately. The last failure is
    /// returned once attempts are exhausted.
    pub async fn fetch(
        &self,
        method: Method,
        url: &Url,
        headers: HeaderMap,
    ) -> Result<Response, OriginError> {
        let host = url.host_str().unwrap_or_default().to_string();
        self.check_breaker(&host)?;

        let retryable_method =
            method == Method::GET || method == Method::HEAD || method == Method::OPTIONS;
        let max_attempts = if retryable_method {
            self.retry_max_attempts
        } else {
            1
        };

        let mut last_err: Option<OriginError> = None;

        for attempt in 1..=max_attempts {
            let request = self
                .client
                .request(method.clone(), url.clone())
                .headers(headers.clone());

            match request.send().await {
                Ok(response) if response.status().as_u16() >= 500 => {
                    warn!(
                        %url,
                        status = response.status().as_u16(),
                        attempt,
                        max_attempts,
                        "origin returned server error"
                    );
                    self.record_failure(&host);
                    if attempt == max_attempts {
                        // Pass the 5xx through; it is a response, not a
                        // transport error.
                        return Ok(response);
                    }
                }
                Ok(response) => {
                    self.record_success(&host);
                    return Ok(response);
                }
                Err(err) => {
                    let mapped = map_transport_error(&err);
                    warn!(%url, attempt, max_attempts, "origin fetch failed: {err}");
                    self.record_failure(&host);
                    if attempt == max_attempts {
                        return Err(mapped);
                    }
                    last_err = Some(mapped);
                }
            }

            let backoff = self.backoff(attempt);
            debug!(%url, ?backoff, "retrying origin fetch");
            tokio::time::sleep(backoff).await;
        }

        Err(last_err.unwrap_or(OriginError::Transport("retries exhausted".to_string())))
    }

    /// Exponential backoff: `backoff_min * 2^(attempt-1)`, capped.
    fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        self.backoff_min
            .saturating_mul(2u32.saturating_pow(exp))
            .min(self.backoff_max)
    }

    fn check_breaker(&self, host: &str) -> Result<(), OriginError> {
        if !self.breaker_enabled {
            return Ok(());
        }

        if let Some(state) = self.breakers.get(host) {
            if let Some(opened_at) = state.opened_at {
                if opened_at.elapsed() < self.breaker_cooldown {
                    return Err(OriginError::CircuitOpen {
                        host: host.to_string(),
                    });
                }
                // Cooldown over; fall through and let one attempt probe the
                // origin (half-open).
            }
        }

        Ok(())
    }

    fn record_failure(&self, host: &str) {
        if !self.breaker_enabled {
            return;
        }

        let mut state = self.breakers.entry(host.to_string()).or_default();
        state.consecutive_failures += 1;
        if state.consecutive_failures >= self.breaker_threshold {
            if state.opened_at.is_none() {
                warn!(host, failures = state.consecutive_failures, "circuit opened");
            }
            state.opened_at = Some(Instant::now());
        }
    }

    fn record_success(&self, host: &str) {
        if !self.breaker_enabled {
            return;
        }

        if let Some(mut state) = self.breakers.get_mut(host) {
            if state.opened_at.is_some() {
                debug!(host, "circuit closed");
            }
            state.consecutive_failures = 0;
            state.opened_at = None;
        }
    }
}

fn map_transport_error(err: &reqwest::Error) -> OriginError {
    if err.is_timeout() {
        OriginError::Timeout
    } else if err.is_connect() {
        OriginError::Refused
    } else {
        OriginError::Transport(err.to_string())
    }
}
