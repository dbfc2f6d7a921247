//! HTTP request client
//!
//! Every failure is returned as a [`NormalizedError`](crate::error::NormalizedError).
//! Retryable failures (network, timeout, 5xx) are retried with exponential
//! backoff before the last error is surfaced.

mod client;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::multipart::Form;
use reqwest::Method;
use serde_json::Value;
use uuid::Uuid;

use crate::backoff::BackoffPolicy;
use crate::report::RetryCallback;

pub use client::ApiClient;

// ─────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────

/// Client-wide request settings
#[derive(Debug, Clone)]
pub struct RequestConfig {
    /// Per-attempt timeout
    pub timeout: Duration,

    /// Retries after the first attempt
    pub max_retries: u32,

    /// Delay before retry `n` is `backoff.delay(n)`
    pub backoff: BackoffPolicy,
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_retries: 3,
            backoff: BackoffPolicy::default(),
        }
    }
}

/// Builds a fresh multipart form for every attempt; a sent form is consumed
pub type FormFactory = Arc<dyn Fn() -> Form + Send + Sync>;

// ─────────────────────────────────────────────────────────────────
// Per-request Options
// ─────────────────────────────────────────────────────────────────

/// Options for a single logical request
#[derive(Clone, Default)]
pub struct RequestOptions {
    pub method: Method,

    /// JSON body
    pub body: Option<Value>,

    /// Multipart body; takes precedence over `body` and suppresses the
    /// default JSON content type
    pub form: Option<FormFactory>,

    /// Query parameters; `None` values are skipped, empty strings are sent
    pub query: Vec<(String, Option<String>)>,

    pub headers: Vec<(String, String)>,

    /// Overrides the client's per-attempt timeout
    pub timeout: Option<Duration>,

    /// Do not hand the final error to the reporter
    pub silent: bool,

    /// Offered to the reporter as a retry action
    pub retry_callback: Option<RetryCallback>,
}

impl RequestOptions {
    pub fn new(method: Method) -> Self {
        Self {
            method,
            ..Default::default()
        }
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn multipart(mut self, form: FormFactory) -> Self {
        self.form = Some(form);
        self
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), Some(value.into())));
        self
    }

    pub fn query_opt(mut self, key: impl Into<String>, value: Option<String>) -> Self {
        self.query.push((key.into(), value));
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn silent(mut self) -> Self {
        self.silent = true;
        self
    }

    pub fn on_retry(mut self, callback: RetryCallback) -> Self {
        self.retry_callback = Some(callback);
        self
    }
}

impl fmt::Debug for RequestOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestOptions")
            .field("method", &self.method)
            .field("body", &self.body)
            .field("multipart", &self.form.is_some())
            .field("query", &self.query)
            .field("headers", &self.headers)
            .field("timeout", &self.timeout)
            .field("silent", &self.silent)
            .finish()
    }
}

/// Bookkeeping for one logical request, retries included
#[derive(Debug, Clone)]
pub struct RequestAttempt {
    pub id: Uuid,
    pub endpoint: String,
    pub method: Method,
    pub attempt_count: u32,
    pub started_at: DateTime<Utc>,
}

impl RequestAttempt {
    pub fn new(endpoint: &str, method: &Method) -> Self {
        Self {
            id: Uuid::new_v4(),
            endpoint: endpoint.to_string(),
            method: method.clone(),
            attempt_count: 0,
            started_at: Utc::now(),
        }
    }

    /// Count a new attempt and return its 1-based number
    pub fn begin_attempt(&mut self) -> u32 {
        self.attempt_count += 1;
        self.attempt_count
    }

    /// Retries performed so far
    pub fn retries(&self) -> u32 {
        self.attempt_count.saturating_sub(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = RequestConfig::default();
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.backoff.base(), Duration::from_millis(1000));
    }

    #[test]
    fn test_options_builder() {
        let options = RequestOptions::new(Method::POST)
            .json(serde_json::json!({"url": "https://b23.tv/x"}))
            .query("page", "2")
            .query_opt("status", None)
            .timeout(Duration::from_secs(5))
            .silent();

        assert_eq!(options.method, Method::POST);
        assert!(options.body.is_some());
        assert_eq!(options.query.len(), 2);
        assert_eq!(options.timeout, Some(Duration::from_secs(5)));
        assert!(options.silent);
    }

    #[test]
    fn test_default_method_is_get() {
        assert_eq!(RequestOptions::default().method, Method::GET);
    }

    #[test]
    fn test_attempt_counting() {
        let mut attempt = RequestAttempt::new("/tasks/", &Method::GET);
        assert_eq!(attempt.retries(), 0);
        assert_eq!(attempt.begin_attempt(), 1);
        assert_eq!(attempt.begin_attempt(), 2);
        assert_eq!(attempt.retries(), 1);
    }
}
