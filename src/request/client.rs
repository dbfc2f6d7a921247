//! Request client with retry and error normalization

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::CONTENT_TYPE;
use reqwest::multipart::Form;
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};
use url::Url;

use super::{RequestAttempt, RequestConfig, RequestOptions};
use crate::endpoints::Endpoints;
use crate::error::{Error, NormalizedError, Result};
use crate::report::{ErrorReporter, ReportOptions, TracingReporter, CONTEXT_API_REQUEST};
use crate::version;

const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// `{ "error": { "code", "message", "details" } }`
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: Option<ErrorPayload>,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorPayload {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    details: Option<Value>,
}

/// HTTP client for the task server API
#[derive(Clone)]
pub struct ApiClient {
    http: Client,
    endpoints: Endpoints,
    config: RequestConfig,
    reporter: Arc<dyn ErrorReporter>,
}

impl ApiClient {
    pub fn new(endpoints: Endpoints, config: RequestConfig) -> Result<Self> {
        let http = Client::builder()
            .user_agent(version::build_info().user_agent())
            .build()
            .map_err(|e| Error::Internal(format!("Failed to create HTTP client: {}", e)))?;

        info!(
            api_base = %endpoints.api_base(),
            timeout_ms = config.timeout.as_millis() as u64,
            max_retries = config.max_retries,
            "Request client created"
        );

        Ok(Self {
            http,
            endpoints,
            config,
            reporter: Arc::new(TracingReporter),
        })
    }

    /// Replace the default tracing reporter
    pub fn with_reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    pub fn config(&self) -> &RequestConfig {
        &self.config
    }

    /// Perform a request and decode the JSON response as `T`.
    ///
    /// Retryable failures are retried up to `max_retries` times; the last
    /// error is reported (unless `silent`) and returned.
    pub async fn request<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        options: RequestOptions,
    ) -> std::result::Result<T, NormalizedError> {
        let result = self.request_value(endpoint, &options).await.and_then(|value| {
            serde_json::from_value(value).map_err(|e| {
                NormalizedError::unknown(format!("Unexpected response shape: {}", e))
            })
        });

        if let Err(err) = &result {
            if !options.silent {
                let report = ReportOptions {
                    retry_callback: options.retry_callback.clone(),
                    show_details: false,
                };
                self.reporter.handle_error(err, CONTEXT_API_REQUEST, &report);
            }
        }

        result
    }

    pub async fn get<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        params: &[(&str, &str)],
    ) -> std::result::Result<T, NormalizedError> {
        let mut options = RequestOptions::new(Method::GET);
        for (key, value) in params {
            options = options.query(*key, *value);
        }
        self.request(endpoint, options).await
    }

    pub async fn post<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        endpoint: &str,
        body: &B,
    ) -> std::result::Result<T, NormalizedError> {
        let options = RequestOptions::new(Method::POST).json(encode_body(body)?);
        self.request(endpoint, options).await
    }

    pub async fn put<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        endpoint: &str,
        body: &B,
    ) -> std::result::Result<T, NormalizedError> {
        let options = RequestOptions::new(Method::PUT).json(encode_body(body)?);
        self.request(endpoint, options).await
    }

    pub async fn delete<T: DeserializeOwned>(
        &self,
        endpoint: &str,
    ) -> std::result::Result<T, NormalizedError> {
        self.request(endpoint, RequestOptions::new(Method::DELETE)).await
    }

    /// POST a multipart form. `form` is called once per attempt, so retries
    /// resend the same fields.
    pub async fn upload<T, F>(&self, endpoint: &str, form: F) -> std::result::Result<T, NormalizedError>
    where
        T: DeserializeOwned,
        F: Fn() -> Form + Send + Sync + 'static,
    {
        let options = RequestOptions::new(Method::POST).multipart(Arc::new(form));
        self.request(endpoint, options).await
    }

    /// Whether the server answers `/system/status` with `success: true`
    /// within five seconds. Failures are not reported.
    pub async fn health_check(&self) -> bool {
        let options = RequestOptions::new(Method::GET)
            .silent()
            .timeout(HEALTH_CHECK_TIMEOUT);
        match self.request::<Value>("/system/status", options).await {
            Ok(status) => status.get("success").and_then(Value::as_bool).unwrap_or(false),
            Err(e) => {
                debug!(code = %e.code(), "Health check failed");
                false
            }
        }
    }

    /// Retry loop; yields the decoded JSON body of the first success
    async fn request_value(
        &self,
        endpoint: &str,
        options: &RequestOptions,
    ) -> std::result::Result<Value, NormalizedError> {
        let url = self.build_url(endpoint, options)?;
        let timeout = options.timeout.unwrap_or(self.config.timeout);
        let mut attempt = RequestAttempt::new(endpoint, &options.method);

        loop {
            let number = attempt.begin_attempt();
            debug!(
                request_id = %attempt.id,
                method = %attempt.method,
                url = %url,
                attempt = number,
                "Sending request"
            );

            // Dropping the attempt future on timeout aborts the in-flight request
            let err = match tokio::time::timeout(timeout, self.execute(&url, options)).await {
                Ok(Ok(value)) => {
                    debug!(request_id = %attempt.id, attempt = number, "Request succeeded");
                    return Ok(value);
                }
                Ok(Err(err)) => err,
                Err(_) => NormalizedError::timeout(format!(
                    "Request timed out after {}ms",
                    timeout.as_millis()
                )),
            };

            let retries = attempt.retries();
            if !err.retryable || retries >= self.config.max_retries {
                warn!(
                    request_id = %attempt.id,
                    endpoint = %attempt.endpoint,
                    code = %err.code(),
                    attempts = attempt.attempt_count,
                    elapsed_ms = (chrono::Utc::now() - attempt.started_at).num_milliseconds(),
                    "Request failed"
                );
                return Err(err);
            }

            let delay = self.config.backoff.delay(retries + 1);
            warn!(
                request_id = %attempt.id,
                code = %err.code(),
                retry = retries + 1,
                max_retries = self.config.max_retries,
                delay_ms = delay.as_millis() as u64,
                "Retryable request error, backing off"
            );
            tokio::time::sleep(delay).await;
        }
    }

    /// A single attempt
    async fn execute(
        &self,
        url: &Url,
        options: &RequestOptions,
    ) -> std::result::Result<Value, NormalizedError> {
        let mut req = self.http.request(options.method.clone(), url.clone());

        // reqwest sets the multipart boundary itself
        let has_content_type = options
            .headers
            .iter()
            .any(|(name, _)| name.eq_ignore_ascii_case(CONTENT_TYPE.as_str()));
        if !has_content_type && options.form.is_none() {
            req = req.header(CONTENT_TYPE, "application/json");
        }
        for (name, value) in &options.headers {
            req = req.header(name.as_str(), value.as_str());
        }
        if let Some(form) = &options.form {
            req = req.multipart(form());
        } else if let Some(body) = &options.body {
            req = req.json(body);
        }

        let response = req.send().await.map_err(transport_error)?;
        let status = response.status();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();

        if !status.is_success() {
            let body = response.bytes().await.ok();
            return Err(error_from_response(status, &content_type, body.as_deref()));
        }

        let body = response.bytes().await.map_err(transport_error)?;
        decode_success_body(&body)
    }

    fn build_url(
        &self,
        endpoint: &str,
        options: &RequestOptions,
    ) -> std::result::Result<Url, NormalizedError> {
        let mut url = self
            .endpoints
            .api_url(endpoint)
            .map_err(|e| NormalizedError::invalid_endpoint(endpoint, e))?;

        let params: Vec<(&str, &str)> = options
            .query
            .iter()
            .filter_map(|(key, value)| value.as_deref().map(|v| (key.as_str(), v)))
            .collect();

        if !params.is_empty() {
            url.query_pairs_mut().extend_pairs(params);
        }
        Ok(url)
    }
}

fn encode_body<B: Serialize + ?Sized>(body: &B) -> std::result::Result<Value, NormalizedError> {
    serde_json::to_value(body)
        .map_err(|e| NormalizedError::unknown(format!("Failed to encode request body: {}", e)))
}

fn transport_error(e: reqwest::Error) -> NormalizedError {
    if e.is_timeout() {
        NormalizedError::timeout(format!("Request timed out: {}", e))
    } else {
        NormalizedError::network(format!("Network request failed: {}", e))
    }
}

/// Empty bodies decode as `null`; anything else must be JSON
fn decode_success_body(body: &[u8]) -> std::result::Result<Value, NormalizedError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Null);
    }
    serde_json::from_slice(body)
        .map_err(|e| NormalizedError::unknown(format!("Invalid response body: {}", e)))
}

fn error_from_response(status: StatusCode, content_type: &str, body: Option<&[u8]>) -> NormalizedError {
    let code = status.as_u16();
    let reason = status.canonical_reason().unwrap_or("Unknown Status").to_string();

    let body = match body {
        Some(b) if !b.is_empty() => b,
        _ => return NormalizedError::http(code, None, reason, None),
    };

    if content_type.contains("application/json") {
        return match serde_json::from_slice::<ErrorBody>(body) {
            Ok(parsed) => {
                let payload = parsed.error.unwrap_or_default();
                let message = payload
                    .message
                    .filter(|m| !m.is_empty())
                    .unwrap_or(reason);
                NormalizedError::http(code, payload.code, message, payload.details)
            }
            Err(_) => NormalizedError::http(code, None, reason, None),
        };
    }

    match std::str::from_utf8(body) {
        Ok(text) if !text.trim().is_empty() => NormalizedError::http(code, None, text.trim(), None),
        _ => NormalizedError::http(code, None, reason, None),
    }
}
