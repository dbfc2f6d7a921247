//! Error reporting collaborator
//!
//! The request client and the subscription façades hand failures to an
//! [`ErrorReporter`]; a UI layer would show a notification, the CLI logs.

use std::fmt;
use std::sync::Arc;

use tracing::{error, info, warn};

use crate::error::{NormalizedError, Severity};

/// Context string used for request failures
pub const CONTEXT_API_REQUEST: &str = "api_request";

/// Context string used for channel failures
pub const CONTEXT_CHANNEL: &str = "channel";

/// Callback a presenter may offer as a "retry" action
pub type RetryCallback = Arc<dyn Fn() + Send + Sync>;

/// Extra presentation hints passed along with an error
#[derive(Clone, Default)]
pub struct ReportOptions {
    pub retry_callback: Option<RetryCallback>,
    pub show_details: bool,
}

impl ReportOptions {
    pub fn with_retry(callback: RetryCallback) -> Self {
        Self {
            retry_callback: Some(callback),
            show_details: false,
        }
    }
}

impl fmt::Debug for ReportOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReportOptions")
            .field("retry_callback", &self.retry_callback.is_some())
            .field("show_details", &self.show_details)
            .finish()
    }
}

/// Receives errors that should reach the user
pub trait ErrorReporter: Send + Sync {
    fn handle_error(&self, error: &NormalizedError, context: &str, options: &ReportOptions);
}

/// Reporter that logs at the level matching the error's severity
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingReporter;

impl ErrorReporter for TracingReporter {
    fn handle_error(&self, err: &NormalizedError, context: &str, options: &ReportOptions) {
        let code = err.code();
        let user_message = err.user_message();
        let details = if options.show_details {
            err.details.as_ref().map(|d| d.to_string())
        } else {
            None
        };

        match err.severity() {
            Severity::Error => error!(
                context,
                code = %code,
                status = ?err.http_status,
                details = ?details,
                "{}",
                user_message
            ),
            Severity::Warning => warn!(
                context,
                code = %code,
                status = ?err.http_status,
                retryable = err.retryable,
                "{}",
                user_message
            ),
            Severity::Info => info!(
                context,
                code = %code,
                status = ?err.http_status,
                "{}",
                user_message
            ),
        }
    }
}
