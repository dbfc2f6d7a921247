//! Error types for the Bili2Text client
//!
//! [`Error`] covers the client's own failures: configuration, files, URLs and
//! logging setup, plus request and channel failures surfaced by the CLI. Each
//! one carries a stable `E<nnn>` code whose hundreds digit selects the exit
//! status.
//!
//! [`NormalizedError`] is the single shape handed to callers of the request
//! client and the channel layer.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde_json::json;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ErrorCode {
    ConfigMissing = 100,
    ConfigSyntax = 101,
    ConfigInvalid = 102,

    ReadFailed = 200,
    WriteFailed = 201,
    PermissionDenied = 202,
    FileMissing = 203,

    BadUrl = 300,

    RequestFailed = 400,
    ChannelFailed = 401,

    Internal = 900,
}

impl ErrorCode {
    pub fn as_str(&self) -> String {
        format!("E{}", *self as u16)
    }

    /// 10 configuration, 20 files, 30 URLs, 40 server, 90 everything else
    pub fn exit_code(&self) -> i32 {
        match *self as u16 / 100 {
            family @ 1..=4 => i32::from(family) * 10,
            _ => 90,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration file not found: {}", .path.display())]
    ConfigMissing { path: PathBuf },

    #[error("Could not parse {}: {}", .path.display(), .source.message())]
    ConfigSyntax {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// `field` is the dotted TOML key, e.g. `server.base_url`
    #[error("Invalid configuration: {message}")]
    ConfigInvalid { field: Option<String>, message: String },

    #[error("Cannot read {}", .path.display())]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot write {}", .path.display())]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Cannot render configuration: {0}")]
    TomlWrite(#[from] toml::ser::Error),

    #[error("Invalid URL '{url}': {message}")]
    InvalidUrl { url: String, message: String },

    /// Surfaced once the request client has given up
    #[error("Request failed: {0}")]
    Request(#[source] NormalizedError),

    /// Terminal channel failure, e.g. reconnects exhausted
    #[error("Channel failed: {0}")]
    Channel(#[source] NormalizedError),

    #[error("Logging setup failed: {0}")]
    Logging(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::ConfigMissing { .. } => ErrorCode::ConfigMissing,
            Error::ConfigSyntax { .. } | Error::TomlWrite(_) => ErrorCode::ConfigSyntax,
            Error::ConfigInvalid { .. } => ErrorCode::ConfigInvalid,
            Error::ReadFile { .. } => ErrorCode::ReadFailed,
            Error::WriteFile { .. } => ErrorCode::WriteFailed,
            Error::Io(e) if e.kind() == std::io::ErrorKind::NotFound => ErrorCode::FileMissing,
            Error::Io(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                ErrorCode::PermissionDenied
            }
            Error::Io(_) => ErrorCode::ReadFailed,
            Error::InvalidUrl { .. } => ErrorCode::BadUrl,
            Error::Request(_) => ErrorCode::RequestFailed,
            Error::Channel(_) => ErrorCode::ChannelFailed,
            Error::Logging(_) | Error::Internal(_) => ErrorCode::Internal,
        }
    }

    pub fn exit_code(&self) -> i32 {
        self.code().exit_code()
    }

    pub fn suggestion(&self) -> Option<&'static str> {
        let hint = match self {
            Error::ConfigMissing { .. } => {
                "Run 'bili2text-client config init' to create a default configuration file."
            }
            Error::ConfigSyntax { .. } => {
                "Fix the TOML syntax, then check it with 'bili2text-client config validate'."
            }
            Error::ConfigInvalid { .. } => "Correct the value named above and try again.",
            Error::InvalidUrl { .. } => {
                "server.base_url must be an http:// or https:// URL, e.g. http://localhost:5000."
            }
            Error::Request(e) | Error::Channel(e) if e.retryable => {
                "The server may be overloaded or unreachable. Try again in a moment."
            }
            _ => return None,
        };
        Some(hint)
    }

    /// Colored multi-line report for stderr
    pub fn format_for_terminal(&self) -> String {
        let mut lines = vec![format!("\x1b[31merror[{}]\x1b[0m {}", self.code(), self)];

        if let Error::ConfigInvalid { field: Some(field), .. } = self {
            lines.push(format!("  field: {}", field));
        }
        if let Some(hint) = self.suggestion() {
            lines.push(format!("  \x1b[33mhint\x1b[0m: {}", hint));
        }

        let mut output = lines.join("\n");
        output.push('\n');
        output
    }

    pub fn format_for_log(&self) -> String {
        format!("[{}] {}", self.code(), self)
    }

    pub fn config_not_found(path: impl Into<PathBuf>) -> Self {
        Error::ConfigMissing { path: path.into() }
    }

    pub fn config_field_invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Error::ConfigInvalid {
            field: Some(field.into()),
            message: message.into(),
        }
    }

    pub fn invalid_url(url: impl Into<String>, message: impl fmt::Display) -> Self {
        Error::InvalidUrl {
            url: url.into(),
            message: message.to_string(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Normalized Errors
// ─────────────────────────────────────────────────────────────────

/// Classification of a request or channel failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// DNS, connect, reset or any other transport failure
    Network,
    /// The attempt was aborted by its timeout
    Timeout,
    /// Non-success HTTP status without an application code
    Http(u16),
    /// Application-supplied error code from the response body
    Application(String),
    /// The endpoint URL could not be used to construct a transport
    InvalidEndpoint,
    /// A channel used up its reconnect budget
    ReconnectExhausted,
    /// The server ended a channel with a normal close
    ChannelClosed,
    /// Anything else (e.g. an unreadable success body)
    Unknown,
}

impl ErrorKind {
    /// Wire-level code, e.g. `NETWORK_ERROR` or `HTTP_503`
    pub fn code(&self) -> String {
        match self {
            ErrorKind::Network => "NETWORK_ERROR".to_string(),
            ErrorKind::Timeout => "TIMEOUT_ERROR".to_string(),
            ErrorKind::Http(status) => format!("HTTP_{}", status),
            ErrorKind::Application(code) => code.clone(),
            ErrorKind::InvalidEndpoint => "INVALID_ENDPOINT".to_string(),
            ErrorKind::ReconnectExhausted => "RECONNECT_EXHAUSTED".to_string(),
            ErrorKind::ChannelClosed => "CHANNEL_CLOSED".to_string(),
            ErrorKind::Unknown => "UNKNOWN_ERROR".to_string(),
        }
    }
}

/// How loudly a UI layer should present an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

/// The only error shape that crosses the client boundary
#[derive(Debug, Clone, Error)]
#[error("[{}] {}", .kind.code(), .message)]
pub struct NormalizedError {
    pub kind: ErrorKind,
    pub message: String,
    pub http_status: Option<u16>,
    pub details: Option<serde_json::Value>,
    pub retryable: bool,
    pub occurred_at: DateTime<Utc>,
}

impl NormalizedError {
    /// Build an error, deriving `retryable` from the kind and status
    pub fn new(kind: ErrorKind, message: impl Into<String>, http_status: Option<u16>) -> Self {
        let retryable = matches!(kind, ErrorKind::Network | ErrorKind::Timeout)
            || matches!(http_status, Some(500..=599));

        Self {
            kind,
            message: message.into(),
            http_status,
            details: None,
            retryable,
            occurred_at: Utc::now(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Network, message, None)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message, None)
    }

    /// Error for a non-success HTTP status; an application code wins over `HTTP_<status>`
    pub fn http(
        status: u16,
        app_code: Option<String>,
        message: impl Into<String>,
        details: Option<serde_json::Value>,
    ) -> Self {
        let kind = match app_code {
            Some(code) if !code.is_empty() => ErrorKind::Application(code),
            _ => ErrorKind::Http(status),
        };
        let mut err = Self::new(kind, message, Some(status));
        err.details = details;
        err
    }

    pub fn invalid_endpoint(url: &str, reason: impl fmt::Display) -> Self {
        Self::new(
            ErrorKind::InvalidEndpoint,
            format!("Cannot open {}: {}", url, reason),
            None,
        )
    }

    pub fn reconnect_exhausted(key: &str, attempts: u32) -> Self {
        Self::new(
            ErrorKind::ReconnectExhausted,
            format!("Channel {} gave up after {} reconnect attempts", key, attempts),
            None,
        )
    }

    /// Not a failure as such, but the channel will not come back on its own
    pub fn channel_closed(key: &str) -> Self {
        Self::new(
            ErrorKind::ChannelClosed,
            format!("Server closed channel {}", key),
            None,
        )
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unknown, message, None)
    }

    /// Wire-level code
    pub fn code(&self) -> String {
        self.kind.code()
    }

    /// Friendly text for codes a UI is expected to know, else the raw message
    pub fn user_message(&self) -> String {
        let known = match self.code().as_str() {
            "NETWORK_ERROR" => "Network connection failed, please check your network settings",
            "TIMEOUT_ERROR" => "The request timed out, please try again later",
            "CONNECTION_REFUSED" => "Unable to connect to the server",
            "UNAUTHORIZED" => "Unauthorized, please sign in again",
            "FORBIDDEN" => "You do not have permission to perform this action",
            "INVALID_URL" => "Please enter a valid Bilibili video link",
            "INVALID_MODEL" => "The selected model is not supported",
            "TASK_NOT_FOUND" => "The task does not exist or has been deleted",
            "FILE_NOT_FOUND" => "The file does not exist or has been deleted",
            "SYSTEM_OVERLOAD" => "The system is overloaded, please try again later",
            "INTERNAL_ERROR" => "Internal server error, please contact the administrator",
            "SERVICE_UNAVAILABLE" => "The service is temporarily unavailable",
            "RECONNECT_EXHAUSTED" => "Connection lost, please reload to try again",
            "CHANNEL_CLOSED" => "The server closed the connection",
            _ => return self.message.clone(),
        };
        known.to_string()
    }

    pub fn severity(&self) -> Severity {
        match self.code().as_str() {
            "INTERNAL_ERROR" | "DATABASE_ERROR" | "SYSTEM_OVERLOAD" | "RECONNECT_EXHAUSTED" => {
                Severity::Error
            }
            "NETWORK_ERROR" | "TIMEOUT_ERROR" | "SERVICE_UNAVAILABLE" => Severity::Warning,
            _ => Severity::Info,
        }
    }

    /// JSON view used by the CLI and error logs
    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "code": self.code(),
            "message": self.message,
            "status": self.http_status,
            "details": self.details,
            "retryable": self.retryable,
            "timestamp": self.occurred_at.to_rfc3339(),
        })
    }
}
