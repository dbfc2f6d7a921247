//! bili2text client communication layer
//!
//! - [`request::ApiClient`]: HTTP requests with per-attempt timeout, retry
//!   with exponential backoff and normalized errors
//! - [`channel::ChannelRegistry`]: WebSocket channels with heartbeat and
//!   automatic reconnect, at most one connection per channel key
//! - [`watch::TaskWatcher`] / [`watch::SystemMonitor`]: subscription façades
//!   that fan channel updates out to listeners

pub mod backoff;
pub mod channel;
pub mod config;
pub mod endpoints;
pub mod error;
pub mod logging;
pub mod protocol;
pub mod report;
pub mod request;
pub mod version;
pub mod watch;

pub use backoff::BackoffPolicy;
pub use channel::{ChannelConfig, ChannelKey, ChannelRegistry, ConnectionState, ConnectionStatus};
pub use config::ClientConfig;
pub use endpoints::Endpoints;
pub use error::{Error, ErrorKind, NormalizedError, Result, Severity};
pub use protocol::{InboundEvent, OutboundMessage, SystemMetrics, SystemUpdate, TaskStatus, TaskUpdate};
pub use report::{ErrorReporter, ReportOptions, TracingReporter};
pub use request::{ApiClient, RequestConfig, RequestOptions};
pub use watch::{SystemMonitor, TaskWatcher};
