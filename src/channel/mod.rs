//! Real-time channels
//!
//! Each logical channel (`task_<id>` or `system`) is carried by its own
//! WebSocket connection. The [`ChannelRegistry`] owns every connection and
//! guarantees at most one per key; each connection runs as a task that:
//! - Reconnects with exponential backoff after abnormal closures
//! - Sends heartbeats and force-reconnects when pongs stop arriving
//! - Decodes frames into [`InboundEvent`]s for the caller

mod connection;
mod registry;
mod transport;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::backoff::BackoffPolicy;
use crate::error::NormalizedError;
use crate::protocol::InboundEvent;

pub use connection::{ConnectionHandle, ConnectionInfo};
pub use registry::ChannelRegistry;
pub use transport::{Connector, WsConnector, WsSink, WsSource};

/// Receives every decoded, non-heartbeat message of a channel
pub type MessageHandler = Arc<dyn Fn(InboundEvent) + Send + Sync>;

/// Receives channel failures; `retryable == false` means the channel is gone
pub type ErrorHandler = Arc<dyn Fn(NormalizedError) + Send + Sync>;

// ─────────────────────────────────────────────────────────────────
// Channel Key
// ─────────────────────────────────────────────────────────────────

/// Name of a logical stream; unique per live connection
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelKey(String);

impl ChannelKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// `task_<task_id>`
    pub fn task(task_id: &str) -> Self {
        Self(format!("task_{}", task_id))
    }

    /// `system`
    pub fn system() -> Self {
        Self("system".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ─────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────

/// Runtime settings shared by every connection of a registry
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Ping period; silence for twice this long counts as a dead connection
    pub heartbeat_interval: Duration,

    /// Reconnects allowed before the terminal failure is reported
    pub max_reconnect_attempts: u32,

    /// Reconnect delay policy
    pub backoff: BackoffPolicy,

    /// Upper bound for a single connect attempt
    pub connect_timeout: Duration,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(30),
            max_reconnect_attempts: 5,
            backoff: BackoffPolicy::default(),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Connection State
// ─────────────────────────────────────────────────────────────────

/// Lifecycle of one connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Created, task not started yet
    Idle,
    /// Transport handshake in progress
    Connecting,
    /// Handshake done, frames flowing
    Open,
    /// Caller-initiated or superseding close in flight
    Closing,
    /// Transport gone; a reconnect may be pending
    Closed,
}

impl ConnectionState {
    /// Counts toward the one-connection-per-key limit
    pub fn is_live(&self) -> bool {
        matches!(self, ConnectionState::Connecting | ConnectionState::Open)
    }
}

impl Default for ConnectionState {
    fn default() -> Self {
        ConnectionState::Idle
    }
}

/// Coarse status for display
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

impl From<ConnectionState> for ConnectionStatus {
    fn from(state: ConnectionState) -> Self {
        match state {
            ConnectionState::Idle | ConnectionState::Connecting => ConnectionStatus::Connecting,
            ConnectionState::Open => ConnectionStatus::Connected,
            ConnectionState::Closing => ConnectionStatus::Disconnecting,
            ConnectionState::Closed => ConnectionStatus::Disconnected,
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Disconnecting => "disconnecting",
        };
        f.write_str(s)
    }
}
