//! Subscription façades over the channel registry
//!
//! [`TaskWatcher`] follows one task at a time; [`SystemMonitor`] follows the
//! system telemetry channel. Both fan updates out to ordered listener lists
//! and release their channel when dropped.

mod listeners;
mod system;
mod task;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::warn;

use crate::channel::{ChannelKey, ChannelRegistry, ConnectionHandle, ErrorHandler};
use crate::error::NormalizedError;
use crate::report::{ErrorReporter, ReportOptions, CONTEXT_CHANNEL};

pub use listeners::{Listener, ListenerSet};
pub use system::SystemMonitor;
pub use task::TaskWatcher;

/// A façade's claim on one registry connection
struct Subscription {
    handle: ConnectionHandle,
    active: Arc<AtomicBool>,
}

impl Subscription {
    fn key(&self) -> &ChannelKey {
        self.handle.key()
    }

    /// The connection is still registered (not released, replaced or exhausted)
    fn is_registered(&self, registry: &ChannelRegistry) -> bool {
        registry.is_current(&self.handle)
    }

    /// Stop delivering and release the connection
    fn cancel(self, registry: &ChannelRegistry) {
        self.active.store(false, Ordering::Release);
        registry.release_handle(&self.handle);
    }
}

/// Channel errors: retryable ones are logged, terminal ones are reported
fn channel_error_handler(
    key: ChannelKey,
    reporter: Arc<dyn ErrorReporter>,
    active: Arc<AtomicBool>,
) -> ErrorHandler {
    Arc::new(move |err: NormalizedError| {
        if !active.load(Ordering::Acquire) {
            return;
        }
        if err.retryable {
            warn!(key = %key, code = %err.code(), error = %err.message, "Channel error");
        } else {
            reporter.handle_error(&err, CONTEXT_CHANNEL, &ReportOptions::default());
        }
    })
}
