//! System telemetry façade

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};

use super::{channel_error_handler, Listener, ListenerSet, Subscription};
use crate::channel::{ChannelKey, ChannelRegistry, ConnectionStatus, MessageHandler};
use crate::endpoints::Endpoints;
use crate::error::NormalizedError;
use crate::protocol::{InboundEvent, SystemMetrics, SystemUpdate};
use crate::report::{ErrorReporter, TracingReporter};

/// Follows the `system` channel
pub struct SystemMonitor {
    registry: ChannelRegistry,
    endpoints: Endpoints,
    reporter: Arc<dyn ErrorReporter>,
    listeners: Arc<ListenerSet<SystemUpdate>>,
    latest: Arc<RwLock<Option<SystemMetrics>>>,
    current: Mutex<Option<Subscription>>,
}

impl SystemMonitor {
    pub fn new(registry: ChannelRegistry, endpoints: Endpoints) -> Self {
        Self {
            registry,
            endpoints,
            reporter: Arc::new(TracingReporter),
            listeners: Arc::new(ListenerSet::new()),
            latest: Arc::new(RwLock::new(None)),
            current: Mutex::new(None),
        }
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Open the system channel. A no-op while already monitoring.
    pub fn start_monitoring(&self) -> Result<(), NormalizedError> {
        let mut current = self.current.lock();

        if let Some(subscription) = current.as_ref() {
            if subscription.is_registered(&self.registry) {
                debug!("System monitoring already active");
                return Ok(());
            }
        }
        // Previous channel gave up or was released elsewhere
        if let Some(stale) = current.take() {
            stale.cancel(&self.registry);
        }

        let key = ChannelKey::system();
        let url = self.endpoints.system_channel_url();
        let active = Arc::new(AtomicBool::new(true));

        let handle = self.registry.open(
            key.clone(),
            url.as_str(),
            self.message_handler(Arc::clone(&active)),
            channel_error_handler(key, Arc::clone(&self.reporter), Arc::clone(&active)),
        )?;

        info!(url = %url, "System monitoring started");
        *current = Some(Subscription { handle, active });
        Ok(())
    }

    pub fn stop_monitoring(&self) {
        if let Some(subscription) = self.current.lock().take() {
            info!("System monitoring stopped");
            subscription.cancel(&self.registry);
        }
    }

    /// True between `start_monitoring` and `stop_monitoring`, even while the
    /// channel is reconnecting
    pub fn is_monitoring(&self) -> bool {
        match self.current.lock().as_ref() {
            Some(subscription) => subscription.is_registered(&self.registry),
            None => false,
        }
    }

    pub fn latest_metrics(&self) -> Option<SystemMetrics> {
        self.latest.read().clone()
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        match self.current.lock().as_ref() {
            Some(subscription) if subscription.is_registered(&self.registry) => {
                self.registry.status(subscription.key())
            }
            _ => ConnectionStatus::Disconnected,
        }
    }

    pub fn on_status_update(&self, listener: Listener<SystemUpdate>) -> Listener<SystemUpdate> {
        self.listeners.add(listener)
    }

    pub fn off_status_update(&self, listener: &Listener<SystemUpdate>) -> bool {
        self.listeners.remove(listener)
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    fn message_handler(&self, active: Arc<AtomicBool>) -> MessageHandler {
        let listeners = Arc::clone(&self.listeners);
        let latest = Arc::clone(&self.latest);

        Arc::new(move |event: InboundEvent| {
            if !active.load(Ordering::Acquire) {
                return;
            }
            match event {
                InboundEvent::SystemUpdate(update) => {
                    debug!(
                        cpu = ?update.data.cpu_usage,
                        memory = ?update.data.memory_usage,
                        active_tasks = ?update.data.active_tasks,
                        "System update"
                    );
                    *latest.write() = Some(update.data.clone());
                    listeners.emit(&update);
                }
                other => debug!(kind = other.type_name(), "Ignoring message on system channel"),
            }
        })
    }
}

impl Drop for SystemMonitor {
    fn drop(&mut self) {
        if let Some(subscription) = self.current.get_mut().take() {
            subscription.cancel(&self.registry);
        }
    }
}
