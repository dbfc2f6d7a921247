//! Task progress façade

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};

use super::{channel_error_handler, Listener, ListenerSet, Subscription};
use crate::channel::{ChannelKey, ChannelRegistry, ConnectionStatus, MessageHandler};
use crate::endpoints::Endpoints;
use crate::error::NormalizedError;
use crate::protocol::{InboundEvent, TaskStatus, TaskUpdate};
use crate::report::{ErrorReporter, TracingReporter};

struct Watched {
    task_id: String,
    subscription: Subscription,
}

/// Follows the progress channel of one task at a time
pub struct TaskWatcher {
    registry: ChannelRegistry,
    endpoints: Endpoints,
    reporter: Arc<dyn ErrorReporter>,
    listeners: Arc<ListenerSet<TaskUpdate>>,
    latest: Arc<RwLock<Option<TaskUpdate>>>,
    current: Mutex<Option<Watched>>,
}

impl TaskWatcher {
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

    /// Terminal channel errors go to this reporter
    pub fn with_reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Start following `task_id`.
    ///
    /// Watching the task already being watched is a no-op while its channel
    /// is registered. Watching a different task drops the previous one first.
    pub fn watch(&self, task_id: &str) -> Result<(), NormalizedError> {
        let mut current = self.current.lock();

        if let Some(watched) = current.as_ref() {
            if watched.task_id == task_id && watched.subscription.is_registered(&self.registry) {
                debug!(task_id, "Already watching task");
                return Ok(());
            }
        }
        if let Some(previous) = current.take() {
            debug!(task_id = %previous.task_id, "Switching watched task");
            previous.subscription.cancel(&self.registry);
        }
        *self.latest.write() = None;

        let key = ChannelKey::task(task_id);
        let url = self.endpoints.task_channel_url(task_id);
        let active = Arc::new(AtomicBool::new(true));

        let handle = self.registry.open(
            key.clone(),
            url.as_str(),
            self.message_handler(Arc::clone(&active)),
            channel_error_handler(key, Arc::clone(&self.reporter), Arc::clone(&active)),
        )?;

        info!(task_id, url = %url, "Watching task");
        *current = Some(Watched {
            task_id: task_id.to_string(),
            subscription: Subscription { handle, active },
        });
        Ok(())
    }

    /// Stop following the current task; no-op when idle
    pub fn unwatch(&self) {
        if let Some(watched) = self.current.lock().take() {
            info!(task_id = %watched.task_id, "Stopped watching task");
            watched.subscription.cancel(&self.registry);
        }
    }

    /// The watched task while its channel is registered; `None` once the
    /// channel was released, closed by the server or gave up reconnecting
    pub fn current_task(&self) -> Option<String> {
        self.current
            .lock()
            .as_ref()
            .filter(|w| w.subscription.is_registered(&self.registry))
            .map(|w| w.task_id.clone())
    }

    /// Most recent update received for the current task
    pub fn latest_update(&self) -> Option<TaskUpdate> {
        self.latest.read().clone()
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        match self.current.lock().as_ref() {
            Some(watched) if watched.subscription.is_registered(&self.registry) => {
                self.registry.status(watched.subscription.key())
            }
            _ => ConnectionStatus::Disconnected,
        }
    }

    pub fn on_status_update(&self, listener: Listener<TaskUpdate>) -> Listener<TaskUpdate> {
        self.listeners.add(listener)
    }

    pub fn off_status_update(&self, listener: &Listener<TaskUpdate>) -> bool {
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
                InboundEvent::TaskUpdate(update) => {
                    match update.status {
                        TaskStatus::Completed => info!(task_id = %update.task_id, "Task completed"),
                        TaskStatus::Failed => info!(
                            task_id = %update.task_id,
                            error = update.error_message.as_deref().or(update.message.as_deref()).unwrap_or(""),
                            "Task failed"
                        ),
                        TaskStatus::Cancelled => info!(task_id = %update.task_id, "Task cancelled"),
                        _ => debug!(
                            task_id = %update.task_id,
                            status = ?update.status,
                            progress = ?update.progress,
                            "Task update"
                        ),
                    }
                    *latest.write() = Some(update.clone());
                    listeners.emit(&update);
                }
                other => debug!(kind = other.type_name(), "Ignoring message on task channel"),
            }
        })
    }
}

impl Drop for TaskWatcher {
    fn drop(&mut self) {
        if let Some(watched) = self.current.get_mut().take() {
            watched.subscription.cancel(&self.registry);
        }
    }
}
