//! Registry of live channel connections, at most one per key

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use url::Url;

use super::connection::{Command, ConnectionHandle, ConnectionShared, ConnectionTask};
use super::transport::{Connector, WsConnector};
use super::{
    ChannelConfig, ChannelKey, ConnectionInfo, ConnectionState, ConnectionStatus, ErrorHandler,
    MessageHandler,
};
use crate::error::NormalizedError;
use crate::protocol::OutboundMessage;

struct Entry {
    shared: Arc<ConnectionShared>,
    commands: mpsc::UnboundedSender<Command>,
}

impl Entry {
    /// Mark closing and tell the task to stop. Called with the registry
    /// lock held, after the entry has been removed.
    fn retire(self) {
        self.shared.set_state(ConnectionState::Closing);
        let _ = self.commands.send(Command::Close);
    }
}

pub(super) struct RegistryState {
    entries: HashMap<ChannelKey, Entry>,
    next_generation: u64,
}

impl RegistryState {
    pub(super) fn is_current(&self, shared: &ConnectionShared) -> bool {
        self.entries
            .get(shared.key())
            .map(|entry| entry.shared.generation() == shared.generation())
            .unwrap_or(false)
    }

    pub(super) fn remove_if_current(&mut self, shared: &ConnectionShared) -> bool {
        if self.is_current(shared) {
            self.entries.remove(shared.key());
            true
        } else {
            false
        }
    }
}

/// Owns every channel connection of a client
///
/// Cloning is cheap; clones share the same connections. Opening a key that
/// is already registered closes the previous connection first. Methods that
/// start connections must be called from within a Tokio runtime.
#[derive(Clone)]
pub struct ChannelRegistry {
    state: Arc<Mutex<RegistryState>>,
    config: ChannelConfig,
    connector: Arc<dyn Connector>,
}

impl ChannelRegistry {
    pub fn new(config: ChannelConfig) -> Self {
        Self::with_connector(config, Arc::new(WsConnector))
    }

    pub fn with_connector(config: ChannelConfig, connector: Arc<dyn Connector>) -> Self {
        Self {
            state: Arc::new(Mutex::new(RegistryState {
                entries: HashMap::new(),
                next_generation: 1,
            })),
            config,
            connector,
        }
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    /// Create a connection for `key`, replacing any existing one.
    ///
    /// An unusable URL is reported through `on_error` and returned; no
    /// connection is created and nothing is retried.
    pub fn open(
        &self,
        key: ChannelKey,
        url: &str,
        on_message: MessageHandler,
        on_error: ErrorHandler,
    ) -> Result<ConnectionHandle, NormalizedError> {
        let url = checked_url(&key, url, &on_error)?;
        self.spawn_connection(key, url, on_message, on_error)
    }

    fn spawn_connection(
        &self,
        key: ChannelKey,
        url: Url,
        on_message: MessageHandler,
        on_error: ErrorHandler,
    ) -> Result<ConnectionHandle, NormalizedError> {
        let (commands, receiver) = mpsc::unbounded_channel();
        let shared = {
            let mut state = self.state.lock();

            if let Some(previous) = state.entries.remove(&key) {
                debug!(
                    key = %key,
                    generation = previous.shared.generation(),
                    "Replacing existing connection"
                );
                previous.retire();
            }

            let generation = state.next_generation;
            state.next_generation += 1;

            let shared = Arc::new(ConnectionShared::new(key.clone(), url, generation));
            state.entries.insert(
                key.clone(),
                Entry {
                    shared: Arc::clone(&shared),
                    commands,
                },
            );
            shared
        };

        let task = ConnectionTask {
            shared: Arc::clone(&shared),
            registry: Arc::downgrade(&self.state),
            config: self.config.clone(),
            connector: Arc::clone(&self.connector),
            on_message,
            on_error,
            commands: receiver,
        };
        tokio::spawn(task.run());

        info!(key = %key, generation = shared.generation(), "Channel registered");
        Ok(ConnectionHandle::new(shared))
    }

    /// Return the existing connection for `key` when it targets the same URL
    /// and is not closing or closed; otherwise open a fresh one.
    pub fn ensure(
        &self,
        key: ChannelKey,
        url: &str,
        on_message: MessageHandler,
        on_error: ErrorHandler,
    ) -> Result<ConnectionHandle, NormalizedError> {
        // Compare parsed forms: `ws://host` and `ws://host/` are one target
        let url = checked_url(&key, url, &on_error)?;
        {
            let state = self.state.lock();
            if let Some(entry) = state.entries.get(&key) {
                let healthy = !matches!(
                    entry.shared.state(),
                    ConnectionState::Closing | ConnectionState::Closed
                );
                if healthy && *entry.shared.url() == url {
                    return Ok(ConnectionHandle::new(Arc::clone(&entry.shared)));
                }
            }
        }
        self.spawn_connection(key, url, on_message, on_error)
    }

    /// Close and forget the connection for `key`. Cancels a pending
    /// reconnect. Returns false when nothing was registered.
    pub fn release(&self, key: &ChannelKey) -> bool {
        let mut state = self.state.lock();
        match state.entries.remove(key) {
            Some(entry) => {
                info!(key = %key, "Releasing channel");
                entry.retire();
                true
            }
            None => false,
        }
    }

    /// Release the connection behind `handle`, but only if it still owns its
    /// key; a replacement opened by someone else is left alone.
    pub fn release_handle(&self, handle: &ConnectionHandle) -> bool {
        let mut state = self.state.lock();
        let owned = state
            .entries
            .get(handle.key())
            .map(|entry| entry.shared.generation() == handle.generation())
            .unwrap_or(false);
        if !owned {
            return false;
        }

        match state.entries.remove(handle.key()) {
            Some(entry) => {
                info!(key = %handle.key(), "Releasing channel");
                entry.retire();
                true
            }
            None => false,
        }
    }

    /// True while `handle` is the registered connection for its key
    pub fn is_current(&self, handle: &ConnectionHandle) -> bool {
        self.state
            .lock()
            .entries
            .get(handle.key())
            .map(|entry| entry.shared.generation() == handle.generation())
            .unwrap_or(false)
    }

    pub fn release_all(&self) {
        let mut state = self.state.lock();
        for (key, entry) in state.entries.drain() {
            debug!(key = %key, "Releasing channel");
            entry.retire();
        }
    }

    /// Queue a message on an open connection. Returns false when the key is
    /// unknown or the connection is not open.
    pub fn send(&self, key: &ChannelKey, message: OutboundMessage) -> bool {
        let state = self.state.lock();
        match state.entries.get(key) {
            Some(entry) if entry.shared.state() == ConnectionState::Open => {
                entry.commands.send(Command::Send(message)).is_ok()
            }
            _ => false,
        }
    }

    pub fn handle(&self, key: &ChannelKey) -> Option<ConnectionHandle> {
        let state = self.state.lock();
        state
            .entries
            .get(key)
            .map(|entry| ConnectionHandle::new(Arc::clone(&entry.shared)))
    }

    pub fn state(&self, key: &ChannelKey) -> Option<ConnectionState> {
        let state = self.state.lock();
        state.entries.get(key).map(|entry| entry.shared.state())
    }

    pub fn info(&self, key: &ChannelKey) -> Option<ConnectionInfo> {
        let state = self.state.lock();
        state.entries.get(key).map(|entry| entry.shared.info())
    }

    /// `Disconnected` for unknown keys
    pub fn status(&self, key: &ChannelKey) -> ConnectionStatus {
        self.state(key)
            .map(ConnectionStatus::from)
            .unwrap_or(ConnectionStatus::Disconnected)
    }

    pub fn all_statuses(&self) -> BTreeMap<ChannelKey, ConnectionStatus> {
        let state = self.state.lock();
        state
            .entries
            .iter()
            .map(|(key, entry)| (key.clone(), ConnectionStatus::from(entry.shared.state())))
            .collect()
    }

    pub fn contains(&self, key: &ChannelKey) -> bool {
        self.state.lock().entries.contains_key(key)
    }

    pub fn keys(&self) -> Vec<ChannelKey> {
        let mut keys: Vec<_> = self.state.lock().entries.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for ChannelRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelRegistry")
            .field("keys", &self.keys())
            .field("config", &self.config)
            .finish()
    }
}

/// Parse `raw`, reporting a rejection to `on_error` before returning it
fn checked_url(key: &ChannelKey, raw: &str, on_error: &ErrorHandler) -> Result<Url, NormalizedError> {
    parse_channel_url(raw).map_err(|e| {
        warn!(key = %key, url = raw, error = %e, "Rejected channel URL");
        on_error(e.clone());
        e
    })
}

fn parse_channel_url(raw: &str) -> Result<Url, NormalizedError> {
    let url = Url::parse(raw).map_err(|e| NormalizedError::invalid_endpoint(raw, e))?;
    match url.scheme() {
        "ws" | "wss" => Ok(url),
        other => Err(NormalizedError::invalid_endpoint(
            raw,
            format!("unsupported scheme '{}'", other),
        )),
    }
}
