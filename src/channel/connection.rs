//! One channel connection: connect, heartbeat, decode, reconnect
//!
//! The connection runs as a spawned task. Every state change that makes it
//! live (Connecting, Open) and every message delivery is gated on the
//! registry still naming this connection as the owner of its key, so a
//! superseded or released connection can never come back to life.

use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::{
    protocol::{frame::coding::CloseCode, CloseFrame},
    Error as WsError, Message as WsMessage,
};
use tracing::{debug, error, info, warn};
use url::Url;

use super::registry::RegistryState;
use super::transport::{Connector, WsSink, WsSource};
use super::{ChannelConfig, ChannelKey, ConnectionState, ErrorHandler, MessageHandler};
use crate::error::NormalizedError;
use crate::protocol::{InboundEvent, OutboundMessage};

/// Commands from the registry to a running connection
#[derive(Debug)]
pub(super) enum Command {
    Send(OutboundMessage),
    Close,
}

// ─────────────────────────────────────────────────────────────────
// Shared State
// ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
struct Status {
    state: ConnectionState,
    reconnect_attempt: u32,
    last_heartbeat_ack: Option<Instant>,
    opened_at: Option<Instant>,
}

/// State shared between the registry, handles and the connection task
pub(super) struct ConnectionShared {
    key: ChannelKey,
    url: Url,
    generation: u64,
    status: RwLock<Status>,
}

impl ConnectionShared {
    pub(super) fn new(key: ChannelKey, url: Url, generation: u64) -> Self {
        Self {
            key,
            url,
            generation,
            status: RwLock::new(Status {
                state: ConnectionState::Idle,
                reconnect_attempt: 0,
                last_heartbeat_ack: None,
                opened_at: None,
            }),
        }
    }

    pub(super) fn key(&self) -> &ChannelKey {
        &self.key
    }

    pub(super) fn url(&self) -> &Url {
        &self.url
    }

    pub(super) fn generation(&self) -> u64 {
        self.generation
    }

    pub(super) fn state(&self) -> ConnectionState {
        self.status.read().state
    }

    pub(super) fn set_state(&self, state: ConnectionState) {
        self.status.write().state = state;
    }

    fn reconnect_attempt(&self) -> u32 {
        self.status.read().reconnect_attempt
    }

    fn set_reconnect_attempt(&self, attempt: u32) {
        self.status.write().reconnect_attempt = attempt;
    }

    fn mark_open(&self, at: Instant) {
        let mut status = self.status.write();
        status.opened_at = Some(at);
        status.last_heartbeat_ack = Some(at);
    }

    /// Record a pong. Returns true when this completed the first round trip
    /// after a reconnect and the attempt counter was reset.
    fn record_ack(&self, at: Instant) -> bool {
        let mut status = self.status.write();
        status.last_heartbeat_ack = Some(at);
        if status.reconnect_attempt > 0 {
            status.reconnect_attempt = 0;
            true
        } else {
            false
        }
    }

    fn since_last_ack(&self, now: Instant) -> Duration {
        match self.status.read().last_heartbeat_ack {
            Some(at) => now.saturating_duration_since(at),
            None => Duration::ZERO,
        }
    }

    pub(super) fn info(&self) -> ConnectionInfo {
        let status = *self.status.read();
        ConnectionInfo {
            key: self.key.clone(),
            url: self.url.clone(),
            state: status.state,
            reconnect_attempt: status.reconnect_attempt,
            last_heartbeat_ack: status.last_heartbeat_ack,
            opened_at: status.opened_at,
        }
    }
}

/// Point-in-time view of a connection
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub key: ChannelKey,
    pub url: Url,
    pub state: ConnectionState,
    pub reconnect_attempt: u32,
    pub last_heartbeat_ack: Option<Instant>,
    pub opened_at: Option<Instant>,
}

/// Read-only handle to a connection created by the registry
#[derive(Clone)]
pub struct ConnectionHandle {
    shared: Arc<ConnectionShared>,
}

impl ConnectionHandle {
    pub(super) fn new(shared: Arc<ConnectionShared>) -> Self {
        Self { shared }
    }

    pub fn key(&self) -> &ChannelKey {
        self.shared.key()
    }

    pub fn url(&self) -> &Url {
        self.shared.url()
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    pub fn info(&self) -> ConnectionInfo {
        self.shared.info()
    }

    /// Monotonic id; a replacement connection always has a larger one
    pub fn generation(&self) -> u64 {
        self.shared.generation()
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("key", self.key())
            .field("generation", &self.generation())
            .field("state", &self.state())
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────
// Connection Task
// ─────────────────────────────────────────────────────────────────

/// Why a transport session ended
#[derive(Debug)]
enum Closure {
    /// Released by the caller or the registry went away
    Requested,
    /// Another connection took over the key
    Superseded,
    /// Server sent close code 1000
    Normal,
    /// Anything else; eligible for reconnect
    Abnormal(String),
}

pub(super) struct ConnectionTask {
    pub(super) shared: Arc<ConnectionShared>,
    pub(super) registry: Weak<Mutex<RegistryState>>,
    pub(super) config: ChannelConfig,
    pub(super) connector: Arc<dyn Connector>,
    pub(super) on_message: MessageHandler,
    pub(super) on_error: ErrorHandler,
    pub(super) commands: mpsc::UnboundedReceiver<Command>,
}

impl ConnectionTask {
    /// Main loop with reconnection logic
    pub(super) async fn run(mut self) {
        let key = self.shared.key().clone();

        loop {
            if !self.transition(ConnectionState::Connecting) {
                debug!(key = %key, "Connection no longer owns its key");
                break;
            }

            info!(
                key = %key,
                url = %self.shared.url(),
                attempt = self.shared.reconnect_attempt(),
                "Connecting channel"
            );

            let closure = match self.connect().await {
                Ok((sink, source)) => self.drive(sink, source).await,
                Err(closure) => closure,
            };
            self.shared.set_state(ConnectionState::Closed);

            match closure {
                Closure::Requested => {
                    info!(key = %key, "Channel closed");
                    break;
                }
                Closure::Superseded => {
                    debug!(key = %key, "Channel superseded");
                    break;
                }
                Closure::Normal => {
                    info!(key = %key, "Server closed channel normally");
                    if self.deregister() {
                        (self.on_error)(NormalizedError::channel_closed(key.as_str()));
                    }
                    break;
                }
                Closure::Abnormal(reason) => {
                    warn!(key = %key, reason = %reason, "Channel closed abnormally");
                    if !self.schedule_reconnect().await {
                        break;
                    }
                }
            }
        }

        debug!(key = %key, "Connection task terminated");
    }

    /// Open the transport, bounded by the connect timeout and abandonable by
    /// a close command
    async fn connect(&mut self) -> Result<(WsSink, WsSource), Closure> {
        let connector = Arc::clone(&self.connector);
        let url = self.shared.url().clone();
        let limit = self.config.connect_timeout;
        let connecting =
            tokio::time::timeout(limit, async move { connector.connect(&url).await });
        tokio::pin!(connecting);

        loop {
            tokio::select! {
                result = &mut connecting => {
                    return match result {
                        Ok(Ok(transport)) => Ok(transport),
                        Ok(Err(e)) => {
                            warn!(key = %self.shared.key(), error = %e, "Failed to connect channel");
                            self.report(NormalizedError::network(format!(
                                "WebSocket connection failed: {}",
                                e
                            )));
                            Err(Closure::Abnormal(e.to_string()))
                        }
                        Err(_) => {
                            warn!(
                                key = %self.shared.key(),
                                timeout_ms = limit.as_millis() as u64,
                                "Channel connect timed out"
                            );
                            self.report(NormalizedError::timeout(format!(
                                "WebSocket connection timed out after {}ms",
                                limit.as_millis()
                            )));
                            Err(Closure::Abnormal("connect timeout".to_string()))
                        }
                    };
                }

                cmd = self.commands.recv() => {
                    match cmd {
                        Some(Command::Send(_)) => {
                            debug!(key = %self.shared.key(), "Dropping outbound message while connecting");
                        }
                        Some(Command::Close) | None => return Err(Closure::Requested),
                    }
                }
            }
        }
    }

    /// Handle an open transport until it closes
    async fn drive(&mut self, mut sink: WsSink, mut source: WsSource) -> Closure {
        if !self.transition(ConnectionState::Open) {
            let _ = sink.send(normal_close()).await;
            return Closure::Superseded;
        }

        let key = self.shared.key().clone();
        let interval = self.config.heartbeat_interval;
        let opened_at = Instant::now();
        self.shared.mark_open(opened_at);
        info!(key = %key, "Channel open");

        if let Err(e) = send_outbound(&mut sink, &OutboundMessage::Ping { timestamp: None }).await {
            return self.transport_failed(e);
        }

        let mut heartbeat = tokio::time::interval_at(opened_at + interval, interval);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = heartbeat.tick() => {
                    let silent_for = self.shared.since_last_ack(Instant::now());
                    if silent_for > interval * 2 {
                        warn!(
                            key = %key,
                            silent_ms = silent_for.as_millis() as u64,
                            "Heartbeat timed out"
                        );
                        return Closure::Abnormal("heartbeat timeout".to_string());
                    }

                    if let Err(e) = send_outbound(&mut sink, &OutboundMessage::ping_now()).await {
                        return self.transport_failed(e);
                    }
                    debug!(key = %key, "Sent heartbeat");
                }

                frame = source.next() => {
                    match frame {
                        Some(Ok(WsMessage::Text(text))) => {
                            self.handle_payload(InboundEvent::decode(&text));
                        }
                        Some(Ok(WsMessage::Binary(data))) => {
                            self.handle_payload(InboundEvent::decode_bytes(&data));
                        }
                        Some(Ok(WsMessage::Ping(data))) => {
                            if let Err(e) = sink.send(WsMessage::Pong(data)).await {
                                return self.transport_failed(e);
                            }
                        }
                        Some(Ok(WsMessage::Close(frame))) => {
                            info!(key = %key, frame = ?frame, "Received close frame");
                            return match frame {
                                Some(f) if f.code == CloseCode::Normal => Closure::Normal,
                                Some(f) => Closure::Abnormal(format!("closed with code {}", f.code)),
                                None => Closure::Abnormal("closed without status".to_string()),
                            };
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => return self.transport_failed(e),
                        None => return Closure::Abnormal("stream ended".to_string()),
                    }
                }

                cmd = self.commands.recv() => {
                    match cmd {
                        Some(Command::Send(message)) => {
                            if let Err(e) = send_outbound(&mut sink, &message).await {
                                return self.transport_failed(e);
                            }
                        }
                        Some(Command::Close) | None => {
                            let _ = sink.send(normal_close()).await;
                            return Closure::Requested;
                        }
                    }
                }
            }
        }
    }

    fn handle_payload(&self, decoded: serde_json::Result<InboundEvent>) {
        match decoded {
            Ok(InboundEvent::Pong) => {
                if self.shared.record_ack(Instant::now()) {
                    debug!(key = %self.shared.key(), "Heartbeat round trip complete, reconnect counter reset");
                }
            }
            Ok(event) => {
                if self.is_current() {
                    debug!(key = %self.shared.key(), kind = event.type_name(), "Delivering channel message");
                    (self.on_message)(event);
                }
            }
            Err(e) => {
                warn!(key = %self.shared.key(), error = %e, "Dropping undecodable channel message");
            }
        }
    }

    /// Wait out the backoff delay for the next attempt. Returns false when
    /// the connection should stop instead.
    async fn schedule_reconnect(&mut self) -> bool {
        let attempt = self.shared.reconnect_attempt();
        let max = self.config.max_reconnect_attempts;

        if attempt >= max {
            error!(
                key = %self.shared.key(),
                attempts = attempt,
                max = max,
                "Max reconnection attempts reached"
            );
            if self.deregister() {
                (self.on_error)(NormalizedError::reconnect_exhausted(
                    self.shared.key().as_str(),
                    attempt,
                ));
            }
            return false;
        }

        let next = attempt + 1;
        self.shared.set_reconnect_attempt(next);
        let delay = self.config.backoff.delay(next);

        info!(
            key = %self.shared.key(),
            attempt = next,
            max = max,
            delay_ms = delay.as_millis() as u64,
            "Waiting before reconnection"
        );

        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                _ = &mut sleep => return self.is_current(),
                cmd = self.commands.recv() => {
                    match cmd {
                        Some(Command::Send(_)) => {
                            debug!(key = %self.shared.key(), "Dropping outbound message while reconnecting");
                        }
                        Some(Command::Close) | None => return false,
                    }
                }
            }
        }
    }

    fn transport_failed(&self, e: WsError) -> Closure {
        warn!(key = %self.shared.key(), error = %e, "WebSocket error");
        self.report(NormalizedError::network(format!("WebSocket error: {}", e)));
        Closure::Abnormal(e.to_string())
    }

    fn report(&self, error: NormalizedError) {
        if self.is_current() {
            (self.on_error)(error);
        }
    }

    // ── Ownership checks ──

    fn is_current(&self) -> bool {
        match self.registry.upgrade() {
            Some(registry) => registry.lock().is_current(&self.shared),
            None => false,
        }
    }

    /// Move to a live state, but only while still owning the key
    fn transition(&self, to: ConnectionState) -> bool {
        let Some(registry) = self.registry.upgrade() else {
            return false;
        };
        let guard = registry.lock();
        if !guard.is_current(&self.shared) {
            return false;
        }
        self.shared.set_state(to);
        true
    }

    /// Remove this connection from the registry if it still owns its key
    fn deregister(&self) -> bool {
        match self.registry.upgrade() {
            Some(registry) => registry.lock().remove_if_current(&self.shared),
            None => false,
        }
    }
}

fn normal_close() -> WsMessage {
    WsMessage::Close(Some(CloseFrame {
        code: CloseCode::Normal,
        reason: "Normal closure".into(),
    }))
}

async fn send_outbound(sink: &mut WsSink, message: &OutboundMessage) -> Result<(), WsError> {
    let json = message
        .to_json()
        .map_err(|e| WsError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;
    sink.send(WsMessage::Text(json)).await
}
