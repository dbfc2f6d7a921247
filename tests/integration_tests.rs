//! End-to-end tests against a real WebSocket server
//!
//! Tests the full flow: connect → heartbeat → updates → reconnect / close

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::{accept_hdr_async, tungstenite::Message as WsMessage};

use bili2text_client::channel::{ChannelConfig, ChannelRegistry, ConnectionStatus};
use bili2text_client::protocol::{SystemUpdate, TaskStatus, TaskUpdate};
use bili2text_client::report::{ErrorReporter, ReportOptions};
use bili2text_client::watch::{SystemMonitor, TaskWatcher};
use bili2text_client::{BackoffPolicy, Endpoints, NormalizedError};

/// What the mock server does once a client has sent its first ping
#[derive(Debug, Clone, Copy)]
enum Behavior {
    /// Stream a full task lifecycle (or one telemetry sample)
    Progress,
    /// Drop the first connection without a close frame after one update
    DropFirst,
    /// Close every connection with code 1000
    CloseNormally,
}

/// Mock bili2text server
struct MockServer {
    addr: SocketAddr,
    connections: Arc<AtomicUsize>,
    messages_received: Arc<RwLock<Vec<String>>>,
    paths: Arc<RwLock<Vec<String>>>,
}

impl MockServer {
    async fn start(behavior: Behavior) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connections = Arc::new(AtomicUsize::new(0));
        let messages_received = Arc::new(RwLock::new(Vec::new()));
        let paths = Arc::new(RwLock::new(Vec::new()));

        let (conn_count, messages, seen_paths) =
            (connections.clone(), messages_received.clone(), paths.clone());
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let index = conn_count.fetch_add(1, Ordering::SeqCst);
                let messages = messages.clone();
                let seen_paths = seen_paths.clone();
                tokio::spawn(async move {
                    handle_connection(stream, index, behavior, messages, seen_paths).await;
                });
            }
        });

        Self {
            addr,
            connections,
            messages_received,
            paths,
        }
    }

    fn endpoints(&self) -> Endpoints {
        Endpoints::new(&format!("http://{}", self.addr), "/api", "/ws").unwrap()
    }

    fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    fn messages(&self) -> Vec<String> {
        self.messages_received.read().clone()
    }

    fn paths(&self) -> Vec<String> {
        self.paths.read().clone()
    }
}

async fn handle_connection(
    stream: TcpStream,
    index: usize,
    behavior: Behavior,
    messages: Arc<RwLock<Vec<String>>>,
    paths: Arc<RwLock<Vec<String>>>,
) {
    let path = Arc::new(Mutex::new(String::new()));
    let path_slot = path.clone();
    let callback = move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
        *path_slot.lock() = req.uri().path().to_string();
        Ok(resp)
    };
    let Ok(ws_stream) = accept_hdr_async(stream, callback).await else {
        return;
    };
    let path = path.lock().clone();
    paths.write().push(path.clone());

    let (mut write, mut read) = ws_stream.split();
    let mut scripted = false;

    while let Some(Ok(msg)) = read.next().await {
        let WsMessage::Text(text) = msg else {
            continue;
        };
        messages.write().push(text.clone());

        let parsed: Value = match serde_json::from_str(&text) {
            Ok(v) => v,
            Err(_) => continue,
        };
        if parsed["type"] == "ping" {
            let _ = write.send(WsMessage::Text(json!({"type": "pong"}).to_string())).await;
        }
        if scripted {
            continue;
        }
        scripted = true;

        let frames = script_for(&path, index, behavior);
        for frame in frames {
            let _ = write.send(frame).await;
        }
        if matches!(behavior, Behavior::DropFirst) && index == 0 {
            // Abrupt disconnect: no close handshake
            return;
        }
    }
}

fn script_for(path: &str, index: usize, behavior: Behavior) -> Vec<WsMessage> {
    let text = |v: Value| WsMessage::Text(v.to_string());
    let task_id = path.rsplit('/').next().unwrap_or_default().to_string();
    let update = |status: &str, progress: f64| {
        text(json!({
            "type": "task_update",
            "task_id": task_id,
            "status": status,
            "progress": progress,
            "current_stage": status,
        }))
    };

    match behavior {
        Behavior::CloseNormally => vec![WsMessage::Close(Some(CloseFrame {
            code: CloseCode::Normal,
            reason: "done".into(),
        }))],
        Behavior::DropFirst if index == 0 => vec![update("downloading", 10.0)],
        Behavior::DropFirst => vec![update("completed", 100.0)],
        Behavior::Progress if path.ends_with("/system") => vec![text(json!({
            "type": "system_update",
            "data": {"cpu_usage": 21.5, "memory_usage": 48.0, "gpu_available": false},
            "timestamp": "2024-01-01T00:00:00Z",
        }))],
        Behavior::Progress => vec![
            update("downloading", 10.0),
            update("transcribing", 50.0),
            update("completed", 100.0),
        ],
    }
}

// ─────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────

fn fast_config() -> ChannelConfig {
    ChannelConfig {
        heartbeat_interval: Duration::from_millis(100),
        max_reconnect_attempts: 3,
        backoff: BackoffPolicy::from_millis(20),
        connect_timeout: Duration::from_secs(2),
    }
}

#[derive(Default)]
struct RecordingReporter {
    calls: Mutex<Vec<(String, String)>>,
}

impl ErrorReporter for RecordingReporter {
    fn handle_error(&self, error: &NormalizedError, context: &str, _options: &ReportOptions) {
        self.calls.lock().push((error.code(), context.to_string()));
    }
}

async fn recv<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for update")
        .expect("listener channel closed")
}

fn task_listener(watcher: &TaskWatcher) -> mpsc::UnboundedReceiver<TaskUpdate> {
    let (tx, rx) = mpsc::unbounded_channel();
    watcher.on_status_update(Arc::new(move |update: &TaskUpdate| {
        let _ = tx.send(update.clone());
    }));
    rx
}

// ─────────────────────────────────────────────────────────────────
// Task watcher
// ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_task_watcher_full_lifecycle() {
    let server = MockServer::start(Behavior::Progress).await;
    let watcher = TaskWatcher::new(ChannelRegistry::new(fast_config()), server.endpoints());
    let mut updates = task_listener(&watcher);

    watcher.watch("42").unwrap();

    let statuses = [
        recv(&mut updates).await,
        recv(&mut updates).await,
        recv(&mut updates).await,
    ];
    assert_eq!(statuses[0].status, TaskStatus::Downloading);
    assert_eq!(statuses[1].progress, Some(50.0));
    assert_eq!(statuses[1].stage.as_deref(), Some("transcribing"));
    assert!(statuses[2].status.is_terminal());
    assert!(statuses.iter().all(|u| u.task_id == "42"));

    assert_eq!(watcher.latest_update().unwrap().status, TaskStatus::Completed);
    assert_eq!(server.paths(), vec!["/ws/tasks/42".to_string()]);

    let first: Value = serde_json::from_str(&server.messages()[0]).unwrap();
    assert_eq!(first, json!({"type": "ping"}));
}

#[tokio::test]
async fn test_heartbeats_keep_answered_connection() {
    let server = MockServer::start(Behavior::Progress).await;
    let watcher = TaskWatcher::new(ChannelRegistry::new(fast_config()), server.endpoints());
    let mut updates = task_listener(&watcher);

    watcher.watch("7").unwrap();
    recv(&mut updates).await;

    tokio::time::sleep(Duration::from_millis(700)).await;

    let pings = server
        .messages()
        .iter()
        .filter(|m| m.contains("\"ping\""))
        .count();
    assert!(pings >= 4, "only {} pings", pings);
    assert_eq!(server.connection_count(), 1);
    assert_eq!(watcher.connection_status(), ConnectionStatus::Connected);
}

#[tokio::test]
async fn test_reconnects_after_abrupt_disconnect() {
    let server = MockServer::start(Behavior::DropFirst).await;
    let watcher = TaskWatcher::new(ChannelRegistry::new(fast_config()), server.endpoints());
    let mut updates = task_listener(&watcher);

    watcher.watch("9").unwrap();

    assert_eq!(recv(&mut updates).await.status, TaskStatus::Downloading);
    assert_eq!(recv(&mut updates).await.status, TaskStatus::Completed);
    assert_eq!(server.connection_count(), 2);
    assert_eq!(watcher.current_task().as_deref(), Some("9"));
}

#[tokio::test]
async fn test_normal_close_ends_subscription() {
    let server = MockServer::start(Behavior::CloseNormally).await;
    let reporter = Arc::new(RecordingReporter::default());
    let watcher = TaskWatcher::new(ChannelRegistry::new(fast_config()), server.endpoints())
        .with_reporter(reporter.clone());

    watcher.watch("3").unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;

    assert_eq!(server.connection_count(), 1);
    assert_eq!(watcher.connection_status(), ConnectionStatus::Disconnected);
    assert!(watcher.current_task().is_none());
    assert_eq!(
        *reporter.calls.lock(),
        vec![("CHANNEL_CLOSED".to_string(), "channel".to_string())]
    );

    // A closed subscription can be started again
    watcher.watch("3").unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(server.connection_count(), 2);
}

#[tokio::test]
async fn test_unreachable_server_reports_exhaustion_once() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let endpoints = Endpoints::new(&format!("http://{}", addr), "/api", "/ws").unwrap();
    let reporter = Arc::new(RecordingReporter::default());
    let mut config = fast_config();
    config.max_reconnect_attempts = 2;
    let watcher = TaskWatcher::new(ChannelRegistry::new(config), endpoints)
        .with_reporter(reporter.clone());

    watcher.watch("1").unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert_eq!(
        *reporter.calls.lock(),
        vec![("RECONNECT_EXHAUSTED".to_string(), "channel".to_string())]
    );
    assert_eq!(watcher.connection_status(), ConnectionStatus::Disconnected);
}

// ─────────────────────────────────────────────────────────────────
// System monitor
// ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_system_monitor_receives_metrics() {
    let server = MockServer::start(Behavior::Progress).await;
    let registry = ChannelRegistry::new(fast_config());
    let monitor = SystemMonitor::new(registry.clone(), server.endpoints());
    let (tx, mut updates) = mpsc::unbounded_channel();
    monitor.on_status_update(Arc::new(move |update: &SystemUpdate| {
        let _ = tx.send(update.clone());
    }));

    monitor.start_monitoring().unwrap();
    monitor.start_monitoring().unwrap();

    let update = recv(&mut updates).await;
    assert_eq!(update.data.cpu_usage, Some(21.5));
    assert_eq!(update.data.gpu_available, Some(false));
    assert_eq!(monitor.latest_metrics().unwrap().memory_usage, Some(48.0));
    assert_eq!(server.paths(), vec!["/ws/system".to_string()]);
    assert_eq!(registry.len(), 1);

    monitor.stop_monitoring();
    assert!(registry.is_empty());
    assert!(!monitor.is_monitoring());
}

#[tokio::test]
async fn test_task_and_system_channels_coexist() {
    let server = MockServer::start(Behavior::Progress).await;
    let registry = ChannelRegistry::new(fast_config());
    let watcher = TaskWatcher::new(registry.clone(), server.endpoints());
    let monitor = SystemMonitor::new(registry.clone(), server.endpoints());
    let mut updates = task_listener(&watcher);

    watcher.watch("5").unwrap();
    monitor.start_monitoring().unwrap();
    recv(&mut updates).await;

    let mut keys: Vec<String> = registry.keys().iter().map(|k| k.to_string()).collect();
    keys.sort();
    assert_eq!(keys, vec!["system".to_string(), "task_5".to_string()]);

    drop(watcher);
    drop(monitor);
    assert!(registry.is_empty());
}
