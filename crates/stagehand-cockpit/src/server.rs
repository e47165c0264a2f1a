//! [`CockpitServer`] – HTTP + WebSocket remote control.
//!
//! Listens on `0.0.0.0:8000` (configurable via [`CockpitServer::with_port`]).
//!
//! * Plain HTTP `GET` requests → JSON responses from the [`ControlSurface`].
//! * WebSocket upgrades → frame and event push, plus upstream commands.

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{Value, json};
use stagehand_middleware::EventBus;
use stagehand_types::{ControlSurface, StageError};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast::error::RecvError;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, info, warn};

/// Default TCP port for the cockpit.
pub const DEFAULT_PORT: u16 = 8000;

/// Largest request head read from a plain HTTP client.
const MAX_REQUEST_HEAD: usize = 8 * 1024;

// ---------------------------------------------------------------------------
// CockpitServer
// ---------------------------------------------------------------------------

/// Remote control server over a [`ControlSurface`] and the [`EventBus`].
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use stagehand_cockpit::CockpitServer;
/// use stagehand_middleware::EventBus;
/// use stagehand_types::ControlSurface;
///
/// async fn serve(control: Arc<dyn ControlSurface>, bus: EventBus) {
///     if let Err(e) = CockpitServer::new(control, bus).with_port(8001).run().await {
///         eprintln!("cockpit failed: {e}");
///     }
/// }
/// ```
pub struct CockpitServer {
    control: Arc<dyn ControlSurface>,
    bus: EventBus,
    port: u16,
}

impl CockpitServer {
    /// Create a server on the [`DEFAULT_PORT`].
    pub fn new(control: Arc<dyn ControlSurface>, bus: EventBus) -> Self {
        Self {
            control,
            bus,
            port: DEFAULT_PORT,
        }
    }

    /// Override the listening port (builder-style).
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Bind `0.0.0.0:{port}` and serve until the task is dropped.
    ///
    /// # Errors
    ///
    /// Returns [`StageError::Channel`] if the TCP listener cannot bind.
    pub async fn run(self) -> Result<(), StageError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| StageError::Channel(format!("cockpit bind error on {addr}: {e}")))?;
        self.serve(listener).await
    }

    /// Serve connections from an already bound listener.
    pub async fn serve(self, listener: TcpListener) -> Result<(), StageError> {
        match listener.local_addr() {
            Ok(addr) => info!(%addr, "cockpit listening"),
            Err(e) => warn!(error = %e, "cockpit listening on unknown address"),
        }
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    let control = Arc::clone(&self.control);
                    let bus = self.bus.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, peer, control, bus).await {
                            warn!(%peer, error = %e, "cockpit client error");
                        }
                    });
                }
                Err(e) => warn!(error = %e, "cockpit accept error"),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Per-connection handler
// ---------------------------------------------------------------------------

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    control: Arc<dyn ControlSurface>,
    bus: EventBus,
) -> Result<(), StageError> {
    // `peek` leaves the request in the socket for the WebSocket handshake.
    let mut buf = [0u8; 1024];
    let n = stream
        .peek(&mut buf)
        .await
        .map_err(|e| StageError::Channel(format!("peek error from {peer}: {e}")))?;

    let preview = String::from_utf8_lossy(&buf[..n]);
    let is_ws_upgrade = preview.lines().any(|line| {
        let line = line.to_ascii_lowercase();
        line.starts_with("upgrade:") && line.contains("websocket")
    });

    if is_ws_upgrade {
        handle_ws(stream, peer, control, bus).await
    } else {
        handle_http(stream, control).await
    }
}

// ---------------------------------------------------------------------------
// Plain HTTP: JSON control routes
// ---------------------------------------------------------------------------

async fn handle_http(
    mut stream: TcpStream,
    control: Arc<dyn ControlSurface>,
) -> Result<(), StageError> {
    let head = read_request_head(&mut stream).await?;
    let mut parts = head.lines().next().unwrap_or("").split_whitespace();
    let method = parts.next().unwrap_or("").to_string();
    let path = parts.next().unwrap_or("/").to_string();
    debug!(%method, %path, "cockpit request");

    // Control calls may block (a model switch joins the perception thread).
    let (status, body) = tokio::task::spawn_blocking(move || route(control.as_ref(), &method, &path))
        .await
        .map_err(|e| StageError::Channel(format!("route handler failed: {e}")))?;

    let body = body.to_string();
    let response = format!(
        "HTTP/1.1 {status} {}\r\n\
         Content-Type: application/json\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\
         \r\n\
         {body}",
        reason(status),
        body.len(),
    );
    stream
        .write_all(response.as_bytes())
        .await
        .map_err(|e| StageError::Channel(format!("HTTP write error: {e}")))?;
    Ok(())
}

async fn read_request_head(stream: &mut TcpStream) -> Result<String, StageError> {
    let mut head = Vec::new();
    let mut chunk = [0u8; 1024];
    while !head.windows(4).any(|w| w == b"\r\n\r\n") && head.len() < MAX_REQUEST_HEAD {
        let n = stream
            .read(&mut chunk)
            .await
            .map_err(|e| StageError::Channel(format!("HTTP read error: {e}")))?;
        if n == 0 {
            break;
        }
        head.extend_from_slice(&chunk[..n]);
    }
    Ok(String::from_utf8_lossy(&head).into_owned())
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        405 => "Method Not Allowed",
        _ => "Internal Server Error",
    }
}

/// Map one request onto the control surface.
///
/// | Route | Response |
/// |---|---|
/// | `/start` | `{"started": bool}` |
/// | `/stop` | `{"stopped": bool}` |
/// | `/status` | [`StatusReport`][stagehand_types::StatusReport] |
/// | `/tasks` | `[TaskInfo]` |
/// | `/tasks/{name}/enable` / `disable` | `{"ok": bool}` |
/// | `/models/{name}` | `{"status": bool}`, plus `"error"` on failure |
pub(crate) fn route(control: &dyn ControlSurface, method: &str, path: &str) -> (u16, Value) {
    if method != "GET" {
        return (405, json!({ "error": format!("method {method} not allowed") }));
    }
    let path = path.split('?').next().unwrap_or("");
    let segments: Vec<&str> = path.trim_matches('/').split('/').collect();

    match segments.as_slice() {
        [""] => (
            200,
            json!({
                "routes": [
                    "/start", "/stop", "/status", "/tasks",
                    "/tasks/{name}/enable", "/tasks/{name}/disable", "/models/{name}"
                ]
            }),
        ),
        ["start"] => (200, json!({ "started": control.start_tasks() })),
        ["stop"] => (200, json!({ "stopped": control.stop_tasks() })),
        ["status"] => to_json(&control.status()),
        ["tasks"] => to_json(&control.task_list()),
        ["tasks", name, "enable"] => (200, json!({ "ok": control.set_task_enabled(name, true) })),
        ["tasks", name, "disable"] => (200, json!({ "ok": control.set_task_enabled(name, false) })),
        ["models", name] => match control.switch_model(name) {
            Ok(()) => (200, json!({ "status": true })),
            Err(e @ StageError::UnknownModel(_)) => {
                (404, json!({ "status": false, "error": e.to_string() }))
            }
            Err(e) => (400, json!({ "status": false, "error": e.to_string() })),
        },
        _ => (404, json!({ "error": format!("no route for {path}") })),
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> (u16, Value) {
    match serde_json::to_value(value) {
        Ok(v) => (200, v),
        Err(e) => (500, json!({ "error": e.to_string() })),
    }
}

// ---------------------------------------------------------------------------
// WebSocket: frame/event push and upstream commands
// ---------------------------------------------------------------------------

async fn handle_ws(
    stream: TcpStream,
    peer: SocketAddr,
    control: Arc<dyn ControlSurface>,
    bus: EventBus,
) -> Result<(), StageError> {
    let ws_stream = accept_async(stream)
        .await
        .map_err(|e| StageError::Channel(format!("WS handshake from {peer}: {e}")))?;
    info!(%peer, "cockpit observer connected");

    let (mut ws_tx, mut ws_rx) = ws_stream.split();
    let mut events = bus.subscribe_all();
    let mut frames = bus.subscribe_frames();

    loop {
        tokio::select! {
            // ── Downstream: bus events → observer ──────────────────────────
            result = events.recv() => {
                match result {
                    Ok(event) => match serde_json::to_string(&event) {
                        Ok(json) => {
                            if ws_tx.send(Message::Text(json.into())).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => warn!(error = %e, "event serialization error"),
                    },
                    Err(RecvError::Lagged(n)) => debug!(%peer, lagged_by = n, "observer lagged on events"),
                    Err(RecvError::Closed) => break,
                }
            }
            // ── Downstream: frames → observer ──────────────────────────────
            result = frames.recv() => {
                match result {
                    Ok(packet) => {
                        if ws_tx.send(Message::Binary(packet.to_wire().into())).await.is_err() {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(n)) => debug!(%peer, dropped = n, "observer dropped frames"),
                    Err(RecvError::Closed) => break,
                }
            }
            // ── Upstream: observer → control surface ───────────────────────
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let control = Arc::clone(&control);
                        let text = text.as_str().to_string();
                        let reply = tokio::task::spawn_blocking(move || {
                            apply_command(control.as_ref(), &text)
                        })
                        .await;
                        match reply {
                            Ok(Some(reply)) => {
                                if ws_tx.send(Message::Text(reply.to_string().into())).await.is_err() {
                                    break;
                                }
                            }
                            Ok(None) => {}
                            Err(e) => warn!(error = %e, "command handler failed"),
                        }
                    }
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                    _ => {}
                }
            }
        }
    }

    info!(%peer, "cockpit observer disconnected");
    Ok(())
}

// ---------------------------------------------------------------------------
// Upstream commands
// ---------------------------------------------------------------------------

/// A command sent by an observer over the WebSocket.
#[derive(Debug, Deserialize, PartialEq)]
#[serde(tag = "op", rename_all = "snake_case")]
enum Command {
    Start,
    Stop,
    Status,
    Enable { name: String },
    Disable { name: String },
    SwitchModel { name: String },
}

/// Apply an upstream text message and build the reply.
///
/// Messages that are not a recognised command are ignored (`None`).
pub(crate) fn apply_command(control: &dyn ControlSurface, text: &str) -> Option<Value> {
    let command = match serde_json::from_str::<Command>(text) {
        Ok(c) => c,
        Err(e) => {
            debug!(error = %e, "ignoring upstream message");
            return None;
        }
    };
    let reply = match command {
        Command::Start => json!({ "op": "start", "started": control.start_tasks() }),
        Command::Stop => json!({ "op": "stop", "stopped": control.stop_tasks() }),
        Command::Status => json!({ "op": "status", "status": control.status() }),
        Command::Enable { name } => {
            json!({ "op": "enable", "name": name, "ok": control.set_task_enabled(&name, true) })
        }
        Command::Disable { name } => {
            json!({ "op": "disable", "name": name, "ok": control.set_task_enabled(&name, false) })
        }
        Command::SwitchModel { name } => match control.switch_model(&name) {
            Ok(()) => json!({ "op": "switch_model", "name": name, "status": true }),
            Err(e) => json!({
                "op": "switch_model",
                "name": name,
                "status": false,
                "error": e.to_string(),
            }),
        },
    };
    Some(reply)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    use stagehand_middleware::FramePacket;
    use stagehand_types::{
        Event, EventPayload, Frame, Location, MainTab, StatusReport, TaskInfo, TaskStatus,
    };
    use tokio_tungstenite::connect_async;

    #[derive(Default)]
    struct FakeControl {
        running: Mutex<bool>,
        disabled: Mutex<Vec<String>>,
        model: Mutex<String>,
    }

    impl ControlSurface for FakeControl {
        fn start_tasks(&self) -> bool {
            let mut running = self.running.lock().unwrap();
            !std::mem::replace(&mut *running, true)
        }

        fn stop_tasks(&self) -> bool {
            std::mem::replace(&mut *self.running.lock().unwrap(), false)
        }

        fn status(&self) -> StatusReport {
            StatusReport {
                perception_running: true,
                tasks_running: *self.running.lock().unwrap(),
                location: Some(Location::MainMenu(MainTab::Home)),
                active_model: Some(self.model.lock().unwrap().clone()),
                frames_processed: 42,
            }
        }

        fn task_list(&self) -> Vec<TaskInfo> {
            let disabled = self.disabled.lock().unwrap();
            vec![TaskInfo {
                name: "start_game".to_string(),
                description: "launch".to_string(),
                enabled: !disabled.iter().any(|n| n == "start_game"),
                status: TaskStatus::Pending,
                timeout_ms: 120_000,
                start_time: None,
                end_time: None,
                last_run_time: None,
            }]
        }

        fn set_task_enabled(&self, name: &str, enabled: bool) -> bool {
            if name != "start_game" {
                return false;
            }
            let mut disabled = self.disabled.lock().unwrap();
            disabled.retain(|n| n != name);
            if !enabled {
                disabled.push(name.to_string());
            }
            true
        }

        fn switch_model(&self, name: &str) -> Result<(), StageError> {
            if name == "base_ui" || name == "producer" {
                *self.model.lock().unwrap() = name.to_string();
                Ok(())
            } else {
                Err(StageError::UnknownModel(name.to_string()))
            }
        }
    }

    // ── Constructor ──────────────────────────────────────────────────────────

    #[test]
    fn default_port_is_8000() {
        let server = CockpitServer::new(Arc::new(FakeControl::default()), EventBus::default());
        assert_eq!(server.port(), DEFAULT_PORT);
        assert_eq!(server.with_port(9999).port(), 9999);
    }

    // ── HTTP routing ─────────────────────────────────────────────────────────

    #[test]
    fn start_and_stop_report_admission() {
        let control = FakeControl::default();
        assert_eq!(route(&control, "GET", "/start"), (200, json!({ "started": true })));
        assert_eq!(route(&control, "GET", "/start"), (200, json!({ "started": false })));
        assert_eq!(route(&control, "GET", "/stop"), (200, json!({ "stopped": true })));
        assert_eq!(route(&control, "GET", "/stop/"), (200, json!({ "stopped": false })));
    }

    #[test]
    fn status_and_tasks_serialize() {
        let control = FakeControl::default();
        let (code, status) = route(&control, "GET", "/status");
        assert_eq!(code, 200);
        assert_eq!(status["frames_processed"], 42);
        assert_eq!(status["location"], "MAIN_MENU__HOME");

        let (code, tasks) = route(&control, "GET", "/tasks?verbose=1");
        assert_eq!(code, 200);
        assert_eq!(tasks[0]["name"], "start_game");
        assert_eq!(tasks[0]["status"], "PENDING");
    }

    #[test]
    fn enable_disable_routes() {
        let control = FakeControl::default();
        assert_eq!(
            route(&control, "GET", "/tasks/start_game/disable"),
            (200, json!({ "ok": true }))
        );
        assert!(!control.task_list()[0].enabled);
        assert_eq!(
            route(&control, "GET", "/tasks/start_game/enable"),
            (200, json!({ "ok": true }))
        );
        assert_eq!(
            route(&control, "GET", "/tasks/missing/enable"),
            (200, json!({ "ok": false }))
        );
    }

    #[test]
    fn model_route_reports_errors() {
        let control = FakeControl::default();
        assert_eq!(route(&control, "GET", "/models/producer"), (200, json!({ "status": true })));
        let (code, body) = route(&control, "GET", "/models/missing");
        assert_eq!(code, 404);
        assert_eq!(body["status"], false);
        assert!(body["error"].as_str().unwrap().contains("missing"));
    }

    #[test]
    fn unknown_routes_and_methods() {
        let control = FakeControl::default();
        assert_eq!(route(&control, "GET", "/nope").0, 404);
        assert_eq!(route(&control, "POST", "/start").0, 405);
        assert_eq!(route(&control, "GET", "/").0, 200);
    }

    // ── Upstream commands ────────────────────────────────────────────────────

    #[test]
    fn commands_drive_the_control_surface() {
        let control = FakeControl::default();
        let reply = apply_command(&control, r#"{"op":"start"}"#).unwrap();
        assert_eq!(reply["started"], true);

        let reply = apply_command(&control, r#"{"op":"disable","name":"start_game"}"#).unwrap();
        assert_eq!(reply["ok"], true);
        assert!(!control.task_list()[0].enabled);

        let reply = apply_command(&control, r#"{"op":"switch_model","name":"nope"}"#).unwrap();
        assert_eq!(reply["status"], false);

        let reply = apply_command(&control, r#"{"op":"stop"}"#).unwrap();
        assert_eq!(reply["stopped"], true);
    }

    #[test]
    fn malformed_commands_are_ignored() {
        let control = FakeControl::default();
        assert!(apply_command(&control, "not json at all").is_none());
        assert!(apply_command(&control, r#"{"op":"enable"}"#).is_none());
        assert!(apply_command(&control, r#"{"op":"reboot"}"#).is_none());
        assert!(!*control.running.lock().unwrap());
    }

    // ── End to end ───────────────────────────────────────────────────────────

    async fn spawn_server(bus: EventBus) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = CockpitServer::new(Arc::new(FakeControl::default()), bus);
        tokio::spawn(server.serve(listener));
        addr
    }

    #[tokio::test]
    async fn http_status_over_tcp() {
        let addr = spawn_server(EventBus::default()).await;
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET /status HTTP/1.1\r\nHost: localhost\r\n\r\n")
            .await
            .unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();

        assert!(response.starts_with("HTTP/1.1 200 OK"));
        assert!(response.contains("application/json"));
        assert!(response.contains("\"frames_processed\":42"));
    }

    #[tokio::test]
    async fn websocket_pushes_frames_and_events_and_accepts_commands() {
        let bus = EventBus::default();
        let addr = spawn_server(bus.clone()).await;
        let (mut ws, _) = connect_async(format!("ws://{addr}/")).await.unwrap();

        let ready = tokio::time::timeout(Duration::from_secs(5), async {
            while bus.frame_subscribers() == 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        assert!(ready.is_ok(), "server never subscribed");

        let packet = FramePacket::encode(&Frame::filled(4, 2, [10, 20, 30]), 80).unwrap();
        bus.publish_frame(Arc::new(packet));
        match ws.next().await.unwrap().unwrap() {
            Message::Binary(bytes) => assert!(bytes.starts_with(b"4,2,")),
            other => panic!("expected a binary frame, got {other:?}"),
        }

        bus.publish(Event::new(
            "test",
            EventPayload::ModelSwitched {
                name: "producer".to_string(),
            },
        ))
        .unwrap();
        match ws.next().await.unwrap().unwrap() {
            Message::Text(text) => assert!(text.as_str().contains("ModelSwitched")),
            other => panic!("expected a text event, got {other:?}"),
        }

        ws.send(Message::Text(r#"{"op":"start"}"#.into())).await.unwrap();
        match ws.next().await.unwrap().unwrap() {
            Message::Text(text) => {
                let reply: Value = serde_json::from_str(text.as_str()).unwrap();
                assert_eq!(reply["started"], true);
            }
            other => panic!("expected a command reply, got {other:?}"),
        }
    }
}
