//! WebSocket control channel.
//!
//! The backend connects to `/ws` for heartbeat telemetry and config push.
//! The upgrade is gated by the per-process fingerprint (`?fp=…`); a
//! mismatch is rejected with 403 before the upgrade.
//!
//! Protocol (JSON text frames):
//!
//! - node → backend: `{"type":"heartbeat","instanceId",…,"load":{…}}`
//!   every 10 s, alongside a control-layer ping.
//! - backend → node: `{"type":"ping"}` → `{"type":"pong","instanceId","load"}`
//! - backend → node: `{"type":"config_update","data":{…}}`
//! - backend → node: `{"type":"task","data":{…}}`
//!
//! When the last connection drops, the node re-registers itself with the
//! backend pool.

use std::collections::HashMap;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::server::{error_response, AppState};

/// Idle read deadline; any received frame extends it.
const READ_DEADLINE: Duration = Duration::from_secs(60);

/// Heartbeat broadcast interval.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);

/// Per-connection outbound queue depth. Writes are serialized by the
/// single writer task (the raw connection is not safe for concurrent
/// writes).
const SEND_QUEUE: usize = 64;

/// Callback fired when the last connection drops.
pub type ReRegisterFn = Box<dyn Fn() + Send + Sync>;

/// The set of live control-channel connections.
pub struct WsHub {
    conns: Mutex<HashMap<String, mpsc::Sender<Message>>>,
    reregister: Mutex<Option<ReRegisterFn>>,
}

impl WsHub {
    /// Create an empty hub.
    pub fn new() -> Self {
        Self {
            conns: Mutex::new(HashMap::new()),
            reregister: Mutex::new(None),
        }
    }

    /// Set the callback fired when all connections are gone.
    pub fn set_reregister(&self, callback: ReRegisterFn) {
        *self.reregister.lock() = Some(callback);
    }

    /// Number of live connections.
    pub fn connection_count(&self) -> usize {
        self.conns.lock().len()
    }

    fn add(&self, id: String, tx: mpsc::Sender<Message>) {
        self.conns.lock().insert(id, tx);
    }

    /// Remove a connection; fires the re-register callback when it was
    /// the last one.
    fn remove(&self, id: &str) {
        let last_gone = {
            let mut conns = self.conns.lock();
            conns.remove(id).is_some() && conns.is_empty()
        };
        if last_gone {
            warn!("all control connections lost, triggering re-registration");
            if let Some(callback) = self.reregister.lock().as_ref() {
                callback();
            }
        }
    }

    fn senders(&self) -> Vec<(String, mpsc::Sender<Message>)> {
        self.conns
            .lock()
            .iter()
            .map(|(id, tx)| (id.clone(), tx.clone()))
            .collect()
    }

    /// Close every connection (shutdown path; does not trigger
    /// re-registration).
    pub async fn close_all(&self) {
        let senders: Vec<mpsc::Sender<Message>> = {
            let mut conns = self.conns.lock();
            let senders = conns.values().cloned().collect();
            conns.clear();
            senders
        };
        for tx in senders {
            let _ = tx.send(Message::Close(None)).await;
        }
    }
}

impl Default for WsHub {
    fn default() -> Self {
        Self::new()
    }
}

/// GET /ws — fingerprint-gated upgrade.
pub async fn ws_upgrade(
    ws: WebSocketUpgrade,
    Query(params): Query<HashMap<String, String>>,
    State(state): State<AppState>,
) -> Response {
    if !state.fingerprint.is_empty() {
        let presented = params.get("fp").map(String::as_str).unwrap_or("");
        if presented != state.fingerprint {
            warn!(presented, "fingerprint mismatch on ws upgrade");
            return error_response(StatusCode::FORBIDDEN, "invalid fingerprint");
        }
    }
    ws.on_upgrade(move |socket| run_connection(state, socket))
        .into_response()
}

async fn run_connection(state: AppState, socket: WebSocket) {
    let conn_id = uuid::Uuid::new_v4().to_string();
    info!(conn = %conn_id, "control channel connected");

    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::channel::<Message>(SEND_QUEUE);
    state.ws.add(conn_id.clone(), tx.clone());

    // Single writer task serializes all outbound frames.
    let writer = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let closing = matches!(msg, Message::Close(_));
            if sink.send(msg).await.is_err() || closing {
                break;
            }
        }
    });

    loop {
        let frame = match tokio::time::timeout(READ_DEADLINE, stream.next()).await {
            Err(_) => {
                warn!(conn = %conn_id, "read deadline exceeded");
                break;
            }
            Ok(None) | Ok(Some(Err(_))) => break,
            Ok(Some(Ok(frame))) => frame,
        };

        match frame {
            Message::Text(text) => handle_frame(&state, &tx, text.as_str()).await,
            // Control frames count as activity; the deadline resets on
            // the next loop turn.
            Message::Ping(_) | Message::Pong(_) | Message::Binary(_) => {}
            Message::Close(_) => break,
        }
    }

    info!(conn = %conn_id, "control channel disconnected");
    writer.abort();
    state.ws.remove(&conn_id);
}

async fn handle_frame(state: &AppState, tx: &mpsc::Sender<Message>, text: &str) {
    let Ok(msg) = serde_json::from_str::<Value>(text) else {
        return;
    };
    match msg.get("type").and_then(Value::as_str).unwrap_or("") {
        "ping" => {
            let pong = json!({
                "type": "pong",
                "instanceId": state.instance_id,
                "load": state.load.snapshot(),
            });
            let _ = tx.send(Message::Text(pong.to_string().into())).await;
        }
        "config_update" => {
            let data = msg.get("data").cloned().unwrap_or(Value::Null);
            info!("config update received over control channel");
            if let Err(e) = state.config_hub.handle_config_update(&data) {
                warn!(error = %e, "config update failed");
            }
        }
        "task" => {
            // Side-channel task push; dispatch happens elsewhere.
            info!(data = %msg.get("data").cloned().unwrap_or(serde_json::Value::Null), "task push received");
        }
        other => debug!(frame_type = other, "ignoring unknown frame"),
    }
}

/// Broadcast a control-layer ping plus a JSON heartbeat to every
/// connection every 10 s, until shutdown.
pub fn spawn_heartbeat(state: AppState) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(HEARTBEAT_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                () = state.shutdown.cancelled() => return,
                _ = ticker.tick() => {}
            }

            let senders = state.ws.senders();
            if senders.is_empty() {
                continue;
            }
            let heartbeat = json!({
                "type": "heartbeat",
                "instanceId": state.instance_id,
                "load": state.load.snapshot(),
            })
            .to_string();

            for (id, tx) in senders {
                let delivered = tx
                    .send(Message::Ping(axum::body::Bytes::new()))
                    .await
                    .is_ok()
                    && tx.send(Message::Text(heartbeat.clone().into())).await.is_ok();
                if !delivered {
                    state.ws.remove(&id);
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    #[test]
    fn remove_last_connection_fires_reregister() {
        let hub = WsHub::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let f = fired.clone();
        hub.set_reregister(Box::new(move || {
            f.fetch_add(1, Ordering::SeqCst);
        }));

        let (tx1, _rx1) = mpsc::channel(4);
        let (tx2, _rx2) = mpsc::channel(4);
        hub.add("a".into(), tx1);
        hub.add("b".into(), tx2);
        assert_eq!(hub.connection_count(), 2);

        hub.remove("a");
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        hub.remove("b");
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn removing_unknown_connection_does_not_fire() {
        let hub = WsHub::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let f = fired.clone();
        hub.set_reregister(Box::new(move || {
            f.fetch_add(1, Ordering::SeqCst);
        }));
        hub.remove("ghost");
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn close_all_clears_without_reregister() {
        let hub = WsHub::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let f = fired.clone();
        hub.set_reregister(Box::new(move || {
            f.fetch_add(1, Ordering::SeqCst);
        }));

        let (tx, mut rx) = mpsc::channel(4);
        hub.add("a".into(), tx);
        hub.close_all().await;
        assert_eq!(hub.connection_count(), 0);
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert!(matches!(rx.recv().await, Some(Message::Close(_))));
    }
}
