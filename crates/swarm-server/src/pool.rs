//! Backend pool client: the node's lifecycle against the control plane.
//!
//! 1. Bootstrap  → `POST /api/nanobot/pool {"action":"bootstrap"}` → instance id
//! 2. Register   → `POST /api/nanobot/pool {"action":"register"}` → join pool
//! 3. Heartbeat  → WS broadcast (owned by the server)
//! 4. Unregister → `POST /api/nanobot/pool {"action":"unregister"}` on shutdown
//!
//! Registration retries on a fixed 5 s interval until it succeeds or the
//! node shuts down. All pool errors are transient by design: a missing
//! backend degrades the node to standalone mode, never crashes it.

use std::net::UdpSocket;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use swarm_core::ids;

const POOL_TIMEOUT: Duration = Duration::from_secs(10);
const UNREGISTER_TIMEOUT: Duration = Duration::from_secs(5);
const RETRY_INTERVAL: Duration = Duration::from_secs(5);

/// Errors from pool exchanges. Always recovered into retries or
/// standalone fallbacks by callers.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// Transport failure.
    #[error("pool request: {0}")]
    Http(#[from] reqwest::Error),
    /// Backend returned a non-OK status.
    #[error("pool returned HTTP {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body.
        body: String,
    },
    /// Backend refused the registration.
    #[error("registration rejected: {0}")]
    Rejected(String),
}

/// Pool registration settings.
pub struct PoolConfig {
    /// Backend base URL (`SURVIVAL_API_URL`); empty means standalone.
    pub backend_url: String,
    /// Bearer token (`NANOBOT_API_KEY`).
    pub api_key: String,
    /// This node's HTTP port.
    pub port: u16,
    /// Advertised model.
    pub model: String,
    /// Advertised tool count.
    pub tool_count: usize,
    /// WS fingerprint included in the registration payload.
    pub fingerprint: String,
    /// Explicit self URL override.
    pub self_url: Option<String>,
}

/// Manages this instance's lifecycle with the backend pool.
pub struct PoolClient {
    backend_url: String,
    api_key: String,
    instance_id: Mutex<String>,
    self_url: String,
    model: String,
    tool_count: usize,
    fingerprint: String,
    client: reqwest::Client,
}

impl PoolClient {
    /// Create a client. Without an explicit self URL, the address of the
    /// interface that actually reaches the backend is probed via UDP.
    pub fn new(cfg: PoolConfig) -> Self {
        let self_url = cfg.self_url.unwrap_or_else(|| {
            let ip = detect_local_ip_via(&cfg.backend_url);
            format!("http://{ip}:{}", cfg.port)
        });
        Self {
            backend_url: cfg.backend_url,
            api_key: cfg.api_key,
            instance_id: Mutex::new(String::new()),
            self_url,
            model: cfg.model,
            tool_count: cfg.tool_count,
            fingerprint: cfg.fingerprint,
            client: reqwest::Client::builder()
                .timeout(POOL_TIMEOUT)
                .build()
                .unwrap_or_default(),
        }
    }

    /// Request an instance id from the backend. Never fails: with no
    /// backend (or a failing one) a local id is synthesized.
    pub async fn bootstrap(&self, port: u16) -> String {
        if self.backend_url.is_empty() {
            let id = ids::synth_instance_id(port);
            self.set_instance_id(&id);
            return id;
        }

        let payload = json!({
            "action": "bootstrap",
            "ip": detect_local_ip_via(&self.backend_url),
            "hostname": ids::hostname(),
            "port": port,
        });
        match self.post_pool(&payload).await {
            Ok(data) => {
                if let Some(id) = data.get("instanceId").and_then(Value::as_str) {
                    if !id.is_empty() {
                        self.set_instance_id(id);
                        return id.to_string();
                    }
                }
                let id = ids::synth_instance_id(port);
                self.set_instance_id(&id);
                id
            }
            Err(e) => {
                warn!(backend = %self.backend_url, error = %e, "bootstrap failed");
                let id = ids::synth_instance_id(port);
                self.set_instance_id(&id);
                id
            }
        }
    }

    /// Register this instance with the pool (single attempt).
    pub async fn register(&self) -> Result<(), PoolError> {
        if self.backend_url.is_empty() {
            info!("no backend URL, skipping pool registration");
            return Ok(());
        }

        let payload = json!({
            "action": "register",
            "instanceId": self.instance_id(),
            "url": self.self_url,
            "model": self.model,
            "toolCount": self.tool_count,
            "wsFingerprint": self.fingerprint,
        });
        let data = self.post_pool(&payload).await?;
        if data.get("success").and_then(Value::as_bool) == Some(true) {
            info!(instance = %self.instance_id(), "registered to backend pool");
            Ok(())
        } else {
            Err(PoolError::Rejected(data.to_string()))
        }
    }

    /// Retry registration every 5 s until success or cancellation. The
    /// first attempt is eager.
    pub async fn register_with_retry(&self, cancel: &CancellationToken) {
        if self.backend_url.is_empty() {
            return;
        }
        match self.register().await {
            Ok(()) => return,
            Err(e) => warn!(error = %e, "registration failed, retrying every 5s"),
        }

        let mut ticker = tokio::time::interval(RETRY_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await; // skip the immediate first tick
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!("registration retry cancelled");
                    return;
                }
                _ = ticker.tick() => {
                    if self.register().await.is_ok() {
                        return;
                    }
                }
            }
        }
    }

    /// Remove this instance from the pool. Fire-and-forget with a short
    /// timeout; shutdown never waits on the backend.
    pub async fn unregister(&self) {
        let instance_id = self.instance_id();
        if self.backend_url.is_empty() || instance_id.is_empty() {
            return;
        }
        let payload = json!({
            "action": "unregister",
            "instanceId": instance_id,
        });
        let client = reqwest::Client::builder()
            .timeout(UNREGISTER_TIMEOUT)
            .build()
            .unwrap_or_default();
        let mut request = client
            .post(format!("{}/api/nanobot/pool", self.backend_url))
            .json(&payload);
        if !self.api_key.is_empty() {
            request = request.bearer_auth(&self.api_key);
        }
        if request.send().await.is_ok() {
            info!(instance = %instance_id, "unregistered from backend pool");
        }
    }

    /// Override the instance id (env-pinned or bootstrapped externally).
    pub fn set_instance_id(&self, id: &str) {
        *self.instance_id.lock() = id.to_string();
    }

    /// The current instance id.
    pub fn instance_id(&self) -> String {
        self.instance_id.lock().clone()
    }

    /// The advertised self URL.
    pub fn self_url(&self) -> &str {
        &self.self_url
    }

    async fn post_pool(&self, payload: &Value) -> Result<Value, PoolError> {
        let mut request = self
            .client
            .post(format!("{}/api/nanobot/pool", self.backend_url))
            .json(payload);
        if !self.api_key.is_empty() {
            request = request.bearer_auth(&self.api_key);
        }
        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(PoolError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(serde_json::from_str(&body).unwrap_or(Value::Null))
    }
}

/// Find the local IP that can reach the given URL by opening a UDP
/// socket towards it and reading the chosen local address. This selects
/// the interface that actually reaches the backend, not an arbitrary
/// default route.
pub fn detect_local_ip_via(target_url: &str) -> String {
    let mut target = "8.8.8.8:80".to_string();
    if !target_url.is_empty() {
        let mut host = target_url;
        if let Some((_, rest)) = host.split_once("://") {
            host = rest;
        }
        if let Some((head, _)) = host.split_once('/') {
            host = head;
        }
        if host.contains(':') {
            target = host.to_string();
        } else if !host.is_empty() {
            target = format!("{host}:80");
        }
    }

    let probe = || -> std::io::Result<String> {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        socket.connect(&target)?;
        Ok(socket.local_addr()?.ip().to_string())
    };
    probe().unwrap_or_else(|_| "127.0.0.1".to_string())
}
