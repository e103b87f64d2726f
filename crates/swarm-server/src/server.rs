//! The node's HTTP API server.
//!
//! | Path | Method | Auth |
//! |---|---|---|
//! | `/health` | GET | none |
//! | `/api/status` | GET | bearer |
//! | `/api/load` | GET | bearer |
//! | `/api/chat` | POST | bearer |
//! | `/api/agents` | GET | bearer |
//! | `/api/config` | GET | bearer |
//! | `/ws` | GET (upgrade) | fingerprint query |
//!
//! Responses are always JSON; errors use the shape `{"error": "<msg>"}`.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{any, get};
use axum::Router;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use swarm_config::ConfigHub;
use swarm_lane::{ChatRequest as LaneRequest, ChatResult, LaneManager, LaneManagerConfig, LaneMode};
use swarm_runtime::events::EventEngine;
use swarm_runtime::{AgentRegistry, LlmRouter};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::load::LoadStats;
use crate::routing::{build_route_info, resolve_route, strip_thinking};
use crate::ws::{self, WsHub};

/// Shared state accessible from every handler.
#[derive(Clone)]
pub struct AppState {
    /// This node's instance id.
    pub instance_id: String,
    /// HTTP API key; empty disables auth.
    pub api_key: String,
    /// WebSocket fingerprint; empty disables the gate.
    pub fingerprint: String,
    /// Agent registry.
    pub registry: Arc<AgentRegistry>,
    /// Dynamic config hub.
    pub config_hub: Arc<ConfigHub>,
    /// Session lane manager.
    pub lanes: LaneManager,
    /// Request load counters.
    pub load: Arc<LoadStats>,
    /// Control-channel connections.
    pub ws: Arc<WsHub>,
    /// Business event rule engine, when configured.
    pub events: Option<Arc<EventEngine>>,
    /// Server start time.
    pub started_at: Instant,
    /// Server-wide shutdown token.
    pub shutdown: CancellationToken,
}

/// Server construction parameters.
pub struct ServerConfig {
    /// Port to bind (0 auto-assigns).
    pub port: u16,
    /// HTTP API key; empty disables auth.
    pub api_key: String,
    /// Instance id advertised in health/status/heartbeats.
    pub instance_id: String,
    /// WebSocket fingerprint.
    pub fingerprint: String,
    /// Agent registry.
    pub registry: Arc<AgentRegistry>,
    /// Dynamic config hub.
    pub config_hub: Arc<ConfigHub>,
    /// Optional LLM semantic router.
    pub llm_router: Option<Arc<LlmRouter>>,
    /// `@name` → role id map for mention routing.
    pub mention_map: HashMap<String, String>,
    /// Business event rule engine, when configured.
    pub events: Option<Arc<EventEngine>>,
    /// Lane manager tuning.
    pub lane: LaneManagerConfig,
}

/// The cluster HTTP + WebSocket server.
pub struct ClusterServer {
    state: AppState,
    port: u16,
}

impl ClusterServer {
    /// Assemble the server: builds the lane manager whose handler routes
    /// each (possibly merged) request to an agent.
    pub fn new(cfg: ServerConfig) -> Self {
        let load = LoadStats::new();
        let shutdown = CancellationToken::new();

        let registry = cfg.registry.clone();
        let llm_router = cfg.llm_router.clone();
        let mention_map = Arc::new(cfg.mention_map);
        let handler_registry = registry.clone();
        let lanes = LaneManager::new(
            Arc::new(move |req: LaneRequest| {
                let registry = handler_registry.clone();
                let llm_router = llm_router.clone();
                let mention_map = mention_map.clone();
                Box::pin(async move {
                    let (role_id, method, llm_route) = resolve_route(
                        llm_router.as_deref(),
                        &mention_map,
                        &req.content,
                        &req.role_id,
                    )
                    .await;
                    let info =
                        build_route_info(&registry, &role_id, method, llm_route.as_ref());
                    match registry
                        .process_direct(
                            &req.content,
                            &req.session_key,
                            &req.channel,
                            &req.chat_id,
                            &role_id,
                        )
                        .await
                    {
                        Ok(content) => ChatResult {
                            content: strip_thinking(&content),
                            agent_id: role_id,
                            route: serde_json::to_value(&info).ok(),
                            ..ChatResult::default()
                        },
                        Err(e) => ChatResult {
                            agent_id: role_id,
                            error: Some(e.to_string()),
                            ..ChatResult::default()
                        },
                    }
                })
            }),
            cfg.lane,
        );

        let state = AppState {
            instance_id: cfg.instance_id,
            api_key: cfg.api_key,
            fingerprint: cfg.fingerprint,
            registry,
            config_hub: cfg.config_hub,
            lanes,
            load,
            ws: Arc::new(WsHub::new()),
            events: cfg.events,
            started_at: Instant::now(),
            shutdown,
        };
        Self {
            state,
            port: cfg.port,
        }
    }

    /// The shared state (for wiring and tests).
    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Set the pool re-registration trigger fired when the last control
    /// connection drops.
    pub fn set_reregister(&self, callback: ws::ReRegisterFn) {
        self.state.ws.set_reregister(callback);
    }

    /// Build the router with all routes and middleware.
    pub fn router(&self) -> Router {
        let state = self.state.clone();
        let protected = Router::new()
            .route("/api/status", get(handle_status))
            .route("/api/load", get(handle_load))
            .route("/api/chat", any(handle_chat))
            .route("/api/event", axum::routing::post(handle_event))
            .route("/api/agents", get(handle_agents))
            .route("/api/config", get(handle_config))
            .layer(axum::middleware::from_fn_with_state(
                state.clone(),
                crate::auth::require_bearer,
            ));

        Router::new()
            .route("/health", get(handle_health))
            .route("/ws", get(ws::ws_upgrade))
            .merge(protected)
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }

    /// Bind and serve. Starts the heartbeat broadcaster. Returns the
    /// bound address and the serve task handle.
    pub async fn listen(&self) -> Result<(SocketAddr, tokio::task::JoinHandle<()>), std::io::Error> {
        let listener = TcpListener::bind(("0.0.0.0", self.port)).await?;
        let addr = listener.local_addr()?;
        info!(%addr, "HTTP API listening");
        info!(ws = %format!("ws://{addr}/ws"), "control channel listening");

        ws::spawn_heartbeat(self.state.clone());

        let router = self.router();
        let shutdown = self.state.shutdown.clone();
        let state = self.state.clone();
        let handle = tokio::spawn(async move {
            let serve = axum::serve(listener, router).with_graceful_shutdown({
                let shutdown = shutdown.clone();
                async move {
                    shutdown.cancelled().await;
                }
            });
            let _ = serve.await;
            state.ws.close_all().await;
            info!("server stopped");
        });
        Ok((addr, handle))
    }

    /// Trigger graceful shutdown: stops lanes, cancels the serve loop
    /// and heartbeat, closes control connections.
    pub fn stop(&self) {
        self.state.lanes.stop();
        self.state.shutdown.cancel();
    }
}

/// JSON error body with the given status.
pub fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({"error": message.into()}))).into_response()
}

async fn handle_health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "instanceId": state.instance_id,
        "uptime": state.started_at.elapsed().as_secs(),
    }))
}

async fn handle_status(State(state): State<AppState>) -> Json<Value> {
    let load = state.load.snapshot();
    let cfg = state.config_hub.current();
    Json(json!({
        "instanceId": state.instance_id,
        "uptime": state.started_at.elapsed().as_secs(),
        "activeRequests": load.active_requests,
        "totalRequests": load.total_requests,
        "agents": state.registry.list_agents(),
        "agentCount": state.registry.len(),
        "lanes": state.lanes.stats(),
        "config": {
            "model": cfg.model,
            "provider": cfg.provider,
        },
    }))
}

async fn handle_load(State(state): State<AppState>) -> Json<Value> {
    Json(serde_json::to_value(state.load.snapshot()).unwrap_or_default())
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct ChatBody {
    content: String,
    session_key: String,
    channel: String,
    chat_id: String,
    person_id: String,
    role_id: String,
    mode: String,
    metadata: Map<String, Value>,
}

async fn handle_chat(State(state): State<AppState>, method: Method, body: Bytes) -> Response {
    if method != Method::POST {
        return error_response(StatusCode::METHOD_NOT_ALLOWED, "method not allowed");
    }
    let Ok(body) = serde_json::from_slice::<ChatBody>(&body) else {
        return error_response(StatusCode::BAD_REQUEST, "invalid JSON");
    };
    if body.content.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "content is required");
    }
    let session_key = if body.session_key.is_empty() {
        format!("{}:{}", body.channel, body.chat_id)
    } else {
        body.session_key
    };

    let guard = state.load.begin();
    let mode = LaneMode::parse(&body.mode);
    let submitted = state
        .lanes
        .submit(
            LaneRequest {
                content: body.content,
                session_key,
                channel: body.channel,
                chat_id: body.chat_id,
                person_id: body.person_id,
                role_id: body.role_id,
                metadata: body.metadata,
                timestamp: None,
            },
            mode,
        )
        .await;

    match submitted {
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        Ok(result) => {
            if let Some(error) = result.error {
                return error_response(StatusCode::INTERNAL_SERVER_ERROR, error);
            }
            Json(json!({
                "content": result.content,
                "agentId": result.agent_id,
                "requestsMerged": result.requests_merged,
                "latencyMs": guard.elapsed_ms(),
            }))
            .into_response()
        }
    }
}

async fn handle_event(State(state): State<AppState>, body: Bytes) -> Response {
    let Some(engine) = state.events.clone() else {
        return error_response(StatusCode::NOT_IMPLEMENTED, "event engine not configured");
    };
    let Ok(event) = serde_json::from_slice::<Map<String, Value>>(&body) else {
        return error_response(StatusCode::BAD_REQUEST, "invalid JSON");
    };
    let results = engine.ingest(&event).await;
    Json(json!({
        "matched": results.len(),
        "results": results,
    }))
    .into_response()
}

async fn handle_agents(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "agents": state.registry.list_agents(),
        "total": state.registry.len(),
    }))
}

async fn handle_config(State(state): State<AppState>) -> Json<Value> {
    Json(serde_json::to_value(state.config_hub.current()).unwrap_or_default())
}
