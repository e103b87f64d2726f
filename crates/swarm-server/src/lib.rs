//! # swarm-server
//!
//! The cluster-facing surface of a node: the HTTP API, the
//! fingerprint-gated WebSocket control channel with heartbeat telemetry,
//! the request-routing layer (explicit → mention → keyword → LLM →
//! default), load accounting, and the backend pool client
//! (bootstrap / register / heartbeat / unregister).

pub mod auth;
pub mod load;
pub mod pool;
pub mod routing;
pub mod server;
pub mod ws;

pub use load::{LoadSnapshot, LoadStats};
pub use pool::{PoolClient, PoolConfig};
pub use routing::RouteInfo;
pub use server::{AppState, ClusterServer, ServerConfig};
