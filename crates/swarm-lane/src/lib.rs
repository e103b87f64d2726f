//! # swarm-lane
//!
//! Per-session concurrency control for chat requests. Concurrent messages
//! from the same conversation (rapid-fire IM messages) are serialized
//! through a per-session "lane": a bounded queue with exactly one worker
//! task. Three scheduling modes are supported:
//!
//! - [`LaneMode::Followup`]: strict FIFO, one handler call per request.
//! - [`LaneMode::Collect`]: open a short window, merge rapid-fire messages
//!   into one handler call; every merged caller gets the same result.
//! - [`LaneMode::Interrupt`]: discard queued requests, process only the
//!   latest.
//!
//! Lanes are created on first use, self-reap after five idle minutes, and
//! are evicted oldest-idle-first under capacity pressure.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Queue depth per lane.
const LANE_QUEUE_CAPACITY: usize = 100;

/// Error result delivered to requests displaced in interrupt mode.
const INTERRUPTED: &str = "interrupted by newer message";

/// Attempts to re-enqueue when racing a self-reaping worker.
const SUBMIT_ATTEMPTS: usize = 3;

/// Lane scheduling strategy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LaneMode {
    /// Process each message sequentially.
    Followup,
    /// Wait a window and merge rapid-fire messages.
    Collect,
    /// Discard old, process only the latest.
    Interrupt,
}

impl LaneMode {
    /// Parse a wire-format mode string. Unknown or empty input is `None`.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "followup" => Some(Self::Followup),
            "collect" => Some(Self::Collect),
            "interrupt" => Some(Self::Interrupt),
            _ => None,
        }
    }

    /// Human-readable description.
    pub fn describe(&self) -> &'static str {
        match self {
            Self::Followup => "Process each message sequentially",
            Self::Collect => "Wait and merge rapid-fire messages",
            Self::Interrupt => "Discard old, process only latest",
        }
    }

    /// The wire-format name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Followup => "followup",
            Self::Collect => "collect",
            Self::Interrupt => "interrupt",
        }
    }
}

/// A pending chat request.
#[derive(Clone, Debug, Default)]
pub struct ChatRequest {
    /// Message text.
    pub content: String,
    /// Lane identity: `"<channel>:<chatId>"`.
    pub session_key: String,
    /// Source channel.
    pub channel: String,
    /// Conversation id within the channel.
    pub chat_id: String,
    /// Stable person identity, when the ingress knows it.
    pub person_id: String,
    /// Requested role; empty routes to the default.
    pub role_id: String,
    /// Ingress metadata, passed through to the handler.
    pub metadata: Map<String, Value>,
    /// Arrival time, stamped on submit when absent.
    pub timestamp: Option<DateTime<Utc>>,
}

/// The processing result delivered to every waiting caller.
#[derive(Clone, Debug, Default)]
pub struct ChatResult {
    /// Assistant reply text.
    pub content: String,
    /// The agent that produced the reply.
    pub agent_id: String,
    /// Handler error, verbatim.
    pub error: Option<String>,
    /// How many requests were coalesced into this result.
    pub requests_merged: usize,
    /// Routing decision metadata, when the handler produced one.
    pub route: Option<Value>,
}

impl ChatResult {
    fn interrupted() -> Self {
        Self {
            error: Some(INTERRUPTED.into()),
            ..Self::default()
        }
    }
}

/// The handler invoked once per (possibly merged) request. Never retried
/// by the lane; its error is returned to every merged caller verbatim.
pub type ChatHandler = Arc<dyn Fn(ChatRequest) -> BoxFuture<'static, ChatResult> + Send + Sync>;

/// Errors surfaced to submitters.
#[derive(Debug, thiserror::Error)]
pub enum LaneError {
    /// The manager is shutting down.
    #[error("lane manager shutting down")]
    Shutdown,
    /// The lane worker went away before delivering a result.
    #[error("lane closed before a result was delivered")]
    Closed,
}

/// Lane manager configuration.
#[derive(Clone, Debug)]
pub struct LaneManagerConfig {
    /// Mode used when a request does not select one.
    pub default_mode: LaneMode,
    /// Collect-mode merge window.
    pub collect_window: Duration,
    /// Maximum concurrent lanes before eviction kicks in.
    pub max_lanes: usize,
    /// How often the sweeper reaps stale lane entries.
    pub sweep_interval: Duration,
    /// Worker self-exit after this much inactivity.
    pub idle_timeout: Duration,
    /// A lane counts as stale for sweeping/eviction after this much
    /// idle time.
    pub stale_after: Duration,
}

impl Default for LaneManagerConfig {
    fn default() -> Self {
        Self {
            default_mode: LaneMode::Collect,
            collect_window: Duration::from_secs(2),
            max_lanes: 1000,
            sweep_interval: Duration::from_secs(600),
            idle_timeout: Duration::from_secs(300),
            stale_after: Duration::from_secs(600),
        }
    }
}

struct LaneState {
    idle: AtomicBool,
    last_active: Mutex<Instant>,
}

impl LaneState {
    fn new() -> Self {
        Self {
            idle: AtomicBool::new(true),
            last_active: Mutex::new(Instant::now()),
        }
    }

    fn touch(&self, idle: bool) {
        self.idle.store(idle, Ordering::SeqCst);
        *self.last_active.lock() = Instant::now();
    }

    fn is_idle(&self) -> bool {
        self.idle.load(Ordering::SeqCst)
    }

    fn idle_for(&self) -> Duration {
        self.last_active.lock().elapsed()
    }
}

struct Lane {
    tx: mpsc::Sender<LaneItem>,
    state: Arc<LaneState>,
}

struct LaneItem {
    request: ChatRequest,
    done: oneshot::Sender<ChatResult>,
}

struct Inner {
    lanes: Mutex<HashMap<String, Lane>>,
    handler: ChatHandler,
    cfg: LaneManagerConfig,
    shutdown: CancellationToken,
}

/// Manages lanes for all sessions. Cheap to clone via internal `Arc`.
#[derive(Clone)]
pub struct LaneManager {
    inner: Arc<Inner>,
}

impl LaneManager {
    /// Create a manager and start its periodic sweeper.
    pub fn new(handler: ChatHandler, cfg: LaneManagerConfig) -> Self {
        let inner = Arc::new(Inner {
            lanes: Mutex::new(HashMap::new()),
            handler,
            cfg,
            shutdown: CancellationToken::new(),
        });

        let sweeper = inner.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(sweeper.cfg.sweep_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await; // first tick fires immediately; skip it
            loop {
                tokio::select! {
                    () = sweeper.shutdown.cancelled() => return,
                    _ = ticker.tick() => {
                        let removed = sweeper.sweep_stale();
                        if removed > 0 {
                            debug!(removed, "swept stale lanes");
                        }
                    }
                }
            }
        });

        Self { inner }
    }

    /// Send a request to its session's lane and wait for the result.
    ///
    /// Blocks until the worker delivers a result or the manager shuts
    /// down. Dropping the returned future abandons the wait; the worker
    /// may still run the handler but the result is discarded.
    pub async fn submit(
        &self,
        mut req: ChatRequest,
        mode: Option<LaneMode>,
    ) -> Result<ChatResult, LaneError> {
        let mode = mode.unwrap_or(self.inner.cfg.default_mode);
        if req.timestamp.is_none() {
            req.timestamp = Some(Utc::now());
        }
        if self.inner.shutdown.is_cancelled() {
            return Err(LaneError::Shutdown);
        }

        for _ in 0..SUBMIT_ATTEMPTS {
            let tx = self.inner.lane_sender(&req.session_key, mode);
            let (done_tx, done_rx) = oneshot::channel();
            let item = LaneItem {
                request: req.clone(),
                done: done_tx,
            };

            let sent = tokio::select! {
                () = self.inner.shutdown.cancelled() => return Err(LaneError::Shutdown),
                sent = tx.send(item) => sent.is_ok(),
            };
            if !sent {
                // Raced a self-reaping worker; its entry is gone (or about
                // to be). Re-create the lane and try again.
                self.inner.forget_closed(&req.session_key);
                continue;
            }

            return tokio::select! {
                () = self.inner.shutdown.cancelled() => Err(LaneError::Shutdown),
                result = done_rx => result.map_err(|_| LaneError::Closed),
            };
        }
        Err(LaneError::Closed)
    }

    /// Number of lanes currently processing a request.
    pub fn active_count(&self) -> usize {
        self.inner
            .lanes
            .lock()
            .values()
            .filter(|l| !l.state.is_idle())
            .count()
    }

    /// Number of lanes in the map.
    pub fn lane_count(&self) -> usize {
        self.inner.lanes.lock().len()
    }

    /// Manager statistics for `/api/status`.
    pub fn stats(&self) -> Value {
        let lanes = self.inner.lanes.lock();
        let active = lanes.values().filter(|l| !l.state.is_idle()).count();
        serde_json::json!({
            "totalLanes": lanes.len(),
            "activeLanes": active,
            "defaultMode": self.inner.cfg.default_mode.as_str(),
        })
    }

    /// Stop the manager: cancels pending submissions and all workers.
    pub fn stop(&self) {
        self.inner.shutdown.cancel();
    }
}

impl Inner {
    /// Get the sender for a session's lane, creating lane + worker on
    /// first use.
    fn lane_sender(self: &Arc<Self>, session_key: &str, mode: LaneMode) -> mpsc::Sender<LaneItem> {
        let mut lanes = self.lanes.lock();
        if let Some(lane) = lanes.get(session_key) {
            return lane.tx.clone();
        }

        if lanes.len() >= self.cfg.max_lanes {
            let evicted = Self::evict_idle(&mut lanes, self.cfg.stale_after);
            if lanes.len() >= self.cfg.max_lanes {
                warn!(
                    lanes = lanes.len(),
                    max = self.cfg.max_lanes,
                    evicted,
                    "lane capacity exceeded with no idle lane to evict"
                );
            }
        }

        let (tx, rx) = mpsc::channel(LANE_QUEUE_CAPACITY);
        let state = Arc::new(LaneState::new());
        lanes.insert(
            session_key.to_string(),
            Lane {
                tx: tx.clone(),
                state: state.clone(),
            },
        );
        debug!(session = session_key, mode = mode.as_str(), "lane created");

        let inner = self.clone();
        let key = session_key.to_string();
        tokio::spawn(async move {
            run_worker(inner, key, mode, rx, state).await;
        });
        tx
    }

    /// Evict stale idle lanes; if none qualified, evict the single
    /// oldest idle lane. Returns how many entries were removed.
    fn evict_idle(lanes: &mut HashMap<String, Lane>, stale_after: Duration) -> usize {
        let before = lanes.len();
        lanes.retain(|_, lane| !(lane.state.is_idle() && lane.state.idle_for() >= stale_after));
        let mut removed = before - lanes.len();

        if removed == 0 {
            let oldest = lanes
                .iter()
                .filter(|(_, l)| l.state.is_idle())
                .max_by_key(|(_, l)| l.state.idle_for())
                .map(|(k, _)| k.clone());
            if let Some(key) = oldest {
                lanes.remove(&key);
                removed = 1;
            }
        }
        removed
    }

    /// Remove a lane entry whose worker has closed its queue.
    fn forget_closed(&self, session_key: &str) {
        let mut lanes = self.lanes.lock();
        if let Some(lane) = lanes.get(session_key) {
            if lane.tx.is_closed() {
                lanes.remove(session_key);
            }
        }
    }

    /// Remove a specific worker's entry (idle self-reap). The state
    /// pointer guards against removing a newer lane under the same key.
    fn remove_worker(&self, session_key: &str, state: &Arc<LaneState>) {
        let mut lanes = self.lanes.lock();
        if let Some(lane) = lanes.get(session_key) {
            if Arc::ptr_eq(&lane.state, state) {
                lanes.remove(session_key);
            }
        }
    }

    /// Drop lane entries that have been idle past the stale threshold.
    fn sweep_stale(&self) -> usize {
        let mut lanes = self.lanes.lock();
        let before = lanes.len();
        lanes.retain(|_, lane| {
            !(lane.state.is_idle() && lane.state.idle_for() >= self.cfg.stale_after)
        });
        before - lanes.len()
    }
}

/// The per-lane worker loop: the lane's serialization point. Exactly one
/// handler invocation is in flight per lane at any instant.
async fn run_worker(
    inner: Arc<Inner>,
    session_key: String,
    mode: LaneMode,
    mut rx: mpsc::Receiver<LaneItem>,
    state: Arc<LaneState>,
) {
    loop {
        let item = tokio::select! {
            () = inner.shutdown.cancelled() => return,
            recv = tokio::time::timeout(inner.cfg.idle_timeout, rx.recv()) => match recv {
                Err(_) => {
                    debug!(session = %session_key, "idle lane worker exiting");
                    inner.remove_worker(&session_key, &state);
                    return;
                }
                Ok(None) => return,
                Ok(Some(item)) => item,
            },
        };

        state.touch(false);
        match mode {
            LaneMode::Followup => process_followup(&inner, item).await,
            LaneMode::Collect => process_collect(&inner, &session_key, &mut rx, item).await,
            LaneMode::Interrupt => process_interrupt(&inner, &mut rx, item).await,
        }
        state.touch(true);
    }
}

async fn process_followup(inner: &Inner, item: LaneItem) {
    let mut result = (inner.handler)(item.request).await;
    result.requests_merged = result.requests_merged.max(1);
    let _ = item.done.send(result);
}

async fn process_collect(
    inner: &Inner,
    session_key: &str,
    rx: &mut mpsc::Receiver<LaneItem>,
    item: LaneItem,
) {
    let window = tokio::time::sleep(inner.cfg.collect_window);
    tokio::pin!(window);

    let mut contents = vec![item.request.content.clone()];
    let mut extras: Vec<LaneItem> = Vec::new();

    loop {
        tokio::select! {
            () = &mut window => break,
            extra = rx.recv() => match extra {
                Some(extra) => {
                    contents.push(extra.request.content.clone());
                    extras.push(extra);
                }
                None => break,
            },
        }
    }

    let merged_count = contents.len();
    let mut merged_req = item.request;
    merged_req.content = contents.join("\n");

    let mut result = (inner.handler)(merged_req).await;
    result.requests_merged = merged_count;

    if merged_count > 1 {
        info!(session = session_key, merged = merged_count, "collect merged messages");
    }

    for extra in extras {
        let _ = extra.done.send(result.clone());
    }
    let _ = item.done.send(result);
}

async fn process_interrupt(inner: &Inner, rx: &mut mpsc::Receiver<LaneItem>, item: LaneItem) {
    let mut survivor = item;
    while let Ok(newer) = rx.try_recv() {
        let _ = survivor.done.send(ChatResult::interrupted());
        survivor = newer;
    }
    let mut result = (inner.handler)(survivor.request).await;
    result.requests_merged = result.requests_merged.max(1);
    let _ = survivor.done.send(result);
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    fn echo_handler() -> ChatHandler {
        Arc::new(|req: ChatRequest| {
            Box::pin(async move {
                ChatResult {
                    content: format!("echo: {}", req.content),
                    agent_id: "general".into(),
                    ..ChatResult::default()
                }
            })
        })
    }

    fn quick_cfg(mode: LaneMode) -> LaneManagerConfig {
        LaneManagerConfig {
            default_mode: mode,
            collect_window: Duration::from_millis(200),
            ..LaneManagerConfig::default()
        }
    }

    fn req(key: &str, content: &str) -> ChatRequest {
        ChatRequest {
            content: content.into(),
            session_key: key.into(),
            ..ChatRequest::default()
        }
    }

    #[tokio::test]
    async fn followup_processes_each_request() {
        let mgr = LaneManager::new(echo_handler(), quick_cfg(LaneMode::Followup));
        let r1 = mgr.submit(req("s:1", "a"), None).await.unwrap();
        let r2 = mgr.submit(req("s:1", "b"), None).await.unwrap();
        assert_eq!(r1.content, "echo: a");
        assert_eq!(r2.content, "echo: b");
        assert_eq!(r1.requests_merged, 1);
        mgr.stop();
    }

    #[tokio::test]
    async fn collect_merges_rapid_fire_messages() {
        // Slow first handler call is unnecessary: the window itself holds
        // the lane open while the extra submissions arrive.
        let mgr = LaneManager::new(echo_handler(), quick_cfg(LaneMode::Collect));

        let m = mgr.clone();
        let h1 = tokio::spawn(async move { m.submit(req("s:1", "A"), None).await });
        tokio::time::sleep(Duration::from_millis(30)).await;
        let m = mgr.clone();
        let h2 = tokio::spawn(async move { m.submit(req("s:1", "B"), None).await });
        tokio::time::sleep(Duration::from_millis(30)).await;
        let m = mgr.clone();
        let h3 = tokio::spawn(async move { m.submit(req("s:1", "C"), None).await });

        let r1 = h1.await.unwrap().unwrap();
        let r2 = h2.await.unwrap().unwrap();
        let r3 = h3.await.unwrap().unwrap();

        assert_eq!(r1.content, "echo: A\nB\nC");
        assert_eq!(r1.requests_merged, 3);
        assert_eq!(r2.content, r1.content);
        assert_eq!(r3.content, r1.content);
        mgr.stop();
    }

    #[tokio::test]
    async fn collect_single_message_merges_one() {
        let mgr = LaneManager::new(echo_handler(), quick_cfg(LaneMode::Collect));
        let r = mgr.submit(req("s:1", "solo"), None).await.unwrap();
        assert_eq!(r.requests_merged, 1);
        assert_eq!(r.content, "echo: solo");
        mgr.stop();
    }

    #[tokio::test]
    async fn interrupt_discards_queued_requests() {
        // Handler slow enough that later submissions pile up in the queue.
        let handler: ChatHandler = Arc::new(|req: ChatRequest| {
            Box::pin(async move {
                tokio::time::sleep(Duration::from_millis(150)).await;
                ChatResult {
                    content: format!("done: {}", req.content),
                    ..ChatResult::default()
                }
            })
        });
        let mgr = LaneManager::new(handler, quick_cfg(LaneMode::Interrupt));

        let m = mgr.clone();
        let h1 = tokio::spawn(async move { m.submit(req("s:1", "first"), None).await });
        tokio::time::sleep(Duration::from_millis(30)).await;
        // These two queue up while "first" is processing.
        let m = mgr.clone();
        let h2 = tokio::spawn(async move { m.submit(req("s:1", "second"), None).await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        let m = mgr.clone();
        let h3 = tokio::spawn(async move { m.submit(req("s:1", "third"), None).await });

        let r1 = h1.await.unwrap().unwrap();
        let r2 = h2.await.unwrap().unwrap();
        let r3 = h3.await.unwrap().unwrap();

        assert_eq!(r1.content, "done: first");
        // "second" was displaced by "third".
        assert_eq!(r2.error.as_deref(), Some(INTERRUPTED));
        assert_eq!(r3.content, "done: third");
        mgr.stop();
    }

    #[tokio::test]
    async fn interrupt_with_empty_queue_just_processes() {
        let mgr = LaneManager::new(echo_handler(), quick_cfg(LaneMode::Interrupt));
        let r = mgr.submit(req("s:1", "only"), None).await.unwrap();
        assert!(r.error.is_none());
        assert_eq!(r.content, "echo: only");
        mgr.stop();
    }

    #[tokio::test]
    async fn one_handler_in_flight_per_lane() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (fly, pk) = (in_flight.clone(), peak.clone());
        let handler: ChatHandler = Arc::new(move |_req: ChatRequest| {
            let (fly, pk) = (fly.clone(), pk.clone());
            Box::pin(async move {
                let now = fly.fetch_add(1, Ordering::SeqCst) + 1;
                pk.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                fly.fetch_sub(1, Ordering::SeqCst);
                ChatResult::default()
            })
        });
        let mgr = LaneManager::new(handler, quick_cfg(LaneMode::Followup));

        let mut handles = Vec::new();
        for i in 0..8 {
            let m = mgr.clone();
            handles.push(tokio::spawn(async move {
                m.submit(req("s:1", &format!("m{i}")), None).await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }
        assert_eq!(peak.load(Ordering::SeqCst), 1);
        mgr.stop();
    }

    #[tokio::test]
    async fn sessions_get_independent_lanes() {
        let mgr = LaneManager::new(echo_handler(), quick_cfg(LaneMode::Followup));
        mgr.submit(req("a:1", "x"), None).await.unwrap();
        mgr.submit(req("b:2", "y"), None).await.unwrap();
        assert_eq!(mgr.lane_count(), 2);
        mgr.stop();
    }

    #[tokio::test]
    async fn idle_worker_reaps_its_lane() {
        let cfg = LaneManagerConfig {
            default_mode: LaneMode::Followup,
            idle_timeout: Duration::from_millis(50),
            ..LaneManagerConfig::default()
        };
        let mgr = LaneManager::new(echo_handler(), cfg);
        mgr.submit(req("s:1", "x"), None).await.unwrap();
        assert_eq!(mgr.lane_count(), 1);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(mgr.lane_count(), 0);
        // A fresh submit after reaping creates a new lane transparently.
        let r = mgr.submit(req("s:1", "again"), None).await.unwrap();
        assert_eq!(r.content, "echo: again");
        mgr.stop();
    }

    #[tokio::test]
    async fn capacity_evicts_oldest_idle_lane() {
        let cfg = LaneManagerConfig {
            default_mode: LaneMode::Followup,
            max_lanes: 2,
            ..LaneManagerConfig::default()
        };
        let mgr = LaneManager::new(echo_handler(), cfg);
        mgr.submit(req("a:1", "x"), None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        mgr.submit(req("b:1", "y"), None).await.unwrap();
        mgr.submit(req("c:1", "z"), None).await.unwrap();
        assert!(mgr.lane_count() <= 2);
        mgr.stop();
    }

    #[tokio::test]
    async fn stop_fails_pending_submissions() {
        let handler: ChatHandler = Arc::new(|_req: ChatRequest| {
            Box::pin(async move {
                tokio::time::sleep(Duration::from_secs(30)).await;
                ChatResult::default()
            })
        });
        let mgr = LaneManager::new(handler, quick_cfg(LaneMode::Followup));
        let m = mgr.clone();
        let pending = tokio::spawn(async move { m.submit(req("s:1", "x"), None).await });
        tokio::time::sleep(Duration::from_millis(30)).await;
        mgr.stop();
        let result = pending.await.unwrap();
        assert!(matches!(result, Err(LaneError::Shutdown)));
        // Submissions after stop fail immediately.
        assert!(matches!(
            mgr.submit(req("s:1", "y"), None).await,
            Err(LaneError::Shutdown)
        ));
    }

    #[tokio::test]
    async fn handler_error_is_returned_verbatim() {
        let handler: ChatHandler = Arc::new(|_req: ChatRequest| {
            Box::pin(async move {
                ChatResult {
                    error: Some("model exploded".into()),
                    ..ChatResult::default()
                }
            })
        });
        let mgr = LaneManager::new(handler, quick_cfg(LaneMode::Followup));
        let r = mgr.submit(req("s:1", "x"), None).await.unwrap();
        assert_eq!(r.error.as_deref(), Some("model exploded"));
        mgr.stop();
    }

    #[tokio::test]
    async fn stats_shape() {
        let mgr = LaneManager::new(echo_handler(), quick_cfg(LaneMode::Collect));
        mgr.submit(req("s:1", "x"), None).await.unwrap();
        let stats = mgr.stats();
        assert_eq!(stats["totalLanes"], 1);
        assert_eq!(stats["defaultMode"], "collect");
        assert_eq!(mgr.active_count(), 0);
        mgr.stop();
    }

    #[test]
    fn mode_parse_roundtrip() {
        for mode in [LaneMode::Followup, LaneMode::Collect, LaneMode::Interrupt] {
            assert_eq!(LaneMode::parse(mode.as_str()), Some(mode));
        }
        assert_eq!(LaneMode::parse(""), None);
        assert_eq!(LaneMode::parse("bogus"), None);
    }

    #[test]
    fn mode_describe() {
        assert!(LaneMode::Collect.describe().contains("merge"));
    }
}
