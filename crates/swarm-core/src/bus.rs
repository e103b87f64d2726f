//! In-process message bus decoupling ingress adapters from the agent core.
//!
//! Bounded in/out queues plus per-channel subscriber fan-out. Publishing
//! blocks when a queue is full, so producers (including subagents announcing
//! results) back-pressure instead of dropping messages.

use std::collections::HashMap;

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::messages::{InboundMessage, OutboundMessage};

/// Queue depth for both directions.
const QUEUE_CAPACITY: usize = 100;

/// Callback invoked for each outbound message on a subscribed channel.
pub type OutboundSubscriber = Box<dyn Fn(OutboundMessage) + Send + Sync>;

/// Async message routing between channel adapters and the agent core.
pub struct MessageBus {
    inbound_tx: mpsc::Sender<InboundMessage>,
    inbound_rx: Mutex<Option<mpsc::Receiver<InboundMessage>>>,
    outbound_tx: mpsc::Sender<OutboundMessage>,
    outbound_rx: Mutex<Option<mpsc::Receiver<OutboundMessage>>>,
    subscribers: RwLock<HashMap<String, Vec<OutboundSubscriber>>>,
}

impl MessageBus {
    /// Create a bus with bounded queues in both directions.
    pub fn new() -> Self {
        let (inbound_tx, inbound_rx) = mpsc::channel(QUEUE_CAPACITY);
        let (outbound_tx, outbound_rx) = mpsc::channel(QUEUE_CAPACITY);
        Self {
            inbound_tx,
            inbound_rx: Mutex::new(Some(inbound_rx)),
            outbound_tx,
            outbound_rx: Mutex::new(Some(outbound_rx)),
            subscribers: RwLock::new(HashMap::new()),
        }
    }

    /// Publish a message from an ingress adapter to the agent core.
    /// Blocks while the inbound queue is full.
    pub async fn publish_inbound(&self, msg: InboundMessage) {
        let _ = self.inbound_tx.send(msg).await;
    }

    /// Publish a reply from the agent core towards channel adapters.
    pub async fn publish_outbound(&self, msg: OutboundMessage) {
        let _ = self.outbound_tx.send(msg).await;
    }

    /// A sender handle for the outbound queue (used by tools).
    pub fn outbound_sender(&self) -> mpsc::Sender<OutboundMessage> {
        self.outbound_tx.clone()
    }

    /// Take the inbound receiver. The consumer loop owns it; subsequent
    /// calls return `None`.
    pub fn take_inbound(&self) -> Option<mpsc::Receiver<InboundMessage>> {
        self.inbound_rx.lock().take()
    }

    /// Register a callback for outbound messages on a channel.
    pub fn subscribe(&self, channel: impl Into<String>, callback: OutboundSubscriber) {
        self.subscribers
            .write()
            .entry(channel.into())
            .or_default()
            .push(callback);
    }

    /// Run the outbound dispatch loop until `cancel` fires. Each message is
    /// fanned out to every subscriber of its channel.
    pub async fn dispatch_outbound(&self, cancel: CancellationToken) {
        let Some(mut rx) = self.outbound_rx.lock().take() else {
            return;
        };
        loop {
            tokio::select! {
                () = cancel.cancelled() => return,
                msg = rx.recv() => {
                    let Some(msg) = msg else { return };
                    let subs = self.subscribers.read();
                    match subs.get(&msg.channel) {
                        Some(list) => {
                            for cb in list {
                                cb(msg.clone());
                            }
                        }
                        None => debug!(channel = %msg.channel, "outbound message with no subscriber"),
                    }
                }
            }
        }
    }

    /// Number of messages waiting in the inbound queue.
    pub fn inbound_pending(&self) -> usize {
        QUEUE_CAPACITY - self.inbound_tx.capacity()
    }

    /// Number of messages waiting in the outbound queue.
    pub fn outbound_pending(&self) -> usize {
        QUEUE_CAPACITY - self.outbound_tx.capacity()
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn inbound_publish_and_receive() {
        let bus = MessageBus::new();
        bus.publish_inbound(InboundMessage::new("cli", "u", "d", "hi"))
            .await;
        let mut rx = bus.take_inbound().unwrap();
        let msg = rx.recv().await.unwrap();
        assert_eq!(msg.content, "hi");
    }

    #[tokio::test]
    async fn take_inbound_is_single_use() {
        let bus = MessageBus::new();
        assert!(bus.take_inbound().is_some());
        assert!(bus.take_inbound().is_none());
    }

    #[tokio::test]
    async fn pending_counts_track_queue_depth() {
        let bus = MessageBus::new();
        assert_eq!(bus.inbound_pending(), 0);
        bus.publish_inbound(InboundMessage::new("cli", "u", "d", "one"))
            .await;
        bus.publish_inbound(InboundMessage::new("cli", "u", "d", "two"))
            .await;
        assert_eq!(bus.inbound_pending(), 2);
        assert_eq!(bus.outbound_pending(), 0);
    }

    #[tokio::test]
    async fn dispatch_fans_out_to_channel_subscribers() {
        let bus = Arc::new(MessageBus::new());
        let hits = Arc::new(AtomicUsize::new(0));

        let h1 = hits.clone();
        bus.subscribe(
            "telegram",
            Box::new(move |msg| {
                assert_eq!(msg.content, "reply");
                h1.fetch_add(1, Ordering::SeqCst);
            }),
        );
        let h2 = hits.clone();
        bus.subscribe("telegram", Box::new(move |_| {
            h2.fetch_add(1, Ordering::SeqCst);
        }));
        // Different channel: must not fire.
        bus.subscribe("slack", Box::new(|_| panic!("wrong channel")));

        let cancel = CancellationToken::new();
        let dispatch_bus = bus.clone();
        let dispatch_cancel = cancel.clone();
        let task = tokio::spawn(async move {
            dispatch_bus.dispatch_outbound(dispatch_cancel).await;
        });

        bus.publish_outbound(OutboundMessage::new("telegram", "42", "reply"))
            .await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 2);

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn dispatch_exits_on_cancel() {
        let bus = Arc::new(MessageBus::new());
        let cancel = CancellationToken::new();
        cancel.cancel();
        // Already-cancelled token: returns promptly.
        tokio::time::timeout(Duration::from_secs(1), bus.dispatch_outbound(cancel))
            .await
            .expect("dispatch did not exit");
    }
}
