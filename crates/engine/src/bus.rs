// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-process pub/sub over the durable ledger.
//!
//! `publish` appends to the ledger first (durability before delivery),
//! then hands the stored message to a single dispatcher task that invokes
//! subscribers one at a time, in ledger sequence order. A failing handler
//! is logged and never rolls back the append or starves other subscribers.

use parking_lot::Mutex;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use zs_core::{topic_matches, Clock, ClusterId, Message, SystemClock};
use zs_storage::{Ledger, MessageQuery, StorageError};

/// Future returned by a subscriber handler.
pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<(), String>> + Send>>;

/// A subscriber callback. Must not block; offload heavy work to tasks.
pub type MessageHandler = Arc<dyn Fn(Message) -> HandlerFuture + Send + Sync>;

struct Subscriber {
    id: u64,
    /// Topic pattern filter; None receives everything.
    topic: Option<String>,
    handler: MessageHandler,
}

struct BusInner {
    cluster_id: ClusterId,
    ledger: Arc<Mutex<Ledger>>,
    subscribers: Mutex<Vec<Subscriber>>,
    next_subscriber_id: AtomicU64,
    dispatch_tx: mpsc::UnboundedSender<Message>,
    /// Serializes append + enqueue so dispatch order equals ledger order.
    publish_gate: tokio::sync::Mutex<()>,
}

/// Cluster-scoped message bus.
#[derive(Clone)]
pub struct MessageBus {
    inner: Arc<BusInner>,
}

/// Handle returned by subscribe; dropping it does NOT unsubscribe.
pub struct SubscriptionHandle {
    id: u64,
    inner: std::sync::Weak<BusInner>,
}

impl SubscriptionHandle {
    /// Remove the subscriber. Idempotent.
    pub fn unsubscribe(&self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.subscribers.lock().retain(|s| s.id != self.id);
        }
    }
}

impl MessageBus {
    /// Wrap a ledger in a bus and start the dispatcher task.
    pub fn new(cluster_id: ClusterId, ledger: Arc<Mutex<Ledger>>) -> Self {
        let (dispatch_tx, mut dispatch_rx) = mpsc::unbounded_channel::<Message>();
        let inner = Arc::new(BusInner {
            cluster_id,
            ledger,
            subscribers: Mutex::new(Vec::new()),
            next_subscriber_id: AtomicU64::new(1),
            dispatch_tx,
            publish_gate: tokio::sync::Mutex::new(()),
        });

        let dispatch_inner = Arc::downgrade(&inner);
        tokio::spawn(async move {
            while let Some(message) = dispatch_rx.recv().await {
                let Some(inner) = dispatch_inner.upgrade() else {
                    return;
                };
                // Snapshot so handlers can subscribe/unsubscribe freely
                let subscribers: Vec<(u64, Option<String>, MessageHandler)> = inner
                    .subscribers
                    .lock()
                    .iter()
                    .map(|s| (s.id, s.topic.clone(), Arc::clone(&s.handler)))
                    .collect();
                drop(inner);

                for (id, topic, handler) in subscribers {
                    if let Some(pattern) = &topic {
                        if !topic_matches(pattern, &message.topic) {
                            continue;
                        }
                    }
                    if let Err(e) = handler(message.clone()).await {
                        warn!(
                            subscriber = id,
                            topic = %message.topic,
                            error = %e,
                            "bus handler failed"
                        );
                    }
                }
            }
        });

        Self { inner }
    }

    pub fn cluster_id(&self) -> &ClusterId {
        &self.inner.cluster_id
    }

    /// Shared ledger handle, for read-scoped collaborators.
    pub fn ledger(&self) -> Arc<Mutex<Ledger>> {
        Arc::clone(&self.inner.ledger)
    }

    /// Publish a message: assign identity, append durably, then dispatch.
    ///
    /// Returns the stored message with its assigned sequence. A storage
    /// failure fails the publish; nothing is delivered.
    pub async fn publish(&self, mut message: Message) -> Result<Message, StorageError> {
        let _gate = self.inner.publish_gate.lock().await;

        message.id = uuid::Uuid::new_v4().to_string();
        message.cluster_id = self.inner.cluster_id.clone();
        message.timestamp = SystemClock.epoch_ms();

        let ledger = Arc::clone(&self.inner.ledger);
        let stored = tokio::task::spawn_blocking(move || ledger.lock().append(message))
            .await
            .map_err(|e| StorageError::Io(std::io::Error::other(e.to_string())))??;

        debug!(
            topic = %stored.topic,
            seq = stored.sequence,
            sender = %stored.sender,
            "message published"
        );
        let _ = self.inner.dispatch_tx.send(stored.clone());
        Ok(stored)
    }

    /// Deliver every published message to `handler`, in order.
    pub fn subscribe(&self, handler: MessageHandler) -> SubscriptionHandle {
        self.subscribe_filtered(None, handler)
    }

    /// Deliver messages whose topic matches `pattern` (exact, `*`, or
    /// `PREFIX_*`).
    pub fn subscribe_topic(
        &self,
        pattern: impl Into<String>,
        handler: MessageHandler,
    ) -> SubscriptionHandle {
        self.subscribe_filtered(Some(pattern.into()), handler)
    }

    fn subscribe_filtered(
        &self,
        topic: Option<String>,
        handler: MessageHandler,
    ) -> SubscriptionHandle {
        let id = self.inner.next_subscriber_id.fetch_add(1, Ordering::SeqCst);
        self.inner.subscribers.lock().push(Subscriber {
            id,
            topic,
            handler,
        });
        SubscriptionHandle {
            id,
            inner: Arc::downgrade(&self.inner),
        }
    }

    // -- ledger passthroughs --

    pub fn query(&self, query: &MessageQuery) -> Result<Vec<Message>, StorageError> {
        self.inner.ledger.lock().query(query)
    }

    pub fn count(&self, topic: Option<&str>) -> Result<usize, StorageError> {
        self.inner.ledger.lock().count(topic)
    }

    pub fn get_all(&self) -> Result<Vec<Message>, StorageError> {
        self.inner.ledger.lock().get_all()
    }

    pub fn find_last(&self, topic: &str) -> Result<Option<Message>, StorageError> {
        self.inner.ledger.lock().find_last(topic)
    }

    /// Close the underlying ledger. Idempotent.
    pub fn close(&self) {
        self.inner.ledger.lock().close();
    }
}

#[cfg(test)]
#[path = "bus_tests.rs"]
mod tests;
