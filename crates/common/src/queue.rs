//! Bounded FIFO queues connecting pipeline stages.
//!
//! Producers push with the configured [`Backpressure`] policy; consumers pop
//! with a bounded wait so they can notice the [`StopFlag`] between items.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::warn;

/// What a producer does when the queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Backpressure {
    /// Wait until the consumer frees a slot.
    #[default]
    Block,
    /// Discard the new item and log it.
    Drop,
}

/// Outcome of [`QueueSender::push`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Push {
    Sent,
    Dropped,
    /// The consumer is gone.
    Closed,
}

/// Outcome of [`QueueReceiver::pop`].
#[derive(Debug)]
pub enum Pop<T> {
    Item(T),
    /// Nothing arrived within the wait.
    Idle,
    /// Every producer is gone and the queue is drained.
    Closed,
}

/// Create a named bounded queue.
pub fn bounded<T>(
    name: &'static str,
    capacity: usize,
    policy: Backpressure,
) -> (QueueSender<T>, QueueReceiver<T>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        QueueSender {
            name,
            policy,
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
        },
        QueueReceiver { name, rx },
    )
}

pub struct QueueSender<T> {
    name: &'static str,
    policy: Backpressure,
    tx: mpsc::Sender<T>,
    dropped: Arc<AtomicU64>,
}

impl<T> Clone for QueueSender<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            policy: self.policy,
            tx: self.tx.clone(),
            dropped: self.dropped.clone(),
        }
    }
}

impl<T> QueueSender<T> {
    pub async fn push(&self, item: T) -> Push {
        match self.policy {
            Backpressure::Block => match self.tx.send(item).await {
                Ok(()) => Push::Sent,
                Err(_) => Push::Closed,
            },
            Backpressure::Drop => match self.tx.try_send(item) {
                Ok(()) => Push::Sent,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                    warn!(queue = self.name, dropped_total = total, "Queue full, dropping item");
                    Push::Dropped
                }
                Err(mpsc::error::TrySendError::Closed(_)) => Push::Closed,
            },
        }
    }

    /// Items discarded so far under [`Backpressure::Drop`].
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

pub struct QueueReceiver<T> {
    name: &'static str,
    rx: mpsc::Receiver<T>,
}

impl<T> QueueReceiver<T> {
    pub async fn pop(&mut self, wait: Duration) -> Pop<T> {
        match tokio::time::timeout(wait, self.rx.recv()).await {
            Ok(Some(item)) => Pop::Item(item),
            Ok(None) => Pop::Closed,
            Err(_) => Pop::Idle,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

/// Cooperative shutdown flag shared by every stage.
#[derive(Debug, Clone, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
