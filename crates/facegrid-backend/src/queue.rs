//! Queue service seam and the in-process `MemoryQueue`.
//!
//! Delivery is at-least-once: a received message becomes invisible for the
//! visibility timeout and reappears unless it is deleted with the receipt
//! handle of its latest delivery. Every delivery bumps the message's
//! receive count.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tracing::debug;

use crate::BackendFuture;
use crate::error::{BackendError, BackendResult};

/// A message handed out by [`QueueService::receive`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    pub body: String,
    /// Handle required to delete this delivery.
    pub receipt: String,
    /// How many times the message has been delivered, this one included.
    pub receive_count: u32,
}

/// A durable, at-least-once message queue addressed by name.
pub trait QueueService: Send + Sync {
    /// Append a message to `queue`.
    fn send<'a>(&'a self, queue: &'a str, body: &'a str) -> BackendFuture<'a, ()>;

    /// Receive up to `max_messages`, blocking for at most `wait` while the
    /// queue is empty. An empty vector means the wait elapsed.
    fn receive<'a>(
        &'a self,
        queue: &'a str,
        max_messages: usize,
        wait: Duration,
    ) -> BackendFuture<'a, Vec<ReceivedMessage>>;

    /// Acknowledge a delivery so it is never redelivered.
    fn delete<'a>(&'a self, queue: &'a str, receipt: &'a str) -> BackendFuture<'a, ()>;

    /// Approximate number of messages waiting to be received.
    fn approximate_count<'a>(&'a self, queue: &'a str) -> BackendFuture<'a, usize>;
}

struct StoredMessage {
    id: u64,
    body: String,
    receive_count: u32,
    receipt: Option<String>,
    invisible_until: Option<Instant>,
}

impl StoredMessage {
    fn is_visible(&self, now: Instant) -> bool {
        self.invisible_until.is_none_or(|until| until <= now)
    }
}

struct QueueState {
    messages: VecDeque<StoredMessage>,
    /// Woken on every send.
    notify: Arc<Notify>,
}

impl QueueState {
    fn new() -> Self {
        Self {
            messages: VecDeque::new(),
            notify: Arc::new(Notify::new()),
        }
    }

    fn take_visible(
        &mut self,
        queue: &str,
        max: usize,
        now: Instant,
        visibility: Duration,
    ) -> Vec<ReceivedMessage> {
        let mut batch = Vec::new();
        for msg in self.messages.iter_mut() {
            if batch.len() >= max {
                break;
            }
            if !msg.is_visible(now) {
                continue;
            }
            msg.receive_count += 1;
            let receipt = format!("{queue}:{}:{}", msg.id, msg.receive_count);
            msg.receipt = Some(receipt.clone());
            msg.invisible_until = Some(now + visibility);
            batch.push(ReceivedMessage {
                body: msg.body.clone(),
                receipt,
                receive_count: msg.receive_count,
            });
        }
        batch
    }

    /// Earliest moment an in-flight message becomes visible again.
    fn next_expiry(&self, now: Instant) -> Option<Instant> {
        self.messages
            .iter()
            .filter_map(|m| m.invisible_until)
            .filter(|until| *until > now)
            .min()
    }
}

/// In-process queue service holding any number of named queues.
pub struct MemoryQueue {
    queues: Mutex<HashMap<String, QueueState>>,
    visibility_timeout: Duration,
    next_id: AtomicU64,
    available: AtomicBool,
}

impl MemoryQueue {
    /// Create the named queues with a 30 second visibility timeout.
    pub fn new(names: &[&str]) -> Self {
        let queues = names
            .iter()
            .map(|name| (name.to_string(), QueueState::new()))
            .collect();
        Self {
            queues: Mutex::new(queues),
            visibility_timeout: Duration::from_secs(30),
            next_id: AtomicU64::new(1),
            available: AtomicBool::new(true),
        }
    }

    pub fn with_visibility_timeout(mut self, timeout: Duration) -> Self {
        self.visibility_timeout = timeout;
        self
    }

    /// Simulate an outage: while unavailable every operation fails.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::Relaxed);
    }

    /// Messages received but neither deleted nor expired back to visible.
    pub async fn in_flight_count(&self, queue: &str) -> BackendResult<usize> {
        let now = Instant::now();
        let queues = self.queues.lock().await;
        let state = lookup(&queues, queue)?;
        Ok(state.messages.iter().filter(|m| !m.is_visible(now)).count())
    }

    /// Bodies of every message still held by `queue`, in arrival order.
    pub async fn bodies(&self, queue: &str) -> BackendResult<Vec<String>> {
        let queues = self.queues.lock().await;
        let state = lookup(&queues, queue)?;
        Ok(state.messages.iter().map(|m| m.body.clone()).collect())
    }

    fn check_available(&self) -> BackendResult<()> {
        if self.available.load(Ordering::Relaxed) {
            Ok(())
        } else {
            Err(BackendError::Unavailable("queue service".to_string()))
        }
    }
}

fn lookup<'q>(queues: &'q HashMap<String, QueueState>, queue: &str) -> BackendResult<&'q QueueState> {
    queues
        .get(queue)
        .ok_or_else(|| BackendError::QueueNotFound(queue.to_string()))
}

fn lookup_mut<'q>(
    queues: &'q mut HashMap<String, QueueState>,
    queue: &str,
) -> BackendResult<&'q mut QueueState> {
    queues
        .get_mut(queue)
        .ok_or_else(|| BackendError::QueueNotFound(queue.to_string()))
}

impl QueueService for MemoryQueue {
    fn send<'a>(&'a self, queue: &'a str, body: &'a str) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            self.check_available()?;
            let mut queues = self.queues.lock().await;
            let state = lookup_mut(&mut queues, queue)?;
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            state.messages.push_back(StoredMessage {
                id,
                body: body.to_string(),
                receive_count: 0,
                receipt: None,
                invisible_until: None,
            });
            state.notify.notify_waiters();
            debug!(%queue, id, "message sent");
            Ok(())
        })
    }

    fn receive<'a>(
        &'a self,
        queue: &'a str,
        max_messages: usize,
        wait: Duration,
    ) -> BackendFuture<'a, Vec<ReceivedMessage>> {
        Box::pin(async move {
            self.check_available()?;
            let max = max_messages.max(1);
            let deadline = Instant::now() + wait;
            let notify = {
                let queues = self.queues.lock().await;
                Arc::clone(&lookup(&queues, queue)?.notify)
            };

            loop {
                // Register for wake-ups before looking, so a send between
                // the check and the wait is not missed.
                let notified = notify.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();

                let now = Instant::now();
                let next_expiry = {
                    let mut queues = self.queues.lock().await;
                    let state = lookup_mut(&mut queues, queue)?;
                    let batch = state.take_visible(queue, max, now, self.visibility_timeout);
                    if !batch.is_empty() {
                        debug!(%queue, count = batch.len(), "messages received");
                        return Ok(batch);
                    }
                    state.next_expiry(now)
                };

                if now >= deadline {
                    return Ok(Vec::new());
                }
                let wake_at = next_expiry.map_or(deadline, |t| t.min(deadline));
                tokio::select! {
                    _ = notified.as_mut() => {}
                    _ = tokio::time::sleep_until(wake_at) => {}
                }
            }
        })
    }

    fn delete<'a>(&'a self, queue: &'a str, receipt: &'a str) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            self.check_available()?;
            let mut queues = self.queues.lock().await;
            let state = lookup_mut(&mut queues, queue)?;
            let pos = state
                .messages
                .iter()
                .position(|m| m.receipt.as_deref() == Some(receipt))
                .ok_or_else(|| BackendError::InvalidReceipt(receipt.to_string()))?;
            state.messages.remove(pos);
            debug!(%queue, %receipt, "message deleted");
            Ok(())
        })
    }

    fn approximate_count<'a>(&'a self, queue: &'a str) -> BackendFuture<'a, usize> {
        Box::pin(async move {
            self.check_available()?;
            let now = Instant::now();
            let queues = self.queues.lock().await;
            let state = lookup(&queues, queue)?;
            Ok(state.messages.iter().filter(|m| m.is_visible(now)).count())
        })
    }
}
