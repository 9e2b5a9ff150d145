//! Per-stage durable queues with visibility-timeout redelivery.
//!
//! A received message is hidden for the visibility timeout passed to
//! [`StageQueue::receive`]. Deleting it with the receipt from that receive
//! acknowledges it; otherwise it becomes visible again once the timeout
//! lapses. A receipt is only valid for the receive that produced it.

pub mod memory;

use std::{fmt, time::Duration};

use async_trait::async_trait;
use enricher_model::CanonicalEvent;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;

pub use memory::InMemoryStageQueue;

/// Token proving a specific receive of a message.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReceiptHandle(Uuid);

impl ReceiptHandle {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for ReceiptHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ReceiptHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ReceiptHandle").field(&self.0).finish()
    }
}

impl fmt::Display for ReceiptHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One received message.
#[derive(Clone, Debug)]
pub struct Delivery {
    pub receipt: ReceiptHandle,
    pub message_id: Uuid,
    pub body: String,
    /// Number of times this message has been received, this one included.
    pub receive_count: u32,
}

impl Delivery {
    /// Decode the routed canonical event carried in the body.
    pub fn event(&self) -> Result<CanonicalEvent> {
        Ok(serde_json::from_str(&self.body)?)
    }
}

/// Instantaneous message counts for a queue.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueDepth {
    /// Receivable now.
    pub ready: usize,
    /// Received and not yet deleted or expired.
    pub in_flight: usize,
    /// Sent with a delay that has not elapsed.
    pub delayed: usize,
}

impl QueueDepth {
    pub fn total(&self) -> usize {
        self.ready + self.in_flight + self.delayed
    }
}

#[async_trait]
pub trait StageQueue: Send + Sync {
    fn name(&self) -> &str;

    /// Enqueue `body`, invisible until `delay` has elapsed.
    async fn send(&self, body: String, delay: Duration) -> Result<Uuid>;

    /// Receive up to `max` visible messages, hiding each for
    /// `visibility_timeout`.
    async fn receive(
        &self,
        max: usize,
        visibility_timeout: Duration,
    ) -> Result<Vec<Delivery>>;

    /// Acknowledge a delivery. A receipt that is no longer current (the
    /// message was redelivered or already deleted) fails with `NotFound`.
    async fn delete(&self, receipt: &ReceiptHandle) -> Result<()>;

    async fn depth(&self) -> Result<QueueDepth>;
}
