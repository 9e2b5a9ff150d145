use std::{fmt, time::Duration};

use async_trait::async_trait;
use tokio::{sync::Mutex, time::Instant};
use uuid::Uuid;

use super::{Delivery, QueueDepth, ReceiptHandle, StageQueue};
use crate::error::{EnricherError, Result};

#[derive(Debug)]
struct StoredMessage {
    id: Uuid,
    body: String,
    visible_at: Instant,
    receipt: Option<ReceiptHandle>,
    receive_count: u32,
}

/// Process-local queue. Timing uses `tokio::time::Instant`, so paused-clock
/// tests can drive visibility expiry deterministically.
pub struct InMemoryStageQueue {
    name: String,
    messages: Mutex<Vec<StoredMessage>>,
}

impl fmt::Debug for InMemoryStageQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryStageQueue")
            .field("name", &self.name)
            .finish()
    }
}

impl InMemoryStageQueue {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            messages: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl StageQueue for InMemoryStageQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, body: String, delay: Duration) -> Result<Uuid> {
        let id = Uuid::now_v7();
        self.messages.lock().await.push(StoredMessage {
            id,
            body,
            visible_at: Instant::now() + delay,
            receipt: None,
            receive_count: 0,
        });
        Ok(id)
    }

    async fn receive(
        &self,
        max: usize,
        visibility_timeout: Duration,
    ) -> Result<Vec<Delivery>> {
        let now = Instant::now();
        let mut messages = self.messages.lock().await;
        let mut out = Vec::new();
        for message in messages.iter_mut() {
            if out.len() >= max {
                break;
            }
            if message.visible_at > now {
                continue;
            }
            let receipt = ReceiptHandle::new();
            message.visible_at = now + visibility_timeout;
            message.receipt = Some(receipt.clone());
            message.receive_count += 1;
            out.push(Delivery {
                receipt,
                message_id: message.id,
                body: message.body.clone(),
                receive_count: message.receive_count,
            });
        }
        Ok(out)
    }

    async fn delete(&self, receipt: &ReceiptHandle) -> Result<()> {
        let now = Instant::now();
        let mut messages = self.messages.lock().await;
        let position = messages.iter().position(|message| {
            message.receipt.as_ref() == Some(receipt) && message.visible_at > now
        });
        match position {
            Some(index) => {
                messages.remove(index);
                Ok(())
            }
            None => Err(EnricherError::NotFound(format!(
                "receipt {receipt} on queue {}",
                self.name
            ))),
        }
    }

    async fn depth(&self) -> Result<QueueDepth> {
        let now = Instant::now();
        let messages = self.messages.lock().await;
        let mut depth = QueueDepth::default();
        for message in messages.iter() {
            if message.visible_at <= now {
                depth.ready += 1;
            } else if message.receipt.is_some() {
                depth.in_flight += 1;
            } else {
                depth.delayed += 1;
            }
        }
        Ok(depth)
    }
}
