use std::time::Duration;

use tokio::sync::mpsc;

use crate::error::{AppError, AppResult};
use crate::models::InteractionMessage;

/// A message handed out by an event source, acknowledged separately
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub id: String,
    pub payload: Vec<u8>,
}

/// Outcome of waiting on an event source
#[derive(Debug, Clone, PartialEq)]
pub enum Received {
    Message(Delivery),
    /// Nothing arrived within the wait window
    Idle,
    /// The source will never deliver again
    Closed,
}

/// At-least-once stream of interaction messages
///
/// A delivery that is never acknowledged may be handed out again after a
/// restart.
#[async_trait::async_trait]
pub trait EventSource: Send {
    async fn receive(&mut self, wait: Duration) -> AppResult<Received>;

    async fn ack(&mut self, delivery_id: &str) -> AppResult<()>;
}

/// Producer side of the event source
#[async_trait::async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, message: &InteractionMessage) -> AppResult<()>;
}

/// In-process event source fed by a channel
pub struct ChannelEventSource {
    rx: mpsc::Receiver<Vec<u8>>,
    next_id: u64,
    acked: Vec<String>,
}

impl ChannelEventSource {
    pub fn acked(&self) -> &[String] {
        &self.acked
    }
}

#[derive(Clone)]
pub struct ChannelPublisher {
    tx: mpsc::Sender<Vec<u8>>,
}

impl ChannelPublisher {
    /// Sends an already-encoded payload, valid or not
    pub async fn publish_raw(&self, payload: Vec<u8>) -> AppResult<()> {
        self.tx
            .send(payload)
            .await
            .map_err(|_| AppError::Transport("event channel closed".to_string()))
    }
}

/// Creates a connected publisher/source pair
pub fn channel(buffer: usize) -> (ChannelPublisher, ChannelEventSource) {
    let (tx, rx) = mpsc::channel(buffer);
    (
        ChannelPublisher { tx },
        ChannelEventSource {
            rx,
            next_id: 0,
            acked: Vec::new(),
        },
    )
}

#[async_trait::async_trait]
impl EventSource for ChannelEventSource {
    async fn receive(&mut self, wait: Duration) -> AppResult<Received> {
        match tokio::time::timeout(wait, self.rx.recv()).await {
            Ok(Some(payload)) => {
                self.next_id += 1;
                Ok(Received::Message(Delivery {
                    id: self.next_id.to_string(),
                    payload,
                }))
            }
            Ok(None) => Ok(Received::Closed),
            Err(_) => Ok(Received::Idle),
        }
    }

    async fn ack(&mut self, delivery_id: &str) -> AppResult<()> {
        self.acked.push(delivery_id.to_string());
        Ok(())
    }
}

#[async_trait::async_trait]
impl EventPublisher for ChannelPublisher {
    async fn publish(&self, message: &InteractionMessage) -> AppResult<()> {
        self.publish_raw(serde_json::to_vec(message)?).await
    }
}
