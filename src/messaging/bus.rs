//! # Message Bus
//!
//! Broker abstraction plus the in-memory reference implementation. Queues
//! are created lazily on first publish or subscribe, so a dispatch to an
//! agent that has not connected yet buffers until it does.

use super::errors::MessagingError;
use super::message::AgentEnvelope;
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

#[async_trait]
pub trait MessageBus: Send + Sync {
    async fn publish(&self, queue: &str, envelope: AgentEnvelope) -> Result<(), MessagingError>;

    /// Take the consumer side of a queue. Each queue supports one consumer.
    fn subscribe(&self, queue: &str) -> Result<UnboundedReceiver<AgentEnvelope>, MessagingError>;
}

struct QueueHandle {
    sender: UnboundedSender<AgentEnvelope>,
    /// Present until a consumer claims it.
    receiver: Mutex<Option<UnboundedReceiver<AgentEnvelope>>>,
}

impl QueueHandle {
    fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            sender,
            receiver: Mutex::new(Some(receiver)),
        }
    }
}

/// Channel-backed bus for tests and single-process deployments.
#[derive(Default)]
pub struct InMemoryBus {
    queues: DashMap<String, QueueHandle>,
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MessageBus for InMemoryBus {
    async fn publish(&self, queue: &str, envelope: AgentEnvelope) -> Result<(), MessagingError> {
        let handle = self
            .queues
            .entry(queue.to_string())
            .or_insert_with(QueueHandle::new);
        handle
            .sender
            .send(envelope)
            .map_err(|_| MessagingError::QueueClosed(queue.to_string()))
    }

    fn subscribe(&self, queue: &str) -> Result<UnboundedReceiver<AgentEnvelope>, MessagingError> {
        let handle = self
            .queues
            .entry(queue.to_string())
            .or_insert_with(QueueHandle::new);
        let receiver = handle.receiver.lock().take();
        receiver.ok_or_else(|| MessagingError::AlreadySubscribed(queue.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::message::AgentControl;
    use uuid::Uuid;

    fn control() -> AgentEnvelope {
        AgentEnvelope::Control(AgentControl::CancelTask {
            task_id: Uuid::new_v4(),
        })
    }

    #[tokio::test]
    async fn test_publish_before_subscribe_buffers() {
        let bus = InMemoryBus::new();
        bus.publish("team/t/agent/a", control()).await.unwrap();

        let mut rx = bus.subscribe("team/t/agent/a").unwrap();
        assert!(rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_second_subscriber_rejected() {
        let bus = InMemoryBus::new();
        let _rx = bus.subscribe("q").unwrap();
        assert!(matches!(
            bus.subscribe("q"),
            Err(MessagingError::AlreadySubscribed(_))
        ));
    }

    #[tokio::test]
    async fn test_queues_are_independent() {
        let bus = InMemoryBus::new();
        let mut rx_a = bus.subscribe("a").unwrap();
        let mut rx_b = bus.subscribe("b").unwrap();

        bus.publish("a", control()).await.unwrap();
        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_err());
    }
}
