use serde_json::Value;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Operation kind carried by an entity-change event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOperation {
    Create,
    Update,
    Delete,
}

/// One entity mutation, published after every Job/Task/TaskOutcome write so
/// observers (UI push, audit) can follow a run without polling the store.
#[derive(Debug, Clone)]
pub struct EntityEvent {
    pub team_id: Uuid,
    pub entity: &'static str,
    pub operation: EventOperation,
    pub payload: Value,
    pub published_at: chrono::DateTime<chrono::Utc>,
}

/// Broadcast-channel publisher for entity-change events. Lossy by design:
/// publishing with no subscribers is not an error.
#[derive(Debug, Clone)]
pub struct EventPublisher {
    sender: broadcast::Sender<EntityEvent>,
}

impl EventPublisher {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn publish(
        &self,
        team_id: Uuid,
        entity: &'static str,
        operation: EventOperation,
        payload: Value,
    ) {
        let event = EntityEvent {
            team_id,
            entity,
            operation,
            payload,
            published_at: chrono::Utc::now(),
        };

        // send() errors only when there are no subscribers, which is fine.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EntityEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new(1000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_and_receive() {
        let publisher = EventPublisher::new(16);
        let mut rx = publisher.subscribe();
        let team = Uuid::new_v4();

        publisher.publish(
            team,
            "Task",
            EventOperation::Update,
            serde_json::json!({"status": "running"}),
        );

        let event = rx.recv().await.unwrap();
        assert_eq!(event.team_id, team);
        assert_eq!(event.entity, "Task");
        assert_eq!(event.operation, EventOperation::Update);
    }

    #[test]
    fn test_publish_without_subscribers_is_ok() {
        let publisher = EventPublisher::default();
        publisher.publish(
            Uuid::new_v4(),
            "Job",
            EventOperation::Create,
            Value::Null,
        );
        assert_eq!(publisher.subscriber_count(), 0);
    }
}
