use thiserror::Error;

#[derive(Error, Debug)]
pub enum MessagingError {
    #[error("queue {0} has no consumer")]
    QueueClosed(String),

    #[error("queue {0} already has a consumer")]
    AlreadySubscribed(String),

    #[error("failed to publish to {queue}: {reason}")]
    PublishFailed { queue: String, reason: String },

    #[error("message serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}
