use thiserror::Error;

/// Errors within the lifecycle/eventing adapter.
#[derive(Debug, Error)]
pub enum MessagingError {
    /// The downstream event sink rejected or failed the publish.
    #[error("publish failed: {0}")]
    Publish(String),

    /// Publish retries were exhausted without success.
    #[error("publish retries exhausted after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: String },
}

pub type Result<T> = std::result::Result<T, MessagingError>;
