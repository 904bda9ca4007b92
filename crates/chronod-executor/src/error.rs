use chronod_core::RecipientKind;
use thiserror::Error;

/// Errors raised while delivering a fired job to its recipient.
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// Transport-level failure (connect, timeout, TLS, …).
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The recipient answered but reported failure (e.g. non-2xx).
    #[error("delivery failed with code {code}: {message}")]
    Delivery { code: String, message: String },

    /// The job's recipient does not match this executor.
    #[error("recipient mismatch: expected {expected}")]
    RecipientMismatch { expected: RecipientKind },
}

pub type Result<T> = std::result::Result<T, ExecutorError>;
