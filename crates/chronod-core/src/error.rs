use thiserror::Error;

/// Errors produced by the shared core types.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Configuration could not be loaded or is inconsistent.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A value failed creation-time validation (bad trigger bounds,
    /// malformed recipient URL, forbidden merge field, …).
    #[error("Validation error: {0}")]
    Validation(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;
