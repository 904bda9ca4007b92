use chronod_core::CoreError;
use thiserror::Error;

/// Errors that can occur within the scheduling subsystem.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Underlying SQLite / rusqlite error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Trigger/recipient JSON could not be (de)serialised.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The job or merge payload failed validation. Never persisted.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A job with this id already exists.
    #[error("Job already exists: {id}")]
    AlreadyExists { id: String },

    /// No live job with the given id (missing, or already terminal).
    #[error("Job not found: {id}")]
    JobNotFound { id: String },
}

impl From<CoreError> for SchedulerError {
    fn from(e: CoreError) -> Self {
        match e {
            CoreError::Validation(msg) | CoreError::Config(msg) => SchedulerError::Validation(msg),
        }
    }
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
