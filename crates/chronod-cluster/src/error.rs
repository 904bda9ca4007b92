use thiserror::Error;

/// Errors within the leader-election subsystem. These never reach callers
/// of the scheduler API; a failed heartbeat simply demotes the instance.
#[derive(Debug, Error)]
pub enum ClusterError {
    /// Underlying SQLite / rusqlite error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// The heartbeat record is missing or malformed.
    #[error("Heartbeat record error: {0}")]
    Heartbeat(String),
}

pub type Result<T> = std::result::Result<T, ClusterError>;
