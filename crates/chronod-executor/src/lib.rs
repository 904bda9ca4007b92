//! `chronod-executor` — delivery executors invoked when a job fires.
//!
//! The scheduler never talks to a concrete transport. It hands the fired
//! [`JobDetails`](chronod_core::JobDetails) to the [`DelegateExecutor`],
//! which resolves the right [`JobExecutor`] from the [`ExecutorRegistry`]
//! by recipient kind and normalises every failure mode (missing executor,
//! transport error, non-2xx answer, bad payload) into a single
//! [`ExecutionOutcome::Failed`] carrying code `"500"` so the retry policy
//! can apply uniformly.

pub mod delegate;
pub mod error;
pub mod http;
pub mod registry;
pub mod sink;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chronod_core::{JobDetails, RecipientKind};
use serde::{Deserialize, Serialize};

pub use delegate::{DelegateExecutor, ExecutionOutcome};
pub use error::{ExecutorError, Result};
pub use http::HttpCallbackExecutor;
pub use registry::ExecutorRegistry;
pub use sink::SinkExecutor;

/// Outcome of one successful delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResponse {
    pub job_id: String,
    pub timestamp: DateTime<Utc>,
    /// Transport-specific code, e.g. the HTTP status ("200").
    pub code: String,
    #[serde(default)]
    pub message: Option<String>,
}

/// Contract every delivery mechanism implements.
///
/// `execute` either returns a response or signals a delivery error; the
/// delegate treats both an `Err` and an error-coded response identically.
#[async_trait]
pub trait JobExecutor: Send + Sync {
    /// The recipient kind this executor can deliver to.
    fn kind(&self) -> RecipientKind;

    async fn execute(&self, job: &JobDetails) -> Result<ExecutionResponse>;
}
