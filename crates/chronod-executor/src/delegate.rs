use chronod_core::JobDetails;
use tracing::{debug, warn};

use crate::{ExecutionResponse, ExecutorError, ExecutorRegistry};

/// Normalised result of one delivery attempt, as seen by the scheduler.
#[derive(Debug, Clone)]
pub enum ExecutionOutcome {
    Delivered(ExecutionResponse),
    Failed { code: String, message: String },
}

/// The callback invoked when a timer fires.
///
/// Resolves the concrete executor for the job's recipient kind and folds
/// every failure mode into [`ExecutionOutcome::Failed`] with code `"500"`
/// (delivery-reported codes are kept), so an unexpected error consumes a
/// retry slot instead of crashing the timer engine.
pub struct DelegateExecutor {
    registry: ExecutorRegistry,
}

impl DelegateExecutor {
    pub fn new(registry: ExecutorRegistry) -> Self {
        Self { registry }
    }

    pub async fn execute(&self, job: &JobDetails) -> ExecutionOutcome {
        let kind = job.recipient.kind();
        let Some(executor) = self.registry.resolve(kind) else {
            warn!(job_id = %job.id, %kind, "no executor registered for recipient kind");
            return ExecutionOutcome::Failed {
                code: "500".into(),
                message: format!("no executor for recipient kind {kind}"),
            };
        };

        match executor.execute(job).await {
            Ok(response) => {
                debug!(job_id = %job.id, code = %response.code, "delivery succeeded");
                ExecutionOutcome::Delivered(response)
            }
            Err(ExecutorError::Delivery { code, message }) => {
                warn!(job_id = %job.id, %code, "recipient reported delivery failure");
                ExecutionOutcome::Failed { code, message }
            }
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "delivery attempt failed");
                ExecutionOutcome::Failed {
                    code: "500".into(),
                    message: e.to_string(),
                }
            }
        }
    }
}
