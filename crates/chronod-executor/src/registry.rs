use std::collections::HashMap;
use std::sync::Arc;

use chronod_core::RecipientKind;
use tracing::info;

use crate::JobExecutor;

/// Maps recipient kinds to delivery executors.
///
/// The kind set is closed (see [`RecipientKind`]); extensibility comes from
/// this registration table, not from open-ended dynamic dispatch.
#[derive(Default)]
pub struct ExecutorRegistry {
    executors: HashMap<RecipientKind, Arc<dyn JobExecutor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an executor under its own kind. A previously registered
    /// executor for the same kind is replaced.
    pub fn register(&mut self, executor: Arc<dyn JobExecutor>) {
        let kind = executor.kind();
        info!(%kind, "registering delivery executor");
        self.executors.insert(kind, executor);
    }

    pub fn resolve(&self, kind: RecipientKind) -> Option<Arc<dyn JobExecutor>> {
        self.executors.get(&kind).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ExecutionResponse, Result};
    use async_trait::async_trait;
    use chronod_core::JobDetails;

    struct FakeExecutor(RecipientKind);

    #[async_trait]
    impl JobExecutor for FakeExecutor {
        fn kind(&self) -> RecipientKind {
            self.0
        }

        async fn execute(&self, job: &JobDetails) -> Result<ExecutionResponse> {
            Ok(ExecutionResponse {
                job_id: job.id.clone(),
                timestamp: chrono::Utc::now(),
                code: "200".into(),
                message: None,
            })
        }
    }

    #[test]
    fn resolves_by_kind() {
        let mut registry = ExecutorRegistry::new();
        registry.register(Arc::new(FakeExecutor(RecipientKind::Http)));

        assert!(registry.resolve(RecipientKind::Http).is_some());
        assert!(registry.resolve(RecipientKind::Sink).is_none());
    }
}
