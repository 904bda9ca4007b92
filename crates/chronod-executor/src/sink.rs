use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use chronod_core::{ContentMode, JobDetails, Recipient, RecipientKind};
use tracing::debug;

use crate::{ExecutionResponse, ExecutorError, JobExecutor, Result};

/// Delivers fired jobs to event-sink recipients.
///
/// `Structured` mode posts one JSON envelope carrying payload and metadata;
/// `Binary` mode posts the raw payload with metadata in `ce-*` headers, the
/// shape CloudEvents-aware sinks expect.
pub struct SinkExecutor {
    client: reqwest::Client,
}

impl SinkExecutor {
    pub fn new(request_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl JobExecutor for SinkExecutor {
    fn kind(&self) -> RecipientKind {
        RecipientKind::Sink
    }

    async fn execute(&self, job: &JobDetails) -> Result<ExecutionResponse> {
        let Recipient::Sink {
            sink_url,
            content_mode,
            payload,
        } = &job.recipient
        else {
            return Err(ExecutorError::RecipientMismatch {
                expected: RecipientKind::Sink,
            });
        };

        let fired_at = Utc::now();
        let request = match content_mode {
            ContentMode::Structured => self.client.post(sink_url).json(&serde_json::json!({
                "id": job.id,
                "source": "chronod",
                "type": "job.fired",
                "time": fired_at.to_rfc3339(),
                "correlationid": job.correlation_id,
                "data": payload,
            })),
            ContentMode::Binary => {
                let mut request = self
                    .client
                    .post(sink_url)
                    .header("ce-id", &job.id)
                    .header("ce-source", "chronod")
                    .header("ce-type", "job.fired")
                    .header("ce-time", fired_at.to_rfc3339())
                    .header("ce-correlationid", &job.correlation_id);
                if let Some(payload) = payload {
                    request = request.json(payload);
                }
                request
            }
        };

        debug!(job_id = %job.id, %sink_url, mode = ?content_mode, "delivering to sink");
        let response = request.send().await?;
        let status = response.status();

        if status.is_success() {
            Ok(ExecutionResponse {
                job_id: job.id.clone(),
                timestamp: fired_at,
                code: status.as_u16().to_string(),
                message: None,
            })
        } else {
            Err(ExecutorError::Delivery {
                code: status.as_u16().to_string(),
                message: format!("sink rejected event for job {}", job.id),
            })
        }
    }
}
