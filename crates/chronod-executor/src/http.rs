use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use chronod_core::{JobDetails, Recipient, RecipientKind};
use tracing::debug;

use crate::{ExecutionResponse, ExecutorError, JobExecutor, Result};

/// Delivers fired jobs to plain HTTP callback recipients.
pub struct HttpCallbackExecutor {
    client: reqwest::Client,
}

impl HttpCallbackExecutor {
    /// `request_timeout` bounds every recipient call; a timed-out call is a
    /// transport error and follows the normal retry path.
    pub fn new(request_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl JobExecutor for HttpCallbackExecutor {
    fn kind(&self) -> RecipientKind {
        RecipientKind::Http
    }

    async fn execute(&self, job: &JobDetails) -> Result<ExecutionResponse> {
        let Recipient::Http {
            url,
            method,
            headers,
            payload,
        } = &job.recipient
        else {
            return Err(ExecutorError::RecipientMismatch {
                expected: RecipientKind::Http,
            });
        };

        let method = reqwest::Method::from_bytes(method.to_ascii_uppercase().as_bytes())
            .map_err(|_| ExecutorError::Delivery {
                code: "500".into(),
                message: format!("unsupported method: {method}"),
            })?;

        let mut request = self
            .client
            .request(method, url)
            .header("x-chronod-job-id", &job.id)
            .header("x-chronod-correlation-id", &job.correlation_id);
        for (name, value) in headers {
            request = request.header(name, value);
        }
        if let Some(payload) = payload {
            request = request.json(payload);
        }

        debug!(job_id = %job.id, %url, "delivering http callback");
        let response = request.send().await?;
        let status = response.status();

        if status.is_success() {
            Ok(ExecutionResponse {
                job_id: job.id.clone(),
                timestamp: Utc::now(),
                code: status.as_u16().to_string(),
                message: None,
            })
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(ExecutorError::Delivery {
                code: status.as_u16().to_string(),
                message: truncate(&body, 512),
            })
        }
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        let mut end = max;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}…", &s[..end])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{routing::post, Router};
    use chronod_core::{JobStatus, Trigger};
    use std::collections::HashMap;

    fn job_for(url: String) -> JobDetails {
        let now = Utc::now();
        JobDetails {
            id: "job-http".into(),
            correlation_id: "corr-http".into(),
            trigger: Trigger::PointInTime {
                fire_time: now,
                fired_count: 0,
            },
            recipient: Recipient::Http {
                url,
                method: "POST".into(),
                headers: HashMap::new(),
                payload: Some(serde_json::json!({"hello": "world"})),
            },
            status: JobStatus::Scheduled,
            priority: 0,
            retries: 0,
            execution_counter: 0,
            scheduled_id: None,
            next_fire: Some(now),
            created: now,
            last_update: now,
        }
    }

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn success_carries_http_status_code() {
        let base = serve(Router::new().route("/cb", post(|| async { "ok" }))).await;
        let executor = HttpCallbackExecutor::new(Duration::from_secs(2)).unwrap();

        let response = executor.execute(&job_for(format!("{base}/cb"))).await.unwrap();
        assert_eq!(response.code, "200");
        assert_eq!(response.job_id, "job-http");
    }

    #[tokio::test]
    async fn non_2xx_is_a_delivery_error() {
        let base = serve(Router::new().route(
            "/cb",
            post(|| async { (axum::http::StatusCode::SERVICE_UNAVAILABLE, "down") }),
        ))
        .await;
        let executor = HttpCallbackExecutor::new(Duration::from_secs(2)).unwrap();

        match executor.execute(&job_for(format!("{base}/cb"))).await {
            Err(ExecutorError::Delivery { code, message }) => {
                assert_eq!(code, "503");
                assert_eq!(message, "down");
            }
            other => panic!("expected delivery error, got {other:?}"),
        }
    }
}
