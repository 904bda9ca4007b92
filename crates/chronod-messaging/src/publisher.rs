use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chronod_core::JobStatusEvent;
use tokio::sync::{mpsc, watch};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::error::{MessagingError, Result};

/// Outbound sink for job status notifications. The concrete transport
/// (Kafka, HTTP, …) lives outside this service; implementations adapt it.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: &JobStatusEvent) -> Result<()>;
}

/// Reference publisher: structured log lines. Useful on its own for audit
/// trails and as the default wiring when no transport is configured.
pub struct LogPublisher;

#[async_trait]
impl EventPublisher for LogPublisher {
    async fn publish(&self, event: &JobStatusEvent) -> Result<()> {
        info!(
            job_id = %event.job_id,
            correlation_id = %event.correlation_id,
            kind = ?event.kind,
            status = %event.status,
            message = event.message.as_deref().unwrap_or(""),
            "job status event"
        );
        Ok(())
    }
}

/// Wraps a publisher with bounded retries and exponential backoff from a
/// fixed base delay. Transient sink failures are absorbed here; exhaustion
/// drops the event with an error log (observers are best-effort, the job
/// state itself is already durable).
pub struct RetryingPublisher<P> {
    inner: P,
    max_attempts: u32,
    base_delay: Duration,
}

impl<P: EventPublisher> RetryingPublisher<P> {
    pub fn new(inner: P, max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            inner,
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }
}

#[async_trait]
impl<P: EventPublisher> EventPublisher for RetryingPublisher<P> {
    async fn publish(&self, event: &JobStatusEvent) -> Result<()> {
        let mut last = String::new();
        for attempt in 0..self.max_attempts {
            match self.inner.publish(event).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    last = e.to_string();
                    warn!(
                        job_id = %event.job_id,
                        attempt = attempt + 1,
                        error = %last,
                        "event publish failed — backing off"
                    );
                    if attempt + 1 < self.max_attempts {
                        sleep(self.base_delay * 2u32.saturating_pow(attempt)).await;
                    }
                }
            }
        }
        Err(MessagingError::RetriesExhausted {
            attempts: self.max_attempts,
            last,
        })
    }
}

/// Drain the scheduler's status-event channel through `publisher` until the
/// channel closes or `shutdown` broadcasts `true`.
pub async fn run_publisher(
    mut events: mpsc::Receiver<JobStatusEvent>,
    publisher: Arc<dyn EventPublisher>,
    mut shutdown: watch::Receiver<bool>,
) {
    info!("status event publisher started");
    loop {
        tokio::select! {
            event = events.recv() => {
                match event {
                    Some(event) => {
                        debug!(job_id = %event.job_id, status = %event.status, "publishing status event");
                        if let Err(e) = publisher.publish(&event).await {
                            error!(job_id = %event.job_id, "status event dropped: {e}");
                        }
                    }
                    None => break,
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    info!("status event publisher stopped");
}
