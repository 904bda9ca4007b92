use chronod_core::CreateJobRequest;
use chronod_scheduler::{SchedulerError, SchedulerHandle};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Inbound job lifecycle events, as delivered by the external transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobLifecycleEvent {
    CreateJob(CreateJobRequest),
    DeleteJob { lookup_id: String },
}

/// Converts inbound create/cancel events into scheduler calls.
///
/// Consumption is gated on mastership: a demoted instance parks on the
/// watch channel and leaves queued events for the leader. Validation errors
/// and not-found outcomes are logged and acknowledged — a bad message must
/// never wedge the stream.
pub struct LifecycleAdapter {
    scheduler: SchedulerHandle,
    master_rx: watch::Receiver<bool>,
}

impl LifecycleAdapter {
    pub fn new(scheduler: SchedulerHandle, master_rx: watch::Receiver<bool>) -> Self {
        Self {
            scheduler,
            master_rx,
        }
    }

    pub async fn run(
        mut self,
        mut events: mpsc::Receiver<JobLifecycleEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!("lifecycle adapter started");
        loop {
            // Pause while not master. wait_for also covers the initial state.
            tokio::select! {
                master = self.master_rx.wait_for(|m| *m) => {
                    if master.is_err() {
                        break;
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }

            tokio::select! {
                event = events.recv() => {
                    match event {
                        Some(event) => self.handle(event),
                        None => break,
                    }
                }
                _ = self.master_rx.changed() => {
                    // Demoted (or re-confirmed); loop back to the gate.
                    continue;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("lifecycle adapter stopped");
    }

    fn handle(&self, event: JobLifecycleEvent) {
        match event {
            JobLifecycleEvent::CreateJob(request) => {
                let id = request.id.clone();
                match self.scheduler.schedule(request) {
                    Ok(job) => debug!(job_id = %job.id, "job created from lifecycle event"),
                    Err(SchedulerError::AlreadyExists { id }) => {
                        // Redelivery of an already-applied create: ack quietly.
                        debug!(job_id = %id, "create ignored — job already exists");
                    }
                    Err(e) => warn!(job_id = ?id, error = %e, "create event rejected"),
                }
            }
            JobLifecycleEvent::DeleteJob { lookup_id } => {
                match self.scheduler.cancel(&lookup_id) {
                    Ok(job) => debug!(job_id = %job.id, "job canceled from lifecycle event"),
                    Err(SchedulerError::JobNotFound { id }) => {
                        // Missing or already terminal: acknowledged, not an error.
                        debug!(job_id = %id, "cancel ignored — job not found");
                    }
                    Err(e) => warn!(job_id = %lookup_id, error = %e, "cancel event failed"),
                }
            }
        }
    }
}
