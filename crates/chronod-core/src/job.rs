use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::trigger::Trigger;

/// Lifecycle state of a job.
///
/// `Error`, `Complete`, and `Canceled` are terminal: a job in one of those
/// states is never re-armed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting for its next fire time.
    Scheduled,
    /// A fire is in flight right now.
    Executing,
    /// The last delivery failed; a retry is armed.
    Retry,
    /// Retries exhausted — terminal.
    Error,
    /// Trigger exhausted after successful delivery — terminal.
    Complete,
    /// Canceled by a caller — terminal.
    Canceled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Error | JobStatus::Complete | JobStatus::Canceled)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Scheduled => "scheduled",
            JobStatus::Executing => "executing",
            JobStatus::Retry => "retry",
            JobStatus::Error => "error",
            JobStatus::Complete => "complete",
            JobStatus::Canceled => "canceled",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "scheduled" => Ok(JobStatus::Scheduled),
            "executing" => Ok(JobStatus::Executing),
            "retry" => Ok(JobStatus::Retry),
            "error" => Ok(JobStatus::Error),
            "complete" => Ok(JobStatus::Complete),
            "canceled" => Ok(JobStatus::Canceled),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

/// Delivery kinds the executor registry can resolve. Closed set by design.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecipientKind {
    Http,
    Sink,
}

impl std::fmt::Display for RecipientKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecipientKind::Http => write!(f, "http"),
            RecipientKind::Sink => write!(f, "sink"),
        }
    }
}

/// How a sink recipient wants the job event encoded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentMode {
    /// Single JSON envelope carrying payload and metadata together.
    #[default]
    Structured,
    /// Payload as the raw body, metadata in `ce-*` headers.
    Binary,
}

/// What to call when the job fires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Recipient {
    /// Plain HTTP callback.
    Http {
        url: String,
        #[serde(default = "default_method")]
        method: String,
        #[serde(default)]
        headers: HashMap<String, String>,
        #[serde(default)]
        payload: Option<serde_json::Value>,
    },

    /// Event-sink callback (CloudEvents-style endpoint).
    Sink {
        sink_url: String,
        #[serde(default)]
        content_mode: ContentMode,
        #[serde(default)]
        payload: Option<serde_json::Value>,
    },
}

fn default_method() -> String {
    "POST".to_string()
}

impl Recipient {
    pub fn kind(&self) -> RecipientKind {
        match self {
            Recipient::Http { .. } => RecipientKind::Http,
            Recipient::Sink { .. } => RecipientKind::Sink,
        }
    }

    /// Creation-time validation: the target URL must be well-formed and the
    /// HTTP method one we can actually send.
    pub fn validate(&self) -> Result<()> {
        match self {
            Recipient::Http { url, method, .. } => {
                url::Url::parse(url)
                    .map_err(|e| CoreError::Validation(format!("invalid recipient url {url:?}: {e}")))?;
                match method.to_ascii_uppercase().as_str() {
                    "GET" | "POST" | "PUT" | "PATCH" | "DELETE" => Ok(()),
                    other => Err(CoreError::Validation(format!(
                        "unsupported recipient method: {other}"
                    ))),
                }
            }
            Recipient::Sink { sink_url, .. } => {
                url::Url::parse(sink_url).map_err(|e| {
                    CoreError::Validation(format!("invalid sink url {sink_url:?}: {e}"))
                })?;
                Ok(())
            }
        }
    }
}

/// The durable record of a schedulable unit.
///
/// The repository is the source of truth for every field; the scheduler
/// keeps only `id`, trigger state, and the timer handle in memory.
/// `scheduled_id` identifies the in-process timer registration and is
/// transient per instance — reassigned whenever a reload re-arms the job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobDetails {
    pub id: String,
    /// Groups related jobs (e.g. retries of the same logical job).
    pub correlation_id: String,
    pub trigger: Trigger,
    pub recipient: Recipient,
    pub status: JobStatus,
    /// Tie-break for ranged queries only.
    pub priority: i32,
    /// Remaining allowed retry count.
    pub retries: u32,
    /// Delivery attempts made so far. Only ever increases.
    pub execution_counter: u32,
    /// In-process timer registration id, if armed on some instance.
    pub scheduled_id: Option<String>,
    /// Next planned fire instant, if any. Denormalised from the trigger so
    /// ranged repository queries can select on it.
    pub next_fire: Option<DateTime<Utc>>,
    pub created: DateTime<Utc>,
    pub last_update: DateTime<Utc>,
}

/// Inbound create payload (REST body or `CreateJob` lifecycle event).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateJobRequest {
    /// Caller-assigned id; generated when absent.
    #[serde(default)]
    pub id: Option<String>,
    /// Defaults to the job id when absent.
    #[serde(default)]
    pub correlation_id: Option<String>,
    pub trigger: Trigger,
    pub recipient: Recipient,
    #[serde(default)]
    pub priority: i32,
    /// Remaining retry budget; defaults to the scheduler's policy.
    #[serde(default)]
    pub retries: Option<u32>,
}

/// Partial update applied by `merge`.
///
/// Only trigger/schedule-affecting fields may be merged. The forbidden
/// fields are still deserialised so a request naming them is rejected with
/// a validation error instead of being silently ignored.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobPatch {
    #[serde(default)]
    pub trigger: Option<Trigger>,
    #[serde(default)]
    pub recipient: Option<Recipient>,
    #[serde(default)]
    pub priority: Option<i32>,

    // Forbidden merge targets.
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub correlation_id: Option<String>,
    #[serde(default)]
    pub status: Option<JobStatus>,
    #[serde(default)]
    pub retries: Option<u32>,
    #[serde(default)]
    pub execution_counter: Option<u32>,
}

impl JobPatch {
    /// Reject patches that name identity, counter, or status fields, and
    /// empty patches that would merge nothing.
    pub fn validate(&self) -> Result<()> {
        let mut forbidden = Vec::new();
        if self.id.is_some() {
            forbidden.push("id");
        }
        if self.correlation_id.is_some() {
            forbidden.push("correlation_id");
        }
        if self.status.is_some() {
            forbidden.push("status");
        }
        if self.retries.is_some() {
            forbidden.push("retries");
        }
        if self.execution_counter.is_some() {
            forbidden.push("execution_counter");
        }
        if !forbidden.is_empty() {
            return Err(CoreError::Validation(format!(
                "fields not allowed in merge: {}",
                forbidden.join(", ")
            )));
        }
        if self.trigger.is_none() && self.recipient.is_none() && self.priority.is_none() {
            return Err(CoreError::Validation("empty merge".into()));
        }
        if let Some(trigger) = &self.trigger {
            trigger.validate()?;
        }
        if let Some(recipient) = &self.recipient {
            recipient.validate()?;
        }
        Ok(())
    }
}

/// Kind of outbound status notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusEventKind {
    Success,
    Error,
    StatusChange,
}

/// Outbound notification published after every persisted transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatusEvent {
    pub kind: StatusEventKind,
    pub job_id: String,
    pub correlation_id: String,
    pub status: JobStatus,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub message: Option<String>,
}

impl JobStatusEvent {
    pub fn of(kind: StatusEventKind, job: &JobDetails, message: Option<String>) -> Self {
        Self {
            kind,
            job_id: job.id.clone(),
            correlation_id: job.correlation_id.clone(),
            status: job.status,
            timestamp: Utc::now(),
            message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patch_with_status_is_rejected() {
        let patch = JobPatch {
            status: Some(JobStatus::Complete),
            priority: Some(1),
            ..Default::default()
        };
        let err = patch.validate().unwrap_err();
        assert!(err.to_string().contains("status"));
    }

    #[test]
    fn empty_patch_is_rejected() {
        assert!(JobPatch::default().validate().is_err());
    }

    #[test]
    fn patch_with_allowed_fields_passes() {
        let patch = JobPatch {
            priority: Some(5),
            ..Default::default()
        };
        assert!(patch.validate().is_ok());
    }

    #[test]
    fn recipient_urls_are_validated() {
        let bad = Recipient::Http {
            url: "not a url".into(),
            method: "POST".into(),
            headers: HashMap::new(),
            payload: None,
        };
        assert!(bad.validate().is_err());

        let good = Recipient::Sink {
            sink_url: "http://sink.local/events".into(),
            content_mode: ContentMode::Structured,
            payload: None,
        };
        assert!(good.validate().is_ok());
        assert_eq!(good.kind(), RecipientKind::Sink);
    }
}
