//! `chronod-core` — shared value types and configuration for the chronod
//! job service.
//!
//! # Overview
//!
//! Everything the other crates agree on lives here: the [`job::JobDetails`]
//! record and its lifecycle [`job::JobStatus`], the [`trigger::Trigger`]
//! fire-time arithmetic, the [`job::Recipient`] delivery target union, and
//! the figment-backed [`config::ChronodConfig`].
//!
//! # Trigger variants
//!
//! | Variant       | Behaviour                                               |
//! |---------------|---------------------------------------------------------|
//! | `PointInTime` | Single fire at an absolute UTC instant                  |
//! | `Interval`    | Repeat every N milliseconds, bounded by end/repeat limit|
//! | `Cron`        | Cron expression occurrences, bounded by end/repeat limit|

pub mod config;
pub mod error;
pub mod job;
pub mod trigger;

pub use error::{CoreError, Result};
pub use job::{
    ContentMode, CreateJobRequest, JobDetails, JobPatch, JobStatus, JobStatusEvent, Recipient,
    RecipientKind, StatusEventKind,
};
pub use trigger::{OverduePolicy, Trigger};
