//! `chronod-messaging` — lifecycle event consumption and status publishing.
//!
//! The transport itself (Kafka, HTTP bindings, …) is an external
//! collaborator; this crate owns the two adapters around it:
//!
//! * [`lifecycle::LifecycleAdapter`] turns inbound create/cancel events into
//!   scheduler calls, consuming only while this instance is master.
//! * [`publisher`] drains the scheduler's status-event channel into an
//!   [`publisher::EventPublisher`], retrying transient failures with bounded
//!   attempts.

pub mod error;
pub mod lifecycle;
pub mod publisher;

pub use error::{MessagingError, Result};
pub use lifecycle::{JobLifecycleEvent, LifecycleAdapter};
pub use publisher::{run_publisher, EventPublisher, LogPublisher, RetryingPublisher};
