//! `chronod-scheduler` — durable timer engine with SQLite persistence.
//!
//! # Overview
//!
//! Jobs are persisted through the [`repository::JobRepository`] contract
//! (SQLite reference backend included). The [`engine::SchedulerEngine`]
//! arms one in-process timer per due job, fires it through the delegate
//! executor, and applies the success/retry policy; a polling reload cycle
//! re-arms anything persisted but not held locally, which is what survives
//! restarts and leader changes.
//!
//! # Job state machine
//!
//! ```text
//! CREATED → SCHEDULED ⇄ RETRY → { COMPLETE | ERROR | CANCELED }
//! ```
//!
//! Terminal states are never re-armed.

pub mod db;
pub mod engine;
pub mod error;
pub mod repository;

pub use engine::{SchedulerEngine, SchedulerHandle};
pub use error::{Result, SchedulerError};
pub use repository::{JobRepository, SortField, SortTerm, SqliteJobRepository};
