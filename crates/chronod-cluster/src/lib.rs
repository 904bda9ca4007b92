//! `chronod-cluster` — leader election over a shared heartbeat record.
//!
//! In a multi-instance deployment exactly one instance may fire jobs and
//! consume new-job messages. The [`coordinator::ClusterCoordinator`] decides
//! which: it claims or renews the singleton heartbeat row with an atomic
//! compare-and-swap UPDATE, and exposes mastership as a `watch` channel the
//! scheduler, gatekeeper, and messaging adapter observe. Losing a renewal
//! race demotes the instance; in-flight fires finish, new arming stops.

pub mod coordinator;
pub mod db;
pub mod error;

pub use coordinator::{ClusterCoordinator, LeaderInfo};
pub use error::{ClusterError, Result};
