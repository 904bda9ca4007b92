use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use chronod_core::config::ClusterConfig;
use rusqlite::Connection;
use tokio::sync::watch;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::db::init_db;
use crate::error::{ClusterError, Result};

/// Snapshot of the shared heartbeat record.
#[derive(Debug, Clone, PartialEq)]
pub struct LeaderInfo {
    pub holder: Option<String>,
    pub term: i64,
    pub last_heartbeat: DateTime<Utc>,
}

/// Single-writer leadership over the shared heartbeat row.
///
/// Every `heartbeat_interval` the coordinator performs one atomic
/// get-and-update: a conditional UPDATE that either renews its own claim
/// (same term) or takes over an unclaimed/stale row (term + 1). The
/// affected-row count decides mastership — zero rows means another instance
/// holds a fresh claim and this one is (or stays) demoted. This row is the
/// only cross-instance mutual-exclusion mechanism in the service.
pub struct ClusterCoordinator {
    conn: Mutex<Connection>,
    instance_id: String,
    heartbeat_interval: Duration,
    heartbeat_timeout: chrono::Duration,
    master_tx: watch::Sender<bool>,
}

impl ClusterCoordinator {
    /// Wrap a connection, initialising the schema and seeding the heartbeat
    /// row if this is the first boot of any instance.
    pub fn new(conn: Connection, cfg: &ClusterConfig) -> Result<Self> {
        // Peers heartbeat through their own connections to the same row;
        // wait out short write locks instead of failing the tick.
        conn.busy_timeout(Duration::from_secs(5))?;
        init_db(&conn)?;
        let instance_id = cfg
            .instance_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let (master_tx, _) = watch::channel(false);
        Ok(Self {
            conn: Mutex::new(conn),
            instance_id,
            heartbeat_interval: Duration::from_millis(cfg.heartbeat_interval_ms),
            heartbeat_timeout: chrono::Duration::milliseconds(cfg.heartbeat_timeout_ms as i64),
            master_tx,
        })
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Whether this instance currently holds leadership. The gatekeeper and
    /// the messaging adapter poll this; the scheduler subscribes instead.
    pub fn is_master(&self) -> bool {
        *self.master_tx.borrow()
    }

    /// Watch mastership transitions (promotion = `true`, demotion = `false`).
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.master_tx.subscribe()
    }

    /// Read the current heartbeat record.
    pub fn leader_info(&self) -> Result<LeaderInfo> {
        let conn = self.conn.lock().unwrap();
        let (holder, term, heartbeat): (Option<String>, i64, String) = conn.query_row(
            "SELECT holder, term, last_heartbeat FROM cluster_leader WHERE id = 0",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;
        let last_heartbeat = DateTime::parse_from_rfc3339(&heartbeat)
            .map_err(|e| ClusterError::Heartbeat(format!("bad heartbeat timestamp: {e}")))?
            .with_timezone(&Utc);
        Ok(LeaderInfo {
            holder,
            term,
            last_heartbeat,
        })
    }

    /// One claim-or-renew attempt. Returns the resulting mastership.
    ///
    /// The UPDATE only matches when we already hold the row, the row is
    /// unclaimed, or the previous holder's heartbeat went stale; the term
    /// bumps exactly when the holder changes, so two racing claimants can
    /// never both see a row they may write.
    pub fn try_acquire_or_renew(&self) -> Result<bool> {
        let now = Utc::now();
        let stale_before = now - self.heartbeat_timeout;

        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE cluster_leader
             SET holder = ?1,
                 last_heartbeat = ?2,
                 term = CASE WHEN holder = ?1 THEN term ELSE term + 1 END
             WHERE id = 0
               AND (holder = ?1 OR holder IS NULL OR last_heartbeat < ?3)",
            rusqlite::params![self.instance_id, now.to_rfc3339(), stale_before.to_rfc3339()],
        )?;
        Ok(changed > 0)
    }

    /// Apply one heartbeat tick's outcome to the local mastership flag,
    /// logging promotions and demotions.
    fn apply(&self, master_now: bool) {
        let was_master = self.is_master();
        if master_now != was_master {
            if master_now {
                info!(instance = %self.instance_id, "promoted to master");
            } else {
                warn!(instance = %self.instance_id, "demoted — another instance leads");
            }
        }
        // send_if_modified keeps subscribers from waking on every renewal.
        self.master_tx.send_if_modified(|current| {
            let changed = *current != master_now;
            *current = master_now;
            changed
        });
    }

    /// Heartbeat loop: claim or renew on a fixed cadence strictly shorter
    /// than the staleness timeout. Any storage error demotes immediately —
    /// an instance that cannot prove its claim must stop firing.
    pub async fn run(self: std::sync::Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(instance = %self.instance_id, "cluster coordinator started");
        let mut interval = tokio::time::interval(self.heartbeat_interval);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.try_acquire_or_renew() {
                        Ok(master) => self.apply(master),
                        Err(e) => {
                            error!("heartbeat update failed: {e}");
                            self.apply(false);
                        }
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("cluster coordinator shutting down");
                        break;
                    }
                }
            }
        }
        // Release the claim so a peer can take over without waiting for the
        // staleness timeout. Best-effort only.
        if self.is_master() {
            let conn = self.conn.lock().unwrap();
            let released = conn.execute(
                "UPDATE cluster_leader SET holder = NULL WHERE id = 0 AND holder = ?1",
                [&self.instance_id],
            );
            if let Err(e) = released {
                warn!("failed to release leadership on shutdown: {e}");
            }
        }
        self.apply(false);
    }
}
