use std::str::FromStr;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use chronod_core::{JobDetails, JobPatch, JobStatus, Recipient, Trigger};
use rusqlite::types::Value;
use rusqlite::Connection;

use crate::db::init_db;
use crate::error::{Result, SchedulerError};

/// Columns a ranged query may sort on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortField {
    FireTime,
    Created,
    Id,
}

/// One ORDER BY term.
#[derive(Debug, Clone, Copy)]
pub struct SortTerm {
    pub field: SortField,
    pub ascending: bool,
}

impl SortTerm {
    pub fn asc(field: SortField) -> Self {
        Self {
            field,
            ascending: true,
        }
    }

    pub fn desc(field: SortField) -> Self {
        Self {
            field,
            ascending: false,
        }
    }

    fn to_sql(self) -> String {
        let column = match self.field {
            SortField::FireTime => "next_fire",
            SortField::Created => "created_at",
            SortField::Id => "id",
        };
        let direction = if self.ascending { "ASC" } else { "DESC" };
        format!("{column} {direction}")
    }
}

/// Persistence contract for job records.
///
/// Every storage backend must implement these operations identically; the
/// scheduler and gateway only ever see this trait. `transition` is the
/// per-id compare-and-swap on `status` that serialises the cancel and
/// fire-and-reschedule paths against each other.
pub trait JobRepository: Send + Sync {
    /// Insert a new job record. An existing id yields `AlreadyExists`; the
    /// uniqueness check and the insert are one atomic operation, so two
    /// concurrent creates for the same id cannot both succeed.
    fn create(&self, job: &JobDetails) -> Result<()>;

    /// Insert or fully replace a job record.
    fn save(&self, job: &JobDetails) -> Result<()>;

    /// Apply a schedule-affecting partial update. Missing job → `JobNotFound`;
    /// terminal job → `Validation`. The caller validates the patch first.
    fn merge(&self, id: &str, patch: &JobPatch) -> Result<JobDetails>;

    fn get(&self, id: &str) -> Result<Option<JobDetails>>;

    fn exists(&self, id: &str) -> Result<bool>;

    /// Delete and return the job, or `None` if it never existed.
    fn delete(&self, id: &str) -> Result<Option<JobDetails>>;

    /// Jobs whose `next_fire` lies in `[from, to]` with one of `statuses`,
    /// ordered by the given terms (priority descending as final tie-break).
    fn find_by_status_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        statuses: &[JobStatus],
        sort: &[SortTerm],
    ) -> Result<Vec<JobDetails>>;

    /// Write `job` only if the stored status is one of `expected`.
    /// Returns `false` when the guard fails (someone else transitioned it).
    fn transition(&self, id: &str, expected: &[JobStatus], job: &JobDetails) -> Result<bool>;
}

/// Reference backend: a single SQLite connection behind a `Mutex`.
pub struct SqliteJobRepository {
    conn: Mutex<Connection>,
}

impl SqliteJobRepository {
    /// Wrap a connection, initialising the schema if needed.
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

const JOB_COLUMNS: &str = "id, correlation_id, trigger_spec, recipient_spec, status, priority, \
                           retries, execution_counter, scheduled_id, next_fire, created_at, updated_at";

impl JobRepository for SqliteJobRepository {
    fn create(&self, job: &JobDetails) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let inserted = conn.execute(
            "INSERT INTO jobs
             (id, correlation_id, trigger_spec, recipient_spec, status, priority,
              retries, execution_counter, scheduled_id, next_fire, created_at, updated_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12)",
            rusqlite::params![
                job.id,
                job.correlation_id,
                serde_json::to_string(&job.trigger)?,
                serde_json::to_string(&job.recipient)?,
                job.status.to_string(),
                job.priority,
                job.retries,
                job.execution_counter,
                job.scheduled_id,
                job.next_fire.map(|dt| dt.to_rfc3339()),
                job.created.to_rfc3339(),
                job.last_update.to_rfc3339(),
            ],
        );
        match inserted {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(SchedulerError::AlreadyExists {
                    id: job.id.clone(),
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, job: &JobDetails) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO jobs
             (id, correlation_id, trigger_spec, recipient_spec, status, priority,
              retries, execution_counter, scheduled_id, next_fire, created_at, updated_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12)
             ON CONFLICT(id) DO UPDATE SET
                correlation_id = excluded.correlation_id,
                trigger_spec = excluded.trigger_spec,
                recipient_spec = excluded.recipient_spec,
                status = excluded.status,
                priority = excluded.priority,
                retries = excluded.retries,
                execution_counter = excluded.execution_counter,
                scheduled_id = excluded.scheduled_id,
                next_fire = excluded.next_fire,
                updated_at = excluded.updated_at",
            rusqlite::params![
                job.id,
                job.correlation_id,
                serde_json::to_string(&job.trigger)?,
                serde_json::to_string(&job.recipient)?,
                job.status.to_string(),
                job.priority,
                job.retries,
                job.execution_counter,
                job.scheduled_id,
                job.next_fire.map(|dt| dt.to_rfc3339()),
                job.created.to_rfc3339(),
                job.last_update.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn merge(&self, id: &str, patch: &JobPatch) -> Result<JobDetails> {
        let conn = self.conn.lock().unwrap();
        let mut job = match query_job(&conn, id)? {
            Some(job) => job,
            None => return Err(SchedulerError::JobNotFound { id: id.to_string() }),
        };
        if job.status.is_terminal() {
            return Err(SchedulerError::Validation(format!(
                "cannot merge terminal job {id} (status {})",
                job.status
            )));
        }

        if let Some(trigger) = &patch.trigger {
            job.trigger = trigger.clone();
        }
        if let Some(recipient) = &patch.recipient {
            job.recipient = recipient.clone();
        }
        if let Some(priority) = patch.priority {
            job.priority = priority;
        }
        job.last_update = Utc::now();

        conn.execute(
            "UPDATE jobs SET trigger_spec = ?1, recipient_spec = ?2, priority = ?3, updated_at = ?4
             WHERE id = ?5",
            rusqlite::params![
                serde_json::to_string(&job.trigger)?,
                serde_json::to_string(&job.recipient)?,
                job.priority,
                job.last_update.to_rfc3339(),
                id,
            ],
        )?;
        Ok(job)
    }

    fn get(&self, id: &str) -> Result<Option<JobDetails>> {
        let conn = self.conn.lock().unwrap();
        query_job(&conn, id)
    }

    fn exists(&self, id: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let found = conn
            .query_row("SELECT 1 FROM jobs WHERE id = ?1", [id], |_| Ok(()))
            .map(|_| true);
        match found {
            Ok(v) => Ok(v),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn delete(&self, id: &str) -> Result<Option<JobDetails>> {
        let conn = self.conn.lock().unwrap();
        let job = query_job(&conn, id)?;
        if job.is_some() {
            conn.execute("DELETE FROM jobs WHERE id = ?1", [id])?;
        }
        Ok(job)
    }

    fn find_by_status_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        statuses: &[JobStatus],
        sort: &[SortTerm],
    ) -> Result<Vec<JobDetails>> {
        if statuses.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = (3..3 + statuses.len())
            .map(|n| format!("?{n}"))
            .collect::<Vec<_>>()
            .join(",");
        let mut order_terms: Vec<String> = sort.iter().map(|t| t.to_sql()).collect();
        // Priority only ever breaks ties between otherwise-equal rows.
        order_terms.push("priority DESC".to_string());

        let sql = format!(
            "SELECT {JOB_COLUMNS} FROM jobs
             WHERE next_fire IS NOT NULL AND next_fire >= ?1 AND next_fire <= ?2
               AND status IN ({placeholders})
             ORDER BY {}",
            order_terms.join(", ")
        );

        let mut params: Vec<String> = vec![from.to_rfc3339(), to.to_rfc3339()];
        params.extend(statuses.iter().map(|s| s.to_string()));

        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&sql)?;
        let jobs = stmt
            .query_map(rusqlite::params_from_iter(params), row_to_job)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(jobs)
    }

    fn transition(&self, id: &str, expected: &[JobStatus], job: &JobDetails) -> Result<bool> {
        if expected.is_empty() {
            return Ok(false);
        }
        let placeholders = (11..11 + expected.len())
            .map(|n| format!("?{n}"))
            .collect::<Vec<_>>()
            .join(",");
        let sql = format!(
            "UPDATE jobs SET trigger_spec = ?2, recipient_spec = ?3, status = ?4, priority = ?5,
                retries = ?6, execution_counter = ?7, scheduled_id = ?8, next_fire = ?9,
                updated_at = ?10
             WHERE id = ?1 AND status IN ({placeholders})"
        );

        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&sql)?;
        let mut params: Vec<Value> = vec![
            Value::Text(id.to_string()),
            Value::Text(serde_json::to_string(&job.trigger)?),
            Value::Text(serde_json::to_string(&job.recipient)?),
            Value::Text(job.status.to_string()),
            Value::Integer(job.priority as i64),
            Value::Integer(job.retries as i64),
            Value::Integer(job.execution_counter as i64),
            job.scheduled_id
                .clone()
                .map(Value::Text)
                .unwrap_or(Value::Null),
            job.next_fire
                .map(|dt| Value::Text(dt.to_rfc3339()))
                .unwrap_or(Value::Null),
            Value::Text(job.last_update.to_rfc3339()),
        ];
        params.extend(expected.iter().map(|s| Value::Text(s.to_string())));

        let changed = stmt.execute(rusqlite::params_from_iter(params))?;
        Ok(changed > 0)
    }
}

fn query_job(conn: &Connection, id: &str) -> Result<Option<JobDetails>> {
    let result = conn.query_row(
        &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1"),
        [id],
        row_to_job,
    );
    match result {
        Ok(job) => Ok(Some(job)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn row_to_job(row: &rusqlite::Row<'_>) -> rusqlite::Result<JobDetails> {
    let trigger_json: String = row.get(2)?;
    let recipient_json: String = row.get(3)?;
    let status_str: String = row.get(4)?;
    let next_fire: Option<String> = row.get(9)?;
    let created: String = row.get(10)?;
    let updated: String = row.get(11)?;

    let trigger: Trigger = serde_json::from_str(&trigger_json).map_err(|e| bad_column(2, e))?;
    let recipient: Recipient =
        serde_json::from_str(&recipient_json).map_err(|e| bad_column(3, e))?;
    let status = JobStatus::from_str(&status_str)
        .map_err(|e| bad_column(4, std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;

    Ok(JobDetails {
        id: row.get(0)?,
        correlation_id: row.get(1)?,
        trigger,
        recipient,
        status,
        priority: row.get(5)?,
        retries: row.get(6)?,
        execution_counter: row.get(7)?,
        scheduled_id: row.get(8)?,
        next_fire: next_fire
            .map(|s| parse_rfc3339(&s, 9))
            .transpose()?,
        created: parse_rfc3339(&created, 10)?,
        last_update: parse_rfc3339(&updated, 11)?,
    })
}

fn parse_rfc3339(s: &str, column: usize) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| bad_column(column, e))
}

fn bad_column<E>(index: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(index, rusqlite::types::Type::Text, Box::new(err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use chronod_core::Recipient;
    use std::collections::HashMap;

    fn repo() -> SqliteJobRepository {
        SqliteJobRepository::new(Connection::open_in_memory().unwrap()).unwrap()
    }

    fn job(id: &str, next_fire_in_secs: i64) -> JobDetails {
        let now = Utc::now();
        JobDetails {
            id: id.to_string(),
            correlation_id: format!("corr-{id}"),
            trigger: Trigger::PointInTime {
                fire_time: now + Duration::seconds(next_fire_in_secs),
                fired_count: 0,
            },
            recipient: Recipient::Http {
                url: "http://localhost:8080/cb".into(),
                method: "POST".into(),
                headers: HashMap::new(),
                payload: None,
            },
            status: JobStatus::Scheduled,
            priority: 0,
            retries: 3,
            execution_counter: 0,
            scheduled_id: None,
            next_fire: Some(now + Duration::seconds(next_fire_in_secs)),
            created: now,
            last_update: now,
        }
    }

    #[test]
    fn save_get_delete_roundtrip() {
        let repo = repo();
        let job = job("a", 60);
        repo.save(&job).unwrap();

        assert!(repo.exists("a").unwrap());
        let loaded = repo.get("a").unwrap().unwrap();
        assert_eq!(loaded.id, "a");
        assert_eq!(loaded.status, JobStatus::Scheduled);
        assert_eq!(loaded.trigger, job.trigger);

        let deleted = repo.delete("a").unwrap().unwrap();
        assert_eq!(deleted.id, "a");
        assert!(repo.get("a").unwrap().is_none());
        assert!(repo.delete("a").unwrap().is_none());
    }

    #[test]
    fn create_rejects_duplicate_id_atomically() {
        let repo = repo();
        let original = job("dup", 60);
        repo.create(&original).unwrap();

        let mut second = job("dup", 120);
        second.priority = 9;
        match repo.create(&second) {
            Err(SchedulerError::AlreadyExists { id }) => assert_eq!(id, "dup"),
            other => panic!("expected AlreadyExists, got {other:?}"),
        }

        // The losing insert must not have touched the stored row.
        let stored = repo.get("dup").unwrap().unwrap();
        assert_eq!(stored.priority, original.priority);
        assert_eq!(stored.next_fire, original.next_fire);
    }

    #[test]
    fn merge_updates_only_schedule_fields() {
        let repo = repo();
        let original = job("m", 60);
        repo.save(&original).unwrap();

        let new_trigger = Trigger::Interval {
            start_time: Utc::now(),
            end_time: None,
            repeat_limit: Some(5),
            interval_ms: 2_000,
            fired_count: 0,
            last_fire: None,
        };
        let patch = JobPatch {
            trigger: Some(new_trigger.clone()),
            priority: Some(7),
            ..Default::default()
        };

        let merged = repo.merge("m", &patch).unwrap();
        assert_eq!(merged.trigger, new_trigger);
        assert_eq!(merged.priority, 7);
        assert_eq!(merged.status, JobStatus::Scheduled);
        assert_eq!(merged.execution_counter, original.execution_counter);
    }

    #[test]
    fn merge_on_terminal_job_is_rejected() {
        let repo = repo();
        let mut canceled = job("t", 60);
        canceled.status = JobStatus::Canceled;
        repo.save(&canceled).unwrap();

        let patch = JobPatch {
            priority: Some(1),
            ..Default::default()
        };
        match repo.merge("t", &patch) {
            Err(SchedulerError::Validation(_)) => {}
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn merge_missing_job_is_not_found() {
        let repo = repo();
        let patch = JobPatch {
            priority: Some(1),
            ..Default::default()
        };
        match repo.merge("ghost", &patch) {
            Err(SchedulerError::JobNotFound { id }) => assert_eq!(id, "ghost"),
            other => panic!("expected not-found, got {other:?}"),
        }
    }

    #[test]
    fn ranged_query_filters_and_sorts() {
        let repo = repo();
        repo.save(&job("late", 120)).unwrap();
        repo.save(&job("early", 10)).unwrap();
        let mut done = job("done", 30);
        done.status = JobStatus::Complete;
        repo.save(&done).unwrap();
        repo.save(&job("outside", 3_600)).unwrap();

        let now = Utc::now();
        let due = repo
            .find_by_status_between(
                now - Duration::seconds(1),
                now + Duration::seconds(300),
                &[JobStatus::Scheduled, JobStatus::Retry],
                &[SortTerm::asc(SortField::FireTime)],
            )
            .unwrap();

        let ids: Vec<_> = due.iter().map(|j| j.id.as_str()).collect();
        assert_eq!(ids, vec!["early", "late"]);

        let reversed = repo
            .find_by_status_between(
                now - Duration::seconds(1),
                now + Duration::seconds(300),
                &[JobStatus::Scheduled],
                &[SortTerm::desc(SortField::FireTime)],
            )
            .unwrap();
        let ids: Vec<_> = reversed.iter().map(|j| j.id.as_str()).collect();
        assert_eq!(ids, vec!["late", "early"]);
    }

    #[test]
    fn priority_breaks_fire_time_ties() {
        let repo = repo();
        let now = Utc::now();
        let fire = now + Duration::seconds(30);
        for (id, priority) in [("low", 1), ("high", 9)] {
            let mut j = job(id, 30);
            j.next_fire = Some(fire);
            j.priority = priority;
            repo.save(&j).unwrap();
        }

        let due = repo
            .find_by_status_between(
                now,
                now + Duration::seconds(60),
                &[JobStatus::Scheduled],
                &[SortTerm::asc(SortField::FireTime)],
            )
            .unwrap();
        let ids: Vec<_> = due.iter().map(|j| j.id.as_str()).collect();
        assert_eq!(ids, vec!["high", "low"]);
    }

    #[test]
    fn transition_is_guarded_by_expected_status() {
        let repo = repo();
        let mut j = job("cas", 60);
        repo.save(&j).unwrap();

        j.status = JobStatus::Executing;
        j.execution_counter = 1;
        assert!(repo
            .transition("cas", &[JobStatus::Scheduled, JobStatus::Retry], &j)
            .unwrap());

        // Second writer expecting Scheduled loses the race.
        let mut stale = j.clone();
        stale.status = JobStatus::Canceled;
        assert!(!repo
            .transition("cas", &[JobStatus::Scheduled], &stale)
            .unwrap());

        let stored = repo.get("cas").unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Executing);
        assert_eq!(stored.execution_counter, 1);
    }
}
