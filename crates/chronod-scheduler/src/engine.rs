use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use chronod_core::config::SchedulerConfig;
use chronod_core::{
    CreateJobRequest, JobDetails, JobPatch, JobStatus, JobStatusEvent, StatusEventKind,
};
use chronod_executor::{DelegateExecutor, ExecutionOutcome};
use dashmap::DashMap;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{Result, SchedulerError};
use crate::repository::{JobRepository, SortField, SortTerm};

/// Capacity of the outbound status-event channel.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Floor for timer delays: a computed fire time in the past is armed with
/// this delay instead of zero, so overdue work fires as soon as possible
/// without immediate double-fires.
const MIN_FIRE_DELAY: Duration = Duration::from_millis(1);

/// One armed in-process timer. `scheduled_id` ties the arena entry to the
/// persisted job so a stale timer (job re-armed or canceled since) can tell
/// it no longer owns the fire.
struct TimerEntry {
    scheduled_id: String,
    handle: tokio::task::JoinHandle<()>,
}

struct EngineInner {
    repo: Arc<dyn JobRepository>,
    delegate: Arc<DelegateExecutor>,
    /// job id → armed timer. At most one entry (and thus one in-flight fire)
    /// per job id; the fire task removes its entry before doing any work.
    timers: DashMap<String, TimerEntry>,
    events_tx: mpsc::Sender<JobStatusEvent>,
    cfg: SchedulerConfig,
    master_rx: watch::Receiver<bool>,
}

/// Drives the reload polling cycle. Obtain one (plus its [`SchedulerHandle`])
/// via [`SchedulerEngine::new`] and hand it to a background task.
pub struct SchedulerEngine {
    inner: Arc<EngineInner>,
}

/// Shared handle for the scheduler's public operations: `schedule`,
/// `cancel`, `reschedule`, `get`. Cheap to clone; safe to call from Axum
/// handlers and the messaging adapter concurrently.
#[derive(Clone)]
pub struct SchedulerHandle {
    inner: Arc<EngineInner>,
}

impl SchedulerEngine {
    /// Build the engine. Returns the engine (for the polling loop), a
    /// management handle, and the receiving end of the status-event channel.
    pub fn new(
        repo: Arc<dyn JobRepository>,
        delegate: Arc<DelegateExecutor>,
        cfg: SchedulerConfig,
        master_rx: watch::Receiver<bool>,
    ) -> (Self, SchedulerHandle, mpsc::Receiver<JobStatusEvent>) {
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let inner = Arc::new(EngineInner {
            repo,
            delegate,
            timers: DashMap::new(),
            events_tx,
            cfg,
            master_rx,
        });
        (
            Self {
                inner: Arc::clone(&inner),
            },
            SchedulerHandle { inner },
            events_rx,
        )
    }

    /// Main polling loop. Reloads due jobs while master; pauses on demotion.
    /// Runs until `shutdown` broadcasts `true`.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!("scheduler engine started");
        let mut master_rx = self.inner.master_rx.clone();
        let mut interval =
            tokio::time::interval(Duration::from_secs(self.inner.cfg.poll_interval_secs));

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if self.inner.is_master() {
                        if let Err(e) = self.inner.reload() {
                            error!("scheduler reload error: {e}");
                        }
                    }
                }
                changed = master_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    if *master_rx.borrow() {
                        info!("promoted to master — resuming job arming");
                        if let Err(e) = self.inner.reload() {
                            error!("scheduler reload error after promotion: {e}");
                        }
                    } else {
                        info!("demoted — disarming pending timers");
                        self.inner.disarm_all();
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("scheduler engine shutting down");
                        break;
                    }
                }
            }
        }
        self.inner.disarm_all();
    }
}

impl SchedulerHandle {
    /// Validate, persist, and arm a new job.
    ///
    /// A trigger with no next fire time makes the job `Complete` immediately
    /// without ever arming a timer. An existing id is rejected.
    pub fn schedule(&self, request: CreateJobRequest) -> Result<JobDetails> {
        self.inner.schedule(request)
    }

    /// Cancel the job: abort the local timer (if this instance owns one) and
    /// mark the persisted record `Canceled`. Missing or already-terminal
    /// jobs yield `JobNotFound` — never a silent success.
    pub fn cancel(&self, id: &str) -> Result<JobDetails> {
        self.inner.cancel(id)
    }

    /// Merge schedule-affecting fields and re-arm.
    pub fn reschedule(&self, id: &str, patch: &JobPatch) -> Result<JobDetails> {
        self.inner.reschedule(id, patch)
    }

    pub fn get(&self, id: &str) -> Result<Option<JobDetails>> {
        self.inner.repo.get(id)
    }
}

impl EngineInner {
    fn is_master(&self) -> bool {
        *self.master_rx.borrow()
    }

    fn schedule(self: &Arc<Self>, request: CreateJobRequest) -> Result<JobDetails> {
        let now = Utc::now();
        let id = match request.id {
            Some(id) if !id.trim().is_empty() => id,
            Some(_) => return Err(SchedulerError::Validation("job id must not be blank".into())),
            None => Uuid::now_v7().to_string(),
        };
        let correlation_id = match request.correlation_id {
            Some(c) if !c.trim().is_empty() => c,
            Some(_) => {
                return Err(SchedulerError::Validation(
                    "correlation id must not be blank".into(),
                ))
            }
            None => id.clone(),
        };
        request.trigger.validate()?;
        request.recipient.validate()?;

        let mut job = JobDetails {
            id,
            correlation_id,
            trigger: request.trigger,
            recipient: request.recipient,
            status: JobStatus::Scheduled,
            priority: request.priority,
            retries: request.retries.unwrap_or(self.cfg.default_retries),
            execution_counter: 0,
            scheduled_id: None,
            next_fire: None,
            created: now,
            last_update: now,
        };

        match job.trigger.next_fire_time(now, self.cfg.overdue_policy) {
            None => {
                job.status = JobStatus::Complete;
                self.repo.create(&job)?;
                info!(job_id = %job.id, "job has no fire time — completed without arming");
                self.publish(
                    StatusEventKind::StatusChange,
                    &job,
                    Some("trigger has no next fire time".into()),
                );
            }
            Some(fire_at) => {
                job.next_fire = Some(fire_at);
                job.scheduled_id = Some(Uuid::new_v4().to_string());
                self.repo.create(&job)?;
                self.arm(&job, fire_at);
                info!(job_id = %job.id, fire_at = %fire_at, "job scheduled");
                self.publish(StatusEventKind::StatusChange, &job, None);
            }
        }
        Ok(job)
    }

    fn cancel(self: &Arc<Self>, id: &str) -> Result<JobDetails> {
        let job = match self.repo.get(id)? {
            Some(job) if !job.status.is_terminal() => job,
            _ => return Err(SchedulerError::JobNotFound { id: id.to_string() }),
        };

        // Best-effort: a fire already in flight is allowed to complete, but
        // its final transition will lose against the Canceled status below.
        if let Some((_, entry)) = self.timers.remove(id) {
            entry.handle.abort();
        }

        let mut canceled = job;
        canceled.status = JobStatus::Canceled;
        canceled.scheduled_id = None;
        canceled.next_fire = None;
        canceled.last_update = Utc::now();

        let live = [JobStatus::Scheduled, JobStatus::Executing, JobStatus::Retry];
        if !self.repo.transition(id, &live, &canceled)? {
            // Lost the race against a concurrent terminal transition.
            return Err(SchedulerError::JobNotFound { id: id.to_string() });
        }
        info!(job_id = %id, "job canceled");
        self.publish(StatusEventKind::StatusChange, &canceled, None);
        Ok(canceled)
    }

    fn reschedule(self: &Arc<Self>, id: &str, patch: &JobPatch) -> Result<JobDetails> {
        patch.validate()?;
        let mut job = self.repo.merge(id, patch)?;

        // Persist through the status guard: a fire that moved the job to
        // `Executing` in the meantime owns the record, and its own guarded
        // transition decides what happens next.
        let now = Utc::now();
        let rearmable = [JobStatus::Scheduled, JobStatus::Retry];
        match job.trigger.next_fire_time(now, self.cfg.overdue_policy) {
            Some(fire_at) => {
                job.status = JobStatus::Scheduled;
                job.next_fire = Some(fire_at);
                job.scheduled_id = Some(Uuid::new_v4().to_string());
                if !self.repo.transition(id, &rearmable, &job)? {
                    return Err(SchedulerError::JobNotFound { id: id.to_string() });
                }
                self.arm(&job, fire_at);
                info!(job_id = %id, fire_at = %fire_at, "job rescheduled");
            }
            None => {
                if let Some((_, entry)) = self.timers.remove(id) {
                    entry.handle.abort();
                }
                job.status = JobStatus::Complete;
                job.next_fire = None;
                job.scheduled_id = None;
                if !self.repo.transition(id, &rearmable, &job)? {
                    return Err(SchedulerError::JobNotFound { id: id.to_string() });
                }
                info!(job_id = %id, "merged trigger is exhausted — job completed");
            }
        }
        self.publish(StatusEventKind::StatusChange, &job, None);
        Ok(job)
    }

    /// Pull due-soon jobs from the repository and arm any not already held
    /// locally. Runs on the polling cadence and right after promotion; this
    /// is what makes scheduling durable across restarts and lets a new
    /// leader adopt jobs armed by a previous one.
    fn reload(self: &Arc<Self>) -> Result<()> {
        let now = Utc::now();
        let from = DateTime::<Utc>::from_timestamp(0, 0).unwrap_or(now);
        let to = now + chrono::Duration::seconds(self.cfg.lookahead_secs as i64);

        let due = self.repo.find_by_status_between(
            from,
            to,
            &[JobStatus::Scheduled, JobStatus::Retry],
            &[
                SortTerm::asc(SortField::FireTime),
                SortTerm::asc(SortField::Created),
                SortTerm::asc(SortField::Id),
            ],
        )?;

        let fireable = [JobStatus::Scheduled, JobStatus::Retry];
        for mut job in due {
            if self.timers.contains_key(&job.id) {
                continue;
            }
            let fire_at = job.next_fire.unwrap_or(now);
            // scheduled_id is transient per instance: reassign on reload so
            // timers armed by a dead leader cannot be confused with ours.
            job.scheduled_id = Some(Uuid::new_v4().to_string());
            job.last_update = now;
            // The status guard catches a cancel (or any transition) landing
            // between the ranged query and this write; a guarded-out job is
            // simply not armed.
            if !self.repo.transition(&job.id, &fireable, &job)? {
                debug!(job_id = %job.id, "job transitioned since the reload query — not armed");
                continue;
            }
            debug!(job_id = %job.id, fire_at = %fire_at, "arming job from reload");
            self.arm(&job, fire_at);
        }
        Ok(())
    }

    /// Arm an in-process timer for `job` at `fire_at`, replacing any
    /// previously armed timer for the same id.
    fn arm(self: &Arc<Self>, job: &JobDetails, fire_at: DateTime<Utc>) {
        let scheduled_id = job
            .scheduled_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let delay = (fire_at - Utc::now())
            .to_std()
            .unwrap_or(MIN_FIRE_DELAY)
            .max(MIN_FIRE_DELAY);

        let inner = Arc::clone(self);
        let job_id = job.id.clone();
        let task_scheduled_id = scheduled_id.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            inner.fire(&job_id, &task_scheduled_id).await;
        });

        if let Some(previous) = self.timers.insert(
            job.id.clone(),
            TimerEntry {
                scheduled_id,
                handle,
            },
        ) {
            previous.handle.abort();
        }
    }

    /// The timer callback: guard, mark executing, deliver, then apply the
    /// success/error policy. Every failure mode lands in the retry path —
    /// nothing here can take the engine down.
    async fn fire(self: Arc<Self>, job_id: &str, scheduled_id: &str) {
        // Claim the arena entry; a mismatched scheduled_id means the job was
        // re-armed since this timer was created and the fire is not ours.
        let claimed = self
            .timers
            .remove_if(job_id, |_, entry| entry.scheduled_id == scheduled_id)
            .is_some();
        if !claimed {
            debug!(job_id, "stale timer fired — skipping");
            return;
        }

        if !self.is_master() {
            debug!(job_id, "not master at fire time — leaving job for the leader");
            return;
        }

        let mut job = match self.repo.get(job_id) {
            Ok(Some(job)) => job,
            Ok(None) => {
                debug!(job_id, "job deleted before firing");
                return;
            }
            Err(e) => {
                error!(job_id, "failed to load job at fire time: {e}");
                return;
            }
        };

        // Guards against concurrent cancel/merge between arming and firing.
        if job.scheduled_id.as_deref() != Some(scheduled_id) {
            debug!(job_id, "scheduled id changed — skipping fire");
            return;
        }
        if !matches!(job.status, JobStatus::Scheduled | JobStatus::Retry) {
            debug!(job_id, status = %job.status, "job no longer fireable");
            return;
        }

        let now = Utc::now();
        job.status = JobStatus::Executing;
        job.execution_counter += 1;
        job.last_update = now;
        let executing = [JobStatus::Scheduled, JobStatus::Retry];
        match self.repo.transition(job_id, &executing, &job) {
            Ok(true) => {}
            Ok(false) => {
                debug!(job_id, "lost fire race — job transitioned concurrently");
                return;
            }
            Err(e) => {
                error!(job_id, "failed to mark job executing: {e}");
                return;
            }
        }
        self.publish(StatusEventKind::StatusChange, &job, None);

        let outcome = self.delegate.execute(&job).await;
        match outcome {
            ExecutionOutcome::Delivered(response) => self.handle_success(job, response.code),
            ExecutionOutcome::Failed { code, message } => {
                self.handle_failure(job, code, message)
            }
        }
    }

    /// Success path: advance the trigger, then re-arm (recurring) or
    /// complete (one-shot / exhausted).
    fn handle_success(self: &Arc<Self>, mut job: JobDetails, code: String) {
        let now = Utc::now();
        job.trigger.record_fire(now);
        job.last_update = now;

        match job.trigger.next_fire_time(now, self.cfg.overdue_policy) {
            Some(fire_at) => {
                job.status = JobStatus::Scheduled;
                job.next_fire = Some(fire_at);
                job.scheduled_id = Some(Uuid::new_v4().to_string());
            }
            None => {
                job.status = JobStatus::Complete;
                job.next_fire = None;
                job.scheduled_id = None;
            }
        }

        match self.repo.transition(&job.id, &[JobStatus::Executing], &job) {
            Ok(true) => {
                if let Some(fire_at) = job.next_fire {
                    debug!(job_id = %job.id, fire_at = %fire_at, "recurring job re-armed");
                    self.arm(&job, fire_at);
                } else {
                    info!(job_id = %job.id, runs = job.execution_counter, "job complete");
                }
                self.publish(
                    StatusEventKind::Success,
                    &job,
                    Some(format!("delivered with code {code}")),
                );
            }
            Ok(false) => {
                // Canceled while the delivery was in flight; the delivery
                // itself cannot be suppressed, only future fires.
                debug!(job_id = %job.id, "job transitioned during delivery — not re-armed");
            }
            Err(e) => error!(job_id = %job.id, "failed to persist success: {e}"),
        }
    }

    /// Error path: consume the retry budget with a fixed backoff delay,
    /// bounded by the total retry window; exhaustion is terminal.
    fn handle_failure(self: &Arc<Self>, mut job: JobDetails, code: String, message: String) {
        let now = Utc::now();
        job.last_update = now;

        let window_exceeded = (job.execution_counter as u64)
            .saturating_mul(self.cfg.retry_delay_ms)
            > self.cfg.retry_window_ms;

        if job.retries > 0 && !window_exceeded {
            job.retries -= 1;
            job.status = JobStatus::Retry;
            let fire_at = now + chrono::Duration::milliseconds(self.cfg.retry_delay_ms as i64);
            job.next_fire = Some(fire_at);
            job.scheduled_id = Some(Uuid::new_v4().to_string());

            match self.repo.transition(&job.id, &[JobStatus::Executing], &job) {
                Ok(true) => {
                    warn!(
                        job_id = %job.id,
                        attempt = job.execution_counter,
                        retries_left = job.retries,
                        %code,
                        "delivery failed — retry armed"
                    );
                    self.arm(&job, fire_at);
                    self.publish(StatusEventKind::Error, &job, Some(message));
                }
                Ok(false) => {
                    debug!(job_id = %job.id, "job transitioned during delivery — retry dropped");
                }
                Err(e) => error!(job_id = %job.id, "failed to persist retry: {e}"),
            }
        } else {
            job.status = JobStatus::Error;
            job.next_fire = None;
            job.scheduled_id = None;

            match self.repo.transition(&job.id, &[JobStatus::Executing], &job) {
                Ok(true) => {
                    error!(
                        job_id = %job.id,
                        attempts = job.execution_counter,
                        %code,
                        "delivery failed — retries exhausted"
                    );
                    self.publish(StatusEventKind::Error, &job, Some(message));
                }
                Ok(false) => {
                    debug!(job_id = %job.id, "job transitioned during delivery — error dropped");
                }
                Err(e) => error!(job_id = %job.id, "failed to persist error state: {e}"),
            }
        }
    }

    /// Abort every sleeping timer. Fires already past their arena removal
    /// are unaffected and complete normally.
    fn disarm_all(&self) {
        self.timers.retain(|_, entry| {
            entry.handle.abort();
            false
        });
    }

    /// Non-blocking event publication; the publisher task drains the channel.
    fn publish(&self, kind: StatusEventKind, job: &JobDetails, message: Option<String>) {
        let event = JobStatusEvent::of(kind, job, message);
        if self.events_tx.try_send(event).is_err() {
            warn!(job_id = %job.id, "status event channel full or closed — event dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::SqliteJobRepository;
    use async_trait::async_trait;
    use chronod_core::{OverduePolicy, Recipient, RecipientKind, Trigger};
    use chronod_executor::{
        ExecutionResponse, ExecutorError, ExecutorRegistry, JobExecutor,
    };
    use rusqlite::Connection;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingExecutor {
        calls: Arc<AtomicU32>,
        fail: bool,
    }

    #[async_trait]
    impl JobExecutor for CountingExecutor {
        fn kind(&self) -> RecipientKind {
            RecipientKind::Http
        }

        async fn execute(
            &self,
            job: &JobDetails,
        ) -> std::result::Result<ExecutionResponse, ExecutorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(ExecutorError::Delivery {
                    code: "503".into(),
                    message: "recipient always fails".into(),
                })
            } else {
                Ok(ExecutionResponse {
                    job_id: job.id.clone(),
                    timestamp: Utc::now(),
                    code: "200".into(),
                    message: None,
                })
            }
        }
    }

    /// Forwards to a real repository, slipping a competing status transition
    /// in at a chosen point to exercise the engine's write guards.
    enum Race {
        CancelAfterList,
        ExecuteAfterMerge,
    }

    struct RacingRepo {
        inner: Arc<dyn JobRepository>,
        race: Race,
    }

    impl JobRepository for RacingRepo {
        fn create(&self, job: &JobDetails) -> crate::error::Result<()> {
            self.inner.create(job)
        }

        fn save(&self, job: &JobDetails) -> crate::error::Result<()> {
            self.inner.save(job)
        }

        fn merge(&self, id: &str, patch: &JobPatch) -> crate::error::Result<JobDetails> {
            let merged = self.inner.merge(id, patch)?;
            if matches!(self.race, Race::ExecuteAfterMerge) {
                let mut executing = merged.clone();
                executing.status = JobStatus::Executing;
                executing.execution_counter += 1;
                self.inner.transition(
                    id,
                    &[JobStatus::Scheduled, JobStatus::Retry],
                    &executing,
                )?;
            }
            Ok(merged)
        }

        fn get(&self, id: &str) -> crate::error::Result<Option<JobDetails>> {
            self.inner.get(id)
        }

        fn exists(&self, id: &str) -> crate::error::Result<bool> {
            self.inner.exists(id)
        }

        fn delete(&self, id: &str) -> crate::error::Result<Option<JobDetails>> {
            self.inner.delete(id)
        }

        fn find_by_status_between(
            &self,
            from: DateTime<Utc>,
            to: DateTime<Utc>,
            statuses: &[JobStatus],
            sort: &[SortTerm],
        ) -> crate::error::Result<Vec<JobDetails>> {
            let due = self.inner.find_by_status_between(from, to, statuses, sort)?;
            if matches!(self.race, Race::CancelAfterList) {
                for job in &due {
                    let mut canceled = job.clone();
                    canceled.status = JobStatus::Canceled;
                    canceled.scheduled_id = None;
                    canceled.next_fire = None;
                    self.inner.transition(
                        &job.id,
                        &[JobStatus::Scheduled, JobStatus::Retry],
                        &canceled,
                    )?;
                }
            }
            Ok(due)
        }

        fn transition(
            &self,
            id: &str,
            expected: &[JobStatus],
            job: &JobDetails,
        ) -> crate::error::Result<bool> {
            self.inner.transition(id, expected, job)
        }
    }

    struct Harness {
        handle: SchedulerHandle,
        repo: Arc<dyn JobRepository>,
        events_rx: mpsc::Receiver<JobStatusEvent>,
        calls: Arc<AtomicU32>,
        _master_tx: watch::Sender<bool>,
    }

    fn harness(fail: bool, cfg: SchedulerConfig) -> Harness {
        let repo: Arc<dyn JobRepository> =
            Arc::new(SqliteJobRepository::new(Connection::open_in_memory().unwrap()).unwrap());
        harness_with_repo(repo, fail, cfg)
    }

    fn harness_with_repo(
        repo: Arc<dyn JobRepository>,
        fail: bool,
        cfg: SchedulerConfig,
    ) -> Harness {
        let calls = Arc::new(AtomicU32::new(0));
        let mut registry = ExecutorRegistry::new();
        registry.register(Arc::new(CountingExecutor {
            calls: Arc::clone(&calls),
            fail,
        }));
        let delegate = Arc::new(DelegateExecutor::new(registry));
        let (master_tx, master_rx) = watch::channel(true);
        let (_engine, handle, events_rx) =
            SchedulerEngine::new(Arc::clone(&repo), delegate, cfg, master_rx);
        Harness {
            handle,
            repo,
            events_rx,
            calls,
            _master_tx: master_tx,
        }
    }

    fn fast_cfg() -> SchedulerConfig {
        SchedulerConfig {
            poll_interval_secs: 1,
            lookahead_secs: 300,
            retry_delay_ms: 30,
            retry_window_ms: 60_000,
            default_retries: 3,
            overdue_policy: OverduePolicy::FireImmediately,
        }
    }

    fn http_recipient() -> Recipient {
        Recipient::Http {
            url: "http://localhost:8080/cb".into(),
            method: "POST".into(),
            headers: HashMap::new(),
            payload: None,
        }
    }

    fn point_in_time_request(id: &str, fire_in_ms: i64, retries: u32) -> CreateJobRequest {
        CreateJobRequest {
            id: Some(id.to_string()),
            correlation_id: None,
            trigger: Trigger::PointInTime {
                fire_time: Utc::now() + chrono::Duration::milliseconds(fire_in_ms),
                fired_count: 0,
            },
            recipient: http_recipient(),
            priority: 0,
            retries: Some(retries),
        }
    }

    async fn wait_for_status(
        repo: &Arc<dyn JobRepository>,
        id: &str,
        wanted: JobStatus,
        timeout_ms: u64,
    ) -> JobDetails {
        let deadline = tokio::time::Instant::now() + Duration::from_millis(timeout_ms);
        loop {
            if let Some(job) = repo.get(id).unwrap() {
                if job.status == wanted {
                    return job;
                }
            }
            if tokio::time::Instant::now() > deadline {
                let current = repo.get(id).unwrap().map(|j| j.status);
                panic!("job {id} never reached {wanted:?}; last status {current:?}");
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn duplicate_id_is_rejected() {
        let h = harness(false, fast_cfg());
        h.handle
            .schedule(point_in_time_request("dup", 60_000, 0))
            .unwrap();
        match h.handle.schedule(point_in_time_request("dup", 60_000, 0)) {
            Err(SchedulerError::AlreadyExists { id }) => assert_eq!(id, "dup"),
            other => panic!("expected AlreadyExists, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn exhausted_trigger_completes_without_arming() {
        let mut cfg = fast_cfg();
        cfg.overdue_policy = OverduePolicy::Skip;
        let h = harness(false, cfg);

        let job = h
            .handle
            .schedule(point_in_time_request("past", -5_000, 0))
            .unwrap();
        assert_eq!(job.status, JobStatus::Complete);
        assert_eq!(job.execution_counter, 0);
        assert_eq!(h.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn one_shot_job_fires_and_completes() {
        let h = harness(false, fast_cfg());
        h.handle
            .schedule(point_in_time_request("once", 30, 0))
            .unwrap();

        let done = wait_for_status(&h.repo, "once", JobStatus::Complete, 3_000).await;
        assert_eq!(done.execution_counter, 1);
        assert_eq!(h.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failing_recipient_exhausts_retries_into_error() {
        let h = harness(true, fast_cfg());
        h.handle
            .schedule(point_in_time_request("doomed", 30, 2))
            .unwrap();

        let failed = wait_for_status(&h.repo, "doomed", JobStatus::Error, 5_000).await;
        // 1 initial attempt + 2 retries.
        assert_eq!(failed.execution_counter, 3);
        assert_eq!(failed.retries, 0);
        assert_eq!(h.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn interval_job_stops_at_repeat_limit() {
        let mut h = harness(false, fast_cfg());
        let request = CreateJobRequest {
            id: Some("tick".into()),
            correlation_id: None,
            trigger: Trigger::Interval {
                start_time: Utc::now() + chrono::Duration::milliseconds(30),
                end_time: None,
                repeat_limit: Some(3),
                interval_ms: 40,
                fired_count: 0,
                last_fire: None,
            },
            recipient: http_recipient(),
            priority: 0,
            retries: Some(0),
        };
        h.handle.schedule(request).unwrap();

        let done = wait_for_status(&h.repo, "tick", JobStatus::Complete, 5_000).await;
        assert_eq!(done.execution_counter, 3);
        assert_eq!(done.trigger.fired_count(), 3);

        // A fourth fire never happens: give it generous room, then drain the
        // event channel and count successes.
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(h.calls.load(Ordering::SeqCst), 3);
        let mut successes = 0;
        while let Ok(event) = h.events_rx.try_recv() {
            if event.kind == StatusEventKind::Success {
                successes += 1;
            }
        }
        assert_eq!(successes, 3);
    }

    #[tokio::test]
    async fn cancel_is_idempotent_at_the_boundary() {
        let h = harness(false, fast_cfg());
        h.handle
            .schedule(point_in_time_request("bye", 60_000, 0))
            .unwrap();

        let canceled = h.handle.cancel("bye").unwrap();
        assert_eq!(canceled.status, JobStatus::Canceled);

        match h.handle.cancel("bye") {
            Err(SchedulerError::JobNotFound { id }) => assert_eq!(id, "bye"),
            other => panic!("expected JobNotFound, got {other:?}"),
        }

        // The aborted timer never fires.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(h.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn cancel_missing_job_is_not_found() {
        let h = harness(false, fast_cfg());
        assert!(matches!(
            h.handle.cancel("ghost"),
            Err(SchedulerError::JobNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn merge_with_status_field_leaves_job_unchanged() {
        let h = harness(false, fast_cfg());
        let original = h
            .handle
            .schedule(point_in_time_request("patched", 60_000, 1))
            .unwrap();

        let patch = JobPatch {
            status: Some(JobStatus::Complete),
            priority: Some(9),
            ..Default::default()
        };
        assert!(matches!(
            h.handle.reschedule("patched", &patch),
            Err(SchedulerError::Validation(_))
        ));

        let stored = h.handle.get("patched").unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Scheduled);
        assert_eq!(stored.priority, original.priority);
    }

    #[tokio::test]
    async fn reschedule_replaces_trigger_and_rearms() {
        let h = harness(false, fast_cfg());
        h.handle
            .schedule(point_in_time_request("moved", 60_000, 0))
            .unwrap();

        let patch = JobPatch {
            trigger: Some(Trigger::PointInTime {
                fire_time: Utc::now() + chrono::Duration::milliseconds(30),
                fired_count: 0,
            }),
            ..Default::default()
        };
        h.handle.reschedule("moved", &patch).unwrap();

        let done = wait_for_status(&h.repo, "moved", JobStatus::Complete, 3_000).await;
        assert_eq!(done.execution_counter, 1);
    }

    #[tokio::test]
    async fn reload_adopts_jobs_armed_elsewhere() {
        let h = harness(false, fast_cfg());
        let now = Utc::now();
        // Simulate a record persisted by another (dead) instance: scheduled
        // in the repository but unknown to this engine's timer arena.
        let job = JobDetails {
            id: "orphan".into(),
            correlation_id: "orphan".into(),
            trigger: Trigger::PointInTime {
                fire_time: now + chrono::Duration::milliseconds(20),
                fired_count: 0,
            },
            recipient: http_recipient(),
            status: JobStatus::Scheduled,
            priority: 0,
            retries: 0,
            execution_counter: 0,
            scheduled_id: Some("dead-instance-timer".into()),
            next_fire: Some(now + chrono::Duration::milliseconds(20)),
            created: now,
            last_update: now,
        };
        h.repo.save(&job).unwrap();

        h.handle.inner.reload().unwrap();
        let done = wait_for_status(&h.repo, "orphan", JobStatus::Complete, 3_000).await;
        assert_eq!(done.execution_counter, 1);
        // Reload reassigned the transient timer id before arming.
        assert_ne!(done.scheduled_id.as_deref(), Some("dead-instance-timer"));
    }

    #[tokio::test]
    async fn reload_does_not_overwrite_a_concurrent_cancel() {
        let sqlite: Arc<dyn JobRepository> =
            Arc::new(SqliteJobRepository::new(Connection::open_in_memory().unwrap()).unwrap());
        let repo: Arc<dyn JobRepository> = Arc::new(RacingRepo {
            inner: Arc::clone(&sqlite),
            race: Race::CancelAfterList,
        });
        let h = harness_with_repo(repo, false, fast_cfg());

        h.handle
            .schedule(point_in_time_request("raced", 30, 0))
            .unwrap();
        // Schedule armed a local timer; drop it so reload sees the job as
        // unowned, the way a fresh leader would after failover.
        h.handle.inner.disarm_all();

        // The racing repo cancels the job between the ranged query and the
        // re-arm write; the guarded write must lose and leave the cancel
        // in place.
        h.handle.inner.reload().unwrap();
        let stored = sqlite.get("raced").unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Canceled);
        assert_eq!(stored.scheduled_id, None);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(h.calls.load(Ordering::SeqCst), 0, "canceled job must not fire");
        assert_eq!(sqlite.get("raced").unwrap().unwrap().status, JobStatus::Canceled);
    }

    #[tokio::test]
    async fn reschedule_loses_to_an_in_flight_fire() {
        let sqlite: Arc<dyn JobRepository> =
            Arc::new(SqliteJobRepository::new(Connection::open_in_memory().unwrap()).unwrap());
        let repo: Arc<dyn JobRepository> = Arc::new(RacingRepo {
            inner: Arc::clone(&sqlite),
            race: Race::ExecuteAfterMerge,
        });
        let h = harness_with_repo(repo, false, fast_cfg());

        h.handle
            .schedule(point_in_time_request("busy", 60_000, 0))
            .unwrap();

        // The racing repo marks the job Executing right after the merge, as
        // an in-flight delivery would; the guarded re-arm must fail instead
        // of flipping the job back to Scheduled under the delivery.
        let patch = JobPatch {
            trigger: Some(Trigger::PointInTime {
                fire_time: Utc::now() + chrono::Duration::milliseconds(30),
                fired_count: 0,
            }),
            ..Default::default()
        };
        match h.handle.reschedule("busy", &patch) {
            Err(SchedulerError::JobNotFound { id }) => assert_eq!(id, "busy"),
            other => panic!("expected the reschedule to lose the race, got {other:?}"),
        }

        let stored = sqlite.get("busy").unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Executing);

        // No timer was armed for the patched fire time.
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(h.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn retry_window_ends_retrying_before_the_budget() {
        let mut cfg = fast_cfg();
        cfg.retry_delay_ms = 30;
        // The first failed attempt already exceeds the window.
        cfg.retry_window_ms = 20;
        let h = harness(true, cfg);

        h.handle
            .schedule(point_in_time_request("boxed", 30, 5))
            .unwrap();

        let failed = wait_for_status(&h.repo, "boxed", JobStatus::Error, 3_000).await;
        assert_eq!(failed.execution_counter, 1);
        // The budget is untouched; the window ended the retrying.
        assert_eq!(failed.retries, 5);
        assert_eq!(h.calls.load(Ordering::SeqCst), 1);
    }
}
