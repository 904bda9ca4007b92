use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// Largest accepted repeat interval: the widest span `chrono::Duration`
/// can represent in whole milliseconds.
pub const MAX_INTERVAL_MS: u64 = i64::MAX as u64;

/// What to do with a point-in-time job whose fire time already passed when
/// the next fire time is computed (e.g. the service was down at the instant).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OverduePolicy {
    /// Fire as soon as possible (default).
    #[default]
    FireImmediately,
    /// Treat the trigger as exhausted; the job completes without firing.
    Skip,
}

/// Defines when a job fires next.
///
/// Recurring variants carry their own firing state (`fired_count`,
/// `last_fire`) and are mutated via [`Trigger::record_fire`] after every
/// firing, so the next occurrence is always derived from the previous one —
/// never skipped silently.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Trigger {
    /// Fire exactly once at the given UTC instant.
    PointInTime {
        fire_time: DateTime<Utc>,
        #[serde(default)]
        fired_count: u32,
    },

    /// Fire at `start_time`, then every `interval_ms` milliseconds.
    Interval {
        start_time: DateTime<Utc>,
        #[serde(default)]
        end_time: Option<DateTime<Utc>>,
        #[serde(default)]
        repeat_limit: Option<u32>,
        interval_ms: u64,
        #[serde(default)]
        fired_count: u32,
        #[serde(default)]
        last_fire: Option<DateTime<Utc>>,
    },

    /// Fire on every occurrence of a cron expression.
    Cron {
        start_time: DateTime<Utc>,
        #[serde(default)]
        end_time: Option<DateTime<Utc>>,
        #[serde(default)]
        repeat_limit: Option<u32>,
        expression: String,
        #[serde(default)]
        fired_count: u32,
        #[serde(default)]
        last_fire: Option<DateTime<Utc>>,
    },
}

impl Trigger {
    /// Creation-time validation: bounds must be coherent and cron
    /// expressions must parse. Invalid triggers are never persisted.
    pub fn validate(&self) -> Result<()> {
        match self {
            Trigger::PointInTime { .. } => Ok(()),
            Trigger::Interval {
                start_time,
                end_time,
                interval_ms,
                ..
            } => {
                if *interval_ms == 0 {
                    return Err(CoreError::Validation(
                        "interval must be greater than zero".into(),
                    ));
                }
                if *interval_ms > MAX_INTERVAL_MS {
                    return Err(CoreError::Validation(format!(
                        "interval must not exceed {MAX_INTERVAL_MS} ms"
                    )));
                }
                check_bounds(start_time, end_time)
            }
            Trigger::Cron {
                start_time,
                end_time,
                expression,
                ..
            } => {
                cron::Schedule::from_str(expression).map_err(|e| {
                    CoreError::Validation(format!("invalid cron expression {expression:?}: {e}"))
                })?;
                check_bounds(start_time, end_time)
            }
        }
    }

    /// Compute the next fire time, or `None` when the trigger is exhausted.
    ///
    /// The result may lie in the past (the scheduler clamps the delay to a
    /// minimal positive value so overdue work fires as soon as possible);
    /// given the same trigger state, `now`, and policy, the result is
    /// deterministic.
    pub fn next_fire_time(
        &self,
        now: DateTime<Utc>,
        overdue: OverduePolicy,
    ) -> Option<DateTime<Utc>> {
        match self {
            Trigger::PointInTime {
                fire_time,
                fired_count,
            } => {
                if *fired_count > 0 {
                    return None;
                }
                if *fire_time > now {
                    Some(*fire_time)
                } else {
                    match overdue {
                        OverduePolicy::FireImmediately => Some(now),
                        OverduePolicy::Skip => None,
                    }
                }
            }

            Trigger::Interval {
                start_time,
                end_time,
                repeat_limit,
                interval_ms,
                fired_count,
                last_fire,
            } => {
                if repeat_limit.is_some_and(|limit| *fired_count >= limit) {
                    return None;
                }
                let candidate = match last_fire {
                    // Checked arithmetic: an interval that pushes past the
                    // calendar's range exhausts the trigger instead of
                    // wrapping into the past.
                    Some(last) => last.checked_add_signed(Duration::milliseconds(
                        i64::try_from(*interval_ms).unwrap_or(i64::MAX),
                    ))?,
                    None => *start_time,
                };
                bounded(candidate, end_time)
            }

            Trigger::Cron {
                start_time,
                end_time,
                repeat_limit,
                expression,
                fired_count,
                last_fire,
            } => {
                if repeat_limit.is_some_and(|limit| *fired_count >= limit) {
                    return None;
                }
                let schedule = cron::Schedule::from_str(expression).ok()?;
                // `after` is exclusive; back off 1ms so an occurrence exactly
                // at start_time is not lost on the first computation.
                let after = last_fire.unwrap_or(*start_time - Duration::milliseconds(1));
                let candidate = schedule.after(&after).next()?;
                bounded(candidate, end_time)
            }
        }
    }

    /// Record one firing: bumps `fired_count` and remembers the fire instant
    /// so the following occurrence is computed from it.
    pub fn record_fire(&mut self, at: DateTime<Utc>) {
        match self {
            Trigger::PointInTime { fired_count, .. } => *fired_count += 1,
            Trigger::Interval {
                fired_count,
                last_fire,
                ..
            }
            | Trigger::Cron {
                fired_count,
                last_fire,
                ..
            } => {
                *fired_count += 1;
                *last_fire = Some(at);
            }
        }
    }

    /// Number of firings recorded so far.
    pub fn fired_count(&self) -> u32 {
        match self {
            Trigger::PointInTime { fired_count, .. }
            | Trigger::Interval { fired_count, .. }
            | Trigger::Cron { fired_count, .. } => *fired_count,
        }
    }
}

fn check_bounds(start: &DateTime<Utc>, end: &Option<DateTime<Utc>>) -> Result<()> {
    if let Some(end) = end {
        if end < start {
            return Err(CoreError::Validation(
                "end_time must not precede start_time".into(),
            ));
        }
    }
    Ok(())
}

fn bounded(candidate: DateTime<Utc>, end_time: &Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
    match end_time {
        Some(end) if candidate > *end => None,
        _ => Some(candidate),
    }
}
