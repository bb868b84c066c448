//! Boot-time reconciliation: decide which persisted schedules still have a
//! future occurrence and arm them.

use std::sync::Arc;

use campus_core::config::ReconcileConfig;
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use tokio::time::{sleep, Duration};
use tracing::{debug, info, warn};

use crate::{
    engine::SchedulerEngine,
    error::Result,
    occurrence::{build_one_time_instants, end_of_window, local_instant, window_open},
    store::ScheduleStore,
    types::{Interval, RecurringSchedule, Schedule, ScheduleDefinition},
};

/// Upper bound on the day-by-day walk when projecting the next occurrence.
/// Any valid weekly or monthly pattern recurs well within this.
const MAX_PROJECTION_DAYS: u32 = 366;

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// Definitions returned by the store.
    pub loaded: usize,
    /// Definitions that still had a future occurrence.
    pub survivors: usize,
    /// Jobs installed across all survivors.
    pub jobs_armed: usize,
    /// Definitions filtered out.
    pub skipped: usize,
}

pub struct StartupReconciler {
    engine: SchedulerEngine,
    store: Arc<dyn ScheduleStore>,
}

impl StartupReconciler {
    pub fn new(engine: SchedulerEngine, store: Arc<dyn ScheduleStore>) -> Self {
        Self { engine, store }
    }

    /// Query the store once, filter, and arm every survivor.
    ///
    /// Meant to run once per process: `arm` is not idempotent, so a second
    /// pass would duplicate jobs.
    pub fn run(&self) -> Result<ReconcileReport> {
        let definitions = self.store.find_active_schedules_with_definition()?;
        let now = self.engine.now();
        let tz = self.engine.timezone();

        let survivors = select_survivors(&definitions, now, tz);
        let mut report = ReconcileReport {
            loaded: definitions.len(),
            survivors: survivors.len(),
            skipped: definitions.len() - survivors.len(),
            jobs_armed: 0,
        };
        for definition in survivors {
            report.jobs_armed += self.engine.arm(definition);
        }

        info!(
            loaded = report.loaded,
            survivors = report.survivors,
            skipped = report.skipped,
            jobs = report.jobs_armed,
            "startup reconciliation complete"
        );
        Ok(report)
    }

    /// [`run`](Self::run), retrying store failures with exponential backoff.
    ///
    /// Delays go base → 2×base → … capped at `backoff_max_secs`. After
    /// `max_attempts` failures the last error is returned so the operator
    /// sees it instead of a process that silently armed nothing.
    pub async fn run_with_backoff(&self, policy: &ReconcileConfig) -> Result<ReconcileReport> {
        let max_attempts = policy.max_attempts.max(1);
        let mut delay_secs = policy.backoff_base_secs;
        let mut attempt = 1;

        loop {
            match self.run() {
                Ok(report) => return Ok(report),
                Err(e) if attempt >= max_attempts => return Err(e),
                Err(e) => {
                    warn!(
                        attempt,
                        max = max_attempts,
                        error = %e,
                        retry_after_secs = delay_secs,
                        "schedule store query failed, retrying reconciliation"
                    );
                    sleep(Duration::from_secs(delay_secs)).await;
                    delay_secs = (delay_secs * 2).min(policy.backoff_max_secs);
                    attempt += 1;
                }
            }
        }
    }
}

/// The definitions that should be armed at `now`.
pub fn select_survivors(
    definitions: &[ScheduleDefinition],
    now: DateTime<Utc>,
    tz: Tz,
) -> Vec<&ScheduleDefinition> {
    definitions
        .iter()
        .filter(|def| {
            let keep = has_future_occurrence(def, now, tz);
            if !keep {
                debug!(schedule_id = %def.id, "no future occurrence, skipped");
            }
            keep
        })
        .collect()
}

/// Whether `definition` can still fire after `now`.
pub fn has_future_occurrence(definition: &ScheduleDefinition, now: DateTime<Utc>, tz: Tz) -> bool {
    if !definition.active || definition.validate().is_err() {
        return false;
    }
    match &definition.schedule {
        None => false,
        Some(Schedule::OneTime(one_time)) => !build_one_time_instants(one_time, now, tz).is_empty(),
        Some(Schedule::Recurring(recurring)) => {
            if !window_open(recurring, now, tz) {
                return false;
            }
            let Some(end) = end_of_window(recurring, tz) else {
                return true;
            };
            project_next_occurrence(recurring, now, tz).is_some_and(|next| next < end)
        }
    }
}

/// Project the next firing of a recurring schedule after `now`.
///
/// If today's slot is still ahead it is a candidate; otherwise projection
/// starts tomorrow. For weekly and monthly schedules the target ordinal is
/// the smallest listed one not before the wanted ordinal, wrapping to the
/// smallest overall, and the calendar is walked forward until it lands on it.
pub fn project_next_occurrence(
    recurring: &RecurringSchedule,
    now: DateTime<Utc>,
    tz: Tz,
) -> Option<DateTime<Tz>> {
    let local = now.with_timezone(&tz);
    let today = local.date_naive();
    let time_over = match local_instant(today, recurring.time, tz) {
        Some(slot) => local >= slot,
        None => local.time() >= recurring.time,
    };
    let first_day = if time_over { today.succ_opt()? } else { today };

    let target_day = match recurring.interval {
        Interval::Daily => first_day,
        Interval::Weekly => {
            let candidates: Vec<u8> = recurring
                .week_days
                .iter()
                .flatten()
                .map(|d| d.ordinal())
                .collect();
            let today_ordinal = today.weekday().num_days_from_sunday() as u8;
            let target = next_candidate(&candidates, today_ordinal + u8::from(time_over))?;
            walk_until(first_day, |d| d.weekday().num_days_from_sunday() as u8 == target)?
        }
        Interval::Monthly => {
            let candidates: Vec<u8> = recurring
                .month_dates
                .iter()
                .flatten()
                .map(|d| d.ordinal())
                .collect();
            let today_ordinal = today.day() as u8;
            let target = next_candidate(&candidates, today_ordinal + u8::from(time_over))?;
            walk_until(first_day, |d| d.day() as u8 == target)?
        }
        Interval::Unknown => return None,
    };

    local_instant(target_day, recurring.time, tz)
}

/// Smallest candidate `>= wanted`, else the smallest candidate (next cycle).
pub(crate) fn next_candidate(candidates: &[u8], wanted: u8) -> Option<u8> {
    let mut sorted = candidates.to_vec();
    sorted.sort_unstable();
    sorted
        .iter()
        .copied()
        .find(|c| *c >= wanted)
        .or_else(|| sorted.first().copied())
}

fn walk_until(start: NaiveDate, hit: impl Fn(NaiveDate) -> bool) -> Option<NaiveDate> {
    let mut day = start;
    for _ in 0..MAX_PROJECTION_DAYS {
        if hit(day) {
            return Some(day);
        }
        day = day.succ_opt()?;
    }
    None
}
