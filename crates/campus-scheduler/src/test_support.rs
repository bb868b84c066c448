//! Shared fixtures for scheduler tests.

use std::sync::Mutex;
use std::time::Duration;

use chrono::NaiveDate;

use crate::error::Result;
use crate::occurrence::TriggerExpression;
use crate::registry::JobKind;
use crate::timer::{FireFn, JobHandle, Timer};
use crate::types::{
    wall_clock, Interval, MonthDay, OneTimeSchedule, RecurringSchedule, Schedule,
    ScheduleDefinition, WeekDay,
};

struct ManualJob {
    kind: JobKind,
    expression: Option<String>,
    delay: Option<Duration>,
    fire: FireFn,
    handle: JobHandle,
    consumed: bool,
}

impl ManualJob {
    fn is_live(&self) -> bool {
        !self.consumed && !self.handle.is_cancelled()
    }
}

/// Records installed timers and fires them only when told to.
#[derive(Default)]
pub(crate) struct ManualTimer {
    jobs: Mutex<Vec<ManualJob>>,
}

impl ManualTimer {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Every job ever installed, live or not.
    pub(crate) fn installed(&self) -> usize {
        self.jobs.lock().unwrap().len()
    }

    pub(crate) fn live(&self) -> usize {
        self.jobs.lock().unwrap().iter().filter(|j| j.is_live()).count()
    }

    pub(crate) fn cron_expressions(&self) -> Vec<String> {
        self.jobs
            .lock()
            .unwrap()
            .iter()
            .filter_map(|j| j.expression.clone())
            .collect()
    }

    pub(crate) fn live_cron_expressions(&self) -> Vec<String> {
        self.jobs
            .lock()
            .unwrap()
            .iter()
            .filter(|j| j.is_live())
            .filter_map(|j| j.expression.clone())
            .collect()
    }

    pub(crate) fn timeout_delays(&self) -> Vec<Duration> {
        self.jobs
            .lock()
            .unwrap()
            .iter()
            .filter_map(|j| j.delay)
            .collect()
    }

    pub(crate) fn fire_fns(&self) -> Vec<FireFn> {
        self.jobs.lock().unwrap().iter().map(|j| j.fire.clone()).collect()
    }

    /// Fire every live job once. Timeout jobs are consumed.
    pub(crate) fn fire_live(&self) -> usize {
        let due: Vec<FireFn> = {
            let mut jobs = self.jobs.lock().unwrap();
            jobs.iter_mut()
                .filter(|j| j.is_live())
                .map(|j| {
                    if j.kind == JobKind::Timeout {
                        j.consumed = true;
                    }
                    j.fire.clone()
                })
                .collect()
        };
        // Fire outside the lock: callbacks may re-enter the timer.
        for fire in &due {
            fire();
        }
        due.len()
    }

    /// Fire the earliest-installed live timeout job, if any.
    pub(crate) fn fire_next_timeout(&self) -> usize {
        let fire = {
            let mut jobs = self.jobs.lock().unwrap();
            let Some(job) = jobs
                .iter_mut()
                .find(|j| j.kind == JobKind::Timeout && j.is_live())
            else {
                return 0;
            };
            job.consumed = true;
            job.fire.clone()
        };
        fire();
        1
    }
}

impl Timer for ManualTimer {
    fn schedule_cron(&self, expression: &TriggerExpression, fire: FireFn) -> Result<JobHandle> {
        let handle = JobHandle::new();
        self.jobs.lock().unwrap().push(ManualJob {
            kind: JobKind::Cron,
            expression: Some(expression.to_string()),
            delay: None,
            fire,
            handle: handle.clone(),
            consumed: false,
        });
        Ok(handle)
    }

    fn schedule_timeout(&self, delay: Duration, fire: FireFn) -> JobHandle {
        let handle = JobHandle::new();
        self.jobs.lock().unwrap().push(ManualJob {
            kind: JobKind::Timeout,
            expression: None,
            delay: Some(delay),
            fire,
            handle: handle.clone(),
            consumed: false,
        });
        handle
    }
}

fn definition(id: &str, kind: &str, schedule: Schedule) -> ScheduleDefinition {
    ScheduleDefinition {
        id: id.to_string(),
        active: true,
        notification_kind: kind.to_string(),
        schedule: Some(schedule),
    }
}

fn recurring(interval: Interval, time: &str) -> RecurringSchedule {
    RecurringSchedule {
        start_date: None,
        end_date: None,
        never_end: true,
        time: wall_clock::parse(time).unwrap(),
        interval,
        week_days: None,
        month_dates: None,
    }
}

/// Never-ending daily schedule.
pub(crate) fn daily(id: &str, time: &str) -> ScheduleDefinition {
    definition(id, "daily_digest", Schedule::Recurring(recurring(Interval::Daily, time)))
}

/// Never-ending weekly schedule.
pub(crate) fn weekly(id: &str, time: &str, days: &[WeekDay]) -> ScheduleDefinition {
    let mut rec = recurring(Interval::Weekly, time);
    rec.week_days = Some(days.to_vec());
    definition(id, "weekly_digest", Schedule::Recurring(rec))
}

/// Never-ending monthly schedule.
pub(crate) fn monthly(id: &str, time: &str, days: &[u8]) -> ScheduleDefinition {
    let mut rec = recurring(Interval::Monthly, time);
    rec.month_dates = Some(
        days.iter()
            .map(|d| MonthDay::try_from(*d).unwrap())
            .collect(),
    );
    definition(id, "enrollment_digest", Schedule::Recurring(rec))
}

pub(crate) fn one_time(id: &str, dates: &[NaiveDate], time: &str) -> ScheduleDefinition {
    definition(
        id,
        "reminder",
        Schedule::OneTime(OneTimeSchedule {
            dates: dates.to_vec(),
            time: wall_clock::parse(time).unwrap(),
        }),
    )
}

/// Make a recurring fixture bounded by `start`/`end`.
pub(crate) fn bounded(
    mut def: ScheduleDefinition,
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
) -> ScheduleDefinition {
    if let Some(Schedule::Recurring(rec)) = def.schedule.as_mut() {
        rec.start_date = start;
        rec.end_date = end;
        rec.never_end = end.is_none();
    }
    def
}
