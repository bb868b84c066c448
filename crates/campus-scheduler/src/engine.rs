use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use campus_core::Clock;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use futures_util::FutureExt;
use tracing::{debug, error, info, warn};

use crate::{
    dispatch::TriggerDispatcher,
    occurrence::{build_one_time_instants, build_recurring_expression, end_of_window, window_open},
    registry::{Job, JobId, JobKind, JobRegistry, JobSnapshot},
    timer::{delay_until, FireFn, Timer},
    types::{Schedule, ScheduleDefinition},
};

/// Arms, rearms and disarms the runtime jobs derived from schedule definitions.
///
/// Cheap to clone; all clones share one registry. `arm`, `rearm` and `disarm`
/// only touch memory and timers, never the schedule store.
///
/// Each process keeps its own registry: two engines pointed at the same
/// store will both fire every schedule.
#[derive(Clone)]
pub struct SchedulerEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    registry: JobRegistry,
    timer: Arc<dyn Timer>,
    dispatcher: Arc<dyn TriggerDispatcher>,
    clock: Arc<dyn Clock>,
    tz: Tz,
    next_job_id: AtomicU64,
}

impl SchedulerEngine {
    pub fn new(
        tz: Tz,
        timer: Arc<dyn Timer>,
        dispatcher: Arc<dyn TriggerDispatcher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                registry: JobRegistry::new(),
                timer,
                dispatcher,
                clock,
                tz,
                next_job_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn timezone(&self) -> Tz {
        self.inner.tz
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.inner.clock.now()
    }

    /// Install the jobs for `definition` and return how many were installed.
    ///
    /// Not idempotent: calling twice without a `disarm` in between leaves two
    /// sets of jobs. Use [`ensure_armed`](Self::ensure_armed) when that
    /// pairing cannot be guaranteed.
    pub fn arm(&self, definition: &ScheduleDefinition) -> usize {
        self.inner.arm(definition)
    }

    /// Disarm, then arm again if the definition is still active.
    pub fn rearm(&self, definition: &ScheduleDefinition) -> usize {
        self.inner.disarm(&definition.id);
        if definition.active {
            self.inner.arm(definition)
        } else {
            0
        }
    }

    /// Idempotent arm: any jobs already registered for the id are replaced.
    pub fn ensure_armed(&self, definition: &ScheduleDefinition) -> usize {
        self.inner.disarm(&definition.id);
        self.inner.arm(definition)
    }

    /// Cancel every job for `schedule_id`. Unknown ids are a no-op.
    pub fn disarm(&self, schedule_id: &str) -> usize {
        self.inner.disarm(schedule_id)
    }

    /// Disarm each id in turn.
    pub fn bulk_disarm<S: AsRef<str>>(&self, schedule_ids: &[S]) -> usize {
        schedule_ids
            .iter()
            .map(|id| self.inner.disarm(id.as_ref()))
            .sum()
    }

    /// Disarm every schedule. Used on process shutdown.
    pub fn shutdown(&self) -> usize {
        let ids = self.inner.registry.schedule_ids();
        let cancelled = self.bulk_disarm(&ids[..]);
        info!(schedules = ids.len(), jobs = cancelled, "scheduler engine shut down");
        cancelled
    }

    pub fn jobs(&self, schedule_id: &str) -> Vec<JobSnapshot> {
        self.inner.registry.get(schedule_id)
    }

    pub fn armed_schedule_ids(&self) -> Vec<String> {
        self.inner.registry.schedule_ids()
    }

    pub fn job_count(&self) -> usize {
        self.inner.registry.job_count()
    }
}

impl EngineInner {
    fn arm(self: &Arc<Self>, definition: &ScheduleDefinition) -> usize {
        let Some(schedule) = definition.schedule.as_ref() else {
            debug!(schedule_id = %definition.id, "no schedule attached, nothing to arm");
            return 0;
        };
        if !definition.active {
            debug!(schedule_id = %definition.id, "inactive schedule, nothing to arm");
            return 0;
        }
        if let Err(e) = definition.validate() {
            warn!(schedule_id = %definition.id, error = %e, "invalid schedule, nothing to arm");
            return 0;
        }

        let now = self.clock.now();
        let shared = Arc::new(definition.clone());

        match schedule {
            Schedule::Recurring(recurring) => {
                if !window_open(recurring, now, self.tz) {
                    info!(schedule_id = %definition.id, "recurring schedule outside its window, not armed");
                    return 0;
                }
                let Some(expression) = build_recurring_expression(recurring) else {
                    warn!(
                        schedule_id = %definition.id,
                        interval = %recurring.interval,
                        "no trigger expression for recurring schedule, not armed"
                    );
                    return 0;
                };

                let job_id = self.next_job_id();
                let fire = self.fire_fn(Arc::clone(&shared), JobKind::Cron, job_id);
                let handle = match self.timer.schedule_cron(&expression, fire) {
                    Ok(handle) => handle,
                    Err(e) => {
                        warn!(schedule_id = %definition.id, %expression, error = %e, "cron job rejected");
                        return 0;
                    }
                };
                self.registry.insert(Job {
                    id: job_id,
                    schedule_id: definition.id.clone(),
                    kind: JobKind::Cron,
                    handle,
                    armed_at: now,
                });
                info!(schedule_id = %definition.id, %expression, "cron job armed");
                1
            }
            Schedule::OneTime(one_time) => {
                let instants = build_one_time_instants(one_time, now, self.tz);
                if instants.is_empty() {
                    info!(schedule_id = %definition.id, "no future one-time dates, nothing armed");
                    return 0;
                }
                for at in &instants {
                    let job_id = self.next_job_id();
                    let fire = self.fire_fn(Arc::clone(&shared), JobKind::Timeout, job_id);
                    let delay = delay_until(at.with_timezone(&Utc), now);
                    let handle = self.timer.schedule_timeout(delay, fire);
                    self.registry.insert(Job {
                        id: job_id,
                        schedule_id: definition.id.clone(),
                        kind: JobKind::Timeout,
                        handle,
                        armed_at: now,
                    });
                    debug!(schedule_id = %definition.id, %job_id, fire_at = %at, "timeout job armed");
                }
                info!(schedule_id = %definition.id, jobs = instants.len(), "one-time jobs armed");
                instants.len()
            }
        }
    }

    fn disarm(&self, schedule_id: &str) -> usize {
        let cancelled = self.registry.cancel_all(schedule_id);
        if cancelled > 0 {
            info!(schedule_id, jobs = cancelled, "schedule disarmed");
        } else {
            debug!(schedule_id, "disarm: nothing registered");
        }
        cancelled
    }

    fn next_job_id(&self) -> JobId {
        JobId(self.next_job_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Build the timer callback for one job.
    ///
    /// Holds only a weak reference to the engine so registered timers do not
    /// keep it alive. Dispatch runs on its own task.
    fn fire_fn(
        self: &Arc<Self>,
        definition: Arc<ScheduleDefinition>,
        kind: JobKind,
        job_id: JobId,
    ) -> FireFn {
        let engine: Weak<EngineInner> = Arc::downgrade(self);
        Arc::new(move || {
            let Some(engine) = engine.upgrade() else {
                return;
            };
            if kind == JobKind::Timeout {
                engine.registry.remove_job(&definition.id, job_id);
            }
            let definition = Arc::clone(&definition);
            tokio::spawn(async move {
                engine.dispatch(definition, job_id).await;
            });
        })
    }

    async fn dispatch(self: Arc<Self>, definition: Arc<ScheduleDefinition>, job_id: JobId) {
        let outcome = AssertUnwindSafe(self.dispatcher.on_fire(&definition))
            .catch_unwind()
            .await;
        match outcome {
            Ok(Ok(())) => debug!(schedule_id = %definition.id, %job_id, "notification dispatched"),
            Ok(Err(e)) => {
                warn!(schedule_id = %definition.id, %job_id, error = %e, "dispatch failed")
            }
            Err(_) => error!(schedule_id = %definition.id, %job_id, "dispatcher panicked"),
        }

        // A bounded window that has now closed retires the job that fired.
        // Only that job: a rearm may already have installed replacements.
        if let Some(Schedule::Recurring(recurring)) = &definition.schedule {
            if let Some(end) = end_of_window(recurring, self.tz) {
                if self.clock.now() >= end.with_timezone(&Utc)
                    && self.registry.cancel_job(&definition.id, job_id)
                {
                    info!(schedule_id = %definition.id, %job_id, "recurring window closed after firing");
                }
            }
        }
    }
}
