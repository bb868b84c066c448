//! Timer primitives behind the scheduler engine.
//!
//! The engine never spawns timers itself; it asks a [`Timer`] to install
//! one and keeps the returned [`JobHandle`] in the registry. Production code
//! uses [`TokioTimer`]; tests substitute a manual timer that fires on demand.

use std::sync::Arc;
use std::time::Duration;

use campus_core::Clock;
use chrono::{DateTime, NaiveDateTime, Utc};
use chrono_tz::Tz;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::error::Result;
use crate::occurrence::TriggerExpression;

/// Callback invoked every time a job fires. Must not block.
pub type FireFn = Arc<dyn Fn() + Send + Sync>;

/// Cancellable handle to an installed timer.
#[derive(Debug, Clone, Default)]
pub struct JobHandle {
    token: CancellationToken,
}

impl JobHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stop the timer. Idempotent.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

/// Installs repeating and one-shot timers.
pub trait Timer: Send + Sync {
    /// Fire `fire` on every slot matched by `expression` until cancelled.
    fn schedule_cron(&self, expression: &TriggerExpression, fire: FireFn) -> Result<JobHandle>;

    /// Fire `fire` once after `delay`, unless cancelled first.
    fn schedule_timeout(&self, delay: Duration, fire: FireFn) -> JobHandle;
}

/// Tokio-backed timers.
///
/// Cron jobs run a ticker at a fixed cadence and fire when a slot of the
/// expression, evaluated in `tz`, fell between the previous tick and now.
/// Must be used from within a Tokio runtime.
pub struct TokioTimer {
    tz: Tz,
    tick: Duration,
    clock: Arc<dyn Clock>,
}

impl TokioTimer {
    pub fn new(tz: Tz, tick: Duration, clock: Arc<dyn Clock>) -> Self {
        Self { tz, tick, clock }
    }
}

impl Timer for TokioTimer {
    fn schedule_cron(&self, expression: &TriggerExpression, fire: FireFn) -> Result<JobHandle> {
        let schedule = expression.to_cron_schedule()?;
        let handle = JobHandle::new();
        let token = handle.token().clone();
        let clock = Arc::clone(&self.clock);
        let tz = self.tz;
        let tick = self.tick;
        // Anchor before spawning so a slot between arming and the first tick still counts.
        let mut last_check = clock.now().with_timezone(&tz);
        let label = expression.to_string();
        // On a DST fall-back day a wall-clock slot occurs twice; fire the first only.
        let mut last_fired: Option<NaiveDateTime> = None;

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        debug!(expression = %label, "cron ticker stopped");
                        break;
                    }
                    _ = interval.tick() => {
                        let now = clock.now().with_timezone(&tz);
                        if let Some(slot) = schedule.after(&last_check).next() {
                            if slot <= now {
                                let wall_clock = slot.naive_local();
                                if last_fired == Some(wall_clock) {
                                    trace!(expression = %label, %slot, "repeated local slot skipped");
                                } else {
                                    trace!(expression = %label, %slot, "cron slot due");
                                    last_fired = Some(wall_clock);
                                    fire();
                                }
                            }
                        }
                        last_check = now;
                    }
                }
            }
        });

        Ok(handle)
    }

    fn schedule_timeout(&self, delay: Duration, fire: FireFn) -> JobHandle {
        let handle = JobHandle::new();
        let token = handle.token().clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(delay) => fire(),
            }
        });
        handle
    }
}

/// Delay from `now` until `at`, zero if `at` is already past.
pub fn delay_until(at: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (at - now).to_std().unwrap_or(Duration::ZERO)
}
