//! Entry points the surrounding application calls when definitions change
//! or the process starts.

use std::sync::Arc;

use campus_core::config::ReconcileConfig;
use tracing::{debug, info};

use crate::{
    engine::SchedulerEngine,
    error::Result,
    reconcile::{ReconcileReport, StartupReconciler},
    store::ScheduleStore,
    types::ScheduleDefinition,
};

pub struct NotificationLifecycle {
    engine: SchedulerEngine,
    store: Arc<dyn ScheduleStore>,
    reconcile: ReconcileConfig,
}

impl NotificationLifecycle {
    pub fn new(
        engine: SchedulerEngine,
        store: Arc<dyn ScheduleStore>,
        reconcile: ReconcileConfig,
    ) -> Self {
        Self {
            engine,
            store,
            reconcile,
        }
    }

    pub fn engine(&self) -> &SchedulerEngine {
        &self.engine
    }

    /// A definition was just persisted.
    pub fn on_schedule_created(&self, definition: &ScheduleDefinition) -> usize {
        let jobs = self.engine.arm(definition);
        debug!(schedule_id = %definition.id, jobs, "schedule created");
        jobs
    }

    /// A definition was modified: old jobs go, new ones are installed if it
    /// is still active.
    pub fn on_schedule_updated(&self, definition: &ScheduleDefinition) -> usize {
        let jobs = self.engine.rearm(definition);
        debug!(schedule_id = %definition.id, jobs, "schedule updated");
        jobs
    }

    pub fn on_schedule_deleted(&self, schedule_id: &str) -> usize {
        self.engine.disarm(schedule_id)
    }

    pub fn on_schedule_bulk_deleted(&self, schedule_ids: &[String]) -> usize {
        self.engine.bulk_disarm(schedule_ids)
    }

    /// Reload `schedule_id` from the store and rearm it, or disarm it when the
    /// row is gone. For callers that only know an id changed.
    pub fn on_schedule_changed(&self, schedule_id: &str) -> Result<usize> {
        match self.store.find_by_id(schedule_id)? {
            Some(definition) => Ok(self.engine.rearm(&definition)),
            None => {
                self.engine.disarm(schedule_id);
                Ok(0)
            }
        }
    }

    /// Run startup reconciliation, retrying store failures per the
    /// configured backoff. Call exactly once per process.
    pub async fn on_process_start(&self) -> Result<ReconcileReport> {
        info!(tz = %self.engine.timezone(), "reconciling persisted schedules");
        StartupReconciler::new(self.engine.clone(), self.store.clone())
            .run_with_backoff(&self.reconcile)
            .await
    }
}
