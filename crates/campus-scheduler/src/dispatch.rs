//! Boundary between the scheduling engine and the delivery pipeline.

use std::sync::Arc;

use async_trait::async_trait;
use campus_core::Clock;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::error::{Result, SchedulerError};
use crate::types::ScheduleDefinition;

/// Receives every firing of an armed job.
///
/// Called from a spawned task, never from inside the timer itself. Errors
/// and panics are caught and logged by the engine; they never cancel the job.
#[async_trait]
pub trait TriggerDispatcher: Send + Sync {
    async fn on_fire(&self, definition: &ScheduleDefinition) -> Result<()>;
}

/// What the delivery pipeline receives for each firing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FiredNotification {
    pub schedule_id: String,
    pub notification_kind: String,
    pub fired_at: DateTime<Utc>,
}

/// Forwards firings over a bounded mpsc channel.
///
/// Uses `try_send` so a slow consumer can never stall the engine; a full or
/// closed channel is reported as a dispatch error and the firing is dropped.
pub struct ChannelDispatcher {
    tx: mpsc::Sender<FiredNotification>,
    clock: Arc<dyn Clock>,
}

impl ChannelDispatcher {
    pub fn new(tx: mpsc::Sender<FiredNotification>, clock: Arc<dyn Clock>) -> Self {
        Self { tx, clock }
    }
}

#[async_trait]
impl TriggerDispatcher for ChannelDispatcher {
    async fn on_fire(&self, definition: &ScheduleDefinition) -> Result<()> {
        let fired = FiredNotification {
            schedule_id: definition.id.clone(),
            notification_kind: definition.notification_kind.clone(),
            fired_at: self.clock.now(),
        };
        self.tx.try_send(fired).map_err(|e| {
            let reason = match e {
                TrySendError::Full(_) => "delivery channel full",
                TrySendError::Closed(_) => "delivery channel closed",
            };
            SchedulerError::Dispatch {
                schedule_id: definition.id.clone(),
                reason: reason.to_string(),
            }
        })
    }
}
