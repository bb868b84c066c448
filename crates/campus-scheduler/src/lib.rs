//! `campus-scheduler`: arms timers for persisted notification schedules.
//!
//! # Overview
//!
//! Each [`types::ScheduleDefinition`] is turned into timer jobs by the
//! [`engine::SchedulerEngine`]. Jobs live only in memory; on boot the
//! [`reconcile::StartupReconciler`] reloads the store and re-arms every
//! definition that can still fire. When a job fires, the engine hands the
//! definition to a [`dispatch::TriggerDispatcher`].
//!
//! # Schedule variants
//!
//! | Variant              | Armed as                                        |
//! |----------------------|-------------------------------------------------|
//! | `OneTime`            | One timeout per listed date still in the future |
//! | `Recurring` daily    | Cron `M H * * *`                                |
//! | `Recurring` weekly   | Cron `M H * * <weekdays, 0 = Sunday>`           |
//! | `Recurring` monthly  | Cron `M H <month days> * *`                     |
//!
//! All wall-clock values are interpreted in one configured IANA timezone.

pub mod db;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod lifecycle;
pub mod occurrence;
pub mod reconcile;
pub mod registry;
pub mod store;
pub mod timer;
pub mod types;

#[cfg(test)]
mod test_support;

pub use dispatch::{ChannelDispatcher, FiredNotification, TriggerDispatcher};
pub use engine::SchedulerEngine;
pub use error::{Result, SchedulerError};
pub use lifecycle::NotificationLifecycle;
pub use reconcile::{ReconcileReport, StartupReconciler};
pub use store::{ScheduleStore, SqliteScheduleStore};
pub use timer::{Timer, TokioTimer};
pub use types::{Interval, Schedule, ScheduleDefinition};
