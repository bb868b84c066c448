//! Read side of the schedule definitions, plus a SQLite implementation.

use std::sync::Mutex;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::{info, warn};

use crate::{db::init_db, error::Result, types::ScheduleDefinition};

/// What the scheduler needs from persistence. The engine itself never calls
/// this; only the reconciler and the lifecycle hooks do.
pub trait ScheduleStore: Send + Sync {
    /// Active definitions that carry a schedule.
    fn find_active_schedules_with_definition(&self) -> Result<Vec<ScheduleDefinition>>;

    /// A single definition by id, active or not.
    fn find_by_id(&self, id: &str) -> Result<Option<ScheduleDefinition>>;
}

/// `ScheduleStore` over a SQLite connection.
///
/// The write methods are for the admin layer that owns the definitions;
/// callers notify the scheduler through the lifecycle hooks afterwards.
pub struct SqliteScheduleStore {
    conn: Mutex<Connection>,
}

type RawRow = (String, bool, String, Option<String>);

impl SqliteScheduleStore {
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().expect("schedule store mutex poisoned")
    }

    /// Insert or replace a definition. `created_at` survives replacement.
    pub fn save(&self, definition: &ScheduleDefinition) -> Result<()> {
        definition.validate()?;
        let schedule_json = definition
            .schedule
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let now = Utc::now().to_rfc3339();

        self.conn().execute(
            "INSERT INTO notification_schedules
             (id, active, notification_kind, schedule, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)
             ON CONFLICT(id) DO UPDATE SET
                active = excluded.active,
                notification_kind = excluded.notification_kind,
                schedule = excluded.schedule,
                updated_at = excluded.updated_at",
            params![
                definition.id,
                definition.active,
                definition.notification_kind,
                schedule_json,
                now
            ],
        )?;
        info!(schedule_id = %definition.id, active = definition.active, "schedule saved");
        Ok(())
    }

    /// Returns `false` when no row matched.
    pub fn delete(&self, id: &str) -> Result<bool> {
        let n = self
            .conn()
            .execute("DELETE FROM notification_schedules WHERE id = ?1", [id])?;
        if n > 0 {
            info!(schedule_id = %id, "schedule deleted");
        }
        Ok(n > 0)
    }

    /// Delete every listed id in one transaction. Returns rows removed.
    pub fn delete_many(&self, ids: &[String]) -> Result<usize> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let mut removed = 0;
        {
            let mut stmt = tx.prepare("DELETE FROM notification_schedules WHERE id = ?1")?;
            for id in ids {
                removed += stmt.execute([id])?;
            }
        }
        tx.commit()?;
        info!(requested = ids.len(), removed, "schedules bulk deleted");
        Ok(removed)
    }

    fn read_row(row: &Row<'_>) -> rusqlite::Result<RawRow> {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
    }
}

/// Decode a row; rows whose schedule JSON no longer parses are logged and
/// treated as absent so one bad record cannot block the rest.
fn decode((id, active, notification_kind, schedule_json): RawRow) -> Option<ScheduleDefinition> {
    let schedule = match schedule_json {
        None => None,
        Some(json) => match serde_json::from_str(&json) {
            Ok(schedule) => Some(schedule),
            Err(e) => {
                warn!(schedule_id = %id, error = %e, "undecodable schedule, row skipped");
                return None;
            }
        },
    };
    Some(ScheduleDefinition {
        id,
        active,
        notification_kind,
        schedule,
    })
}

impl ScheduleStore for SqliteScheduleStore {
    fn find_active_schedules_with_definition(&self) -> Result<Vec<ScheduleDefinition>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, active, notification_kind, schedule
             FROM notification_schedules
             WHERE active = 1 AND schedule IS NOT NULL
             ORDER BY created_at, id",
        )?;
        let rows = stmt
            .query_map([], Self::read_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows.into_iter().filter_map(decode).collect())
    }

    fn find_by_id(&self, id: &str) -> Result<Option<ScheduleDefinition>> {
        let row = self
            .conn()
            .query_row(
                "SELECT id, active, notification_kind, schedule
                 FROM notification_schedules WHERE id = ?1",
                [id],
                Self::read_row,
            )
            .optional()?;
        Ok(row.and_then(decode))
    }
}
