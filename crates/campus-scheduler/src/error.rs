use thiserror::Error;

/// Errors that can occur within the scheduler subsystem.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Underlying SQLite / rusqlite error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A schedule column could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The provided schedule definition is invalid or unsupported.
    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),

    /// The trigger dispatcher failed to hand a firing downstream.
    #[error("Dispatch failed for {schedule_id}: {reason}")]
    Dispatch { schedule_id: String, reason: String },
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
