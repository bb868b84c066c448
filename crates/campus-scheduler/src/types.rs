use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SchedulerError};

/// A persisted notification schedule, as read from the schedule store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleDefinition {
    /// Stable identifier, primary key in the store.
    pub id: String,
    /// Inactive definitions are never armed.
    pub active: bool,
    /// Opaque tag forwarded to the trigger dispatcher (e.g. `"welcome"`,
    /// `"completion_reminder"`, `"enrollment_digest"`).
    pub notification_kind: String,
    /// `None` for purely event-triggered notifications.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<Schedule>,
}

impl ScheduleDefinition {
    /// Check the structural invariants of the attached schedule.
    pub fn validate(&self) -> Result<()> {
        match &self.schedule {
            None => Ok(()),
            Some(Schedule::OneTime(one_time)) => {
                if one_time.dates.is_empty() {
                    return Err(SchedulerError::InvalidSchedule(format!(
                        "{}: one-time schedule has no dates",
                        self.id
                    )));
                }
                Ok(())
            }
            Some(Schedule::Recurring(recurring)) => recurring
                .validate()
                .map_err(|reason| SchedulerError::InvalidSchedule(format!("{}: {reason}", self.id))),
        }
    }
}

/// When a notification fires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Schedule {
    /// An explicit list of calendar dates sharing one time of day.
    OneTime(OneTimeSchedule),
    /// A daily, weekly or monthly pattern.
    Recurring(RecurringSchedule),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OneTimeSchedule {
    /// Local calendar dates in the engine timezone.
    pub dates: Vec<NaiveDate>,
    #[serde(with = "wall_clock")]
    pub time: NaiveTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecurringSchedule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<NaiveDate>,
    /// Ignored when `never_end` is set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<NaiveDate>,
    #[serde(default)]
    pub never_end: bool,
    #[serde(with = "wall_clock")]
    pub time: NaiveTime,
    pub interval: Interval,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub week_days: Option<Vec<WeekDay>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub month_dates: Option<Vec<MonthDay>>,
}

impl RecurringSchedule {
    /// The effective end date: `None` when never-ending or unbounded.
    pub fn effective_end(&self) -> Option<NaiveDate> {
        if self.never_end {
            None
        } else {
            self.end_date
        }
    }

    /// `true` when an end date applies to this schedule.
    pub fn is_bounded(&self) -> bool {
        self.effective_end().is_some()
    }

    fn validate(&self) -> std::result::Result<(), String> {
        let has_week_days = self.week_days.as_ref().is_some_and(|d| !d.is_empty());
        let has_month_dates = self.month_dates.as_ref().is_some_and(|d| !d.is_empty());
        match self.interval {
            Interval::Weekly if !has_week_days => Err("weekly schedule needs week_days".into()),
            Interval::Monthly if !has_month_dates => {
                Err("monthly schedule needs month_dates".into())
            }
            Interval::Unknown => Err("unknown interval".into()),
            Interval::Daily | Interval::Monthly if has_week_days => {
                Err("week_days is only valid for weekly schedules".into())
            }
            Interval::Daily | Interval::Weekly if has_month_dates => {
                Err("month_dates is only valid for monthly schedules".into())
            }
            _ => Ok(()),
        }
    }
}

/// Recurrence interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Interval {
    Daily,
    Weekly,
    Monthly,
    /// Any stored value this engine does not understand. Never armed.
    #[serde(other)]
    Unknown,
}

impl std::fmt::Display for Interval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Interval::Daily => "daily",
            Interval::Weekly => "weekly",
            Interval::Monthly => "monthly",
            Interval::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

/// Day-of-week ordinal, `0 = Sunday … 6 = Saturday`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct WeekDay(u8);

impl WeekDay {
    pub const SUNDAY: WeekDay = WeekDay(0);
    pub const MONDAY: WeekDay = WeekDay(1);
    pub const TUESDAY: WeekDay = WeekDay(2);
    pub const WEDNESDAY: WeekDay = WeekDay(3);
    pub const THURSDAY: WeekDay = WeekDay(4);
    pub const FRIDAY: WeekDay = WeekDay(5);
    pub const SATURDAY: WeekDay = WeekDay(6);

    pub fn ordinal(self) -> u8 {
        self.0
    }

    /// Three-letter English name, as accepted by cron parsers.
    pub fn short_name(self) -> &'static str {
        ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat"][self.0 as usize]
    }
}

impl TryFrom<u8> for WeekDay {
    type Error = String;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        if value <= 6 {
            Ok(WeekDay(value))
        } else {
            Err(format!("weekday ordinal out of range 0-6: {value}"))
        }
    }
}

impl From<WeekDay> for u8 {
    fn from(day: WeekDay) -> u8 {
        day.0
    }
}

impl From<chrono::Weekday> for WeekDay {
    fn from(day: chrono::Weekday) -> Self {
        WeekDay(day.num_days_from_sunday() as u8)
    }
}

/// Day-of-month ordinal, `1 … 31`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct MonthDay(u8);

impl MonthDay {
    pub fn ordinal(self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for MonthDay {
    type Error = String;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        if (1..=31).contains(&value) {
            Ok(MonthDay(value))
        } else {
            Err(format!("day-of-month ordinal out of range 1-31: {value}"))
        }
    }
}

impl From<MonthDay> for u8 {
    fn from(day: MonthDay) -> u8 {
        day.0
    }
}

/// `"HH:MM"` wall-clock times (seconds accepted on input, dropped on output).
pub mod wall_clock {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(time: &NaiveTime, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&time.format("%H:%M").to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(d)?;
        parse(&raw).map_err(serde::de::Error::custom)
    }

    pub fn parse(raw: &str) -> Result<NaiveTime, String> {
        NaiveTime::parse_from_str(raw, "%H:%M:%S")
            .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M"))
            .map_err(|e| format!("invalid wall-clock time '{raw}': {e}"))
    }
}
