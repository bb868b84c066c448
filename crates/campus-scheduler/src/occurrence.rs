//! Pure occurrence arithmetic: trigger expressions for recurring schedules,
//! concrete instants for one-time schedules, and start/end window checks.
//!
//! Nothing here touches timers or the registry. Every function takes "now"
//! explicitly and interprets wall-clock values in the given timezone.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Timelike, Utc};
use chrono_tz::Tz;

use crate::error::{Result, SchedulerError};
use crate::types::{Interval, OneTimeSchedule, RecurringSchedule, WeekDay};

/// Minute/hour/day-of-month/day-of-week rule for a recurring schedule.
///
/// Empty day lists mean "every day". At most one of the two lists is ever
/// non-empty, so the usual cron OR between day-of-month and day-of-week
/// never comes into play.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerExpression {
    pub minute: u32,
    pub hour: u32,
    pub days_of_month: Vec<u8>,
    pub days_of_week: Vec<WeekDay>,
}

impl TriggerExpression {
    fn at(time: NaiveTime) -> Self {
        Self {
            minute: time.minute(),
            hour: time.hour(),
            days_of_month: Vec::new(),
            days_of_week: Vec::new(),
        }
    }

    /// Convert to a `cron` crate schedule (seconds field prepended).
    ///
    /// Weekdays are written by name because the `cron` crate numbers them
    /// from 1 = Sunday, unlike the 0 = Sunday ordinals used everywhere else.
    pub fn to_cron_schedule(&self) -> Result<cron::Schedule> {
        let dom = join_or_star(self.days_of_month.iter().map(u8::to_string));
        let dow = join_or_star(self.days_of_week.iter().map(|d| d.short_name().to_string()));
        let source = format!("0 {} {} {} * {}", self.minute, self.hour, dom, dow);
        cron::Schedule::from_str(&source)
            .map_err(|e| SchedulerError::InvalidSchedule(format!("'{source}': {e}")))
    }

    /// `true` if the expression fires at the given local date and time
    /// (seconds ignored).
    #[cfg(test)]
    pub(crate) fn matches(&self, date: NaiveDate, time: NaiveTime) -> bool {
        use chrono::Datelike;

        if time.hour() != self.hour || time.minute() != self.minute {
            return false;
        }
        let dom_ok = self.days_of_month.is_empty() || self.days_of_month.contains(&(date.day() as u8));
        let dow_ok = self.days_of_week.is_empty()
            || self.days_of_week.contains(&WeekDay::from(date.weekday()));
        dom_ok && dow_ok
    }
}

/// Standard 5-field form, e.g. `0 8 * * 1,3,5`.
impl fmt::Display for TriggerExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dom = join_or_star(self.days_of_month.iter().map(u8::to_string));
        let dow = join_or_star(self.days_of_week.iter().map(|d| d.ordinal().to_string()));
        write!(f, "{} {} {} * {}", self.minute, self.hour, dom, dow)
    }
}

fn join_or_star(parts: impl Iterator<Item = String>) -> String {
    let parts: Vec<String> = parts.collect();
    if parts.is_empty() {
        "*".to_string()
    } else {
        parts.join(",")
    }
}

/// Build the trigger expression for a recurring schedule.
///
/// Returns `None` for an unknown interval, or when a weekly/monthly schedule
/// carries no weekday/month-date ordinals. Callers treat `None` as
/// "nothing to arm".
pub fn build_recurring_expression(recurring: &RecurringSchedule) -> Option<TriggerExpression> {
    let mut expr = TriggerExpression::at(recurring.time);
    match recurring.interval {
        Interval::Daily => {}
        Interval::Weekly => {
            let mut days = recurring.week_days.clone().unwrap_or_default();
            days.sort_unstable();
            days.dedup();
            if days.is_empty() {
                return None;
            }
            expr.days_of_week = days;
        }
        Interval::Monthly => {
            let mut days: Vec<u8> = recurring
                .month_dates
                .iter()
                .flatten()
                .map(|d| d.ordinal())
                .collect();
            days.sort_unstable();
            days.dedup();
            if days.is_empty() {
                return None;
            }
            expr.days_of_month = days;
        }
        Interval::Unknown => return None,
    }
    Some(expr)
}

/// Every listed date at the shared time, keeping only instants strictly
/// after `now`. Duplicated dates yield duplicated instants.
pub fn build_one_time_instants(
    one_time: &OneTimeSchedule,
    now: DateTime<Utc>,
    tz: Tz,
) -> Vec<DateTime<Tz>> {
    one_time
        .dates
        .iter()
        .filter_map(|date| {
            let instant = local_instant(*date, one_time.time, tz);
            if instant.is_none() {
                tracing::warn!(%date, time = %one_time.time, %tz, "local time does not exist, date dropped");
            }
            instant
        })
        .filter(|at| at.with_timezone(&Utc) > now)
        .collect()
}

/// Resolve a local date and time in `tz`.
///
/// Ambiguous times (DST fall-back) resolve to the earlier instant;
/// non-existent times (DST spring-forward gap) yield `None`.
pub fn local_instant(date: NaiveDate, time: NaiveTime, tz: Tz) -> Option<DateTime<Tz>> {
    tz.from_local_datetime(&date.and_time(time)).earliest()
}

/// First instant of `date` in `tz`.
pub fn start_of_day(date: NaiveDate, tz: Tz) -> Option<DateTime<Tz>> {
    // A handful of zones skip local midnight on DST days; 01:00 always exists there.
    local_instant(date, NaiveTime::MIN, tz)
        .or_else(|| local_instant(date, NaiveTime::from_hms_opt(1, 0, 0)?, tz))
}

/// Exclusive end of a bounded recurring window: the start of the day after
/// `end_date`. `None` when the schedule never ends or has no end date.
pub fn end_of_window(recurring: &RecurringSchedule, tz: Tz) -> Option<DateTime<Tz>> {
    let end = recurring.effective_end()?;
    start_of_day(end.succ_opt()?, tz)
}

/// Whether a recurring schedule may be armed at `now`:
/// the start date has been reached and the end of the window has not.
pub fn window_open(recurring: &RecurringSchedule, now: DateTime<Utc>, tz: Tz) -> bool {
    let started = match recurring.start_date {
        None => true,
        Some(start) => start_of_day(start, tz).map_or(true, |s| now >= s.with_timezone(&Utc)),
    };
    let not_ended = match end_of_window(recurring, tz) {
        None => true,
        Some(end) => now < end.with_timezone(&Utc),
    };
    started && not_ended
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MonthDay;
    use chrono::Datelike;

    fn time(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn recurring(interval: Interval, t: NaiveTime) -> RecurringSchedule {
        RecurringSchedule {
            start_date: None,
            end_date: None,
            never_end: true,
            time: t,
            interval,
            week_days: None,
            month_dates: None,
        }
    }

    #[test]
    fn daily_expression_fires_every_day() {
        let rec = recurring(Interval::Daily, time(9, 30));
        let expr = build_recurring_expression(&rec).expect("daily expression");
        assert_eq!(expr.to_string(), "30 9 * * *");

        for day in 1..=31 {
            assert!(expr.matches(date(2026, 1, day), time(9, 30)));
        }
        assert!(!expr.matches(date(2026, 1, 5), time(9, 31)));
    }

    #[test]
    fn daily_cron_schedule_yields_consecutive_days() {
        let rec = recurring(Interval::Daily, time(9, 30));
        let schedule = build_recurring_expression(&rec)
            .unwrap()
            .to_cron_schedule()
            .unwrap();
        let from = Utc.with_ymd_and_hms(2026, 2, 27, 12, 0, 0).unwrap();
        let upcoming: Vec<_> = schedule.after(&from).take(3).collect();
        assert_eq!(upcoming[0], Utc.with_ymd_and_hms(2026, 2, 28, 9, 30, 0).unwrap());
        assert_eq!(upcoming[1], Utc.with_ymd_and_hms(2026, 3, 1, 9, 30, 0).unwrap());
        assert_eq!(upcoming[2], Utc.with_ymd_and_hms(2026, 3, 2, 9, 30, 0).unwrap());
    }

    #[test]
    fn weekly_expression_fires_only_on_listed_weekdays() {
        let mut rec = recurring(Interval::Weekly, time(8, 0));
        rec.week_days = Some(vec![WeekDay::FRIDAY, WeekDay::MONDAY, WeekDay::WEDNESDAY]);
        let expr = build_recurring_expression(&rec).unwrap();
        assert_eq!(expr.to_string(), "0 8 * * 1,3,5");

        // 2026-03-01 is a Sunday.
        let fired: Vec<u32> = (1..=7)
            .map(|d| date(2026, 3, d))
            .filter(|d| expr.matches(*d, time(8, 0)))
            .map(|d| d.weekday().num_days_from_sunday())
            .collect();
        assert_eq!(fired, vec![1, 3, 5]);
    }

    #[test]
    fn weekly_cron_schedule_uses_sunday_zero_ordinals() {
        let mut rec = recurring(Interval::Weekly, time(8, 0));
        rec.week_days = Some(vec![WeekDay::SUNDAY]);
        let schedule = build_recurring_expression(&rec)
            .unwrap()
            .to_cron_schedule()
            .unwrap();
        let from = Utc.with_ymd_and_hms(2026, 3, 2, 0, 0, 0).unwrap(); // Monday
        let next = schedule.after(&from).next().unwrap();
        assert_eq!(next.weekday(), chrono::Weekday::Sun);
        assert_eq!(next.date_naive(), date(2026, 3, 8));
    }

    #[test]
    fn monthly_expression_lists_month_dates() {
        let mut rec = recurring(Interval::Monthly, time(7, 0));
        rec.month_dates = Some(vec![
            MonthDay::try_from(15).unwrap(),
            MonthDay::try_from(1).unwrap(),
        ]);
        let expr = build_recurring_expression(&rec).unwrap();
        assert_eq!(expr.to_string(), "0 7 1,15 * *");
        assert!(expr.matches(date(2026, 4, 15), time(7, 0)));
        assert!(!expr.matches(date(2026, 4, 16), time(7, 0)));
    }

    #[test]
    fn unknown_interval_or_empty_ordinals_yield_no_expression() {
        assert!(build_recurring_expression(&recurring(Interval::Unknown, time(7, 0))).is_none());

        let mut weekly = recurring(Interval::Weekly, time(7, 0));
        weekly.week_days = Some(vec![]);
        assert!(build_recurring_expression(&weekly).is_none());

        let monthly = recurring(Interval::Monthly, time(7, 0));
        assert!(build_recurring_expression(&monthly).is_none());
    }

    #[test]
    fn past_one_time_dates_are_dropped() {
        let one_time = OneTimeSchedule {
            dates: vec![date(2020, 1, 1)],
            time: time(10, 0),
        };
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        assert!(build_one_time_instants(&one_time, now, Tz::UTC).is_empty());
    }

    #[test]
    fn one_time_instants_are_local_and_strictly_future() {
        let one_time = OneTimeSchedule {
            dates: vec![date(2026, 6, 1), date(2026, 6, 2), date(2026, 6, 2)],
            time: time(10, 0),
        };
        let tz: Tz = "Asia/Manila".parse().unwrap(); // UTC+8
        // Exactly 2026-06-01 10:00 Manila: the first date is not strictly future.
        let now = Utc.with_ymd_and_hms(2026, 6, 1, 2, 0, 0).unwrap();
        let instants = build_one_time_instants(&one_time, now, tz);
        assert_eq!(instants.len(), 2, "duplicates are kept");
        for at in &instants {
            assert_eq!(at.with_timezone(&Utc), Utc.with_ymd_and_hms(2026, 6, 2, 2, 0, 0).unwrap());
        }
    }

    #[test]
    fn dst_gap_times_are_dropped() {
        let tz: Tz = "America/New_York".parse().unwrap();
        let one_time = OneTimeSchedule {
            dates: vec![date(2026, 3, 8)], // clocks jump 02:00 -> 03:00
            time: time(2, 30),
        };
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        assert!(build_one_time_instants(&one_time, now, tz).is_empty());
    }

    #[test]
    fn window_respects_start_and_end_of_day() {
        let mut rec = recurring(Interval::Daily, time(9, 0));
        rec.never_end = false;
        rec.start_date = Some(date(2026, 5, 10));
        rec.end_date = Some(date(2026, 5, 20));

        let before = Utc.with_ymd_and_hms(2026, 5, 9, 23, 59, 0).unwrap();
        let first = Utc.with_ymd_and_hms(2026, 5, 10, 0, 0, 0).unwrap();
        let last_minute = Utc.with_ymd_and_hms(2026, 5, 20, 23, 59, 0).unwrap();
        let after = Utc.with_ymd_and_hms(2026, 5, 21, 0, 0, 0).unwrap();

        assert!(!window_open(&rec, before, Tz::UTC));
        assert!(window_open(&rec, first, Tz::UTC));
        assert!(window_open(&rec, last_minute, Tz::UTC));
        assert!(!window_open(&rec, after, Tz::UTC));

        rec.never_end = true;
        assert!(window_open(&rec, after, Tz::UTC));
        assert!(end_of_window(&rec, Tz::UTC).is_none());
    }
}
