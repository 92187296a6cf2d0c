//! Cron expression parsing and next-fire computation.
//!
//! Standard 5-field expressions (`minute hour dom month dow`) with `*`,
//! lists, ranges, steps (`*/n`, `a-b/n`), and the `@hourly`-style aliases.
//! Day-of-week runs 0..7 where both 0 and 7 mean Sunday. Schedules that
//! would fire more often than every five minutes are rejected by
//! [`validate_schedule_frequency`], which gates routine registration.

use chrono::{DateTime, Datelike, Duration, TimeZone, Timelike, Utc};
use roost_core::error::ScheduleError;

/// Minimum interval between scheduled fires.
const MIN_INTERVAL_MS: i64 = 300_000;

/// Next-fire search horizon.
const SEARCH_HORIZON_DAYS: i64 = 366;

/// A parsed 5-field cron expression. Every field set is non-empty.
#[derive(Debug, Clone)]
pub struct CronSchedule {
    minutes: Vec<u32>,
    hours: Vec<u32>,
    days_of_month: Vec<u32>,
    months: Vec<u32>,
    /// 0=Sun .. 6=Sat; 7 in the source normalizes to 0.
    days_of_week: Vec<u32>,
}

/// Expand `@hourly`-style aliases into canonical expressions.
fn expand_alias(expr: &str) -> &str {
    match expr.trim() {
        "@hourly" => "0 * * * *",
        "@daily" => "0 0 * * *",
        "@weekly" => "0 0 * * 0",
        "@monthly" => "0 0 1 * *",
        "@yearly" | "@annually" => "0 0 1 1 *",
        other => other,
    }
}

impl CronSchedule {
    /// Parse a cron expression or alias.
    pub fn parse(expr: &str) -> Result<Self, ScheduleError> {
        let expanded = expand_alias(expr);
        let fields: Vec<&str> = expanded.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(ScheduleError::InvalidCron(format!(
                "expected 5 fields (minute hour dom month dow), got {}",
                fields.len()
            )));
        }

        let mut days_of_week = parse_field(fields[4], 0, 7)
            .map_err(|e| ScheduleError::InvalidCron(format!("day-of-week: {e}")))?;
        // 7 is an alias for Sunday.
        for dow in days_of_week.iter_mut() {
            if *dow == 7 {
                *dow = 0;
            }
        }
        days_of_week.sort_unstable();
        days_of_week.dedup();

        Ok(Self {
            minutes: parse_field(fields[0], 0, 59)
                .map_err(|e| ScheduleError::InvalidCron(format!("minute: {e}")))?,
            hours: parse_field(fields[1], 0, 23)
                .map_err(|e| ScheduleError::InvalidCron(format!("hour: {e}")))?,
            days_of_month: parse_field(fields[2], 1, 31)
                .map_err(|e| ScheduleError::InvalidCron(format!("day-of-month: {e}")))?,
            months: parse_field(fields[3], 1, 12)
                .map_err(|e| ScheduleError::InvalidCron(format!("month: {e}")))?,
            days_of_week,
        })
    }

    /// Whether the given instant matches this schedule.
    pub fn matches(&self, dt: &DateTime<Utc>) -> bool {
        self.minutes.contains(&dt.minute())
            && self.hours.contains(&dt.hour())
            && self.days_of_month.contains(&dt.day())
            && self.months.contains(&dt.month())
            && self.days_of_week.contains(&dt.weekday().num_days_from_sunday())
    }

    /// The next fire time strictly after `from`.
    ///
    /// Walks field by field: a mismatched month jumps to the next month, a
    /// mismatched day to the next midnight, a mismatched hour to the next
    /// whole hour, a mismatched minute one minute forward. The search is
    /// bounded at 366 days.
    pub fn next_fire(&self, from: DateTime<Utc>) -> Result<DateTime<Utc>, ScheduleError> {
        let mut t = truncate_to_minute(from) + Duration::minutes(1);
        let limit = t + Duration::days(SEARCH_HORIZON_DAYS);

        while t < limit {
            if !self.months.contains(&t.month()) {
                let (year, month) = if t.month() == 12 {
                    (t.year() + 1, 1)
                } else {
                    (t.year(), t.month() + 1)
                };
                t = Utc
                    .with_ymd_and_hms(year, month, 1, 0, 0, 0)
                    .single()
                    .ok_or_else(|| {
                        ScheduleError::NoFireTime(format!("date overflow at {year}-{month}"))
                    })?;
                continue;
            }
            if !self.days_of_month.contains(&t.day()) {
                t = next_midnight(t);
                continue;
            }
            if !self.days_of_week.contains(&t.weekday().num_days_from_sunday()) {
                t = next_midnight(t);
                continue;
            }
            if !self.hours.contains(&t.hour()) {
                t = (t + Duration::hours(1))
                    .with_minute(0)
                    .expect("zeroing minutes is always valid");
                continue;
            }
            if !self.minutes.contains(&t.minute()) {
                t += Duration::minutes(1);
                continue;
            }
            return Ok(t);
        }

        Err(ScheduleError::NoFireTime(format!(
            "no matching time within {SEARCH_HORIZON_DAYS} days"
        )))
    }
}

fn truncate_to_minute(t: DateTime<Utc>) -> DateTime<Utc> {
    t.with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .expect("zeroing seconds is always valid")
}

fn next_midnight(t: DateTime<Utc>) -> DateTime<Utc> {
    (t + Duration::days(1))
        .with_hour(0)
        .and_then(|t| t.with_minute(0))
        .expect("midnight is always valid")
}

/// Parse one cron field into its sorted value set.
///
/// Supports `*`, literals, `a,b` lists, `a-b` ranges, and `/n` steps over
/// `*` or a range.
fn parse_field(field: &str, min: u32, max: u32) -> Result<Vec<u32>, String> {
    let mut values = Vec::new();

    for part in field.split(',') {
        let part = part.trim();

        if let Some((base, step)) = part.split_once('/') {
            let step: u32 = step.parse().map_err(|_| format!("invalid step: {step}"))?;
            if step == 0 {
                return Err("step cannot be zero".into());
            }
            let (start, end) = if base == "*" {
                (min, max)
            } else if base.contains('-') {
                parse_range(base, min, max)?
            } else {
                let s: u32 = base.parse().map_err(|_| format!("invalid number: {base}"))?;
                (s, max)
            };
            let mut v = start;
            while v <= end {
                values.push(v);
                v += step;
            }
        } else if part.contains('-') {
            let (start, end) = parse_range(part, min, max)?;
            values.extend(start..=end);
        } else if part == "*" {
            values.extend(min..=max);
        } else {
            let v: u32 = part.parse().map_err(|_| format!("invalid number: {part}"))?;
            if v < min || v > max {
                return Err(format!("{v} out of range {min}-{max}"));
            }
            values.push(v);
        }
    }

    values.sort_unstable();
    values.dedup();
    if values.is_empty() {
        return Err("field produced no values".into());
    }
    Ok(values)
}

fn parse_range(s: &str, min: u32, max: u32) -> Result<(u32, u32), String> {
    let (start, end) = s.split_once('-').ok_or_else(|| format!("invalid range: {s}"))?;
    let start: u32 = start.parse().map_err(|_| format!("invalid range start: {start}"))?;
    let end: u32 = end.parse().map_err(|_| format!("invalid range end: {end}"))?;
    if start < min || end > max || start > end {
        return Err(format!("range {start}-{end} invalid for {min}-{max}"));
    }
    Ok((start, end))
}

/// Reject schedules that fire more often than every five minutes.
///
/// Both arguments are validated independently; either may be absent.
pub fn validate_schedule_frequency(
    cron: Option<&str>,
    interval_ms: Option<i64>,
) -> Result<(), ScheduleError> {
    if let Some(ms) = interval_ms {
        if ms < MIN_INTERVAL_MS {
            return Err(ScheduleError::TooFrequent(format!(
                "interval of {ms}ms is too short; minimum is 5 minutes"
            )));
        }
    }
    if let Some(expr) = cron {
        validate_cron_frequency_at(expr, Utc::now())?;
    }
    Ok(())
}

fn validate_cron_frequency_at(expr: &str, from: DateTime<Utc>) -> Result<(), ScheduleError> {
    let schedule = CronSchedule::parse(expr)?;
    let first = schedule.next_fire(from)?;
    let second = schedule.next_fire(first)?;
    let gap_ms = (second - first).num_milliseconds();
    if gap_ms < MIN_INTERVAL_MS {
        return Err(ScheduleError::TooFrequent(format!(
            "cron '{expr}' fires every {}s; minimum interval is 5 minutes",
            gap_ms / 1000
        )));
    }
    Ok(())
}
