//! Enforcement window evaluation
//!
//! Two schedule forms are supported:
//! - a simple daily range (`start_time`..`end_time` on a set of weekdays)
//! - a cron expression, where each trigger arms enforcement for the following minute
//!
//! Malformed schedules never report an open window, so a typo in the config
//! leaves files writable instead of locking them indefinitely.

use chrono::{DateTime, Datelike, Duration as ChronoDuration, NaiveTime, TimeZone, Timelike};
use serde::{Deserialize, Serialize};
use regex::Regex;
use std::str::FromStr;
use std::sync::LazyLock;
use std::time::Duration;

use crate::constants::{SCHEDULE_FALLBACK_DELAY, SCHEDULE_LOOKAHEAD_DAYS};

/// Errors raised while validating a schedule
#[derive(Debug, thiserror::Error)]
pub enum ScheduleError {
    #[error("Invalid time '{0}': expected HH:MM")]
    InvalidTime(String),
    #[error("End time {end} must be later than start time {start}")]
    EmptyRange { start: String, end: String },
    #[error("Invalid day {0}: must be 1-7 (Mon-Sun)")]
    InvalidDay(u8),
    #[error("No days configured")]
    NoDays,
    #[error("Invalid cron expression '{expression}': {reason}")]
    InvalidCron { expression: String, reason: String },
}

/// Daily time range on selected weekdays
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TimeRange {
    /// Window start, "HH:MM", inclusive
    pub start_time: String,
    /// Window end, "HH:MM", exclusive
    pub end_time: String,
    /// ISO weekdays, 1 = Monday .. 7 = Sunday
    pub days: Vec<u8>,
}

/// Cron-driven schedule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CronSchedule {
    pub cron: String,
}

/// Persisted schedule; exactly one representation is active
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Schedule {
    Range(TimeRange),
    Cron(CronSchedule),
}

impl Schedule {
    pub fn range(start_time: &str, end_time: &str, days: Vec<u8>) -> Self {
        Schedule::Range(TimeRange {
            start_time: start_time.to_string(),
            end_time: end_time.to_string(),
            days,
        })
    }

    pub fn cron(expression: &str) -> Self {
        Schedule::Cron(CronSchedule {
            cron: expression.to_string(),
        })
    }

    /// Strict validation used when a schedule is written by the CLI
    pub fn validate(&self) -> Result<(), ScheduleError> {
        match self {
            Schedule::Range(range) => {
                let start = parse_clock_time(&range.start_time)?;
                let end = parse_clock_time(&range.end_time)?;
                if end <= start {
                    return Err(ScheduleError::EmptyRange {
                        start: range.start_time.clone(),
                        end: range.end_time.clone(),
                    });
                }
                if range.days.is_empty() {
                    return Err(ScheduleError::NoDays);
                }
                if let Some(day) = range.days.iter().find(|d| !(1..=7).contains(*d)) {
                    return Err(ScheduleError::InvalidDay(*day));
                }
                Ok(())
            }
            Schedule::Cron(c) => parse_cron(&c.cron).map(|_| ()),
        }
    }

    /// Is `now` inside an enforcement window
    pub fn is_within_window<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> bool {
        match self {
            Schedule::Range(range) => range.is_within_window(now),
            Schedule::Cron(c) => cron_is_armed(&c.cron, now),
        }
    }

    /// Delay until the next window opens; zero when already inside one
    pub fn time_until_next_window<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> Duration {
        if self.is_within_window(now) {
            return Duration::ZERO;
        }
        match self {
            Schedule::Range(range) => range.time_until_next_window(now),
            Schedule::Cron(c) => cron_time_until_next(&c.cron, now),
        }
    }

    /// Short human description for status output
    pub fn describe(&self) -> String {
        match self {
            Schedule::Range(range) => format!(
                "{} - {} (Days: {})",
                range.start_time,
                range.end_time,
                format_days(&range.days)
            ),
            Schedule::Cron(c) => format!("cron \"{}\"", c.cron),
        }
    }
}

impl TimeRange {
    fn bounds(&self) -> Option<(NaiveTime, NaiveTime)> {
        let start = parse_clock_time(&self.start_time).ok()?;
        let end = parse_clock_time(&self.end_time).ok()?;
        (end > start).then_some((start, end))
    }

    fn is_within_window<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> bool {
        let Some((start, end)) = self.bounds() else {
            return false;
        };

        let weekday = now.weekday().number_from_monday() as u8;
        if !self.days.contains(&weekday) {
            return false;
        }

        // Minute granularity: seconds inside the start minute count as inside
        let current = match NaiveTime::from_hms_opt(now.hour(), now.minute(), 0) {
            Some(t) => t,
            None => return false,
        };
        current >= start && current < end
    }

    fn time_until_next_window<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> Duration {
        let Some((start, _)) = self.bounds() else {
            return SCHEDULE_FALLBACK_DELAY;
        };

        let tz = now.timezone();
        let today = now.date_naive();
        for offset in 0..SCHEDULE_LOOKAHEAD_DAYS {
            let day = today + ChronoDuration::days(offset as i64);
            let weekday = day.weekday().number_from_monday() as u8;
            if !self.days.contains(&weekday) {
                continue;
            }
            // Nonexistent local times (DST gaps) fall through to the next day
            let Some(candidate) = tz.from_local_datetime(&day.and_time(start)).earliest() else {
                continue;
            };
            if candidate > *now {
                return (candidate - now.clone()).to_std().unwrap_or(SCHEDULE_FALLBACK_DELAY);
            }
        }

        SCHEDULE_FALLBACK_DELAY
    }
}

/// Parse a cron expression, accepting classic five-field syntax
pub fn parse_cron(expression: &str) -> Result<cron::Schedule, ScheduleError> {
    let trimmed = expression.trim();
    let normalized = if trimmed.split_whitespace().count() == 5 {
        format!("0 {}", trimmed)
    } else {
        trimmed.to_string()
    };

    cron::Schedule::from_str(&normalized).map_err(|e| ScheduleError::InvalidCron {
        expression: expression.to_string(),
        reason: e.to_string(),
    })
}

/// Round down to the start of the minute
fn floor_to_minute<Tz: TimeZone>(now: &DateTime<Tz>) -> Option<DateTime<Tz>> {
    now.with_second(0)?.with_nanosecond(0)
}

/// A cron window is open for the minute following each trigger: the next
/// trigger computed from one minute before the current minute must not be
/// later than the current minute.
fn cron_is_armed<Tz: TimeZone>(expression: &str, now: &DateTime<Tz>) -> bool {
    let Ok(schedule) = parse_cron(expression) else {
        return false;
    };
    let Some(minute) = floor_to_minute(now) else {
        return false;
    };
    let previous = minute.clone() - ChronoDuration::minutes(1);

    match schedule.after(&previous).next() {
        Some(next) => next <= minute,
        None => false,
    }
}

fn cron_time_until_next<Tz: TimeZone>(expression: &str, now: &DateTime<Tz>) -> Duration {
    let Ok(schedule) = parse_cron(expression) else {
        return SCHEDULE_FALLBACK_DELAY;
    };

    schedule
        .after(now)
        .next()
        .and_then(|next| (next - now.clone()).to_std().ok())
        .unwrap_or(SCHEDULE_FALLBACK_DELAY)
}

fn parse_clock_time(input: &str) -> Result<NaiveTime, ScheduleError> {
    NaiveTime::parse_from_str(input.trim(), "%H:%M")
        .map_err(|_| ScheduleError::InvalidTime(input.to_string()))
}

/// Normalize a range such as "0800-1700", "8-17" or "08:00-17:00" into ("HH:MM", "HH:MM")
pub fn normalize_time_range(input: &str) -> Result<(String, String), ScheduleError> {
    let parts: Vec<&str> = input.split('-').collect();
    if parts.len() != 2 {
        return Err(ScheduleError::InvalidTime(input.to_string()));
    }
    Ok((normalize_time(parts[0])?, normalize_time(parts[1])?))
}

static NON_DIGITS: LazyLock<Result<Regex, regex::Error>> = LazyLock::new(|| Regex::new(r"\D"));

fn normalize_time(input: &str) -> Result<String, ScheduleError> {
    let input = input.trim();

    if input.contains(':') {
        let parsed = parse_clock_time(input)?;
        return Ok(parsed.format("%H:%M").to_string());
    }

    let non_digits = NON_DIGITS
        .as_ref()
        .map_err(|_| ScheduleError::InvalidTime(input.to_string()))?;
    let digits = non_digits.replace_all(input, "").to_string();

    let (hour, minute) = match digits.len() {
        1 | 2 => (digits.as_str(), "00"),
        3 => (&digits[..1], &digits[1..]),
        4 => (&digits[..2], &digits[2..]),
        _ => return Err(ScheduleError::InvalidTime(input.to_string())),
    };

    let hour: u32 = hour.parse().map_err(|_| ScheduleError::InvalidTime(input.to_string()))?;
    let minute: u32 = minute.parse().map_err(|_| ScheduleError::InvalidTime(input.to_string()))?;
    NaiveTime::from_hms_opt(hour, minute, 0)
        .map(|t| t.format("%H:%M").to_string())
        .ok_or_else(|| ScheduleError::InvalidTime(input.to_string()))
}

/// Parse "1-5" or "1,3,5" (or a mix) into deduplicated ISO weekdays
pub fn parse_days(input: &str) -> Result<Vec<u8>, ScheduleError> {
    let mut days = Vec::new();

    for part in input.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let (start, end) = match part.split_once('-') {
            Some((a, b)) => (parse_day(a)?, parse_day(b)?),
            None => {
                let day = parse_day(part)?;
                (day, day)
            }
        };
        if start > end {
            return Err(ScheduleError::InvalidDay(start));
        }
        for day in start..=end {
            if !days.contains(&day) {
                days.push(day);
            }
        }
    }

    if days.is_empty() {
        return Err(ScheduleError::NoDays);
    }
    Ok(days)
}

fn parse_day(input: &str) -> Result<u8, ScheduleError> {
    let day: u8 = input
        .trim()
        .parse()
        .map_err(|_| ScheduleError::InvalidDay(0))?;
    if !(1..=7).contains(&day) {
        return Err(ScheduleError::InvalidDay(day));
    }
    Ok(day)
}

/// Format ISO weekdays as "Mon, Tue, ..."
pub fn format_days(days: &[u8]) -> String {
    const NAMES: [&str; 7] = ["Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];

    let mut sorted = days.to_vec();
    sorted.sort_unstable();
    sorted
        .iter()
        .filter_map(|d| NAMES.get((*d as usize).wrapping_sub(1)))
        .copied()
        .collect::<Vec<_>>()
        .join(", ")
}
