//! Next fire time computation.
//!
//! All instants leave this module in UTC. Timezones only matter while
//! evaluating cron fields and while reading instants written without an offset.

use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use cron::Schedule;

use crate::error::ScheduleError;
use crate::job::{Job, JobType, NewJob};

/// Longest accepted recurring period: 100 years of 366 days.
const MAX_PERIOD_SECS: u64 = 100 * 366 * 24 * 3600;

/// Instants are persisted as four-digit-year RFC 3339 text.
const MAX_YEAR: i32 = 9999;

/// Crontab day-of-week numbers, where both 0 and 7 are Sunday.
const WEEKDAYS: [&str; 8] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT", "SUN"];

/// Local date-time layouts accepted when an instant carries no offset.
const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// The schedule-relevant fields of a job.
#[derive(Debug, Clone, Copy)]
pub struct ScheduleSpec<'a> {
    pub job_type: JobType,
    pub schedule: &'a str,
    pub period_secs: Option<u64>,
    pub timezone: Option<&'a str>,
}

impl<'a> ScheduleSpec<'a> {
    pub fn of(job: &'a Job) -> Self {
        Self {
            job_type: job.job_type,
            schedule: &job.schedule,
            period_secs: job.period_secs,
            timezone: job.timezone.as_deref(),
        }
    }

    pub fn of_new(job: &'a NewJob) -> Self {
        Self {
            job_type: job.job_type,
            schedule: &job.schedule,
            period_secs: job.period_secs,
            timezone: job.timezone.as_deref(),
        }
    }
}

/// Converts schedules into fire times.
#[derive(Debug, Clone, Copy)]
pub struct ScheduleCalculator {
    default_tz: Tz,
}

impl Default for ScheduleCalculator {
    fn default() -> Self {
        Self::new(Tz::UTC)
    }
}

impl ScheduleCalculator {
    pub fn new(default_tz: Tz) -> Self {
        Self { default_tz }
    }

    /// Calculator whose default zone is the IANA zone `name`.
    pub fn from_timezone_name(name: &str) -> Result<Self, ScheduleError> {
        Ok(Self::new(parse_timezone(name)?))
    }

    pub fn default_timezone(&self) -> Tz {
        self.default_tz
    }

    /// Check that `spec` is well-formed without evaluating it against a clock.
    pub fn validate(&self, spec: &ScheduleSpec<'_>) -> Result<(), ScheduleError> {
        let tz = self.resolve_timezone(spec.timezone)?;
        match spec.job_type {
            JobType::Cron => parse_cron(spec.schedule).map(|_| ()),
            JobType::Scheduled => parse_instant(spec.schedule, tz).map(|_| ()),
            JobType::Recurring => {
                parse_instant(spec.schedule, tz)?;
                period(spec.period_secs).map(|_| ())
            }
        }
    }

    /// First fire time strictly after `reference`.
    ///
    /// `Ok(None)` means the schedule has nothing left to fire: a one-time
    /// instant at or before `reference`, or a cron expression with no future match.
    pub fn next_fire_time(
        &self,
        spec: &ScheduleSpec<'_>,
        reference: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, ScheduleError> {
        let tz = self.resolve_timezone(spec.timezone)?;
        match spec.job_type {
            JobType::Cron => {
                let schedule = parse_cron(spec.schedule)?;
                Ok(schedule.next_after(tz, reference).filter(storable))
            }
            JobType::Scheduled => {
                let at = parse_instant(spec.schedule, tz)?;
                Ok((at > reference).then_some(at))
            }
            JobType::Recurring => {
                let anchor = parse_instant(spec.schedule, tz)?;
                let period = period(spec.period_secs)?;
                Ok(next_recurring(anchor, period, reference).filter(storable))
            }
        }
    }

    fn resolve_timezone(&self, name: Option<&str>) -> Result<Tz, ScheduleError> {
        match name {
            Some(name) => parse_timezone(name),
            None => Ok(self.default_tz),
        }
    }
}

fn parse_timezone(name: &str) -> Result<Tz, ScheduleError> {
    name.parse::<Tz>()
        .map_err(|_| ScheduleError::UnknownTimezone(name.to_string()))
}

/// A cron expression, held as two schedules when both day fields are restricted.
///
/// Crontab fires when either day-of-month or day-of-week matches, while a
/// single [`Schedule`] requires both, so the two day fields are evaluated
/// separately and the earlier match wins.
#[derive(Debug)]
struct CronSchedule {
    schedules: Vec<Schedule>,
}

impl CronSchedule {
    fn next_after(&self, tz: Tz, reference: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let local = reference.with_timezone(&tz);
        self.schedules
            .iter()
            .filter_map(|schedule| {
                schedule
                    .after(&local)
                    .map(|at| at.with_timezone(&Utc))
                    .find(|at| *at > reference)
            })
            .min()
    }
}

/// Parse a 5-field (minute precision) or 6-field (seconds first) expression.
///
/// Day-of-week numbers follow the usual crontab convention (0 or 7 = Sunday)
/// and are rewritten to names before parsing.
fn parse_cron(expr: &str) -> Result<CronSchedule, ScheduleError> {
    let fields: Vec<&str> = expr.split_whitespace().collect();
    let mut fields: Vec<String> = match fields.len() {
        5 => std::iter::once("0")
            .chain(fields)
            .map(str::to_string)
            .collect(),
        6 => fields.into_iter().map(str::to_string).collect(),
        n => {
            return Err(ScheduleError::InvalidCron {
                expr: expr.to_string(),
                message: format!("expected 5 or 6 fields, got {n}"),
            });
        }
    };
    fields[5] = weekday_names(&fields[5]);

    let variants = if restricts_days(&fields[3]) && restricts_days(&fields[5]) {
        let mut by_month_day = fields.clone();
        by_month_day[5] = "*".to_string();
        let mut by_weekday = fields;
        by_weekday[3] = "*".to_string();
        vec![by_month_day, by_weekday]
    } else {
        vec![fields]
    };

    let schedules = variants
        .iter()
        .map(|fields| {
            Schedule::from_str(&fields.join(" ")).map_err(|e| ScheduleError::InvalidCron {
                expr: expr.to_string(),
                message: e.to_string(),
            })
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(CronSchedule { schedules })
}

/// A day field that narrows the match, as opposed to `*`, `*/n` or `?`.
fn restricts_days(field: &str) -> bool {
    !field.starts_with('*') && field != "?"
}

fn weekday_names(field: &str) -> String {
    let name = |token: &str| match token.parse::<usize>() {
        Ok(n) if n < WEEKDAYS.len() => WEEKDAYS[n].to_string(),
        _ => token.to_string(),
    };

    field
        .split(',')
        .map(|item| {
            let (range, step) = match item.split_once('/') {
                Some((range, step)) => (range, Some(step)),
                None => (item, None),
            };
            let range = match range.split_once('-') {
                Some((start, "7")) => {
                    if let Some(days) = through_sunday(start, step) {
                        return days;
                    }
                    format!("{}-SUN", name(start))
                }
                Some((start, end)) => format!("{}-{}", name(start), name(end)),
                None => name(range),
            };
            match step {
                Some(step) => format!("{range}/{step}"),
                None => range,
            }
        })
        .collect::<Vec<_>>()
        .join(",")
}

/// Spell out `N-7[/step]`; as names the range would run backwards from N to SUN.
fn through_sunday(start: &str, step: Option<&str>) -> Option<String> {
    let start = start.parse::<usize>().ok().filter(|start| *start <= 7)?;
    let step = match step {
        Some(step) => step.parse::<usize>().ok().filter(|step| *step > 0)?,
        None => 1,
    };

    let mut days: Vec<&str> = Vec::new();
    for day in (start..=7).step_by(step).map(|n| WEEKDAYS[n]) {
        if !days.contains(&day) {
            days.push(day);
        }
    }
    Some(days.join(","))
}

fn storable(at: &DateTime<Utc>) -> bool {
    (0..=MAX_YEAR).contains(&at.year())
}

/// RFC 3339 with offset, or a local date-time read in `tz`.
fn parse_instant(value: &str, tz: Tz) -> Result<DateTime<Utc>, ScheduleError> {
    let value = value.trim();
    let at = match DateTime::parse_from_rfc3339(value) {
        Ok(at) => at.with_timezone(&Utc),
        Err(_) => parse_local(value, tz)?,
    };
    if !storable(&at) {
        return Err(ScheduleError::InvalidInstant {
            value: value.to_string(),
            message: format!("year must be between 0000 and {MAX_YEAR}"),
        });
    }
    Ok(at)
}

fn parse_local(value: &str, tz: Tz) -> Result<DateTime<Utc>, ScheduleError> {
    let naive = NAIVE_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .ok_or_else(|| ScheduleError::InvalidInstant {
            value: value.to_string(),
            message: "expected RFC 3339 or YYYY-MM-DDTHH:MM[:SS]".to_string(),
        })?;

    tz.from_local_datetime(&naive)
        .earliest()
        .map(|at| at.with_timezone(&Utc))
        .ok_or_else(|| ScheduleError::InvalidInstant {
            value: value.to_string(),
            message: format!("does not exist in {}", tz.name()),
        })
}

fn period(period_secs: Option<u64>) -> Result<Duration, ScheduleError> {
    match period_secs {
        Some(secs) if secs > MAX_PERIOD_SECS => Err(ScheduleError::PeriodTooLong(secs)),
        Some(secs) if secs > 0 => i64::try_from(secs)
            .ok()
            .and_then(Duration::try_seconds)
            .ok_or(ScheduleError::PeriodTooLong(secs)),
        _ => Err(ScheduleError::MissingPeriod),
    }
}

/// First `anchor + k * period` (k >= 0) strictly after `reference`.
///
/// `None` when that instant is beyond what chrono can represent.
fn next_recurring(
    anchor: DateTime<Utc>,
    period: Duration,
    reference: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    if anchor > reference {
        return Some(anchor);
    }
    let elapsed = (reference - anchor).num_milliseconds();
    let step = period.num_milliseconds();
    let offset = (elapsed / step + 1).checked_mul(step)?;
    anchor.checked_add_signed(Duration::try_milliseconds(offset)?)
}

#[cfg(test)]
#[path = "schedule_tests.rs"]
mod tests;
