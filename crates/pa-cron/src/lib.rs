//! Pure functions over cron strings and composite schedule values: does an instant match an
//! expression, and what is the next instant that does. Shared by the scheduler and the HTTP
//! layer so both enforce identical rules (spec "CronEval").

use std::str::FromStr;

use chrono::{DateTime, Utc};
use cron::Schedule;

/// Interval schedules are capped at one year's worth of minutes.
pub const MAX_INTERVAL_MINUTES: i64 = 525_600;

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum CronError {
  #[error("invalid cron expression: {0}")]
  InvalidExpression(String),

  #[error("interval must be a positive integer number of minutes")]
  InvalidInterval,

  #[error("interval exceeds maximum of {MAX_INTERVAL_MINUTES} minutes")]
  IntervalTooLarge,

  #[error("invalid ISO-8601 instant: {0}")]
  InvalidInstant(String),
}

/// A 5-field expression omits seconds (assumed `0`); a 6-field expression supplies them. The
/// `cron` crate itself requires 6 or 7 fields (seconds first, optional trailing year), so a
/// bare 5-field Unix-style string is normalized by prefixing `0 `.
fn normalize(expr: &str) -> String {
  let field_count = expr.split_whitespace().count();
  if field_count == 5 {
    format!("0 {expr}")
  } else {
    expr.to_string()
  }
}

/// Parse and validate a cron expression, per spec §4.6. Does not evaluate it against any instant.
pub fn validate(expr: &str) -> Result<(), CronError> {
  let normalized = normalize(expr);
  Schedule::from_str(&normalized).map_err(|e| CronError::InvalidExpression(e.to_string()))?;
  Ok(())
}

/// Smallest instant strictly greater than `from` whose components match every field of `expr`.
/// Bounded to two years of iteration at the library's native granularity; returns `None` if no
/// match is found in that window (treated as "never fires").
pub fn next_after(expr: &str, from: DateTime<Utc>) -> Result<Option<DateTime<Utc>>, CronError> {
  let normalized = normalize(expr);
  let schedule =
    Schedule::from_str(&normalized).map_err(|e| CronError::InvalidExpression(e.to_string()))?;

  let bound = from + chrono::Duration::days(365 * 2);
  for candidate in schedule.after(&from) {
    if candidate > bound {
      return Ok(None);
    }
    return Ok(Some(candidate));
  }
  Ok(None)
}

/// Validate an `interval` schedule value: a positive integer count of minutes, capped at
/// [`MAX_INTERVAL_MINUTES`].
pub fn validate_interval_minutes(value: &str) -> Result<i64, CronError> {
  let minutes: i64 = value.trim().parse().map_err(|_| CronError::InvalidInterval)?;
  if minutes <= 0 {
    return Err(CronError::InvalidInterval);
  }
  if minutes > MAX_INTERVAL_MINUTES {
    return Err(CronError::IntervalTooLarge);
  }
  Ok(minutes)
}

/// Validate a `once` schedule value: an ISO-8601 instant.
pub fn validate_once_instant(value: &str) -> Result<DateTime<Utc>, CronError> {
  DateTime::parse_from_rfc3339(value)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| CronError::InvalidInstant(e.to_string()))
}
