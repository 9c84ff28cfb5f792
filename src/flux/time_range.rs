//! Time Range Resolver
//!
//! Turns the user's time range input into a canonical `(start, stop)` pair of
//! UTC RFC 3339 timestamps. Two input shapes are supported:
//!
//! - a combined pair of zone-aware instants (`from` / `to`)
//! - a legacy split pair: a calendar date plus a time-of-day string per end
//!
//! Resolution never fails. Anything unusable falls back to the trailing hour
//! ending now.

use chrono::{
    DateTime, Duration, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, SecondsFormat, Utc,
};
use serde::Serialize;
use thiserror::Error;

/// Start/stop pair ready to be pasted into a `range()` call
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedRange {
    pub start: String,
    pub stop: String,
}

impl ResolvedRange {
    pub fn new(start: DateTime<Utc>, stop: DateTime<Utc>) -> Self {
        Self {
            start: format_instant(start),
            stop: format_instant(stop),
        }
    }

    /// The one-hour window ending at `now`
    pub fn trailing_hour(now: DateTime<Utc>) -> Self {
        Self::new(hour_before(now), now)
    }
}

/// Everything the user entered for the time range
#[derive(Debug, Clone, PartialEq)]
pub struct TimeRangeInput {
    /// Combined start; takes precedence over the legacy fields when either end is set
    pub from: Option<DateTime<FixedOffset>>,
    /// Combined stop
    pub to: Option<DateTime<FixedOffset>>,
    /// Legacy start date, interpreted as UTC
    pub from_date: Option<NaiveDate>,
    /// Legacy start time of day (`HH:MM[:SS[.fff]]`)
    pub from_time: String,
    /// Legacy stop date, interpreted as UTC
    pub to_date: Option<NaiveDate>,
    /// Legacy stop time of day
    pub to_time: String,
}

impl Default for TimeRangeInput {
    fn default() -> Self {
        Self {
            from: None,
            to: None,
            from_date: None,
            from_time: "00:00:00".to_string(),
            to_date: None,
            to_time: "23:59:59".to_string(),
        }
    }
}

impl TimeRangeInput {
    /// Combined-pair input
    pub fn between(from: Option<DateTime<FixedOffset>>, to: Option<DateTime<FixedOffset>>) -> Self {
        Self {
            from,
            to,
            ..Default::default()
        }
    }

    /// Legacy split input
    pub fn split(
        from_date: Option<NaiveDate>,
        from_time: &str,
        to_date: Option<NaiveDate>,
        to_time: &str,
    ) -> Self {
        Self {
            from_date,
            from_time: from_time.to_string(),
            to_date,
            to_time: to_time.to_string(),
            ..Default::default()
        }
    }

    /// Resolve against the current clock
    pub fn resolve(&self) -> ResolvedRange {
        self.resolve_at(Utc::now())
    }

    /// Resolve with an explicit "now"; the same input and `now` always give the same text
    pub fn resolve_at(&self, now: DateTime<Utc>) -> ResolvedRange {
        if self.from.is_some() || self.to.is_some() {
            let start = self
                .from
                .map(|t| t.with_timezone(&Utc))
                .unwrap_or_else(|| hour_before(now));
            let stop = self.to.map(|t| t.with_timezone(&Utc)).unwrap_or(now);
            return ResolvedRange::new(start, stop);
        }

        match self.resolve_split(now) {
            Some(range) => range,
            None => {
                tracing::warn!("Could not compose time range, using the trailing hour");
                ResolvedRange::trailing_hour(now)
            }
        }
    }

    fn resolve_split(&self, now: DateTime<Utc>) -> Option<ResolvedRange> {
        let default_start = now.checked_sub_signed(Duration::hours(1))?;
        let start = compose(
            self.from_date,
            &self.from_time,
            default_start,
            NaiveTime::from_hms_opt(0, 0, 0)?,
        );
        let stop = compose(
            self.to_date,
            &self.to_time,
            now,
            NaiveTime::from_hms_opt(23, 59, 59)?,
        );
        Some(ResolvedRange::new(start, stop))
    }
}

/// Combine one end of the legacy split representation.
///
/// A missing date borrows the date of `default_instant`; an unparsable time
/// falls back to `fallback_time`. With neither, `default_instant` is used as is.
fn compose(
    date: Option<NaiveDate>,
    time_text: &str,
    default_instant: DateTime<Utc>,
    fallback_time: NaiveTime,
) -> DateTime<Utc> {
    match (date, parse_time_of_day(time_text)) {
        (Some(d), Some(t)) => d.and_time(t).and_utc(),
        (Some(d), None) => d.and_time(fallback_time).and_utc(),
        (None, Some(t)) => default_instant.date_naive().and_time(t).and_utc(),
        (None, None) => default_instant,
    }
}

/// Parse `HH:MM`, `HH:MM:SS` or `HH:MM:SS.fff`
pub fn parse_time_of_day(text: &str) -> Option<NaiveTime> {
    let text = text.trim();
    ["%H:%M:%S%.f", "%H:%M:%S", "%H:%M"]
        .iter()
        .find_map(|fmt| NaiveTime::parse_from_str(text, fmt).ok())
}

/// Canonical output form: RFC 3339, UTC, `Z` suffix, fractional seconds only when present
pub fn format_instant(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

fn hour_before(now: DateTime<Utc>) -> DateTime<Utc> {
    now.checked_sub_signed(Duration::hours(1)).unwrap_or(now)
}

/// Error for user-entered instants that cannot be understood
#[derive(Debug, Error, PartialEq, Eq)]
#[error("Cannot parse time: {0}")]
pub struct TimeParseError(pub String);

/// Parse a user-entered instant.
///
/// Accepts `now`, `now-<n><unit>` with unit `m`, `h`, `d` or `w`, RFC 3339,
/// `YYYY-MM-DD HH:MM:SS` and `YYYY-MM-DD` (the last two as UTC).
pub fn parse_instant(s: &str, now: DateTime<Utc>) -> Result<DateTime<FixedOffset>, TimeParseError> {
    let s = s.trim();
    let utc = |t: DateTime<Utc>| t.fixed_offset();

    if s.starts_with("now") {
        if s == "now" {
            return Ok(utc(now));
        }

        let re = regex::Regex::new(r"^now-(\d+)([mhdw])$")
            .map_err(|e| TimeParseError(e.to_string()))?;

        if let Some(caps) = re.captures(s) {
            let amount: i64 = caps[1]
                .parse()
                .map_err(|_| TimeParseError(s.to_string()))?;

            let delta = match &caps[2] {
                "m" => Duration::try_minutes(amount),
                "h" => Duration::try_hours(amount),
                "d" => Duration::try_days(amount),
                "w" => Duration::try_weeks(amount),
                _ => None,
            };

            return delta
                .and_then(|d| now.checked_sub_signed(d))
                .map(utc)
                .ok_or_else(|| TimeParseError(s.to_string()));
        }

        return Err(TimeParseError(s.to_string()));
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt);
    }

    if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Ok(utc(dt.and_utc()));
    }

    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        if let Some(dt) = date.and_hms_opt(0, 0, 0) {
            return Ok(utc(dt.and_utc()));
        }
    }

    Err(TimeParseError(s.to_string()))
}
