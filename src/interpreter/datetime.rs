//! Datetime and duration values.
//!
//! Durations keep calendar months separate from fixed days/seconds so that
//! `@2024-01-31 + 1mo` lands on the last day of February instead of drifting
//! by a fixed number of seconds.

use chrono::{DateTime, Datelike, Days, Months, NaiveDate, NaiveTime, TimeZone, Timelike, Utc};

use crate::interpreter::error::RuntimeError;

/// A calendar-aware duration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Duration {
    pub months: i32,
    pub days: i64,
    pub secs: i64,
}

impl Duration {
    pub fn new(months: i32, days: i64, secs: i64) -> Self {
        Self { months, days, secs }
    }

    pub fn from_secs(secs: i64) -> Self {
        Self {
            months: 0,
            days: 0,
            secs,
        }
    }

    pub fn add(&self, other: &Duration) -> Duration {
        Duration::new(
            self.months + other.months,
            self.days + other.days,
            self.secs + other.secs,
        )
    }

    pub fn negate(&self) -> Duration {
        Duration::new(-self.months, -self.days, -self.secs)
    }

    pub fn scale(&self, n: i64) -> Duration {
        Duration::new(
            self.months * n as i32,
            self.days * n,
            self.secs * n,
        )
    }

    /// Render in literal form, largest unit first: `1mo2d`, `90m` as `1h30m`
    pub fn format(&self) -> String {
        if self.months == 0 && self.days == 0 && self.secs == 0 {
            return "0s".to_string();
        }
        let mut out = String::new();
        let months = self.months;
        if months != 0 {
            let years = months / 12;
            let rem = months % 12;
            if years != 0 {
                out.push_str(&format!("{}y", years));
            }
            if rem != 0 {
                out.push_str(&format!("{}mo", rem));
            }
        }
        let days = self.days;
        if days != 0 {
            let weeks = days / 7;
            let rem = days % 7;
            if weeks != 0 {
                out.push_str(&format!("{}w", weeks));
            }
            if rem != 0 {
                out.push_str(&format!("{}d", rem));
            }
        }
        let secs = self.secs;
        if secs != 0 {
            let hours = secs / 3600;
            let minutes = (secs % 3600) / 60;
            let rem = secs % 60;
            if hours != 0 {
                out.push_str(&format!("{}h", hours));
            }
            if minutes != 0 {
                out.push_str(&format!("{}m", minutes));
            }
            if rem != 0 {
                out.push_str(&format!("{}s", rem));
            }
        }
        out
    }
}

/// Precision a datetime literal was written with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatetimeKind {
    Date,
    Time,
    Datetime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Datetime {
    pub instant: DateTime<Utc>,
    pub kind: DatetimeKind,
}

impl Datetime {
    pub fn now() -> Self {
        Self {
            instant: Utc::now(),
            kind: DatetimeKind::Datetime,
        }
    }

    /// Parse a literal body: `2024-12-25`, `2024-12-25T14:30:00Z`,
    /// `2024-12-25T14:30+02:00`, or a bare time `14:30[:05]`
    pub fn parse(raw: &str) -> Result<Self, RuntimeError> {
        if !raw.contains('-') {
            let time = NaiveTime::parse_from_str(raw, "%H:%M:%S")
                .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M"))
                .map_err(|_| {
                    RuntimeError::bad_syntax(format!("invalid time literal '@{}'", raw))
                })?;
            let date = NaiveDate::from_ymd_opt(1970, 1, 1).unwrap_or_default();
            return Ok(Self {
                instant: Utc.from_utc_datetime(&date.and_time(time)),
                kind: DatetimeKind::Time,
            });
        }
        if let Some((date_part, time_part)) = raw.split_once('T') {
            // normalize to full RFC 3339: seconds and offset are optional
            // in literals
            let (clock, offset) = if let Some(stripped) = time_part.strip_suffix('Z') {
                (stripped.to_string(), "Z".to_string())
            } else if let Some(idx) = time_part.find(['+', '-']) {
                (
                    time_part[..idx].to_string(),
                    time_part[idx..].to_string(),
                )
            } else {
                (time_part.to_string(), "Z".to_string())
            };
            let clock = if clock.matches(':').count() == 1 {
                format!("{}:00", clock)
            } else {
                clock
            };
            let normalized = format!("{}T{}{}", date_part, clock, offset);
            let instant = DateTime::parse_from_rfc3339(&normalized)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|_| {
                    RuntimeError::bad_syntax(format!("invalid datetime literal '@{}'", raw))
                })?;
            return Ok(Self {
                instant,
                kind: DatetimeKind::Datetime,
            });
        }
        let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|_| {
            RuntimeError::bad_syntax(format!("invalid date literal '@{}'", raw))
        })?;
        Ok(Self {
            instant: Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0).unwrap_or_default()),
            kind: DatetimeKind::Date,
        })
    }

    /// Add a duration with calendar-aware month arithmetic
    pub fn add_duration(&self, d: &Duration) -> Result<Datetime, RuntimeError> {
        let mut instant = self.instant;
        if d.months != 0 {
            instant = if d.months > 0 {
                instant
                    .checked_add_months(Months::new(d.months as u32))
                    .ok_or_else(|| RuntimeError::user_failure("datetime overflow"))?
            } else {
                instant
                    .checked_sub_months(Months::new((-d.months) as u32))
                    .ok_or_else(|| RuntimeError::user_failure("datetime overflow"))?
            };
        }
        if d.days != 0 {
            instant = if d.days > 0 {
                instant
                    .checked_add_days(Days::new(d.days as u64))
                    .ok_or_else(|| RuntimeError::user_failure("datetime overflow"))?
            } else {
                instant
                    .checked_sub_days(Days::new((-d.days) as u64))
                    .ok_or_else(|| RuntimeError::user_failure("datetime overflow"))?
            };
        }
        if d.secs != 0 {
            instant += chrono::Duration::seconds(d.secs);
        }
        Ok(Datetime {
            instant,
            kind: self.kind,
        })
    }

    pub fn sub_duration(&self, d: &Duration) -> Result<Datetime, RuntimeError> {
        self.add_duration(&d.negate())
    }

    /// Difference between two instants as a seconds-only duration
    pub fn diff(&self, other: &Datetime) -> Duration {
        Duration::from_secs((self.instant - other.instant).num_seconds())
    }

    pub fn year(&self) -> i64 {
        self.instant.year() as i64
    }
    pub fn month(&self) -> i64 {
        self.instant.month() as i64
    }
    pub fn day(&self) -> i64 {
        self.instant.day() as i64
    }
    pub fn hour(&self) -> i64 {
        self.instant.hour() as i64
    }
    pub fn minute(&self) -> i64 {
        self.instant.minute() as i64
    }
    pub fn second(&self) -> i64 {
        self.instant.second() as i64
    }
    pub fn weekday(&self) -> String {
        self.instant.format("%A").to_string()
    }
    pub fn unix(&self) -> i64 {
        self.instant.timestamp()
    }

    pub fn iso(&self) -> String {
        match self.kind {
            DatetimeKind::Date => self.instant.format("%Y-%m-%d").to_string(),
            DatetimeKind::Time => self.instant.format("%H:%M:%S").to_string(),
            DatetimeKind::Datetime => self.instant.to_rfc3339(),
        }
    }

    /// strftime-style formatting
    pub fn format_with(&self, pattern: &str) -> String {
        self.instant.format(pattern).to_string()
    }

    /// Render in literal form with the `@` sigil
    pub fn format(&self) -> String {
        match self.kind {
            DatetimeKind::Date => format!("@{}", self.instant.format("%Y-%m-%d")),
            DatetimeKind::Time => format!("@{}", self.instant.format("%H:%M:%S")),
            DatetimeKind::Datetime => {
                format!("@{}", self.instant.format("%Y-%m-%dT%H:%M:%SZ"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_date_time_and_datetime_literals() {
        let d = Datetime::parse("2024-12-25").unwrap();
        assert_eq!(d.kind, DatetimeKind::Date);
        assert_eq!(d.year(), 2024);

        let t = Datetime::parse("14:30").unwrap();
        assert_eq!(t.kind, DatetimeKind::Time);
        assert_eq!(t.hour(), 14);

        let dt = Datetime::parse("2024-12-25T14:30:00Z").unwrap();
        assert_eq!(dt.kind, DatetimeKind::Datetime);
        assert_eq!(dt.minute(), 30);

        let offset = Datetime::parse("2024-12-25T14:30+02:00").unwrap();
        assert_eq!(offset.hour(), 12);
    }

    #[test]
    fn month_arithmetic_clamps_to_month_end() {
        let jan31 = Datetime::parse("2024-01-31").unwrap();
        let plus_month = jan31.add_duration(&Duration::new(1, 0, 0)).unwrap();
        assert_eq!(plus_month.month(), 2);
        assert_eq!(plus_month.day(), 29); // 2024 is a leap year
    }

    #[test]
    fn datetime_difference_is_seconds() {
        let a = Datetime::parse("2024-12-25T14:30:00Z").unwrap();
        let b = Datetime::parse("2024-12-25T12:30:00Z").unwrap();
        assert_eq!(a.diff(&b), Duration::from_secs(7200));
    }

    #[test]
    fn duration_formats_largest_unit_first() {
        assert_eq!(Duration::from_secs(5400).format(), "1h30m");
        assert_eq!(Duration::new(14, 0, 0).format(), "1y2mo");
        assert_eq!(Duration::new(0, 9, 0).format(), "1w2d");
        assert_eq!(Duration::default().format(), "0s");
    }

    #[test]
    fn invalid_literal_is_a_syntax_error() {
        let err = Datetime::parse("2024-13-45").unwrap_err();
        assert_eq!(err.code, "SYN-0100");
        assert!(!err.is_catchable());
    }
}
