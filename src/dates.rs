//! Datetime formats
//!
//! `iso`/`iso8601` and `rfc`/`rfc822` name the two standard formats; any
//! other string is used as a strftime pattern.

use std::fmt::{self, Write};

use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, FixedOffset, Local, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SchemaError};

/// How datetimes are rendered and parsed
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(from = "String", into = "String")]
pub enum DateFormat {
    #[default]
    Iso,
    Rfc,
    Custom(String),
}

impl DateFormat {
    pub fn parse(name: &str) -> Self {
        match name {
            "iso" | "iso8601" => DateFormat::Iso,
            "rfc" | "rfc822" => DateFormat::Rfc,
            other => DateFormat::Custom(other.to_string()),
        }
    }

    /// Reject strftime patterns chrono cannot render
    pub fn check(&self) -> Result<()> {
        if let DateFormat::Custom(pattern) = self {
            if StrftimeItems::new(pattern).any(|item| matches!(item, Item::Error)) {
                return Err(SchemaError::Config(format!(
                    "invalid datetime format {:?}",
                    pattern
                )));
            }
        }
        Ok(())
    }

    /// Render a datetime, optionally shifted into the local timezone first
    pub fn format(
        &self,
        dt: &DateTime<FixedOffset>,
        localtime: bool,
    ) -> std::result::Result<String, String> {
        let dt = if localtime {
            dt.with_timezone(&Local).fixed_offset()
        } else {
            *dt
        };
        match self {
            DateFormat::Iso => Ok(dt.to_rfc3339()),
            DateFormat::Rfc => Ok(dt.to_rfc2822()),
            DateFormat::Custom(pattern) => {
                let mut out = String::new();
                write!(out, "{}", dt.format(pattern))
                    .map_err(|_| format!("Cannot format datetime with {:?}.", pattern))?;
                Ok(out)
            }
        }
    }

    /// Parse a datetime; inputs without an offset are taken as UTC
    pub fn parse_datetime(&self, input: &str) -> Option<DateTime<FixedOffset>> {
        match self {
            DateFormat::Iso => DateTime::parse_from_rfc3339(input).ok().or_else(|| {
                ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
                    .iter()
                    .find_map(|p| NaiveDateTime::parse_from_str(input, p).ok())
                    .map(|naive| naive.and_utc().fixed_offset())
            }),
            DateFormat::Rfc => DateTime::parse_from_rfc2822(input).ok(),
            DateFormat::Custom(pattern) => DateTime::parse_from_str(input, pattern)
                .ok()
                .or_else(|| {
                    NaiveDateTime::parse_from_str(input, pattern)
                        .ok()
                        .map(|naive| naive.and_utc().fixed_offset())
                }),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            DateFormat::Iso => "iso",
            DateFormat::Rfc => "rfc",
            DateFormat::Custom(pattern) => pattern,
        }
    }
}

impl fmt::Display for DateFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl From<String> for DateFormat {
    fn from(s: String) -> Self {
        DateFormat::parse(&s)
    }
}

impl From<&str> for DateFormat {
    fn from(s: &str) -> Self {
        DateFormat::parse(s)
    }
}

impl From<DateFormat> for String {
    fn from(f: DateFormat) -> Self {
        f.name().to_string()
    }
}

pub(crate) fn format_date(d: &NaiveDate) -> String {
    d.format("%Y-%m-%d").to_string()
}

pub(crate) fn parse_date(input: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(input, "%Y-%m-%d").ok()
}

/// ISO time, truncated to milliseconds when there is a fractional part
pub(crate) fn format_time(t: &NaiveTime) -> String {
    use chrono::Timelike;
    if t.nanosecond() == 0 {
        t.format("%H:%M:%S").to_string()
    } else {
        t.format("%H:%M:%S%.3f").to_string()
    }
}

pub(crate) fn parse_time(input: &str) -> Option<NaiveTime> {
    ["%H:%M:%S%.f", "%H:%M"]
        .iter()
        .find_map(|p| NaiveTime::parse_from_str(input, p).ok())
}
