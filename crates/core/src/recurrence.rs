//! Repeat rules for tasks that come back after completion.
//!
//! Rules are written in a compact form such as `daily`, `2w`, `weekly:mon,thu`
//! or `3m until 2025-06-30`, and stored in that canonical text form.

use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, Duration, Months, NaiveDate, Weekday};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecurrenceError {
    #[error("Recurrence rule cannot be empty")]
    Empty,
    #[error("Recurrence interval must be at least 1")]
    ZeroInterval,
    #[error("Unrecognized recurrence '{0}'. Try daily, 2w, weekly:mon,wed or 3m")]
    Unrecognized(String),
    #[error("Unknown weekday '{0}'")]
    UnknownWeekday(String),
    #[error("Weekdays can only be combined with a weekly rule")]
    WeekdaysRequireWeekly,
    #[error("Invalid end date '{0}': expected YYYY-MM-DD")]
    InvalidUntil(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

impl Frequency {
    fn suffix(self) -> char {
        match self {
            Frequency::Daily => 'd',
            Frequency::Weekly => 'w',
            Frequency::Monthly => 'm',
            Frequency::Yearly => 'y',
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecurrenceRule {
    pub frequency: Frequency,
    pub interval: u32,
    /// Only meaningful for weekly rules; kept sorted Monday first.
    pub weekdays: Vec<Weekday>,
    pub until: Option<NaiveDate>,
}

impl RecurrenceRule {
    pub fn every(frequency: Frequency, interval: u32) -> Result<Self, RecurrenceError> {
        let rule = Self {
            frequency,
            interval,
            weekdays: Vec::new(),
            until: None,
        };
        rule.validate()?;
        Ok(rule)
    }

    pub fn validate(&self) -> Result<(), RecurrenceError> {
        if self.interval == 0 {
            return Err(RecurrenceError::ZeroInterval);
        }
        if !self.weekdays.is_empty() && self.frequency != Frequency::Weekly {
            return Err(RecurrenceError::WeekdaysRequireWeekly);
        }
        Ok(())
    }

    /// The first occurrence strictly after `date`, or `None` once the rule has ended.
    pub fn next_after(&self, date: NaiveDate) -> Option<NaiveDate> {
        let interval = self.interval.max(1);
        let next = match self.frequency {
            Frequency::Daily => date.checked_add_signed(Duration::days(interval.into()))?,
            Frequency::Weekly if self.weekdays.is_empty() => {
                date.checked_add_signed(Duration::weeks(interval.into()))?
            }
            Frequency::Weekly => self.next_weekday(date, interval)?,
            Frequency::Monthly => date.checked_add_months(Months::new(interval))?,
            Frequency::Yearly => date.checked_add_months(Months::new(interval.checked_mul(12)?))?,
        };

        match self.until {
            Some(until) if next > until => None,
            _ => Some(next),
        }
    }

    fn next_weekday(&self, date: NaiveDate, interval: u32) -> Option<NaiveDate> {
        let offset = date.weekday().num_days_from_monday();
        if let Some(day) = self
            .weekdays
            .iter()
            .find(|day| day.num_days_from_monday() > offset)
        {
            let ahead = day.num_days_from_monday() - offset;
            return date.checked_add_signed(Duration::days(ahead.into()));
        }

        let week_start = date.checked_sub_signed(Duration::days(offset.into()))?;
        let target_week = week_start.checked_add_signed(Duration::weeks(interval.into()))?;
        let first = self.weekdays.first()?;
        target_week.checked_add_signed(Duration::days(first.num_days_from_monday().into()))
    }
}

impl fmt::Display for RecurrenceRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.interval, self.frequency.suffix())?;
        if !self.weekdays.is_empty() {
            let days = self
                .weekdays
                .iter()
                .map(|day| weekday_label(*day))
                .collect::<Vec<_>>()
                .join(",");
            write!(f, ":{days}")?;
        }
        if let Some(until) = self.until {
            write!(f, " until {}", until.format("%Y-%m-%d"))?;
        }
        Ok(())
    }
}

impl FromStr for RecurrenceRule {
    type Err = RecurrenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        static RULE_RE: Lazy<Regex> = Lazy::new(|| {
            Regex::new(
                r"^(\d+)?\s*(d|days?|daily|w|weeks?|weekly|m|months?|monthly|y|years?|yearly)(?::([a-z,]+))?(?:\s+until\s+(\S+))?$",
            )
            .expect("valid regex")
        });

        let trimmed = s.trim().to_ascii_lowercase();
        if trimmed.is_empty() {
            return Err(RecurrenceError::Empty);
        }
        let caps = RULE_RE
            .captures(&trimmed)
            .ok_or_else(|| RecurrenceError::Unrecognized(s.trim().to_string()))?;

        let interval = match caps.get(1) {
            Some(raw) => raw
                .as_str()
                .parse::<u32>()
                .map_err(|_| RecurrenceError::Unrecognized(s.trim().to_string()))?,
            None => 1,
        };

        let frequency = match caps.get(2).map(|m| m.as_str()) {
            Some(unit) if unit.starts_with('d') => Frequency::Daily,
            Some(unit) if unit.starts_with('w') => Frequency::Weekly,
            Some(unit) if unit.starts_with('m') => Frequency::Monthly,
            Some(_) => Frequency::Yearly,
            None => return Err(RecurrenceError::Unrecognized(s.trim().to_string())),
        };

        let mut weekdays = Vec::new();
        if let Some(days) = caps.get(3) {
            for label in days.as_str().split(',').filter(|d| !d.is_empty()) {
                let day = parse_weekday(label)
                    .ok_or_else(|| RecurrenceError::UnknownWeekday(label.to_string()))?;
                if !weekdays.contains(&day) {
                    weekdays.push(day);
                }
            }
            weekdays.sort_by_key(|day| day.num_days_from_monday());
        }

        let until = match caps.get(4) {
            Some(raw) => Some(
                NaiveDate::parse_from_str(raw.as_str(), "%Y-%m-%d")
                    .map_err(|_| RecurrenceError::InvalidUntil(raw.as_str().to_string()))?,
            ),
            None => None,
        };

        let rule = RecurrenceRule {
            frequency,
            interval,
            weekdays,
            until,
        };
        rule.validate()?;
        Ok(rule)
    }
}

impl Serialize for RecurrenceRule {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for RecurrenceRule {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

pub(crate) fn parse_weekday(label: &str) -> Option<Weekday> {
    match label {
        "mon" | "monday" => Some(Weekday::Mon),
        "tue" | "tuesday" => Some(Weekday::Tue),
        "wed" | "wednesday" => Some(Weekday::Wed),
        "thu" | "thursday" => Some(Weekday::Thu),
        "fri" | "friday" => Some(Weekday::Fri),
        "sat" | "saturday" => Some(Weekday::Sat),
        "sun" | "sunday" => Some(Weekday::Sun),
        _ => None,
    }
}

fn weekday_label(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "mon",
        Weekday::Tue => "tue",
        Weekday::Wed => "wed",
        Weekday::Thu => "thu",
        Weekday::Fri => "fri",
        Weekday::Sat => "sat",
        Weekday::Sun => "sun",
    }
}
