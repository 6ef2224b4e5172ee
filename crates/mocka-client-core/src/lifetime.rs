use std::fmt::Display;

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, TimeZone, Timelike};
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifetimeUnit {
    Hours,
    Days,
    Weeks,
}

impl LifetimeUnit {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hours => "hours",
            Self::Days => "days",
            Self::Weeks => "weeks",
        }
    }

    #[must_use]
    pub fn max(self) -> u32 {
        match self {
            Self::Hours => 12,
            Self::Days => 3,
            Self::Weeks => 4,
        }
    }

    /// Body key the mock endpoint expects for this unit.
    #[must_use]
    pub fn request_key(self) -> &'static str {
        match self {
            Self::Hours => "ltHours",
            Self::Days => "ltDays",
            Self::Weeks => "ltWeeks",
        }
    }
}

impl Display for LifetimeUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LifetimeError {
    #[error("Please enter a valid number")]
    InvalidNumber,
    #[error("Maximum {max} {unit} allowed")]
    AboveMaximum { max: u32, unit: LifetimeUnit },
}

/// How long a generated mock endpoint stays alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MockLifetime {
    unit: LifetimeUnit,
    value: u32,
}

impl Default for MockLifetime {
    fn default() -> Self {
        Self {
            unit: LifetimeUnit::Days,
            value: 1,
        }
    }
}

impl MockLifetime {
    pub fn new(unit: LifetimeUnit, value: i64) -> Result<Self, LifetimeError> {
        if value < 1 {
            return Err(LifetimeError::InvalidNumber);
        }
        let max = unit.max();
        if value > i64::from(max) {
            return Err(LifetimeError::AboveMaximum { max, unit });
        }
        Ok(Self {
            unit,
            value: value as u32,
        })
    }

    /// Parses user input for the current unit.
    pub fn with_value_input(self, raw: &str) -> Result<Self, LifetimeError> {
        let value = raw
            .trim()
            .parse::<i64>()
            .map_err(|_| LifetimeError::InvalidNumber)?;
        Self::new(self.unit, value)
    }

    /// Switching units starts over at 1.
    #[must_use]
    pub fn with_unit(self, unit: LifetimeUnit) -> Self {
        Self { unit, value: 1 }
    }

    #[must_use]
    pub fn unit(self) -> LifetimeUnit {
        self.unit
    }

    #[must_use]
    pub fn value(self) -> u32 {
        self.value
    }
}

impl Serialize for MockLifetime {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry(self.unit.request_key(), &self.value)?;
        map.end()
    }
}

/// Renders an expiry timestamp as `May 10th, 2030 · 1:35 PM` in `tz`.
///
/// Timestamps without an offset are read as UTC. Input that does not parse
/// is handed back as-is; blank input yields `None`.
pub fn format_expiry<Tz>(raw: &str, tz: &Tz) -> Option<String>
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    let Some(instant) = parse_expiry(trimmed) else {
        return Some(raw.to_string());
    };
    let local = instant.with_timezone(tz);
    let day = local.day();
    let (is_pm, hour) = local.hour12();
    Some(format!(
        "{} {}{}, {} · {}:{:02} {}",
        local.format("%B"),
        day,
        ordinal_suffix(day),
        local.year(),
        hour,
        local.minute(),
        if is_pm { "PM" } else { "AM" }
    ))
}

fn parse_expiry(raw: &str) -> Option<DateTime<chrono::Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.to_utc());
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(naive.and_utc());
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f") {
        return Some(naive.and_utc());
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

#[must_use]
pub fn ordinal_suffix(day: u32) -> &'static str {
    if (11..=13).contains(&(day % 100)) {
        return "th";
    }
    match day % 10 {
        1 => "st",
        2 => "nd",
        3 => "rd",
        _ => "th",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, Utc};

    #[test]
    fn lifetime_bounds_follow_unit_maximum() {
        assert!(MockLifetime::new(LifetimeUnit::Hours, 12).is_ok());
        assert_eq!(
            MockLifetime::new(LifetimeUnit::Hours, 13),
            Err(LifetimeError::AboveMaximum {
                max: 12,
                unit: LifetimeUnit::Hours
            })
        );
        assert_eq!(
            MockLifetime::new(LifetimeUnit::Days, 0),
            Err(LifetimeError::InvalidNumber)
        );
        let error = MockLifetime::new(LifetimeUnit::Weeks, 5).expect_err("too many weeks");
        assert_eq!(error.to_string(), "Maximum 4 weeks allowed");
    }

    #[test]
    fn value_input_is_parsed_for_current_unit() {
        let lifetime = MockLifetime::default()
            .with_unit(LifetimeUnit::Hours)
            .with_value_input(" 6 ")
            .expect("valid hours");
        assert_eq!(lifetime.unit(), LifetimeUnit::Hours);
        assert_eq!(lifetime.value(), 6);
        assert_eq!(
            MockLifetime::default().with_value_input("six"),
            Err(LifetimeError::InvalidNumber)
        );
    }

    #[test]
    fn switching_unit_resets_value() {
        let lifetime = MockLifetime::new(LifetimeUnit::Days, 3).expect("valid days");
        let switched = lifetime.with_unit(LifetimeUnit::Weeks);
        assert_eq!(switched.value(), 1);
        assert_eq!(switched.unit(), LifetimeUnit::Weeks);
    }

    #[test]
    fn lifetime_serializes_as_single_unit_key() {
        let lifetime = MockLifetime::new(LifetimeUnit::Weeks, 2).expect("valid weeks");
        let value = serde_json::to_value(lifetime).expect("serialize");
        assert_eq!(value, serde_json::json!({"ltWeeks": 2}));
        assert_eq!(
            serde_json::to_value(MockLifetime::default()).expect("serialize"),
            serde_json::json!({"ltDays": 1})
        );
    }

    #[test]
    fn ordinal_suffixes_handle_teens() {
        let suffixes = [1, 2, 3, 4, 11, 12, 13, 21, 22, 23, 31]
            .map(ordinal_suffix)
            .join(",");
        assert_eq!(suffixes, "st,nd,rd,th,th,th,th,st,nd,rd,st");
    }

    #[test]
    fn expiry_renders_in_requested_zone() {
        assert_eq!(
            format_expiry("2030-05-10T13:35:00Z", &Utc).as_deref(),
            Some("May 10th, 2030 · 1:35 PM")
        );
        let plus_two = FixedOffset::east_opt(2 * 3600).expect("offset");
        assert_eq!(
            format_expiry("2030-05-10T23:05:00Z", &plus_two).as_deref(),
            Some("May 11th, 2030 · 1:05 AM")
        );
    }

    #[test]
    fn expiry_without_offset_is_read_as_utc() {
        assert_eq!(
            format_expiry("2031-01-02T00:00:00.123", &Utc).as_deref(),
            Some("January 2nd, 2031 · 12:00 AM")
        );
    }

    #[test]
    fn unparsable_expiry_is_returned_verbatim() {
        assert_eq!(format_expiry("soon", &Utc).as_deref(), Some("soon"));
        assert_eq!(format_expiry("   ", &Utc), None);
    }
}
