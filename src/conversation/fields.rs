// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Recognised profile fields and their validators.
//!
//! The set of fields is closed: anything outside [`Field`] can neither be
//! collected nor decoded. Which fields are *required*, and in what order,
//! is configuration; how each one is validated is a [`ValidatorTable`].

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use crate::error::SessionError;

/// Longest inbound text accepted as a field value, in characters.
pub const MAX_FIELD_INPUT_CHARS: usize = 200;

static NAME_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[\x{4e00}-\x{9fff}]{2,20}$").expect("Name regex is valid"));
static DATE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}$").expect("Date regex is valid"));
static CLOCK_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{1,2}):(\d{2})$").expect("Clock regex is valid"));
static HOUR_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{1,2}$").expect("Hour regex is valid"));

/// A piece of personal data the conversation collects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Field {
    Name,
    BirthDate,
    BirthTime,
    BirthPlace,
}

impl Field {
    pub const ALL: [Field; 4] = [Field::Name, Field::BirthDate, Field::BirthTime, Field::BirthPlace];

    /// Wire name used in payloads and configuration.
    pub fn as_str(&self) -> &'static str {
        match self {
            Field::Name => "name",
            Field::BirthDate => "birthDate",
            Field::BirthTime => "birthTime",
            Field::BirthPlace => "birthPlace",
        }
    }

    /// Default question asked when this field is pending.
    pub fn prompt(&self) -> &'static str {
        match self {
            Field::Name => "What is your name?",
            Field::BirthDate => "What is your birth date? (YYYY-MM-DD)",
            Field::BirthTime => "What time were you born? (HH:MM, 24-hour)",
            Field::BirthPlace => "Where were you born?",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Field {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Field::ALL
            .into_iter()
            .find(|field| field.as_str() == s.trim())
            .ok_or_else(|| SessionError::Config(format!("unknown field name: {}", s.trim())))
    }
}

/// Checks one raw value and returns its normalised form, or a short reason
/// fit to show the user. `now` anchors date checks so validation stays a
/// pure function of its inputs.
pub type Validator = fn(&str, DateTime<Utc>) -> Result<String, String>;

/// Field → validator mapping.
#[derive(Clone)]
pub struct ValidatorTable {
    rules: HashMap<Field, Validator>,
}

impl ValidatorTable {
    /// Replace the validator for one field.
    pub fn with(mut self, field: Field, validator: Validator) -> Self {
        self.rules.insert(field, validator);
        self
    }

    /// Validate `raw` for `field`. Over-long input is rejected before the
    /// field's own rule runs.
    pub fn validate(&self, field: Field, raw: &str, now: DateTime<Utc>) -> crate::error::Result<String> {
        let value = raw.trim();
        let outcome = if value.chars().count() > MAX_FIELD_INPUT_CHARS {
            Err(format!("Please keep it under {} characters.", MAX_FIELD_INPUT_CHARS))
        } else {
            match self.rules.get(&field) {
                Some(rule) => rule(value, now),
                None => validate_free_text(value, now),
            }
        };
        outcome.map_err(|reason| SessionError::Validation { field, reason })
    }
}

impl Default for ValidatorTable {
    fn default() -> Self {
        let mut rules: HashMap<Field, Validator> = HashMap::new();
        rules.insert(Field::Name, validate_name);
        rules.insert(Field::BirthDate, validate_birth_date);
        rules.insert(Field::BirthTime, validate_birth_time);
        rules.insert(Field::BirthPlace, validate_free_text);
        Self { rules }
    }
}

impl fmt::Debug for ValidatorTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut fields: Vec<&Field> = self.rules.keys().collect();
        fields.sort();
        f.debug_struct("ValidatorTable").field("fields", &fields).finish()
    }
}

/// 2–20 CJK ideographs.
pub fn validate_name(value: &str, _now: DateTime<Utc>) -> Result<String, String> {
    if NAME_PATTERN.is_match(value) {
        Ok(value.to_string())
    } else {
        Err("A name should be 2 to 20 Chinese characters.".to_string())
    }
}

/// Calendar date in `YYYY-MM-DD`, not later than today.
pub fn validate_birth_date(value: &str, now: DateTime<Utc>) -> Result<String, String> {
    const FORMAT_HINT: &str = "Please use the format YYYY-MM-DD, e.g. 1991-08-20.";

    if !DATE_PATTERN.is_match(value) {
        return Err(FORMAT_HINT.to_string());
    }
    let date = NaiveDate::parse_from_str(value, "%Y-%m-%d").map_err(|_| FORMAT_HINT.to_string())?;
    if date > now.date_naive() {
        return Err("A birth date cannot be in the future.".to_string());
    }
    Ok(date.format("%Y-%m-%d").to_string())
}

/// `HH:MM` on a 24-hour clock, or a bare hour `0`–`23` meaning `HH:00`.
pub fn validate_birth_time(value: &str, _now: DateTime<Utc>) -> Result<String, String> {
    const FORMAT_HINT: &str = "Please give a 24-hour time such as 09:00, or just the hour (0-23).";

    let (hour, minute) = if let Some(caps) = CLOCK_PATTERN.captures(value) {
        let hour = caps[1].parse::<u32>().map_err(|_| FORMAT_HINT.to_string())?;
        let minute = caps[2].parse::<u32>().map_err(|_| FORMAT_HINT.to_string())?;
        (hour, minute)
    } else if HOUR_PATTERN.is_match(value) {
        let hour = value.parse::<u32>().map_err(|_| FORMAT_HINT.to_string())?;
        (hour, 0)
    } else {
        return Err(FORMAT_HINT.to_string());
    };

    NaiveTime::from_hms_opt(hour, minute, 0)
        .map(|time| time.format("%H:%M").to_string())
        .ok_or_else(|| FORMAT_HINT.to_string())
}

/// 1–64 characters without control characters.
pub fn validate_free_text(value: &str, _now: DateTime<Utc>) -> Result<String, String> {
    let count = value.chars().count();
    if count == 0 {
        return Err("This cannot be empty.".to_string());
    }
    if count > 64 || value.chars().any(char::is_control) {
        return Err("Please keep it to a short single line.".to_string());
    }
    Ok(value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 16, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_field_wire_names() {
        for field in Field::ALL {
            assert_eq!(field.as_str().parse::<Field>().unwrap(), field);
            assert_eq!(serde_json::to_string(&field).unwrap(), format!("\"{}\"", field.as_str()));
        }
        assert!("zodiac".parse::<Field>().is_err());
    }

    #[test]
    fn test_validate_name() {
        assert_eq!(validate_name("陳美麗", now()).unwrap(), "陳美麗");
        assert!(validate_name("陳", now()).is_err());
        assert!(validate_name("Alice", now()).is_err());
        assert!(validate_name("陳 美麗", now()).is_err());
    }

    #[test]
    fn test_validate_birth_date() {
        assert_eq!(validate_birth_date("1991-08-20", now()).unwrap(), "1991-08-20");
        assert!(validate_birth_date("not-a-date", now()).is_err());
        assert!(validate_birth_date("1991-02-30", now()).is_err());
        assert!(validate_birth_date("1991-8-20", now()).is_err());
        assert!(validate_birth_date("2030-01-01", now()).is_err());
        assert!(validate_birth_date("2026-10-16", now()).is_ok());
    }

    #[test]
    fn test_validate_birth_time() {
        assert_eq!(validate_birth_time("09:00", now()).unwrap(), "09:00");
        assert_eq!(validate_birth_time("9:05", now()).unwrap(), "09:05");
        assert_eq!(validate_birth_time("9", now()).unwrap(), "09:00");
        assert_eq!(validate_birth_time("23", now()).unwrap(), "23:00");
        assert!(validate_birth_time("24", now()).is_err());
        assert!(validate_birth_time("12:60", now()).is_err());
        assert!(validate_birth_time("noon", now()).is_err());
    }

    #[test]
    fn test_validate_free_text() {
        assert_eq!(validate_free_text("台北市", now()).unwrap(), "台北市");
        assert!(validate_free_text("", now()).is_err());
        assert!(validate_free_text("a\nb", now()).is_err());
        assert!(validate_free_text(&"x".repeat(65), now()).is_err());
    }

    #[test]
    fn test_table_trims_and_caps_input() {
        let table = ValidatorTable::default();
        assert_eq!(table.validate(Field::Name, "  陳美麗 ", now()).unwrap(), "陳美麗");
        assert!(matches!(
            table.validate(Field::BirthPlace, &"x".repeat(MAX_FIELD_INPUT_CHARS + 1), now()),
            Err(SessionError::Validation { field: Field::BirthPlace, .. })
        ));
    }

    #[test]
    fn test_table_override() {
        fn anything(value: &str, _now: DateTime<Utc>) -> Result<String, String> {
            Ok(value.to_uppercase())
        }
        let table = ValidatorTable::default().with(Field::Name, anything);
        assert_eq!(table.validate(Field::Name, "alice", now()).unwrap(), "ALICE");
    }
}
