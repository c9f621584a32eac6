//! Session identity: course, section, semester and date, and the keys derived
//! from them.

use chrono::NaiveDate;
use std::fmt;
use thiserror::Error;

/// Date format accepted on input.
const INPUT_DATE_FORMAT: &str = "%Y-%m-%d";
/// Date format used inside session keys.
const KEY_DATE_FORMAT: &str = "%Y_%m_%d";
const SEPARATOR: &str = "_";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SessionError {
    #[error("invalid date format: {0:?} (expected YYYY-MM-DD)")]
    InvalidDateFormat(String),
    #[error("session field {0} must not be empty")]
    EmptyField(&'static str),
}

/// One course/section/semester/date combination. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    course: String,
    section: String,
    semester: String,
    date: NaiveDate,
}

impl Session {
    pub fn new(
        course: &str,
        section: &str,
        semester: &str,
        date: NaiveDate,
    ) -> Result<Self, SessionError> {
        let course = non_empty("course", course)?;
        let section = non_empty("section", section)?;
        let semester = non_empty("semester", semester)?;
        Ok(Self {
            course,
            section,
            semester,
            date,
        })
    }

    /// Build a session from a `YYYY-MM-DD` date string.
    pub fn parse(
        course: &str,
        section: &str,
        semester: &str,
        date: &str,
    ) -> Result<Self, SessionError> {
        Self::new(course, section, semester, parse_date(date)?)
    }

    /// Session for today's local date.
    pub fn today(course: &str, section: &str, semester: &str) -> Result<Self, SessionError> {
        Self::new(course, section, semester, chrono::Local::now().date_naive())
    }

    pub fn course(&self) -> &str {
        &self.course
    }

    pub fn section(&self) -> &str {
        &self.section
    }

    pub fn semester(&self) -> &str {
        &self.semester
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    /// Ledger key: `<yyyy_mm_dd>_<semester>_<course>_<section>`, every field
    /// lower-cased with whitespace runs collapsed to `_`.
    pub fn key(&self) -> SessionKey {
        SessionKey(
            [
                self.date.format(KEY_DATE_FORMAT).to_string(),
                normalize_field(&self.semester),
                normalize_field(&self.course),
                normalize_field(&self.section),
            ]
            .join(SEPARATOR),
        )
    }

    /// Roster key naming the enrollment image collection:
    /// `<course>_<section>_<semester>`, normalized like [`key`](Self::key).
    pub fn roster_key(&self) -> String {
        [
            normalize_field(&self.course),
            normalize_field(&self.section),
            normalize_field(&self.semester),
        ]
        .join(SEPARATOR)
    }
}

impl fmt::Display for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} - {} - {} on {}",
            self.course, self.section, self.semester, self.date
        )
    }
}

/// Derived ledger key of a [`Session`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey(String);

impl SessionKey {
    /// Wrap an existing key, e.g. one listed from the ledger.
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Parse a strict `YYYY-MM-DD` date.
pub fn parse_date(input: &str) -> Result<NaiveDate, SessionError> {
    NaiveDate::parse_from_str(input.trim(), INPUT_DATE_FORMAT)
        .map_err(|_| SessionError::InvalidDateFormat(input.to_string()))
}

fn normalize_field(value: &str) -> String {
    value
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(SEPARATOR)
        .to_lowercase()
}

fn non_empty(field: &'static str, value: &str) -> Result<String, SessionError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(SessionError::EmptyField(field));
    }
    Ok(trimmed.to_string())
}
