//! Run context for a single pipeline execution
//!
//! Exposes only the named fields that object-key templates may reference.

use chrono::{DateTime, Datelike, NaiveDate, Timelike, Utc};
use serde::{Deserialize, Serialize};

/// Typed context handed to every stage of one pipeline run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunContext {
    /// Logical date of the run
    pub run_date: NaiveDate,

    /// Logical timestamp of the run (required by `{hour}`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logical_time: Option<DateTime<Utc>>,

    /// Identifier assigned by the triggering scheduler
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
}

impl RunContext {
    /// Placeholder names templates are allowed to reference
    pub const FIELDS: &'static [&'static str] = &[
        "run_date",
        "ds",
        "ds_nodash",
        "year",
        "month",
        "day",
        "hour",
        "run_id",
    ];

    /// Create a context for the given logical date
    pub fn new(run_date: NaiveDate) -> Self {
        Self {
            run_date,
            logical_time: None,
            run_id: None,
        }
    }

    /// Create a context from a logical timestamp; the run date is its UTC date
    pub fn from_logical_time(logical_time: DateTime<Utc>) -> Self {
        Self {
            run_date: logical_time.date_naive(),
            logical_time: Some(logical_time),
            run_id: None,
        }
    }

    /// Returns true if `name` is a field templates may reference
    pub fn is_known_field(name: &str) -> bool {
        Self::FIELDS.contains(&name)
    }

    /// Resolve a named field to its string form
    ///
    /// Returns `None` for unknown names and for optional fields that are unset.
    pub fn field(&self, name: &str) -> Option<String> {
        match name {
            "run_date" | "ds" => Some(self.run_date.format("%Y-%m-%d").to_string()),
            "ds_nodash" => Some(self.run_date.format("%Y%m%d").to_string()),
            "year" => Some(format!("{:04}", self.run_date.year())),
            "month" => Some(format!("{:02}", self.run_date.month())),
            "day" => Some(format!("{:02}", self.run_date.day())),
            "hour" => self.logical_time.map(|t| format!("{:02}", t.hour())),
            "run_id" => self.run_id.clone(),
            _ => None,
        }
    }
}

/// Builder for RunContext
pub struct RunContextBuilder {
    context: RunContext,
}

impl RunContextBuilder {
    pub fn new(run_date: NaiveDate) -> Self {
        Self {
            context: RunContext::new(run_date),
        }
    }

    pub fn logical_time(mut self, logical_time: DateTime<Utc>) -> Self {
        self.context.run_date = logical_time.date_naive();
        self.context.logical_time = Some(logical_time);
        self
    }

    pub fn run_id(mut self, run_id: impl Into<String>) -> Self {
        self.context.run_id = Some(run_id.into());
        self
    }

    pub fn build(self) -> RunContext {
        self.context
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn date_fields() {
        let ctx = RunContext::new(date(2024, 1, 5));

        assert_eq!(ctx.field("run_date").as_deref(), Some("2024-01-05"));
        assert_eq!(ctx.field("ds").as_deref(), Some("2024-01-05"));
        assert_eq!(ctx.field("ds_nodash").as_deref(), Some("20240105"));
        assert_eq!(ctx.field("year").as_deref(), Some("2024"));
        assert_eq!(ctx.field("month").as_deref(), Some("01"));
        assert_eq!(ctx.field("day").as_deref(), Some("05"));
    }

    #[test]
    fn optional_fields_unset() {
        let ctx = RunContext::new(date(2024, 1, 5));
        assert_eq!(ctx.field("hour"), None);
        assert_eq!(ctx.field("run_id"), None);
        assert_eq!(ctx.field("not_a_field"), None);
    }

    #[test]
    fn builder_sets_logical_time_and_run_id() {
        let ts = Utc.with_ymd_and_hms(2018, 11, 3, 7, 0, 0).unwrap();
        let ctx = RunContextBuilder::new(date(2000, 1, 1))
            .logical_time(ts)
            .run_id("scheduled__2018-11-03T07:00:00")
            .build();

        assert_eq!(ctx.run_date, date(2018, 11, 3));
        assert_eq!(ctx.field("hour").as_deref(), Some("07"));
        assert_eq!(ctx.field("run_id").as_deref(), Some("scheduled__2018-11-03T07:00:00"));
    }

    #[test]
    fn known_fields() {
        assert!(RunContext::is_known_field("run_date"));
        assert!(RunContext::is_known_field("hour"));
        assert!(!RunContext::is_known_field("execution_date"));
    }
}
