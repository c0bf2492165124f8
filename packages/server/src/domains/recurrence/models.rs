//! `RecurringTemplate` and `RecurringTemplateException` models, plus the
//! pattern-specific recurrence configuration wire format from §4.2.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use thiserror::Error;
use typed_builder::TypedBuilder;

use crate::common::{ExceptionId, TemplateId, TodoItemId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum RecurrencePattern {
    Daily,
    Weekly,
    Biweekly,
    Monthly,
    Yearly,
    Quarterly,
    Weekdays,
}

/// A day of the week in the 1=Monday..7=Sunday convention used on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Weekday(u8);

impl Weekday {
    pub fn new(n: u8) -> Result<Self, ConfigError> {
        if (1..=7).contains(&n) {
            Ok(Self(n))
        } else {
            Err(ConfigError::Invalid(format!(
                "day_of_week must be in 1..=7, got {n}"
            )))
        }
    }

    pub fn get(self) -> u8 {
        self.0
    }

    /// Maps to `chrono::Weekday`, where Monday is also the first day.
    pub fn to_chrono(self) -> chrono::Weekday {
        chrono::Weekday::try_from(self.0 - 1).expect("validated in new()")
    }
}

impl TryFrom<u8> for Weekday {
    type Error = ConfigError;
    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Weekday> for u8 {
    fn from(value: Weekday) -> Self {
        value.0
    }
}

/// The day-of-month field for the `monthly` pattern: either a literal day or
/// the sentinel "last" that clamps to each month's actual length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DayOfMonth {
    Day(u8),
    #[serde(rename = "last")]
    Last,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid recurrence config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "pattern", rename_all = "snake_case")]
pub enum RecurrenceConfig {
    Daily { interval: u32 },
    Weekly { interval: u32, days_of_week: Vec<Weekday> },
    Biweekly { days_of_week: Vec<Weekday> },
    Monthly { interval: u32, day_of_month: DayOfMonth },
    Yearly { month: u8, day: u8 },
    Quarterly { month_offset: u8, day: u8 },
    Weekdays {},
}

impl RecurrenceConfig {
    pub fn pattern(&self) -> RecurrencePattern {
        match self {
            Self::Daily { .. } => RecurrencePattern::Daily,
            Self::Weekly { .. } => RecurrencePattern::Weekly,
            Self::Biweekly { .. } => RecurrencePattern::Biweekly,
            Self::Monthly { .. } => RecurrencePattern::Monthly,
            Self::Yearly { .. } => RecurrencePattern::Yearly,
            Self::Quarterly { .. } => RecurrencePattern::Quarterly,
            Self::Weekdays {} => RecurrencePattern::Weekdays,
        }
    }

    /// Validates field ranges per the §4.2 table. Unknown pattern names are
    /// rejected by serde itself (the `tag` match fails to deserialize).
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self {
            Self::Daily { interval } if *interval < 1 => {
                Err(ConfigError::Invalid("interval must be >= 1".into()))
            }
            Self::Weekly { interval, days_of_week } => {
                if *interval < 1 {
                    Err(ConfigError::Invalid("interval must be >= 1".into()))
                } else if days_of_week.is_empty() {
                    Err(ConfigError::Invalid("days_of_week must not be empty".into()))
                } else {
                    Ok(())
                }
            }
            Self::Biweekly { days_of_week } if days_of_week.is_empty() => {
                Err(ConfigError::Invalid("days_of_week must not be empty".into()))
            }
            Self::Monthly { interval, day_of_month } => {
                if *interval < 1 {
                    return Err(ConfigError::Invalid("interval must be >= 1".into()));
                }
                if let DayOfMonth::Day(d) = day_of_month {
                    if !(1..=31).contains(d) {
                        return Err(ConfigError::Invalid(
                            "day_of_month must be in 1..=31 or \"last\"".into(),
                        ));
                    }
                }
                Ok(())
            }
            Self::Yearly { month, day } => {
                if !(1..=12).contains(month) {
                    Err(ConfigError::Invalid("month must be in 1..=12".into()))
                } else if !(1..=31).contains(day) {
                    Err(ConfigError::Invalid("day must be in 1..=31".into()))
                } else {
                    Ok(())
                }
            }
            Self::Quarterly { month_offset, day } => {
                if !(0..=2).contains(month_offset) {
                    Err(ConfigError::Invalid("month_offset must be in 0..=2".into()))
                } else if !(1..=31).contains(day) {
                    Err(ConfigError::Invalid("day must be in 1..=31".into()))
                } else {
                    Ok(())
                }
            }
            _ => Ok(()),
        }
    }
}

/// Two-mode timezone field shared by templates and items: `None` is
/// floating (local wall-clock, follows the viewer), `Some(tz)` is a fixed
/// IANA zone whose occurrences denote an absolute UTC instant.
pub type TemplateTimezone = Option<Tz>;

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct RecurringTemplate {
    pub id: TemplateId,
    pub list_id: crate::common::TodoListId,
    pub title: String,
    pub tags: Vec<String>,
    pub priority: Option<String>,
    pub estimated_duration: Option<i64>,
    pub recurrence_config: sqlx::types::Json<RecurrenceConfig>,
    pub due_offset: Option<i64>,
    pub timezone: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub generated_through: DateTime<Utc>,
    pub sync_horizon_days: i32,
    pub generation_horizon_days: i32,
    pub version: i64,
}

/// Parameters for creating a template, before the store assigns an id,
/// timestamps, and the initial version.
#[derive(Debug, Clone, TypedBuilder)]
pub struct NewTemplate {
    pub list_id: crate::common::TodoListId,
    pub title: String,
    #[builder(default)]
    pub tags: Vec<String>,
    #[builder(default)]
    pub priority: Option<String>,
    #[builder(default)]
    pub estimated_duration: Option<i64>,
    pub recurrence_config: RecurrenceConfig,
    #[builder(default)]
    pub due_offset: Option<i64>,
    #[builder(default)]
    pub timezone: Option<String>,
    #[builder(default = 14)]
    pub sync_horizon_days: i32,
    #[builder(default = 365)]
    pub generation_horizon_days: i32,
}

impl RecurringTemplate {
    pub fn validate_horizons(&self) -> Result<(), ConfigError> {
        if self.sync_horizon_days <= 0 || self.sync_horizon_days > 365 {
            return Err(ConfigError::Invalid(
                "sync_horizon_days must be in 1..=365".into(),
            ));
        }
        if self.generation_horizon_days <= 0 || self.generation_horizon_days > 365 {
            return Err(ConfigError::Invalid(
                "generation_horizon_days must be in 1..=365".into(),
            ));
        }
        if self.sync_horizon_days > self.generation_horizon_days {
            return Err(ConfigError::Invalid(
                "sync_horizon_days must be <= generation_horizon_days".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ExceptionType {
    Deleted,
    Rescheduled,
    Edited,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct RecurringTemplateException {
    pub id: ExceptionId,
    pub template_id: TemplateId,
    pub occurs_at: DateTime<Utc>,
    pub exception_type: ExceptionType,
    pub item_id: Option<TodoItemId>,
    pub created_at: DateTime<Utc>,
}
