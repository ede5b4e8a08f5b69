use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, Weekday};
use serde::{Deserialize, Serialize};

use super::booking::hhmm;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum DayType {
    Weekday,
    Weekend,
    Holiday,
}

impl DayType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DayType::Weekday => "weekday",
            DayType::Weekend => "weekend",
            DayType::Holiday => "holiday",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "weekday" => Some(DayType::Weekday),
            "weekend" => Some(DayType::Weekend),
            "holiday" => Some(DayType::Holiday),
            _ => None,
        }
    }

    /// Holiday status wins over the calendar weekday.
    pub fn classify(date: NaiveDate, is_holiday: bool) -> Self {
        if is_holiday {
            return DayType::Holiday;
        }
        match date.weekday() {
            Weekday::Sat | Weekday::Sun => DayType::Weekend,
            _ => DayType::Weekday,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingTimeRule {
    pub id: i64,
    pub day_type: DayType,
    pub name: String,
    #[serde(with = "hhmm")]
    pub start_time: NaiveTime,
    #[serde(with = "hhmm")]
    pub end_time: NaiveTime,
    pub is_blocked: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl BookingTimeRule {
    /// Half-open window: the start minute is inside, the end minute is not.
    pub fn contains(&self, t: NaiveTime) -> bool {
        self.start_time <= t && t < self.end_time
    }

    pub fn window(&self) -> String {
        format!(
            "{}-{}",
            self.start_time.format(hhmm::FORMAT),
            self.end_time.format(hhmm::FORMAT)
        )
    }
}

/// Admin input for creating or replacing a rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleInput {
    pub day_type: DayType,
    pub name: String,
    #[serde(with = "hhmm")]
    pub start_time: NaiveTime,
    #[serde(with = "hhmm")]
    pub end_time: NaiveTime,
    #[serde(default)]
    pub is_blocked: bool,
}

impl RuleInput {
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("rule name is required".to_string());
        }
        if self.end_time <= self.start_time {
            return Err("end time must be after start time".to_string());
        }
        Ok(())
    }
}
