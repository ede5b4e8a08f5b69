use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// A date closed for bookings. `dog_id: None` closes the date for every dog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockedDate {
    pub id: i64,
    pub date: NaiveDate,
    pub dog_id: Option<i64>,
    pub reason: String,
    pub created_by: i64,
    pub created_at: NaiveDateTime,
}

impl BlockedDate {
    pub fn applies_to(&self, date: NaiveDate, dog_id: i64) -> bool {
        self.date == date && self.dog_id.map_or(true, |d| d == dog_id)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewBlockedDate {
    pub date: NaiveDate,
    #[serde(default)]
    pub dog_id: Option<i64>,
    pub reason: String,
    #[serde(skip)]
    pub created_by: i64,
}

impl NewBlockedDate {
    pub fn validate(&self) -> Result<(), String> {
        if self.reason.trim().is_empty() {
            return Err("reason is required".to_string());
        }
        if matches!(self.dog_id, Some(id) if id <= 0) {
            return Err("dog id must be a positive integer".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HolidaySource {
    Fetched,
    Manual,
}

impl HolidaySource {
    pub fn as_str(&self) -> &'static str {
        match self {
            HolidaySource::Fetched => "fetched",
            HolidaySource::Manual => "manual",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "fetched" => Some(HolidaySource::Fetched),
            "manual" => Some(HolidaySource::Manual),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Holiday {
    pub id: i64,
    pub date: NaiveDate,
    pub name: String,
    pub source: HolidaySource,
    /// Set for fetched entries only; manual entries apply to every region.
    pub region: Option<String>,
    pub created_by: Option<i64>,
    pub created_at: NaiveDateTime,
}

/// A fetched calendar entry before it has been persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HolidayEntry {
    pub date: NaiveDate,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewHoliday {
    pub date: NaiveDate,
    pub name: String,
}
