use std::collections::BTreeMap;

use chrono::NaiveTime;
use serde::Serialize;

use super::booking::hhmm;

/// Every setting the service understands. Unknown keys are rejected on write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingKey {
    BookingAdvanceDays,
    CancellationNoticeHours,
    AutoDeactivationDays,
    BookingTimeGranularity,
    ApprovalRequired,
    ApprovalWindowStart,
    ApprovalWindowEnd,
    UseHolidayApi,
    HolidayRegion,
    HolidayCacheDays,
}

impl SettingKey {
    pub const ALL: [SettingKey; 10] = [
        SettingKey::BookingAdvanceDays,
        SettingKey::CancellationNoticeHours,
        SettingKey::AutoDeactivationDays,
        SettingKey::BookingTimeGranularity,
        SettingKey::ApprovalRequired,
        SettingKey::ApprovalWindowStart,
        SettingKey::ApprovalWindowEnd,
        SettingKey::UseHolidayApi,
        SettingKey::HolidayRegion,
        SettingKey::HolidayCacheDays,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SettingKey::BookingAdvanceDays => "booking_advance_days",
            SettingKey::CancellationNoticeHours => "cancellation_notice_hours",
            SettingKey::AutoDeactivationDays => "auto_deactivation_days",
            SettingKey::BookingTimeGranularity => "booking_time_granularity",
            SettingKey::ApprovalRequired => "approval_required",
            SettingKey::ApprovalWindowStart => "approval_window_start",
            SettingKey::ApprovalWindowEnd => "approval_window_end",
            SettingKey::UseHolidayApi => "use_holiday_api",
            SettingKey::HolidayRegion => "holiday_region",
            SettingKey::HolidayCacheDays => "holiday_cache_days",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == s)
    }

    pub fn default_value(&self) -> &'static str {
        match self {
            SettingKey::BookingAdvanceDays => "14",
            SettingKey::CancellationNoticeHours => "12",
            SettingKey::AutoDeactivationDays => "365",
            SettingKey::BookingTimeGranularity => "15",
            SettingKey::ApprovalRequired => "true",
            SettingKey::ApprovalWindowStart => "09:00",
            SettingKey::ApprovalWindowEnd => "12:00",
            SettingKey::UseHolidayApi => "false",
            SettingKey::HolidayRegion => "BW",
            SettingKey::HolidayCacheDays => "7",
        }
    }

    /// Checks a single value in isolation. Cross-field checks live in
    /// [`Settings::with`].
    pub fn validate(&self, value: &str) -> Result<(), String> {
        let key = self.as_str();
        match self {
            SettingKey::BookingAdvanceDays => int_in_range(key, value, 1, 365),
            SettingKey::CancellationNoticeHours => int_in_range(key, value, 1, 168),
            SettingKey::AutoDeactivationDays => int_in_range(key, value, 1, 3650),
            SettingKey::BookingTimeGranularity => int_in_range(key, value, 5, 120),
            SettingKey::HolidayCacheDays => int_in_range(key, value, 1, 365),
            SettingKey::ApprovalRequired | SettingKey::UseHolidayApi => match value {
                "true" | "false" => Ok(()),
                _ => Err(format!("{key} must be 'true' or 'false'")),
            },
            SettingKey::ApprovalWindowStart | SettingKey::ApprovalWindowEnd => {
                NaiveTime::parse_from_str(value, hhmm::FORMAT)
                    .map(|_| ())
                    .map_err(|_| format!("{key} must be in HH:MM format"))
            }
            SettingKey::HolidayRegion => {
                if value.len() == 2 && value.chars().all(|c| c.is_ascii_uppercase()) {
                    Ok(())
                } else {
                    Err(format!("{key} must be a two-letter region code"))
                }
            }
        }
    }
}

fn int_in_range(key: &str, value: &str, min: i64, max: i64) -> Result<(), String> {
    match value.trim().parse::<i64>() {
        Ok(v) if (min..=max).contains(&v) => Ok(()),
        _ => Err(format!("{key} must be an integer between {min} and {max}")),
    }
}

fn lookup(raw: &BTreeMap<String, String>, key: SettingKey) -> &str {
    match raw.get(key.as_str()) {
        Some(v) if key.validate(v).is_ok() => v.as_str(),
        Some(v) => {
            tracing::warn!(key = key.as_str(), value = %v, "ignoring invalid stored setting");
            key.default_value()
        }
        None => key.default_value(),
    }
}

/// Typed view over the key/value settings table, read fresh per evaluation.
#[derive(Debug, Clone, Serialize)]
pub struct Settings {
    pub booking_advance_days: i64,
    pub cancellation_notice_hours: i64,
    pub auto_deactivation_days: i64,
    pub booking_time_granularity: i64,
    pub approval_required: bool,
    #[serde(with = "hhmm")]
    pub approval_window_start: NaiveTime,
    #[serde(with = "hhmm")]
    pub approval_window_end: NaiveTime,
    pub use_holiday_api: bool,
    pub holiday_region: String,
    pub holiday_cache_days: i64,
}

impl Default for Settings {
    fn default() -> Self {
        Self::from_map(&BTreeMap::new())
    }
}

impl Settings {
    /// Stored values that fail validation fall back to the default and are logged.
    pub fn from_map(raw: &BTreeMap<String, String>) -> Self {
        let int = |key: SettingKey| lookup(raw, key).trim().parse::<i64>().unwrap_or_default();
        let time = |key: SettingKey| {
            NaiveTime::parse_from_str(lookup(raw, key), hhmm::FORMAT).unwrap_or(NaiveTime::MIN)
        };

        let mut settings = Self {
            booking_advance_days: int(SettingKey::BookingAdvanceDays),
            cancellation_notice_hours: int(SettingKey::CancellationNoticeHours),
            auto_deactivation_days: int(SettingKey::AutoDeactivationDays),
            booking_time_granularity: int(SettingKey::BookingTimeGranularity),
            approval_required: lookup(raw, SettingKey::ApprovalRequired) == "true",
            approval_window_start: time(SettingKey::ApprovalWindowStart),
            approval_window_end: time(SettingKey::ApprovalWindowEnd),
            use_holiday_api: lookup(raw, SettingKey::UseHolidayApi) == "true",
            holiday_region: lookup(raw, SettingKey::HolidayRegion).to_string(),
            holiday_cache_days: int(SettingKey::HolidayCacheDays),
        };
        if settings.approval_window_end <= settings.approval_window_start {
            tracing::warn!("stored approval window is inverted, using defaults");
            let defaults = |key: SettingKey| {
                NaiveTime::parse_from_str(key.default_value(), hhmm::FORMAT)
                    .unwrap_or(NaiveTime::MIN)
            };
            settings.approval_window_start = defaults(SettingKey::ApprovalWindowStart);
            settings.approval_window_end = defaults(SettingKey::ApprovalWindowEnd);
        }
        settings
    }

    /// Validates `value` for `key` against the current settings and returns the
    /// normalized value to persist.
    pub fn with(&self, key: SettingKey, value: &str) -> Result<String, String> {
        let value = value.trim();
        key.validate(value)?;
        let parse = |v: &str| NaiveTime::parse_from_str(v, hhmm::FORMAT).ok();
        match key {
            SettingKey::ApprovalWindowStart => {
                if parse(value).is_some_and(|start| start >= self.approval_window_end) {
                    return Err("approval window start must be before its end".to_string());
                }
            }
            SettingKey::ApprovalWindowEnd => {
                if parse(value).is_some_and(|end| end <= self.approval_window_start) {
                    return Err("approval window end must be after its start".to_string());
                }
            }
            _ => {}
        }
        Ok(value.to_string())
    }

    /// Whether a walk at `t` sits behind the approval gate.
    pub fn requires_approval(&self, t: NaiveTime) -> bool {
        self.approval_required && self.approval_window_start <= t && t < self.approval_window_end
    }
}
