use std::collections::BTreeSet;
use std::fmt;

use chrono::{NaiveDate, NaiveTime, Timelike};

use crate::models::{BlockedDate, BookingTimeRule, DayType};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    DateBlocked { reason: String },
    BlockedWindow { rule: String, window: String },
    OutsideWindows { allowed: String },
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::DateBlocked { reason } => write!(f, "date blocked: {reason}"),
            Rejection::BlockedWindow { rule, window } => {
                write!(f, "blocked window: {rule} ({window})")
            }
            Rejection::OutsideWindows { allowed } if allowed.is_empty() => {
                write!(f, "outside allowed windows: no walks on this day")
            }
            Rejection::OutsideWindows { allowed } => {
                write!(f, "outside allowed windows: {allowed}")
            }
        }
    }
}

/// Rules governing `day_type`. A holiday without holiday-specific rules uses
/// the weekend rules.
pub fn rules_for(day_type: DayType, rules: &[BookingTimeRule]) -> Vec<&BookingTimeRule> {
    let matching: Vec<&BookingTimeRule> = rules.iter().filter(|r| r.day_type == day_type).collect();
    if matching.is_empty() && day_type == DayType::Holiday {
        return rules_for(DayType::Weekend, rules);
    }
    matching
}

/// Decides whether `time` on `date` can be booked for `dog_id`.
///
/// Blocked dates win over every rule. Otherwise a blocked window containing
/// `time` rejects, and `time` must fall inside at least one open window.
pub fn evaluate(
    date: NaiveDate,
    time: NaiveTime,
    dog_id: i64,
    day_type: DayType,
    rules: &[BookingTimeRule],
    blocks: &[BlockedDate],
) -> Result<(), Rejection> {
    if let Some(block) = blocks.iter().find(|b| b.applies_to(date, dog_id)) {
        return Err(Rejection::DateBlocked {
            reason: block.reason.clone(),
        });
    }

    let day_rules = rules_for(day_type, rules);

    if let Some(rule) = day_rules.iter().find(|r| r.is_blocked && r.contains(time)) {
        return Err(Rejection::BlockedWindow {
            rule: rule.name.clone(),
            window: rule.window(),
        });
    }

    if day_rules.iter().any(|r| !r.is_blocked && r.contains(time)) {
        return Ok(());
    }

    let allowed: Vec<String> = day_rules
        .iter()
        .filter(|r| !r.is_blocked)
        .map(|r| r.window())
        .collect();
    Err(Rejection::OutsideWindows {
        allowed: allowed.join(", "),
    })
}

fn minute_of_day(t: NaiveTime) -> u32 {
    t.num_seconds_from_midnight() / 60
}

/// Bookable start times on `date`, stepping through each open window at
/// `granularity_minutes`.
pub fn available_slots(
    date: NaiveDate,
    dog_id: i64,
    day_type: DayType,
    rules: &[BookingTimeRule],
    blocks: &[BlockedDate],
    granularity_minutes: u32,
) -> Vec<NaiveTime> {
    if blocks.iter().any(|b| b.applies_to(date, dog_id)) {
        return Vec::new();
    }

    let step = granularity_minutes.max(1);
    let mut slots = BTreeSet::new();
    for rule in rules_for(day_type, rules).into_iter().filter(|r| !r.is_blocked) {
        let end = minute_of_day(rule.end_time);
        let mut minute = minute_of_day(rule.start_time);
        while minute < end {
            if let Some(t) = NaiveTime::from_hms_opt(minute / 60, minute % 60, 0) {
                if evaluate(date, t, dog_id, day_type, rules, blocks).is_ok() {
                    slots.insert(t);
                }
            }
            minute += step;
        }
    }
    slots.into_iter().collect()
}
