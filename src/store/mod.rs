//! Persistence for bookings and the configuration the scheduler reads.
//!
//! Every backend must be observably identical: the same uniqueness guarantees,
//! the same conditional-write semantics and the same soft-delete behavior.
//! Native driver errors never leave a backend unclassified; each backend maps
//! its own errors into [`StoreError`] so callers only ever see `Conflict`,
//! `Transient` or an opaque `Backend` failure.

pub mod memory;
pub mod postgres;
pub mod sqlite;

#[cfg(test)]
pub(crate) mod contract;

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

use crate::models::{
    ApprovalDecision, BlockedDate, Booking, BookingFilter, BookingStatus, BookingTimeRule, DayType,
    Dog, Holiday, HolidayEntry, NewBlockedDate, NewBooking, NewHoliday, RuleInput, Slot, User,
};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A uniqueness invariant rejected the write.
    #[error("unique constraint violated")]
    Conflict,

    /// Retryable: lock contention, dropped connection, serialization failure.
    #[error("transient storage failure: {0}")]
    Transient(String),

    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Sqlite,
    Postgres,
    Memory,
}

impl Backend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Backend::Sqlite => "sqlite",
            Backend::Postgres => "postgres",
            Backend::Memory => "memory",
        }
    }
}

/// A status transition that only applies while the row is still in `from`.
#[derive(Debug, Clone)]
pub struct StatusChange<'a> {
    pub from: BookingStatus,
    pub to: BookingStatus,
    pub reason: Option<&'a str>,
    pub at: NaiveDateTime,
}

/// Rules seeded into a fresh database.
pub const DEFAULT_RULES: &[(DayType, &str, &str, &str, bool)] = &[
    (DayType::Weekday, "Morning walk", "09:00", "12:00", false),
    (DayType::Weekday, "Lunch break", "13:00", "14:00", true),
    (DayType::Weekday, "Afternoon walk", "14:00", "16:30", false),
    (DayType::Weekday, "Feeding time", "16:30", "18:00", true),
    (DayType::Weekday, "Evening walk", "18:00", "19:30", false),
    (DayType::Weekend, "Morning walk", "09:00", "12:00", false),
    (DayType::Weekend, "Feeding time", "12:00", "13:00", true),
    (DayType::Weekend, "Lunch break", "13:00", "14:00", true),
    (DayType::Weekend, "Afternoon walk", "14:00", "17:00", false),
];

pub fn default_rule_inputs() -> Vec<RuleInput> {
    DEFAULT_RULES
        .iter()
        .filter_map(|(day_type, name, start, end, is_blocked)| {
            Some(RuleInput {
                day_type: *day_type,
                name: name.to_string(),
                start_time: NaiveTime::parse_from_str(start, "%H:%M").ok()?,
                end_time: NaiveTime::parse_from_str(end, "%H:%M").ok()?,
                is_blocked: *is_blocked,
            })
        })
        .collect()
}

#[async_trait]
pub trait Store: Send + Sync {
    fn backend(&self) -> Backend;

    // ── Bookings ──

    /// Atomic insert. Fails with [`StoreError::Conflict`] when a non-cancelled
    /// booking already holds the slot.
    async fn create_booking(&self, booking: &NewBooking) -> StoreResult<Booking>;

    async fn get_booking(&self, id: i64) -> StoreResult<Option<Booking>>;

    /// Ordered by date and time, ascending.
    async fn list_bookings(&self, filter: &BookingFilter) -> StoreResult<Vec<Booking>>;

    /// Fast pre-check for an active booking on `slot`, ignoring `exclude_id`.
    async fn find_conflicting(&self, slot: &Slot, exclude_id: Option<i64>) -> StoreResult<bool>;

    async fn update_status(&self, id: i64, change: &StatusChange<'_>) -> StoreResult<bool>;

    /// Applies only while the booking is scheduled and pending review.
    async fn decide_approval(
        &self,
        id: i64,
        decision: &ApprovalDecision,
        at: NaiveDateTime,
    ) -> StoreResult<bool>;

    /// Moves a scheduled, non-pending booking. May fail with `Conflict`.
    async fn reschedule(
        &self,
        id: i64,
        slot: &Slot,
        time: NaiveTime,
        at: NaiveDateTime,
    ) -> StoreResult<bool>;

    /// Applies only to completed bookings whose approval was not rejected.
    async fn set_notes(&self, id: i64, notes: &str, at: NaiveDateTime) -> StoreResult<bool>;

    /// Completes every scheduled booking starting at or before `now`.
    async fn complete_due(&self, now: NaiveDateTime) -> StoreResult<u64>;

    /// Scheduled, approved bookings on `from..=to` that have not been reminded.
    async fn reminder_candidates(&self, from: NaiveDate, to: NaiveDate) -> StoreResult<Vec<Booking>>;

    async fn mark_reminder_sent(&self, id: i64, at: NaiveDateTime) -> StoreResult<bool>;

    // ── Time rules ──

    async fn list_rules(&self) -> StoreResult<Vec<BookingTimeRule>>;
    async fn create_rule(&self, rule: &RuleInput, at: NaiveDateTime) -> StoreResult<BookingTimeRule>;
    async fn update_rule(&self, id: i64, rule: &RuleInput, at: NaiveDateTime) -> StoreResult<bool>;
    async fn delete_rule(&self, id: i64) -> StoreResult<bool>;

    // ── Blocked dates ──

    async fn list_blocked_dates(&self) -> StoreResult<Vec<BlockedDate>>;
    async fn create_blocked_date(
        &self,
        block: &NewBlockedDate,
        at: NaiveDateTime,
    ) -> StoreResult<BlockedDate>;
    async fn delete_blocked_date(&self, id: i64) -> StoreResult<bool>;

    // ── Holidays ──

    /// Manual entries for `year` plus entries fetched for (`year`, `region`).
    async fn list_holidays(&self, year: i32, region: &str) -> StoreResult<Vec<Holiday>>;
    async fn replace_fetched_holidays(
        &self,
        year: i32,
        region: &str,
        entries: &[HolidayEntry],
        at: NaiveDateTime,
    ) -> StoreResult<()>;
    async fn holidays_fetched_at(&self, year: i32, region: &str) -> StoreResult<Option<NaiveDateTime>>;
    async fn create_manual_holiday(
        &self,
        holiday: &NewHoliday,
        created_by: i64,
        at: NaiveDateTime,
    ) -> StoreResult<Holiday>;
    async fn delete_holiday(&self, id: i64) -> StoreResult<bool>;

    // ── Settings ──

    async fn load_settings(&self) -> StoreResult<BTreeMap<String, String>>;
    async fn put_setting(&self, key: &str, value: &str, at: NaiveDateTime) -> StoreResult<()>;

    // ── Users & dogs ──

    async fn get_user(&self, id: i64) -> StoreResult<Option<User>>;
    async fn upsert_user(&self, user: &User) -> StoreResult<()>;
    /// Active, non-deleted walkers whose last activity is before `cutoff`.
    async fn idle_users(&self, cutoff: NaiveDateTime) -> StoreResult<Vec<User>>;
    async fn deactivate_user(
        &self,
        id: i64,
        cutoff: NaiveDateTime,
        reason: &str,
        at: NaiveDateTime,
    ) -> StoreResult<bool>;
    async fn soft_delete_user(&self, id: i64, at: NaiveDateTime) -> StoreResult<bool>;

    async fn get_dog(&self, id: i64) -> StoreResult<Option<Dog>>;
    async fn upsert_dog(&self, dog: &Dog) -> StoreResult<()>;
    async fn soft_delete_dog(&self, id: i64, at: NaiveDateTime) -> StoreResult<bool>;
}
