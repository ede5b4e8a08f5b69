//! In-process backend for tests and single-node demos.
//!
//! There are no declarative constraints here, so every uniqueness invariant the
//! SQL backends get from an index is enforced as a check-then-write performed
//! while holding the single state lock. No write path may release the lock
//! between the check and the mutation; that is the whole guarantee.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime};

use super::{default_rule_inputs, Backend, StatusChange, Store, StoreError, StoreResult};
use crate::models::{
    ApprovalDecision, ApprovalStatus, BlockedDate, Booking, BookingFilter, BookingStatus,
    BookingTimeRule, Dog, Holiday, HolidayEntry, HolidaySource, NewBlockedDate, NewBooking,
    NewHoliday, Role, RuleInput, Slot, User,
};

#[derive(Default)]
struct State {
    bookings: BTreeMap<i64, Booking>,
    rules: BTreeMap<i64, BookingTimeRule>,
    blocks: BTreeMap<i64, BlockedDate>,
    holidays: BTreeMap<i64, Holiday>,
    holiday_fetches: BTreeMap<(i32, String), NaiveDateTime>,
    settings: BTreeMap<String, String>,
    users: BTreeMap<i64, User>,
    dogs: BTreeMap<i64, Dog>,
    next_id: i64,
}

impl State {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn slot_taken(&self, slot: &Slot, exclude_id: Option<i64>) -> bool {
        self.bookings.values().any(|b| {
            Some(b.id) != exclude_id && b.status != BookingStatus::Cancelled && b.slot() == *slot
        })
    }

    fn rule_name_taken(&self, rule: &RuleInput, exclude_id: Option<i64>) -> bool {
        let name = rule.name.trim();
        self.rules
            .values()
            .any(|r| Some(r.id) != exclude_id && r.day_type == rule.day_type && r.name == name)
    }

    fn holiday_taken(&self, date: NaiveDate, source: HolidaySource, region: Option<&str>) -> bool {
        self.holidays
            .values()
            .any(|h| h.date == date && h.source == source && h.region.as_deref() == region)
    }

    fn require_dog(&self, dog_id: i64) -> StoreResult<()> {
        if self.dogs.contains_key(&dog_id) {
            Ok(())
        } else {
            Err(StoreError::Backend(anyhow::anyhow!(
                "foreign key violation: dog {dog_id} does not exist"
            )))
        }
    }

    fn require_user(&self, user_id: i64) -> StoreResult<()> {
        if self.users.contains_key(&user_id) {
            Ok(())
        } else {
            Err(StoreError::Backend(anyhow::anyhow!(
                "foreign key violation: user {user_id} does not exist"
            )))
        }
    }
}

pub struct MemoryStore {
    state: Mutex<State>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Starts with the same seeded rules a freshly migrated database has,
    /// stamped with the Unix epoch.
    pub fn new() -> Self {
        Self::seeded_at(NaiveDateTime::default())
    }

    /// Like [`MemoryStore::new`], with the seeded rules stamped `seeded_at`.
    pub fn seeded_at(seeded_at: NaiveDateTime) -> Self {
        let mut state = State::default();
        for input in default_rule_inputs() {
            let id = state.next_id();
            state.rules.insert(id, rule_from_input(id, &input, seeded_at, seeded_at));
        }
        Self {
            state: Mutex::new(state),
        }
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| StoreError::Backend(anyhow::anyhow!("memory store mutex poisoned")))
    }
}

fn rule_from_input(
    id: i64,
    input: &RuleInput,
    created_at: NaiveDateTime,
    updated_at: NaiveDateTime,
) -> BookingTimeRule {
    BookingTimeRule {
        id,
        day_type: input.day_type,
        name: input.name.trim().to_string(),
        start_time: input.start_time,
        end_time: input.end_time,
        is_blocked: input.is_blocked,
        created_at,
        updated_at,
    }
}

fn by_schedule(a: &Booking, b: &Booking) -> std::cmp::Ordering {
    (a.date, a.scheduled_time, a.id).cmp(&(b.date, b.scheduled_time, b.id))
}

#[async_trait]
impl Store for MemoryStore {
    fn backend(&self) -> Backend {
        Backend::Memory
    }

    // ── Bookings ──

    async fn create_booking(&self, booking: &NewBooking) -> StoreResult<Booking> {
        let mut state = self.lock()?;
        state.require_user(booking.user_id)?;
        state.require_dog(booking.dog_id)?;
        if state.slot_taken(&booking.slot(), None) {
            return Err(StoreError::Conflict);
        }

        let id = state.next_id();
        let created = Booking {
            id,
            user_id: booking.user_id,
            dog_id: booking.dog_id,
            date: booking.date,
            walk_type: booking.walk_type,
            scheduled_time: booking.scheduled_time,
            status: BookingStatus::Scheduled,
            requires_approval: booking.requires_approval,
            approval_status: booking.initial_approval(),
            approved_by: None,
            approved_at: None,
            rejection_reason: None,
            user_notes: None,
            cancellation_reason: None,
            completed_at: None,
            reminder_sent_at: None,
            created_at: booking.created_at,
            updated_at: booking.created_at,
        };
        state.bookings.insert(id, created.clone());
        Ok(created)
    }

    async fn get_booking(&self, id: i64) -> StoreResult<Option<Booking>> {
        Ok(self.lock()?.bookings.get(&id).cloned())
    }

    async fn list_bookings(&self, filter: &BookingFilter) -> StoreResult<Vec<Booking>> {
        let state = self.lock()?;
        let mut bookings: Vec<Booking> = state
            .bookings
            .values()
            .filter(|b| filter.matches(b))
            .cloned()
            .collect();
        bookings.sort_by(by_schedule);
        bookings.truncate(filter.effective_limit() as usize);
        Ok(bookings)
    }

    async fn find_conflicting(&self, slot: &Slot, exclude_id: Option<i64>) -> StoreResult<bool> {
        Ok(self.lock()?.slot_taken(slot, exclude_id))
    }

    async fn update_status(&self, id: i64, change: &StatusChange<'_>) -> StoreResult<bool> {
        let mut state = self.lock()?;
        let Some(b) = state.bookings.get_mut(&id) else {
            return Ok(false);
        };
        if b.status != change.from {
            return Ok(false);
        }
        b.status = change.to;
        match change.to {
            BookingStatus::Cancelled => b.cancellation_reason = change.reason.map(str::to_string),
            BookingStatus::Completed => b.completed_at = Some(change.at),
            BookingStatus::Scheduled => {}
        }
        b.updated_at = change.at;
        Ok(true)
    }

    async fn decide_approval(
        &self,
        id: i64,
        decision: &ApprovalDecision,
        at: NaiveDateTime,
    ) -> StoreResult<bool> {
        let mut state = self.lock()?;
        let Some(b) = state.bookings.get_mut(&id) else {
            return Ok(false);
        };
        if b.status != BookingStatus::Scheduled || b.approval_status != ApprovalStatus::Pending {
            return Ok(false);
        }
        b.approved_by = Some(decision.admin_id());
        b.approved_at = Some(at);
        b.updated_at = at;
        match decision {
            ApprovalDecision::Approve { .. } => b.approval_status = ApprovalStatus::Approved,
            ApprovalDecision::Reject { reason, .. } => {
                b.approval_status = ApprovalStatus::Rejected;
                b.status = BookingStatus::Cancelled;
                b.rejection_reason = Some(reason.clone());
            }
        }
        Ok(true)
    }

    async fn reschedule(
        &self,
        id: i64,
        slot: &Slot,
        time: NaiveTime,
        at: NaiveDateTime,
    ) -> StoreResult<bool> {
        let mut state = self.lock()?;
        let eligible = state.bookings.get(&id).is_some_and(|b| {
            b.status == BookingStatus::Scheduled && b.approval_status != ApprovalStatus::Pending
        });
        if !eligible {
            return Ok(false);
        }
        state.require_dog(slot.dog_id)?;
        if state.slot_taken(slot, Some(id)) {
            return Err(StoreError::Conflict);
        }

        let Some(b) = state.bookings.get_mut(&id) else {
            return Ok(false);
        };
        b.dog_id = slot.dog_id;
        b.date = slot.date;
        b.walk_type = slot.walk_type;
        b.scheduled_time = time;
        b.reminder_sent_at = None;
        b.updated_at = at;
        Ok(true)
    }

    async fn set_notes(&self, id: i64, notes: &str, at: NaiveDateTime) -> StoreResult<bool> {
        let mut state = self.lock()?;
        match state.bookings.get_mut(&id) {
            Some(b)
                if b.status == BookingStatus::Completed
                    && b.approval_status != ApprovalStatus::Rejected =>
            {
                b.user_notes = Some(notes.to_string());
                b.updated_at = at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn complete_due(&self, now: NaiveDateTime) -> StoreResult<u64> {
        let mut state = self.lock()?;
        let mut count = 0;
        for b in state.bookings.values_mut() {
            if b.status == BookingStatus::Scheduled && b.starts_at() <= now {
                b.status = BookingStatus::Completed;
                b.completed_at = Some(now);
                b.updated_at = now;
                count += 1;
            }
        }
        Ok(count)
    }

    async fn reminder_candidates(&self, from: NaiveDate, to: NaiveDate) -> StoreResult<Vec<Booking>> {
        let state = self.lock()?;
        let mut bookings: Vec<Booking> = state
            .bookings
            .values()
            .filter(|b| {
                b.status == BookingStatus::Scheduled
                    && b.approval_status == ApprovalStatus::Approved
                    && b.reminder_sent_at.is_none()
                    && b.date >= from
                    && b.date <= to
            })
            .cloned()
            .collect();
        bookings.sort_by(by_schedule);
        Ok(bookings)
    }

    async fn mark_reminder_sent(&self, id: i64, at: NaiveDateTime) -> StoreResult<bool> {
        let mut state = self.lock()?;
        match state.bookings.get_mut(&id) {
            Some(b) if b.status == BookingStatus::Scheduled && b.reminder_sent_at.is_none() => {
                b.reminder_sent_at = Some(at);
                b.updated_at = at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    // ── Time rules ──

    async fn list_rules(&self) -> StoreResult<Vec<BookingTimeRule>> {
        let state = self.lock()?;
        let mut rules: Vec<BookingTimeRule> = state.rules.values().cloned().collect();
        rules.sort_by(|a, b| {
            (a.day_type.as_str(), a.start_time, a.id).cmp(&(b.day_type.as_str(), b.start_time, b.id))
        });
        Ok(rules)
    }

    async fn create_rule(&self, rule: &RuleInput, at: NaiveDateTime) -> StoreResult<BookingTimeRule> {
        let mut state = self.lock()?;
        if state.rule_name_taken(rule, None) {
            return Err(StoreError::Conflict);
        }
        let id = state.next_id();
        let created = rule_from_input(id, rule, at, at);
        state.rules.insert(id, created.clone());
        Ok(created)
    }

    async fn update_rule(&self, id: i64, rule: &RuleInput, at: NaiveDateTime) -> StoreResult<bool> {
        let mut state = self.lock()?;
        let Some(created_at) = state.rules.get(&id).map(|r| r.created_at) else {
            return Ok(false);
        };
        if state.rule_name_taken(rule, Some(id)) {
            return Err(StoreError::Conflict);
        }
        state.rules.insert(id, rule_from_input(id, rule, created_at, at));
        Ok(true)
    }

    async fn delete_rule(&self, id: i64) -> StoreResult<bool> {
        Ok(self.lock()?.rules.remove(&id).is_some())
    }

    // ── Blocked dates ──

    async fn list_blocked_dates(&self) -> StoreResult<Vec<BlockedDate>> {
        let state = self.lock()?;
        let mut blocks: Vec<BlockedDate> = state.blocks.values().cloned().collect();
        blocks.sort_by_key(|b| (b.date, b.id));
        Ok(blocks)
    }

    async fn create_blocked_date(
        &self,
        block: &NewBlockedDate,
        at: NaiveDateTime,
    ) -> StoreResult<BlockedDate> {
        let mut state = self.lock()?;
        if let Some(dog_id) = block.dog_id {
            state.require_dog(dog_id)?;
        }
        if state
            .blocks
            .values()
            .any(|b| b.date == block.date && b.dog_id == block.dog_id)
        {
            return Err(StoreError::Conflict);
        }
        let id = state.next_id();
        let created = BlockedDate {
            id,
            date: block.date,
            dog_id: block.dog_id,
            reason: block.reason.trim().to_string(),
            created_by: block.created_by,
            created_at: at,
        };
        state.blocks.insert(id, created.clone());
        Ok(created)
    }

    async fn delete_blocked_date(&self, id: i64) -> StoreResult<bool> {
        Ok(self.lock()?.blocks.remove(&id).is_some())
    }

    // ── Holidays ──

    async fn list_holidays(&self, year: i32, region: &str) -> StoreResult<Vec<Holiday>> {
        let state = self.lock()?;
        let mut holidays: Vec<Holiday> = state
            .holidays
            .values()
            .filter(|h| {
                h.date.year() == year
                    && (h.source == HolidaySource::Manual || h.region.as_deref() == Some(region))
            })
            .cloned()
            .collect();
        holidays.sort_by_key(|h| (h.date, h.id));
        Ok(holidays)
    }

    async fn replace_fetched_holidays(
        &self,
        year: i32,
        region: &str,
        entries: &[HolidayEntry],
        at: NaiveDateTime,
    ) -> StoreResult<()> {
        let mut state = self.lock()?;
        state.holidays.retain(|_, h| {
            !(h.source == HolidaySource::Fetched
                && h.region.as_deref() == Some(region)
                && h.date.year() == year)
        });
        for entry in entries.iter().filter(|e| e.date.year() == year) {
            if state.holiday_taken(entry.date, HolidaySource::Fetched, Some(region)) {
                continue;
            }
            let id = state.next_id();
            state.holidays.insert(
                id,
                Holiday {
                    id,
                    date: entry.date,
                    name: entry.name.clone(),
                    source: HolidaySource::Fetched,
                    region: Some(region.to_string()),
                    created_by: None,
                    created_at: at,
                },
            );
        }
        state.holiday_fetches.insert((year, region.to_string()), at);
        Ok(())
    }

    async fn holidays_fetched_at(&self, year: i32, region: &str) -> StoreResult<Option<NaiveDateTime>> {
        let state = self.lock()?;
        Ok(state.holiday_fetches.get(&(year, region.to_string())).copied())
    }

    async fn create_manual_holiday(
        &self,
        holiday: &NewHoliday,
        created_by: i64,
        at: NaiveDateTime,
    ) -> StoreResult<Holiday> {
        let mut state = self.lock()?;
        if state.holiday_taken(holiday.date, HolidaySource::Manual, None) {
            return Err(StoreError::Conflict);
        }
        let id = state.next_id();
        let created = Holiday {
            id,
            date: holiday.date,
            name: holiday.name.trim().to_string(),
            source: HolidaySource::Manual,
            region: None,
            created_by: Some(created_by),
            created_at: at,
        };
        state.holidays.insert(id, created.clone());
        Ok(created)
    }

    async fn delete_holiday(&self, id: i64) -> StoreResult<bool> {
        Ok(self.lock()?.holidays.remove(&id).is_some())
    }

    // ── Settings ──

    async fn load_settings(&self) -> StoreResult<BTreeMap<String, String>> {
        Ok(self.lock()?.settings.clone())
    }

    async fn put_setting(&self, key: &str, value: &str, _at: NaiveDateTime) -> StoreResult<()> {
        self.lock()?
            .settings
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    // ── Users & dogs ──

    async fn get_user(&self, id: i64) -> StoreResult<Option<User>> {
        Ok(self.lock()?.users.get(&id).cloned())
    }

    async fn upsert_user(&self, user: &User) -> StoreResult<()> {
        self.lock()?.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn idle_users(&self, cutoff: NaiveDateTime) -> StoreResult<Vec<User>> {
        let state = self.lock()?;
        Ok(state
            .users
            .values()
            .filter(|u| {
                u.is_active
                    && u.deleted_at.is_none()
                    && u.role == Role::Walker
                    && u.last_activity_at < cutoff
            })
            .cloned()
            .collect())
    }

    async fn deactivate_user(
        &self,
        id: i64,
        cutoff: NaiveDateTime,
        reason: &str,
        at: NaiveDateTime,
    ) -> StoreResult<bool> {
        let mut state = self.lock()?;
        match state.users.get_mut(&id) {
            Some(u) if u.is_active && u.deleted_at.is_none() && u.last_activity_at < cutoff => {
                u.is_active = false;
                u.deactivated_at = Some(at);
                u.deactivation_reason = Some(reason.to_string());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn soft_delete_user(&self, id: i64, at: NaiveDateTime) -> StoreResult<bool> {
        let mut state = self.lock()?;
        match state.users.get_mut(&id) {
            Some(u) if u.deleted_at.is_none() => {
                u.deleted_at = Some(at);
                u.is_active = false;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn get_dog(&self, id: i64) -> StoreResult<Option<Dog>> {
        Ok(self.lock()?.dogs.get(&id).cloned())
    }

    async fn upsert_dog(&self, dog: &Dog) -> StoreResult<()> {
        self.lock()?.dogs.insert(dog.id, dog.clone());
        Ok(())
    }

    async fn soft_delete_dog(&self, id: i64, at: NaiveDateTime) -> StoreResult<bool> {
        let mut state = self.lock()?;
        match state.dogs.get_mut(&id) {
            Some(d) if d.deleted_at.is_none() => {
                d.deleted_at = Some(at);
                d.is_available = false;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
