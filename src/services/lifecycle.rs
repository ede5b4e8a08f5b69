//! Booking lifecycle: every mutation of a booking goes through [`BookingEngine`].
//!
//! Each operation re-reads the acting user, checks the booking's current state,
//! then issues a conditional store write. A write that no longer applies (the
//! row changed underneath us) is reported as [`AppError::NotEligible`].
//! Notifications are dispatched after the write and never roll it back.

use std::sync::Arc;

use chrono::{Duration, NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::errors::{AppError, AppResult};
use crate::models::booking::hhmm;
use crate::models::{
    ApprovalDecision, ApprovalStatus, Booking, BookingFilter, BookingStatus, DayType, NewBooking,
    Settings, Slot, User, WalkType,
};
use crate::services::config_cache::ConfigCache;
use crate::services::holidays::HolidayResolver;
use crate::services::notify::{BookingEvent, EventKind, NotificationGateway};
use crate::services::validator;
use crate::store::{StatusChange, Store, StoreError};

const MAX_NOTES_LEN: usize = 2000;

#[derive(Debug, Clone, Deserialize)]
pub struct CreateBookingRequest {
    pub dog_id: i64,
    pub date: NaiveDate,
    pub walk_type: WalkType,
    #[serde(with = "hhmm")]
    pub scheduled_time: NaiveTime,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MoveBookingRequest {
    pub date: NaiveDate,
    pub walk_type: WalkType,
    #[serde(with = "hhmm")]
    pub scheduled_time: NaiveTime,
}

#[derive(Debug, Clone, Serialize)]
pub struct DayAvailability {
    pub date: NaiveDate,
    pub day_type: DayType,
    pub slots: Vec<String>,
}

pub struct BookingEngine {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    config: Arc<ConfigCache>,
    holidays: Arc<HolidayResolver>,
    notifications: Arc<NotificationGateway>,
}

impl BookingEngine {
    pub fn new(
        store: Arc<dyn Store>,
        clock: Arc<dyn Clock>,
        config: Arc<ConfigCache>,
        holidays: Arc<HolidayResolver>,
        notifications: Arc<NotificationGateway>,
    ) -> Self {
        Self {
            store,
            clock,
            config,
            holidays,
            notifications,
        }
    }

    // ── Actors ──

    /// The acting user, re-read from the store. Unknown or deleted accounts
    /// are unauthorized; inactive or unverified ones are forbidden.
    pub async fn actor(&self, user_id: i64) -> AppResult<User> {
        let user = match self.store.get_user(user_id).await? {
            Some(u) if u.deleted_at.is_none() => u,
            _ => return Err(AppError::Unauthorized),
        };
        if !user.in_good_standing() {
            return Err(AppError::Forbidden("account is not active".to_string()));
        }
        Ok(user)
    }

    pub async fn require_admin(&self, user_id: i64) -> AppResult<User> {
        let user = self.actor(user_id).await?;
        if !user.is_admin() {
            return Err(AppError::Forbidden("admin role required".to_string()));
        }
        Ok(user)
    }

    // ── Requests ──

    pub async fn create(&self, user_id: i64, req: CreateBookingRequest) -> AppResult<Booking> {
        let user = self.actor(user_id).await?;
        let dog = match self.store.get_dog(req.dog_id).await? {
            Some(d) if d.deleted_at.is_none() => d,
            _ => return Err(AppError::NotFound(format!("dog {}", req.dog_id))),
        };
        if !dog.is_available {
            return Err(AppError::Validation(format!("{} is not available for walks", dog.name)));
        }
        if dog.tier > user.tier {
            return Err(AppError::Forbidden(format!(
                "{} requires {} experience",
                dog.name,
                dog.tier.as_str()
            )));
        }

        let settings = self.settings().await?;
        self.check_bookable(req.date, req.scheduled_time, req.dog_id, &settings)
            .await?;

        let slot = Slot {
            dog_id: req.dog_id,
            date: req.date,
            walk_type: req.walk_type,
        };
        if self.store.find_conflicting(&slot, None).await? {
            return Err(AppError::Conflict);
        }

        let new = NewBooking {
            user_id: user.id,
            dog_id: req.dog_id,
            date: req.date,
            walk_type: req.walk_type,
            scheduled_time: req.scheduled_time,
            requires_approval: settings.requires_approval(req.scheduled_time),
            created_at: self.clock.now(),
        };
        let booking = match self.store.create_booking(&new).await {
            Ok(b) => b,
            Err(StoreError::Conflict) => {
                tracing::warn!(
                    dog_id = slot.dog_id,
                    date = %slot.date,
                    walk_type = slot.walk_type.as_str(),
                    "slot taken between pre-check and insert"
                );
                return Err(AppError::Conflict);
            }
            Err(e) => return Err(e.into()),
        };

        tracing::info!(
            booking_id = booking.id,
            user_id = booking.user_id,
            dog_id = booking.dog_id,
            date = %booking.date,
            requires_approval = booking.requires_approval,
            "booking created"
        );
        self.emit(BookingEvent::new(EventKind::Created, booking.clone(), booking.created_at).by(user.id))
            .await;
        Ok(booking)
    }

    pub async fn availability(
        &self,
        user_id: i64,
        date: NaiveDate,
        dog_id: Option<i64>,
    ) -> AppResult<DayAvailability> {
        self.actor(user_id).await?;
        let settings = self.settings().await?;
        let day_type = self.day_type(date, &settings).await?;

        let now = self.clock.now_minute();
        let last_day = now.date() + Duration::days(settings.booking_advance_days);
        if date < now.date() || date > last_day {
            return Ok(DayAvailability {
                date,
                day_type,
                slots: Vec::new(),
            });
        }

        let snapshot = self.config.snapshot().await?;
        let granularity = u32::try_from(settings.booking_time_granularity).unwrap_or(15);
        let slots = validator::available_slots(
            date,
            dog_id.unwrap_or_default(),
            day_type,
            &snapshot.rules,
            &snapshot.blocks,
            granularity,
        )
        .into_iter()
        .filter(|t| date.and_time(*t) >= now)
        .map(|t| t.format(hhmm::FORMAT).to_string())
        .collect();

        Ok(DayAvailability {
            date,
            day_type,
            slots,
        })
    }

    pub async fn cancel_by_user(
        &self,
        user_id: i64,
        booking_id: i64,
        reason: Option<String>,
    ) -> AppResult<Booking> {
        let user = self.actor(user_id).await?;
        let booking = self.booking(booking_id).await?;
        if booking.user_id != user.id {
            return Err(AppError::Forbidden("you can only cancel your own bookings".to_string()));
        }
        ensure_cancellable(&booking)?;

        let settings = self.settings().await?;
        let now = self.clock.now_minute();
        if booking.starts_at() - now < Duration::hours(settings.cancellation_notice_hours) {
            return Err(AppError::Validation(format!(
                "bookings must be cancelled at least {} hours in advance",
                settings.cancellation_notice_hours
            )));
        }

        let reason = reason.map(|r| r.trim().to_string()).filter(|r| !r.is_empty());
        let booking = self.cancel(&booking, reason.as_deref()).await?;
        tracing::info!(booking_id, user_id, "booking cancelled by walker");
        self.emit(
            BookingEvent::new(EventKind::CancelledByUser, booking.clone(), booking.updated_at)
                .by(user.id)
                .because(reason),
        )
        .await;
        Ok(booking)
    }

    pub async fn cancel_by_admin(
        &self,
        admin_id: i64,
        booking_id: i64,
        reason: String,
    ) -> AppResult<Booking> {
        let admin = self.require_admin(admin_id).await?;
        let reason = required(reason, "a cancellation reason is required")?;
        let booking = self.booking(booking_id).await?;
        ensure_cancellable(&booking)?;

        let booking = self.cancel(&booking, Some(reason.as_str())).await?;
        tracing::info!(booking_id, admin_id, "booking cancelled by admin");
        self.emit(
            BookingEvent::new(EventKind::CancelledByAdmin, booking.clone(), booking.updated_at)
                .by(admin.id)
                .because(Some(reason)),
        )
        .await;
        Ok(booking)
    }

    pub async fn move_booking(
        &self,
        admin_id: i64,
        booking_id: i64,
        req: MoveBookingRequest,
    ) -> AppResult<Booking> {
        let admin = self.require_admin(admin_id).await?;
        let booking = self.booking(booking_id).await?;
        ensure_cancellable(&booking)?;

        let settings = self.settings().await?;
        self.check_bookable(req.date, req.scheduled_time, booking.dog_id, &settings)
            .await?;

        let slot = Slot {
            dog_id: booking.dog_id,
            date: req.date,
            walk_type: req.walk_type,
        };
        if self.store.find_conflicting(&slot, Some(booking.id)).await? {
            return Err(AppError::Conflict);
        }

        let moved = self
            .store
            .reschedule(booking.id, &slot, req.scheduled_time, self.clock.now())
            .await?;
        if !moved {
            return Err(self.stale(booking.id).await);
        }

        let updated = self.booking(booking.id).await?;
        tracing::info!(
            booking_id,
            from = %booking.starts_at(),
            to = %updated.starts_at(),
            "booking moved"
        );
        self.emit(BookingEvent::new(EventKind::Moved, updated.clone(), updated.updated_at).by(admin.id))
            .await;
        Ok(updated)
    }

    pub async fn approve(&self, admin_id: i64, booking_id: i64) -> AppResult<Booking> {
        let admin = self.require_admin(admin_id).await?;
        let decision = ApprovalDecision::Approve { admin_id: admin.id };
        let booking = self.decide(booking_id, &decision).await?;
        tracing::info!(booking_id, admin_id, "booking approved");
        self.emit(BookingEvent::new(EventKind::Approved, booking.clone(), booking.updated_at).by(admin.id))
            .await;
        Ok(booking)
    }

    /// Rejection cancels the booking, which releases its slot immediately.
    pub async fn reject(&self, admin_id: i64, booking_id: i64, reason: String) -> AppResult<Booking> {
        let admin = self.require_admin(admin_id).await?;
        let reason = required(reason, "a rejection reason is required")?;
        let decision = ApprovalDecision::Reject {
            admin_id: admin.id,
            reason: reason.clone(),
        };
        let booking = self.decide(booking_id, &decision).await?;
        tracing::info!(booking_id, admin_id, "booking rejected");
        self.emit(
            BookingEvent::new(EventKind::Rejected, booking.clone(), booking.updated_at)
                .by(admin.id)
                .because(Some(reason)),
        )
        .await;
        Ok(booking)
    }

    pub async fn add_notes(&self, user_id: i64, booking_id: i64, notes: String) -> AppResult<Booking> {
        let user = self.actor(user_id).await?;
        let booking = self.booking(booking_id).await?;
        if booking.user_id != user.id {
            return Err(AppError::Forbidden("you can only annotate your own walks".to_string()));
        }
        let notes = required(notes, "notes must not be empty")?;
        if notes.chars().count() > MAX_NOTES_LEN {
            return Err(AppError::Validation(format!(
                "notes must be at most {MAX_NOTES_LEN} characters"
            )));
        }
        if booking.status != BookingStatus::Completed
            || booking.approval_status == ApprovalStatus::Rejected
        {
            return Err(AppError::NotEligible(
                "notes can only be added to completed walks".to_string(),
            ));
        }

        if !self.store.set_notes(booking.id, &notes, self.clock.now()).await? {
            return Err(self.stale(booking.id).await);
        }
        self.booking(booking.id).await
    }

    // ── Queries ──

    pub async fn get(&self, user_id: i64, booking_id: i64) -> AppResult<Booking> {
        let user = self.actor(user_id).await?;
        let booking = self.booking(booking_id).await?;
        if booking.user_id != user.id && !user.is_admin() {
            return Err(AppError::Forbidden("not your booking".to_string()));
        }
        Ok(booking)
    }

    pub async fn list_own(&self, user_id: i64, mut filter: BookingFilter) -> AppResult<Vec<Booking>> {
        let user = self.actor(user_id).await?;
        filter.user_id = Some(user.id);
        Ok(self.store.list_bookings(&filter).await?)
    }

    pub async fn list_all(&self, admin_id: i64, filter: BookingFilter) -> AppResult<Vec<Booking>> {
        self.require_admin(admin_id).await?;
        Ok(self.store.list_bookings(&filter).await?)
    }

    // ── Background transitions ──

    /// Completes every scheduled walk whose start is at or before the current minute.
    pub async fn complete_due(&self) -> AppResult<u64> {
        let now = self.clock.now_minute();
        let completed = self.store.complete_due(now).await?;
        if completed > 0 {
            tracing::info!(completed, at = %now, "auto-completed bookings");
        }
        Ok(completed)
    }

    /// Sends one reminder per booking starting in `[now + 1h, now + 2h)`.
    /// The reminder is recorded before the event goes out, so a booking is
    /// reminded at most once even when runs overlap.
    pub async fn send_reminders(&self) -> AppResult<usize> {
        let now = self.clock.now_minute();
        let from = now + Duration::hours(1);
        let to = now + Duration::hours(2);

        let candidates = self
            .store
            .reminder_candidates(from.date(), to.date())
            .await?;

        let mut sent = 0;
        for booking in candidates {
            let starts = booking.starts_at();
            if starts < from || starts >= to {
                continue;
            }
            match self.store.mark_reminder_sent(booking.id, now).await {
                Ok(true) => {
                    let mut booking = booking;
                    booking.reminder_sent_at = Some(now);
                    self.emit(BookingEvent::new(EventKind::ReminderDue, booking, now))
                        .await;
                    sent += 1;
                }
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(booking_id = booking.id, error = %e, "failed to record reminder");
                }
            }
        }
        if sent > 0 {
            tracing::info!(sent, "reminders dispatched");
        }
        Ok(sent)
    }

    /// Deactivates walkers idle for longer than `auto_deactivation_days`.
    /// A user that fails is logged and skipped.
    pub async fn deactivate_idle_users(&self) -> AppResult<usize> {
        let settings = self.settings().await?;
        let now = self.clock.now();
        let cutoff = now - Duration::days(settings.auto_deactivation_days);
        let reason = format!(
            "no activity for more than {} days",
            settings.auto_deactivation_days
        );

        let mut deactivated = 0;
        for user in self.store.idle_users(cutoff).await? {
            if user.is_admin() {
                continue;
            }
            match self.store.deactivate_user(user.id, cutoff, &reason, now).await {
                Ok(true) => {
                    tracing::info!(user_id = user.id, last_activity = %user.last_activity_at, "user deactivated");
                    deactivated += 1;
                }
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(user_id = user.id, error = %e, "failed to deactivate user");
                }
            }
        }
        Ok(deactivated)
    }

    // ── Helpers ──

    async fn settings(&self) -> AppResult<Settings> {
        Ok(Settings::from_map(&self.store.load_settings().await?))
    }

    async fn day_type(&self, date: NaiveDate, settings: &Settings) -> AppResult<DayType> {
        let is_holiday = self.holidays.is_holiday(date, settings).await?;
        Ok(DayType::classify(date, is_holiday))
    }

    async fn booking(&self, id: i64) -> AppResult<Booking> {
        self.store
            .get_booking(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("booking {id}")))
    }

    /// Time window, advance window and blocked dates for a requested slot.
    async fn check_bookable(
        &self,
        date: NaiveDate,
        time: NaiveTime,
        dog_id: i64,
        settings: &Settings,
    ) -> AppResult<()> {
        let now = self.clock.now_minute();
        if date.and_time(time) < now {
            return Err(AppError::Validation("cannot book a walk in the past".to_string()));
        }
        if date > now.date() + Duration::days(settings.booking_advance_days) {
            return Err(AppError::Validation(format!(
                "walks can be booked at most {} days in advance",
                settings.booking_advance_days
            )));
        }

        let day_type = self.day_type(date, settings).await?;
        let snapshot = self.config.snapshot().await?;
        validator::evaluate(date, time, dog_id, day_type, &snapshot.rules, &snapshot.blocks)
            .map_err(|rejection| AppError::Validation(rejection.to_string()))
    }

    async fn cancel(&self, booking: &Booking, reason: Option<&str>) -> AppResult<Booking> {
        let change = StatusChange {
            from: BookingStatus::Scheduled,
            to: BookingStatus::Cancelled,
            reason,
            at: self.clock.now(),
        };
        if !self.store.update_status(booking.id, &change).await? {
            return Err(self.stale(booking.id).await);
        }
        self.booking(booking.id).await
    }

    async fn decide(&self, booking_id: i64, decision: &ApprovalDecision) -> AppResult<Booking> {
        let booking = self.booking(booking_id).await?;
        if !booking.awaiting_review() || booking.status != BookingStatus::Scheduled {
            return Err(AppError::NotEligible("booking is not awaiting review".to_string()));
        }
        if !self
            .store
            .decide_approval(booking_id, decision, self.clock.now())
            .await?
        {
            return Err(self.stale(booking_id).await);
        }
        self.booking(booking_id).await
    }

    /// Explains why a conditional write did not apply.
    async fn stale(&self, id: i64) -> AppError {
        match self.store.get_booking(id).await {
            Ok(Some(b)) if b.status == BookingStatus::Cancelled => AppError::AlreadyCancelled,
            Ok(Some(_)) => AppError::NotEligible("booking changed in the meantime".to_string()),
            Ok(None) => AppError::NotFound(format!("booking {id}")),
            Err(e) => e.into(),
        }
    }

    async fn emit(&self, event: BookingEvent) {
        self.notifications.dispatch(event).await;
    }
}

fn ensure_cancellable(booking: &Booking) -> AppResult<()> {
    match booking.status {
        BookingStatus::Cancelled => Err(AppError::AlreadyCancelled),
        BookingStatus::Completed => Err(AppError::NotEligible("walk already completed".to_string())),
        BookingStatus::Scheduled if booking.awaiting_review() => Err(AppError::AwaitingReview),
        BookingStatus::Scheduled => Ok(()),
    }
}

fn required(value: String, message: &str) -> AppResult<String> {
    let value = value.trim().to_string();
    if value.is_empty() {
        return Err(AppError::Validation(message.to_string()));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::NaiveDateTime;

    use super::*;
    use crate::clock::FixedClock;
    use crate::models::{
        BlockedDate, BookingTimeRule, Dog, Holiday, HolidayEntry, NewBlockedDate, NewHoliday, Role,
        RuleInput, Tier,
    };
    use crate::services::holidays::HolidayCalendar;
    use crate::services::notify::Notifier;
    use crate::store::memory::MemoryStore;
    use crate::store::{Backend, StoreResult};

    const WALKER: i64 = 1;
    const ADMIN: i64 = 2;
    const OTHER_WALKER: i64 = 3;
    const NOVICE: i64 = 4;
    const REX: i64 = 10;
    const WOLF: i64 = 11;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<(EventKind, i64)>>);

    impl Recorder {
        fn kinds(&self) -> Vec<EventKind> {
            self.0.lock().unwrap().iter().map(|(k, _)| *k).collect()
        }
    }

    #[async_trait]
    impl Notifier for Recorder {
        async fn notify(&self, event: &BookingEvent) -> anyhow::Result<()> {
            self.0.lock().unwrap().push((event.kind, event.booking.id));
            Ok(())
        }
    }

    struct NoCalendar;

    #[async_trait]
    impl HolidayCalendar for NoCalendar {
        async fn fetch(&self, _year: i32, _region: &str) -> anyhow::Result<Vec<HolidayEntry>> {
            Ok(Vec::new())
        }
    }

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn t(s: &str) -> NaiveTime {
        NaiveTime::parse_from_str(s, "%H:%M").unwrap()
    }

    fn at(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M").unwrap()
    }

    fn user(id: i64, role: Role, tier: Tier) -> User {
        User {
            id,
            name: format!("user {id}"),
            role,
            tier,
            is_active: true,
            is_verified: true,
            last_activity_at: at("2025-06-01 10:00"),
            deactivated_at: None,
            deactivation_reason: None,
            deleted_at: None,
        }
    }

    fn dog(id: i64, name: &str, tier: Tier) -> Dog {
        Dog {
            id,
            name: name.to_string(),
            tier,
            is_available: true,
            deleted_at: None,
        }
    }

    struct Fixture {
        engine: BookingEngine,
        store: Arc<MemoryStore>,
        clock: Arc<FixedClock>,
        events: Arc<Recorder>,
        config: Arc<ConfigCache>,
    }

    async fn seeded_store(now: NaiveDateTime) -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::seeded_at(now));
        for u in [
            user(WALKER, Role::Walker, Tier::Blue),
            user(ADMIN, Role::Admin, Tier::Orange),
            user(OTHER_WALKER, Role::Walker, Tier::Blue),
            user(NOVICE, Role::Walker, Tier::Green),
        ] {
            store.upsert_user(&u).await.unwrap();
        }
        store.upsert_dog(&dog(REX, "Rex", Tier::Green)).await.unwrap();
        store.upsert_dog(&dog(WOLF, "Wolf", Tier::Orange)).await.unwrap();
        store
    }

    fn engine_over(
        store: Arc<dyn Store>,
        clock: Arc<FixedClock>,
        notifier: Arc<dyn Notifier>,
        notify_timeout: std::time::Duration,
    ) -> (BookingEngine, Arc<ConfigCache>) {
        let config = Arc::new(ConfigCache::new(store.clone()));
        let holidays = Arc::new(HolidayResolver::new(
            store.clone(),
            Arc::new(NoCalendar),
            clock.clone(),
            std::time::Duration::from_millis(100),
        ));
        let gateway = Arc::new(NotificationGateway::new(notifier, notify_timeout));
        let engine = BookingEngine::new(store, clock, config.clone(), holidays, gateway);
        (engine, config)
    }

    /// Monday 2025-06-16, 08:00. Default rules and settings: 09:00-12:00 is
    /// gated, the evening walk is not.
    async fn fixture() -> Fixture {
        let now = at("2025-06-16 08:00");
        let store = seeded_store(now).await;
        let clock = Arc::new(FixedClock::new(now));
        let events = Arc::new(Recorder::default());
        let (engine, config) = engine_over(
            store.clone(),
            clock.clone(),
            events.clone(),
            std::time::Duration::from_secs(1),
        );
        Fixture {
            engine,
            store,
            clock,
            events,
            config,
        }
    }

    fn evening(date: &str) -> CreateBookingRequest {
        CreateBookingRequest {
            dog_id: REX,
            date: d(date),
            walk_type: WalkType::Evening,
            scheduled_time: t("18:30"),
        }
    }

    fn morning(date: &str) -> CreateBookingRequest {
        CreateBookingRequest {
            dog_id: REX,
            date: d(date),
            walk_type: WalkType::Morning,
            scheduled_time: t("09:30"),
        }
    }

    #[tokio::test]
    async fn test_create_ungated_booking() {
        let f = fixture().await;
        let booking = f.engine.create(WALKER, evening("2025-06-17")).await.unwrap();
        assert_eq!(booking.status, BookingStatus::Scheduled);
        assert_eq!(booking.approval_status, ApprovalStatus::Approved);
        assert!(!booking.requires_approval);
        assert_eq!(f.events.kinds(), vec![EventKind::Created]);
    }

    #[tokio::test]
    async fn test_second_booking_for_slot_conflicts() {
        let f = fixture().await;
        f.engine.create(WALKER, evening("2025-06-17")).await.unwrap();
        let err = f.engine.create(OTHER_WALKER, evening("2025-06-17")).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict));
        assert_eq!(err.to_string(), "slot already booked");
    }

    #[tokio::test]
    async fn test_gated_booking_awaits_review() {
        let f = fixture().await;
        let booking = f.engine.create(WALKER, morning("2025-06-18")).await.unwrap();
        assert_eq!(booking.status, BookingStatus::Scheduled);
        assert_eq!(booking.approval_status, ApprovalStatus::Pending);

        let err = f.engine.cancel_by_user(WALKER, booking.id, None).await.unwrap_err();
        assert!(matches!(err, AppError::AwaitingReview));

        let approved = f.engine.approve(ADMIN, booking.id).await.unwrap();
        assert_eq!(approved.approval_status, ApprovalStatus::Approved);
        assert_eq!(approved.approved_by, Some(ADMIN));
        assert_eq!(approved.status, BookingStatus::Scheduled);

        f.engine.cancel_by_user(WALKER, booking.id, None).await.unwrap();
    }

    #[tokio::test]
    async fn test_cancel_twice_reports_already_cancelled() {
        let f = fixture().await;
        let booking = f.engine.create(WALKER, evening("2025-06-17")).await.unwrap();
        let cancelled = f
            .engine
            .cancel_by_user(WALKER, booking.id, Some("sick".to_string()))
            .await
            .unwrap();
        assert_eq!(cancelled.status, BookingStatus::Cancelled);
        assert_eq!(cancelled.cancellation_reason.as_deref(), Some("sick"));

        let err = f.engine.cancel_by_user(WALKER, booking.id, None).await.unwrap_err();
        assert!(matches!(err, AppError::AlreadyCancelled));
        assert_eq!(
            f.events.kinds(),
            vec![EventKind::Created, EventKind::CancelledByUser]
        );
    }

    #[tokio::test]
    async fn test_cancel_rebook_cycle() {
        let f = fixture().await;
        let first = f.engine.create(WALKER, evening("2025-06-17")).await.unwrap();
        assert!(f.engine.create(OTHER_WALKER, evening("2025-06-17")).await.is_err());
        f.engine.cancel_by_user(WALKER, first.id, None).await.unwrap();
        let second = f.engine.create(OTHER_WALKER, evening("2025-06-17")).await.unwrap();
        assert_eq!(second.user_id, OTHER_WALKER);
    }

    #[tokio::test]
    async fn test_walker_cancel_rules() {
        let f = fixture().await;
        let booking = f.engine.create(WALKER, evening("2025-06-16")).await.unwrap();

        let err = f.engine.cancel_by_user(OTHER_WALKER, booking.id, None).await.unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));

        // 18:30 is only ten and a half hours away
        let err = f.engine.cancel_by_user(WALKER, booking.id, None).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        let err = f
            .engine
            .cancel_by_admin(ADMIN, booking.id, " ".to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        let cancelled = f
            .engine
            .cancel_by_admin(ADMIN, booking.id, "storm warning".to_string())
            .await
            .unwrap();
        assert_eq!(cancelled.status, BookingStatus::Cancelled);
        assert!(f.events.kinds().contains(&EventKind::CancelledByAdmin));
    }

    #[tokio::test]
    async fn test_create_checks_actor_and_dog() {
        let f = fixture().await;
        let mut req = evening("2025-06-17");
        req.dog_id = WOLF;
        let err = f.engine.create(NOVICE, req).await.unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));

        let err = f.engine.create(99, evening("2025-06-17")).await.unwrap_err();
        assert!(matches!(err, AppError::Unauthorized));

        let mut inactive = user(5, Role::Walker, Tier::Orange);
        inactive.is_verified = false;
        f.store.upsert_user(&inactive).await.unwrap();
        let err = f.engine.create(5, evening("2025-06-17")).await.unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));

        let mut resting = dog(REX, "Rex", Tier::Green);
        resting.is_available = false;
        f.store.upsert_dog(&resting).await.unwrap();
        let err = f.engine.create(WALKER, evening("2025-06-17")).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn test_create_checks_dates() {
        let f = fixture().await;
        assert!(matches!(
            f.engine.create(WALKER, evening("2025-06-15")).await,
            Err(AppError::Validation(_))
        ));

        assert!(matches!(
            f.engine.create(WALKER, evening("2025-07-10")).await,
            Err(AppError::Validation(_))
        ));

        let mut lunch = evening("2025-06-17");
        lunch.scheduled_time = t("13:15");
        let err = f.engine.create(WALKER, lunch).await.unwrap_err();
        assert_eq!(err.to_string(), "blocked window: Lunch break (13:00-14:00)");
    }

    #[tokio::test]
    async fn test_global_block_rejects_booking() {
        let f = fixture().await;
        f.store
            .create_blocked_date(
                &NewBlockedDate {
                    date: d("2025-06-17"),
                    dog_id: None,
                    reason: "Open day".to_string(),
                    created_by: ADMIN,
                },
                at("2025-06-16 07:00"),
            )
            .await
            .unwrap();
        f.config.invalidate();

        let err = f.engine.create(WALKER, evening("2025-06-17")).await.unwrap_err();
        assert_eq!(err.to_string(), "date blocked: Open day");
    }

    #[tokio::test]
    async fn test_move_onto_own_slot() {
        let f = fixture().await;
        let booking = f.engine.create(WALKER, evening("2025-06-17")).await.unwrap();

        let moved = f
            .engine
            .move_booking(
                ADMIN,
                booking.id,
                MoveBookingRequest {
                    date: d("2025-06-17"),
                    walk_type: WalkType::Evening,
                    scheduled_time: t("19:00"),
                },
            )
            .await
            .unwrap();
        assert_eq!(moved.id, booking.id);
        assert_eq!(moved.scheduled_time, t("19:00"));
        assert_eq!(f.events.kinds().last(), Some(&EventKind::Moved));
    }

    #[tokio::test]
    async fn test_move_onto_taken_slot_conflicts() {
        let f = fixture().await;
        let first = f.engine.create(WALKER, evening("2025-06-17")).await.unwrap();
        f.engine.create(WALKER, evening("2025-06-18")).await.unwrap();

        let err = f
            .engine
            .move_booking(
                ADMIN,
                first.id,
                MoveBookingRequest {
                    date: d("2025-06-18"),
                    walk_type: WalkType::Evening,
                    scheduled_time: t("18:00"),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict));

        let err = f
            .engine
            .move_booking(
                WALKER,
                first.id,
                MoveBookingRequest {
                    date: d("2025-06-19"),
                    walk_type: WalkType::Evening,
                    scheduled_time: t("18:00"),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
    }

    #[tokio::test]
    async fn test_reject_releases_slot() {
        let f = fixture().await;
        let booking = f.engine.create(WALKER, morning("2025-06-18")).await.unwrap();

        let err = f
            .engine
            .reject(ADMIN, booking.id, "".to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        let rejected = f
            .engine
            .reject(ADMIN, booking.id, "Rex is in quarantine".to_string())
            .await
            .unwrap();
        assert_eq!(rejected.status, BookingStatus::Cancelled);
        assert_eq!(rejected.approval_status, ApprovalStatus::Rejected);
        assert_eq!(rejected.rejection_reason.as_deref(), Some("Rex is in quarantine"));

        let err = f.engine.approve(ADMIN, booking.id).await.unwrap_err();
        assert!(matches!(err, AppError::NotEligible(_)));

        f.engine.create(OTHER_WALKER, morning("2025-06-18")).await.unwrap();
    }

    #[tokio::test]
    async fn test_auto_complete_is_inclusive() {
        let f = fixture().await;
        let booking = f.engine.create(WALKER, evening("2025-06-16")).await.unwrap();
        let mut later = evening("2025-06-16");
        later.dog_id = WOLF;
        later.scheduled_time = t("18:31");
        let later = f.engine.create(ADMIN, later).await.unwrap();

        f.clock.set(at("2025-06-16 18:30") + Duration::seconds(20));
        assert_eq!(f.engine.complete_due().await.unwrap(), 1);

        let done = f.engine.get(WALKER, booking.id).await.unwrap();
        assert_eq!(done.status, BookingStatus::Completed);
        let pending = f.engine.get(ADMIN, later.id).await.unwrap();
        assert_eq!(pending.status, BookingStatus::Scheduled);
    }

    #[tokio::test]
    async fn test_notes_only_on_completed_walks() {
        let f = fixture().await;
        let booking = f.engine.create(WALKER, evening("2025-06-16")).await.unwrap();
        let err = f
            .engine
            .add_notes(WALKER, booking.id, "Good boy".to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotEligible(_)));

        f.clock.set(at("2025-06-16 19:00"));
        f.engine.complete_due().await.unwrap();

        let err = f
            .engine
            .add_notes(OTHER_WALKER, booking.id, "Good boy".to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));

        let noted = f
            .engine
            .add_notes(WALKER, booking.id, "  Good boy  ".to_string())
            .await
            .unwrap();
        assert_eq!(noted.user_notes.as_deref(), Some("Good boy"));
    }

    #[tokio::test]
    async fn test_reminders_cross_midnight_once() {
        let f = fixture().await;
        let new = |dog_id: i64, date: &str, time: &str| NewBooking {
            user_id: WALKER,
            dog_id,
            date: d(date),
            walk_type: WalkType::Morning,
            scheduled_time: t(time),
            requires_approval: false,
            created_at: at("2025-06-16 08:00"),
        };
        let due = f.store.create_booking(&new(REX, "2025-06-17", "00:30")).await.unwrap();
        f.store.create_booking(&new(WOLF, "2025-06-17", "01:00")).await.unwrap();

        f.clock.set(at("2025-06-16 23:00"));
        assert_eq!(f.engine.send_reminders().await.unwrap(), 1);
        assert_eq!(f.engine.send_reminders().await.unwrap(), 0);

        let reminded = f.engine.get(WALKER, due.id).await.unwrap();
        assert_eq!(reminded.reminder_sent_at, Some(at("2025-06-16 23:00")));
        assert_eq!(
            f.events.0.lock().unwrap().as_slice(),
            &[(EventKind::ReminderDue, due.id)]
        );
    }

    #[tokio::test]
    async fn test_idle_walkers_are_deactivated() {
        let f = fixture().await;
        let mut idle = user(6, Role::Walker, Tier::Green);
        idle.last_activity_at = at("2024-01-01 10:00");
        f.store.upsert_user(&idle).await.unwrap();
        let mut idle_admin = user(7, Role::Admin, Tier::Green);
        idle_admin.last_activity_at = at("2024-01-01 10:00");
        f.store.upsert_user(&idle_admin).await.unwrap();

        assert_eq!(f.engine.deactivate_idle_users().await.unwrap(), 1);
        assert_eq!(f.engine.deactivate_idle_users().await.unwrap(), 0);

        let stored = f.store.get_user(6).await.unwrap().unwrap();
        assert!(!stored.is_active);
        assert!(stored.deactivation_reason.is_some());
        assert!(f.store.get_user(7).await.unwrap().unwrap().is_active);
    }

    #[tokio::test]
    async fn test_availability_lists_open_slots() {
        let f = fixture().await;
        let day = f
            .engine
            .availability(WALKER, d("2025-06-17"), Some(REX))
            .await
            .unwrap();
        assert_eq!(day.day_type, DayType::Weekday);
        assert_eq!(day.slots.first().map(String::as_str), Some("09:00"));
        assert!(!day.slots.iter().any(|s| s == "13:00"));
        assert!(day.slots.iter().any(|s| s == "19:15"));

        let far = f
            .engine
            .availability(WALKER, d("2025-08-01"), None)
            .await
            .unwrap();
        assert!(far.slots.is_empty());
    }

    #[tokio::test]
    async fn test_admin_listing_requires_admin() {
        let f = fixture().await;
        f.engine.create(WALKER, evening("2025-06-17")).await.unwrap();
        f.engine.create(OTHER_WALKER, evening("2025-06-18")).await.unwrap();

        assert!(matches!(
            f.engine.list_all(WALKER, BookingFilter::default()).await,
            Err(AppError::Forbidden(_))
        ));
        assert_eq!(f.engine.list_all(ADMIN, BookingFilter::default()).await.unwrap().len(), 2);
        assert_eq!(f.engine.list_own(WALKER, BookingFilter::default()).await.unwrap().len(), 1);
    }

    // ── Failure isolation ──

    struct FailingNotifier;

    #[async_trait]
    impl Notifier for FailingNotifier {
        async fn notify(&self, _event: &BookingEvent) -> anyhow::Result<()> {
            anyhow::bail!("webhook returned 503")
        }
    }

    struct HangingNotifier;

    #[async_trait]
    impl Notifier for HangingNotifier {
        async fn notify(&self, _event: &BookingEvent) -> anyhow::Result<()> {
            tokio::time::sleep(std::time::Duration::from_secs(30)).await;
            Ok(())
        }
    }

    #[derive(Clone, Copy)]
    enum Race {
        Cancel,
        Complete,
    }

    /// Delegates to a memory store. Writes to the listed ids fail, and a
    /// configured race applies a competing transition right before each
    /// conditional booking write.
    struct Interfering {
        inner: Arc<MemoryStore>,
        failing_users: Vec<i64>,
        failing_reminders: Vec<i64>,
        race: Option<Race>,
    }

    impl Interfering {
        fn over(inner: Arc<MemoryStore>) -> Self {
            Self {
                inner,
                failing_users: Vec::new(),
                failing_reminders: Vec::new(),
                race: None,
            }
        }

        async fn compete(&self, id: i64) -> StoreResult<()> {
            let to = match self.race {
                Some(Race::Cancel) => BookingStatus::Cancelled,
                Some(Race::Complete) => BookingStatus::Completed,
                None => return Ok(()),
            };
            let change = StatusChange {
                from: BookingStatus::Scheduled,
                to,
                reason: Some("cancelled at the front desk"),
                at: at("2025-06-16 08:00"),
            };
            self.inner.update_status(id, &change).await?;
            Ok(())
        }
    }

    fn connection_reset() -> StoreError {
        StoreError::Transient("connection reset".to_string())
    }

    #[async_trait]
    impl Store for Interfering {
        fn backend(&self) -> Backend {
            self.inner.backend()
        }

        async fn create_booking(&self, booking: &NewBooking) -> StoreResult<Booking> {
            self.inner.create_booking(booking).await
        }

        async fn get_booking(&self, id: i64) -> StoreResult<Option<Booking>> {
            self.inner.get_booking(id).await
        }

        async fn list_bookings(&self, filter: &BookingFilter) -> StoreResult<Vec<Booking>> {
            self.inner.list_bookings(filter).await
        }

        async fn find_conflicting(&self, slot: &Slot, exclude_id: Option<i64>) -> StoreResult<bool> {
            self.inner.find_conflicting(slot, exclude_id).await
        }

        async fn update_status(&self, id: i64, change: &StatusChange<'_>) -> StoreResult<bool> {
            self.compete(id).await?;
            self.inner.update_status(id, change).await
        }

        async fn decide_approval(
            &self,
            id: i64,
            decision: &ApprovalDecision,
            at: NaiveDateTime,
        ) -> StoreResult<bool> {
            self.compete(id).await?;
            self.inner.decide_approval(id, decision, at).await
        }

        async fn reschedule(
            &self,
            id: i64,
            slot: &Slot,
            time: NaiveTime,
            at: NaiveDateTime,
        ) -> StoreResult<bool> {
            self.compete(id).await?;
            self.inner.reschedule(id, slot, time, at).await
        }

        async fn set_notes(&self, id: i64, notes: &str, at: NaiveDateTime) -> StoreResult<bool> {
            self.inner.set_notes(id, notes, at).await
        }

        async fn complete_due(&self, now: NaiveDateTime) -> StoreResult<u64> {
            self.inner.complete_due(now).await
        }

        async fn reminder_candidates(&self, from: NaiveDate, to: NaiveDate) -> StoreResult<Vec<Booking>> {
            self.inner.reminder_candidates(from, to).await
        }

        async fn mark_reminder_sent(&self, id: i64, at: NaiveDateTime) -> StoreResult<bool> {
            if self.failing_reminders.contains(&id) {
                return Err(connection_reset());
            }
            self.inner.mark_reminder_sent(id, at).await
        }

        async fn list_rules(&self) -> StoreResult<Vec<BookingTimeRule>> {
            self.inner.list_rules().await
        }

        async fn create_rule(&self, rule: &RuleInput, at: NaiveDateTime) -> StoreResult<BookingTimeRule> {
            self.inner.create_rule(rule, at).await
        }

        async fn update_rule(&self, id: i64, rule: &RuleInput, at: NaiveDateTime) -> StoreResult<bool> {
            self.inner.update_rule(id, rule, at).await
        }

        async fn delete_rule(&self, id: i64) -> StoreResult<bool> {
            self.inner.delete_rule(id).await
        }

        async fn list_blocked_dates(&self) -> StoreResult<Vec<BlockedDate>> {
            self.inner.list_blocked_dates().await
        }

        async fn create_blocked_date(
            &self,
            block: &NewBlockedDate,
            at: NaiveDateTime,
        ) -> StoreResult<BlockedDate> {
            self.inner.create_blocked_date(block, at).await
        }

        async fn delete_blocked_date(&self, id: i64) -> StoreResult<bool> {
            self.inner.delete_blocked_date(id).await
        }

        async fn list_holidays(&self, year: i32, region: &str) -> StoreResult<Vec<Holiday>> {
            self.inner.list_holidays(year, region).await
        }

        async fn replace_fetched_holidays(
            &self,
            year: i32,
            region: &str,
            entries: &[HolidayEntry],
            at: NaiveDateTime,
        ) -> StoreResult<()> {
            self.inner.replace_fetched_holidays(year, region, entries, at).await
        }

        async fn holidays_fetched_at(&self, year: i32, region: &str) -> StoreResult<Option<NaiveDateTime>> {
            self.inner.holidays_fetched_at(year, region).await
        }

        async fn create_manual_holiday(
            &self,
            holiday: &NewHoliday,
            created_by: i64,
            at: NaiveDateTime,
        ) -> StoreResult<Holiday> {
            self.inner.create_manual_holiday(holiday, created_by, at).await
        }

        async fn delete_holiday(&self, id: i64) -> StoreResult<bool> {
            self.inner.delete_holiday(id).await
        }

        async fn load_settings(&self) -> StoreResult<BTreeMap<String, String>> {
            self.inner.load_settings().await
        }

        async fn put_setting(&self, key: &str, value: &str, at: NaiveDateTime) -> StoreResult<()> {
            self.inner.put_setting(key, value, at).await
        }

        async fn get_user(&self, id: i64) -> StoreResult<Option<User>> {
            self.inner.get_user(id).await
        }

        async fn upsert_user(&self, user: &User) -> StoreResult<()> {
            self.inner.upsert_user(user).await
        }

        async fn idle_users(&self, cutoff: NaiveDateTime) -> StoreResult<Vec<User>> {
            self.inner.idle_users(cutoff).await
        }

        async fn deactivate_user(
            &self,
            id: i64,
            cutoff: NaiveDateTime,
            reason: &str,
            at: NaiveDateTime,
        ) -> StoreResult<bool> {
            if self.failing_users.contains(&id) {
                return Err(connection_reset());
            }
            self.inner.deactivate_user(id, cutoff, reason, at).await
        }

        async fn soft_delete_user(&self, id: i64, at: NaiveDateTime) -> StoreResult<bool> {
            self.inner.soft_delete_user(id, at).await
        }

        async fn get_dog(&self, id: i64) -> StoreResult<Option<Dog>> {
            self.inner.get_dog(id).await
        }

        async fn upsert_dog(&self, dog: &Dog) -> StoreResult<()> {
            self.inner.upsert_dog(dog).await
        }

        async fn soft_delete_dog(&self, id: i64, at: NaiveDateTime) -> StoreResult<bool> {
            self.inner.soft_delete_dog(id, at).await
        }
    }

    async fn writes_survive_broken_notifier(notifier: Arc<dyn Notifier>) {
        let now = at("2025-06-16 08:00");
        let store = seeded_store(now).await;
        let (engine, _) = engine_over(
            store.clone(),
            Arc::new(FixedClock::new(now)),
            notifier,
            std::time::Duration::from_millis(50),
        );

        let walk = engine.create(WALKER, evening("2025-06-17")).await.unwrap();
        let stored = store.get_booking(walk.id).await.unwrap().unwrap();
        assert_eq!(stored.status, BookingStatus::Scheduled);

        let gated = engine.create(WALKER, morning("2025-06-18")).await.unwrap();
        engine.approve(ADMIN, gated.id).await.unwrap();
        let stored = store.get_booking(gated.id).await.unwrap().unwrap();
        assert_eq!(stored.approval_status, ApprovalStatus::Approved);
        assert_eq!(stored.approved_by, Some(ADMIN));

        engine
            .cancel_by_admin(ADMIN, walk.id, "vet visit".to_string())
            .await
            .unwrap();
        let stored = store.get_booking(walk.id).await.unwrap().unwrap();
        assert_eq!(stored.status, BookingStatus::Cancelled);
        assert_eq!(stored.cancellation_reason.as_deref(), Some("vet visit"));
    }

    #[tokio::test]
    async fn test_failing_notifier_keeps_writes() {
        writes_survive_broken_notifier(Arc::new(FailingNotifier)).await;
    }

    #[tokio::test]
    async fn test_hanging_notifier_keeps_writes() {
        writes_survive_broken_notifier(Arc::new(HangingNotifier)).await;
    }

    fn interfering_engine(
        store: Interfering,
        clock: Arc<FixedClock>,
    ) -> (BookingEngine, Arc<Recorder>) {
        let events = Arc::new(Recorder::default());
        let (engine, _) = engine_over(
            Arc::new(store),
            clock,
            events.clone(),
            std::time::Duration::from_secs(1),
        );
        (engine, events)
    }

    #[tokio::test]
    async fn test_idle_sweep_continues_past_failed_user() {
        let now = at("2025-06-16 08:00");
        let inner = seeded_store(now).await;
        for id in [6, 8] {
            let mut idle = user(id, Role::Walker, Tier::Green);
            idle.last_activity_at = at("2024-01-01 10:00");
            inner.upsert_user(&idle).await.unwrap();
        }
        let mut store = Interfering::over(inner.clone());
        store.failing_users = vec![6];
        let (engine, _) = interfering_engine(store, Arc::new(FixedClock::new(now)));

        assert_eq!(engine.deactivate_idle_users().await.unwrap(), 1);
        assert!(inner.get_user(6).await.unwrap().unwrap().is_active);
        assert!(!inner.get_user(8).await.unwrap().unwrap().is_active);
    }

    #[tokio::test]
    async fn test_reminders_continue_past_failed_booking() {
        let now = at("2025-06-16 08:00");
        let inner = seeded_store(now).await;
        let new = |dog_id: i64, time: &str| NewBooking {
            user_id: WALKER,
            dog_id,
            date: d("2025-06-17"),
            walk_type: WalkType::Morning,
            scheduled_time: t(time),
            requires_approval: false,
            created_at: now,
        };
        let broken = inner.create_booking(&new(REX, "00:30")).await.unwrap();
        let fine = inner.create_booking(&new(WOLF, "00:45")).await.unwrap();

        let mut store = Interfering::over(inner.clone());
        store.failing_reminders = vec![broken.id];
        let (engine, events) =
            interfering_engine(store, Arc::new(FixedClock::new(at("2025-06-16 23:00"))));

        assert_eq!(engine.send_reminders().await.unwrap(), 1);
        assert_eq!(
            events.0.lock().unwrap().as_slice(),
            &[(EventKind::ReminderDue, fine.id)]
        );
        assert_eq!(inner.get_booking(broken.id).await.unwrap().unwrap().reminder_sent_at, None);
        assert!(inner.get_booking(fine.id).await.unwrap().unwrap().reminder_sent_at.is_some());
    }

    #[tokio::test]
    async fn test_admin_cancel_loses_race_to_cancel() {
        let now = at("2025-06-16 08:00");
        let inner = seeded_store(now).await;
        let mut store = Interfering::over(inner.clone());
        store.race = Some(Race::Cancel);
        let (engine, events) = interfering_engine(store, Arc::new(FixedClock::new(now)));

        let booking = engine.create(WALKER, evening("2025-06-17")).await.unwrap();
        let err = engine
            .cancel_by_admin(ADMIN, booking.id, "storm warning".to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::AlreadyCancelled));

        let stored = inner.get_booking(booking.id).await.unwrap().unwrap();
        assert_eq!(stored.status, BookingStatus::Cancelled);
        assert_eq!(stored.cancellation_reason.as_deref(), Some("cancelled at the front desk"));
        assert_eq!(events.kinds(), vec![EventKind::Created]);
    }

    #[tokio::test]
    async fn test_approve_loses_race_to_cancel() {
        let now = at("2025-06-16 08:00");
        let inner = seeded_store(now).await;
        let mut store = Interfering::over(inner.clone());
        store.race = Some(Race::Cancel);
        let (engine, events) = interfering_engine(store, Arc::new(FixedClock::new(now)));

        let booking = engine.create(WALKER, morning("2025-06-18")).await.unwrap();
        let err = engine.approve(ADMIN, booking.id).await.unwrap_err();
        assert!(matches!(err, AppError::AlreadyCancelled));

        let stored = inner.get_booking(booking.id).await.unwrap().unwrap();
        assert_eq!(stored.status, BookingStatus::Cancelled);
        assert_eq!(stored.approval_status, ApprovalStatus::Pending);
        assert_eq!(stored.approved_by, None);
        assert_eq!(events.kinds(), vec![EventKind::Created]);
    }

    #[tokio::test]
    async fn test_move_loses_race_to_completion() {
        let now = at("2025-06-16 08:00");
        let inner = seeded_store(now).await;
        let mut store = Interfering::over(inner.clone());
        store.race = Some(Race::Complete);
        let (engine, events) = interfering_engine(store, Arc::new(FixedClock::new(now)));

        let booking = engine.create(WALKER, evening("2025-06-17")).await.unwrap();
        let err = engine
            .move_booking(
                ADMIN,
                booking.id,
                MoveBookingRequest {
                    date: d("2025-06-17"),
                    walk_type: WalkType::Evening,
                    scheduled_time: t("19:00"),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotEligible(_)));

        let stored = inner.get_booking(booking.id).await.unwrap().unwrap();
        assert_eq!(stored.status, BookingStatus::Completed);
        assert_eq!(stored.scheduled_time, t("18:30"));
        assert_eq!(events.kinds(), vec![EventKind::Created]);
    }
}
