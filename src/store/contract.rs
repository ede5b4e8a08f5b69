//! Behavior every backend must share. Each backend's test module runs these
//! against a fresh store.

use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

use super::{StatusChange, Store, StoreError, DEFAULT_RULES};
use crate::models::{
    ApprovalDecision, ApprovalStatus, BookingFilter, BookingStatus, DayType, Dog, HolidayEntry,
    HolidaySource, NewBlockedDate, NewBooking, NewHoliday, Role, RuleInput, Slot, Tier, User,
    WalkType,
};

pub fn d(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

pub fn t(s: &str) -> NaiveTime {
    NaiveTime::parse_from_str(s, "%H:%M").unwrap()
}

pub fn at(s: &str) -> NaiveDateTime {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M").unwrap()
}

pub fn walker(id: i64) -> User {
    User {
        id,
        name: format!("walker {id}"),
        role: Role::Walker,
        tier: Tier::Orange,
        is_active: true,
        is_verified: true,
        last_activity_at: at("2025-06-01 08:00"),
        deactivated_at: None,
        deactivation_reason: None,
        deleted_at: None,
    }
}

pub fn dog(id: i64) -> Dog {
    Dog {
        id,
        name: format!("dog {id}"),
        tier: Tier::Green,
        is_available: true,
        deleted_at: None,
    }
}

fn new_booking(user_id: i64, dog_id: i64, date: &str, walk_type: WalkType, time: &str) -> NewBooking {
    NewBooking {
        user_id,
        dog_id,
        date: d(date),
        walk_type,
        scheduled_time: t(time),
        requires_approval: false,
        created_at: at("2025-06-10 08:00"),
    }
}

fn cancel(reason: &str) -> StatusChange<'_> {
    StatusChange {
        from: BookingStatus::Scheduled,
        to: BookingStatus::Cancelled,
        reason: Some(reason),
        at: at("2025-06-11 08:00"),
    }
}

async fn seed(store: &dyn Store, users: &[i64], dogs: &[i64]) {
    for id in users {
        store.upsert_user(&walker(*id)).await.unwrap();
    }
    for id in dogs {
        store.upsert_dog(&dog(*id)).await.unwrap();
    }
}

pub async fn run_all(store: &dyn Store) {
    slot_uniqueness(store).await;
    approval_decisions(store).await;
    reschedule(store).await;
    auto_complete_and_notes(store).await;
    reminders(store).await;
    listing(store).await;
    rules(store).await;
    blocked_dates(store).await;
    holidays(store).await;
    settings(store).await;
    users(store).await;
}

async fn slot_uniqueness(store: &dyn Store) {
    seed(store, &[1, 2], &[100]).await;

    let first = store
        .create_booking(&new_booking(1, 100, "2025-06-16", WalkType::Morning, "09:30"))
        .await
        .unwrap();
    assert_eq!(first.status, BookingStatus::Scheduled);
    assert_eq!(first.approval_status, ApprovalStatus::Approved);

    let clash = store
        .create_booking(&new_booking(2, 100, "2025-06-16", WalkType::Morning, "10:00"))
        .await;
    assert!(matches!(clash, Err(StoreError::Conflict)));

    // the other walk type on the same day is a different slot
    store
        .create_booking(&new_booking(2, 100, "2025-06-16", WalkType::Evening, "18:00"))
        .await
        .unwrap();

    let slot = first.slot();
    assert!(store.find_conflicting(&slot, None).await.unwrap());
    assert!(!store.find_conflicting(&slot, Some(first.id)).await.unwrap());

    assert!(store.update_status(first.id, &cancel("sick")).await.unwrap());
    assert!(!store.update_status(first.id, &cancel("again")).await.unwrap());
    let cancelled = store.get_booking(first.id).await.unwrap().unwrap();
    assert_eq!(cancelled.status, BookingStatus::Cancelled);
    assert_eq!(cancelled.cancellation_reason.as_deref(), Some("sick"));

    assert!(!store.find_conflicting(&slot, None).await.unwrap());
    let rebooked = store
        .create_booking(&new_booking(2, 100, "2025-06-16", WalkType::Morning, "09:45"))
        .await
        .unwrap();
    assert_eq!(rebooked.user_id, 2);

    // unknown dog is a backend failure, never a conflict
    let orphan = store
        .create_booking(&new_booking(1, 9999, "2025-06-16", WalkType::Morning, "09:45"))
        .await;
    assert!(matches!(orphan, Err(StoreError::Backend(_))));
}

async fn approval_decisions(store: &dyn Store) {
    seed(store, &[3], &[101]).await;

    let mut gated = new_booking(3, 101, "2025-06-17", WalkType::Morning, "10:00");
    gated.requires_approval = true;
    let pending = store.create_booking(&gated).await.unwrap();
    assert_eq!(pending.approval_status, ApprovalStatus::Pending);
    assert!(pending.awaiting_review());

    let approve = ApprovalDecision::Approve { admin_id: 9 };
    assert!(store.decide_approval(pending.id, &approve, at("2025-06-12 09:00")).await.unwrap());
    assert!(!store.decide_approval(pending.id, &approve, at("2025-06-12 09:01")).await.unwrap());
    let approved = store.get_booking(pending.id).await.unwrap().unwrap();
    assert_eq!(approved.approval_status, ApprovalStatus::Approved);
    assert_eq!(approved.status, BookingStatus::Scheduled);
    assert_eq!(approved.approved_by, Some(9));

    let mut gated = new_booking(3, 101, "2025-06-17", WalkType::Evening, "10:00");
    gated.requires_approval = true;
    let pending = store.create_booking(&gated).await.unwrap();
    let reject = ApprovalDecision::Reject {
        admin_id: 9,
        reason: "too busy".to_string(),
    };
    assert!(store.decide_approval(pending.id, &reject, at("2025-06-12 09:00")).await.unwrap());
    let rejected = store.get_booking(pending.id).await.unwrap().unwrap();
    assert_eq!(rejected.status, BookingStatus::Cancelled);
    assert_eq!(rejected.approval_status, ApprovalStatus::Rejected);
    assert_eq!(rejected.rejection_reason.as_deref(), Some("too busy"));

    // rejection releases the slot immediately
    assert!(!store.find_conflicting(&rejected.slot(), None).await.unwrap());
}

async fn reschedule(store: &dyn Store) {
    seed(store, &[4], &[102, 103]).await;

    let booking = store
        .create_booking(&new_booking(4, 102, "2025-06-18", WalkType::Morning, "09:00"))
        .await
        .unwrap();
    let other = store
        .create_booking(&new_booking(4, 103, "2025-06-18", WalkType::Morning, "09:00"))
        .await
        .unwrap();

    // onto its own slot
    let moved_at = at("2025-06-12 10:00");
    assert!(store
        .reschedule(booking.id, &booking.slot(), t("10:30"), moved_at)
        .await
        .unwrap());
    assert_eq!(
        store.get_booking(booking.id).await.unwrap().unwrap().scheduled_time,
        t("10:30")
    );

    let taken = store
        .reschedule(booking.id, &other.slot(), t("09:00"), moved_at)
        .await;
    assert!(matches!(taken, Err(StoreError::Conflict)));

    let free = Slot {
        dog_id: 103,
        date: d("2025-06-19"),
        walk_type: WalkType::Evening,
    };
    assert!(store.reschedule(booking.id, &free, t("18:00"), moved_at).await.unwrap());
    let moved = store.get_booking(booking.id).await.unwrap().unwrap();
    assert_eq!(moved.slot(), free);

    let mut gated = new_booking(4, 102, "2025-06-20", WalkType::Morning, "09:00");
    gated.requires_approval = true;
    let pending = store.create_booking(&gated).await.unwrap();
    assert!(!store
        .reschedule(pending.id, &pending.slot(), t("11:00"), moved_at)
        .await
        .unwrap());
}

async fn auto_complete_and_notes(store: &dyn Store) {
    seed(store, &[5], &[104, 105]).await;

    let due = store
        .create_booking(&new_booking(5, 104, "2030-01-07", WalkType::Morning, "09:00"))
        .await
        .unwrap();
    let later = store
        .create_booking(&new_booking(5, 105, "2030-01-07", WalkType::Morning, "09:01"))
        .await
        .unwrap();

    assert!(!store.set_notes(due.id, "good boy", at("2030-01-07 08:00")).await.unwrap());

    store.complete_due(at("2030-01-07 08:59")).await.unwrap();
    assert_eq!(
        store.get_booking(due.id).await.unwrap().unwrap().status,
        BookingStatus::Scheduled
    );

    let completed = store.complete_due(at("2030-01-07 09:00")).await.unwrap();
    assert!(completed >= 1);
    let done = store.get_booking(due.id).await.unwrap().unwrap();
    assert_eq!(done.status, BookingStatus::Completed);
    assert_eq!(done.completed_at, Some(at("2030-01-07 09:00")));
    assert_eq!(
        store.get_booking(later.id).await.unwrap().unwrap().status,
        BookingStatus::Scheduled
    );

    assert!(store.set_notes(due.id, "good boy", at("2030-01-07 10:00")).await.unwrap());
    assert_eq!(
        store.get_booking(due.id).await.unwrap().unwrap().user_notes.as_deref(),
        Some("good boy")
    );

    // cancelled bookings never complete
    let cancelled = store
        .create_booking(&new_booking(5, 104, "2030-01-08", WalkType::Morning, "09:00"))
        .await
        .unwrap();
    store.update_status(cancelled.id, &cancel("rain")).await.unwrap();
    store.complete_due(at("2030-01-09 00:00")).await.unwrap();
    assert_eq!(
        store.get_booking(cancelled.id).await.unwrap().unwrap().status,
        BookingStatus::Cancelled
    );
}

async fn reminders(store: &dyn Store) {
    seed(store, &[6], &[106]).await;

    let late = store
        .create_booking(&new_booking(6, 106, "2031-03-01", WalkType::Evening, "23:30"))
        .await
        .unwrap();
    let early = store
        .create_booking(&new_booking(6, 106, "2031-03-02", WalkType::Morning, "00:30"))
        .await
        .unwrap();

    let candidates = store
        .reminder_candidates(d("2031-03-01"), d("2031-03-02"))
        .await
        .unwrap();
    let ids: Vec<i64> = candidates.iter().map(|b| b.id).collect();
    assert_eq!(ids, vec![late.id, early.id]);

    let sent = at("2031-03-01 22:00");
    assert!(store.mark_reminder_sent(late.id, sent).await.unwrap());
    assert!(!store.mark_reminder_sent(late.id, sent).await.unwrap());

    let remaining = store
        .reminder_candidates(d("2031-03-01"), d("2031-03-02"))
        .await
        .unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id, early.id);
}

async fn listing(store: &dyn Store) {
    seed(store, &[7], &[107]).await;

    for (date, walk_type, time) in [
        ("2032-05-04", WalkType::Evening, "18:00"),
        ("2032-05-03", WalkType::Evening, "18:30"),
        ("2032-05-03", WalkType::Morning, "09:00"),
    ] {
        store
            .create_booking(&new_booking(7, 107, date, walk_type, time))
            .await
            .unwrap();
    }

    let filter = BookingFilter {
        user_id: Some(7),
        ..Default::default()
    };
    let listed = store.list_bookings(&filter).await.unwrap();
    let order: Vec<(NaiveDate, NaiveTime)> =
        listed.iter().map(|b| (b.date, b.scheduled_time)).collect();
    assert_eq!(
        order,
        vec![
            (d("2032-05-03"), t("09:00")),
            (d("2032-05-03"), t("18:30")),
            (d("2032-05-04"), t("18:00")),
        ]
    );

    let ranged = BookingFilter {
        dog_id: Some(107),
        date_from: Some(d("2032-05-04")),
        ..Default::default()
    };
    assert_eq!(store.list_bookings(&ranged).await.unwrap().len(), 1);

    let limited = BookingFilter {
        user_id: Some(7),
        limit: Some(2),
        ..Default::default()
    };
    assert_eq!(store.list_bookings(&limited).await.unwrap().len(), 2);
}

async fn rules(store: &dyn Store) {
    let seeded = store.list_rules().await.unwrap();
    assert_eq!(seeded.len(), DEFAULT_RULES.len());
    assert!(seeded
        .iter()
        .any(|r| r.day_type == DayType::Weekday && r.is_blocked && r.start_time == t("13:00")));

    let input = RuleInput {
        day_type: DayType::Holiday,
        name: "Holiday morning".to_string(),
        start_time: t("10:00"),
        end_time: t("12:00"),
        is_blocked: false,
    };
    let created = store.create_rule(&input, at("2025-06-01 08:00")).await.unwrap();
    assert_eq!(created.name, "Holiday morning");

    let dup = store.create_rule(&input, at("2025-06-01 08:00")).await;
    assert!(matches!(dup, Err(StoreError::Conflict)));

    let mut changed = input.clone();
    changed.end_time = t("13:00");
    assert!(store.update_rule(created.id, &changed, at("2025-06-02 08:00")).await.unwrap());
    assert!(!store.update_rule(-1, &changed, at("2025-06-02 08:00")).await.unwrap());

    let rules = store.list_rules().await.unwrap();
    let updated = rules.iter().find(|r| r.id == created.id).unwrap();
    assert_eq!(updated.end_time, t("13:00"));

    assert!(store.delete_rule(created.id).await.unwrap());
    assert!(!store.delete_rule(created.id).await.unwrap());
}

async fn blocked_dates(store: &dyn Store) {
    seed(store, &[], &[108]).await;
    let block = |dog_id: Option<i64>| NewBlockedDate {
        date: d("2025-12-24"),
        dog_id,
        reason: "Christmas Eve".to_string(),
        created_by: 9,
    };
    let now = at("2025-06-01 08:00");

    let global = store.create_blocked_date(&block(None), now).await.unwrap();
    assert_eq!(global.dog_id, None);
    store.create_blocked_date(&block(Some(108)), now).await.unwrap();

    assert!(matches!(
        store.create_blocked_date(&block(None), now).await,
        Err(StoreError::Conflict)
    ));
    assert!(matches!(
        store.create_blocked_date(&block(Some(108)), now).await,
        Err(StoreError::Conflict)
    ));

    assert_eq!(store.list_blocked_dates().await.unwrap().len(), 2);
    assert!(store.delete_blocked_date(global.id).await.unwrap());
    store.create_blocked_date(&block(None), now).await.unwrap();
}

async fn holidays(store: &dyn Store) {
    let now = at("2025-01-02 08:00");
    assert_eq!(store.holidays_fetched_at(2025, "BW").await.unwrap(), None);

    let entries = vec![
        HolidayEntry {
            date: d("2025-01-01"),
            name: "New Year".to_string(),
        },
        HolidayEntry {
            date: d("2025-01-06"),
            name: "Epiphany".to_string(),
        },
    ];
    store.replace_fetched_holidays(2025, "BW", &entries, now).await.unwrap();
    assert_eq!(store.holidays_fetched_at(2025, "BW").await.unwrap(), Some(now));
    assert_eq!(store.list_holidays(2025, "BW").await.unwrap().len(), 2);
    assert!(store.list_holidays(2025, "BY").await.unwrap().is_empty());

    // a refresh replaces the previous fetched rows
    store
        .replace_fetched_holidays(2025, "BW", &entries[..1], at("2025-01-09 08:00"))
        .await
        .unwrap();
    assert_eq!(store.list_holidays(2025, "BW").await.unwrap().len(), 1);

    let manual = NewHoliday {
        date: d("2025-01-01"),
        name: "Shelter closed".to_string(),
    };
    let created = store.create_manual_holiday(&manual, 9, now).await.unwrap();
    assert_eq!(created.source, HolidaySource::Manual);
    assert!(matches!(
        store.create_manual_holiday(&manual, 9, now).await,
        Err(StoreError::Conflict)
    ));

    // manual entries apply to every region
    let by = store.list_holidays(2025, "BY").await.unwrap();
    assert_eq!(by.len(), 1);
    assert_eq!(by[0].source, HolidaySource::Manual);

    assert!(store.delete_holiday(created.id).await.unwrap());
    assert!(store.list_holidays(2025, "BY").await.unwrap().is_empty());
}

async fn settings(store: &dyn Store) {
    let now = at("2025-06-01 08:00");
    store.put_setting("booking_advance_days", "30", now).await.unwrap();
    store.put_setting("booking_advance_days", "21", now).await.unwrap();
    let raw = store.load_settings().await.unwrap();
    assert_eq!(raw.get("booking_advance_days").map(String::as_str), Some("21"));
}

async fn users(store: &dyn Store) {
    let mut idle = walker(20);
    idle.last_activity_at = at("2023-01-01 08:00");
    let mut admin = walker(21);
    admin.role = Role::Admin;
    admin.last_activity_at = at("2023-01-01 08:00");
    let mut recent = walker(22);
    recent.last_activity_at = at("2025-05-30 08:00");
    for u in [&idle, &admin, &recent] {
        store.upsert_user(u).await.unwrap();
    }
    store.upsert_dog(&dog(109)).await.unwrap();

    let cutoff = at("2024-06-01 00:00");
    let found: Vec<i64> = store
        .idle_users(cutoff)
        .await
        .unwrap()
        .iter()
        .map(|u| u.id)
        .filter(|id| [20, 21, 22].contains(id))
        .collect();
    assert_eq!(found, vec![20]);

    let now = at("2025-06-01 03:00");
    assert!(store.deactivate_user(20, cutoff, "inactivity", now).await.unwrap());
    assert!(!store.deactivate_user(20, cutoff, "inactivity", now).await.unwrap());
    let deactivated = store.get_user(20).await.unwrap().unwrap();
    assert!(!deactivated.is_active);
    assert_eq!(deactivated.deactivation_reason.as_deref(), Some("inactivity"));

    // soft delete keeps historical bookings readable
    let booking = store
        .create_booking(&new_booking(22, 109, "2025-07-01", WalkType::Morning, "09:00"))
        .await
        .unwrap();
    assert!(store.soft_delete_user(22, now).await.unwrap());
    assert!(!store.soft_delete_user(22, now).await.unwrap());
    assert!(store.soft_delete_dog(109, now).await.unwrap());
    let kept = store.get_booking(booking.id).await.unwrap().unwrap();
    assert_eq!(kept.user_id, 22);
    assert_eq!(kept.dog_id, 109);
    assert!(store.get_user(22).await.unwrap().unwrap().deleted_at.is_some());
    assert!(!store.get_dog(109).await.unwrap().unwrap().bookable());
}

pub async fn concurrent_create_single_winner(store: Arc<dyn Store>) {
    store.upsert_user(&walker(1)).await.unwrap();
    store.upsert_dog(&dog(100)).await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            store
                .create_booking(&new_booking(1, 100, "2025-06-16", WalkType::Morning, "09:30"))
                .await
        }));
    }

    let mut won = 0;
    let mut conflicts = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => won += 1,
            Err(StoreError::Conflict) => conflicts += 1,
            Err(e) => panic!("unexpected store error: {e}"),
        }
    }
    assert_eq!(won, 1);
    assert_eq!(conflicts, 7);
}
