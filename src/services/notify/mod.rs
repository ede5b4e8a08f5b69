pub mod webhook;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use serde::Serialize;
use uuid::Uuid;

use crate::models::Booking;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Created,
    Approved,
    Rejected,
    CancelledByUser,
    CancelledByAdmin,
    Moved,
    ReminderDue,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Created => "created",
            EventKind::Approved => "approved",
            EventKind::Rejected => "rejected",
            EventKind::CancelledByUser => "cancelled_by_user",
            EventKind::CancelledByAdmin => "cancelled_by_admin",
            EventKind::Moved => "moved",
            EventKind::ReminderDue => "reminder_due",
        }
    }
}

/// A lifecycle event with the booking as it was after the change.
#[derive(Debug, Clone, Serialize)]
pub struct BookingEvent {
    pub id: Uuid,
    pub kind: EventKind,
    pub booking: Booking,
    pub actor_id: Option<i64>,
    pub reason: Option<String>,
    pub occurred_at: NaiveDateTime,
}

impl BookingEvent {
    pub fn new(kind: EventKind, booking: Booking, occurred_at: NaiveDateTime) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            booking,
            actor_id: None,
            reason: None,
            occurred_at,
        }
    }

    pub fn by(mut self, actor_id: i64) -> Self {
        self.actor_id = Some(actor_id);
        self
    }

    pub fn because(mut self, reason: Option<String>) -> Self {
        self.reason = reason;
        self
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, event: &BookingEvent) -> anyhow::Result<()>;
}

/// Writes each event as a structured log line.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, event: &BookingEvent) -> anyhow::Result<()> {
        tracing::info!(
            event_id = %event.id,
            kind = event.kind.as_str(),
            booking_id = event.booking.id,
            user_id = event.booking.user_id,
            dog_id = event.booking.dog_id,
            date = %event.booking.date,
            "booking event"
        );
        Ok(())
    }
}

/// Best-effort delivery: bounded by `timeout`, failures are logged and dropped.
pub struct NotificationGateway {
    notifier: Arc<dyn Notifier>,
    timeout: Duration,
}

impl NotificationGateway {
    pub fn new(notifier: Arc<dyn Notifier>, timeout: Duration) -> Self {
        Self { notifier, timeout }
    }

    pub async fn dispatch(&self, event: BookingEvent) {
        match tokio::time::timeout(self.timeout, self.notifier.notify(&event)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(
                event_id = %event.id,
                kind = event.kind.as_str(),
                booking_id = event.booking.id,
                error = %e,
                "notification failed"
            ),
            Err(_) => tracing::warn!(
                event_id = %event.id,
                kind = event.kind.as_str(),
                booking_id = event.booking.id,
                "notification timed out"
            ),
        }
    }
}
