use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Booking {
    pub id: i64,
    pub user_id: i64,
    pub dog_id: i64,
    pub date: NaiveDate,
    pub walk_type: WalkType,
    #[serde(with = "hhmm")]
    pub scheduled_time: NaiveTime,
    pub status: BookingStatus,
    pub requires_approval: bool,
    pub approval_status: ApprovalStatus,
    pub approved_by: Option<i64>,
    pub approved_at: Option<NaiveDateTime>,
    pub rejection_reason: Option<String>,
    pub user_notes: Option<String>,
    pub cancellation_reason: Option<String>,
    pub completed_at: Option<NaiveDateTime>,
    pub reminder_sent_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl Booking {
    pub fn starts_at(&self) -> NaiveDateTime {
        self.date.and_time(self.scheduled_time)
    }

    pub fn slot(&self) -> Slot {
        Slot {
            dog_id: self.dog_id,
            date: self.date,
            walk_type: self.walk_type,
        }
    }

    /// True while an approval gate is still unresolved.
    pub fn awaiting_review(&self) -> bool {
        self.requires_approval && self.approval_status == ApprovalStatus::Pending
    }
}

/// The unit of exclusivity: one active booking per dog, date and walk type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Slot {
    pub dog_id: i64,
    pub date: NaiveDate,
    pub walk_type: WalkType,
}

#[derive(Debug, Clone)]
pub struct NewBooking {
    pub user_id: i64,
    pub dog_id: i64,
    pub date: NaiveDate,
    pub walk_type: WalkType,
    pub scheduled_time: NaiveTime,
    pub requires_approval: bool,
    pub created_at: NaiveDateTime,
}

impl NewBooking {
    pub fn slot(&self) -> Slot {
        Slot {
            dog_id: self.dog_id,
            date: self.date,
            walk_type: self.walk_type,
        }
    }

    pub fn initial_approval(&self) -> ApprovalStatus {
        if self.requires_approval {
            ApprovalStatus::Pending
        } else {
            ApprovalStatus::Approved
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum WalkType {
    Morning,
    Evening,
}

impl WalkType {
    pub fn as_str(&self) -> &'static str {
        match self {
            WalkType::Morning => "morning",
            WalkType::Evening => "evening",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "morning" => Some(WalkType::Morning),
            "evening" => Some(WalkType::Evening),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    Scheduled,
    Completed,
    Cancelled,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Scheduled => "scheduled",
            BookingStatus::Completed => "completed",
            BookingStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "scheduled" => Some(BookingStatus::Scheduled),
            "completed" => Some(BookingStatus::Completed),
            "cancelled" => Some(BookingStatus::Cancelled),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
}

impl ApprovalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalStatus::Pending => "pending",
            ApprovalStatus::Approved => "approved",
            ApprovalStatus::Rejected => "rejected",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ApprovalStatus::Pending),
            "approved" => Some(ApprovalStatus::Approved),
            "rejected" => Some(ApprovalStatus::Rejected),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub enum ApprovalDecision {
    Approve { admin_id: i64 },
    Reject { admin_id: i64, reason: String },
}

impl ApprovalDecision {
    pub fn admin_id(&self) -> i64 {
        match self {
            ApprovalDecision::Approve { admin_id } | ApprovalDecision::Reject { admin_id, .. } => {
                *admin_id
            }
        }
    }
}

/// Filters for admin and owner listings. Unset fields do not constrain.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BookingFilter {
    pub user_id: Option<i64>,
    pub dog_id: Option<i64>,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
    pub status: Option<BookingStatus>,
    pub approval_status: Option<ApprovalStatus>,
    pub limit: Option<i64>,
}

impl BookingFilter {
    pub fn matches(&self, b: &Booking) -> bool {
        self.user_id.map_or(true, |v| b.user_id == v)
            && self.dog_id.map_or(true, |v| b.dog_id == v)
            && self.date_from.map_or(true, |v| b.date >= v)
            && self.date_to.map_or(true, |v| b.date <= v)
            && self.status.map_or(true, |v| b.status == v)
            && self.approval_status.map_or(true, |v| b.approval_status == v)
    }

    pub fn effective_limit(&self) -> i64 {
        self.limit.unwrap_or(100).clamp(1, 1000)
    }
}

/// Serde helper for "HH:MM" time-of-day fields.
pub mod hhmm {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub const FORMAT: &str = "%H:%M";

    pub fn serialize<S: Serializer>(t: &NaiveTime, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&t.format(FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(d)?;
        NaiveTime::parse_from_str(&raw, FORMAT).map_err(serde::de::Error::custom)
    }
}
