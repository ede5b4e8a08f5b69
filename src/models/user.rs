use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Walker,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Walker => "walker",
            Role::Admin => "admin",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "walker" => Some(Role::Walker),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }
}

/// Experience level. Walkers may take dogs at or below their own tier.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Green,
    Blue,
    Orange,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Green => "green",
            Tier::Blue => "blue",
            Tier::Orange => "orange",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "green" => Some(Tier::Green),
            "blue" => Some(Tier::Blue),
            "orange" => Some(Tier::Orange),
            _ => None,
        }
    }
}

/// Local mirror of the account record owned by the auth service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub role: Role,
    pub tier: Tier,
    pub is_active: bool,
    pub is_verified: bool,
    pub last_activity_at: NaiveDateTime,
    pub deactivated_at: Option<NaiveDateTime>,
    pub deactivation_reason: Option<String>,
    pub deleted_at: Option<NaiveDateTime>,
}

impl User {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Active, verified and not deleted.
    pub fn in_good_standing(&self) -> bool {
        self.is_active && self.is_verified && self.deleted_at.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dog {
    pub id: i64,
    pub name: String,
    pub tier: Tier,
    pub is_available: bool,
    pub deleted_at: Option<NaiveDateTime>,
}

impl Dog {
    pub fn bookable(&self) -> bool {
        self.is_available && self.deleted_at.is_none()
    }
}
