use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Account role, fixed at signup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Giver,
    Investor,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Giver => "giver",
            Role::Investor => "investor",
        }
    }

    pub fn parse(s: &str) -> Option<Role> {
        match s {
            "giver" => Some(Role::Giver),
            "investor" => Some(Role::Investor),
            _ => None,
        }
    }
}

/// The purchased plan kind. `Single` is a one-shot credential (no expiry);
/// `Unlimited` and `Investor` are leased for a fixed term.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanKind {
    Single,
    Unlimited,
    Investor,
}

impl PlanKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanKind::Single => "single",
            PlanKind::Unlimited => "unlimited",
            PlanKind::Investor => "investor",
        }
    }

    pub fn parse(s: &str) -> Option<PlanKind> {
        match s {
            "single" => Some(PlanKind::Single),
            "unlimited" => Some(PlanKind::Unlimited),
            "investor" => Some(PlanKind::Investor),
            _ => None,
        }
    }
}

/// Output of product classification, applied atomically to a user.
/// Not stored as its own entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanGrant {
    pub kind: PlanKind,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub plan: Option<PlanKind>,
    pub is_entitled: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Idea {
    pub id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    pub description: String,
    pub video_url: String,
    pub created_at: DateTime<Utc>,
}

/// Messages are immutable once created; `created_at` defines conversation
/// order. A thread between two users exists iff at least one message row
/// carries that unordered pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub sender_id: Uuid,
    pub receiver_id: Uuid,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Reference to the conversation between an investor and a giver, identified
/// by the unordered participant pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadRef {
    pub investor_id: Uuid,
    pub giver_id: Uuid,
}
