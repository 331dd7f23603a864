//! Database row types — these map directly to SQLite rows.
//! Distinct from the pitchroom-types API models to keep the DB layer
//! independent; each row projects into its typed domain model at this
//! boundary, so nothing loosely shaped leaks upward.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use pitchroom_types::models::{Idea, Message, PlanKind, Role, User};

pub struct UserRow {
    pub id: String,
    pub name: String,
    pub email: String,
    pub password: String,
    pub role: String,
    pub plan: Option<String>,
    pub is_entitled: bool,
    pub expires_at: Option<String>,
    pub created_at: String,
}

pub struct IdeaRow {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub description: String,
    pub video_url: String,
    pub created_at: String,
}

pub struct MessageRow {
    pub id: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub content: String,
    pub created_at: String,
}

pub struct ThreadRow {
    pub peer_id: String,
    pub peer_name: String,
    pub last_message: String,
    pub last_at: String,
}

impl UserRow {
    pub fn into_user(self) -> Result<User> {
        let plan = match self.plan.as_deref() {
            None => None,
            Some(s) => Some(
                PlanKind::parse(s).with_context(|| format!("unknown plan '{s}' on user {}", self.id))?,
            ),
        };
        let role = Role::parse(&self.role)
            .with_context(|| format!("unknown role '{}' on user {}", self.role, self.id))?;

        Ok(User {
            id: self.id.parse()?,
            name: self.name,
            email: self.email,
            role,
            plan,
            is_entitled: self.is_entitled,
            expires_at: self.expires_at.as_deref().map(parse_ts).transpose()?,
            created_at: parse_ts(&self.created_at)?,
        })
    }
}

impl IdeaRow {
    pub fn into_idea(self) -> Result<Idea> {
        Ok(Idea {
            id: self.id.parse()?,
            user_id: self.user_id.parse()?,
            title: self.title,
            description: self.description,
            video_url: self.video_url,
            created_at: parse_ts(&self.created_at)?,
        })
    }
}

impl MessageRow {
    pub fn into_message(self) -> Result<Message> {
        Ok(Message {
            id: self.id.parse()?,
            sender_id: self.sender_id.parse()?,
            receiver_id: self.receiver_id.parse()?,
            content: self.content,
            created_at: parse_ts(&self.created_at)?,
        })
    }
}

/// Timestamps are written as RFC 3339, but rows seeded outside this crate may
/// carry SQLite's bare "YYYY-MM-DD HH:MM:SS" form; parse both as UTC.
pub fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
    s.parse::<DateTime<Utc>>()
        .or_else(|_| {
            chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .with_context(|| format!("bad timestamp '{s}'"))
}
