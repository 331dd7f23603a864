use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use thiserror::Error;
use tracing::{error, info};
use uuid::Uuid;

use pitchroom_db::Database;
use pitchroom_entitlements::{Action, Denial, EntitlementEngine};
use pitchroom_types::api::{
    Claims, MessageResponse, SendMessageRequest, StartConversationResponse, ThreadSummary,
};
use pitchroom_types::models::{Role, ThreadRef, User};

use crate::AppState;
use crate::error::ApiError;
use crate::load_user;

#[derive(Debug, Error)]
pub enum GateError {
    #[error("cannot start a conversation with yourself")]
    InvalidTarget,
    #[error(transparent)]
    Denied(#[from] Denial),
    #[error("giver not found")]
    TargetNotFound,
    #[error("store unavailable: {0}")]
    Store(#[source] anyhow::Error),
}

impl From<GateError> for ApiError {
    fn from(err: GateError) -> Self {
        match err {
            GateError::InvalidTarget => ApiError::Validation(err.to_string()),
            GateError::Denied(d) => ApiError::Denied(d),
            GateError::TargetNotFound => ApiError::NotFound("giver"),
            GateError::Store(e) => ApiError::Store(e),
        }
    }
}

/// The deterministic greeting that opens every thread.
fn greeting(giver_name: &str) -> String {
    format!("Hi {giver_name}, I'm interested in your idea and would like to discuss it further.")
}

/// Idempotent thread creation between an entitled investor and a giver.
/// Preconditions run in order, first failure wins; an existing thread is
/// returned as success, not an error. Returns the thread reference and
/// whether this call created it.
pub fn start_conversation(
    db: &Database,
    initiator: &User,
    target_giver_id: Uuid,
    now: DateTime<Utc>,
) -> Result<(ThreadRef, bool), GateError> {
    if initiator.id == target_giver_id {
        return Err(GateError::InvalidTarget);
    }
    if initiator.role != Role::Investor {
        return Err(GateError::Denied(Denial::WrongRole));
    }
    EntitlementEngine::check(initiator, Action::StartConversation, now)?;

    // Resolve the target: needed for the greeting, and a non-giver is not a
    // valid conversation target.
    let target = db
        .get_user_by_id(&target_giver_id.to_string())
        .map_err(GateError::Store)?
        .ok_or(GateError::TargetNotFound)?;
    if target.role != Role::Giver.as_str() {
        return Err(GateError::InvalidTarget);
    }

    // Existence check and insert are one atomic step in the store; the pair
    // primary key closes the double-click race.
    let message_id = Uuid::new_v4();
    let created = db
        .start_thread(
            &initiator.id.to_string(),
            &target_giver_id.to_string(),
            &message_id.to_string(),
            &greeting(&target.name),
            &now.to_rfc3339(),
        )
        .map_err(GateError::Store)?;

    if created {
        info!(investor = %initiator.id, giver = %target_giver_id, "conversation started");
    }

    Ok((
        ThreadRef {
            investor_id: initiator.id,
            giver_id: target_giver_id,
        },
        created,
    ))
}

/// POST /conversations/{giver_id} — 201 when the thread was created, 200
/// when it already existed (idempotent no-op).
pub async fn start(
    State(state): State<AppState>,
    Path(giver_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let state2 = state.clone();
    let (thread, created) = tokio::task::spawn_blocking(move || {
        let initiator = load_user(&state2.db, claims.sub)?;
        start_conversation(&state2.db, &initiator, giver_id, Utc::now()).map_err(ApiError::from)
    })
    .await
    .map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        ApiError::Store(anyhow::anyhow!("join error: {e}"))
    })??;

    let status = if created { StatusCode::CREATED } else { StatusCode::OK };
    Ok((status, Json(StartConversationResponse { thread })))
}

/// GET /conversations — the caller's threads, most recent activity first.
pub async fn list_threads(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let rows = tokio::task::spawn_blocking(move || db.list_threads_for(&claims.sub.to_string()))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            ApiError::Store(anyhow::anyhow!("join error: {e}"))
        })?
        .map_err(ApiError::Store)?;

    let threads: Vec<ThreadSummary> = rows
        .into_iter()
        .filter_map(|row| {
            let peer_id = row
                .peer_id
                .parse()
                .map_err(|e| error!("corrupt peer id '{}': {}", row.peer_id, e))
                .ok()?;
            let last_at = pitchroom_db::models::parse_ts(&row.last_at)
                .map_err(|e| error!("corrupt thread timestamp: {e:#}"))
                .ok()?;
            Some(ThreadSummary {
                peer_id,
                peer_name: row.peer_name,
                last_message: row.last_message,
                last_at,
            })
        })
        .collect();

    Ok(Json(threads))
}

#[derive(Debug, Deserialize)]
pub struct MessageQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
    /// Cursor-based polling — pass the `created_at` of the newest message
    /// from the previous page to fetch only what followed it.
    pub after: Option<String>,
}

fn default_limit() -> u32 {
    100
}

/// GET /conversations/{peer_id}/messages — poll a thread, oldest first.
pub async fn get_messages(
    State(state): State<AppState>,
    Path(peer_id): Path<Uuid>,
    Query(query): Query<MessageQuery>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let me = claims.sub.to_string();
    let peer = peer_id.to_string();
    let limit = query.limit.min(500);
    let after = query.after;

    let rows = tokio::task::spawn_blocking(move || {
        if !db.thread_exists(&me, &peer)? {
            return Ok(None);
        }
        db.get_pair_messages(&me, &peer, limit, after.as_deref()).map(Some)
    })
    .await
    .map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        ApiError::Store(anyhow::anyhow!("join error: {e}"))
    })?
    .map_err(ApiError::Store)?
    .ok_or(ApiError::NotFound("conversation"))?;

    let messages: Vec<MessageResponse> = rows
        .into_iter()
        .filter_map(|row| {
            row.into_message()
                .map_err(|e| error!("corrupt message row skipped: {e:#}"))
                .ok()
        })
        .map(|m| MessageResponse {
            id: m.id,
            sender_id: m.sender_id,
            receiver_id: m.receiver_id,
            content: m.content,
            created_at: m.created_at,
        })
        .collect();

    Ok(Json(messages))
}

/// POST /conversations/{peer_id}/messages — reply within an existing thread.
/// Both participants may reply; only *initiating* a thread is entitlement
/// gated.
pub async fn send_reply(
    State(state): State<AppState>,
    Path(peer_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.content.trim().is_empty() {
        return Err(ApiError::Validation("message content must not be empty".into()));
    }

    let message_id = Uuid::new_v4();
    let now = Utc::now();

    let db = state.db.clone();
    let (mid, me, peer, content) = (
        message_id.to_string(),
        claims.sub.to_string(),
        peer_id.to_string(),
        req.content.clone(),
    );
    let created = now.to_rfc3339();
    let inserted = tokio::task::spawn_blocking(move || {
        db.insert_reply(&mid, &me, &peer, &content, &created)
    })
    .await
    .map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        ApiError::Store(anyhow::anyhow!("join error: {e}"))
    })?
    .map_err(ApiError::Store)?;

    if !inserted {
        return Err(ApiError::NotFound("conversation"));
    }

    Ok((
        StatusCode::CREATED,
        Json(MessageResponse {
            id: message_id,
            sender_id: claims.sub,
            receiver_id: peer_id,
            content: req.content,
            created_at: now,
        }),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pitchroom_entitlements::EntitlementEngine;
    use pitchroom_types::models::{PlanGrant, PlanKind};
    use std::sync::Arc;

    struct Fixture {
        db: Arc<Database>,
        investor: User,
        giver_id: Uuid,
    }

    fn fixture(investor_entitled: bool) -> Fixture {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let engine = EntitlementEngine::new(db.clone());
        let now = Utc::now();

        let investor_id = Uuid::new_v4();
        db.create_user(
            &investor_id.to_string(),
            "Ida",
            "ida@example.com",
            "hash",
            "investor",
            &now.to_rfc3339(),
        )
        .unwrap();
        if investor_entitled {
            engine
                .grant(
                    investor_id,
                    &PlanGrant {
                        kind: PlanKind::Investor,
                        expires_at: Some(now + chrono::Duration::days(365)),
                    },
                )
                .unwrap();
        }

        let giver_id = Uuid::new_v4();
        db.create_user(
            &giver_id.to_string(),
            "Gus",
            "gus@example.com",
            "hash",
            "giver",
            &now.to_rfc3339(),
        )
        .unwrap();

        let investor = db
            .get_user_by_id(&investor_id.to_string())
            .unwrap()
            .unwrap()
            .into_user()
            .unwrap();

        Fixture { db, investor, giver_id }
    }

    #[test]
    fn second_call_returns_same_thread_without_new_message() {
        let f = fixture(true);
        let now = Utc::now();

        let (t1, created1) = start_conversation(&f.db, &f.investor, f.giver_id, now).unwrap();
        let (t2, created2) = start_conversation(&f.db, &f.investor, f.giver_id, now).unwrap();

        assert!(created1);
        assert!(!created2);
        assert_eq!(t1, t2);
        assert_eq!(
            f.db.count_pair_messages(&f.investor.id.to_string(), &f.giver_id.to_string())
                .unwrap(),
            1
        );
    }

    #[test]
    fn greeting_is_deterministic_and_addressed() {
        let f = fixture(true);
        start_conversation(&f.db, &f.investor, f.giver_id, Utc::now()).unwrap();

        let rows = f
            .db
            .get_pair_messages(&f.investor.id.to_string(), &f.giver_id.to_string(), 10, None)
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(
            rows[0].content,
            "Hi Gus, I'm interested in your idea and would like to discuss it further."
        );
        assert_eq!(rows[0].sender_id, f.investor.id.to_string());
    }

    #[test]
    fn self_target_rejected_before_anything_else() {
        let f = fixture(true);
        let err = start_conversation(&f.db, &f.investor, f.investor.id, Utc::now()).unwrap_err();
        assert!(matches!(err, GateError::InvalidTarget));
    }

    #[test]
    fn giver_cannot_initiate() {
        let f = fixture(true);
        let giver = f
            .db
            .get_user_by_id(&f.giver_id.to_string())
            .unwrap()
            .unwrap()
            .into_user()
            .unwrap();
        let err = start_conversation(&f.db, &giver, f.investor.id, Utc::now()).unwrap_err();
        assert!(matches!(err, GateError::Denied(Denial::WrongRole)));
    }

    #[test]
    fn unpaid_investor_denied_with_reason() {
        let f = fixture(false);
        let err = start_conversation(&f.db, &f.investor, f.giver_id, Utc::now()).unwrap_err();
        assert!(matches!(err, GateError::Denied(Denial::NoActivePlan)));
        // nothing was created
        assert!(
            !f.db
                .thread_exists(&f.investor.id.to_string(), &f.giver_id.to_string())
                .unwrap()
        );
    }

    #[test]
    fn expired_investor_denied_as_expired() {
        let f = fixture(true);
        let later = Utc::now() + chrono::Duration::days(400);
        let err = start_conversation(&f.db, &f.investor, f.giver_id, later).unwrap_err();
        assert!(matches!(err, GateError::Denied(Denial::Expired)));
    }

    #[test]
    fn missing_or_non_giver_target_rejected() {
        let f = fixture(true);

        let err = start_conversation(&f.db, &f.investor, Uuid::new_v4(), Utc::now()).unwrap_err();
        assert!(matches!(err, GateError::TargetNotFound));

        // another investor is not a valid target
        let other = Uuid::new_v4();
        f.db.create_user(
            &other.to_string(),
            "Ivy",
            "ivy@example.com",
            "hash",
            "investor",
            &Utc::now().to_rfc3339(),
        )
        .unwrap();
        let err = start_conversation(&f.db, &f.investor, other, Utc::now()).unwrap_err();
        assert!(matches!(err, GateError::InvalidTarget));
    }
}
