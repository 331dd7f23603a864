use axum::{
    Extension, Json,
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use bytes::Bytes;
use chrono::Utc;
use serde::Deserialize;
use tracing::{error, info};
use uuid::Uuid;

use pitchroom_entitlements::{Action, Denial, EntitlementEngine};
use pitchroom_types::api::{Claims, IdeaResponse, SubmitIdeaRequest, UploadVideoResponse};
use pitchroom_types::models::PlanKind;

use crate::AppState;
use crate::error::ApiError;
use crate::load_user;

#[derive(Debug, Deserialize)]
pub struct UploadQuery {
    #[serde(default = "default_ext")]
    pub ext: String,
}

fn default_ext() -> String {
    "mp4".into()
}

/// PUT /ideas/video — gated video upload. The object store write happens
/// before the idea row exists; an abandoned submission leaves an orphaned,
/// content-addressed object, which is acceptable.
pub async fn upload_video(
    State(state): State<AppState>,
    Query(query): Query<UploadQuery>,
    Extension(claims): Extension<Claims>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    if body.is_empty() {
        return Err(ApiError::Validation("empty video upload".into()));
    }

    let user = load_user(&state.db, claims.sub)?;
    EntitlementEngine::check(&user, Action::SubmitIdea, Utc::now())?;

    let video_url = state
        .media
        .store_video(&body, &query.ext)
        .await
        .map_err(ApiError::Store)?;

    Ok(Json(UploadVideoResponse { video_url }))
}

/// POST /ideas — the gated submission itself. For single plans the one-shot
/// token is spent through the conditional update before the insert; two
/// submissions racing past `check` both reach `consume`, but only the one
/// that flips the flag may insert.
pub async fn submit_idea(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SubmitIdeaRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.title.is_empty() || req.title.len() > 200 {
        return Err(ApiError::Validation("title must be 1-200 characters".into()));
    }
    if req.description.is_empty() {
        return Err(ApiError::Validation("description must not be empty".into()));
    }
    if req.video_url.is_empty() {
        return Err(ApiError::Validation("video_url must not be empty".into()));
    }

    let user = load_user(&state.db, claims.sub)?;
    let now = Utc::now();
    EntitlementEngine::check(&user, Action::SubmitIdea, now)?;

    // One-shot plans spend their token here; the conditional update admits
    // exactly one of any concurrent submissions.
    if user.plan == Some(PlanKind::Single) && !state.engine.consume(user.id)? {
        return Err(ApiError::Denied(Denial::AlreadyConsumed));
    }

    let idea_id = Uuid::new_v4();

    // Run blocking DB insert off the async runtime
    let db = state.db.clone();
    let (iid, uid) = (idea_id.to_string(), user.id.to_string());
    let (title, description, video_url) = (req.title.clone(), req.description.clone(), req.video_url.clone());
    let created = now.to_rfc3339();
    tokio::task::spawn_blocking(move || {
        db.insert_idea(&iid, &uid, &title, &description, &video_url, &created)
    })
    .await
    .map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        ApiError::Store(anyhow::anyhow!("join error: {e}"))
    })?
    .map_err(ApiError::Store)?;

    info!(user_id = %user.id, idea_id = %idea_id, "idea submitted");

    Ok((
        StatusCode::CREATED,
        Json(IdeaResponse {
            id: idea_id,
            user_id: user.id,
            title: req.title,
            description: req.description,
            video_url: req.video_url,
            created_at: now,
        }),
    ))
}

/// GET /ideas — newest first, consumed by the browsing UI.
pub async fn list_ideas(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let rows = tokio::task::spawn_blocking(move || db.list_ideas(100))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            ApiError::Store(anyhow::anyhow!("join error: {e}"))
        })?
        .map_err(ApiError::Store)?;

    let ideas: Vec<IdeaResponse> = rows
        .into_iter()
        .filter_map(|row| {
            row.into_idea()
                .map_err(|e| error!("corrupt idea row skipped: {e:#}"))
                .ok()
        })
        .map(|idea| IdeaResponse {
            id: idea.id,
            user_id: idea.user_id,
            title: idea.title,
            description: idea.description,
            video_url: idea.video_url,
            created_at: idea.created_at,
        })
        .collect();

    Ok(Json(ideas))
}
