use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{PlanKind, Role, ThreadRef};

// -- JWT Claims --

/// JWT claims shared between the auth handlers and the request middleware.
/// Canonical definition lives here in pitchroom-types to eliminate
/// duplication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub name: String,
    pub role: Role,
    pub exp: usize,
}

// -- Auth --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub password: String,
    pub role: Role,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub user_id: Uuid,
    pub token: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub user_id: Uuid,
    pub name: String,
    pub role: Role,
    pub token: String,
}

// -- Payment webhook --

/// Inbound purchase notification. The provider sends more fields than these;
/// unknown fields must be accepted, so no `deny_unknown_fields` here.
#[derive(Debug, Clone, Deserialize)]
pub struct PurchaseEvent {
    pub purchaser_email: String,
    pub product_name: String,
    #[serde(default)]
    pub sale_id: Option<String>,
    #[serde(default)]
    pub sale_timestamp: Option<String>,
    #[serde(default)]
    pub price: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct WebhookAck {
    pub success: bool,
    pub user_id: Uuid,
    pub plan_type: PlanKind,
}

// -- Ideas --

#[derive(Debug, Serialize)]
pub struct UploadVideoResponse {
    pub video_url: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SubmitIdeaRequest {
    pub title: String,
    pub description: String,
    pub video_url: String,
}

#[derive(Debug, Serialize)]
pub struct IdeaResponse {
    pub id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    pub description: String,
    pub video_url: String,
    pub created_at: DateTime<Utc>,
}

// -- Conversations --

#[derive(Debug, Serialize)]
pub struct StartConversationResponse {
    pub thread: ThreadRef,
}

#[derive(Debug, Serialize)]
pub struct ThreadSummary {
    pub peer_id: Uuid,
    pub peer_name: String,
    pub last_message: String,
    pub last_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendMessageRequest {
    pub content: String,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub id: Uuid,
    pub sender_id: Uuid,
    pub receiver_id: Uuid,
    pub content: String,
    pub created_at: DateTime<Utc>,
}
