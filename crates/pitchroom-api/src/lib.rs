pub mod auth;
pub mod conversations;
pub mod error;
pub mod ideas;
pub mod middleware;
pub mod webhook;

use std::sync::Arc;

use pitchroom_db::Database;
use pitchroom_entitlements::{Classifier, EntitlementEngine};
use pitchroom_media::MediaStore;
use pitchroom_types::models::User;
use uuid::Uuid;

use crate::error::ApiError;

pub type AppState = Arc<AppStateInner>;

/// Shared application state, constructed once in main and injected into
/// every handler. No process-wide singletons.
pub struct AppStateInner {
    pub db: Arc<Database>,
    pub engine: EntitlementEngine,
    pub classifier: Classifier,
    pub media: Arc<MediaStore>,
    pub jwt_secret: String,
    /// `None` disables webhook signature verification (logged at startup).
    pub webhook_secret: Option<String>,
}

/// Resolve the acting user from their token subject, projected to the typed
/// domain model.
pub(crate) fn load_user(db: &Database, id: Uuid) -> Result<User, ApiError> {
    let row = db
        .get_user_by_id(&id.to_string())
        .map_err(ApiError::Store)?
        .ok_or(ApiError::NotFound("user"))?;
    row.into_user().map_err(ApiError::Store)
}
