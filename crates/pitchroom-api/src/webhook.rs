use axum::{Json, extract::State, http::HeaderMap, response::IntoResponse};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use pitchroom_db::Database;
use pitchroom_entitlements::{Classifier, EngineError, EntitlementEngine};
use pitchroom_types::api::{PurchaseEvent, WebhookAck};
use pitchroom_types::models::PlanKind;

use crate::AppState;
use crate::error::ApiError;

pub const SIGNATURE_HEADER: &str = "x-webhook-signature";

#[derive(Debug)]
pub struct GrantApplied {
    pub user_id: Uuid,
    pub plan: PlanKind,
    /// True when the sale id was seen before and the grant was not
    /// re-applied.
    pub replayed: bool,
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("missing required purchase fields")]
    MalformedPayload,
    #[error("purchaser has no account")]
    UserNotFound,
    #[error("unknown product")]
    UnknownProduct,
    #[error("store unavailable: {0}")]
    Store(#[source] anyhow::Error),
}

impl From<IngestError> for ApiError {
    fn from(err: IngestError) -> Self {
        match err {
            IngestError::MalformedPayload => ApiError::Validation(err.to_string()),
            IngestError::UserNotFound => ApiError::NotFound("purchaser account"),
            IngestError::UnknownProduct => ApiError::Validation(err.to_string()),
            IngestError::Store(e) => ApiError::Store(e),
        }
    }
}

/// Convert an untrusted purchase notification into a durable entitlement.
/// The purchaser must already hold an account — identity is established at
/// signup, never by payment. A replayed sale id is acknowledged without
/// re-applying the grant, so a consumed single plan cannot be re-armed by a
/// re-sent notification.
pub fn ingest(
    db: &Database,
    engine: &EntitlementEngine,
    classifier: &Classifier,
    event: &PurchaseEvent,
    now: DateTime<Utc>,
) -> Result<GrantApplied, IngestError> {
    if event.purchaser_email.trim().is_empty() || event.product_name.trim().is_empty() {
        return Err(IngestError::MalformedPayload);
    }

    let sale_id = event.sale_id.as_deref().filter(|s| !s.trim().is_empty());

    if let Some(sale_id) = sale_id {
        if let Some((user_id, plan)) = db.get_processed_sale(sale_id).map_err(IngestError::Store)? {
            info!(sale_id, "replayed purchase notification, grant not re-applied");
            let user_id = user_id
                .parse()
                .map_err(|e| IngestError::Store(anyhow::anyhow!("corrupt sale record: {e}")))?;
            let plan = PlanKind::parse(&plan)
                .ok_or_else(|| IngestError::Store(anyhow::anyhow!("corrupt sale plan '{plan}'")))?;
            return Ok(GrantApplied { user_id, plan, replayed: true });
        }
    }

    let user = db
        .get_user_by_email(event.purchaser_email.trim())
        .map_err(IngestError::Store)?
        .ok_or(IngestError::UserNotFound)?;
    let user_id: Uuid = user
        .id
        .parse()
        .map_err(|e| IngestError::Store(anyhow::anyhow!("corrupt user id '{}': {e}", user.id)))?;

    let grant = classifier
        .classify(&event.product_name, event.price.as_deref(), now)
        .map_err(|_| {
            warn!(product = %event.product_name, "unclassifiable product");
            IngestError::UnknownProduct
        })?;

    engine.grant(user_id, &grant).map_err(|e| match e {
        EngineError::Store(e) => IngestError::Store(e),
        EngineError::UserNotFound => IngestError::UserNotFound,
    })?;

    if let Some(sale_id) = sale_id {
        db.record_sale(sale_id, &user.id, grant.kind.as_str(), &now.to_rfc3339())
            .map_err(IngestError::Store)?;
    }

    info!(email = %event.purchaser_email, plan = grant.kind.as_str(), "purchase applied");
    Ok(GrantApplied { user_id, plan: grant.kind, replayed: false })
}

/// HMAC-SHA256 over the raw payload, hex-encoded. Comparison is constant
/// time via `verify_slice`.
pub fn verify_signature(secret: &str, signature_hex: &str, body: &[u8]) -> bool {
    let Ok(sig) = hex::decode(signature_hex.trim()) else {
        return false;
    };
    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&sig).is_ok()
}

/// POST /webhooks/payment — inbound purchase notification. Signature
/// verification runs over the raw body, before any parsing, whenever a
/// shared secret is configured.
pub async fn handle(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    if let Some(secret) = &state.webhook_secret {
        let signature = headers
            .get(SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or(ApiError::Unauthorized)?;
        if !verify_signature(secret, signature, &body) {
            warn!("webhook signature mismatch");
            return Err(ApiError::Unauthorized);
        }
    }

    let event: PurchaseEvent = serde_json::from_slice(&body)
        .map_err(|_| ApiError::Validation("missing or malformed purchase fields".into()))?;

    // Run blocking DB work off the async runtime
    let state = state.clone();
    let applied = tokio::task::spawn_blocking(move || {
        ingest(&state.db, &state.engine, &state.classifier, &event, Utc::now())
    })
    .await
    .map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        ApiError::Store(anyhow::anyhow!("join error: {e}"))
    })??;

    Ok(Json(WebhookAck {
        success: true,
        user_id: applied.user_id,
        plan_type: applied.plan,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn setup() -> (Arc<Database>, EntitlementEngine, Classifier) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let engine = EntitlementEngine::new(db.clone());
        (db, engine, Classifier::new("1.00"))
    }

    fn seed_user(db: &Database, email: &str, role: &str) -> Uuid {
        let id = Uuid::new_v4();
        db.create_user(&id.to_string(), "Test", email, "hash", role, &Utc::now().to_rfc3339())
            .unwrap();
        id
    }

    fn event(email: &str, product: &str, sale_id: Option<&str>) -> PurchaseEvent {
        PurchaseEvent {
            purchaser_email: email.into(),
            product_name: product.into(),
            sale_id: sale_id.map(Into::into),
            sale_timestamp: None,
            price: Some("10.00".into()),
        }
    }

    #[test]
    fn unknown_purchaser_leaves_store_untouched() {
        let (db, engine, classifier) = setup();
        let giver = seed_user(&db, "present@example.com", "giver");

        let err = ingest(
            &db,
            &engine,
            &classifier,
            &event("absent@example.com", "Idea Giver Unlimited", Some("S-1")),
            Utc::now(),
        )
        .unwrap_err();
        assert!(matches!(err, IngestError::UserNotFound));

        // no grant landed anywhere, and the sale was not recorded
        let row = db.get_user_by_id(&giver.to_string()).unwrap().unwrap();
        assert!(row.plan.is_none());
        assert!(db.get_processed_sale("S-1").unwrap().is_none());
    }

    #[test]
    fn unknown_product_applies_nothing() {
        let (db, engine, classifier) = setup();
        let giver = seed_user(&db, "g@example.com", "giver");

        let err = ingest(
            &db,
            &engine,
            &classifier,
            &event("g@example.com", "Mystery Box", Some("S-2")),
            Utc::now(),
        )
        .unwrap_err();
        assert!(matches!(err, IngestError::UnknownProduct));

        let row = db.get_user_by_id(&giver.to_string()).unwrap().unwrap();
        assert!(row.plan.is_none());
        assert!(db.get_processed_sale("S-2").unwrap().is_none());
    }

    #[test]
    fn malformed_payload_rejected() {
        let (db, engine, classifier) = setup();
        let err = ingest(
            &db,
            &engine,
            &classifier,
            &event("", "Idea Giver Unlimited", None),
            Utc::now(),
        )
        .unwrap_err();
        assert!(matches!(err, IngestError::MalformedPayload));
    }

    #[test]
    fn email_match_ignores_case() {
        let (db, engine, classifier) = setup();
        let giver = seed_user(&db, "Giver@Example.com", "giver");

        let applied = ingest(
            &db,
            &engine,
            &classifier,
            &event("giver@example.com", "Idea Giver Unlimited", None),
            Utc::now(),
        )
        .unwrap();
        assert_eq!(applied.user_id, giver);
        assert_eq!(applied.plan, PlanKind::Unlimited);
        assert!(!applied.replayed);
    }

    #[test]
    fn replayed_sale_does_not_rearm_consumed_plan() {
        let (db, engine, classifier) = setup();
        let giver = seed_user(&db, "g@example.com", "giver");
        let ev = event("g@example.com", "Single Idea Purchase", Some("S-3"));

        let applied = ingest(&db, &engine, &classifier, &ev, Utc::now()).unwrap();
        assert_eq!(applied.plan, PlanKind::Single);

        // the single use is spent
        assert!(engine.consume(giver).unwrap());

        // provider re-sends the same notification
        let applied = ingest(&db, &engine, &classifier, &ev, Utc::now()).unwrap();
        assert!(applied.replayed);
        assert_eq!(applied.user_id, giver);

        let row = db.get_user_by_id(&giver.to_string()).unwrap().unwrap();
        assert!(!row.is_entitled);
    }

    #[test]
    fn signature_round_trip_and_tamper() {
        let secret = "shhh";
        let body = br#"{"purchaser_email":"g@example.com"}"#;

        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        let sig = hex::encode(mac.finalize().into_bytes());

        assert!(verify_signature(secret, &sig, body));
        assert!(!verify_signature(secret, &sig, b"tampered body"));
        assert!(!verify_signature("other-secret", &sig, body));
        assert!(!verify_signature(secret, "not-hex!", body));
    }
}
