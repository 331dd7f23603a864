use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post, put},
};
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use pitchroom_api::middleware::require_auth;
use pitchroom_api::{AppState, AppStateInner, auth, conversations, ideas, webhook};
use pitchroom_entitlements::{Classifier, EntitlementEngine};
use pitchroom_media::MediaStore;

/// Uploaded pitch videos are capped at 100 MB.
const MAX_VIDEO_BYTES: usize = 100 * 1024 * 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pitchroom=debug,tower_http=debug".into()),
        )
        .init();

    // Config — read once here, injected everywhere
    let jwt_secret =
        std::env::var("PITCHROOM_JWT_SECRET").unwrap_or_else(|_| "dev-secret-change-me".into());
    if jwt_secret == "dev-secret-change-me" {
        warn!("PITCHROOM_JWT_SECRET is unset; using the dev placeholder");
    }
    let webhook_secret = std::env::var("PITCHROOM_WEBHOOK_SECRET")
        .ok()
        .filter(|s| !s.is_empty());
    match &webhook_secret {
        Some(_) => info!("payment webhook signature verification: enabled"),
        None => warn!(
            "payment webhook signature verification: DISABLED (PITCHROOM_WEBHOOK_SECRET unset)"
        ),
    }
    let single_price =
        std::env::var("PITCHROOM_SINGLE_PRICE").unwrap_or_else(|_| "1.00".into());
    let db_path = std::env::var("PITCHROOM_DB_PATH").unwrap_or_else(|_| "pitchroom.db".into());
    let media_dir: PathBuf = std::env::var("PITCHROOM_MEDIA_DIR")
        .unwrap_or_else(|_| "./media".into())
        .into();
    let media_base_url = std::env::var("PITCHROOM_MEDIA_BASE_URL")
        .unwrap_or_else(|_| "http://localhost:3400/media".into());
    let host = std::env::var("PITCHROOM_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("PITCHROOM_PORT")
        .unwrap_or_else(|_| "3400".into())
        .parse()?;

    // Init stores
    let db = Arc::new(pitchroom_db::Database::open(&PathBuf::from(&db_path))?);
    let media = Arc::new(MediaStore::new(media_dir.clone(), media_base_url).await?);

    // Shared state
    let state: AppState = Arc::new(AppStateInner {
        db: db.clone(),
        engine: EntitlementEngine::new(db),
        classifier: Classifier::new(single_price),
        media,
        jwt_secret,
        webhook_secret,
    });

    // Routes
    let public_routes = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/webhooks/payment", post(webhook::handle))
        .route("/ideas", get(ideas::list_ideas))
        .with_state(state.clone());

    let protected_routes = Router::new()
        .route(
            "/ideas/video",
            put(ideas::upload_video).layer(DefaultBodyLimit::max(MAX_VIDEO_BYTES)),
        )
        .route("/ideas", post(ideas::submit_idea))
        .route("/conversations", get(conversations::list_threads))
        .route("/conversations/{giver_id}", post(conversations::start))
        .route(
            "/conversations/{peer_id}/messages",
            get(conversations::get_messages).post(conversations::send_reply),
        )
        .layer(middleware::from_fn_with_state(state.clone(), require_auth))
        .with_state(state);

    let app = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .nest_service("/media", ServeDir::new(media_dir))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("pitchroom server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
