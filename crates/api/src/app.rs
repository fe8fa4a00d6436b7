use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{DefaultBodyLimit, Extension},
    http::StatusCode,
    routing::{get, post},
    Router,
};

use conveyor_auth::{CredentialVerifier, Hs256Tokens};
use conveyor_core::MAX_PDF_SIZE;
use conveyor_infra::{JobProducer, JobStore, LocalStorage, StatusCache};

/// Base64 expands bytes by ~4/3; leave headroom for JSON framing around it.
const JSON_BODY_LIMIT: usize = (MAX_PDF_SIZE * 2) + 4096;

/// Shared dependencies, passed in at construction (no process globals).
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn JobStore>,
    pub cache: Arc<dyn StatusCache>,
    pub producer: Arc<dyn JobProducer>,
    pub storage: Arc<LocalStorage>,
    pub tokens: Arc<Hs256Tokens>,
    pub credentials: Arc<dyn CredentialVerifier>,
    /// TTL for staged payloads, results, and staged files.
    pub staging_ttl: Duration,
}

pub fn build_app(state: AppState) -> Router {
    let auth_state = crate::middleware::AuthState {
        tokens: state.tokens.clone(),
    };

    // Protected routes: require a verified bearer token.
    let protected = Router::new()
        .route(
            "/jobs",
            post(crate::routes::jobs::create_job).get(crate::routes::jobs::list_jobs),
        )
        .route("/jobs/:id", get(crate::routes::jobs::get_job))
        .route(
            "/jobs/parse-document",
            post(crate::routes::parse::create_parse_job),
        )
        .layer(axum::middleware::from_fn_with_state(
            auth_state,
            crate::middleware::auth_middleware,
        ));

    let api = Router::new()
        .route("/login", post(crate::routes::auth::login))
        .merge(protected);

    Router::new()
        .route("/health", get(health))
        .nest("/api", api)
        .layer(Extension(Arc::new(state)))
        .layer(DefaultBodyLimit::max(JSON_BODY_LIMIT))
}

async fn health() -> StatusCode {
    StatusCode::OK
}
