use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};

pub mod admin;
pub mod auth;
pub mod recipes;
pub mod system;

/// Largest accepted generation request; photos arrive base64-encoded.
pub const MAX_IMAGE_REQUEST_BYTES: usize = 10 * 1024 * 1024;

/// Endpoints reachable without a bearer token.
pub fn public_router() -> Router {
    Router::new()
        .route("/auth/password-reset", post(auth::request_password_reset))
        // EventSource cannot send an Authorization header; the client id is the capability.
        .route("/recipes/generate/stream/:client_id", get(recipes::stream))
}

/// Router for all authenticated endpoints.
pub fn protected_router() -> Router {
    Router::new()
        .route("/auth/verify-email", post(auth::request_email_verification))
        .route(
            "/recipes/generate",
            post(recipes::generate).layer(DefaultBodyLimit::max(MAX_IMAGE_REQUEST_BYTES)),
        )
        .nest("/admin", admin::router())
}
