//! Router construction

use axum::{
    extract::DefaultBodyLimit,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use std::any::Any;
use std::sync::Arc;
use tower_http::{catch_panic::CatchPanicLayer, cors::CorsLayer, trace::TraceLayer};
use tracing::error;

use super::handlers;
use crate::error::ErrorResponse;
use crate::middleware::auth::AuthLayer;
use crate::AppState;

/// Build the application router
pub fn create_router(state: Arc<AppState>) -> Router {
    let auth = AuthLayer::new(state.settings.auth.api_key().map(String::from));
    let body_limit = state.settings.server.max_body_bytes;

    Router::new()
        .route("/", get(handlers::index))
        .route("/health", get(handlers::health))
        .route("/v1/caption", post(handlers::v1_caption))
        .route("/v1/query", post(handlers::v1_query))
        .route("/caption", post(handlers::upload_caption))
        .route("/identify", post(handlers::upload_identify))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(auth)
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// A handler panic still gets a JSON 500.
fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let message = if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "Unexpected server error".to_string()
    };
    error!(panic = %message, "Request handler panicked");

    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse { error: message }),
    )
        .into_response()
}
