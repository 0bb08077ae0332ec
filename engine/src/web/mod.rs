//! HTTP surface: provider webhook endpoint, open/click tracking and the
//! health check.

pub mod handlers;
pub mod signature;
pub mod tracking;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

pub use handlers::{AppState, EventsResponse, HealthResponse};
pub use signature::{is_signature_verification_enabled, verify_webhook_signature};
pub use tracking::{decode_token, encode_token};

/// Build the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/webhooks/events", post(handlers::provider_events))
        .route("/t/open/:token", get(handlers::track_open))
        .route("/t/click/:token", get(handlers::track_click))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
