//! HTTP endpoint handlers.
//!
//! The webhook endpoint does the full classify/record/suppress pass
//! inline; processing is in-memory and cheap, so there is no enqueue
//! hop. The tracking endpoints always answer with their artifact (pixel
//! or redirect) and degrade gracefully on bad tokens: a broken image or
//! a failed redirect in a recipient's mail client is worse than a lost
//! event.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Redirect, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::model::{CampaignEvent, EventType};
use crate::reconcile::Reconciler;
use crate::store::MemoryStore;
use crate::web::signature::{is_signature_verification_enabled, verify_webhook_signature};
use crate::web::tracking::decode_token;
use crate::webhook::{IngestSummary, WebhookProcessor};
use crate::Config;

/// 1×1 transparent GIF served by the open-tracking beacon.
const PIXEL_GIF: &[u8] = &[
    0x47, 0x49, 0x46, 0x38, 0x39, 0x61, 0x01, 0x00, 0x01, 0x00, 0x80, 0x00, 0x00, 0x00, 0x00,
    0x00, 0xff, 0xff, 0xff, 0x21, 0xf9, 0x04, 0x01, 0x00, 0x00, 0x00, 0x00, 0x2c, 0x00, 0x00,
    0x00, 0x00, 0x01, 0x00, 0x01, 0x00, 0x00, 0x02, 0x02, 0x44, 0x01, 0x00, 0x3b,
];

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<MemoryStore>,
    pub reconciler: Reconciler,
    pub processor: Arc<WebhookProcessor>,
}

impl AppState {
    pub fn new(
        config: Arc<Config>,
        store: Arc<MemoryStore>,
        reconciler: Reconciler,
        processor: Arc<WebhookProcessor>,
    ) -> Self {
        Self {
            config,
            store,
            reconciler,
            processor,
        }
    }
}

// =============================================================================
// Health Check
// =============================================================================

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

// =============================================================================
// Provider Events Webhook
// =============================================================================

/// Webhook endpoint response.
#[derive(Serialize)]
pub struct EventsResponse {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed: Option<IngestSummary>,
}

/// Delivery-status webhook endpoint.
///
/// Accepts a single event object, a bare array, or `{"events": [...]}`.
/// Individual unmappable events are dropped without failing the request;
/// only a missing/invalid signature or an unparsable body is an error.
pub async fn provider_events(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<Value>,
) -> impl IntoResponse {
    if is_signature_verification_enabled(&state.config.webhook_signing_key) {
        let signing_key = state.config.webhook_signing_key.as_deref().unwrap_or("");
        let timestamp = header_str(&headers, "x-webhook-timestamp");
        let token = header_str(&headers, "x-webhook-token");
        let signature = header_str(&headers, "x-webhook-signature");

        if !verify_webhook_signature(
            signing_key,
            timestamp,
            token,
            signature,
            state.config.webhook_signature_max_age,
        ) {
            warn!("webhook_signature_invalid");
            return (
                StatusCode::UNAUTHORIZED,
                Json(EventsResponse {
                    status: "unauthorized",
                    processed: None,
                }),
            );
        }
    }

    let summary = state.processor.ingest(&payload);

    (
        StatusCode::OK,
        Json(EventsResponse {
            status: "ok",
            processed: Some(summary),
        }),
    )
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> &'a str {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
}

// =============================================================================
// Tracking Endpoints
// =============================================================================

/// Open-tracking beacon. Always serves the pixel, whatever the token.
pub async fn track_open(State(state): State<AppState>, Path(token): Path<String>) -> Response {
    if let Some((campaign_id, contact_id)) =
        decode_token(&state.config.tracking_signing_key, &token)
    {
        let tracked = state
            .store
            .campaign(campaign_id)
            .map(|c| c.settings.track_opens)
            .unwrap_or(false);
        if tracked {
            state.reconciler.apply(CampaignEvent::new(
                campaign_id,
                Some(contact_id),
                EventType::Opened,
            ));
            info!(campaign_id = %campaign_id, contact_id = %contact_id, "open_tracked");
        }
    } else {
        warn!("open_tracking_invalid_token");
    }

    (
        [
            (header::CONTENT_TYPE, "image/gif"),
            (header::CACHE_CONTROL, "no-store, max-age=0"),
        ],
        PIXEL_GIF,
    )
        .into_response()
}

#[derive(Deserialize)]
pub struct ClickParams {
    /// Original destination URL
    pub u: Option<String>,
}

/// Click-tracking redirect.
///
/// Records a `clicked` event and forwards the browser to the original
/// URL. Only http/https destinations are accepted; the redirect happens
/// even when the token is invalid.
pub async fn track_click(
    State(state): State<AppState>,
    Path(token): Path<String>,
    Query(params): Query<ClickParams>,
) -> Response {
    let Some(destination) = params.u.as_deref().filter(|u| is_valid_destination(u)) else {
        warn!(url = ?params.u, "click_tracking_invalid_url");
        return StatusCode::BAD_REQUEST.into_response();
    };

    if let Some((campaign_id, contact_id)) =
        decode_token(&state.config.tracking_signing_key, &token)
    {
        let tracked = state
            .store
            .campaign(campaign_id)
            .map(|c| c.settings.track_clicks)
            .unwrap_or(false);
        if tracked {
            state.reconciler.apply(
                CampaignEvent::new(campaign_id, Some(contact_id), EventType::Clicked)
                    .with_raw(serde_json::json!({ "url": destination })),
            );
            info!(campaign_id = %campaign_id, contact_id = %contact_id, "click_tracked");
        }
    } else {
        warn!("click_tracking_invalid_token");
    }

    Redirect::temporary(destination).into_response()
}

fn is_valid_destination(raw: &str) -> bool {
    match url::Url::parse(raw) {
        Ok(url) => matches!(url.scheme(), "http" | "https"),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_destination_validation() {
        assert!(is_valid_destination("https://example.com/offer?id=1"));
        assert!(is_valid_destination("http://example.com"));
        assert!(!is_valid_destination("javascript:alert(1)"));
        assert!(!is_valid_destination("ftp://example.com"));
        assert!(!is_valid_destination("not a url"));
        assert!(!is_valid_destination(""));
    }
}
