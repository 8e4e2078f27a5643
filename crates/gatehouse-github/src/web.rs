//! HTTP intake for GitHub webhook deliveries.
//!
//! A single `POST /payload` route validates the HMAC signature, queues the
//! raw body on the event pipeline, and acknowledges before any mapping or
//! change refresh work happens. The host application mounts the router
//! under its own path prefix.

use std::sync::Arc;

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::Json,
    routing::post,
    Router,
};
use bytes::Bytes;
use chrono::Utc;
use serde::Serialize;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use github_app_sdk::webhook;

use crate::error::PayloadError;
use crate::pipeline::{EventPipeline, RawEvent};

/// Header naming the delivery's event type.
const EVENT_HEADER: &str = "x-github-event";

/// Header carrying GitHub's unique delivery id.
const DELIVERY_HEADER: &str = "x-github-delivery";

/// Shared state for the payload endpoint.
#[derive(Clone)]
pub struct PayloadState {
    pipeline: Arc<EventPipeline>,
    webhook_token: Option<String>,
}

impl PayloadState {
    pub fn new(pipeline: Arc<EventPipeline>, webhook_token: Option<String>) -> Self {
        Self {
            pipeline,
            webhook_token,
        }
    }
}

/// Acknowledgement for an accepted delivery.
#[derive(Debug, Serialize)]
pub struct PayloadResponse {
    pub delivery: String,
    pub status: String,
}

/// Create the webhook intake router.
pub fn payload_router(state: PayloadState) -> Router {
    Router::new()
        .route("/payload", post(receive_payload))
        .with_state(state)
}

/// Accept one webhook delivery.
///
/// The response is sent as soon as the delivery is queued; event mapping
/// and change refreshes run behind it on the pipeline tasks.
#[instrument(skip(state, headers, body))]
async fn receive_payload(
    State(state): State<PayloadState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<PayloadResponse>), PayloadError> {
    let Some(token) = state.webhook_token.as_deref() else {
        warn!("received payload but no webhook token is configured");
        return Err(PayloadError::TokenNotConfigured);
    };
    webhook::validate_signature(token, &body, header_value(&headers, webhook::SIGNATURE_HEADER))?;

    let Some(event_type) = header_value(&headers, EVENT_HEADER) else {
        debug!("delivery does not name an event type");
        return Err(PayloadError::MissingEventHeader);
    };
    let event_type = event_type.to_string();

    // GitHub always sends a delivery id; a generated one keeps log
    // correlation working for hand-made requests.
    let delivery_id = header_value(&headers, DELIVERY_HEADER)
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    debug!(delivery = %delivery_id, event = %event_type, "webhook received");

    let raw = RawEvent {
        delivery_id: delivery_id.clone(),
        event_type,
        body,
        received_at: Utc::now(),
    };
    state
        .pipeline
        .enqueue(raw)
        .await
        .map_err(|_| PayloadError::IntakeUnavailable)?;

    Ok((
        StatusCode::ACCEPTED,
        Json(PayloadResponse {
            delivery: delivery_id,
            status: "queued".to_string(),
        }),
    ))
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

#[cfg(test)]
#[path = "web_tests.rs"]
mod tests;
