// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Provider webhook endpoint.
//!
//! The Provider is acknowledged as soon as an event is admitted; routing and
//! reconciliation continue on the task tracker.

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::HeaderMap,
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use utoipa::{IntoParams, ToSchema};

use crate::{
    error::ApiError,
    state::AppState,
    webhooks::{WebhookEvent, LEGACY_SIGNATURE_HEADER, SIGNATURE_HEADER},
};

/// Acknowledgement returned to the Provider.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct WebhookAck {
    pub received: bool,
    /// Present when the event had already been processed.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub duplicate: bool,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct ChallengeQuery {
    pub challenge: Option<String>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ChallengeResponse {
    pub challenge: String,
}

fn signature_header(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(SIGNATURE_HEADER)
        .or_else(|| headers.get(LEGACY_SIGNATURE_HEADER))
        .and_then(|v| v.to_str().ok())
}

/// Enforce the signature policy for `body`.
///
/// Production-like environments reject unverifiable deliveries; elsewhere a
/// missing key or bad signature is logged and the event is accepted.
fn authenticate(state: &AppState, headers: &HeaderMap, body: &[u8]) -> Result<(), ApiError> {
    let strict = state.app_env.is_production_like();

    let Some(verifier) = state.verifier.as_ref() else {
        if strict {
            warn!("Webhook public key is not configured");
            return Err(ApiError::internal("webhook verification is not configured"));
        }
        debug!("No webhook public key configured, skipping signature check");
        return Ok(());
    };

    let Some(header) = signature_header(headers) else {
        if strict {
            return Err(ApiError::unauthorized("missing webhook signature"));
        }
        warn!("Webhook delivered without a signature header, accepting in development");
        return Ok(());
    };

    match verifier.check(body, header, chrono::Utc::now().timestamp_millis()) {
        Ok(()) => Ok(()),
        Err(e) if strict => {
            warn!(error = %e, "Rejecting webhook with invalid signature");
            Err(ApiError::unauthorized("invalid webhook signature"))
        }
        Err(e) => {
            warn!(error = %e, "Invalid webhook signature, accepting in development");
            Ok(())
        }
    }
}

/// Receive a Provider webhook.
#[utoipa::path(
    post,
    path = "/webhooks/provider",
    tag = "Webhooks",
    request_body(content = String, content_type = "application/json", description = "Provider event envelope"),
    responses(
        (status = 200, description = "Event accepted or already processed", body = WebhookAck),
        (status = 400, description = "Envelope is missing required fields"),
        (status = 401, description = "Signature verification failed"),
        (status = 500, description = "Signature verification is not configured")
    )
)]
#[tracing::instrument(
    name = "webhook",
    skip_all,
    fields(event_id = tracing::field::Empty, event_type = tracing::field::Empty)
)]
pub async fn receive_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>, ApiError> {
    authenticate(&state, &headers, &body)?;

    let event = WebhookEvent::parse(&body).map_err(|e| ApiError::bad_request(e.to_string()))?;
    tracing::Span::current()
        .record("event_id", tracing::field::display(event.event_id.as_deref().unwrap_or("-")))
        .record("event_type", tracing::field::display(&event.event_type));

    if state
        .guard
        .seen(event.event_id.as_deref(), &event.content_fingerprint)?
    {
        info!("Duplicate webhook, already processed");
        return Ok(Json(WebhookAck {
            received: true,
            duplicate: true,
        }));
    }

    let router = state.router.clone();
    state.tasks.spawn_blocking(move || {
        router.dispatch(&event);
    });

    Ok(Json(WebhookAck {
        received: true,
        duplicate: false,
    }))
}

/// Endpoint ownership challenge.
#[utoipa::path(
    get,
    path = "/webhooks/provider",
    tag = "Webhooks",
    params(ChallengeQuery),
    responses(
        (status = 200, description = "Challenge echoed", body = ChallengeResponse),
        (status = 400, description = "No challenge given")
    )
)]
pub async fn webhook_challenge(
    Query(query): Query<ChallengeQuery>,
) -> Result<Json<ChallengeResponse>, ApiError> {
    let challenge = query
        .challenge
        .ok_or_else(|| ApiError::bad_request("challenge query parameter is required"))?;
    Ok(Json(ChallengeResponse { challenge }))
}
