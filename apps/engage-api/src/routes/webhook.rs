use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::Router;

use crate::error::{ApiError, ApiErrorBody, EngageError};
use crate::lifecycle::coordinator;
use crate::lifecycle::events::WebhookEvent;
use crate::lifecycle::signature;
use crate::AppState;

/// Header carrying the hex HMAC-SHA256 of the raw body.
pub const SIGNATURE_HEADER: &str = "x-signature";

pub fn router() -> Router<AppState> {
    Router::new().route("/webhook/stream", post(stream_webhook))
}

/// `POST /webhook/stream` - Receive a call-lifecycle event from the video
/// provider.
///
/// The event is applied before the response is sent. Handler failures are
/// logged and still answered with 200 so the provider does not retry.
#[utoipa::path(
    post,
    path = "/webhook/stream",
    tag = "Webhooks",
    request_body(content = String, description = "Provider event JSON", content_type = "application/json"),
    params(
        ("x-signature" = String, Header, description = "Hex HMAC-SHA256 of the body"),
    ),
    responses(
        (status = 200, description = "Event accepted"),
        (status = 400, description = "Malformed event", body = ApiErrorBody),
        (status = 401, description = "Bad signature", body = ApiErrorBody),
    ),
)]
pub async fn stream_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::unauthorized("Missing signature"))?;

    if !signature::verify(&state.config.stream_api_secret, &body, signature) {
        return Err(ApiError::unauthorized("Invalid signature"));
    }

    let event = WebhookEvent::decode(&body)?;
    let kind = event.kind.clone();

    match coordinator::dispatch(&state, event).await {
        Ok(()) => {}
        Err(e @ EngageError::Persistence(_)) => {
            tracing::error!(kind = %kind, error = %e, "call event persistence failed");
        }
        Err(e) => {
            tracing::warn!(kind = %kind, error = %e, "call event dropped");
        }
    }

    Ok(StatusCode::OK)
}
