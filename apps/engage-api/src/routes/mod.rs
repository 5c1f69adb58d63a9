pub mod health;
pub mod webhook;

use axum::Router;
use utoipa::OpenApi;

use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .merge(health::router())
        .merge(webhook::router())
        .merge(crate::gateway::server::router())
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health,
        webhook::stream_webhook,
    ),
    components(
        schemas(
            crate::error::ApiErrorBody,
            crate::error::ApiErrorDetail,
            crate::models::session::Session,
            health::HealthResponse,
        )
    ),
    tags(
        (name = "Health", description = "Health check"),
        (name = "Webhooks", description = "Call lifecycle events"),
    )
)]
pub struct ApiDoc;
