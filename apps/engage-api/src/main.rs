use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use axum::http::HeaderValue;
use axum::Router;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use engage_api::auth::tokens::TokenVerifier;
use engage_api::config::Config;
use engage_api::db::pg_store::PgStore;
use engage_api::gateway::connections::ConnectionDirectory;
use engage_api::gateway::registry::SessionRegistry;
use engage_api::lifecycle::provider::StreamVideoClient;
use engage_api::recommend::oracle::GeminiClient;
use engage_api::AppState;

#[tokio::main]
async fn main() {
    // Load .env file (silently skip if missing; env vars may be set externally)
    if dotenvy::dotenv().is_err() {
        let env_path = Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
        let _ = dotenvy::from_path(env_path);
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    let port = config.port;

    let db = engage_api::db::pool::connect(&config.database_url).await;

    tracing::info!(
        model = %config.gemini_model,
        interval_secs = config.recommendation_interval_secs,
        "engage-api configured"
    );

    let state = AppState {
        store: Arc::new(PgStore::new(db)),
        oracle: Arc::new(GeminiClient::new(&config)),
        calls: Arc::new(StreamVideoClient::new(&config)),
        verifier: TokenVerifier::new(&config.auth_jwt_secret),
        sessions: Arc::new(SessionRegistry::new()),
        connections: Arc::new(ConnectionDirectory::new()),
        config: Arc::new(config),
    };

    let origin = match state
        .config
        .client_url
        .as_deref()
        .and_then(|url| HeaderValue::from_str(url).ok())
    {
        Some(url) => AllowOrigin::exact(url),
        None => AllowOrigin::any(),
    };
    let cors = CorsLayer::new()
        .allow_origin(origin)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .merge(engage_api::routes::router())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!(%addr, "engage-api listening");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("failed to bind");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}
