pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod gateway;
pub mod lifecycle;
pub mod models;
pub mod recommend;
pub mod routes;

use std::sync::Arc;

use auth::tokens::TokenVerifier;
use config::Config;
use db::store::EngagementStore;
use gateway::connections::ConnectionDirectory;
use gateway::registry::SessionRegistry;
use lifecycle::provider::CallProvider;
use recommend::oracle::TextOracle;

/// Shared application state available to all route handlers and tasks.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn EngagementStore>,
    pub oracle: Arc<dyn TextOracle>,
    pub calls: Arc<dyn CallProvider>,
    pub verifier: TokenVerifier,
    pub sessions: Arc<SessionRegistry>,
    pub connections: Arc<ConnectionDirectory>,
    pub config: Arc<Config>,
}
