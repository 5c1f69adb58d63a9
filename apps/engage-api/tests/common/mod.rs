use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::Router;
use jsonwebtoken::{EncodingKey, Header};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use engage_api::auth::tokens::{AccessClaims, TokenVerifier};
use engage_api::config::Config;
use engage_api::db::store::{EngagementStore, MemoryStore};
use engage_api::error::EngageError;
use engage_api::gateway::connections::ConnectionDirectory;
use engage_api::gateway::registry::SessionRegistry;
use engage_api::lifecycle::provider::CallProvider;
use engage_api::models::session::SessionStart;
use engage_api::recommend::oracle::TextOracle;
use engage_api::recommend::scheduler::SchedulerHandle;
use engage_api::AppState;

pub const JWT_SECRET: &str = "test-jwt-secret";
pub const STREAM_SECRET: &str = "test-stream-secret";

/// Reply the scripted oracle gives once its queue is empty.
pub const DEFAULT_REPLY: &str = "Engagement is steady, so keep the discussion moving.";

pub fn test_config() -> Config {
    Config {
        database_url: "postgres://localhost/engage_test".to_string(),
        auth_jwt_secret: JWT_SECRET.to_string(),
        stream_api_key: "test-key".to_string(),
        stream_api_secret: STREAM_SECRET.to_string(),
        stream_base_url: "http://127.0.0.1:9".to_string(),
        gemini_api_key: "test-gemini".to_string(),
        gemini_model: "test-model".to_string(),
        gemini_base_url: "http://127.0.0.1:9".to_string(),
        oracle_timeout_secs: 1,
        // Long enough that spawned schedulers never tick during a test.
        recommendation_interval_secs: 3600,
        client_url: None,
        port: 0,
    }
}

/// Oracle that answers from a queue and records every call.
#[derive(Default)]
pub struct ScriptedOracle {
    replies: Mutex<VecDeque<Result<String, String>>>,
    calls: Mutex<Vec<(String, String)>>,
}

impl ScriptedOracle {
    pub fn reply(&self, text: &str) {
        self.replies.lock().push_back(Ok(text.to_string()));
    }

    pub fn fail(&self, reason: &str) {
        self.replies.lock().push_back(Err(reason.to_string()));
    }

    /// `(system_instruction, prompt)` pairs in call order.
    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl TextOracle for ScriptedOracle {
    async fn generate(&self, system_instruction: &str, prompt: &str) -> Result<String, EngageError> {
        self.calls
            .lock()
            .push((system_instruction.to_string(), prompt.to_string()));
        match self.replies.lock().pop_front() {
            Some(Ok(text)) => Ok(text),
            Some(Err(reason)) => Err(EngageError::Oracle(reason)),
            None => Ok(DEFAULT_REPLY.to_string()),
        }
    }
}

/// Call provider that records requests instead of sending them.
#[derive(Default)]
pub struct RecordingProvider {
    pub captions_started: Mutex<Vec<String>>,
    pub calls_ended: Mutex<Vec<String>>,
    fail: AtomicBool,
}

impl RecordingProvider {
    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), EngageError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(EngageError::CallProvider("provider unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl CallProvider for RecordingProvider {
    async fn start_closed_captions(&self, call_id: &str) -> Result<(), EngageError> {
        self.check()?;
        self.captions_started.lock().push(call_id.to_string());
        Ok(())
    }

    async fn end_call(&self, call_id: &str) -> Result<(), EngageError> {
        self.check()?;
        self.calls_ended.lock().push(call_id.to_string());
        Ok(())
    }
}

/// App state plus typed handles on its test doubles.
pub struct TestContext {
    pub state: AppState,
    pub store: Arc<MemoryStore>,
    pub oracle: Arc<ScriptedOracle>,
    pub calls: Arc<RecordingProvider>,
}

pub fn test_context() -> TestContext {
    let config = test_config();
    let store = Arc::new(MemoryStore::new());
    let oracle = Arc::new(ScriptedOracle::default());
    let calls = Arc::new(RecordingProvider::default());

    let state = AppState {
        store: store.clone(),
        oracle: oracle.clone(),
        calls: calls.clone(),
        verifier: TokenVerifier::new(&config.auth_jwt_secret),
        sessions: Arc::new(SessionRegistry::new()),
        connections: Arc::new(ConnectionDirectory::new()),
        config: Arc::new(config),
    };

    TestContext {
        state,
        store,
        oracle,
        calls,
    }
}

/// Build the full application router wired to the test state.
pub fn test_app(ctx: &TestContext) -> Router {
    engage_api::routes::router().with_state(ctx.state.clone())
}

/// Mint a client access token for `user_id`, valid for five minutes.
pub fn mint_token(user_id: &str, email: Option<&str>) -> String {
    mint_with_expiry(user_id, email, chrono::Duration::seconds(300))
}

pub fn mint_expired_token(user_id: &str) -> String {
    mint_with_expiry(user_id, None, chrono::Duration::seconds(-300))
}

fn mint_with_expiry(user_id: &str, email: Option<&str>, ttl: chrono::Duration) -> String {
    let claims = AccessClaims {
        sub: user_id.to_string(),
        exp: (chrono::Utc::now() + ttl).timestamp(),
        email: email.map(str::to_string),
    };
    jsonwebtoken::encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(JWT_SECRET.as_bytes()),
    )
    .expect("mint test token")
}

/// Register, persist, and activate a session without going through webhooks.
///
/// The scheduler slot gets an idle task so ticks only run when a test calls
/// `run_tick` itself.
pub async fn open_session(ctx: &TestContext, session_id: &str, members: &[&str]) {
    let start = SessionStart {
        id: session_id.to_string(),
        channel_id: "ch_test".to_string(),
        initiated_by: members.first().copied().unwrap_or("host").to_string(),
        starts_at: chrono::Utc::now(),
    };
    ctx.state
        .sessions
        .create_session(start.clone(), members.iter().map(|m| m.to_string()))
        .expect("create session");
    ctx.store.create_session(&start).await.expect("persist session");
    ctx.state
        .sessions
        .activate_session(session_id, || {
            SchedulerHandle::new(CancellationToken::new(), tokio::spawn(async {}))
        })
        .expect("activate session");
}

/// Engagement sample frame as a client sends it.
pub fn sample_frame(score: f64) -> String {
    serde_json::json!({
        "timestamp": chrono::Utc::now().timestamp_millis(),
        "features": [[0.1, 0.2], [0.3, 0.4]],
        "engagementScore": score,
    })
    .to_string()
}

/// Start a real TCP server for WebSocket testing. Runs in the background.
pub async fn start_ws_server(ctx: &TestContext) -> SocketAddr {
    let app = test_app(ctx);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    addr
}

/// Poll until `check` holds, panicking after two seconds.
pub async fn wait_until(mut check: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(2);
    while !check() {
        assert!(tokio::time::Instant::now() < deadline, "condition not reached in time");
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
}
