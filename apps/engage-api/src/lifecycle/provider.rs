//! Outbound calls to the video provider.

use async_trait::async_trait;
use chrono::Utc;
use jsonwebtoken::{EncodingKey, Header};
use serde::Serialize;

use crate::config::Config;
use crate::error::EngageError;

/// Call type every session is created under.
pub const CALL_TYPE: &str = "default";

/// Side effects the coordinator asks of the video provider.
#[async_trait]
pub trait CallProvider: Send + Sync {
    /// Begin the English caption feed for a call.
    async fn start_closed_captions(&self, call_id: &str) -> Result<(), EngageError>;
    /// End a call for everyone still in it.
    async fn end_call(&self, call_id: &str) -> Result<(), EngageError>;
}

#[derive(Serialize)]
struct ServerClaims {
    server: bool,
    iat: i64,
}

#[derive(Serialize)]
struct CaptionRequest<'a> {
    language: &'a str,
}

/// `CallProvider` against the Stream video REST API.
#[derive(Clone)]
pub struct StreamVideoClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    key: EncodingKey,
}

impl StreamVideoClient {
    pub fn new(config: &Config) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: config.stream_base_url.trim_end_matches('/').to_string(),
            api_key: config.stream_api_key.clone(),
            key: EncodingKey::from_secret(config.stream_api_secret.as_bytes()),
        }
    }

    fn server_token(&self) -> Result<String, EngageError> {
        let claims = ServerClaims {
            server: true,
            iat: Utc::now().timestamp(),
        };
        jsonwebtoken::encode(&Header::default(), &claims, &self.key)
            .map_err(|e| EngageError::CallProvider(format!("failed to sign server token: {e}")))
    }

    async fn post<B: Serialize + Sync>(&self, call_id: &str, action: &str, body: &B) -> Result<(), EngageError> {
        let url = format!("{}/video/call/{CALL_TYPE}/{call_id}/{action}", self.base_url);

        let resp = self
            .http
            .post(&url)
            .query(&[("api_key", self.api_key.as_str())])
            .header("Authorization", self.server_token()?)
            .header("stream-auth-type", "jwt")
            .json(body)
            .send()
            .await
            .map_err(|e| EngageError::CallProvider(format!("{action} request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let detail = resp.text().await.unwrap_or_default();
            return Err(EngageError::CallProvider(format!("{action} returned {status}: {detail}")));
        }
        Ok(())
    }
}

#[async_trait]
impl CallProvider for StreamVideoClient {
    async fn start_closed_captions(&self, call_id: &str) -> Result<(), EngageError> {
        self.post(call_id, "start_closed_captions", &CaptionRequest { language: "en" })
            .await
    }

    async fn end_call(&self, call_id: &str) -> Result<(), EngageError> {
        self.post(call_id, "mark_ended", &serde_json::json!({})).await
    }
}
