//! Generative-text oracle: a structured prompt in, natural-language text out.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::EngageError;

/// Anything that can turn an instruction and a prompt into text.
///
/// Fallible and slow; callers always have a fallback string ready.
#[async_trait]
pub trait TextOracle: Send + Sync {
    async fn generate(&self, system_instruction: &str, prompt: &str) -> Result<String, EngageError>;
}

// ---------------------------------------------------------------------------
// Gemini REST client
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ThinkingConfig {
    thinking_budget: u32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    thinking_config: ThinkingConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    system_instruction: Content,
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

impl GenerateResponse {
    /// Concatenated text of the first candidate, trimmed.
    fn text(&self) -> Option<String> {
        let content = self.candidates.first()?.content.as_ref()?;
        let text: String = content
            .parts
            .iter()
            .filter_map(|p| p.text.as_deref())
            .collect();
        let text = text.trim();
        (!text.is_empty()).then(|| text.to_string())
    }
}

/// `TextOracle` backed by the Gemini `generateContent` endpoint.
#[derive(Clone)]
pub struct GeminiClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
    api_key: String,
    timeout: Duration,
}

impl GeminiClient {
    pub fn new(config: &Config) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: config.gemini_base_url.trim_end_matches('/').to_string(),
            model: config.gemini_model.clone(),
            api_key: config.gemini_api_key.clone(),
            timeout: Duration::from_secs(config.oracle_timeout_secs),
        }
    }

    async fn request(&self, body: &GenerateRequest) -> Result<String, EngageError> {
        let url = format!("{}/v1beta/models/{}:generateContent", self.base_url, self.model);

        let resp = self
            .http
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
            .json(body)
            .send()
            .await
            .map_err(|e| EngageError::Oracle(format!("request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(EngageError::Oracle(format!("status {status}")));
        }

        let parsed: GenerateResponse = resp
            .json()
            .await
            .map_err(|e| EngageError::Oracle(format!("unreadable response: {e}")))?;

        parsed
            .text()
            .ok_or_else(|| EngageError::Oracle("response carried no text".to_string()))
    }
}

#[async_trait]
impl TextOracle for GeminiClient {
    async fn generate(&self, system_instruction: &str, prompt: &str) -> Result<String, EngageError> {
        let body = GenerateRequest {
            system_instruction: Content {
                role: None,
                parts: vec![Part {
                    text: Some(system_instruction.to_string()),
                }],
            },
            contents: vec![Content {
                role: Some("user".to_string()),
                parts: vec![Part {
                    text: Some(prompt.to_string()),
                }],
            }],
            generation_config: GenerationConfig {
                thinking_config: ThinkingConfig { thinking_budget: 0 },
            },
        };

        tokio::time::timeout(self.timeout, self.request(&body))
            .await
            .map_err(|_| EngageError::Oracle(format!("timed out after {:?}", self.timeout)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_and_trims_candidate_parts() {
        let resp: GenerateResponse = serde_json::from_value(serde_json::json!({
            "candidates": [{
                "content": { "role": "model", "parts": [{ "text": "  Try a " }, { "text": "quick poll.\n" }] }
            }]
        }))
        .unwrap();
        assert_eq!(resp.text().as_deref(), Some("Try a quick poll."));
    }

    #[test]
    fn blank_or_missing_text_is_none() {
        let blank: GenerateResponse = serde_json::from_value(serde_json::json!({
            "candidates": [{ "content": { "parts": [{ "text": "   " }] } }]
        }))
        .unwrap();
        assert!(blank.text().is_none());

        let empty: GenerateResponse = serde_json::from_value(serde_json::json!({})).unwrap();
        assert!(empty.text().is_none());
    }

    #[test]
    fn request_uses_camel_case_fields() {
        let body = GenerateRequest {
            system_instruction: Content {
                role: None,
                parts: vec![Part { text: Some("sys".to_string()) }],
            },
            contents: vec![],
            generation_config: GenerationConfig {
                thinking_config: ThinkingConfig { thinking_budget: 0 },
            },
        };
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["systemInstruction"]["parts"][0]["text"], "sys");
        assert_eq!(value["generationConfig"]["thinkingConfig"]["thinkingBudget"], 0);
        assert!(value["systemInstruction"].get("role").is_none());
    }
}
