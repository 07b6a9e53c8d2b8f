//! Gemini `ModelProvider`: a plain `reqwest` REST client against the
//! `generativelanguage.googleapis.com` `generateContent` endpoint, following
//! the same bare-HTTP-client shape `tool_source::mcp::session_http::McpHttpSession`
//! uses (build a `reqwest::Client`, POST JSON, parse the body, map transport
//! failures to a typed error) rather than pulling in a dedicated Gemini SDK.

use std::sync::Mutex;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::{debug, trace};

use super::{GenerationConfig, ModelProvider};
use crate::error::ModelError;

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Calls the Gemini `generateContent` REST API. Reads `GEMINI_API_KEY` from
/// the environment unless constructed with an explicit key.
pub struct GeminiProvider {
    client: Client,
    base_url: String,
    model: String,
    api_key: String,
    config: Mutex<GenerationConfig>,
}

impl GeminiProvider {
    pub fn new(model: impl Into<String>) -> Result<Self, ModelError> {
        let api_key = std::env::var("GEMINI_API_KEY")
            .map_err(|_| ModelError::InvalidKey)?;
        Ok(Self::with_api_key(model, api_key))
    }

    pub fn with_api_key(model: impl Into<String>, api_key: impl Into<String>) -> Self {
        GeminiProvider {
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(60))
                .build()
                .expect("reqwest client build should never fail with default settings"),
            base_url: DEFAULT_BASE_URL.to_string(),
            model: model.into(),
            api_key: api_key.into(),
            config: Mutex::new(GenerationConfig::default()),
        }
    }

    /// Override the base URL (used by tests against a local stub server).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, self.model, self.api_key
        )
    }
}

#[async_trait]
impl ModelProvider for GeminiProvider {
    async fn generate(&self, context: &str, system: Option<&str>) -> Result<String, ModelError> {
        let gen = self.generation_config();
        let mut body = json!({
            "contents": [{
                "role": "user",
                "parts": [{ "text": context }],
            }],
            "generationConfig": {
                "temperature": gen.temperature,
                "maxOutputTokens": gen.max_output_tokens,
            },
        });
        if let Some(sys) = system {
            body["systemInstruction"] = json!({ "parts": [{ "text": sys }] });
        }

        debug!(model = %self.model, "gemini generateContent");
        trace!(request = %body, "gemini request body");

        let response = self
            .client
            .post(self.endpoint())
            .json(&body)
            .send()
            .await
            .map_err(|e| ModelError::Unavailable(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| ModelError::Unavailable(format!("reading response body: {}", e)))?;

        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(ModelError::InvalidKey);
        }
        if !status.is_success() {
            return Err(ModelError::Unavailable(format!("HTTP {}: {}", status, text)));
        }

        let value: Value = serde_json::from_str(&text)
            .map_err(|e| ModelError::Unavailable(format!("invalid JSON response: {}", e)))?;

        value
            .get("candidates")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("content"))
            .and_then(|c| c.get("parts"))
            .and_then(|p| p.get(0))
            .and_then(|p| p.get("text"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ModelError::Unavailable("no text in Gemini response".to_string()))
    }

    fn set_generation_config(&self, config: GenerationConfig) {
        *self.config.lock().expect("gemini provider mutex poisoned") = config;
    }

    fn generation_config(&self) -> GenerationConfig {
        *self.config.lock().expect("gemini provider mutex poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_api_key_builds_endpoint_with_model_and_key() {
        let provider = GeminiProvider::with_api_key("gemini-1.5-flash", "test-key");
        let endpoint = provider.endpoint();
        assert!(endpoint.contains("gemini-1.5-flash"));
        assert!(endpoint.contains("test-key"));
    }

    #[tokio::test]
    async fn generate_against_unreachable_base_returns_model_unavailable() {
        let provider = GeminiProvider::with_api_key("gemini-1.5-flash", "test-key")
            .with_base_url("http://127.0.0.1:1");
        let err = provider.generate("hello", None).await.unwrap_err();
        assert!(matches!(err, ModelError::Unavailable(_)));
    }

    #[test]
    fn new_without_env_key_errors_invalid_key() {
        std::env::remove_var("GEMINI_API_KEY");
        let err = GeminiProvider::new("gemini-1.5-flash").unwrap_err();
        assert!(matches!(err, ModelError::InvalidKey));
    }
}
