//! The Tool Gateway Client (spec §4.D, §6): a plain REST client — JSON
//! bodies, one `X-Session-ID` header — against the bespoke tool gateway
//! service. Not MCP JSON-RPC; grounded on the same bare-`reqwest`-client
//! shape as `tool_source::mcp::session_http::McpHttpSession` (build a
//! client, POST JSON, parse the body, map transport failures to a typed
//! error), but against this gateway's own wire format.

use std::sync::Mutex;

use reqwest::Client;
use serde_json::{json, Value};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, warn};

use crate::error::GatewayError;

const DEFAULT_BASE_URL: &str = "http://localhost:8080";
const SEARCH_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);
const EXECUTE_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(60);

/// A REST client for the external Tool Gateway. `session_id` is written once
/// on first use and read thereafter; `create_session` single-flights so two
/// concurrent first-use callers observing a missing session wait on the same
/// in-flight creation rather than both POSTing `/sessions/create` (spec §5).
pub struct GatewayClient {
    client: Client,
    base_url: String,
    session_id: Mutex<Option<String>>,
    /// Guards the single in-flight `create_session` call.
    create_lock: AsyncMutex<()>,
}

impl GatewayClient {
    pub fn new() -> Self {
        Self::with_base_url(
            std::env::var("GATEWAY_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string()),
        )
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        GatewayClient {
            client: Client::new(),
            base_url: base_url.into(),
            session_id: Mutex::new(None),
            create_lock: AsyncMutex::new(()),
        }
    }

    fn session_id_sync(&self) -> Option<String> {
        self.session_id.lock().expect("gateway client mutex poisoned").clone()
    }

    /// Creates a session if one doesn't already exist; idempotent under
    /// concurrent callers via `create_lock`.
    pub async fn create_session(&self) -> Result<String, GatewayError> {
        if let Some(id) = self.session_id_sync() {
            return Ok(id);
        }
        let _guard = self.create_lock.lock().await;
        // Re-check: another caller may have finished creating while we waited.
        if let Some(id) = self.session_id_sync() {
            return Ok(id);
        }

        let url = format!("{}/sessions/create", self.base_url);
        let response = self
            .client
            .post(&url)
            .send()
            .await
            .map_err(|e| GatewayError::Unavailable(e.to_string()))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| GatewayError::Unavailable(e.to_string()))?;
        if !status.is_success() {
            return Err(GatewayError::Rejected { body: text });
        }
        let value: Value =
            serde_json::from_str(&text).map_err(|e| GatewayError::Unavailable(e.to_string()))?;
        let id = value
            .get("session_id")
            .and_then(Value::as_str)
            .ok_or_else(|| GatewayError::Rejected { body: text.clone() })?
            .to_string();

        *self.session_id.lock().expect("gateway client mutex poisoned") = Some(id.clone());
        debug!(session_id = %id, "gateway session created");
        Ok(id)
    }

    async fn ensure_session(&self) -> Result<String, GatewayError> {
        match self.session_id_sync() {
            Some(id) => Ok(id),
            None => self.create_session().await,
        }
    }

    /// Searches for tools by natural-language query. Always returns text
    /// usable directly as model context: a JSON-encoded list of tool specs,
    /// or the human-readable sentinel `"No tools found for query: {query}"`
    /// when the gateway returns an empty/absent result (spec §4.D).
    pub async fn search_tools(&self, query: &str) -> Result<String, GatewayError> {
        let session_id = self.ensure_session().await?;
        let url = format!("{}/mcp/search", self.base_url);
        let response = self
            .client
            .post(&url)
            .header("X-Session-ID", session_id)
            .timeout(SEARCH_TIMEOUT)
            .json(&json!({ "query": query }))
            .send()
            .await
            .map_err(|e| GatewayError::Unavailable(e.to_string()))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| GatewayError::Unavailable(e.to_string()))?;
        if !status.is_success() {
            return Err(GatewayError::Rejected { body: text });
        }

        let value: Value =
            serde_json::from_str(&text).map_err(|e| GatewayError::Unavailable(e.to_string()))?;
        let result = value.get("result").cloned().unwrap_or(Value::Null);
        let is_empty = match &result {
            Value::Null => true,
            Value::Array(items) => items.is_empty(),
            _ => false,
        };
        if is_empty {
            return Ok(format!("No tools found for query: {}", query));
        }
        serde_json::to_string(&result).map_err(|e| GatewayError::Unavailable(e.to_string()))
    }

    /// Executes `name` with `args`. Unwraps a doubly-encoded result: when the
    /// gateway's `result` field is itself a JSON-encoded string, it is parsed
    /// and the `content` field (or the whole parsed value if there is no
    /// `content` key) is returned as text; if the inner parse fails, the raw
    /// string is returned verbatim (spec §4.D).
    pub async fn execute_tool(&self, name: &str, args: Value) -> Result<String, GatewayError> {
        let session_id = self.ensure_session().await?;
        let url = format!("{}/mcp/execute", self.base_url);
        let response = self
            .client
            .post(&url)
            .header("X-Session-ID", session_id)
            .timeout(EXECUTE_TIMEOUT)
            .json(&json!({ "tool_name": name, "args": args }))
            .send()
            .await
            .map_err(|e| GatewayError::Unavailable(e.to_string()))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| GatewayError::Unavailable(e.to_string()))?;
        if !status.is_success() {
            return Err(GatewayError::Rejected { body: text });
        }

        let value: Value =
            serde_json::from_str(&text).map_err(|e| GatewayError::Unavailable(e.to_string()))?;
        let result = value.get("result").cloned().unwrap_or(Value::Null);
        Ok(unwrap_result(result))
    }

    /// Lists all tools the gateway currently exposes. Not required by the
    /// core loop, but part of the client's public surface (spec §4.D).
    pub async fn list_tools(&self) -> Result<String, GatewayError> {
        let session_id = self.ensure_session().await?;
        let url = format!("{}/mcp/tools", self.base_url);
        let response = self
            .client
            .get(&url)
            .header("X-Session-ID", session_id)
            .send()
            .await
            .map_err(|e| GatewayError::Unavailable(e.to_string()))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| GatewayError::Unavailable(e.to_string()))?;
        if !status.is_success() {
            warn!(status = %status, "gateway rejected list_tools");
            return Err(GatewayError::Rejected { body: text });
        }
        Ok(text)
    }
}

impl Default for GatewayClient {
    fn default() -> Self {
        Self::new()
    }
}

fn unwrap_result(result: Value) -> String {
    match result {
        Value::String(inner) => match serde_json::from_str::<Value>(&inner) {
            Ok(parsed) => match parsed.get("content") {
                Some(content) => value_as_text(content),
                None => value_as_text(&parsed),
            },
            Err(_) => inner,
        },
        other => value_as_text(&other),
    }
}

fn value_as_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}
