//! Model Provider abstraction (spec §4.C): chat completion given a rendered
//! context and an optional system prompt.
//!
//! Mirrors `loom::llm::LlmClient`'s trait + mock + real-backend shape, but
//! the contract here is simpler: a single `generate(context, system) -> text`
//! call rather than a structured messages/tool_calls exchange, since the
//! Core Agent always sends one rendered-context user turn and reads back
//! fenced JSON text (spec §4.F parses it, not this layer).

mod gemini;
mod mock;
mod openai;

pub use gemini::GeminiProvider;
pub use mock::MockProvider;
pub use openai::OpenAiProvider;

use async_trait::async_trait;

use crate::error::ModelError;

/// Sampling parameters a provider honors on every `generate` call. Mutable
/// in place via `set_generation_config` (spec §4.C) rather than requiring a
/// new provider instance, matching the original `llm.py`'s
/// `set_generation_config` on both provider classes.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GenerationConfig {
    pub temperature: f32,
    pub max_output_tokens: u32,
}

impl Default for GenerationConfig {
    /// Conservative defaults (low temperature): every provider's output must
    /// parse as JSON (spec §4.F), so determinism is worth more here than
    /// creativity.
    fn default() -> Self {
        GenerationConfig {
            temperature: 0.2,
            max_output_tokens: 2048,
        }
    }
}

/// Chat completion abstraction: `system` + `context` → assistant text.
///
/// Implementations: [`GeminiProvider`], [`OpenAiProvider`], [`MockProvider`]
/// (tests). No retries live here — retry policy belongs to the Core Agent
/// (spec §4.C, §7).
#[async_trait]
pub trait ModelProvider: Send + Sync {
    async fn generate(&self, context: &str, system: Option<&str>) -> Result<String, ModelError>;

    /// Updates sampling parameters on this live provider instance.
    fn set_generation_config(&self, config: GenerationConfig);

    fn generation_config(&self) -> GenerationConfig;
}
