//! A fixed-or-scripted `ModelProvider`, following this codebase's pattern of
//! shipping a mock implementation of every pluggable trait (`loom::llm::MockLlm`).

use std::sync::Mutex;

use async_trait::async_trait;

use super::{GenerationConfig, ModelProvider};
use crate::error::ModelError;

/// Returns a fixed response, or walks through a script of responses (holding
/// on the last one once exhausted) — useful for end-to-end tests that drive
/// a whole step loop through several model calls.
pub struct MockProvider {
    script: Mutex<Vec<String>>,
    cursor: Mutex<usize>,
    config: Mutex<GenerationConfig>,
    /// Recorded calls, for assertions in tests (context, system).
    pub calls: Mutex<Vec<(String, Option<String>)>>,
}

impl MockProvider {
    pub fn fixed(response: impl Into<String>) -> Self {
        Self::scripted([response.into()])
    }

    pub fn scripted(responses: impl IntoIterator<Item = impl Into<String>>) -> Self {
        MockProvider {
            script: Mutex::new(responses.into_iter().map(Into::into).collect()),
            cursor: Mutex::new(0),
            config: Mutex::new(GenerationConfig::default()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().expect("mock provider mutex poisoned").len()
    }
}

#[async_trait]
impl ModelProvider for MockProvider {
    async fn generate(&self, context: &str, system: Option<&str>) -> Result<String, ModelError> {
        self.calls
            .lock()
            .expect("mock provider mutex poisoned")
            .push((context.to_string(), system.map(str::to_string)));

        let script = self.script.lock().expect("mock provider mutex poisoned");
        if script.is_empty() {
            return Err(ModelError::Unavailable("mock provider has no scripted responses".into()));
        }
        let mut cursor = self.cursor.lock().expect("mock provider mutex poisoned");
        let idx = (*cursor).min(script.len() - 1);
        if *cursor < script.len() - 1 {
            *cursor += 1;
        }
        Ok(script[idx].clone())
    }

    fn set_generation_config(&self, config: GenerationConfig) {
        *self.config.lock().expect("mock provider mutex poisoned") = config;
    }

    fn generation_config(&self) -> GenerationConfig {
        *self.config.lock().expect("mock provider mutex poisoned")
    }
}
