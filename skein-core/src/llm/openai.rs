//! OpenAI-compatible chat-completions `ModelProvider`, adapted from
//! `loom::llm::openai::ChatOpenAI` down to a single-message (system + user)
//! call: the Core Agent never needs a multi-turn message list, since the
//! rendered DAG context already carries the whole conversation as one string.

use std::sync::Mutex;

use async_trait::async_trait;
use tracing::{debug, trace};

use async_openai::{
    config::OpenAIConfig,
    types::chat::{
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessage,
        ChatCompletionRequestUserMessage, CreateChatCompletionRequestArgs,
    },
    Client,
};

use super::{GenerationConfig, ModelProvider};
use crate::error::ModelError;

/// Calls an OpenAI-compatible chat-completions endpoint. Reads
/// `OPENAI_API_KEY` (and optionally `OPENAI_BASE_URL`/`OPENAI_API_BASE`) from
/// the environment by default; `with_config` accepts an explicit `OpenAIConfig`.
pub struct OpenAiProvider {
    client: Client<OpenAIConfig>,
    model: String,
    config: Mutex<GenerationConfig>,
}

impl OpenAiProvider {
    pub fn new(model: impl Into<String>) -> Self {
        OpenAiProvider {
            client: Client::new(),
            model: model.into(),
            config: Mutex::new(GenerationConfig::default()),
        }
    }

    pub fn with_config(config: OpenAIConfig, model: impl Into<String>) -> Self {
        OpenAiProvider {
            client: Client::with_config(config),
            model: model.into(),
            config: Mutex::new(GenerationConfig::default()),
        }
    }
}

#[async_trait]
impl ModelProvider for OpenAiProvider {
    async fn generate(&self, context: &str, system: Option<&str>) -> Result<String, ModelError> {
        let mut messages: Vec<ChatCompletionRequestMessage> = Vec::new();
        if let Some(sys) = system {
            messages.push(ChatCompletionRequestMessage::System(
                ChatCompletionRequestSystemMessage::from(sys),
            ));
        }
        messages.push(ChatCompletionRequestMessage::User(
            ChatCompletionRequestUserMessage::from(context),
        ));

        let gen = self.generation_config();
        let mut args = CreateChatCompletionRequestArgs::default();
        args.model(self.model.clone());
        args.messages(messages);
        args.temperature(gen.temperature);
        args.max_completion_tokens(gen.max_output_tokens);

        let request = args
            .build()
            .map_err(|e| ModelError::Unavailable(format!("request build failed: {}", e)))?;

        debug!(model = %self.model, "openai chat create");
        if let Ok(js) = serde_json::to_string_pretty(&request) {
            trace!(request = %js, "openai request body");
        }

        let response = self.client.chat().create(request).await.map_err(|e| {
            let msg = e.to_string();
            if msg.to_lowercase().contains("api key") || msg.contains("401") {
                ModelError::InvalidKey
            } else {
                ModelError::Unavailable(msg)
            }
        })?;

        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ModelError::Unavailable("OpenAI returned no choices".to_string()))?;

        Ok(choice.message.content.unwrap_or_default())
    }

    fn set_generation_config(&self, config: GenerationConfig) {
        *self.config.lock().expect("openai provider mutex poisoned") = config;
    }

    fn generation_config(&self) -> GenerationConfig {
        *self.config.lock().expect("openai provider mutex poisoned")
    }
}
