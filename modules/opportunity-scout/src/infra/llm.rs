use ai_client::{ChatAgent, Completion, OpenAi, Prompt};
use anyhow::Result;
use async_trait::async_trait;

use opportunity_common::AppConfig;

use crate::traits::LanguageModel;

/// Chat completions for keyword expansion and the relevance gate.
pub struct ChatModel {
    client: OpenAi,
}

impl ChatModel {
    pub fn openai(api_key: &str, model: &str) -> Self {
        Self {
            client: OpenAi::new(api_key, model),
        }
    }

    pub fn openrouter(api_key: &str, model: &str) -> Self {
        Self {
            client: OpenAi::openrouter(api_key, model),
        }
    }

    /// OpenRouter when a key for it is configured, OpenAI otherwise.
    pub fn from_config(app: &AppConfig, model: &str) -> Self {
        match app.openrouter_api_key.as_deref() {
            Some(key) => Self::openrouter(key, model),
            None => Self::openai(&app.openai_api_key, model),
        }
    }
}

#[async_trait]
impl LanguageModel for ChatModel {
    fn model(&self) -> &str {
        self.client.model()
    }

    async fn complete(&self, prompt: Prompt) -> Result<Completion> {
        Ok(self.client.complete(prompt).await?)
    }
}
