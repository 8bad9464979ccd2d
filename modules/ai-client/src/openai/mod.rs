mod client;
pub mod prompt_builder;
pub(crate) mod types;

pub use prompt_builder::OpenAiPromptBuilder;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::{AiError, Result};
use crate::traits::{ChatAgent, Completion, EmbedAgent, Embeddings, MessageRole, Prompt, TokenUsage};

use client::OpenAiClient;
use types::{ChatRequest, WireMessage};

pub const OPENROUTER_API_URL: &str = "https://openrouter.ai/api/v1";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

// =============================================================================
// OpenAi Agent
// =============================================================================

#[derive(Clone)]
pub struct OpenAi {
    api_key: String,
    pub(crate) model: String,
    embedding_model: String,
    base_url: Option<String>,
    extra_headers: Vec<(String, String)>,
    timeout: Duration,
}

impl OpenAi {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            embedding_model: "text-embedding-3-small".to_string(),
            base_url: None,
            extra_headers: Vec::new(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn from_env(model: impl Into<String>) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| AiError::Config("OPENAI_API_KEY environment variable not set".into()))?;
        Ok(Self::new(api_key, model))
    }

    /// OpenRouter speaks the same dialect; it only wants attribution headers.
    pub fn openrouter(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self::new(api_key, model)
            .with_base_url(OPENROUTER_API_URL)
            .with_header("HTTP-Referer", "https://github.com/reddit-opportunity-engine")
            .with_header("X-Title", "Reddit Opportunity Engine")
    }

    pub fn with_embedding_model(mut self, model: impl Into<String>) -> Self {
        self.embedding_model = model.into();
        self
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_headers.push((name.into(), value.into()));
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Get the API key.
    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    pub fn base_url(&self) -> &str {
        self.base_url.as_deref().unwrap_or(client::OPENAI_API_URL)
    }

    pub(crate) fn client(&self) -> OpenAiClient {
        let client = OpenAiClient::new(&self.api_key, self.timeout).with_headers(&self.extra_headers);
        if let Some(ref url) = self.base_url {
            client.with_base_url(url)
        } else {
            client
        }
    }

    pub fn prompt(&self, input: impl Into<String>) -> OpenAiPromptBuilder {
        OpenAiPromptBuilder::new(self.clone(), input.into())
    }

    fn build_request(&self, prompt: &Prompt) -> ChatRequest {
        let mut request = ChatRequest::new(&self.model);

        if let Some(ref preamble) = prompt.preamble {
            request = request.message(WireMessage::system(preamble));
        }
        for msg in &prompt.messages {
            let wire = match msg.role {
                MessageRole::System => WireMessage::system(&msg.content),
                MessageRole::User => WireMessage::user(&msg.content),
                MessageRole::Assistant => WireMessage::assistant(&msg.content),
            };
            request = request.message(wire);
        }
        request = request.message(WireMessage::user(&prompt.input));

        if let Some(limit) = prompt.max_tokens {
            request = request.token_limit(limit);
        }
        if !types::uses_max_completion_tokens(&self.model) {
            if let Some(t) = prompt.temperature {
                request = request.temperature(t);
            }
        }
        if prompt.json_output {
            request = request.json_object();
        }
        request
    }
}

// =============================================================================
// Agent Implementations
// =============================================================================

#[async_trait]
impl ChatAgent for OpenAi {
    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: Prompt) -> Result<Completion> {
        let request = self.build_request(&prompt);
        let response = self.client().chat(&request).await?;

        let usage = response.usage.map(|u| TokenUsage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
        });
        let content = response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| AiError::EmptyResponse(self.model.clone()))?;

        Ok(Completion { content, usage })
    }
}

#[async_trait]
impl EmbedAgent for OpenAi {
    fn embedding_model(&self) -> &str {
        &self.embedding_model
    }

    async fn embed_batch(&self, texts: Vec<String>) -> Result<Embeddings> {
        if texts.is_empty() {
            return Ok(Embeddings {
                vectors: Vec::new(),
                usage: None,
            });
        }
        let response = self
            .client()
            .embed_batch(&self.embedding_model, &texts)
            .await?;
        let usage = response.usage.map(|u| TokenUsage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: 0,
        });
        Ok(Embeddings {
            vectors: response.into_vectors(),
            usage,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::Message;

    #[test]
    fn test_openai_new() {
        let ai = OpenAi::new("sk-test", "gpt-4o-mini");
        assert_eq!(ai.model, "gpt-4o-mini");
        assert_eq!(ai.api_key, "sk-test");
        assert_eq!(ai.embedding_model, "text-embedding-3-small");
        assert_eq!(ai.base_url(), "https://api.openai.com/v1");
    }

    #[test]
    fn test_openrouter_sets_base_url_and_headers() {
        let ai = OpenAi::openrouter("sk-or", "openai/gpt-4o-mini");
        assert_eq!(ai.base_url(), OPENROUTER_API_URL);
        assert!(ai.extra_headers.iter().any(|(k, _)| k == "X-Title"));
    }

    #[test]
    fn test_build_request_orders_messages() {
        let ai = OpenAi::new("sk-test", "gpt-4o-mini");
        let prompt = Prompt {
            preamble: Some("be terse".into()),
            messages: vec![Message::user("earlier"), Message::assistant("ok")],
            input: "now".into(),
            temperature: Some(0.0),
            max_tokens: Some(1),
            json_output: true,
        };
        let req = ai.build_request(&prompt);
        let roles: Vec<_> = req.messages.iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, vec!["system", "user", "assistant", "user"]);
        assert_eq!(req.temperature, Some(0.0));
        assert_eq!(req.max_tokens, Some(1));
        assert!(req.response_format.is_some());
    }

    #[test]
    fn test_reasoning_model_drops_temperature() {
        let ai = OpenAi::new("sk-test", "o3-mini");
        let prompt = Prompt {
            temperature: Some(0.0),
            ..Prompt::new("hi")
        };
        assert!(ai.build_request(&prompt).temperature.is_none());
    }
}
