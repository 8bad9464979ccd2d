use async_trait::async_trait;

use crate::error::Result;

// =============================================================================
// Message Types
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }
}

// =============================================================================
// Requests and Results
// =============================================================================

/// A single-shot completion request.
#[derive(Debug, Clone, Default)]
pub struct Prompt {
    pub preamble: Option<String>,
    pub messages: Vec<Message>,
    pub input: String,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    /// Ask the provider for a JSON object response.
    pub json_output: bool,
}

impl Prompt {
    pub fn new(input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            ..Default::default()
        }
    }

    /// Total characters sent, used to estimate tokens when the provider
    /// does not report usage.
    pub fn char_len(&self) -> usize {
        self.preamble.as_ref().map_or(0, |p| p.len())
            + self.messages.iter().map(|m| m.content.len()).sum::<usize>()
            + self.input.len()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}

#[derive(Debug, Clone)]
pub struct Completion {
    pub content: String,
    /// `None` when the provider omitted the usage block.
    pub usage: Option<TokenUsage>,
}

#[derive(Debug, Clone)]
pub struct Embeddings {
    /// One vector per input, in input order.
    pub vectors: Vec<Vec<f32>>,
    pub usage: Option<TokenUsage>,
}

// =============================================================================
// Agent Traits
// =============================================================================

#[async_trait]
pub trait ChatAgent: Send + Sync {
    fn model(&self) -> &str;
    async fn complete(&self, prompt: Prompt) -> Result<Completion>;
}

#[async_trait]
pub trait EmbedAgent: Send + Sync {
    fn embedding_model(&self) -> &str;
    async fn embed_batch(&self, texts: Vec<String>) -> Result<Embeddings>;

    async fn embed(&self, text: String) -> Result<Vec<f32>> {
        let model = self.embedding_model().to_string();
        self.embed_batch(vec![text])
            .await?
            .vectors
            .into_iter()
            .next()
            .ok_or(crate::AiError::EmptyResponse(model))
    }
}
