//! Provider-agnostic client for OpenAI-compatible chat and embedding APIs.
//!
//! One [`OpenAi`] agent covers OpenAI itself, OpenRouter, and self-hosted
//! embedding servers that speak the `/v1/embeddings` dialect; point it at a
//! different host with [`OpenAi::with_base_url`].

pub mod error;
pub mod openai;
pub mod traits;
pub mod util;

pub use error::{AiError, Result};
pub use openai::{OpenAi, OpenAiPromptBuilder};
pub use traits::{ChatAgent, Completion, EmbedAgent, Embeddings, Message, MessageRole, Prompt, TokenUsage};
