use crate::error::Result;
use crate::traits::{ChatAgent, Completion, Message, Prompt};

use super::OpenAi;

/// Fluent wrapper around [`Prompt`] for one-off calls.
pub struct OpenAiPromptBuilder {
    agent: OpenAi,
    prompt: Prompt,
}

impl OpenAiPromptBuilder {
    pub(crate) fn new(agent: OpenAi, input: String) -> Self {
        Self {
            agent,
            prompt: Prompt::new(input),
        }
    }

    pub fn preamble(mut self, preamble: impl Into<String>) -> Self {
        self.prompt.preamble = Some(preamble.into());
        self
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.prompt.temperature = Some(temperature);
        self
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.prompt.max_tokens = Some(max_tokens);
        self
    }

    pub fn json(mut self) -> Self {
        self.prompt.json_output = true;
        self
    }

    pub fn messages(mut self, messages: Vec<Message>) -> Self {
        self.prompt.messages = messages;
        self
    }

    pub fn build(self) -> Prompt {
        self.prompt
    }

    pub async fn send(self) -> Result<Completion> {
        self.agent.complete(self.prompt).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_collects_settings() {
        let prompt = OpenAi::new("sk", "gpt-4o-mini")
            .prompt("classify")
            .preamble("answer yes or no")
            .temperature(0.0)
            .max_tokens(1)
            .build();
        assert_eq!(prompt.input, "classify");
        assert_eq!(prompt.preamble.as_deref(), Some("answer yes or no"));
        assert_eq!(prompt.max_tokens, Some(1));
        assert!(!prompt.json_output);
    }
}
