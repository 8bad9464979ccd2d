use std::collections::HashSet;
use std::sync::Arc;

use ai_client::util::extract_json;
use ai_client::Prompt;
use tracing::{info, warn};

use opportunity_common::file_config::PricesConfig;

use super::stats::estimate_tokens;
use crate::scheduling::cost::{CostMeter, KEYWORD_LLM};
use crate::traits::LanguageModel;

const KEYWORD_SYSTEM_PROMPT: &str = "You generate Reddit search keywords for market research. \
Given an audience and the questions a researcher wants answered, return the short phrases \
(one to four words) that people in that audience would actually type in posts about these topics. \
Prefer concrete nouns and problem phrases over generic words. \
Respond with JSON only: {\"keywords\": [\"...\"]}";

const MAX_PHRASE_WORDS: usize = 6;

const STOP_WORDS: &[&str] = &[
    "the", "and", "for", "are", "but", "not", "you", "your", "with", "this", "that", "they",
    "them", "their", "there", "these", "those", "from", "have", "has", "had", "was", "were",
    "been", "being", "into", "onto", "about", "over", "under", "than", "then", "also", "just",
    "very", "really", "more", "most", "some", "any", "all", "each", "other", "such", "its",
    "our", "out", "off", "can", "could", "would", "should", "will", "shall", "may", "might",
    "must", "does", "did", "doing", "get", "gets", "got", "make", "makes", "like", "use",
    "uses", "using", "people", "things", "thing", "describe", "describes", "feel", "feels",
    "think", "say", "says", "talk", "talks", "tell", "typically", "usually", "often", "one",
];

const QUESTION_WORDS: &[&str] = &[
    "what", "why", "how", "when", "where", "who", "whom", "whose", "which", "whether",
];

/// Expands an audience and its questions into search keywords.
pub struct KeywordQueryBuilder {
    llm: Option<Arc<dyn LanguageModel>>,
    meter: Arc<CostMeter>,
    prices: PricesConfig,
    max_keywords: usize,
}

#[derive(Debug, Clone)]
pub struct KeywordOutcome {
    pub keywords: Vec<String>,
    pub api_calls: u64,
    /// Set when the heuristic was used instead of the model.
    pub fallback_reason: Option<String>,
}

impl KeywordQueryBuilder {
    pub fn new(
        llm: Option<Arc<dyn LanguageModel>>,
        meter: Arc<CostMeter>,
        prices: PricesConfig,
        max_keywords: usize,
    ) -> Self {
        Self {
            llm,
            meter,
            prices,
            max_keywords: max_keywords.max(1),
        }
    }

    /// Never fails: any model problem falls back to the heuristic, which
    /// always yields at least one keyword for a non-empty audience.
    pub async fn build(
        &self,
        audience: &str,
        questions: &[String],
        context: Option<&str>,
    ) -> KeywordOutcome {
        let Some(llm) = self.llm.as_ref() else {
            return self.fallback(audience, questions, 0, "no keyword model configured".into());
        };

        let prompt = self.prompt(audience, questions, context);
        let prompt_chars = prompt.char_len();

        let completion = match llm.complete(prompt).await {
            Ok(c) => c,
            Err(e) => {
                return self.fallback(audience, questions, 1, format!("keyword model call failed: {e:#}"));
            }
        };

        let (input_tokens, output_tokens) = match completion.usage {
            Some(u) => (u.prompt_tokens, u.completion_tokens),
            None => (estimate_tokens(prompt_chars), estimate_tokens(completion.content.len())),
        };
        let _ = self
            .meter
            .record(KEYWORD_LLM, self.prices.chat_cost(input_tokens, output_tokens));

        match parse_keywords(&completion.content, self.max_keywords) {
            Some(keywords) => {
                info!(count = keywords.len(), model = llm.model(), "Keywords generated");
                KeywordOutcome {
                    keywords,
                    api_calls: 1,
                    fallback_reason: None,
                }
            }
            None => self.fallback(
                audience,
                questions,
                1,
                "keyword model returned unparseable output".into(),
            ),
        }
    }

    fn prompt(&self, audience: &str, questions: &[String], context: Option<&str>) -> Prompt {
        let mut input = format!("Audience: {}\n\nQuestions:\n", audience.trim());
        for q in questions.iter().filter(|q| !q.trim().is_empty()) {
            input.push_str("- ");
            input.push_str(q.trim());
            input.push('\n');
        }
        if let Some(ctx) = context.filter(|c| !c.trim().is_empty()) {
            input.push_str("\nContext: ");
            input.push_str(ctx.trim());
            input.push('\n');
        }
        input.push_str(&format!("\nReturn at most {} keywords.", self.max_keywords));

        Prompt {
            preamble: Some(KEYWORD_SYSTEM_PROMPT.to_string()),
            input,
            temperature: Some(0.0),
            max_tokens: Some(400),
            json_output: true,
            ..Default::default()
        }
    }

    fn fallback(
        &self,
        audience: &str,
        questions: &[String],
        api_calls: u64,
        reason: String,
    ) -> KeywordOutcome {
        let keywords = heuristic_keywords(audience, questions, self.max_keywords);
        warn!(reason = %reason, count = keywords.len(), "Keyword model unavailable, using heuristic keywords");
        KeywordOutcome {
            keywords,
            api_calls,
            fallback_reason: Some(reason),
        }
    }
}

/// Accepts `{"keywords": [...]}` or a bare array, possibly wrapped in prose
/// or a code fence. `None` if nothing usable survives.
pub fn parse_keywords(raw: &str, max: usize) -> Option<Vec<String>> {
    let value = extract_json(raw)?;
    let list = match value {
        serde_json::Value::Array(items) => items,
        serde_json::Value::Object(mut map) => match map.remove("keywords") {
            Some(serde_json::Value::Array(items)) => items,
            _ => return None,
        },
        _ => return None,
    };

    let mut seen = HashSet::new();
    let keywords: Vec<String> = list
        .into_iter()
        .filter_map(|v| v.as_str().map(clean_phrase))
        .filter(|k| !k.is_empty() && k.split_whitespace().count() <= MAX_PHRASE_WORDS)
        .filter(|k| seen.insert(k.clone()))
        .take(max)
        .collect();

    (!keywords.is_empty()).then_some(keywords)
}

fn clean_phrase(raw: &str) -> String {
    raw.trim()
        .trim_matches(|c: char| c == '"' || c == '\'' || c == '#')
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn salient_tokens(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() >= 3)
        .filter(|t| !STOP_WORDS.contains(t) && !QUESTION_WORDS.contains(t))
        .map(str::to_string)
        .collect()
}

/// Deterministic keyword extraction: the audience phrase, then bigrams
/// of adjacent salient tokens, then the tokens themselves.
pub fn heuristic_keywords(audience: &str, questions: &[String], max: usize) -> Vec<String> {
    let max = max.max(1);
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    let mut push = |phrase: String, out: &mut Vec<String>| {
        if out.len() < max && !phrase.is_empty() && seen.insert(phrase.clone()) {
            out.push(phrase);
        }
    };

    let audience_tokens = salient_tokens(audience);
    if !audience_tokens.is_empty() {
        push(clean_phrase(audience), &mut out);
    }

    let segments: Vec<Vec<String>> = std::iter::once(audience_tokens)
        .chain(questions.iter().map(|q| salient_tokens(q)))
        .collect();

    for tokens in &segments {
        for pair in tokens.windows(2) {
            push(format!("{} {}", pair[0], pair[1]), &mut out);
        }
    }
    for tokens in &segments {
        for token in tokens {
            push(token.clone(), &mut out);
        }
    }

    if out.is_empty() {
        let trimmed = audience.trim();
        if !trimmed.is_empty() {
            out.push(trimmed.to_string());
        }
    }
    out
}
