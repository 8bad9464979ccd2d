use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use ai_client::util::truncate_to_char_boundary;
use ai_client::Prompt;
use tracing::{debug, info, warn};

use opportunity_common::file_config::PricesConfig;
use opportunity_common::{CandidateItem, GateDecision, PipelineError};

use super::stats::estimate_tokens;
use crate::scheduling::cost::{CostMeter, CLASSIFICATION_LLM};
use crate::scheduling::{Deadline, WorkerError, WorkerPool};
use crate::traits::LanguageModel;

const GATE_SYSTEM_PROMPT: &str = "You screen Reddit posts for a market researcher. \
Decide whether the post is useful evidence for answering at least one of the research questions: \
it must describe first-hand experience, opinions, problems or needs related to them. \
Answer with exactly one word: yes or no.";

const MAX_GATE_TEXT_BYTES: usize = 2000;

#[derive(Debug, Default)]
pub struct GateOutcome {
    /// Accepted items, in input order.
    pub items: Vec<CandidateItem>,
    pub api_calls: u64,
    pub rejected: usize,
    pub errors: usize,
    pub ambiguous: usize,
    pub not_started: usize,
    /// Set when no classifier is available and everything was rejected.
    pub unavailable_reason: Option<String>,
}

/// Per-item yes/no classification. Fails closed: any error or unclear
/// answer drops the item, and nothing is retried.
pub struct RelevanceGate {
    llm: Option<Arc<dyn LanguageModel>>,
    meter: Arc<CostMeter>,
    prices: PricesConfig,
    workers: usize,
    deadline: Deadline,
}

impl RelevanceGate {
    pub fn new(llm: Option<Arc<dyn LanguageModel>>, meter: Arc<CostMeter>, prices: PricesConfig) -> Self {
        Self {
            llm,
            meter,
            prices,
            workers: 24,
            deadline: Deadline::never(),
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_deadline(mut self, deadline: Deadline) -> Self {
        self.deadline = deadline;
        self
    }

    pub async fn gate(&self, items: Vec<CandidateItem>, questions: &[String]) -> GateOutcome {
        if items.is_empty() {
            return GateOutcome::default();
        }
        let Some(llm) = self.llm.clone() else {
            let reason = "no classification model configured".to_string();
            warn!(rejected = items.len(), "{reason}, rejecting all candidates");
            return GateOutcome {
                rejected: items.len(),
                unavailable_reason: Some(reason),
                ..Default::default()
            };
        };

        let question_block = questions
            .iter()
            .map(|q| q.trim())
            .filter(|q| !q.is_empty())
            .map(|q| format!("- {q}"))
            .collect::<Vec<_>>()
            .join("\n");
        let prompts: Vec<Prompt> = items.iter().map(|item| gate_prompt(&question_block, item)).collect();

        let calls = AtomicU64::new(0);
        let pool = WorkerPool::new(self.workers).with_deadline(self.deadline);
        let slots = pool
            .run(prompts, |prompt| {
                let llm = llm.clone();
                let calls = &calls;
                async move {
                    calls.fetch_add(1, Ordering::Relaxed);
                    self.classify(llm.as_ref(), prompt).await
                }
            })
            .await;

        let mut outcome = GateOutcome {
            api_calls: calls.load(Ordering::Relaxed),
            ..Default::default()
        };

        for (mut item, slot) in items.into_iter().zip(slots) {
            let decision = match slot {
                Ok(decision) => decision,
                Err(WorkerError::DeadlineElapsed) => {
                    outcome.not_started += 1;
                    GateDecision::Reject
                }
                Err(WorkerError::Failed(e)) => {
                    match PipelineError::classify(&e) {
                        PipelineError::ClassificationAmbiguous(answer) => {
                            outcome.ambiguous += 1;
                            warn!(post_id = %item.id, answer = %answer, "Ambiguous classification, rejecting");
                        }
                        _ => {
                            outcome.errors += 1;
                            warn!(post_id = %item.id, error = %e, "Classification call failed, rejecting");
                        }
                    }
                    GateDecision::Reject
                }
            };
            item.decision = Some(decision);
            match decision {
                GateDecision::Accept => outcome.items.push(item),
                GateDecision::Reject => outcome.rejected += 1,
            }
        }

        info!(
            accepted = outcome.items.len(),
            rejected = outcome.rejected,
            errors = outcome.errors,
            ambiguous = outcome.ambiguous,
            not_started = outcome.not_started,
            "Relevance gate complete"
        );
        outcome
    }

    async fn classify(&self, llm: &dyn LanguageModel, prompt: Prompt) -> anyhow::Result<GateDecision> {
        let prompt_chars = prompt.char_len();
        let completion = llm.complete(prompt).await?;

        let (input_tokens, output_tokens) = match completion.usage {
            Some(u) => (u.prompt_tokens, u.completion_tokens),
            None => (estimate_tokens(prompt_chars), estimate_tokens(completion.content.len())),
        };
        let _ = self
            .meter
            .record(CLASSIFICATION_LLM, self.prices.chat_cost(input_tokens, output_tokens));

        let decision = parse_decision(&completion.content)?;
        debug!(answer = %completion.content.trim(), ?decision, "Classified");
        Ok(decision)
    }
}

fn gate_prompt(question_block: &str, item: &CandidateItem) -> Prompt {
    let content = item.content();
    let body = truncate_to_char_boundary(&content, MAX_GATE_TEXT_BYTES);
    Prompt {
        preamble: Some(GATE_SYSTEM_PROMPT.to_string()),
        input: format!(
            "Research questions:\n{question_block}\n\nPost from r/{}:\n{body}\n\nIs this post useful evidence? Answer yes or no.",
            item.subreddit
        ),
        temperature: Some(0.0),
        max_tokens: Some(1),
        ..Default::default()
    }
}

/// `yes`/`no`, case and punctuation insensitive. Anything else is
/// `ClassificationAmbiguous`.
pub fn parse_decision(raw: &str) -> Result<GateDecision, PipelineError> {
    let word: String = raw
        .trim()
        .chars()
        .take_while(|c| c.is_alphabetic())
        .collect::<String>()
        .to_lowercase();
    match word.as_str() {
        "yes" | "y" => Ok(GateDecision::Accept),
        "no" | "n" => Ok(GateDecision::Reject),
        _ => Err(PipelineError::ClassificationAmbiguous(raw.trim().to_string())),
    }
}
