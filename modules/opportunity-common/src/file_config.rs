use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::types::EmbedProvider;

/// TOML-backed pipeline tunables. Every field has a default so an empty
/// file (or no file) is a valid configuration. Secrets stay as env vars.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    pub workers: WorkersConfig,
    pub pipeline: StageConfig,
    pub rate_limits: RateLimitConfig,
    pub retry: RetryConfig,
    pub models: ModelsConfig,
    pub prices: PricesConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkersConfig {
    pub search: usize,
    pub embed: usize,
    pub gate: usize,
    pub hydrate: usize,
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            search: 8,
            embed: 4,
            gate: 24,
            hydrate: 8,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StageConfig {
    pub embed_provider: EmbedProvider,
    pub oversample_factor: usize,
    pub max_text_chars: usize,
    pub snippet_chars: usize,
    pub embed_batch_size: usize,
    pub max_keywords: usize,
    /// Retrieval target is `retrieval_multiplier` times the pruning keep count.
    pub retrieval_multiplier: usize,
    pub max_retrieved: usize,
    /// Safety stop for a single keyword's pagination.
    pub max_pages_per_keyword: usize,
    pub comment_limit: usize,
    pub run_deadline_secs: u64,
    pub hydrate_results: bool,
    pub store_vectors: bool,
    pub premium: bool,
    /// Fixes the random-sample fallback; unset means thread RNG.
    pub random_seed: Option<u64>,
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            embed_provider: EmbedProvider::OpenAi,
            oversample_factor: 20,
            max_text_chars: 2000,
            snippet_chars: 280,
            embed_batch_size: 512,
            max_keywords: 20,
            retrieval_multiplier: 5,
            max_retrieved: 5000,
            max_pages_per_keyword: 10,
            comment_limit: 10,
            run_deadline_secs: 300,
            hydrate_results: true,
            store_vectors: false,
            premium: false,
            random_seed: None,
        }
    }
}

impl StageConfig {
    pub fn run_deadline(&self) -> Duration {
        Duration::from_secs(self.run_deadline_secs)
    }

    /// How many candidates survive embedding for a target of `max_posts`.
    pub fn prune_keep(&self, max_posts: usize) -> usize {
        max_posts.saturating_mul(self.oversample_factor.max(1))
    }

    /// How many posts retrieval collects before it stops paginating.
    pub fn retrieval_target(&self, max_posts: usize) -> usize {
        self.prune_keep(max_posts)
            .saturating_mul(self.retrieval_multiplier.max(1))
            .min(self.max_retrieved.max(1))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub standard_per_minute: u32,
    pub premium_per_minute: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            standard_per_minute: 90,
            premium_per_minute: 600,
        }
    }
}

impl RateLimitConfig {
    pub fn per_minute(&self, premium: bool) -> u32 {
        if premium {
            self.premium_per_minute
        } else {
            self.standard_per_minute
        }
    }

    /// Burst size: ten seconds' worth of requests, at least one.
    pub fn capacity(&self, premium: bool) -> u32 {
        (self.per_minute(premium) / 6).max(1)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub retryable_statuses: Vec<u16>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay_ms: 500,
            max_delay_ms: 30_000,
            retryable_statuses: vec![429, 500, 502, 503, 504],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModelsConfig {
    pub keyword: String,
    pub classifier: String,
    pub openai_embedding: String,
    pub minilm_embedding: String,
    pub bge_embedding: String,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            keyword: "gpt-4o-mini".to_string(),
            classifier: "gpt-4o-mini".to_string(),
            openai_embedding: "text-embedding-3-small".to_string(),
            minilm_embedding: "sentence-transformers/all-MiniLM-L6-v2".to_string(),
            bge_embedding: "BAAI/bge-small-en-v1.5".to_string(),
        }
    }
}

impl ModelsConfig {
    pub fn embedding_model(&self, provider: EmbedProvider) -> &str {
        match provider {
            EmbedProvider::OpenAi => &self.openai_embedding,
            EmbedProvider::MiniLm => &self.minilm_embedding,
            EmbedProvider::Bge => &self.bge_embedding,
        }
    }
}

/// USD prices per unit.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PricesConfig {
    pub chat_input_per_million: f64,
    pub chat_output_per_million: f64,
    pub embedding_per_million: f64,
    pub local_embedding_per_million: f64,
    pub search_request: f64,
    pub thread_request: f64,
}

impl Default for PricesConfig {
    fn default() -> Self {
        Self {
            chat_input_per_million: 0.15,
            chat_output_per_million: 0.60,
            embedding_per_million: 0.02,
            local_embedding_per_million: 0.0,
            search_request: 0.0,
            thread_request: 0.0,
        }
    }
}

impl PricesConfig {
    /// Every price must be a finite, non-negative amount.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("chat_input_per_million", self.chat_input_per_million),
            ("chat_output_per_million", self.chat_output_per_million),
            ("embedding_per_million", self.embedding_per_million),
            ("local_embedding_per_million", self.local_embedding_per_million),
            ("search_request", self.search_request),
            ("thread_request", self.thread_request),
        ] {
            if !value.is_finite() || value < 0.0 {
                bail!("prices.{name} must be a non-negative number, got {value}");
            }
        }
        Ok(())
    }

    pub fn chat_cost(&self, prompt_tokens: u64, completion_tokens: u64) -> f64 {
        (prompt_tokens as f64 * self.chat_input_per_million
            + completion_tokens as f64 * self.chat_output_per_million)
            / 1_000_000.0
    }

    pub fn embedding_cost(&self, provider: EmbedProvider, tokens: u64) -> f64 {
        let rate = if provider.is_local() {
            self.local_embedding_per_million
        } else {
            self.embedding_per_million
        };
        tokens as f64 * rate / 1_000_000.0
    }
}

impl PipelineConfig {
    /// Reject settings that would make cost accounting meaningless.
    pub fn validate(&self) -> Result<()> {
        self.prices.validate()
    }

    /// Apply `SEARCH_WORKERS`-style overrides from the process environment.
    pub fn with_env_overrides(mut self) -> Self {
        self.apply_overrides(|key| std::env::var(key).ok());
        self
    }

    /// Apply overrides from any lookup. Each key is independent: a value
    /// that fails to parse is logged and the existing setting kept.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        override_value(&lookup, "SEARCH_WORKERS", &mut self.workers.search);
        override_value(&lookup, "EMBED_WORKERS", &mut self.workers.embed);
        override_value(&lookup, "GATE_WORKERS", &mut self.workers.gate);
        override_value(&lookup, "HYDRATE_WORKERS", &mut self.workers.hydrate);
        override_value(&lookup, "EMBED_PROVIDER", &mut self.pipeline.embed_provider);
        override_value(&lookup, "OVERSAMPLE_FACTOR", &mut self.pipeline.oversample_factor);
        override_value(&lookup, "MAX_TEXT_CHARS", &mut self.pipeline.max_text_chars);
        override_value(&lookup, "STORE_VECTORS", &mut self.pipeline.store_vectors);
        override_value(&lookup, "PREMIUM_TIER", &mut self.pipeline.premium);
        override_value(&lookup, "RUN_DEADLINE_SECS", &mut self.pipeline.run_deadline_secs);
        override_value(&lookup, "HYDRATE_RESULTS", &mut self.pipeline.hydrate_results);
    }
}

fn override_value<F, T>(lookup: &F, key: &str, target: &mut T)
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    let Some(raw) = lookup(key) else {
        return;
    };
    let raw = raw.trim();
    if raw.is_empty() {
        return;
    }
    match raw.parse::<T>() {
        Ok(value) => {
            tracing::info!(key, value = raw, "Config override from environment");
            *target = value;
        }
        Err(_) => tracing::warn!(key, value = raw, "Ignoring unparsable config override"),
    }
}

/// Load and parse a TOML config file.
pub fn load_config(path: &Path) -> Result<PipelineConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    let config: PipelineConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
    config
        .validate()
        .with_context(|| format!("Invalid config file: {}", path.display()))?;
    Ok(config)
}
