use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tracing::{info, warn};
use uuid::Uuid;

use opportunity_common::{
    CandidateItem, EmbedProvider, PipelineConfig, PipelineError, RunState, RunStats, SearchRequest,
    SearchResponse,
};

use super::gate::RelevanceGate;
use super::hydrator::Hydrator;
use super::keywords::KeywordQueryBuilder;
use super::normalizer::TextNormalizer;
use super::pruner::RelevancePruner;
use super::retriever::{BulkRetriever, RetrievalParams};
use super::stats::StageTimer;
use crate::scheduling::{CostMeter, Deadline, RateLimiter, RetryPolicy};
use crate::traits::{
    LanguageModel, PostSearcher, PostStore, RunRecord, TextEmbedder, ThreadFetcher,
};

/// External collaborators for a run. Only the searcher is mandatory;
/// a missing model, embedder or store degrades its stage.
#[derive(Clone)]
pub struct PipelineDeps {
    pub searcher: Arc<dyn PostSearcher>,
    pub embedders: HashMap<EmbedProvider, Arc<dyn TextEmbedder>>,
    pub keyword_llm: Option<Arc<dyn LanguageModel>>,
    pub gate_llm: Option<Arc<dyn LanguageModel>>,
    pub threads: Option<Arc<dyn ThreadFetcher>>,
    pub store: Option<Arc<dyn PostStore>>,
}

impl PipelineDeps {
    pub fn new(searcher: Arc<dyn PostSearcher>) -> Self {
        Self {
            searcher,
            embedders: HashMap::new(),
            keyword_llm: None,
            gate_llm: None,
            threads: None,
            store: None,
        }
    }

    pub fn with_embedder(mut self, embedder: Arc<dyn TextEmbedder>) -> Self {
        self.embedders.insert(embedder.provider(), embedder);
        self
    }

    /// Same model for keyword expansion and the relevance gate.
    pub fn with_llm(mut self, llm: Arc<dyn LanguageModel>) -> Self {
        self.keyword_llm = Some(llm.clone());
        self.gate_llm = Some(llm);
        self
    }

    pub fn with_keyword_llm(mut self, llm: Arc<dyn LanguageModel>) -> Self {
        self.keyword_llm = Some(llm);
        self
    }

    pub fn with_gate_llm(mut self, llm: Arc<dyn LanguageModel>) -> Self {
        self.gate_llm = Some(llm);
        self
    }

    pub fn with_threads(mut self, threads: Arc<dyn ThreadFetcher>) -> Self {
        self.threads = Some(threads);
        self
    }

    pub fn with_store(mut self, store: Arc<dyn PostStore>) -> Self {
        self.store = Some(store);
        self
    }
}

/// Receives state transitions, e.g. to back a pollable run status.
pub trait RunObserver: Send + Sync {
    fn on_state(&self, run_id: Uuid, state: RunState);
}

/// Observer that ignores everything.
pub struct NoopObserver;

impl RunObserver for NoopObserver {
    fn on_state(&self, _run_id: Uuid, _state: RunState) {}
}

#[derive(Debug, Clone)]
pub struct SearchOutcome {
    pub run_id: Uuid,
    pub items: Vec<CandidateItem>,
    pub stats: RunStats,
}

impl SearchOutcome {
    pub fn into_response(self) -> SearchResponse {
        SearchResponse {
            run_id: self.run_id,
            posts: self.items.iter().map(CandidateItem::to_view).collect(),
            stats: self.stats,
        }
    }
}

/// Drives one search run through every stage.
///
/// Validating -> BuildingKeywords -> Retrieving -> Normalizing -> Pruning
/// -> Gating -> (Hydrating) -> Persisting -> Done. Only validation can
/// fail the run; later stages degrade and record why.
pub struct PipelineOrchestrator {
    deps: PipelineDeps,
    config: PipelineConfig,
}

impl PipelineOrchestrator {
    pub fn new(deps: PipelineDeps, config: PipelineConfig) -> Self {
        Self { deps, config }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub async fn run(&self, request: SearchRequest) -> Result<SearchOutcome, PipelineError> {
        self.run_with(Uuid::new_v4(), request, &NoopObserver).await
    }

    pub async fn run_with(
        &self,
        run_id: Uuid,
        request: SearchRequest,
        observer: &dyn RunObserver,
    ) -> Result<SearchOutcome, PipelineError> {
        let started = Instant::now();
        let cfg = &self.config;

        // --- Validating ---
        observer.on_state(run_id, RunState::Validating);
        if let Err(e) = request.validate() {
            warn!(%run_id, error = %e, "Search request rejected");
            observer.on_state(run_id, RunState::Failed);
            return Err(e);
        }

        let deadline = Deadline::after(cfg.pipeline.run_deadline());
        let premium = request.premium.unwrap_or(cfg.pipeline.premium);
        let provider = request.embed_provider.unwrap_or(cfg.pipeline.embed_provider);
        let store_vectors = request.store_vectors.unwrap_or(cfg.pipeline.store_vectors);
        let max_posts = request.max_posts as usize;

        // Per-run scheduling objects: concurrent runs never share budgets.
        let meter = Arc::new(CostMeter::new());
        let limiter = Arc::new(RateLimiter::for_tier(&cfg.rate_limits, premium));
        let retry = RetryPolicy::from_config(&cfg.retry);
        let normalizer = TextNormalizer::new(cfg.pipeline.max_text_chars, cfg.pipeline.snippet_chars);

        let mut stats = RunStats::default();
        info!(
            %run_id,
            audience = %request.audience,
            questions = request.questions.len(),
            max_posts,
            age_days = request.age_days,
            premium,
            provider = %provider,
            "Search run started"
        );

        // --- Building keywords ---
        observer.on_state(run_id, RunState::BuildingKeywords);
        let timer = StageTimer::start("keywords", 1, &meter);
        let keywords = KeywordQueryBuilder::new(
            self.deps.keyword_llm.clone(),
            meter.clone(),
            cfg.prices.clone(),
            cfg.pipeline.max_keywords,
        )
        .build(&request.audience, &request.questions, None)
        .await;
        if let Some(reason) = keywords.fallback_reason.clone() {
            stats.degrade("keywords", reason);
        }
        stats.record_stage(timer.finish(keywords.keywords.len(), keywords.api_calls, &meter));
        stats.keywords = keywords.keywords.clone();

        // --- Retrieving ---
        observer.on_state(run_id, RunState::Retrieving);
        let timer = StageTimer::start("retrieve", keywords.keywords.len(), &meter);
        let params = RetrievalParams {
            age_days: request.age_days,
            min_score: request.min_score,
            max_results: cfg.pipeline.retrieval_target(max_posts),
            max_pages_per_keyword: cfg.pipeline.max_pages_per_keyword,
        };
        let retrieval = BulkRetriever::new(self.deps.searcher.clone(), limiter.clone(), retry.clone(), meter.clone())
            .with_workers(cfg.workers.search)
            .with_price_per_page(cfg.prices.search_request)
            .with_deadline(deadline)
            .retrieve(&keywords.keywords, &params)
            .await;
        if retrieval.failed_pages > 0 {
            stats.degrade(
                "retrieve",
                format!("{} search pages dropped after retries", retrieval.failed_pages),
            );
        }
        if deadline.is_expired() {
            stats.degrade("retrieve", "run deadline elapsed during retrieval");
        }
        stats.raw_fetched = retrieval.items.len();
        stats.record_stage(timer.finish(retrieval.items.len(), retrieval.api_calls, &meter));

        // --- Normalizing ---
        observer.on_state(run_id, RunState::Normalizing);
        let timer = StageTimer::start("normalize", retrieval.items.len(), &meter);
        let normalized = normalizer.normalize_all(retrieval.items);
        stats.record_stage(timer.finish(normalized.len(), 0, &meter));

        // --- Pruning ---
        observer.on_state(run_id, RunState::Pruning);
        let timer = StageTimer::start("prune", normalized.len(), &meter);
        let embedder = self.deps.embedders.get(&provider).cloned();
        if embedder.is_none() {
            warn!(provider = %provider, "No embedder registered for provider");
        }
        let pruned = RelevancePruner::new(embedder, meter.clone(), cfg.prices.clone())
            .with_retry(retry.clone())
            .with_batching(cfg.pipeline.embed_batch_size, cfg.workers.embed)
            .with_deadline(deadline)
            .with_seed(cfg.pipeline.random_seed)
            .keep_vectors(store_vectors)
            .prune(normalized, &request.combined_query(), cfg.pipeline.prune_keep(max_posts))
            .await;
        if let Some(reason) = pruned.fallback_reason.clone() {
            stats.degrade("prune", reason);
        } else if pruned.failed_batches > 0 {
            stats.degrade(
                "prune",
                format!("{} embedding batches failed; their items ranked last", pruned.failed_batches),
            );
        }
        stats.after_embed = pruned.items.len();
        stats.record_stage(timer.finish(pruned.items.len(), pruned.api_calls, &meter));

        // --- Gating ---
        observer.on_state(run_id, RunState::Gating);
        let timer = StageTimer::start("gate", pruned.items.len(), &meter);
        let gated = RelevanceGate::new(self.deps.gate_llm.clone(), meter.clone(), cfg.prices.clone())
            .with_workers(cfg.workers.gate)
            .with_deadline(deadline)
            .gate(pruned.items, &request.questions)
            .await;
        if let Some(reason) = gated.unavailable_reason.clone() {
            stats.degrade("gate", reason);
        }
        if gated.errors > 0 {
            stats.degrade("gate", format!("{} classification calls failed and were rejected", gated.errors));
        }
        if gated.ambiguous > 0 {
            stats.degrade("gate", format!("{} ambiguous answers were rejected", gated.ambiguous));
        }
        if gated.not_started > 0 {
            stats.degrade("gate", format!("{} items not classified before the deadline", gated.not_started));
        }
        stats.after_gate = gated.items.len();
        stats.record_stage(timer.finish(gated.items.len(), gated.api_calls, &meter));

        // Best-first order from pruning survives the gate; keep the top N.
        let mut finals = gated.items;
        finals.truncate(max_posts);

        // --- Hydrating ---
        if cfg.pipeline.hydrate_results && !finals.is_empty() {
            if let Some(threads) = self.deps.threads.clone() {
                observer.on_state(run_id, RunState::Hydrating);
                let timer = StageTimer::start("hydrate", finals.len(), &meter);
                let hydrated = Hydrator::new(threads, limiter.clone(), meter.clone())
                    .with_retry(retry.clone())
                    .with_normalizer(normalizer.clone())
                    .with_comment_limit(cfg.pipeline.comment_limit)
                    .with_workers(cfg.workers.hydrate)
                    .with_price_per_thread(cfg.prices.thread_request)
                    .with_deadline(deadline)
                    .hydrate(finals)
                    .await;
                if hydrated.failures > 0 {
                    stats.degrade("hydrate", format!("{} threads could not be fetched", hydrated.failures));
                }
                stats.hydration_failures = hydrated.failures;
                stats.record_stage(timer.finish(hydrated.items.len(), hydrated.api_calls, &meter));
                finals = hydrated.items;
            }
        }

        stats.cost_breakdown = meter.breakdown();
        stats.token_cost_usd = meter.total();
        stats.elapsed_sec = started.elapsed().as_secs_f64();

        // --- Persisting ---
        observer.on_state(run_id, RunState::Persisting);
        if let Some(store) = self.deps.store.as_ref() {
            let record = RunRecord {
                run_id,
                request: request.clone(),
                items: finals.clone(),
                stats: stats.clone(),
                store_vectors,
            };
            if let Err(e) = store.save_run(&record).await {
                let err = PipelineError::Persistence(format!("{e:#}"));
                warn!(%run_id, error = %err, "Failed to persist run results");
                stats.warn(err.to_string());
            }
        }
        if !store_vectors {
            for item in &mut finals {
                item.embedding = None;
            }
        }

        stats.elapsed_sec = started.elapsed().as_secs_f64();
        observer.on_state(run_id, RunState::Done);
        info!(%run_id, posts = finals.len(), "{}", stats);

        Ok(SearchOutcome {
            run_id,
            items: finals,
            stats,
        })
    }
}
