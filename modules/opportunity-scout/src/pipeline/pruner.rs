use std::cmp::Ordering;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{info, warn};

use opportunity_common::file_config::PricesConfig;
use opportunity_common::CandidateItem;

use super::stats::estimate_tokens;
use crate::scheduling::cost::{CostMeter, EMBEDDING};
use crate::scheduling::{Deadline, RetryPolicy, WorkerPool};
use crate::traits::TextEmbedder;

#[derive(Debug, Default)]
pub struct PruneOutcome {
    /// Best first; at most `keep` items.
    pub items: Vec<CandidateItem>,
    pub api_calls: u64,
    pub failed_batches: usize,
    /// Set when the random-sample fallback replaced similarity ranking.
    pub fallback_reason: Option<String>,
}

/// Embedding-based relevance ranking with a random-sample fallback.
pub struct RelevancePruner {
    embedder: Option<Arc<dyn TextEmbedder>>,
    meter: Arc<CostMeter>,
    prices: PricesConfig,
    retry: RetryPolicy,
    batch_size: usize,
    workers: usize,
    deadline: Deadline,
    seed: Option<u64>,
    keep_vectors: bool,
}

impl RelevancePruner {
    pub fn new(embedder: Option<Arc<dyn TextEmbedder>>, meter: Arc<CostMeter>, prices: PricesConfig) -> Self {
        Self {
            embedder,
            meter,
            prices,
            retry: RetryPolicy::none(),
            batch_size: 512,
            workers: 4,
            deadline: Deadline::never(),
            seed: None,
            keep_vectors: false,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_batching(mut self, batch_size: usize, workers: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self.workers = workers;
        self
    }

    pub fn with_deadline(mut self, deadline: Deadline) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn with_seed(mut self, seed: Option<u64>) -> Self {
        self.seed = seed;
        self
    }

    /// Keep each survivor's vector for persistence.
    pub fn keep_vectors(mut self, keep: bool) -> Self {
        self.keep_vectors = keep;
        self
    }

    pub async fn prune(&self, items: Vec<CandidateItem>, query: &str, keep: usize) -> PruneOutcome {
        if items.is_empty() || keep == 0 {
            return PruneOutcome::default();
        }
        let Some(embedder) = self.embedder.clone() else {
            return self.fallback(items, keep, 0, "no embedding provider configured".into());
        };
        if self.deadline.is_expired() {
            return self.fallback(items, keep, 0, "run deadline elapsed before embedding".into());
        }

        let batch_size = self.batch_size.min(embedder.max_batch().max(1));
        let mut api_calls = 0;

        // Reference vector: the combined query, embedded once.
        api_calls += 1;
        let reference = match self.embed(&embedder, vec![query.to_string()]).await {
            Ok(mut vectors) if !vectors.is_empty() && !vectors[0].is_empty() => vectors.swap_remove(0),
            Ok(_) => {
                return self.fallback(items, keep, api_calls, "embedding provider returned no query vector".into());
            }
            Err(e) => {
                return self.fallback(items, keep, api_calls, format!("query embedding failed: {e:#}"));
            }
        };

        let texts: Vec<String> = items.iter().map(CandidateItem::content).collect();
        let batches: Vec<Vec<String>> = texts.chunks(batch_size).map(|c| c.to_vec()).collect();
        let batch_count = batches.len();
        api_calls += batch_count as u64;

        let pool = WorkerPool::new(self.workers).with_deadline(self.deadline);
        let slots = pool
            .run(batches, |batch| {
                let embedder = embedder.clone();
                async move { self.embed(&embedder, batch).await }
            })
            .await;

        let mut vectors: Vec<Option<Vec<f32>>> = Vec::with_capacity(items.len());
        let mut failed_batches = 0;
        for (idx, slot) in slots.into_iter().enumerate() {
            let expected = batch_size.min(items.len() - idx * batch_size);
            match slot {
                Ok(batch) if batch.len() == expected => vectors.extend(batch.into_iter().map(Some)),
                Ok(batch) => {
                    warn!(batch = idx, expected, got = batch.len(), "Embedding batch size mismatch");
                    failed_batches += 1;
                    vectors.extend((0..expected).map(|_| None));
                }
                Err(e) => {
                    warn!(batch = idx, error = %e, "Embedding batch failed");
                    failed_batches += 1;
                    vectors.extend((0..expected).map(|_| None));
                }
            }
        }

        if failed_batches == batch_count {
            return self.fallback(items, keep, api_calls, format!("all {batch_count} embedding batches failed"));
        }

        let mut scored: Vec<CandidateItem> = items
            .into_iter()
            .zip(vectors)
            .map(|(mut item, vector)| {
                item.similarity = vector.as_deref().map(|v| cosine_similarity(&reference, v));
                if self.keep_vectors {
                    item.embedding = vector;
                }
                item
            })
            .collect();

        // Stable: equal scores keep retrieval order. Unscored items sink.
        scored.sort_by(|a, b| compare_desc(a.similarity, b.similarity));
        scored.truncate(keep);

        info!(
            kept = scored.len(),
            batches = batch_count,
            failed_batches,
            top = scored.first().and_then(|i| i.similarity),
            "Relevance pruning complete"
        );

        PruneOutcome {
            items: scored,
            api_calls,
            failed_batches,
            fallback_reason: None,
        }
    }

    async fn embed(&self, embedder: &Arc<dyn TextEmbedder>, texts: Vec<String>) -> anyhow::Result<Vec<Vec<f32>>> {
        let chars: usize = texts.iter().map(String::len).sum();
        let batch = self
            .retry
            .run_until("embed_batch", self.deadline, || embedder.embed_batch(texts.clone()))
            .await?;
        let tokens = batch.tokens.unwrap_or_else(|| estimate_tokens(chars));
        let _ = self
            .meter
            .record(EMBEDDING, self.prices.embedding_cost(embedder.provider(), tokens));
        Ok(batch.vectors)
    }

    fn fallback(&self, items: Vec<CandidateItem>, keep: usize, api_calls: u64, reason: String) -> PruneOutcome {
        warn!(reason = %reason, available = items.len(), keep, "Embedding unavailable, sampling at random");
        let items = match self.seed {
            Some(seed) => random_sample(items, keep, &mut StdRng::seed_from_u64(seed)),
            None => random_sample(items, keep, &mut StdRng::from_os_rng()),
        };
        PruneOutcome {
            items,
            api_calls,
            failed_batches: 0,
            fallback_reason: Some(reason),
        }
    }
}

fn compare_desc(a: Option<f32>, b: Option<f32>) -> Ordering {
    let key = |s: Option<f32>| s.filter(|v| !v.is_nan()).unwrap_or(f32::NEG_INFINITY);
    key(b).partial_cmp(&key(a)).unwrap_or(Ordering::Equal)
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Uniform sample without replacement, returned in original order.
pub fn random_sample<R: rand::Rng>(items: Vec<CandidateItem>, amount: usize, rng: &mut R) -> Vec<CandidateItem> {
    if items.len() <= amount {
        return items;
    }
    let mut picked = rand::seq::index::sample(rng, items.len(), amount).into_vec();
    picked.sort_unstable();
    let mut picked = picked.into_iter().peekable();
    items
        .into_iter()
        .enumerate()
        .filter_map(|(idx, item)| {
            if picked.peek() == Some(&idx) {
                picked.next();
                Some(item)
            } else {
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{post, MockEmbedder};

    fn pruner(embedder: MockEmbedder) -> RelevancePruner {
        RelevancePruner::new(Some(Arc::new(embedder)), Arc::new(CostMeter::new()), PricesConfig::default())
            .with_seed(Some(7))
    }

    fn items(n: usize) -> Vec<CandidateItem> {
        (0..n).map(|i| post(&format!("p{i}"), 1)).collect()
    }

    #[test]
    fn cosine_handles_degenerate_vectors() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
        assert!((cosine_similarity(&[1.0, 0.0], &[2.0, 0.0]) - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn keeps_top_k_sorted_descending() {
        let embedder = MockEmbedder::new(2)
            .on_text("query", vec![1.0, 0.0])
            .on_contains("p0", vec![0.0, 1.0])
            .on_contains("p1", vec![1.0, 0.0])
            .on_contains("p2", vec![1.0, 1.0]);
        let mut input = items(3);
        for item in &mut input {
            item.text = item.id.clone();
        }
        let outcome = pruner(embedder).prune(input, "query", 2).await;
        let ids: Vec<_> = outcome.items.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["p1", "p2"]);
        assert!(outcome.fallback_reason.is_none());
    }

    #[tokio::test]
    async fn ties_preserve_retrieval_order() {
        let embedder = MockEmbedder::new(2).constant(vec![1.0, 0.0]);
        let outcome = pruner(embedder).prune(items(6), "query", 4).await;
        let ids: Vec<_> = outcome.items.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["p0", "p1", "p2", "p3"]);
    }

    #[tokio::test]
    async fn retains_min_of_available_and_keep() {
        let outcome = pruner(MockEmbedder::new(4)).prune(items(3), "query", 10).await;
        assert_eq!(outcome.items.len(), 3);
        for pair in outcome.items.windows(2) {
            assert!(pair[0].similarity >= pair[1].similarity);
        }
    }

    #[tokio::test]
    async fn batches_respect_size_limit() {
        let embedder = Arc::new(MockEmbedder::new(4));
        let p = RelevancePruner::new(Some(embedder.clone()), Arc::new(CostMeter::new()), PricesConfig::default())
            .with_batching(10, 2);
        let outcome = p.prune(items(25), "query", 5).await;
        assert_eq!(outcome.api_calls, 4);
        assert_eq!(embedder.largest_batch(), 10);
    }

    #[tokio::test]
    async fn failing_provider_falls_back_to_random_sample() {
        let outcome = pruner(MockEmbedder::new(4).failing()).prune(items(50), "query", 10).await;
        assert_eq!(outcome.items.len(), 10);
        assert!(outcome.fallback_reason.is_some());
        let unique: std::collections::HashSet<_> = outcome.items.iter().map(|i| i.id.clone()).collect();
        assert_eq!(unique.len(), 10);
    }

    #[tokio::test]
    async fn seeded_fallback_is_reproducible() {
        let a = pruner(MockEmbedder::new(4).failing()).prune(items(50), "q", 5).await;
        let b = pruner(MockEmbedder::new(4).failing()).prune(items(50), "q", 5).await;
        let ids = |o: &PruneOutcome| o.items.iter().map(|i| i.id.clone()).collect::<Vec<_>>();
        assert_eq!(ids(&a), ids(&b));
    }

    #[tokio::test]
    async fn vectors_kept_only_when_requested() {
        let outcome = pruner(MockEmbedder::new(4)).keep_vectors(true).prune(items(2), "q", 2).await;
        assert!(outcome.items.iter().all(|i| i.embedding.as_ref().is_some_and(|v| v.len() == 4)));
        let outcome = pruner(MockEmbedder::new(4)).prune(items(2), "q", 2).await;
        assert!(outcome.items.iter().all(|i| i.embedding.is_none()));
    }
}
