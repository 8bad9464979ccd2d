use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tracing::{debug, info, warn};

use opportunity_common::CandidateItem;

use crate::scheduling::cost::{CostMeter, EXTERNAL_SEARCH};
use crate::scheduling::{Deadline, RateLimiter, RetryPolicy, WorkerError, WorkerPool};
use crate::traits::PostSearcher;

#[derive(Debug, Clone)]
pub struct RetrievalParams {
    pub age_days: u32,
    pub min_score: i64,
    /// Global stop: total kept items across all keywords.
    pub max_results: usize,
    pub max_pages_per_keyword: usize,
}

#[derive(Debug, Default)]
pub struct RetrievalOutcome {
    /// Deduplicated by id; keyword order, then page order.
    pub items: Vec<CandidateItem>,
    pub api_calls: u64,
    pub pages: u64,
    pub failed_pages: usize,
    pub skipped_too_old: usize,
    pub skipped_low_score: usize,
    pub skipped_empty: usize,
    pub duplicates: usize,
}

#[derive(Debug, Default)]
struct KeywordHarvest {
    items: Vec<CandidateItem>,
    pages: u64,
    page_failed: bool,
    too_old: usize,
    low_score: usize,
    empty: usize,
    duplicates: usize,
}

enum Claim {
    Taken,
    Duplicate,
    Full,
}

/// Ids kept so far across every keyword worker. Only first sightings
/// count toward the global target.
struct ClaimSet {
    ids: Mutex<HashSet<String>>,
    limit: usize,
}

impl ClaimSet {
    fn new(limit: usize) -> Self {
        Self {
            ids: Mutex::new(HashSet::new()),
            limit,
        }
    }

    fn claim(&self, id: &str) -> Claim {
        let mut ids = self.ids.lock().unwrap_or_else(|e| e.into_inner());
        if ids.contains(id) {
            Claim::Duplicate
        } else if ids.len() >= self.limit {
            Claim::Full
        } else {
            ids.insert(id.to_string());
            Claim::Taken
        }
    }

    fn is_full(&self) -> bool {
        self.ids.lock().unwrap_or_else(|e| e.into_inner()).len() >= self.limit
    }
}

/// Oldest creation time still inside the window. Saturates instead of
/// overflowing for very wide windows.
fn age_cutoff(now: DateTime<Utc>, age_days: u32) -> DateTime<Utc> {
    now.checked_sub_signed(ChronoDuration::days(i64::from(age_days)))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Paginated keyword search under the shared rate limiter.
pub struct BulkRetriever {
    searcher: Arc<dyn PostSearcher>,
    limiter: Arc<RateLimiter>,
    retry: RetryPolicy,
    meter: Arc<CostMeter>,
    price_per_page: f64,
    workers: usize,
    deadline: Deadline,
}

impl BulkRetriever {
    pub fn new(
        searcher: Arc<dyn PostSearcher>,
        limiter: Arc<RateLimiter>,
        retry: RetryPolicy,
        meter: Arc<CostMeter>,
    ) -> Self {
        Self {
            searcher,
            limiter,
            retry,
            meter,
            price_per_page: 0.0,
            workers: 8,
            deadline: Deadline::never(),
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_price_per_page(mut self, price: f64) -> Self {
        self.price_per_page = price;
        self
    }

    pub fn with_deadline(mut self, deadline: Deadline) -> Self {
        self.deadline = deadline;
        self
    }

    pub async fn retrieve(&self, keywords: &[String], params: &RetrievalParams) -> RetrievalOutcome {
        let cutoff = age_cutoff(Utc::now(), params.age_days);
        let claims = ClaimSet::new(params.max_results);
        let attempts = AtomicU64::new(0);

        let pool = WorkerPool::new(self.workers).with_deadline(self.deadline);
        let slots = pool
            .run(keywords.to_vec(), |keyword| {
                let (claims, attempts) = (&claims, &attempts);
                async move {
                    Ok::<_, anyhow::Error>(
                        self.harvest_keyword(&keyword, params, cutoff, claims, attempts)
                            .await,
                    )
                }
            })
            .await;

        let mut outcome = RetrievalOutcome {
            api_calls: attempts.load(Ordering::Relaxed),
            ..Default::default()
        };
        let mut seen = HashSet::new();

        for (keyword, slot) in keywords.iter().zip(slots) {
            let harvest = match slot {
                Ok(h) => h,
                Err(WorkerError::DeadlineElapsed) => {
                    warn!(keyword = %keyword, "Run deadline elapsed before keyword search started");
                    continue;
                }
                Err(WorkerError::Failed(e)) => {
                    warn!(keyword = %keyword, error = %e, "Keyword search failed");
                    outcome.failed_pages += 1;
                    continue;
                }
            };
            outcome.pages += harvest.pages;
            outcome.failed_pages += usize::from(harvest.page_failed);
            outcome.skipped_too_old += harvest.too_old;
            outcome.skipped_low_score += harvest.low_score;
            outcome.skipped_empty += harvest.empty;
            outcome.duplicates += harvest.duplicates;

            for item in harvest.items {
                if seen.insert(item.id.clone()) {
                    outcome.items.push(item);
                } else {
                    outcome.duplicates += 1;
                }
            }
        }

        info!(
            keywords = keywords.len(),
            items = outcome.items.len(),
            pages = outcome.pages,
            failed_pages = outcome.failed_pages,
            duplicates = outcome.duplicates,
            too_old = outcome.skipped_too_old,
            low_score = outcome.skipped_low_score,
            "Retrieval complete"
        );
        outcome
    }

    async fn harvest_keyword(
        &self,
        keyword: &str,
        params: &RetrievalParams,
        cutoff: DateTime<Utc>,
        claims: &ClaimSet,
        attempts: &AtomicU64,
    ) -> KeywordHarvest {
        let mut harvest = KeywordHarvest::default();
        let mut after: Option<String> = None;

        while harvest.pages < params.max_pages_per_keyword as u64 {
            if claims.is_full() {
                debug!(keyword, "Global result target reached");
                break;
            }
            if self.deadline.is_expired() {
                debug!(keyword, "Run deadline elapsed, stopping pagination");
                break;
            }

            let page = self
                .retry
                .run_until("reddit_search", self.deadline, || async {
                    self.limiter.acquire().await;
                    attempts.fetch_add(1, Ordering::Relaxed);
                    let _ = self.meter.record(EXTERNAL_SEARCH, self.price_per_page);
                    self.searcher
                        .search_page(keyword, params.age_days, after.as_deref())
                        .await
                })
                .await;

            let page = match page {
                Ok(p) => p,
                Err(e) => {
                    warn!(keyword, page = harvest.pages + 1, error = %e, "Search page dropped after retries");
                    harvest.page_failed = true;
                    break;
                }
            };
            harvest.pages += 1;

            let mut crossed_cutoff = false;
            let mut target_reached = false;
            for item in page.items {
                if item.created_at < cutoff {
                    harvest.too_old += 1;
                    crossed_cutoff = true;
                    continue;
                }
                if !item.has_meaningful_content() {
                    harvest.empty += 1;
                    continue;
                }
                if item.score < params.min_score {
                    harvest.low_score += 1;
                    continue;
                }
                match claims.claim(&item.id) {
                    Claim::Taken => harvest.items.push(item),
                    Claim::Duplicate => harvest.duplicates += 1,
                    Claim::Full => {
                        target_reached = true;
                        break;
                    }
                }
            }

            if target_reached {
                debug!(keyword, "Global result target reached");
                break;
            }
            if crossed_cutoff {
                debug!(keyword, "Age cutoff crossed");
                break;
            }
            match page.after {
                Some(cursor) => after = Some(cursor),
                None => break,
            }
        }

        harvest
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{days_ago, post, MockSearcher};
    use opportunity_common::PipelineError;
    use std::time::Duration;

    fn params(max_results: usize) -> RetrievalParams {
        RetrievalParams {
            age_days: 30,
            min_score: 0,
            max_results,
            max_pages_per_keyword: 10,
        }
    }

    fn retriever(searcher: MockSearcher) -> BulkRetriever {
        BulkRetriever::new(
            Arc::new(searcher),
            Arc::new(RateLimiter::new(6000, 100)),
            RetryPolicy::new(3, Duration::from_millis(1)),
            Arc::new(CostMeter::new()),
        )
    }

    #[tokio::test]
    async fn deduplicates_across_keywords() {
        let shared = post("shared", 1);
        let searcher = MockSearcher::new()
            .on_keyword("ci", vec![vec![shared.clone(), post("a", 1)]])
            .on_keyword("builds", vec![vec![post("b", 2), shared]]);
        let outcome = retriever(searcher)
            .with_workers(1)
            .retrieve(&["ci".into(), "builds".into()], &params(100))
            .await;
        let ids: Vec<_> = outcome.items.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["shared", "a", "b"]);
        assert_eq!(outcome.duplicates, 1);
    }

    #[tokio::test]
    async fn follows_cursor_until_exhausted() {
        let searcher = MockSearcher::new().on_keyword(
            "ci",
            vec![vec![post("p1", 1)], vec![post("p2", 2)], vec![post("p3", 3)]],
        );
        let outcome = retriever(searcher).retrieve(&["ci".into()], &params(100)).await;
        assert_eq!(outcome.items.len(), 3);
        assert_eq!(outcome.pages, 3);
        assert_eq!(outcome.api_calls, 3);
    }

    #[tokio::test]
    async fn stops_at_age_cutoff() {
        let searcher = MockSearcher::new().on_keyword(
            "ci",
            vec![
                vec![post("fresh", 1), post("stale", 10), post("older", 30)],
                vec![post("never", 1)],
            ],
        );
        let mut p = params(100);
        p.age_days = 7;
        let outcome = retriever(searcher).retrieve(&["ci".into()], &p).await;
        let ids: Vec<_> = outcome.items.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["fresh"]);
        assert_eq!(outcome.skipped_too_old, 2);
        assert_eq!(outcome.pages, 1);
    }

    #[tokio::test]
    async fn skips_low_score_and_empty_posts() {
        let mut empty = post("empty", 1);
        empty.body.clear();
        empty.num_comments = 0;
        let low = post("low", 1).with_score(1);
        let searcher = MockSearcher::new().on_keyword("ci", vec![vec![empty, low, post("ok", 1).with_score(5)]]);
        let mut p = params(100);
        p.min_score = 2;
        let outcome = retriever(searcher).retrieve(&["ci".into()], &p).await;
        assert_eq!(outcome.items.len(), 1);
        assert_eq!(outcome.skipped_empty, 1);
        assert_eq!(outcome.skipped_low_score, 1);
    }

    #[tokio::test]
    async fn respects_global_max_results() {
        let page: Vec<_> = (0..50).map(|i| post(&format!("p{i}"), 1)).collect();
        let searcher = MockSearcher::new().on_keyword("ci", vec![page.clone(), page]);
        let outcome = retriever(searcher).retrieve(&["ci".into()], &params(20)).await;
        assert_eq!(outcome.items.len(), 20);
    }

    #[tokio::test]
    async fn duplicates_do_not_consume_the_global_target() {
        let shared: Vec<_> = (0..20).map(|i| post(&format!("s{i}"), 1)).collect();
        let mut wider = shared.clone();
        wider.extend((0..20).map(|i| post(&format!("u{i}"), 1)));
        let searcher = MockSearcher::new()
            .on_keyword("a", vec![shared])
            .on_keyword("b", vec![wider]);

        let outcome = retriever(searcher)
            .with_workers(1)
            .retrieve(&["a".into(), "b".into()], &params(30))
            .await;

        let ids: HashSet<_> = outcome.items.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(outcome.items.len(), 30);
        assert_eq!(ids.len(), 30);
        assert_eq!(outcome.duplicates, 20);
    }

    #[tokio::test]
    async fn huge_age_window_does_not_overflow() {
        let searcher = MockSearcher::new().on_keyword("ci", vec![vec![post("old", 3_000)]]);
        let mut p = params(100);
        p.age_days = u32::MAX;
        let outcome = retriever(searcher).retrieve(&["ci".into()], &p).await;
        assert_eq!(outcome.items.len(), 1);
        assert_eq!(age_cutoff(Utc::now(), u32::MAX), DateTime::<Utc>::MIN_UTC);
    }

    #[test]
    fn cutoff_saturates_at_the_earliest_time() {
        assert_eq!(
            age_cutoff(DateTime::<Utc>::MIN_UTC, 1),
            DateTime::<Utc>::MIN_UTC
        );
    }

    #[tokio::test]
    async fn transient_failure_is_retried() {
        let searcher = MockSearcher::new()
            .on_keyword("ci", vec![vec![post("p1", 1)]])
            .fail_first(
                "ci",
                2,
                || PipelineError::TransientDependency("503".into()).into(),
            );
        let outcome = retriever(searcher).retrieve(&["ci".into()], &params(100)).await;
        assert_eq!(outcome.items.len(), 1);
        assert_eq!(outcome.api_calls, 3);
        assert_eq!(outcome.failed_pages, 0);
    }

    #[tokio::test]
    async fn exhausted_retries_drop_only_that_keyword() {
        let searcher = MockSearcher::new()
            .on_keyword("good", vec![vec![post("g1", 1)]])
            .on_keyword("bad", vec![vec![post("b1", 1)]])
            .fail_first(
                "bad",
                10,
                || PipelineError::TransientDependency("429".into()).into(),
            );
        let outcome = retriever(searcher)
            .retrieve(&["good".into(), "bad".into()], &params(100))
            .await;
        let ids: Vec<_> = outcome.items.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["g1"]);
        assert_eq!(outcome.failed_pages, 1);
    }

    #[test]
    fn days_ago_helper_is_in_the_past() {
        assert!(days_ago(1) < Utc::now());
    }
}
