use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{debug, info, warn};

use opportunity_common::{CandidateItem, CommentView};

use super::normalizer::TextNormalizer;
use crate::scheduling::cost::{CostMeter, HYDRATION};
use crate::scheduling::{Deadline, RateLimiter, RetryPolicy, WorkerPool};
use crate::traits::ThreadFetcher;

#[derive(Debug, Default)]
pub struct HydrationOutcome {
    /// Same items, same order; hydrated where the fetch succeeded.
    pub items: Vec<CandidateItem>,
    pub api_calls: u64,
    pub failures: usize,
}

/// Fetches comment threads for final survivors only.
pub struct Hydrator {
    fetcher: Arc<dyn ThreadFetcher>,
    limiter: Arc<RateLimiter>,
    retry: RetryPolicy,
    meter: Arc<CostMeter>,
    normalizer: TextNormalizer,
    price_per_thread: f64,
    comment_limit: usize,
    workers: usize,
    deadline: Deadline,
}

impl Hydrator {
    pub fn new(fetcher: Arc<dyn ThreadFetcher>, limiter: Arc<RateLimiter>, meter: Arc<CostMeter>) -> Self {
        Self {
            fetcher,
            limiter,
            retry: RetryPolicy::none(),
            meter,
            normalizer: TextNormalizer::default(),
            price_per_thread: 0.0,
            comment_limit: 10,
            workers: 8,
            deadline: Deadline::never(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_normalizer(mut self, normalizer: TextNormalizer) -> Self {
        self.normalizer = normalizer;
        self
    }

    pub fn with_comment_limit(mut self, limit: usize) -> Self {
        self.comment_limit = limit;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_price_per_thread(mut self, price: f64) -> Self {
        self.price_per_thread = price;
        self
    }

    pub fn with_deadline(mut self, deadline: Deadline) -> Self {
        self.deadline = deadline;
        self
    }

    pub async fn hydrate(&self, items: Vec<CandidateItem>) -> HydrationOutcome {
        if items.is_empty() {
            return HydrationOutcome::default();
        }

        let calls = AtomicU64::new(0);
        let pool = WorkerPool::new(self.workers).with_deadline(self.deadline);
        let slots = pool
            .run(items.clone(), |item| {
                let calls = &calls;
                async move { self.hydrate_one(item, calls).await }
            })
            .await;

        let mut outcome = HydrationOutcome {
            api_calls: calls.load(Ordering::Relaxed),
            ..Default::default()
        };
        for (original, slot) in items.into_iter().zip(slots) {
            match slot {
                Ok(hydrated) => outcome.items.push(hydrated),
                Err(e) => {
                    warn!(post_id = %original.id, error = %e, "Hydration failed, keeping unhydrated item");
                    outcome.failures += 1;
                    outcome.items.push(original);
                }
            }
        }

        info!(
            items = outcome.items.len(),
            failures = outcome.failures,
            api_calls = outcome.api_calls,
            "Hydration complete"
        );
        outcome
    }

    async fn hydrate_one(&self, mut item: CandidateItem, calls: &AtomicU64) -> anyhow::Result<CandidateItem> {
        let detail = self
            .retry
            .run_until("reddit_thread", self.deadline, || async {
                self.limiter.acquire().await;
                calls.fetch_add(1, Ordering::Relaxed);
                let _ = self.meter.record(HYDRATION, self.price_per_thread);
                self.fetcher.thread(&item.id, self.comment_limit).await
            })
            .await?;

        item.top_comments = detail
            .comments
            .into_iter()
            .take(self.comment_limit)
            .map(|c| CommentView {
                body: self.normalizer.normalize_text(&c.body),
                ..c
            })
            .filter(|c| !c.body.is_empty())
            .collect();
        if let Some(n) = detail.num_comments {
            item.num_comments = n;
        }
        item.hydrated = true;

        // Community size is a nice-to-have; a failed lookup does not
        // count against the item.
        let lookup = self.subscribers(&item.subreddit, calls).await;
        match lookup {
            Ok(subs) => item.subreddit_subscribers = subs,
            Err(e) => debug!(subreddit = %item.subreddit, error = %e, "Subscriber lookup failed"),
        }

        Ok(item)
    }

    /// Cache first; a miss is a rate-limited request like any other.
    async fn subscribers(&self, subreddit: &str, calls: &AtomicU64) -> anyhow::Result<Option<i64>> {
        if let Some(known) = self.fetcher.cached_subscribers(subreddit).await {
            return Ok(known);
        }
        if self.deadline.is_expired() {
            anyhow::bail!("run deadline elapsed before subscriber lookup");
        }
        self.retry
            .run_until("subreddit_about", self.deadline, || async {
                self.limiter.acquire().await;
                calls.fetch_add(1, Ordering::Relaxed);
                self.fetcher.subscribers(subreddit).await
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{comment, post, MockThreadFetcher};

    fn hydrator(fetcher: MockThreadFetcher) -> Hydrator {
        Hydrator::new(
            Arc::new(fetcher),
            Arc::new(RateLimiter::new(6000, 100)),
            Arc::new(CostMeter::new()),
        )
        .with_comment_limit(2)
    }

    #[tokio::test]
    async fn attaches_comments_and_subscribers() {
        let fetcher = MockThreadFetcher::new()
            .on_thread("p0", vec![comment("c1", "**Same** here", 9), comment("c2", "ugh", 4), comment("c3", "x", 1)])
            .on_subscribers("devops", 120_000);
        let outcome = hydrator(fetcher).hydrate(vec![post("p0", 1)]).await;
        let item = &outcome.items[0];
        assert!(item.hydrated);
        assert_eq!(item.top_comments.len(), 2);
        assert_eq!(item.top_comments[0].body, "Same here");
        assert_eq!(item.subreddit_subscribers, Some(120_000));
        assert_eq!(outcome.failures, 0);
    }

    #[tokio::test]
    async fn subscriber_lookups_take_tokens_and_are_counted() {
        let fetcher = Arc::new(
            MockThreadFetcher::new()
                .on_thread("p0", vec![comment("c1", "same", 2)])
                .on_thread("p1", vec![comment("c2", "same", 2)])
                .on_subscribers("devops", 5_000),
        );
        // Refills one token per second; the test finishes well inside that.
        let limiter = Arc::new(RateLimiter::new(60, 60));
        let outcome = Hydrator::new(fetcher.clone(), limiter.clone(), Arc::new(CostMeter::new()))
            .hydrate(vec![post("p0", 1), post("p1", 1)])
            .await;

        assert_eq!(fetcher.subscriber_calls(), 2);
        assert_eq!(outcome.api_calls, 4);
        let left = (0..60).filter(|_| limiter.try_acquire()).count();
        assert!(left <= 56, "expected four tokens spent, {left} left");
    }

    #[tokio::test]
    async fn cached_subscribers_skip_the_request() {
        let fetcher = Arc::new(
            MockThreadFetcher::new()
                .on_thread("p0", vec![comment("c1", "hi", 1)])
                .with_cached_subscribers("devops", 42),
        );
        let outcome = Hydrator::new(fetcher.clone(), Arc::new(RateLimiter::new(6000, 100)), Arc::new(CostMeter::new()))
            .hydrate(vec![post("p0", 1)])
            .await;

        assert_eq!(outcome.items[0].subreddit_subscribers, Some(42));
        assert_eq!(fetcher.subscriber_calls(), 0);
        assert_eq!(outcome.api_calls, 1);
    }

    #[tokio::test]
    async fn failure_keeps_item_unhydrated() {
        let fetcher = MockThreadFetcher::new().on_thread("p0", vec![comment("c1", "hi", 1)]);
        let outcome = hydrator(fetcher).hydrate(vec![post("p0", 1), post("missing", 1)]).await;
        assert_eq!(outcome.items.len(), 2);
        assert_eq!(outcome.failures, 1);
        assert!(outcome.items[0].hydrated);
        assert!(!outcome.items[1].hydrated);
        assert_eq!(outcome.items[1].id, "missing");
    }
}
