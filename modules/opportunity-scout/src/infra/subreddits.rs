use std::collections::HashMap;
use std::sync::Arc;

use reddit_client::{normalize_subreddit, RedditClient};
use tokio::sync::RwLock;
use tracing::debug;

/// Process-wide cache of community subscriber counts.
///
/// Private, banned and missing communities are cached as `None` so they
/// are asked about once. Transient failures are not cached. Callers own
/// rate limiting and retries.
pub struct SubredditDirectory {
    client: Arc<RedditClient>,
    cache: RwLock<HashMap<String, Option<i64>>>,
}

impl SubredditDirectory {
    pub fn new(client: Arc<RedditClient>) -> Self {
        Self {
            client,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Cached answer, if any. Blank names are always known to have none.
    pub async fn lookup_cached(&self, subreddit: &str) -> Option<Option<i64>> {
        let key = normalize_subreddit(subreddit);
        if key.is_empty() {
            return Some(None);
        }
        self.cache.read().await.get(&key).copied()
    }

    /// Cache hit, or exactly one `/about` request on a miss.
    pub async fn subscribers(&self, subreddit: &str) -> anyhow::Result<Option<i64>> {
        if let Some(known) = self.lookup_cached(subreddit).await {
            return Ok(known);
        }
        let key = normalize_subreddit(subreddit);

        let subscribers = match self.client.subreddit_about(&key).await {
            Ok(about) => about.subscribers,
            Err(e) if e.is_missing() => {
                debug!(subreddit = %key, "Community private or missing");
                None
            }
            Err(e) => return Err(e.into()),
        };

        self.cache.write().await.insert(key, subscribers);
        Ok(subscribers)
    }
}
