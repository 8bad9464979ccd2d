// Trait seams between the pipeline and the outside world.
//
// PostSearcher  — paginated keyword search (Reddit search.json)
// TextEmbedder  — batch embeddings for one provider
// LanguageModel — single-shot chat completions (keywords, yes/no gate)
// ThreadFetcher — comment trees and community metadata for hydration
// PostStore     — write-only persistence of finished runs
//
// Everything behind these traits is mocked in `testing`, so the whole
// pipeline runs in tests without network or database.

use ai_client::{Completion, Prompt};
use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

use opportunity_common::{CandidateItem, CommentView, EmbedProvider, RunStats, SearchRequest};

// ---------------------------------------------------------------------------
// PostSearcher
// ---------------------------------------------------------------------------

/// One page of search results, newest first.
#[derive(Debug, Clone, Default)]
pub struct RetrievedPage {
    pub items: Vec<CandidateItem>,
    /// Cursor for the next page; `None` when exhausted.
    pub after: Option<String>,
}

#[async_trait]
pub trait PostSearcher: Send + Sync {
    async fn search_page(
        &self,
        keyword: &str,
        age_days: u32,
        after: Option<&str>,
    ) -> Result<RetrievedPage>;
}

// ---------------------------------------------------------------------------
// TextEmbedder
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct EmbeddingBatch {
    pub vectors: Vec<Vec<f32>>,
    /// Reported input tokens, if the provider sends usage.
    pub tokens: Option<u64>,
}

#[async_trait]
pub trait TextEmbedder: Send + Sync {
    fn provider(&self) -> EmbedProvider;

    /// Largest batch the provider accepts in one call.
    fn max_batch(&self) -> usize {
        512
    }

    async fn embed_batch(&self, texts: Vec<String>) -> Result<EmbeddingBatch>;
}

// ---------------------------------------------------------------------------
// LanguageModel
// ---------------------------------------------------------------------------

#[async_trait]
pub trait LanguageModel: Send + Sync {
    fn model(&self) -> &str;
    async fn complete(&self, prompt: Prompt) -> Result<Completion>;
}

// ---------------------------------------------------------------------------
// ThreadFetcher
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct ThreadDetail {
    /// Top-level comments, best first.
    pub comments: Vec<CommentView>,
    /// Fresh comment count, when the thread payload carried one.
    pub num_comments: Option<i64>,
}

#[async_trait]
pub trait ThreadFetcher: Send + Sync {
    async fn thread(&self, post_id: &str, comment_limit: usize) -> Result<ThreadDetail>;

    /// Subscriber count for a community. `Ok(None)` for private or
    /// missing communities. One call is one rate-limited request.
    async fn subscribers(&self, subreddit: &str) -> Result<Option<i64>>;

    /// A previously looked-up count, answered without a request.
    async fn cached_subscribers(&self, _subreddit: &str) -> Option<Option<i64>> {
        None
    }
}

// ---------------------------------------------------------------------------
// PostStore
// ---------------------------------------------------------------------------

/// Everything persisted for one finished run.
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub run_id: Uuid,
    pub request: SearchRequest,
    pub items: Vec<CandidateItem>,
    pub stats: RunStats,
    pub store_vectors: bool,
}

#[async_trait]
pub trait PostStore: Send + Sync {
    async fn save_run(&self, record: &RunRecord) -> Result<()>;
}
