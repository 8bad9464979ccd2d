// Test mocks for the search pipeline.
//
// One mock per trait boundary:
// - MockSearcher (PostSearcher) — keyword→pages, scripted transient failures
// - MockEmbedder (TextEmbedder) — registered vectors, else hash-based
// - MockLanguageModel (LanguageModel) — substring→answer rules
// - MockThreadFetcher (ThreadFetcher) — post id→comments, subreddit→subscribers
// - MemoryPostStore (PostStore) — keeps saved runs in memory
//
// Plus fixtures for candidate items and comments.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;

use ai_client::{Completion, Prompt, TokenUsage};
use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use opportunity_common::{CandidateItem, CommentView, EmbedProvider};

use crate::traits::{
    EmbeddingBatch, LanguageModel, PostSearcher, PostStore, RetrievedPage, RunRecord,
    TextEmbedder, ThreadDetail, ThreadFetcher,
};

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

pub fn days_ago(days: i64) -> DateTime<Utc> {
    Utc::now() - Duration::days(days)
}

/// A plausible r/devops post: score 10, three comments, body mentions the id.
pub fn post(id: &str, age_days: i64) -> CandidateItem {
    let mut item = CandidateItem::new(
        id,
        "devops",
        format!("Post {id}"),
        format!("Body of {id}: our builds keep getting slower every sprint"),
        days_ago(age_days),
    )
    .with_score(10);
    item.author = "someone".into();
    item.num_comments = 3;
    item
}

pub fn comment(id: &str, body: &str, score: i64) -> CommentView {
    CommentView {
        id: id.to_string(),
        author: "commenter".to_string(),
        body: body.to_string(),
        score,
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

// ---------------------------------------------------------------------------
// MockSearcher
// ---------------------------------------------------------------------------

type ErrorFactory = Box<dyn Fn() -> anyhow::Error + Send + Sync>;

/// Pages registered per keyword; the cursor is the next page index.
/// Unregistered keywords return an empty page.
pub struct MockSearcher {
    pages: HashMap<String, Vec<Vec<CandidateItem>>>,
    fallback: Option<Vec<Vec<CandidateItem>>>,
    failures: Mutex<HashMap<String, (usize, ErrorFactory)>>,
    calls: AtomicUsize,
    keywords_seen: Mutex<Vec<String>>,
}

impl MockSearcher {
    pub fn new() -> Self {
        Self {
            pages: HashMap::new(),
            fallback: None,
            failures: Mutex::new(HashMap::new()),
            calls: AtomicUsize::new(0),
            keywords_seen: Mutex::new(Vec::new()),
        }
    }

    pub fn on_keyword(mut self, keyword: &str, pages: Vec<Vec<CandidateItem>>) -> Self {
        self.pages.insert(keyword.to_string(), pages);
        self
    }

    /// Pages served for any keyword without its own registration.
    pub fn on_any(mut self, pages: Vec<Vec<CandidateItem>>) -> Self {
        self.fallback = Some(pages);
        self
    }

    /// The first `times` calls for `keyword` fail with `error()`.
    pub fn fail_first<F>(self, keyword: &str, times: usize, error: F) -> Self
    where
        F: Fn() -> anyhow::Error + Send + Sync + 'static,
    {
        lock(&self.failures).insert(keyword.to_string(), (times, Box::new(error)));
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }

    pub fn keywords_seen(&self) -> Vec<String> {
        lock(&self.keywords_seen).clone()
    }
}

impl Default for MockSearcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PostSearcher for MockSearcher {
    async fn search_page(
        &self,
        keyword: &str,
        _age_days: u32,
        after: Option<&str>,
    ) -> Result<RetrievedPage> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        lock(&self.keywords_seen).push(keyword.to_string());

        if let Some((remaining, error)) = lock(&self.failures).get_mut(keyword) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(error());
            }
        }

        let Some(pages) = self.pages.get(keyword).or(self.fallback.as_ref()) else {
            return Ok(RetrievedPage::default());
        };
        let index = match after {
            Some(cursor) => cursor
                .parse::<usize>()
                .map_err(|_| anyhow!("MockSearcher: bad cursor {cursor}"))?,
            None => 0,
        };
        let items = pages.get(index).cloned().unwrap_or_default();
        let after = (index + 1 < pages.len()).then(|| (index + 1).to_string());
        Ok(RetrievedPage { items, after })
    }
}

// ---------------------------------------------------------------------------
// MockEmbedder
// ---------------------------------------------------------------------------

/// Deterministic embedder. Exact-text vectors win, then substring rules in
/// registration order, then a constant, then a hash-based unit vector.
pub struct MockEmbedder {
    dimension: usize,
    provider: EmbedProvider,
    exact: HashMap<String, Vec<f32>>,
    contains: Vec<(String, Vec<f32>)>,
    constant: Option<Vec<f32>>,
    failing: bool,
    calls: AtomicUsize,
    largest_batch: AtomicUsize,
}

impl MockEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            provider: EmbedProvider::OpenAi,
            exact: HashMap::new(),
            contains: Vec::new(),
            constant: None,
            failing: false,
            calls: AtomicUsize::new(0),
            largest_batch: AtomicUsize::new(0),
        }
    }

    pub fn for_provider(mut self, provider: EmbedProvider) -> Self {
        self.provider = provider;
        self
    }

    pub fn on_text(mut self, text: &str, vector: Vec<f32>) -> Self {
        self.exact.insert(text.to_string(), vector);
        self
    }

    pub fn on_contains(mut self, needle: &str, vector: Vec<f32>) -> Self {
        self.contains.push((needle.to_string(), vector));
        self
    }

    pub fn constant(mut self, vector: Vec<f32>) -> Self {
        self.constant = Some(vector);
        self
    }

    /// Every call fails with a non-transient error.
    pub fn failing(mut self) -> Self {
        self.failing = true;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }

    pub fn largest_batch(&self) -> usize {
        self.largest_batch.load(Ordering::Relaxed)
    }

    fn vector_for(&self, text: &str) -> Vec<f32> {
        if let Some(v) = self.exact.get(text) {
            return v.clone();
        }
        if let Some((_, v)) = self.contains.iter().find(|(needle, _)| text.contains(needle.as_str())) {
            return v.clone();
        }
        if let Some(v) = &self.constant {
            return v.clone();
        }
        self.hash_vector(text)
    }

    fn hash_vector(&self, text: &str) -> Vec<f32> {
        use std::hash::{Hash, Hasher};
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        text.hash(&mut hasher);
        let mut state = hasher.finish();

        let mut vec = vec![0.0f32; self.dimension];
        for v in vec.iter_mut() {
            // LCG
            state = state
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            *v = ((state >> 33) as f32 / u32::MAX as f32) * 2.0 - 1.0;
        }
        let norm: f32 = vec.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in vec.iter_mut() {
                *v /= norm;
            }
        }
        vec
    }
}

#[async_trait]
impl TextEmbedder for MockEmbedder {
    fn provider(&self) -> EmbedProvider {
        self.provider
    }

    async fn embed_batch(&self, texts: Vec<String>) -> Result<EmbeddingBatch> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.largest_batch.fetch_max(texts.len(), Ordering::Relaxed);
        if self.failing {
            bail!("MockEmbedder: provider unavailable");
        }
        let tokens = texts.iter().map(|t| t.len() as u64).sum::<u64>().div_ceil(4);
        Ok(EmbeddingBatch {
            vectors: texts.iter().map(|t| self.vector_for(t)).collect(),
            tokens: Some(tokens),
        })
    }
}

// ---------------------------------------------------------------------------
// MockLanguageModel
// ---------------------------------------------------------------------------

enum Reply {
    Answer(String),
    Fail(String),
}

/// Rules match on a substring of the full prompt text (preamble, messages
/// and input). The first matching rule wins; otherwise the default reply.
pub struct MockLanguageModel {
    rules: Vec<(String, Reply)>,
    default: Reply,
    calls: AtomicU64,
    prompts: Mutex<Vec<String>>,
}

impl MockLanguageModel {
    pub fn new() -> Self {
        Self {
            rules: Vec::new(),
            default: Reply::Fail("MockLanguageModel: no reply registered".into()),
            calls: AtomicU64::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn respond_with(mut self, answer: &str) -> Self {
        self.default = Reply::Answer(answer.to_string());
        self
    }

    pub fn respond_when(mut self, needle: &str, answer: &str) -> Self {
        self.rules.push((needle.to_string(), Reply::Answer(answer.to_string())));
        self
    }

    pub fn fail_with(mut self, message: &str) -> Self {
        self.default = Reply::Fail(message.to_string());
        self
    }

    pub fn fail_when(mut self, needle: &str, message: &str) -> Self {
        self.rules.push((needle.to_string(), Reply::Fail(message.to_string())));
        self
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    pub fn prompts(&self) -> Vec<String> {
        lock(&self.prompts).clone()
    }
}

impl Default for MockLanguageModel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LanguageModel for MockLanguageModel {
    fn model(&self) -> &str {
        "mock-model"
    }

    async fn complete(&self, prompt: Prompt) -> Result<Completion> {
        self.calls.fetch_add(1, Ordering::Relaxed);

        let mut text = prompt.preamble.clone().unwrap_or_default();
        for message in &prompt.messages {
            text.push('\n');
            text.push_str(&message.content);
        }
        text.push('\n');
        text.push_str(&prompt.input);
        lock(&self.prompts).push(text.clone());

        let reply = self
            .rules
            .iter()
            .find(|(needle, _)| text.contains(needle.as_str()))
            .map(|(_, reply)| reply)
            .unwrap_or(&self.default);

        match reply {
            Reply::Answer(answer) => Ok(Completion {
                content: answer.clone(),
                usage: Some(TokenUsage {
                    prompt_tokens: (text.len() as u64).div_ceil(4),
                    completion_tokens: (answer.len() as u64).div_ceil(4).max(1),
                }),
            }),
            Reply::Fail(message) => Err(anyhow!("{message}")),
        }
    }
}

// ---------------------------------------------------------------------------
// MockThreadFetcher
// ---------------------------------------------------------------------------

/// Returns `Err` for unregistered post ids, `Ok(None)` for unknown subreddits.
pub struct MockThreadFetcher {
    threads: HashMap<String, Vec<CommentView>>,
    subscribers: HashMap<String, i64>,
    cached: HashMap<String, i64>,
    calls: AtomicUsize,
    subscriber_calls: AtomicUsize,
}

impl MockThreadFetcher {
    pub fn new() -> Self {
        Self {
            threads: HashMap::new(),
            subscribers: HashMap::new(),
            cached: HashMap::new(),
            calls: AtomicUsize::new(0),
            subscriber_calls: AtomicUsize::new(0),
        }
    }

    pub fn on_thread(mut self, post_id: &str, comments: Vec<CommentView>) -> Self {
        self.threads.insert(post_id.to_string(), comments);
        self
    }

    pub fn on_subscribers(mut self, subreddit: &str, count: i64) -> Self {
        self.subscribers.insert(subreddit.to_string(), count);
        self
    }

    /// Served from `cached_subscribers` without counting as a request.
    pub fn with_cached_subscribers(mut self, subreddit: &str, count: i64) -> Self {
        self.cached.insert(subreddit.to_string(), count);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }

    pub fn subscriber_calls(&self) -> usize {
        self.subscriber_calls.load(Ordering::Relaxed)
    }
}

impl Default for MockThreadFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ThreadFetcher for MockThreadFetcher {
    async fn thread(&self, post_id: &str, _comment_limit: usize) -> Result<ThreadDetail> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        let comments = self
            .threads
            .get(post_id)
            .cloned()
            .ok_or_else(|| anyhow!("MockThreadFetcher: no thread registered for {post_id}"))?;
        Ok(ThreadDetail {
            num_comments: Some(comments.len() as i64),
            comments,
        })
    }

    async fn subscribers(&self, subreddit: &str) -> Result<Option<i64>> {
        self.subscriber_calls.fetch_add(1, Ordering::Relaxed);
        Ok(self.subscribers.get(subreddit).copied())
    }

    async fn cached_subscribers(&self, subreddit: &str) -> Option<Option<i64>> {
        self.cached.get(subreddit).map(|n| Some(*n))
    }
}

// ---------------------------------------------------------------------------
// MemoryPostStore
// ---------------------------------------------------------------------------

/// Keeps every saved run. `failing()` makes saves error instead.
pub struct MemoryPostStore {
    runs: Mutex<Vec<RunRecord>>,
    failing: bool,
}

impl MemoryPostStore {
    pub fn new() -> Self {
        Self {
            runs: Mutex::new(Vec::new()),
            failing: false,
        }
    }

    pub fn failing(mut self) -> Self {
        self.failing = true;
        self
    }

    pub fn runs(&self) -> Vec<RunRecord> {
        lock(&self.runs).clone()
    }
}

impl Default for MemoryPostStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PostStore for MemoryPostStore {
    async fn save_run(&self, record: &RunRecord) -> Result<()> {
        if self.failing {
            bail!("MemoryPostStore: database unavailable");
        }
        lock(&self.runs).push(record.clone());
        Ok(())
    }
}
