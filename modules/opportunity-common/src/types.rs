use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::PipelineError;
use crate::stats::RunStats;

// ---------------------------------------------------------------------------
// Embedding provider
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum EmbedProvider {
    #[default]
    #[serde(rename = "openai")]
    OpenAi,
    #[serde(rename = "miniLM", alias = "minilm")]
    MiniLm,
    #[serde(rename = "bge")]
    Bge,
}

impl EmbedProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmbedProvider::OpenAi => "openai",
            EmbedProvider::MiniLm => "miniLM",
            EmbedProvider::Bge => "bge",
        }
    }

    /// Self-hosted models are free to call.
    pub fn is_local(&self) -> bool {
        !matches!(self, EmbedProvider::OpenAi)
    }
}

impl fmt::Display for EmbedProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EmbedProvider {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "openai" => Ok(EmbedProvider::OpenAi),
            "minilm" => Ok(EmbedProvider::MiniLm),
            "bge" => Ok(EmbedProvider::Bge),
            other => Err(PipelineError::InvalidArgument(format!(
                "unknown embedding provider: {other}"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

pub const MAX_POSTS_CEILING: u32 = 1000;
/// A century; older windows are meaningless for Reddit.
pub const MAX_AGE_DAYS: u32 = 36_500;

/// One search run's input. Provider, tier and vector flags fall back to
/// the pipeline configuration when absent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchRequest {
    pub audience: String,
    #[serde(default)]
    pub questions: Vec<String>,
    #[serde(default)]
    pub max_posts: u32,
    #[serde(default = "default_age_days")]
    pub age_days: u32,
    #[serde(default)]
    pub min_score: i64,
    #[serde(default)]
    pub embed_provider: Option<EmbedProvider>,
    #[serde(default)]
    pub premium: Option<bool>,
    #[serde(default)]
    pub store_vectors: Option<bool>,
}

fn default_age_days() -> u32 {
    30
}

impl SearchRequest {
    pub fn new(audience: impl Into<String>, questions: Vec<String>, max_posts: u32) -> Self {
        Self {
            audience: audience.into(),
            questions,
            max_posts,
            age_days: default_age_days(),
            min_score: 0,
            embed_provider: None,
            premium: None,
            store_vectors: None,
        }
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.audience.trim().is_empty() {
            return Err(PipelineError::Validation("audience must not be empty".into()));
        }
        if !self.questions.iter().any(|q| !q.trim().is_empty()) {
            return Err(PipelineError::Validation(
                "at least one non-empty question is required".into(),
            ));
        }
        if self.max_posts == 0 {
            return Err(PipelineError::Validation("maxPosts must be positive".into()));
        }
        if self.max_posts > MAX_POSTS_CEILING {
            return Err(PipelineError::Validation(format!(
                "maxPosts must be at most {MAX_POSTS_CEILING}"
            )));
        }
        if self.age_days == 0 {
            return Err(PipelineError::Validation("ageDays must be positive".into()));
        }
        if self.age_days > MAX_AGE_DAYS {
            return Err(PipelineError::Validation(format!(
                "ageDays must be at most {MAX_AGE_DAYS}"
            )));
        }
        Ok(())
    }

    /// Audience and questions as one text, used for the reference embedding.
    pub fn combined_query(&self) -> String {
        let mut parts = vec![self.audience.trim().to_string()];
        parts.extend(
            self.questions
                .iter()
                .map(|q| q.trim())
                .filter(|q| !q.is_empty())
                .map(str::to_string),
        );
        parts.join("\n")
    }
}

// ---------------------------------------------------------------------------
// Candidate items
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentView {
    pub id: String,
    pub author: String,
    pub body: String,
    pub score: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GateDecision {
    Accept,
    Reject,
}

/// A discovered post as it moves through the stages.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateItem {
    pub id: String,
    pub subreddit: String,
    pub title: String,
    pub body: String,
    pub author: String,
    pub score: i64,
    pub num_comments: i64,
    pub created_at: DateTime<Utc>,
    pub permalink: String,

    /// Normalized title + body, bounded length.
    pub text: String,
    pub snippet: String,

    pub similarity: Option<f32>,
    pub embedding: Option<Vec<f32>>,
    pub decision: Option<GateDecision>,

    pub top_comments: Vec<CommentView>,
    pub subreddit_subscribers: Option<i64>,
    pub hydrated: bool,
}

impl CandidateItem {
    pub fn new(
        id: impl Into<String>,
        subreddit: impl Into<String>,
        title: impl Into<String>,
        body: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        let id = id.into();
        let subreddit = subreddit.into();
        let permalink = format!("https://reddit.com/r/{}/comments/{}", subreddit, id);
        Self {
            id,
            subreddit,
            title: title.into(),
            body: body.into(),
            author: String::new(),
            score: 0,
            num_comments: 0,
            created_at,
            permalink,
            text: String::new(),
            snippet: String::new(),
            similarity: None,
            embedding: None,
            decision: None,
            top_comments: Vec::new(),
            subreddit_subscribers: None,
            hydrated: false,
        }
    }

    pub fn with_score(mut self, score: i64) -> Self {
        self.score = score;
        self
    }

    pub fn with_permalink(mut self, permalink: impl Into<String>) -> Self {
        self.permalink = permalink.into();
        self
    }

    /// A post with no title, or with neither a body nor any replies,
    /// has nothing to quote.
    pub fn has_meaningful_content(&self) -> bool {
        !self.title.trim().is_empty() && (!self.body.trim().is_empty() || self.num_comments > 0)
    }

    /// The text that gets embedded and classified. Falls back to the raw
    /// fields if normalization has not run yet.
    pub fn content(&self) -> String {
        if self.text.is_empty() {
            format!("{}\n\n{}", self.title, self.body).trim().to_string()
        } else {
            self.text.clone()
        }
    }

    pub fn to_view(&self) -> PostView {
        PostView {
            id: self.id.clone(),
            url: self.permalink.clone(),
            score: self.score,
            created_utc: self.created_at.timestamp(),
            subreddit: self.subreddit.clone(),
            snippet: self.snippet.clone(),
            title: self.title.clone(),
            num_comments: self.num_comments,
            similarity: self.similarity,
            top_comments: self.top_comments.clone(),
            subreddit_subscribers: self.subreddit_subscribers,
        }
    }
}

// ---------------------------------------------------------------------------
// Response
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostView {
    pub id: String,
    pub url: String,
    pub score: i64,
    pub created_utc: i64,
    pub subreddit: String,
    pub snippet: String,
    pub title: String,
    pub num_comments: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub similarity: Option<f32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub top_comments: Vec<CommentView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subreddit_subscribers: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResponse {
    pub run_id: Uuid,
    pub posts: Vec<PostView>,
    pub stats: RunStats,
}

// ---------------------------------------------------------------------------
// Run lifecycle
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Validating,
    BuildingKeywords,
    Retrieving,
    Normalizing,
    Pruning,
    Gating,
    Hydrating,
    Persisting,
    Done,
    Failed,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunState::Validating => "validating",
            RunState::BuildingKeywords => "building_keywords",
            RunState::Retrieving => "retrieving",
            RunState::Normalizing => "normalizing",
            RunState::Pruning => "pruning",
            RunState::Gating => "gating",
            RunState::Hydrating => "hydrating",
            RunState::Persisting => "persisting",
            RunState::Done => "done",
            RunState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Pollable status of a tracked run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    Running {
        state: RunState,
    },
    Completed {
        #[serde(rename = "postCount")]
        post_count: usize,
        stats: RunStats,
    },
    Failed {
        error: String,
    },
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Completed { .. } | RunStatus::Failed { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> SearchRequest {
        SearchRequest::new(
            "software developers",
            vec!["How do they describe slow CI pipelines?".into()],
            20,
        )
    }

    #[test]
    fn valid_request_passes() {
        assert!(request().validate().is_ok());
    }

    #[test]
    fn empty_audience_is_rejected() {
        let mut req = request();
        req.audience = "   ".into();
        assert!(matches!(req.validate(), Err(PipelineError::Validation(_))));
    }

    #[test]
    fn blank_questions_are_rejected() {
        let mut req = request();
        req.questions = vec!["".into(), "  ".into()];
        assert!(req.validate().is_err());
    }

    #[test]
    fn meaningful_content_needs_title_and_body_or_comments() {
        let mut item = CandidateItem::new("p", "devops", "Why is CI slow", "", Utc::now());
        assert!(!item.has_meaningful_content());
        item.num_comments = 3;
        assert!(item.has_meaningful_content());
        item.title = "  ".into();
        assert!(!item.has_meaningful_content());
    }

    #[test]
    fn oversized_age_window_is_rejected() {
        let mut req = request();
        req.age_days = 100_000_000;
        assert!(matches!(req.validate(), Err(PipelineError::Validation(_))));
        req.age_days = MAX_AGE_DAYS;
        assert!(req.validate().is_ok());
    }

    #[test]
    fn zero_max_posts_is_rejected() {
        let mut req = request();
        req.max_posts = 0;
        assert!(req.validate().is_err());
    }

    #[test]
    fn request_parses_camel_case_with_defaults() {
        let req: SearchRequest = serde_json::from_str(
            r#"{"audience":"nurses","questions":["burnout?"],"maxPosts":5,"embedProvider":"miniLM"}"#,
        )
        .unwrap();
        assert_eq!(req.max_posts, 5);
        assert_eq!(req.age_days, 30);
        assert_eq!(req.embed_provider, Some(EmbedProvider::MiniLm));
        assert!(req.premium.is_none());
    }

    #[test]
    fn provider_from_str_is_case_insensitive() {
        assert_eq!("MiniLM".parse::<EmbedProvider>().unwrap(), EmbedProvider::MiniLm);
        assert!("word2vec".parse::<EmbedProvider>().is_err());
    }

    #[test]
    fn run_status_serializes_with_tag() {
        let json = serde_json::to_value(RunStatus::Running {
            state: RunState::Gating,
        })
        .unwrap();
        assert_eq!(json["status"], "running");
        assert_eq!(json["state"], "gating");
    }

    #[test]
    fn combined_query_skips_blank_questions() {
        let mut req = request();
        req.questions.push("  ".into());
        assert_eq!(
            req.combined_query(),
            "software developers\nHow do they describe slow CI pipelines?"
        );
    }
}
