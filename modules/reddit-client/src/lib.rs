pub mod error;
pub mod types;

pub use error::{RedditError, Result};
pub use types::{
    CommentData, Listing, PostData, SearchPage, SearchParams, SearchSort, SubredditAbout, Thing,
    Thread, TimeWindow,
};

use std::time::Duration;

use rand::seq::IndexedRandom;
use serde::de::DeserializeOwned;

const BASE_URL: &str = "https://www.reddit.com";

/// Browser-like agents; the anonymous JSON API throttles obvious bots harder.
const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/96.0.4664.110 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/15.0 Safari/605.1.15",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:94.0) Gecko/20100101 Firefox/94.0",
];

pub struct RedditClient {
    client: reqwest::Client,
    base_url: String,
    user_agent: Option<String>,
}

impl RedditClient {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            base_url: BASE_URL.to_string(),
            user_agent: None,
        }
    }

    /// Pin a single User-Agent instead of rotating.
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    fn user_agent(&self) -> String {
        match self.user_agent {
            Some(ref ua) => ua.clone(),
            None => USER_AGENTS
                .choose(&mut rand::rng())
                .copied()
                .unwrap_or(USER_AGENTS[0])
                .to_string(),
        }
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .client
            .get(&url)
            .header(reqwest::header::USER_AGENT, self.user_agent())
            .query(query)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(RedditError::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        let text = resp.text().await?;
        Ok(serde_json::from_str(&text)?)
    }

    /// One page of site-wide search results.
    pub async fn search(&self, params: &SearchParams) -> Result<SearchPage> {
        if params.query.trim().is_empty() {
            return Err(RedditError::InvalidInput("empty search query".into()));
        }

        let listing: Listing<PostData> =
            self.get_json("/search.json", &params.query_pairs()).await?;

        let posts: Vec<PostData> = listing
            .data
            .children
            .into_iter()
            .filter(|thing| thing.kind == "t3" || thing.kind.is_empty())
            .map(|thing| thing.data)
            .filter(|post| !post.id.is_empty())
            .collect();

        tracing::debug!(
            query = %params.query,
            count = posts.len(),
            has_more = listing.data.after.is_some(),
            "Reddit search page"
        );

        Ok(SearchPage {
            posts,
            after: listing.data.after,
        })
    }

    /// A post and its top-level comments, best first.
    pub async fn thread(&self, post_id: &str, comment_limit: usize) -> Result<Thread> {
        let id = post_id.trim_start_matches("t3_");
        if id.is_empty() {
            return Err(RedditError::InvalidInput("empty post id".into()));
        }

        let query = [
            ("sort", "top".to_string()),
            ("depth", "1".to_string()),
            ("limit", comment_limit.to_string()),
            ("raw_json", "1".to_string()),
        ];
        let (post_listing, comment_listing): (Listing<PostData>, Listing<CommentData>) = self
            .get_json(&format!("/comments/{}.json", id), &query)
            .await?;

        let post = post_listing.data.children.into_iter().next().map(|t| t.data);

        let mut comments: Vec<CommentData> = comment_listing
            .data
            .children
            .into_iter()
            .filter(|thing| thing.kind == "t1")
            .map(|thing| thing.data)
            .filter(|c| !c.stickied && !c.body.is_empty() && c.body != "[deleted]" && c.body != "[removed]")
            .collect();
        comments.sort_by(|a, b| b.score.cmp(&a.score));
        comments.truncate(comment_limit);

        Ok(Thread { post, comments })
    }

    /// Community metadata. Private or banned communities surface as
    /// `RedditError::Api` with status 403 or 404.
    pub async fn subreddit_about(&self, name: &str) -> Result<SubredditAbout> {
        let name = normalize_subreddit(name);
        if name.is_empty() {
            return Err(RedditError::InvalidInput("empty subreddit name".into()));
        }

        let thing: Thing<SubredditAbout> = self
            .get_json(&format!("/r/{}/about.json", name), &[])
            .await?;

        Ok(thing.data)
    }
}

impl Default for RedditClient {
    fn default() -> Self {
        Self::new()
    }
}

/// `r/rust`, `/r/rust/` and `Rust` all name the same community.
pub fn normalize_subreddit(name: &str) -> String {
    let trimmed = name.trim().trim_matches('/');
    let bare = trimmed
        .strip_prefix("r/")
        .or_else(|| trimmed.strip_prefix("R/"))
        .unwrap_or(trimmed);
    bare.trim_matches('/').to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_subreddit_strips_prefixes() {
        assert_eq!(normalize_subreddit("r/DevOps"), "devops");
        assert_eq!(normalize_subreddit("/r/rust/"), "rust");
        assert_eq!(normalize_subreddit("webdev"), "webdev");
        assert_eq!(normalize_subreddit("  "), "");
    }

    #[test]
    fn pinned_user_agent_wins() {
        let client = RedditClient::new().with_user_agent("opportunity-engine/0.1");
        assert_eq!(client.user_agent(), "opportunity-engine/0.1");
    }

    #[test]
    fn rotating_user_agent_comes_from_pool() {
        let client = RedditClient::new();
        assert!(USER_AGENTS.contains(&client.user_agent().as_str()));
    }

    #[test]
    fn thread_payload_parses_as_pair() {
        let raw = r#"[
            {"kind": "Listing", "data": {"children": [{"kind": "t3", "data": {"id": "abc", "title": "t"}}]}},
            {"kind": "Listing", "data": {"children": [
                {"kind": "t1", "data": {"id": "c1", "body": "first", "score": 3}},
                {"kind": "more", "data": {"count": 12, "children": ["c9"]}}
            ]}}
        ]"#;
        let (posts, comments): (Listing<PostData>, Listing<CommentData>) =
            serde_json::from_str(raw).unwrap();
        assert_eq!(posts.data.children[0].data.id, "abc");
        assert_eq!(comments.data.children.len(), 2);
        assert_eq!(comments.data.children[1].kind, "more");
    }

    #[tokio::test]
    async fn empty_query_is_rejected_before_network() {
        let client = RedditClient::new().with_base_url("http://127.0.0.1:9");
        let err = client.search(&SearchParams::new("   ")).await.unwrap_err();
        assert!(matches!(err, RedditError::InvalidInput(_)));
        assert!(!err.is_transient());
    }
}
