use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tracing::debug;

use opportunity_common::{CandidateItem, CommentView};
use reddit_client::{CommentData, PostData, RedditClient, SearchParams, TimeWindow};

use super::subreddits::SubredditDirectory;
use crate::traits::{PostSearcher, RetrievedPage, ThreadDetail, ThreadFetcher};

/// `search.json`, newest first, one page per call.
pub struct RedditSearcher {
    client: Arc<RedditClient>,
}

impl RedditSearcher {
    pub fn new(client: Arc<RedditClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PostSearcher for RedditSearcher {
    async fn search_page(
        &self,
        keyword: &str,
        age_days: u32,
        after: Option<&str>,
    ) -> Result<RetrievedPage> {
        let params = SearchParams::new(keyword)
            .window(TimeWindow::covering(age_days))
            .after(after.map(str::to_string));
        let page = self.client.search(&params).await?;

        let items = page.posts.into_iter().filter_map(to_candidate).collect();
        Ok(RetrievedPage {
            items,
            after: page.after,
        })
    }
}

fn to_candidate(post: PostData) -> Option<CandidateItem> {
    let Some(created_at) = post.created_at() else {
        debug!(post_id = %post.id, created_utc = post.created_utc, "Dropping post with bad timestamp");
        return None;
    };
    let permalink = post.permalink_url();
    let mut item = CandidateItem::new(post.id, post.subreddit, post.title, post.selftext, created_at)
        .with_score(post.score)
        .with_permalink(permalink);
    item.author = post.author;
    item.num_comments = post.num_comments;
    Some(item)
}

fn to_comment(comment: CommentData) -> CommentView {
    CommentView {
        id: comment.id,
        author: comment.author,
        body: comment.body,
        score: comment.score,
    }
}

/// Thread and community lookups for hydration.
pub struct RedditThreads {
    client: Arc<RedditClient>,
    directory: Arc<SubredditDirectory>,
}

impl RedditThreads {
    pub fn new(client: Arc<RedditClient>, directory: Arc<SubredditDirectory>) -> Self {
        Self { client, directory }
    }
}

#[async_trait]
impl ThreadFetcher for RedditThreads {
    async fn thread(&self, post_id: &str, comment_limit: usize) -> Result<ThreadDetail> {
        let thread = self.client.thread(post_id, comment_limit).await?;
        Ok(ThreadDetail {
            num_comments: thread.post.map(|p| p.num_comments),
            comments: thread.comments.into_iter().map(to_comment).collect(),
        })
    }

    async fn subscribers(&self, subreddit: &str) -> Result<Option<i64>> {
        self.directory.subscribers(subreddit).await
    }

    async fn cached_subscribers(&self, subreddit: &str) -> Option<Option<i64>> {
        self.directory.lookup_cached(subreddit).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_post_fields() {
        let post = PostData {
            id: "abc".into(),
            subreddit: "devops".into(),
            title: "CI takes 40 minutes".into(),
            selftext: "Every merge".into(),
            author: "u1".into(),
            permalink: "/r/devops/comments/abc/ci/".into(),
            created_utc: 1_700_000_000.0,
            score: 12,
            num_comments: 4,
            ..Default::default()
        };
        let item = to_candidate(post).unwrap();
        assert_eq!(item.id, "abc");
        assert_eq!(item.body, "Every merge");
        assert_eq!(item.score, 12);
        assert_eq!(item.num_comments, 4);
        assert_eq!(item.permalink, "https://reddit.com/r/devops/comments/abc/ci/");
        assert_eq!(item.created_at.timestamp(), 1_700_000_000);
    }
}
