use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;

// --- Listing envelope ---

/// Every Reddit collection comes back as `{kind: "Listing", data: {children, after}}`.
#[derive(Debug, Clone, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de> + Default"))]
pub struct Listing<T> {
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub data: ListingData<T>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de> + Default"))]
pub struct ListingData<T> {
    #[serde(default = "Vec::new")]
    pub children: Vec<Thing<T>>,
    #[serde(default)]
    pub after: Option<String>,
}

impl<T> Default for ListingData<T> {
    fn default() -> Self {
        Self {
            children: Vec::new(),
            after: None,
        }
    }
}

/// A typed object: `t1` comment, `t3` link/post, `t5` subreddit, `more` stub.
#[derive(Debug, Clone, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de> + Default"))]
pub struct Thing<T> {
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub data: T,
}

// --- Posts ---

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PostData {
    pub id: String,
    pub subreddit: String,
    pub title: String,
    pub selftext: String,
    pub author: String,
    pub permalink: String,
    pub url: String,
    pub created_utc: f64,
    pub score: i64,
    pub num_comments: i64,
    pub upvote_ratio: f64,
    pub over_18: bool,
}

impl PostData {
    /// Canonical link to the discussion, not the outbound `url`.
    pub fn permalink_url(&self) -> String {
        if self.permalink.is_empty() {
            format!("https://reddit.com/comments/{}", self.id)
        } else {
            format!("https://reddit.com{}", self.permalink)
        }
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_opt(self.created_utc as i64, 0).single()
    }
}

// --- Comments ---

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CommentData {
    pub id: String,
    pub author: String,
    pub body: String,
    pub score: i64,
    pub created_utc: f64,
    pub stickied: bool,
}

// --- Subreddits ---

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SubredditAbout {
    pub display_name: String,
    pub title: String,
    pub public_description: String,
    pub subscribers: Option<i64>,
    pub over18: bool,
    pub subreddit_type: String,
}

// --- Request parameters ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SearchSort {
    Relevance,
    Hot,
    Top,
    #[default]
    New,
    Comments,
}

impl SearchSort {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchSort::Relevance => "relevance",
            SearchSort::Hot => "hot",
            SearchSort::Top => "top",
            SearchSort::New => "new",
            SearchSort::Comments => "comments",
        }
    }
}

/// Reddit's coarse `t` search window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimeWindow {
    Day,
    Week,
    Month,
    Year,
    #[default]
    All,
}

impl TimeWindow {
    /// Smallest window that still covers `days` of history.
    pub fn covering(days: u32) -> Self {
        match days {
            0..=1 => TimeWindow::Day,
            2..=7 => TimeWindow::Week,
            8..=31 => TimeWindow::Month,
            32..=365 => TimeWindow::Year,
            _ => TimeWindow::All,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TimeWindow::Day => "day",
            TimeWindow::Week => "week",
            TimeWindow::Month => "month",
            TimeWindow::Year => "year",
            TimeWindow::All => "all",
        }
    }
}

#[derive(Debug, Clone)]
pub struct SearchParams {
    pub query: String,
    pub sort: SearchSort,
    pub window: TimeWindow,
    /// Reddit caps this at 100.
    pub limit: u32,
    pub after: Option<String>,
}

impl SearchParams {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            sort: SearchSort::New,
            window: TimeWindow::All,
            limit: 100,
            after: None,
        }
    }

    pub fn window(mut self, window: TimeWindow) -> Self {
        self.window = window;
        self
    }

    pub fn after(mut self, cursor: Option<String>) -> Self {
        self.after = cursor;
        self
    }

    pub(crate) fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![
            ("q", self.query.clone()),
            ("sort", self.sort.as_str().to_string()),
            ("t", self.window.as_str().to_string()),
            ("limit", self.limit.min(100).to_string()),
            ("raw_json", "1".to_string()),
        ];
        if let Some(ref after) = self.after {
            pairs.push(("after", after.clone()));
        }
        pairs
    }
}

// --- Client results ---

#[derive(Debug, Clone, Default)]
pub struct SearchPage {
    pub posts: Vec<PostData>,
    /// Cursor for the next page; `None` when Reddit has no more.
    pub after: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct Thread {
    pub post: Option<PostData>,
    pub comments: Vec<CommentData>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_window_covers_lookback() {
        assert_eq!(TimeWindow::covering(1), TimeWindow::Day);
        assert_eq!(TimeWindow::covering(7), TimeWindow::Week);
        assert_eq!(TimeWindow::covering(30), TimeWindow::Month);
        assert_eq!(TimeWindow::covering(90), TimeWindow::Year);
        assert_eq!(TimeWindow::covering(1000), TimeWindow::All);
    }

    #[test]
    fn search_listing_with_missing_fields_parses() {
        let raw = r#"{
            "kind": "Listing",
            "data": {
                "after": "t3_abc",
                "children": [
                    {"kind": "t3", "data": {"id": "abc", "title": "Slow CI", "permalink": "/r/devops/comments/abc/slow_ci/"}},
                    {"kind": "t3", "data": {}}
                ]
            }
        }"#;
        let listing: Listing<PostData> = serde_json::from_str(raw).unwrap();
        assert_eq!(listing.data.after.as_deref(), Some("t3_abc"));
        assert_eq!(listing.data.children.len(), 2);
        let post = &listing.data.children[0].data;
        assert_eq!(post.permalink_url(), "https://reddit.com/r/devops/comments/abc/slow_ci/");
        assert_eq!(post.score, 0);
    }

    #[test]
    fn query_pairs_include_cursor_and_cap_limit() {
        let mut params = SearchParams::new("flaky tests")
            .window(TimeWindow::Month)
            .after(Some("t3_x".into()));
        params.limit = 500;
        let pairs = params.query_pairs();
        assert!(pairs.contains(&("t", "month".to_string())));
        assert!(pairs.contains(&("limit", "100".to_string())));
        assert!(pairs.contains(&("after", "t3_x".to_string())));
        assert!(pairs.contains(&("sort", "new".to_string())));
    }
}
