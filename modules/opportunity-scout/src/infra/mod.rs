pub mod embedder;
pub mod llm;
pub mod reddit;
pub mod subreddits;

pub use embedder::{build_embedders, Embedder};
pub use llm::ChatModel;
pub use reddit::{RedditSearcher, RedditThreads};
pub use subreddits::SubredditDirectory;
