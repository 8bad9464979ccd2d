use anyhow::{Context, Result};
use async_trait::async_trait;
use pgvector::Vector;
use sqlx::types::Json;
use sqlx::PgPool;
use tracing::info;

use crate::traits::{PostStore, RunRecord};

/// Finished runs in Postgres: one `search_runs` row plus one
/// `search_posts` row per returned post, written in a single transaction.
pub struct PgPostStore {
    pool: PgPool,
}

impl PgPostStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PostStore for PgPostStore {
    async fn save_run(&self, record: &RunRecord) -> Result<()> {
        let mut tx = self.pool.begin().await.context("begin transaction")?;

        sqlx::query(
            "INSERT INTO search_runs (id, audience, questions, request, stats, post_count)
             VALUES ($1, $2, $3, $4, $5, $6)
             ON CONFLICT (id) DO UPDATE SET stats = EXCLUDED.stats,
                                            post_count = EXCLUDED.post_count",
        )
        .bind(record.run_id)
        .bind(&record.request.audience)
        .bind(Json(&record.request.questions))
        .bind(Json(&record.request))
        .bind(Json(&record.stats))
        .bind(record.items.len() as i32)
        .execute(&mut *tx)
        .await
        .context("insert search_runs")?;

        for (rank, item) in record.items.iter().enumerate() {
            let embedding = if record.store_vectors {
                item.embedding.clone().map(Vector::from)
            } else {
                None
            };

            sqlx::query(
                "INSERT INTO search_posts
                    (run_id, post_id, rank, subreddit, title, snippet, url, author, score,
                     num_comments, created_utc, similarity, top_comments, subreddit_subscribers, embedding)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
                 ON CONFLICT (run_id, post_id) DO NOTHING",
            )
            .bind(record.run_id)
            .bind(&item.id)
            .bind(rank as i32)
            .bind(&item.subreddit)
            .bind(&item.title)
            .bind(&item.snippet)
            .bind(&item.permalink)
            .bind(&item.author)
            .bind(item.score)
            .bind(item.num_comments)
            .bind(item.created_at)
            .bind(item.similarity)
            .bind(Json(&item.top_comments))
            .bind(item.subreddit_subscribers)
            .bind(embedding)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("insert search_posts {}", item.id))?;
        }

        tx.commit().await.context("commit run")?;

        info!(
            run_id = %record.run_id,
            posts = record.items.len(),
            vectors = record.store_vectors,
            "Run persisted"
        );
        Ok(())
    }
}
