//! SQLite-backed [`Store`].
//!
//! Each call to [`persist_batch`](Store::persist_batch) is one transaction,
//! so a crash mid-run loses at most the batch in flight.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::SqlitePool;
use std::collections::HashSet;
use tracing::debug;

use crate::models::{NewItem, PersistReport};
use crate::store::Store;

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn existing_ids(&self, ids: &[String]) -> Result<HashSet<String>> {
        if ids.is_empty() {
            return Ok(HashSet::new());
        }
        let found: Vec<String> =
            sqlx::query_scalar("SELECT id FROM items WHERE id IN (SELECT value FROM json_each(?))")
                .bind(serde_json::to_string(ids)?)
                .fetch_all(&self.pool)
                .await
                .context("Failed to read existing item ids")?;
        Ok(found.into_iter().collect())
    }

    async fn persist_batch(&self, items: &[NewItem]) -> Result<PersistReport> {
        let mut report = PersistReport::default();
        let mut tx = self.pool.begin().await?;

        for item in items {
            let post = &item.post;
            let inserted = sqlx::query(
                r#"
                INSERT OR IGNORE INTO items (id, collection, title, body, author, score, created_at, url, summary)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&post.id)
            .bind(&post.collection)
            .bind(&post.title)
            .bind(&post.body)
            .bind(&post.author)
            .bind(post.score)
            .bind(post.created_at)
            .bind(&post.url)
            .bind(&item.summary)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("Failed to insert item {}", post.id))?
            .rows_affected();
            report.items_inserted += inserted;

            for comment in &item.comments {
                let inserted = sqlx::query(
                    r#"
                    INSERT OR IGNORE INTO comments (id, item_id, author, body, score, created_at)
                    VALUES (?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(&comment.id)
                .bind(&post.id)
                .bind(&comment.author)
                .bind(&comment.body)
                .bind(comment.score)
                .bind(comment.created_at)
                .execute(&mut *tx)
                .await
                .with_context(|| format!("Failed to insert comment {}", comment.id))?
                .rows_affected();
                report.comments_inserted += inserted;
            }
        }

        tx.commit().await?;
        debug!(
            items = report.items_inserted,
            comments = report.comments_inserted,
            "batch committed"
        );
        Ok(report)
    }
}
