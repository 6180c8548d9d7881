//! Item retrieval by ID.
//!
//! Fetches one stored item and its comments. Used by both the `digest get`
//! CLI command and `GET /api/items/{id}`.

use anyhow::{bail, Result};
use serde::Serialize;
use sqlx::{Row, SqlitePool};

use crate::config::Config;
use crate::db;
use crate::sentiment::Bucket;

#[derive(Debug, Clone, Serialize)]
pub struct ItemResponse {
    pub id: String,
    pub collection: String,
    pub title: String,
    pub body: Option<String>,
    pub author: Option<String>,
    pub score: Option<i64>,
    pub created_at: String, // ISO8601
    pub url: Option<String>,
    pub summary: Option<String>,
    pub cluster_id: Option<i64>,
    pub sentiment: Option<f64>,
    pub sentiment_label: Option<&'static str>,
    pub comments: Vec<CommentResponse>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CommentResponse {
    pub id: String,
    pub author: Option<String>,
    pub body: Option<String>,
    pub score: Option<i64>,
    pub created_at: String,
}

/// Load one item with its comments (highest score first), or `None`.
pub async fn get_item_from_pool(pool: &SqlitePool, id: &str) -> Result<Option<ItemResponse>> {
    let row = sqlx::query(
        "SELECT id, collection, title, body, author, score, created_at, url, summary, cluster_id, sentiment \
         FROM items WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let comment_rows = sqlx::query(
        "SELECT id, author, body, score, created_at FROM comments WHERE item_id = ? \
         ORDER BY score DESC, id ASC",
    )
    .bind(id)
    .fetch_all(pool)
    .await?;

    let comments = comment_rows
        .iter()
        .map(|c| CommentResponse {
            id: c.get("id"),
            author: c.get("author"),
            body: c.get("body"),
            score: c.get("score"),
            created_at: format_ts_iso(c.get("created_at")),
        })
        .collect();

    let sentiment: Option<f64> = row.get("sentiment");
    Ok(Some(ItemResponse {
        id: row.get("id"),
        collection: row.get("collection"),
        title: row.get("title"),
        body: row.get("body"),
        author: row.get("author"),
        score: row.get("score"),
        created_at: format_ts_iso(row.get("created_at")),
        url: row.get("url"),
        summary: row.get("summary"),
        cluster_id: row.get("cluster_id"),
        sentiment,
        sentiment_label: sentiment.map(|s| Bucket::of(s).as_str()),
        comments,
    }))
}

pub async fn get_item(config: &Config, id: &str) -> Result<ItemResponse> {
    let pool = db::connect(config).await?;
    let item = get_item_from_pool(&pool, id).await;
    pool.close().await;

    match item? {
        Some(item) => Ok(item),
        None => bail!("item not found: {}", id),
    }
}

/// CLI entry point: prints the item as pretty JSON.
pub async fn run_get(config: &Config, id: &str) -> Result<()> {
    let item = get_item(config, id).await?;
    println!("{}", serde_json::to_string_pretty(&item)?);
    Ok(())
}

/// Epoch seconds to ISO8601; unknown timestamps render as an empty string.
pub fn format_ts_iso(ts: Option<f64>) -> String {
    ts.and_then(|t| chrono::DateTime::from_timestamp(t as i64, 0))
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_default()
}
