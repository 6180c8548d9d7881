//! Database statistics and health overview.
//!
//! Summarises what the store holds: item and comment counts, how much of
//! it has been summarized, clustered and scored, and a per-collection
//! breakdown. Used by `digest stats` to confirm that scrapes and the
//! analysis jobs are keeping up.

use anyhow::Result;
use sqlx::{Row, SqlitePool};

use crate::config::Config;
use crate::db;
use crate::models::NO_SUMMARY;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoreTotals {
    pub items: i64,
    pub comments: i64,
    pub summarized: i64,
    pub clustered: i64,
    pub scored: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CollectionStats {
    pub collection: String,
    pub items: i64,
    pub comments: i64,
    pub clustered: i64,
    pub scored: i64,
    pub newest: Option<f64>,
}

pub async fn store_totals(pool: &SqlitePool) -> Result<StoreTotals> {
    let row = sqlx::query(
        r#"
        SELECT
            COUNT(*) AS items,
            COUNT(CASE WHEN summary IS NOT NULL AND summary != ? THEN 1 END) AS summarized,
            COUNT(cluster_id) AS clustered,
            COUNT(sentiment) AS scored
        FROM items
        "#,
    )
    .bind(NO_SUMMARY)
    .fetch_one(pool)
    .await?;

    let comments: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM comments")
        .fetch_one(pool)
        .await?;

    Ok(StoreTotals {
        items: row.get("items"),
        comments,
        summarized: row.get("summarized"),
        clustered: row.get("clustered"),
        scored: row.get("scored"),
    })
}

pub async fn collection_stats(pool: &SqlitePool) -> Result<Vec<CollectionStats>> {
    let rows = sqlx::query(
        r#"
        SELECT
            i.collection,
            COUNT(*) AS items,
            COALESCE(SUM(c.n), 0) AS comments,
            COUNT(i.cluster_id) AS clustered,
            COUNT(i.sentiment) AS scored,
            MAX(i.created_at) AS newest
        FROM items i
        LEFT JOIN (SELECT item_id, COUNT(*) AS n FROM comments GROUP BY item_id) c
            ON c.item_id = i.id
        GROUP BY i.collection
        ORDER BY items DESC, i.collection ASC
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| CollectionStats {
            collection: row.get("collection"),
            items: row.get("items"),
            comments: row.get("comments"),
            clustered: row.get("clustered"),
            scored: row.get("scored"),
            newest: row.get("newest"),
        })
        .collect())
}

/// Run the stats command: query the database and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let totals = store_totals(&pool).await?;
    let collections = collection_stats(&pool).await?;
    pool.close().await;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("Thread Digest — Database Stats");
    println!("==============================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!();
    println!("  Items:       {}", totals.items);
    println!("  Comments:    {}", totals.comments);
    println!("  Summarized:  {}", coverage(totals.summarized, totals.items));
    println!("  Clustered:   {}", coverage(totals.clustered, totals.items));
    println!("  Scored:      {}", coverage(totals.scored, totals.items));

    if !collections.is_empty() {
        println!();
        println!("  By collection:");
        println!(
            "  {:<24} {:>6} {:>9} {:>9} {:>7}   {}",
            "COLLECTION", "ITEMS", "COMMENTS", "CLUSTERED", "SCORED", "NEWEST"
        );
        println!("  {}", "-".repeat(80));

        for c in &collections {
            let newest = match c.newest {
                Some(ts) => format_ts_relative(ts as i64),
                None => "never".to_string(),
            };
            println!(
                "  {:<24} {:>6} {:>9} {:>9} {:>7}   {}",
                c.collection, c.items, c.comments, c.clustered, c.scored, newest
            );
        }
    }

    println!();
    Ok(())
}

fn coverage(part: i64, total: i64) -> String {
    let pct = if total > 0 { (part * 100) / total } else { 0 };
    format!("{} / {} ({}%)", part, total, pct)
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format a Unix timestamp as a relative time string (e.g. "3 hours ago").
fn format_ts_relative(ts: i64) -> String {
    let delta = chrono::Utc::now().timestamp() - ts;

    if delta < 0 {
        return format_ts_short(ts);
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        format_ts_short(ts)
    }
}

fn format_ts_short(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}
