//! End-to-end pipeline runs against a real SQLite store with an
//! in-process source and summarizer.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use tempfile::TempDir;

use thread_digest::config::Config;
use thread_digest::db;
use thread_digest::ingest::Pipeline;
use thread_digest::migrate::migrate_pool;
use thread_digest::models::{CommentRecord, PostRecord, SummaryMap, SummaryRequest};
use thread_digest::source::{ListingOptions, Source};
use thread_digest::sqlite_store::SqliteStore;
use thread_digest::summarize::{SummarizeError, Summarizer};

fn post(id: &str, collection: &str) -> PostRecord {
    PostRecord {
        id: id.to_string(),
        collection: collection.to_string(),
        title: format!("Thread {}", id),
        body: "a long opening post that explains the question in detail ".repeat(5),
        author: "poster".to_string(),
        score: 42,
        created_at: 1_700_000_000.0,
        url: format!("https://example.com/{}", id),
    }
}

fn comment(id: &str, body: &str, score: i64) -> CommentRecord {
    CommentRecord {
        id: id.to_string(),
        author: "replier".to_string(),
        body: body.to_string(),
        score,
        created_at: 1_700_000_100.0,
    }
}

struct StaticSource {
    posts: Vec<PostRecord>,
    comments: HashMap<String, Vec<CommentRecord>>,
}

#[async_trait]
impl Source for StaticSource {
    fn name(&self) -> &str {
        "static"
    }

    async fn listing(&self, collection: &str, _options: &ListingOptions) -> Result<Vec<PostRecord>> {
        Ok(self
            .posts
            .iter()
            .filter(|p| collection == "all" || p.collection.eq_ignore_ascii_case(collection))
            .cloned()
            .collect())
    }

    async fn comment_tree(&self, post: &PostRecord) -> Result<Vec<CommentRecord>> {
        Ok(self.comments.get(&post.id).cloned().unwrap_or_default())
    }
}

struct TableSummarizer {
    replies: HashMap<String, String>,
    calls: Mutex<usize>,
}

impl TableSummarizer {
    fn new(replies: &[(&str, &str)]) -> Self {
        Self {
            replies: replies
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            calls: Mutex::new(0),
        }
    }

    fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl Summarizer for TableSummarizer {
    async fn summarize(&self, batch: &[SummaryRequest]) -> Result<SummaryMap, SummarizeError> {
        *self.calls.lock().unwrap() += 1;
        Ok(batch
            .iter()
            .filter_map(|r| self.replies.get(&r.id).map(|s| (r.id.clone(), s.clone())))
            .collect())
    }
}

async fn setup(batch_size: usize) -> (TempDir, Config, SqliteStore) {
    let tmp = TempDir::new().unwrap();
    let db_path = tmp.path().join("digest.sqlite");
    let mut config: Config =
        toml::from_str(&format!("[db]\npath = \"{}\"\n", db_path.display())).unwrap();
    config.pipeline.batch_size = batch_size;

    let pool = db::connect(&config).await.unwrap();
    migrate_pool(&pool).await.unwrap();
    (tmp, config, SqliteStore::new(pool))
}

async fn run_once(
    config: &Config,
    source: &StaticSource,
    store: &SqliteStore,
    summarizer: &TableSummarizer,
    collection: &str,
) -> thread_digest::ingest::RunStats {
    let options = ListingOptions::from_config(&config.source);
    Pipeline::new(config, source, store, summarizer)
        .run(&[collection.to_string()], &options)
        .await
        .unwrap()
}

#[tokio::test]
async fn stores_summarized_items_and_skips_sentinels() {
    let (_tmp, config, store) = setup(2).await;
    let source = StaticSource {
        posts: vec![post("a", "rust"), post("b", "rust"), post("c", "rust")],
        comments: HashMap::from([(
            "a".to_string(),
            vec![
                comment("a1", "I moved our service over last year and it went fine.", 10),
                comment("a2", "Compile times are the main cost you pay.", 4),
            ],
        )]),
    };
    let summarizer = TableSummarizer::new(&[
        ("a", "Here is the summary: Most people said the migration paid off despite slower builds."),
        ("b", "NoSummaryGenerated"),
        ("c", "The thread agreed that profiling should come before any rewrite."),
    ]);

    let stats = run_once(&config, &source, &store, &summarizer, "rust").await;
    assert_eq!(stats.items_stored, 2);
    assert_eq!(stats.comments_stored, 2);
    assert_eq!(stats.unsummarizable, 1);
    assert_eq!(summarizer.calls(), 2);

    let rows: Vec<(String, String, Option<i64>, Option<f64>)> =
        sqlx::query_as("SELECT id, summary, cluster_id, sentiment FROM items ORDER BY id")
            .fetch_all(store.pool())
            .await
            .unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].0, "a");
    assert_eq!(
        rows[0].1,
        "Most people said the migration paid off despite slower builds."
    );
    assert_eq!(rows[1].0, "c");
    assert!(rows.iter().all(|r| r.2.is_none() && r.3.is_none()));

    let comment_owner: String = sqlx::query_scalar("SELECT item_id FROM comments WHERE id = 'a1'")
        .fetch_one(store.pool())
        .await
        .unwrap();
    assert_eq!(comment_owner, "a");
}

#[tokio::test]
async fn rerun_never_duplicates_or_overwrites() {
    let (_tmp, config, store) = setup(5).await;
    let source = StaticSource {
        posts: vec![post("a", "rust")],
        comments: HashMap::new(),
    };

    let first = TableSummarizer::new(&[("a", "The original summary of a lively discussion stays put.")]);
    run_once(&config, &source, &store, &first, "rust").await;

    let second = TableSummarizer::new(&[("a", "A replacement summary that must never be written.")]);
    let stats = run_once(&config, &source, &store, &second, "rust").await;

    assert_eq!(stats.new_items, 0);
    assert_eq!(second.calls(), 0);

    let summaries: Vec<String> = sqlx::query_scalar("SELECT summary FROM items")
        .fetch_all(store.pool())
        .await
        .unwrap();
    assert_eq!(
        summaries,
        vec!["The original summary of a lively discussion stays put.".to_string()]
    );
}

#[tokio::test]
async fn posts_seen_through_all_are_not_new_in_their_own_subreddit() {
    let (_tmp, config, store) = setup(5).await;
    let source = StaticSource {
        posts: vec![post("a", "rust"), post("b", "golang")],
        comments: HashMap::new(),
    };

    let first = TableSummarizer::new(&[
        ("a", "Readers compared borrow checker errors across several releases."),
        ("b", "Readers compared goroutine leaks across several services."),
    ]);
    let stats = run_once(&config, &source, &store, &first, "all").await;
    assert_eq!(stats.items_stored, 2);

    let second = TableSummarizer::new(&[]);
    let stats = run_once(&config, &source, &store, &second, "rust").await;
    assert_eq!(stats.candidates_listed, 1);
    assert_eq!(stats.new_items, 0);
    assert_eq!(second.calls(), 0);

    let collections: Vec<String> =
        sqlx::query_scalar("SELECT collection FROM items ORDER BY id")
            .fetch_all(store.pool())
            .await
            .unwrap();
    assert_eq!(collections, vec!["rust".to_string(), "golang".to_string()]);
}

#[tokio::test]
async fn collection_names_match_case_insensitively() {
    let (_tmp, config, store) = setup(5).await;
    let source = StaticSource {
        posts: vec![post("a", "Rust")],
        comments: HashMap::new(),
    };
    let summarizer =
        TableSummarizer::new(&[("a", "Readers compared error handling crates at length.")]);

    run_once(&config, &source, &store, &summarizer, "Rust").await;
    let stats = run_once(&config, &source, &store, &summarizer, "rust").await;

    assert_eq!(stats.candidates_listed, 1);
    assert_eq!(stats.new_items, 0);
    assert_eq!(summarizer.calls(), 1);
}

#[tokio::test]
async fn shared_comment_ids_are_inserted_once() {
    let (_tmp, config, store) = setup(5).await;
    let shared = comment("dup", "Crossposted reply that shows up under both threads.", 3);
    let source = StaticSource {
        posts: vec![post("a", "rust"), post("b", "rust")],
        comments: HashMap::from([
            ("a".to_string(), vec![shared.clone()]),
            ("b".to_string(), vec![shared]),
        ]),
    };
    let summarizer = TableSummarizer::new(&[
        ("a", "The first thread debated async runtimes for embedded targets."),
        ("b", "The second thread asked which runtime to pick for a small CLI."),
    ]);

    let stats = run_once(&config, &source, &store, &summarizer, "rust").await;

    assert_eq!(stats.items_stored, 2);
    assert_eq!(stats.comments_stored, 1);
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM comments")
        .fetch_one(store.pool())
        .await
        .unwrap();
    assert_eq!(count, 1);
}

#[tokio::test]
async fn low_scoring_and_empty_comments_are_left_out() {
    let (_tmp, mut config, store) = setup(5).await;
    config.source.min_comment_score = Some(2);
    config.source.comments_per_item = 1;
    let source = StaticSource {
        posts: vec![post("a", "rust")],
        comments: HashMap::from([(
            "a".to_string(),
            vec![
                comment("low", "Downvoted reply.", -3),
                comment("blank", "   ", 50),
                comment("keep", "The one reply worth keeping.", 8),
                comment("extra", "Over the per-item limit.", 9),
            ],
        )]),
    };
    let summarizer =
        TableSummarizer::new(&[("a", "A single strong reply carried most of the discussion.")]);

    run_once(&config, &source, &store, &summarizer, "rust").await;

    let ids: Vec<String> = sqlx::query_scalar("SELECT id FROM comments ORDER BY id")
        .fetch_all(store.pool())
        .await
        .unwrap();
    assert_eq!(ids, vec!["keep".to_string()]);
}
