//! Batch ingestion-and-summarization pipeline.
//!
//! For each collection the orchestrator runs
//! listing → discovery → fetch → batching → summarize → persist:
//!
//! 1. List up to `limit` posts from the [`Source`].
//! 2. Keep only ids not yet in the [`Store`] ([`discovery::new_items`]).
//! 3. Fetch comment trees concurrently ([`fetch::fetch_all`]).
//! 4. Cut the payloads into batches of `pipeline.batch_size`; the last
//!    batch may be smaller.
//! 5. Summarize each batch with one call and clean every returned summary.
//! 6. Persist the items with a usable summary, one transaction per batch.
//!
//! Items whose cleaned summary is the sentinel are dropped rather than
//! stored. A failed batch stores nothing and the next batch is attempted;
//! a connectivity failure skips the rest of the collection; a missing
//! credential ends the run.

use anyhow::{bail, Result};
use std::time::{Duration, Instant};
use tracing::{info, instrument, warn};

use crate::config::Config;
use crate::connector_reddit::RedditSource;
use crate::db;
use crate::discovery;
use crate::fetch::{self, FetchResults};
use crate::migrate::migrate_pool;
use crate::models::{ItemPayload, NewItem, SummaryRequest};
use crate::normalize;
use crate::source::{ListingOptions, Source};
use crate::sqlite_store::SqliteStore;
use crate::store::Store;
use crate::summarize::{BatchSummarizer, Summarizer};

/// Counters for one `scrape` run.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct RunStats {
    pub collections_attempted: u64,
    pub collections_failed: u64,
    pub candidates_listed: u64,
    pub new_items: u64,
    pub payloads_fetched: u64,
    pub rejected_too_short: u64,
    pub fetch_failed: u64,
    pub truncated: u64,
    pub batches_flushed: u64,
    pub batches_failed: u64,
    pub unsummarizable: u64,
    pub items_stored: u64,
    pub comments_stored: u64,
    pub source_calls: u64,
    pub llm_calls: u64,
    pub elapsed: Duration,
}

impl RunStats {
    fn record_fetch(&mut self, results: &FetchResults) {
        self.payloads_fetched += results.payloads.len() as u64;
        self.rejected_too_short += results.too_short;
        self.fetch_failed += results.failed;
        self.truncated += results.truncated;
    }

    pub fn print_report(&self, title: &str) {
        println!("{}", title);
        println!(
            "  collections: {} attempted, {} failed",
            self.collections_attempted, self.collections_failed
        );
        println!("  candidates listed: {}", self.candidates_listed);
        println!("  new items: {}", self.new_items);
        println!("  payloads fetched: {}", self.payloads_fetched);
        println!("  rejected (too short): {}", self.rejected_too_short);
        println!("  fetch failures: {}", self.fetch_failed);
        println!("  truncated: {}", self.truncated);
        println!(
            "  batches: {} flushed, {} failed",
            self.batches_flushed, self.batches_failed
        );
        println!("  unsummarizable (dropped): {}", self.unsummarizable);
        println!("  items stored: {}", self.items_stored);
        println!("  comments stored: {}", self.comments_stored);
        println!("  source calls: {}", self.source_calls);
        println!("  llm calls: {}", self.llm_calls);
        println!("  elapsed: {:.1}s", self.elapsed.as_secs_f64());
    }
}

/// How a flushed batch ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BatchOutcome {
    Committed,
    Failed,
    /// The provider is unreachable; skip the rest of this collection.
    Abort,
}

/// The orchestrator. All collaborators are borrowed so tests can inject
/// fakes.
pub struct Pipeline<'a> {
    config: &'a Config,
    source: &'a dyn Source,
    store: &'a dyn Store,
    summarizer: &'a dyn Summarizer,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        config: &'a Config,
        source: &'a dyn Source,
        store: &'a dyn Store,
        summarizer: &'a dyn Summarizer,
    ) -> Self {
        Self {
            config,
            source,
            store,
            summarizer,
        }
    }

    /// Process every collection in turn. Only store errors and a missing
    /// LLM credential end the run early.
    pub async fn run(&self, collections: &[String], options: &ListingOptions) -> Result<RunStats> {
        let started = Instant::now();
        let mut stats = RunStats::default();

        for collection in collections {
            stats.collections_attempted += 1;
            self.run_collection(collection, options, &mut stats).await?;
        }

        stats.elapsed = started.elapsed();
        info!(
            source = self.source.name(),
            items_stored = stats.items_stored,
            llm_calls = stats.llm_calls,
            elapsed_ms = stats.elapsed.as_millis() as u64,
            "scrape finished"
        );
        Ok(stats)
    }

    #[instrument(skip(self, options, stats))]
    async fn run_collection(
        &self,
        collection: &str,
        options: &ListingOptions,
        stats: &mut RunStats,
    ) -> Result<()> {
        let Some(results) = discover_and_fetch(
            self.config,
            self.source,
            self.store,
            collection,
            options,
            stats,
        )
        .await?
        else {
            return Ok(());
        };

        for batch in results.payloads.chunks(self.config.pipeline.batch_size) {
            if self.flush(batch, stats).await? == BatchOutcome::Abort {
                warn!("provider unreachable, skipping remaining batches");
                stats.collections_failed += 1;
                break;
            }
        }
        Ok(())
    }

    /// Summarize one batch and persist its usable items in one transaction.
    async fn flush(&self, batch: &[ItemPayload], stats: &mut RunStats) -> Result<BatchOutcome> {
        let requests: Vec<SummaryRequest> = batch.iter().map(ItemPayload::request).collect();
        stats.batches_flushed += 1;
        stats.llm_calls += 1;

        let summaries = match self.summarizer.summarize(&requests).await {
            Ok(map) => map,
            Err(e) if e.is_fatal() => return Err(e.into()),
            Err(e) => {
                stats.batches_failed += 1;
                warn!(error = %e, items = batch.len(), "batch summarization failed");
                return Ok(if e.is_connectivity() {
                    BatchOutcome::Abort
                } else {
                    BatchOutcome::Failed
                });
            }
        };

        let mut items = Vec::with_capacity(batch.len());
        for payload in batch {
            let summary = normalize::clean(summaries.get(payload.id()).map(String::as_str));
            if normalize::is_no_summary(&summary) {
                stats.unsummarizable += 1;
                continue;
            }
            items.push(NewItem {
                post: payload.post.clone(),
                summary,
                comments: payload.comments.clone(),
            });
        }

        if items.is_empty() {
            return Ok(BatchOutcome::Committed);
        }

        let report = self.store.persist_batch(&items).await?;
        stats.items_stored += report.items_inserted;
        stats.comments_stored += report.comments_inserted;
        info!(
            items = report.items_inserted,
            comments = report.comments_inserted,
            "batch committed"
        );
        Ok(BatchOutcome::Committed)
    }
}

/// Listing, discovery and fetch for one collection. `None` when there is
/// nothing left to summarize.
async fn discover_and_fetch(
    config: &Config,
    source: &dyn Source,
    store: &dyn Store,
    collection: &str,
    options: &ListingOptions,
    stats: &mut RunStats,
) -> Result<Option<FetchResults>> {
    stats.source_calls += 1;
    let listing = match source.listing(collection, options).await {
        Ok(posts) => posts,
        Err(e) => {
            warn!(source = source.name(), error = %e, "listing failed, skipping collection");
            stats.collections_failed += 1;
            return Ok(None);
        }
    };
    stats.candidates_listed += listing.len() as u64;

    let fresh = discovery::new_items(store, collection, listing).await?;
    stats.new_items += fresh.len() as u64;
    if fresh.is_empty() {
        info!("no new items");
        return Ok(None);
    }

    info!(new_items = fresh.len(), "fetching comment trees");
    stats.source_calls += fresh.len() as u64;
    let results = fetch::fetch_all(source, fresh, config).await;
    stats.record_fetch(&results);

    if results.payloads.is_empty() {
        return Ok(None);
    }
    Ok(Some(results))
}

/// Listing, discovery and fetch only: no LLM calls, no writes.
pub async fn preview(
    config: &Config,
    source: &dyn Source,
    store: &dyn Store,
    collections: &[String],
    options: &ListingOptions,
) -> Result<RunStats> {
    let started = Instant::now();
    let mut stats = RunStats::default();
    for collection in collections {
        stats.collections_attempted += 1;
        if let Some(results) =
            discover_and_fetch(config, source, store, collection, options, &mut stats).await?
        {
            let batches = results
                .payloads
                .len()
                .div_ceil(config.pipeline.batch_size);
            info!(collection, batches, "would summarize");
        }
    }
    stats.elapsed = started.elapsed();
    Ok(stats)
}

/// Entry point for `digest scrape`.
pub async fn run_scrape(
    config: &Config,
    collections: Vec<String>,
    limit: Option<usize>,
    dry_run: bool,
) -> Result<()> {
    let collections = if collections.is_empty() {
        config.source.collections.clone()
    } else {
        collections
    };
    if collections.is_empty() {
        bail!("No collections to scrape. Set [source].collections or pass --collection.");
    }
    if limit == Some(0) {
        bail!("--limit must be > 0");
    }

    let options = ListingOptions::from_config(&config.source).with_limit(limit);

    // Resolve the LLM first so a missing key fails before any network work.
    let summarizer = if dry_run {
        None
    } else {
        Some(BatchSummarizer::from_config(&config.llm)?)
    };

    let source = RedditSource::new(&config.source)?;
    let pool = db::connect(config).await?;
    migrate_pool(&pool).await?;
    let store = SqliteStore::new(pool.clone());

    let stats = match &summarizer {
        Some(summarizer) => {
            info!(
                source = source.name(),
                model = summarizer.model(),
                collections = ?collections,
                "starting scrape"
            );
            Pipeline::new(config, &source, &store, summarizer)
                .run(&collections, &options)
                .await?
        }
        None => preview(config, &source, &store, &collections, &options).await?,
    };

    stats.print_report(if dry_run { "scrape (dry-run)" } else { "scrape" });
    if !dry_run {
        println!("ok");
    }

    pool.close().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CommentRecord, PostRecord, SummaryMap};
    use crate::store::memory::InMemoryStore;
    use crate::summarize::SummarizeError;
    use async_trait::async_trait;
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;

    fn config(batch_size: usize) -> Config {
        let mut cfg: Config = toml::from_str("[db]\npath = \"unused.sqlite\"\n").unwrap();
        cfg.pipeline.batch_size = batch_size;
        cfg
    }

    fn post(id: &str, collection: &str, body: &str) -> PostRecord {
        PostRecord {
            id: id.to_string(),
            collection: collection.to_string(),
            title: format!("Thread {}", id),
            body: body.to_string(),
            author: "someone".to_string(),
            score: 1,
            created_at: 1_700_000_000.0,
            url: format!("https://example.com/{}", id),
        }
    }

    fn long_body() -> String {
        "people argued about it at length ".repeat(10)
    }

    #[derive(Default)]
    struct FakeSource {
        listings: HashMap<String, Vec<PostRecord>>,
        comments: HashMap<String, Vec<CommentRecord>>,
        broken_collections: HashSet<String>,
        broken_threads: HashSet<String>,
    }

    impl FakeSource {
        fn with(mut self, collection: &str, posts: Vec<PostRecord>) -> Self {
            self.listings.insert(collection.to_string(), posts);
            self
        }
    }

    #[async_trait]
    impl Source for FakeSource {
        fn name(&self) -> &str {
            "fake"
        }

        async fn listing(&self, collection: &str, options: &ListingOptions) -> Result<Vec<PostRecord>> {
            if self.broken_collections.contains(collection) {
                bail!("listing unavailable");
            }
            let mut posts = self.listings.get(collection).cloned().unwrap_or_default();
            posts.truncate(options.limit);
            Ok(posts)
        }

        async fn comment_tree(&self, post: &PostRecord) -> Result<Vec<CommentRecord>> {
            if self.broken_threads.contains(&post.id) {
                bail!("comments unavailable");
            }
            Ok(self.comments.get(&post.id).cloned().unwrap_or_default())
        }
    }

    /// Answers per id from a fixed table; ids in `unreachable` or `garbled`
    /// make the whole batch fail.
    #[derive(Default)]
    struct FakeSummarizer {
        replies: HashMap<String, String>,
        unreachable: HashSet<String>,
        garbled: HashSet<String>,
        missing_key: bool,
        calls: Mutex<Vec<Vec<SummaryRequest>>>,
    }

    impl FakeSummarizer {
        fn reply(mut self, id: &str, summary: &str) -> Self {
            self.replies.insert(id.to_string(), summary.to_string());
            self
        }

        fn calls(&self) -> Vec<Vec<SummaryRequest>> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Summarizer for FakeSummarizer {
        async fn summarize(&self, batch: &[SummaryRequest]) -> Result<SummaryMap, SummarizeError> {
            self.calls.lock().unwrap().push(batch.to_vec());
            if self.missing_key {
                return Err(SummarizeError::MissingCredential("TEST_KEY".into()));
            }
            if batch.iter().any(|r| self.unreachable.contains(&r.id)) {
                return Err(SummarizeError::Unreachable("connection refused".into()));
            }
            if batch.iter().any(|r| self.garbled.contains(&r.id)) {
                return Err(SummarizeError::NoJsonObject);
            }
            Ok(batch
                .iter()
                .filter_map(|r| self.replies.get(&r.id).map(|s| (r.id.clone(), s.clone())))
                .collect())
        }
    }

    async fn run(
        cfg: &Config,
        source: &FakeSource,
        store: &InMemoryStore,
        summarizer: &FakeSummarizer,
        collections: &[&str],
    ) -> Result<RunStats> {
        let collections: Vec<String> = collections.iter().map(|c| c.to_string()).collect();
        let options = ListingOptions::from_config(&cfg.source);
        Pipeline::new(cfg, source, store, summarizer)
            .run(&collections, &options)
            .await
    }

    #[tokio::test]
    async fn sentinel_items_are_dropped_and_trailing_batch_is_flushed() {
        let cfg = config(2);
        let source = FakeSource::default().with(
            "rust",
            vec![
                post("a", "rust", &long_body()),
                post("b", "rust", &long_body()),
                post("c", "rust", &long_body()),
            ],
        );
        let summarizer = FakeSummarizer::default()
            .reply("a", "Most replies favoured a gradual migration over a rewrite.")
            .reply("b", "NoSummaryGenerated")
            .reply("c", "The thread settled on benchmarking before optimizing anything.");
        let store = InMemoryStore::new();

        let stats = run(&cfg, &source, &store, &summarizer, &["rust"]).await.unwrap();

        assert_eq!(summarizer.calls().len(), 2);
        assert_eq!(stats.llm_calls, 2);
        assert_eq!(stats.batches_flushed, 2);
        assert_eq!(stats.unsummarizable, 1);
        assert_eq!(stats.items_stored, 2);
        assert!(store.item("a").is_some());
        assert!(store.item("b").is_none());
        assert_eq!(
            store.item("c").unwrap().summary,
            "The thread settled on benchmarking before optimizing anything."
        );
        assert_eq!(store.commit_count(), 2);
    }

    #[tokio::test]
    async fn summaries_are_cleaned_before_storage() {
        let cfg = config(5);
        let source = FakeSource::default().with("rust", vec![post("a", "rust", &long_body())]);
        let summarizer = FakeSummarizer::default()
            .reply("a", "Here is the summary: The debate centered on X and Y.");
        let store = InMemoryStore::new();

        run(&cfg, &source, &store, &summarizer, &["rust"]).await.unwrap();

        assert_eq!(store.item("a").unwrap().summary, "The debate centered on X and Y.");
    }

    #[tokio::test]
    async fn connectivity_failure_skips_collection_but_not_the_run() {
        let cfg = config(2);
        let source = FakeSource::default()
            .with(
                "down",
                vec![post("d1", "down", &long_body()), post("d2", "down", &long_body())],
            )
            .with("up", vec![post("u1", "up", &long_body())]);
        let mut summarizer =
            FakeSummarizer::default().reply("u1", "Everyone agreed the release notes were unclear.");
        summarizer.unreachable.insert("d1".to_string());
        let store = InMemoryStore::new();

        let stats = run(&cfg, &source, &store, &summarizer, &["down", "up"])
            .await
            .unwrap();

        assert!(store.item("d1").is_none());
        assert!(store.item("d2").is_none());
        assert!(store.item("u1").is_some());
        assert_eq!(stats.collections_attempted, 2);
        assert_eq!(stats.collections_failed, 1);
        assert_eq!(stats.batches_failed, 1);
    }

    #[tokio::test]
    async fn connectivity_failure_abandons_remaining_batches() {
        let cfg = config(1);
        let source = FakeSource::default().with(
            "down",
            vec![post("d1", "down", &long_body()), post("d2", "down", &long_body())],
        );
        let mut summarizer = FakeSummarizer::default();
        summarizer.unreachable.insert("d1".to_string());
        summarizer.unreachable.insert("d2".to_string());
        let store = InMemoryStore::new();

        run(&cfg, &source, &store, &summarizer, &["down"]).await.unwrap();

        assert_eq!(summarizer.calls().len(), 1);
        assert_eq!(store.item_count(), 0);
    }

    #[tokio::test]
    async fn failed_batch_does_not_affect_other_batches() {
        let cfg = config(1);
        let source = FakeSource::default().with(
            "rust",
            vec![post("bad", "rust", &long_body()), post("good", "rust", &long_body())],
        );
        let mut summarizer = FakeSummarizer::default()
            .reply("good", "A long argument about error handling ended in agreement.");
        summarizer.garbled.insert("bad".to_string());
        let store = InMemoryStore::new();

        let stats = run(&cfg, &source, &store, &summarizer, &["rust"]).await.unwrap();

        assert_eq!(summarizer.calls().len(), 2);
        assert_eq!(stats.batches_failed, 1);
        assert_eq!(stats.collections_failed, 0);
        assert!(store.item("bad").is_none());
        assert!(store.item("good").is_some());
    }

    #[tokio::test]
    async fn missing_credential_ends_the_run() {
        let cfg = config(2);
        let source = FakeSource::default().with("rust", vec![post("a", "rust", &long_body())]);
        let summarizer = FakeSummarizer {
            missing_key: true,
            ..Default::default()
        };
        let store = InMemoryStore::new();

        let err = run(&cfg, &source, &store, &summarizer, &["rust"]).await.unwrap_err();
        assert!(err.to_string().contains("TEST_KEY"));
        assert_eq!(store.item_count(), 0);
    }

    #[tokio::test]
    async fn short_discussions_never_reach_the_summarizer() {
        let cfg = config(2);
        let source = FakeSource::default().with("rust", vec![post("tiny", "rust", "short")]);
        let summarizer = FakeSummarizer::default();
        let store = InMemoryStore::new();

        let stats = run(&cfg, &source, &store, &summarizer, &["rust"]).await.unwrap();

        assert!(summarizer.calls().is_empty());
        assert_eq!(stats.rejected_too_short, 1);
        assert_eq!(store.item_count(), 0);
    }

    #[tokio::test]
    async fn oversized_discussions_are_truncated_before_summarizing() {
        let cfg = config(2);
        let source =
            FakeSource::default().with("rust", vec![post("big", "rust", &"x".repeat(25_000))]);
        let summarizer = FakeSummarizer::default();
        let store = InMemoryStore::new();

        let stats = run(&cfg, &source, &store, &summarizer, &["rust"]).await.unwrap();

        let calls = summarizer.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0][0].text.chars().count(), 20_000);
        assert_eq!(stats.truncated, 1);
    }

    #[tokio::test]
    async fn second_run_only_summarizes_new_items() {
        let cfg = config(5);
        let summarizer = FakeSummarizer::default()
            .reply("a", "The first thread was about build times and caching.")
            .reply("b", "The second thread compared two popular web frameworks.");
        let store = InMemoryStore::new();

        let first = FakeSource::default().with("rust", vec![post("a", "rust", &long_body())]);
        run(&cfg, &first, &store, &summarizer, &["rust"]).await.unwrap();

        let second = FakeSource::default().with(
            "rust",
            vec![post("a", "rust", &long_body()), post("b", "rust", &long_body())],
        );
        let stats = run(&cfg, &second, &store, &summarizer, &["rust"]).await.unwrap();

        let calls = summarizer.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].len(), 1);
        assert_eq!(calls[1][0].id, "b");
        assert_eq!(stats.new_items, 1);
        assert_eq!(store.item_count(), 2);
    }

    #[tokio::test]
    async fn listing_failure_moves_on_to_next_collection() {
        let cfg = config(5);
        let mut source = FakeSource::default().with("up", vec![post("u1", "up", &long_body())]);
        source.broken_collections.insert("broken".to_string());
        let summarizer =
            FakeSummarizer::default().reply("u1", "Readers shared tips for faster incremental builds.");
        let store = InMemoryStore::new();

        let stats = run(&cfg, &source, &store, &summarizer, &["broken", "up"])
            .await
            .unwrap();

        assert_eq!(stats.collections_failed, 1);
        assert!(store.item("u1").is_some());
    }

    #[tokio::test]
    async fn preview_never_calls_the_summarizer_or_writes() {
        let cfg = config(2);
        let source = FakeSource::default().with(
            "rust",
            vec![post("a", "rust", &long_body()), post("b", "rust", &long_body())],
        );
        let store = InMemoryStore::new();
        let options = ListingOptions::from_config(&cfg.source);

        let stats = preview(&cfg, &source, &store, &["rust".to_string()], &options)
            .await
            .unwrap();

        assert_eq!(stats.payloads_fetched, 2);
        assert_eq!(stats.llm_calls, 0);
        assert_eq!(store.item_count(), 0);
    }

    #[tokio::test]
    async fn failed_comment_fetch_only_loses_that_item() {
        let cfg = config(5);
        let mut source = FakeSource::default().with(
            "rust",
            vec![
                post("a", "rust", &long_body()),
                post("gone", "rust", &long_body()),
                post("c", "rust", &long_body()),
            ],
        );
        source.broken_threads.insert("gone".to_string());
        source.comments.insert(
            "a".to_string(),
            vec![CommentRecord {
                id: "a1".to_string(),
                author: "replier".to_string(),
                body: "A reply that should be stored with its thread.".to_string(),
                score: 4,
                created_at: 1_700_000_100.0,
            }],
        );
        let summarizer = FakeSummarizer::default()
            .reply("a", "Most people preferred small focused crates over frameworks.")
            .reply("gone", "This summary must never be requested or stored.")
            .reply("c", "The discussion converged on keeping the public API minimal.");
        let store = InMemoryStore::new();

        let stats = run(&cfg, &source, &store, &summarizer, &["rust"]).await.unwrap();

        assert_eq!(stats.fetch_failed, 1);
        assert_eq!(stats.payloads_fetched, 2);
        assert_eq!(stats.collections_failed, 0);
        assert!(store.item("a").is_some());
        assert!(store.item("c").is_some());
        assert!(store.item("gone").is_none());
        assert_eq!(store.comment_count(), 1);
        let requested: Vec<String> = summarizer
            .calls()
            .concat()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert!(!requested.contains(&"gone".to_string()));
    }
}
