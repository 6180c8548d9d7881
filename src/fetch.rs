//! Concurrent comment-tree fetching.
//!
//! [`fetch_all`] runs [`fetch_payload`] for every unseen post on a bounded
//! pool of `pipeline.workers` concurrent requests. Results are collected
//! only after every fetch has finished, in completion order, which is not
//! the listing order. Fetching never touches the store.

use futures::stream::{self, StreamExt};
use tracing::{debug, warn};

use crate::config::Config;
use crate::models::{CommentRecord, ItemPayload, PostRecord};
use crate::source::Source;

/// What happened to one post in the fetch phase.
#[derive(Debug)]
pub enum FetchOutcome {
    Ready { payload: ItemPayload, truncated: bool },
    /// Discussion text below `pipeline.min_chars`.
    TooShort { id: String, chars: usize },
    Failed { id: String },
}

/// Totals of one [`fetch_all`] run.
#[derive(Debug, Default)]
pub struct FetchResults {
    pub payloads: Vec<ItemPayload>,
    pub too_short: u64,
    pub failed: u64,
    pub truncated: u64,
}

/// Keep the comments worth summarizing: above the score floor, non-empty,
/// and at most `limit` of them in tree order.
pub fn select_comments(
    comments: Vec<CommentRecord>,
    limit: usize,
    min_score: Option<i64>,
) -> Vec<CommentRecord> {
    comments
        .into_iter()
        .filter(|c| min_score.map_or(true, |min| c.score >= min))
        .filter(|c| !c.body.trim().is_empty())
        .take(limit)
        .collect()
}

/// Title, body and numbered comments, one per line.
pub fn build_discussion_text(post: &PostRecord, comments: &[CommentRecord]) -> String {
    let mut text = format!(
        "Post Title: {}\nPost Body: {}\n\n--- Comments ---\n",
        post.title, post.body
    );
    for (i, comment) in comments.iter().enumerate() {
        text.push_str(&format!("Comment {}: {}\n", i + 1, comment.body));
    }
    text
}

/// Cut `text` to at most `max_chars` characters, keeping the prefix.
/// Returns whether anything was removed.
pub fn truncate_chars(text: &mut String, max_chars: usize) -> bool {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => {
            text.truncate(byte_idx);
            true
        }
        None => false,
    }
}

/// Fetch one post's comment tree and turn it into a payload.
pub async fn fetch_payload(source: &dyn Source, post: PostRecord, config: &Config) -> FetchOutcome {
    let comments = match source.comment_tree(&post).await {
        Ok(c) => c,
        Err(e) => {
            warn!(item_id = %post.id, error = %e, "failed to fetch comments");
            return FetchOutcome::Failed { id: post.id };
        }
    };

    let comments = select_comments(
        comments,
        config.source.comments_per_item,
        config.source.min_comment_score,
    );
    let mut text = build_discussion_text(&post, &comments);

    let chars = text.chars().count();
    if chars < config.pipeline.min_chars {
        debug!(item_id = %post.id, chars, "discussion too short, skipping");
        return FetchOutcome::TooShort { id: post.id, chars };
    }

    let truncated = truncate_chars(&mut text, config.pipeline.max_chars);
    if truncated {
        debug!(
            item_id = %post.id,
            from = chars,
            to = config.pipeline.max_chars,
            "truncated discussion text"
        );
    }

    FetchOutcome::Ready {
        payload: ItemPayload {
            post,
            comments,
            text,
        },
        truncated,
    }
}

/// Fetch every post with at most `pipeline.workers` requests in flight.
pub async fn fetch_all(source: &dyn Source, posts: Vec<PostRecord>, config: &Config) -> FetchResults {
    let outcomes: Vec<FetchOutcome> = stream::iter(posts)
        .map(|post| fetch_payload(source, post, config))
        .buffer_unordered(config.pipeline.workers)
        .collect()
        .await;

    let mut results = FetchResults::default();
    for outcome in outcomes {
        match outcome {
            FetchOutcome::Ready { payload, truncated } => {
                if truncated {
                    results.truncated += 1;
                }
                results.payloads.push(payload);
            }
            FetchOutcome::TooShort { .. } => results.too_short += 1,
            FetchOutcome::Failed { .. } => results.failed += 1,
        }
    }
    results
}
