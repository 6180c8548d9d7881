//! Core data types that flow through the ingestion pipeline.
//!
//! Records produced by a [`Source`](crate::source::Source) become
//! [`ItemPayload`]s once their comment tree is fetched, are projected to
//! [`SummaryRequest`]s for the LLM, and end up in the store as
//! [`NewItem`]s.

use serde::Serialize;
use std::collections::HashMap;

/// Sentinel meaning "no usable summary". Never persisted as a summary.
pub const NO_SUMMARY: &str = "NoSummaryGenerated";

/// A discussion thread as listed by the source.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PostRecord {
    pub id: String,
    pub collection: String,
    pub title: String,
    pub body: String,
    pub author: String,
    pub score: i64,
    /// Epoch seconds.
    pub created_at: f64,
    pub url: String,
}

/// One comment from a flattened comment tree.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommentRecord {
    pub id: String,
    pub author: String,
    pub body: String,
    pub score: i64,
    pub created_at: f64,
}

/// A fetched thread ready for batching: the post, the comments kept for
/// it, and the combined discussion text sent to the summarizer.
#[derive(Debug, Clone)]
pub struct ItemPayload {
    pub post: PostRecord,
    pub comments: Vec<CommentRecord>,
    pub text: String,
}

impl ItemPayload {
    pub fn id(&self) -> &str {
        &self.post.id
    }

    pub fn request(&self) -> SummaryRequest {
        SummaryRequest {
            id: self.post.id.clone(),
            text: self.text.clone(),
        }
    }
}

/// The `{id, text}` projection of one payload sent to the summarizer.
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryRequest {
    pub id: String,
    pub text: String,
}

/// Raw model output keyed by item id, valid for one batch only.
pub type SummaryMap = HashMap<String, String>;

/// An item with a validated summary, ready to be written.
#[derive(Debug, Clone)]
pub struct NewItem {
    pub post: PostRecord,
    pub summary: String,
    pub comments: Vec<CommentRecord>,
}

/// Rows actually created by one committed batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PersistReport {
    pub items_inserted: u64,
    pub comments_inserted: u64,
}
