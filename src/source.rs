//! The source collaborator: where discussion threads come from.
//!
//! A [`Source`] lists posts for a collection and materialises the flat
//! comment tree of one post. The pipeline only ever talks to this trait,
//! so tests substitute an in-process fake for
//! [`RedditSource`](crate::connector_reddit::RedditSource).

use anyhow::Result;
use async_trait::async_trait;

use crate::config::{ListingSort, SourceConfig, TimeFilter};
use crate::models::{CommentRecord, PostRecord};

/// Ranking and size of one collection listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListingOptions {
    pub sort: ListingSort,
    pub time_filter: TimeFilter,
    pub limit: usize,
}

impl ListingOptions {
    pub fn from_config(source: &SourceConfig) -> Self {
        Self {
            sort: source.listing,
            time_filter: source.time_filter,
            limit: source.limit,
        }
    }

    pub fn with_limit(mut self, limit: Option<usize>) -> Self {
        if let Some(limit) = limit {
            self.limit = limit;
        }
        self
    }
}

#[async_trait]
pub trait Source: Send + Sync {
    /// Short name used in logs and `digest sources` output.
    fn name(&self) -> &str;

    /// Up to `options.limit` posts of `collection`, in the source's ranking
    /// order.
    async fn listing(&self, collection: &str, options: &ListingOptions) -> Result<Vec<PostRecord>>;

    /// The complete comment tree of `post`, with every "load more"
    /// placeholder resolved, flattened in breadth-first order.
    async fn comment_tree(&self, post: &PostRecord) -> Result<Vec<CommentRecord>>;
}
