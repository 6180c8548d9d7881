//! Storage abstraction for the ingestion pipeline.
//!
//! The [`Store`] trait is the only way the pipeline touches durable
//! state. It is deliberately small: one bulk read used by discovery and
//! one batch write used by the orchestrator.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashSet;

use crate::models::{NewItem, PersistReport};

/// Durable item/comment storage.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`existing_ids`](Store::existing_ids) | Which of a set of item ids are already stored |
/// | [`persist_batch`](Store::persist_batch) | Insert one batch of items and comments atomically |
#[async_trait]
pub trait Store: Send + Sync {
    /// The subset of `ids` already stored under any collection, read in a
    /// single query.
    async fn existing_ids(&self, ids: &[String]) -> Result<HashSet<String>>;

    /// Insert a batch of summarized items and their comments as one unit.
    ///
    /// Items use insert-if-absent semantics: an id that already exists is
    /// left untouched, summary included. Comments likewise. Analysis
    /// columns are never written here.
    async fn persist_batch(&self, items: &[NewItem]) -> Result<PersistReport>;
}
