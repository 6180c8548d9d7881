//! In-memory [`Store`] implementation for tests.
//!
//! Uses `HashMap`s behind `std::sync::RwLock`. Mirrors the SQLite store's
//! insert-if-absent behaviour.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{CommentRecord, NewItem, PersistReport, PostRecord};

use super::Store;

#[derive(Debug, Clone)]
pub struct StoredItem {
    pub post: PostRecord,
    pub summary: String,
}

#[derive(Debug, Clone)]
pub struct StoredComment {
    pub item_id: String,
    pub comment: CommentRecord,
}

/// In-memory store. Also counts committed batches so tests can check
/// commit boundaries.
pub struct InMemoryStore {
    items: RwLock<HashMap<String, StoredItem>>,
    comments: RwLock<HashMap<String, StoredComment>>,
    commits: RwLock<u64>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            items: RwLock::new(HashMap::new()),
            comments: RwLock::new(HashMap::new()),
            commits: RwLock::new(0),
        }
    }

    pub fn item(&self, id: &str) -> Option<StoredItem> {
        self.items.read().unwrap().get(id).cloned()
    }

    pub fn item_count(&self) -> usize {
        self.items.read().unwrap().len()
    }

    pub fn comment_count(&self) -> usize {
        self.comments.read().unwrap().len()
    }

    pub fn commit_count(&self) -> u64 {
        *self.commits.read().unwrap()
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn existing_ids(&self, ids: &[String]) -> Result<HashSet<String>> {
        let items = self.items.read().unwrap();
        Ok(ids
            .iter()
            .filter(|id| items.contains_key(*id))
            .cloned()
            .collect())
    }

    async fn persist_batch(&self, batch: &[NewItem]) -> Result<PersistReport> {
        let mut report = PersistReport::default();
        let mut items = self.items.write().unwrap();
        let mut comments = self.comments.write().unwrap();

        for new_item in batch {
            if !items.contains_key(&new_item.post.id) {
                items.insert(
                    new_item.post.id.clone(),
                    StoredItem {
                        post: new_item.post.clone(),
                        summary: new_item.summary.clone(),
                    },
                );
                report.items_inserted += 1;
            }
            for c in &new_item.comments {
                if !comments.contains_key(&c.id) {
                    comments.insert(
                        c.id.clone(),
                        StoredComment {
                            item_id: new_item.post.id.clone(),
                            comment: c.clone(),
                        },
                    );
                    report.comments_inserted += 1;
                }
            }
        }

        *self.commits.write().unwrap() += 1;
        Ok(report)
    }
}
