//! Deduplicating discovery of unseen items.

use anyhow::Result;
use std::collections::HashSet;
use tracing::debug;

use crate::models::PostRecord;
use crate::store::Store;

/// Filter `candidates` down to posts whose id is not yet stored.
///
/// Ids are checked against the whole store in one read, whichever
/// collection they were first stored under. Listing order is preserved,
/// and an id repeated within the listing is kept only the first time it
/// appears.
pub async fn new_items(
    store: &dyn Store,
    collection: &str,
    candidates: Vec<PostRecord>,
) -> Result<Vec<PostRecord>> {
    let ids: Vec<String> = candidates.iter().map(|p| p.id.clone()).collect();
    let mut seen: HashSet<String> = store.existing_ids(&ids).await?;
    debug!(collection, listed = ids.len(), known = seen.len(), "checked stored ids");
    Ok(candidates
        .into_iter()
        .filter(|post| seen.insert(post.id.clone()))
        .collect())
}
