//! Reddit implementation of [`Source`].
//!
//! Talks to Reddit's OAuth JSON API with application-only credentials
//! (`client_credentials` grant). Listings are paged with the `after`
//! cursor; comment trees come from `/comments/{id}` and every `more`
//! placeholder is expanded through `/api/morechildren`, up to
//! `source.more_comments_limit` requests per post.
//!
//! The resulting tree is flattened breadth-first: all top-level comments,
//! then their direct replies, and so on.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::config::{is_real_credential, SourceConfig};
use crate::models::{CommentRecord, PostRecord};
use crate::source::{ListingOptions, Source};

const PAGE_SIZE: usize = 100;
const MORECHILDREN_BATCH: usize = 100;
/// Refresh the token this long before Reddit says it expires.
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);
const DELETED: &str = "[deleted]";

struct CachedToken {
    value: String,
    expires_at: Instant,
}

pub struct RedditSource {
    client: reqwest::Client,
    config: SourceConfig,
    client_id: String,
    client_secret: String,
    token: Mutex<Option<CachedToken>>,
}

impl RedditSource {
    /// Build a client from `[source]`. Fails when either credential is
    /// missing or still a template placeholder.
    pub fn new(config: &SourceConfig) -> Result<Self> {
        let client_id = config
            .client_id
            .clone()
            .filter(|v| is_real_credential(v))
            .ok_or_else(|| anyhow::anyhow!("source.client_id is not configured"))?;
        let client_secret = config
            .client_secret
            .clone()
            .filter(|v| is_real_credential(v))
            .ok_or_else(|| anyhow::anyhow!("source.client_secret is not configured"))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()?;

        Ok(Self {
            client,
            config: config.clone(),
            client_id,
            client_secret,
            token: Mutex::new(None),
        })
    }

    async fn access_token(&self) -> Result<String> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if token.expires_at > Instant::now() + TOKEN_EXPIRY_MARGIN {
                return Ok(token.value.clone());
            }
        }

        let url = format!(
            "{}/api/v1/access_token",
            self.config.auth_url.trim_end_matches('/')
        );
        let resp = self
            .client
            .post(&url)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await
            .with_context(|| format!("Failed to reach Reddit auth endpoint {}", url))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            bail!("Reddit rejected credentials ({}): {}", status, body);
        }

        let json: Value = resp.json().await?;
        let value = json
            .get("access_token")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("Reddit token response has no access_token"))?
            .to_string();
        let expires_in = json
            .get("expires_in")
            .and_then(|v| v.as_u64())
            .unwrap_or(3600);

        debug!(expires_in, "obtained reddit access token");
        *cached = Some(CachedToken {
            value: value.clone(),
            expires_at: Instant::now() + Duration::from_secs(expires_in),
        });
        Ok(value)
    }

    async fn get_json(&self, path: &str, query: &[(&str, String)]) -> Result<Value> {
        let token = self.access_token().await?;
        let url = format!("{}{}", self.config.api_url.trim_end_matches('/'), path);

        let resp = self
            .client
            .get(&url)
            .bearer_auth(&token)
            .query(query)
            .send()
            .await
            .with_context(|| format!("Request to {} failed", url))?;

        let status = resp.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            *self.token.lock().await = None;
            bail!("Reddit rejected request to {} ({})", path, status);
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            bail!("Reddit API error {} for {}: {}", status, path, body);
        }

        Ok(resp.json().await?)
    }
}

#[async_trait]
impl Source for RedditSource {
    fn name(&self) -> &str {
        "reddit"
    }

    async fn listing(&self, collection: &str, options: &ListingOptions) -> Result<Vec<PostRecord>> {
        let path = format!("/r/{}/{}", collection, options.sort.as_str());
        let mut posts: Vec<PostRecord> = Vec::new();
        let mut after: Option<String> = None;

        while posts.len() < options.limit {
            let page = (options.limit - posts.len()).min(PAGE_SIZE);
            let mut query = vec![("limit", page.to_string()), ("raw_json", "1".to_string())];
            if options.sort.uses_time_filter() {
                query.push(("t", options.time_filter.as_str().to_string()));
            }
            if let Some(cursor) = &after {
                query.push(("after", cursor.clone()));
            }

            let json = self.get_json(&path, &query).await?;
            let (mut batch, next) = parse_listing(&json, collection, &self.config.auth_url);
            if batch.is_empty() {
                break;
            }
            batch.truncate(options.limit - posts.len());
            posts.extend(batch);

            match next {
                Some(cursor) => after = Some(cursor),
                None => break,
            }
        }

        debug!(collection, count = posts.len(), "listing fetched");
        Ok(posts)
    }

    async fn comment_tree(&self, post: &PostRecord) -> Result<Vec<CommentRecord>> {
        let json = self
            .get_json(
                &format!("/comments/{}", post.id),
                &[("raw_json", "1".to_string()), ("limit", "500".to_string())],
            )
            .await?;

        let mut arena = CommentArena::from_comment_page(&json)?;

        let mut requests = 0usize;
        while let Some(mut ids) = arena.pending_more.pop_front() {
            if requests >= self.config.more_comments_limit {
                debug!(
                    item_id = %post.id,
                    remaining = arena.pending_more.len() + 1,
                    "more-comments expansion limit reached"
                );
                break;
            }
            let rest = if ids.len() > MORECHILDREN_BATCH {
                ids.split_off(MORECHILDREN_BATCH)
            } else {
                Vec::new()
            };
            if !rest.is_empty() {
                arena.pending_more.push_front(rest);
            }

            requests += 1;
            let query = [
                ("api_type", "json".to_string()),
                ("link_id", format!("t3_{}", post.id)),
                ("children", ids.join(",")),
                ("raw_json", "1".to_string()),
            ];
            match self.get_json("/api/morechildren", &query).await {
                Ok(json) => {
                    let things = json
                        .pointer("/json/data/things")
                        .and_then(|t| t.as_array())
                        .cloned()
                        .unwrap_or_default();
                    arena.attach_flat(&things);
                }
                Err(e) => {
                    warn!(item_id = %post.id, error = %e, "failed to expand more comments");
                }
            }
        }

        Ok(arena.flatten())
    }
}

/// Parse one listing page into posts plus the `after` cursor.
///
/// Each post is filed under its own subreddit; `collection` is only the
/// fallback when a post does not name one (e.g. listings of `all`,
/// `popular` or `a+b` span several).
pub fn parse_listing(json: &Value, collection: &str, site_url: &str) -> (Vec<PostRecord>, Option<String>) {
    let data = json.get("data");
    let after = data
        .and_then(|d| d.get("after"))
        .and_then(|a| a.as_str())
        .filter(|a| !a.is_empty())
        .map(|a| a.to_string());

    let posts = data
        .and_then(|d| d.get("children"))
        .and_then(|c| c.as_array())
        .map(|children| {
            children
                .iter()
                .filter(|c| c.get("kind").and_then(|k| k.as_str()) == Some("t3"))
                .filter_map(|c| c.get("data"))
                .filter_map(|d| parse_post(d, collection, site_url))
                .collect()
        })
        .unwrap_or_default();

    (posts, after)
}

fn parse_post(data: &Value, collection: &str, site_url: &str) -> Option<PostRecord> {
    let id = str_field(data, "id")?;
    let permalink = str_field(data, "permalink").unwrap_or_default();
    let url = str_field(data, "url")
        .filter(|u| !u.is_empty())
        .unwrap_or_else(|| format!("{}{}", site_url.trim_end_matches('/'), permalink));

    Some(PostRecord {
        id,
        collection: str_field(data, "subreddit")
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| collection.to_string()),
        title: str_field(data, "title").unwrap_or_default(),
        body: str_field(data, "selftext").unwrap_or_default(),
        author: str_field(data, "author").unwrap_or_else(|| DELETED.to_string()),
        score: data.get("score").and_then(|s| s.as_i64()).unwrap_or(0),
        created_at: data.get("created_utc").and_then(|c| c.as_f64()).unwrap_or(0.0),
        url,
    })
}

fn parse_comment(data: &Value) -> Option<CommentRecord> {
    Some(CommentRecord {
        id: str_field(data, "id")?,
        author: str_field(data, "author").unwrap_or_else(|| DELETED.to_string()),
        body: str_field(data, "body").unwrap_or_default(),
        score: data.get("score").and_then(|s| s.as_i64()).unwrap_or(0),
        created_at: data.get("created_utc").and_then(|c| c.as_f64()).unwrap_or(0.0),
    })
}

fn str_field(data: &Value, key: &str) -> Option<String> {
    data.get(key).and_then(|v| v.as_str()).map(|s| s.to_string())
}

struct ArenaNode {
    comment: CommentRecord,
    children: Vec<usize>,
}

/// Comment tree under construction. Nodes live in a flat vector and refer
/// to their replies by index; unresolved `more` placeholders are queued as
/// lists of comment ids.
#[derive(Default)]
struct CommentArena {
    nodes: Vec<ArenaNode>,
    roots: Vec<usize>,
    index: HashMap<String, usize>,
    pending_more: VecDeque<Vec<String>>,
}

impl CommentArena {
    /// Build from the `/comments/{id}` response: `[post_listing, comment_listing]`.
    fn from_comment_page(json: &Value) -> Result<Self> {
        let listing = json
            .as_array()
            .and_then(|parts| parts.get(1))
            .ok_or_else(|| anyhow::anyhow!("Unexpected comment page shape"))?;

        let mut arena = Self::default();
        for child in listing_children(listing) {
            arena.insert_nested(child, None);
        }
        Ok(arena)
    }

    fn insert_nested(&mut self, thing: &Value, parent: Option<usize>) {
        let Some(data) = thing.get("data") else {
            return;
        };
        match thing.get("kind").and_then(|k| k.as_str()) {
            Some("t1") => {
                let Some(idx) = self.push(data, parent) else {
                    return;
                };
                if let Some(replies) = data.get("replies").filter(|r| r.is_object()) {
                    for reply in listing_children(replies) {
                        self.insert_nested(reply, Some(idx));
                    }
                }
            }
            Some("more") => self.queue_more(data),
            _ => {}
        }
    }

    /// Attach the flat `things` list returned by `/api/morechildren`, where
    /// each comment names its parent through `parent_id`.
    fn attach_flat(&mut self, things: &[Value]) {
        for thing in things {
            let Some(data) = thing.get("data") else {
                continue;
            };
            match thing.get("kind").and_then(|k| k.as_str()) {
                Some("t1") => {
                    let parent = data
                        .get("parent_id")
                        .and_then(|p| p.as_str())
                        .and_then(|p| p.strip_prefix("t1_"))
                        .and_then(|p| self.index.get(p).copied());
                    self.push(data, parent);
                }
                Some("more") => self.queue_more(data),
                _ => {}
            }
        }
    }

    fn push(&mut self, data: &Value, parent: Option<usize>) -> Option<usize> {
        let comment = parse_comment(data)?;
        if self.index.contains_key(&comment.id) {
            return None;
        }
        let idx = self.nodes.len();
        self.index.insert(comment.id.clone(), idx);
        self.nodes.push(ArenaNode {
            comment,
            children: Vec::new(),
        });
        match parent {
            Some(p) => self.nodes[p].children.push(idx),
            None => self.roots.push(idx),
        }
        Some(idx)
    }

    fn queue_more(&mut self, data: &Value) {
        let ids: Vec<String> = data
            .get("children")
            .and_then(|c| c.as_array())
            .map(|c| c.iter().filter_map(|v| v.as_str().map(String::from)).collect())
            .unwrap_or_default();
        // "continue this thread" links carry no ids
        if !ids.is_empty() {
            self.pending_more.push_back(ids);
        }
    }

    fn flatten(self) -> Vec<CommentRecord> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut queue: VecDeque<usize> = self.roots.iter().copied().collect();
        while let Some(idx) = queue.pop_front() {
            order.push(idx);
            queue.extend(self.nodes[idx].children.iter().copied());
        }

        let mut slots: Vec<Option<CommentRecord>> =
            self.nodes.into_iter().map(|n| Some(n.comment)).collect();
        order.into_iter().filter_map(|i| slots[i].take()).collect()
    }
}

fn listing_children(listing: &Value) -> impl Iterator<Item = &Value> {
    listing
        .pointer("/data/children")
        .and_then(|c| c.as_array())
        .into_iter()
        .flatten()
}
