//! Read-only dashboard HTTP server.
//!
//! Serves the stored items, their clusters and sentiment as JSON plus a
//! small HTML page that drives the filters.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/` | Dashboard page |
//! | `GET`  | `/health` | Health check (returns version) |
//! | `GET`  | `/api/collections` | Collections with item counts |
//! | `GET`  | `/api/clusters` | Per-cluster counts and mean sentiment |
//! | `GET`  | `/api/items` | Filtered item list |
//! | `GET`  | `/api/items/{id}` | One item with its comments |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "unknown sentiment: meh" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use crate::config::Config;
use crate::db;
use crate::get::{format_ts_iso, get_item_from_pool, ItemResponse};
use crate::models::NO_SUMMARY;
use crate::sentiment::{Bucket, NEUTRAL_BAND};

const DEFAULT_PAGE: i64 = 50;
const MAX_PAGE: i64 = 500;

#[derive(Clone)]
struct AppState {
    pool: SqlitePool,
}

/// Starts the dashboard on `[server].bind` and serves until the process
/// is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let pool = db::connect(config).await?;
    let app = router(pool);

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    info!(bind = %config.server.bind, "dashboard listening");
    println!("Dashboard listening on http://{}", config.server.bind);

    axum::serve(listener, app).await?;
    Ok(())
}

/// Build the dashboard router over an open pool.
pub fn router(pool: SqlitePool) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(handle_index))
        .route("/health", get(handle_health))
        .route("/api/collections", get(handle_collections))
        .route("/api/clusters", get(handle_clusters))
        .route("/api/items", get(handle_items))
        .route("/api/items/{id}", get(handle_item))
        .layer(cors)
        .with_state(AppState { pool })
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        error!(error = %err, "dashboard query failed");
        AppError {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code: "internal",
            message: err.to_string(),
        }
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        anyhow::Error::from(err).into()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found",
        message: message.into(),
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ GET /api/collections ============

#[derive(Debug, Serialize, Deserialize)]
pub struct CollectionCount {
    pub collection: String,
    pub items: i64,
}

async fn handle_collections(
    State(state): State<AppState>,
) -> Result<Json<Vec<CollectionCount>>, AppError> {
    let rows = sqlx::query(
        "SELECT collection, COUNT(*) AS items FROM items GROUP BY collection ORDER BY collection",
    )
    .fetch_all(&state.pool)
    .await?;

    Ok(Json(
        rows.iter()
            .map(|r| CollectionCount {
                collection: r.get("collection"),
                items: r.get("items"),
            })
            .collect(),
    ))
}

// ============ GET /api/clusters ============

#[derive(Debug, Deserialize)]
struct ClustersQuery {
    collection: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ClusterSummary {
    pub cluster_id: i64,
    pub items: i64,
    pub mean_sentiment: Option<f64>,
}

async fn handle_clusters(
    State(state): State<AppState>,
    Query(q): Query<ClustersQuery>,
) -> Result<Json<Vec<ClusterSummary>>, AppError> {
    let rows = sqlx::query(
        r#"
        SELECT cluster_id, COUNT(*) AS items, AVG(sentiment) AS mean_sentiment
        FROM items
        WHERE cluster_id IS NOT NULL
          AND (? IS NULL OR collection = ?)
        GROUP BY cluster_id
        ORDER BY cluster_id
        "#,
    )
    .bind(&q.collection)
    .bind(&q.collection)
    .fetch_all(&state.pool)
    .await?;

    Ok(Json(
        rows.iter()
            .map(|r| ClusterSummary {
                cluster_id: r.get("cluster_id"),
                items: r.get("items"),
                mean_sentiment: r.get("mean_sentiment"),
            })
            .collect(),
    ))
}

// ============ GET /api/items ============

#[derive(Debug, Deserialize)]
struct ItemsQuery {
    collection: Option<String>,
    cluster: Option<i64>,
    sentiment: Option<String>,
    limit: Option<i64>,
    offset: Option<i64>,
    include_unclustered: Option<bool>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ItemRow {
    pub id: String,
    pub collection: String,
    pub title: String,
    pub url: Option<String>,
    pub score: Option<i64>,
    pub created_at: String,
    pub summary: Option<String>,
    pub cluster_id: Option<i64>,
    pub sentiment: Option<f64>,
    pub sentiment_label: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ItemsResponse {
    pub items: Vec<ItemRow>,
    pub limit: i64,
    pub offset: i64,
}

async fn handle_items(
    State(state): State<AppState>,
    Query(q): Query<ItemsQuery>,
) -> Result<Json<ItemsResponse>, AppError> {
    let bucket = match q.sentiment.as_deref().filter(|s| !s.is_empty()) {
        Some(s) => Some(
            Bucket::parse(s).ok_or_else(|| bad_request(format!("unknown sentiment: {}", s)))?,
        ),
        None => None,
    };
    let limit = q.limit.unwrap_or(DEFAULT_PAGE);
    if !(1..=MAX_PAGE).contains(&limit) {
        return Err(bad_request(format!("limit must be between 1 and {}", MAX_PAGE)));
    }
    let offset = q.offset.unwrap_or(0);
    if offset < 0 {
        return Err(bad_request("offset must be >= 0"));
    }
    let include_unclustered = q.include_unclustered.unwrap_or(false);
    let bucket_name = bucket.map(|b| b.as_str());

    let rows = sqlx::query(
        r#"
        SELECT id, collection, title, url, score, created_at, summary, cluster_id, sentiment
        FROM items
        WHERE summary IS NOT NULL AND summary != ?
          AND (? OR cluster_id IS NOT NULL)
          AND (? IS NULL OR collection = ?)
          AND (? IS NULL OR cluster_id = ?)
          AND (? IS NULL
               OR (? = 'positive' AND sentiment >= ?)
               OR (? = 'negative' AND sentiment <= -?)
               OR (? = 'neutral' AND sentiment > -? AND sentiment < ?))
        ORDER BY created_at DESC, id ASC
        LIMIT ? OFFSET ?
        "#,
    )
    .bind(NO_SUMMARY)
    .bind(include_unclustered)
    .bind(&q.collection)
    .bind(&q.collection)
    .bind(q.cluster)
    .bind(q.cluster)
    .bind(bucket_name)
    .bind(bucket_name)
    .bind(NEUTRAL_BAND)
    .bind(bucket_name)
    .bind(NEUTRAL_BAND)
    .bind(bucket_name)
    .bind(NEUTRAL_BAND)
    .bind(NEUTRAL_BAND)
    .bind(limit)
    .bind(offset)
    .fetch_all(&state.pool)
    .await?;

    let items = rows
        .iter()
        .map(|r| {
            let sentiment: Option<f64> = r.get("sentiment");
            ItemRow {
                id: r.get("id"),
                collection: r.get("collection"),
                title: r.get("title"),
                url: r.get("url"),
                score: r.get("score"),
                created_at: format_ts_iso(r.get("created_at")),
                summary: r.get("summary"),
                cluster_id: r.get("cluster_id"),
                sentiment,
                sentiment_label: sentiment.map(|s| Bucket::of(s).as_str().to_string()),
            }
        })
        .collect();

    Ok(Json(ItemsResponse {
        items,
        limit,
        offset,
    }))
}

// ============ GET /api/items/{id} ============

async fn handle_item(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ItemResponse>, AppError> {
    match get_item_from_pool(&state.pool, &id).await? {
        Some(item) => Ok(Json(item)),
        None => Err(not_found(format!("item not found: {}", id))),
    }
}

// ============ GET / ============

async fn handle_index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

const INDEX_HTML: &str = r##"<!doctype html>
<html lang="en">
<head>
<meta charset="utf-8">
<title>Thread Digest</title>
<style>
  body { font-family: system-ui, sans-serif; margin: 2rem auto; max-width: 60rem; color: #222; }
  header { display: flex; gap: 1rem; align-items: end; flex-wrap: wrap; margin-bottom: 1.5rem; }
  label { display: flex; flex-direction: column; font-size: 0.85rem; gap: 0.25rem; }
  article { border-bottom: 1px solid #ddd; padding: 0.75rem 0; }
  article h3 { margin: 0 0 0.25rem; font-size: 1.05rem; }
  .meta { color: #666; font-size: 0.8rem; }
  .positive { color: #1a7f37; } .negative { color: #cf222e; } .neutral { color: #666; }
</style>
</head>
<body>
<h1>Thread Digest</h1>
<header>
  <label>Collection <select id="collection"><option value="">All</option></select></label>
  <label>Cluster <select id="cluster"><option value="">All</option></select></label>
  <label>Sentiment
    <select id="sentiment">
      <option value="">All</option>
      <option value="positive">Positive</option>
      <option value="neutral">Neutral</option>
      <option value="negative">Negative</option>
    </select>
  </label>
</header>
<main id="items"></main>
<script>
const $ = (id) => document.getElementById(id);

async function getJson(url) {
  const res = await fetch(url);
  if (!res.ok) throw new Error((await res.json()).error.message);
  return res.json();
}

function params() {
  const p = new URLSearchParams();
  for (const key of ["collection", "cluster", "sentiment"]) {
    if ($(key).value) p.set(key, $(key).value);
  }
  return p;
}

async function loadClusters() {
  const p = new URLSearchParams();
  if ($("collection").value) p.set("collection", $("collection").value);
  const clusters = await getJson("/api/clusters?" + p);
  const select = $("cluster");
  select.length = 1;
  for (const c of clusters) {
    const mood = c.mean_sentiment === null ? "" : ", mood " + c.mean_sentiment.toFixed(2);
    select.add(new Option(`Cluster ${c.cluster_id} (${c.items}${mood})`, c.cluster_id));
  }
}

async function loadItems() {
  const data = await getJson("/api/items?" + params());
  const main = $("items");
  main.replaceChildren();
  if (data.items.length === 0) {
    main.textContent = "No items match these filters.";
    return;
  }
  for (const item of data.items) {
    const el = document.createElement("article");
    const h = document.createElement("h3");
    const a = document.createElement("a");
    a.href = item.url || "#";
    a.textContent = item.title;
    h.append(a);
    const meta = document.createElement("div");
    meta.className = "meta";
    const label = item.sentiment_label || "unscored";
    const mood = document.createElement("span");
    mood.className = label;
    mood.textContent = label;
    meta.append(`${item.collection} · cluster ${item.cluster_id ?? "-"} · `, mood, ` · ${item.created_at}`);
    const p = document.createElement("p");
    p.textContent = item.summary;
    el.append(h, meta, p);
    main.append(el);
  }
}

async function init() {
  const collections = await getJson("/api/collections");
  for (const c of collections) $("collection").add(new Option(`${c.collection} (${c.items})`, c.collection));
  $("collection").onchange = async () => { await loadClusters(); await loadItems(); };
  $("cluster").onchange = loadItems;
  $("sentiment").onchange = loadItems;
  await loadClusters();
  await loadItems();
}

init().catch((e) => { $("items").textContent = "Failed to load: " + e.message; });
</script>
</body>
</html>
"##;
