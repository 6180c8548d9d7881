//! # Thread Digest
//!
//! Scrapes discussion threads, summarizes them in batches with an LLM,
//! clusters the summaries into topics, scores their sentiment, and serves
//! the result on a small read-only dashboard.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌─────────────────────────────────┐   ┌──────────┐
//! │  Source  │──▶│ discover → fetch → batch → LLM  │──▶│  SQLite  │
//! │ (Reddit) │   │   → clean → persist per batch   │   │          │
//! └──────────┘   └─────────────────────────────────┘   └────┬─────┘
//!                                                           │
//!                      ┌────────────────┬─────────────────┤
//!                      ▼                ▼                 ▼
//!                ┌──────────┐    ┌────────────┐    ┌────────────┐
//!                │ cluster  │    │ sentiment  │    │ dashboard  │
//!                │ TF-IDF+k │    │  lexicon   │    │   (HTTP)   │
//!                └──────────┘    └────────────┘    └────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! digest init                      # create database
//! digest scrape                    # list, fetch, summarize, store
//! digest cluster                   # label new summaries with topics
//! digest sentiment                 # score new summaries
//! digest serve                     # dashboard on http://127.0.0.1:8501
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`source`] | Source trait and listing options |
//! | [`connector_reddit`] | Reddit OAuth source |
//! | [`discovery`] | Unseen-item filtering |
//! | [`fetch`] | Concurrent comment-tree fetching |
//! | [`summarize`] | Batch LLM summarization |
//! | [`normalize`] | Summary cleanup |
//! | [`ingest`] | Pipeline orchestration |
//! | [`store`] | Storage trait and in-memory store |
//! | [`sqlite_store`] | SQLite store |
//! | [`cluster`] | TF-IDF + k-means topic clustering |
//! | [`sentiment`] | Lexicon sentiment scoring |
//! | [`server`] | Dashboard HTTP server |
//! | [`stats`] | Database statistics |
//! | [`get`] | Single-item lookup |
//! | [`sources`] | Source and LLM status |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod cluster;
pub mod config;
pub mod connector_reddit;
pub mod db;
pub mod discovery;
pub mod fetch;
pub mod get;
pub mod ingest;
pub mod migrate;
pub mod models;
pub mod normalize;
pub mod sentiment;
pub mod server;
pub mod source;
pub mod sources;
pub mod sqlite_store;
pub mod stats;
pub mod store;
pub mod summarize;
