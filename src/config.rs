//! TOML configuration.
//!
//! A single [`Config`] is parsed once at startup by [`load_config`] and
//! passed by reference into every component. Nothing re-reads the file
//! mid-run.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

/// Ranking used when listing a collection.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ListingSort {
    #[default]
    Hot,
    New,
    Top,
    Rising,
    Controversial,
}

impl ListingSort {
    pub fn as_str(&self) -> &'static str {
        match self {
            ListingSort::Hot => "hot",
            ListingSort::New => "new",
            ListingSort::Top => "top",
            ListingSort::Rising => "rising",
            ListingSort::Controversial => "controversial",
        }
    }

    /// Only `top` and `controversial` honour a time window.
    pub fn uses_time_filter(&self) -> bool {
        matches!(self, ListingSort::Top | ListingSort::Controversial)
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TimeFilter {
    Hour,
    #[default]
    Day,
    Week,
    Month,
    Year,
    All,
}

impl TimeFilter {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeFilter::Hour => "hour",
            TimeFilter::Day => "day",
            TimeFilter::Week => "week",
            TimeFilter::Month => "month",
            TimeFilter::Year => "year",
            TimeFilter::All => "all",
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SourceConfig {
    #[serde(default = "default_source_kind")]
    pub kind: String,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_auth_url")]
    pub auth_url: String,
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default)]
    pub collections: Vec<String>,
    #[serde(default)]
    pub listing: ListingSort,
    #[serde(default)]
    pub time_filter: TimeFilter,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default = "default_comments_per_item")]
    pub comments_per_item: usize,
    #[serde(default)]
    pub min_comment_score: Option<i64>,
    #[serde(default = "default_more_comments_limit")]
    pub more_comments_limit: usize,
    #[serde(default = "default_source_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            kind: default_source_kind(),
            client_id: None,
            client_secret: None,
            user_agent: default_user_agent(),
            auth_url: default_auth_url(),
            api_url: default_api_url(),
            collections: Vec::new(),
            listing: ListingSort::default(),
            time_filter: TimeFilter::default(),
            limit: default_limit(),
            comments_per_item: default_comments_per_item(),
            min_comment_score: None,
            more_comments_limit: default_more_comments_limit(),
            timeout_secs: default_source_timeout_secs(),
        }
    }
}

fn default_source_kind() -> String {
    "reddit".to_string()
}
fn default_user_agent() -> String {
    format!("thread-digest/{}", env!("CARGO_PKG_VERSION"))
}
fn default_auth_url() -> String {
    "https://www.reddit.com".to_string()
}
fn default_api_url() -> String {
    "https://oauth.reddit.com".to_string()
}
fn default_limit() -> usize {
    30
}
fn default_comments_per_item() -> usize {
    10
}
fn default_more_comments_limit() -> usize {
    32
}
fn default_source_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct PipelineConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
    #[serde(default = "default_min_chars")]
    pub min_chars: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            workers: default_workers(),
            max_chars: default_max_chars(),
            min_chars: default_min_chars(),
        }
    }
}

fn default_batch_size() -> usize {
    5
}
fn default_workers() -> usize {
    10
}
fn default_max_chars() -> usize {
    20_000
}
fn default_min_chars() -> usize {
    200
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    #[default]
    Disabled,
    Gemini,
    OpenAi,
}

impl LlmProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            LlmProvider::Disabled => "disabled",
            LlmProvider::Gemini => "gemini",
            LlmProvider::OpenAi => "openai",
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default)]
    pub provider: LlmProvider,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_rate_limit_delay_ms")]
    pub rate_limit_delay_ms: u64,
    #[serde(default)]
    pub max_retries: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: LlmProvider::default(),
            model: None,
            endpoint: None,
            api_key: None,
            api_key_env: None,
            temperature: default_temperature(),
            max_output_tokens: default_max_output_tokens(),
            timeout_secs: default_llm_timeout_secs(),
            rate_limit_delay_ms: default_rate_limit_delay_ms(),
            max_retries: 0,
        }
    }
}

fn default_temperature() -> f32 {
    0.7
}
fn default_max_output_tokens() -> u32 {
    20_000
}
fn default_llm_timeout_secs() -> u64 {
    300
}
fn default_rate_limit_delay_ms() -> u64 {
    5_000
}

impl LlmConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != LlmProvider::Disabled
    }

    /// Model identifier, falling back to a per-provider default.
    pub fn model_name(&self) -> String {
        if let Some(model) = &self.model {
            return model.clone();
        }
        match self.provider {
            LlmProvider::Gemini => "gemini-2.5-flash-lite".to_string(),
            LlmProvider::OpenAi => "gpt-4o-mini".to_string(),
            LlmProvider::Disabled => "disabled".to_string(),
        }
    }

    /// Name of the environment variable consulted when `api_key` is unset.
    pub fn key_env_var(&self) -> String {
        if let Some(name) = &self.api_key_env {
            return name.clone();
        }
        match self.provider {
            LlmProvider::OpenAi => "OPENAI_API_KEY".to_string(),
            _ => "GEMINI_API_KEY".to_string(),
        }
    }

    /// Resolve the API key from config, then from the environment.
    ///
    /// Empty values and template placeholders (`YOUR_...`) count as missing.
    pub fn resolve_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .filter(|k| is_real_credential(k))
            .or_else(|| {
                std::env::var(self.key_env_var())
                    .ok()
                    .filter(|k| is_real_credential(k))
            })
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AnalysisConfig {
    #[serde(default = "default_num_clusters")]
    pub num_clusters: usize,
    #[serde(default = "default_max_features")]
    pub max_features: usize,
    #[serde(default = "default_seed")]
    pub seed: u64,
    #[serde(default = "default_n_init")]
    pub n_init: usize,
    #[serde(default = "default_max_iter")]
    pub max_iter: usize,
    #[serde(default = "default_top_terms")]
    pub top_terms: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            num_clusters: default_num_clusters(),
            max_features: default_max_features(),
            seed: default_seed(),
            n_init: default_n_init(),
            max_iter: default_max_iter(),
            top_terms: default_top_terms(),
        }
    }
}

fn default_num_clusters() -> usize {
    10
}
fn default_max_features() -> usize {
    1000
}
fn default_seed() -> u64 {
    42
}
fn default_n_init() -> usize {
    10
}
fn default_max_iter() -> usize {
    300
}
fn default_top_terms() -> usize {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8501".to_string()
}

/// A credential counts as present when it is non-empty and not a template placeholder.
pub fn is_real_credential(value: &str) -> bool {
    let v = value.trim();
    !v.is_empty() && !v.to_ascii_uppercase().starts_with("YOUR_")
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    let p = &config.pipeline;
    if p.batch_size == 0 {
        bail!("pipeline.batch_size must be > 0");
    }
    if p.workers == 0 {
        bail!("pipeline.workers must be > 0");
    }
    if p.max_chars == 0 {
        bail!("pipeline.max_chars must be > 0");
    }
    if p.min_chars >= p.max_chars {
        bail!("pipeline.min_chars must be < pipeline.max_chars");
    }

    let s = &config.source;
    if s.kind != "reddit" {
        bail!("Unknown source kind: '{}'. Must be reddit.", s.kind);
    }
    if s.limit == 0 {
        bail!("source.limit must be > 0");
    }
    if s.comments_per_item == 0 {
        bail!("source.comments_per_item must be > 0");
    }

    if config.analysis.num_clusters == 0 {
        bail!("analysis.num_clusters must be >= 1");
    }
    if config.analysis.n_init == 0 {
        bail!("analysis.n_init must be >= 1");
    }

    if !(0.0..=2.0).contains(&config.llm.temperature) {
        bail!("llm.temperature must be in [0.0, 2.0]");
    }

    Ok(())
}
