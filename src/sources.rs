//! Configured source and LLM status for `digest sources`.

use anyhow::Result;
use serde::Serialize;

use crate::config::{is_real_credential, Config};

#[derive(Debug, Clone, Serialize)]
pub struct SourceStatus {
    pub kind: String,
    pub collections: Vec<String>,
    pub listing: String,
    pub time_filter: Option<String>,
    pub limit: usize,
    pub credentials_configured: bool,
    pub llm_provider: String,
    pub llm_model: Option<String>,
    pub llm_key_configured: bool,
}

pub fn source_status(config: &Config) -> SourceStatus {
    let s = &config.source;
    let credentials_configured = [&s.client_id, &s.client_secret]
        .iter()
        .all(|v| v.as_deref().is_some_and(is_real_credential));

    let llm = &config.llm;
    SourceStatus {
        kind: s.kind.clone(),
        collections: s.collections.clone(),
        listing: s.listing.as_str().to_string(),
        time_filter: s
            .listing
            .uses_time_filter()
            .then(|| s.time_filter.as_str().to_string()),
        limit: s.limit,
        credentials_configured,
        llm_provider: llm.provider.as_str().to_string(),
        llm_model: llm.is_enabled().then(|| llm.model_name()),
        llm_key_configured: llm.is_enabled() && llm.resolve_api_key().is_some(),
    }
}

pub fn list_sources(config: &Config) -> Result<()> {
    let status = source_status(config);

    let listing = match &status.time_filter {
        Some(t) => format!("{} ({}), limit {}", status.listing, t, status.limit),
        None => format!("{}, limit {}", status.listing, status.limit),
    };
    let credentials = if status.credentials_configured {
        "OK"
    } else {
        "NOT CONFIGURED"
    };

    println!("{:<14} {}", "SOURCE", status.kind);
    println!("{:<14} {}", "CREDENTIALS", credentials);
    println!("{:<14} {}", "LISTING", listing);
    if status.collections.is_empty() {
        println!("{:<14} (none)", "COLLECTIONS");
    } else {
        println!("{:<14} {}", "COLLECTIONS", status.collections.join(", "));
    }

    let llm = match (&status.llm_model, status.llm_key_configured) {
        (None, _) => "disabled".to_string(),
        (Some(model), true) => format!("{} / {} (key OK)", status.llm_provider, model),
        (Some(model), false) => format!("{} / {} (NO API KEY)", status.llm_provider, model),
    };
    println!("{:<14} {}", "LLM", llm);

    Ok(())
}
