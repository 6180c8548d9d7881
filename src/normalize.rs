//! Cleanup of raw model output into a single summary paragraph.
//!
//! [`clean`] is a best-effort heuristic: it strips tags and thinking
//! blocks, drops everything up to and including a known conversational
//! preamble, removes leading labels and list markers, then collapses
//! whitespace. Anything left with fewer than
//! [`MIN_TOKENS`] words becomes [`NO_SUMMARY`].
//!
//! The cleanup steps are applied until the text stops changing, so the
//! result is a fixed point: `clean(clean(x)) == clean(x)`.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::models::NO_SUMMARY;

/// Minimum whitespace-delimited tokens for a summary to be usable.
pub const MIN_TOKENS: usize = 5;

/// Known preambles in priority order. The first one found anywhere in the
/// text wins for that pass, and only the text after it is kept.
// TODO: make this list configurable per provider under [llm].
pub const PREAMBLES: &[&str] = &[
    "Here is the summary you requested:",
    "Here is the summary paragraph:",
    "Here is the summary:",
    "Here's the summary:",
    "Summary:",
    "The following is a summary:",
];

static THINK_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<think(?:ing)?>.*?</think(?:ing)?>").unwrap());

static TAGS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<｜.*?｜>|<.*?>|\[.*?\]").unwrap());

static PREAMBLE_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    PREAMBLES
        .iter()
        .map(|p| Regex::new(&format!(r"(?i){}", regex::escape(p))).unwrap())
        .collect()
});

static LEADING_LABEL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*(?:comments|post title)\s*:?\s*").unwrap());

static LIST_MARKER: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^\s*(?:[*\-]|\d+\.)\s+").unwrap());

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Clean a raw model summary. `None`, empty input and the sentinel itself
/// all map to [`NO_SUMMARY`].
pub fn clean(raw: Option<&str>) -> String {
    let raw = match raw {
        Some(r) if !r.trim().is_empty() && r != NO_SUMMARY => r,
        _ => return NO_SUMMARY.to_string(),
    };

    let mut text = raw.to_string();
    loop {
        let next = clean_pass(&text);
        if next == text {
            break;
        }
        text = next;
    }

    if text.split_whitespace().count() < MIN_TOKENS {
        return NO_SUMMARY.to_string();
    }
    text
}

pub fn is_no_summary(text: &str) -> bool {
    text == NO_SUMMARY
}

fn clean_pass(text: &str) -> String {
    let text = THINK_BLOCK.replace_all(text, "");
    let text = TAGS.replace_all(&text, "");
    let text = strip_preamble(&text);
    let text = LEADING_LABEL.replace(&text, "");
    let text = LIST_MARKER.replace_all(&text, "");
    WHITESPACE.replace_all(&text, " ").trim().to_string()
}

fn strip_preamble(text: &str) -> String {
    for pattern in PREAMBLE_PATTERNS.iter() {
        if let Some(m) = pattern.find(text) {
            return text[m.end()..].to_string();
        }
    }
    text.to_string()
}
