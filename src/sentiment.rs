//! Lexicon-based sentiment scoring of stored summaries.
//!
//! Each word found in the built-in lexicon contributes its valence
//! (roughly -4..4). Boosters and dampeners in the three preceding words
//! scale it, a negation in the same window flips and damps it, and words
//! after a contrastive "but" count more than those before it. The sum `s`
//! is normalised to a compound score `s / sqrt(s² + 15)` in [-1, 1].
//!
//! The lexicon holds a few hundred opinion words common in discussion
//! summaries, with VADER-style valences. It is far smaller than a general
//! purpose sentiment lexicon, so text built from domain vocabulary alone
//! scores 0 and lands in the neutral bucket.

use anyhow::Result;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use tracing::info;

use crate::config::Config;
use crate::db;
use crate::models::NO_SUMMARY;

/// Scores at or above this are positive, at or below its negation negative.
pub const NEUTRAL_BAND: f64 = 0.05;

const NORMALIZATION_ALPHA: f64 = 15.0;
const BOOST: f64 = 0.293;
const NEGATION_SCALAR: f64 = -0.74;
const EXCLAMATION_BOOST: f64 = 0.292;
const MAX_EXCLAMATIONS: usize = 4;
const WINDOW: usize = 3;

static WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\w']+").unwrap());

static LEXICON: Lazy<HashMap<&'static str, f64>> = Lazy::new(|| {
    [
        // positive
        ("good", 1.9), ("great", 3.1), ("excellent", 2.7), ("amazing", 2.8),
        ("awesome", 3.1), ("fantastic", 2.6), ("wonderful", 2.7), ("best", 3.2),
        ("better", 1.9), ("love", 3.2), ("loved", 2.9), ("loves", 2.7), ("like", 1.5),
        ("liked", 1.8), ("enjoy", 2.2), ("enjoyed", 2.3), ("happy", 2.7), ("glad", 2.0),
        ("nice", 1.8), ("helpful", 1.8), ("useful", 1.9), ("success", 2.7),
        ("successful", 2.8), ("win", 2.8), ("won", 2.7), ("benefit", 2.0),
        ("benefits", 1.6), ("improve", 1.9), ("improved", 2.1), ("improvement", 2.0),
        ("recommend", 1.5), ("recommended", 1.5), ("support", 1.7), ("supportive", 1.9),
        ("agree", 1.5), ("agreed", 1.1), ("thanks", 1.9), ("thank", 1.5),
        ("grateful", 2.0), ("appreciate", 1.7), ("praise", 2.6), ("praised", 2.2),
        ("easy", 1.9), ("clear", 1.6), ("safe", 1.9), ("fun", 2.3), ("funny", 1.9),
        ("interesting", 1.7), ("impressive", 2.3), ("impressed", 2.1), ("hope", 1.9),
        ("hopeful", 2.3), ("optimistic", 1.3), ("positive", 2.6), ("excited", 1.4),
        ("exciting", 2.2), ("perfect", 2.7), ("beautiful", 2.9), ("brilliant", 2.8),
        ("solid", 1.2), ("reliable", 1.8), ("fair", 1.3), ("worth", 0.9),
        ("welcome", 2.0), ("relief", 1.5), ("kind", 2.4), ("friendly", 2.2),
        ("calm", 1.3), ("confident", 2.2), ("celebrate", 2.7), ("popular", 1.8),
        ("favorite", 2.0), ("satisfied", 1.8), ("consensus", 0.6), ("resolved", 0.7),
        ("fixed", 0.6), ("smart", 1.7), ("strong", 2.3), ("wise", 1.8),
        ("accept", 1.6), ("accepted", 1.1), ("accomplished", 1.9), ("achievement", 2.0),
        ("admire", 2.1), ("advantage", 1.0), ("advantages", 1.1), ("appreciated", 2.3),
        ("approve", 1.8), ("approval", 1.2), ("bright", 1.9), ("charming", 2.3),
        ("cheer", 2.3), ("comfort", 1.5), ("comfortable", 2.3), ("cool", 1.3),
        ("creative", 1.9), ("curious", 1.3), ("delight", 2.9), ("delighted", 2.3),
        ("eager", 1.5), ("effective", 2.1), ("efficient", 1.8), ("encourage", 2.3),
        ("encouraged", 1.5), ("encouraging", 2.4), ("enthusiasm", 1.9),
        ("enthusiastic", 2.2), ("excellence", 3.1), ("fine", 0.8), ("free", 2.3),
        ("freedom", 3.2), ("generous", 2.3), ("gentle", 1.9), ("gorgeous", 3.0),
        ("gratitude", 2.3), ("growth", 1.6), ("healthy", 1.7), ("help", 1.7),
        ("helped", 1.7), ("helps", 1.6), ("honest", 2.3), ("honor", 2.2), ("ideal", 2.4),
        ("inspired", 2.2), ("inspiring", 2.2), ("intelligent", 2.0), ("joy", 2.8),
        ("laugh", 2.6), ("lucky", 1.8), ("opportunity", 1.8), ("peace", 2.5),
        ("pleasant", 2.3), ("pleased", 1.9), ("pleasure", 2.7), ("progress", 1.8),
        ("promise", 1.3), ("promising", 1.7), ("protect", 1.6), ("proud", 2.1),
        ("relaxed", 2.2), ("respect", 2.1), ("reward", 2.0), ("rewarding", 2.4),
        ("secure", 1.4), ("share", 1.2), ("solution", 1.3), ("solutions", 1.1),
        ("solve", 0.8), ("solved", 1.1), ("stable", 1.2), ("superior", 2.5),
        ("sure", 1.3), ("sweet", 2.0), ("talented", 2.3), ("thoughtful", 1.6),
        ("trust", 2.3), ("trusted", 2.1), ("valuable", 2.1), ("victory", 2.8),
        ("warm", 0.9), ("wealth", 2.2), ("willing", 1.1), ("worthy", 1.9), ("yes", 1.7),
        // negative
        ("bad", -2.5), ("worse", -2.1), ("worst", -3.1), ("terrible", -2.1),
        ("awful", -2.0), ("horrible", -2.5), ("hate", -2.7), ("hated", -3.2),
        ("hates", -1.9), ("dislike", -1.6), ("angry", -2.3), ("anger", -2.7),
        ("annoying", -1.7), ("annoyed", -1.6), ("frustrated", -2.4),
        ("frustrating", -1.9), ("frustration", -2.1), ("sad", -2.1), ("unhappy", -1.8),
        ("disappointed", -1.9), ("disappointing", -2.2), ("fail", -2.5),
        ("failed", -2.3), ("failure", -2.3), ("fails", -1.8), ("problem", -1.7),
        ("problems", -1.7), ("issue", -0.6), ("issues", -0.6), ("broken", -1.8),
        ("bug", -0.8), ("bugs", -0.9), ("crash", -1.7), ("crashes", -1.6),
        ("error", -1.7), ("errors", -1.4), ("wrong", -2.1), ("poor", -2.1),
        ("useless", -1.8), ("waste", -1.8), ("wasted", -2.2), ("scam", -2.7),
        ("fraud", -2.8), ("risk", -1.1), ("risky", -0.8), ("danger", -2.4),
        ("dangerous", -2.1), ("fear", -2.2), ("afraid", -2.0), ("worried", -1.2),
        ("worry", -1.9), ("anxious", -1.0), ("anxiety", -0.7), ("stress", -1.8),
        ("stressed", -1.4), ("pain", -2.3), ("hurt", -2.4), ("harm", -2.5),
        ("loss", -1.3), ("lost", -1.3), ("lose", -1.7), ("losing", -1.6),
        ("difficult", -1.5), ("hard", -0.4), ("confusing", -0.9), ("confused", -1.3),
        ("complain", -1.5), ("complaint", -1.2), ("complaints", -1.7),
        ("criticism", -1.9), ("criticized", -1.8), ("blame", -1.4), ("toxic", -2.4),
        ("rude", -2.0), ("stupid", -2.4), ("ridiculous", -1.5), ("disaster", -3.1),
        ("mess", -1.5), ("ugly", -2.3), ("unfair", -2.1), ("unsafe", -2.2),
        ("expensive", -0.9), ("scary", -2.2), ("concern", -0.5), ("concerns", -0.6),
        ("doubt", -1.5), ("skeptical", -0.8), ("sucks", -1.5), ("reject", -1.7),
        ("rejected", -2.3), ("outrage", -2.3), ("controversy", -0.8),
        ("controversial", -0.8), ("weak", -1.9), ("slow", -0.9), ("dead", -3.3),
        ("kill", -3.7), ("killed", -3.5), ("war", -2.9), ("crisis", -3.1),
        ("abuse", -3.2), ("accident", -2.1), ("accused", -1.9), ("aggressive", -0.6),
        ("alarm", -1.4), ("argument", -1.5), ("arguments", -1.7), ("attack", -2.1),
        ("attacked", -2.0), ("avoid", -1.2), ("ban", -2.6), ("banned", -2.0),
        ("bias", -0.4), ("bitter", -1.8), ("bored", -1.1), ("boring", -1.3),
        ("burden", -1.9), ("careless", -1.5), ("cheat", -2.0), ("chaos", -2.7),
        ("conflict", -1.3), ("corrupt", -3.0), ("corruption", -1.9), ("crazy", -1.4),
        ("cruel", -2.8), ("cry", -2.1), ("damage", -2.2), ("damaged", -1.9),
        ("debt", -1.5), ("defeat", -2.0), ("delay", -1.3), ("delays", -1.4),
        ("delayed", -0.9), ("deny", -1.4), ("depressed", -2.3), ("depressing", -1.6),
        ("desperate", -1.3), ("destroy", -2.5), ("destroyed", -3.4), ("dirty", -1.9),
        ("disagree", -1.6), ("disagreed", -1.3), ("disagreement", -1.5),
        ("disappointment", -2.3), ("disgusting", -2.4), ("dishonest", -2.7),
        ("dismissed", -0.8), ("distrust", -1.8), ("dumb", -2.3), ("embarrassing", -1.6),
        ("evil", -3.4), ("exhausted", -1.5), ("fake", -2.1), ("fault", -1.7),
        ("fight", -1.6), ("flaw", -1.4), ("flawed", -1.2), ("fool", -1.9),
        ("foolish", -1.1), ("frightening", -2.2), ("greed", -1.7), ("greedy", -1.3),
        ("guilty", -1.8), ("harsh", -1.9), ("hostile", -2.2), ("ignore", -1.5),
        ("ignored", -1.3), ("illegal", -2.6), ("incompetent", -2.2), ("injury", -2.5),
        ("insult", -2.3), ("lazy", -1.5), ("lie", -1.6), ("lies", -1.8),
        ("limited", -0.9), ("mad", -2.2), ("miserable", -2.2), ("mistake", -1.4),
        ("mistakes", -1.5), ("nasty", -2.6), ("nervous", -1.1), ("nightmare", -2.5),
        ("offensive", -2.2), ("panic", -2.3), ("pathetic", -2.7), ("penalty", -2.0),
        ("pessimistic", -1.5), ("poverty", -2.3), ("pressure", -1.2), ("punish", -2.4),
        ("racist", -3.1), ("rage", -2.6), ("regret", -1.8), ("shame", -2.1),
        ("shock", -1.6), ("shocked", -1.3), ("sick", -2.3), ("suffer", -2.5),
        ("suffering", -2.1), ("suspicious", -1.5), ("threat", -2.4), ("tired", -1.9),
        ("tragedy", -3.4), ("trouble", -1.7), ("unacceptable", -2.0),
        ("uncertain", -1.2), ("unclear", -1.0), ("unfortunately", -1.8), ("upset", -1.6),
        ("victim", -2.2), ("violence", -3.1), ("vulnerable", -0.9), ("warning", -1.4),
        ("weird", -0.7), ("worthless", -1.9),
    ]
    .into_iter()
    .collect()
});

static BOOSTERS: Lazy<HashMap<&'static str, f64>> = Lazy::new(|| {
    let up = [
        "absolutely", "completely", "deeply", "enormously", "entirely", "especially",
        "exceptionally", "extremely", "highly", "hugely", "incredibly", "intensely",
        "particularly", "really", "remarkably", "so", "strongly", "super", "thoroughly",
        "totally", "tremendously", "truly", "very",
    ];
    let down = [
        "almost", "barely", "hardly", "kinda", "marginally", "partly", "scarcely",
        "slightly", "somewhat", "sorta",
    ];
    up.into_iter()
        .map(|w| (w, BOOST))
        .chain(down.into_iter().map(|w| (w, -BOOST)))
        .collect()
});

static NEGATIONS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "not", "no", "never", "none", "nobody", "nothing", "neither", "nor", "nowhere",
        "without", "cannot", "cant", "can't", "dont", "don't", "doesnt", "doesn't",
        "didnt", "didn't", "isnt", "isn't", "wasnt", "wasn't", "arent", "aren't",
        "werent", "weren't", "wont", "won't", "wouldnt", "wouldn't", "shouldnt",
        "shouldn't", "couldnt", "couldn't", "hasnt", "hasn't", "havent", "haven't",
        "aint", "ain't",
    ]
    .into_iter()
    .collect()
});

/// Compound sentiment of `text` in [-1, 1]. Text with no lexicon words
/// scores exactly 0.
pub fn score(text: &str) -> f64 {
    let lower = text.to_lowercase();
    let tokens: Vec<&str> = WORD.find_iter(&lower).map(|m| m.as_str()).collect();

    let mut valences = Vec::with_capacity(tokens.len());
    for (i, token) in tokens.iter().enumerate() {
        let Some(&base) = LEXICON.get(token) else {
            valences.push(0.0);
            continue;
        };

        let mut valence = base;
        for distance in 1..=WINDOW.min(i) {
            let prev = tokens[i - distance];
            let decay = 1.0 - 0.05 * (distance - 1) as f64;
            if let Some(scalar) = BOOSTERS.get(prev) {
                valence += valence.signum() * scalar * decay;
            }
            if NEGATIONS.contains(prev) {
                valence *= NEGATION_SCALAR;
            }
        }
        valences.push(valence);
    }

    if let Some(but) = tokens.iter().position(|t| *t == "but") {
        for (i, v) in valences.iter_mut().enumerate() {
            if i < but {
                *v *= 0.5;
            } else if i > but {
                *v *= 1.5;
            }
        }
    }

    let mut sum: f64 = valences.iter().sum();
    if sum != 0.0 {
        let exclamations = text.matches('!').count().min(MAX_EXCLAMATIONS) as f64;
        sum += sum.signum() * exclamations * EXCLAMATION_BOOST;
    }
    normalize(sum)
}

fn normalize(sum: f64) -> f64 {
    if sum == 0.0 {
        return 0.0;
    }
    (sum / (sum * sum + NORMALIZATION_ALPHA).sqrt()).clamp(-1.0, 1.0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bucket {
    Positive,
    Neutral,
    Negative,
}

impl Bucket {
    pub fn of(score: f64) -> Self {
        if score >= NEUTRAL_BAND {
            Bucket::Positive
        } else if score <= -NEUTRAL_BAND {
            Bucket::Negative
        } else {
            Bucket::Neutral
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Bucket::Positive => "positive",
            Bucket::Neutral => "neutral",
            Bucket::Negative => "negative",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "positive" => Some(Bucket::Positive),
            "neutral" => Some(Bucket::Neutral),
            "negative" => Some(Bucket::Negative),
            _ => None,
        }
    }
}

/// Entry point for `digest sentiment`. Only unscored items are touched.
pub async fn run_sentiment(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;

    let rows: Vec<(String, String)> = sqlx::query_as(
        "SELECT id, summary FROM items WHERE summary IS NOT NULL AND summary != ? AND sentiment IS NULL",
    )
    .bind(NO_SUMMARY)
    .fetch_all(&pool)
    .await?;

    if rows.is_empty() {
        println!("No new summaries to score.");
        pool.close().await;
        return Ok(());
    }

    info!(items = rows.len(), "scoring sentiment");
    let mut counts = [0u64; 3];
    let mut tx = pool.begin().await?;
    for (id, summary) in &rows {
        let s = score(summary);
        counts[Bucket::of(s) as usize] += 1;
        sqlx::query("UPDATE items SET sentiment = ? WHERE id = ?")
            .bind(s)
            .bind(id)
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;

    println!("sentiment");
    println!("  items scored: {}", rows.len());
    println!("  positive: {}", counts[Bucket::Positive as usize]);
    println!("  neutral: {}", counts[Bucket::Neutral as usize]);
    println!("  negative: {}", counts[Bucket::Negative as usize]);
    println!("ok");

    pool.close().await;
    Ok(())
}
