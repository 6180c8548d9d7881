//! Topic clustering of stored summaries.
//!
//! Summaries are turned into L2-normalised TF-IDF vectors and grouped with
//! k-means (k-means++ seeding, several restarts, lowest inertia wins).
//! Everything is seeded from `analysis.seed`, so the same input always
//! gives the same labels.
//!
//! Incremental runs only label items whose `cluster_id` is NULL, and do so
//! with a fresh model: label numbers from different runs are not
//! comparable. `--recluster` relabels everything in one model.

use anyhow::Result;
use once_cell::sync::Lazy;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use regex::Regex;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};

use crate::config::{AnalysisConfig, Config};
use crate::db;
use crate::models::NO_SUMMARY;

static TOKEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b\w\w+\b").unwrap());

static STOP_WORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "a", "about", "above", "after", "again", "against", "all", "also", "am", "an", "and",
        "any", "are", "as", "at", "be", "because", "been", "before", "being", "below",
        "between", "both", "but", "by", "can", "could", "did", "do", "does", "doing", "down",
        "during", "each", "either", "else", "etc", "even", "ever", "every", "few", "for",
        "from", "further", "get", "had", "has", "have", "having", "he", "her", "here", "hers",
        "herself", "him", "himself", "his", "how", "however", "if", "in", "into", "is", "it",
        "its", "itself", "just", "least", "less", "many", "may", "me", "might", "more",
        "most", "much", "must", "my", "myself", "neither", "no", "nor", "not", "now", "of",
        "off", "often", "on", "once", "one", "only", "or", "other", "others", "otherwise",
        "our", "ours", "ourselves", "out", "over", "own", "per", "perhaps", "rather", "same",
        "several", "she", "should", "since", "so", "some", "still", "such", "than", "that",
        "the", "their", "theirs", "them", "themselves", "then", "there", "therefore",
        "these", "they", "this", "those", "though", "through", "thus", "to", "together",
        "too", "toward", "under", "until", "up", "upon", "us", "very", "via", "was", "we",
        "well", "were", "what", "whatever", "when", "where", "whether", "which", "while",
        "who", "whom", "whose", "why", "will", "with", "within", "without", "would", "yet",
        "you", "your", "yours", "yourself", "yourselves",
    ]
    .into_iter()
    .collect()
});

/// Lower-cased word tokens of two or more characters, stop words removed.
pub fn tokenize(text: &str) -> Vec<String> {
    let lower = text.to_lowercase();
    TOKEN
        .find_iter(&lower)
        .map(|m| m.as_str())
        .filter(|t| !STOP_WORDS.contains(t))
        .map(String::from)
        .collect()
}

/// Dense TF-IDF matrix: one row per document, one column per vocabulary
/// term (sorted alphabetically).
#[derive(Debug, Clone)]
pub struct TfidfMatrix {
    pub vocabulary: Vec<String>,
    pub rows: Vec<Vec<f64>>,
}

/// Fit TF-IDF over `docs`, keeping the `max_features` most frequent terms.
///
/// idf is smoothed: `ln((1 + n) / (1 + df)) + 1`.
pub fn tfidf(docs: &[String], max_features: usize) -> TfidfMatrix {
    let tokenized: Vec<Vec<String>> = docs.iter().map(|d| tokenize(d)).collect();

    let mut corpus_counts: HashMap<&str, usize> = HashMap::new();
    let mut doc_freq: HashMap<&str, usize> = HashMap::new();
    for tokens in &tokenized {
        let mut seen = HashSet::new();
        for t in tokens {
            *corpus_counts.entry(t.as_str()).or_default() += 1;
            if seen.insert(t.as_str()) {
                *doc_freq.entry(t.as_str()).or_default() += 1;
            }
        }
    }

    let mut ranked: Vec<(&str, usize)> = corpus_counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    ranked.truncate(max_features);
    let mut vocabulary: Vec<String> = ranked.into_iter().map(|(t, _)| t.to_string()).collect();
    vocabulary.sort();

    let column: HashMap<&str, usize> = vocabulary
        .iter()
        .enumerate()
        .map(|(i, t)| (t.as_str(), i))
        .collect();

    let n = docs.len() as f64;
    let idf: Vec<f64> = vocabulary
        .iter()
        .map(|t| {
            let df = doc_freq.get(t.as_str()).copied().unwrap_or(0) as f64;
            ((1.0 + n) / (1.0 + df)).ln() + 1.0
        })
        .collect();

    let rows = tokenized
        .iter()
        .map(|tokens| {
            let mut row = vec![0.0; vocabulary.len()];
            for t in tokens {
                if let Some(&col) = column.get(t.as_str()) {
                    row[col] += 1.0;
                }
            }
            for (value, weight) in row.iter_mut().zip(&idf) {
                *value *= weight;
            }
            let norm = row.iter().map(|v| v * v).sum::<f64>().sqrt();
            if norm > 0.0 {
                row.iter_mut().for_each(|v| *v /= norm);
            }
            row
        })
        .collect();

    TfidfMatrix { vocabulary, rows }
}

#[derive(Debug, Clone)]
pub struct KMeansModel {
    pub labels: Vec<usize>,
    pub centroids: Vec<Vec<f64>>,
    pub inertia: f64,
}

fn squared_distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

fn nearest(point: &[f64], centroids: &[Vec<f64>]) -> (usize, f64) {
    let mut best = (0, f64::INFINITY);
    for (i, c) in centroids.iter().enumerate() {
        let d = squared_distance(point, c);
        if d < best.1 {
            best = (i, d);
        }
    }
    best
}

/// k-means++: first centre uniformly, the rest with probability
/// proportional to squared distance from the nearest chosen centre.
fn seed_centroids(rows: &[Vec<f64>], k: usize, rng: &mut StdRng) -> Vec<Vec<f64>> {
    let mut centroids = vec![rows[rng.random_range(0..rows.len())].clone()];
    let mut distances: Vec<f64> = rows
        .iter()
        .map(|r| squared_distance(r, &centroids[0]))
        .collect();

    while centroids.len() < k {
        let total: f64 = distances.iter().sum();
        let pick = if total > 0.0 {
            let mut target = rng.random::<f64>() * total;
            let mut chosen = rows.len() - 1;
            for (i, d) in distances.iter().enumerate() {
                if target < *d {
                    chosen = i;
                    break;
                }
                target -= d;
            }
            chosen
        } else {
            rng.random_range(0..rows.len())
        };

        let centre = rows[pick].clone();
        for (d, r) in distances.iter_mut().zip(rows) {
            *d = d.min(squared_distance(r, &centre));
        }
        centroids.push(centre);
    }
    centroids
}

fn lloyd(rows: &[Vec<f64>], mut centroids: Vec<Vec<f64>>, max_iter: usize) -> KMeansModel {
    let dims = rows.first().map_or(0, |r| r.len());
    let mut labels = vec![usize::MAX; rows.len()];

    for _ in 0..max_iter.max(1) {
        let mut changed = false;
        for (label, row) in labels.iter_mut().zip(rows) {
            let (best, _) = nearest(row, &centroids);
            if *label != best {
                *label = best;
                changed = true;
            }
        }
        if !changed {
            break;
        }

        let mut sums = vec![vec![0.0; dims]; centroids.len()];
        let mut counts = vec![0usize; centroids.len()];
        for (label, row) in labels.iter().zip(rows) {
            counts[*label] += 1;
            for (s, v) in sums[*label].iter_mut().zip(row) {
                *s += v;
            }
        }
        for (c, (sum, count)) in centroids.iter_mut().zip(sums.into_iter().zip(counts)) {
            // an empty cluster keeps its previous centre
            if count > 0 {
                *c = sum.into_iter().map(|s| s / count as f64).collect();
            }
        }
    }

    let inertia = labels
        .iter()
        .zip(rows)
        .map(|(l, r)| squared_distance(r, &centroids[*l]))
        .sum();
    KMeansModel {
        labels,
        centroids,
        inertia,
    }
}

/// Cluster `rows` into `k` groups (`k` is capped at the number of rows),
/// keeping the best of `n_init` seeded restarts.
pub fn kmeans(rows: &[Vec<f64>], k: usize, n_init: usize, max_iter: usize, seed: u64) -> KMeansModel {
    if rows.is_empty() || k == 0 {
        return KMeansModel {
            labels: Vec::new(),
            centroids: Vec::new(),
            inertia: 0.0,
        };
    }
    let k = k.min(rows.len());
    let mut rng = StdRng::seed_from_u64(seed);

    let mut best: Option<KMeansModel> = None;
    for run in 0..n_init.max(1) {
        let model = lloyd(rows, seed_centroids(rows, k, &mut rng), max_iter);
        debug!(run, inertia = model.inertia, "k-means restart");
        if best.as_ref().map_or(true, |b| model.inertia < b.inertia) {
            best = Some(model);
        }
    }
    best.unwrap_or_else(|| KMeansModel {
        labels: vec![0; rows.len()],
        centroids: Vec::new(),
        inertia: 0.0,
    })
}

/// The `n` highest-weighted terms of a centroid.
pub fn top_terms<'a>(centroid: &[f64], vocabulary: &'a [String], n: usize) -> Vec<&'a str> {
    let mut order: Vec<usize> = (0..centroid.len()).collect();
    order.sort_by(|a, b| {
        centroid[*b]
            .partial_cmp(&centroid[*a])
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    order
        .into_iter()
        .filter(|i| centroid[*i] > 0.0)
        .take(n)
        .map(|i| vocabulary[i].as_str())
        .collect()
}

/// Fit TF-IDF + k-means over `summaries`. Returns the model and the
/// vocabulary used for term lookup.
pub fn cluster_summaries(summaries: &[String], analysis: &AnalysisConfig) -> (KMeansModel, Vec<String>) {
    let matrix = tfidf(summaries, analysis.max_features);
    let model = kmeans(
        &matrix.rows,
        analysis.num_clusters,
        analysis.n_init,
        analysis.max_iter,
        analysis.seed,
    );
    (model, matrix.vocabulary)
}

/// Entry point for `digest cluster`.
pub async fn run_cluster(config: &Config, recluster: bool) -> Result<()> {
    let pool = db::connect(config).await?;

    let query = if recluster {
        "SELECT id, summary FROM items WHERE summary IS NOT NULL AND summary != ? ORDER BY id"
    } else {
        "SELECT id, summary FROM items WHERE summary IS NOT NULL AND summary != ? AND cluster_id IS NULL ORDER BY id"
    };
    let rows: Vec<(String, String)> = sqlx::query_as(query)
        .bind(NO_SUMMARY)
        .fetch_all(&pool)
        .await?;

    if rows.is_empty() {
        if recluster {
            println!("No summaries to cluster.");
        } else {
            println!("No new summaries to cluster.");
        }
        pool.close().await;
        return Ok(());
    }

    let (ids, summaries): (Vec<String>, Vec<String>) = rows.into_iter().unzip();
    info!(items = ids.len(), recluster, "clustering summaries");
    let (model, vocabulary) = cluster_summaries(&summaries, &config.analysis);

    let mut tx = pool.begin().await?;
    if recluster {
        sqlx::query("UPDATE items SET cluster_id = NULL")
            .execute(&mut *tx)
            .await?;
    }
    for (id, label) in ids.iter().zip(&model.labels) {
        sqlx::query("UPDATE items SET cluster_id = ? WHERE id = ?")
            .bind(*label as i64)
            .bind(id)
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;

    println!(
        "cluster{}",
        if recluster { " (recluster)" } else { "" }
    );
    println!("  items labelled: {}", ids.len());
    println!("  clusters: {}", model.centroids.len());
    for (i, centroid) in model.centroids.iter().enumerate() {
        let size = model.labels.iter().filter(|l| **l == i).count();
        let terms = top_terms(centroid, &vocabulary, config.analysis.top_terms);
        println!("  cluster {} ({} items): {}", i, size, terms.join(", "));
    }
    println!("ok");

    pool.close().await;
    Ok(())
}
