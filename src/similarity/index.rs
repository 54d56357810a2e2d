//! In-process similarity index standing in for the vector-similarity store.
//! Text is embedded as a hashed-trigram bag-of-words vector and ranked by
//! cosine similarity -- cheap, deterministic, and recall-oriented, matching
//! the two-phase design's requirement that the index only needs to surface
//! candidates for the (expensive, precision-oriented) judge to confirm.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VectorKind {
    Name,
    Rules,
}

#[derive(Debug, Clone)]
struct Entry {
    venue: String,
    market_id: String,
    kind: VectorKind,
    vector: HashMap<u64, f32>,
    norm: f32,
}

/// An upsert-and-query nearest-neighbour store keyed by `(venue, market_id, kind)`.
#[derive(Default)]
pub struct SimilarityIndex {
    entries: Vec<Entry>,
}

#[derive(Debug, Clone)]
pub struct Candidate {
    pub venue: String,
    pub market_id: String,
    pub score: f32,
}

impl SimilarityIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces any prior vector for the same `(venue, market_id, kind)`.
    pub fn upsert(&mut self, venue: &str, market_id: &str, kind: VectorKind, text: &str) {
        let vector = embed(text);
        let norm = l2_norm(&vector);
        self.entries.retain(|e| {
            !(e.venue == venue && e.market_id == market_id && e.kind == kind)
        });
        self.entries.push(Entry {
            venue: venue.to_string(),
            market_id: market_id.to_string(),
            kind,
            vector,
            norm,
        });
    }

    /// Top-`k` nearest neighbours to `text` among entries of the given
    /// `kind`, excluding `exclude_venue` and non-positive-similarity matches.
    pub fn query_top_k(
        &self,
        text: &str,
        kind: VectorKind,
        exclude_venue: &str,
        k: usize,
    ) -> Vec<Candidate> {
        let query = embed(text);
        let query_norm = l2_norm(&query);
        if query_norm == 0.0 {
            return Vec::new();
        }

        let mut scored: Vec<Candidate> = self
            .entries
            .iter()
            .filter(|e| e.kind == kind && e.venue != exclude_venue && e.norm > 0.0)
            .map(|e| Candidate {
                venue: e.venue.clone(),
                market_id: e.market_id.clone(),
                score: cosine(&query, query_norm, &e.vector, e.norm),
            })
            .filter(|c| c.score > 0.0)
            .collect();

        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        scored
    }
}

/// Hashes each lowercase word trigram into a bucket and counts occurrences.
fn embed(text: &str) -> HashMap<u64, f32> {
    let normalized: String = text.to_ascii_lowercase();
    let tokens: Vec<&str> = normalized.split_whitespace().collect();
    let mut vector = HashMap::new();

    if tokens.is_empty() {
        return vector;
    }

    for window in tokens.windows(3.min(tokens.len()).max(1)) {
        let joined = window.join(" ");
        let bucket = fnv1a(&joined);
        *vector.entry(bucket).or_insert(0.0) += 1.0;
    }
    for token in &tokens {
        let bucket = fnv1a(token);
        *vector.entry(bucket).or_insert(0.0) += 0.5;
    }
    vector
}

fn fnv1a(s: &str) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in s.bytes() {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

fn l2_norm(v: &HashMap<u64, f32>) -> f32 {
    v.values().map(|x| x * x).sum::<f32>().sqrt()
}

fn cosine(a: &HashMap<u64, f32>, a_norm: f32, b: &HashMap<u64, f32>, b_norm: f32) -> f32 {
    if a_norm == 0.0 || b_norm == 0.0 {
        return 0.0;
    }
    let (small, big) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    let dot: f32 = small.iter().filter_map(|(k, v)| big.get(k).map(|w| v * w)).sum();
    dot / (a_norm * b_norm)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_text_scores_highest() {
        let mut index = SimilarityIndex::new();
        index.upsert("kalshi", "k1", VectorKind::Name, "Will the Fed cut rates in March");
        index.upsert("kalshi", "k2", VectorKind::Name, "Will it rain in Seattle tomorrow");

        let hits = index.query_top_k("Will the Fed cut rates in March", VectorKind::Name, "polymarket", 3);
        assert_eq!(hits[0].market_id, "k1");
        assert!(hits[0].score > hits.get(1).map(|c| c.score).unwrap_or(0.0));
    }

    #[test]
    fn excludes_same_venue() {
        let mut index = SimilarityIndex::new();
        index.upsert("kalshi", "k1", VectorKind::Name, "Will the Fed cut rates");
        let hits = index.query_top_k("Will the Fed cut rates", VectorKind::Name, "kalshi", 3);
        assert!(hits.is_empty());
    }

    #[test]
    fn respects_k_limit() {
        let mut index = SimilarityIndex::new();
        for i in 0..10 {
            index.upsert("kalshi", &format!("k{i}"), VectorKind::Name, "Will the Fed cut rates in March meeting");
        }
        let hits = index.query_top_k("Will the Fed cut rates in March meeting", VectorKind::Name, "polymarket", 3);
        assert_eq!(hits.len(), 3);
    }
}
