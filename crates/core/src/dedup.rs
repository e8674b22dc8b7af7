use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const DEFAULT_DUPLICATE_THRESHOLD: f64 = 0.8;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WikiEntry {
    pub author: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SimilarPair {
    pub left: usize,
    pub right: usize,
    pub score: f64,
}

/// Flags pairs of texts whose TF-IDF cosine similarity exceeds a threshold.
///
/// Tokens are lowercased runs of two or more word characters. Weights use raw
/// term counts, smoothed idf `ln((1 + n) / (1 + df)) + 1` and L2-normalised
/// rows.
#[derive(Debug, Clone)]
pub struct DuplicateDetector {
    token: Regex,
    threshold: f64,
}

impl DuplicateDetector {
    pub fn new(threshold: f64) -> Result<Self, regex::Error> {
        Ok(Self {
            token: Regex::new(r"\b\w\w+\b")?,
            threshold,
        })
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    fn tokenize<'a>(&self, lowered: &'a str) -> Vec<&'a str> {
        self.token.find_iter(lowered).map(|found| found.as_str()).collect()
    }

    pub fn tfidf_rows(&self, texts: &[&str]) -> Vec<HashMap<String, f64>> {
        let lowered = texts.iter().map(|text| text.to_lowercase()).collect::<Vec<_>>();
        let counts = lowered
            .iter()
            .map(|text| {
                let mut counts = HashMap::<String, f64>::new();
                for token in self.tokenize(text) {
                    *counts.entry(token.to_string()).or_default() += 1.0;
                }
                counts
            })
            .collect::<Vec<_>>();

        let mut document_frequency = HashMap::<&str, f64>::new();
        for row in &counts {
            for term in row.keys() {
                *document_frequency.entry(term.as_str()).or_default() += 1.0;
            }
        }

        let n = texts.len() as f64;
        let idf = document_frequency
            .into_iter()
            .map(|(term, df)| (term.to_string(), ((1.0 + n) / (1.0 + df)).ln() + 1.0))
            .collect::<HashMap<_, _>>();

        counts
            .into_iter()
            .map(|row| {
                let mut weighted = row
                    .into_iter()
                    .map(|(term, tf)| {
                        let weight = tf * idf.get(&term).copied().unwrap_or(1.0);
                        (term, weight)
                    })
                    .collect::<HashMap<_, _>>();
                let norm = weighted.values().map(|value| value * value).sum::<f64>().sqrt();
                if norm > 0.0 {
                    for value in weighted.values_mut() {
                        *value /= norm;
                    }
                }
                weighted
            })
            .collect()
    }

    pub fn similar_pairs(&self, texts: &[&str]) -> Vec<SimilarPair> {
        if texts.len() < 2 {
            return Vec::new();
        }

        let rows = self.tfidf_rows(texts);
        let mut pairs = Vec::new();
        for left in 0..rows.len() {
            for right in (left + 1)..rows.len() {
                let score = cosine(&rows[left], &rows[right]);
                if score > self.threshold {
                    pairs.push(SimilarPair { left, right, score });
                }
            }
        }
        pairs
    }

    pub fn similar_entries(&self, entries: &[WikiEntry]) -> Vec<SimilarPair> {
        let texts = entries
            .iter()
            .map(|entry| entry.content.as_str())
            .collect::<Vec<_>>();
        self.similar_pairs(&texts)
    }
}

fn cosine(left: &HashMap<String, f64>, right: &HashMap<String, f64>) -> f64 {
    let (small, large) = if left.len() <= right.len() {
        (left, right)
    } else {
        (right, left)
    };
    small
        .iter()
        .filter_map(|(term, weight)| large.get(term).map(|other| weight * other))
        .sum()
}
