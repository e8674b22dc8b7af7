use crate::error::IndexError;
use crate::models::{Neighbor, Segment};

#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub segment: Segment,
    pub vector: Vec<f32>,
}

/// Brute-force L2 nearest-neighbour index over one document's segments.
///
/// Each stored vector travels with the segment it was computed from, so a hit
/// always resolves to text from the same build.
#[derive(Debug, Clone)]
pub struct SimilarityIndex {
    entries: Vec<IndexEntry>,
    dimension: usize,
}

impl SimilarityIndex {
    pub fn build(segments: Vec<Segment>, vectors: Vec<Vec<f32>>) -> Result<Self, IndexError> {
        if segments.len() != vectors.len() {
            return Err(IndexError::CountMismatch {
                segments: segments.len(),
                vectors: vectors.len(),
            });
        }

        let dimension = vectors.first().map(Vec::len).unwrap_or(0);
        for (position, vector) in vectors.iter().enumerate() {
            if vector.is_empty() {
                return Err(IndexError::EmptyVector { position });
            }
            if vector.len() != dimension {
                return Err(IndexError::DimensionMismatch {
                    expected: dimension,
                    actual: vector.len(),
                });
            }
        }

        let entries = segments
            .into_iter()
            .zip(vectors)
            .map(|(segment, vector)| IndexEntry { segment, vector })
            .collect();

        Ok(Self { entries, dimension })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    /// The `k` closest entries by ascending distance, lower position first on ties.
    /// `k` larger than the index returns everything.
    pub fn query(&self, vector: &[f32], k: usize) -> Result<Vec<Neighbor>, IndexError> {
        if self.entries.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        if vector.len() != self.dimension {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }

        let mut scored = self
            .entries
            .iter()
            .enumerate()
            .map(|(row, entry)| (row, euclidean_distance(&entry.vector, vector)))
            .collect::<Vec<_>>();

        scored.sort_by(|left, right| left.1.total_cmp(&right.1).then(left.0.cmp(&right.0)));

        Ok(scored
            .into_iter()
            .take(k.min(self.entries.len()))
            .map(|(row, distance)| {
                let segment = &self.entries[row].segment;
                Neighbor {
                    segment_id: segment.id.clone(),
                    position: segment.position,
                    distance,
                    text: segment.text.clone(),
                }
            })
            .collect())
    }
}

fn euclidean_distance(left: &[f32], right: &[f32]) -> f32 {
    left.iter()
        .zip(right)
        .map(|(a, b)| (a - b) * (a - b))
        .sum::<f32>()
        .sqrt()
}
