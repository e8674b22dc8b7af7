use crate::models::{Segment, SegmentId};
use sha2::{Digest, Sha256};

pub const DEFAULT_CHUNK_WORDS: usize = 500;

/// Splits `text` into runs of `size` whitespace-delimited words.
///
/// The last chunk holds the remainder. Blank input yields no chunks, and so
/// does a `size` of zero.
pub fn chunk_words(text: &str, size: usize) -> Vec<String> {
    if size == 0 {
        return Vec::new();
    }

    let words = text.split_whitespace().collect::<Vec<_>>();
    words.chunks(size).map(|window| window.join(" ")).collect()
}

pub fn build_segments(text: &str, size: usize) -> Vec<Segment> {
    chunk_words(text, size)
        .into_iter()
        .enumerate()
        .map(|(position, chunk)| Segment {
            id: make_segment_id(position, &chunk),
            position,
            word_count: chunk.split_whitespace().count(),
            text: chunk,
        })
        .collect()
}

fn make_segment_id(position: usize, text: &str) -> SegmentId {
    let mut hasher = Sha256::new();
    hasher.update((position as u64).to_le_bytes());
    hasher.update(text.as_bytes());
    SegmentId(format!("{:x}", hasher.finalize()))
}
