use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

#[derive(Debug, Clone)]
pub struct Document {
    pub name: Option<String>,
    pub bytes: Vec<u8>,
}

impl Document {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            name: None,
            bytes: bytes.into(),
        }
    }

    pub fn named(name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            name: Some(name.into()),
            bytes: bytes.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Content address of this document as split with `chunk_size`.
    pub fn fingerprint(&self, chunk_size: usize) -> String {
        let mut hasher = Sha256::new();
        hasher.update((chunk_size as u64).to_le_bytes());
        hasher.update(&self.bytes);
        format!("{:x}", hasher.finalize())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PageSource {
    TextLayer,
    Ocr,
    Unreadable,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageText {
    pub number: u32,
    pub text: String,
    pub source: PageSource,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedText {
    pub text: String,
    pub pages: Vec<PageText>,
}

impl ExtractedText {
    pub fn from_pages(pages: Vec<PageText>) -> Self {
        let text = pages
            .iter()
            .map(|page| page.text.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        Self { text, pages }
    }

    pub fn summary(&self) -> ExtractionSummary {
        ExtractionSummary {
            page_count: self.pages.len(),
            ocr_pages: self
                .pages
                .iter()
                .filter(|page| page.source == PageSource::Ocr)
                .count(),
            unreadable_pages: self
                .pages
                .iter()
                .filter(|page| page.source == PageSource::Unreadable)
                .map(|page| page.number)
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExtractionSummary {
    pub page_count: usize,
    pub ocr_pages: usize,
    pub unreadable_pages: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SegmentId(pub String);

impl fmt::Display for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    pub id: SegmentId,
    pub position: usize,
    pub text: String,
    pub word_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Neighbor {
    pub segment_id: SegmentId,
    pub position: usize,
    pub distance: f32,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stage {
    Idle,
    Extracting,
    Chunking,
    Embedding,
    Indexing,
    Retrieving,
    Synthesizing,
    Done,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Idle => "Idle",
            Stage::Extracting => "Extracting",
            Stage::Chunking => "Chunking",
            Stage::Embedding => "Embedding",
            Stage::Indexing => "Indexing",
            Stage::Retrieving => "Retrieving",
            Stage::Synthesizing => "Synthesizing",
            Stage::Done => "Done",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum PipelineWarning {
    ExtractionPartialFailure { unreadable_pages: Vec<u32> },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QaOutcome {
    pub question: String,
    pub answer: String,
    pub contexts: Vec<Neighbor>,
    pub extraction: ExtractionSummary,
    pub segment_count: usize,
    pub from_cache: bool,
    pub warnings: Vec<PipelineWarning>,
}

pub const EXAMPLE_QUESTIONS: [&str; 4] = [
    "간단한 요약을 제공해 줄 수 있나요?",
    "이 장비의 안전 수칙은 무엇인가요?",
    "자주 발생하는 오류 코드와 해결 방법은?",
    "작업 순서를 단계별로 알려 주세요.",
];

#[cfg(test)]
mod tests {
    use super::*;

    fn page(number: u32, text: &str, source: PageSource) -> PageText {
        PageText {
            number,
            text: text.to_string(),
            source,
        }
    }

    #[test]
    fn pages_are_joined_in_order() {
        let extracted = ExtractedText::from_pages(vec![
            page(1, "first page", PageSource::TextLayer),
            page(2, "", PageSource::Unreadable),
            page(3, "third page", PageSource::Ocr),
        ]);

        assert_eq!(extracted.text, "first page\n\nthird page");
        let summary = extracted.summary();
        assert_eq!(summary.page_count, 3);
        assert_eq!(summary.ocr_pages, 1);
        assert_eq!(summary.unreadable_pages, vec![2]);
    }

    #[test]
    fn fingerprint_depends_on_bytes_and_chunk_size() {
        let document = Document::new(b"%PDF-1.4 manual".to_vec());
        assert_eq!(document.fingerprint(500), document.fingerprint(500));
        assert_ne!(document.fingerprint(500), document.fingerprint(200));
        assert_ne!(
            document.fingerprint(500),
            Document::new(b"%PDF-1.4 other".to_vec()).fingerprint(500)
        );
    }
}
