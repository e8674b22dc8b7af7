pub mod cache;
pub mod chunking;
pub mod config;
pub mod dedup;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod index;
pub mod models;
pub mod openai;
pub mod pipeline;
pub mod report;
pub mod resilience;
pub mod synthesis;

#[cfg(test)]
pub(crate) mod test_support;

pub use cache::{CachedIndex, IndexCache};
pub use chunking::{build_segments, chunk_words, DEFAULT_CHUNK_WORDS};
pub use config::{OpenAiConfig, PipelineConfig, ResiliencePolicy};
pub use dedup::{DuplicateDetector, SimilarPair, WikiEntry, DEFAULT_DUPLICATE_THRESHOLD};
pub use embeddings::{
    verify_embeddings, EmbeddingProvider, HashingEmbeddings, OpenAiEmbeddings,
    DEFAULT_HASHING_DIMENSIONS,
};
pub use error::{
    ConfigError, EmbeddingError, ErrorKind, ExtractError, IndexError, PipelineError,
    PipelineFailure, SynthesisError,
};
pub use extractor::{
    HttpOcr, NoOcr, OcrEngine, OcrInput, PdfTextExtractor, TesseractOcr, TextExtractor,
};
pub use index::{IndexEntry, SimilarityIndex};
pub use models::{
    Document, ExtractedText, ExtractionSummary, Neighbor, PageSource, PageText,
    PipelineWarning, QaOutcome, Segment, SegmentId, Stage, EXAMPLE_QUESTIONS,
};
pub use openai::OpenAiClient;
pub use pipeline::{CancelToken, PipelineRun, QaPipeline, QaRequest};
pub use report::QaReport;
pub use resilience::{CircuitBreaker, ServiceFailure, ServiceGuard};
pub use synthesis::{AnswerSynthesizer, OpenAiChat};
