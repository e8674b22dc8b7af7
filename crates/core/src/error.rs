use crate::models::Stage;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("pdf parse error: {0}")]
    PdfParse(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("ocr failed: {0}")]
    OcrFailed(String),
}

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("embedding service returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed embedding response: {0}")]
    Malformed(String),

    #[error("embedding service returned {actual} vectors for {expected} inputs")]
    CountMismatch { expected: usize, actual: usize },

    #[error("embedding at position {position} has dimension {actual}, expected {expected}")]
    DimensionMismatch {
        position: usize,
        expected: usize,
        actual: usize,
    },

    #[error("embedding service circuit is open after repeated failures")]
    CircuitOpen,
}

impl EmbeddingError {
    pub fn status(&self) -> Option<u16> {
        match self {
            EmbeddingError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum SynthesisError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("completion service returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed completion response: {0}")]
    Malformed(String),

    #[error("completion service circuit is open after repeated failures")]
    CircuitOpen,
}

impl SynthesisError {
    pub fn status(&self) -> Option<u16> {
        match self {
            SynthesisError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum IndexError {
    #[error("index needs one vector per segment, got {vectors} vectors for {segments} segments")]
    CountMismatch { segments: usize, vectors: usize },

    #[error("vector at position {position} is empty")]
    EmptyVector { position: usize },

    #[error("vector dimension {actual} does not match index dimension {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("missing api key: set {0}")]
    MissingApiKey(&'static str),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("http client error: {0}")]
    Http(#[from] reqwest::Error),
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("document could not be read: {0}")]
    Extraction(#[from] ExtractError),

    #[error("document contains no extractable text")]
    EmptyDocument,

    #[error("embedding service error: {0}")]
    EmbeddingService(#[from] EmbeddingError),

    #[error("similarity index error: {0}")]
    Index(#[from] IndexError),

    #[error("completion service error: {0}")]
    SynthesisService(#[from] SynthesisError),

    #[error("the model returned an empty answer")]
    NoAnswer,

    #[error("{stage} timed out after {after:?}")]
    Timeout { stage: Stage, after: Duration },

    #[error("run was cancelled")]
    Cancelled,

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Coarse classes a caller renders differently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidInput,
    ServiceUnavailable,
    NoAnswer,
    /// The service rejected our credentials or the local setup is wrong.
    Configuration,
    Internal,
}

fn service_kind(status: Option<u16>) -> ErrorKind {
    match status {
        Some(401 | 403) => ErrorKind::Configuration,
        _ => ErrorKind::ServiceUnavailable,
    }
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::InvalidInput(_)
            | PipelineError::Extraction(_)
            | PipelineError::EmptyDocument => ErrorKind::InvalidInput,
            PipelineError::EmbeddingService(error) => service_kind(error.status()),
            PipelineError::SynthesisService(error) => service_kind(error.status()),
            PipelineError::Timeout { .. } => ErrorKind::ServiceUnavailable,
            PipelineError::NoAnswer => ErrorKind::NoAnswer,
            PipelineError::Config(_) => ErrorKind::Configuration,
            PipelineError::Index(_) | PipelineError::Cancelled => ErrorKind::Internal,
        }
    }
}

#[derive(Debug, Error)]
#[error("pipeline failed during {stage}: {error}")]
pub struct PipelineFailure {
    pub stage: Stage,
    pub error: PipelineError,
}

impl PipelineFailure {
    pub fn new(stage: Stage, error: impl Into<PipelineError>) -> Self {
        Self {
            stage,
            error: error.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.error.kind()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kinds_keep_input_and_service_failures_apart() {
        assert_eq!(
            PipelineError::InvalidInput("empty question".to_string()).kind(),
            ErrorKind::InvalidInput
        );
        assert_eq!(
            PipelineError::EmbeddingService(EmbeddingError::CircuitOpen).kind(),
            ErrorKind::ServiceUnavailable
        );
        assert_eq!(
            PipelineError::SynthesisService(SynthesisError::Status {
                status: 503,
                body: String::new(),
            })
            .kind(),
            ErrorKind::ServiceUnavailable
        );
        assert_eq!(PipelineError::NoAnswer.kind(), ErrorKind::NoAnswer);
    }

    #[test]
    fn rejected_credentials_are_a_configuration_problem() {
        for status in [401, 403] {
            let error = PipelineError::SynthesisService(SynthesisError::Status {
                status,
                body: "invalid api key".to_string(),
            });
            assert_eq!(error.kind(), ErrorKind::Configuration);
        }
        assert_eq!(
            PipelineError::EmbeddingService(EmbeddingError::Status {
                status: 401,
                body: String::new(),
            })
            .kind(),
            ErrorKind::Configuration
        );
        assert_eq!(
            PipelineError::EmbeddingService(EmbeddingError::Status {
                status: 429,
                body: String::new(),
            })
            .kind(),
            ErrorKind::ServiceUnavailable
        );
    }

    #[test]
    fn failure_message_names_the_stage() {
        let failure = PipelineFailure::new(Stage::Embedding, EmbeddingError::CircuitOpen);
        assert!(failure.to_string().starts_with("pipeline failed during Embedding"));
    }
}
