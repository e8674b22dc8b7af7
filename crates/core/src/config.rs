use crate::chunking::DEFAULT_CHUNK_WORDS;
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use url::Url;

pub const OPENAI_API_KEY_ENV: &str = "OPENAI_API_KEY";
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    /// Words per segment.
    pub chunk_size: usize,
    /// Segments handed to the synthesizer.
    pub top_k: usize,
    /// Tesseract language code for scanned pages.
    pub ocr_language: String,
    pub embedding_model: String,
    pub embedding_batch_size: usize,
    pub completion_model: String,
    pub max_answer_tokens: u32,
    pub resilience: ResiliencePolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_WORDS,
            top_k: 3,
            ocr_language: "kor".to_string(),
            embedding_model: "text-embedding-ada-002".to_string(),
            embedding_batch_size: 512,
            completion_model: "gpt-4o".to_string(),
            max_answer_tokens: 150,
            resilience: ResiliencePolicy::default(),
        }
    }
}

impl PipelineConfig {
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size == 0 {
            return Err(ConfigError::Invalid("chunk_size must be positive".to_string()));
        }
        if self.top_k == 0 {
            return Err(ConfigError::Invalid("top_k must be positive".to_string()));
        }
        if self.ocr_language.trim().is_empty() {
            return Err(ConfigError::Invalid("ocr_language is empty".to_string()));
        }
        if self.embedding_batch_size == 0 {
            return Err(ConfigError::Invalid(
                "embedding_batch_size must be positive".to_string(),
            ));
        }
        if self.max_answer_tokens == 0 {
            return Err(ConfigError::Invalid(
                "max_answer_tokens must be positive".to_string(),
            ));
        }
        self.resilience.validate()
    }
}

/// Retry, circuit breaker and timeout settings applied around external calls.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ResiliencePolicy {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Consecutive failed calls before the breaker opens.
    pub breaker_threshold: u32,
    pub breaker_cooldown_ms: u64,
    pub stage_timeout_ms: u64,
    pub request_timeout_ms: u64,
}

impl Default for ResiliencePolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 500,
            max_backoff_ms: 8_000,
            breaker_threshold: 5,
            breaker_cooldown_ms: 30_000,
            stage_timeout_ms: 120_000,
            request_timeout_ms: 60_000,
        }
    }
}

impl ResiliencePolicy {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid("max_attempts must be at least 1".to_string()));
        }
        if self.breaker_threshold == 0 {
            return Err(ConfigError::Invalid(
                "breaker_threshold must be at least 1".to_string(),
            ));
        }
        if self.initial_backoff_ms > self.max_backoff_ms {
            return Err(ConfigError::Invalid(
                "initial_backoff_ms exceeds max_backoff_ms".to_string(),
            ));
        }
        if self.stage_timeout_ms == 0 {
            return Err(ConfigError::Invalid("stage_timeout_ms must be positive".to_string()));
        }
        Ok(())
    }

    /// Delay before retry number `attempt` (1-based), doubling and capped.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let millis = self
            .initial_backoff_ms
            .saturating_mul(1u64 << exponent)
            .min(self.max_backoff_ms);
        Duration::from_millis(millis)
    }

    pub fn stage_timeout(&self) -> Duration {
        Duration::from_millis(self.stage_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn breaker_cooldown(&self) -> Duration {
        Duration::from_millis(self.breaker_cooldown_ms)
    }
}

#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub base_url: Url,
}

impl OpenAiConfig {
    pub fn new(api_key: impl Into<String>, base_url: &str) -> Result<Self, ConfigError> {
        let api_key = api_key.into().trim().to_string();
        if api_key.is_empty() {
            return Err(ConfigError::MissingApiKey(OPENAI_API_KEY_ENV));
        }

        Ok(Self {
            api_key,
            base_url: Url::parse(base_url)?,
        })
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        let api_key = std::env::var(OPENAI_API_KEY_ENV)
            .map_err(|_| ConfigError::MissingApiKey(OPENAI_API_KEY_ENV))?;
        let base_url = std::env::var("OPENAI_BASE_URL")
            .unwrap_or_else(|_| DEFAULT_OPENAI_BASE_URL.to_string());
        Self::new(api_key, &base_url)
    }

    pub fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.as_str().trim_end_matches('/'), path)
    }
}
