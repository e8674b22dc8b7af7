use crate::error::EmbeddingError;
use crate::openai::{error_body, OpenAiClient};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const DEFAULT_HASHING_DIMENSIONS: usize = 128;

#[async_trait]
pub trait EmbeddingProvider {
    fn model(&self) -> &str;

    /// One vector per input, in input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;
}

#[async_trait]
impl<T: EmbeddingProvider + Send + Sync + ?Sized> EmbeddingProvider for Box<T> {
    fn model(&self) -> &str {
        (**self).model()
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        (**self).embed(texts).await
    }
}

/// Rejects provider output that does not line up one-to-one with its input.
pub fn verify_embeddings(inputs: &[String], vectors: &[Vec<f32>]) -> Result<(), EmbeddingError> {
    if inputs.len() != vectors.len() {
        return Err(EmbeddingError::CountMismatch {
            expected: inputs.len(),
            actual: vectors.len(),
        });
    }

    let Some(expected) = vectors.first().map(Vec::len) else {
        return Ok(());
    };

    if expected == 0 {
        return Err(EmbeddingError::Malformed("embedding has no dimensions".to_string()));
    }

    for (position, vector) in vectors.iter().enumerate() {
        if vector.len() != expected {
            return Err(EmbeddingError::DimensionMismatch {
                position,
                expected,
                actual: vector.len(),
            });
        }
    }

    Ok(())
}

pub struct OpenAiEmbeddings {
    client: OpenAiClient,
    model: String,
    batch_size: usize,
}

impl OpenAiEmbeddings {
    pub fn new(client: OpenAiClient, model: impl Into<String>, batch_size: usize) -> Self {
        Self {
            client,
            model: model.into(),
            batch_size: batch_size.max(1),
        }
    }

    async fn embed_batch(&self, batch: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let request = EmbeddingRequest {
            model: &self.model,
            input: batch,
        };
        let response = self.client.post("embeddings", &request).await?;

        let status = response.status();
        if !status.is_success() {
            return Err(EmbeddingError::Status {
                status: status.as_u16(),
                body: error_body(response).await,
            });
        }

        let payload: EmbeddingResponse = response
            .json()
            .await
            .map_err(|error| EmbeddingError::Malformed(error.to_string()))?;

        order_batch(payload, batch.len())
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbeddings {
    fn model(&self) -> &str {
        &self.model
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            debug!(model = %self.model, batch = batch.len(), "requesting embeddings");
            vectors.extend(self.embed_batch(batch).await?);
        }

        verify_embeddings(texts, &vectors)?;
        Ok(vectors)
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingRow>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingRow {
    index: usize,
    embedding: Vec<f32>,
}

fn order_batch(
    mut payload: EmbeddingResponse,
    expected: usize,
) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    if payload.data.len() != expected {
        return Err(EmbeddingError::CountMismatch {
            expected,
            actual: payload.data.len(),
        });
    }

    payload.data.sort_by_key(|row| row.index);
    for (position, row) in payload.data.iter().enumerate() {
        if row.index != position {
            return Err(EmbeddingError::Malformed(format!(
                "response rows are not indexed 0..{expected}: found index {}",
                row.index
            )));
        }
    }

    Ok(payload.data.into_iter().map(|row| row.embedding).collect())
}

/// Offline embedder hashing character trigrams into a fixed number of buckets.
#[derive(Debug, Clone, Copy)]
pub struct HashingEmbeddings {
    pub dimensions: usize,
}

impl Default for HashingEmbeddings {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_HASHING_DIMENSIONS,
        }
    }
}

impl HashingEmbeddings {
    pub fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimensions.max(1)];
        let lowered = text.to_lowercase();
        let chars: Vec<char> = lowered.chars().collect();

        for window in chars.windows(3) {
            let mut hash = 1469598103934665603u64;
            for ch in window {
                let mut buffer = [0u8; 4];
                for byte in ch.encode_utf8(&mut buffer).bytes() {
                    hash ^= byte as u64;
                    hash = hash.wrapping_mul(1099511628211);
                }
            }
            let bucket = (hash % vector.len() as u64) as usize;
            vector[bucket] += 1.0;
        }

        let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for value in &mut vector {
                *value /= magnitude;
            }
        }

        vector
    }
}

#[async_trait]
impl EmbeddingProvider for HashingEmbeddings {
    fn model(&self) -> &str {
        "hashing-trigram"
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Ok(texts.iter().map(|text| self.embed_one(text)).collect())
    }
}
