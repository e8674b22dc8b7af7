use crate::cache::{CachedIndex, IndexCache};
use crate::chunking::build_segments;
use crate::config::PipelineConfig;
use crate::embeddings::{verify_embeddings, EmbeddingProvider};
use crate::error::{ConfigError, EmbeddingError, PipelineError, PipelineFailure};
use crate::extractor::TextExtractor;
use crate::index::SimilarityIndex;
use crate::models::{Document, PipelineWarning, QaOutcome, Stage};
use crate::resilience::ServiceGuard;
use crate::synthesis::AnswerSynthesizer;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Cooperative cancellation, honoured before each stage starts.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Everything one run needs; nothing of it outlives the run.
#[derive(Debug, Clone, Default)]
pub struct QaRequest {
    pub document: Option<Document>,
    pub question: String,
    pub cancel: Option<CancelToken>,
}

impl QaRequest {
    pub fn new(document: Document, question: impl Into<String>) -> Self {
        Self {
            document: Some(document),
            question: question.into(),
            cancel: None,
        }
    }

    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

#[derive(Debug)]
pub struct PipelineRun {
    pub run_id: Uuid,
    /// Stages entered, in order, starting at `Idle`.
    pub trace: Vec<Stage>,
    pub outcome: Result<QaOutcome, PipelineFailure>,
}

impl PipelineRun {
    pub fn final_stage(&self) -> Stage {
        match &self.outcome {
            Ok(_) => Stage::Done,
            Err(failure) => failure.stage,
        }
    }

    pub fn answer(&self) -> Option<&str> {
        self.outcome.as_ref().ok().map(|outcome| outcome.answer.as_str())
    }
}

pub struct QaPipeline<X, E, S> {
    extractor: X,
    embedder: E,
    synthesizer: S,
    config: PipelineConfig,
    embedding_guard: ServiceGuard,
    synthesis_guard: ServiceGuard,
    cache: Option<Arc<IndexCache>>,
}

struct PreparedIndex {
    built: CachedIndex,
    from_cache: bool,
}

impl<X, E, S> QaPipeline<X, E, S>
where
    X: TextExtractor + Send + Sync,
    E: EmbeddingProvider + Send + Sync,
    S: AnswerSynthesizer + Send + Sync,
{
    pub fn new(
        extractor: X,
        embedder: E,
        synthesizer: S,
        config: PipelineConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            embedding_guard: ServiceGuard::new("embeddings", &config.resilience),
            synthesis_guard: ServiceGuard::new("completion", &config.resilience),
            extractor,
            embedder,
            synthesizer,
            config,
            cache: None,
        })
    }

    pub fn with_cache(mut self, cache: Arc<IndexCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub async fn ask(&self, document: Document, question: impl Into<String>) -> PipelineRun {
        self.run(QaRequest::new(document, question)).await
    }

    pub async fn run(&self, request: QaRequest) -> PipelineRun {
        let run_id = Uuid::new_v4();
        let mut trace = vec![Stage::Idle];
        let outcome = self
            .execute(request, &mut trace)
            .instrument(info_span!("qa_run", %run_id))
            .await;

        match &outcome {
            Ok(outcome) => info!(
                %run_id,
                segments = outcome.segment_count,
                contexts = outcome.contexts.len(),
                from_cache = outcome.from_cache,
                "run finished"
            ),
            Err(failure) => warn!(
                %run_id,
                stage = %failure.stage,
                kind = ?failure.kind(),
                error = %failure.error,
                "run failed"
            ),
        }

        PipelineRun {
            run_id,
            trace,
            outcome,
        }
    }

    async fn execute(
        &self,
        request: QaRequest,
        trace: &mut Vec<Stage>,
    ) -> Result<QaOutcome, PipelineFailure> {
        let QaRequest {
            document,
            question,
            cancel,
        } = request;

        let document = match document {
            Some(document) if !document.is_empty() => document,
            _ => {
                return Err(PipelineFailure::new(
                    Stage::Idle,
                    PipelineError::InvalidInput("a PDF document is required".to_string()),
                ))
            }
        };
        let question = question.trim().to_string();
        if question.is_empty() {
            return Err(PipelineFailure::new(
                Stage::Idle,
                PipelineError::InvalidInput("the question is empty".to_string()),
            ));
        }

        let prepared = self.prepare_index(&document, trace, cancel.as_ref()).await?;
        drop(document);

        enter(Stage::Retrieving, trace, cancel.as_ref())?;
        let query = std::slice::from_ref(&question);
        let query_vectors = self
            .within(
                Stage::Retrieving,
                self.embedding_guard.call(|| self.embedder.embed(query)),
            )
            .await?;
        verify_embeddings(query, &query_vectors)
            .map_err(|error| PipelineFailure::new(Stage::Retrieving, error))?;
        let query_vector = query_vectors.into_iter().next().ok_or_else(|| {
            PipelineFailure::new(
                Stage::Retrieving,
                EmbeddingError::CountMismatch {
                    expected: 1,
                    actual: 0,
                },
            )
        })?;
        let contexts = prepared
            .built
            .index
            .query(&query_vector, self.config.top_k)
            .map_err(|error| PipelineFailure::new(Stage::Retrieving, error))?;
        debug!(candidates = contexts.len(), "retrieved context");

        enter(Stage::Synthesizing, trace, cancel.as_ref())?;
        let context_texts = contexts
            .iter()
            .map(|neighbor| neighbor.text.clone())
            .collect::<Vec<_>>();
        let answer = self
            .within(
                Stage::Synthesizing,
                self.synthesis_guard
                    .call(|| self.synthesizer.synthesize(&question, &context_texts)),
            )
            .await?;
        if answer.trim().is_empty() {
            return Err(PipelineFailure::new(Stage::Synthesizing, PipelineError::NoAnswer));
        }

        trace.push(Stage::Done);
        Ok(QaOutcome {
            question,
            answer,
            contexts,
            segment_count: prepared.built.index.len(),
            extraction: prepared.built.extraction,
            from_cache: prepared.from_cache,
            warnings: prepared.built.warnings,
        })
    }

    async fn prepare_index(
        &self,
        document: &Document,
        trace: &mut Vec<Stage>,
        cancel: Option<&CancelToken>,
    ) -> Result<PreparedIndex, PipelineFailure> {
        let chunk_size = self.config.chunk_size;
        if let Some(built) = self
            .cache
            .as_ref()
            .and_then(|cache| cache.get(document, chunk_size))
        {
            info!(
                segments = built.index.len(),
                warnings = built.warnings.len(),
                "reusing cached index"
            );
            return Ok(PreparedIndex {
                built,
                from_cache: true,
            });
        }

        enter(Stage::Extracting, trace, cancel)?;
        let extracted = self
            .within(Stage::Extracting, self.extractor.extract(document))
            .await?;
        let summary = extracted.summary();
        let mut warnings = Vec::new();
        if !summary.unreadable_pages.is_empty() {
            warn!(pages = ?summary.unreadable_pages, "pages yielded no text");
            warnings.push(PipelineWarning::ExtractionPartialFailure {
                unreadable_pages: summary.unreadable_pages.clone(),
            });
        }

        enter(Stage::Chunking, trace, cancel)?;
        let segments = build_segments(&extracted.text, chunk_size);
        if segments.is_empty() {
            return Err(PipelineFailure::new(Stage::Chunking, PipelineError::EmptyDocument));
        }
        debug!(segments = segments.len(), chunk_size, "document chunked");

        enter(Stage::Embedding, trace, cancel)?;
        let texts = segments
            .iter()
            .map(|segment| segment.text.clone())
            .collect::<Vec<_>>();
        let vectors = self
            .within(
                Stage::Embedding,
                self.embedding_guard.call(|| self.embedder.embed(&texts)),
            )
            .await?;
        verify_embeddings(&texts, &vectors)
            .map_err(|error| PipelineFailure::new(Stage::Embedding, error))?;

        enter(Stage::Indexing, trace, cancel)?;
        let index = SimilarityIndex::build(segments, vectors)
            .map(Arc::new)
            .map_err(|error| PipelineFailure::new(Stage::Indexing, error))?;
        info!(
            model = self.embedder.model(),
            dimension = index.dimension(),
            segments = index.len(),
            "index built"
        );

        let built = CachedIndex {
            index,
            extraction: summary,
            warnings,
        };
        if let Some(cache) = &self.cache {
            cache.insert(document, chunk_size, built.clone());
        }

        Ok(PreparedIndex {
            built,
            from_cache: false,
        })
    }

    async fn within<T, Err, F>(&self, stage: Stage, future: F) -> Result<T, PipelineFailure>
    where
        F: Future<Output = Result<T, Err>>,
        Err: Into<PipelineError>,
    {
        let after = self.config.resilience.stage_timeout();
        match tokio::time::timeout(after, future).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(error)) => Err(PipelineFailure::new(stage, error)),
            Err(_) => Err(PipelineFailure::new(
                stage,
                PipelineError::Timeout { stage, after },
            )),
        }
    }
}

fn enter(
    stage: Stage,
    trace: &mut Vec<Stage>,
    cancel: Option<&CancelToken>,
) -> Result<(), PipelineFailure> {
    if cancel.is_some_and(CancelToken::is_cancelled) {
        return Err(PipelineFailure::new(stage, PipelineError::Cancelled));
    }

    debug!(%stage, "entering stage");
    trace.push(stage);
    Ok(())
}
