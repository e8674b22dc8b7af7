use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use manupilot_core::config::DEFAULT_OPENAI_BASE_URL;
use manupilot_core::{
    Document, DuplicateDetector, EmbeddingProvider, ErrorKind, HashingEmbeddings, HttpOcr, NoOcr,
    OcrEngine, OpenAiChat, OpenAiClient, OpenAiConfig, OpenAiEmbeddings, PdfTextExtractor,
    PipelineConfig, PipelineWarning, QaPipeline, QaReport, TesseractOcr, WikiEntry,
    DEFAULT_DUPLICATE_THRESHOLD, EXAMPLE_QUESTIONS,
};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "manupilot", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// JSON file overriding pipeline settings
    #[arg(long, env = "MANUPILOT_CONFIG")]
    config: Option<PathBuf>,

    /// OpenAI API key
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    openai_api_key: Option<String>,

    /// OpenAI-compatible API base URL
    #[arg(long, env = "OPENAI_BASE_URL", default_value = DEFAULT_OPENAI_BASE_URL)]
    openai_base_url: String,
}

#[derive(Clone, Copy, ValueEnum)]
enum OcrMode {
    /// Render with pdftoppm and recognize with tesseract.
    Tesseract,
    /// Post pages to the endpoint in LLM_OCR_ENDPOINT.
    Http,
    /// Leave pages without a text layer empty.
    None,
}

#[derive(Clone, Copy, ValueEnum)]
enum ReportFormat {
    Markdown,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Answer a question about a PDF manual.
    Ask {
        /// PDF manual to read.
        #[arg(long)]
        pdf: PathBuf,
        /// Question in natural language.
        #[arg(long)]
        question: String,
        /// Write a question/answer report to this path.
        #[arg(long)]
        report: Option<PathBuf>,
        #[arg(long, value_enum, default_value = "markdown")]
        report_format: ReportFormat,
        /// Fallback for scanned pages.
        #[arg(long, value_enum, default_value = "tesseract")]
        ocr: OcrMode,
        /// OCR language code, e.g. kor or eng.
        #[arg(long)]
        ocr_language: Option<String>,
        /// Words per segment.
        #[arg(long)]
        chunk_size: Option<usize>,
        /// Segments passed to the model as context.
        #[arg(long)]
        top_k: Option<usize>,
        /// Embed with the local trigram hasher instead of the API.
        #[arg(long, default_value_t = false)]
        hashing_embeddings: bool,
    },
    /// Print the suggested example questions.
    Examples,
    /// Suggest merges for near-duplicate wiki entries.
    Duplicates {
        /// JSON array of {"author", "tags", "content"} entries.
        #[arg(long)]
        entries: PathBuf,
        /// Cosine similarity above which two entries are reported.
        #[arg(long, default_value_t = DEFAULT_DUPLICATE_THRESHOLD)]
        threshold: f64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    info!(
        version = env!("CARGO_PKG_VERSION"),
        started_at = %Utc::now().to_rfc3339(),
        "manupilot boot"
    );

    match cli.command {
        Command::Examples => {
            for (index, question) in EXAMPLE_QUESTIONS.iter().enumerate() {
                println!("{}. {question}", index + 1);
            }
        }
        Command::Duplicates { entries, threshold } => {
            let raw = tokio::fs::read_to_string(&entries)
                .await
                .with_context(|| format!("reading {}", entries.display()))?;
            let entries: Vec<WikiEntry> = serde_json::from_str(&raw)?;
            let detector = DuplicateDetector::new(threshold)?;
            let pairs = detector.similar_entries(&entries);

            if pairs.is_empty() {
                println!("no similar entries above {threshold:.2}");
            }
            for pair in pairs {
                println!(
                    "similar entries: [{}] and [{}] (similarity: {:.2})",
                    entries[pair.left].author, entries[pair.right].author, pair.score
                );
            }
        }
        Command::Ask {
            pdf,
            question,
            report,
            report_format,
            ocr,
            ocr_language,
            chunk_size,
            top_k,
            hashing_embeddings,
        } => {
            let mut config = match &cli.config {
                Some(path) => PipelineConfig::from_json_file(path)?,
                None => PipelineConfig::default(),
            };
            if let Some(language) = ocr_language {
                config.ocr_language = language;
            }
            if let Some(chunk_size) = chunk_size {
                config.chunk_size = chunk_size;
            }
            if let Some(top_k) = top_k {
                config.top_k = top_k;
            }

            let openai = OpenAiConfig::new(
                cli.openai_api_key.unwrap_or_default(),
                &cli.openai_base_url,
            )?;
            let client = OpenAiClient::new(openai, config.resilience.request_timeout())?;

            let ocr_engine: Box<dyn OcrEngine + Send + Sync> = match ocr {
                OcrMode::Tesseract => Box::new(TesseractOcr::default()),
                OcrMode::Http => Box::new(
                    HttpOcr::from_env()
                        .context("--ocr http needs LLM_OCR_ENDPOINT to be set")?,
                ),
                OcrMode::None => Box::new(NoOcr),
            };
            let embedder: Box<dyn EmbeddingProvider + Send + Sync> = if hashing_embeddings {
                Box::new(HashingEmbeddings::default())
            } else {
                Box::new(OpenAiEmbeddings::new(
                    client.clone(),
                    config.embedding_model.clone(),
                    config.embedding_batch_size,
                ))
            };
            let synthesizer = OpenAiChat::new(
                client,
                config.completion_model.clone(),
                config.max_answer_tokens,
            );

            let extractor = PdfTextExtractor::new(ocr_engine, config.ocr_language.clone());
            let pipeline = QaPipeline::new(extractor, embedder, synthesizer, config)?;

            let document = load_document(&pdf).await?;
            let run = pipeline.ask(document, question).await;

            match run.outcome {
                Ok(outcome) => {
                    for warning in &outcome.warnings {
                        match warning {
                            PipelineWarning::ExtractionPartialFailure { unreadable_pages } => {
                                warn!(pages = ?unreadable_pages, "some pages could not be read");
                            }
                        }
                    }

                    println!("질문: {}", outcome.question);
                    println!("답변: {}", outcome.answer);

                    if let Some(path) = report {
                        let report = QaReport::from_outcome(&outcome);
                        let rendered = match report_format {
                            ReportFormat::Markdown => report.to_markdown(),
                            ReportFormat::Json => report.to_json()?,
                        };
                        tokio::fs::write(&path, rendered)
                            .await
                            .with_context(|| format!("writing report to {}", path.display()))?;
                        info!(path = %path.display(), "report written");
                    }
                }
                Err(failure) => {
                    eprintln!("{}", user_message(failure.kind()));
                    return Err(failure.into());
                }
            }
        }
    }

    Ok(())
}

async fn load_document(path: &Path) -> anyhow::Result<Document> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    let name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("document.pdf");
    Ok(Document::named(name, bytes))
}

fn user_message(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::InvalidInput => "Please check the uploaded PDF and the question.",
        ErrorKind::ServiceUnavailable => {
            "The language model service is temporarily unavailable. Please try again later."
        }
        ErrorKind::NoAnswer => "No answer could be produced from this manual.",
        ErrorKind::Configuration => {
            "The language model service rejected the request. Check OPENAI_API_KEY and the base URL."
        }
        ErrorKind::Internal => "The question could not be processed.",
    }
}
