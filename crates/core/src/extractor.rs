use crate::error::ExtractError;
use crate::models::{Document, ExtractedText, PageSource, PageText};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tokio::process::Command;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

#[async_trait]
pub trait TextExtractor {
    async fn extract(&self, document: &Document) -> Result<ExtractedText, ExtractError>;
}

/// The PDF being recognized. Engines that need it on disk share one scratch
/// copy for every page of an extraction.
pub struct OcrInput<'a> {
    bytes: &'a [u8],
    scratch: OnceCell<(TempDir, PathBuf)>,
}

impl<'a> OcrInput<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self {
            bytes,
            scratch: OnceCell::new(),
        }
    }

    pub fn bytes(&self) -> &'a [u8] {
        self.bytes
    }

    /// Path of the scratch copy, written on first use.
    pub async fn path(&self) -> Result<&Path, ExtractError> {
        let (_, path) = self
            .scratch
            .get_or_try_init(|| async {
                let dir = tempfile::tempdir()?;
                let path = dir.path().join("document.pdf");
                tokio::fs::write(&path, self.bytes).await?;
                debug!(path = %path.display(), "wrote scratch copy for ocr");
                Ok::<_, ExtractError>((dir, path))
            })
            .await?;
        Ok(path)
    }
}

/// Recognizes the text of a single rendered page.
#[async_trait]
pub trait OcrEngine {
    async fn recognize(
        &self,
        input: &OcrInput<'_>,
        page: u32,
        language: &str,
    ) -> Result<String, ExtractError>;
}

#[async_trait]
impl<T: OcrEngine + Send + Sync + ?Sized> OcrEngine for Box<T> {
    async fn recognize(
        &self,
        input: &OcrInput<'_>,
        page: u32,
        language: &str,
    ) -> Result<String, ExtractError> {
        (**self).recognize(input, page, language).await
    }
}

/// Reads each page's text layer with lopdf and sends pages without one to OCR.
pub struct PdfTextExtractor<O> {
    ocr: O,
    language: String,
}

impl<O: OcrEngine + Send + Sync> PdfTextExtractor<O> {
    pub fn new(ocr: O, language: impl Into<String>) -> Self {
        Self {
            ocr,
            language: language.into(),
        }
    }
}

/// Page numbers in order, each with its text layer when it has one.
pub fn text_layer_pages(bytes: &[u8]) -> Result<Vec<(u32, Option<String>)>, ExtractError> {
    let document =
        lopdf::Document::load_mem(bytes).map_err(|error| ExtractError::PdfParse(error.to_string()))?;

    let pages = document.get_pages();
    if pages.is_empty() {
        return Err(ExtractError::PdfParse("pdf has no pages".to_string()));
    }

    Ok(pages
        .keys()
        .map(|&number| {
            let text = match document.extract_text(&[number]) {
                Ok(text) if !text.trim().is_empty() => Some(text),
                Ok(_) => None,
                Err(error) => {
                    debug!(page = number, %error, "text layer extraction failed");
                    None
                }
            };
            (number, text)
        })
        .collect())
}

#[async_trait]
impl<O: OcrEngine + Send + Sync> TextExtractor for PdfTextExtractor<O> {
    async fn extract(&self, document: &Document) -> Result<ExtractedText, ExtractError> {
        let layers = text_layer_pages(&document.bytes)?;
        let input = OcrInput::new(&document.bytes);
        let mut pages = Vec::with_capacity(layers.len());

        for (number, layer) in layers {
            if let Some(text) = layer {
                pages.push(PageText {
                    number,
                    text,
                    source: PageSource::TextLayer,
                });
                continue;
            }

            let page = match self.ocr.recognize(&input, number, &self.language).await {
                Ok(text) if !text.trim().is_empty() => PageText {
                    number,
                    text,
                    source: PageSource::Ocr,
                },
                Ok(_) => {
                    warn!(page = number, "ocr produced no text");
                    unreadable(number)
                }
                Err(error) => {
                    warn!(page = number, %error, "ocr fallback failed");
                    unreadable(number)
                }
            };
            pages.push(page);
        }

        let extracted = ExtractedText::from_pages(pages);
        let summary = extracted.summary();
        info!(
            pages = summary.page_count,
            ocr_pages = summary.ocr_pages,
            unreadable_pages = summary.unreadable_pages.len(),
            "text extracted"
        );
        Ok(extracted)
    }
}

fn unreadable(number: u32) -> PageText {
    PageText {
        number,
        text: String::new(),
        source: PageSource::Unreadable,
    }
}

/// Renders the page with `pdftoppm` and runs `tesseract` over the image.
#[derive(Debug, Clone)]
pub struct TesseractOcr {
    pub pdftoppm: PathBuf,
    pub tesseract: PathBuf,
    pub dpi: u32,
}

impl Default for TesseractOcr {
    fn default() -> Self {
        Self {
            pdftoppm: PathBuf::from("pdftoppm"),
            tesseract: PathBuf::from("tesseract"),
            dpi: 300,
        }
    }
}

#[async_trait]
impl OcrEngine for TesseractOcr {
    async fn recognize(
        &self,
        input: &OcrInput<'_>,
        page: u32,
        language: &str,
    ) -> Result<String, ExtractError> {
        let pdf_path = input.path().await?;
        let images = tempfile::tempdir()?;
        let prefix = images.path().join("page");
        let page_arg = page.to_string();
        let dpi_arg = self.dpi.to_string();
        let render = Command::new(&self.pdftoppm)
            .args(["-f", page_arg.as_str(), "-l", page_arg.as_str()])
            .args(["-r", dpi_arg.as_str()])
            .args(["-png", "-singlefile"])
            .arg(pdf_path)
            .arg(&prefix)
            .output()
            .await?;

        if !render.status.success() {
            return Err(ExtractError::OcrFailed(format!(
                "pdftoppm exited with {} on page {page}: {}",
                render.status,
                String::from_utf8_lossy(&render.stderr).trim()
            )));
        }

        let image = prefix.with_extension("png");
        let recognized = Command::new(&self.tesseract)
            .arg(&image)
            .arg("stdout")
            .args(["-l", language])
            .output()
            .await?;

        if !recognized.status.success() {
            return Err(ExtractError::OcrFailed(format!(
                "tesseract exited with {} on page {page}: {}",
                recognized.status,
                String::from_utf8_lossy(&recognized.stderr).trim()
            )));
        }

        Ok(String::from_utf8_lossy(&recognized.stdout).into_owned())
    }
}

#[derive(Debug, Clone, Serialize)]
struct HttpOcrRequest<'a> {
    pdf_base64: String,
    page: u32,
    language: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
struct HttpOcrResponse {
    pages: Option<Vec<HttpOcrPage>>,
    text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct HttpOcrPage {
    #[serde(default)]
    page: Option<u32>,
    #[serde(default)]
    text: Option<String>,
}

/// Sends the document and a page number to a multimodal OCR endpoint.
#[derive(Debug, Clone)]
pub struct HttpOcr {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpOcr {
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.into(),
            api_key,
        }
    }

    /// Reads `LLM_OCR_ENDPOINT` and the optional `LLM_OCR_API_KEY`.
    pub fn from_env() -> Option<Self> {
        let endpoint = std::env::var("LLM_OCR_ENDPOINT").ok()?;
        let endpoint = endpoint.trim().to_string();
        if endpoint.is_empty() {
            return None;
        }

        let api_key = std::env::var("LLM_OCR_API_KEY")
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|key| !key.is_empty());

        Some(Self::new(endpoint, api_key))
    }
}

#[async_trait]
impl OcrEngine for HttpOcr {
    async fn recognize(
        &self,
        input: &OcrInput<'_>,
        page: u32,
        language: &str,
    ) -> Result<String, ExtractError> {
        let payload = HttpOcrRequest {
            pdf_base64: STANDARD.encode(input.bytes()),
            page,
            language,
        };

        let mut request = self.client.post(&self.endpoint).json(&payload);
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(ExtractError::OcrFailed(format!(
                "ocr request to {} returned {}",
                self.endpoint,
                response.status()
            )));
        }

        let payload: HttpOcrResponse = response.json().await?;
        payload_page_text(&payload, page).ok_or_else(|| {
            ExtractError::OcrFailed(format!("ocr response had no text for page {page}"))
        })
    }
}

fn payload_page_text(payload: &HttpOcrResponse, page: u32) -> Option<String> {
    let listed = payload.pages.as_deref().unwrap_or_default();
    let from_pages = listed
        .iter()
        .find(|entry| entry.page == Some(page))
        .or_else(|| match listed {
            [only] if only.page.is_none() => Some(only),
            _ => None,
        })
        .and_then(|entry| entry.text.as_ref())
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty());

    from_pages.or_else(|| {
        payload
            .text
            .as_ref()
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty())
    })
}

/// OCR disabled: scanned pages stay empty.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOcr;

#[async_trait]
impl OcrEngine for NoOcr {
    async fn recognize(
        &self,
        _input: &OcrInput<'_>,
        _page: u32,
        _language: &str,
    ) -> Result<String, ExtractError> {
        Ok(String::new())
    }
}
