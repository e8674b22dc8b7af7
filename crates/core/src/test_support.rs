use crate::embeddings::{EmbeddingProvider, HashingEmbeddings};
use crate::error::{EmbeddingError, ExtractError, SynthesisError};
use crate::extractor::{OcrEngine, OcrInput, TextExtractor};
use crate::models::{Document, ExtractedText, PageSource, PageText};
use crate::synthesis::AnswerSynthesizer;
use async_trait::async_trait;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Object, Stream};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// Builds a PDF with one page per entry; `None` pages carry no text layer.
pub fn pdf_with_pages(pages: &[Option<&str>]) -> Vec<u8> {
    let mut doc = lopdf::Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Courier",
        "Encoding" => "WinAnsiEncoding",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! {
            "F1" => font_id,
        },
    });

    let mut kids: Vec<Object> = Vec::new();
    for text in pages {
        let operations = match text {
            Some(text) => vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), 12.into()]),
                Operation::new("Td", vec![72.into(), 720.into()]),
                Operation::new("Tj", vec![Object::string_literal(*text)]),
                Operation::new("ET", vec![]),
            ],
            None => vec![
                Operation::new("re", vec![72.into(), 72.into(), 200.into(), 200.into()]),
                Operation::new("f", vec![]),
            ],
        };
        let content = Content { operations };
        let content_id = doc.add_object(Stream::new(
            dictionary! {},
            content.encode().expect("content should encode"),
        ));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        kids.push(page_id.into());
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut buffer = Vec::new();
    doc.save_to(&mut buffer).expect("pdf should serialize");
    buffer
}

#[derive(Clone, Default)]
pub struct ScriptedOcr {
    pages: Arc<HashMap<u32, String>>,
    fail: bool,
    calls: Arc<AtomicUsize>,
    languages: Arc<Mutex<Vec<String>>>,
}

impl ScriptedOcr {
    pub fn with_pages(pages: &[(u32, &str)]) -> Self {
        Self {
            pages: Arc::new(
                pages
                    .iter()
                    .map(|(page, text)| (*page, text.to_string()))
                    .collect(),
            ),
            ..Self::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn languages(&self) -> Vec<String> {
        self.languages.lock().map(|seen| seen.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl OcrEngine for ScriptedOcr {
    async fn recognize(
        &self,
        _input: &OcrInput<'_>,
        page: u32,
        language: &str,
    ) -> Result<String, ExtractError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut seen) = self.languages.lock() {
            seen.push(language.to_string());
        }
        if self.fail {
            return Err(ExtractError::OcrFailed("scripted failure".to_string()));
        }
        Ok(self.pages.get(&page).cloned().unwrap_or_default())
    }
}

/// Returns fixed text as a single text-layer page.
#[derive(Clone, Default)]
pub struct StaticExtractor {
    text: String,
    calls: Arc<AtomicUsize>,
}

impl StaticExtractor {
    pub fn new(text: &str) -> Self {
        Self {
            text: text.to_string(),
            calls: Arc::default(),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TextExtractor for StaticExtractor {
    async fn extract(&self, _document: &Document) -> Result<ExtractedText, ExtractError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(ExtractedText::from_pages(vec![PageText {
            number: 1,
            text: self.text.clone(),
            source: PageSource::TextLayer,
        }]))
    }
}

#[derive(Clone, Copy, Default)]
pub enum EmbeddingBehavior {
    #[default]
    Hashing,
    ServiceDown,
    DropLast,
}

#[derive(Clone, Default)]
pub struct FakeEmbeddings {
    behavior: EmbeddingBehavior,
    calls: Arc<AtomicUsize>,
    inputs: Arc<Mutex<Vec<Vec<String>>>>,
}

impl FakeEmbeddings {
    pub fn new(behavior: EmbeddingBehavior) -> Self {
        Self {
            behavior,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn inputs(&self) -> Vec<Vec<String>> {
        self.inputs.lock().map(|seen| seen.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl EmbeddingProvider for FakeEmbeddings {
    fn model(&self) -> &str {
        "fake"
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut seen) = self.inputs.lock() {
            seen.push(texts.to_vec());
        }

        let mut vectors = HashingEmbeddings::default().embed(texts).await?;
        match self.behavior {
            EmbeddingBehavior::Hashing => Ok(vectors),
            EmbeddingBehavior::ServiceDown => Err(EmbeddingError::Status {
                status: 400,
                body: "invalid request".to_string(),
            }),
            EmbeddingBehavior::DropLast => {
                vectors.pop();
                Ok(vectors)
            }
        }
    }
}

#[derive(Clone, Default)]
pub struct FakeSynthesizer {
    reply: Option<String>,
    calls: Arc<AtomicUsize>,
    contexts: Arc<Mutex<Vec<Vec<String>>>>,
}

impl FakeSynthesizer {
    pub fn replying(reply: &str) -> Self {
        Self {
            reply: Some(reply.to_string()),
            ..Self::default()
        }
    }

    /// A synthesizer whose service always fails.
    pub fn unavailable() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn contexts(&self) -> Vec<Vec<String>> {
        self.contexts.lock().map(|seen| seen.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl AnswerSynthesizer for FakeSynthesizer {
    async fn synthesize(
        &self,
        _question: &str,
        contexts: &[String],
    ) -> Result<String, SynthesisError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut seen) = self.contexts.lock() {
            seen.push(contexts.to_vec());
        }
        self.reply.clone().ok_or(SynthesisError::Status {
            status: 400,
            body: "bad request".to_string(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub path: String,
    /// Lowercased header names.
    pub headers: HashMap<String, String>,
    pub body: serde_json::Value,
}

/// Local HTTP endpoint answering each request with the next scripted
/// `(status, body)`; the last reply repeats once the script runs out.
pub struct StubServer {
    pub base_url: String,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl StubServer {
    pub async fn start(replies: Vec<(u16, serde_json::Value)>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("stub server should bind");
        let address = listener.local_addr().expect("stub server has an address");
        let requests = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&requests);

        tokio::spawn(async move {
            let mut script = replies.into_iter();
            let mut last = (500, serde_json::Value::Null);
            while let Ok((mut stream, _)) = listener.accept().await {
                let Some(request) = read_request(&mut stream).await else {
                    continue;
                };
                recorded.lock().expect("request log").push(request);

                if let Some(reply) = script.next() {
                    last = reply;
                }
                let (status, body) = &last;
                let body = body.to_string();
                let response = format!(
                    "HTTP/1.1 {status} {}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                    if *status < 400 { "OK" } else { "Error" },
                    body.len()
                );
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.shutdown().await;
            }
        });

        Self {
            base_url: format!("http://{address}/v1"),
            requests,
        }
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().expect("request log").clone()
    }
}

async fn read_request(stream: &mut TcpStream) -> Option<RecordedRequest> {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 4096];
    let header_end = loop {
        let read = stream.read(&mut chunk).await.ok()?;
        if read == 0 {
            return None;
        }
        buffer.extend_from_slice(&chunk[..read]);
        if let Some(position) = buffer.windows(4).position(|window| window == b"\r\n\r\n") {
            break position + 4;
        }
    };

    let head = String::from_utf8_lossy(&buffer[..header_end]).into_owned();
    let mut lines = head.split("\r\n");
    let path = lines.next()?.split_whitespace().nth(1)?.to_string();
    let headers = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(name, value)| (name.trim().to_ascii_lowercase(), value.trim().to_string()))
        .collect::<HashMap<_, _>>();
    let length = headers
        .get("content-length")
        .and_then(|value| value.parse::<usize>().ok())
        .unwrap_or(0);

    while buffer.len() < header_end + length {
        let read = stream.read(&mut chunk).await.ok()?;
        if read == 0 {
            break;
        }
        buffer.extend_from_slice(&chunk[..read]);
    }
    let end = (header_end + length).min(buffer.len());
    let body = serde_json::from_slice(&buffer[header_end..end]).unwrap_or(serde_json::Value::Null);

    Some(RecordedRequest {
        path,
        headers,
        body,
    })
}

pub fn stub_client(server: &StubServer) -> crate::openai::OpenAiClient {
    let config = crate::config::OpenAiConfig::new("sk-test", &server.base_url)
        .expect("stub url should parse");
    crate::openai::OpenAiClient::new(config, std::time::Duration::from_secs(5))
        .expect("client should build")
}
