use crate::error::SynthesisError;
use crate::openai::{error_body, OpenAiClient};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub const SYSTEM_INSTRUCTION: &str =
    "You are a helpful assistant. Answer the question using only the given context from the manual.";

/// Produces a natural-language answer from a question and retrieved context.
///
/// Upstream models are not deterministic; identical inputs may yield
/// different wording between calls.
#[async_trait]
pub trait AnswerSynthesizer {
    async fn synthesize(&self, question: &str, contexts: &[String])
        -> Result<String, SynthesisError>;
}

pub fn build_user_prompt(question: &str, contexts: &[String]) -> String {
    let context = contexts.join("\n\n");
    format!("Question: {question}\n\nContext: {context}\n\nAnswer:")
}

pub struct OpenAiChat {
    client: OpenAiClient,
    model: String,
    max_tokens: u32,
}

impl OpenAiChat {
    pub fn new(client: OpenAiClient, model: impl Into<String>, max_tokens: u32) -> Self {
        Self {
            client,
            model: model.into(),
            max_tokens,
        }
    }
}

#[async_trait]
impl AnswerSynthesizer for OpenAiChat {
    async fn synthesize(
        &self,
        question: &str,
        contexts: &[String],
    ) -> Result<String, SynthesisError> {
        let prompt = build_user_prompt(question, contexts);
        let request = ChatRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_INSTRUCTION,
                },
                ChatMessage {
                    role: "user",
                    content: &prompt,
                },
            ],
        };

        let response = self.client.post("chat/completions", &request).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SynthesisError::Status {
                status: status.as_u16(),
                body: error_body(response).await,
            });
        }

        let payload: ChatResponse = response
            .json()
            .await
            .map_err(|error| SynthesisError::Malformed(error.to_string()))?;
        first_choice_text(payload)
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: AssistantMessage,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    #[serde(default)]
    content: Option<String>,
}

fn first_choice_text(payload: ChatResponse) -> Result<String, SynthesisError> {
    let choice = payload
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| SynthesisError::Malformed("response has no choices".to_string()))?;

    Ok(choice
        .message
        .content
        .map(|content| content.trim().to_string())
        .unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{stub_client, StubServer};
    use serde_json::json;

    #[test]
    fn prompt_keeps_context_order() {
        let prompt = build_user_prompt(
            "How often?",
            &["nearest".to_string(), "second".to_string()],
        );
        assert_eq!(
            prompt,
            "Question: How often?\n\nContext: nearest\n\nsecond\n\nAnswer:"
        );
    }

    #[test]
    fn first_choice_is_trimmed() -> Result<(), Box<dyn std::error::Error>> {
        let payload: ChatResponse = serde_json::from_str(
            r#"{ "choices": [ { "message": { "role": "assistant", "content": "  Weekly.\n" } } ] }"#,
        )?;
        assert_eq!(first_choice_text(payload)?, "Weekly.");
        Ok(())
    }

    #[test]
    fn missing_choices_is_malformed() -> Result<(), Box<dyn std::error::Error>> {
        let payload: ChatResponse = serde_json::from_str(r#"{ "choices": [] }"#)?;
        assert!(matches!(
            first_choice_text(payload),
            Err(SynthesisError::Malformed(_))
        ));
        Ok(())
    }

    #[test]
    fn null_content_becomes_empty_text() -> Result<(), Box<dyn std::error::Error>> {
        let payload: ChatResponse = serde_json::from_str(
            r#"{ "choices": [ { "message": { "role": "assistant", "content": null } } ] }"#,
        )?;
        assert_eq!(first_choice_text(payload)?, "");
        Ok(())
    }

    #[tokio::test]
    async fn chat_request_carries_instruction_and_context() -> Result<(), SynthesisError> {
        let server = StubServer::start(vec![(
            200,
            json!({
                "id": "chatcmpl-1",
                "choices": [
                    { "index": 0, "message": { "role": "assistant", "content": " Once a week. " } }
                ]
            }),
        )])
        .await;
        let chat = OpenAiChat::new(stub_client(&server), "gpt-4o", 150);
        let contexts = vec!["Calibrate weekly.".to_string(), "Log each run.".to_string()];

        let answer = chat.synthesize("How often?", &contexts).await?;

        assert_eq!(answer, "Once a week.");
        let requests = server.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].path, "/v1/chat/completions");
        assert_eq!(
            requests[0].headers.get("authorization").map(String::as_str),
            Some("Bearer sk-test")
        );
        let body = &requests[0].body;
        assert_eq!(body["model"], "gpt-4o");
        assert_eq!(body["max_tokens"], 150);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][0]["content"], SYSTEM_INSTRUCTION);
        assert_eq!(body["messages"][1]["role"], "user");
        assert_eq!(
            body["messages"][1]["content"],
            build_user_prompt("How often?", &contexts)
        );
        Ok(())
    }

    #[tokio::test]
    async fn server_error_maps_to_status() {
        let server = StubServer::start(vec![(
            503,
            json!({ "error": { "message": "The server is overloaded" } }),
        )])
        .await;
        let chat = OpenAiChat::new(stub_client(&server), "gpt-4o", 150);

        let result = chat.synthesize("How often?", &[]).await;

        assert!(matches!(
            result,
            Err(SynthesisError::Status { status: 503, ref body }) if body.contains("overloaded")
        ));
    }
}
