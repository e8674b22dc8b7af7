use crate::models::QaOutcome;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const REPORT_TITLE: &str = "질문과 답변";

/// Downloadable pairing of a question and its answer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QaReport {
    pub title: String,
    pub question: String,
    pub answer: String,
    pub generated_at: DateTime<Utc>,
}

impl QaReport {
    pub fn new(question: impl Into<String>, answer: impl Into<String>) -> Self {
        Self {
            title: REPORT_TITLE.to_string(),
            question: question.into(),
            answer: answer.into(),
            generated_at: Utc::now(),
        }
    }

    pub fn from_outcome(outcome: &QaOutcome) -> Self {
        Self::new(outcome.question.clone(), outcome.answer.clone())
    }

    /// Title, question, horizontal rule, answer.
    pub fn to_markdown(&self) -> String {
        format!(
            "# {}\n\n질문: {}\n\n---\n\n답변: {}\n",
            self.title,
            self.question.trim(),
            self.answer.trim()
        )
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
