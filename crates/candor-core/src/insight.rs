//! Narrative insights from a text-generation service.
//!
//! [`InsightGenerator`] turns a question and its emotion summary into a
//! prompt and hands it to a [`TextGenerator`]. Callers get one of three
//! distinguishable outcomes: generated text, no service configured, or a
//! failed call with its cause.

use crate::types::EmotionSummary;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_GEMINI_MODEL: &str = "gemini-1.5-flash";
const GEMINI_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta/models";

#[derive(Error, Debug)]
pub enum InsightError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("service returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("service response contained no text")]
    EmptyResponse,
}

/// Something that turns a prompt into prose.
pub trait TextGenerator: Send + Sync {
    fn generate(&self, prompt: &str) -> Result<String, InsightError>;
}

/// Result of an insight request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum InsightOutcome {
    Generated { text: String },
    NotConfigured,
    Failed { error: String },
}

impl InsightOutcome {
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Generated { text } => Some(text),
            _ => None,
        }
    }
}

/// Prompt assembly in front of an optional text backend.
pub struct InsightGenerator {
    backend: Option<Box<dyn TextGenerator>>,
}

impl InsightGenerator {
    pub fn new(backend: Box<dyn TextGenerator>) -> Self {
        Self {
            backend: Some(backend),
        }
    }

    /// A generator with no backend; every request yields `NotConfigured`.
    pub fn disabled() -> Self {
        Self { backend: None }
    }

    pub fn is_configured(&self) -> bool {
        self.backend.is_some()
    }

    pub fn generate(&self, question: &str, summary: &EmotionSummary) -> InsightOutcome {
        let Some(backend) = &self.backend else {
            return InsightOutcome::NotConfigured;
        };

        let prompt = build_prompt(question, summary);
        match backend.generate(&prompt) {
            Ok(text) => InsightOutcome::Generated { text },
            Err(e) => {
                tracing::warn!(error = %e, "insight generation failed");
                InsightOutcome::Failed {
                    error: e.to_string(),
                }
            }
        }
    }
}

/// Fixed interview-analysis prompt embedding the question and the summary.
pub fn build_prompt(question: &str, summary: &EmotionSummary) -> String {
    let summary_json = serde_json::to_string_pretty(summary).unwrap_or_else(|_| "{}".to_string());
    format!(
        "Analyze the result of facial expression recognition recorded during a job interview.\n\
         \n\
         Question: {question}\n\
         \n\
         Detected emotions (percentages: mean, max, min):\n\
         {summary_json}\n\
         \n\
         As an HR specialist, provide:\n\
         1. Interpretation of the dominant emotions\n\
         2. Insights about the candidate's emotional state\n\
         3. Points of attention for the recruiter\n\
         4. Suggested follow-up questions\n\
         \n\
         Be professional and avoid definitive conclusions.\n"
    )
}

/// Google Gemini `generateContent` over HTTPS.
///
/// Uses the blocking reqwest client; call from a thread that may block.
pub struct GeminiClient {
    client: reqwest::blocking::Client,
    api_key: String,
    model: String,
}

impl GeminiClient {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>, timeout: Duration) -> Result<Self, InsightError> {
        let client = reqwest::blocking::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            model: model.into(),
        })
    }
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
}

#[derive(Serialize)]
struct Content<'a> {
    parts: Vec<RequestPart<'a>>,
}

#[derive(Serialize)]
struct RequestPart<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

impl GenerateResponse {
    fn into_text(self) -> Option<String> {
        let text: String = self
            .candidates
            .into_iter()
            .next()?
            .content?
            .parts
            .into_iter()
            .filter_map(|p| p.text)
            .collect();
        if text.trim().is_empty() { None } else { Some(text) }
    }
}

impl TextGenerator for GeminiClient {
    fn generate(&self, prompt: &str) -> Result<String, InsightError> {
        let url = format!("{GEMINI_ENDPOINT}/{}:generateContent", self.model);
        let request = GenerateRequest {
            contents: vec![Content {
                parts: vec![RequestPart { text: prompt }],
            }],
        };

        tracing::debug!(model = %self.model, prompt_len = prompt.len(), "sending generateContent request");

        let response = self
            .client
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
            .json(&request)
            .send()?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(InsightError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: GenerateResponse = response.json()?;
        parsed.into_text().ok_or(InsightError::EmptyResponse)
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::FakeText;
    use super::*;
    use crate::types::EmotionStats;

    fn summary() -> EmotionSummary {
        [
            ("happy".to_string(), EmotionStats { mean: 70.0, max: 80.0, min: 60.0 }),
            ("neutral".to_string(), EmotionStats { mean: 30.0, max: 40.0, min: 20.0 }),
        ]
        .into()
    }

    #[test]
    fn test_prompt_embeds_question_and_summary() {
        let prompt = build_prompt("Why do you want to work here?", &summary());
        assert!(prompt.contains("Question: Why do you want to work here?"));
        assert!(prompt.contains("\"happy\""));
        assert!(prompt.contains("\"mean\": 70.0"));
        assert!(prompt.contains("1. Interpretation of the dominant emotions"));
        assert!(prompt.contains("4. Suggested follow-up questions"));
        assert!(prompt.contains("avoid definitive conclusions"));
    }

    #[test]
    fn test_three_outcomes_are_distinct() {
        let ok = InsightGenerator::new(Box::new(FakeText::ok("Candidate seems at ease.")));
        let failing = InsightGenerator::new(Box::new(FakeText::failing()));
        let disabled = InsightGenerator::disabled();

        assert_eq!(
            ok.generate("Q", &summary()),
            InsightOutcome::Generated { text: "Candidate seems at ease.".into() }
        );
        assert_eq!(disabled.generate("Q", &summary()), InsightOutcome::NotConfigured);
        match failing.generate("Q", &summary()) {
            InsightOutcome::Failed { error } => assert!(error.contains("503")),
            other => panic!("expected failure, got {other:?}"),
        }
        assert!(ok.is_configured());
        assert!(!disabled.is_configured());
    }

    #[test]
    fn test_outcome_serialization_tags() {
        let json = serde_json::to_value(InsightOutcome::NotConfigured).unwrap();
        assert_eq!(json, serde_json::json!({"status": "not_configured"}));
        let json = serde_json::to_value(InsightOutcome::Generated { text: "hi".into() }).unwrap();
        assert_eq!(json, serde_json::json!({"status": "generated", "text": "hi"}));
    }

    #[test]
    fn test_gemini_response_text_extraction() {
        let body = r#"{"candidates":[{"content":{"parts":[{"text":"Part one. "},{"text":"Part two."}],"role":"model"}}]}"#;
        let parsed: GenerateResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.into_text().as_deref(), Some("Part one. Part two."));

        let blocked: GenerateResponse = serde_json::from_str(r#"{"promptFeedback":{"blockReason":"SAFETY"}}"#).unwrap();
        assert!(blocked.into_text().is_none());
    }

    #[test]
    fn test_gemini_request_shape() {
        let request = GenerateRequest {
            contents: vec![Content {
                parts: vec![RequestPart { text: "hello" }],
            }],
        };
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            serde_json::json!({"contents": [{"parts": [{"text": "hello"}]}]})
        );
    }
}
