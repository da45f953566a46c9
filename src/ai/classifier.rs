//! External classifier collaborator

use crate::config::AiConfig;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Outcome of a successful classification; carries the raw response text
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Positive(String),
    Negative(String),
}

impl Verdict {
    pub fn is_positive(&self) -> bool {
        matches!(self, Self::Positive(_))
    }

    pub fn text(&self) -> &str {
        match self {
            Self::Positive(text) | Self::Negative(text) => text,
        }
    }
}

/// Classifier failures
#[derive(Debug, Error)]
pub enum ClassifierError {
    /// Quota or rate limit hit; handled by backoff and cooldown
    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("{0}")]
    Other(String),
}

impl ClassifierError {
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, Self::RateLimited(_))
    }
}

/// Renders a verdict on page text
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, text: &str, url: &str) -> Result<Verdict, ClassifierError>;
}

/// Classifier backed by a `generateContent` model endpoint
pub struct GeminiClassifier {
    client: Client,
    endpoint: String,
    model: String,
    api_key: String,
    content_limit: usize,
    positive_marker: String,
    preamble: String,
    instructions: String,
}

impl GeminiClassifier {
    pub fn new(config: &AiConfig, api_key: String) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(Duration::from_secs(60)).build()?;
        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key,
            content_limit: config.content_limit,
            positive_marker: config.positive_marker.clone(),
            preamble: config.prompt_preamble.clone(),
            instructions: config.prompt_instructions.clone(),
        })
    }

    fn prompt(&self, text: &str) -> String {
        let content: String = text.chars().take(self.content_limit).collect();
        format!("{}{}\n\n{}", self.preamble, content, self.instructions)
    }

    fn verdict(&self, response: String) -> Verdict {
        if response.trim_start().starts_with(&self.positive_marker) {
            Verdict::Positive(response)
        } else {
            Verdict::Negative(response)
        }
    }
}

#[async_trait]
impl Classifier for GeminiClassifier {
    async fn classify(&self, text: &str, url: &str) -> Result<Verdict, ClassifierError> {
        let prompt = self.prompt(text);
        let body = GenerateRequest {
            contents: vec![RequestContent {
                parts: vec![RequestPart { text: &prompt }],
            }],
        };

        let resp = self
            .client
            .post(format!(
                "{}/models/{}:generateContent",
                self.endpoint, self.model
            ))
            .query(&[("key", self.api_key.trim())])
            .json(&body)
            .send()
            .await
            .map_err(|e| ClassifierError::Other(format!("request for {} failed: {}", url, e)))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp
                .text()
                .await
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            if status.as_u16() == 429 || text.contains("RESOURCE_EXHAUSTED") {
                return Err(ClassifierError::RateLimited(format!("{}: {}", status, text)));
            }
            return Err(ClassifierError::Other(format!(
                "classifier returned {}: {}",
                status, text
            )));
        }

        let parsed: GenerateResponse = resp
            .json()
            .await
            .map_err(|e| ClassifierError::Other(format!("failed to parse response: {}", e)))?;

        let answer = parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|content| {
                content
                    .parts
                    .into_iter()
                    .filter_map(|p| p.text)
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        if answer.trim().is_empty() {
            return Err(ClassifierError::Other(
                "response missing text content".to_string(),
            ));
        }

        Ok(self.verdict(answer.trim().to_string()))
    }
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    contents: Vec<RequestContent<'a>>,
}

#[derive(Serialize)]
struct RequestContent<'a> {
    parts: Vec<RequestPart<'a>>,
}

#[derive(Serialize)]
struct RequestPart<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    text: Option<String>,
}
