//! Google Gemini API client for risk evaluation
//!
//! Thin wrapper around the Gemini generateContent endpoint. Clinical text about
//! medication, surgery and adverse events trips the default content filters, so
//! every request relaxes all four hazard categories to `BLOCK_NONE`.

use async_trait::async_trait;
use reqwest::header::{HeaderValue, CONTENT_TYPE};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

pub const GEMINI_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta/models";
pub const DEFAULT_MODEL: &str = "gemini-flash-latest";

/// Longest slice of an upstream error body that is surfaced
const MAX_ERROR_BODY: usize = 200;

/// Hazard categories relaxed on every request
pub const SAFETY_CATEGORIES: [&str; 4] = [
    "HARM_CATEGORY_HATE_SPEECH",
    "HARM_CATEGORY_SEXUALLY_EXPLICIT",
    "HARM_CATEGORY_HARASSMENT",
    "HARM_CATEGORY_DANGEROUS_CONTENT",
];

/// Errors raised by a text-generation backend
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("Invalid client configuration: {0}")]
    InvalidConfig(String),

    #[error("Gemini API request failed: {0}")]
    Request(String),

    #[error("Gemini API error {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Failed to decode Gemini response: {0}")]
    Decode(String),

    #[error("Gemini response contained no text{}", reason_suffix(.0))]
    EmptyReply(Option<String>),
}

fn reason_suffix(reason: &Option<String>) -> String {
    reason
        .as_deref()
        .map(|r| format!(" (reason: {})", r))
        .unwrap_or_default()
}

/// A provider that turns a prompt into free-form text
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError>;

    /// Model identifier, for logs and reports
    fn model_name(&self) -> &str;
}

pub struct GeminiClient {
    client: reqwest::Client,
    api_key: String,
    endpoint: String,
    model: String,
}

// -- Response types --

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    prompt_feedback: Option<GeminiPromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiCandidate {
    content: Option<GeminiResponseContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponseContent {
    #[serde(default)]
    parts: Vec<GeminiResponsePart>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponsePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiPromptFeedback {
    block_reason: Option<String>,
}

impl GeminiClient {
    pub fn with_options(
        api_key: &str,
        endpoint: &str,
        model: &str,
        timeout: Option<Duration>,
    ) -> Result<Self, GenerationError> {
        if api_key.trim().is_empty() {
            return Err(GenerationError::InvalidConfig(
                "Gemini API key is required".to_string(),
            ));
        }
        // The config format carries the legacy "models/" prefix in some setups
        let model = model.trim().trim_start_matches("models/");
        if model.is_empty() {
            return Err(GenerationError::InvalidConfig(
                "Model name cannot be empty".to_string(),
            ));
        }

        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| GenerationError::InvalidConfig(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_key: api_key.to_string(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
            model: model.to_string(),
        })
    }

    pub fn build_request_body(prompt: &str) -> serde_json::Value {
        let safety: Vec<serde_json::Value> = SAFETY_CATEGORIES
            .iter()
            .map(|category| {
                serde_json::json!({
                    "category": category,
                    "threshold": "BLOCK_NONE"
                })
            })
            .collect();

        serde_json::json!({
            "contents": [{
                "parts": [{"text": prompt}]
            }],
            "safetySettings": safety
        })
    }

    /// Concatenate the text parts of the first candidate
    pub fn extract_text(response: &GeminiResponse) -> Result<String, GenerationError> {
        let Some(candidate) = response.candidates.first() else {
            let reason = response
                .prompt_feedback
                .as_ref()
                .and_then(|f| f.block_reason.clone());
            return Err(GenerationError::EmptyReply(reason));
        };

        let text: String = candidate
            .content
            .iter()
            .flat_map(|c| c.parts.iter())
            .filter_map(|p| p.text.as_deref())
            .collect();

        if text.trim().is_empty() {
            return Err(GenerationError::EmptyReply(candidate.finish_reason.clone()));
        }
        Ok(text)
    }

    fn url(&self) -> String {
        format!("{}/{}:generateContent", self.endpoint, self.model)
    }
}

#[async_trait]
impl TextGenerator for GeminiClient {
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        let body = Self::build_request_body(prompt);

        info!("Gemini generation: model={}, prompt={} chars", self.model, prompt.len());

        let api_key = HeaderValue::from_str(&self.api_key)
            .map_err(|e| GenerationError::InvalidConfig(format!("Invalid API key header: {}", e)))?;

        let response = self
            .client
            .post(self.url())
            .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
            .header("x-goog-api-key", api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| GenerationError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            warn!("Gemini API returned {}", status);
            return Err(GenerationError::Status {
                status: status.as_u16(),
                body: truncate_body(&error_body).to_string(),
            });
        }

        let gemini_response: GeminiResponse = response
            .json()
            .await
            .map_err(|e| GenerationError::Decode(e.to_string()))?;

        let text = Self::extract_text(&gemini_response)?;
        debug!("Gemini reply: {} chars", text.len());
        Ok(text)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Truncate error body to avoid leaking sensitive data, on a char boundary
fn truncate_body(body: &str) -> &str {
    if body.len() <= MAX_ERROR_BODY {
        return body;
    }
    let mut end = MAX_ERROR_BODY;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    &body[..end]
}
