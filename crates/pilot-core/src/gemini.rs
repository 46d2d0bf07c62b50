//! Gemini API client

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::config::{Config, HarmThreshold};
use crate::conversation::Message;

/// Header carrying the API key; the key never goes in the URL
const API_KEY_HEADER: &str = "x-goog-api-key";

/// A remote conversational model
///
/// The transcript passed in is complete: it already ends with the prompt
/// being sent. Implementations return the raw reply text.
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn generate(&self, transcript: &[Message]) -> Result<String>;
}

#[derive(Debug, Serialize)]
struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
    #[serde(rename = "generationConfig")]
    generation_config: &'a GenerationConfig,
    #[serde(rename = "safetySettings")]
    safety_settings: &'a [SafetySetting],
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: [Part<'a>; 1],
}

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Clone, Serialize)]
struct GenerationConfig {
    temperature: f32,
    #[serde(rename = "topP")]
    top_p: f32,
    #[serde(rename = "topK")]
    top_k: u32,
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: u32,
    #[serde(rename = "responseMimeType")]
    response_mime_type: String,
}

#[derive(Debug, Clone, Serialize)]
struct SafetySetting {
    category: &'static str,
    threshold: HarmThreshold,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    candidates: Option<Vec<Candidate>>,
    error: Option<ApiError>,
    #[serde(rename = "promptFeedback")]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
    #[serde(rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct PromptFeedback {
    #[serde(rename = "blockReason")]
    block_reason: Option<String>,
}

/// Gemini `generateContent` client
#[derive(Debug, Clone)]
pub struct GeminiClient {
    base_url: String,
    model: String,
    api_key: String,
    generation_config: GenerationConfig,
    safety_settings: Vec<SafetySetting>,
    client: reqwest::Client,
}

impl GeminiClient {
    /// Build a client from configuration
    pub fn new(config: &Config) -> Result<Self> {
        let api_key = config.api_key()?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.model.request_timeout_secs))
            .build()
            .context("Failed to create HTTP client")?;

        let generation_config = GenerationConfig {
            temperature: config.model.temperature,
            top_p: config.model.top_p,
            top_k: config.model.top_k,
            max_output_tokens: config.model.max_output_tokens,
            response_mime_type: config.model.response_mime_type.clone(),
        };

        let safety_settings = config
            .safety
            .categories()
            .into_iter()
            .map(|(category, threshold)| SafetySetting {
                category,
                threshold,
            })
            .collect();

        Ok(Self {
            base_url: config.model.base_url.trim_end_matches('/').to_string(),
            model: config.model.name.clone(),
            api_key,
            generation_config,
            safety_settings,
            client,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, self.model
        )
    }

    fn request<'a>(&'a self, transcript: &'a [Message]) -> GenerateContentRequest<'a> {
        GenerateContentRequest {
            contents: transcript
                .iter()
                .map(|m| Content {
                    role: m.role.as_str(),
                    parts: [Part { text: &m.content }],
                })
                .collect(),
            generation_config: &self.generation_config,
            safety_settings: &self.safety_settings,
        }
    }
}

#[async_trait]
impl ModelClient for GeminiClient {
    async fn generate(&self, transcript: &[Message]) -> Result<String> {
        debug!(model = %self.model, messages = transcript.len(), "Sending generateContent request");

        let resp = self
            .client
            .post(self.endpoint())
            .header(API_KEY_HEADER, self.api_key.as_str())
            .json(&self.request(transcript))
            .send()
            .await
            .map_err(reqwest::Error::without_url)
            .context("Failed to connect to Gemini")?;

        let status = resp.status();
        let body: GenerateContentResponse = resp
            .json()
            .await
            .map_err(reqwest::Error::without_url)
            .with_context(|| format!("Failed to parse Gemini response (HTTP {})", status))?;

        if !status.is_success() {
            let message = body
                .error
                .map(|e| e.message)
                .unwrap_or_else(|| "no error details".to_string());
            anyhow::bail!("Gemini API returned HTTP {}: {}", status, message);
        }

        reply_text(body)
    }
}

/// Concatenated text of the first candidate
fn reply_text(resp: GenerateContentResponse) -> Result<String> {
    if let Some(err) = resp.error {
        anyhow::bail!("Gemini API error: {}", err.message);
    }

    let candidate = match resp.candidates.and_then(|c| c.into_iter().next()) {
        Some(c) => c,
        None => {
            let reason = resp
                .prompt_feedback
                .and_then(|f| f.block_reason)
                .unwrap_or_else(|| "no candidates returned".to_string());
            anyhow::bail!("Gemini returned no reply: {}", reason);
        }
    };

    let text: String = candidate
        .content
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();

    if text.is_empty() {
        anyhow::bail!(
            "Gemini reply contained no text (finish reason: {})",
            candidate.finish_reason.as_deref().unwrap_or("unknown")
        );
    }

    Ok(text)
}
