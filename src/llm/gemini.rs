//! Google Gemini generator
//!
//! Talks to the `generateContent` REST endpoint. Calls are blocking: a private current-thread
//! Tokio runtime drives each request, so `generate` must not be called from inside an async
//! runtime (Tokio panics on nested `block_on`).

use crate::llm::{GenerateError, GenerationMode, Generator};
use crate::pool::Credential;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const ENV_FAST_MODEL: &str = "GEMINI_MODEL";
pub const ENV_QUALITY_MODEL: &str = "GEMINI_MODEL_QUALITY";

/// Configuration for the Gemini generator
#[derive(Clone, Debug, PartialEq)]
pub struct GeminiConfig {
    /// Base URL (default: https://generativelanguage.googleapis.com)
    pub base_url: String,
    /// Model used for `GenerationMode::Fast`
    pub fast_model: String,
    /// Model used for `GenerationMode::Quality`
    pub quality_model: String,
    pub temperature: f32,
    pub top_p: f32,
    pub timeout: Duration,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://generativelanguage.googleapis.com".to_string(),
            fast_model: "gemini-1.5-flash-8b".to_string(),
            quality_model: "gemini-2.5-flash".to_string(),
            temperature: 0.5,
            top_p: 0.9,
            timeout: Duration::from_secs(60),
        }
    }
}

impl GeminiConfig {
    /// Defaults, with model names overridable through `GEMINI_MODEL` / `GEMINI_MODEL_QUALITY`.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(model) = std::env::var(ENV_FAST_MODEL) {
            config.fast_model = model;
        }
        if let Ok(model) = std::env::var(ENV_QUALITY_MODEL) {
            config.quality_model = model;
        }
        config
    }

    pub fn model_for(&self, mode: GenerationMode) -> &str {
        match mode {
            GenerationMode::Fast => &self.fast_model,
            GenerationMode::Quality => &self.quality_model,
        }
    }
}

/// Request structure for Gemini generate content
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiRequest {
    pub contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation_config: Option<GeminiGenerationConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeminiContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub parts: Vec<GeminiPart>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeminiPart {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl GeminiContent {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Some("user".to_string()),
            parts: vec![GeminiPart {
                text: Some(text.into()),
            }],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiGenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
}

/// Response from Gemini generate content
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiResponse {
    #[serde(default)]
    pub candidates: Vec<GeminiCandidate>,
    #[serde(default)]
    pub usage_metadata: Option<GeminiUsageMetadata>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiCandidate {
    #[serde(default)]
    pub content: Option<GeminiContent>,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiUsageMetadata {
    #[serde(default)]
    pub prompt_token_count: u32,
    #[serde(default)]
    pub candidates_token_count: u32,
    #[serde(default)]
    pub total_token_count: u32,
}

impl GeminiResponse {
    /// Concatenated text of the first candidate.
    pub fn text(&self) -> Option<String> {
        let content = self.candidates.first()?.content.as_ref()?;
        let text: String = content
            .parts
            .iter()
            .filter_map(|p| p.text.as_deref())
            .collect();
        (!text.trim().is_empty()).then_some(text)
    }
}

/// Maps an unsuccessful HTTP status to what the credential pool should do.
pub fn classify_status(status: u16, body: &str) -> GenerateError {
    let lower = body.to_lowercase();
    match status {
        429 => GenerateError::QuotaExhausted(body.to_string()),
        500 | 502 | 503 | 504 => GenerateError::Transient(format!("HTTP {status}: {body}")),
        401 | 403 | 404 => GenerateError::Permanent(format!("HTTP {status}: {body}")),
        400 if lower.contains("api key") || lower.contains("api_key_invalid") => {
            GenerateError::Permanent(format!("HTTP {status}: {body}"))
        }
        _ => GenerateError::Other(format!("HTTP {status}: {body}")),
    }
}

fn classify_transport(err: reqwest::Error) -> GenerateError {
    if err.is_timeout() || err.is_connect() {
        GenerateError::Transient(err.to_string())
    } else {
        GenerateError::Other(err.to_string())
    }
}

/// Blocking Gemini client.
///
/// Every call is driven by one private current-thread runtime, so concurrent `generate` calls
/// on the same generator run one at a time. Give each worker its own generator when requests
/// must overlap.
pub struct GeminiGenerator {
    config: GeminiConfig,
    http: reqwest::Client,
    runtime: tokio::runtime::Runtime,
}

impl GeminiGenerator {
    pub fn new(config: GeminiConfig) -> Result<Self, GenerateError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| GenerateError::Other(format!("failed to build HTTP client: {e}")))?;
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| GenerateError::Other(format!("failed to start runtime: {e}")))?;
        Ok(Self {
            config,
            http,
            runtime,
        })
    }

    pub fn config(&self) -> &GeminiConfig {
        &self.config
    }

    async fn call(&self, prompt: &str, api_key: &str, model: &str) -> Result<String, GenerateError> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.config.base_url.trim_end_matches('/'),
            model
        );
        let request = GeminiRequest {
            contents: vec![GeminiContent::user(prompt)],
            generation_config: Some(GeminiGenerationConfig {
                temperature: Some(self.config.temperature),
                top_p: Some(self.config.top_p),
                max_output_tokens: None,
            }),
        };

        let response = self
            .http
            .post(&url)
            .header("Content-Type", "application/json")
            .header("x-goog-api-key", api_key)
            .json(&request)
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status.as_u16(), &body));
        }

        let body: GeminiResponse = response.json().await.map_err(classify_transport)?;
        if let Some(usage) = &body.usage_metadata {
            log::debug!(
                "gemini usage: prompt={} candidates={} total={}",
                usage.prompt_token_count,
                usage.candidates_token_count,
                usage.total_token_count
            );
        }
        body.text().ok_or_else(|| {
            let reason = body
                .candidates
                .first()
                .and_then(|c| c.finish_reason.clone())
                .unwrap_or_else(|| "no candidates".to_string());
            GenerateError::Other(format!("no text in response ({reason})"))
        })
    }
}

impl Generator for GeminiGenerator {
    fn generate(
        &self,
        prompt: &str,
        credential: &Credential,
        mode: GenerationMode,
    ) -> Result<String, GenerateError> {
        let model = self.config.model_for(mode);
        log::info!("using model {model}");
        self.runtime
            .block_on(self.call(prompt, credential.expose(), model))
    }
}
