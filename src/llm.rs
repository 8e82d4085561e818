//! Language model client abstraction and implementations.
//!
//! Defines the [`LlmClient`] trait and concrete implementations:
//! - **[`DisabledClient`]** — returns errors; used when no provider is configured.
//! - **[`GeminiClient`]** — calls the Gemini `generateContent` API with
//!   multimodal (text + page image) requests, retry, and backoff.
//!
//! All provider-specific response-shape handling lives in this module; the
//! rest of the crate only ever sees plain text or an [`LlmError`]. A failed
//! call is always distinct from a successful call that returned no useful
//! content, so callers can apply their own fallback policy.
//!
//! # Provider Selection
//!
//! Use [`create_client`] to instantiate the appropriate client based on the
//! configuration:
//!
//! ```rust,no_run
//! # use catalog_qa::config::LlmConfig;
//! # use catalog_qa::llm::create_client;
//! let mut config = LlmConfig::default();
//! config.provider = "disabled".to_string();
//! let client = create_client(&config).unwrap();
//! assert_eq!(client.model_name(), "disabled");
//! ```
//!
//! # Retry Strategy
//!
//! The Gemini client uses exponential backoff for transient errors:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use std::time::Duration;
use tracing::warn;

use crate::config::LlmConfig;
use crate::raster::PageImage;

/// Failure modes of a model call.
///
/// `Empty` means the call itself succeeded but the response carried no text;
/// everything else is a transport- or API-level failure.
#[derive(Debug)]
pub enum LlmError {
    /// The API returned a non-retryable error status, or retries were exhausted.
    Api { status: u16, message: String },
    /// The request never produced an HTTP response (timeout, DNS, TLS, ...).
    Network(String),
    /// The response parsed but contained no candidate text.
    Empty,
    /// The configured provider is `disabled`.
    Disabled,
}

impl std::fmt::Display for LlmError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LlmError::Api { status, message } => {
                write!(f, "model API error {}: {}", status, message)
            }
            LlmError::Network(e) => write!(f, "model request failed: {}", e),
            LlmError::Empty => write!(f, "model response contained no text"),
            LlmError::Disabled => write!(f, "model provider is disabled"),
        }
    }
}

impl std::error::Error for LlmError {}

/// Trait for multimodal completion clients.
///
/// `generate` takes a prompt and an optional set of rendered catalog pages
/// and returns the model's text. Implementations must be usable as shared
/// trait objects so the pipeline can be driven by a stub in tests.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Returns the model identifier (e.g. `"gemini-2.5-flash"`).
    fn model_name(&self) -> &str;

    /// Run one completion. `images` may be empty for text-only prompts.
    async fn generate(&self, prompt: &str, images: &[PageImage]) -> Result<String, LlmError>;
}

// ============ Disabled Client ============

/// A no-op client that always returns errors.
///
/// Used when `llm.provider = "disabled"` in the configuration. Handy for
/// exercising every fallback path without network access.
pub struct DisabledClient;

#[async_trait]
impl LlmClient for DisabledClient {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn generate(&self, _prompt: &str, _images: &[PageImage]) -> Result<String, LlmError> {
        Err(LlmError::Disabled)
    }
}

// ============ Gemini Client ============

/// Client for the Gemini `generateContent` REST API.
///
/// Requires the `GEMINI_API_KEY` environment variable to be set. Page
/// images are embedded in the request as base64 `inline_data` parts.
pub struct GeminiClient {
    model: String,
    api_base: String,
    api_key: String,
    max_retries: u32,
    http: reqwest::Client,
}

impl GeminiClient {
    /// Create a new Gemini client from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if `GEMINI_API_KEY` is not in the environment or
    /// the HTTP client cannot be built.
    pub fn new(config: &LlmConfig) -> anyhow::Result<Self> {
        let api_key = std::env::var("GEMINI_API_KEY")
            .map_err(|_| anyhow::anyhow!("GEMINI_API_KEY environment variable not set"))?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            model: config.model.clone(),
            api_base: config.api_base.trim_end_matches('/').to_string(),
            api_key,
            max_retries: config.max_retries,
            http,
        })
    }

    fn request_body(&self, prompt: &str, images: &[PageImage]) -> serde_json::Value {
        let mut parts = vec![serde_json::json!({ "text": prompt })];
        for image in images {
            parts.push(serde_json::json!({
                "inline_data": {
                    "mime_type": "image/png",
                    "data": BASE64.encode(&image.png),
                }
            }));
        }
        serde_json::json!({ "contents": [{ "parts": parts }] })
    }
}

#[async_trait]
impl LlmClient for GeminiClient {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str, images: &[PageImage]) -> Result<String, LlmError> {
        let url = format!("{}/models/{}:generateContent", self.api_base, self.model);
        let body = self.request_body(prompt, images);

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                // Exponential backoff: 1s, 2s, 4s, 8s, ...
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .http
                .post(&url)
                .header("x-goog-api-key", &self.api_key)
                .header("Content-Type", "application/json")
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value =
                            response.json().await.map_err(|e| LlmError::Api {
                                status: status.as_u16(),
                                message: format!("invalid response body: {}", e),
                            })?;
                        return extract_text(&json);
                    }

                    // Rate limited or server error — retry
                    if status.as_u16() == 429 || status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        warn!(status = status.as_u16(), "retryable model API error");
                        last_err = Some(LlmError::Api {
                            status: status.as_u16(),
                            message: body_text,
                        });
                        continue;
                    }

                    // Client error (not 429) — don't retry
                    let body_text = response.text().await.unwrap_or_default();
                    return Err(LlmError::Api {
                        status: status.as_u16(),
                        message: body_text,
                    });
                }
                Err(e) => {
                    last_err = Some(LlmError::Network(e.to_string()));
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or(LlmError::Network("retries exhausted".to_string())))
    }
}

/// Pull the candidate text out of a `generateContent` response.
///
/// Joins all text parts of the first candidate. A well-formed response with
/// no text parts maps to [`LlmError::Empty`], never to `Ok("")`.
fn extract_text(json: &serde_json::Value) -> Result<String, LlmError> {
    let parts = json
        .get("candidates")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("content"))
        .and_then(|c| c.get("parts"))
        .and_then(|p| p.as_array())
        .ok_or(LlmError::Empty)?;

    let text: Vec<&str> = parts
        .iter()
        .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
        .collect();

    let joined = text.join("");
    if joined.trim().is_empty() {
        return Err(LlmError::Empty);
    }
    Ok(joined)
}

/// Create the appropriate [`LlmClient`] based on configuration.
///
/// | Config Value | Client |
/// |-------------|--------|
/// | `"disabled"` | [`DisabledClient`] |
/// | `"gemini"` | [`GeminiClient`] |
pub fn create_client(config: &LlmConfig) -> anyhow::Result<Box<dyn LlmClient>> {
    match config.provider.as_str() {
        "disabled" => Ok(Box::new(DisabledClient)),
        "gemini" => Ok(Box::new(GeminiClient::new(config)?)),
        other => anyhow::bail!("Unknown llm provider: {}", other),
    }
}

/// Strip a Markdown code fence wrapper from a model response, if present.
///
/// Models regularly wrap requested JSON in ```` ```json ... ``` ```` fences
/// despite instructions not to; every JSON-parsing caller runs its response
/// through this first.
pub fn strip_code_fences(text: &str) -> &str {
    let mut s = text.trim();
    if let Some(rest) = s.strip_prefix("```json") {
        s = rest;
    } else if let Some(rest) = s.strip_prefix("```") {
        s = rest;
    }
    if let Some(rest) = s.strip_suffix("```") {
        s = rest;
    }
    s.trim()
}
