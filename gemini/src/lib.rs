//! Minimal Google Gemini API client.
//!
//! This crate provides a focused client for the `generateContent` endpoint
//! with:
//! - Structured JSON output parsed into caller-supplied types
//! - Image generation (and image-to-image edits) via response modalities
//! - Round-robin rotation over a ring of API keys

use base64::Engine as _;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;

const API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_MODEL: &str = "gemini-2.5-flash";
const DEFAULT_IMAGE_MODEL: &str = "gemini-2.0-flash-preview-image-generation";

/// Errors that can occur when using the Gemini client.
#[derive(Debug, Error)]
pub enum Error {
    #[error("API key not configured")]
    NoApiKey,

    #[error("Network error: {0}")]
    Network(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Failed to parse response: {0}")]
    Parse(String),

    #[error("Response contained no candidates")]
    Empty,

    #[error("Response contained no image data")]
    NoImage,

    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Gemini API client.
#[derive(Clone)]
pub struct Gemini {
    client: reqwest::Client,
    keys: Arc<Vec<String>>,
    next_key: Arc<AtomicUsize>,
    model: String,
    image_model: String,
}

impl Gemini {
    /// Create a new Gemini client with one or more comma-separated API keys.
    pub fn new(api_keys: impl Into<String>) -> Self {
        let keys: Vec<String> = api_keys
            .into()
            .split(',')
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .collect();

        Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(120))
                .connect_timeout(std::time::Duration::from_secs(30))
                .build()
                .expect("Failed to build HTTP client"),
            keys: Arc::new(keys),
            next_key: Arc::new(AtomicUsize::new(0)),
            model: DEFAULT_MODEL.to_string(),
            image_model: DEFAULT_IMAGE_MODEL.to_string(),
        }
    }

    /// Create a Gemini client from the GEMINI_API_KEY environment variable.
    ///
    /// The variable may hold several keys separated by commas; requests
    /// rotate over them round-robin.
    pub fn from_env() -> Result<Self, Error> {
        let keys = std::env::var("GEMINI_API_KEY").map_err(|_| Error::NoApiKey)?;
        let client = Self::new(keys);
        if client.keys.is_empty() {
            return Err(Error::NoApiKey);
        }
        Ok(client)
    }

    /// Set the default text model for this client.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Set the image-generation model for this client.
    pub fn with_image_model(mut self, model: impl Into<String>) -> Self {
        self.image_model = model.into();
        self
    }

    /// Pick the next API key round-robin.
    fn api_key(&self) -> Result<&str, Error> {
        if self.keys.is_empty() {
            return Err(Error::NoApiKey);
        }
        let idx = self.next_key.fetch_add(1, Ordering::Relaxed) % self.keys.len();
        Ok(&self.keys[idx])
    }

    /// Send a request expecting a JSON body conforming to `T`.
    ///
    /// The request is issued with `responseMimeType: application/json`; the
    /// concatenated text parts of the first candidate are parsed into `T`.
    pub async fn complete_json<T: DeserializeOwned>(&self, request: Request) -> Result<T, Error> {
        let model = request.model.clone().unwrap_or_else(|| self.model.clone());
        let api_request = ApiRequest {
            contents: vec![ApiContent {
                role: Some("user".to_string()),
                parts: vec![ApiPart::text(&request.prompt)],
            }],
            system_instruction: request.system.as_ref().map(|s| ApiSystemInstruction {
                parts: vec![ApiPart::text(s)],
            }),
            generation_config: ApiGenerationConfig {
                response_mime_type: Some("application/json".to_string()),
                response_modalities: None,
                temperature: request.temperature,
                top_p: request.top_p,
            },
        };

        let response = self.post(&model, &api_request).await?;
        let text = response.text()?;
        serde_json::from_str(&text).map_err(|e| Error::Parse(format!("{e}: {text}")))
    }

    /// Generate an image from a text prompt.
    ///
    /// When `base` holds PNG bytes, the request becomes an edit of that
    /// image guided by the prompt.
    pub async fn generate_image(
        &self,
        prompt: &str,
        base: Option<&[u8]>,
    ) -> Result<GeneratedImage, Error> {
        let mut parts = vec![ApiPart::text(prompt)];
        if let Some(bytes) = base {
            parts.push(ApiPart::inline_png(bytes));
        }

        let api_request = ApiRequest {
            contents: vec![ApiContent {
                role: Some("user".to_string()),
                parts,
            }],
            system_instruction: None,
            generation_config: ApiGenerationConfig {
                response_mime_type: None,
                response_modalities: Some(vec!["TEXT".to_string(), "IMAGE".to_string()]),
                temperature: None,
                top_p: None,
            },
        };

        let model = self.image_model.clone();
        let response = self.post(&model, &api_request).await?;
        response.image()
    }

    async fn post(&self, model: &str, body: &ApiRequest) -> Result<ApiResponse, Error> {
        let headers = self.build_headers()?;
        let response = self
            .client
            .post(format!("{API_BASE}/models/{model}:generateContent"))
            .headers(headers)
            .json(body)
            .send()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            return Err(Error::Api { status, message });
        }

        response
            .json::<ApiResponse>()
            .await
            .map_err(|e| Error::Parse(e.to_string()))
    }

    fn build_headers(&self) -> Result<HeaderMap, Error> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            "x-goog-api-key",
            HeaderValue::from_str(self.api_key()?)
                .map_err(|e| Error::Config(format!("Invalid API key: {e}")))?,
        );
        Ok(headers)
    }
}

// ============================================================================
// Public types
// ============================================================================

/// A generation request.
#[derive(Debug, Clone)]
pub struct Request {
    pub model: Option<String>,
    pub system: Option<String>,
    pub prompt: String,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
}

impl Request {
    /// Create a new request with the given user prompt.
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            model: None,
            system: None,
            prompt: prompt.into(),
            temperature: None,
            top_p: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_top_p(mut self, top_p: f32) -> Self {
        self.top_p = Some(top_p);
        self
    }
}

/// A generated image and the model's accompanying caption, if any.
#[derive(Debug, Clone)]
pub struct GeneratedImage {
    /// Raw PNG bytes.
    pub png: Vec<u8>,
    /// Optional caption text returned alongside the image.
    pub caption: Option<String>,
}

// ============================================================================
// Internal API types
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ApiRequest {
    contents: Vec<ApiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<ApiSystemInstruction>,
    generation_config: ApiGenerationConfig,
}

#[derive(Debug, Serialize)]
struct ApiSystemInstruction {
    parts: Vec<ApiPart>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<ApiPart>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiPart {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    inline_data: Option<ApiInlineData>,
}

impl ApiPart {
    fn text(text: &str) -> Self {
        Self {
            text: Some(text.to_string()),
            inline_data: None,
        }
    }

    fn inline_png(bytes: &[u8]) -> Self {
        Self {
            text: None,
            inline_data: Some(ApiInlineData {
                mime_type: "image/png".to_string(),
                data: base64::engine::general_purpose::STANDARD.encode(bytes),
            }),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiInlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ApiGenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_modalities: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    candidates: Vec<ApiCandidate>,
}

#[derive(Debug, Deserialize)]
struct ApiCandidate {
    content: Option<ApiContent>,
}

impl ApiResponse {
    /// Concatenate the text parts of the first candidate.
    fn text(&self) -> Result<String, Error> {
        let content = self
            .candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .ok_or(Error::Empty)?;

        let text: String = content
            .parts
            .iter()
            .filter_map(|p| p.text.as_deref())
            .collect();

        if text.is_empty() {
            return Err(Error::Empty);
        }
        Ok(text)
    }

    /// Extract the first inline image of the first candidate.
    fn image(&self) -> Result<GeneratedImage, Error> {
        let content = self
            .candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .ok_or(Error::Empty)?;

        let caption: Option<String> = content
            .parts
            .iter()
            .filter_map(|p| p.text.clone())
            .reduce(|mut acc, t| {
                acc.push_str(&t);
                acc
            });

        let inline = content
            .parts
            .iter()
            .find_map(|p| p.inline_data.as_ref())
            .ok_or(Error::NoImage)?;

        let png = base64::engine::general_purpose::STANDARD
            .decode(&inline.data)
            .map_err(|e| Error::Parse(format!("invalid image payload: {e}")))?;

        Ok(GeneratedImage { png, caption })
    }
}
