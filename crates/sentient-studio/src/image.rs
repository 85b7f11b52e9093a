//! City paintings from the OpenAI Images API.

use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use sentient_core::{ImageConfig, NetworkError, ReqwestErrorExt};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::prompt::image_prompt;

const REQUEST_TIMEOUT_SECS: u64 = 120;

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("Image generation request failed: {0}")]
    Request(#[from] NetworkError),

    #[error("Image generation returned HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Image generation returned no usable image")]
    EmptyPayload,

    #[error("Image download failed: {0}")]
    Download(String),
}

impl GenerationError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Request(e) => e.user_message(),
            Self::Status { status, .. } if *status >= 500 => {
                "The image service is experiencing issues. Please try again later."
            }
            Self::Status { .. } => "The image service rejected the request.",
            Self::EmptyPayload => "The image service did not return an image.",
            Self::Download(_) => "The generated image could not be downloaded.",
        }
    }
}

/// Produces image bytes for a city and weather description.
#[cfg_attr(any(test, feature = "mocks"), mockall::automock)]
#[async_trait]
pub trait ArtifactSource: Send + Sync {
    async fn generate(&self, subject: &str, descriptor: &str) -> Result<Vec<u8>, GenerationError>;
}

#[derive(Debug, Serialize)]
struct GenerationRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    size: &'a str,
    quality: &'a str,
    n: u8,
}

#[derive(Debug, Deserialize)]
struct GenerationResponse {
    #[serde(default)]
    data: Vec<GeneratedImage>,
}

#[derive(Debug, Deserialize)]
struct GeneratedImage {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    b64_json: Option<String>,
}

/// OpenAI Images API client
#[derive(Clone)]
pub struct OpenAiImageGenerator {
    client: Client,
    base_url: String,
    api_key: String,
    config: ImageConfig,
}

impl std::fmt::Debug for OpenAiImageGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiImageGenerator")
            .field("base_url", &self.base_url)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl OpenAiImageGenerator {
    pub fn new(base_url: &str, api_key: &str, config: ImageConfig) -> Result<Self, GenerationError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| GenerationError::Request(e.into_network_error()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            config,
        })
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>, GenerationError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| GenerationError::Download(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(GenerationError::Download(format!("HTTP {}", status.as_u16())));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| GenerationError::Download(e.to_string()))?;
        if bytes.is_empty() {
            return Err(GenerationError::Download("empty body".to_string()));
        }
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl ArtifactSource for OpenAiImageGenerator {
    #[tracing::instrument(skip(self), level = "info")]
    async fn generate(&self, subject: &str, descriptor: &str) -> Result<Vec<u8>, GenerationError> {
        let prompt = image_prompt(subject, descriptor);
        let body = GenerationRequest {
            model: &self.config.model,
            prompt: &prompt,
            size: &self.config.size,
            quality: &self.config.quality,
            n: 1,
        };

        let response = self
            .client
            .post(format!("{}/v1/images/generations", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| GenerationError::Request(e.into_network_error()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            tracing::warn!("Image generation failed with {}", status);
            return Err(GenerationError::Status {
                status: status.as_u16(),
                message,
            });
        }

        let reply: GenerationResponse = response.json().await.map_err(|e| {
            GenerationError::Request(NetworkError::InvalidResponse(e.to_string()))
        })?;

        let image = reply
            .data
            .into_iter()
            .next()
            .ok_or(GenerationError::EmptyPayload)?;

        let bytes = match (image.b64_json, image.url) {
            (Some(encoded), _) => base64::engine::general_purpose::STANDARD
                .decode(encoded.trim())
                .map_err(|e| {
                    GenerationError::Request(NetworkError::InvalidResponse(e.to_string()))
                })?,
            (None, Some(url)) if !url.is_empty() => self.download(&url).await?,
            _ => return Err(GenerationError::EmptyPayload),
        };

        if bytes.is_empty() {
            return Err(GenerationError::EmptyPayload);
        }

        tracing::info!("Generated image for {} ({} bytes)", subject, bytes.len());
        Ok(bytes)
    }
}
