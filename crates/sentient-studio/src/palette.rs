//! Colour palettes from the Anthropic Messages API.

use async_trait::async_trait;
use reqwest::Client;
use sentient_core::{NetworkError, PaletteConfig, ReqwestErrorExt};
use sentient_weather::CurrentConditions;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::prompt::palette_prompt;

const ANTHROPIC_VERSION: &str = "2023-06-01";
const REQUEST_TIMEOUT_SECS: u64 = 120;

/// Three colours for a weather view, as `#RGB` or `#RRGGBB` strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Palette {
    pub dominant_color: String,
    pub secondary_color: String,
    pub accent_color: String,
}

impl Palette {
    /// Parse the model's reply. The text must be exactly the JSON object with
    /// the three colour keys; nothing is repaired or filled in.
    pub fn parse(text: &str) -> Result<Self, PaletteError> {
        let palette: Palette = serde_json::from_str(text.trim())
            .map_err(|e| PaletteError::Parse(format!("invalid palette JSON: {}", e)))?;
        palette.validate()?;
        Ok(palette)
    }

    fn validate(&self) -> Result<(), PaletteError> {
        for (field, value) in [
            ("dominant_color", &self.dominant_color),
            ("secondary_color", &self.secondary_color),
            ("accent_color", &self.accent_color),
        ] {
            if !is_hex_color(value) {
                return Err(PaletteError::Parse(format!(
                    "{} is not a hex colour: {:?}",
                    field, value
                )));
            }
        }
        Ok(())
    }
}

fn is_hex_color(value: &str) -> bool {
    match value.strip_prefix('#') {
        Some(digits) => {
            matches!(digits.len(), 3 | 6) && digits.chars().all(|c| c.is_ascii_hexdigit())
        }
        None => false,
    }
}

#[derive(Debug, Error)]
pub enum PaletteError {
    #[error("Palette response could not be parsed: {0}")]
    Parse(String),

    #[error("Palette service error: {0}")]
    Service(#[from] NetworkError),
}

impl PaletteError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Parse(_) => "The colour palette came back in an unexpected format.",
            Self::Service(e) => e.user_message(),
        }
    }
}

/// Produces a palette for a city under the given conditions.
#[cfg_attr(any(test, feature = "mocks"), mockall::automock)]
#[async_trait]
pub trait PaletteSource: Send + Sync {
    async fn palette(
        &self,
        subject: &str,
        conditions: &CurrentConditions,
        descriptor: &str,
    ) -> Result<Palette, PaletteError>;
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f64,
    messages: [Message<'a>; 1],
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

/// Anthropic Messages API client
#[derive(Clone)]
pub struct AnthropicPaletteGenerator {
    client: Client,
    base_url: String,
    api_key: String,
    config: PaletteConfig,
}

impl std::fmt::Debug for AnthropicPaletteGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicPaletteGenerator")
            .field("base_url", &self.base_url)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl AnthropicPaletteGenerator {
    pub fn new(base_url: &str, api_key: &str, config: PaletteConfig) -> Result<Self, PaletteError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| PaletteError::Service(e.into_network_error()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            config,
        })
    }
}

#[async_trait]
impl PaletteSource for AnthropicPaletteGenerator {
    #[tracing::instrument(skip(self, conditions), level = "info")]
    async fn palette(
        &self,
        subject: &str,
        conditions: &CurrentConditions,
        descriptor: &str,
    ) -> Result<Palette, PaletteError> {
        let prompt = palette_prompt(subject, conditions, descriptor);
        let body = MessagesRequest {
            model: &self.config.model,
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
            messages: [Message {
                role: "user",
                content: &prompt,
            }],
        };

        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| PaletteError::Service(e.into_network_error()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            tracing::warn!("Palette request failed with {}", status);
            return Err(PaletteError::Service(NetworkError::ServerError {
                status: status.as_u16(),
                message,
            }));
        }

        let reply: MessagesResponse = response.json().await.map_err(|e| {
            PaletteError::Service(NetworkError::InvalidResponse(e.to_string()))
        })?;

        let text = reply
            .content
            .into_iter()
            .find(|block| block.kind == "text")
            .and_then(|block| block.text)
            .ok_or_else(|| {
                PaletteError::Service(NetworkError::InvalidResponse(
                    "response has no text block".to_string(),
                ))
            })?;

        let palette = Palette::parse(&text)?;
        tracing::info!(
            "Palette for {}: {} / {} / {}",
            subject,
            palette.dominant_color,
            palette.secondary_color,
            palette.accent_color
        );
        Ok(palette)
    }
}
