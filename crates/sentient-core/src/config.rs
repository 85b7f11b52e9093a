use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::error::ConfigError;

/// Configuration validation errors
#[derive(Debug, Clone)]
pub struct ConfigValidationError {
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Result of config validation
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub errors: Vec<ConfigValidationError>,
    pub warnings: Vec<ConfigValidationError>,
}

impl ValidationResult {
    /// Returns true if there are no errors (warnings are OK)
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Add an error
    pub fn add_error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ConfigValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    /// Add a warning
    pub fn add_warning(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.warnings.push(ConfigValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    /// Get a user-friendly message summarizing all errors
    pub fn error_summary(&self) -> String {
        if self.errors.is_empty() {
            return String::new();
        }
        self.errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Upstream service endpoints
    #[serde(default)]
    pub services: ServiceConfig,

    /// Language model settings for palette generation
    #[serde(default)]
    pub palette: PaletteConfig,

    /// Image model settings
    #[serde(default)]
    pub image: ImageConfig,

    /// Generated image cache
    #[serde(default)]
    pub cache: CacheConfig,

    /// Weather fetch settings
    #[serde(default)]
    pub weather: WeatherConfig,

    /// Pipeline settings
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// API keys, read from the environment only
    #[serde(skip)]
    pub secrets: Secrets,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Nominatim base URL used for forward geocoding
    #[serde(default = "default_geocoder_url")]
    pub geocoder_url: String,

    /// Open-Meteo base URL
    #[serde(default = "default_weather_url")]
    pub weather_url: String,

    /// Anthropic API base URL
    #[serde(default = "default_anthropic_url")]
    pub anthropic_url: String,

    /// OpenAI API base URL
    #[serde(default = "default_openai_url")]
    pub openai_url: String,

    /// User agent sent to public services (Nominatim requires one)
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_geocoder_url() -> String {
    "https://nominatim.openstreetmap.org".to_string()
}

fn default_weather_url() -> String {
    "https://api.open-meteo.com".to_string()
}

fn default_anthropic_url() -> String {
    "https://api.anthropic.com".to_string()
}

fn default_openai_url() -> String {
    "https://api.openai.com".to_string()
}

fn default_user_agent() -> String {
    "sentient-weather-app/0.1".to_string()
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            geocoder_url: default_geocoder_url(),
            weather_url: default_weather_url(),
            anthropic_url: default_anthropic_url(),
            openai_url: default_openai_url(),
            user_agent: default_user_agent(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PaletteConfig {
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f64,
}

impl Default for PaletteConfig {
    fn default() -> Self {
        Self {
            model: "claude-3-5-sonnet-20241022".to_string(),
            max_tokens: 1024,
            temperature: 0.7,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageConfig {
    pub model: String,
    pub size: String,
    pub quality: String,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            model: "dall-e-3".to_string(),
            size: "1024x1024".to_string(),
            quality: "standard".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Directory holding generated images and the cache database
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Hours a cached image stays valid
    #[serde(default = "default_ttl_hours")]
    pub ttl_hours: u64,

    /// Maximum number of images kept on disk
    #[serde(default = "default_max_retained")]
    pub max_retained: usize,
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("sentient")
}

fn default_ttl_hours() -> u64 {
    24
}

fn default_max_retained() -> usize {
    20
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            ttl_hours: default_ttl_hours(),
            max_retained: default_max_retained(),
        }
    }
}

impl CacheConfig {
    /// Directory the image files live in.
    pub fn artifact_dir(&self) -> PathBuf {
        self.data_dir.join("images")
    }

    /// SQLite database holding one record per cache key.
    pub fn metadata_path(&self) -> PathBuf {
        self.data_dir.join("cache.sqlite3")
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_hours.saturating_mul(3600))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeatherConfig {
    /// Retries for transient Open-Meteo and Nominatim failures
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    /// Initial retry backoff in milliseconds (doubles each attempt)
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Minutes a fetched snapshot is reused for the same coordinates
    #[serde(default = "default_snapshot_ttl_minutes")]
    pub snapshot_ttl_minutes: u64,
}

fn default_retry_attempts() -> u32 {
    5
}

fn default_retry_backoff_ms() -> u64 {
    200
}

fn default_snapshot_ttl_minutes() -> u64 {
    60
}

impl Default for WeatherConfig {
    fn default() -> Self {
        Self {
            retry_attempts: default_retry_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
            snapshot_ttl_minutes: default_snapshot_ttl_minutes(),
        }
    }
}

impl WeatherConfig {
    pub fn snapshot_ttl(&self) -> Duration {
        Duration::from_secs(self.snapshot_ttl_minutes.saturating_mul(60))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Overall budget for one city lookup, in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_request_timeout_secs() -> u64 {
    180
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl PipelineConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// API keys for the generation services.
#[derive(Clone, Default)]
pub struct Secrets {
    pub anthropic_api_key: Option<String>,
    pub openai_api_key: Option<String>,
}

impl Secrets {
    /// Read keys from `ANTHROPIC_API_KEY` and `OPENAI_API_KEY`.
    pub fn from_env() -> Self {
        Self {
            anthropic_api_key: non_empty_env("ANTHROPIC_API_KEY"),
            openai_api_key: non_empty_env("OPENAI_API_KEY"),
        }
    }

    pub fn anthropic(&self) -> Result<&str, ConfigError> {
        required(self.anthropic_api_key.as_deref(), "ANTHROPIC_API_KEY")
    }

    pub fn openai(&self) -> Result<&str, ConfigError> {
        required(self.openai_api_key.as_deref(), "OPENAI_API_KEY")
    }
}

fn required<'a>(value: Option<&'a str>, name: &str) -> Result<&'a str, ConfigError> {
    value.ok_or_else(|| ConfigError::MissingSetting(name.to_string()))
}

impl std::fmt::Debug for Secrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Secrets")
            .field("anthropic_api_key", &self.anthropic_api_key.as_ref().map(|_| "<redacted>"))
            .field("openai_api_key", &self.openai_api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

impl Config {
    /// Load configuration from the default location, creating it if missing.
    ///
    /// A `.env` file in the working directory is loaded first so API keys can
    /// live there.
    pub fn load() -> Result<Self> {
        if let Ok(path) = dotenvy::dotenv() {
            tracing::debug!("Loaded environment from {}", path.display());
        }
        Self::load_from(&Self::config_path()?)
    }

    /// Load configuration from `path`, writing defaults there if it does not exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let contents =
                std::fs::read_to_string(path).context("Failed to read config file")?;
            toml::from_str::<Config>(&contents).context("Failed to parse config file")?
        } else {
            let config = Self::default();
            config.save_to(path)?;
            config
        };

        config.secrets = Secrets::from_env();
        Ok(config)
    }

    /// Load configuration and validate it
    ///
    /// Returns the config along with any validation warnings.
    /// Returns an error if validation fails with critical errors.
    pub fn load_validated() -> Result<(Self, ValidationResult)> {
        let config = Self::load()?;
        let validation = config.check()?;
        Ok((config, validation))
    }

    /// Validate and log warnings; errors become [`ConfigError::Invalid`].
    pub fn check(&self) -> Result<ValidationResult, ConfigError> {
        let validation = self.validate();

        if !validation.is_valid() {
            return Err(ConfigError::Invalid(validation.error_summary()));
        }

        for warning in &validation.warnings {
            tracing::warn!("Config warning: {}", warning);
        }

        Ok(validation)
    }

    /// Validate the configuration
    pub fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::default();

        self.validate_url(&self.services.geocoder_url, "services.geocoder_url", &mut result);
        self.validate_url(&self.services.weather_url, "services.weather_url", &mut result);
        self.validate_url(&self.services.anthropic_url, "services.anthropic_url", &mut result);
        self.validate_url(&self.services.openai_url, "services.openai_url", &mut result);

        if self.services.user_agent.trim().is_empty() {
            result.add_error("services.user_agent", "User agent must not be empty");
        }

        if self.cache.max_retained == 0 {
            result.add_error("cache.max_retained", "At least one image must be retained");
        }

        if self.cache.ttl_hours == 0 {
            result.add_error("cache.ttl_hours", "Cache TTL must be greater than 0");
        } else if self.cache.ttl_hours > 24 * 30 {
            result.add_warning("cache.ttl_hours", "Cache TTL is longer than 30 days");
        }

        if !(0.0..=1.0).contains(&self.palette.temperature) {
            result.add_error(
                "palette.temperature",
                format!(
                    "Temperature must be between 0.0 and 1.0, got {}",
                    self.palette.temperature
                ),
            );
        }

        if self.palette.max_tokens == 0 {
            result.add_error("palette.max_tokens", "max_tokens must be greater than 0");
        }

        if self.pipeline.request_timeout_secs == 0 {
            result.add_error(
                "pipeline.request_timeout_secs",
                "Request timeout must be greater than 0",
            );
        }

        if self.weather.snapshot_ttl_minutes == 0 {
            result.add_warning(
                "weather.snapshot_ttl_minutes",
                "Weather snapshot reuse disabled (0 minutes)",
            );
        }

        if self.secrets.anthropic_api_key.is_none() {
            result.add_warning(
                "ANTHROPIC_API_KEY",
                "Not set - palette generation will fail",
            );
        }

        if self.secrets.openai_api_key.is_none() {
            result.add_warning("OPENAI_API_KEY", "Not set - image generation will fail");
        }

        result
    }

    /// Validate a URL field
    fn validate_url(&self, url_str: &str, field_name: &str, result: &mut ValidationResult) {
        match Url::parse(url_str) {
            Ok(url) => {
                if url.scheme() != "http" && url.scheme() != "https" {
                    result.add_error(
                        field_name,
                        format!("URL must use http or https scheme, got: {}", url.scheme()),
                    );
                }

                if url.host().is_none() {
                    result.add_error(field_name, "URL must have a host");
                }
            }
            Err(e) => {
                result.add_error(field_name, format!("Invalid URL: {}", e));
            }
        }
    }

    /// Save configuration to the default location
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    /// Save configuration to `path`
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(path, contents).context("Failed to write config file")?;

        Ok(())
    }

    /// Get the path to the configuration file
    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to get config directory")?
            .join("sentient");

        Ok(config_dir.join("config.toml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_default_config() {
        let config = Config::default();
        let result = config.validate();
        // Missing API keys are warnings only
        assert!(result.is_valid(), "Default config should be valid: {:?}", result.errors);
    }

    #[test]
    fn test_default_cache_policy() {
        let cache = CacheConfig::default();
        assert_eq!(cache.ttl_hours, 24);
        assert_eq!(cache.max_retained, 20);
        assert_eq!(cache.ttl(), Duration::from_secs(24 * 3600));
        assert!(cache.artifact_dir().starts_with(&cache.data_dir));
    }

    #[test]
    fn test_invalid_url() {
        let mut config = Config::default();
        config.services.weather_url = "not-a-url".to_string();
        let result = config.validate();
        assert!(!result.is_valid());
        assert!(result.errors.iter().any(|e| e.field == "services.weather_url"));
    }

    #[test]
    fn test_invalid_url_scheme() {
        let mut config = Config::default();
        config.services.openai_url = "ftp://localhost:8080".to_string();
        let result = config.validate();
        assert!(!result.is_valid());
        assert!(result.errors.iter().any(|e| e.message.contains("http or https")));
    }

    #[test]
    fn test_zero_retention_is_error() {
        let mut config = Config::default();
        config.cache.max_retained = 0;
        let result = config.validate();
        assert!(!result.is_valid());
        assert!(result.errors.iter().any(|e| e.field == "cache.max_retained"));
    }

    #[test]
    fn test_temperature_out_of_range() {
        let mut config = Config::default();
        config.palette.temperature = 1.5;
        let result = config.validate();
        assert!(result.errors.iter().any(|e| e.field == "palette.temperature"));
    }

    #[test]
    fn test_missing_keys_are_warnings() {
        let mut config = Config::default();
        config.secrets = Secrets::default();
        let result = config.validate();
        assert!(result.is_valid());
        assert!(result.warnings.iter().any(|w| w.field == "OPENAI_API_KEY"));
        assert!(result.warnings.iter().any(|w| w.field == "ANTHROPIC_API_KEY"));
    }

    #[test]
    fn test_load_from_creates_default_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let config = Config::load_from(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config.cache.max_retained, 20);
    }

    #[test]
    fn test_load_from_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[cache]\nmax_retained = 5\n").unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.cache.max_retained, 5);
        assert_eq!(config.cache.ttl_hours, 24);
        assert_eq!(config.pipeline.request_timeout_secs, 180);
        assert_eq!(config.image.model, "dall-e-3");
    }

    #[test]
    fn test_secrets_never_serialized() {
        let mut config = Config::default();
        config.secrets.openai_api_key = Some("sk-test".to_string());
        let toml = toml::to_string_pretty(&config).unwrap();
        assert!(!toml.contains("sk-test"));
        assert!(!format!("{:?}", config.secrets).contains("sk-test"));
    }

    #[test]
    fn test_validation_result_error_summary() {
        let mut result = ValidationResult::default();
        result.add_error("field1", "error1");
        result.add_error("field2", "error2");
        let summary = result.error_summary();
        assert!(summary.contains("field1"));
        assert!(summary.contains("field2"));
    }

    #[test]
    fn test_check_rejects_invalid_config() {
        let mut config = Config::default();
        config.cache.max_retained = 0;
        match config.check() {
            Err(ConfigError::Invalid(summary)) => assert!(summary.contains("cache.max_retained")),
            other => panic!("expected invalid config, got {:?}", other),
        }
        assert!(Config::default().check().is_ok());
    }

    #[test]
    fn test_missing_api_keys() {
        let mut secrets = Secrets::default();
        assert!(matches!(
            secrets.anthropic(),
            Err(ConfigError::MissingSetting(ref name)) if name == "ANTHROPIC_API_KEY"
        ));
        assert!(matches!(
            secrets.openai(),
            Err(ConfigError::MissingSetting(ref name)) if name == "OPENAI_API_KEY"
        ));

        secrets.openai_api_key = Some("sk-test".to_string());
        assert_eq!(secrets.openai().unwrap(), "sk-test");
    }
}
