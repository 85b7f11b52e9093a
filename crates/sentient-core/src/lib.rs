pub mod config;
pub mod error;

pub use config::{
    CacheConfig, Config, ImageConfig, PaletteConfig, PipelineConfig, Secrets, ServiceConfig,
    ValidationResult, WeatherConfig,
};
pub use error::{
    ConfigError, NetworkError, ReqwestErrorExt, RusqliteErrorExt, StorageError,
};

use anyhow::Result;

/// Initialize logging for the process.
///
/// Honours `RUST_LOG`; defaults to `info`. Logs go to stderr so command
/// output on stdout stays machine-readable.
pub fn init() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    tracing::debug!("Sentient core initialized");
    Ok(())
}
