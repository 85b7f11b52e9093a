//! Sentient: weather, a matching colour palette and a painting for any city.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};

use sentient_artifacts::{
    ArtifactCache, CachePolicy, FsArtifactStorage, SqliteMetadataStore, SystemClock,
};
use sentient_core::Config;
use sentient_pipeline::{Pipeline, PipelineResult};
use sentient_studio::{AnthropicPaletteGenerator, OpenAiImageGenerator};
use sentient_weather::{NominatimGeocoder, RetryConfig, WeatherCache, WeatherProvider};

/// Weather, palette and painting for a city
#[derive(Parser)]
#[command(name = "sentient", version, about, args_conflicts_with_subcommands = true)]
struct Cli {
    /// City to look up, e.g. `sentient New York`
    city: Vec<String>,

    /// Output format for the assembled result
    #[arg(long, value_enum, default_value_t = Format::Json)]
    format: Format,

    /// Read settings from this file instead of the default location
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Inspect or maintain the generated image cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// List cached images, newest first
    List,
    /// Enforce the retention bound and clean up orphans
    Evict,
    /// Delete every cached image
    Purge,
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Json,
    Text,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    sentient_core::init()?;
    let config = load_config(cli.config.as_deref())?;
    let cache = open_cache(&config).await?;

    match cli.command {
        Some(Command::Cache { action }) => run_cache_action(&cache, action).await,
        None => {
            let city = cli.city.join(" ");
            if city.trim().is_empty() {
                anyhow::bail!("Give a city name, e.g. `sentient Paris`");
            }
            run_city(&config, cache, &city, cli.format).await
        }
    }
}

fn load_config(path: Option<&std::path::Path>) -> Result<Config> {
    let Some(path) = path else {
        let (config, _) = Config::load_validated()?;
        return Ok(config);
    };

    if let Ok(env) = dotenvy::dotenv() {
        tracing::debug!("Loaded environment from {}", env.display());
    }
    let config = Config::load_from(path)
        .with_context(|| format!("Failed to load config from {}", path.display()))?;
    config.check()?;
    Ok(config)
}

async fn open_cache(config: &Config) -> Result<Arc<ArtifactCache>> {
    let storage = FsArtifactStorage::open(config.cache.artifact_dir())
        .await
        .context("Failed to open image directory")?;
    let metadata = SqliteMetadataStore::open(config.cache.metadata_path())
        .context("Failed to open cache database")?;

    Ok(Arc::new(ArtifactCache::new(
        Arc::new(storage),
        Arc::new(metadata),
        Arc::new(SystemClock),
        CachePolicy::from_config(&config.cache),
    )))
}

fn build_pipeline(config: &Config, cache: Arc<ArtifactCache>) -> Result<Pipeline> {
    let services = &config.services;
    let retry = RetryConfig::from_config(&config.weather);

    let anthropic_key = config.secrets.anthropic()?;
    let openai_key = config.secrets.openai()?;

    let resolver = NominatimGeocoder::new(&services.geocoder_url, &services.user_agent, retry.clone())?;
    let weather = WeatherProvider::new(&services.weather_url, retry)?
        .with_cache(Arc::new(WeatherCache::new(config.weather.snapshot_ttl())));
    let palette =
        AnthropicPaletteGenerator::new(&services.anthropic_url, anthropic_key, config.palette.clone())?;
    let images = OpenAiImageGenerator::new(&services.openai_url, openai_key, config.image.clone())?;

    Ok(Pipeline::new(
        Arc::new(resolver),
        Arc::new(weather),
        Arc::new(palette),
        Arc::new(images),
        cache,
    )
    .with_request_timeout(config.pipeline.request_timeout()))
}

async fn run_city(config: &Config, cache: Arc<ArtifactCache>, city: &str, format: Format) -> Result<()> {
    let pipeline = build_pipeline(config, cache)?;

    let result = match pipeline.run_pipeline(city).await {
        Ok(result) => result,
        Err(e) => {
            eprintln!("{}", e.user_message());
            return Err(e.into());
        }
    };

    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&result)?),
        Format::Text => print_summary(&result),
    }
    Ok(())
}

fn print_summary(result: &PipelineResult) {
    let current = &result.weather.current;

    println!("{}", result.city);
    if let Some(name) = &result.coordinates.display_name {
        println!("  {}", name);
    }
    println!(
        "  {:.4}, {:.4}",
        result.coordinates.latitude, result.coordinates.longitude
    );
    println!(
        "\nNow: {} | {:.1}°C | {:.1} mm | {:.0}% cloud | {:.1} km/h wind | {}",
        result.description,
        current.temperature,
        current.precipitation,
        current.cloud_cover,
        current.wind_speed,
        if current.is_day { "day" } else { "night" }
    );

    println!("\nForecast:");
    for (day, data) in result.forecast.iter().zip(&result.weather.forecast) {
        let range = match (data.temperature_min, data.temperature_max) {
            (Some(min), Some(max)) => format!("{:.0}..{:.0}°C", min, max),
            _ => "n/a".to_string(),
        };
        println!("  {}  {:<30} {}", day.date, day.description, range);
    }

    println!(
        "\nPalette: {} / {} / {}",
        result.palette.dominant_color, result.palette.secondary_color, result.palette.accent_color
    );
    println!(
        "Image:   {} ({})",
        result.artifact.path.display(),
        if result.cache_hit { "cached" } else { "new" }
    );
}

async fn run_cache_action(cache: &ArtifactCache, action: CacheAction) -> Result<()> {
    match action {
        CacheAction::List => {
            let entries = cache.entries().await?;
            if entries.is_empty() {
                println!("Cache is empty");
            }
            for (entry, fresh) in entries {
                println!(
                    "{}  {:<40} {}{}",
                    entry.created_at.to_rfc3339(),
                    entry.key,
                    entry.artifact,
                    if fresh { "" } else { "  (stale)" }
                );
            }
        }
        CacheAction::Evict => {
            let report = cache.evict_excess().await;
            println!(
                "Kept {} images, evicted {}, removed {} orphan files and {} orphan entries",
                report.retained,
                report.evicted.len(),
                report.orphan_files,
                report.orphan_entries
            );
            if !report.is_clean() {
                println!("{} deletions failed; see the log for details", report.failures);
            }
        }
        CacheAction::Purge => {
            let removed = cache.purge().await?;
            println!("Removed {} cached images", removed);
        }
    }
    Ok(())
}
