//! Stage sequencing for one city request.

use chrono::NaiveDate;
use sentient_artifacts::{ArtifactCache, ArtifactRef, CacheKey};
use sentient_studio::{ArtifactSource, Palette, PaletteSource};
use sentient_weather::{Coordinates, CoordinateResolver, WeatherFetcher, WeatherSnapshot};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::error::{PipelineError, PipelineFailure, Stage};

/// Budget for a whole request, palette and image generation included.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(180);

/// One forecast day with its description.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForecastDay {
    pub date: NaiveDate,
    pub description: String,
}

/// Everything produced for one city.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineResult {
    /// City as entered
    pub city: String,
    pub coordinates: Coordinates,
    pub weather: WeatherSnapshot,
    /// Description of the current weather
    pub description: String,
    pub forecast: Vec<ForecastDay>,
    pub palette: Palette,
    pub artifact: ArtifactRef,
    /// Whether the image came from the cache rather than a new generation
    pub cache_hit: bool,
}

/// Runs city requests through geocoding, weather, description, palette and
/// image generation.
///
/// Cheap to share: collaborators are held behind `Arc`, and each call to
/// [`Pipeline::run_pipeline`] is independent.
pub struct Pipeline {
    resolver: Arc<dyn CoordinateResolver>,
    weather: Arc<dyn WeatherFetcher>,
    palette: Arc<dyn PaletteSource>,
    artifacts: Arc<dyn ArtifactSource>,
    cache: Arc<ArtifactCache>,
    request_timeout: Duration,
}

impl Pipeline {
    pub fn new(
        resolver: Arc<dyn CoordinateResolver>,
        weather: Arc<dyn WeatherFetcher>,
        palette: Arc<dyn PaletteSource>,
        artifacts: Arc<dyn ArtifactSource>,
        cache: Arc<ArtifactCache>,
    ) -> Self {
        Self {
            resolver,
            weather,
            palette,
            artifacts,
            cache,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn cache(&self) -> &Arc<ArtifactCache> {
        &self.cache
    }

    /// Run every stage for `city` and assemble the result.
    ///
    /// The first failing stage ends the run. Palette and image generation are
    /// spawned together and both awaited; when both fail the palette failure
    /// is reported. Spawned work is never cancelled, so an image that finishes
    /// after a sibling failure or a timeout still lands in the cache.
    #[tracing::instrument(skip(self), level = "info")]
    pub async fn run_pipeline(&self, city: &str) -> Result<PipelineResult, PipelineError> {
        let deadline = Instant::now() + self.request_timeout;
        let subject = city.trim();

        tracing::debug!(stage = %Stage::ResolvingCoordinates, "Entering stage");
        if subject.is_empty() {
            return Err(PipelineError::new(
                Stage::ResolvingCoordinates,
                PipelineFailure::NotFound(city.to_string()),
            ));
        }
        let coordinates = self
            .within(Stage::ResolvingCoordinates, deadline, self.resolver.resolve(subject))
            .await?;

        tracing::debug!(stage = %Stage::FetchingWeather, "Entering stage");
        let weather = self
            .within(
                Stage::FetchingWeather,
                deadline,
                self.weather.fetch(coordinates.latitude, coordinates.longitude),
            )
            .await?;

        tracing::debug!(stage = %Stage::DescribingWeather, "Entering stage");
        let description = weather.current.description().to_string();
        let forecast = weather
            .forecast
            .iter()
            .map(|day| ForecastDay {
                date: day.date,
                description: day.description().to_string(),
            })
            .collect();
        tracing::info!("{} weather: {}", subject, description);

        let palette_task: JoinHandle<Result<Palette, PipelineFailure>> = tokio::spawn({
            let source = self.palette.clone();
            let subject = subject.to_string();
            let conditions = weather.current.clone();
            let description = description.clone();
            async move {
                source
                    .palette(&subject, &conditions, &description)
                    .await
                    .map_err(PipelineFailure::from)
            }
        });
        let artifact_task = tokio::spawn(produce_artifact(
            self.artifacts.clone(),
            self.cache.clone(),
            subject.to_string(),
            description.clone(),
        ));

        let (palette, artifact) = tokio::join!(
            self.joined(Stage::GeneratingPalette, deadline, palette_task),
            self.joined(Stage::GeneratingArtifact, deadline, artifact_task),
        );
        let palette = palette?;
        let (artifact, cache_hit) = artifact?;

        tracing::info!(
            "Assembled result for {} ({})",
            subject,
            if cache_hit { "cached image" } else { "new image" }
        );

        Ok(PipelineResult {
            city: city.to_string(),
            coordinates,
            weather,
            description,
            forecast,
            palette,
            artifact,
            cache_hit,
        })
    }

    /// Await a stage future against the request deadline.
    async fn within<T, E>(
        &self,
        stage: Stage,
        deadline: Instant,
        fut: impl Future<Output = Result<T, E>>,
    ) -> Result<T, PipelineError>
    where
        E: Into<PipelineFailure>,
    {
        match tokio::time::timeout_at(deadline, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(self.failed(stage, e.into())),
            Err(_) => Err(self.failed(stage, PipelineFailure::Timeout(self.request_timeout))),
        }
    }

    /// Await a spawned stage against the request deadline. The task keeps
    /// running if the deadline passes first.
    async fn joined<T>(
        &self,
        stage: Stage,
        deadline: Instant,
        task: JoinHandle<Result<T, PipelineFailure>>,
    ) -> Result<T, PipelineError> {
        match tokio::time::timeout_at(deadline, task).await {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(failure))) => Err(self.failed(stage, failure)),
            Ok(Err(join_error)) => {
                Err(self.failed(stage, PipelineFailure::Task(join_error.to_string())))
            }
            Err(_) => Err(self.failed(stage, PipelineFailure::Timeout(self.request_timeout))),
        }
    }

    fn failed(&self, stage: Stage, cause: PipelineFailure) -> PipelineError {
        tracing::warn!("Pipeline failed while {}: {}", stage, cause);
        PipelineError { stage, cause }
    }
}

/// Cached image for (subject, description), generating and storing one on a
/// miss.
async fn produce_artifact(
    source: Arc<dyn ArtifactSource>,
    cache: Arc<ArtifactCache>,
    subject: String,
    description: String,
) -> Result<(ArtifactRef, bool), PipelineFailure> {
    let key = CacheKey::new(&subject, &description);

    if let Some(hit) = cache.lookup(&key).await? {
        return Ok((hit, true));
    }

    let bytes = source.generate(&subject, &description).await?;
    let stored = cache.store(&key, &bytes).await?;
    Ok((stored, false))
}
