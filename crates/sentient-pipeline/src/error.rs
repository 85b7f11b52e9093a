use sentient_artifacts::CacheError;
use sentient_studio::{GenerationError, PaletteError};
use sentient_weather::{GeocodeError, WeatherError};
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Pipeline stages, in execution order. Palette and artifact generation run
/// side by side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Stage {
    ResolvingCoordinates,
    FetchingWeather,
    DescribingWeather,
    GeneratingPalette,
    GeneratingArtifact,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::ResolvingCoordinates => "resolving coordinates",
            Stage::FetchingWeather => "fetching weather",
            Stage::DescribingWeather => "describing weather",
            Stage::GeneratingPalette => "generating palette",
            Stage::GeneratingArtifact => "generating artifact",
        };
        f.write_str(name)
    }
}

/// Why a stage failed.
#[derive(Debug, Error)]
pub enum PipelineFailure {
    #[error("City not found: {0}")]
    NotFound(String),

    #[error("Geocoding failed: {0}")]
    Geocode(#[source] GeocodeError),

    #[error("Weather fetch failed: {0}")]
    Fetch(#[from] WeatherError),

    #[error("Palette response was malformed: {0}")]
    PaletteParse(#[source] PaletteError),

    #[error("Palette service failed: {0}")]
    PaletteService(#[source] PaletteError),

    #[error("Image generation failed: {0}")]
    Generation(#[from] GenerationError),

    #[error("Image cache failed: {0}")]
    CacheIo(#[from] CacheError),

    #[error("Request budget of {0:?} exhausted")]
    Timeout(Duration),

    #[error("Stage task failed: {0}")]
    Task(String),
}

impl From<GeocodeError> for PipelineFailure {
    fn from(e: GeocodeError) -> Self {
        match e {
            GeocodeError::NotFound(city) => Self::NotFound(city),
            other => Self::Geocode(other),
        }
    }
}

impl From<PaletteError> for PipelineFailure {
    fn from(e: PaletteError) -> Self {
        match e {
            PaletteError::Parse(_) => Self::PaletteParse(e),
            PaletteError::Service(_) => Self::PaletteService(e),
        }
    }
}

impl PipelineFailure {
    /// User-friendly error message for UI display.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "City not found. Check the spelling and try again.",
            Self::Geocode(e) => e.user_message(),
            Self::Fetch(e) => e.user_message(),
            Self::PaletteParse(e) | Self::PaletteService(e) => e.user_message(),
            Self::Generation(e) => e.user_message(),
            Self::CacheIo(e) => e.user_message(),
            Self::Timeout(_) => "The request took too long. Please try again.",
            Self::Task(_) => "Something went wrong. Please try again.",
        }
    }
}

/// A failed run: the stage that failed and why.
#[derive(Debug, Error)]
#[error("Pipeline failed while {stage}: {cause}")]
pub struct PipelineError {
    pub stage: Stage,
    #[source]
    pub cause: PipelineFailure,
}

impl PipelineError {
    pub fn new(stage: Stage, cause: impl Into<PipelineFailure>) -> Self {
        Self {
            stage,
            cause: cause.into(),
        }
    }

    pub fn user_message(&self) -> &'static str {
        self.cause.user_message()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sentient_core::NetworkError;

    #[test]
    fn test_geocode_not_found_maps_to_not_found() {
        let failure: PipelineFailure = GeocodeError::NotFound("Atlantis".into()).into();
        assert!(matches!(failure, PipelineFailure::NotFound(ref c) if c == "Atlantis"));

        let failure: PipelineFailure = GeocodeError::Network(NetworkError::Timeout).into();
        assert!(matches!(failure, PipelineFailure::Geocode(_)));
    }

    #[test]
    fn test_palette_errors_split_by_kind() {
        let failure: PipelineFailure = PaletteError::Parse("no JSON".into()).into();
        assert!(matches!(failure, PipelineFailure::PaletteParse(_)));

        let failure: PipelineFailure = PaletteError::Service(NetworkError::Timeout).into();
        assert!(matches!(failure, PipelineFailure::PaletteService(_)));
    }

    #[test]
    fn test_error_display_names_stage() {
        let err = PipelineError::new(
            Stage::FetchingWeather,
            WeatherError::Parse("bad daily block".into()),
        );
        let text = err.to_string();
        assert!(text.contains("fetching weather"));
        assert!(text.contains("bad daily block"));
        assert_eq!(err.user_message(), "The weather service returned an unexpected response.");
    }
}
