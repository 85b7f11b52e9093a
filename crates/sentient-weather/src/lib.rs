//! Weather lookup for Sentient
//!
//! Forward geocoding via Nominatim, current conditions and daily forecast via
//! Open-Meteo, and the WMO weather code table.

pub mod cache;
pub mod geocode;
pub mod provider;
pub mod retry;
pub mod types;

pub use cache::WeatherCache;
pub use geocode::{CoordinateResolver, NominatimGeocoder};
pub use provider::{WeatherFetcher, WeatherProvider};
pub use retry::RetryConfig;
pub use types::*;

#[cfg(any(test, feature = "mocks"))]
pub use geocode::MockCoordinateResolver;
#[cfg(any(test, feature = "mocks"))]
pub use provider::MockWeatherFetcher;
