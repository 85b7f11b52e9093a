//! Forward geocoding: convert a city name to coordinates.
//! Uses Nominatim (OpenStreetMap) - free, no API key required.

use crate::retry::{with_retry, RetryConfig};
use crate::types::{Coordinates, GeocodeError};
use async_trait::async_trait;
use reqwest::Client;
use sentient_core::{NetworkError, ReqwestErrorExt};
use serde::Deserialize;
use std::time::Duration;

const REQUEST_TIMEOUT_SECS: u64 = 10;

/// Resolves a city name to coordinates.
#[cfg_attr(any(test, feature = "mocks"), mockall::automock)]
#[async_trait]
pub trait CoordinateResolver: Send + Sync {
    async fn resolve(&self, city: &str) -> Result<Coordinates, GeocodeError>;
}

#[derive(Debug, Deserialize)]
struct NominatimPlace {
    lat: String,
    lon: String,
    display_name: Option<String>,
}

/// Nominatim search client
#[derive(Debug, Clone)]
pub struct NominatimGeocoder {
    client: Client,
    base_url: String,
    retry: RetryConfig,
}

impl NominatimGeocoder {
    pub fn new(base_url: &str, user_agent: &str, retry: RetryConfig) -> Result<Self, GeocodeError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .user_agent(user_agent)
            .build()
            .map_err(|e| GeocodeError::Network(e.into_network_error()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            retry,
        })
    }
}

#[async_trait]
impl CoordinateResolver for NominatimGeocoder {
    #[tracing::instrument(skip(self), level = "info")]
    async fn resolve(&self, city: &str) -> Result<Coordinates, GeocodeError> {
        let query = city.trim();
        if query.is_empty() {
            return Err(GeocodeError::NotFound(city.to_string()));
        }

        let url = format!("{}/search", self.base_url);
        let response = with_retry(&self.retry, || {
            self.client
                .get(&url)
                .query(&[("q", query), ("format", "json"), ("limit", "1")])
                .send()
        })
        .await
        .map_err(|e| GeocodeError::Network(e.into_network_error()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(GeocodeError::Network(NetworkError::ServerError {
                status: status.as_u16(),
                message,
            }));
        }

        let places: Vec<NominatimPlace> = response
            .json()
            .await
            .map_err(|e| GeocodeError::Parse(e.to_string()))?;

        let place = places
            .into_iter()
            .next()
            .ok_or_else(|| GeocodeError::NotFound(query.to_string()))?;

        let latitude = parse_degrees(&place.lat, "lat")?;
        let longitude = parse_degrees(&place.lon, "lon")?;

        tracing::info!("Resolved {} to {}, {}", query, latitude, longitude);
        Ok(Coordinates {
            latitude,
            longitude,
            display_name: place.display_name,
        })
    }
}

fn parse_degrees(raw: &str, field: &str) -> Result<f64, GeocodeError> {
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| GeocodeError::Parse(format!("invalid {}: {:?}", field, raw)))
}
