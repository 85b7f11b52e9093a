//! Open-Meteo forecast client.

use crate::cache::WeatherCache;
use crate::retry::{with_retry, RetryConfig};
use crate::types::{
    weather_code_from_f64, CurrentConditions, DailyForecast, WeatherError, WeatherSnapshot,
};
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use reqwest::Client;
use sentient_core::{NetworkError, ReqwestErrorExt};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

const REQUEST_TIMEOUT_SECS: u64 = 10;

const CURRENT_FIELDS: &str =
    "temperature_2m,is_day,precipitation,weather_code,cloud_cover,wind_speed_10m";
const DAILY_FIELDS: &str = "weather_code,temperature_2m_max,temperature_2m_min,precipitation_sum,\
precipitation_hours,precipitation_probability_max,wind_speed_10m_max";

/// Fetches current conditions and the daily forecast for a location.
#[cfg_attr(any(test, feature = "mocks"), mockall::automock)]
#[async_trait]
pub trait WeatherFetcher: Send + Sync {
    async fn fetch(&self, latitude: f64, longitude: f64) -> Result<WeatherSnapshot, WeatherError>;
}

#[derive(Debug, Deserialize)]
struct ForecastResponse {
    current: CurrentBlock,
    daily: DailyBlock,
}

#[derive(Debug, Deserialize)]
struct CurrentBlock {
    temperature_2m: f64,
    is_day: f64,
    precipitation: f64,
    weather_code: f64,
    cloud_cover: f64,
    wind_speed_10m: f64,
}

#[derive(Debug, Deserialize)]
struct DailyBlock {
    time: Vec<String>,
    weather_code: Vec<Option<f64>>,
    temperature_2m_max: Vec<Option<f64>>,
    temperature_2m_min: Vec<Option<f64>>,
    precipitation_sum: Vec<Option<f64>>,
    precipitation_hours: Vec<Option<f64>>,
    precipitation_probability_max: Vec<Option<f64>>,
    wind_speed_10m_max: Vec<Option<f64>>,
}

impl ForecastResponse {
    fn into_snapshot(self) -> Result<WeatherSnapshot, WeatherError> {
        let current = CurrentConditions {
            temperature: self.current.temperature_2m,
            precipitation: self.current.precipitation,
            cloud_cover: self.current.cloud_cover,
            wind_speed: self.current.wind_speed_10m,
            is_day: self.current.is_day >= 0.5,
            weather_code: weather_code_from_f64(self.current.weather_code),
        };

        let daily = self.daily;
        let days = daily.time.len();
        let columns = [
            ("weather_code", daily.weather_code.len()),
            ("temperature_2m_max", daily.temperature_2m_max.len()),
            ("temperature_2m_min", daily.temperature_2m_min.len()),
            ("precipitation_sum", daily.precipitation_sum.len()),
            ("precipitation_hours", daily.precipitation_hours.len()),
            ("precipitation_probability_max", daily.precipitation_probability_max.len()),
            ("wind_speed_10m_max", daily.wind_speed_10m_max.len()),
        ];
        if let Some((name, len)) = columns.iter().find(|(_, len)| *len != days) {
            return Err(WeatherError::Parse(format!(
                "daily.{} has {} values for {} days",
                name, len, days
            )));
        }

        let mut forecast = Vec::with_capacity(days);
        for (i, raw_date) in daily.time.iter().enumerate() {
            let date = NaiveDate::parse_from_str(raw_date, "%Y-%m-%d")
                .map_err(|e| WeatherError::Parse(format!("daily.time {:?}: {}", raw_date, e)))?;

            forecast.push(DailyForecast {
                date,
                weather_code: daily.weather_code[i].map(weather_code_from_f64),
                temperature_max: daily.temperature_2m_max[i],
                temperature_min: daily.temperature_2m_min[i],
                precipitation_sum: daily.precipitation_sum[i],
                precipitation_hours: daily.precipitation_hours[i],
                precipitation_probability: daily.precipitation_probability_max[i],
                wind_speed_max: daily.wind_speed_10m_max[i],
            });
        }
        forecast.sort_by_key(|day| day.date);

        Ok(WeatherSnapshot {
            current,
            forecast,
            fetched_at: Utc::now(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct WeatherProvider {
    client: Client,
    base_url: String,
    retry: RetryConfig,
    cache: Option<Arc<WeatherCache>>,
}

impl WeatherProvider {
    pub fn new(base_url: &str, retry: RetryConfig) -> Result<Self, WeatherError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| WeatherError::Network(e.into_network_error()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            retry,
            cache: None,
        })
    }

    /// Reuse snapshots from `cache` for repeated lookups of the same location.
    pub fn with_cache(mut self, cache: Arc<WeatherCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    async fn fetch_remote(&self, latitude: f64, longitude: f64) -> Result<WeatherSnapshot, WeatherError> {
        let url = format!("{}/v1/forecast", self.base_url);
        let lat = latitude.to_string();
        let lon = longitude.to_string();

        let response = with_retry(&self.retry, || {
            self.client
                .get(&url)
                .query(&[
                    ("latitude", lat.as_str()),
                    ("longitude", lon.as_str()),
                    ("current", CURRENT_FIELDS),
                    ("daily", DAILY_FIELDS),
                    ("timezone", "auto"),
                ])
                .send()
        })
        .await
        .map_err(|e| WeatherError::Network(e.into_network_error()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(WeatherError::Network(NetworkError::ServerError {
                status: status.as_u16(),
                message,
            }));
        }

        let body: ForecastResponse = response
            .json()
            .await
            .map_err(|e| WeatherError::Parse(e.to_string()))?;

        body.into_snapshot()
    }
}

#[async_trait]
impl WeatherFetcher for WeatherProvider {
    #[tracing::instrument(skip(self), level = "info")]
    async fn fetch(&self, latitude: f64, longitude: f64) -> Result<WeatherSnapshot, WeatherError> {
        if let Some(snapshot) = self.cache.as_ref().and_then(|c| c.get(latitude, longitude)) {
            tracing::debug!("Using cached weather snapshot");
            return Ok(snapshot);
        }

        let snapshot = self.fetch_remote(latitude, longitude).await?;
        tracing::info!(
            "Fetched weather: code {} with {} forecast days",
            snapshot.current.weather_code,
            snapshot.forecast.len()
        );

        if let Some(cache) = &self.cache {
            cache.insert(latitude, longitude, snapshot.clone());
        }
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_body() -> serde_json::Value {
        serde_json::json!({
            "current": {
                "time": "2026-10-18T12:00",
                "interval": 900,
                "temperature_2m": 17.4,
                "is_day": 1,
                "precipitation": 0.0,
                "weather_code": 0,
                "cloud_cover": 12,
                "wind_speed_10m": 9.7
            },
            "daily": {
                "time": ["2026-10-19", "2026-10-18"],
                "weather_code": [61, 0],
                "temperature_2m_max": [15.0, 19.2],
                "temperature_2m_min": [9.1, 8.4],
                "precipitation_sum": [4.2, 0.0],
                "precipitation_hours": [5.0, 0.0],
                "precipitation_probability_max": [80, null],
                "wind_speed_10m_max": [22.0, 14.3]
            }
        })
    }

    #[test]
    fn test_snapshot_from_response() {
        let body: ForecastResponse = serde_json::from_value(sample_body()).unwrap();
        let snapshot = body.into_snapshot().unwrap();

        assert_eq!(snapshot.current.weather_code, 0);
        assert!(snapshot.current.is_day);
        assert_eq!(snapshot.current.description(), "Clear sky");

        // Sorted ascending by date
        assert_eq!(snapshot.forecast.len(), 2);
        assert_eq!(snapshot.forecast[0].date, NaiveDate::from_ymd_opt(2026, 10, 18).unwrap());
        assert_eq!(snapshot.forecast[0].precipitation_probability, None);
        assert_eq!(snapshot.forecast[1].description(), "Slight rain");
    }

    #[test]
    fn test_mismatched_daily_columns_rejected() {
        let mut body = sample_body();
        body["daily"]["temperature_2m_min"] = serde_json::json!([9.1]);
        let body: ForecastResponse = serde_json::from_value(body).unwrap();

        let err = body.into_snapshot().unwrap_err();
        assert!(matches!(err, WeatherError::Parse(ref m) if m.contains("temperature_2m_min")));
    }

    #[test]
    fn test_bad_date_rejected() {
        let mut body = sample_body();
        body["daily"]["time"] = serde_json::json!(["tomorrow", "2026-10-18"]);
        let body: ForecastResponse = serde_json::from_value(body).unwrap();
        assert!(matches!(body.into_snapshot(), Err(WeatherError::Parse(_))));
    }
}
