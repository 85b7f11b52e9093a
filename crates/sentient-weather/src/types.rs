use chrono::{DateTime, NaiveDate, Utc};
use sentient_core::NetworkError;
use serde::{Deserialize, Serialize};

/// Description used for codes outside the WMO table.
pub const UNKNOWN_WEATHER: &str = "Unknown";

/// Map a WMO weather code to a human-readable description.
/// See: https://open-meteo.com/en/docs#weathervariables
///
/// Unrecognised codes map to [`UNKNOWN_WEATHER`] so forecast rendering never
/// fails on a code added upstream.
pub fn describe_weather_code(code: i32) -> &'static str {
    match code {
        0 => "Clear sky",
        1 => "Mainly clear",
        2 => "Partly cloudy",
        3 => "Overcast",
        45 => "Fog",
        48 => "Depositing rime fog",
        51 => "Light drizzle",
        53 => "Moderate drizzle",
        55 => "Dense drizzle",
        56 => "Light freezing drizzle",
        57 => "Dense freezing drizzle",
        61 => "Slight rain",
        63 => "Moderate rain",
        65 => "Heavy rain",
        66 => "Light freezing rain",
        67 => "Heavy freezing rain",
        71 => "Slight snow fall",
        73 => "Moderate snow fall",
        75 => "Heavy snow fall",
        77 => "Snow grains",
        80 => "Slight rain showers",
        81 => "Moderate rain showers",
        82 => "Violent rain showers",
        85 => "Slight snow showers",
        86 => "Heavy snow showers",
        95 => "Thunderstorm",
        96 => "Thunderstorm with slight hail",
        99 => "Thunderstorm with heavy hail",
        _ => UNKNOWN_WEATHER,
    }
}

/// Open-Meteo reports codes as floats (`3.0`); round them to the integer code.
/// Non-finite values become `-1`, which describes as unknown.
pub fn weather_code_from_f64(value: f64) -> i32 {
    if value.is_finite() && value >= f64::from(i32::MIN) && value <= f64::from(i32::MAX) {
        value.round() as i32
    } else {
        -1
    }
}

/// Geographic coordinates of a resolved city
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
    /// Full place name reported by the geocoder, if any
    pub display_name: Option<String>,
}

impl Coordinates {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            display_name: None,
        }
    }
}

/// Current weather conditions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentConditions {
    /// Degrees Celsius
    pub temperature: f64,
    /// Millimetres
    pub precipitation: f64,
    /// Percent
    pub cloud_cover: f64,
    /// km/h
    pub wind_speed: f64,
    pub is_day: bool,
    pub weather_code: i32,
}

impl CurrentConditions {
    pub fn description(&self) -> &'static str {
        describe_weather_code(self.weather_code)
    }
}

/// Daily forecast entry
///
/// Open-Meteo leaves individual values null when a model has no data for that
/// day, so every measurement is optional.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyForecast {
    pub date: NaiveDate,
    pub weather_code: Option<i32>,
    pub temperature_max: Option<f64>,
    pub temperature_min: Option<f64>,
    pub precipitation_sum: Option<f64>,
    pub precipitation_hours: Option<f64>,
    pub precipitation_probability: Option<f64>,
    pub wind_speed_max: Option<f64>,
}

impl DailyForecast {
    pub fn description(&self) -> &'static str {
        self.weather_code
            .map(describe_weather_code)
            .unwrap_or(UNKNOWN_WEATHER)
    }
}

/// Current conditions plus the daily forecast, ordered by date ascending.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherSnapshot {
    pub current: CurrentConditions,
    pub forecast: Vec<DailyForecast>,
    pub fetched_at: DateTime<Utc>,
}

/// Geocoding errors
#[derive(Debug, thiserror::Error)]
pub enum GeocodeError {
    #[error("City not found: {0}")]
    NotFound(String),
    #[error("Network error: {0}")]
    Network(#[from] NetworkError),
    #[error("Parse error: {0}")]
    Parse(String),
}

impl GeocodeError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "City not found. Check the spelling and try again.",
            Self::Network(e) => e.user_message(),
            Self::Parse(_) => "The location service returned an unexpected response.",
        }
    }
}

/// Weather provider errors
#[derive(Debug, thiserror::Error)]
pub enum WeatherError {
    #[error("Network error: {0}")]
    Network(#[from] NetworkError),
    #[error("Parse error: {0}")]
    Parse(String),
}

impl WeatherError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Network(e) => e.user_message(),
            Self::Parse(_) => "The weather service returned an unexpected response.",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wmo_code_clear() {
        assert_eq!(describe_weather_code(0), "Clear sky");
    }

    #[test]
    fn test_wmo_code_cloud_levels() {
        assert_eq!(describe_weather_code(1), "Mainly clear");
        assert_eq!(describe_weather_code(2), "Partly cloudy");
        assert_eq!(describe_weather_code(3), "Overcast");
    }

    #[test]
    fn test_wmo_code_precipitation() {
        assert_eq!(describe_weather_code(55), "Dense drizzle");
        assert_eq!(describe_weather_code(63), "Moderate rain");
        assert_eq!(describe_weather_code(67), "Heavy freezing rain");
        assert_eq!(describe_weather_code(77), "Snow grains");
        assert_eq!(describe_weather_code(82), "Violent rain showers");
    }

    #[test]
    fn test_wmo_code_thunderstorm() {
        assert_eq!(describe_weather_code(95), "Thunderstorm");
        assert_eq!(describe_weather_code(96), "Thunderstorm with slight hail");
        assert_eq!(describe_weather_code(99), "Thunderstorm with heavy hail");
    }

    #[test]
    fn test_wmo_code_unknown() {
        assert_eq!(describe_weather_code(4), UNKNOWN_WEATHER);
        assert_eq!(describe_weather_code(999), UNKNOWN_WEATHER);
        assert_eq!(describe_weather_code(-1), UNKNOWN_WEATHER);
    }

    #[test]
    fn test_weather_code_from_float() {
        assert_eq!(weather_code_from_f64(3.0), 3);
        assert_eq!(weather_code_from_f64(60.9), 61);
        assert_eq!(weather_code_from_f64(f64::NAN), -1);
        assert_eq!(describe_weather_code(weather_code_from_f64(f64::INFINITY)), UNKNOWN_WEATHER);
    }

    #[test]
    fn test_daily_description_without_code() {
        let day = DailyForecast {
            date: NaiveDate::from_ymd_opt(2026, 10, 18).unwrap(),
            weather_code: None,
            temperature_max: Some(14.0),
            temperature_min: Some(6.0),
            precipitation_sum: None,
            precipitation_hours: None,
            precipitation_probability: None,
            wind_speed_max: None,
        };
        assert_eq!(day.description(), UNKNOWN_WEATHER);
    }

    #[test]
    fn test_geocode_not_found_message() {
        let err = GeocodeError::NotFound("Atlantis".into());
        assert!(err.to_string().contains("Atlantis"));
        assert!(err.user_message().contains("City not found"));
    }
}
