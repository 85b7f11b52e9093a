//! Short-lived in-memory reuse of weather snapshots per location.

use crate::types::WeatherSnapshot;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Coordinates rounded to four decimals (about 11 m).
type LocationKey = (i64, i64);

fn location_key(latitude: f64, longitude: f64) -> LocationKey {
    (
        (latitude * 10_000.0).round() as i64,
        (longitude * 10_000.0).round() as i64,
    )
}

#[derive(Debug)]
struct CachedSnapshot {
    stored_at: Instant,
    snapshot: WeatherSnapshot,
}

/// Snapshot cache keyed by location.
///
/// Entries older than the TTL are ignored on read and dropped on the next write.
#[derive(Debug)]
pub struct WeatherCache {
    ttl: Duration,
    entries: Mutex<HashMap<LocationKey, CachedSnapshot>>,
}

impl WeatherCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, latitude: f64, longitude: f64) -> Option<WeatherSnapshot> {
        let entries = self.entries.lock();
        entries
            .get(&location_key(latitude, longitude))
            .filter(|entry| entry.stored_at.elapsed() < self.ttl)
            .map(|entry| entry.snapshot.clone())
    }

    pub fn insert(&self, latitude: f64, longitude: f64, snapshot: WeatherSnapshot) {
        if self.ttl.is_zero() {
            return;
        }

        let mut entries = self.entries.lock();
        let ttl = self.ttl;
        entries.retain(|_, entry| entry.stored_at.elapsed() < ttl);
        entries.insert(
            location_key(latitude, longitude),
            CachedSnapshot {
                stored_at: Instant::now(),
                snapshot,
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CurrentConditions;
    use chrono::Utc;

    fn snapshot(temperature: f64) -> WeatherSnapshot {
        WeatherSnapshot {
            current: CurrentConditions {
                temperature,
                precipitation: 0.0,
                cloud_cover: 10.0,
                wind_speed: 5.0,
                is_day: true,
                weather_code: 0,
            },
            forecast: Vec::new(),
            fetched_at: Utc::now(),
        }
    }

    #[test]
    fn test_hit_for_nearby_coordinates() {
        let cache = WeatherCache::new(Duration::from_secs(60));
        cache.insert(48.85661, 2.35222, snapshot(18.0));

        let hit = cache.get(48.856612, 2.352219).unwrap();
        assert_eq!(hit.current.temperature, 18.0);
        assert!(cache.get(51.5072, -0.1276).is_none());
    }

    #[test]
    fn test_zero_ttl_disables_cache() {
        let cache = WeatherCache::new(Duration::ZERO);
        cache.insert(1.0, 2.0, snapshot(1.0));
        assert!(cache.is_empty());
        assert!(cache.get(1.0, 2.0).is_none());
    }

    #[test]
    fn test_insert_replaces_entry() {
        let cache = WeatherCache::new(Duration::from_secs(60));
        cache.insert(1.0, 2.0, snapshot(1.0));
        cache.insert(1.0, 2.0, snapshot(2.0));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(1.0, 2.0).unwrap().current.temperature, 2.0);
    }
}
