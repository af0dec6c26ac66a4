//! Great-circle leg estimates (fallback when the routing provider fails).
//!
//! Uses straight-line distance and an assumed speed. Less accurate than a
//! road network route but always available.

use crate::geo::Coordinate;
use crate::polyline::Polyline;

/// Average travel speed assumption for time estimation.
pub const DEFAULT_SPEED_KMH: f64 = 40.0;

/// Earth radius in kilometers.
const EARTH_RADIUS_KM: f64 = 6371.0;

/// Haversine distance between two (lat, lng) points in kilometers.
pub fn haversine_km(from: (f64, f64), to: (f64, f64)) -> f64 {
    let (lat1, lng1) = from;
    let (lat2, lng2) = to;

    let lat1_rad = lat1.to_radians();
    let lat2_rad = lat2.to_radians();
    let delta_lat = (lat2 - lat1).to_radians();
    let delta_lng = (lng2 - lng1).to_radians();

    let a = (delta_lat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (delta_lng / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().min(1.0).asin();

    EARTH_RADIUS_KM * c
}

/// A distance/duration pair produced without the provider.
#[derive(Debug, Clone, PartialEq)]
pub struct Estimate {
    pub distance_m: f64,
    pub duration_s: f64,
    pub geometry: Polyline,
}

/// Produces degraded leg estimates from great-circle distance.
#[derive(Debug, Clone)]
pub struct HaversineEstimator {
    /// Assumed average speed in km/h.
    pub speed_kmh: f64,
}

impl Default for HaversineEstimator {
    fn default() -> Self {
        Self {
            speed_kmh: DEFAULT_SPEED_KMH,
        }
    }
}

impl HaversineEstimator {
    pub fn new(speed_kmh: f64) -> Self {
        let speed_kmh = if speed_kmh.is_finite() && speed_kmh > 0.0 {
            speed_kmh
        } else {
            DEFAULT_SPEED_KMH
        };
        Self { speed_kmh }
    }

    /// Convert distance in km to travel time in seconds.
    fn km_to_seconds(&self, km: f64) -> f64 {
        let hours = km / self.speed_kmh;
        (hours * 3600.0).round()
    }

    /// Straight-line estimate between two coordinates.
    pub fn estimate(&self, origin: Coordinate, destination: Coordinate) -> Estimate {
        let km = haversine_km((origin.lat, origin.lon), (destination.lat, destination.lon));
        Estimate {
            distance_m: (km * 1000.0).round(),
            duration_s: self.km_to_seconds(km),
            geometry: Polyline::new(vec![origin, destination]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_haversine_same_point() {
        let dist = haversine_km((36.1, -115.1), (36.1, -115.1));
        assert!(dist < 0.001, "Same point should have ~0 distance");
    }

    #[test]
    fn test_haversine_known_distance() {
        // Las Vegas (36.17, -115.14) to Los Angeles (34.05, -118.24)
        // Actual distance ~370 km
        let dist = haversine_km((36.17, -115.14), (34.05, -118.24));
        assert!(dist > 350.0 && dist < 400.0, "LV to LA should be ~370km, got {}", dist);
    }

    #[test]
    fn test_estimate_symmetric() {
        let estimator = HaversineEstimator::default();
        let a = Coordinate::new(36.1, -115.1).unwrap();
        let b = Coordinate::new(36.2, -115.2).unwrap();
        let forward = estimator.estimate(a, b);
        let back = estimator.estimate(b, a);
        assert_eq!(forward.distance_m, back.distance_m);
        assert_eq!(forward.duration_s, back.duration_s);
        assert_eq!(forward.geometry.points(), &[a, b]);
    }

    #[test]
    fn test_reasonable_travel_time() {
        let estimator = HaversineEstimator::new(40.0); // 40 km/h
        // 10 km at 40 km/h = 0.25 hours = 900 seconds
        assert_eq!(estimator.km_to_seconds(10.0), 900.0);
    }

    #[test]
    fn test_invalid_speed_falls_back() {
        assert_eq!(HaversineEstimator::new(0.0).speed_kmh, DEFAULT_SPEED_KMH);
        assert_eq!(HaversineEstimator::new(f64::NAN).speed_kmh, DEFAULT_SPEED_KMH);
    }
}
