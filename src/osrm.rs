//! OSRM HTTP adapter for point-to-point routes.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::geo::Coordinate;
use crate::polyline::Polyline;
use crate::traits::{ProviderRoute, RouteProvider};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OsrmConfig {
    pub base_url: String,
    pub profile: String,
    pub timeout_secs: u64,
}

impl Default for OsrmConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5000".to_string(),
            profile: "car".to_string(),
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OsrmClient {
    config: OsrmConfig,
    client: reqwest::blocking::Client,
}

impl OsrmClient {
    pub fn new(config: OsrmConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self { config, client })
    }

    fn route_url(&self, origin: Coordinate, destination: Coordinate) -> String {
        format!(
            "{}/route/v1/{}/{:.6},{:.6};{:.6},{:.6}?overview=full&geometries=geojson",
            self.config.base_url.trim_end_matches('/'),
            self.config.profile,
            origin.lon,
            origin.lat,
            destination.lon,
            destination.lat
        )
    }
}

impl RouteProvider for OsrmClient {
    fn route(
        &self,
        origin: Coordinate,
        destination: Coordinate,
        timeout: Duration,
    ) -> Result<ProviderRoute, ProviderError> {
        let body = self
            .client
            .get(self.route_url(origin, destination))
            .timeout(timeout)
            .send()
            .and_then(|resp| resp.error_for_status())?
            .json::<OsrmRouteResponse>()?;

        parse_route(body)
    }
}

fn parse_route(body: OsrmRouteResponse) -> Result<ProviderRoute, ProviderError> {
    if body.code != "Ok" {
        return Err(ProviderError::Unavailable(format!(
            "OSRM returned code {}: {}",
            body.code,
            body.message.unwrap_or_default()
        )));
    }

    let route = body
        .routes
        .into_iter()
        .next()
        .ok_or_else(|| ProviderError::Malformed("response contained no routes".to_string()))?;

    let valid = |value: f64| value.is_finite() && value >= 0.0;
    if !valid(route.distance) || !valid(route.duration) {
        return Err(ProviderError::Malformed(format!(
            "invalid distance/duration: {} / {}",
            route.distance, route.duration
        )));
    }

    let geometry = route
        .geometry
        .map(|geometry| Polyline::from_lon_lat(&geometry.coordinates))
        .unwrap_or_else(|| Polyline::new(Vec::new()));

    Ok(ProviderRoute {
        distance_m: route.distance,
        duration_s: route.duration,
        geometry,
    })
}

#[derive(Debug, Deserialize)]
struct OsrmRouteResponse {
    code: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    routes: Vec<OsrmRoute>,
}

#[derive(Debug, Deserialize)]
struct OsrmRoute {
    distance: f64,
    duration: f64,
    #[serde(default)]
    geometry: Option<OsrmGeometry>,
}

#[derive(Debug, Deserialize)]
struct OsrmGeometry {
    coordinates: Vec<[f64; 2]>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> Result<ProviderRoute, ProviderError> {
        parse_route(serde_json::from_str(json).unwrap())
    }

    #[test]
    fn parses_route_body() {
        let route = parse(
            r#"{"code":"Ok","routes":[{"distance":1520.4,"duration":212.7,
                "geometry":{"type":"LineString","coordinates":[[-115.17,36.11],[-115.16,36.12]]}}]}"#,
        )
        .unwrap();
        assert_eq!(route.distance_m, 1520.4);
        assert_eq!(route.duration_s, 212.7);
        assert_eq!(route.geometry.points().len(), 2);
        assert_eq!(route.geometry.points()[0].lat, 36.11);
    }

    #[test]
    fn rejects_error_code() {
        let err = parse(r#"{"code":"NoRoute","message":"Impossible route"}"#).unwrap_err();
        assert!(matches!(err, ProviderError::Unavailable(_)));
    }

    #[test]
    fn rejects_empty_routes() {
        let err = parse(r#"{"code":"Ok","routes":[]}"#).unwrap_err();
        assert!(matches!(err, ProviderError::Malformed(_)));
    }

    #[test]
    fn rejects_negative_duration() {
        let err = parse(r#"{"code":"Ok","routes":[{"distance":10.0,"duration":-1.0}]}"#).unwrap_err();
        assert!(matches!(err, ProviderError::Malformed(_)));
    }

    #[test]
    fn formats_lon_lat_url() {
        let client = OsrmClient::new(OsrmConfig {
            base_url: "http://osrm:5000/".to_string(),
            ..OsrmConfig::default()
        })
        .unwrap();
        let url = client.route_url(
            Coordinate::new(36.1147, -115.1728).unwrap(),
            Coordinate::new(36.1727, -115.158).unwrap(),
        );
        assert_eq!(
            url,
            "http://osrm:5000/route/v1/car/-115.172800,36.114700;-115.158000,36.172700?overview=full&geometries=geojson"
        );
    }
}
