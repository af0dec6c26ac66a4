//! Polyline representation for leg geometries.
//!
//! Geometries are held as decoded coordinate sequences. Wire formats (OSRM
//! GeoJSON `[lon, lat]` pairs) are converted at the boundary.

use serde::{Deserialize, Serialize};

use crate::geo::Coordinate;

/// A leg geometry as decoded coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Polyline {
    points: Vec<Coordinate>,
}

impl Polyline {
    pub fn new(points: Vec<Coordinate>) -> Self {
        Self { points }
    }

    /// Builds a polyline from GeoJSON `[lon, lat]` positions, dropping
    /// positions that are not valid coordinates.
    pub fn from_lon_lat(positions: &[[f64; 2]]) -> Self {
        let points = positions
            .iter()
            .filter_map(|[lon, lat]| Coordinate::new(*lat, *lon).ok())
            .collect();
        Self { points }
    }

    pub fn points(&self) -> &[Coordinate] {
        &self.points
    }

    pub fn into_points(self) -> Vec<Coordinate> {
        self.points
    }

    /// Sum of segment lengths in meters.
    pub fn length_m(&self) -> f64 {
        self.points
            .windows(2)
            .map(|pair| pair[0].distance_m(&pair[1]))
            .sum()
    }

    /// The point halfway along the line, measured by length.
    ///
    /// Returns `None` for an empty polyline.
    pub fn midpoint(&self) -> Option<Coordinate> {
        let first = *self.points.first()?;
        let half = self.length_m() / 2.0;
        if half <= 0.0 {
            return Some(first);
        }

        let mut walked = 0.0;
        for pair in self.points.windows(2) {
            let segment = pair[0].distance_m(&pair[1]);
            if walked + segment >= half && segment > 0.0 {
                return Some(pair[0].lerp(&pair[1], (half - walked) / segment));
            }
            walked += segment;
        }
        self.points.last().copied()
    }
}
