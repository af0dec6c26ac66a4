//! Coordinates and zone cells.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::PlannerError;
use crate::haversine::haversine_km;

/// Size of a learner zone cell in degrees (roughly 1 km at mid latitudes).
pub const ZONE_CELL_DEG: f64 = 0.01;

/// A validated WGS84 position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lat: f64,
    pub lon: f64,
}

impl Coordinate {
    /// Builds a coordinate, rejecting non-finite or out-of-range values.
    pub fn new(lat: f64, lon: f64) -> Result<Self, PlannerError> {
        let coordinate = Self { lat, lon };
        coordinate.validate()?;
        Ok(coordinate)
    }

    /// Checks the ±90 / ±180 ranges. Deserialised values go through here.
    pub fn validate(&self) -> Result<(), PlannerError> {
        if !self.lat.is_finite() || !(-90.0..=90.0).contains(&self.lat) {
            return Err(PlannerError::invalid(format!("latitude out of range: {}", self.lat)));
        }
        if !self.lon.is_finite() || !(-180.0..=180.0).contains(&self.lon) {
            return Err(PlannerError::invalid(format!("longitude out of range: {}", self.lon)));
        }
        Ok(())
    }

    /// Great-circle distance in meters.
    pub fn distance_m(&self, other: &Coordinate) -> f64 {
        haversine_km((self.lat, self.lon), (other.lat, other.lon)) * 1000.0
    }

    /// Linear interpolation between two points. Fine for leg-sized spans.
    pub fn lerp(&self, other: &Coordinate, t: f64) -> Coordinate {
        Coordinate {
            lat: self.lat + (other.lat - self.lat) * t,
            lon: self.lon + (other.lon - self.lon) * t,
        }
    }

    /// The learner zone containing this point.
    pub fn zone(&self) -> ZoneId {
        ZoneId {
            lat_cell: (self.lat / ZONE_CELL_DEG).floor() as i32,
            lon_cell: (self.lon / ZONE_CELL_DEG).floor() as i32,
        }
    }
}

/// Grid cell identifier used to key zone-level risk adjustments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ZoneId {
    pub lat_cell: i32,
    pub lon_cell: i32,
}

impl fmt::Display for ZoneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "z{}_{}", self.lat_cell, self.lon_cell)
    }
}
