//! Conversion of legs and rider context into classifier features.
//!
//! Layout of [`RiskFeatureVector`] (schema version 1):
//!
//! | index | feature                              | range   |
//! |-------|--------------------------------------|---------|
//! | 0     | incident density near leg midpoint   | [0, 1]  |
//! | 1     | sin(2π · day fraction)               | [-1, 1] |
//! | 2     | cos(2π · day fraction)               | [-1, 1] |
//! | 3     | night flag (20:00–05:59)             | {0, 1}  |
//! | 4..=7 | rider attribute one-hot              | {0, 1}  |
//! | 8     | leg length / 20 km, capped           | [0, 1]  |
//!
//! Changing the layout requires bumping [`FEATURE_SCHEMA_VERSION`]; stored
//! models with a different version are rejected.

use std::f64::consts::TAU;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ClassifierError;
use crate::model::{Leg, RiderContext};
use crate::traits::IncidentSource;

pub const FEATURE_LEN: usize = 9;
pub const FEATURE_SCHEMA_VERSION: u32 = 1;

pub const IDX_DENSITY: usize = 0;
pub const IDX_TIME_SIN: usize = 1;
pub const IDX_TIME_COS: usize = 2;
pub const IDX_NIGHT: usize = 3;
pub const IDX_RIDER: usize = 4;
pub const IDX_LENGTH: usize = 8;

/// Leg length that saturates the length feature.
const LENGTH_SATURATION_M: f64 = 20_000.0;

/// Normalized classifier input. Every component is finite and in `[-1, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "[f64; 9]", into = "[f64; 9]")]
pub struct RiskFeatureVector([f64; FEATURE_LEN]);

impl RiskFeatureVector {
    pub fn new(values: [f64; FEATURE_LEN]) -> Result<Self, ClassifierError> {
        for (index, value) in values.iter().enumerate() {
            if !value.is_finite() || !(-1.0..=1.0).contains(value) {
                return Err(ClassifierError::FeatureOutOfRange { index, value: *value });
            }
        }
        Ok(Self(values))
    }

    /// Assembles a vector from its semantic parts. Inputs are clamped, so the
    /// result always satisfies the range invariant.
    pub fn from_parts(density: f64, context: RiderContext, length_m: f64) -> Self {
        let angle = TAU * context.time_of_day.day_fraction();
        let mut values = [0.0; FEATURE_LEN];
        values[IDX_DENSITY] = clamp_unit(density);
        values[IDX_TIME_SIN] = angle.sin().clamp(-1.0, 1.0);
        values[IDX_TIME_COS] = angle.cos().clamp(-1.0, 1.0);
        values[IDX_NIGHT] = if context.time_of_day.is_night() { 1.0 } else { 0.0 };
        values[IDX_RIDER + context.rider.index()] = 1.0;
        values[IDX_LENGTH] = clamp_unit(length_m / LENGTH_SATURATION_M);
        Self(values)
    }

    pub fn values(&self) -> &[f64; FEATURE_LEN] {
        &self.0
    }

    pub fn density(&self) -> f64 {
        self.0[IDX_DENSITY]
    }
}

impl TryFrom<[f64; FEATURE_LEN]> for RiskFeatureVector {
    type Error = ClassifierError;

    fn try_from(values: [f64; FEATURE_LEN]) -> Result<Self, Self::Error> {
        Self::new(values)
    }
}

impl From<RiskFeatureVector> for [f64; FEATURE_LEN] {
    fn from(vector: RiskFeatureVector) -> Self {
        vector.0
    }
}

fn clamp_unit(value: f64) -> f64 {
    if value.is_finite() { value.clamp(0.0, 1.0) } else { 0.0 }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    /// Radius around the leg midpoint searched for incidents.
    pub incident_radius_m: f64,
    /// Incident count mapped to density 1.0.
    pub density_saturation: f64,
    /// Density used when the dataset has no coverage.
    pub default_density_prior: f64,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            incident_radius_m: 500.0,
            density_saturation: 25.0,
            default_density_prior: 0.2,
        }
    }
}

/// Builds [`RiskFeatureVector`]s for legs.
#[derive(Clone)]
pub struct RiskFeatureExtractor {
    incidents: Arc<dyn IncidentSource>,
    config: FeatureConfig,
}

impl RiskFeatureExtractor {
    pub fn new(incidents: Arc<dyn IncidentSource>, config: FeatureConfig) -> Self {
        Self { incidents, config }
    }

    pub fn extract(&self, leg: &Leg, context: RiderContext) -> RiskFeatureVector {
        let midpoint = leg.midpoint();
        let density = match self.incidents.incidents_near(midpoint, self.config.incident_radius_m) {
            Some(count) => count as f64 / self.config.density_saturation.max(1.0),
            None => {
                debug!(
                    zone = %midpoint.zone(),
                    prior = self.config.default_density_prior,
                    "no historical incident data, using default prior"
                );
                self.config.default_density_prior
            }
        };
        RiskFeatureVector::from_parts(density, context, leg.distance_m)
    }
}
