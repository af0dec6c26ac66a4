//! Seams to the external collaborators of the engine.
//!
//! The planner depends only on these traits; the OSRM client, incident grid
//! and artifact stores in this crate are default implementations.

use std::time::Duration;

use crate::classifier::ClassifierModel;
use crate::error::{ArtifactError, ProviderError};
use crate::geo::Coordinate;
use crate::polyline::Polyline;

/// A route returned by the external provider.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderRoute {
    pub distance_m: f64,
    pub duration_s: f64,
    pub geometry: Polyline,
}

/// External path-routing provider.
///
/// Implementations may fail; the routing adapter retries and falls back.
/// `timeout` bounds a single call.
pub trait RouteProvider: Send + Sync {
    fn route(
        &self,
        origin: Coordinate,
        destination: Coordinate,
        timeout: Duration,
    ) -> Result<ProviderRoute, ProviderError>;
}

/// Read-only historical incident dataset.
pub trait IncidentSource: Send + Sync {
    /// Number of recorded incidents within `radius_m` of `center`, or `None`
    /// when the dataset has no coverage there.
    fn incidents_near(&self, center: Coordinate, radius_m: f64) -> Option<usize>;
}

/// Persisted classifier artifacts.
pub trait ArtifactStore: Send + Sync {
    /// Returns `Ok(None)` when nothing has been persisted yet.
    fn load(&self) -> Result<Option<ClassifierModel>, ArtifactError>;

    /// Replaces the persisted artifact wholesale.
    fn save(&self, model: &ClassifierModel) -> Result<(), ArtifactError>;
}
