//! Read-only historical incident dataset.

use std::fs;
use std::path::Path;

use rstar::{AABB, RTree, RTreeObject};
use serde::Deserialize;

use crate::error::LoadError;
use crate::geo::Coordinate;
use crate::traits::IncidentSource;

/// Approximate meters per degree of latitude.
const METERS_PER_DEG: f64 = 111_320.0;

/// A single recorded incident location.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct IncidentRecord {
    pub lat: f64,
    pub lon: f64,
}

/// Incident point as stored in the R\*-tree, keyed `[lon, lat]`.
#[derive(Debug, Clone, Copy, PartialEq)]
struct IndexedIncident(Coordinate);

impl RTreeObject for IndexedIncident {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_point([self.0.lon, self.0.lat])
    }
}

#[derive(Debug, Clone, Copy)]
struct Bounds {
    min_lat: f64,
    max_lat: f64,
    min_lon: f64,
    max_lon: f64,
}

impl Bounds {
    fn of(points: &[IndexedIncident]) -> Option<Self> {
        let first = points.first()?.0;
        let seed = Bounds {
            min_lat: first.lat,
            max_lat: first.lat,
            min_lon: first.lon,
            max_lon: first.lon,
        };
        Some(points.iter().fold(seed, |b, IndexedIncident(point)| Bounds {
            min_lat: b.min_lat.min(point.lat),
            max_lat: b.max_lat.max(point.lat),
            min_lon: b.min_lon.min(point.lon),
            max_lon: b.max_lon.max(point.lon),
        }))
    }
}

/// Incident points bulk-loaded into an R\*-tree.
///
/// Coverage is the bounding box of the data; queries outside it report no
/// data rather than zero incidents.
#[derive(Debug, Clone)]
pub struct IncidentGrid {
    index: RTree<IndexedIncident>,
    bounds: Option<Bounds>,
}

impl Default for IncidentGrid {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl IncidentGrid {
    pub fn new(incidents: impl IntoIterator<Item = Coordinate>) -> Self {
        let points: Vec<IndexedIncident> = incidents.into_iter().map(IndexedIncident).collect();
        let bounds = Bounds::of(&points);
        Self {
            index: RTree::bulk_load(points),
            bounds,
        }
    }

    /// Loads a JSON array of `{lat, lon}` records, skipping invalid points.
    pub fn from_json_file(path: &Path) -> Result<Self, LoadError> {
        let raw = fs::read_to_string(path).map_err(|source| LoadError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let records: Vec<IncidentRecord> =
            serde_json::from_str(&raw).map_err(|source| LoadError::Parse {
                path: path.display().to_string(),
                source,
            })?;
        Ok(Self::new(
            records
                .into_iter()
                .filter_map(|record| Coordinate::new(record.lat, record.lon).ok()),
        ))
    }

    pub fn len(&self) -> usize {
        self.index.size()
    }

    pub fn is_empty(&self) -> bool {
        self.index.size() == 0
    }

    fn covers(&self, center: Coordinate, radius_m: f64) -> bool {
        let Some(b) = self.bounds else {
            return false;
        };
        let margin = radius_m / METERS_PER_DEG;
        center.lat >= b.min_lat - margin
            && center.lat <= b.max_lat + margin
            && center.lon >= b.min_lon - margin / lat_scale(center.lat)
            && center.lon <= b.max_lon + margin / lat_scale(center.lat)
    }
}

impl IncidentSource for IncidentGrid {
    fn incidents_near(&self, center: Coordinate, radius_m: f64) -> Option<usize> {
        if !self.covers(center, radius_m) {
            return None;
        }

        // Degree box around the radius, then the exact great-circle filter.
        let lat_span = radius_m / METERS_PER_DEG;
        let lon_span = radius_m / (METERS_PER_DEG * lat_scale(center.lat));
        let envelope = AABB::from_corners(
            [center.lon - lon_span, center.lat - lat_span],
            [center.lon + lon_span, center.lat + lat_span],
        );
        let count = self
            .index
            .locate_in_envelope(&envelope)
            .filter(|IndexedIncident(point)| point.distance_m(&center) <= radius_m)
            .count();
        Some(count)
    }
}

fn lat_scale(lat: f64) -> f64 {
    lat.to_radians().cos().max(0.01)
}
