//! Test fixtures for saferoute-planner.
//!
//! - Real Las Vegas delivery points
//! - Builders for stops and requests
//! - Stub routing providers

#![allow(dead_code)]

pub mod las_vegas;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use saferoute_planner::api::{Objective, RouteRequest, StopRequest};
use saferoute_planner::error::ProviderError;
use saferoute_planner::geo::Coordinate;
use saferoute_planner::haversine::haversine_km;
use saferoute_planner::model::{Priority, RiderAttribute, TimeOfDay};
use saferoute_planner::polyline::Polyline;
use saferoute_planner::traits::{ProviderRoute, RouteProvider};

pub use las_vegas::Location;

// ============================================================================
// Builders
// ============================================================================

/// Builder for stops with sensible defaults.
#[derive(Clone, Debug)]
pub struct TestStop {
    id: String,
    location: Location,
    priority: Priority,
}

impl TestStop {
    pub fn new(id: &str, location: Location) -> Self {
        Self {
            id: id.to_string(),
            location,
            priority: Priority::Normal,
        }
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn urgent(self) -> Self {
        self.priority(Priority::Urgent)
    }

    pub fn build(self) -> StopRequest {
        StopRequest {
            stop_id: self.id,
            address: self.location.name.to_string(),
            coordinates: self.location.coordinate(),
            priority: self.priority,
        }
    }
}

/// Builder for route requests.
#[derive(Clone, Debug)]
pub struct TestRequest {
    start: Location,
    stops: Vec<TestStop>,
    objectives: Vec<Objective>,
    time_of_day: Option<TimeOfDay>,
    rider: Option<RiderAttribute>,
}

impl TestRequest {
    pub fn from(start: Location) -> Self {
        Self {
            start,
            stops: Vec::new(),
            objectives: Vec::new(),
            time_of_day: None,
            rider: None,
        }
    }

    pub fn stop(mut self, stop: TestStop) -> Self {
        self.stops.push(stop);
        self
    }

    /// Adds one normal-priority stop per location, named `s0`, `s1`, ...
    pub fn stops_at(mut self, locations: &[Location]) -> Self {
        let offset = self.stops.len();
        for (i, location) in locations.iter().enumerate() {
            self.stops.push(TestStop::new(&format!("s{}", offset + i), *location));
        }
        self
    }

    pub fn optimize_for(mut self, objective: Objective) -> Self {
        self.objectives.push(objective);
        self
    }

    pub fn at(mut self, hour: u8, minute: u8) -> Self {
        self.time_of_day = Some(TimeOfDay::from_hm(hour, minute).unwrap());
        self
    }

    pub fn rider(mut self, rider: RiderAttribute) -> Self {
        self.rider = Some(rider);
        self
    }

    pub fn build(self) -> RouteRequest {
        let mut request = RouteRequest::new(
            self.start.coordinate(),
            self.stops.into_iter().map(TestStop::build).collect(),
        );
        request.optimize_for = self.objectives;
        request.time_of_day = self.time_of_day;
        request.rider_attribute = self.rider;
        request
    }
}

// ============================================================================
// Stub providers
// ============================================================================

/// Answers every call with a road-factor-adjusted straight line.
#[derive(Debug)]
pub struct StraightLineProvider {
    pub speed_kmh: f64,
    calls: AtomicUsize,
}

impl StraightLineProvider {
    pub fn new() -> Self {
        Self {
            speed_kmh: 30.0,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl RouteProvider for StraightLineProvider {
    fn route(
        &self,
        origin: Coordinate,
        destination: Coordinate,
        _timeout: Duration,
    ) -> Result<ProviderRoute, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let km = haversine_km((origin.lat, origin.lon), (destination.lat, destination.lon)) * 1.3;
        Ok(ProviderRoute {
            distance_m: (km * 1000.0).round(),
            duration_s: (km / self.speed_kmh * 3600.0).round(),
            geometry: Polyline::new(vec![origin, destination]),
        })
    }
}

/// Always unavailable.
#[derive(Debug, Default)]
pub struct DownProvider {
    calls: AtomicUsize,
}

impl DownProvider {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl RouteProvider for DownProvider {
    fn route(&self, _: Coordinate, _: Coordinate, _: Duration) -> Result<ProviderRoute, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(ProviderError::Unavailable("connection refused".to_string()))
    }
}

/// Takes `delay` per call and gives up when the timeout is shorter.
#[derive(Debug)]
pub struct SlowProvider {
    pub delay: Duration,
}

impl RouteProvider for SlowProvider {
    fn route(
        &self,
        origin: Coordinate,
        destination: Coordinate,
        timeout: Duration,
    ) -> Result<ProviderRoute, ProviderError> {
        if self.delay > timeout {
            std::thread::sleep(timeout);
            return Err(ProviderError::Unavailable("timed out".to_string()));
        }
        std::thread::sleep(self.delay);
        StraightLineProvider::new().route(origin, destination, timeout)
    }
}
