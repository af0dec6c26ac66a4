//! saferoute-planner
//!
//! Plans multi-stop delivery routes that trade travel time against a learned
//! personal-safety risk, and scores standalone paths for a rider context.

pub mod api;
pub mod artifact;
pub mod classifier;
pub mod config;
pub mod error;
pub mod features;
pub mod geo;
pub mod haversine;
pub mod incidents;
pub mod learner;
pub mod model;
pub mod osrm;
pub mod planner;
pub mod polyline;
pub mod routing;
pub mod sequencer;
pub mod traits;

pub use api::{Objective, RouteRequest, RouteResponse, ScoreRequest, ScoreResponse, StopRequest};
pub use config::PlannerConfig;
pub use error::PlannerError;
pub use geo::Coordinate;
pub use planner::RoutePlanner;
