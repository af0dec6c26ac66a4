//! JSON request and response shapes.
//!
//! Requests are validated before the planner does any work; every problem
//! is reported as [`PlannerError::InvalidInput`].

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::classifier::ContributingFactor;
use crate::config::PlannerConfig;
use crate::error::PlannerError;
use crate::geo::Coordinate;
use crate::learner::PendingOutcome;
use crate::model::{LegQuality, Priority, RiderAttribute, RiderContext, RiskBand, SafetyScore, Stop, TimeOfDay};
use crate::sequencer::{Strategy, Weights};

/// What a route should be optimized for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Objective {
    Time,
    Safety,
}

/// Maps requested objectives to cost weights.
///
/// Only time gives `(1, 0)`, only safety gives `(0, 1)`; both or none fall
/// back to the balanced default.
pub fn weights_for(objectives: &[Objective]) -> Weights {
    let time = objectives.contains(&Objective::Time);
    let safety = objectives.contains(&Objective::Safety);
    match (time, safety) {
        (true, false) => Weights::new(1.0, 0.0),
        (false, true) => Weights::new(0.0, 1.0),
        _ => Weights::default(),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StopRequest {
    pub stop_id: String,
    #[serde(default)]
    pub address: String,
    pub coordinates: Coordinate,
    #[serde(default)]
    pub priority: Priority,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteRequest {
    pub starting_point: Coordinate,
    pub stops: Vec<StopRequest>,
    #[serde(default)]
    pub optimize_for: Vec<Objective>,
    #[serde(default)]
    pub time_of_day: Option<TimeOfDay>,
    #[serde(default)]
    pub rider_attribute: Option<RiderAttribute>,
}

impl RouteRequest {
    pub fn new(starting_point: Coordinate, stops: Vec<StopRequest>) -> Self {
        Self {
            starting_point,
            stops,
            optimize_for: Vec::new(),
            time_of_day: None,
            rider_attribute: None,
        }
    }

    /// Parses and validates a JSON request body.
    pub fn from_json(body: &str) -> Result<Self, PlannerError> {
        let request: Self = serde_json::from_str(body)
            .map_err(|err| PlannerError::invalid(format!("malformed route request: {err}")))?;
        request.validate()?;
        Ok(request)
    }

    pub fn validate(&self) -> Result<(), PlannerError> {
        self.starting_point.validate()?;
        if self.stops.is_empty() {
            return Err(PlannerError::invalid("stop list is empty"));
        }
        let mut seen = HashSet::with_capacity(self.stops.len());
        for stop in &self.stops {
            if stop.stop_id.trim().is_empty() {
                return Err(PlannerError::invalid("stop id must not be blank"));
            }
            if !seen.insert(stop.stop_id.as_str()) {
                return Err(PlannerError::invalid(format!("duplicate stop id {:?}", stop.stop_id)));
            }
            stop.coordinates.validate().map_err(|err| {
                PlannerError::invalid(format!("stop {:?}: {err}", stop.stop_id))
            })?;
        }
        Ok(())
    }

    pub fn to_stops(&self) -> Vec<Stop> {
        self.stops
            .iter()
            .map(|stop| Stop {
                id: stop.stop_id.clone(),
                address: stop.address.clone(),
                coordinate: stop.coordinates,
                priority: stop.priority,
            })
            .collect()
    }

    pub fn weights(&self) -> Weights {
        weights_for(&self.optimize_for)
    }

    pub fn context(&self, config: &PlannerConfig) -> RiderContext {
        RiderContext {
            time_of_day: self.time_of_day.unwrap_or(config.default_time_of_day),
            rider: self.rider_attribute.unwrap_or(config.default_rider),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerLeg {
    pub from: String,
    pub to: String,
    pub distance: f64,
    pub duration: f64,
    pub safety_score: SafetyScore,
    pub risk_level: RiskBand,
    pub quality: LegQuality,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteResponse {
    pub ordered_stops: Vec<String>,
    /// Meters.
    pub total_distance: f64,
    /// Seconds.
    pub total_duration: f64,
    pub total_safety_score: SafetyScore,
    pub per_leg: Vec<PerLeg>,
    pub strategy: Strategy,
    pub urgent_first: bool,
    pub quality_degraded: bool,
    pub time_budget_exceeded: bool,
    /// Handles for reporting how each leg went. Not part of the wire shape.
    #[serde(skip)]
    pub pending_outcomes: Vec<PendingOutcome>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreRequest {
    pub coordinates: Vec<Coordinate>,
    #[serde(default)]
    pub time_of_day: Option<TimeOfDay>,
    #[serde(default)]
    pub rider_attribute: Option<RiderAttribute>,
}

impl ScoreRequest {
    pub fn from_json(body: &str) -> Result<Self, PlannerError> {
        let request: Self = serde_json::from_str(body)
            .map_err(|err| PlannerError::invalid(format!("malformed score request: {err}")))?;
        request.validate()?;
        Ok(request)
    }

    pub fn validate(&self) -> Result<(), PlannerError> {
        if self.coordinates.len() < 2 {
            return Err(PlannerError::invalid("a path needs at least two coordinates"));
        }
        self.coordinates.iter().try_for_each(Coordinate::validate)
    }

    pub fn context(&self, config: &PlannerConfig) -> RiderContext {
        RiderContext {
            time_of_day: self.time_of_day.unwrap_or(config.default_time_of_day),
            rider: self.rider_attribute.unwrap_or(config.default_rider),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreResponse {
    pub score: SafetyScore,
    pub risk_level: RiskBand,
    pub contributing_factors: Vec<ContributingFactor>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const BODY: &str = r#"{
        "starting_point": { "lat": 36.1147, "lon": -115.1728 },
        "stops": [
            { "stop_id": "a", "address": "1 Main St", "coordinates": { "lat": 36.12, "lon": -115.17 }, "priority": "urgent" },
            { "stop_id": "b", "coordinates": { "lat": 36.13, "lon": -115.16 } }
        ],
        "optimize_for": ["safety"],
        "time_of_day": "21:15",
        "rider_attribute": "bicycle"
    }"#;

    #[test]
    fn parses_full_request() {
        let request = RouteRequest::from_json(BODY).unwrap();
        assert_eq!(request.stops.len(), 2);
        assert_eq!(request.stops[0].priority, Priority::Urgent);
        assert_eq!(request.stops[1].priority, Priority::Normal);
        assert_eq!(request.weights(), Weights::new(0.0, 1.0));

        let context = request.context(&PlannerConfig::default());
        assert_eq!(context.time_of_day, TimeOfDay::from_hm(21, 15).unwrap());
        assert_eq!(context.rider, RiderAttribute::Bicycle);
    }

    #[test]
    fn missing_context_uses_config_defaults() {
        let request = RouteRequest::new(
            Coordinate::new(0.0, 0.0).unwrap(),
            vec![StopRequest {
                stop_id: "a".into(),
                address: String::new(),
                coordinates: Coordinate::new(0.01, 0.01).unwrap(),
                priority: Priority::Normal,
            }],
        );
        let config = PlannerConfig::default();
        let context = request.context(&config);
        assert_eq!(context.time_of_day, config.default_time_of_day);
        assert_eq!(context.rider, config.default_rider);
    }

    #[rstest]
    #[case(&[], Weights::new(0.5, 0.5))]
    #[case(&[Objective::Time], Weights::new(1.0, 0.0))]
    #[case(&[Objective::Safety], Weights::new(0.0, 1.0))]
    #[case(&[Objective::Safety, Objective::Time], Weights::new(0.5, 0.5))]
    fn objective_weights(#[case] objectives: &[Objective], #[case] expected: Weights) {
        assert_eq!(weights_for(objectives), expected);
    }

    #[rstest]
    #[case::empty_stops(r#"{"starting_point":{"lat":0,"lon":0},"stops":[]}"#)]
    #[case::duplicate_ids(r#"{"starting_point":{"lat":0,"lon":0},"stops":[{"stop_id":"a","coordinates":{"lat":1,"lon":1}},{"stop_id":"a","coordinates":{"lat":2,"lon":2}}]}"#)]
    #[case::bad_latitude(r#"{"starting_point":{"lat":91,"lon":0},"stops":[{"stop_id":"a","coordinates":{"lat":1,"lon":1}}]}"#)]
    #[case::bad_stop_longitude(r#"{"starting_point":{"lat":0,"lon":0},"stops":[{"stop_id":"a","coordinates":{"lat":1,"lon":181}}]}"#)]
    #[case::unknown_priority(r#"{"starting_point":{"lat":0,"lon":0},"stops":[{"stop_id":"a","coordinates":{"lat":1,"lon":1},"priority":"asap"}]}"#)]
    #[case::unknown_objective(r#"{"starting_point":{"lat":0,"lon":0},"stops":[{"stop_id":"a","coordinates":{"lat":1,"lon":1}}],"optimize_for":["cost"]}"#)]
    #[case::bad_time(r#"{"starting_point":{"lat":0,"lon":0},"stops":[{"stop_id":"a","coordinates":{"lat":1,"lon":1}}],"time_of_day":"25:00"}"#)]
    #[case::not_json("stops: a, b")]
    fn rejects_invalid_requests(#[case] body: &str) {
        assert!(matches!(
            RouteRequest::from_json(body),
            Err(PlannerError::InvalidInput(_))
        ));
    }

    #[test]
    fn score_request_needs_two_points() {
        let body = r#"{"coordinates":[{"lat":0,"lon":0}],"time_of_day":"08:00","rider_attribute":"car"}"#;
        assert!(ScoreRequest::from_json(body).is_err());

        let body = r#"{"coordinates":[{"lat":0,"lon":0},{"lat":0.01,"lon":0}],"rider_attribute":"on_foot"}"#;
        let request = ScoreRequest::from_json(body).unwrap();
        assert_eq!(request.rider_attribute, Some(RiderAttribute::OnFoot));
    }

    #[test]
    fn response_omits_pending_outcomes() {
        let response = RouteResponse {
            ordered_stops: vec!["a".into()],
            total_distance: 1200.0,
            total_duration: 108.0,
            total_safety_score: SafetyScore::new(90),
            per_leg: Vec::new(),
            strategy: Strategy::Exact,
            urgent_first: false,
            quality_degraded: false,
            time_budget_exceeded: false,
            pending_outcomes: Vec::new(),
        };
        let json = serde_json::to_value(&response).unwrap();
        assert!(json.get("pending_outcomes").is_none());
        assert_eq!(json["total_safety_score"], 90);
        assert_eq!(json["strategy"], "exact");
    }
}
