//! Core domain types shared by every stage of the pipeline.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::PlannerError;
use crate::geo::Coordinate;
use crate::polyline::Polyline;

/// Delivery priority. Ordered so that `Urgent > High > Normal > Low`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

/// A delivery stop. Cloned into a request and never mutated afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct Stop {
    pub id: String,
    pub address: String,
    pub coordinate: Coordinate,
    pub priority: Priority,
}

impl Stop {
    pub fn new(id: impl Into<String>, coordinate: Coordinate, priority: Priority) -> Self {
        Self {
            id: id.into(),
            address: String::new(),
            coordinate,
            priority,
        }
    }
}

/// Integer safety score in `[0, 100]`; higher is safer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct SafetyScore(u8);

impl SafetyScore {
    pub const MAX: SafetyScore = SafetyScore(100);

    /// Saturates into range.
    pub fn new(value: u8) -> Self {
        Self(value.min(100))
    }

    /// Rounds and clamps a real-valued score.
    pub fn from_f64(value: f64) -> Self {
        if !value.is_finite() {
            return Self(0);
        }
        Self(value.round().clamp(0.0, 100.0) as u8)
    }

    pub fn value(self) -> u8 {
        self.0
    }

    /// Applies a zone bias in score points.
    pub fn with_bias(self, bias: f64) -> Self {
        Self::from_f64(f64::from(self.0) + bias)
    }

    pub fn band(self) -> RiskBand {
        match self.0 {
            88..=100 => RiskBand::Green,
            60..=87 => RiskBand::Amber,
            _ => RiskBand::Red,
        }
    }
}

impl TryFrom<u8> for SafetyScore {
    type Error = PlannerError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        if value > 100 {
            return Err(PlannerError::invalid(format!("safety score out of range: {value}")));
        }
        Ok(Self(value))
    }
}

impl From<SafetyScore> for u8 {
    fn from(score: SafetyScore) -> Self {
        score.0
    }
}

impl fmt::Display for SafetyScore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Risk band derived from a [`SafetyScore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskBand {
    Green,
    Amber,
    Red,
}

/// How the traveler moves; drives the exposure features.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiderAttribute {
    OnFoot,
    Bicycle,
    #[default]
    Motorcycle,
    Car,
}

impl RiderAttribute {
    pub const ALL: [RiderAttribute; 4] = [
        RiderAttribute::OnFoot,
        RiderAttribute::Bicycle,
        RiderAttribute::Motorcycle,
        RiderAttribute::Car,
    ];

    pub fn index(self) -> usize {
        match self {
            RiderAttribute::OnFoot => 0,
            RiderAttribute::Bicycle => 1,
            RiderAttribute::Motorcycle => 2,
            RiderAttribute::Car => 3,
        }
    }
}

/// Minutes since midnight, parsed from `HH:MM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TimeOfDay(u16);

impl TimeOfDay {
    pub fn from_hm(hour: u8, minute: u8) -> Result<Self, PlannerError> {
        if hour > 23 || minute > 59 {
            return Err(PlannerError::invalid(format!(
                "time of day out of range: {hour:02}:{minute:02}"
            )));
        }
        Ok(Self(u16::from(hour) * 60 + u16::from(minute)))
    }

    /// Wraps past midnight.
    pub fn from_minutes(minutes: u16) -> Self {
        Self(minutes % 1440)
    }

    pub fn minutes(self) -> u16 {
        self.0
    }

    pub fn hour(self) -> u8 {
        (self.0 / 60) as u8
    }

    /// Fraction of the day elapsed, in `[0, 1)`.
    pub fn day_fraction(self) -> f64 {
        f64::from(self.0) / 1440.0
    }

    /// Night is 20:00 through 05:59.
    pub fn is_night(self) -> bool {
        let hour = self.hour();
        !(6..20).contains(&hour)
    }
}

impl Default for TimeOfDay {
    fn default() -> Self {
        Self(12 * 60)
    }
}

impl TryFrom<String> for TimeOfDay {
    type Error = PlannerError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl std::str::FromStr for TimeOfDay {
    type Err = PlannerError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let (hour, minute) = value
            .split_once(':')
            .ok_or_else(|| PlannerError::invalid(format!("time of day must be HH:MM, got {value:?}")))?;
        let hour = hour
            .trim()
            .parse::<u8>()
            .map_err(|_| PlannerError::invalid(format!("invalid hour in {value:?}")))?;
        let minute = minute
            .trim()
            .parse::<u8>()
            .map_err(|_| PlannerError::invalid(format!("invalid minute in {value:?}")))?;
        Self::from_hm(hour, minute)
    }
}

impl From<TimeOfDay> for String {
    fn from(value: TimeOfDay) -> Self {
        value.to_string()
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.0 / 60, self.0 % 60)
    }
}

/// Traveler context used for risk scoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RiderContext {
    pub time_of_day: TimeOfDay,
    pub rider: RiderAttribute,
}

/// Whether a leg came from the provider or from the local fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LegQuality {
    Exact,
    DegradedEstimate,
}

/// A resolved point-to-point segment.
#[derive(Debug, Clone, PartialEq)]
pub struct Leg {
    pub origin: Coordinate,
    pub destination: Coordinate,
    pub distance_m: f64,
    pub duration_s: f64,
    pub geometry: Polyline,
    pub quality: LegQuality,
}

impl Leg {
    /// Midpoint along the geometry, or between the endpoints when the
    /// geometry is empty.
    pub fn midpoint(&self) -> Coordinate {
        self.geometry
            .midpoint()
            .unwrap_or_else(|| self.origin.lerp(&self.destination, 0.5))
    }

    pub fn is_degraded(&self) -> bool {
        self.quality == LegQuality::DegradedEstimate
    }
}
