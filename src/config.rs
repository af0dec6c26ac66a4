//! Planner configuration.
//!
//! Every section has a usable [`Default`] and deserializes with
//! `#[serde(default)]`, so a JSON file only needs the keys it overrides.
//! A handful of deployment knobs can also be set through `SAFEROUTE_*`
//! environment variables.

use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::classifier::ClassifierConfig;
use crate::error::LoadError;
use crate::features::FeatureConfig;
use crate::learner::LearnerConfig;
use crate::model::{RiderAttribute, TimeOfDay};
use crate::osrm::OsrmConfig;
use crate::routing::RoutingConfig;
use crate::sequencer::SequencerConfig;

pub const ENV_OSRM_URL: &str = "SAFEROUTE_OSRM_URL";
pub const ENV_OSRM_PROFILE: &str = "SAFEROUTE_OSRM_PROFILE";
pub const ENV_TIME_BUDGET_MS: &str = "SAFEROUTE_TIME_BUDGET_MS";
pub const ENV_FALLBACK_SCORE: &str = "SAFEROUTE_FALLBACK_SCORE";
pub const ENV_CLASSIFIER_SEED: &str = "SAFEROUTE_CLASSIFIER_SEED";
pub const ENV_LEARNING_RATE: &str = "SAFEROUTE_LEARNING_RATE";
pub const ENV_URGENT_SLACK: &str = "SAFEROUTE_URGENT_SLACK";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    pub osrm: OsrmConfig,
    pub routing: RoutingConfig,
    pub features: FeatureConfig,
    pub classifier: ClassifierConfig,
    pub learner: LearnerConfig,
    pub sequencer: SequencerConfig,
    /// Wall-clock budget for one optimization request.
    pub time_budget_ms: u64,
    /// Score used for a leg when the classifier cannot produce one.
    pub fallback_score: u8,
    /// Applied when a request carries no time of day.
    pub default_time_of_day: TimeOfDay,
    /// Applied when a request carries no rider attribute.
    pub default_rider: RiderAttribute,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            osrm: OsrmConfig::default(),
            routing: RoutingConfig::default(),
            features: FeatureConfig::default(),
            classifier: ClassifierConfig::default(),
            learner: LearnerConfig::default(),
            sequencer: SequencerConfig::default(),
            time_budget_ms: 2_000,
            fallback_score: 60,
            default_time_of_day: TimeOfDay::default(),
            default_rider: RiderAttribute::default(),
        }
    }
}

impl PlannerConfig {
    pub fn from_json_file(path: &Path) -> Result<Self, LoadError> {
        let raw = std::fs::read_to_string(path).map_err(|source| LoadError::Io {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| LoadError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// Defaults with environment overrides applied.
    pub fn from_env() -> Result<Self, LoadError> {
        let mut config = Self::default();
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Applies `SAFEROUTE_*` overrides read through `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), LoadError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_OSRM_URL) {
            self.osrm.base_url = url;
        }
        if let Some(profile) = lookup(ENV_OSRM_PROFILE) {
            self.osrm.profile = profile;
        }
        if let Some(raw) = lookup(ENV_TIME_BUDGET_MS) {
            self.time_budget_ms = parse(ENV_TIME_BUDGET_MS, &raw)?;
        }
        if let Some(raw) = lookup(ENV_FALLBACK_SCORE) {
            let score: u8 = parse(ENV_FALLBACK_SCORE, &raw)?;
            if score > 100 {
                return Err(invalid_env(ENV_FALLBACK_SCORE, &raw));
            }
            self.fallback_score = score;
        }
        if let Some(raw) = lookup(ENV_CLASSIFIER_SEED) {
            self.classifier.seed = parse(ENV_CLASSIFIER_SEED, &raw)?;
        }
        if let Some(raw) = lookup(ENV_LEARNING_RATE) {
            let rate: f64 = parse(ENV_LEARNING_RATE, &raw)?;
            if !(rate.is_finite() && rate > 0.0 && rate <= 1.0) {
                return Err(invalid_env(ENV_LEARNING_RATE, &raw));
            }
            self.learner.learning_rate = rate;
        }
        if let Some(raw) = lookup(ENV_URGENT_SLACK) {
            let slack: f64 = parse(ENV_URGENT_SLACK, &raw)?;
            if !(slack.is_finite() && slack >= 0.0) {
                return Err(invalid_env(ENV_URGENT_SLACK, &raw));
            }
            self.sequencer.urgent_slack = slack;
        }
        Ok(())
    }
}

fn parse<T: FromStr>(key: &str, raw: &str) -> Result<T, LoadError> {
    raw.trim().parse().map_err(|_| invalid_env(key, raw))
}

fn invalid_env(key: &str, raw: &str) -> LoadError {
    LoadError::InvalidEnv {
        key: key.to_string(),
        value: raw.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = PlannerConfig::default();
        assert_eq!(config.time_budget_ms, 2_000);
        assert_eq!(config.fallback_score, 60);
        assert_eq!(config.routing.max_attempts, 3);
        assert_eq!(config.sequencer.exact_max_stops, 8);
        assert_eq!(config.default_time_of_day, TimeOfDay::from_minutes(12 * 60));
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("planner.json");
        std::fs::write(
            &path,
            r#"{ "time_budget_ms": 500, "osrm": { "base_url": "http://osrm:5000" }, "default_time_of_day": "22:30" }"#,
        )
        .unwrap();

        let config = PlannerConfig::from_json_file(&path).unwrap();
        assert_eq!(config.time_budget_ms, 500);
        assert_eq!(config.osrm.base_url, "http://osrm:5000");
        assert_eq!(config.osrm.profile, "car");
        assert_eq!(config.default_time_of_day, TimeOfDay::from_hm(22, 30).unwrap());
        assert_eq!(config.routing.cache_ttl_secs, 300);
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = PlannerConfig::from_json_file(&dir.path().join("absent.json"));
        assert!(matches!(result, Err(LoadError::Io { .. })));
    }

    #[test]
    fn overrides_apply() {
        let mut config = PlannerConfig::default();
        config
            .apply_overrides(lookup(&[
                (ENV_OSRM_URL, "http://routing.internal"),
                (ENV_TIME_BUDGET_MS, "750"),
                (ENV_URGENT_SLACK, "0.3"),
            ]))
            .unwrap();
        assert_eq!(config.osrm.base_url, "http://routing.internal");
        assert_eq!(config.time_budget_ms, 750);
        assert_eq!(config.sequencer.urgent_slack, 0.3);
    }

    #[test]
    fn bad_override_is_rejected() {
        let mut config = PlannerConfig::default();
        let err = config
            .apply_overrides(lookup(&[(ENV_FALLBACK_SCORE, "140")]))
            .unwrap_err();
        assert!(matches!(err, LoadError::InvalidEnv { ref key, .. } if key == ENV_FALLBACK_SCORE));

        let err = config
            .apply_overrides(lookup(&[(ENV_LEARNING_RATE, "fast")]))
            .unwrap_err();
        assert!(matches!(err, LoadError::InvalidEnv { .. }));
    }
}
