//! Error types for the planner.
//!
//! Only [`PlannerError`] ever reaches a caller of the orchestrator. The other
//! enums describe failures that are recovered inside the engine and surface
//! as quality flags or log events.

use thiserror::Error;

/// Errors surfaced to callers of the planner.
///
/// Everything else (provider outages, missing model, timeouts, missing
/// incident data) is recovered locally.
#[derive(Debug, Error)]
pub enum PlannerError {
    /// The request was rejected before any computation started.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl PlannerError {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        PlannerError::InvalidInput(message.into())
    }
}

/// Failures of the external routing provider.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The provider could not be reached or returned an error status.
    #[error("routing provider unavailable: {0}")]
    Unavailable(String),
    /// Transport-level failure from the HTTP client.
    #[error("routing provider request failed")]
    Http(#[from] reqwest::Error),
    /// The provider answered with a body we cannot use.
    #[error("malformed routing response: {0}")]
    Malformed(String),
}

/// Failures while loading or persisting a classifier artifact.
#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("artifact I/O failed at {path}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("artifact at {path} could not be (de)serialised")]
    Serde {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    /// The artifact parsed but does not fit the current feature schema.
    #[error("artifact v{version} at {path} rejected: {reason}")]
    Rejected {
        path: String,
        version: u32,
        reason: String,
    },
}

/// Failures of the safety classifier lifecycle.
#[derive(Debug, Error)]
pub enum ClassifierError {
    /// A model or vector does not match the feature schema in use.
    #[error("feature schema mismatch: expected {expected}, found {found}")]
    SchemaMismatch { expected: String, found: String },
    /// Curated training data contained synthetic examples without a merge.
    #[error("synthetic examples must be merged explicitly into curated data")]
    MixedProvenance,
    /// Fitting requires at least one example of each label.
    #[error("training set needs both safe and unsafe examples ({safe} safe, {unsafe_count} unsafe)")]
    DegenerateTrainingSet { safe: usize, unsafe_count: usize },
    /// A feature vector component was out of range or not finite.
    #[error("feature {index} out of range: {value}")]
    FeatureOutOfRange { index: usize, value: f64 },
    #[error("classifier fit failed: {0}")]
    Fit(String),
    #[error(transparent)]
    Artifact(#[from] ArtifactError),
}

/// Failures of the adaptive learner's persistent log.
#[derive(Debug, Error)]
pub enum LearnerError {
    #[error("reward log I/O failed")]
    Io(#[from] std::io::Error),
    #[error("reward log line {line} is not a valid signal")]
    Parse {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
}

/// Failures while loading configuration or incident data from disk.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read {path}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid value for {key}: {value}")]
    InvalidEnv { key: String, value: String },
}
