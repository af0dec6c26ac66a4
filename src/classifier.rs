//! Safety classifier: a logistic model over z-score normalized features.
//!
//! Fitting goes through `linfa-logistic`; the fitted weights, intercept and
//! scaling parameters are then extracted into a plain serde artifact.
//!
//! The classifier is process-wide shared state with an explicit lifecycle:
//!
//! - **Untrained**: no model is installed. The first inference (or an
//!   explicit [`SafetyClassifier::init`]) loads a persisted artifact or, if
//!   none is usable, fits one on seeded synthetic data.
//! - **Trained**: an immutable [`ClassifierModel`] is installed behind an
//!   `Arc`. [`SafetyClassifier::retrain`] swaps in a replacement; inferences
//!   already running keep the snapshot they started with.
//!
//! A [`ClassifierModel`] (and the [`Normalizer`] inside it) can only be
//! produced by fitting or by a validated load, so inference never sees
//! unfitted parameters.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use linfa::Dataset;
use linfa::traits::Fit;
use linfa_logistic::LogisticRegression;
use ndarray::{Array1, Array2, ArrayView1, Axis};
use rand::distributions::{Distribution, WeightedIndex};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{ArtifactError, ClassifierError};
use crate::features::{
    FEATURE_LEN, FEATURE_SCHEMA_VERSION, IDX_DENSITY, IDX_LENGTH, IDX_NIGHT, IDX_RIDER, IDX_TIME_COS,
    IDX_TIME_SIN, RiskFeatureVector,
};
use crate::model::{RiderAttribute, RiderContext, SafetyScore, TimeOfDay};
use crate::traits::ArtifactStore;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Seed for synthetic data generation.
    pub seed: u64,
    /// Number of synthetic examples (split evenly between labels).
    pub synthetic_samples: usize,
    /// Solver iteration cap.
    pub max_iterations: u64,
    /// L2 penalty on the weights.
    pub l2: f64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            synthetic_samples: 2_000,
            max_iterations: 100,
            l2: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLabel {
    Safe,
    Unsafe,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingExample {
    pub features: RiskFeatureVector,
    pub label: RiskLabel,
    #[serde(default)]
    pub synthetic: bool,
}

/// Where a training set came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Provenance {
    Synthetic { seed: u64, samples: usize },
    Curated { examples: usize },
    Merged { curated: usize, synthetic: usize },
}

/// Examples with a single, explicit provenance.
#[derive(Debug, Clone)]
pub struct TrainingSet {
    examples: Vec<TrainingExample>,
    provenance: Provenance,
}

impl TrainingSet {
    /// Observed data. Synthetic examples are refused; use [`TrainingSet::merge`].
    pub fn curated(examples: Vec<TrainingExample>) -> Result<Self, ClassifierError> {
        if examples.iter().any(|example| example.synthetic) {
            return Err(ClassifierError::MixedProvenance);
        }
        let provenance = Provenance::Curated {
            examples: examples.len(),
        };
        Ok(Self { examples, provenance })
    }

    /// Seeded synthetic examples of plausible safe and unsafe legs.
    pub fn synthetic(config: &ClassifierConfig) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
        let examples = (0..config.synthetic_samples)
            .map(|i| {
                let label = if i % 2 == 0 { RiskLabel::Unsafe } else { RiskLabel::Safe };
                TrainingExample {
                    features: sample_features(&mut rng, label),
                    label,
                    synthetic: true,
                }
            })
            .collect();
        Self {
            examples,
            provenance: Provenance::Synthetic {
                seed: config.seed,
                samples: config.synthetic_samples,
            },
        }
    }

    /// Explicitly combines curated and synthetic data.
    pub fn merge(curated: TrainingSet, synthetic: TrainingSet) -> Self {
        let curated_len = curated.examples.len();
        let synthetic_len = synthetic.examples.len();
        let mut examples = curated.examples;
        examples.extend(synthetic.examples);
        Self {
            examples,
            provenance: Provenance::Merged {
                curated: curated_len,
                synthetic: synthetic_len,
            },
        }
    }

    pub fn examples(&self) -> &[TrainingExample] {
        &self.examples
    }

    pub fn provenance(&self) -> &Provenance {
        &self.provenance
    }
}

fn sample_features(rng: &mut ChaCha8Rng, label: RiskLabel) -> RiskFeatureVector {
    // Rider weights follow RiderAttribute::index order.
    let (density, minutes, rider_weights, length) = match label {
        RiskLabel::Unsafe => {
            let minutes = if rng.gen_bool(0.7) {
                20 * 60 + rng.gen_range(0..600)
            } else {
                rng.gen_range(0..1440)
            };
            (rng.gen_range(0.35..=1.0), minutes, [35, 30, 20, 15], rng.gen_range(0.1..=1.0))
        }
        RiskLabel::Safe => {
            let minutes = if rng.gen_bool(0.8) {
                rng.gen_range(6 * 60..20 * 60)
            } else {
                rng.gen_range(0..1440)
            };
            (rng.gen_range(0.0..=0.5), minutes, [15, 15, 30, 40], rng.gen_range(0.0..=0.6))
        }
    };

    let rider = WeightedIndex::new(rider_weights)
        .map(|weights| RiderAttribute::ALL[weights.sample(rng)])
        .unwrap_or_default();
    let context = RiderContext {
        time_of_day: TimeOfDay::from_minutes(minutes),
        rider,
    };
    RiskFeatureVector::from_parts(density, context, length * 20_000.0)
}

/// Per-feature z-score parameters fitted on training data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawNormalizer")]
pub struct Normalizer {
    mean: Vec<f64>,
    std: Vec<f64>,
}

#[derive(Deserialize)]
struct RawNormalizer {
    mean: Vec<f64>,
    std: Vec<f64>,
}

impl TryFrom<RawNormalizer> for Normalizer {
    type Error = ClassifierError;

    fn try_from(raw: RawNormalizer) -> Result<Self, Self::Error> {
        let normalizer = Normalizer {
            mean: raw.mean,
            std: raw.std,
        };
        if !normalizer.is_valid() {
            return Err(ClassifierError::SchemaMismatch {
                expected: format!("{FEATURE_LEN} finite scaling parameters"),
                found: format!("{} means, {} deviations", normalizer.mean.len(), normalizer.std.len()),
            });
        }
        Ok(normalizer)
    }
}

impl Normalizer {
    fn fit(records: &Array2<f64>) -> Self {
        let mean = records
            .mean_axis(Axis(0))
            .unwrap_or_else(|| Array1::zeros(FEATURE_LEN));
        let std = records
            .std_axis(Axis(0), 0.0)
            .mapv(|s| if s > 1e-9 { s } else { 1.0 });
        Self {
            mean: mean.to_vec(),
            std: std.to_vec(),
        }
    }

    fn transform_rows(&self, records: &Array2<f64>) -> Array2<f64> {
        (records - &ArrayView1::from(&self.mean[..])) / &ArrayView1::from(&self.std[..])
    }

    fn transform(&self, features: &RiskFeatureVector) -> Array1<f64> {
        let values = ArrayView1::from(&features.values()[..]);
        (&values - &ArrayView1::from(&self.mean[..])) / &ArrayView1::from(&self.std[..])
    }

    fn is_valid(&self) -> bool {
        self.mean.len() == FEATURE_LEN
            && self.std.len() == FEATURE_LEN
            && self.mean.iter().all(|m| m.is_finite())
            && self.std.iter().all(|s| s.is_finite() && *s > 0.0)
    }
}

/// Feature groups reported as contributing factors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskFactor {
    IncidentDensity,
    TimeOfDay,
    RiderExposure,
    LegLength,
    /// Learned adjustment for the zone, added outside the model.
    ZoneHistory,
}

const FACTOR_GROUPS: [(RiskFactor, std::ops::Range<usize>); 4] = [
    (RiskFactor::IncidentDensity, IDX_DENSITY..IDX_DENSITY + 1),
    (RiskFactor::TimeOfDay, IDX_TIME_SIN..IDX_NIGHT + 1),
    (RiskFactor::RiderExposure, IDX_RIDER..IDX_LENGTH),
    (RiskFactor::LegLength, IDX_LENGTH..IDX_LENGTH + 1),
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContributingFactor {
    pub factor: RiskFactor,
    /// Contribution to the unsafe log-odds (positive raises risk).
    pub impact: f64,
}

/// A score with the factors that pushed it down.
#[derive(Debug, Clone, PartialEq)]
pub struct Assessment {
    pub score: SafetyScore,
    pub factors: Vec<ContributingFactor>,
}

/// Fitted, versioned classifier artifact.
///
/// Deserialization validates the artifact against the current feature
/// schema, so a decoded model is always safe to score with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawClassifierModel")]
pub struct ClassifierModel {
    version: u32,
    schema_version: u32,
    normalizer: Normalizer,
    weights: Vec<f64>,
    bias: f64,
    provenance: Provenance,
}

/// Unchecked wire form of a [`ClassifierModel`].
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct RawClassifierModel {
    pub(crate) version: u32,
    schema_version: u32,
    normalizer: Normalizer,
    weights: Vec<f64>,
    bias: f64,
    provenance: Provenance,
}

impl TryFrom<RawClassifierModel> for ClassifierModel {
    type Error = ClassifierError;

    fn try_from(raw: RawClassifierModel) -> Result<Self, Self::Error> {
        let model = ClassifierModel {
            version: raw.version,
            schema_version: raw.schema_version,
            normalizer: raw.normalizer,
            weights: raw.weights,
            bias: raw.bias,
            provenance: raw.provenance,
        };
        model.validate()?;
        Ok(model)
    }
}

impl ClassifierModel {
    /// Fits the normalizer, then a logistic regression on normalized features.
    pub fn fit(set: &TrainingSet, config: &ClassifierConfig, version: u32) -> Result<Self, ClassifierError> {
        let examples = set.examples();
        let unsafe_count = examples.iter().filter(|e| e.label == RiskLabel::Unsafe).count();
        let safe = examples.len() - unsafe_count;
        if safe == 0 || unsafe_count == 0 {
            return Err(ClassifierError::DegenerateTrainingSet { safe, unsafe_count });
        }

        let records = Array2::from_shape_fn((examples.len(), FEATURE_LEN), |(row, col)| {
            examples[row].features.values()[col]
        });
        let normalizer = Normalizer::fit(&records);
        let targets: Array1<RiskLabel> = examples.iter().map(|e| e.label).collect();
        let dataset = Dataset::new(normalizer.transform_rows(&records), targets);

        let fitted = LogisticRegression::default()
            .alpha(config.l2)
            .max_iterations(config.max_iterations)
            .fit(&dataset)
            .map_err(|err| ClassifierError::Fit(err.to_string()))?;

        // Store the log-odds of the unsafe label whichever class linfa picked
        // as positive.
        let sign = if fitted.labels().pos.class == RiskLabel::Unsafe { 1.0 } else { -1.0 };
        let weights: Vec<f64> = fitted.params().iter().map(|w| sign * w).collect();
        let bias = sign * fitted.intercept();

        let model = Self {
            version,
            schema_version: FEATURE_SCHEMA_VERSION,
            normalizer,
            weights,
            bias,
            provenance: set.provenance().clone(),
        };
        model.validate()?;
        Ok(model)
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn schema_version(&self) -> u32 {
        self.schema_version
    }

    pub fn provenance(&self) -> &Provenance {
        &self.provenance
    }

    /// Checks that a loaded artifact matches the current feature schema.
    pub fn validate(&self) -> Result<(), ClassifierError> {
        if self.schema_version != FEATURE_SCHEMA_VERSION {
            return Err(ClassifierError::SchemaMismatch {
                expected: format!("schema v{FEATURE_SCHEMA_VERSION}"),
                found: format!("schema v{}", self.schema_version),
            });
        }
        if self.weights.len() != FEATURE_LEN || !self.normalizer.is_valid() {
            return Err(ClassifierError::SchemaMismatch {
                expected: format!("{FEATURE_LEN} features"),
                found: format!("{} weights", self.weights.len()),
            });
        }
        if !self.bias.is_finite() || self.weights.iter().any(|w| !w.is_finite()) {
            return Err(ClassifierError::SchemaMismatch {
                expected: "finite parameters".to_string(),
                found: "non-finite parameters".to_string(),
            });
        }
        Ok(())
    }

    /// Probability that a leg with these features is unsafe.
    pub fn unsafe_probability(&self, features: &RiskFeatureVector) -> f64 {
        let z = self.normalizer.transform(features);
        sigmoid(ArrayView1::from(&self.weights[..]).dot(&z) + self.bias)
    }

    pub fn score(&self, features: &RiskFeatureVector) -> SafetyScore {
        SafetyScore::from_f64(100.0 * (1.0 - self.unsafe_probability(features)))
    }

    pub fn assess(&self, features: &RiskFeatureVector) -> Assessment {
        let z = self.normalizer.transform(features);
        let mut factors: Vec<ContributingFactor> = FACTOR_GROUPS
            .iter()
            .map(|(factor, range)| ContributingFactor {
                factor: *factor,
                impact: range.clone().map(|i| self.weights[i] * z[i]).sum(),
            })
            .filter(|factor| factor.impact > 0.0)
            .collect();
        factors.sort_by(|a, b| b.impact.total_cmp(&a.impact));
        Assessment {
            score: self.score(features),
            factors,
        }
    }
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassifierState {
    Untrained,
    Trained { version: u32 },
}

/// Process-wide classifier with single-writer bootstrap and atomic replace.
pub struct SafetyClassifier {
    store: Box<dyn ArtifactStore>,
    config: ClassifierConfig,
    active: RwLock<Option<Arc<ClassifierModel>>>,
    writer: Mutex<()>,
    training_runs: AtomicUsize,
}

impl SafetyClassifier {
    pub fn new(store: Box<dyn ArtifactStore>, config: ClassifierConfig) -> Self {
        Self {
            store,
            config,
            active: RwLock::new(None),
            writer: Mutex::new(()),
            training_runs: AtomicUsize::new(0),
        }
    }

    pub fn state(&self) -> ClassifierState {
        match self.snapshot() {
            Some(model) => ClassifierState::Trained {
                version: model.version(),
            },
            None => ClassifierState::Untrained,
        }
    }

    /// Number of fits performed by this instance.
    pub fn training_runs(&self) -> usize {
        self.training_runs.load(Ordering::SeqCst)
    }

    /// Loads or bootstraps the model now rather than on first inference.
    pub fn init(&self) -> Result<Arc<ClassifierModel>, ClassifierError> {
        self.ensure_trained()
    }

    pub fn score(&self, features: &RiskFeatureVector) -> Result<SafetyScore, ClassifierError> {
        Ok(self.ensure_trained()?.score(features))
    }

    pub fn assess(&self, features: &RiskFeatureVector) -> Result<Assessment, ClassifierError> {
        Ok(self.ensure_trained()?.assess(features))
    }

    /// Fits a replacement on `set`, persists it, then swaps it in.
    ///
    /// The active model is left untouched if fitting or saving fails.
    pub fn retrain(&self, set: &TrainingSet) -> Result<Arc<ClassifierModel>, ClassifierError> {
        let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let version = self.snapshot().map_or(1, |model| model.version() + 1);
        let model = self.fit(set, version)?;
        self.store.save(&model)?;
        let model = Arc::new(model);
        self.swap(Arc::clone(&model));
        info!(version, provenance = ?set.provenance(), "classifier replaced");
        Ok(model)
    }

    /// Installs an externally produced model after validating it.
    pub fn install(&self, model: ClassifierModel) -> Result<Arc<ClassifierModel>, ClassifierError> {
        model.validate()?;
        let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let model = Arc::new(model);
        self.swap(Arc::clone(&model));
        Ok(model)
    }

    fn snapshot(&self) -> Option<Arc<ClassifierModel>> {
        self.active.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn swap(&self, model: Arc<ClassifierModel>) {
        *self.active.write().unwrap_or_else(PoisonError::into_inner) = Some(model);
    }

    fn ensure_trained(&self) -> Result<Arc<ClassifierModel>, ClassifierError> {
        if let Some(model) = self.snapshot() {
            return Ok(model);
        }

        let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        // Another caller may have finished while we waited.
        if let Some(model) = self.snapshot() {
            return Ok(model);
        }

        // A rejected artifact is superseded, so versions never move backwards.
        let model = match self.store.load() {
            Ok(Some(model)) => match model.validate() {
                Ok(()) => {
                    info!(version = model.version(), "loaded persisted classifier");
                    model
                }
                Err(err) => {
                    warn!(error = %err, version = model.version(), "persisted classifier rejected, bootstrapping");
                    self.bootstrap(model.version().saturating_add(1))?
                }
            },
            Ok(None) => {
                info!("no persisted classifier, bootstrapping from synthetic data");
                self.bootstrap(1)?
            }
            Err(ArtifactError::Rejected { version, reason, .. }) => {
                warn!(%reason, version, "persisted classifier rejected, bootstrapping");
                self.bootstrap(version.saturating_add(1))?
            }
            Err(err) => {
                warn!(error = %err, "failed to load persisted classifier, bootstrapping");
                self.bootstrap(1)?
            }
        };

        let model = Arc::new(model);
        self.swap(Arc::clone(&model));
        Ok(model)
    }

    fn bootstrap(&self, version: u32) -> Result<ClassifierModel, ClassifierError> {
        let set = TrainingSet::synthetic(&self.config);
        let model = self.fit(&set, version)?;
        if let Err(err) = self.store.save(&model) {
            warn!(error = %err, "failed to persist bootstrapped classifier");
        }
        Ok(model)
    }

    fn fit(&self, set: &TrainingSet, version: u32) -> Result<ClassifierModel, ClassifierError> {
        self.training_runs.fetch_add(1, Ordering::SeqCst);
        debug!(examples = set.examples().len(), version, "fitting classifier");
        ClassifierModel::fit(set, &self.config, version)
    }
}
