//! Zone-level risk adjustments learned from delivery outcomes.
//!
//! Every [`RewardSignal`] is appended to the reward log first and then folded
//! into the value table with
//! `value += learning_rate * (observed_reward - value)`. The log is the
//! source of truth: [`rebuild`] replays it into an identical table.

use std::collections::{BTreeMap, HashSet};
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::Path;
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::LearnerError;
use crate::geo::ZoneId;
use crate::model::SafetyScore;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LearnerConfig {
    pub learning_rate: f64,
    /// Largest adjustment, in score points, applied to a zone.
    pub max_bias: f64,
}

impl Default for LearnerConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.1,
            max_bias: 20.0,
        }
    }
}

/// What actually happened on a delivered leg.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryOutcome {
    Safe,
    NearMiss,
    Incident,
}

impl DeliveryOutcome {
    /// The safety score this outcome would have deserved.
    fn target_score(self) -> f64 {
        match self {
            DeliveryOutcome::Safe => 100.0,
            DeliveryOutcome::NearMiss => 50.0,
            DeliveryOutcome::Incident => 0.0,
        }
    }
}

/// An observed outcome for one zone. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RewardSignal {
    id: String,
    zone: ZoneId,
    predicted: SafetyScore,
    outcome: DeliveryOutcome,
}

impl RewardSignal {
    pub fn new(id: impl Into<String>, zone: ZoneId, predicted: SafetyScore, outcome: DeliveryOutcome) -> Self {
        Self {
            id: id.into(),
            zone,
            predicted,
            outcome,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn zone(&self) -> ZoneId {
        self.zone
    }

    pub fn predicted(&self) -> SafetyScore {
        self.predicted
    }

    pub fn outcome(&self) -> DeliveryOutcome {
        self.outcome
    }

    /// Score points by which the prediction missed the outcome.
    pub fn observed_reward(&self) -> f64 {
        self.outcome.target_score() - f64::from(self.predicted.value())
    }
}

fn step(value: f64, reward: f64, learning_rate: f64) -> f64 {
    value + learning_rate * (reward - value)
}

/// Replays signals in order into a value table. Duplicate ids are skipped.
pub fn rebuild<'a>(
    signals: impl IntoIterator<Item = &'a RewardSignal>,
    config: &LearnerConfig,
) -> BTreeMap<ZoneId, f64> {
    let mut seen = HashSet::new();
    let mut table = BTreeMap::new();
    for signal in signals {
        if !seen.insert(signal.id.as_str()) {
            continue;
        }
        let value = table.entry(signal.zone).or_insert(0.0);
        *value = step(*value, signal.observed_reward(), config.learning_rate);
    }
    table
}

#[derive(Debug, Default)]
struct LogInner {
    signals: Vec<RewardSignal>,
    seen: HashSet<String>,
    sink: Option<File>,
}

/// Append-only reward log, optionally mirrored to a JSON-lines file.
#[derive(Debug, Default)]
pub struct RewardLog {
    inner: Mutex<LogInner>,
}

impl RewardLog {
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Opens (or creates) a JSON-lines log and reads back its signals.
    ///
    /// An unterminated final line that does not parse is what an interrupted
    /// append leaves behind; it is cut off rather than treated as corruption.
    pub fn open(path: &Path) -> Result<Self, LearnerError> {
        let mut inner = LogInner::default();
        let mut sink = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)?;
        let mut raw = String::new();
        sink.read_to_string(&mut raw)?;

        let mut offset = 0;
        let mut torn = false;
        for (index, line) in raw.split_inclusive('\n').enumerate() {
            let start = offset;
            offset += line.len();
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<RewardSignal>(line) {
                Ok(signal) => {
                    if inner.seen.insert(signal.id.clone()) {
                        inner.signals.push(signal);
                    }
                }
                Err(_) if !line.ends_with('\n') => {
                    warn!(line = index + 1, "dropping unterminated reward log line");
                    sink.set_len(start as u64)?;
                    torn = true;
                }
                Err(source) => return Err(LearnerError::Parse { line: index + 1, source }),
            }
        }
        if !torn && !raw.is_empty() && !raw.ends_with('\n') {
            sink.write_all(b"\n")?;
        }

        inner.sink = Some(sink);
        Ok(Self {
            inner: Mutex::new(inner),
        })
    }

    /// Appends `signal` unless its id was already logged.
    ///
    /// Returns `Ok(false)` for a duplicate. A failed file write is truncated
    /// away, so neither the file nor the in-memory log changes.
    pub fn append(&self, signal: &RewardSignal) -> Result<bool, LearnerError> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if inner.seen.contains(&signal.id) {
            return Ok(false);
        }
        if let Some(sink) = inner.sink.as_mut() {
            let mut line = serde_json::to_string(signal).map_err(std::io::Error::from)?;
            line.push('\n');
            let committed = sink.metadata()?.len();
            if let Err(err) = sink.write_all(line.as_bytes()).and_then(|()| sink.flush()) {
                if let Err(rollback) = sink.set_len(committed) {
                    warn!(error = %rollback, "failed to truncate partial reward log line");
                }
                return Err(err.into());
            }
        }
        inner.seen.insert(signal.id.clone());
        inner.signals.push(signal.clone());
        Ok(true)
    }

    pub fn signals(&self) -> Vec<RewardSignal> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).signals.clone()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).signals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Per-zone risk adjustments with an authoritative reward log.
pub struct AdaptiveRouteLearner {
    config: LearnerConfig,
    log: RewardLog,
    values: DashMap<ZoneId, f64>,
}

impl AdaptiveRouteLearner {
    pub fn new(config: LearnerConfig) -> Self {
        Self::with_log(RewardLog::in_memory(), config)
    }

    /// Builds the value table from an existing log.
    pub fn with_log(log: RewardLog, config: LearnerConfig) -> Self {
        let values = rebuild(&log.signals(), &config).into_iter().collect();
        Self { config, log, values }
    }

    /// Opens a persistent log at `path` and replays it.
    pub fn open(path: &Path, config: LearnerConfig) -> Result<Self, LearnerError> {
        let learner = Self::with_log(RewardLog::open(path)?, config);
        info!(signals = learner.log.len(), zones = learner.values.len(), "reward log replayed");
        Ok(learner)
    }

    /// Logs and applies a signal. Returns `Ok(false)` if it was a duplicate.
    ///
    /// The zone's entry stays locked across append and apply, so updates to
    /// one zone are applied in log order.
    pub fn ingest(&self, signal: RewardSignal) -> Result<bool, LearnerError> {
        let reward = signal.observed_reward();
        let rate = self.config.learning_rate;
        match self.values.entry(signal.zone()) {
            Entry::Occupied(mut entry) => {
                if !self.log.append(&signal)? {
                    return Ok(false);
                }
                let value = entry.get_mut();
                *value = step(*value, reward, rate);
            }
            Entry::Vacant(entry) => {
                if !self.log.append(&signal)? {
                    return Ok(false);
                }
                entry.insert(step(0.0, reward, rate));
            }
        }
        debug!(zone = %signal.zone(), reward, "reward signal applied");
        Ok(true)
    }

    /// Raw learned value for a zone (0 when nothing was observed).
    pub fn value(&self, zone: ZoneId) -> f64 {
        self.values.get(&zone).map_or(0.0, |value| *value)
    }

    /// Score adjustment for a zone, clamped to `±max_bias`.
    pub fn bias(&self, zone: ZoneId) -> f64 {
        let limit = self.config.max_bias.abs();
        self.value(zone).clamp(-limit, limit)
    }

    /// Snapshot of the value table.
    pub fn table(&self) -> BTreeMap<ZoneId, f64> {
        self.values.iter().map(|entry| (*entry.key(), *entry.value())).collect()
    }

    /// Table obtained by replaying the log from scratch.
    pub fn rebuild_from_log(&self) -> BTreeMap<ZoneId, f64> {
        rebuild(&self.log.signals(), &self.config)
    }

    pub fn log(&self) -> &RewardLog {
        &self.log
    }
}

/// Prediction recorded for a delivered leg, awaiting its outcome.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingOutcome {
    pub signal_id: String,
    pub stop_id: String,
    pub zone: ZoneId,
    pub predicted: SafetyScore,
}

impl PendingOutcome {
    pub fn resolve(&self, outcome: DeliveryOutcome) -> RewardSignal {
        RewardSignal::new(self.signal_id.clone(), self.zone, self.predicted, outcome)
    }
}

/// Background worker that feeds signals into a learner off the request path.
pub struct FeedbackFeed {
    sender: Option<Sender<RewardSignal>>,
    worker: Option<JoinHandle<()>>,
}

impl FeedbackFeed {
    pub fn spawn(learner: Arc<AdaptiveRouteLearner>) -> Self {
        let (sender, receiver) = mpsc::channel::<RewardSignal>();
        let worker = std::thread::spawn(move || {
            for signal in receiver {
                let id = signal.id.clone();
                if let Err(err) = learner.ingest(signal) {
                    warn!(signal = %id, error = %err, "failed to ingest reward signal");
                }
            }
        });
        Self {
            sender: Some(sender),
            worker: Some(worker),
        }
    }

    /// Queues a signal. Returns `false` if the worker has stopped.
    pub fn submit(&self, signal: RewardSignal) -> bool {
        self.sender
            .as_ref()
            .is_some_and(|sender| sender.send(signal).is_ok())
    }

    /// Drains queued signals and stops the worker.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.sender.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("reward feed worker panicked");
            }
        }
    }
}

impl Drop for FeedbackFeed {
    fn drop(&mut self) {
        self.stop();
    }
}
