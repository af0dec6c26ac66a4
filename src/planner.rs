//! Route optimization orchestrator.
//!
//! One [`RoutePlanner`] serves many requests. Requests share the classifier,
//! the learner's zone table and the leg cache; everything else is owned by
//! the request.

use std::iter;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use rayon::prelude::*;
use tracing::{info, instrument, warn};

use crate::api::{PerLeg, RouteRequest, RouteResponse, ScoreRequest, ScoreResponse};
use crate::artifact::InMemoryArtifactStore;
use crate::classifier::{Assessment, ContributingFactor, RiskFactor, SafetyClassifier};
use crate::config::PlannerConfig;
use crate::error::{LearnerError, PlannerError};
use crate::features::RiskFeatureExtractor;
use crate::geo::{Coordinate, ZoneId};
use crate::haversine::HaversineEstimator;
use crate::incidents::IncidentGrid;
use crate::learner::{AdaptiveRouteLearner, DeliveryOutcome, FeedbackFeed, PendingOutcome};
use crate::model::{Leg, LegQuality, RiderContext, SafetyScore, Stop};
use crate::osrm::OsrmClient;
use crate::routing::RoutingAdapter;
use crate::sequencer::{LegCost, SequenceOptions, StopSequencer};
use crate::traits::{IncidentSource, RouteProvider};

const START_ID: &str = "start";

/// Score points per unit of unsafe log-odds near p = 0.5.
const POINTS_PER_LOG_ODDS: f64 = 25.0;

/// A resolved leg with its safety estimate.
#[derive(Debug, Clone)]
struct ScoredLeg {
    leg: Leg,
    zone: ZoneId,
    /// Classifier output before the zone bias.
    predicted: SafetyScore,
    /// Score used for sequencing.
    score: SafetyScore,
    classifier_fallback: bool,
}

impl ScoredLeg {
    fn cost(&self) -> LegCost {
        LegCost {
            distance_m: self.leg.distance_m,
            duration_s: self.leg.duration_s,
            safety: self.score,
        }
    }
}

pub struct RoutePlanner<P> {
    routing: RoutingAdapter<P>,
    extractor: RiskFeatureExtractor,
    classifier: Arc<SafetyClassifier>,
    learner: Arc<AdaptiveRouteLearner>,
    sequencer: StopSequencer,
    estimator: HaversineEstimator,
    feed: Option<FeedbackFeed>,
    config: PlannerConfig,
    /// Distinguishes signal ids of this instance from earlier runs.
    instance: u64,
    requests: AtomicU64,
}

impl<P: RouteProvider> RoutePlanner<P> {
    /// Builds a planner around a classifier shared by every planner in the
    /// process.
    pub fn new(
        provider: P,
        incidents: Arc<dyn IncidentSource>,
        classifier: Arc<SafetyClassifier>,
        config: PlannerConfig,
    ) -> Self {
        let learner = Arc::new(AdaptiveRouteLearner::new(config.learner.clone()));
        Self {
            routing: RoutingAdapter::new(provider, config.routing.clone()),
            extractor: RiskFeatureExtractor::new(incidents, config.features.clone()),
            classifier,
            learner,
            sequencer: StopSequencer::new(config.sequencer.clone()),
            estimator: HaversineEstimator::new(config.routing.fallback_speed_kmh),
            feed: None,
            config,
            instance: rand::random(),
            requests: AtomicU64::new(0),
        }
    }

    /// Planner with no incident data and an in-memory artifact store.
    pub fn in_memory(provider: P, config: PlannerConfig) -> Self {
        let classifier = Arc::new(SafetyClassifier::new(
            Box::new(InMemoryArtifactStore::new()),
            config.classifier.clone(),
        ));
        Self::new(provider, Arc::new(IncidentGrid::default()), classifier, config)
    }

    /// Shares a learner, e.g. one opened over a persistent reward log.
    pub fn with_learner(mut self, learner: Arc<AdaptiveRouteLearner>) -> Self {
        self.learner = learner;
        self.feed = None;
        self
    }

    /// Routes reported outcomes through a background worker.
    pub fn with_feedback_feed(mut self) -> Self {
        self.feed = Some(FeedbackFeed::spawn(Arc::clone(&self.learner)));
        self
    }

    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    pub fn routing(&self) -> &RoutingAdapter<P> {
        &self.routing
    }

    pub fn classifier(&self) -> &Arc<SafetyClassifier> {
        &self.classifier
    }

    pub fn learner(&self) -> &Arc<AdaptiveRouteLearner> {
        &self.learner
    }

    /// Plans a route. Only malformed requests produce an error; provider,
    /// classifier and time-budget problems are reported through the
    /// response flags.
    #[instrument(skip_all, fields(request_id = tracing::field::Empty, stops = request.stops.len()))]
    pub fn optimize(&self, request: &RouteRequest) -> Result<RouteResponse, PlannerError> {
        let started = Instant::now();
        request.validate()?;

        let request_id = self.requests.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::Span::current().record("request_id", request_id);
        let deadline = started + Duration::from_millis(self.config.time_budget_ms);

        let stops = request.to_stops();
        let context = request.context(&self.config);
        let points: Vec<Coordinate> = iter::once(request.starting_point)
            .chain(stops.iter().map(|stop| stop.coordinate))
            .collect();
        let table = self.score_matrix(&points, context, deadline);

        let quality_degraded = table
            .iter()
            .flatten()
            .flatten()
            .any(|scored| scored.leg.is_degraded() || scored.classifier_fallback);

        let options = SequenceOptions {
            deadline: Some(deadline),
            nearest_neighbor_only: Instant::now() >= deadline,
        };
        let candidate = self.sequencer.sequence(
            request.starting_point,
            &stops,
            |from, to| {
                table[from][to].as_ref().map_or(
                    LegCost {
                        distance_m: 0.0,
                        duration_s: 0.0,
                        safety: SafetyScore::MAX,
                    },
                    ScoredLeg::cost,
                )
            },
            request.weights(),
            options,
        );

        let mut per_leg = Vec::with_capacity(candidate.per_leg.len());
        let mut pending_outcomes = Vec::with_capacity(candidate.per_leg.len());
        for breakdown in &candidate.per_leg {
            let Some(scored) = table[breakdown.from][breakdown.to].as_ref() else {
                continue;
            };
            let to = node_id(&stops, breakdown.to);
            per_leg.push(PerLeg {
                from: node_id(&stops, breakdown.from),
                to: to.clone(),
                distance: scored.leg.distance_m,
                duration: scored.leg.duration_s,
                safety_score: scored.score,
                risk_level: scored.score.band(),
                quality: scored.leg.quality,
            });
            pending_outcomes.push(PendingOutcome {
                signal_id: format!("{:016x}-{request_id}-{to}", self.instance),
                stop_id: to,
                zone: scored.zone,
                predicted: scored.predicted,
            });
        }

        let time_budget_exceeded = candidate.time_budget_exceeded || options.nearest_neighbor_only;
        info!(
            strategy = ?candidate.strategy,
            cost = candidate.cost,
            urgent_first = candidate.urgent_first,
            quality_degraded,
            time_budget_exceeded,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "route optimized"
        );

        Ok(RouteResponse {
            ordered_stops: candidate.stops.iter().map(|stop| stop.id.clone()).collect(),
            total_distance: candidate.total_distance_m,
            total_duration: candidate.total_duration_s,
            total_safety_score: candidate.total_safety_score,
            per_leg,
            strategy: candidate.strategy,
            urgent_first: candidate.urgent_first,
            quality_degraded,
            time_budget_exceeded,
            pending_outcomes,
        })
    }

    /// Rates a path given as consecutive coordinates.
    ///
    /// Segments are straight lines; the path score is the mean of segment
    /// scores weighted by length.
    #[instrument(skip_all, fields(points = request.coordinates.len()))]
    pub fn score_path(&self, request: &ScoreRequest) -> Result<ScoreResponse, PlannerError> {
        request.validate()?;
        let context = request.context(&self.config);

        let segments: Vec<(f64, Assessment)> = request
            .coordinates
            .par_windows(2)
            .map(|pair| {
                let leg = self.straight_leg(pair[0], pair[1]);
                (leg.distance_m.max(1.0), self.assess_leg(&leg, context))
            })
            .collect();

        let total_weight: f64 = segments.iter().map(|(weight, _)| weight).sum();
        let mean = segments
            .iter()
            .map(|(weight, assessment)| weight * f64::from(assessment.score.value()))
            .sum::<f64>()
            / total_weight;

        let mut factors: Vec<ContributingFactor> = Vec::new();
        for (weight, assessment) in &segments {
            for factor in &assessment.factors {
                let share = factor.impact * weight / total_weight;
                match factors.iter_mut().find(|f| f.factor == factor.factor) {
                    Some(existing) => existing.impact += share,
                    None => factors.push(ContributingFactor {
                        factor: factor.factor,
                        impact: share,
                    }),
                }
            }
        }
        factors.retain(|factor| factor.impact > 0.0);
        factors.sort_by(|a, b| b.impact.total_cmp(&a.impact));

        let score = SafetyScore::from_f64(mean);
        Ok(ScoreResponse {
            score,
            risk_level: score.band(),
            contributing_factors: factors,
        })
    }

    /// Feeds an observed outcome back to the learner.
    ///
    /// With a feedback feed the signal is queued; otherwise it is applied
    /// before returning.
    pub fn report_outcome(&self, pending: &PendingOutcome, outcome: DeliveryOutcome) -> Result<(), LearnerError> {
        let signal = pending.resolve(outcome);
        if let Some(feed) = &self.feed {
            if feed.submit(signal.clone()) {
                return Ok(());
            }
            warn!(signal = %signal.id(), "feedback feed stopped, applying inline");
        }
        self.learner.ingest(signal)?;
        Ok(())
    }

    /// Stops the feedback worker after it has drained.
    pub fn shutdown(mut self) {
        if let Some(feed) = self.feed.take() {
            feed.shutdown();
        }
    }

    /// Resolves and scores every directed leg between start and stops.
    ///
    /// `table[from][to]` is `None` for legs into the start and self-loops.
    fn score_matrix(&self, points: &[Coordinate], context: RiderContext, deadline: Instant) -> Vec<Vec<Option<ScoredLeg>>> {
        let n = points.len();
        let pairs: Vec<(usize, usize)> = (0..n)
            .flat_map(|from| (1..n).filter(move |&to| to != from).map(move |to| (from, to)))
            .collect();

        let scored: Vec<ScoredLeg> = pairs
            .par_iter()
            .map(|&(from, to)| {
                let leg = self.routing.resolve_leg_by(points[from], points[to], Some(deadline));
                self.score_leg(leg, context)
            })
            .collect();

        let mut table: Vec<Vec<Option<ScoredLeg>>> = (0..n).map(|_| vec![None; n]).collect();
        for ((from, to), leg) in pairs.into_iter().zip(scored) {
            table[from][to] = Some(leg);
        }
        table
    }

    fn score_leg(&self, leg: Leg, context: RiderContext) -> ScoredLeg {
        let zone = leg.midpoint().zone();
        let features = self.extractor.extract(&leg, context);
        match self.classifier.score(&features) {
            Ok(predicted) => ScoredLeg {
                score: predicted.with_bias(self.learner.bias(zone)),
                leg,
                zone,
                predicted,
                classifier_fallback: false,
            },
            Err(err) => {
                warn!(zone = %zone, error = %err, "classifier unavailable, using fallback score");
                let fallback = SafetyScore::new(self.config.fallback_score);
                ScoredLeg {
                    leg,
                    zone,
                    predicted: fallback,
                    score: fallback,
                    classifier_fallback: true,
                }
            }
        }
    }

    fn assess_leg(&self, leg: &Leg, context: RiderContext) -> Assessment {
        let zone = leg.midpoint().zone();
        let features = self.extractor.extract(leg, context);
        let mut assessment = match self.classifier.assess(&features) {
            Ok(assessment) => assessment,
            Err(err) => {
                warn!(zone = %zone, error = %err, "classifier unavailable, using fallback score");
                return Assessment {
                    score: SafetyScore::new(self.config.fallback_score),
                    factors: Vec::new(),
                };
            }
        };

        let bias = self.learner.bias(zone);
        assessment.score = assessment.score.with_bias(bias);
        if bias < 0.0 {
            assessment.factors.push(ContributingFactor {
                factor: RiskFactor::ZoneHistory,
                impact: -bias / POINTS_PER_LOG_ODDS,
            });
        }
        assessment
    }

    fn straight_leg(&self, origin: Coordinate, destination: Coordinate) -> Leg {
        let estimate = self.estimator.estimate(origin, destination);
        Leg {
            origin,
            destination,
            distance_m: estimate.distance_m,
            duration_s: estimate.duration_s,
            geometry: estimate.geometry,
            quality: LegQuality::DegradedEstimate,
        }
    }
}

impl RoutePlanner<OsrmClient> {
    /// Planner backed by the OSRM server named in `config.osrm`.
    pub fn with_osrm(
        incidents: Arc<dyn IncidentSource>,
        classifier: Arc<SafetyClassifier>,
        config: PlannerConfig,
    ) -> Result<Self, reqwest::Error> {
        let client = OsrmClient::new(config.osrm.clone())?;
        Ok(Self::new(client, incidents, classifier, config))
    }
}

fn node_id(stops: &[Stop], node: usize) -> String {
    match node {
        0 => START_ID.to_string(),
        node => stops[node - 1].id.clone(),
    }
}
