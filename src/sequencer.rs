//! Multi-objective stop sequencing.
//!
//! Node `0` is the starting point and node `i + 1` is `stops[i]`. Routes are
//! open paths from the start. The cost of a leg is
//! `alpha * minutes + beta * (100 - safety)`.
//!
//! Up to [`SequencerConfig::exact_max_stops`] stops are ordered exactly with
//! a Held-Karp dynamic program; larger sets use nearest-neighbour
//! construction refined by 2-opt. Equal-cost choices are broken by higher
//! priority first, then lower input index.

use std::cmp::Reverse;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::geo::Coordinate;
use crate::model::{Priority, SafetyScore, Stop};

const EPS: f64 = 1e-9;

/// Relative weight of travel time (`alpha`) and risk (`beta`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Weights {
    pub alpha: f64,
    pub beta: f64,
}

impl Default for Weights {
    fn default() -> Self {
        Self { alpha: 0.5, beta: 0.5 }
    }
}

impl Weights {
    pub fn new(alpha: f64, beta: f64) -> Self {
        let clean = |w: f64| if w.is_finite() && w >= 0.0 { w } else { 0.0 };
        Self {
            alpha: clean(alpha),
            beta: clean(beta),
        }
    }

    fn cost(&self, leg: &LegCost) -> f64 {
        self.alpha * leg.duration_s / 60.0 + self.beta * (100.0 - f64::from(leg.safety.value()))
    }
}

/// Resolved inputs for one directed leg.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LegCost {
    pub distance_m: f64,
    pub duration_s: f64,
    pub safety: SafetyScore,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SequencerConfig {
    /// Largest stop count solved exactly.
    pub exact_max_stops: usize,
    /// Upper bound on 2-opt improvement passes.
    pub two_opt_max_passes: usize,
    /// Allowed relative cost increase for putting urgent stops first.
    pub urgent_slack: f64,
}

impl Default for SequencerConfig {
    fn default() -> Self {
        Self {
            exact_max_stops: 8,
            two_opt_max_passes: 1_000,
            urgent_slack: 0.15,
        }
    }
}

/// Per-call controls for the time budget.
#[derive(Debug, Clone, Copy, Default)]
pub struct SequenceOptions {
    /// Refinement stops once this instant passes.
    pub deadline: Option<Instant>,
    /// Skip exact search and refinement entirely.
    pub nearest_neighbor_only: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    Exact,
    NearestNeighborTwoOpt,
    NearestNeighbor,
}

/// One leg of the chosen ordering, in node indices.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LegBreakdown {
    pub from: usize,
    pub to: usize,
    pub cost: LegCost,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RouteCandidate {
    pub start: Coordinate,
    /// Stops in visiting order.
    pub stops: Vec<Stop>,
    /// Input indices of `stops`, in visiting order.
    pub order: Vec<usize>,
    pub total_distance_m: f64,
    pub total_duration_s: f64,
    /// Mean safety over the legs.
    pub total_safety_score: SafetyScore,
    pub per_leg: Vec<LegBreakdown>,
    pub cost: f64,
    pub strategy: Strategy,
    pub urgent_first: bool,
    pub time_budget_exceeded: bool,
}

struct Problem {
    n: usize,
    costs: Vec<Vec<f64>>,
    /// Stop nodes in tie-break order.
    tie_order: Vec<usize>,
    /// Indexed by node; entry 0 (the start) is always false.
    urgent: Vec<bool>,
    urgent_count: usize,
}

impl Problem {
    fn path_cost(&self, order: &[usize]) -> f64 {
        let mut prev = 0;
        let mut total = 0.0;
        for &node in order {
            total += self.costs[prev][node];
            prev = node;
        }
        total
    }

    /// With `urgent_first`, non-urgent stops wait until no urgent stop is left.
    fn allowed(&self, urgent_first: bool, urgent_left: usize, node: usize) -> bool {
        !urgent_first || urgent_left == 0 || self.urgent[node]
    }
}

/// Orders stops to minimize the weighted time/risk cost.
#[derive(Debug, Clone, Default)]
pub struct StopSequencer {
    config: SequencerConfig,
}

impl StopSequencer {
    pub fn new(config: SequencerConfig) -> Self {
        Self { config }
    }

    pub fn sequence<F>(
        &self,
        start: Coordinate,
        stops: &[Stop],
        leg_cost: F,
        weights: Weights,
        options: SequenceOptions,
    ) -> RouteCandidate
    where
        F: Fn(usize, usize) -> LegCost,
    {
        let n = stops.len();
        let legs: Vec<Vec<Option<LegCost>>> = (0..=n)
            .map(|from| {
                (0..=n)
                    .map(|to| (to != 0 && to != from).then(|| leg_cost(from, to)))
                    .collect()
            })
            .collect();
        let costs: Vec<Vec<f64>> = legs
            .iter()
            .map(|row| row.iter().map(|leg| leg.as_ref().map_or(0.0, |leg| weights.cost(leg))).collect())
            .collect();

        let mut tie_order: Vec<usize> = (1..=n).collect();
        tie_order.sort_by_key(|&node| (Reverse(stops[node - 1].priority), node));
        let urgent: Vec<bool> = std::iter::once(false)
            .chain(stops.iter().map(|stop| stop.priority == Priority::Urgent))
            .collect();
        let urgent_count = urgent.iter().filter(|&&u| u).count();

        let problem = Problem {
            n,
            costs,
            tie_order,
            urgent,
            urgent_count,
        };

        let budget_gone = options.nearest_neighbor_only
            || options.deadline.is_some_and(|deadline| Instant::now() >= deadline);
        let use_exact = !budget_gone && n <= self.config.exact_max_stops.min(16);
        let with_urgent_variant = problem.urgent_count > 0 && problem.urgent_count < n;

        let mut exceeded = budget_gone;
        let mut solve = |urgent_first: bool| -> (Vec<usize>, Strategy) {
            if use_exact {
                return (exact(&problem, urgent_first), Strategy::Exact);
            }
            let mut order = nearest_neighbor(&problem, urgent_first);
            if budget_gone {
                return (order, Strategy::NearestNeighbor);
            }
            if !self.two_opt(&problem, &mut order, urgent_first, options.deadline) {
                exceeded = true;
            }
            (order, Strategy::NearestNeighborTwoOpt)
        };

        let (mut order, mut strategy) = solve(false);
        let mut urgent_first = false;
        if with_urgent_variant {
            let (urgent_order, urgent_strategy) = solve(true);
            let best = problem.path_cost(&order);
            let constrained = problem.path_cost(&urgent_order);
            if constrained <= best * (1.0 + self.config.urgent_slack.max(0.0)) + EPS {
                order = urgent_order;
                strategy = urgent_strategy;
                urgent_first = true;
            } else {
                debug!(best, constrained, "urgent-first ordering exceeds slack");
            }
        }

        build_candidate(start, stops, &problem, &legs, order, strategy, urgent_first, exceeded)
    }

    /// First-improvement 2-opt. Returns `false` if the deadline cut it short.
    fn two_opt(&self, problem: &Problem, order: &mut [usize], urgent_first: bool, deadline: Option<Instant>) -> bool {
        let n = order.len();
        if n < 2 {
            return true;
        }
        let boundary = if urgent_first { problem.urgent_count } else { 0 };

        for _ in 0..self.config.two_opt_max_passes {
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                return false;
            }
            if !two_opt_pass(problem, order, boundary) {
                return true;
            }
        }
        true
    }
}

/// Applies the first improving segment reversal. Returns true if one was found.
fn two_opt_pass(problem: &Problem, order: &mut [usize], boundary: usize) -> bool {
    let n = order.len();
    let current = problem.path_cost(order);
    for i in 0..n - 1 {
        for j in i + 1..n {
            // Keep urgent prefix and remaining suffix separate.
            if i < boundary && j >= boundary {
                continue;
            }
            order[i..=j].reverse();
            if problem.path_cost(order) < current - EPS {
                return true;
            }
            order[i..=j].reverse();
        }
    }
    false
}

fn nearest_neighbor(problem: &Problem, urgent_first: bool) -> Vec<usize> {
    let mut order = Vec::with_capacity(problem.n);
    let mut visited = vec![false; problem.n + 1];
    let mut urgent_left = problem.urgent_count;
    let mut current = 0;

    while order.len() < problem.n {
        let mut best: Option<(usize, f64)> = None;
        for &node in &problem.tie_order {
            if visited[node] || !problem.allowed(urgent_first, urgent_left, node) {
                continue;
            }
            let cost = problem.costs[current][node];
            if best.is_none_or(|(_, best_cost)| cost < best_cost - EPS) {
                best = Some((node, cost));
            }
        }
        let Some((node, _)) = best else {
            break;
        };
        visited[node] = true;
        if problem.urgent[node] {
            urgent_left -= 1;
        }
        order.push(node);
        current = node;
    }
    order
}

/// Held-Karp over subsets, reconstructed front to back so that ties resolve
/// in `tie_order`.
fn exact(problem: &Problem, urgent_first: bool) -> Vec<usize> {
    let n = problem.n;
    if n == 0 {
        return Vec::new();
    }
    let full = (1usize << n) - 1;
    let urgent_bits = (1..=n)
        .filter(|&node| problem.urgent[node])
        .fold(0usize, |bits, node| bits | (1 << (node - 1)));
    let urgent_left = |mask: usize| (urgent_bits & !mask).count_ones() as usize;
    // remaining[mask][v]: cheapest completion from v after visiting `mask`.
    let mut remaining = vec![vec![f64::INFINITY; n + 1]; full + 1];
    for v in 1..=n {
        remaining[full][v] = 0.0;
    }
    for mask in (1..full).rev() {
        for v in 1..=n {
            if mask & (1 << (v - 1)) == 0 {
                continue;
            }
            let mut best = f64::INFINITY;
            for j in 1..=n {
                let bit = 1 << (j - 1);
                if mask & bit != 0 || !problem.allowed(urgent_first, urgent_left(mask), j) {
                    continue;
                }
                let cost = problem.costs[v][j] + remaining[mask | bit][j];
                if cost < best {
                    best = cost;
                }
            }
            remaining[mask][v] = best;
        }
    }

    let mut order = Vec::with_capacity(n);
    let mut mask = 0usize;
    let mut current = 0;
    while order.len() < n {
        let mut best: Option<(usize, f64)> = None;
        for &j in &problem.tie_order {
            let bit = 1 << (j - 1);
            if mask & bit != 0 || !problem.allowed(urgent_first, urgent_left(mask), j) {
                continue;
            }
            let cost = problem.costs[current][j] + remaining[mask | bit][j];
            if best.is_none_or(|(_, best_cost)| cost < best_cost - EPS) {
                best = Some((j, cost));
            }
        }
        let Some((node, _)) = best else {
            break;
        };
        mask |= 1 << (node - 1);
        order.push(node);
        current = node;
    }
    order
}

#[allow(clippy::too_many_arguments)]
fn build_candidate(
    start: Coordinate,
    stops: &[Stop],
    problem: &Problem,
    legs: &[Vec<Option<LegCost>>],
    order: Vec<usize>,
    strategy: Strategy,
    urgent_first: bool,
    time_budget_exceeded: bool,
) -> RouteCandidate {
    let mut per_leg = Vec::with_capacity(order.len());
    let mut prev = 0;
    for &node in &order {
        if let Some(cost) = legs[prev][node] {
            per_leg.push(LegBreakdown { from: prev, to: node, cost });
        }
        prev = node;
    }

    let total_distance_m = per_leg.iter().map(|leg| leg.cost.distance_m).sum();
    let total_duration_s = per_leg.iter().map(|leg| leg.cost.duration_s).sum();
    let total_safety_score = if per_leg.is_empty() {
        SafetyScore::MAX
    } else {
        let sum: f64 = per_leg.iter().map(|leg| f64::from(leg.cost.safety.value())).sum();
        SafetyScore::from_f64(sum / per_leg.len() as f64)
    };

    RouteCandidate {
        start,
        stops: order.iter().map(|&node| stops[node - 1].clone()).collect(),
        cost: problem.path_cost(&order),
        order: order.iter().map(|&node| node - 1).collect(),
        total_distance_m,
        total_duration_s,
        total_safety_score,
        per_leg,
        strategy,
        urgent_first,
        time_budget_exceeded,
    }
}
