//! Leg resolution with retries, caching, and a great-circle fallback.
//!
//! [`RoutingAdapter::resolve_leg`] always returns a [`Leg`]. Provider
//! failures are retried with exponential backoff; when retries run out, or
//! the request deadline passes, the leg is estimated locally and marked
//! [`LegQuality::DegradedEstimate`].

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::geo::Coordinate;
use crate::haversine::{DEFAULT_SPEED_KMH, HaversineEstimator};
use crate::model::{Leg, LegQuality};
use crate::polyline::Polyline;
use crate::traits::RouteProvider;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    /// Total provider attempts per leg, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry; doubled on every further retry.
    pub base_backoff_ms: u64,
    /// Upper bound for a single backoff sleep.
    pub max_backoff_ms: u64,
    /// Timeout for one provider call.
    pub call_timeout_ms: u64,
    /// Lifetime of a cached exact leg.
    pub cache_ttl_secs: u64,
    /// Decimal places kept when keying the cache.
    pub cache_precision: u32,
    /// Most entries the cache holds; new legs are not cached beyond it.
    pub cache_capacity: usize,
    /// Speed assumed by the fallback estimate.
    pub fallback_speed_kmh: f64,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff_ms: 100,
            max_backoff_ms: 2_000,
            call_timeout_ms: 5_000,
            cache_ttl_secs: 300,
            cache_precision: 5,
            cache_capacity: 10_000,
            fallback_speed_kmh: DEFAULT_SPEED_KMH,
        }
    }
}

/// Inserts between sweeps of expired cache entries.
const SWEEP_INTERVAL: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct LegKey {
    origin: (i64, i64),
    destination: (i64, i64),
}

impl LegKey {
    fn new(origin: Coordinate, destination: Coordinate, precision: u32) -> Self {
        let scale = 10f64.powi(precision.min(9) as i32);
        let round = |c: Coordinate| ((c.lat * scale).round() as i64, (c.lon * scale).round() as i64);
        Self {
            origin: round(origin),
            destination: round(destination),
        }
    }
}

#[derive(Debug, Clone)]
struct CachedLeg {
    leg: Leg,
    inserted_at: Instant,
}

/// Resolves legs against a [`RouteProvider`], shared across requests.
pub struct RoutingAdapter<P> {
    provider: P,
    config: RoutingConfig,
    estimator: HaversineEstimator,
    cache: DashMap<LegKey, CachedLeg>,
    inserts: AtomicUsize,
}

impl<P: RouteProvider> RoutingAdapter<P> {
    pub fn new(provider: P, config: RoutingConfig) -> Self {
        let estimator = HaversineEstimator::new(config.fallback_speed_kmh);
        Self {
            provider,
            config,
            estimator,
            cache: DashMap::new(),
            inserts: AtomicUsize::new(0),
        }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Resolves a leg with no deadline.
    pub fn resolve_leg(&self, origin: Coordinate, destination: Coordinate) -> Leg {
        self.resolve_leg_by(origin, destination, None)
    }

    /// Resolves a leg, abandoning provider work once `deadline` has passed.
    pub fn resolve_leg_by(
        &self,
        origin: Coordinate,
        destination: Coordinate,
        deadline: Option<Instant>,
    ) -> Leg {
        if origin == destination {
            return Leg {
                origin,
                destination,
                distance_m: 0.0,
                duration_s: 0.0,
                geometry: Polyline::new(vec![origin]),
                quality: LegQuality::Exact,
            };
        }

        let key = LegKey::new(origin, destination, self.config.cache_precision);
        if let Some(leg) = self.cached(&key) {
            return leg;
        }

        match self.fetch_with_retry(origin, destination, deadline) {
            Some(leg) => {
                self.remember(key, &leg);
                leg
            }
            None => self.degraded(origin, destination),
        }
    }

    /// Number of cache entries, including expired ones not yet swept.
    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    fn ttl(&self) -> Duration {
        Duration::from_secs(self.config.cache_ttl_secs)
    }

    fn cached(&self, key: &LegKey) -> Option<Leg> {
        let ttl = self.ttl();
        {
            let entry = self.cache.get(key)?;
            if entry.inserted_at.elapsed() < ttl {
                return Some(entry.leg.clone());
            }
        }
        // The read guard must be released before removing. Another thread
        // may have refreshed the entry in between.
        self.cache
            .remove_if(key, |_, entry| entry.inserted_at.elapsed() >= ttl);
        None
    }

    fn remember(&self, key: LegKey, leg: &Leg) {
        let capacity = self.config.cache_capacity;
        let inserts = self.inserts.fetch_add(1, Ordering::Relaxed) + 1;
        if inserts % SWEEP_INTERVAL == 0 || self.cache.len() >= capacity {
            let ttl = self.ttl();
            self.cache.retain(|_, entry| entry.inserted_at.elapsed() < ttl);
            debug!(entries = self.cache.len(), "swept leg cache");
        }
        if self.cache.len() >= capacity && !self.cache.contains_key(&key) {
            return;
        }
        self.cache.insert(
            key,
            CachedLeg {
                leg: leg.clone(),
                inserted_at: Instant::now(),
            },
        );
    }

    fn fetch_with_retry(
        &self,
        origin: Coordinate,
        destination: Coordinate,
        deadline: Option<Instant>,
    ) -> Option<Leg> {
        let attempts = self.config.max_attempts.max(1);
        for attempt in 0..attempts {
            let Some(timeout) = self.call_timeout(deadline) else {
                debug!(?origin, ?destination, "deadline reached, abandoning provider call");
                return None;
            };

            match self.provider.route(origin, destination, timeout) {
                Ok(route) => {
                    return Some(Leg {
                        origin,
                        destination,
                        distance_m: route.distance_m,
                        duration_s: route.duration_s,
                        geometry: route.geometry,
                        quality: LegQuality::Exact,
                    });
                }
                Err(err) => {
                    warn!(attempt = attempt + 1, attempts, error = %err, "routing provider call failed");
                }
            }

            if attempt + 1 < attempts {
                let backoff = self.backoff(attempt);
                if deadline.is_some_and(|deadline| Instant::now() + backoff >= deadline) {
                    return None;
                }
                std::thread::sleep(backoff);
            }
        }
        None
    }

    fn call_timeout(&self, deadline: Option<Instant>) -> Option<Duration> {
        let configured = Duration::from_millis(self.config.call_timeout_ms.max(1));
        match deadline {
            None => Some(configured),
            Some(deadline) => {
                let remaining = deadline.checked_duration_since(Instant::now())?;
                if remaining.is_zero() {
                    None
                } else {
                    Some(remaining.min(configured))
                }
            }
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.min(16);
        let millis = self
            .config
            .base_backoff_ms
            .saturating_mul(factor)
            .min(self.config.max_backoff_ms);
        Duration::from_millis(millis)
    }

    fn degraded(&self, origin: Coordinate, destination: Coordinate) -> Leg {
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

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Barrier};
    use std::thread;

    use super::*;
    use crate::error::ProviderError;
    use crate::traits::ProviderRoute;

    /// Fails `failures` times, then answers with a fixed route.
    struct FlakyProvider {
        failures: usize,
        calls: AtomicUsize,
    }

    impl FlakyProvider {
        fn new(failures: usize) -> Self {
            Self {
                failures,
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl RouteProvider for FlakyProvider {
        fn route(
            &self,
            origin: Coordinate,
            destination: Coordinate,
            _timeout: Duration,
        ) -> Result<ProviderRoute, ProviderError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err(ProviderError::Unavailable("stub outage".to_string()));
            }
            Ok(ProviderRoute {
                distance_m: 1234.0,
                duration_s: 321.0,
                geometry: Polyline::new(vec![origin, destination]),
            })
        }
    }

    fn fast_config() -> RoutingConfig {
        RoutingConfig {
            base_backoff_ms: 1,
            ..RoutingConfig::default()
        }
    }

    fn points() -> (Coordinate, Coordinate) {
        (
            Coordinate::new(36.1147, -115.1728).unwrap(),
            Coordinate::new(36.1727, -115.158).unwrap(),
        )
    }

    #[test]
    fn retries_then_succeeds() {
        let adapter = RoutingAdapter::new(FlakyProvider::new(2), fast_config());
        let (a, b) = points();
        let leg = adapter.resolve_leg(a, b);
        assert_eq!(leg.quality, LegQuality::Exact);
        assert_eq!(leg.distance_m, 1234.0);
        assert_eq!(adapter.provider().calls(), 3);
    }

    #[test]
    fn exhausted_retries_degrade() {
        let adapter = RoutingAdapter::new(FlakyProvider::new(usize::MAX), fast_config());
        let (a, b) = points();
        let leg = adapter.resolve_leg(a, b);
        assert_eq!(leg.quality, LegQuality::DegradedEstimate);
        assert_eq!(adapter.provider().calls(), 3);
        assert!(leg.distance_m > 6000.0 && leg.distance_m < 7000.0, "got {}", leg.distance_m);
        assert_eq!(adapter.cache_len(), 0, "degraded legs are not cached");
    }

    #[test]
    fn cache_avoids_second_call() {
        let adapter = RoutingAdapter::new(FlakyProvider::new(0), fast_config());
        let (a, b) = points();
        let first = adapter.resolve_leg(a, b);
        // Within cache precision of the first request.
        let nudged = Coordinate::new(a.lat + 1e-7, a.lon).unwrap();
        let second = adapter.resolve_leg(nudged, b);
        assert_eq!(first, second);
        assert_eq!(adapter.provider().calls(), 1);
    }

    #[test]
    fn expired_cache_entry_refetches() {
        let config = RoutingConfig {
            cache_ttl_secs: 0,
            ..fast_config()
        };
        let adapter = RoutingAdapter::new(FlakyProvider::new(0), config);
        let (a, b) = points();
        adapter.resolve_leg(a, b);
        adapter.resolve_leg(a, b);
        assert_eq!(adapter.provider().calls(), 2);
    }

    fn spread(i: usize) -> (Coordinate, Coordinate) {
        let (a, b) = points();
        (Coordinate::new(a.lat + i as f64 * 1e-4, a.lon).unwrap(), b)
    }

    #[test]
    fn expired_entries_are_swept() {
        let config = RoutingConfig {
            cache_ttl_secs: 0,
            ..fast_config()
        };
        let adapter = RoutingAdapter::new(FlakyProvider::new(0), config);
        for i in 0..600 {
            let (a, b) = spread(i);
            adapter.resolve_leg(a, b);
        }
        assert!(adapter.cache_len() <= SWEEP_INTERVAL, "cache holds {}", adapter.cache_len());
    }

    #[test]
    fn cache_stops_growing_at_capacity() {
        let config = RoutingConfig {
            cache_capacity: 10,
            ..fast_config()
        };
        let adapter = RoutingAdapter::new(FlakyProvider::new(0), config);
        for i in 0..25 {
            let (a, b) = spread(i);
            adapter.resolve_leg(a, b);
        }
        assert_eq!(adapter.cache_len(), 10);
        assert_eq!(adapter.provider().calls(), 25);

        // Cached legs are still served.
        let (a, b) = spread(0);
        adapter.resolve_leg(a, b);
        assert_eq!(adapter.provider().calls(), 25);
    }

    #[test]
    fn concurrent_lookups_share_one_entry() {
        let adapter = Arc::new(RoutingAdapter::new(FlakyProvider::new(0), fast_config()));
        let barrier = Arc::new(Barrier::new(8));
        let (a, b) = points();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let adapter = Arc::clone(&adapter);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    adapter.resolve_leg(a, b)
                })
            })
            .collect();
        let legs: Vec<Leg> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert!(legs.iter().all(|leg| *leg == legs[0]));
        assert_eq!(adapter.cache_len(), 1);
        let calls = adapter.provider().calls();
        assert!((1..=8).contains(&calls), "{calls} provider calls");

        adapter.resolve_leg(a, b);
        assert_eq!(adapter.provider().calls(), calls);
    }

    #[test]
    fn direction_is_part_of_the_key() {
        let adapter = RoutingAdapter::new(FlakyProvider::new(0), fast_config());
        let (a, b) = points();
        adapter.resolve_leg(a, b);
        adapter.resolve_leg(b, a);
        assert_eq!(adapter.provider().calls(), 2);
    }

    #[test]
    fn past_deadline_skips_provider() {
        let adapter = RoutingAdapter::new(FlakyProvider::new(0), fast_config());
        let (a, b) = points();
        let leg = adapter.resolve_leg_by(a, b, Some(Instant::now()));
        assert_eq!(leg.quality, LegQuality::DegradedEstimate);
        assert_eq!(adapter.provider().calls(), 0);
    }

    #[test]
    fn same_point_is_zero_leg() {
        let adapter = RoutingAdapter::new(FlakyProvider::new(0), fast_config());
        let (a, _) = points();
        let leg = adapter.resolve_leg(a, a);
        assert_eq!(leg.distance_m, 0.0);
        assert_eq!(leg.quality, LegQuality::Exact);
        assert_eq!(adapter.provider().calls(), 0);
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let adapter = RoutingAdapter::new(
            FlakyProvider::new(0),
            RoutingConfig {
                base_backoff_ms: 100,
                max_backoff_ms: 300,
                ..RoutingConfig::default()
            },
        );
        assert_eq!(adapter.backoff(0), Duration::from_millis(100));
        assert_eq!(adapter.backoff(1), Duration::from_millis(200));
        assert_eq!(adapter.backoff(2), Duration::from_millis(300));
    }
}
