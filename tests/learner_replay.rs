//! Reward log replay and idempotence.

use std::sync::{Arc, Barrier};
use std::thread;

use saferoute_planner::geo::{Coordinate, ZoneId};
use saferoute_planner::learner::{
    AdaptiveRouteLearner, DeliveryOutcome, FeedbackFeed, LearnerConfig, RewardSignal, rebuild,
};
use saferoute_planner::model::SafetyScore;

fn zone() -> ZoneId {
    Coordinate::new(36.1147, -115.1728).unwrap().zone()
}

fn signal(id: &str, outcome: DeliveryOutcome) -> RewardSignal {
    RewardSignal::new(id, zone(), SafetyScore::new(80), outcome)
}

#[test]
fn replaying_a_signal_twice_equals_once() {
    let config = LearnerConfig::default();
    let once = rebuild(&[signal("a", DeliveryOutcome::Incident)], &config);
    let twice = rebuild(
        &[signal("a", DeliveryOutcome::Incident), signal("a", DeliveryOutcome::Incident)],
        &config,
    );
    assert_eq!(once, twice);

    let learner = AdaptiveRouteLearner::new(config);
    assert!(learner.ingest(signal("a", DeliveryOutcome::Incident)).unwrap());
    assert!(!learner.ingest(signal("a", DeliveryOutcome::Incident)).unwrap());
    assert_eq!(learner.table(), once);
}

#[test]
fn persistent_log_rebuilds_table_on_open() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rewards.jsonl");

    let table = {
        let learner = AdaptiveRouteLearner::open(&path, LearnerConfig::default()).unwrap();
        learner.ingest(signal("a", DeliveryOutcome::NearMiss)).unwrap();
        learner.ingest(signal("b", DeliveryOutcome::Incident)).unwrap();
        learner.ingest(signal("a", DeliveryOutcome::NearMiss)).unwrap();
        learner.table()
    };

    let reopened = AdaptiveRouteLearner::open(&path, LearnerConfig::default()).unwrap();
    assert_eq!(reopened.log().len(), 2);
    assert_eq!(reopened.table(), table);
    assert_eq!(reopened.rebuild_from_log(), table);
}

#[test]
fn feed_drains_before_shutdown() {
    let learner = Arc::new(AdaptiveRouteLearner::new(LearnerConfig::default()));
    let feed = FeedbackFeed::spawn(Arc::clone(&learner));
    for i in 0..20 {
        assert!(feed.submit(signal(&format!("s{i}"), DeliveryOutcome::Safe)));
    }
    feed.shutdown();

    assert_eq!(learner.log().len(), 20);
    assert_eq!(learner.table(), learner.rebuild_from_log());
}

#[test]
fn concurrent_ingest_into_one_zone_loses_nothing() {
    const THREADS: usize = 8;
    const PER_THREAD: usize = 25;
    let outcomes = [DeliveryOutcome::Safe, DeliveryOutcome::NearMiss, DeliveryOutcome::Incident];

    let learner = Arc::new(AdaptiveRouteLearner::new(LearnerConfig::default()));
    let barrier = Arc::new(Barrier::new(THREADS));
    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let learner = Arc::clone(&learner);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for i in 0..PER_THREAD {
                    let applied = learner
                        .ingest(signal(&format!("rider-{t}-{i}"), outcomes[(t + i) % 3]))
                        .unwrap();
                    assert!(applied);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(learner.log().len(), THREADS * PER_THREAD);
    assert_eq!(learner.table().len(), 1);
    assert_eq!(learner.table(), learner.rebuild_from_log());
}
