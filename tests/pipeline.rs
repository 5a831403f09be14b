use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use rusty_lightcurves::archive::{
    AdapterError, QueryContext, SourceAdapter, SyntheticAdapter, SyntheticParams,
};
use rusty_lightcurves::data::model::{
    Angle, Fragment, ObjectId, SkyCoord, Target, TargetSet, ValueKind,
};
use rusty_lightcurves::pipeline::{
    ChunkingPolicy, FailureReason, JobState, RunReport, Scheduler, SchedulerConfig,
};

// ---------------------------------------------------------------------------
// Mock archives
// ---------------------------------------------------------------------------

/// Returns fixed epochs for the object ids it knows about, optionally
/// sleeping first when a given object is in the slice.
struct Canned {
    name: &'static str,
    epochs: Vec<(u64, &'static str, f64)>,
    delays: Vec<(u64, Duration)>,
}

impl SourceAdapter for Canned {
    fn name(&self) -> &str {
        self.name
    }

    fn query(&self, targets: &[Target], _ctx: &QueryContext) -> Result<Fragment, AdapterError> {
        for &(id, delay) in &self.delays {
            if targets.iter().any(|t| t.object_id == ObjectId(id)) {
                thread::sleep(delay);
            }
        }
        let mut fragment = Fragment::new();
        for target in targets {
            for &(id, band, time) in &self.epochs {
                if target.object_id == ObjectId(id) {
                    fragment.record(target, band, time, 1.0, 0.1, ValueKind::Flux);
                }
            }
        }
        Ok(fragment)
    }
}

struct Failing;

impl SourceAdapter for Failing {
    fn name(&self) -> &str {
        "failing"
    }

    fn query(&self, _targets: &[Target], _ctx: &QueryContext) -> Result<Fragment, AdapterError> {
        Err(AdapterError::Archive {
            status: 503,
            message: "service unavailable".into(),
        })
    }
}

struct Panicking;

impl SourceAdapter for Panicking {
    fn name(&self) -> &str {
        "panicking"
    }

    fn query(&self, _targets: &[Target], _ctx: &QueryContext) -> Result<Fragment, AdapterError> {
        panic!("archive client bug");
    }
}

/// Sleeps until cancelled, or for `max` if it never is.
struct Slow {
    max: Duration,
    saw_cancel: Arc<AtomicUsize>,
}

impl SourceAdapter for Slow {
    fn name(&self) -> &str {
        "slow"
    }

    fn query(&self, _targets: &[Target], ctx: &QueryContext) -> Result<Fragment, AdapterError> {
        let start = Instant::now();
        while start.elapsed() < self.max {
            if ctx.cancel.is_cancelled() {
                self.saw_cancel.fetch_add(1, Ordering::SeqCst);
                return Err(AdapterError::Cancelled);
            }
            thread::sleep(Duration::from_millis(5));
        }
        Ok(Fragment::new())
    }
}

fn two_targets() -> Arc<TargetSet> {
    Arc::new(TargetSet::from_coordinates([
        (SkyCoord::new(10.0, -5.0), "A"),
        (SkyCoord::new(200.0, 30.0), "B"),
    ]))
}

fn radius() -> Angle {
    Angle::from_arcsec(1.0)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

fn assert_scenario_layout(report: &RunReport) {
    assert_eq!(report.jobs.len(), 3);
    assert_eq!(report.completed(), 3);

    let store = &report.store;
    assert_eq!(store.len(), 3);
    let a = ObjectId(0);
    let b = ObjectId(1);
    assert_eq!(store.bands_for(a).collect::<Vec<_>>(), vec!["x1", "y1"]);
    assert_eq!(store.bands_for(b).collect::<Vec<_>>(), vec!["y1"]);
    assert_eq!(store.curve(a, "x1").unwrap()[0].time, 1.0);
    assert_eq!(store.curve(a, "y1").unwrap()[0].time, 2.0);
    assert_eq!(store.curve(b, "y1").unwrap()[0].time, 3.0);
    assert_eq!(store.label_for(a), Some("A"));
    assert_eq!(store.label_for(b), Some("B"));
}

fn scenario(x_delay: Duration, y_delay_a: Duration) -> Scheduler {
    let x = Canned {
        name: "x",
        epochs: vec![(0, "x1", 1.0)],
        delays: vec![(0, x_delay)],
    };
    let y = Canned {
        name: "y",
        epochs: vec![(0, "y1", 2.0), (1, "y1", 3.0)],
        delays: vec![(0, y_delay_a)],
    };
    let mut scheduler = Scheduler::new(SchedulerConfig::default()).unwrap();
    scheduler.add(Arc::new(x), ChunkingPolicy::Single, radius()).unwrap();
    scheduler.add(Arc::new(y), ChunkingPolicy::Chunked(2), radius()).unwrap();
    scheduler
}

#[test]
fn single_and_chunked_adapters_merge_into_one_store() {
    let scheduler = scenario(Duration::ZERO, Duration::ZERO);
    assert_eq!(scheduler.worker_budget(), 3);

    let report = scheduler.run(two_targets()).unwrap();
    assert_scenario_layout(&report);
}

#[test]
fn reverse_completion_order_gives_the_same_store() {
    // Submission order is x, y{A}, y{B}; completion runs y{B}, x, y{A}.
    let scheduler = scenario(Duration::from_millis(150), Duration::from_millis(400));

    let report = scheduler.run(two_targets()).unwrap();
    assert_scenario_layout(&report);

    let elapsed = |key: &str| {
        report
            .jobs
            .iter()
            .find(|j| j.key.to_string() == key)
            .and_then(|j| j.elapsed)
            .unwrap()
    };
    assert!(elapsed("y[2/2]") < elapsed("x"));
    assert!(elapsed("x") < elapsed("y[1/2]"));

    let in_order = scenario(Duration::ZERO, Duration::ZERO)
        .run(two_targets())
        .unwrap();
    assert_eq!(report.store.export(), in_order.store.export());
}

#[test]
fn hung_archive_does_not_hold_up_queued_jobs() {
    // Sleeps without ever looking at its cancel token.
    struct Hung;

    impl SourceAdapter for Hung {
        fn name(&self) -> &str {
            "hung"
        }

        fn query(
            &self,
            _targets: &[Target],
            _ctx: &QueryContext,
        ) -> Result<Fragment, AdapterError> {
            thread::sleep(Duration::from_secs(5));
            Ok(Fragment::new())
        }
    }

    let quick = Canned {
        name: "quick",
        epochs: vec![(1, "quick_r", 5.0)],
        delays: Vec::new(),
    };
    let config = SchedulerConfig {
        max_workers: Some(1),
        job_timeout: Some(Duration::from_millis(200)),
        poll_interval: Duration::from_millis(10),
    };
    let mut scheduler = Scheduler::new(config).unwrap();
    scheduler.add(Arc::new(Hung), ChunkingPolicy::Single, radius()).unwrap();
    scheduler.add(Arc::new(quick), ChunkingPolicy::Single, radius()).unwrap();

    let start = Instant::now();
    let report = scheduler.run(two_targets()).unwrap();
    assert!(
        start.elapsed() < Duration::from_secs(2),
        "barrier waited {:?}",
        start.elapsed()
    );

    let hung = report.jobs.iter().find(|j| j.key.adapter == "hung").unwrap();
    assert!(matches!(hung.state, JobState::Failed(FailureReason::TimedOut(_))));
    let quick = report.jobs.iter().find(|j| j.key.adapter == "quick").unwrap();
    assert!(matches!(quick.state, JobState::Completed { points: 1 }));
    assert_eq!(report.store.len(), 1);
}

#[test]
fn a_run_where_every_job_fails_is_flagged() {
    let mut scheduler = Scheduler::new(SchedulerConfig::default()).unwrap();
    scheduler.add(Arc::new(Failing), ChunkingPolicy::Chunked(2), radius()).unwrap();
    let report = scheduler.run(two_targets()).unwrap();
    assert_eq!(report.jobs.len(), 2);
    assert!(report.all_failed());
    assert!(report.store.is_empty());
}

#[test]
fn failures_are_isolated_per_job() {
    let ok = Canned {
        name: "ok",
        epochs: vec![(0, "ok_g", 1.0), (1, "ok_g", 2.0)],
        delays: Vec::new(),
    };
    let mut scheduler = Scheduler::new(SchedulerConfig::default()).unwrap();
    scheduler.add(Arc::new(Failing), ChunkingPolicy::Single, radius()).unwrap();
    scheduler.add(Arc::new(Panicking), ChunkingPolicy::Chunked(2), radius()).unwrap();
    scheduler.add(Arc::new(ok), ChunkingPolicy::Chunked(2), radius()).unwrap();

    let report = scheduler.run(two_targets()).unwrap();

    assert_eq!(report.jobs.len(), 5);
    assert_eq!(report.completed(), 2);
    assert_eq!(report.failures().count(), 3);
    assert!(!report.all_failed());
    assert_eq!(report.store.len(), 2);
    assert!(report.store.all_bands().iter().all(|b| b == "ok_g"));

    for job in report.failures() {
        match (&job.key.adapter[..], &job.state) {
            ("failing", JobState::Failed(FailureReason::Adapter(e))) => {
                assert!(e.is_transient());
            }
            ("panicking", JobState::Failed(FailureReason::Panicked(msg))) => {
                assert!(msg.contains("archive client bug"));
            }
            other => panic!("unexpected failure {other:?}"),
        }
    }
}

#[test]
fn no_counterparts_completes_with_empty_store() {
    let nothing = Canned {
        name: "nothing",
        epochs: Vec::new(),
        delays: Vec::new(),
    };
    let mut scheduler = Scheduler::new(SchedulerConfig::default()).unwrap();
    scheduler.add(Arc::new(nothing), ChunkingPolicy::Chunked(2), radius()).unwrap();

    let report = scheduler.run(two_targets()).unwrap();

    assert_eq!(report.completed(), 2);
    assert!(report.store.is_empty());
    assert!(report
        .jobs
        .iter()
        .all(|j| matches!(j.state, JobState::Completed { points: 0 })));
}

#[test]
fn overdue_job_times_out_without_blocking_others() {
    let saw_cancel = Arc::new(AtomicUsize::new(0));
    let slow = Slow {
        max: Duration::from_secs(30),
        saw_cancel: saw_cancel.clone(),
    };
    let quick = Canned {
        name: "quick",
        epochs: vec![(0, "quick_r", 5.0)],
        delays: Vec::new(),
    };
    let config = SchedulerConfig {
        job_timeout: Some(Duration::from_millis(200)),
        poll_interval: Duration::from_millis(10),
        ..SchedulerConfig::default()
    };
    let mut scheduler = Scheduler::new(config).unwrap();
    scheduler.add(Arc::new(slow), ChunkingPolicy::Single, radius()).unwrap();
    scheduler.add(Arc::new(quick), ChunkingPolicy::Single, radius()).unwrap();

    let start = Instant::now();
    let report = scheduler.run(two_targets()).unwrap();
    assert!(start.elapsed() < Duration::from_secs(10));

    assert_eq!(report.completed(), 1);
    assert_eq!(report.store.len(), 1);
    let slow_job = report.jobs.iter().find(|j| j.key.adapter == "slow").unwrap();
    assert!(matches!(
        slow_job.state,
        JobState::Failed(FailureReason::TimedOut(_))
    ));
}

#[test]
fn pool_cancellation_resolves_every_job() {
    let saw_cancel = Arc::new(AtomicUsize::new(0));
    let slow = Slow {
        max: Duration::from_secs(30),
        saw_cancel: saw_cancel.clone(),
    };
    let config = SchedulerConfig {
        max_workers: Some(1),
        poll_interval: Duration::from_millis(10),
        ..SchedulerConfig::default()
    };
    let mut scheduler = Scheduler::new(config).unwrap();
    scheduler.add(Arc::new(slow), ChunkingPolicy::Chunked(2), radius()).unwrap();

    let token = scheduler.cancel_token();
    let canceller = thread::spawn(move || {
        thread::sleep(Duration::from_millis(100));
        token.cancel();
    });

    let start = Instant::now();
    let report = scheduler.run(two_targets()).unwrap();
    canceller.join().unwrap();

    assert!(start.elapsed() < Duration::from_secs(10));
    assert_eq!(report.jobs.len(), 2);
    assert!(report
        .jobs
        .iter()
        .all(|j| matches!(j.state, JobState::Failed(FailureReason::Cancelled))));
    assert!(report.store.is_empty());
}

#[test]
fn chunking_does_not_change_the_store() {
    let targets = Arc::new(TargetSet::from_coordinates(
        (0..23).map(|i| (SkyCoord::new(i as f64 * 7.0, 1.0), format!("t{i}"))),
    ));
    let params = SyntheticParams {
        match_fraction: 0.6,
        epochs: 12,
        ..SyntheticParams::default()
    };

    let run = |policy: ChunkingPolicy| {
        let mut scheduler = Scheduler::new(SchedulerConfig::default()).unwrap();
        scheduler
            .add(
                Arc::new(SyntheticAdapter::new("synth", params.clone())),
                policy,
                radius(),
            )
            .unwrap();
        scheduler.run(targets.clone()).unwrap().store
    };

    let single = run(ChunkingPolicy::Single);
    let chunked = run(ChunkingPolicy::Chunked(5));
    assert!(!single.is_empty());
    assert_eq!(single.export(), chunked.export());
}

#[test]
fn zero_chunk_policy_is_rejected_before_dispatch() {
    let mut scheduler = Scheduler::new(SchedulerConfig::default()).unwrap();
    let nothing = Canned {
        name: "nothing",
        epochs: Vec::new(),
        delays: Vec::new(),
    };
    assert!(scheduler
        .add(Arc::new(nothing), ChunkingPolicy::Chunked(0), radius())
        .is_err());
}

#[test]
fn duplicate_object_ids_are_rejected() {
    let t = |id| Target {
        object_id: ObjectId(id),
        coord: SkyCoord::new(0.0, 0.0),
        label: String::new(),
    };
    assert!(TargetSet::new(vec![t(1), t(2), t(1)]).is_err());
}
