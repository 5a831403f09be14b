use std::collections::VecDeque;
use std::fmt;
use std::ops::Range;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use thiserror::Error;

use super::partition::{ChunkingPolicy, ranges_for, worker_budget};
use crate::archive::{AdapterError, CancelToken, QueryContext, SourceAdapter};
use crate::config::SetupError;
use crate::data::model::{Angle, Fragment, TargetSet};
use crate::data::store::AggregationStore;

// ---------------------------------------------------------------------------
// Configuration and errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Upper bound on worker threads; the policy budget applies when `None`.
    pub max_workers: Option<usize>,
    /// Running jobs older than this are cancelled and reported as timed out.
    pub job_timeout: Option<Duration>,
    /// How often the coordinator wakes to check deadlines and cancellation.
    pub poll_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_workers: None,
            job_timeout: None,
            poll_interval: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Setup(#[from] SetupError),
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("worker pool exited with {unresolved} job(s) unresolved")]
    PoolCrashed { unresolved: usize },
}

// ---------------------------------------------------------------------------
// Jobs
// ---------------------------------------------------------------------------

/// Which adapter and which chunk a job covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobKey {
    pub adapter: String,
    pub chunk: usize,
    pub chunks: usize,
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.chunks > 1 {
            write!(f, "{}[{}/{}]", self.adapter, self.chunk + 1, self.chunks)
        } else {
            write!(f, "{}", self.adapter)
        }
    }
}

#[derive(Debug)]
pub enum FailureReason {
    Adapter(AdapterError),
    Panicked(String),
    TimedOut(Duration),
    Cancelled,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Adapter(e) => write!(f, "{e}"),
            FailureReason::Panicked(msg) => write!(f, "adapter panicked: {msg}"),
            FailureReason::TimedOut(after) => write!(f, "timed out after {after:?}"),
            FailureReason::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// `Pending → Running → {Completed | Failed}`.
#[derive(Debug)]
pub enum JobState {
    Pending,
    Running,
    Completed { points: usize },
    Failed(FailureReason),
}

impl JobState {
    pub fn is_resolved(&self) -> bool {
        matches!(self, JobState::Completed { .. } | JobState::Failed(_))
    }
}

/// Final record of one job, as returned in the [`RunReport`].
#[derive(Debug)]
pub struct JobRecord {
    pub key: JobKey,
    /// Slice of the Target Set this job covered.
    pub targets: Range<usize>,
    pub state: JobState,
    pub elapsed: Option<Duration>,
}

struct Job {
    id: usize,
    adapter: Arc<dyn SourceAdapter>,
    targets: Range<usize>,
    ctx: QueryContext,
}

/// Coordinator-side bookkeeping for a job.
struct Tracked {
    record: JobRecord,
    started: Option<Instant>,
    cancel: CancelToken,
}

enum WorkerEvent {
    Started {
        id: usize,
    },
    Finished {
        id: usize,
        outcome: thread::Result<Result<Fragment, AdapterError>>,
        elapsed: Duration,
    },
}

// ---------------------------------------------------------------------------
// RunReport
// ---------------------------------------------------------------------------

/// Outcome of a run: the final store plus what happened to every job.
#[derive(Debug)]
pub struct RunReport {
    pub store: AggregationStore,
    pub jobs: Vec<JobRecord>,
}

impl RunReport {
    pub fn failures(&self) -> impl Iterator<Item = &JobRecord> {
        self.jobs
            .iter()
            .filter(|j| matches!(j.state, JobState::Failed(_)))
    }

    pub fn completed(&self) -> usize {
        self.jobs
            .iter()
            .filter(|j| matches!(j.state, JobState::Completed { .. }))
            .count()
    }

    /// True when there was at least one job and none of them succeeded.
    pub fn all_failed(&self) -> bool {
        !self.jobs.is_empty() && self.failures().count() == self.jobs.len()
    }

    /// Log one line per failed job and a run summary.
    pub fn log_summary(&self) {
        for job in self.failures() {
            if let JobState::Failed(reason) = &job.state {
                log::warn!(
                    "{} (targets {}..{}) failed: {reason}",
                    job.key,
                    job.targets.start,
                    job.targets.end
                );
            }
        }
        log::info!(
            "{} of {} jobs completed; store holds {} points for {} objects",
            self.completed(),
            self.jobs.len(),
            self.store.len(),
            self.store.object_count()
        );
    }
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

struct AdapterPlan {
    adapter: Arc<dyn SourceAdapter>,
    policy: ChunkingPolicy,
    radius: Angle,
}

/// Fans the Target Set out to every registered adapter on a bounded pool of
/// worker threads. The calling thread is the only writer of the store: each
/// completion arrives over one channel and is merged there, one at a time.
pub struct Scheduler {
    plans: Vec<AdapterPlan>,
    config: SchedulerConfig,
    cancel: CancelToken,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Result<Self, SetupError> {
        if config.max_workers == Some(0) {
            return Err(SetupError::InvalidWorkerCount);
        }
        Ok(Self {
            plans: Vec::new(),
            config,
            cancel: CancelToken::new(),
        })
    }

    /// Register an adapter with its chunking policy and search radius.
    pub fn add(
        &mut self,
        adapter: Arc<dyn SourceAdapter>,
        policy: ChunkingPolicy,
        radius: Angle,
    ) -> Result<(), SetupError> {
        policy.validate()?;
        if self.plans.iter().any(|p| p.adapter.name() == adapter.name()) {
            return Err(SetupError::DuplicateAdapter(adapter.name().to_string()));
        }
        self.plans.push(AdapterPlan {
            adapter,
            policy,
            radius,
        });
        Ok(())
    }

    /// Pool-wide cancellation: pending jobs are dropped, running ones signalled.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// `W = n_single + Σ k` over chunked adapters, capped by `max_workers`.
    pub fn worker_budget(&self) -> usize {
        let budget = worker_budget(self.plans.iter().map(|p| p.policy));
        match self.config.max_workers {
            Some(cap) => budget.min(cap),
            None => budget,
        }
    }

    /// Run every job and wait for all of them to resolve.
    ///
    /// Individual job failures are recorded in the report; only a setup error
    /// or a crashed pool makes this return `Err`.
    pub fn run(&self, targets: Arc<TargetSet>) -> Result<RunReport, SchedulerError> {
        let (jobs, mut tracked) = self.build_jobs(&targets)?;

        let mut store = AggregationStore::new();
        store.register_targets(&targets);

        if jobs.is_empty() {
            return Ok(RunReport {
                store,
                jobs: Vec::new(),
            });
        }

        let n_workers = self.worker_budget().clamp(1, jobs.len());
        log::info!(
            "dispatching {} jobs from {} adapters on {} workers",
            jobs.len(),
            self.plans.len(),
            n_workers
        );

        let queue = Arc::new(Mutex::new(jobs.into_iter().collect::<VecDeque<_>>()));
        let (tx, rx) = mpsc::channel();
        let mut handles = Vec::with_capacity(n_workers);
        for n in 0..n_workers {
            handles.push(spawn_worker(n, &queue, &tx, &targets)?);
        }

        let mut unresolved = tracked.len();
        while unresolved > 0 {
            match rx.recv_timeout(self.config.poll_interval) {
                Ok(event) => unresolved -= apply(event, &mut tracked, &mut store),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(SchedulerError::PoolCrashed { unresolved });
                }
            }

            let expired = self.expire(&mut tracked);
            unresolved -= expired.resolved;
            // A timed-out worker is still inside the adapter; give its slot
            // to a fresh thread so queued jobs are not stuck behind it.
            for _ in 0..expired.timed_out {
                if queue.lock().is_empty() {
                    break;
                }
                let n = handles.len();
                log::debug!("spawning lc-worker-{n} to replace a timed-out worker");
                handles.push(spawn_worker(n, &queue, &tx, &targets)?);
            }

            if unresolved > 0 && handles.iter().all(|h| h.is_finished()) {
                // Exited workers sent everything before exiting.
                while let Ok(event) = rx.try_recv() {
                    unresolved -= apply(event, &mut tracked, &mut store);
                }
                unresolved -= self.expire(&mut tracked).resolved;
                if unresolved > 0 {
                    return Err(SchedulerError::PoolCrashed { unresolved });
                }
            }
        }
        drop(tx);

        // Anything still queued was cancelled before it started.
        queue.lock().clear();
        for handle in handles {
            if handle.is_finished() {
                let _ = handle.join();
            } else {
                log::debug!("detaching busy worker {:?}", handle.thread().name());
            }
        }

        let report = RunReport {
            store,
            jobs: tracked.into_iter().map(|t| t.record).collect(),
        };
        Ok(report)
    }

    fn build_jobs(&self, targets: &TargetSet) -> Result<(Vec<Job>, Vec<Tracked>), SetupError> {
        let mut jobs = Vec::new();
        let mut tracked = Vec::new();
        for plan in &self.plans {
            let ranges = ranges_for(plan.policy, targets.len())?;
            let chunks = ranges.len();
            for (chunk, range) in ranges.into_iter().enumerate() {
                let cancel = self.cancel.child();
                let id = jobs.len();
                jobs.push(Job {
                    id,
                    adapter: plan.adapter.clone(),
                    targets: range.clone(),
                    ctx: QueryContext::new(plan.radius).with_cancel(cancel.clone()),
                });
                tracked.push(Tracked {
                    record: JobRecord {
                        key: JobKey {
                            adapter: plan.adapter.name().to_string(),
                            chunk,
                            chunks,
                        },
                        targets: range,
                        state: JobState::Pending,
                        elapsed: None,
                    },
                    started: None,
                    cancel,
                });
            }
        }
        Ok((jobs, tracked))
    }

    /// Resolve overdue and cancelled jobs.
    fn expire(&self, tracked: &mut [Tracked]) -> Expired {
        let pool_cancelled = self.cancel.is_cancelled();
        let mut expired = Expired::default();
        for job in tracked.iter_mut() {
            match job.record.state {
                JobState::Pending | JobState::Running if pool_cancelled => {
                    job.cancel.cancel();
                    job.record.elapsed = job.started.map(|s| s.elapsed());
                    job.record.state = JobState::Failed(FailureReason::Cancelled);
                    expired.resolved += 1;
                }
                JobState::Running => {
                    let (Some(limit), Some(started)) = (self.config.job_timeout, job.started)
                    else {
                        continue;
                    };
                    let elapsed = started.elapsed();
                    if elapsed > limit {
                        job.cancel.cancel();
                        job.record.elapsed = Some(elapsed);
                        job.record.state = JobState::Failed(FailureReason::TimedOut(limit));
                        expired.resolved += 1;
                        expired.timed_out += 1;
                    }
                }
                _ => {}
            }
        }
        expired
    }
}

#[derive(Debug, Default)]
struct Expired {
    resolved: usize,
    timed_out: usize,
}

/// Record a worker event; returns how many jobs it resolved (0 or 1).
fn apply(event: WorkerEvent, tracked: &mut [Tracked], store: &mut AggregationStore) -> usize {
    match event {
        WorkerEvent::Started { id } => {
            let job = &mut tracked[id];
            if !job.record.state.is_resolved() {
                log::debug!("{} started", job.record.key);
                job.record.state = JobState::Running;
                job.started = Some(Instant::now());
            }
            0
        }
        WorkerEvent::Finished {
            id,
            outcome,
            elapsed,
        } => {
            let job = &mut tracked[id];
            if job.record.state.is_resolved() {
                log::debug!(
                    "{} finished after being resolved; result discarded",
                    job.record.key
                );
                return 0;
            }
            job.record.elapsed = Some(elapsed);
            job.record.state = resolve(outcome, store);
            log::debug!("{} resolved in {elapsed:?}", job.record.key);
            1
        }
    }
}

/// The single merge point: fold a successful fragment into the store.
fn resolve(
    outcome: thread::Result<Result<Fragment, AdapterError>>,
    store: &mut AggregationStore,
) -> JobState {
    match outcome {
        Ok(Ok(fragment)) => {
            let points = fragment.len();
            store.merge(fragment);
            JobState::Completed { points }
        }
        Ok(Err(AdapterError::Cancelled)) => JobState::Failed(FailureReason::Cancelled),
        Ok(Err(e)) => JobState::Failed(FailureReason::Adapter(e)),
        Err(payload) => {
            let msg = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            JobState::Failed(FailureReason::Panicked(msg))
        }
    }
}

fn spawn_worker(
    n: usize,
    queue: &Arc<Mutex<VecDeque<Job>>>,
    tx: &Sender<WorkerEvent>,
    targets: &Arc<TargetSet>,
) -> std::io::Result<JoinHandle<()>> {
    let queue = queue.clone();
    let tx = tx.clone();
    let targets = targets.clone();
    thread::Builder::new()
        .name(format!("lc-worker-{n}"))
        .spawn(move || worker_loop(queue, tx, targets))
}

/// Pull jobs until the queue is empty. A worker whose job was cancelled or
/// timed out exits after reporting, since a replacement may already hold its
/// slot.
fn worker_loop(
    queue: Arc<Mutex<VecDeque<Job>>>,
    tx: Sender<WorkerEvent>,
    targets: Arc<TargetSet>,
) {
    loop {
        let Some(job) = queue.lock().pop_front() else {
            break;
        };
        if tx.send(WorkerEvent::Started { id: job.id }).is_err() {
            break;
        }

        let start = Instant::now();
        let outcome = if job.ctx.cancel.is_cancelled() {
            Ok(Err(AdapterError::Cancelled))
        } else {
            let slice = &targets.as_slice()[job.targets.clone()];
            panic::catch_unwind(AssertUnwindSafe(|| job.adapter.query(slice, &job.ctx)))
        };

        let event = WorkerEvent::Finished {
            id: job.id,
            outcome,
            elapsed: start.elapsed(),
        };
        if tx.send(event).is_err() || job.ctx.cancel.is_cancelled() {
            break;
        }
    }
}
