//! Bounded-concurrency job scheduler.
//!
//! The coordinating thread calls [`JobScheduler::schedule`] for every transfer
//! the planner decides on. Each job consumes a number of slots derived from its
//! size; `schedule` blocks while the pool lacks the slots or while another job
//! still targets the same destination. A fixed set of worker threads runs the
//! job callbacks. [`JobScheduler::wait`] closes the pool, waits for every job
//! to reach a terminal state and reports the aggregated outcome.
//!
//! A failing job never cancels its siblings under the default
//! [`FailurePolicy::BestEffort`]. [`FailurePolicy::FailFast`] drops jobs that
//! have not started yet once any job has failed.

use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{unbounded, Receiver, Sender};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::EngineError;
use crate::model::ProgressUnit;
use crate::progress::{JobStatus, ProgressAggregator, ProgressEvent, ProgressSink, ProgressTotals};

/// Slots reserved on top of the transfer threads for metadata operations
pub const DEFAULT_METADATA_SLOTS: usize = 2;

/// Default number of transfer threads
pub const DEFAULT_THREADS: usize = 5;

/// Upper bound on the slots a single job may consume
pub const MAX_SLOTS_PER_JOB: usize = 4;

const MIB: u64 = 1024 * 1024;

/// Slots a transfer of `size` bytes occupies.
///
/// Larger objects are moved with parallel chunk streams by the remote client,
/// so they hold more of the pool.
pub fn slots_for_size(size: u64) -> usize {
    match size {
        s if s < 32 * MIB => 1,
        s if s < 128 * MIB => 2,
        s if s < 512 * MIB => 3,
        _ => MAX_SLOTS_PER_JOB,
    }
}

/// What happens to queued work after a job fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Every scheduled job runs; errors are collected
    #[default]
    BestEffort,
    /// Jobs that have not started when a failure is observed are dropped
    FailFast,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub threads: usize,
    pub metadata_slots: usize,
    pub failure_policy: FailurePolicy,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig {
            threads: DEFAULT_THREADS,
            metadata_slots: DEFAULT_METADATA_SLOTS,
            failure_policy: FailurePolicy::BestEffort,
        }
    }
}

impl SchedulerConfig {
    pub fn with_threads(threads: usize) -> Self {
        SchedulerConfig {
            threads,
            ..Self::default()
        }
    }

    /// Pool capacity `C`, never below one.
    pub fn capacity(&self) -> usize {
        (self.threads + self.metadata_slots).max(1)
    }
}

/// The work a job performs on a worker thread.
pub type TransferTask = Box<dyn FnOnce(&JobContext) -> Result<(), EngineError> + Send + 'static>;

/// A unit of schedulable work.
pub struct TransferJob {
    id: Uuid,
    key: String,
    destination: PathBuf,
    size: u64,
    unit: ProgressUnit,
    task: TransferTask,
}

impl TransferJob {
    /// `key` identifies the job (its canonical source path); `destination` is
    /// the path it writes, used to keep two jobs off the same target.
    pub fn new<F>(
        key: impl Into<String>,
        destination: impl Into<PathBuf>,
        size: u64,
        unit: ProgressUnit,
        task: F,
    ) -> Self
    where
        F: FnOnce(&JobContext) -> Result<(), EngineError> + Send + 'static,
    {
        TransferJob {
            id: Uuid::new_v4(),
            key: key.into(),
            destination: destination.into(),
            size,
            unit,
            task: Box::new(task),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    fn total(&self) -> u64 {
        match self.unit {
            ProgressUnit::Bytes => self.size,
            ProgressUnit::Items => 1,
        }
    }
}

/// Handed to a running job for progress reporting.
pub struct JobContext {
    id: Uuid,
    key: String,
    progress: Sender<ProgressEvent>,
}

impl JobContext {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Report `processed` out of `total` units.
    pub fn report(&self, processed: u64, total: u64) {
        let _ = self.progress.send(ProgressEvent::Advanced {
            id: self.id,
            processed,
            total,
        });
    }
}

/// Aggregated result of every job the scheduler ran.
#[derive(Debug)]
pub struct SchedulerOutcome {
    pub scheduled: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    /// Failures in the order they were observed
    pub errors: Vec<EngineError>,
    pub peak_committed: usize,
    pub totals: ProgressTotals,
}

impl SchedulerOutcome {
    pub fn first_error(&self) -> Option<&EngineError> {
        self.errors.first()
    }

    pub fn is_success(&self) -> bool {
        self.errors.is_empty() && self.cancelled == 0
    }

    /// Collapse into the first error (with the failure count when several
    /// jobs failed), or the outcome itself when every job succeeded.
    pub fn into_result(mut self) -> Result<SchedulerOutcome, EngineError> {
        if self.errors.is_empty() {
            return Ok(self);
        }
        let failed = self.errors.len();
        let first = self.errors.remove(0);
        if failed == 1 {
            Err(first)
        } else {
            Err(EngineError::Aggregate {
                first: Box::new(first),
                failed,
            })
        }
    }
}

#[derive(Default)]
struct Slots {
    committed: usize,
    peak: usize,
    in_flight: HashSet<PathBuf>,
}

struct Shared {
    capacity: usize,
    policy: FailurePolicy,
    slots: Mutex<Slots>,
    freed: Condvar,
    errors: Mutex<Vec<EngineError>>,
    failed_seen: AtomicBool,
    completed: AtomicUsize,
    cancelled: AtomicUsize,
}

impl Shared {
    fn lock_slots(&self) -> MutexGuard<'_, Slots> {
        self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn release(&self, weight: usize, destination: &Path) {
        let mut slots = self.lock_slots();
        slots.committed -= weight;
        slots.in_flight.remove(destination);
        drop(slots);
        self.freed.notify_all();
    }

    fn record_failure(&self, error: EngineError) {
        self.failed_seen.store(true, Ordering::SeqCst);
        self.errors
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(error);
    }
}

struct Dispatch {
    job: TransferJob,
    weight: usize,
}

/// Bounded pool of transfer workers.
pub struct JobScheduler {
    shared: Arc<Shared>,
    dispatch: Option<Sender<Dispatch>>,
    workers: Vec<JoinHandle<()>>,
    progress: Option<ProgressAggregator>,
    scheduled: usize,
}

impl JobScheduler {
    /// Start `capacity` workers and the progress aggregator.
    pub fn start(config: SchedulerConfig, sink: Arc<dyn ProgressSink>) -> Result<Self, EngineError> {
        let capacity = config.capacity();
        let shared = Arc::new(Shared {
            capacity,
            policy: config.failure_policy,
            slots: Mutex::new(Slots::default()),
            freed: Condvar::new(),
            errors: Mutex::new(Vec::new()),
            failed_seen: AtomicBool::new(false),
            completed: AtomicUsize::new(0),
            cancelled: AtomicUsize::new(0),
        });
        let progress = ProgressAggregator::spawn(sink)?;
        let (dispatch, receiver) = unbounded::<Dispatch>();

        let mut scheduler = JobScheduler {
            shared,
            dispatch: Some(dispatch),
            workers: Vec::with_capacity(capacity),
            progress: Some(progress),
            scheduled: 0,
        };

        for index in 0..capacity {
            let receiver = receiver.clone();
            let shared = Arc::clone(&scheduler.shared);
            let events = scheduler.progress_sender();
            let handle = thread::Builder::new()
                .name(format!("gridsync-worker-{}", index))
                .spawn(move || worker_loop(receiver, shared, events))
                .map_err(EngineError::Spawn)?;
            scheduler.workers.push(handle);
        }

        debug!("scheduler started with capacity {}", capacity);
        Ok(scheduler)
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Slots currently committed to dispatched jobs.
    pub fn committed(&self) -> usize {
        self.shared.lock_slots().committed
    }

    /// Hand a job to the pool, blocking until its slots are free.
    pub fn schedule(&mut self, job: TransferJob) -> Result<(), EngineError> {
        let weight = slots_for_size(job.size).min(self.shared.capacity);

        if self.shared.policy == FailurePolicy::FailFast && self.shared.failed_seen.load(Ordering::SeqCst) {
            debug!("fail-fast: dropping {}", job.key);
            self.cancel(job);
            return Ok(());
        }

        {
            let mut slots = self.shared.lock_slots();
            while slots.committed + weight > self.shared.capacity
                || slots.in_flight.contains(&job.destination)
            {
                slots = self
                    .shared
                    .freed
                    .wait(slots)
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
            }
            slots.committed += weight;
            slots.peak = slots.peak.max(slots.committed);
            slots.in_flight.insert(job.destination.clone());
        }

        debug!("scheduled {} ({} slot(s))", job.key, weight);
        let sender = self.dispatch.as_ref().ok_or_else(pool_stopped)?;
        if let Err(returned) = sender.send(Dispatch { job, weight }) {
            let Dispatch { job, weight } = returned.into_inner();
            self.shared.release(weight, &job.destination);
            return Err(pool_stopped());
        }
        self.scheduled += 1;
        Ok(())
    }

    /// Stop accepting work, wait for every job, and aggregate the results.
    pub fn wait(mut self) -> SchedulerOutcome {
        self.shutdown_workers();

        let totals = self
            .progress
            .take()
            .map(ProgressAggregator::finish)
            .unwrap_or_default();
        let errors = std::mem::take(
            &mut *self
                .shared
                .errors
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        );
        let peak_committed = self.shared.lock_slots().peak;

        SchedulerOutcome {
            scheduled: self.scheduled,
            completed: self.shared.completed.load(Ordering::SeqCst),
            failed: errors.len(),
            cancelled: self.shared.cancelled.load(Ordering::SeqCst),
            errors,
            peak_committed,
            totals,
        }
    }

    fn progress_sender(&self) -> Sender<ProgressEvent> {
        match &self.progress {
            Some(progress) => progress.sender(),
            None => unbounded().0,
        }
    }

    fn cancel(&mut self, job: TransferJob) {
        let events = self.progress_sender();
        let _ = events.send(ProgressEvent::Started {
            id: job.id,
            key: job.key.clone(),
            unit: job.unit,
            total: job.total(),
        });
        let _ = events.send(ProgressEvent::Finished {
            id: job.id,
            status: JobStatus::Cancelled,
        });
        self.shared.cancelled.fetch_add(1, Ordering::SeqCst);
        self.scheduled += 1;
    }

    fn shutdown_workers(&mut self) {
        self.dispatch.take();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for JobScheduler {
    fn drop(&mut self) {
        self.shutdown_workers();
    }
}

fn pool_stopped() -> EngineError {
    EngineError::Spawn(std::io::Error::new(
        std::io::ErrorKind::BrokenPipe,
        "worker pool is no longer accepting jobs",
    ))
}

fn worker_loop(receiver: Receiver<Dispatch>, shared: Arc<Shared>, events: Sender<ProgressEvent>) {
    for Dispatch { job, weight } in receiver {
        let TransferJob {
            id,
            key,
            destination,
            unit,
            size,
            task,
        } = job;
        let total = match unit {
            ProgressUnit::Bytes => size,
            ProgressUnit::Items => 1,
        };
        let _ = events.send(ProgressEvent::Started {
            id,
            key: key.clone(),
            unit,
            total,
        });

        let status = if shared.policy == FailurePolicy::FailFast && shared.failed_seen.load(Ordering::SeqCst) {
            debug!("fail-fast: dropping queued {}", key);
            shared.cancelled.fetch_add(1, Ordering::SeqCst);
            JobStatus::Cancelled
        } else {
            let context = JobContext {
                id,
                key: key.clone(),
                progress: events.clone(),
            };
            let result = panic::catch_unwind(AssertUnwindSafe(|| task(&context)))
                .unwrap_or_else(|_| Err(EngineError::Panicked { key: key.clone() }));
            match result {
                Ok(()) => {
                    shared.completed.fetch_add(1, Ordering::SeqCst);
                    JobStatus::Done
                }
                Err(error) => {
                    warn!("job {} failed: {}", key, error);
                    let message = error.to_string();
                    shared.record_failure(error);
                    JobStatus::Failed(message)
                }
            }
        };

        let _ = events.send(ProgressEvent::Finished { id, status });
        shared.release(weight, &destination);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NoopProgress;
    use std::time::Duration;

    fn scheduler(threads: usize, metadata_slots: usize, policy: FailurePolicy) -> JobScheduler {
        JobScheduler::start(
            SchedulerConfig {
                threads,
                metadata_slots,
                failure_policy: policy,
            },
            Arc::new(NoopProgress),
        )
        .expect("start scheduler")
    }

    #[test]
    fn test_slots_step_function() {
        assert_eq!(slots_for_size(0), 1);
        assert_eq!(slots_for_size(32 * MIB - 1), 1);
        assert_eq!(slots_for_size(32 * MIB), 2);
        assert_eq!(slots_for_size(200 * MIB), 3);
        assert_eq!(slots_for_size(10 * 1024 * MIB), MAX_SLOTS_PER_JOB);
    }

    #[test]
    fn test_capacity_includes_metadata_slots() {
        assert_eq!(SchedulerConfig::with_threads(5).capacity(), 7);
        let zero = SchedulerConfig {
            threads: 0,
            metadata_slots: 0,
            failure_policy: FailurePolicy::BestEffort,
        };
        assert_eq!(zero.capacity(), 1);
    }

    #[test]
    fn test_committed_weight_never_exceeds_capacity() {
        let mut pool = scheduler(2, 1, FailurePolicy::BestEffort);
        let capacity = pool.capacity();
        let running = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let sizes = [0, 40 * MIB, 0, 300 * MIB, 1, 600 * MIB, 2, 100 * MIB, 3, 0];
        for (i, size) in sizes.iter().copied().enumerate() {
            let weight = slots_for_size(size).min(capacity);
            let running = Arc::clone(&running);
            let max_seen = Arc::clone(&max_seen);
            pool.schedule(TransferJob::new(
                format!("/src/{}", i),
                format!("/dst/{}", i),
                size,
                ProgressUnit::Bytes,
                move |_ctx| {
                    let now = running.fetch_add(weight, Ordering::SeqCst) + weight;
                    max_seen.fetch_max(now, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(15));
                    running.fetch_sub(weight, Ordering::SeqCst);
                    Ok(())
                },
            ))
            .expect("schedule");
            assert!(pool.committed() <= capacity);
        }

        let outcome = pool.wait();
        assert_eq!(outcome.scheduled, sizes.len());
        assert_eq!(outcome.completed, sizes.len());
        assert!(outcome.peak_committed <= capacity);
        assert!(max_seen.load(Ordering::SeqCst) <= capacity);
        assert_eq!(running.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_wait_returns_after_all_jobs_terminal() {
        let mut pool = scheduler(3, 0, FailurePolicy::BestEffort);
        let finished = Arc::new(AtomicUsize::new(0));
        for i in 0..12 {
            let finished = Arc::clone(&finished);
            pool.schedule(TransferJob::new(
                format!("k{}", i),
                format!("/d/{}", i),
                10,
                ProgressUnit::Bytes,
                move |ctx| {
                    thread::sleep(Duration::from_millis(5));
                    ctx.report(10, 10);
                    finished.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                },
            ))
            .expect("schedule");
        }

        let outcome = pool.wait();
        assert_eq!(finished.load(Ordering::SeqCst), 12);
        assert_eq!(outcome.totals.jobs_done, 12);
        assert_eq!(outcome.totals.bytes_processed, 120);
        assert!(outcome.is_success());
    }

    #[test]
    fn test_failures_do_not_cancel_siblings() {
        let mut pool = scheduler(2, 0, FailurePolicy::BestEffort);
        for i in 0..6 {
            pool.schedule(TransferJob::new(
                format!("k{}", i),
                format!("/d/{}", i),
                1,
                ProgressUnit::Bytes,
                move |_| {
                    if i % 2 == 0 {
                        Err(EngineError::not_found(format!("/src/{}", i)))
                    } else {
                        Ok(())
                    }
                },
            ))
            .expect("schedule");
        }

        let outcome = pool.wait();
        assert_eq!(outcome.completed, 3);
        assert_eq!(outcome.failed, 3);
        assert!(outcome.first_error().is_some());

        match outcome.into_result() {
            Err(EngineError::Aggregate { failed, first }) => {
                assert_eq!(failed, 3);
                assert!(first.is_not_found());
            }
            other => panic!("expected aggregate error, got {:?}", other.map(|o| o.completed)),
        }
    }

    #[test]
    fn test_single_failure_is_returned_as_is() {
        let mut pool = scheduler(1, 0, FailurePolicy::BestEffort);
        pool.schedule(TransferJob::new("k", "/d", 1, ProgressUnit::Items, |_| {
            Err(EngineError::InvalidArguments("nope".into()))
        }))
        .expect("schedule");

        let err = pool.wait().into_result().unwrap_err();
        assert!(matches!(err, EngineError::InvalidArguments(_)));
    }

    #[test]
    fn test_same_destination_never_runs_concurrently() {
        let mut pool = scheduler(4, 0, FailurePolicy::BestEffort);
        let active = Arc::new(AtomicUsize::new(0));
        let overlap = Arc::new(AtomicBool::new(false));

        for i in 0..6 {
            let active = Arc::clone(&active);
            let overlap = Arc::clone(&overlap);
            pool.schedule(TransferJob::new(
                format!("k{}", i),
                "/dst/shared.bin",
                1,
                ProgressUnit::Bytes,
                move |_| {
                    if active.fetch_add(1, Ordering::SeqCst) > 0 {
                        overlap.store(true, Ordering::SeqCst);
                    }
                    thread::sleep(Duration::from_millis(5));
                    active.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                },
            ))
            .expect("schedule");
        }

        assert_eq!(pool.wait().completed, 6);
        assert!(!overlap.load(Ordering::SeqCst));
    }

    #[test]
    fn test_panicking_job_is_contained() {
        let mut pool = scheduler(1, 0, FailurePolicy::BestEffort);
        pool.schedule(TransferJob::new("boom", "/d/boom", 1, ProgressUnit::Bytes, |_| {
            panic!("job exploded")
        }))
        .expect("schedule");
        pool.schedule(TransferJob::new("ok", "/d/ok", 1, ProgressUnit::Bytes, |_| Ok(())))
            .expect("schedule");

        let outcome = pool.wait();
        assert_eq!(outcome.completed, 1);
        assert!(matches!(outcome.first_error(), Some(EngineError::Panicked { .. })));
    }

    #[test]
    fn test_fail_fast_drops_unstarted_jobs() {
        let mut pool = scheduler(1, 0, FailurePolicy::FailFast);
        let ran = Arc::new(AtomicUsize::new(0));

        pool.schedule(TransferJob::new("first", "/d/0", 1, ProgressUnit::Bytes, |_| {
            Err(EngineError::not_found("/s/0"))
        }))
        .expect("schedule");

        for i in 1..5 {
            let ran = Arc::clone(&ran);
            pool.schedule(TransferJob::new(
                format!("k{}", i),
                format!("/d/{}", i),
                1,
                ProgressUnit::Bytes,
                move |_| {
                    ran.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                },
            ))
            .expect("schedule");
        }

        let outcome = pool.wait();
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        assert_eq!(outcome.failed, 1);
        assert_eq!(outcome.cancelled, 4);
        assert_eq!(outcome.totals.jobs_cancelled, 4);
    }
}
