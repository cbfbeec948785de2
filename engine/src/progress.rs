//! Progress reporting.
//!
//! Workers never share counters. Each running job sends `ProgressEvent`s over a
//! channel to one aggregator thread, which owns the per-job state and forwards
//! snapshots to a `ProgressSink`. The sink decouples the engine from any
//! particular UI (terminal bars, logs, nothing at all).

use std::collections::HashMap;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{unbounded, Receiver, Sender};
use uuid::Uuid;

use crate::error::EngineError;
use crate::model::ProgressUnit;

/// Terminal status of a job as seen by progress consumers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    Done,
    Failed(String),
    /// Dropped before starting (fail-fast policy)
    Cancelled,
}

/// Messages sent from workers to the aggregator.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    Started {
        id: Uuid,
        key: String,
        unit: ProgressUnit,
        total: u64,
    },
    Advanced {
        id: Uuid,
        processed: u64,
        total: u64,
    },
    Finished {
        id: Uuid,
        status: JobStatus,
    },
}

/// Latest known state of one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobProgress {
    pub id: Uuid,
    pub key: String,
    pub unit: ProgressUnit,
    pub processed: u64,
    pub total: u64,
}

/// Sums over every job seen so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgressTotals {
    pub bytes_processed: u64,
    pub bytes_total: u64,
    pub items_processed: u64,
    pub items_total: u64,
    pub jobs_done: usize,
    pub jobs_failed: usize,
    pub jobs_cancelled: usize,
}

/// Receives aggregated progress. Called only from the aggregator thread.
pub trait ProgressSink: Send + Sync {
    fn on_job_started(&self, _job: &JobProgress) {}

    fn on_job_progress(&self, _job: &JobProgress, _totals: &ProgressTotals) {}

    fn on_job_finished(&self, _job: &JobProgress, _status: &JobStatus, _totals: &ProgressTotals) {}

    /// All jobs drained; no further calls follow.
    fn on_drained(&self, _totals: &ProgressTotals) {}
}

/// Sink that ignores everything.
pub struct NoopProgress;

impl ProgressSink for NoopProgress {}

/// Handle to the aggregator thread.
pub struct ProgressAggregator {
    sender: Sender<ProgressEvent>,
    handle: JoinHandle<ProgressTotals>,
}

impl ProgressAggregator {
    pub fn spawn(sink: Arc<dyn ProgressSink>) -> Result<Self, EngineError> {
        let (sender, receiver) = unbounded();
        let handle = thread::Builder::new()
            .name("gridsync-progress".to_string())
            .spawn(move || aggregate(receiver, sink.as_ref()))
            .map_err(EngineError::Spawn)?;
        Ok(ProgressAggregator { sender, handle })
    }

    pub fn sender(&self) -> Sender<ProgressEvent> {
        self.sender.clone()
    }

    /// Close the channel and wait for the aggregator to drain it.
    ///
    /// Every other sender clone must already be dropped.
    pub fn finish(self) -> ProgressTotals {
        drop(self.sender);
        self.handle.join().unwrap_or_default()
    }
}

fn aggregate(receiver: Receiver<ProgressEvent>, sink: &dyn ProgressSink) -> ProgressTotals {
    let mut jobs: HashMap<Uuid, JobProgress> = HashMap::new();
    let mut totals = ProgressTotals::default();

    for event in receiver {
        match event {
            ProgressEvent::Started { id, key, unit, total } => {
                let job = JobProgress {
                    id,
                    key,
                    unit,
                    processed: 0,
                    total,
                };
                add_total(&mut totals, unit, total);
                sink.on_job_started(&job);
                jobs.insert(id, job);
            }
            ProgressEvent::Advanced { id, processed, total } => {
                let Some(job) = jobs.get_mut(&id) else {
                    continue;
                };
                if total != job.total {
                    sub_total(&mut totals, job.unit, job.total);
                    add_total(&mut totals, job.unit, total);
                    job.total = total;
                }
                // progress is monotonic per job; late or reordered reports are ignored
                if processed > job.processed {
                    add_processed(&mut totals, job.unit, processed - job.processed);
                    job.processed = processed;
                }
                sink.on_job_progress(job, &totals);
            }
            ProgressEvent::Finished { id, status } => {
                let Some(job) = jobs.remove(&id) else {
                    continue;
                };
                match status {
                    JobStatus::Done => totals.jobs_done += 1,
                    JobStatus::Failed(_) => totals.jobs_failed += 1,
                    JobStatus::Cancelled => totals.jobs_cancelled += 1,
                }
                sink.on_job_finished(&job, &status, &totals);
            }
        }
    }

    sink.on_drained(&totals);
    totals
}

fn add_total(totals: &mut ProgressTotals, unit: ProgressUnit, amount: u64) {
    match unit {
        ProgressUnit::Bytes => totals.bytes_total += amount,
        ProgressUnit::Items => totals.items_total += amount,
    }
}

fn sub_total(totals: &mut ProgressTotals, unit: ProgressUnit, amount: u64) {
    match unit {
        ProgressUnit::Bytes => totals.bytes_total = totals.bytes_total.saturating_sub(amount),
        ProgressUnit::Items => totals.items_total = totals.items_total.saturating_sub(amount),
    }
}

fn add_processed(totals: &mut ProgressTotals, unit: ProgressUnit, amount: u64) {
    match unit {
        ProgressUnit::Bytes => totals.bytes_processed += amount,
        ProgressUnit::Items => totals.items_processed += amount,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct RecordingSink {
        calls: Mutex<Vec<String>>,
    }

    impl ProgressSink for RecordingSink {
        fn on_job_started(&self, job: &JobProgress) {
            self.calls.lock().unwrap().push(format!("start {}", job.key));
        }

        fn on_job_progress(&self, job: &JobProgress, _totals: &ProgressTotals) {
            self.calls
                .lock()
                .unwrap()
                .push(format!("progress {} {}/{}", job.key, job.processed, job.total));
        }

        fn on_job_finished(&self, job: &JobProgress, status: &JobStatus, _totals: &ProgressTotals) {
            self.calls
                .lock()
                .unwrap()
                .push(format!("finish {} {:?}", job.key, status));
        }

        fn on_drained(&self, totals: &ProgressTotals) {
            self.calls
                .lock()
                .unwrap()
                .push(format!("drained {}", totals.jobs_done));
        }
    }

    #[test]
    fn test_aggregates_bytes_and_items() {
        let sink = Arc::new(RecordingSink {
            calls: Mutex::new(Vec::new()),
        });
        let aggregator = ProgressAggregator::spawn(sink.clone()).expect("spawn");
        let tx = aggregator.sender();

        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        tx.send(ProgressEvent::Started { id: a, key: "a".into(), unit: ProgressUnit::Bytes, total: 10 })
            .unwrap();
        tx.send(ProgressEvent::Started { id: b, key: "b".into(), unit: ProgressUnit::Items, total: 1 })
            .unwrap();
        tx.send(ProgressEvent::Advanced { id: a, processed: 4, total: 10 }).unwrap();
        tx.send(ProgressEvent::Advanced { id: a, processed: 2, total: 10 }).unwrap();
        tx.send(ProgressEvent::Advanced { id: a, processed: 10, total: 10 }).unwrap();
        tx.send(ProgressEvent::Finished { id: a, status: JobStatus::Done }).unwrap();
        tx.send(ProgressEvent::Finished { id: b, status: JobStatus::Failed("boom".into()) })
            .unwrap();
        drop(tx);

        let totals = aggregator.finish();
        assert_eq!(totals.bytes_processed, 10);
        assert_eq!(totals.bytes_total, 10);
        assert_eq!(totals.items_total, 1);
        assert_eq!(totals.items_processed, 0);
        assert_eq!(totals.jobs_done, 1);
        assert_eq!(totals.jobs_failed, 1);

        let calls = sink.calls.lock().unwrap();
        assert_eq!(calls.first().map(String::as_str), Some("start a"));
        assert_eq!(calls.last().map(String::as_str), Some("drained 1"));
        assert!(calls.contains(&"progress a 4/10".to_string()));
    }

    #[test]
    fn test_events_for_unknown_jobs_are_ignored() {
        let aggregator = ProgressAggregator::spawn(Arc::new(NoopProgress)).expect("spawn");
        let tx = aggregator.sender();
        tx.send(ProgressEvent::Advanced { id: Uuid::new_v4(), processed: 5, total: 5 }).unwrap();
        tx.send(ProgressEvent::Finished { id: Uuid::new_v4(), status: JobStatus::Done }).unwrap();
        drop(tx);

        assert_eq!(aggregator.finish(), ProgressTotals::default());
    }
}
