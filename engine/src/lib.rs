//! # gridsync Engine - Parallel Transfer Orchestrator
//!
//! A headless library that moves files and directory trees between a local
//! filesystem and a remote data grid, and keeps the two in sync.
//! Designed as the foundation for the `gridsync` command line and for
//! automation.
//!
//! ## Overview
//!
//! The engine features:
//! - Path normalisation for remote (home-relative, zone-relative) and local arguments
//! - A differential planner deciding per file whether to transfer, resume, skip or overwrite
//! - A bounded-concurrency job scheduler where large files take more slots
//! - Resumable transfers driven by on-disk transfer markers
//! - Mirror reconciliation that prunes destination entries not part of the input
//! - Whole-invocation retry that relies on the markers to make attempts cheap
//! - Progress reporting via a sink (decoupled from UI technology)
//!
//! ## Basic Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use gridsync_engine::{AssumeNo, Config, NoopProgress, Orchestrator, Session, TransferOptions};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let session = Session::new(Config::load(None)?)?;
//! let remote = session.connect()?;
//!
//! let orchestrator = Orchestrator::new(&session, remote, &AssumeNo, Arc::new(NoopProgress));
//! let report = orchestrator.get(&["i:~/results".to_string()], ".", &TransferOptions::default())?;
//! println!("{} transferred, {} skipped", report.completed, report.skipped);
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - **model**: Core data structures (Entry, Action, TransferFlags, InputPathSet)
//! - **error**: Error types and handling
//! - **path**: Remote and local path resolution
//! - **fs_ops**: Low-level local filesystem operations
//! - **marker**: Transfer status markers (resume state)
//! - **remote**: The remote filesystem collaborator and its directory-backed implementation
//! - **namespace**: One view over both sides of a transfer
//! - **planner**: Differential decision table and source walk
//! - **scheduler**: Bounded job pool
//! - **transfer**: Per-file get/put/copy jobs
//! - **reconciler**: Mirror pruning after a bulk operation
//! - **retry**: Whole-invocation retry supervisor
//! - **progress**: Progress events, aggregation and sinks
//! - **checksums**: Checksum computation
//! - **config**: Settings file and environment overrides
//! - **session**: Account, working collection and path resolution per invocation
//! - **ops**: The get/put/copy/sync bulk operations

pub mod model;
pub mod error;
pub mod path;
pub mod fs_ops;
pub mod marker;
pub mod remote;
pub mod namespace;
pub mod planner;
pub mod scheduler;
pub mod transfer;
pub mod reconciler;
pub mod retry;
pub mod progress;
pub mod checksums;
pub mod config;
pub mod session;
pub mod ops;

// Re-export main types and functions
pub use model::{Action, Direction, Entry, EntryKind, InputPathSet, ProgressUnit, TransferFlags};
pub use error::EngineError;
pub use marker::TransferMarker;
pub use remote::{MountedRemote, RemoteFilesystem};
pub use namespace::{LocalNamespace, Namespace, RemoteNamespace};
pub use planner::{plan, AssumeNo, AssumeYes, PlanReport, Planner, Prompter};
pub use scheduler::{FailurePolicy, JobContext, JobScheduler, SchedulerConfig, SchedulerOutcome, TransferJob};
pub use reconciler::{reconcile, ReconcileReport};
pub use retry::{Attempt, RetryPolicy, RetrySupervisor};
pub use progress::{JobProgress, JobStatus, NoopProgress, ProgressSink, ProgressTotals};
pub use checksums::{compute_file_checksum, ChecksumAlgorithm, ChecksumValue};
pub use config::Config;
pub use session::{Account, Session};
pub use ops::{BulkReport, Orchestrator, TransferOptions};
