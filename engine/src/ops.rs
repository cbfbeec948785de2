//! Bulk operations: get, put, copy and sync.
//!
//! Each operation resolves its arguments, prepares the target on the
//! coordinating thread, plans every source into one shared scheduler, waits
//! for the jobs to drain and optionally reconciles the target. Failures are
//! collected per source; only invalid arguments abort before anything is
//! scheduled.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, warn};

use crate::error::EngineError;
use crate::model::{Direction, Entry, InputPathSet, TransferFlags};
use crate::namespace::{LocalNamespace, Namespace, RemoteNamespace};
use crate::path::{destination_in, split_remote_arg};
use crate::planner::{PlanReport, Planner, Prompter};
use crate::progress::ProgressSink;
use crate::reconciler::{reconcile, ReconcileReport};
use crate::remote::RemoteFilesystem;
use crate::scheduler::{FailurePolicy, JobScheduler};
use crate::session::Session;
use crate::transfer::builder_for;

/// Flags shared by every bulk command.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferOptions {
    pub flags: TransferFlags,
    /// Transfer the contents of a directory source, not the directory itself
    pub no_root: bool,
    /// Remove target entries that are not part of this operation
    pub delete_extra: bool,
    pub failure_policy: FailurePolicy,
}

/// Everything one bulk operation did.
#[derive(Debug, Default)]
pub struct BulkReport {
    pub scheduled: usize,
    pub skipped: usize,
    pub resumed: usize,
    pub completed: usize,
    pub cancelled: usize,
    pub bytes_transferred: u64,
    pub reconciled: Option<ReconcileReport>,
    /// Source, job and reconciliation failures in the order observed
    pub errors: Vec<EngineError>,
}

impl BulkReport {
    /// The first failure (with the failure count when there were several),
    /// or the report itself.
    pub fn into_result(mut self) -> Result<BulkReport, EngineError> {
        match self.errors.len() {
            0 => Ok(self),
            1 => Err(self.errors.remove(0)),
            failed => Err(EngineError::Aggregate {
                first: Box::new(self.errors.remove(0)),
                failed,
            }),
        }
    }
}

/// One planned source: which way it moves and where it lands.
struct SourceItem {
    direction: Direction,
    entry: Entry,
    destination: PathBuf,
}

/// Runs bulk operations for one session.
pub struct Orchestrator<'a> {
    session: &'a Session,
    remote: Arc<dyn RemoteFilesystem>,
    prompter: &'a dyn Prompter,
    progress: Arc<dyn ProgressSink>,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        session: &'a Session,
        remote: Arc<dyn RemoteFilesystem>,
        prompter: &'a dyn Prompter,
        progress: Arc<dyn ProgressSink>,
    ) -> Self {
        Orchestrator {
            session,
            remote,
            prompter,
            progress,
        }
    }

    /// Download remote sources into a local target directory.
    pub fn get(&self, sources: &[String], target: &str, options: &TransferOptions) -> Result<BulkReport, EngineError> {
        check_sources(sources, options)?;
        let target = self.session.resolve_local(target);
        let remote_ns = RemoteNamespace::new(Arc::clone(&self.remote));

        let mut errors = Vec::new();
        let mut items = Vec::new();
        for source in sources {
            let path = self.session.resolve_remote(strip_remote(source));
            match self.prepare(&remote_ns, &path, &LocalNamespace, &target, options.no_root) {
                Ok((entry, destination)) => items.push(SourceItem {
                    direction: Direction::Get,
                    entry,
                    destination,
                }),
                Err(e) => record_source_error(&mut errors, &path, e),
            }
        }

        self.execute(items, &LocalNamespace, &target, errors, options)
    }

    /// Upload local sources into a remote target collection.
    pub fn put(&self, sources: &[String], target: &str, options: &TransferOptions) -> Result<BulkReport, EngineError> {
        check_sources(sources, options)?;
        let target = PathBuf::from(self.session.resolve_remote(strip_remote(target)));
        let remote_ns = RemoteNamespace::new(Arc::clone(&self.remote));

        let mut errors = Vec::new();
        let mut items = Vec::new();
        for source in sources {
            let path = self.session.resolve_local(source);
            match self.prepare(&LocalNamespace, &path.display().to_string(), &remote_ns, &target, options.no_root) {
                Ok((entry, destination)) => items.push(SourceItem {
                    direction: Direction::Put,
                    entry,
                    destination,
                }),
                Err(e) => record_source_error(&mut errors, &path.display().to_string(), e),
            }
        }

        self.execute(items, &remote_ns, &target, errors, options)
    }

    /// Server-side copy between remote collections.
    pub fn copy(&self, sources: &[String], target: &str, options: &TransferOptions) -> Result<BulkReport, EngineError> {
        check_sources(sources, options)?;
        let target = PathBuf::from(self.session.resolve_remote(strip_remote(target)));
        let remote_ns = RemoteNamespace::new(Arc::clone(&self.remote));

        let mut errors = Vec::new();
        let mut items = Vec::new();
        for source in sources {
            let path = self.session.resolve_remote(strip_remote(source));
            match self.prepare(&remote_ns, &path, &remote_ns, &target, options.no_root) {
                Ok((entry, destination)) => items.push(SourceItem {
                    direction: Direction::Copy,
                    entry,
                    destination,
                }),
                Err(e) => record_source_error(&mut errors, &path, e),
            }
        }

        self.execute(items, &remote_ns, &target, errors, options)
    }

    /// Differential transfer picking the direction per source from the `i:`
    /// prefixes: remote to local is a get, local to remote a put, remote to
    /// remote a copy. Local to local is rejected.
    pub fn sync(&self, sources: &[String], target: &str, options: &TransferOptions) -> Result<BulkReport, EngineError> {
        check_sources(sources, options)?;
        let mut options = *options;
        options.flags.diff = true;

        let remote_ns = RemoteNamespace::new(Arc::clone(&self.remote));
        let remote_target = split_remote_arg(target).is_some();
        let (destination_ns, target): (&dyn Namespace, PathBuf) = match split_remote_arg(target) {
            Some(remote) => (&remote_ns as &dyn Namespace, PathBuf::from(self.session.resolve_remote(remote))),
            None => {
                if let Some(local) = sources.iter().find(|s| split_remote_arg(s).is_none()) {
                    return Err(EngineError::InvalidArguments(format!(
                        "syncing local {} into a local directory is not supported",
                        local
                    )));
                }
                (&LocalNamespace as &dyn Namespace, self.session.resolve_local(target))
            }
        };

        let mut errors = Vec::new();
        let mut items = Vec::new();
        for source in sources {
            let (direction, source_ns, path): (Direction, &dyn Namespace, String) = match split_remote_arg(source) {
                Some(remote) => {
                    let direction = if remote_target { Direction::Copy } else { Direction::Get };
                    (direction, &remote_ns as &dyn Namespace, self.session.resolve_remote(remote))
                }
                None => (
                    Direction::Put,
                    &LocalNamespace as &dyn Namespace,
                    self.session.resolve_local(source).display().to_string(),
                ),
            };
            match self.prepare(source_ns, &path, destination_ns, &target, options.no_root) {
                Ok((entry, destination)) => items.push(SourceItem {
                    direction,
                    entry,
                    destination,
                }),
                Err(e) => record_source_error(&mut errors, &path, e),
            }
        }

        self.execute(items, destination_ns, &target, errors, &options)
    }

    /// Stat a source and work out where it lands under `target`.
    ///
    /// A file source goes into `target` when that is a directory, otherwise it
    /// is renamed to `target`; either way the containing directory must exist.
    /// A directory source needs an existing target directory and lands in
    /// `<target>/<name>` unless `no_root`. A root source has no name and
    /// fills `target` directly.
    fn prepare(
        &self,
        source_ns: &dyn Namespace,
        source: &str,
        destination_ns: &dyn Namespace,
        target: &Path,
        no_root: bool,
    ) -> Result<(Entry, PathBuf), EngineError> {
        let entry = source_ns
            .stat(Path::new(source))?
            .ok_or_else(|| EngineError::not_found(source))?;
        let target_entry = destination_ns.stat(target)?;
        let target_is_dir = target_entry.as_ref().map(Entry::is_dir).unwrap_or(false);

        if entry.is_file() {
            let destination = if target_is_dir {
                destination_in(target, &entry.path)
            } else {
                target.to_path_buf()
            };
            let parent = destination.parent().unwrap_or(target);
            match destination_ns.stat(parent)? {
                Some(dir) if dir.is_dir() => Ok((entry, destination)),
                _ => Err(EngineError::not_found(parent.display().to_string())),
            }
        } else {
            if !target_is_dir {
                return Err(EngineError::not_found(target.display().to_string()));
            }
            let destination = if no_root {
                target.to_path_buf()
            } else {
                destination_in(target, &entry.path)
            };
            Ok((entry, destination))
        }
    }

    fn execute(
        &self,
        items: Vec<SourceItem>,
        destination_ns: &dyn Namespace,
        target: &Path,
        mut errors: Vec<EngineError>,
        options: &TransferOptions,
    ) -> Result<BulkReport, EngineError> {
        let local_ns = LocalNamespace;
        let remote_ns = RemoteNamespace::new(Arc::clone(&self.remote));
        let config = self.session.config().scheduler_config(options.failure_policy);
        let mut scheduler = JobScheduler::start(config, Arc::clone(&self.progress))?;

        let mut inputs = InputPathSet::new();
        let mut plan = PlanReport::default();
        for item in items {
            let source_ns: &dyn Namespace = match item.direction {
                Direction::Get | Direction::Copy => &remote_ns,
                Direction::Put => &local_ns,
            };
            let builder = builder_for(item.direction, Arc::clone(&self.remote));
            let mut planner = Planner::new(source_ns, destination_ns, builder.as_ref(), self.prompter, options.flags)
                .with_inputs(inputs);
            planner.plan_source(&item.entry, &item.destination, &mut scheduler);
            let (visited, report) = planner.into_parts();
            inputs = visited;
            plan.merge(report);
        }

        let outcome = scheduler.wait();
        let planning_failed = !errors.is_empty() || !plan.errors.is_empty();
        errors.append(&mut plan.errors);

        let mut report = BulkReport {
            scheduled: plan.scheduled,
            skipped: plan.skipped,
            resumed: plan.resumed,
            completed: outcome.completed,
            cancelled: outcome.cancelled,
            bytes_transferred: outcome.totals.bytes_processed,
            reconciled: None,
            errors,
        };
        report.errors.extend(outcome.errors);

        if options.delete_extra {
            if planning_failed {
                // an aborted walk leaves wanted paths unrecorded
                warn!("not deleting extras under {}: some sources could not be planned", target.display());
            } else {
                inputs.mark(target);
                info!("deleting extra files and directories under {}", target.display());
                match reconcile(destination_ns, target, &inputs) {
                    Ok(reconciled) => report.reconciled = Some(reconciled),
                    Err(e) => report.errors.push(e),
                }
            }
        }

        info!(
            "{} scheduled, {} skipped, {} resumed, {} completed, {} failed",
            report.scheduled,
            report.skipped,
            report.resumed,
            report.completed,
            report.errors.len()
        );
        report.into_result()
    }
}

fn check_sources(sources: &[String], options: &TransferOptions) -> Result<(), EngineError> {
    if sources.is_empty() {
        return Err(EngineError::InvalidArguments("no source given".into()));
    }
    if options.no_root && sources.len() > 1 {
        return Err(EngineError::InvalidArguments(
            "multiple sources cannot be transferred without creating their root directories".into(),
        ));
    }
    Ok(())
}

fn strip_remote(arg: &str) -> &str {
    split_remote_arg(arg).unwrap_or(arg)
}

fn record_source_error(errors: &mut Vec<EngineError>, source: &str, error: EngineError) {
    warn!("skipping source {}: {}", source, error);
    errors.push(error);
}
