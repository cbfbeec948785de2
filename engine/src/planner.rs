//! Differential sync planning.
//!
//! [`plan`] is the per-file decision table. [`Planner`] walks one source tree
//! on the coordinating thread: it creates destination directories eagerly,
//! records every visited destination in the [`InputPathSet`], resolves each
//! file's action and hands the transfers to the [`JobScheduler`].
//!
//! Decision table (first match wins):
//!
//! | destination        | marker | flags                  | action          |
//! |--------------------|--------|------------------------|-----------------|
//! | absent             | any    | any                    | `TransferFresh` |
//! | present            | yes    | any                    | `Resume`        |
//! | present            | no     | diff, no_hash          | size equal: `Skip`, else `Overwrite` |
//! | present            | no     | diff                   | size and checksum equal: `Skip`, else `Overwrite` |
//! | present            | no     | force                  | `Overwrite`     |
//! | present            | no     | none                   | `AskUser`       |

use std::path::Path;

use tracing::{debug, info, warn};

use crate::error::EngineError;
use crate::model::{Action, Entry, InputPathSet, TransferFlags};
use crate::namespace::Namespace;
use crate::scheduler::JobScheduler;
use crate::transfer::{JobBuilder, TransferMode};

/// Decide what happens to one source file.
///
/// `destination` must already carry a checksum comparable to the source's
/// when the hashed differential check applies; [`Planner`] takes care of that.
pub fn plan(source: &Entry, destination: Option<&Entry>, marker_present: bool, flags: TransferFlags) -> Action {
    let Some(destination) = destination else {
        return Action::TransferFresh;
    };
    if marker_present {
        return Action::Resume;
    }

    if flags.diff {
        if source.size != destination.size {
            return Action::Overwrite;
        }
        if flags.no_hash {
            return Action::Skip;
        }
        return match (&source.checksum, &destination.checksum) {
            (None, _) => Action::Skip,
            (Some(expected), Some(actual)) if expected == actual => Action::Skip,
            _ => Action::Overwrite,
        };
    }

    if flags.force {
        Action::Overwrite
    } else {
        Action::AskUser
    }
}

/// Answers overwrite questions for `AskUser`.
pub trait Prompter {
    fn confirm(&self, message: &str) -> bool;
}

/// Declines every question (non-interactive runs).
pub struct AssumeNo;

impl Prompter for AssumeNo {
    fn confirm(&self, _message: &str) -> bool {
        false
    }
}

/// Accepts every question.
pub struct AssumeYes;

impl Prompter for AssumeYes {
    fn confirm(&self, _message: &str) -> bool {
        true
    }
}

/// Counters and collected failures of one planning run.
#[derive(Debug, Default)]
pub struct PlanReport {
    pub scheduled: usize,
    pub skipped: usize,
    pub resumed: usize,
    pub directories_created: usize,
    /// One entry per source subtree whose enumeration was aborted
    pub errors: Vec<EngineError>,
}

impl PlanReport {
    pub fn merge(&mut self, other: PlanReport) {
        self.scheduled += other.scheduled;
        self.skipped += other.skipped;
        self.resumed += other.resumed;
        self.directories_created += other.directories_created;
        self.errors.extend(other.errors);
    }
}

/// Walks source trees and feeds the scheduler.
pub struct Planner<'a> {
    source: &'a dyn Namespace,
    destination: &'a dyn Namespace,
    jobs: &'a dyn JobBuilder,
    prompter: &'a dyn Prompter,
    flags: TransferFlags,
    inputs: InputPathSet,
    report: PlanReport,
}

impl<'a> Planner<'a> {
    pub fn new(
        source: &'a dyn Namespace,
        destination: &'a dyn Namespace,
        jobs: &'a dyn JobBuilder,
        prompter: &'a dyn Prompter,
        flags: TransferFlags,
    ) -> Self {
        Planner {
            source,
            destination,
            jobs,
            prompter,
            flags,
            inputs: InputPathSet::new(),
            report: PlanReport::default(),
        }
    }

    /// Continue recording into a set started by an earlier planner.
    pub fn with_inputs(mut self, inputs: InputPathSet) -> Self {
        self.inputs = inputs;
        self
    }

    pub fn into_parts(self) -> (InputPathSet, PlanReport) {
        (self.inputs, self.report)
    }

    /// Plan one source (file or directory) onto `destination`.
    ///
    /// A failure aborts the rest of this source's subtree only; it is
    /// recorded in the report and the caller moves on to the next source.
    pub fn plan_source(&mut self, source: &Entry, destination: &Path, scheduler: &mut JobScheduler) {
        if let Err(e) = self.visit(source, destination, scheduler) {
            warn!(
                "{} {} aborted: {}",
                self.jobs.direction(),
                source.path.display(),
                e
            );
            self.report.errors.push(e);
        }
    }

    fn visit(&mut self, source: &Entry, destination: &Path, scheduler: &mut JobScheduler) -> Result<(), EngineError> {
        if !self.inputs.mark(destination) {
            debug!("{} reached by more than one source", destination.display());
        }

        if source.is_dir() {
            self.prepare_directory(destination)?;
            for child in self.source.list(&source.path)? {
                let target = destination.join(child.name());
                self.visit(&child, &target, scheduler)?;
            }
            return Ok(());
        }

        self.visit_file(source, destination, scheduler)
    }

    fn prepare_directory(&mut self, destination: &Path) -> Result<(), EngineError> {
        match self.destination.stat(destination)? {
            Some(existing) if existing.is_dir() => Ok(()),
            Some(_) if self.flags.force => {
                self.destination.remove_file(destination)?;
                self.create_directory(destination)
            }
            Some(_) => Err(EngineError::Conflict {
                path: destination.display().to_string(),
            }),
            None => self.create_directory(destination),
        }
    }

    fn create_directory(&mut self, destination: &Path) -> Result<(), EngineError> {
        self.destination.make_dir_all(destination)?;
        self.report.directories_created += 1;
        debug!("created {} directory {}", self.destination.label(), destination.display());
        Ok(())
    }

    fn visit_file(&mut self, source: &Entry, destination: &Path, scheduler: &mut JobScheduler) -> Result<(), EngineError> {
        let mut existing = self.destination.stat(destination)?;

        if let Some(entry) = &existing {
            if entry.is_dir() {
                if !self.flags.force {
                    return Err(EngineError::Conflict {
                        path: destination.display().to_string(),
                    });
                }
                self.destination.remove_tree(destination)?;
                existing = None;
            }
        }

        let marker_present = match &existing {
            Some(_) => self.destination.marker(destination)?.is_some(),
            None => false,
        };

        let mut source = source.clone();
        if let Some(entry) = existing.as_mut() {
            if !marker_present && self.needs_hash_comparison(&source, entry) {
                self.attach_checksums(&mut source, entry)?;
            }
        }

        let action = match plan(&source, existing.as_ref(), marker_present, self.flags) {
            Action::AskUser => {
                let question = format!("{} already exists, overwrite?", destination.display());
                if self.prompter.confirm(&question) {
                    Action::Overwrite
                } else {
                    info!("skipped {} (not overwritten)", destination.display());
                    Action::Skip
                }
            }
            decided => decided,
        };
        debug!("{} -> {}: {}", source.path.display(), destination.display(), action);

        let mode = match action {
            Action::Skip => {
                self.report.skipped += 1;
                return Ok(());
            }
            Action::Overwrite => {
                self.destination.remove_file(destination)?;
                TransferMode::Fresh
            }
            Action::Resume => {
                self.report.resumed += 1;
                TransferMode::Resume
            }
            Action::TransferFresh | Action::AskUser => TransferMode::Fresh,
        };

        scheduler.schedule(self.jobs.build(&source, destination, mode))?;
        self.report.scheduled += 1;
        Ok(())
    }

    fn needs_hash_comparison(&self, source: &Entry, destination: &Entry) -> bool {
        self.flags.diff && !self.flags.no_hash && source.size == destination.size
    }

    /// Fill in checksums for a same-size pair so `plan` can compare them.
    ///
    /// The algorithm comes from whichever checksum is already known, then from
    /// whichever side keeps checksums. Each side missing a matching digest is
    /// computed; with no algorithm anywhere both stay unset and sizes decide.
    fn attach_checksums(&self, source: &mut Entry, destination: &mut Entry) -> Result<(), EngineError> {
        let algorithm = source
            .checksum
            .as_ref()
            .or(destination.checksum.as_ref())
            .map(|c| c.algorithm())
            .or_else(|| self.source.checksum_algorithm())
            .or_else(|| self.destination.checksum_algorithm());
        let Some(algorithm) = algorithm else {
            return Ok(());
        };

        if source.checksum.as_ref().map(|c| c.algorithm()) != Some(algorithm) {
            source.checksum = Some(self.source.checksum(&source.path, algorithm)?);
        }
        if destination.checksum.as_ref().map(|c| c.algorithm()) != Some(algorithm) {
            destination.checksum = Some(self.destination.checksum(&destination.path, algorithm)?);
        }
        Ok(())
    }
}
