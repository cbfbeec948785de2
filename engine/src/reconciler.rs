//! Destination reconciliation (mirror semantics).
//!
//! After a bulk operation with `--delete`, every destination path under the
//! root that the planner did not visit is removed. A directory that was not
//! visited goes in one step; a visited directory is descended into so only its
//! unvisited children are pruned. Transfer markers are never listed, so the
//! marker of a kept (interrupted) destination survives.

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::error::EngineError;
use crate::model::InputPathSet;
use crate::namespace::Namespace;

/// What a reconciliation pass removed.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    pub removed_files: Vec<PathBuf>,
    pub removed_directories: Vec<PathBuf>,
    pub failures: usize,
}

impl ReconcileReport {
    pub fn removed(&self) -> usize {
        self.removed_files.len() + self.removed_directories.len()
    }
}

/// Prune everything under `root` that is not in `inputs`.
///
/// Removal failures are logged and the walk continues. Once the walk is
/// complete a single failure is returned as is, several as
/// [`EngineError::Aggregate`] carrying the first one and the count. Already
/// completed transfers are never touched.
pub fn reconcile(
    namespace: &dyn Namespace,
    root: &Path,
    inputs: &InputPathSet,
) -> Result<ReconcileReport, EngineError> {
    let mut walk = Walk {
        namespace,
        inputs,
        report: ReconcileReport::default(),
        first_failure: None,
    };

    let Some(entry) = namespace.stat(root)? else {
        return Err(EngineError::not_found(root.display().to_string()));
    };
    walk.visit(root, entry.is_dir());

    let Some(first) = walk.first_failure else {
        return Ok(walk.report);
    };
    warn!(
        "{} extra(s) removed under {}, {} could not be removed",
        walk.report.removed(),
        root.display(),
        walk.report.failures
    );
    match walk.report.failures {
        1 => Err(first),
        failed => Err(EngineError::Aggregate {
            first: Box::new(first),
            failed,
        }),
    }
}

struct Walk<'a> {
    namespace: &'a dyn Namespace,
    inputs: &'a InputPathSet,
    report: ReconcileReport,
    first_failure: Option<EngineError>,
}

impl Walk<'_> {
    fn visit(&mut self, path: &Path, is_dir: bool) {
        if !is_dir {
            if !self.inputs.contains(path) {
                match self.namespace.remove_file(path) {
                    Ok(()) => {
                        info!("removed extra {} file {}", self.namespace.label(), path.display());
                        self.report.removed_files.push(path.to_path_buf());
                    }
                    Err(e) => self.fail(path, e),
                }
            }
            return;
        }

        if !self.inputs.contains(path) {
            match self.namespace.remove_tree(path) {
                Ok(()) => {
                    info!("removed extra {} directory {}", self.namespace.label(), path.display());
                    self.report.removed_directories.push(path.to_path_buf());
                }
                Err(e) => self.fail(path, e),
            }
            return;
        }

        match self.namespace.list(path) {
            Ok(children) => {
                for child in children {
                    self.visit(&child.path, child.is_dir());
                }
            }
            Err(e) => self.fail(path, e),
        }
    }

    fn fail(&mut self, path: &Path, error: EngineError) {
        warn!("could not reconcile {}: {}", path.display(), error);
        self.report.failures += 1;
        if self.first_failure.is_none() {
            self.first_failure = Some(error);
        }
    }
}
