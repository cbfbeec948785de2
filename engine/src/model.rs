//! Core data model for transfers.
//!
//! This module defines the values passed between the orchestrator's pieces:
//! - Entry: a stat snapshot of a local or remote object
//! - TransferFlags / Action: planner inputs and outputs
//! - Direction / ProgressUnit: how a job moves data and how it is measured
//! - InputPathSet: destinations touched by one bulk operation

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::checksums::ChecksumValue;

/// Kind of a filesystem-like object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
}

/// Snapshot of a local file, remote data object, or either side's directory.
///
/// Entries are never updated in place; stat again to observe changes.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    /// Canonical absolute path
    pub path: PathBuf,

    pub kind: EntryKind,

    /// Size in bytes (0 for directories)
    pub size: u64,

    /// Last modification time, when the backend reports one
    pub modified: Option<DateTime<Utc>>,

    /// Content checksum, when the backend exposes one
    pub checksum: Option<ChecksumValue>,
}

impl Entry {
    pub fn file(path: impl Into<PathBuf>, size: u64) -> Self {
        Entry {
            path: path.into(),
            kind: EntryKind::File,
            size,
            modified: None,
            checksum: None,
        }
    }

    pub fn directory(path: impl Into<PathBuf>) -> Self {
        Entry {
            path: path.into(),
            kind: EntryKind::Directory,
            size: 0,
            modified: None,
            checksum: None,
        }
    }

    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }

    pub fn is_file(&self) -> bool {
        self.kind == EntryKind::File
    }

    /// Final path component, or the whole path for roots.
    pub fn name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }
}

/// Flags steering the differential decision table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferFlags {
    /// Overwrite existing destinations without asking
    pub force: bool,
    /// Only transfer when source and destination differ
    pub diff: bool,
    /// With `diff`, compare sizes only
    pub no_hash: bool,
}

/// What to do with one source item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Destination absent; transfer from byte zero
    TransferFresh,
    /// A transfer marker exists; continue the interrupted transfer
    Resume,
    /// Destination already up to date (or the user declined)
    Skip,
    /// Remove the stale destination, then transfer
    Overwrite,
    /// Destination exists and no flag decides; the user must confirm
    AskUser,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::TransferFresh => write!(f, "transfer"),
            Action::Resume => write!(f, "resume"),
            Action::Skip => write!(f, "skip"),
            Action::Overwrite => write!(f, "overwrite"),
            Action::AskUser => write!(f, "ask"),
        }
    }
}

/// Which way a bulk operation moves data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Remote to local
    Get,
    /// Local to remote
    Put,
    /// Remote to remote
    Copy,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Get => write!(f, "get"),
            Direction::Put => write!(f, "put"),
            Direction::Copy => write!(f, "copy"),
        }
    }
}

/// Unit a job reports progress in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressUnit {
    Bytes,
    Items,
}

/// Destination paths touched by the current bulk operation.
///
/// Written only by the coordinating thread while planning; read by the
/// reconciler afterwards.
#[derive(Debug, Default, Clone)]
pub struct InputPathSet {
    paths: HashSet<PathBuf>,
}

impl InputPathSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a destination path. Returns false if it was already recorded.
    pub fn mark(&mut self, path: impl Into<PathBuf>) -> bool {
        self.paths.insert(path.into())
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.paths.contains(path)
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Path> {
        self.paths.iter().map(PathBuf::as_path)
    }
}

impl<P: Into<PathBuf>> FromIterator<P> for InputPathSet {
    fn from_iter<I: IntoIterator<Item = P>>(iter: I) -> Self {
        InputPathSet {
            paths: iter.into_iter().map(Into::into).collect(),
        }
    }
}
