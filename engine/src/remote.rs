//! Remote filesystem collaborator.
//!
//! The orchestrator never speaks the grid's wire protocol itself. Everything it
//! needs from the remote side goes through [`RemoteFilesystem`]. The crate
//! ships one implementation, [`MountedRemote`], which serves a remote namespace
//! out of a local directory tree (a mounted or staged copy of the grid).

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::debug;

use crate::checksums::{compute_file_checksum, ChecksumAlgorithm, ChecksumValue};
use crate::error::EngineError;
use crate::fs_ops;
use crate::marker::{self, TransferMarker};
use crate::model::Entry;
use crate::path;

/// Progress callback: `(processed, total)`.
pub type ProgressFn<'a> = &'a mut dyn FnMut(u64, u64);

/// Capabilities consumed from the remote data-management service.
///
/// Remote paths are canonical, absolute, `/`-separated strings.
pub trait RemoteFilesystem: Send + Sync {
    /// Take a connection from the pool.
    fn acquire(&self) -> Result<(), EngineError> {
        Ok(())
    }

    /// Return a connection taken with [`acquire`](Self::acquire).
    fn release(&self) {}

    /// Stat a path; `NotFound` when absent.
    fn stat(&self, path: &str) -> Result<Entry, EngineError>;

    /// Immediate children of a collection.
    fn list(&self, path: &str) -> Result<Vec<Entry>, EngineError>;

    /// Create a collection and any missing parents.
    fn make_dir(&self, path: &str) -> Result<(), EngineError>;

    fn remove_file(&self, path: &str) -> Result<(), EngineError>;

    fn remove_dir_all(&self, path: &str) -> Result<(), EngineError>;

    /// Download `remote` into `local`, continuing at `offset`.
    fn download(
        &self,
        remote: &str,
        local: &Path,
        offset: u64,
        progress: ProgressFn<'_>,
    ) -> Result<u64, EngineError>;

    /// Upload `local` into `remote`, continuing at `offset`.
    fn upload(
        &self,
        local: &Path,
        remote: &str,
        offset: u64,
        progress: ProgressFn<'_>,
    ) -> Result<u64, EngineError>;

    /// Server-side copy of one data object.
    fn copy(&self, source: &str, target: &str) -> Result<(), EngineError>;

    /// Algorithm the catalog keeps checksums in, if it keeps any.
    fn checksum_algorithm(&self) -> Option<ChecksumAlgorithm> {
        None
    }

    fn checksum(&self, path: &str, algorithm: ChecksumAlgorithm) -> Result<ChecksumValue, EngineError>;

    /// Transfer marker stored alongside a remote data object, if any.
    fn marker(&self, path: &str) -> Result<Option<TransferMarker>, EngineError>;

    fn store_marker(&self, path: &str, marker: &TransferMarker) -> Result<(), EngineError>;

    fn clear_marker(&self, path: &str) -> Result<(), EngineError>;
}

/// Holds a pooled connection for the duration of a scope.
pub struct ConnectionGuard<'a> {
    remote: &'a dyn RemoteFilesystem,
}

impl<'a> ConnectionGuard<'a> {
    pub fn acquire(remote: &'a dyn RemoteFilesystem) -> Result<Self, EngineError> {
        remote.acquire()?;
        Ok(ConnectionGuard { remote })
    }
}

impl Drop for ConnectionGuard<'_> {
    fn drop(&mut self) {
        self.remote.release();
    }
}

/// A remote namespace backed by a local directory.
///
/// `/zone/home/bob/x` is stored at `<root>/zone/home/bob/x`. When a checksum
/// algorithm is configured it is advertised the way the grid's catalog does,
/// which enables hash-based differential transfers. Digests are only computed
/// when [`RemoteFilesystem::checksum`] asks for one.
pub struct MountedRemote {
    root: PathBuf,
    checksum_algorithm: Option<ChecksumAlgorithm>,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl MountedRemote {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        MountedRemote {
            root: root.into(),
            checksum_algorithm: None,
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    pub fn with_checksums(mut self, algorithm: ChecksumAlgorithm) -> Self {
        self.checksum_algorithm = Some(algorithm);
        self
    }

    /// Local location of a remote path.
    pub fn backing_path(&self, remote: &str) -> PathBuf {
        let cleaned = path::clean(&format!("/{}", remote));
        let relative = cleaned.trim_start_matches('/');
        if relative.is_empty() {
            self.root.clone()
        } else {
            self.root.join(relative)
        }
    }

    /// Highest number of simultaneously held connections so far.
    pub fn peak_connections(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn to_remote_entry(remote: &str, local: Entry) -> Entry {
        Entry {
            path: PathBuf::from(remote),
            ..local
        }
    }
}

impl RemoteFilesystem for MountedRemote {
    fn acquire(&self) -> Result<(), EngineError> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        Ok(())
    }

    fn release(&self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }

    fn stat(&self, path: &str) -> Result<Entry, EngineError> {
        let backing = self.backing_path(path);
        match fs_ops::stat(&backing)? {
            Some(entry) => Ok(Self::to_remote_entry(&path::clean(path), entry)),
            None => Err(EngineError::not_found(path)),
        }
    }

    fn list(&self, path: &str) -> Result<Vec<Entry>, EngineError> {
        let backing = self.backing_path(path);
        let parent = path::clean(path);
        fs_ops::list(&backing)
            .map_err(|e| match e {
                EngineError::NotFound { .. } => EngineError::not_found(path),
                other => other,
            })?
            .into_iter()
            .map(|entry| {
                let remote = path::join(&parent, &entry.name());
                Ok(Self::to_remote_entry(&remote, entry))
            })
            .collect()
    }

    fn make_dir(&self, path: &str) -> Result<(), EngineError> {
        fs_ops::ensure_dir_all(&self.backing_path(path))
    }

    fn remove_file(&self, path: &str) -> Result<(), EngineError> {
        fs_ops::remove_file(&self.backing_path(path))
    }

    fn remove_dir_all(&self, path: &str) -> Result<(), EngineError> {
        fs_ops::remove_tree(&self.backing_path(path))
    }

    fn download(
        &self,
        remote: &str,
        local: &Path,
        offset: u64,
        progress: ProgressFn<'_>,
    ) -> Result<u64, EngineError> {
        let backing = self.backing_path(remote);
        if !backing.is_file() {
            return Err(EngineError::not_found(remote));
        }
        debug!("download {} -> {} from offset {}", remote, local.display(), offset);
        fs_ops::copy_from_offset(&backing, local, offset, progress)
    }

    fn upload(
        &self,
        local: &Path,
        remote: &str,
        offset: u64,
        progress: ProgressFn<'_>,
    ) -> Result<u64, EngineError> {
        let backing = self.backing_path(remote);
        debug!("upload {} -> {} from offset {}", local.display(), remote, offset);
        fs_ops::copy_from_offset(local, &backing, offset, progress)
    }

    fn copy(&self, source: &str, target: &str) -> Result<(), EngineError> {
        let from = self.backing_path(source);
        let to = self.backing_path(target);
        fs_ops::ensure_parent_dir_exists(&to)?;
        fs::copy(&from, &to).map_err(|e| EngineError::from_io("copy", &from, e))?;
        fs_ops::preserve_mtime(&from, &to);
        Ok(())
    }

    fn checksum_algorithm(&self) -> Option<ChecksumAlgorithm> {
        self.checksum_algorithm
    }

    fn checksum(&self, path: &str, algorithm: ChecksumAlgorithm) -> Result<ChecksumValue, EngineError> {
        compute_file_checksum(&self.backing_path(path), algorithm)
    }

    fn marker(&self, path: &str) -> Result<Option<TransferMarker>, EngineError> {
        marker::load(&self.backing_path(path))
    }

    fn store_marker(&self, path: &str, state: &TransferMarker) -> Result<(), EngineError> {
        marker::store(&self.backing_path(path), state)
    }

    fn clear_marker(&self, path: &str) -> Result<(), EngineError> {
        marker::clear(&self.backing_path(path))
    }
}
