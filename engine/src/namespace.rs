//! One view over both sides of a transfer.
//!
//! The planner and the reconciler are direction-agnostic: they walk a source
//! namespace and mutate a destination namespace, which may be the local disk
//! or the remote grid.

use std::path::Path;
use std::sync::Arc;

use crate::checksums::{compute_file_checksum, ChecksumAlgorithm, ChecksumValue};
use crate::error::EngineError;
use crate::fs_ops;
use crate::marker::{self, TransferMarker};
use crate::model::Entry;
use crate::path::remote_string;
use crate::remote::RemoteFilesystem;

pub trait Namespace {
    /// "local" or "remote", for messages.
    fn label(&self) -> &'static str;

    /// Stat a path; `Ok(None)` when absent.
    fn stat(&self, path: &Path) -> Result<Option<Entry>, EngineError>;

    /// Immediate children, markers excluded.
    fn list(&self, path: &Path) -> Result<Vec<Entry>, EngineError>;

    fn make_dir_all(&self, path: &Path) -> Result<(), EngineError>;

    /// Remove a file together with any transfer marker it left behind.
    fn remove_file(&self, path: &Path) -> Result<(), EngineError>;

    fn remove_tree(&self, path: &Path) -> Result<(), EngineError>;

    fn marker(&self, path: &Path) -> Result<Option<TransferMarker>, EngineError>;

    /// Algorithm this side keeps checksums in, if it keeps any.
    fn checksum_algorithm(&self) -> Option<ChecksumAlgorithm> {
        None
    }

    fn checksum(&self, path: &Path, algorithm: ChecksumAlgorithm) -> Result<ChecksumValue, EngineError>;
}

/// The local filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalNamespace;

impl Namespace for LocalNamespace {
    fn label(&self) -> &'static str {
        "local"
    }

    fn stat(&self, path: &Path) -> Result<Option<Entry>, EngineError> {
        fs_ops::stat(path)
    }

    fn list(&self, path: &Path) -> Result<Vec<Entry>, EngineError> {
        fs_ops::list(path)
    }

    fn make_dir_all(&self, path: &Path) -> Result<(), EngineError> {
        fs_ops::ensure_dir_all(path)
    }

    fn remove_file(&self, path: &Path) -> Result<(), EngineError> {
        fs_ops::remove_file(path)?;
        marker::clear(path)
    }

    fn remove_tree(&self, path: &Path) -> Result<(), EngineError> {
        fs_ops::remove_tree(path)
    }

    fn marker(&self, path: &Path) -> Result<Option<TransferMarker>, EngineError> {
        marker::load(path)
    }

    fn checksum(&self, path: &Path, algorithm: ChecksumAlgorithm) -> Result<ChecksumValue, EngineError> {
        compute_file_checksum(path, algorithm)
    }
}

/// The remote grid, through its client.
#[derive(Clone)]
pub struct RemoteNamespace {
    remote: Arc<dyn RemoteFilesystem>,
}

impl RemoteNamespace {
    pub fn new(remote: Arc<dyn RemoteFilesystem>) -> Self {
        RemoteNamespace { remote }
    }
}

impl Namespace for RemoteNamespace {
    fn label(&self) -> &'static str {
        "remote"
    }

    fn stat(&self, path: &Path) -> Result<Option<Entry>, EngineError> {
        match self.remote.stat(&remote_string(path)) {
            Ok(entry) => Ok(Some(entry)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn list(&self, path: &Path) -> Result<Vec<Entry>, EngineError> {
        self.remote.list(&remote_string(path))
    }

    fn make_dir_all(&self, path: &Path) -> Result<(), EngineError> {
        self.remote.make_dir(&remote_string(path))
    }

    fn remove_file(&self, path: &Path) -> Result<(), EngineError> {
        let path = remote_string(path);
        self.remote.remove_file(&path)?;
        self.remote.clear_marker(&path)
    }

    fn remove_tree(&self, path: &Path) -> Result<(), EngineError> {
        self.remote.remove_dir_all(&remote_string(path))
    }

    fn marker(&self, path: &Path) -> Result<Option<TransferMarker>, EngineError> {
        self.remote.marker(&remote_string(path))
    }

    fn checksum_algorithm(&self) -> Option<ChecksumAlgorithm> {
        self.remote.checksum_algorithm()
    }

    fn checksum(&self, path: &Path, algorithm: ChecksumAlgorithm) -> Result<ChecksumValue, EngineError> {
        self.remote.checksum(&remote_string(path), algorithm)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::MountedRemote;
    use std::fs;
    use std::path::PathBuf;

    #[test]
    fn test_local_remove_file_clears_marker() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let file = temp_dir.path().join("f.bin");
        fs::write(&file, b"partial").expect("write");
        marker::store(&file, &TransferMarker::new("/z/f.bin", 100, None)).expect("store");

        LocalNamespace.remove_file(&file).expect("remove");
        assert!(!file.exists());
        assert!(!marker::exists(&file));
    }

    #[test]
    fn test_remote_namespace_maps_not_found_to_none() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let ns = RemoteNamespace::new(Arc::new(MountedRemote::new(temp_dir.path())));
        assert!(ns.stat(Path::new("/zone/none")).expect("stat").is_none());

        ns.make_dir_all(Path::new("/zone/home/a/b")).expect("mkdir");
        let entry = ns.stat(Path::new("/zone/home/a")).expect("stat").expect("exists");
        assert!(entry.is_dir());
        assert_eq!(entry.path, PathBuf::from("/zone/home/a"));
    }
}
