//! Per-file transfer jobs.
//!
//! The planner decides *whether* an item moves; the builders here decide
//! *how*. Each builder turns a source entry and a destination path into a
//! [`TransferJob`] whose callback runs on a worker thread:
//!
//! - get: remote data object to local file, resumable
//! - put: local file to remote data object, resumable
//! - copy: server-side copy between two remote paths, counted in items
//!
//! Resumable transfers write a [`TransferMarker`] before the first byte and
//! clear it only after the bytes (and the checksum, when one is known) check
//! out. A failing transfer leaves the marker behind for the next attempt.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::checksums::{compute_file_checksum, ChecksumValue};
use crate::error::EngineError;
use crate::fs_ops;
use crate::marker::{self, TransferMarker};
use crate::model::{Direction, Entry, ProgressUnit};
use crate::path::remote_string;
use crate::remote::{ConnectionGuard, RemoteFilesystem};
use crate::scheduler::{JobContext, TransferJob};

/// Whether a job starts from scratch or continues an interrupted transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferMode {
    Fresh,
    Resume,
}

/// Builds the job for one planned item.
pub trait JobBuilder {
    fn direction(&self) -> Direction;

    fn build(&self, source: &Entry, destination: &Path, mode: TransferMode) -> TransferJob;
}

/// Builder for the given direction.
pub fn builder_for(direction: Direction, remote: Arc<dyn RemoteFilesystem>) -> Box<dyn JobBuilder> {
    match direction {
        Direction::Get => Box::new(GetJobs { remote }),
        Direction::Put => Box::new(PutJobs { remote }),
        Direction::Copy => Box::new(CopyJobs { remote }),
    }
}

pub struct GetJobs {
    remote: Arc<dyn RemoteFilesystem>,
}

impl JobBuilder for GetJobs {
    fn direction(&self) -> Direction {
        Direction::Get
    }

    fn build(&self, source: &Entry, destination: &Path, mode: TransferMode) -> TransferJob {
        let remote = Arc::clone(&self.remote);
        let src = remote_string(&source.path);
        let dst = destination.to_path_buf();
        let size = source.size;
        let checksum = source.checksum.clone();

        TransferJob::new(src.clone(), dst.clone(), size, ProgressUnit::Bytes, move |ctx| {
            download(remote.as_ref(), &src, &dst, size, checksum, mode, ctx)
        })
    }
}

pub struct PutJobs {
    remote: Arc<dyn RemoteFilesystem>,
}

impl JobBuilder for PutJobs {
    fn direction(&self) -> Direction {
        Direction::Put
    }

    fn build(&self, source: &Entry, destination: &Path, mode: TransferMode) -> TransferJob {
        let remote = Arc::clone(&self.remote);
        let src = source.path.clone();
        let dst = remote_string(destination);
        let size = source.size;
        let checksum = source.checksum.clone();

        TransferJob::new(
            src.display().to_string(),
            destination,
            size,
            ProgressUnit::Bytes,
            move |ctx| upload(remote.as_ref(), &src, &dst, size, checksum, mode, ctx),
        )
    }
}

pub struct CopyJobs {
    remote: Arc<dyn RemoteFilesystem>,
}

impl JobBuilder for CopyJobs {
    fn direction(&self) -> Direction {
        Direction::Copy
    }

    fn build(&self, source: &Entry, destination: &Path, _mode: TransferMode) -> TransferJob {
        let remote = Arc::clone(&self.remote);
        let src = remote_string(&source.path);
        let dst = remote_string(destination);

        TransferJob::new(src.clone(), destination, source.size, ProgressUnit::Items, move |ctx| {
            let _conn = ConnectionGuard::acquire(remote.as_ref())?;
            ctx.report(0, 1);
            remote.copy(&src, &dst)?;
            ctx.report(1, 1);
            debug!("copied {} -> {}", src, dst);
            Ok(())
        })
    }
}

fn download(
    remote: &dyn RemoteFilesystem,
    src: &str,
    dst: &Path,
    size: u64,
    checksum: Option<ChecksumValue>,
    mode: TransferMode,
    ctx: &JobContext,
) -> Result<(), EngineError> {
    let _conn = ConnectionGuard::acquire(remote)?;

    let checksum = match (checksum, remote.checksum_algorithm()) {
        (None, Some(algorithm)) => Some(remote.checksum(src, algorithm)?),
        (known, _) => known,
    };

    let offset = match mode {
        TransferMode::Resume => {
            let existing = fs_ops::stat(dst)?.map(|e| e.size).unwrap_or(0);
            continue_from(marker::load(dst)?, size, checksum.as_ref(), existing)
        }
        TransferMode::Fresh => 0,
    };

    let mut state = TransferMarker::new(src, size, checksum.clone());
    state.committed = offset;
    marker::store(dst, &state)?;

    let written = remote.download(src, dst, offset, &mut |processed, total| ctx.report(processed, total))?;
    if written != size {
        return Err(EngineError::TransferInterrupted {
            path: dst.display().to_string(),
            offset: written,
        });
    }

    if let Some(expected) = checksum {
        let actual = compute_file_checksum(dst, expected.algorithm())?;
        if actual != expected {
            // corrupt bytes cannot be resumed from
            fs_ops::remove_file(dst)?;
            marker::clear(dst)?;
            return Err(EngineError::ChecksumMismatch {
                path: dst.display().to_string(),
                expected: expected.to_string_with_algo(),
                actual: actual.to_string_with_algo(),
            });
        }
    }

    marker::clear(dst)?;
    debug!("downloaded {} -> {} ({} bytes)", src, dst.display(), written);
    Ok(())
}

fn upload(
    remote: &dyn RemoteFilesystem,
    src: &Path,
    dst: &str,
    size: u64,
    checksum: Option<ChecksumValue>,
    mode: TransferMode,
    ctx: &JobContext,
) -> Result<(), EngineError> {
    let _conn = ConnectionGuard::acquire(remote)?;
    let source = src.display().to_string();

    let offset = match mode {
        TransferMode::Resume => {
            let existing = match remote.stat(dst) {
                Ok(entry) => entry.size,
                Err(e) if e.is_not_found() => 0,
                Err(e) => return Err(e),
            };
            continue_from(remote.marker(dst)?, size, checksum.as_ref(), existing)
        }
        TransferMode::Fresh => 0,
    };

    let algorithm = checksum.as_ref().map(|c| c.algorithm()).or_else(|| remote.checksum_algorithm());
    let mut state = TransferMarker::new(source.clone(), size, checksum);
    state.committed = offset;
    remote.store_marker(dst, &state)?;

    let written = remote.upload(src, dst, offset, &mut |processed, total| ctx.report(processed, total))?;
    if written != size {
        return Err(EngineError::TransferInterrupted {
            path: dst.to_string(),
            offset: written,
        });
    }

    // verify against the checksum the grid computes for the new object
    if let Some(algorithm) = algorithm {
        let stored = remote.checksum(dst, algorithm)?;
        let local = compute_file_checksum(src, algorithm)?;
        if local != stored {
            remote.remove_file(dst)?;
            remote.clear_marker(dst)?;
            return Err(EngineError::ChecksumMismatch {
                path: dst.to_string(),
                expected: local.to_string_with_algo(),
                actual: stored.to_string_with_algo(),
            });
        }
    }

    remote.clear_marker(dst)?;
    debug!("uploaded {} -> {} ({} bytes)", source, dst, written);
    Ok(())
}

/// Offset an interrupted transfer continues from; zero when the marker is
/// missing or describes a different version of the source.
fn continue_from(
    existing: Option<TransferMarker>,
    size: u64,
    checksum: Option<&ChecksumValue>,
    destination_len: u64,
) -> u64 {
    match existing {
        Some(state) if state.matches_source(size, checksum) => state.resume_offset(destination_len),
        Some(state) => {
            warn!(
                "source {} changed since the interrupted transfer, restarting",
                state.source
            );
            0
        }
        None => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksums::ChecksumAlgorithm;
    use crate::progress::NoopProgress;
    use crate::remote::MountedRemote;
    use crate::scheduler::{JobScheduler, SchedulerConfig};
    use std::fs;

    fn run(job: TransferJob) -> Result<(), EngineError> {
        let mut scheduler =
            JobScheduler::start(SchedulerConfig::with_threads(1), Arc::new(NoopProgress)).expect("start");
        scheduler.schedule(job).expect("schedule");
        scheduler.wait().into_result().map(|_| ())
    }

    #[test]
    fn test_get_resumes_from_partial_bytes() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let remote = Arc::new(MountedRemote::new(temp_dir.path().join("grid")));
        remote.make_dir("/z/home/u").expect("mkdir");
        fs::write(remote.backing_path("/z/home/u/data.bin"), b"0123456789").expect("write");

        let local = temp_dir.path().join("data.bin");
        fs::write(&local, b"01234").expect("write partial");
        marker::store(&local, &TransferMarker::new("/z/home/u/data.bin", 10, None)).expect("marker");

        let source = remote.stat("/z/home/u/data.bin").expect("stat");
        let builder = builder_for(Direction::Get, remote.clone());
        run(builder.build(&source, &local, TransferMode::Resume)).expect("transfer");

        assert_eq!(fs::read(&local).expect("read"), b"0123456789");
        assert!(!marker::exists(&local));
    }

    #[test]
    fn test_get_checksum_mismatch_removes_destination() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let remote = Arc::new(MountedRemote::new(temp_dir.path().join("grid")));
        remote.make_dir("/z").expect("mkdir");
        fs::write(remote.backing_path("/z/f"), b"hello").expect("write");

        let mut source = remote.stat("/z/f").expect("stat");
        source.checksum = Some(ChecksumValue::new(ChecksumAlgorithm::Md5, "00000000000000000000000000000000"));

        let local = temp_dir.path().join("f");
        let err = run(builder_for(Direction::Get, remote).build(&source, &local, TransferMode::Fresh))
            .unwrap_err();

        assert!(matches!(err, EngineError::ChecksumMismatch { .. }));
        assert!(!local.exists());
        assert!(!marker::exists(&local));
    }

    #[test]
    fn test_failed_get_keeps_marker() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let remote = Arc::new(MountedRemote::new(temp_dir.path().join("grid")));
        remote.make_dir("/z").expect("mkdir");

        // source vanished between planning and transfer
        let source = Entry::file("/z/gone", 42);
        let local = temp_dir.path().join("gone");
        let err = run(builder_for(Direction::Get, remote).build(&source, &local, TransferMode::Fresh))
            .unwrap_err();

        assert!(err.is_not_found());
        assert!(marker::exists(&local));
    }

    #[test]
    fn test_short_get_is_interrupted_and_keeps_marker() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let remote = Arc::new(MountedRemote::new(temp_dir.path().join("grid")));
        remote.make_dir("/z").expect("mkdir");
        fs::write(remote.backing_path("/z/f"), b"hello").expect("write");

        // the object shrank after it was listed at 100 bytes
        let source = Entry::file("/z/f", 100);
        let local = temp_dir.path().join("f");
        let err = run(builder_for(Direction::Get, remote).build(&source, &local, TransferMode::Fresh))
            .unwrap_err();

        match err {
            EngineError::TransferInterrupted { offset, .. } => assert_eq!(offset, 5),
            other => panic!("unexpected error: {other}"),
        }
        let state = marker::load(&local).expect("load").expect("marker kept");
        assert_eq!(state.source_size, 100);
        assert_eq!(fs::read(&local).expect("read"), b"hello");
    }

    #[test]
    fn test_short_put_is_interrupted_and_keeps_remote_marker() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let remote = Arc::new(MountedRemote::new(temp_dir.path().join("grid")));
        remote.make_dir("/z/home/u").expect("mkdir");

        let local = temp_dir.path().join("up.txt");
        fs::write(&local, b"upload me").expect("write");
        let source = Entry::file(&local, 100);

        let err = run(builder_for(Direction::Put, remote.clone()).build(
            &source,
            Path::new("/z/home/u/up.txt"),
            TransferMode::Fresh,
        ))
        .unwrap_err();

        assert!(matches!(err, EngineError::TransferInterrupted { offset: 9, .. }));
        let state = remote.marker("/z/home/u/up.txt").expect("marker").expect("marker kept");
        assert_eq!(state.source_size, 100);
    }

    #[test]
    fn test_put_clears_remote_marker_and_verifies() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let remote = Arc::new(
            MountedRemote::new(temp_dir.path().join("grid")).with_checksums(ChecksumAlgorithm::Sha256),
        );
        remote.make_dir("/z/home/u").expect("mkdir");

        let local = temp_dir.path().join("up.txt");
        fs::write(&local, b"upload me").expect("write");
        let source = fs_ops::stat(&local).expect("stat").expect("exists");

        run(builder_for(Direction::Put, remote.clone()).build(
            &source,
            Path::new("/z/home/u/up.txt"),
            TransferMode::Fresh,
        ))
        .expect("transfer");

        assert_eq!(
            fs::read(remote.backing_path("/z/home/u/up.txt")).expect("read"),
            b"upload me"
        );
        assert!(remote.marker("/z/home/u/up.txt").expect("marker").is_none());
        assert_eq!(remote.peak_connections(), 1);
    }

    #[test]
    fn test_copy_is_server_side() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let remote = Arc::new(MountedRemote::new(temp_dir.path()));
        remote.make_dir("/z/a").expect("mkdir");
        fs::write(remote.backing_path("/z/a/x"), b"xyz").expect("write");

        let source = remote.stat("/z/a/x").expect("stat");
        run(builder_for(Direction::Copy, remote.clone()).build(
            &source,
            Path::new("/z/b/x"),
            TransferMode::Fresh,
        ))
        .expect("copy");

        assert_eq!(fs::read(remote.backing_path("/z/b/x")).expect("read"), b"xyz");
    }

    #[test]
    fn test_changed_source_restarts_from_zero() {
        let stale = TransferMarker::new("/z/f", 10, None);
        assert_eq!(continue_from(Some(stale.clone()), 10, None, 4), 4);
        assert_eq!(continue_from(Some(stale), 11, None, 4), 0);
        assert_eq!(continue_from(None, 10, None, 4), 0);
    }
}
