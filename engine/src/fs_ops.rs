//! Local filesystem operations.
//!
//! This module provides the low-level pieces the orchestrator needs on the
//! local side:
//! - Stat and list into `Entry` snapshots
//! - Recursive directory creation and removal
//! - Offset-aware byte copies with progress (the basis of resumable transfers)

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

use chrono::{DateTime, Utc};

use crate::error::EngineError;
use crate::marker;
use crate::model::{Entry, EntryKind};

/// Copy buffer size for offset copies
const COPY_BUFFER_SIZE: usize = 1024 * 1024;

fn entry_from_metadata(path: &Path, metadata: &fs::Metadata) -> Entry {
    let kind = if metadata.is_dir() {
        EntryKind::Directory
    } else {
        EntryKind::File
    };
    Entry {
        path: path.to_path_buf(),
        kind,
        size: if metadata.is_dir() { 0 } else { metadata.len() },
        modified: metadata.modified().ok().map(DateTime::<Utc>::from),
        checksum: None,
    }
}

/// Stat a local path. `Ok(None)` when it does not exist.
pub fn stat(path: &Path) -> Result<Option<Entry>, EngineError> {
    match fs::metadata(path) {
        Ok(metadata) => Ok(Some(entry_from_metadata(path, &metadata))),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(EngineError::io("stat", path, e)),
    }
}

/// List the immediate children of a local directory, sorted by path.
///
/// Transfer markers are bookkeeping, not content, and are left out.
pub fn list(dir: &Path) -> Result<Vec<Entry>, EngineError> {
    let read = fs::read_dir(dir).map_err(|e| EngineError::from_io("list", dir, e))?;
    let mut entries = Vec::new();

    for item in read {
        let item = item.map_err(|e| EngineError::io("list", dir, e))?;
        let path = item.path();
        if marker::is_marker_file(&path) {
            continue;
        }
        let metadata = fs::metadata(&path).map_err(|e| EngineError::io("stat", &path, e))?;
        entries.push(entry_from_metadata(&path, &metadata));
    }

    entries.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(entries)
}

/// Create a directory and all missing parents.
pub fn ensure_dir_all(path: &Path) -> Result<(), EngineError> {
    fs::create_dir_all(path).map_err(|e| EngineError::io("create directory", path, e))
}

/// Ensure the parent directory of a path exists, creating it if necessary.
pub fn ensure_parent_dir_exists(path: &Path) -> Result<(), EngineError> {
    let Some(parent) = path.parent() else {
        return Ok(());
    };
    if parent.as_os_str().is_empty() {
        return Ok(());
    }

    match fs::metadata(parent) {
        Ok(metadata) if metadata.is_dir() => Ok(()),
        Ok(_) => Err(EngineError::io(
            "create directory",
            parent,
            io::Error::new(
                io::ErrorKind::InvalidInput,
                "parent path exists but is not a directory",
            ),
        )),
        Err(e) if e.kind() == io::ErrorKind::NotFound => ensure_dir_all(parent),
        Err(e) => Err(EngineError::io("create directory", parent, e)),
    }
}

/// Remove a file. Missing files are not an error.
pub fn remove_file(path: &Path) -> Result<(), EngineError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(EngineError::io("remove file", path, e)),
    }
}

/// Remove a whole directory tree in one step.
pub fn remove_tree(path: &Path) -> Result<(), EngineError> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(EngineError::io("remove directory", path, e)),
    }
}

/// Copy `src` into `dst` starting at `offset`, reporting `(processed, total)`.
///
/// With `offset == 0` the destination is truncated first. Otherwise the
/// destination is cut back to `offset` so stale tail bytes from an earlier
/// attempt are never mixed with new ones. Returns the final destination size.
pub fn copy_from_offset(
    src: &Path,
    dst: &Path,
    offset: u64,
    progress: &mut dyn FnMut(u64, u64),
) -> Result<u64, EngineError> {
    let mut reader = File::open(src).map_err(|e| EngineError::from_io("open", src, e))?;
    let total = reader
        .metadata()
        .map_err(|e| EngineError::io("stat", src, e))?
        .len();
    let offset = offset.min(total);

    ensure_parent_dir_exists(dst)?;
    let mut writer = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(offset == 0)
        .open(dst)
        .map_err(|e| EngineError::io("open", dst, e))?;

    if offset > 0 {
        writer
            .set_len(offset)
            .and_then(|_| writer.seek(SeekFrom::Start(offset)))
            .map_err(|e| EngineError::io("seek", dst, e))?;
        reader
            .seek(SeekFrom::Start(offset))
            .map_err(|e| EngineError::io("seek", src, e))?;
    }

    let mut buffer = vec![0u8; COPY_BUFFER_SIZE];
    let mut processed = offset;
    progress(processed, total);

    loop {
        let read = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(EngineError::io("read", src, e)),
        };
        writer
            .write_all(&buffer[..read])
            .map_err(|e| EngineError::io("write", dst, e))?;
        processed += read as u64;
        progress(processed, total);
    }

    writer.flush().map_err(|e| EngineError::io("write", dst, e))?;
    preserve_mtime(src, dst);
    Ok(processed)
}

/// Best effort: carry the source modification time over to the destination.
pub fn preserve_mtime(src: &Path, dst: &Path) {
    if let Ok(metadata) = fs::metadata(src) {
        let mtime = filetime::FileTime::from_last_modification_time(&metadata);
        let _ = filetime::set_file_mtime(dst, mtime);
    }
}
