//! Transfer status markers.
//!
//! A marker is a small JSON sidecar written next to a destination file while a
//! resumable transfer is in progress. Its presence means the destination bytes
//! are not a complete copy. It is created before the first byte is written,
//! removed only after the transfer succeeds, and deliberately left in place on
//! failure so a later attempt can resume.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::checksums::ChecksumValue;
use crate::error::EngineError;

/// Current marker schema version
const SCHEMA_VERSION: u32 = 1;

/// File name suffix identifying marker sidecars.
pub const MARKER_SUFFIX: &str = ".gridsync-transfer";

/// Appended to a marker while [`store`] writes it.
const TEMP_SUFFIX: &str = ".tmp";

/// Persisted state of one in-progress transfer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferMarker {
    pub schema_version: u32,
    /// Source the destination is being filled from
    pub source: String,
    /// Source size when the transfer began
    pub source_size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_checksum: Option<ChecksumValue>,
    /// Bytes known to be written when the marker was last updated
    pub committed: u64,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TransferMarker {
    pub fn new(source: impl Into<String>, source_size: u64, checksum: Option<ChecksumValue>) -> Self {
        let now = Utc::now();
        TransferMarker {
            schema_version: SCHEMA_VERSION,
            source: source.into(),
            source_size,
            source_checksum: checksum,
            committed: 0,
            started_at: now,
            updated_at: now,
        }
    }

    /// Whether this marker still describes the given source.
    ///
    /// A changed size or checksum means the partial bytes belong to an older
    /// version of the source and must not be continued.
    pub fn matches_source(&self, size: u64, checksum: Option<&ChecksumValue>) -> bool {
        if self.source_size != size {
            return false;
        }
        match (&self.source_checksum, checksum) {
            (Some(recorded), Some(current)) => recorded == current,
            _ => true,
        }
    }

    /// Offset to continue from, given how many bytes the destination holds now.
    pub fn resume_offset(&self, destination_len: u64) -> u64 {
        destination_len.min(self.source_size)
    }
}

/// Marker location for a destination: `.<name>.gridsync-transfer` beside it.
pub fn marker_path(destination: &Path) -> PathBuf {
    let name = destination
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let sidecar = format!(".{}{}", name, MARKER_SUFFIX);
    match destination.parent() {
        Some(parent) => parent.join(sidecar),
        None => PathBuf::from(sidecar),
    }
}

/// Inverse of [`marker_path`]: the destination a marker file belongs to.
pub fn marker_target(marker: &Path) -> Option<PathBuf> {
    let name = marker.file_name()?.to_str()?;
    let inner = name.strip_prefix('.')?.strip_suffix(MARKER_SUFFIX)?;
    if inner.is_empty() {
        return None;
    }
    Some(match marker.parent() {
        Some(parent) => parent.join(inner),
        None => PathBuf::from(inner),
    })
}

/// True for a marker and for the temporary file a crashed [`store`] leaves.
pub fn is_marker_file(path: &Path) -> bool {
    if marker_target(path).is_some() {
        return true;
    }
    match path.file_name().and_then(|n| n.to_str()).and_then(|n| n.strip_suffix(TEMP_SUFFIX)) {
        Some(name) => marker_target(&path.with_file_name(name)).is_some(),
        None => false,
    }
}

pub fn exists(destination: &Path) -> bool {
    marker_path(destination).is_file()
}

/// Read the marker for a destination, if one exists.
///
/// An unreadable or corrupt marker still signals an incomplete destination,
/// so it is reported as a marker describing no known source.
pub fn load(destination: &Path) -> Result<Option<TransferMarker>, EngineError> {
    let path = marker_path(destination);
    let raw = match fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(EngineError::io("read marker", path, e)),
    };

    match serde_json::from_str(&raw) {
        Ok(marker) => Ok(Some(marker)),
        Err(e) => {
            debug!("ignoring corrupt marker {}: {}", path.display(), e);
            Ok(Some(TransferMarker::new(String::new(), u64::MAX, None)))
        }
    }
}

/// Write (or refresh) the marker for a destination.
///
/// Written to a temporary file and renamed so readers never see a torn marker.
pub fn store(destination: &Path, marker: &TransferMarker) -> Result<(), EngineError> {
    let path = marker_path(destination);
    let mut tmp = path.clone().into_os_string();
    tmp.push(TEMP_SUFFIX);
    let tmp = PathBuf::from(tmp);
    let body = serde_json::to_vec_pretty(marker)
        .map_err(|e| EngineError::io("encode marker", &path, std::io::Error::from(e)))?;

    let mut file = fs::File::create(&tmp).map_err(|e| EngineError::io("write marker", &tmp, e))?;
    file.write_all(&body)
        .and_then(|_| file.sync_all())
        .map_err(|e| EngineError::io("write marker", &tmp, e))?;
    fs::rename(&tmp, &path).map_err(|e| EngineError::io("write marker", &path, e))?;
    Ok(())
}

/// Remove the marker after a successful transfer. Missing markers are fine.
pub fn clear(destination: &Path) -> Result<(), EngineError> {
    let path = marker_path(destination);
    match fs::remove_file(&path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(EngineError::io("remove marker", path, e)),
    }
}
