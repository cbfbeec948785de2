//! Checksum computation.
//!
//! The differential planner compares digests of both sides, hashing with
//! whichever algorithm the side that already reports a checksum uses.

use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Supported checksum algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumAlgorithm {
    /// MD5 (the grid's historical default)
    Md5,
    /// SHA-256
    Sha256,
    /// BLAKE3
    Blake3,
}

impl fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Md5 => write!(f, "md5"),
            Self::Sha256 => write!(f, "sha256"),
            Self::Blake3 => write!(f, "blake3"),
        }
    }
}

impl FromStr for ChecksumAlgorithm {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "md5" => Ok(Self::Md5),
            "sha256" | "sha2" | "sha-256" => Ok(Self::Sha256),
            "blake3" => Ok(Self::Blake3),
            other => Err(EngineError::InvalidArguments(format!(
                "unknown checksum algorithm '{}'",
                other
            ))),
        }
    }
}

/// A computed checksum value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecksumValue {
    algorithm: ChecksumAlgorithm,
    hex: String,
}

impl ChecksumValue {
    pub fn new(algorithm: ChecksumAlgorithm, hex: impl Into<String>) -> Self {
        ChecksumValue {
            algorithm,
            hex: hex.into().to_lowercase(),
        }
    }

    pub fn algorithm(&self) -> ChecksumAlgorithm {
        self.algorithm
    }

    pub fn hex(&self) -> &str {
        &self.hex
    }

    /// Format as "algo:hex"
    pub fn to_string_with_algo(&self) -> String {
        format!("{}:{}", self.algorithm, self.hex)
    }
}

impl fmt::Display for ChecksumValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.hex)
    }
}

/// Incremental hasher over one algorithm.
pub trait ChecksumHasher: Send {
    fn update(&mut self, data: &[u8]);

    fn finalize(self: Box<Self>) -> ChecksumValue;
}

struct Md5Hasher(md5::Context);

impl ChecksumHasher for Md5Hasher {
    fn update(&mut self, data: &[u8]) {
        self.0.consume(data);
    }

    fn finalize(self: Box<Self>) -> ChecksumValue {
        ChecksumValue::new(ChecksumAlgorithm::Md5, format!("{:x}", self.0.compute()))
    }
}

struct Sha256Hasher(sha2::Sha256);

impl ChecksumHasher for Sha256Hasher {
    fn update(&mut self, data: &[u8]) {
        use sha2::Digest;
        self.0.update(data);
    }

    fn finalize(self: Box<Self>) -> ChecksumValue {
        use sha2::Digest;
        ChecksumValue::new(ChecksumAlgorithm::Sha256, format!("{:x}", self.0.finalize()))
    }
}

struct Blake3Hasher(blake3::Hasher);

impl ChecksumHasher for Blake3Hasher {
    fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }

    fn finalize(self: Box<Self>) -> ChecksumValue {
        ChecksumValue::new(ChecksumAlgorithm::Blake3, self.0.finalize().to_hex().to_string())
    }
}

/// Create a new hasher for the given algorithm
pub fn create_hasher(algorithm: ChecksumAlgorithm) -> Box<dyn ChecksumHasher> {
    match algorithm {
        ChecksumAlgorithm::Md5 => Box::new(Md5Hasher(md5::Context::new())),
        ChecksumAlgorithm::Sha256 => Box::new(Sha256Hasher(sha2::Sha256::default())),
        ChecksumAlgorithm::Blake3 => Box::new(Blake3Hasher(blake3::Hasher::new())),
    }
}

/// Compute checksum for a local file
pub fn compute_file_checksum(
    path: &Path,
    algorithm: ChecksumAlgorithm,
) -> Result<ChecksumValue, EngineError> {
    let mut file = File::open(path).map_err(|e| EngineError::from_io("open", path, e))?;
    let mut hasher = create_hasher(algorithm);
    let mut buffer = [0u8; 65536];

    loop {
        match file.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => hasher.update(&buffer[..n]),
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(EngineError::io("read", path, e)),
        }
    }

    Ok(hasher.finalize())
}
