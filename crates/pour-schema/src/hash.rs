//! Archive checksums and installed-file fingerprints.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Errors raised while parsing a checksum string.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChecksumError {
    /// The hex portion was not exactly 64 characters long.
    #[error("invalid {algorithm} digest: expected 64 hex characters, got {len} in '{value}'")]
    Length {
        /// Algorithm the digest was declared for.
        algorithm: ChecksumAlgorithm,
        /// Length of the hex portion that was supplied.
        len: usize,
        /// The offending input.
        value: String,
    },

    /// The hex portion contained a non-hex character.
    #[error("invalid {algorithm} digest: contains non-hex characters in '{value}'")]
    NotHex {
        /// Algorithm the digest was declared for.
        algorithm: ChecksumAlgorithm,
        /// The offending input.
        value: String,
    },

    /// The `<algorithm>:` prefix named an unknown algorithm.
    #[error("unknown checksum algorithm '{0}'")]
    UnknownAlgorithm(String),
}

/// Digest algorithms a descriptor may pin its archive with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumAlgorithm {
    /// SHA-256, the algorithm upstream release pages publish.
    Sha256,
    /// BLAKE3, accepted for archives we mirror ourselves.
    Blake3,
}

impl ChecksumAlgorithm {
    /// Lowercase name used in descriptors and `<algorithm>:<hex>` strings.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sha256 => "sha256",
            Self::Blake3 => "blake3",
        }
    }

    /// Start an incremental hasher for this algorithm.
    pub fn hasher(self) -> ChecksumHasher {
        match self {
            Self::Sha256 => ChecksumHasher::Sha256(Sha256::new()),
            Self::Blake3 => ChecksumHasher::Blake3(Box::new(blake3::Hasher::new())),
        }
    }
}

impl std::fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ChecksumAlgorithm {
    type Err = ChecksumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sha256" => Ok(Self::Sha256),
            "blake3" => Ok(Self::Blake3),
            other => Err(ChecksumError::UnknownAlgorithm(other.to_string())),
        }
    }
}

/// Streaming hasher over either supported algorithm.
#[derive(Debug, Clone)]
pub enum ChecksumHasher {
    /// SHA-256 state.
    Sha256(Sha256),
    /// BLAKE3 state (boxed, the hasher is large).
    Blake3(Box<blake3::Hasher>),
}

impl ChecksumHasher {
    /// Feed more bytes into the digest.
    pub fn update(&mut self, data: &[u8]) {
        match self {
            Self::Sha256(h) => h.update(data),
            Self::Blake3(h) => {
                h.update(data);
            }
        }
    }

    /// Finish hashing and return the lowercase hex digest.
    pub fn finalize_hex(self) -> String {
        match self {
            Self::Sha256(h) => hex::encode(h.finalize()),
            Self::Blake3(h) => h.finalize().to_hex().to_string(),
        }
    }
}

/// A validated archive checksum: an algorithm plus a 64 character lowercase hex digest.
///
/// Serialized as `<algorithm>:<hex>` (e.g. `sha256:9a50...`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Checksum {
    algorithm: ChecksumAlgorithm,
    digest: String,
}

impl Checksum {
    /// Create a validated checksum.
    ///
    /// Accepts the hex digest with or without an `<algorithm>:` prefix
    /// matching `algorithm`.
    ///
    /// # Errors
    ///
    /// Returns an error if the hex portion is not exactly 64 ASCII hex characters.
    pub fn new(algorithm: ChecksumAlgorithm, value: &str) -> Result<Self, ChecksumError> {
        let prefix = format!("{}:", algorithm.as_str());
        let hex = value.trim().strip_prefix(&prefix).unwrap_or(value.trim());

        if hex.len() != 64 {
            return Err(ChecksumError::Length {
                algorithm,
                len: hex.len(),
                value: value.to_string(),
            });
        }

        if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(ChecksumError::NotHex {
                algorithm,
                value: value.to_string(),
            });
        }

        Ok(Self {
            algorithm,
            digest: hex.to_lowercase(),
        })
    }

    /// Shorthand for a SHA-256 checksum.
    ///
    /// # Errors
    ///
    /// See [`Checksum::new`].
    pub fn sha256(value: &str) -> Result<Self, ChecksumError> {
        Self::new(ChecksumAlgorithm::Sha256, value)
    }

    /// Compute the checksum of `data` with `algorithm`.
    pub fn compute(algorithm: ChecksumAlgorithm, data: &[u8]) -> Self {
        let mut hasher = algorithm.hasher();
        hasher.update(data);
        Self {
            algorithm,
            digest: hasher.finalize_hex(),
        }
    }

    /// The algorithm this digest was produced with.
    pub fn algorithm(&self) -> ChecksumAlgorithm {
        self.algorithm
    }

    /// The lowercase hex digest without prefix.
    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// Whether `actual_hex` (as produced by [`ChecksumHasher::finalize_hex`]) equals this digest.
    pub fn matches(&self, actual_hex: &str) -> bool {
        self.digest.eq_ignore_ascii_case(actual_hex)
    }
}

impl std::fmt::Display for Checksum {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.digest)
    }
}

impl std::str::FromStr for Checksum {
    type Err = ChecksumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some((algo, hex)) => Self::new(algo.parse()?, hex),
            None => Self::sha256(s),
        }
    }
}

impl Serialize for Checksum {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Checksum {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// BLAKE3 fingerprint of an installed file.
///
/// Receipts record one per placed file so an uninstall can tell whether a
/// file was modified after installation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Blake3Hash(String);

impl Blake3Hash {
    /// Compute BLAKE3 hash of data.
    pub fn compute(data: &[u8]) -> Self {
        Self(blake3::hash(data).to_hex().to_string())
    }

    /// Compute BLAKE3 hash of a file by reading it entirely into memory.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be read.
    pub fn compute_file(path: &std::path::Path) -> std::io::Result<Self> {
        let data = std::fs::read(path)?;
        Ok(Self::compute(&data))
    }

    /// Return the inner hex string as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Blake3Hash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
