//! Install errors
//!
//! One variant per way an install run can stop. Variants raised after
//! placement has started carry the partial receipt so the caller can see,
//! and later undo, what was already written.

use std::path::PathBuf;

use pour_schema::{ChecksumAlgorithm, InstallReceipt};
use thiserror::Error;

use crate::io::download::FetchError;
use crate::io::extract::ExtractError;
use crate::place::PlacementError;
use crate::resolver::ResolveError;

#[derive(Error, Debug)]
pub enum InstallError {
    #[error("missing dependency '{name}': {source}")]
    MissingDependency { name: String, source: ResolveError },

    #[error("failed to fetch {url}: {source}")]
    Fetch { url: String, source: FetchError },

    #[error("checksum mismatch for {url}: expected {algorithm}:{expected}, got {algorithm}:{actual}")]
    ChecksumMismatch {
        url: String,
        algorithm: ChecksumAlgorithm,
        expected: String,
        actual: String,
    },

    #[error("failed to extract {}: {source}", archive.display())]
    Extract {
        archive: PathBuf,
        source: ExtractError,
    },

    #[error("{source}")]
    Placement {
        source: PlacementError,
        receipt: Box<InstallReceipt>,
    },

    #[error("patch target missing: {search:?} not found in {}", file.display())]
    PatchTargetMissing {
        file: PathBuf,
        search: String,
        receipt: Box<InstallReceipt>,
    },

    #[error("failed to patch {}: {source}", file.display())]
    Patch {
        file: PathBuf,
        source: std::io::Error,
        receipt: Box<InstallReceipt>,
    },

    #[error("{} is locked by another install (lock file {})", prefix.display(), lock_path.display())]
    Locked { prefix: PathBuf, lock_path: PathBuf },

    #[error("failed to lock {}: {source}", lock_path.display())]
    Lock {
        lock_path: PathBuf,
        source: std::io::Error,
    },

    #[error("install cancelled")]
    Cancelled { receipt: Option<Box<InstallReceipt>> },
}

/// Coarse classification of an [`InstallError`], stable across variants'
/// payload changes. The CLI maps these to exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    MissingDependency,
    Fetch,
    ChecksumMismatch,
    Extract,
    Placement,
    PatchTargetMissing,
    Patch,
    Locked,
    Cancelled,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::MissingDependency => "MissingDependency",
            Self::Fetch => "FetchError",
            Self::ChecksumMismatch => "ChecksumMismatch",
            Self::Extract => "ExtractError",
            Self::Placement => "PlacementError",
            Self::PatchTargetMissing => "PatchTargetMissing",
            Self::Patch => "PatchError",
            Self::Locked => "Locked",
            Self::Cancelled => "Cancelled",
        };
        f.write_str(s)
    }
}

impl InstallError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MissingDependency { .. } => ErrorKind::MissingDependency,
            Self::Fetch { .. } => ErrorKind::Fetch,
            Self::ChecksumMismatch { .. } => ErrorKind::ChecksumMismatch,
            Self::Extract { .. } => ErrorKind::Extract,
            Self::Placement { .. } => ErrorKind::Placement,
            Self::PatchTargetMissing { .. } => ErrorKind::PatchTargetMissing,
            Self::Patch { .. } => ErrorKind::Patch,
            Self::Locked { .. } | Self::Lock { .. } => ErrorKind::Locked,
            Self::Cancelled { .. } => ErrorKind::Cancelled,
        }
    }

    /// The partial receipt, for errors raised once files may have been written.
    pub fn receipt(&self) -> Option<&InstallReceipt> {
        match self {
            Self::Placement { receipt, .. }
            | Self::PatchTargetMissing { receipt, .. }
            | Self::Patch { receipt, .. } => Some(receipt),
            Self::Cancelled { receipt } => receipt.as_deref(),
            _ => None,
        }
    }

    /// Take ownership of the partial receipt.
    pub fn into_receipt(self) -> Option<InstallReceipt> {
        match self {
            Self::Placement { receipt, .. }
            | Self::PatchTargetMissing { receipt, .. }
            | Self::Patch { receipt, .. } => Some(*receipt),
            Self::Cancelled { receipt } => receipt.map(|r| *r),
            _ => None,
        }
    }
}

impl From<crate::lock::LockError> for InstallError {
    fn from(err: crate::lock::LockError) -> Self {
        match err {
            crate::lock::LockError::Contended { prefix, lock_path } => {
                Self::Locked { prefix, lock_path }
            }
            crate::lock::LockError::Io { lock_path, source } => Self::Lock { lock_path, source },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pour_schema::{Checksum, PackageName};

    fn receipt() -> Box<InstallReceipt> {
        Box::new(InstallReceipt::new(
            PackageName::new("v2g").unwrap(),
            None,
            "https://example/v2g.tar.gz",
            Checksum::compute(ChecksumAlgorithm::Sha256, b""),
        ))
    }

    #[test]
    fn test_receipt_only_after_placement() {
        let err = InstallError::Fetch {
            url: "x".into(),
            source: FetchError::Status { status: 404 },
        };
        assert_eq!(err.kind(), ErrorKind::Fetch);
        assert!(err.receipt().is_none());

        let err = InstallError::PatchTargetMissing {
            file: "/opt/pour/bin/v2g".into(),
            search: "/usr/local".into(),
            receipt: receipt(),
        };
        assert_eq!(err.kind(), ErrorKind::PatchTargetMissing);
        assert_eq!(err.receipt().unwrap().package.as_str(), "v2g");
    }

    #[test]
    fn test_cancelled_before_placement_has_no_receipt() {
        let err = InstallError::Cancelled { receipt: None };
        assert!(err.into_receipt().is_none());
    }

    #[test]
    fn test_mismatch_message_names_both_digests() {
        let err = InstallError::ChecksumMismatch {
            url: "https://example/v2g.tar.gz".into(),
            algorithm: ChecksumAlgorithm::Sha256,
            expected: "aa".into(),
            actual: "bb".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("sha256:aa"));
        assert!(msg.contains("sha256:bb"));
    }
}
