//! Install receipts
//!
//! A receipt records what an install run changed on disk so that a later
//! uninstall can reverse it. The installer only produces receipts; writing
//! them somewhere is the caller's business.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::descriptor::PatchRule;
use crate::hash::{Blake3Hash, Checksum};
use crate::types::PackageName;

/// How far an install run got.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReceiptStatus {
    /// Every file placed and every patch applied.
    #[default]
    Complete,
    /// Files placed, patches not attempted (the run was cancelled).
    Unpatched,
    /// Files placed, a patch rule's search text was not found.
    PatchFailed,
}

/// One file copied into a destination root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacedFile {
    /// Path inside the extracted archive.
    pub source: String,
    /// Destination root name.
    pub root: String,
    /// Absolute destination path.
    pub destination: PathBuf,
    /// Whether the executable bit was carried over.
    pub executable: bool,
    /// Fingerprint of the file as it was left on disk.
    pub blake3: Blake3Hash,
}

/// One patch rule that rewrote an installed file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedPatch {
    /// Absolute path of the patched file.
    pub file: PathBuf,
    /// Literal text that was searched for.
    pub search: String,
    /// Text it was replaced with, placeholders expanded.
    pub replacement: String,
    /// Number of occurrences replaced.
    pub occurrences: usize,
}

/// Record of an install run's effects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallReceipt {
    /// Installed package.
    pub package: PackageName,
    /// Package version, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Archive the files came from.
    pub source_url: String,
    /// Verified archive checksum.
    pub checksum: Checksum,
    /// When the run started.
    pub installed_at: DateTime<Utc>,
    /// Outcome of the run.
    #[serde(default)]
    pub status: ReceiptStatus,
    /// Every placed file, in install-rule order.
    #[serde(default)]
    pub files: Vec<PlacedFile>,
    /// Every applied patch, in patch-rule order.
    #[serde(default)]
    pub patches: Vec<AppliedPatch>,
    /// Patch rules that were not applied.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unapplied_patches: Vec<PatchRule>,
    /// Directories created while placing files, parents first.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub created_dirs: Vec<PathBuf>,
}

impl InstallReceipt {
    /// Start an empty receipt for a run.
    pub fn new(
        package: PackageName,
        version: Option<String>,
        source_url: impl Into<String>,
        checksum: Checksum,
    ) -> Self {
        Self {
            package,
            version,
            source_url: source_url.into(),
            checksum,
            installed_at: Utc::now(),
            status: ReceiptStatus::Complete,
            files: Vec::new(),
            patches: Vec::new(),
            unapplied_patches: Vec::new(),
            created_dirs: Vec::new(),
        }
    }

    /// Find the placed-file entry for an absolute destination.
    pub fn file_mut(&mut self, destination: &Path) -> Option<&mut PlacedFile> {
        self.files.iter_mut().find(|f| f.destination == destination)
    }

    /// Whether the run finished every step.
    pub fn is_complete(&self) -> bool {
        self.status == ReceiptStatus::Complete
    }

    /// Serialize to pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Returns a `serde_json::Error` if serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Parse a receipt from JSON.
    ///
    /// # Errors
    ///
    /// Returns a `serde_json::Error` if the content is not a valid receipt.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}
