//! Small shared types: artifact formats and validated package names.

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;

/// Archive or binary format of a downloadable artifact.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactFormat {
    /// Gzip-compressed tar archive (`.tar.gz` / `.tgz`).
    #[serde(rename = "tar.gz")]
    TarGz,
    /// Zstandard-compressed tar archive (`.tar.zst`).
    #[serde(rename = "tar.zst")]
    TarZst,
    /// Uncompressed tar archive (`.tar`).
    Tar,
    /// Zip archive (`.zip`).
    Zip,
    /// Standalone file with no archive wrapper.
    Binary,
}

impl ArtifactFormat {
    /// Guess the format from a URL or file name by its extension.
    ///
    /// Anything unrecognised is treated as a raw [`ArtifactFormat::Binary`].
    pub fn detect(name: &str) -> Self {
        let name = name
            .split(['?', '#'])
            .next()
            .unwrap_or_default()
            .to_lowercase();

        if name.ends_with(".tar.zst") || name.ends_with(".tzst") {
            Self::TarZst
        } else if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            Self::TarGz
        } else if name.ends_with(".tar") {
            Self::Tar
        } else if name.ends_with(".zip") {
            Self::Zip
        } else {
            Self::Binary
        }
    }
}

impl std::fmt::Display for ArtifactFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::TarGz => "tar.gz",
            Self::TarZst => "tar.zst",
            Self::Tar => "tar",
            Self::Zip => "zip",
            Self::Binary => "binary",
        };
        f.write_str(s)
    }
}

/// Newtype for package names.
///
/// Names are used as file names for receipts and locks, so they may not be
/// empty, contain path separators, or contain whitespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PackageName(String);

impl PackageName {
    /// Validate and wrap a package name.
    ///
    /// # Errors
    ///
    /// Returns a message describing why `name` is not usable.
    pub fn new(name: impl Into<String>) -> Result<Self, String> {
        let name = name.into();
        if name.is_empty() {
            return Err("package name is empty".to_string());
        }
        if name.contains(['/', '\\']) || name.chars().any(char::is_whitespace) {
            return Err(format!(
                "package name '{name}' may not contain path separators or whitespace"
            ));
        }
        if name == "." || name == ".." {
            return Err(format!("package name '{name}' is reserved"));
        }
        Ok(Self(name))
    }

    /// Return the name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for PackageName {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<PackageName> for String {
    fn from(name: PackageName) -> Self {
        name.0
    }
}

impl std::fmt::Display for PackageName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for PackageName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for PackageName {
    fn borrow(&self) -> &str {
        &self.0
    }
}
