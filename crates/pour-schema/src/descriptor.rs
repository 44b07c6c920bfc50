//! TOML package descriptor parsing
//!
//! A descriptor is a static declaration of what to fetch, how to verify it,
//! where its files go, and which installed files need text substituted
//! afterwards. It is parsed and validated once, then only read.

use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::hash::{Checksum, ChecksumAlgorithm, ChecksumError};
use crate::types::{ArtifactFormat, PackageName};

/// Errors that can occur when loading or validating a descriptor.
#[derive(Error, Debug)]
pub enum DescriptorError {
    /// An I/O error occurred while reading a descriptor file.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The TOML content could not be deserialized.
    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// A required field is missing or empty.
    #[error("field '{0}' is missing or empty")]
    MissingField(&'static str),

    /// The package name is unusable.
    #[error("invalid package name: {0}")]
    InvalidName(String),

    /// The checksum could not be parsed.
    #[error(transparent)]
    Checksum(#[from] ChecksumError),

    /// Neither or both of `sha256` and `blake3` were given.
    #[error("exactly one of 'sha256' or 'blake3' must be set")]
    ChecksumConflict,

    /// A rule path is absolute or climbs out of its root.
    #[error("{field} path '{path}' must be relative and may not contain '..'")]
    UnsafePath {
        /// The descriptor field holding the path.
        field: &'static str,
        /// The offending path.
        path: String,
    },

    /// The descriptor has no `[[install.files]]` entries.
    #[error("descriptor installs no files")]
    NoInstallRules,

    /// Two install rules would write the same destination.
    #[error("more than one install rule writes {root}/{path}")]
    DuplicateDestination {
        /// Destination root name.
        root: String,
        /// Path relative to the root.
        path: String,
    },

    /// A patch rule targets a file no install rule places.
    #[error("patch targets {root}/{path}, which no install rule places")]
    UnknownPatchTarget {
        /// Destination root name.
        root: String,
        /// Path relative to the root.
        path: String,
    },

    /// A patch rule has an empty search string.
    #[error("patch for {root}/{path} has an empty search string")]
    EmptySearch {
        /// Destination root name.
        root: String,
        /// Path relative to the root.
        path: String,
    },
}

/// Copy one file out of the extracted archive into a destination root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InstallRule {
    /// Path of the file inside the extracted archive.
    pub source: String,
    /// Symbolic destination root (e.g. `bin`, `lib`).
    pub root: String,
    /// Optional sub-directory below the root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub into: Option<String>,
    /// Optional destination file name; defaults to the source file name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rename: Option<String>,
}

impl InstallRule {
    /// Destination path relative to the rule's root.
    pub fn destination(&self) -> PathBuf {
        let file_name = self.rename.as_deref().map_or_else(
            || {
                Path::new(&self.source)
                    .file_name()
                    .map(PathBuf::from)
                    .unwrap_or_default()
            },
            PathBuf::from,
        );
        match &self.into {
            Some(dir) => Path::new(dir).join(file_name),
            None => file_name,
        }
    }
}

/// Literal text substitution applied to an installed file after placement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PatchRule {
    /// Destination root holding the target file.
    pub root: String,
    /// Target file relative to the root.
    pub path: String,
    /// Literal text to look for.
    pub search: String,
    /// Replacement text; `{<root>}` placeholders expand to destination paths.
    pub replace: String,
}

/// Where the archive comes from and how to check it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Source {
    /// Archive locator (`https://`, `file://` or a local path).
    pub url: String,
    /// Digest the fetched bytes must match.
    pub checksum: Checksum,
    /// Archive format.
    pub format: ArtifactFormat,
    /// Lift the contents of a single top-level directory after extraction.
    pub strip_components: bool,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawDescriptor {
    name: Option<String>,
    version: Option<String>,
    #[serde(default)]
    desc: String,
    #[serde(default)]
    homepage: String,
    #[serde(default)]
    url: String,
    sha256: Option<String>,
    blake3: Option<String>,
    #[serde(default)]
    license: String,
    #[serde(default)]
    depends_on: Vec<String>,
    format: Option<ArtifactFormat>,
    #[serde(default = "default_strip")]
    strip_components: bool,
    #[serde(default)]
    install: RawInstall,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawInstall {
    #[serde(default)]
    files: Vec<InstallRule>,
    #[serde(default)]
    patch: Vec<PatchRule>,
}

fn default_strip() -> bool {
    true
}

/// A validated package descriptor.
///
/// Constructed only through [`PackageDescriptor::parse`] or
/// [`PackageDescriptor::from_file`]; never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageDescriptor {
    name: PackageName,
    version: Option<String>,
    description: String,
    homepage: String,
    license: String,
    source: Source,
    dependencies: BTreeSet<String>,
    install_rules: Vec<InstallRule>,
    patch_rules: Vec<PatchRule>,
}

impl PackageDescriptor {
    /// Parse a descriptor from a TOML file on disk.
    ///
    /// When the descriptor has no `name`, the file stem is used.
    ///
    /// # Errors
    ///
    /// Returns `DescriptorError::Io` if the file cannot be read, or any
    /// parse/validation error from [`PackageDescriptor::parse`].
    pub fn from_file(path: &Path) -> Result<Self, DescriptorError> {
        let content = fs::read_to_string(path)?;
        let stem = path.file_stem().and_then(|s| s.to_str());
        Self::parse_with_fallback(&content, stem)
    }

    /// Parse a descriptor from a TOML string. `name` is required.
    ///
    /// # Errors
    ///
    /// Returns `DescriptorError::Parse` for malformed TOML and a specific
    /// variant for every validation failure.
    pub fn parse(content: &str) -> Result<Self, DescriptorError> {
        Self::parse_with_fallback(content, None)
    }

    fn parse_with_fallback(
        content: &str,
        fallback_name: Option<&str>,
    ) -> Result<Self, DescriptorError> {
        let raw: RawDescriptor = toml::from_str(content)?;
        Self::from_raw(raw, fallback_name)
    }

    fn from_raw(raw: RawDescriptor, fallback_name: Option<&str>) -> Result<Self, DescriptorError> {
        let name = raw
            .name
            .or_else(|| fallback_name.map(str::to_string))
            .ok_or(DescriptorError::MissingField("name"))?;
        let name = PackageName::new(name).map_err(DescriptorError::InvalidName)?;

        for (field, value) in [
            ("desc", &raw.desc),
            ("homepage", &raw.homepage),
            ("url", &raw.url),
            ("license", &raw.license),
        ] {
            if value.trim().is_empty() {
                return Err(DescriptorError::MissingField(field));
            }
        }

        let checksum = match (raw.sha256.as_deref(), raw.blake3.as_deref()) {
            (Some(hex), None) => Checksum::new(ChecksumAlgorithm::Sha256, hex)?,
            (None, Some(hex)) => Checksum::new(ChecksumAlgorithm::Blake3, hex)?,
            _ => return Err(DescriptorError::ChecksumConflict),
        };

        let dependencies: BTreeSet<String> = raw
            .depends_on
            .into_iter()
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty())
            .collect();

        validate_rules(&raw.install.files, &raw.install.patch)?;

        let format = raw
            .format
            .unwrap_or_else(|| ArtifactFormat::detect(&raw.url));
        let version = raw
            .version
            .filter(|v| !v.trim().is_empty())
            .or_else(|| infer_version(&raw.url));

        Ok(Self {
            name,
            version,
            description: raw.desc,
            homepage: raw.homepage,
            license: raw.license,
            source: Source {
                url: raw.url,
                checksum,
                format,
                strip_components: raw.strip_components,
            },
            dependencies,
            install_rules: raw.install.files,
            patch_rules: raw.install.patch,
        })
    }

    /// Package name.
    pub fn name(&self) -> &PackageName {
        &self.name
    }

    /// Declared or URL-inferred version, if any.
    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    /// One-line description (`desc`).
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Project homepage.
    pub fn homepage(&self) -> &str {
        &self.homepage
    }

    /// SPDX license identifier.
    pub fn license(&self) -> &str {
        &self.license
    }

    /// Source archive location and checksum.
    pub fn source(&self) -> &Source {
        &self.source
    }

    /// Runtime dependency names, deduplicated and sorted.
    pub fn dependencies(&self) -> &BTreeSet<String> {
        &self.dependencies
    }

    /// Install rules in declaration order.
    pub fn install_rules(&self) -> &[InstallRule] {
        &self.install_rules
    }

    /// Patch rules in declaration order.
    pub fn patch_rules(&self) -> &[PatchRule] {
        &self.patch_rules
    }

    /// Every destination root name referenced by an install rule.
    pub fn referenced_roots(&self) -> BTreeSet<&str> {
        self.install_rules.iter().map(|r| r.root.as_str()).collect()
    }
}

impl std::str::FromStr for PackageDescriptor {
    type Err = DescriptorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn validate_rules(files: &[InstallRule], patches: &[PatchRule]) -> Result<(), DescriptorError> {
    if files.is_empty() {
        return Err(DescriptorError::NoInstallRules);
    }

    let mut destinations = HashSet::new();
    for rule in files {
        if rule.root.trim().is_empty() {
            return Err(DescriptorError::MissingField("install.files.root"));
        }
        check_relative("install.files.source", &rule.source)?;
        if let Some(into) = &rule.into {
            check_relative("install.files.into", into)?;
        }
        if let Some(rename) = &rule.rename {
            check_relative("install.files.rename", rename)?;
            if Path::new(rename).components().count() != 1 {
                return Err(DescriptorError::UnsafePath {
                    field: "install.files.rename",
                    path: rename.clone(),
                });
            }
        }

        let dest = rule.destination();
        if !destinations.insert((rule.root.clone(), dest.clone())) {
            return Err(DescriptorError::DuplicateDestination {
                root: rule.root.clone(),
                path: dest.display().to_string(),
            });
        }
    }

    for patch in patches {
        check_relative("install.patch.path", &patch.path)?;
        let key = (patch.root.clone(), PathBuf::from(&patch.path));
        if !destinations.contains(&key) {
            return Err(DescriptorError::UnknownPatchTarget {
                root: patch.root.clone(),
                path: patch.path.clone(),
            });
        }
        if patch.search.is_empty() {
            return Err(DescriptorError::EmptySearch {
                root: patch.root.clone(),
                path: patch.path.clone(),
            });
        }
    }

    Ok(())
}

/// Reject empty, absolute, or `..`-bearing paths.
fn check_relative(field: &'static str, path: &str) -> Result<(), DescriptorError> {
    let p = Path::new(path);
    let ok = !path.is_empty() && p.components().all(|c| matches!(c, Component::Normal(_)));
    if ok {
        Ok(())
    } else {
        Err(DescriptorError::UnsafePath {
            field,
            path: path.to_string(),
        })
    }
}

static VERSION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|[-_vV])(\d+(?:\.\d+)+(?:-[0-9A-Za-z.]+)?)$").expect("valid version regex")
});

/// Infer a version from the archive file name, e.g. `v1.0.0.tar.gz` -> `1.0.0`.
fn infer_version(url: &str) -> Option<String> {
    let file = url.split(['?', '#']).next()?.rsplit('/').next()?;
    let stem = [".tar.gz", ".tgz", ".tar.zst", ".tzst", ".tar", ".zip"]
        .iter()
        .find_map(|ext| file.strip_suffix(ext))
        .unwrap_or(file);
    VERSION_RE
        .captures(stem)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}
