//! Destination roots
//!
//! Install rules name symbolic roots (`bin`, `lib`, ...). The surrounding tool
//! decides where each root lives; nothing here is hardcoded to a system path.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

/// Roots derived from the prefix unless overridden.
pub const DEFAULT_ROOTS: [&str; 5] = ["bin", "etc", "lib", "libexec", "share"];

/// Name under which the prefix itself is addressable.
pub const PREFIX_ROOT: &str = "prefix";

/// Make `path` absolute against the working directory, then fold away `.`,
/// `..` and trailing separators without touching the filesystem.
///
/// Symlinks are left as written. When the working directory cannot be read
/// the path stays relative and placement refuses it later.
pub fn normalize_path(path: &Path) -> PathBuf {
    let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    let mut normalized = PathBuf::new();

    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match normalized.components().next_back() {
                Some(Component::Normal(_)) => {
                    normalized.pop();
                }
                Some(Component::RootDir | Component::Prefix(_)) => {}
                _ => normalized.push(".."),
            },
            other => normalized.push(other),
        }
    }

    normalized
}

/// Map from symbolic root name to an absolute directory, plus the prefix the
/// install run is locked on.
///
/// Every path is passed through [`normalize_path`] on the way in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallRoots {
    prefix: PathBuf,
    roots: BTreeMap<String, PathBuf>,
}

impl InstallRoots {
    /// Roots with only the prefix itself registered.
    pub fn new(prefix: impl Into<PathBuf>) -> Self {
        let prefix: PathBuf = prefix.into();
        let prefix = normalize_path(&prefix);
        let mut roots = BTreeMap::new();
        roots.insert(PREFIX_ROOT.to_string(), prefix.clone());
        Self { prefix, roots }
    }

    /// Roots laid out the conventional way below `prefix` (`prefix/bin`, `prefix/lib`, ...).
    pub fn from_prefix(prefix: impl Into<PathBuf>) -> Self {
        let mut roots = Self::new(prefix);
        for name in DEFAULT_ROOTS {
            let path = roots.prefix.join(name);
            roots.roots.insert(name.to_string(), path);
        }
        roots
    }

    /// Register or replace a root.
    pub fn with_root(mut self, name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        self.insert(name, path);
        self
    }

    /// Register or replace a root in place.
    pub fn insert(&mut self, name: impl Into<String>, path: impl Into<PathBuf>) {
        let path: PathBuf = path.into();
        self.roots.insert(name.into(), normalize_path(&path));
    }

    /// The installation prefix.
    pub fn prefix(&self) -> &Path {
        &self.prefix
    }

    /// Look up a root by name.
    pub fn get(&self, name: &str) -> Option<&Path> {
        self.roots.get(name).map(PathBuf::as_path)
    }

    /// Iterate over `(name, path)` pairs in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Path)> {
        self.roots.iter().map(|(k, v)| (k.as_str(), v.as_path()))
    }

    /// The prefix followed by every root directory not inside it, deduplicated.
    pub fn lock_targets(&self) -> Vec<&Path> {
        let mut targets = vec![self.prefix.as_path()];
        for dir in self.roots.values() {
            if !dir.starts_with(&self.prefix) && !targets.contains(&dir.as_path()) {
                targets.push(dir);
            }
        }
        targets
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_prefix_layout() {
        let roots = InstallRoots::from_prefix("/opt/pour");
        assert_eq!(roots.get("bin"), Some(Path::new("/opt/pour/bin")));
        assert_eq!(roots.get("lib"), Some(Path::new("/opt/pour/lib")));
        assert_eq!(roots.get(PREFIX_ROOT), Some(Path::new("/opt/pour")));
        assert_eq!(roots.get("frameworks"), None);
    }

    #[test]
    fn test_override_root() {
        let roots = InstallRoots::from_prefix("/opt/pour").with_root("bin", "/usr/local/bin");
        assert_eq!(roots.get("bin"), Some(Path::new("/usr/local/bin")));
        assert_eq!(roots.prefix(), Path::new("/opt/pour"));
    }

    #[test]
    fn test_normalize_folds_dots_and_trailing_slash() {
        assert_eq!(normalize_path(Path::new("/opt/pour/")), Path::new("/opt/pour"));
        assert_eq!(
            normalize_path(Path::new("/opt/./x/../pour")),
            Path::new("/opt/pour")
        );
        assert_eq!(normalize_path(Path::new("/../opt")), Path::new("/opt"));
    }

    #[test]
    fn test_relative_prefix_becomes_absolute() {
        let cwd = std::env::current_dir().unwrap();
        let roots = InstallRoots::from_prefix("rel-prefix/").with_root("share", "./data/../share");

        assert_eq!(roots.prefix(), cwd.join("rel-prefix"));
        assert_eq!(roots.get("bin"), Some(cwd.join("rel-prefix/bin").as_path()));
        assert_eq!(roots.get("share"), Some(cwd.join("share").as_path()));
        assert!(roots.iter().all(|(_, dir)| dir.is_absolute()));
    }

    #[test]
    fn test_lock_targets_skip_roots_inside_prefix() {
        let roots = InstallRoots::from_prefix("/opt/pour")
            .with_root("bin", "/usr/local/bin")
            .with_root("sbin", "/usr/local/bin/");

        assert_eq!(
            roots.lock_targets(),
            vec![Path::new("/opt/pour"), Path::new("/usr/local/bin")]
        );
    }
}
