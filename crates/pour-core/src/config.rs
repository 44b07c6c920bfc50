//! User configuration (`<home>/config.toml`).
//!
//! Every field is optional; command line flags override what is read here.
//!
//! ```toml
//! prefix = "/opt/pour"
//! dependency_installer = "brew install {name}"
//! wait_for_lock = true
//!
//! [roots]
//! bin = "/usr/local/bin"
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::roots::InstallRoots;

/// Errors that can occur when loading the configuration file.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The file exists but could not be read.
    #[error("failed to read {}: {source}", path.display())]
    Io {
        /// Config file path.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// The file is not valid configuration TOML.
    #[error("failed to parse {}: {source}", path.display())]
    Parse {
        /// Config file path.
        path: PathBuf,
        /// Underlying error.
        source: toml::de::Error,
    },
}

/// Persistent settings for the installer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Installation prefix; defaults to the pour home directory.
    pub prefix: Option<PathBuf>,
    /// Root overrides, name -> directory.
    pub roots: BTreeMap<String, PathBuf>,
    /// Shell command template run to install a missing dependency, `{name}` is substituted.
    pub dependency_installer: Option<String>,
    /// Block until a concurrent install on the same prefix finishes instead of failing.
    pub wait_for_lock: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            prefix: None,
            roots: BTreeMap::new(),
            dependency_installer: None,
            wait_for_lock: true,
        }
    }
}

impl Config {
    /// Load configuration from `path`.
    ///
    /// A missing file yields the default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Build the destination roots: conventional layout below the prefix,
    /// then the configured overrides.
    pub fn install_roots(&self, home: &Path) -> InstallRoots {
        let prefix = self.prefix.clone().unwrap_or_else(|| home.to_path_buf());
        let mut roots = InstallRoots::from_prefix(prefix);
        for (name, path) in &self.roots {
            roots.insert(name.clone(), path.clone());
        }
        roots
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_file_is_default() {
        let dir = tempdir().unwrap();
        let config = Config::load(&dir.path().join("config.toml")).unwrap();
        assert_eq!(config, Config::default());
        assert!(config.wait_for_lock);
    }

    #[test]
    fn test_load_with_overrides() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
prefix = "/opt/pour"
dependency_installer = "brew install {name}"

[roots]
bin = "/usr/local/bin"
"#,
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.dependency_installer.as_deref(), Some("brew install {name}"));

        let roots = config.install_roots(Path::new("/home/u/.pour"));
        assert_eq!(roots.prefix(), Path::new("/opt/pour"));
        assert_eq!(roots.get("bin"), Some(Path::new("/usr/local/bin")));
        assert_eq!(roots.get("lib"), Some(Path::new("/opt/pour/lib")));
    }

    #[test]
    fn test_prefix_defaults_to_home() {
        let roots = Config::default().install_roots(Path::new("/home/u/.pour"));
        assert_eq!(roots.get("bin"), Some(Path::new("/home/u/.pour/bin")));
    }

    #[test]
    fn test_unknown_key_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "colour = true\n").unwrap();
        assert!(matches!(Config::load(&path), Err(ConfigError::Parse { .. })));
    }
}
