//! Dependency resolution
//!
//! The installer never installs dependencies itself. It asks a
//! [`DependencyResolver`] whether a name is available and, if not, asks it to
//! make it available. Whether that is possible is up to the implementation.

use std::collections::BTreeSet;
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Command;
use std::sync::Mutex;

use thiserror::Error;
use tracing::{debug, info};

/// Why a dependency could not be made available.
#[derive(Error, Debug)]
pub enum ResolveError {
    /// The dependency is absent and this resolver cannot install anything.
    #[error("'{0}' is not installed and no dependency installer is configured")]
    NotInstallable(String),

    /// The name cannot be passed safely to an installer command.
    #[error("refusing to install dependency with unsafe name '{0}'")]
    UnsafeName(String),

    /// The installer command ran but reported failure.
    #[error("dependency installer `{command}` failed with {status}")]
    InstallerFailed {
        /// The command that was run.
        command: String,
        /// Exit status as reported by the OS.
        status: String,
    },

    /// The installer succeeded but the dependency is still not visible.
    #[error("'{0}' is still missing after running the dependency installer")]
    StillMissing(String),

    /// The installer command could not be started.
    #[error("failed to run dependency installer: {0}")]
    Io(#[from] std::io::Error),
}

/// Answers "is dependency X available?" and, if not, tries to make it so.
pub trait DependencyResolver: Send + Sync {
    /// Whether `name` is already available.
    fn exists(&self, name: &str) -> bool;

    /// Make `name` available or explain why it cannot be.
    ///
    /// # Errors
    ///
    /// Returns a [`ResolveError`] when the dependency stays unavailable.
    fn ensure(&self, name: &str) -> Result<(), ResolveError>;
}

/// A dependency exists when an executable of that name is on the search path.
///
/// Cannot install anything.
#[derive(Debug, Clone, Default)]
pub struct PathResolver {
    search_path: Option<OsString>,
}

impl PathResolver {
    /// Resolver over the process `PATH`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolver over an explicit search path (same syntax as `PATH`).
    pub fn with_search_path(search_path: impl Into<OsString>) -> Self {
        Self {
            search_path: Some(search_path.into()),
        }
    }

    fn locate(&self, name: &str) -> Option<PathBuf> {
        let found = match &self.search_path {
            Some(paths) => {
                let cwd = std::env::current_dir().unwrap_or_default();
                which::which_in(name, Some(paths), cwd)
            }
            None => which::which(name),
        };
        found.ok()
    }
}

impl DependencyResolver for PathResolver {
    fn exists(&self, name: &str) -> bool {
        let found = self.locate(name);
        debug!(dependency = name, path = ?found, "dependency lookup");
        found.is_some()
    }

    fn ensure(&self, name: &str) -> Result<(), ResolveError> {
        if self.exists(name) {
            Ok(())
        } else {
            Err(ResolveError::NotInstallable(name.to_string()))
        }
    }
}

/// Looks dependencies up like [`PathResolver`] and installs missing ones by
/// running a shell command template such as `brew install {name}`.
#[derive(Debug, Clone)]
pub struct CommandResolver {
    lookup: PathResolver,
    template: String,
}

impl CommandResolver {
    /// Wrap `lookup` with an installer command template.
    pub fn new(lookup: PathResolver, template: impl Into<String>) -> Self {
        Self {
            lookup,
            template: template.into(),
        }
    }

    /// The command that would be run for `name`.
    pub fn command_for(&self, name: &str) -> String {
        self.template.replace("{name}", name)
    }
}

fn is_safe_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '+' | '@'))
}

impl DependencyResolver for CommandResolver {
    fn exists(&self, name: &str) -> bool {
        self.lookup.exists(name)
    }

    fn ensure(&self, name: &str) -> Result<(), ResolveError> {
        if self.exists(name) {
            return Ok(());
        }
        if !is_safe_name(name) {
            return Err(ResolveError::UnsafeName(name.to_string()));
        }

        let command = self.command_for(name);
        info!(dependency = name, %command, "installing missing dependency");

        let status = Command::new("sh").arg("-c").arg(&command).status()?;
        if !status.success() {
            return Err(ResolveError::InstallerFailed {
                command,
                status: status.to_string(),
            });
        }

        if self.exists(name) {
            Ok(())
        } else {
            Err(ResolveError::StillMissing(name.to_string()))
        }
    }
}

/// Resolver over a fixed set of names.
///
/// Names in `installable` are moved into the available set when `ensure` is
/// called for them, which lets callers observe what would have been installed.
#[derive(Debug, Default)]
pub struct StaticResolver {
    available: Mutex<BTreeSet<String>>,
    installable: BTreeSet<String>,
    installed: Mutex<Vec<String>>,
}

impl StaticResolver {
    /// Resolver where exactly `available` exists and nothing can be installed.
    pub fn new<I, S>(available: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            available: Mutex::new(available.into_iter().map(Into::into).collect()),
            ..Self::default()
        }
    }

    /// Allow `names` to be installed on demand.
    pub fn with_installable<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.installable = names.into_iter().map(Into::into).collect();
        self
    }

    /// Names `ensure` installed, in call order.
    pub fn installed(&self) -> Vec<String> {
        self.installed
            .lock()
            .map(|v| v.clone())
            .unwrap_or_default()
    }
}

impl DependencyResolver for StaticResolver {
    fn exists(&self, name: &str) -> bool {
        self.available
            .lock()
            .is_ok_and(|available| available.contains(name))
    }

    fn ensure(&self, name: &str) -> Result<(), ResolveError> {
        if self.exists(name) {
            return Ok(());
        }
        if !self.installable.contains(name) {
            return Err(ResolveError::NotInstallable(name.to_string()));
        }
        if let Ok(mut available) = self.available.lock() {
            available.insert(name.to_string());
        }
        if let Ok(mut installed) = self.installed.lock() {
            installed.push(name.to_string());
        }
        Ok(())
    }
}
