//! pour core: executes a package descriptor against a set of destination roots.
//!
//! The pipeline is strictly sequential:
//! dependency check -> fetch -> verify -> extract -> place -> patch.
//! Each step fails fast; nothing is rolled back, but every error raised after
//! placement started carries the partial [`InstallReceipt`](pour_schema::InstallReceipt).

pub mod config;
pub mod error;
pub mod installer;
pub mod io;
pub mod lock;
pub mod patch;
pub mod paths;
pub mod place;
pub mod reporter;
pub mod resolver;
pub mod roots;

pub use config::Config;
pub use error::{ErrorKind, InstallError};
pub use installer::Installer;
pub use paths::*;
pub use reporter::{InstallStep, NullReporter, Reporter};
pub use resolver::{CommandResolver, DependencyResolver, PathResolver, StaticResolver};
pub use roots::InstallRoots;

/// User Agent string for core operations
pub const USER_AGENT: &str = concat!("pour/", env!("CARGO_PKG_VERSION"));
