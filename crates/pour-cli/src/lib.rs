//! pour - install a package descriptor into a prefix
#![allow(missing_docs)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::doc_markdown)]
//!
//! The binary is a thin layer over `pour-core`: it loads configuration,
//! builds the destination roots, runs the installer with a console reporter,
//! and persists the receipt the installer hands back.
//!
//! # Directory Layout
//!
//! ```text
//! ~/.pour/
//! ├── config.toml   # prefix, root overrides, dependency installer
//! ├── locks/        # one advisory lock per installation prefix
//! ├── receipts/     # <package>.json, one per install
//! └── tmp/          # per-run scratch directories
//! ```

pub mod cmd;
pub mod ui;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use pour_core::config::ConfigError;
use pour_core::{ErrorKind, InstallError};
use pour_schema::DescriptorError;

#[derive(Debug, Parser)]
#[command(name = "pour")]
#[command(author, version, about = "pour - install a package descriptor into a prefix")]
pub struct Cli {
    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Install a package from a descriptor file
    Install(InstallArgs),
    /// Remove the files recorded in an install receipt
    Uninstall {
        /// Receipt written by `pour install`
        receipt: PathBuf,
        /// Also remove files modified since installation
        #[arg(long, short = 'f')]
        force: bool,
        /// Show what would be removed without removing anything
        #[arg(long)]
        dry_run: bool,
    },
    /// Validate a descriptor and show where its files would go
    Check {
        /// Path to the descriptor
        descriptor: PathBuf,
        /// Installation prefix to resolve destinations against
        #[arg(long, env = "POUR_PREFIX")]
        prefix: Option<PathBuf>,
    },
    /// Print the checksum of files (for descriptor authoring)
    Hash {
        /// Files to hash
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Use BLAKE3 instead of SHA-256
        #[arg(long)]
        blake3: bool,
    },
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: clap_complete::Shell,
    },
}

#[derive(Debug, Args)]
pub struct InstallArgs {
    /// Path to the descriptor
    pub descriptor: PathBuf,

    /// Installation prefix [default: $POUR_HOME]
    #[arg(long, env = "POUR_PREFIX")]
    pub prefix: Option<PathBuf>,

    /// Override a destination root, e.g. `--root bin=/usr/local/bin`
    #[arg(long = "root", value_name = "NAME=PATH", value_parser = parse_root)]
    pub roots: Vec<(String, PathBuf)>,

    /// Where to write the receipt [default: $POUR_HOME/receipts/<name>.json]
    #[arg(long)]
    pub receipt: Option<PathBuf>,

    /// Command run to install a missing dependency; `{name}` is replaced
    #[arg(long, env = "POUR_DEPENDENCY_INSTALLER")]
    pub dependency_installer: Option<String>,

    /// Do not check runtime dependencies
    #[arg(long)]
    pub skip_dependencies: bool,

    /// Fail instead of waiting when another install holds the prefix
    #[arg(long)]
    pub no_wait: bool,
}

fn parse_root(s: &str) -> Result<(String, PathBuf), String> {
    let (name, path) = s
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=PATH, got '{s}'"))?;
    if name.is_empty() || path.is_empty() {
        return Err(format!("expected NAME=PATH, got '{s}'"));
    }
    Ok((name.to_string(), PathBuf::from(path)))
}

/// Process exit code for a failed command.
pub fn exit_code(err: &anyhow::Error) -> u8 {
    for cause in err.chain() {
        if let Some(install) = cause.downcast_ref::<InstallError>() {
            return match install.kind() {
                ErrorKind::MissingDependency => 10,
                ErrorKind::Fetch => 11,
                ErrorKind::ChecksumMismatch => 12,
                ErrorKind::Extract => 13,
                ErrorKind::Placement => 14,
                ErrorKind::PatchTargetMissing => 15,
                ErrorKind::Patch => 16,
                ErrorKind::Locked => 17,
                ErrorKind::Cancelled => 130,
            };
        }
        if cause.is::<DescriptorError>() || cause.is::<ConfigError>() {
            return 2;
        }
    }
    1
}
