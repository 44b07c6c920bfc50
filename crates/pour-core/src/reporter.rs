//! Reporter trait for dependency injection
//!
//! This trait allows the installer to report progress and status without
//! being coupled to a specific terminal implementation.

use pour_schema::{AppliedPatch, PackageName, PlacedFile};

/// The six install steps, in the only order they run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallStep {
    /// Checking or installing runtime dependencies.
    Dependencies,
    /// Downloading the source archive.
    Fetch,
    /// Comparing the archive digest with the descriptor.
    Verify,
    /// Unpacking into the scratch area.
    Extract,
    /// Copying files into destination roots.
    Place,
    /// Rewriting installed files.
    Patch,
}

impl std::fmt::Display for InstallStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Dependencies => "dependencies",
            Self::Fetch => "fetch",
            Self::Verify => "verify",
            Self::Extract => "extract",
            Self::Place => "place",
            Self::Patch => "patch",
        };
        f.write_str(s)
    }
}

pub trait Reporter: Send + Sync {
    /// A step of the install pipeline has started.
    fn step(&self, name: &PackageName, step: InstallStep);

    /// A dependency was checked; `present` is false when it had to be installed.
    fn dependency(&self, name: &str, present: bool);

    /// Updates the progress of a download.
    fn downloading(&self, name: &PackageName, current: u64, total: Option<u64>);

    /// A file was copied into a destination root.
    fn placed(&self, file: &PlacedFile);

    /// A patch rule rewrote an installed file.
    fn patched(&self, patch: &AppliedPatch);

    /// Marks the install as successfully completed.
    fn done(&self, name: &PackageName, version: Option<&str>, detail: &str);

    /// Marks the install as failed with a specific reason.
    fn failed(&self, name: &PackageName, reason: &str);

    /// Log an informational message.
    fn info(&self, msg: &str);

    /// Log a warning message.
    fn warning(&self, msg: &str);
}

impl<T: Reporter + ?Sized> Reporter for std::sync::Arc<T> {
    fn step(&self, name: &PackageName, step: InstallStep) {
        (**self).step(name, step);
    }
    fn dependency(&self, name: &str, present: bool) {
        (**self).dependency(name, present);
    }
    fn downloading(&self, name: &PackageName, current: u64, total: Option<u64>) {
        (**self).downloading(name, current, total);
    }
    fn placed(&self, file: &PlacedFile) {
        (**self).placed(file);
    }
    fn patched(&self, patch: &AppliedPatch) {
        (**self).patched(patch);
    }
    fn done(&self, name: &PackageName, version: Option<&str>, detail: &str) {
        (**self).done(name, version, detail);
    }
    fn failed(&self, name: &PackageName, reason: &str) {
        (**self).failed(name, reason);
    }
    fn info(&self, msg: &str) {
        (**self).info(msg);
    }
    fn warning(&self, msg: &str) {
        (**self).warning(msg);
    }
}

/// A no-op reporter for silent operations (e.g., testing).
#[derive(Debug, Clone, Copy)]
pub struct NullReporter;

impl Reporter for NullReporter {
    fn step(&self, _: &PackageName, _: InstallStep) {}
    fn dependency(&self, _: &str, _: bool) {}
    fn downloading(&self, _: &PackageName, _: u64, _: Option<u64>) {}
    fn placed(&self, _: &PlacedFile) {}
    fn patched(&self, _: &AppliedPatch) {}
    fn done(&self, _: &PackageName, _: Option<&str>, _: &str) {}
    fn failed(&self, _: &PackageName, _: &str) {}
    fn info(&self, _: &str) {}
    fn warning(&self, _: &str) {}
}
