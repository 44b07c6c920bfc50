//! The install pipeline.
//!
//! [`Installer::install`] runs one descriptor against one set of destination
//! roots: dependency check, fetch, verify, extract, place, patch. The run
//! holds exclusive locks on the installation prefix, and on every root outside
//! it, from start to finish.
//!
//! Nothing is written to a destination root before the archive digest has
//! been verified and every install rule has been resolved against the
//! extracted tree. Failures after that point are not rolled back; the error
//! carries the partial receipt instead.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::error::InstallError;
use crate::io::download::{FetchRequest, Fetcher};
use crate::io::extract::{self, ExtractError};
use crate::lock::{InstallLock, LockError, PrefixLock};
use crate::patch::{self, PatchError};
use crate::place;
use crate::reporter::{InstallStep, NullReporter, Reporter};
use crate::resolver::DependencyResolver;
use crate::roots::InstallRoots;
use crate::{filename_from_url, locks_dir, tmp_path, try_pour_home};
use pour_schema::{
    Blake3Hash, InstallReceipt, PackageDescriptor, PatchRule, ReceiptStatus, Source,
};

/// Runs install pipelines. Cheap to clone; clones share their collaborators.
#[derive(Clone)]
pub struct Installer {
    resolver: Arc<dyn DependencyResolver>,
    fetcher: Arc<dyn Fetcher>,
    reporter: Arc<dyn Reporter>,
    locks_dir: PathBuf,
    scratch_dir: Option<PathBuf>,
    wait_for_lock: bool,
    check_dependencies: bool,
    cancel: CancellationToken,
}

impl std::fmt::Debug for Installer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Installer")
            .field("locks_dir", &self.locks_dir)
            .field("scratch_dir", &self.scratch_dir)
            .field("wait_for_lock", &self.wait_for_lock)
            .field("check_dependencies", &self.check_dependencies)
            .finish_non_exhaustive()
    }
}

impl Installer {
    /// Installer with a silent reporter, locks under `$POUR_HOME/locks`
    /// and scratch space in the system temp directory.
    pub fn new(resolver: Arc<dyn DependencyResolver>, fetcher: Arc<dyn Fetcher>) -> Self {
        let locks_dir = try_pour_home().map_or_else(
            || std::env::temp_dir().join("pour-locks"),
            |home| locks_dir(&home),
        );
        Self {
            resolver,
            fetcher,
            reporter: Arc::new(NullReporter),
            locks_dir,
            scratch_dir: None,
            wait_for_lock: true,
            check_dependencies: true,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn Reporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Directory holding per-prefix lock files. Must not be inside a destination root.
    pub fn with_locks_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.locks_dir = dir.into();
        self
    }

    /// Directory under which per-run scratch directories are created.
    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = Some(dir.into());
        self
    }

    /// Use the state directory layout of `home` for locks and scratch space.
    pub fn with_home(self, home: &Path) -> Self {
        self.with_locks_dir(locks_dir(home))
            .with_scratch_dir(tmp_path(home))
    }

    /// Block until a contended prefix lock is released (the default), or fail immediately.
    pub fn wait_for_lock(mut self, wait: bool) -> Self {
        self.wait_for_lock = wait;
        self
    }

    /// Stop between steps once `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Skip the dependency step entirely.
    pub fn skip_dependency_check(mut self, skip: bool) -> Self {
        self.check_dependencies = !skip;
        self
    }

    /// Install `descriptor` into `roots`.
    ///
    /// # Errors
    ///
    /// Returns the first failing step's error. Errors raised once placement
    /// has started carry the partial receipt.
    #[instrument(skip_all, fields(package = %descriptor.name()))]
    pub async fn install(
        &self,
        descriptor: &PackageDescriptor,
        roots: &InstallRoots,
    ) -> Result<InstallReceipt, InstallError> {
        let started = Instant::now();
        let name = descriptor.name();
        let source = descriptor.source();
        let receipt = InstallReceipt::new(
            name.clone(),
            descriptor.version().map(str::to_string),
            source.url.clone(),
            source.checksum.clone(),
        );

        let _lock = self.lock(roots).await?;
        self.checkpoint()?;

        if self.check_dependencies {
            self.reporter.step(name, InstallStep::Dependencies);
            self.ensure_dependencies(descriptor).await?;
        } else {
            debug!("dependency check skipped");
        }
        self.checkpoint()?;

        self.reporter.step(name, InstallStep::Fetch);
        let bytes = self.fetch(descriptor).await?;
        self.checkpoint()?;

        self.reporter.step(name, InstallStep::Verify);
        verify(source, &bytes)?;
        self.checkpoint()?;

        self.reporter.step(name, InstallStep::Extract);
        let scratch = self.scratch()?;
        let tree = unpack(source, bytes, scratch.path()).await?;
        self.checkpoint()?;

        self.reporter.step(name, InstallStep::Place);
        let mut receipt = self.place(descriptor, roots, tree, receipt).await?;
        drop(scratch);

        if self.cancel.is_cancelled() {
            receipt.status = ReceiptStatus::Unpatched;
            receipt.unapplied_patches = descriptor.patch_rules().to_vec();
            warn!("cancelled after placement; patches not applied");
            return Err(InstallError::Cancelled {
                receipt: Some(Box::new(receipt)),
            });
        }

        if !descriptor.patch_rules().is_empty() {
            self.reporter.step(name, InstallStep::Patch);
            receipt = self.patch(descriptor, roots, receipt).await?;
        }

        info!(
            files = receipt.files.len(),
            patches = receipt.patches.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "installed"
        );
        self.reporter.done(
            name,
            descriptor.version(),
            &format!("{} files", receipt.files.len()),
        );
        Ok(receipt)
    }

    fn checkpoint(&self) -> Result<(), InstallError> {
        if self.cancel.is_cancelled() {
            debug!("cancelled before placement");
            return Err(InstallError::Cancelled { receipt: None });
        }
        Ok(())
    }

    async fn lock(&self, roots: &InstallRoots) -> Result<InstallLock, InstallError> {
        let locks_dir = self.locks_dir.clone();
        let roots_for_task = roots.clone();
        let wait = self.wait_for_lock;
        let lock_path = PrefixLock::lock_path(&locks_dir, roots.prefix());

        let acquire = tokio::task::spawn_blocking(move || {
            InstallLock::acquire(&locks_dir, &roots_for_task, wait)
        });

        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(InstallError::Cancelled { receipt: None }),
            joined = acquire => {
                let lock = joined.map_err(|e| LockError::Io {
                    lock_path,
                    source: std::io::Error::other(e),
                })??;
                debug!(locks = lock.paths().count(), "install roots locked");
                Ok(lock)
            }
        }
    }

    async fn ensure_dependencies(&self, descriptor: &PackageDescriptor) -> Result<(), InstallError> {
        for dep in descriptor.dependencies() {
            if self.resolver.exists(dep) {
                debug!(dependency = %dep, "present");
                self.reporter.dependency(dep, true);
                continue;
            }

            info!(dependency = %dep, "missing, asking resolver to install");
            let resolver = Arc::clone(&self.resolver);
            let name = dep.clone();
            let ensured = tokio::task::spawn_blocking(move || resolver.ensure(&name))
                .await
                .map_err(|e| crate::resolver::ResolveError::Io(std::io::Error::other(e)))
                .and_then(|r| r);

            match ensured {
                Ok(()) => self.reporter.dependency(dep, false),
                Err(source) => {
                    self.reporter.failed(descriptor.name(), &source.to_string());
                    return Err(InstallError::MissingDependency {
                        name: dep.clone(),
                        source,
                    });
                }
            }
        }
        Ok(())
    }

    async fn fetch(&self, descriptor: &PackageDescriptor) -> Result<Bytes, InstallError> {
        let url = &descriptor.source().url;
        let req = FetchRequest {
            url,
            pkg_name: descriptor.name(),
            reporter: self.reporter.as_ref(),
        };

        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(InstallError::Cancelled { receipt: None }),
            fetched = self.fetcher.fetch(req) => fetched.map_err(|source| InstallError::Fetch {
                url: url.clone(),
                source,
            }),
        }
    }

    fn scratch(&self) -> Result<TempDir, InstallError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("pour-");
        let created = match &self.scratch_dir {
            Some(dir) => std::fs::create_dir_all(dir).and_then(|()| builder.tempdir_in(dir)),
            None => builder.tempdir(),
        };
        created.map_err(|e| InstallError::Extract {
            archive: self.scratch_dir.clone().unwrap_or_else(std::env::temp_dir),
            source: ExtractError::Io(e),
        })
    }

    async fn place(
        &self,
        descriptor: &PackageDescriptor,
        roots: &InstallRoots,
        tree: PathBuf,
        mut receipt: InstallReceipt,
    ) -> Result<InstallReceipt, InstallError> {
        let rules = descriptor.install_rules().to_vec();
        let roots = roots.clone();
        let reporter = Arc::clone(&self.reporter);

        let joined = tokio::task::spawn_blocking(move || {
            let result = place::plan(&rules, &tree, &roots)
                .and_then(|planned| place::place(&planned, &mut receipt, reporter.as_ref()));
            (receipt, result)
        })
        .await;

        let (receipt, result) = match joined {
            Ok(pair) => pair,
            Err(e) => std::panic::resume_unwind(e.into_panic()),
        };

        match result {
            Ok(()) => Ok(receipt),
            Err(source) => {
                self.reporter.failed(descriptor.name(), &source.to_string());
                Err(InstallError::Placement {
                    source,
                    receipt: Box::new(receipt),
                })
            }
        }
    }

    async fn patch(
        &self,
        descriptor: &PackageDescriptor,
        roots: &InstallRoots,
        mut receipt: InstallReceipt,
    ) -> Result<InstallReceipt, InstallError> {
        let rules = descriptor.patch_rules().to_vec();
        let roots = roots.clone();
        let reporter = Arc::clone(&self.reporter);

        let joined = tokio::task::spawn_blocking(move || {
            let result = apply_patches(&rules, &roots, &mut receipt, reporter.as_ref());
            (receipt, result)
        })
        .await;

        let (receipt, result) = match joined {
            Ok(pair) => pair,
            Err(e) => std::panic::resume_unwind(e.into_panic()),
        };

        let Err(err) = result else {
            return Ok(receipt);
        };
        self.reporter.failed(descriptor.name(), &err.to_string());
        let receipt = Box::new(receipt);
        Err(match err {
            PatchError::TargetMissing { file, search } => InstallError::PatchTargetMissing {
                file,
                search,
                receipt,
            },
            PatchError::Io { file, source } => InstallError::Patch {
                file,
                source,
                receipt,
            },
            PatchError::UnknownRoot(root) => InstallError::Patch {
                file: PathBuf::from(&root),
                source: std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("destination root '{root}' is not configured"),
                ),
                receipt,
            },
        })
    }
}

/// Compare the fetched bytes against the pinned digest.
fn verify(source: &Source, bytes: &[u8]) -> Result<(), InstallError> {
    let mut hasher = source.checksum.algorithm().hasher();
    hasher.update(bytes);
    let actual = hasher.finalize_hex();

    if !source.checksum.matches(&actual) {
        return Err(InstallError::ChecksumMismatch {
            url: source.url.clone(),
            algorithm: source.checksum.algorithm(),
            expected: source.checksum.digest().to_string(),
            actual,
        });
    }
    debug!(checksum = %source.checksum, "verified");
    Ok(())
}

/// Write the archive into `scratch` and unpack it next to it.
///
/// Returns the directory holding the extracted tree.
async fn unpack(source: &Source, bytes: Bytes, scratch: &Path) -> Result<PathBuf, InstallError> {
    let file_name = match filename_from_url(&source.url) {
        "" => "download".to_string(),
        name => name.to_string(),
    };
    let archive = scratch.join("archive").join(&file_name);
    let tree = scratch.join("tree");
    let format = source.format;
    let strip = source.strip_components;

    let archive_for_task = archive.clone();
    let tree_for_task = tree.clone();
    let joined = tokio::task::spawn_blocking(move || -> Result<(), ExtractError> {
        if let Some(dir) = archive_for_task.parent() {
            std::fs::create_dir_all(dir)?;
        }
        std::fs::create_dir_all(&tree_for_task)?;
        std::fs::write(&archive_for_task, &bytes)?;

        let files = extract::extract(&archive_for_task, format, &tree_for_task, &file_name)?;
        debug!(entries = files.len(), %format, "extracted");
        if strip && extract::strip_components(&tree_for_task)? {
            debug!("stripped top-level directory");
        }
        Ok(())
    })
    .await;

    joined
        .map_err(|e| ExtractError::Io(std::io::Error::other(e)))
        .and_then(|r| r)
        .map_err(|source| InstallError::Extract { archive, source })?;
    Ok(tree)
}

/// Apply patch rules in order, updating `receipt` as each one lands.
///
/// Stops at the first failure, marking the receipt as patch-failed and
/// listing the rules that were not applied.
fn apply_patches(
    rules: &[PatchRule],
    roots: &InstallRoots,
    receipt: &mut InstallReceipt,
    reporter: &dyn Reporter,
) -> Result<(), PatchError> {
    for (i, rule) in rules.iter().enumerate() {
        let landed = patch::apply_patch(rule, roots).and_then(|applied| {
            if let Some(file) = receipt.file_mut(&applied.file) {
                file.blake3 =
                    Blake3Hash::compute_file(&applied.file).map_err(|source| PatchError::Io {
                        file: applied.file.clone(),
                        source,
                    })?;
            }
            Ok(applied)
        });
        let applied = match landed {
            Ok(applied) => applied,
            Err(err) => {
                receipt.status = ReceiptStatus::PatchFailed;
                receipt.unapplied_patches = rules[i..].to_vec();
                return Err(err);
            }
        };

        debug!(file = %applied.file.display(), occurrences = applied.occurrences, "patched");
        reporter.patched(&applied);
        receipt.patches.push(applied);
    }
    Ok(())
}
