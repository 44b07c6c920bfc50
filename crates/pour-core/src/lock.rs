//! Exclusive advisory locks on installation prefixes and destination roots.
//!
//! Lock files live in the state directory, keyed by a hash of the directory,
//! so taking a lock never writes into the destination roots. Each lock is held
//! by an open file handle and released when [`PrefixLock`] is dropped.
//!
//! The key is the absolute path with its existing part resolved through
//! symlinks, so `/opt/pour`, `/opt/pour/` and a symlink to it share one lock.

use std::fs::{self, File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use fs4::FileExt;
use thiserror::Error;
use tracing::debug;

use crate::roots::{InstallRoots, normalize_path};

#[derive(Error, Debug)]
pub enum LockError {
    #[error("another install is running against {} (lock {})", prefix.display(), lock_path.display())]
    Contended { prefix: PathBuf, lock_path: PathBuf },

    #[error("failed to lock {}: {source}", lock_path.display())]
    Io {
        lock_path: PathBuf,
        source: std::io::Error,
    },
}

/// Held exclusive lock on an installation prefix.
#[derive(Debug)]
pub struct PrefixLock {
    _file: File,
    path: PathBuf,
}

impl PrefixLock {
    /// Lock file used for `prefix`.
    pub fn lock_path(locks_dir: &Path, prefix: &Path) -> PathBuf {
        let key = lock_key(prefix);
        let digest = blake3::hash(key.as_os_str().as_encoded_bytes());
        locks_dir.join(format!("{}.lock", &digest.to_hex()[..16]))
    }

    /// Take the lock, blocking until it is free when `wait` is set.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::Contended`] if `wait` is false and another process
    /// holds the lock, or [`LockError::Io`] if the lock file cannot be opened.
    pub fn acquire(locks_dir: &Path, prefix: &Path, wait: bool) -> Result<Self, LockError> {
        let path = Self::lock_path(locks_dir, prefix);
        let io_err = |source| LockError::Io {
            lock_path: path.clone(),
            source,
        };

        fs::create_dir_all(locks_dir).map_err(io_err)?;
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(io_err)?;

        if wait {
            file.lock_exclusive().map_err(io_err)?;
        } else {
            match file.try_lock_exclusive() {
                Ok(()) => {}
                Err(err) if err.kind() == ErrorKind::WouldBlock => {
                    return Err(LockError::Contended {
                        prefix: prefix.to_path_buf(),
                        lock_path: path,
                    });
                }
                Err(err) => return Err(io_err(err)),
            }
        }

        debug!(prefix = %prefix.display(), lock = %path.display(), "acquired prefix lock");
        Ok(Self { _file: file, path })
    }

    /// Path of the held lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Canonical spelling of `dir` for lock keys.
///
/// The deepest existing ancestor is canonicalized and the not-yet-created
/// remainder appended, so the key is stable before and after the first install.
fn lock_key(dir: &Path) -> PathBuf {
    let absolute = normalize_path(dir);
    for ancestor in absolute.ancestors() {
        if let Ok(real) = ancestor.canonicalize() {
            return match absolute.strip_prefix(ancestor) {
                Ok(rest) if !rest.as_os_str().is_empty() => real.join(rest),
                _ => real,
            };
        }
    }
    absolute
}

/// Every lock one install run holds: its prefix plus each destination root
/// outside the prefix.
#[derive(Debug)]
pub struct InstallLock {
    held: Vec<PrefixLock>,
}

impl InstallLock {
    /// Lock every directory in [`InstallRoots::lock_targets`].
    ///
    /// Locks are taken in lock-file order, so two runs sharing any directory
    /// always contend on the same first shared lock instead of deadlocking.
    /// Directories that resolve to the same lock file are locked once.
    ///
    /// # Errors
    ///
    /// As [`PrefixLock::acquire`]; locks already taken are released.
    pub fn acquire(locks_dir: &Path, roots: &InstallRoots, wait: bool) -> Result<Self, LockError> {
        let mut targets: Vec<(PathBuf, &Path)> = roots
            .lock_targets()
            .into_iter()
            .map(|dir| (PrefixLock::lock_path(locks_dir, dir), dir))
            .collect();
        targets.sort_by(|a, b| a.0.cmp(&b.0));
        targets.dedup_by(|a, b| a.0 == b.0);

        let mut held = Vec::with_capacity(targets.len());
        for (_, dir) in targets {
            held.push(PrefixLock::acquire(locks_dir, dir, wait)?);
        }
        Ok(Self { held })
    }

    /// Paths of the held lock files, in acquisition order.
    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.held.iter().map(PrefixLock::path)
    }
}
