//! Placement of extracted files into destination roots.
//!
//! Placement runs in two passes. [`plan`] resolves every install rule against
//! the scratch directory and the destination roots without writing anything,
//! so a descriptor naming a file the archive lacks fails before the first copy.
//! [`place`] then copies each planned file through a temporary sibling and a
//! rename, recording every file and created directory in the receipt.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;
use walkdir::WalkDir;

use crate::patch::write_atomic;
use crate::reporter::Reporter;
use crate::roots::InstallRoots;
use pour_schema::{Blake3Hash, InstallReceipt, InstallRule, PlacedFile};

#[derive(Error, Debug)]
pub enum PlacementError {
    #[error("destination root '{root}' is not configured")]
    UnknownRoot { root: String },

    #[error("destination root '{root}' is not an absolute path: {}", path.display())]
    RelativeRoot { root: String, path: PathBuf },

    #[error("'{entry}' not found in archive (archive contains: {})", available.join(", "))]
    MissingSource {
        entry: String,
        available: Vec<String>,
    },

    #[error("'{entry}' in archive is not a regular file")]
    NotAFile { entry: String },

    #[error("'{entry}' resolves outside the extracted archive")]
    OutsideArchive { entry: String },

    #[error("{} resolves outside its destination root", path.display())]
    OutsideRoot { path: PathBuf },

    #[error("failed to place {}: {source}", path.display())]
    Io { path: PathBuf, source: io::Error },
}

fn io_error(path: &Path) -> impl FnOnce(io::Error) -> PlacementError + '_ {
    move |source| PlacementError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// A resolved install rule.
#[derive(Debug, Clone)]
pub struct PlannedFile {
    /// Archive-relative source, as written in the descriptor.
    pub entry: String,
    /// Root name.
    pub root: String,
    /// Root directory.
    pub root_dir: PathBuf,
    /// Absolute path in the scratch directory.
    pub source: PathBuf,
    /// Absolute destination path.
    pub destination: PathBuf,
}

/// Files in the extracted tree, relative to `scratch`, sorted.
fn archive_listing(scratch: &Path) -> Vec<String> {
    let mut files: Vec<String> = WalkDir::new(scratch)
        .min_depth(1)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| !e.file_type().is_dir())
        .filter_map(|e| {
            e.path()
                .strip_prefix(scratch)
                .ok()
                .map(|p| p.to_string_lossy().into_owned())
        })
        .collect();
    files.sort();
    files
}

/// Deepest existing ancestor of `path` (including `path` itself).
fn existing_ancestor(path: &Path) -> Option<&Path> {
    path.ancestors().find(|p| p.exists())
}

/// Resolve `rules` against the extracted tree in `scratch`.
///
/// # Errors
///
/// Fails on the first rule whose root is unknown or relative, whose source is missing or
/// not a regular file, or whose paths escape the scratch directory or root.
pub fn plan(
    rules: &[InstallRule],
    scratch: &Path,
    roots: &InstallRoots,
) -> Result<Vec<PlannedFile>, PlacementError> {
    let scratch_real = scratch.canonicalize().map_err(io_error(scratch))?;
    let mut planned = Vec::with_capacity(rules.len());

    for rule in rules {
        let root_dir = roots
            .get(&rule.root)
            .ok_or_else(|| PlacementError::UnknownRoot {
                root: rule.root.clone(),
            })?;
        if !root_dir.is_absolute() {
            return Err(PlacementError::RelativeRoot {
                root: rule.root.clone(),
                path: root_dir.to_path_buf(),
            });
        }

        let source = scratch.join(&rule.source);
        let meta = match fs::metadata(&source) {
            Ok(meta) => meta,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(PlacementError::MissingSource {
                    entry: rule.source.clone(),
                    available: archive_listing(scratch),
                });
            }
            Err(e) => return Err(io_error(&source)(e)),
        };
        if !meta.is_file() {
            return Err(PlacementError::NotAFile {
                entry: rule.source.clone(),
            });
        }

        // Symlinks inside the archive may point anywhere.
        let source_real = source.canonicalize().map_err(io_error(&source))?;
        if !source_real.starts_with(&scratch_real) {
            return Err(PlacementError::OutsideArchive {
                entry: rule.source.clone(),
            });
        }

        let destination = root_dir.join(rule.destination());
        if let Some(anchor) = existing_ancestor(&destination) {
            if anchor.starts_with(root_dir) {
                let root_real = root_dir.canonicalize().map_err(io_error(root_dir))?;
                let anchor_real = anchor.canonicalize().map_err(io_error(anchor))?;
                if !anchor_real.starts_with(&root_real) {
                    return Err(PlacementError::OutsideRoot { path: destination });
                }
            }
        }

        planned.push(PlannedFile {
            entry: rule.source.clone(),
            root: rule.root.clone(),
            root_dir: root_dir.to_path_buf(),
            source,
            destination,
        });
    }

    Ok(planned)
}

/// Create the parent directory of `path`, recording every directory that did
/// not exist yet, outermost first.
fn create_parents(path: &Path, receipt: &mut InstallReceipt) -> Result<(), PlacementError> {
    let Some(parent) = path.parent() else {
        return Ok(());
    };
    let missing: Vec<PathBuf> = parent
        .ancestors()
        .take_while(|p| !p.as_os_str().is_empty() && !p.exists())
        .map(Path::to_path_buf)
        .collect();
    if missing.is_empty() {
        return Ok(());
    }

    fs::create_dir_all(parent).map_err(io_error(parent))?;
    for dir in missing.into_iter().rev() {
        if !receipt.created_dirs.contains(&dir) {
            receipt.created_dirs.push(dir);
        }
    }
    Ok(())
}

#[cfg(unix)]
fn is_executable(meta: &fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn is_executable(_meta: &fs::Metadata) -> bool {
    false
}

/// Copy one planned file into place.
fn copy_file(file: &PlannedFile) -> Result<bool, PlacementError> {
    let meta = fs::metadata(&file.source).map_err(io_error(&file.source))?;
    let permissions = meta.permissions();

    write_atomic(&file.destination, |out| {
        let mut input = File::open(&file.source)?;
        io::copy(&mut input, out)?;
        out.set_permissions(permissions)
    })
    .map_err(io_error(&file.destination))?;

    Ok(is_executable(&meta))
}

/// Copy every planned file, appending to `receipt` as it goes.
///
/// Existing destination files are replaced. On error the receipt lists
/// exactly the files placed before the failure.
///
/// # Errors
///
/// Returns the first I/O failure.
pub fn place(
    plan: &[PlannedFile],
    receipt: &mut InstallReceipt,
    reporter: &dyn Reporter,
) -> Result<(), PlacementError> {
    for file in plan {
        create_parents(&file.destination, receipt)?;
        let executable = copy_file(file)?;
        let blake3 =
            Blake3Hash::compute_file(&file.destination).map_err(io_error(&file.destination))?;

        debug!(
            source = %file.source.display(),
            destination = %file.destination.display(),
            "placed"
        );

        let placed = PlacedFile {
            source: file.entry.clone(),
            root: file.root.clone(),
            destination: file.destination.clone(),
            executable,
            blake3,
        };
        reporter.placed(&placed);
        receipt.files.push(placed);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reporter::NullReporter;
    use pour_schema::{Checksum, ChecksumAlgorithm, PackageName};
    use tempfile::tempdir;

    fn rule(source: &str, root: &str, into: Option<&str>) -> InstallRule {
        InstallRule {
            source: source.into(),
            root: root.into(),
            into: into.map(Into::into),
            rename: None,
        }
    }

    fn receipt() -> InstallReceipt {
        InstallReceipt::new(
            PackageName::new("v2g").unwrap(),
            None,
            "file:///v2g.tar.gz",
            Checksum::compute(ChecksumAlgorithm::Sha256, b""),
        )
    }

    fn scratch_with_v2g() -> tempfile::TempDir {
        let scratch = tempdir().unwrap();
        fs::create_dir_all(scratch.path().join("bin")).unwrap();
        fs::create_dir_all(scratch.path().join("lib")).unwrap();
        fs::write(scratch.path().join("bin/v2g"), "#!/bin/sh\n").unwrap();
        fs::write(scratch.path().join("lib/v2g.sh"), "echo v2g\n").unwrap();
        scratch
    }

    #[test]
    fn test_places_files_and_records_created_dirs() {
        let scratch = scratch_with_v2g();
        let prefix = tempdir().unwrap();
        let roots = InstallRoots::from_prefix(prefix.path());
        let rules = [
            rule("lib/v2g.sh", "lib", Some("v2g")),
            rule("bin/v2g", "bin", None),
        ];

        let planned = plan(&rules, scratch.path(), &roots).unwrap();
        let mut r = receipt();
        place(&planned, &mut r, &NullReporter).unwrap();

        let lib = prefix.path().join("lib");
        assert_eq!(
            fs::read_to_string(lib.join("v2g/v2g.sh")).unwrap(),
            "echo v2g\n"
        );
        assert!(prefix.path().join("bin/v2g").is_file());
        assert_eq!(r.files.len(), 2);
        assert_eq!(r.files[0].source, "lib/v2g.sh");
        assert_eq!(
            r.created_dirs,
            vec![lib.clone(), lib.join("v2g"), prefix.path().join("bin")]
        );
    }

    #[test]
    fn test_missing_source_fails_before_writing() {
        let scratch = scratch_with_v2g();
        let prefix = tempdir().unwrap();
        let roots = InstallRoots::from_prefix(prefix.path());
        let rules = [rule("bin/v2g", "bin", None), rule("bin/nope", "bin", None)];

        let err = plan(&rules, scratch.path(), &roots).unwrap_err();
        match err {
            PlacementError::MissingSource { entry, available } => {
                assert_eq!(entry, "bin/nope");
                assert!(available.contains(&"bin/v2g".to_string()));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!prefix.path().join("bin").exists());
    }

    #[test]
    fn test_unknown_root() {
        let scratch = scratch_with_v2g();
        let roots = InstallRoots::new("/nonexistent");
        let err = plan(&[rule("bin/v2g", "bin", None)], scratch.path(), &roots).unwrap_err();
        assert!(matches!(err, PlacementError::UnknownRoot { .. }));
    }

    #[test]
    fn test_directory_source_rejected() {
        let scratch = scratch_with_v2g();
        let prefix = tempdir().unwrap();
        let roots = InstallRoots::from_prefix(prefix.path());
        let err = plan(&[rule("lib", "lib", None)], scratch.path(), &roots).unwrap_err();
        assert!(matches!(err, PlacementError::NotAFile { .. }));
    }

    #[test]
    fn test_existing_file_is_replaced() {
        let scratch = scratch_with_v2g();
        let prefix = tempdir().unwrap();
        fs::create_dir_all(prefix.path().join("bin")).unwrap();
        fs::write(prefix.path().join("bin/v2g"), "old").unwrap();
        let roots = InstallRoots::from_prefix(prefix.path());

        let planned = plan(&[rule("bin/v2g", "bin", None)], scratch.path(), &roots).unwrap();
        let mut r = receipt();
        place(&planned, &mut r, &NullReporter).unwrap();

        assert_eq!(
            fs::read_to_string(prefix.path().join("bin/v2g")).unwrap(),
            "#!/bin/sh\n"
        );
        assert!(r.created_dirs.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_escaping_archive_rejected() {
        let scratch = scratch_with_v2g();
        let outside = tempdir().unwrap();
        fs::write(outside.path().join("secret"), "x").unwrap();
        std::os::unix::fs::symlink(
            outside.path().join("secret"),
            scratch.path().join("bin/link"),
        )
        .unwrap();
        let prefix = tempdir().unwrap();
        let roots = InstallRoots::from_prefix(prefix.path());

        let err = plan(&[rule("bin/link", "bin", None)], scratch.path(), &roots).unwrap_err();
        assert!(matches!(err, PlacementError::OutsideArchive { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinked_directory_in_root_rejected() {
        let scratch = scratch_with_v2g();
        let prefix = tempdir().unwrap();
        let elsewhere = tempdir().unwrap();
        fs::create_dir_all(prefix.path().join("lib")).unwrap();
        std::os::unix::fs::symlink(elsewhere.path(), prefix.path().join("lib/v2g")).unwrap();
        let roots = InstallRoots::from_prefix(prefix.path());

        let err = plan(
            &[rule("lib/v2g.sh", "lib", Some("v2g"))],
            scratch.path(),
            &roots,
        )
        .unwrap_err();
        assert!(matches!(err, PlacementError::OutsideRoot { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn test_exec_bit_preserved() {
        use std::os::unix::fs::PermissionsExt;

        let scratch = scratch_with_v2g();
        fs::set_permissions(
            scratch.path().join("bin/v2g"),
            fs::Permissions::from_mode(0o755),
        )
        .unwrap();
        let prefix = tempdir().unwrap();
        let roots = InstallRoots::from_prefix(prefix.path());

        let planned = plan(&[rule("bin/v2g", "bin", None)], scratch.path(), &roots).unwrap();
        let mut r = receipt();
        place(&planned, &mut r, &NullReporter).unwrap();

        assert!(r.files[0].executable);
        let mode = fs::metadata(prefix.path().join("bin/v2g"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o755);
    }
}
