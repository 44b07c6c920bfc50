//! Uninstall command
//!
//! Reverses an install using its receipt. A file is removed only while its
//! content still matches the fingerprint recorded at install time; anything
//! edited since is kept unless `--force` is given.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use crossterm::style::Stylize;
use pour_schema::{Blake3Hash, InstallReceipt};

/// What uninstalling a receipt would do.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct RemovalPlan {
    pub remove: Vec<PathBuf>,
    pub modified: Vec<PathBuf>,
    pub missing: Vec<PathBuf>,
}

/// Sort the receipt's files by their current state on disk.
pub fn plan_removal(receipt: &InstallReceipt, force: bool) -> RemovalPlan {
    let mut plan = RemovalPlan::default();
    for file in &receipt.files {
        let path = file.destination.clone();
        match Blake3Hash::compute_file(&path) {
            Ok(hash) if hash == file.blake3 || force => plan.remove.push(path),
            Ok(_) => plan.modified.push(path),
            Err(_) => plan.missing.push(path),
        }
    }
    plan
}

/// Remove directories the install created, innermost first, while they are empty.
fn prune_dirs(dirs: &[PathBuf]) -> Vec<PathBuf> {
    let mut removed = Vec::new();
    for dir in dirs.iter().rev() {
        let empty = fs::read_dir(dir).is_ok_and(|mut entries| entries.next().is_none());
        if empty && fs::remove_dir(dir).is_ok() {
            removed.push(dir.clone());
        }
    }
    removed
}

/// Remove what the receipt at `receipt_path` installed.
pub fn uninstall(receipt_path: &Path, force: bool, dry_run: bool, quiet: bool) -> Result<()> {
    let json = fs::read_to_string(receipt_path)
        .with_context(|| format!("Failed to read receipt {}", receipt_path.display()))?;
    let receipt = InstallReceipt::from_json(&json)
        .with_context(|| format!("Invalid receipt {}", receipt_path.display()))?;

    let plan = plan_removal(&receipt, force);

    for path in &plan.modified {
        eprintln!(
            "{} keeping {} (modified since install, use --force to remove)",
            "warning:".yellow().bold(),
            path.display()
        );
    }

    if dry_run {
        for path in &plan.remove {
            println!("would remove {}", path.display());
        }
        return Ok(());
    }

    for path in &plan.remove {
        fs::remove_file(path).with_context(|| format!("Failed to remove {}", path.display()))?;
        if !quiet {
            eprintln!("    {} {}", "-".red(), path.display());
        }
    }
    prune_dirs(&receipt.created_dirs);

    if plan.modified.is_empty() {
        fs::remove_file(receipt_path)
            .with_context(|| format!("Failed to remove receipt {}", receipt_path.display()))?;
    }

    if !quiet {
        eprintln!(
            "{} {} uninstalled ({} removed, {} kept, {} already gone)",
            "✓".green().bold(),
            receipt.package.as_str().bold(),
            plan.remove.len(),
            plan.modified.len(),
            plan.missing.len()
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pour_schema::{Checksum, ChecksumAlgorithm, PackageName, PlacedFile};
    use tempfile::tempdir;

    fn receipt_for(root: &Path) -> InstallReceipt {
        let mut receipt = InstallReceipt::new(
            PackageName::new("v2g").unwrap(),
            None,
            "file:///v2g.tar.gz",
            Checksum::compute(ChecksumAlgorithm::Sha256, b""),
        );
        let lib = root.join("lib");
        fs::create_dir_all(lib.join("v2g")).unwrap();
        for (name, body) in [("lib/v2g/v2g.sh", "lib"), ("lib/v2g/extra", "extra")] {
            let path = root.join(name);
            fs::write(&path, body).unwrap();
            receipt.files.push(PlacedFile {
                source: name.into(),
                root: "lib".into(),
                destination: path.clone(),
                executable: false,
                blake3: Blake3Hash::compute_file(&path).unwrap(),
            });
        }
        receipt.created_dirs = vec![lib.clone(), lib.join("v2g")];
        receipt
    }

    #[test]
    fn test_modified_files_are_kept() {
        let dir = tempdir().unwrap();
        let receipt = receipt_for(dir.path());
        fs::write(dir.path().join("lib/v2g/extra"), "edited").unwrap();

        let plan = plan_removal(&receipt, false);
        assert_eq!(plan.remove, [dir.path().join("lib/v2g/v2g.sh")]);
        assert_eq!(plan.modified, [dir.path().join("lib/v2g/extra")]);

        let forced = plan_removal(&receipt, true);
        assert_eq!(forced.remove.len(), 2);
    }

    #[test]
    fn test_uninstall_removes_files_dirs_and_receipt() {
        let dir = tempdir().unwrap();
        let receipt = receipt_for(dir.path());
        let receipt_path = dir.path().join("v2g.json");
        fs::write(&receipt_path, receipt.to_json().unwrap()).unwrap();

        uninstall(&receipt_path, false, false, true).unwrap();

        assert!(!dir.path().join("lib").exists());
        assert!(!receipt_path.exists());
    }

    #[test]
    fn test_prune_keeps_non_empty_dirs() {
        let dir = tempdir().unwrap();
        let outer = dir.path().join("lib");
        let inner = outer.join("v2g");
        fs::create_dir_all(&inner).unwrap();
        fs::write(outer.join("other"), "x").unwrap();

        let removed = prune_dirs(&[outer.clone(), inner.clone()]);
        assert_eq!(removed, [inner]);
        assert!(outer.exists());
    }
}
