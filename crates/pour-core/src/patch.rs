//! Post-install text substitution.
//!
//! Patches are literal byte substitutions, never regular expressions. A patch
//! whose search text is absent fails instead of silently doing nothing, and
//! every rewrite goes through [`write_atomic`] so the target ends up either
//! fully rewritten or untouched.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use thiserror::Error;

use crate::roots::InstallRoots;
use pour_schema::{AppliedPatch, PatchRule};

#[derive(Error, Debug)]
pub enum PatchError {
    #[error("search text {search:?} not found in {}", file.display())]
    TargetMissing { file: PathBuf, search: String },

    #[error("destination root '{0}' is not configured")]
    UnknownRoot(String),

    #[error("failed to rewrite {}: {source}", file.display())]
    Io { file: PathBuf, source: io::Error },
}

/// Expand `{<root>}` placeholders to the absolute root paths.
pub fn expand_placeholders(template: &str, roots: &InstallRoots) -> String {
    let mut out = template.to_string();
    for (name, path) in roots.iter() {
        let placeholder = format!("{{{name}}}");
        if out.contains(&placeholder) {
            out = out.replace(&placeholder, &path.display().to_string());
        }
    }
    out
}

/// Replace every occurrence of `search` in `haystack`.
///
/// Returns the rewritten bytes and the number of replacements.
pub fn replace_literal(haystack: &[u8], search: &[u8], replacement: &[u8]) -> (Vec<u8>, usize) {
    if search.is_empty() {
        return (haystack.to_vec(), 0);
    }

    let mut out = Vec::with_capacity(haystack.len());
    let mut count = 0;
    let mut i = 0;
    while i < haystack.len() {
        if haystack[i..].starts_with(search) {
            out.extend_from_slice(replacement);
            i += search.len();
            count += 1;
        } else {
            out.push(haystack[i]);
            i += 1;
        }
    }
    (out, count)
}

/// Replace `path` with whatever `write` produces, atomically.
///
/// The content is written to a temporary file in the same directory, which
/// inherits the original permissions, is synced, and then renamed over the
/// target. If `write` fails the temporary file is removed and the original
/// is left as it was.
pub fn write_atomic<F>(path: &Path, write: F) -> io::Result<()>
where
    F: FnOnce(&mut File) -> io::Result<()>,
{
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    let mut tmp = NamedTempFile::new_in(dir)?;

    if let Ok(meta) = fs::metadata(path) {
        fs::set_permissions(tmp.path(), meta.permissions())?;
    }

    write(tmp.as_file_mut())?;
    tmp.as_file_mut().flush()?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Apply one patch rule to its installed target.
pub fn apply_patch(rule: &PatchRule, roots: &InstallRoots) -> Result<AppliedPatch, PatchError> {
    let root = roots
        .get(&rule.root)
        .ok_or_else(|| PatchError::UnknownRoot(rule.root.clone()))?;
    let file = root.join(&rule.path);
    let replacement = expand_placeholders(&rule.replace, roots);

    let original = fs::read(&file).map_err(|source| PatchError::Io {
        file: file.clone(),
        source,
    })?;

    let (patched, occurrences) =
        replace_literal(&original, rule.search.as_bytes(), replacement.as_bytes());
    if occurrences == 0 {
        return Err(PatchError::TargetMissing {
            file,
            search: rule.search.clone(),
        });
    }

    write_atomic(&file, |f| f.write_all(&patched)).map_err(|source| PatchError::Io {
        file: file.clone(),
        source,
    })?;

    Ok(AppliedPatch {
        file,
        search: rule.search.clone(),
        replacement,
        occurrences,
    })
}
