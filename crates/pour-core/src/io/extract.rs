//! Unpacking downloaded artifacts into a scratch tree.
//!
//! Every supported format lands as plain files under one directory. An entry
//! whose path would resolve outside that directory fails the whole unpack.

use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::{Component, Path, PathBuf};

use thiserror::Error;
use zip::ZipArchive;

use pour_schema::ArtifactFormat;

/// Prefix of the scratch directory the wrapper is parked in while its children move up.
const STRIP_PARKING: &str = ".pour-strip";

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("reading archive: {0}")]
    Io(#[from] io::Error),

    #[error("malformed {format} archive: {message}")]
    Malformed {
        format: ArtifactFormat,
        message: String,
    },

    #[error("archive entry '{0}' points outside the unpack directory")]
    UnsafePath(String),

    #[error("cannot strip the top-level directory: '{0}' already exists beside it")]
    StripConflict(String),
}

/// A regular file written during unpacking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedFile {
    /// Path below the unpack directory.
    pub path: PathBuf,
    /// Whether any execute bit was set on the entry.
    pub executable: bool,
}

/// Turn an archive entry name into a relative path with only normal components.
fn contained(name: &Path) -> Result<PathBuf, ExtractError> {
    name.components()
        .filter(|c| !matches!(c, Component::CurDir))
        .map(|c| match c {
            Component::Normal(part) => Ok(part),
            _ => Err(ExtractError::UnsafePath(name.display().to_string())),
        })
        .collect()
}

fn unpack_tar(reader: impl Read, dest: &Path) -> Result<Vec<ExtractedFile>, ExtractError> {
    let mut archive = tar::Archive::new(reader);
    let mut written = Vec::new();

    for entry in archive.entries()? {
        let mut entry = entry?;
        let kind = entry.header().entry_type();

        // pax headers (GitHub tag tarballs carry one) are metadata, not files
        if kind.is_pax_global_extensions() || kind.is_pax_local_extensions() {
            continue;
        }

        let path = contained(&entry.path()?)?;
        if path.as_os_str().is_empty() {
            continue;
        }
        if !entry.unpack_in(dest)? {
            return Err(ExtractError::UnsafePath(path.display().to_string()));
        }

        if !kind.is_dir() {
            let mode = entry.header().mode().unwrap_or(0o644);
            written.push(ExtractedFile {
                path,
                executable: mode & 0o111 != 0,
            });
        }
    }

    Ok(written)
}

fn unpack_zip(file: File, dest: &Path) -> Result<Vec<ExtractedFile>, ExtractError> {
    let malformed = |e: zip::result::ZipError| ExtractError::Malformed {
        format: ArtifactFormat::Zip,
        message: e.to_string(),
    };

    let mut archive = ZipArchive::new(file).map_err(malformed)?;
    let mut written = Vec::new();

    for index in 0..archive.len() {
        let mut member = archive.by_index(index).map_err(malformed)?;
        let path = member
            .enclosed_name()
            .ok_or_else(|| ExtractError::UnsafePath(member.name().to_string()))?;
        let target = dest.join(&path);

        if member.is_dir() {
            fs::create_dir_all(&target)?;
            continue;
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        io::copy(&mut member, &mut File::create(&target)?)?;

        let mode = member.unix_mode().unwrap_or(0o644);
        set_mode(&target, mode & 0o777)?;
        written.push(ExtractedFile {
            path,
            executable: mode & 0o111 != 0,
        });
    }

    Ok(written)
}

/// A raw download becomes a single executable file named `file_name`.
fn unpack_binary(
    download: &Path,
    dest: &Path,
    file_name: &str,
) -> Result<Vec<ExtractedFile>, ExtractError> {
    let path = contained(Path::new(file_name))?;
    if path.components().count() != 1 {
        return Err(ExtractError::UnsafePath(file_name.to_string()));
    }

    let target = dest.join(&path);
    fs::copy(download, &target)?;
    set_mode(&target, 0o755)?;

    Ok(vec![ExtractedFile {
        path,
        executable: true,
    }])
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> io::Result<()> {
    Ok(())
}

/// Unpack `archive` (of the given format) into `dest`, creating it if needed.
///
/// `file_name` names the output for [`ArtifactFormat::Binary`] downloads and
/// is ignored otherwise. Returns the regular files written, in archive order.
pub fn extract(
    archive: &Path,
    format: ArtifactFormat,
    dest: &Path,
    file_name: &str,
) -> Result<Vec<ExtractedFile>, ExtractError> {
    fs::create_dir_all(dest)?;
    if format == ArtifactFormat::Binary {
        return unpack_binary(archive, dest, file_name);
    }

    let file = File::open(archive)?;
    match format {
        ArtifactFormat::Zip => unpack_zip(file, dest),
        ArtifactFormat::TarGz => {
            unpack_tar(flate2::read::GzDecoder::new(BufReader::new(file)), dest)
        }
        ArtifactFormat::TarZst => unpack_tar(zstd::stream::Decoder::new(file)?, dest),
        ArtifactFormat::Tar | ArtifactFormat::Binary => unpack_tar(BufReader::new(file), dest),
    }
}

/// Hoist the contents of a lone top-level directory into `dir`.
///
/// Dotfiles beside that directory (`.DS_Store` and friends) do not count
/// against it. Returns `false` and leaves the tree alone when there is no
/// single wrapper directory.
///
/// # Errors
///
/// [`ExtractError::StripConflict`] when a child of the wrapper would land on
/// one of those dotfiles; nothing has been moved in that case.
pub fn strip_components(dir: &Path) -> Result<bool, ExtractError> {
    let mut visible = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_name().to_string_lossy().starts_with('.') {
            visible.push(entry);
        }
    }

    let [wrapper] = visible.as_slice() else {
        return Ok(false);
    };
    if !wrapper.file_type()?.is_dir() {
        return Ok(false);
    }

    // parked first so a child sharing the wrapper's name can move into place
    let parking = tempfile::Builder::new()
        .prefix(STRIP_PARKING)
        .tempdir_in(dir)?;
    let parked = parking.path().join("wrapper");
    fs::rename(wrapper.path(), &parked)?;

    let children = fs::read_dir(&parked)?
        .map(|child| child.map(|c| c.file_name()))
        .collect::<io::Result<Vec<_>>>()?;
    if let Some(taken) = children
        .iter()
        .find(|name| fs::symlink_metadata(dir.join(name)).is_ok())
    {
        let name = taken.to_string_lossy().into_owned();
        fs::rename(&parked, wrapper.path())?;
        return Err(ExtractError::StripConflict(name));
    }

    for name in children {
        fs::rename(parked.join(&name), dir.join(&name))?;
    }
    parking.close()?;

    Ok(true)
}
