//! Hash command

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use pour_schema::ChecksumAlgorithm;

/// Print the checksum of each file, in the form a descriptor expects.
pub fn hash(files: &[PathBuf], blake3: bool) -> Result<()> {
    let algorithm = if blake3 {
        ChecksumAlgorithm::Blake3
    } else {
        ChecksumAlgorithm::Sha256
    };

    for file in files {
        let digest = compute_file_hash(file, algorithm)
            .with_context(|| format!("Failed to hash {}", file.display()))?;
        println!("{digest}  {}", file.display());
    }
    Ok(())
}

/// Streaming digest of a file.
fn compute_file_hash(path: &Path, algorithm: ChecksumAlgorithm) -> std::io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = algorithm.hasher();
    let mut buffer = [0u8; 65536];

    loop {
        let bytes_read = file.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hasher.finalize_hex())
}
