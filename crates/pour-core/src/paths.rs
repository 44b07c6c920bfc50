use dirs::home_dir;
use std::path::{Path, PathBuf};

/// Returns the pour home directory, or None if the user's home cannot be resolved.
///
/// `POUR_HOME` overrides the default of `~/.pour`.
pub fn try_pour_home() -> Option<PathBuf> {
    if let Ok(val) = std::env::var("POUR_HOME") {
        if !val.is_empty() {
            return Some(PathBuf::from(val));
        }
    }
    home_dir().map(|h| h.join(".pour"))
}

/// Configuration file: `<home>/config.toml`
pub fn config_path(home: &Path) -> PathBuf {
    home.join("config.toml")
}

/// Advisory lock files, one per installation prefix: `<home>/locks`
pub fn locks_dir(home: &Path) -> PathBuf {
    home.join("locks")
}

/// Persisted install receipts: `<home>/receipts`
pub fn receipts_dir(home: &Path) -> PathBuf {
    home.join("receipts")
}

/// Scratch area for downloads and extraction: `<home>/tmp`
pub fn tmp_path(home: &Path) -> PathBuf {
    home.join("tmp")
}

/// Extract the filename from a URL.
pub fn filename_from_url(url: &str) -> &str {
    let url = url.split(['?', '#']).next().unwrap_or(url);
    url.split('/').next_back().unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filename_from_url() {
        assert_eq!(
            filename_from_url("https://example.com/path/to/file.tar.gz"),
            "file.tar.gz"
        );
        assert_eq!(filename_from_url("https://example.com/a.zip?dl=1"), "a.zip");
        assert_eq!(filename_from_url(""), "");
    }

    #[test]
    fn test_layout_under_home() {
        let home = Path::new("/tmp/pour-home");
        assert_eq!(config_path(home), home.join("config.toml"));
        assert_eq!(locks_dir(home), home.join("locks"));
        assert_eq!(receipts_dir(home), home.join("receipts"));
        assert_eq!(tmp_path(home), home.join("tmp"));
    }
}
