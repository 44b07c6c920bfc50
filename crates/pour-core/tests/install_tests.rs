//! Integration tests for the pour-core install pipeline.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use pour_core::io::download::HttpFetcher;
use pour_core::lock::PrefixLock;
use pour_core::{
    ErrorKind, InstallError, InstallRoots, InstallStep, Installer, Reporter, StaticResolver,
    locks_dir,
};
use pour_schema::{
    AppliedPatch, Blake3Hash, Checksum, ChecksumAlgorithm, PackageDescriptor, PackageName,
    PlacedFile, ReceiptStatus,
};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

const LAUNCHER: &[u8] = b"#!/bin/sh\nexec /usr/local/lib/v2g/v2g.sh \"$@\"\n";
const LIBRARY: &[u8] = b"#!/bin/sh\necho converting \"$1\"\n";

fn tar_gz(entries: &[(&str, &[u8], u32)]) -> Vec<u8> {
    let encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    let mut builder = tar::Builder::new(encoder);
    for (path, data, mode) in entries {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(*mode);
        header.set_cksum();
        builder.append_data(&mut header, path, *data).unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap()
}

fn v2g_archive(launcher: &[u8]) -> Vec<u8> {
    tar_gz(&[
        ("v2g-tool-1.0.0/bin/v2g", launcher, 0o755),
        ("v2g-tool-1.0.0/lib/v2g.sh", LIBRARY, 0o644),
        ("v2g-tool-1.0.0/README.md", b"# v2g\n", 0o644),
    ])
}

/// Temporary home, prefix and archive for one test.
struct TestContext {
    _dir: TempDir,
    home: PathBuf,
    archive: PathBuf,
    roots: InstallRoots,
}

impl TestContext {
    fn new(archive_bytes: &[u8]) -> Self {
        let dir = TempDir::new().unwrap();
        let home = dir.path().join(".pour");
        let prefix = dir.path().join("prefix");
        fs::create_dir_all(&home).unwrap();
        fs::create_dir_all(&prefix).unwrap();

        let archive = dir.path().join("v2g-tool-1.0.0.tar.gz");
        fs::write(&archive, archive_bytes).unwrap();

        Self {
            _dir: dir,
            home,
            archive,
            roots: InstallRoots::from_prefix(prefix),
        }
    }

    /// Reference descriptor pinned to `archive_bytes`.
    fn descriptor_toml(&self, archive_bytes: &[u8]) -> String {
        let sha = Checksum::compute(ChecksumAlgorithm::Sha256, archive_bytes);
        format!(
            r#"
name = "v2g"
desc = "Video to optimized GIF converter using ffmpeg and gifsicle"
homepage = "https://github.com/LuciKritZ/v2g-tool"
url = '{url}'
sha256 = "{sha}"
license = "MIT"
depends_on = ["ffmpeg", "gifsicle"]

[[install.files]]
source = "lib/v2g.sh"
root = "lib"
into = "v2g"

[[install.files]]
source = "bin/v2g"
root = "bin"

[[install.patch]]
root = "bin"
path = "v2g"
search = "/usr/local/lib/v2g/v2g.sh"
replace = "{{lib}}/v2g/v2g.sh"
"#,
            url = self.archive.display(),
            sha = sha.digest(),
        )
    }

    fn descriptor(&self, archive_bytes: &[u8]) -> PackageDescriptor {
        PackageDescriptor::parse(&self.descriptor_toml(archive_bytes)).unwrap()
    }

    fn installer(&self, resolver: Arc<StaticResolver>) -> Installer {
        Installer::new(resolver, Arc::new(HttpFetcher::new().unwrap())).with_home(&self.home)
    }

    fn all_deps() -> Arc<StaticResolver> {
        Arc::new(StaticResolver::new(["ffmpeg", "gifsicle"]))
    }

    fn root(&self, name: &str) -> &Path {
        self.roots.get(name).unwrap()
    }

    fn prefix_is_empty(&self) -> bool {
        fs::read_dir(self.roots.prefix()).unwrap().next().is_none()
    }
}

/// Cancels a token as soon as the first file has been placed.
struct CancelAfterPlace(CancellationToken);

impl Reporter for CancelAfterPlace {
    fn step(&self, _: &PackageName, _: InstallStep) {}
    fn dependency(&self, _: &str, _: bool) {}
    fn downloading(&self, _: &PackageName, _: u64, _: Option<u64>) {}
    fn placed(&self, _: &PlacedFile) {
        self.0.cancel();
    }
    fn patched(&self, _: &AppliedPatch) {}
    fn done(&self, _: &PackageName, _: Option<&str>, _: &str) {}
    fn failed(&self, _: &PackageName, _: &str) {}
    fn info(&self, _: &str) {}
    fn warning(&self, _: &str) {}
}

#[tokio::test]
async fn test_installs_reference_package() {
    let archive = v2g_archive(LAUNCHER);
    let ctx = TestContext::new(&archive);
    let descriptor = ctx.descriptor(&archive);

    let receipt = ctx
        .installer(TestContext::all_deps())
        .install(&descriptor, &ctx.roots)
        .await
        .unwrap();

    let library = ctx.root("lib").join("v2g/v2g.sh");
    let launcher = ctx.root("bin").join("v2g");
    assert_eq!(fs::read(&library).unwrap(), LIBRARY);

    let expected = format!("{}/v2g/v2g.sh", ctx.root("lib").display());
    let patched = fs::read_to_string(&launcher).unwrap();
    assert!(patched.contains(&expected), "launcher was: {patched}");
    assert!(!patched.contains("/usr/local/lib/v2g/v2g.sh"));

    assert_eq!(receipt.status, ReceiptStatus::Complete);
    assert_eq!(receipt.version.as_deref(), Some("1.0.0"));
    assert_eq!(receipt.files.len(), 2);
    assert_eq!(receipt.patches.len(), 1);
    assert_eq!(receipt.patches[0].occurrences, 1);

    let placed = receipt
        .files
        .iter()
        .find(|f| f.destination == launcher)
        .unwrap();
    assert!(placed.executable);
    assert_eq!(placed.blake3, Blake3Hash::compute_file(&launcher).unwrap());

    // README.md was extracted but not named by any rule.
    assert!(!ctx.roots.prefix().join("README.md").exists());
}

#[tokio::test]
async fn test_tampered_archive_writes_nothing() {
    let archive = v2g_archive(LAUNCHER);
    let ctx = TestContext::new(&v2g_archive(b"#!/bin/sh\nrm -rf ~\n"));
    let descriptor = ctx.descriptor(&archive);

    let err = ctx
        .installer(TestContext::all_deps())
        .install(&descriptor, &ctx.roots)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ChecksumMismatch);
    assert!(err.receipt().is_none());
    assert!(ctx.prefix_is_empty());
}

#[tokio::test]
async fn test_absent_search_text_reports_placed_files() {
    let launcher = b"#!/bin/sh\nexec /opt/v2g/v2g.sh \"$@\"\n";
    let archive = v2g_archive(launcher);
    let ctx = TestContext::new(&archive);
    let descriptor = ctx.descriptor(&archive);

    let err = ctx
        .installer(TestContext::all_deps())
        .install(&descriptor, &ctx.roots)
        .await
        .unwrap_err();

    let InstallError::PatchTargetMissing { file, receipt, .. } = err else {
        panic!("unexpected error: {err}");
    };
    assert_eq!(file, ctx.root("bin").join("v2g"));
    assert_eq!(receipt.status, ReceiptStatus::PatchFailed);
    assert_eq!(receipt.files.len(), 2);
    assert!(receipt.patches.is_empty());
    assert_eq!(receipt.unapplied_patches.len(), 1);
    assert_eq!(fs::read(&file).unwrap(), launcher);
}

#[tokio::test]
async fn test_missing_dependency_stops_before_fetch() {
    let archive = v2g_archive(LAUNCHER);
    let ctx = TestContext::new(&archive);
    let descriptor = ctx.descriptor(&archive);
    fs::remove_file(&ctx.archive).unwrap();

    let err = ctx
        .installer(Arc::new(StaticResolver::new(["ffmpeg"])))
        .install(&descriptor, &ctx.roots)
        .await
        .unwrap_err();

    match err {
        InstallError::MissingDependency { name, .. } => assert_eq!(name, "gifsicle"),
        other => panic!("unexpected error: {other}"),
    }
    assert!(ctx.prefix_is_empty());
}

#[tokio::test]
async fn test_resolver_installs_missing_dependency() {
    let archive = v2g_archive(LAUNCHER);
    let ctx = TestContext::new(&archive);
    let descriptor = ctx.descriptor(&archive);
    let resolver = Arc::new(StaticResolver::new(["ffmpeg"]).with_installable(["gifsicle"]));

    ctx.installer(Arc::clone(&resolver))
        .install(&descriptor, &ctx.roots)
        .await
        .unwrap();

    assert_eq!(resolver.installed(), ["gifsicle"]);
}

#[tokio::test]
async fn test_skip_dependency_check() {
    let archive = v2g_archive(LAUNCHER);
    let ctx = TestContext::new(&archive);
    let descriptor = ctx.descriptor(&archive);

    let receipt = ctx
        .installer(Arc::new(StaticResolver::new(Vec::<String>::new())))
        .skip_dependency_check(true)
        .install(&descriptor, &ctx.roots)
        .await
        .unwrap();

    assert!(receipt.is_complete());
}

#[tokio::test]
async fn test_missing_archive_entry_places_nothing() {
    let archive = v2g_archive(LAUNCHER);
    let ctx = TestContext::new(&archive);
    let toml = ctx
        .descriptor_toml(&archive)
        .replace("source = \"bin/v2g\"", "source = \"bin/v2g-missing\"")
        .replace("path = \"v2g\"", "path = \"v2g-missing\"");
    let descriptor = PackageDescriptor::parse(&toml).unwrap();

    let err = ctx
        .installer(TestContext::all_deps())
        .install(&descriptor, &ctx.roots)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Placement);
    assert!(err.receipt().unwrap().files.is_empty());
    assert!(ctx.prefix_is_empty());
}

#[tokio::test]
async fn test_cancel_before_start_touches_nothing() {
    let archive = v2g_archive(LAUNCHER);
    let ctx = TestContext::new(&archive);
    let descriptor = ctx.descriptor(&archive);
    let token = CancellationToken::new();
    token.cancel();

    let err = ctx
        .installer(TestContext::all_deps())
        .with_cancellation(token)
        .install(&descriptor, &ctx.roots)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Cancelled);
    assert!(err.receipt().is_none());
    assert!(ctx.prefix_is_empty());
}

#[tokio::test]
async fn test_cancel_after_placement_leaves_unpatched_receipt() {
    let archive = v2g_archive(LAUNCHER);
    let ctx = TestContext::new(&archive);
    let descriptor = ctx.descriptor(&archive);
    let token = CancellationToken::new();

    let err = ctx
        .installer(TestContext::all_deps())
        .with_reporter(Arc::new(CancelAfterPlace(token.clone())))
        .with_cancellation(token)
        .install(&descriptor, &ctx.roots)
        .await
        .unwrap_err();

    let receipt = err.into_receipt().unwrap();
    assert_eq!(receipt.status, ReceiptStatus::Unpatched);
    assert_eq!(receipt.files.len(), 2);
    assert_eq!(receipt.unapplied_patches, descriptor.patch_rules());
    assert_eq!(fs::read(ctx.root("bin").join("v2g")).unwrap(), LAUNCHER);
}

#[tokio::test]
async fn test_contended_prefix_fails_without_waiting() {
    let archive = v2g_archive(LAUNCHER);
    let ctx = TestContext::new(&archive);
    let descriptor = ctx.descriptor(&archive);
    let _held = PrefixLock::acquire(&locks_dir(&ctx.home), ctx.roots.prefix(), false).unwrap();

    let err = ctx
        .installer(TestContext::all_deps())
        .wait_for_lock(false)
        .install(&descriptor, &ctx.roots)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Locked);
    assert!(ctx.prefix_is_empty());
}

#[tokio::test]
async fn test_differently_spelled_prefix_is_still_locked() {
    let archive = v2g_archive(LAUNCHER);
    let ctx = TestContext::new(&archive);
    let descriptor = ctx.descriptor(&archive);
    let _held = PrefixLock::acquire(&locks_dir(&ctx.home), ctx.roots.prefix(), false).unwrap();

    let spelled = ctx.roots.prefix().join("bin/../");
    let err = ctx
        .installer(TestContext::all_deps())
        .wait_for_lock(false)
        .install(&descriptor, &InstallRoots::from_prefix(spelled))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Locked);
    assert!(ctx.prefix_is_empty());
}

#[tokio::test]
async fn test_shared_root_outside_prefix_is_locked() {
    let archive = v2g_archive(LAUNCHER);
    let ctx = TestContext::new(&archive);
    let descriptor = ctx.descriptor(&archive);
    let shared_bin = ctx.home.join("shared-bin");
    let other = InstallRoots::from_prefix(ctx.home.join("other")).with_root("bin", &shared_bin);
    let _held = PrefixLock::acquire(&locks_dir(&ctx.home), &shared_bin, false).unwrap();

    let err = ctx
        .installer(TestContext::all_deps())
        .wait_for_lock(false)
        .install(&descriptor, &other)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Locked);
    assert!(!shared_bin.exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_waits_for_prefix_lock() {
    let archive = v2g_archive(LAUNCHER);
    let ctx = TestContext::new(&archive);
    let descriptor = ctx.descriptor(&archive);
    let held = PrefixLock::acquire(&locks_dir(&ctx.home), ctx.roots.prefix(), false).unwrap();

    let installer = ctx.installer(TestContext::all_deps());
    let roots = ctx.roots.clone();
    let task = tokio::spawn(async move { installer.install(&descriptor, &roots).await });

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!task.is_finished());
    assert!(ctx.prefix_is_empty());

    let released = SystemTime::now();
    drop(held);
    let receipt = task.await.unwrap().unwrap();
    assert!(receipt.is_complete());
    // stamped when the run began, before it queued on the lock
    assert!(SystemTime::from(receipt.installed_at) < released);
}

#[tokio::test]
async fn test_blake3_pinned_descriptor() {
    let archive = v2g_archive(LAUNCHER);
    let ctx = TestContext::new(&archive);
    let blake = Checksum::compute(ChecksumAlgorithm::Blake3, &archive);
    let sha = Checksum::compute(ChecksumAlgorithm::Sha256, &archive);
    let toml = ctx.descriptor_toml(&archive).replace(
        &format!("sha256 = \"{}\"", sha.digest()),
        &format!("blake3 = \"{}\"", blake.digest()),
    );
    let descriptor = PackageDescriptor::parse(&toml).unwrap();

    let receipt = ctx
        .installer(TestContext::all_deps())
        .install(&descriptor, &ctx.roots)
        .await
        .unwrap();

    assert_eq!(receipt.checksum, blake);
}
