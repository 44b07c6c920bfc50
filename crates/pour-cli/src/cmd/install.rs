//! Install command

use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use pour_core::io::download::HttpFetcher;
use pour_core::patch::write_atomic;
use pour_core::{
    CommandResolver, Config, DependencyResolver, InstallRoots, Installer, PathResolver, Reporter,
    receipts_dir,
};
use pour_schema::{InstallReceipt, PackageDescriptor};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::InstallArgs;
use crate::ui::ConsoleReporter;
use crate::ui::table::receipt_table;

/// Apply command-line overrides on top of the configuration file.
fn apply_overrides(config: &mut Config, args: &InstallArgs) {
    if let Some(prefix) = &args.prefix {
        config.prefix = Some(prefix.clone());
    }
    for (name, path) in &args.roots {
        config.roots.insert(name.clone(), path.clone());
    }
    if let Some(cmd) = &args.dependency_installer {
        config.dependency_installer = Some(cmd.clone());
    }
    if args.no_wait {
        config.wait_for_lock = false;
    }
}

fn resolver(config: &Config) -> Arc<dyn DependencyResolver> {
    match &config.dependency_installer {
        Some(template) => Arc::new(CommandResolver::new(PathResolver::new(), template.clone())),
        None => Arc::new(PathResolver::new()),
    }
}

/// Write `receipt` as pretty JSON, replacing any previous receipt atomically.
pub fn write_receipt(path: &Path, receipt: &InstallReceipt) -> Result<()> {
    let json = receipt.to_json().context("Failed to serialize receipt")?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    write_atomic(path, |f| f.write_all(json.as_bytes()))
        .with_context(|| format!("Failed to write receipt {}", path.display()))
}

/// Cancel `token` on Ctrl-C.
fn cancel_on_interrupt(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            debug!("interrupt received, cancelling install");
            token.cancel();
        }
    });
}

/// Install the package described by `args.descriptor`.
pub async fn install(args: &InstallArgs, quiet: bool) -> Result<()> {
    let home = super::home()?;
    let mut config = super::load_config(&home)?;
    apply_overrides(&mut config, args);

    let descriptor = PackageDescriptor::from_file(&args.descriptor)
        .with_context(|| format!("Invalid descriptor {}", args.descriptor.display()))?;
    let roots: InstallRoots = config.install_roots(&home);

    let reporter = Arc::new(ConsoleReporter::new(quiet));
    let fetcher = HttpFetcher::new().context("Failed to initialise HTTP client")?;
    let token = CancellationToken::new();
    cancel_on_interrupt(token.clone());

    let installer = Installer::new(resolver(&config), Arc::new(fetcher))
        .with_home(&home)
        .with_reporter(reporter.clone())
        .wait_for_lock(config.wait_for_lock)
        .skip_dependency_check(args.skip_dependencies)
        .with_cancellation(token);

    let receipt_path = args.receipt.clone().unwrap_or_else(|| {
        receipts_dir(&home).join(format!("{}.json", descriptor.name()))
    });

    match installer.install(&descriptor, &roots).await {
        Ok(receipt) => {
            write_receipt(&receipt_path, &receipt)?;
            if !quiet {
                println!("{}", receipt_table(&receipt));
                reporter.info(&format!("Receipt written to {}", receipt_path.display()));
            }
            Ok(())
        }
        Err(err) => {
            if let Some(partial) = err.receipt() {
                write_receipt(&receipt_path, partial)?;
                reporter.warning(&format!(
                    "{} file(s) were left in place; partial receipt written to {}",
                    partial.files.len(),
                    receipt_path.display()
                ));
            }
            Err(anyhow::Error::new(err).context(format!("Failed to install {}", descriptor.name())))
        }
    }
}
