//! Check command

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use crossterm::style::Stylize;
use pour_core::{DependencyResolver, PathResolver};
use pour_schema::PackageDescriptor;

use crate::ui::table::plan_table;

/// Validate a descriptor and summarise what installing it would do.
pub fn check(path: &Path, prefix: Option<PathBuf>) -> Result<()> {
    let descriptor = PackageDescriptor::from_file(path)
        .with_context(|| format!("Invalid descriptor {}", path.display()))?;

    let home = super::home()?;
    let mut config = super::load_config(&home)?;
    if prefix.is_some() {
        config.prefix = prefix;
    }
    let roots = config.install_roots(&home);

    println!(
        "{} {}",
        descriptor.name().as_str().bold(),
        descriptor.version().unwrap_or("-").cyan()
    );
    println!("  {}", descriptor.description());
    println!("  {} {}", "homepage:".dark_grey(), descriptor.homepage());
    println!("  {} {}", "license: ".dark_grey(), descriptor.license());
    let source = descriptor.source();
    println!("  {} {} ({})", "source:  ".dark_grey(), source.url, source.format);
    println!("  {} {}", "checksum:".dark_grey(), source.checksum);

    if !descriptor.dependencies().is_empty() {
        let lookup = PathResolver::new();
        let deps: Vec<String> = descriptor
            .dependencies()
            .iter()
            .map(|d| {
                if lookup.exists(d) {
                    d.as_str().green().to_string()
                } else {
                    format!("{} (missing)", d.as_str().red())
                }
            })
            .collect();
        println!("  {} {}", "depends: ".dark_grey(), deps.join(", "));
    }

    println!("{}", plan_table(&descriptor, &roots));

    for rule in descriptor.patch_rules() {
        println!(
            "  {} {}/{}: {:?} -> {:?}",
            "patch".yellow(),
            rule.root,
            rule.path,
            rule.search,
            rule.replace
        );
    }
    Ok(())
}
