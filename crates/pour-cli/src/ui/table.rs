//! Tables for install results and descriptor summaries.

use comfy_table::presets::UTF8_BORDERS_ONLY;
use comfy_table::{Cell, ContentArrangement, Table};
use pour_core::InstallRoots;
use pour_schema::{InstallReceipt, PackageDescriptor};

fn table(header: &[&str]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_BORDERS_ONLY)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header.iter().map(|h| Cell::new(h)));
    table
}

/// Files and patches recorded in a receipt.
pub fn receipt_table(receipt: &InstallReceipt) -> Table {
    let mut t = table(&["Root", "Installed path", "Mode", "BLAKE3"]);
    for file in &receipt.files {
        let patched = receipt.patches.iter().any(|p| p.file == file.destination);
        let mode = match (file.executable, patched) {
            (true, true) => "exec, patched",
            (true, false) => "exec",
            (false, true) => "patched",
            (false, false) => "",
        };
        t.add_row(vec![
            Cell::new(&file.root),
            Cell::new(file.destination.display()),
            Cell::new(mode),
            Cell::new(&file.blake3.as_str()[..12]),
        ]);
    }
    t
}

/// Install rules of a descriptor resolved against `roots`.
pub fn plan_table(descriptor: &PackageDescriptor, roots: &InstallRoots) -> Table {
    let mut t = table(&["Archive path", "Root", "Destination"]);
    for rule in descriptor.install_rules() {
        let destination = roots.get(&rule.root).map_or_else(
            || format!("<{}>/{}", rule.root, rule.destination().display()),
            |dir| dir.join(rule.destination()).display().to_string(),
        );
        t.add_row(vec![
            Cell::new(&rule.source),
            Cell::new(&rule.root),
            Cell::new(destination),
        ]);
    }
    t
}
