//! Console reporter
//!
//! Prints install progress to stderr so stdout stays free for machine
//! readable output (`hash`, `completions`).

use std::io::{IsTerminal, Write};
use std::sync::atomic::{AtomicBool, Ordering};

use crossterm::style::Stylize;
use crossterm::terminal::{Clear, ClearType};
use crossterm::{execute, queue};
use pour_core::{InstallStep, Reporter};
use pour_schema::{AppliedPatch, PackageName, PlacedFile};

/// Reporter that writes styled lines to stderr.
#[derive(Debug)]
pub struct ConsoleReporter {
    quiet: bool,
    interactive: bool,
    progress_line: AtomicBool,
}

impl ConsoleReporter {
    pub fn new(quiet: bool) -> Self {
        Self {
            quiet,
            interactive: std::io::stderr().is_terminal(),
            progress_line: AtomicBool::new(false),
        }
    }

    /// Finish an in-place progress line before printing anything else.
    fn end_progress(&self) {
        if self.progress_line.swap(false, Ordering::Relaxed) {
            eprintln!();
        }
    }

    fn line(&self, msg: &str) {
        if self.quiet {
            return;
        }
        self.end_progress();
        eprintln!("{msg}");
    }
}

fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

impl Reporter for ConsoleReporter {
    fn step(&self, name: &PackageName, step: InstallStep) {
        self.line(&format!(
            "{} {} {}",
            "==>".blue().bold(),
            step,
            name.as_str().bold()
        ));
    }

    fn dependency(&self, name: &str, present: bool) {
        if present {
            self.line(&format!("    {} {name}", "found".dark_grey()));
        } else {
            self.line(&format!("    {} {name}", "installed".green()));
        }
    }

    fn downloading(&self, _name: &PackageName, current: u64, total: Option<u64>) {
        if self.quiet || !self.interactive {
            return;
        }
        let text = match total {
            Some(total) if total > 0 => format!(
                "    {} / {} ({}%)",
                format_bytes(current),
                format_bytes(total),
                current * 100 / total
            ),
            _ => format!("    {}", format_bytes(current)),
        };

        let mut stderr = std::io::stderr();
        let _ = queue!(stderr, Clear(ClearType::CurrentLine));
        let _ = write!(stderr, "\r{}", text.dark_grey());
        let _ = stderr.flush();
        self.progress_line.store(true, Ordering::Relaxed);
    }

    fn placed(&self, file: &PlacedFile) {
        self.line(&format!(
            "    {} {}",
            "+".green(),
            file.destination.display()
        ));
    }

    fn patched(&self, patch: &AppliedPatch) {
        self.line(&format!(
            "    {} {} ({} occurrence{})",
            "~".yellow(),
            patch.file.display(),
            patch.occurrences,
            if patch.occurrences == 1 { "" } else { "s" }
        ));
    }

    fn done(&self, name: &PackageName, version: Option<&str>, detail: &str) {
        self.line(&format!(
            "{} {} {} {}",
            "✓".green().bold(),
            name.as_str().bold(),
            version.unwrap_or("-").cyan(),
            detail.dark_grey()
        ));
    }

    fn failed(&self, name: &PackageName, reason: &str) {
        self.end_progress();
        let mut stderr = std::io::stderr();
        let _ = execute!(stderr, Clear(ClearType::UntilNewLine));
        eprintln!("{} {} {reason}", "✗".red().bold(), name.as_str().bold());
    }

    fn info(&self, msg: &str) {
        self.line(&format!("{} {msg}", "::".blue()));
    }

    fn warning(&self, msg: &str) {
        self.end_progress();
        eprintln!("{} {msg}", "warning:".yellow().bold());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
    }
}
