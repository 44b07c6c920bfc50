//! pour - install a package descriptor into a prefix

use std::process::ExitCode;

use clap::Parser;
use crossterm::style::Stylize;
use tracing_subscriber::EnvFilter;

use pour_cli::cmd;
use pour_cli::{Cli, Commands, exit_code};

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let quiet = cli.quiet;

    let result = match cli.command {
        Commands::Install(args) => cmd::install::install(&args, quiet).await,
        Commands::Uninstall {
            receipt,
            force,
            dry_run,
        } => cmd::uninstall::uninstall(&receipt, force, dry_run, quiet),
        Commands::Check { descriptor, prefix } => cmd::check::check(&descriptor, prefix),
        Commands::Hash { files, blake3 } => cmd::hash::hash(&files, blake3),
        Commands::Completions { shell } => {
            cmd::completions::completions(shell);
            Ok(())
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{} {err:#}", "error:".red().bold());
            ExitCode::from(exit_code(&err))
        }
    }
}
