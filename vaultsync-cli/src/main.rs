//! vaultsync — keep a local file in sync with an Azure Key Vault secret.
//!
//! # Usage
//!
//! ```text
//! vaultsync run  --vault-name <name> --secret-name <name> --dir <path> [--interval <secs>] [--fail-fast]
//! vaultsync sync --vault-name <name> --secret-name <name> --dir <path> [--dry-run]
//! ```
//!
//! Every flag also reads an environment variable (`VAULT_NAME`,
//! `SECRET_NAME`, `DIR`, ...); see `vaultsync run --help`.

mod commands;

use std::process::ExitCode;

use clap::{Parser, Subcommand};

use commands::{run::RunArgs, sync::SyncArgs};
use vaultsync_core::ConfigError;

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "vaultsync",
    version,
    about = "Keep a local file in sync with an Azure Key Vault secret",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Reconcile on an interval until SIGTERM or Ctrl-C.
    Run(RunArgs),

    /// Reconcile once and exit.
    Sync(SyncArgs),
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => return usage(&err),
    };
    let result = match cli.command {
        Commands::Run(args) => args.run(),
        Commands::Sync(args) => args.run(),
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            report(&err);
            ExitCode::FAILURE
        }
    }
}

/// Help and version exit 0; any usage error exits 1 like a config error.
fn usage(err: &clap::Error) -> ExitCode {
    let _ = err.print();
    if err.use_stderr() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

fn report(err: &anyhow::Error) {
    use colored::Colorize;

    let tag = "[error]".red().bold();
    match err.chain().find_map(|e| e.downcast_ref::<ConfigError>()) {
        Some(config) => println!("{tag} invalid config, {config}"),
        None => println!("{tag} {err:#}"),
    }
}
