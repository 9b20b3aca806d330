//! `vaultsync sync` — one reconciliation cycle, then exit.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use vaultsync_sync::CycleOutcome;

use super::TargetArgs;

/// Arguments for `vaultsync sync`.
#[derive(Args, Debug)]
pub struct SyncArgs {
    #[command(flatten)]
    pub target: TargetArgs,

    /// Show whether the file would change without writing it.
    #[arg(long)]
    pub dry_run: bool,
}

impl SyncArgs {
    pub fn run(self) -> Result<()> {
        let settings = self.target.resolve()?;
        let secret = settings.target.secret_name.as_str().to_owned();
        match vaultsync_daemon::sync_once(settings, self.dry_run)
            .with_context(|| format!("sync failed for '{secret}'"))?
        {
            Some(outcome) => print_outcome(&secret, &outcome),
            None => println!("· '{secret}' stopped before completing, nothing written"),
        }
        Ok(())
    }
}

fn print_outcome(secret: &str, outcome: &CycleOutcome) {
    let check = "✓".green();
    match outcome {
        CycleOutcome::Written {
            path, fingerprint, ..
        } => {
            println!("{check} '{secret}' synced");
            println!("  ✎  {} (sha256 {fingerprint})", path.display());
        }
        CycleOutcome::WouldWrite { path } => {
            println!("[dry-run] {check} '{secret}' would change");
            println!("  ~  {}", path.display());
        }
        CycleOutcome::Unchanged { path } => {
            println!("{check} '{secret}' up to date");
            println!("  ·  {}", path.display());
        }
    }
}
