//! `vaultsync run` — the sidecar loop.

use anyhow::Result;
use clap::Args;

use super::TargetArgs;

/// Arguments for `vaultsync run`.
#[derive(Args, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    pub target: TargetArgs,

    /// Exit with status 1 on the first failed cycle instead of retrying on
    /// the next tick.
    #[arg(long, env = "FAIL_FAST")]
    pub fail_fast: bool,
}

impl RunArgs {
    pub fn run(self) -> Result<()> {
        let settings = self.target.resolve()?;
        vaultsync_daemon::start_blocking(settings, self.fail_fast)?;
        Ok(())
    }
}
