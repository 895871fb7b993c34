pub use taskdeck_core::config::*;

use crate::cli::Cli;

pub fn from_cli(cli: &Cli) -> anyhow::Result<AppConfig> {
    AppConfig::discover(cli.data_dir.clone())
}

/// The user commands run as, from `--user` or the environment.
pub fn user_from_cli(cli: &Cli) -> String {
    resolve_user(cli.user.clone())
}
