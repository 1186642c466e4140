use std::path::PathBuf;

use anyhow::Context;
use anyhow::Result;
use clap::Parser;
use clap::Subcommand;
use opsdesk_core::OpsConfig;

pub mod vpn_cmd;

/// Run appliance account operations as background jobs.
#[derive(Debug, Parser)]
#[command(name = "opsdesk", version)]
pub struct Cli {
    /// TOML configuration file. Defaults apply when omitted.
    #[arg(long = "config", global = true, env = "OPSDESK_CONFIG", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Print the final job record as JSON instead of its log.
    #[arg(long = "json", global = true, default_value_t = false)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Manage accounts on the VPN appliance.
    Vpn(vpn_cmd::VpnCli),
}

pub async fn run(cli: Cli) -> Result<()> {
    let config = OpsConfig::load(cli.config.as_deref()).context("failed to load configuration")?;
    match cli.command {
        Command::Vpn(vpn) => vpn_cmd::run(vpn, config, cli.json).await,
    }
}
