//! Command-line interface for bluecontrol peripherals.

mod cli;
mod commands;
mod config;
mod util;

use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Commands, DeviceArgs};
use commands::{
    DeviceOptions, cmd_alias, cmd_config, cmd_get, cmd_scan, cmd_send, cmd_set, cmd_watch,
};
use config::{Config, get_device_source, print_device_source_feedback, resolve_timeout};
use util::require_device;

/// Default for `--timeout`, kept in sync with the clap default.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.quiet {
        EnvFilter::new("warn")
    } else if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = Config::load();

    match cli.command {
        Commands::Scan { timeout } => {
            let session = config.session_config(cli.dialect, cli.uppercase)?;
            cmd_scan(
                timeout,
                session,
                cli.json,
                cli.output.as_ref(),
                cli.quiet,
                &config,
            )
            .await?;
        }
        Commands::Get { ref device, ref target } => {
            let opts = device_options(&cli, device, &config)?;
            cmd_get(&opts, target).await?;
        }
        Commands::Set {
            ref device,
            ref target,
            ref value,
        } => {
            let opts = device_options(&cli, device, &config)?;
            cmd_set(&opts, target, value).await?;
        }
        Commands::Send {
            ref device,
            ref message,
        } => {
            let opts = device_options(&cli, device, &config)?;
            cmd_send(&opts, message).await?;
        }
        Commands::Watch { ref device, count } => {
            let opts = device_options(&cli, device, &config)?;
            cmd_watch(&opts, count).await?;
        }
        Commands::Config { action } => cmd_config(action, cli.quiet)?,
        Commands::Alias { action } => cmd_alias(action, cli.quiet)?,
    }

    Ok(())
}

/// Resolve the target device and session settings for a device command.
fn device_options<'a>(
    cli: &'a Cli,
    args: &DeviceArgs,
    config: &Config,
) -> Result<DeviceOptions<'a>> {
    let (device, source) = get_device_source(args.device.as_deref(), config);
    let address = require_device(device)?;
    print_device_source_feedback(&address, source, cli.quiet);

    let timeout = resolve_timeout(args.timeout, config, DEFAULT_TIMEOUT_SECS);
    Ok(DeviceOptions {
        address,
        timeout: Duration::from_secs(timeout),
        session: config.session_config(cli.dialect, cli.uppercase)?,
        json: cli.json,
        quiet: cli.quiet,
        output: cli.output.as_ref(),
    })
}
