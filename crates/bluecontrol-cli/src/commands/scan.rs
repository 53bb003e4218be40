//! Scan command implementation.

use std::fmt::Write as _;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use bluecontrol_core::{PeripheralHandle, SessionConfig};

use crate::config::Config;
use crate::util::{open_session, write_output};

pub async fn cmd_scan(
    timeout: u64,
    session_config: SessionConfig,
    json: bool,
    output: Option<&PathBuf>,
    quiet: bool,
    config: &Config,
) -> Result<()> {
    let session = open_session(session_config).await?;
    if !quiet {
        eprintln!("Scanning for {}s...", timeout);
    }

    session
        .handle
        .start_scan()
        .await
        .context("Failed to start scan")?;
    tokio::time::sleep(Duration::from_secs(timeout)).await;
    session.handle.stop_scan().await?;

    let devices = session.handle.snapshot().discovered;
    session.close().await?;

    let content = if json {
        serde_json::to_string_pretty(&devices)? + "\n"
    } else {
        format_scan_text(&devices, config, !quiet)
    };
    write_output(output, &content)
}

fn format_scan_text(devices: &[PeripheralHandle], config: &Config, tips: bool) -> String {
    let mut out = String::new();
    if devices.is_empty() {
        out.push_str("No devices found.\n");
        return out;
    }

    let _ = writeln!(out, "{:<40} {:<24} Alias", "Address", "Name");
    for device in devices {
        let alias = config
            .aliases
            .iter()
            .find(|(_, address)| device.matches_address(address))
            .map(|(name, _)| name.as_str())
            .unwrap_or("-");
        let _ = writeln!(
            out,
            "{:<40} {:<24} {}",
            device.address(),
            device.name().unwrap_or("Unknown"),
            alias
        );
    }
    if tips {
        out.push_str("\nSave a device with: bluecontrol alias set <name> <address>\n");
    }
    out
}
