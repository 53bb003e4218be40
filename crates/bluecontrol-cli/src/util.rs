//! Utility functions for CLI operations.

use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use bluecontrol_core::{
    BtleplugPlatform, Collaborators, DeviceSession, PeripheralHandle, SessionConfig,
    SessionHandle, SessionState,
};

use crate::config::{Config, ConfigAddressStore};

/// Get device identifier, with helpful error message.
pub fn require_device(device: Option<String>) -> Result<String> {
    device.ok_or_else(|| {
        anyhow::anyhow!(
            "No device specified. Use --device <ADDRESS> or set BLUECONTROL_DEVICE environment variable.\n\
             Run 'bluecontrol scan' to find nearby devices."
        )
    })
}

/// A running session on the system adapter, plus the store that records the
/// connected device in the config file.
pub struct CliSession {
    pub handle: SessionHandle,
    store: Arc<ConfigAddressStore>,
}

/// Start a session on the first Bluetooth adapter.
pub async fn open_session(config: SessionConfig) -> Result<CliSession> {
    let platform = BtleplugPlatform::new()
        .await
        .context("Failed to open Bluetooth adapter")?;
    let store = Arc::new(ConfigAddressStore::new(Config::path()));
    let collaborators = Collaborators::new().store(store.clone());
    let handle = DeviceSession::spawn(Arc::new(platform), config, collaborators)
        .await
        .context("Failed to start session")?;
    Ok(CliSession { handle, store })
}

impl CliSession {
    /// Scan until `address` is seen, then connect and wait for the session to
    /// become ready.
    pub async fn connect_ready(&self, address: &str, timeout: Duration) -> Result<PeripheralHandle> {
        let session = &self.handle;
        session.start_scan().await.context("Failed to start scan")?;
        let found = session
            .wait_for(timeout, |s| {
                s.discovered.iter().any(|d| d.matches_address(address))
            })
            .await
            .with_context(|| {
                format!(
                    "Device {} not found. Make sure it is powered on and in range.",
                    address
                )
            })?;
        session.stop_scan().await.context("Failed to stop scan")?;

        let device = found
            .discovered
            .iter()
            .find(|d| d.matches_address(address))
            .cloned()
            .unwrap_or_else(|| PeripheralHandle::new(address));
        self.store.set_name(device.name().map(str::to_string));

        tracing::info!("Connecting to {}", device);
        session
            .connect(&device)
            .await
            .with_context(|| format!("Failed to connect to {}", device))?;
        session
            .wait_for_state(SessionState::Ready, timeout)
            .await
            .with_context(|| format!("{} did not become ready", device))?;
        Ok(device)
    }

    /// Disconnect and stop the session task.
    pub async fn close(self) -> Result<()> {
        self.handle
            .shutdown()
            .await
            .context("Failed to close session")
    }
}

/// Write output to file or stdout.
pub fn write_output(output: Option<&PathBuf>, content: &str) -> Result<()> {
    match output {
        Some(path) => {
            std::fs::write(path, content)
                .with_context(|| format!("Failed to write to {}", path.display()))?;
        }
        None => {
            print!("{}", content);
            io::stdout().flush()?;
        }
    }
    Ok(())
}
