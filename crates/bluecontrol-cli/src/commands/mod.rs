//! Command implementations for the CLI.

use std::path::PathBuf;
use std::time::Duration;

use bluecontrol_core::SessionConfig;

mod alias;
mod config;
mod get;
mod scan;
mod send;
mod set;
mod watch;

pub use alias::cmd_alias;
pub use config::cmd_config;
pub use get::cmd_get;
pub use scan::cmd_scan;
pub use send::cmd_send;
pub use set::cmd_set;
pub use watch::cmd_watch;

/// Everything a command needs to reach one device.
#[derive(Debug, Clone)]
pub struct DeviceOptions<'a> {
    /// Resolved device address
    pub address: String,
    /// Timeout for scanning, connecting and each reply
    pub timeout: Duration,
    /// Session settings from config and flags
    pub session: SessionConfig,
    pub json: bool,
    pub quiet: bool,
    pub output: Option<&'a PathBuf>,
}
