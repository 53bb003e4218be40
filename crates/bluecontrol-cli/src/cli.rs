//! CLI argument definitions using clap.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

/// Firmware dialect selectable from the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DialectArg {
    /// Single read channel, integer values, `Value:` prefixed notifications
    Legacy,
    /// One read channel per parameter, decimal values
    MultiChannel,
}

/// Reusable device connection arguments
#[derive(Debug, Clone, Args)]
pub struct DeviceArgs {
    /// Device address (MAC address or UUID) or alias, or use BLUECONTROL_DEVICE env var
    #[arg(short, long, env = "BLUECONTROL_DEVICE")]
    pub device: Option<String>,

    /// Timeout in seconds for scanning, connecting and replies
    #[arg(short = 'T', long, default_value = "30")]
    pub timeout: u64,
}

#[derive(Debug, Parser)]
#[command(name = "bluecontrol")]
#[command(author, version, about = "Control bluecontrol peripherals over BLE")]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Only print errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Print JSON instead of text
    #[arg(long, global = true)]
    pub json: bool,

    /// Write output to a file instead of stdout
    #[arg(short, long, global = true)]
    pub output: Option<PathBuf>,

    /// Firmware dialect (overrides config)
    #[arg(long, global = true, value_enum)]
    pub dialect: Option<DialectArg>,

    /// Send parameter tokens in upper case (`SET VOLTAGE 12.5`)
    #[arg(long, global = true)]
    pub uppercase: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Scan for nearby peripherals
    Scan {
        /// Scan duration in seconds
        #[arg(short, long, default_value = "10")]
        timeout: u64,
    },

    /// Request the current value of one parameter, or `all`
    Get {
        #[command(flatten)]
        device: DeviceArgs,

        /// Parameter name (current, voltage, frequency, l_freq, r_freq, volume) or `all`
        target: String,
    },

    /// Set a parameter and wait for the peripheral to confirm it
    Set {
        #[command(flatten)]
        device: DeviceArgs,

        /// Parameter name
        target: String,

        /// New value
        value: String,
    },

    /// Write a raw command string to the peripheral
    Send {
        #[command(flatten)]
        device: DeviceArgs,

        /// Command text, written verbatim
        message: String,
    },

    /// Print notifications and value changes as they arrive
    Watch {
        #[command(flatten)]
        device: DeviceArgs,

        /// Stop after this many messages (runs until Ctrl-C if omitted)
        #[arg(short = 'n', long)]
        count: Option<usize>,
    },

    /// Manage the configuration file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Manage device aliases
    Alias {
        #[command(subcommand)]
        action: AliasAction,
    },
}

#[derive(Debug, Subcommand)]
pub enum ConfigAction {
    /// Show the current configuration
    Show,
    /// Print the config file path
    Path,
    /// Set a configuration value
    Set {
        #[arg(value_enum)]
        key: ConfigKey,
        value: String,
    },
    /// Remove a configuration value
    Unset {
        #[arg(value_enum)]
        key: ConfigKey,
    },
}

/// Keys accepted by `config set` and `config unset`
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ConfigKey {
    /// Default device address
    Device,
    /// Dialect preset (legacy, multi_channel)
    Dialect,
    /// Default timeout in seconds
    Timeout,
    /// Delay between link-up and service discovery, in milliseconds
    SettleDelayMs,
    /// Delay before reconnecting after a drop, in milliseconds
    ReconnectDelayMs,
    /// Maximum consecutive reconnect attempts
    MaxReconnectAttempts,
}

#[derive(Debug, Subcommand)]
pub enum AliasAction {
    /// List all aliases
    List,
    /// Create or update an alias
    Set {
        /// Alias name
        name: String,
        /// Device address
        address: String,
    },
    /// Remove an alias
    #[command(alias = "rm")]
    Remove {
        /// Alias name
        name: String,
    },
}
