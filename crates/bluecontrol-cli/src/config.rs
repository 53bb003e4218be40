//! Configuration file management.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use bluecontrol_core::protocol::TokenCase;
use bluecontrol_core::{AddressStore, Dialect, ReconnectPolicy, SessionConfig};
use serde::{Deserialize, Serialize};

use crate::cli::DialectArg;

/// Dialect as written in the config file: either a preset name or a full table.
///
/// ```toml
/// dialect = "legacy"
///
/// # or
/// [dialect]
/// layout = "per_parameter"
/// token_case = "upper"
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DialectSetting {
    Preset(String),
    Table(Dialect),
}

impl DialectSetting {
    pub fn resolve(&self) -> Result<Dialect> {
        match self {
            Self::Preset(name) => Dialect::preset(name)
                .with_context(|| format!("Unknown dialect preset '{}'", name)),
            Self::Table(dialect) => Ok(dialect.clone()),
        }
    }
}

/// Configuration file structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Default device address
    #[serde(default)]
    pub device: Option<String>,

    /// Firmware dialect
    #[serde(default)]
    pub dialect: Option<DialectSetting>,

    /// Timeout in seconds
    #[serde(default)]
    pub timeout: Option<u64>,

    /// Delay between link-up and service discovery, in milliseconds
    #[serde(default)]
    pub settle_delay_ms: Option<u64>,

    /// Delay before reconnecting after a drop, in milliseconds
    #[serde(default)]
    pub reconnect_delay_ms: Option<u64>,

    /// Maximum consecutive reconnect attempts (unlimited if unset)
    #[serde(default)]
    pub max_reconnect_attempts: Option<u32>,

    /// Device aliases (friendly name -> device address)
    #[serde(default)]
    pub aliases: HashMap<String, String>,

    /// Last successfully connected device (auto-updated)
    #[serde(default)]
    pub last_device: Option<String>,

    /// Name of the last connected device (for display)
    #[serde(default)]
    pub last_device_name: Option<String>,
}

impl Config {
    /// Get the config file path
    pub fn path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("bluecontrol")
            .join("config.toml")
    }

    /// Load config from the default path, or return default if not found
    pub fn load() -> Self {
        Self::load_from(&Self::path())
    }

    /// Load config from `path`, or return default if missing or unreadable
    pub fn load_from(path: &Path) -> Self {
        if path.exists() {
            match fs::read_to_string(path) {
                Ok(content) => match toml::from_str(&content) {
                    Ok(config) => return config,
                    Err(e) => {
                        tracing::warn!("Failed to parse config {}: {}", path.display(), e);
                    }
                },
                Err(e) => {
                    tracing::warn!("Failed to read config {}: {}", path.display(), e);
                }
            }
        }
        Self::default()
    }

    /// Save config to the default path
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::path())
    }

    /// Save config to `path`
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, content)
            .with_context(|| format!("Failed to write config: {}", path.display()))?;
        Ok(())
    }

    /// Build a session config from the file, with command-line overrides applied.
    pub fn session_config(
        &self,
        dialect: Option<DialectArg>,
        uppercase: bool,
    ) -> Result<SessionConfig> {
        let mut resolved = match dialect {
            Some(DialectArg::Legacy) => Dialect::legacy(),
            Some(DialectArg::MultiChannel) => Dialect::multi_channel(),
            None => match &self.dialect {
                Some(setting) => setting.resolve()?,
                None => Dialect::default(),
            },
        };
        if uppercase {
            resolved = resolved.token_case(TokenCase::Upper);
        }

        let mut reconnect = match self.reconnect_delay_ms {
            Some(ms) => ReconnectPolicy::fixed_delay(Duration::from_millis(ms)),
            None => ReconnectPolicy::default(),
        };
        if let Some(max) = self.max_reconnect_attempts {
            reconnect = reconnect.max_attempts(max);
        }

        let mut config = SessionConfig::new().dialect(resolved).reconnect(reconnect);
        if let Some(ms) = self.settle_delay_ms {
            config = config.settle_delay(Duration::from_millis(ms));
        }
        config
            .validate()
            .context("Invalid session settings in config")?;
        Ok(config)
    }
}

/// Parse a `config set` value for a numeric key.
pub fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    match value.trim().parse() {
        Ok(n) => Ok(n),
        Err(_) => bail!("Invalid value for {}: '{}' is not a number", key, value),
    }
}

/// Resolve an alias to its device address, or return the original if not an alias.
pub fn resolve_alias(device: &str, config: &Config) -> String {
    config
        .aliases
        .get(device)
        .cloned()
        .unwrap_or_else(|| device.to_string())
}

/// Print device source feedback (e.g., "Using last connected device: ...").
pub fn print_device_source_feedback(device: &str, source: Option<&str>, quiet: bool) {
    if quiet {
        return;
    }
    match source {
        Some("default") => eprintln!("Using default device: {}", device),
        Some("last") => eprintln!("Using last connected device: {}", device),
        _ => {}
    }
}

/// Get info about whether we're using a fallback device.
/// Returns (device_identifier, fallback_source) where fallback_source is:
/// - None if device was explicitly provided
/// - Some("default") if using default device
/// - Some("last") if using last connected device
pub fn get_device_source(
    device: Option<&str>,
    config: &Config,
) -> (Option<String>, Option<&'static str>) {
    if let Some(d) = device {
        (Some(resolve_alias(d, config)), None)
    } else if let Some(d) = &config.device {
        (Some(d.clone()), Some("default"))
    } else if let Some(d) = &config.last_device {
        (Some(d.clone()), Some("last"))
    } else {
        (None, None)
    }
}

/// Resolve timeout: use provided value, fall back to config, then default
pub fn resolve_timeout(cmd_timeout: u64, config: &Config, default: u64) -> u64 {
    if cmd_timeout != default {
        cmd_timeout
    } else {
        config.timeout.unwrap_or(default)
    }
}

/// Address store that records the last connected device in the config file.
#[derive(Debug)]
pub struct ConfigAddressStore {
    path: PathBuf,
    name: Mutex<Option<String>>,
}

impl ConfigAddressStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            name: Mutex::new(None),
        }
    }

    /// Name saved next to the address on the next link-up.
    pub fn set_name(&self, name: Option<String>) {
        *self.name.lock().unwrap_or_else(PoisonError::into_inner) = name;
    }
}

impl AddressStore for ConfigAddressStore {
    fn save(&self, _key: &str, value: &str) -> bluecontrol_core::Result<()> {
        let mut config = Config::load_from(&self.path);
        config.last_device = Some(value.to_string());
        config.last_device_name = self
            .name
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        config
            .save_to(&self.path)
            .map_err(|e| io::Error::other(format!("{e:#}")))?;
        Ok(())
    }
}
