//! Config command implementation.

use anyhow::{Result, bail};
use bluecontrol_core::Dialect;

use crate::cli::{ConfigAction, ConfigKey};
use crate::config::{Config, DialectSetting, parse_number};

pub fn cmd_config(action: ConfigAction, quiet: bool) -> Result<()> {
    match action {
        ConfigAction::Path => {
            println!("{}", Config::path().display());
        }
        ConfigAction::Show => {
            let config = Config::load();
            print!("{}", toml::to_string_pretty(&config)?);
        }
        ConfigAction::Set { key, value } => {
            let mut config = Config::load();
            apply(&mut config, key, Some(&value))?;
            config.save()?;
            if !quiet {
                println!("Set {:?} = {}", key, value);
            }
        }
        ConfigAction::Unset { key } => {
            let mut config = Config::load();
            apply(&mut config, key, None)?;
            config.save()?;
            if !quiet {
                println!("Unset {:?}", key);
            }
        }
    }
    Ok(())
}

/// Set (`Some`) or clear (`None`) one key.
fn apply(config: &mut Config, key: ConfigKey, value: Option<&str>) -> Result<()> {
    match key {
        ConfigKey::Device => config.device = value.map(str::to_string),
        ConfigKey::Dialect => {
            config.dialect = match value {
                Some(name) => {
                    if Dialect::preset(name).is_none() {
                        bail!("Unknown dialect '{}'. Use 'legacy' or 'multi_channel'.", name);
                    }
                    Some(DialectSetting::Preset(name.trim().to_string()))
                }
                None => None,
            }
        }
        ConfigKey::Timeout => {
            config.timeout = value.map(|v| parse_number("timeout", v)).transpose()?
        }
        ConfigKey::SettleDelayMs => {
            config.settle_delay_ms = value
                .map(|v| parse_number("settle-delay-ms", v))
                .transpose()?
        }
        ConfigKey::ReconnectDelayMs => {
            config.reconnect_delay_ms = value
                .map(|v| parse_number("reconnect-delay-ms", v))
                .transpose()?
        }
        ConfigKey::MaxReconnectAttempts => {
            config.max_reconnect_attempts = value
                .map(|v| parse_number("max-reconnect-attempts", v))
                .transpose()?
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_numeric_keys() {
        let mut config = Config::default();
        apply(&mut config, ConfigKey::SettleDelayMs, Some("800")).unwrap();
        apply(&mut config, ConfigKey::MaxReconnectAttempts, Some("5")).unwrap();
        assert_eq!(config.settle_delay_ms, Some(800));
        assert_eq!(config.max_reconnect_attempts, Some(5));

        apply(&mut config, ConfigKey::SettleDelayMs, None).unwrap();
        assert_eq!(config.settle_delay_ms, None);
    }

    #[test]
    fn test_apply_rejects_bad_values() {
        let mut config = Config::default();
        assert!(apply(&mut config, ConfigKey::Timeout, Some("soon")).is_err());
        assert!(apply(&mut config, ConfigKey::Dialect, Some("v3")).is_err());
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_apply_dialect_preset() {
        let mut config = Config::default();
        apply(&mut config, ConfigKey::Dialect, Some("legacy")).unwrap();
        assert_eq!(
            config.dialect,
            Some(DialectSetting::Preset("legacy".to_string()))
        );
    }
}
