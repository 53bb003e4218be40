//! Alias command implementation.
//!
//! Manages friendly device names (aliases) that map to device addresses.

use anyhow::{Result, bail};

use crate::cli::AliasAction;
use crate::config::Config;

pub fn cmd_alias(action: AliasAction, quiet: bool) -> Result<()> {
    let mut config = Config::load();

    match action {
        AliasAction::List => {
            if config.aliases.is_empty() {
                if !quiet {
                    println!("No aliases configured.");
                    println!();
                    println!("Add an alias with: bluecontrol alias set <name> <address>");
                }
            } else {
                let mut aliases: Vec<_> = config.aliases.iter().collect();
                aliases.sort_by_key(|(name, _)| name.as_str());
                let width = aliases.iter().map(|(name, _)| name.len()).max().unwrap_or(0);
                for (name, address) in aliases {
                    println!("{:<width$}  {}", name, address, width = width);
                }
            }
        }
        AliasAction::Set { name, address } => {
            if looks_like_address(&name) {
                bail!(
                    "Alias name '{}' looks like a device address. \
                     Use a friendly name instead (e.g., 'bench', 'lab-amp').",
                    name
                );
            }

            let was_update = config.aliases.contains_key(&name);
            config.aliases.insert(name.clone(), address.clone());
            config.save()?;

            if !quiet {
                if was_update {
                    println!("Updated alias '{}' -> {}", name, address);
                } else {
                    println!("Added alias '{}' -> {}", name, address);
                }
            }
        }
        AliasAction::Remove { name } => {
            if config.aliases.remove(&name).is_some() {
                config.save()?;
                if !quiet {
                    println!("Removed alias '{}'", name);
                }
            } else {
                bail!("Alias '{}' not found", name);
            }
        }
    }

    Ok(())
}

/// Check if a string looks like a device address (MAC or UUID).
fn looks_like_address(s: &str) -> bool {
    let mac_pattern = s.chars().filter(|c| *c == ':' || *c == '-').count() >= 5
        && s.chars()
            .all(|c| c.is_ascii_hexdigit() || c == ':' || c == '-');

    let uuid_pattern = s.len() >= 32 && s.chars().all(|c| c.is_ascii_hexdigit() || c == '-');

    mac_pattern || uuid_pattern
}
