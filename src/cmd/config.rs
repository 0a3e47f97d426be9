//! Configuration view and validation commands (`dashlink config`).

use anyhow::Result;
use std::path::Path;

use dashlink::config::{ClientConfig, DEFAULT_CONFIG_FILE};

use super::super::ConfigCommands;

pub fn cmd_config(
    config: &ClientConfig,
    config_path: Option<&Path>,
    command: Option<ConfigCommands>,
) -> Result<()> {
    let config_path = config_path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_FILE));

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("Dashlink Configuration");
            println!("======================");
            println!();

            if config_path.exists() {
                println!("Config file: {}", config_path.display());
            } else {
                println!("No config file at {} (using defaults)", config_path.display());
            }
            println!();

            println!("Effective values (with env/CLI overrides):");
            println!("[api]");
            println!("  base_url = \"{}\"", config.api.base_url);
            println!("  refresh_path = \"{}\"", config.api.refresh_path);
            println!("  request_timeout_secs = {}", config.api.request_timeout_secs);
            println!();
            println!("[channel]");
            println!("  endpoint = \"{}\"", config.channel.endpoint);
            println!("  reconnect_delay_ms = {}", config.channel.reconnect_delay_ms);
            println!(
                "  max_reconnect_attempts = {}",
                config.channel.max_reconnect_attempts
            );
            println!();
            println!("[session]");
            match config.credentials_path() {
                Some(path) => println!("  credentials_file = \"{}\"", path.display()),
                None => println!("  credentials_file = (in memory only)"),
            }
            println!();
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            let warnings = config.validate();
            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
            println!();
        }
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                println!("Config file already exists at {}", config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }

            ClientConfig::default().save(config_path)?;

            println!("Created {}", config_path.display());
            println!();
            println!("You can now customize:");
            println!("  - [api] base_url, refresh_path, request_timeout_secs");
            println!("  - [channel] endpoint, reconnect_delay_ms, max_reconnect_attempts");
            println!("  - [session] credentials_file");
            println!();
        }
    }

    Ok(())
}
