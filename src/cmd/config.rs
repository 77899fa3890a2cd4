//! Configuration view and validation commands — `specdash config`.

use anyhow::Result;
use std::path::Path;

use specdash::config::DashboardConfig;

use super::super::ConfigCommands;

pub fn cmd_config(
    config: &DashboardConfig,
    explicit: Option<&Path>,
    command: Option<ConfigCommands>,
) -> Result<()> {
    let config_path = explicit
        .map(Path::to_path_buf)
        .or_else(DashboardConfig::default_path);

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("Specdash Configuration");
            println!("======================");
            println!();
            match &config_path {
                Some(path) if path.exists() => println!("Config file: {}", path.display()),
                Some(path) => println!("No config file at {} (using defaults)", path.display()),
                None => println!("No config directory available (using defaults)"),
            }
            println!();
            println!("Effective values (with env overrides):");
            println!();
            print!("{}", config.to_toml()?);
            println!();
            println!("operator = \"{}\"", config.operator_name());
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
    }

    Ok(())
}
