//! Init and Config commands.

use std::path::Path;

use super::print_json;
use crate::config::Settings;
use crate::io::{EntityType, Envelope, ResultCode};

/// Run init command - create configuration file under `root`.
pub fn run_init(root: &Path, force: bool, json: bool) -> u8 {
    match Settings::init_config_file(root, force) {
        Ok(path) => {
            if json {
                let data = serde_json::json!({ "path": path });
                return print_json(
                    &Envelope::success(data)
                        .with_entity_type(EntityType::Config)
                        .with_message("Created configuration file"),
                );
            }
            println!("Created configuration file at: {}", path.display());
            println!("Edit this file to customize your settings.");
            0
        }
        Err(e) => {
            let envelope: Envelope<()> = Envelope::error(ResultCode::ConfigError, e.to_string())
                .with_hint("Use --force to overwrite");
            if json {
                return print_json(&envelope);
            }
            eprintln!("Error: {e}");
            envelope.exit_code
        }
    }
}

/// Run config command - display current configuration.
pub fn run_config(config: &Settings, json: bool) -> u8 {
    if json {
        return print_json(&Envelope::success(config).with_entity_type(EntityType::Config));
    }

    println!("Current Configuration:");
    println!("{}", "=".repeat(50));
    match toml::to_string_pretty(config) {
        Ok(toml_str) => {
            println!("{toml_str}");
            0
        }
        Err(e) => {
            eprintln!("Error displaying config: {e}");
            ResultCode::ConfigError.exit_code()
        }
    }
}
