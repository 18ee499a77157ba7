use std::path::Path;

use peersync_core::SyncConfig;

use crate::cli::ConfigCommands;
use crate::commands::common::print_json;
use crate::error::CliError;

pub fn run_config(command: ConfigCommands, config_path: &Path) -> Result<(), CliError> {
    match command {
        ConfigCommands::Show => {
            let config = SyncConfig::load_from_path(config_path)?;
            println!("# {}", config_path.display());
            print_json(&config)
        }
        ConfigCommands::Init { force } => {
            init_config(config_path, force)?;
            println!("Wrote default config to {}", config_path.display());
            Ok(())
        }
    }
}

pub fn init_config(config_path: &Path, force: bool) -> Result<(), CliError> {
    if config_path.exists() && !force {
        return Err(CliError::Config(format!(
            "{} already exists (use --force to overwrite)",
            config_path.display()
        )));
    }
    SyncConfig::default().save_to_path(config_path)?;
    tracing::info!("Initialized config at {}", config_path.display());
    Ok(())
}
