//! Config command implementations

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::output::{print_error, print_info, print_success, print_warning};
use rb_core::config::{self, BridgeConfig};

/// Config file to use: the `--config` flag or the default location
pub fn resolve_config_path(config_path: Option<&PathBuf>) -> PathBuf {
    config_path
        .cloned()
        .unwrap_or_else(config::default_config_path)
}

/// Load the bridge configuration, falling back to defaults when no file exists
pub fn load_bridge_config(config_path: Option<&PathBuf>) -> Result<BridgeConfig> {
    let path = resolve_config_path(config_path);
    let config: BridgeConfig = config::load_or_default(&path)
        .with_context(|| format!("Failed to load config from {:?}", path))?;
    tracing::debug!("Configuration loaded from {:?}", path);
    Ok(config)
}

/// Show current configuration
pub fn config_show(config_path: Option<&PathBuf>) -> Result<()> {
    let path = resolve_config_path(config_path);

    if !path.exists() {
        print_warning(&format!("No configuration file found at {:?}", path));
        print_info("Run 'remote-bridge config init' to create one. Defaults:");
        println!();
        println!("{}", toml::to_string_pretty(&BridgeConfig::default())?);
        return Ok(());
    }

    print_info(&format!("Configuration file: {:?}", path));
    println!();

    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;
    println!("{}", content);

    Ok(())
}

/// Write the default configuration
pub fn config_init(config_path: Option<&PathBuf>, force: bool) -> Result<()> {
    let config_file = resolve_config_path(config_path);

    if config_file.exists() && !force {
        print_error(&format!("Config file already exists: {:?}", config_file));
        print_info("Use --force to overwrite");
        return Ok(());
    }

    write_default_config(&config_file)?;
    print_success(&format!("Created configuration file: {:?}", config_file));
    Ok(())
}

fn write_default_config(path: &Path) -> Result<()> {
    config::save_config(path, &BridgeConfig::default())
        .with_context(|| format!("Failed to write config file: {:?}", path))
}

/// Print the config file path
pub fn config_path(config_path: Option<&PathBuf>) {
    println!("{}", resolve_config_path(config_path).display());
}
