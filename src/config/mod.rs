//! Configuration management for the capture monitor.
//!
//! This module handles loading and managing application configuration
//! from environment variables and configuration files.

use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use std::env;

use crate::models::Config;

/// Load configuration from a config file and environment variables
pub fn load_config() -> Result<Config, ConfigError> {
    let config_file = env::var("CONFIG_FILE").unwrap_or_else(|_| "config/default.toml".to_string());

    let config = ConfigBuilder::builder()
        .add_source(File::with_name(&config_file).required(false))
        .add_source(Environment::default().separator("__"))
        .set_default("capture.tool_path", "tshark")?
        .set_default("capture.interface", "1")?
        .set_default("capture.filter", "")?
        .set_default("capture.event_buffer", 1024)?
        .set_default("detection.per_source_threshold", 100)?
        .set_default("detection.aggregate_threshold", 1000)?
        .set_default("detection.window_millis", 1000)?
        .set_default("mitigation.auto_block", true)?
        .set_default("mitigation.simple_mode", true)?
        .set_default("mitigation.block_delay_secs", 5)?
        .set_default("mitigation.dry_run", false)?
        .set_default("mitigation.retain_failed_undo", false)?
        .set_default("mitigation.log_file", "mitigation.log")?
        .set_default("controller.debounce_millis", 800)?
        .build()?;

    config.try_deserialize()
}
