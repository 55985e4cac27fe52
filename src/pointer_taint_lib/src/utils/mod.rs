//! This module contains various utility modules and helper functions.

pub mod log;

use crate::prelude::*;

/// The configuration file bundled with the library.
/// Used whenever the user did not provide a configuration file.
pub const DEFAULT_CONFIG: &str = include_str!("../config.json");

/// Get the contents of a configuration file.
///
/// If `filename` is given, that file is read.
/// Otherwise the file `config.json` in the configuration directory of the user is read if it exists
/// and the bundled default configuration is used if it does not.
pub fn read_config_file(filename: Option<&str>) -> Result<serde_json::Value, Error> {
    if let Some(filename) = filename {
        let config_file = std::fs::read_to_string(filename)
            .with_context(|| format!("Could not read configuration file {}", filename))?;
        return serde_json::from_str(&config_file)
            .with_context(|| format!("Configuration file {} is not valid JSON", filename));
    }
    let project_dirs = directories::ProjectDirs::from("", "", "pointer_taint")
        .context("Could not discern location of configuration files.")?;
    let config_path = project_dirs.config_dir().join("config.json");
    match std::fs::read_to_string(&config_path) {
        Ok(config_file) => serde_json::from_str(&config_file).with_context(|| {
            format!(
                "Configuration file {} is not valid JSON",
                config_path.display()
            )
        }),
        Err(_) => Ok(serde_json::from_str(DEFAULT_CONFIG)?),
    }
}
