//! Filesystem locations for configuration and logs

use std::path::PathBuf;

use crate::constants::APP_NAME;

/// Root configuration directory (`~/.specdraft`)
pub fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(format!(".{}", APP_NAME))
}

/// Default configuration file
pub fn config_file() -> PathBuf {
    config_dir().join("config.toml")
}

/// Log directory
pub fn logs_dir() -> PathBuf {
    config_dir().join("logs")
}

/// Log file written by the CLI
pub fn log_file() -> PathBuf {
    logs_dir().join(format!("{}.log", APP_NAME))
}
