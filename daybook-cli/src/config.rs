//! Configuration and on-disk state locations

use anyhow::{Context, Result};
use daybook_client::ClientConfig;
use std::path::{Path, PathBuf};

const APP_DIR: &str = "daybook";
const CONFIG_FILE: &str = "config.json";
const STORE_FILE: &str = "store.json";

/// Directory holding the config file and persisted client state
pub fn data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}

/// Default config file location
pub fn default_config_path() -> PathBuf {
    data_dir().join(CONFIG_FILE)
}

/// Location of the key-value store (token, last-success timestamp)
pub fn store_path() -> PathBuf {
    data_dir().join(STORE_FILE)
}

/// Loads the config file if present, then applies `DAYBOOK_*` overrides.
///
/// An explicitly given path must exist; the default path may be absent.
pub fn load(explicit: Option<&Path>) -> Result<ClientConfig> {
    let config = match explicit {
        Some(path) => ClientConfig::load(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => {
            let path = default_config_path();
            if path.exists() {
                ClientConfig::load(&path)
                    .with_context(|| format!("failed to load config from {}", path.display()))?
            } else {
                ClientConfig::default()
            }
        }
    };

    let config = config.apply_env().context("invalid DAYBOOK_* override")?;
    config.validate().context("invalid configuration")?;
    Ok(config)
}
