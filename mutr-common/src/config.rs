//! Configuration file loading and data folder resolution
//!
//! Resolution order used by every MUTR service:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. TOML config file
//! 4. OS-dependent compiled default (fallback)
//!
//! A missing TOML file is never fatal: the service logs a warning and
//! continues on defaults. A TOML file that exists but fails to parse is an
//! error, since silently ignoring a typo would hide misconfiguration.

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Directory name used under the platform config/data directories
const APP_DIR: &str = "mutr";

/// Logging section shared by all service TOML files
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `tracing` filter directive, e.g. "info" or "mutr_node=debug"
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Resolve the data folder (holds the SQLite database)
pub fn resolve_root_folder(
    cli_arg: Option<&Path>,
    env_var_name: &str,
    toml_value: Option<&Path>,
) -> PathBuf {
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }

    if let Ok(path) = std::env::var(env_var_name) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }

    if let Some(path) = toml_value {
        return path.to_path_buf();
    }

    get_default_root_folder()
}

/// Default location of a service's TOML file, if one can be found
///
/// Linux checks `~/.config/mutr/<file>` then `/etc/mutr/<file>`; other
/// platforms use the user config directory only.
pub fn default_config_path(file_name: &str) -> Option<PathBuf> {
    let user_config = dirs::config_dir().map(|d| d.join(APP_DIR).join(file_name));

    if cfg!(target_os = "linux") {
        if let Some(path) = &user_config {
            if path.exists() {
                return user_config;
            }
        }
        let system_config = PathBuf::from("/etc").join(APP_DIR).join(file_name);
        if system_config.exists() {
            return Some(system_config);
        }
        return None;
    }

    user_config.filter(|p| p.exists())
}

/// Where a service's configuration comes from
///
/// Located before tracing is installed, so the outcome is kept and logged
/// once the subscriber exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    /// An existing TOML file
    File(PathBuf),
    /// An explicitly requested file that does not exist
    Missing(PathBuf),
    /// Nothing requested and nothing found in the standard locations
    Defaults,
}

impl ConfigSource {
    /// Resolve an explicit `--config` path, else the standard locations
    pub fn locate(explicit: Option<&Path>, file_name: &str) -> Self {
        match explicit {
            Some(path) if path.exists() => ConfigSource::File(path.to_path_buf()),
            Some(path) => ConfigSource::Missing(path.to_path_buf()),
            None => default_config_path(file_name)
                .map_or(ConfigSource::Defaults, ConfigSource::File),
        }
    }

    /// File to load, if there is one
    pub fn file(&self) -> Option<&Path> {
        match self {
            ConfigSource::File(path) => Some(path),
            _ => None,
        }
    }

    /// Report the outcome; call after the tracing subscriber is installed
    pub fn log(&self, file_name: &str) {
        match self {
            ConfigSource::File(path) => info!("Config: {}", path.display()),
            ConfigSource::Missing(path) => warn!(
                "Config file {} not found, using compiled defaults",
                path.display()
            ),
            ConfigSource::Defaults => warn!("No {} found, using compiled defaults", file_name),
        }
    }
}

/// Load a TOML file into `T`, falling back to `T::default()` when absent
pub fn load_toml_config<T>(path: &Path) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    if !path.exists() {
        warn!(
            "Config file {} not found, using compiled defaults",
            path.display()
        );
        return Ok(T::default());
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read TOML failed ({}): {}", path.display(), e)))?;

    let config = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse TOML failed ({}): {}", path.display(), e)))?;

    info!("Loaded configuration from {}", path.display());
    Ok(config)
}

/// Write a TOML file atomically (temp file + rename)
pub fn write_toml_config<T: Serialize>(config: &T, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Serialize TOML failed: {}", e)))?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let temp_path = path.with_extension("toml.tmp");
    std::fs::write(&temp_path, content)?;
    std::fs::rename(&temp_path, path)?;

    Ok(())
}

/// Get OS-dependent default data folder path
pub fn get_default_root_folder() -> PathBuf {
    if cfg!(target_os = "linux") {
        // ~/.local/share/mutr (or /var/lib/mutr for system-wide)
        dirs::data_local_dir()
            .map(|d| d.join(APP_DIR))
            .unwrap_or_else(|| PathBuf::from("/var/lib/mutr"))
    } else if cfg!(target_os = "macos") {
        dirs::data_dir()
            .map(|d| d.join(APP_DIR))
            .unwrap_or_else(|| PathBuf::from("/Library/Application Support/mutr"))
    } else if cfg!(target_os = "windows") {
        dirs::data_local_dir()
            .map(|d| d.join(APP_DIR))
            .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\mutr"))
    } else {
        PathBuf::from("./mutr_data")
    }
}
