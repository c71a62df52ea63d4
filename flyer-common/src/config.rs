//! Configuration loading and root folder resolution
//!
//! Root folder priority order:
//! 1. Command-line argument (highest priority)
//! 2. `FLYER_ROOT_FOLDER` environment variable
//! 3. TOML config file (`root_folder` key)
//! 4. OS-dependent compiled default (fallback)

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Environment variable overriding the root folder
pub const ROOT_FOLDER_ENV: &str = "FLYER_ROOT_FOLDER";

/// Database file name inside the root folder
pub const DATABASE_FILE_NAME: &str = "flyer.db";

/// Logging section of the TOML config
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive (e.g. "info", "flyer_resolver=debug")
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// `[resolver]` section of the TOML config
///
/// Every field is optional; missing values fall back to the resolver defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResolverSettings {
    pub acceptance_threshold: Option<f64>,
    pub max_candidates: Option<usize>,
    pub product_timeout_secs: Option<u64>,
    pub search_timeout_secs: Option<u64>,
    pub validation_timeout_secs: Option<u64>,
}

/// On-disk TOML configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TomlConfig {
    pub root_folder: Option<PathBuf>,
    #[serde(default)]
    pub logging: LoggingConfig,
    pub google_api_key: Option<String>,
    pub google_search_engine_id: Option<String>,
    pub gemini_api_key: Option<String>,
    #[serde(default)]
    pub resolver: ResolverSettings,
}

/// Default location of a module's TOML file: `<config_dir>/flyer/<module>.toml`
pub fn default_config_path(module_name: &str) -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("flyer").join(format!("{}.toml", module_name)))
}

/// Load a TOML config file
///
/// A missing file is not an error: defaults are returned and a warning logged.
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    if !path.exists() {
        warn!("Config file not found at {}, using defaults", path.display());
        return Ok(TomlConfig::default());
    }

    let content = std::fs::read_to_string(path)?;
    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse TOML {} failed: {}", path.display(), e)))
}

/// Write a TOML config file atomically (temp file + rename)
pub fn write_toml_config(config: &TomlConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Serialize TOML failed: {}", e)))?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let tmp_path = path.with_extension("toml.tmp");
    std::fs::write(&tmp_path, content)?;
    std::fs::rename(&tmp_path, path)?;

    debug!("TOML config written to {}", path.display());
    Ok(())
}

/// Resolves the root folder following the documented priority order
#[derive(Debug, Clone)]
pub struct RootFolderResolver {
    module_name: String,
    cli_arg: Option<PathBuf>,
    config_path: Option<PathBuf>,
}

impl RootFolderResolver {
    pub fn new(module_name: impl Into<String>) -> Self {
        let module_name = module_name.into();
        let config_path = default_config_path(&module_name);
        Self {
            module_name,
            cli_arg: None,
            config_path,
        }
    }

    /// Highest-priority override from the command line
    pub fn with_cli_arg(mut self, path: Option<PathBuf>) -> Self {
        self.cli_arg = path;
        self
    }

    /// Use a specific TOML file instead of the platform default
    pub fn with_config_path(mut self, path: PathBuf) -> Self {
        self.config_path = Some(path);
        self
    }

    pub fn resolve(&self) -> PathBuf {
        if let Some(path) = &self.cli_arg {
            info!("Root folder from command line: {}", path.display());
            return path.clone();
        }

        if let Ok(path) = std::env::var(ROOT_FOLDER_ENV) {
            if !path.trim().is_empty() {
                info!("Root folder from {}: {}", ROOT_FOLDER_ENV, path);
                return PathBuf::from(path);
            }
        }

        if let Some(config_path) = &self.config_path {
            match load_toml_config(config_path) {
                Ok(TomlConfig {
                    root_folder: Some(path),
                    ..
                }) => {
                    info!("Root folder from {}: {}", config_path.display(), path.display());
                    return path;
                }
                Ok(_) => {}
                Err(e) => warn!("Ignoring unreadable config for {}: {}", self.module_name, e),
            }
        }

        let fallback = default_root_folder();
        info!("Root folder from compiled default: {}", fallback.display());
        fallback
    }
}

/// Creates the root folder and locates the database inside it
#[derive(Debug, Clone)]
pub struct RootFolderInitializer {
    root_folder: PathBuf,
}

impl RootFolderInitializer {
    pub fn new(root_folder: PathBuf) -> Self {
        Self { root_folder }
    }

    pub fn ensure_directory_exists(&self) -> Result<()> {
        if !self.root_folder.exists() {
            info!("Creating root folder {}", self.root_folder.display());
        }
        std::fs::create_dir_all(&self.root_folder)?;
        Ok(())
    }

    pub fn database_path(&self) -> PathBuf {
        self.root_folder.join(DATABASE_FILE_NAME)
    }
}

/// OS-dependent default root folder
pub fn default_root_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("flyer"))
        .unwrap_or_else(|| PathBuf::from("./flyer_data"))
}
