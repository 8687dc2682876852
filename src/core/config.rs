//! Configuration management

use clap::{Parser, Subcommand};
use config::{Config as ConfigBuilder, ConfigBuilder as Builder, ConfigError as BuilderError, Environment, File};
use config::builder::DefaultState;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::plugin::permissions::{Capability, PermissionPolicy};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid catalog configuration: {0}")]
    InvalidCatalog(String),

    #[error("Invalid network configuration: {0}")]
    InvalidNetwork(String),

    #[error("Invalid permissions configuration: {0}")]
    InvalidPermissions(String),

    #[error("Invalid logging configuration: {0}")]
    InvalidLogging(String),

    #[error("Invalid storage configuration: {0}")]
    InvalidStorage(String),

    #[error("Failed to load configuration: {0}")]
    LoadError(String),

    #[error("Configuration file not found: {0}")]
    FileNotFound(String),
}

impl From<BuilderError> for ConfigError {
    fn from(err: BuilderError) -> Self {
        ConfigError::LoadError(err.to_string())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub catalog: CatalogConfig,
    pub network: NetworkConfig,
    pub permissions: PermissionsConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration with precedence: CLI args > Environment variables > Config file > Defaults
    pub fn load(cli_args: &CliArgs) -> Result<Self, ConfigError> {
        let mut builder = with_defaults(ConfigBuilder::builder())?;

        if let Some(config_path) = &cli_args.config {
            if !config_path.exists() {
                return Err(ConfigError::FileNotFound(
                    config_path.display().to_string(),
                ));
            }
            builder = builder.add_source(File::from(config_path.as_path()));
        }

        // Example: CATALOGS_CATALOG__INDEX_URL=https://...
        builder = builder.add_source(
            Environment::with_prefix("CATALOGS")
                .separator("__")
                .try_parsing(true),
        );

        if let Some(index_url) = &cli_args.index_url {
            builder = builder.set_override("catalog.index_url", index_url.clone())?;
        }
        if let Some(data_dir) = &cli_args.data_dir {
            builder = builder.set_override("storage.data_dir", data_dir.display().to_string())?;
        }
        if let Some(cache_dir) = &cli_args.cache_dir {
            builder = builder.set_override("storage.cache_dir", cache_dir.display().to_string())?;
        }
        if let Some(log_level) = &cli_args.log_level {
            builder = builder.set_override("logging.level", log_level.clone())?;
        }

        let config: Config = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path, on top of defaults
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let config: Config = with_defaults(ConfigBuilder::builder())?
            .add_source(File::from(path))
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Defaults only
    pub fn defaults() -> Result<Self, ConfigError> {
        let config: Config = with_defaults(ConfigBuilder::builder())?
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate all configuration parameters
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.catalog.validate()?;
        self.network.validate()?;
        self.permissions.validate()?;
        self.storage.validate()?;
        self.logging.validate()?;
        Ok(())
    }
}

fn with_defaults(builder: Builder<DefaultState>) -> Result<Builder<DefaultState>, ConfigError> {
    Ok(builder
        .set_default("catalog.index_url", "https://catalogs.example.org/index.json")?
        .set_default("catalog.sync_interval_secs", 21600)? // 6 hours
        .set_default("catalog.install_timeout_secs", 120)?
        .set_default("catalog.auto_install_new", true)?
        .set_default("catalog.auto_update", true)?
        .set_default("network.request_timeout_secs", 30)?
        .set_default("network.connect_timeout_secs", 10)?
        .set_default("network.allow_localhost", false)?
        .set_default("network.user_agent", concat!("reader-catalogs/", env!("CARGO_PKG_VERSION")))?
        .set_default("network.max_icon_bytes", 2097152)? // 2 MB
        .set_default("network.max_package_bytes", 67108864)? // 64 MB
        .set_default("permissions.auto_grant", vec!["NETWORK", "STORAGE"])?
        .set_default("storage.data_dir", default_dir(dirs::data_dir(), "./data"))?
        .set_default("storage.cache_dir", default_dir(dirs::cache_dir(), "./cache"))?
        .set_default("logging.level", "info")?
        .set_default("logging.format", "text")?
        .set_default("logging.output", "stdout")?)
}

/// Platform directory joined with the application name, else a relative fallback
fn default_dir(base: Option<PathBuf>, fallback: &str) -> String {
    base.map(|dir| dir.join("reader-catalogs").display().to_string())
        .unwrap_or_else(|| fallback.to_string())
}

/// Command-line arguments for configuration override
#[derive(Debug, Parser)]
#[command(name = "reader-catalogs")]
#[command(about = "Manage reader content catalogs", long_about = None)]
pub struct CliArgs {
    /// Path to configuration file (TOML, JSON or YAML)
    #[arg(short, long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    /// Remote catalog index URL
    #[arg(long, value_name = "URL", global = true)]
    pub index_url: Option<String>,

    /// Data directory (preferences, installed packages)
    #[arg(long, value_name = "DIR", global = true)]
    pub data_dir: Option<PathBuf>,

    /// Cache directory (icons)
    #[arg(long, value_name = "DIR", global = true)]
    pub cache_dir: Option<PathBuf>,

    /// Log level (debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Fetch the remote index and reconcile installed catalogs
    Sync,
    /// List known catalogs
    List {
        /// Only show catalogs for this language
        #[arg(long)]
        lang: Option<String>,
        /// Include catalogs that are available but not installed
        #[arg(long)]
        all: bool,
    },
    /// Install a catalog from the remote index
    Install { id: String },
    /// Update an installed catalog
    Update { id: String },
    /// Update every installed catalog with a newer remote version
    UpdateAll,
    /// Uninstall a catalog and clear its pin, permissions and icon
    Uninstall { id: String },
    /// Toggle the pinned flag of a catalog
    Pin { id: String },
    /// Statically validate a script plugin
    Validate {
        #[arg(long, value_name = "FILE")]
        script: PathBuf,
        /// Metadata JSON file
        #[arg(long, value_name = "FILE")]
        metadata: Option<PathBuf>,
    },
    /// Sync periodically until interrupted
    Watch,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CatalogConfig {
    pub index_url: String,
    pub sync_interval_secs: u64,
    pub install_timeout_secs: u64,
    pub auto_install_new: bool,
    pub auto_update: bool,
}

impl CatalogConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = url::Url::parse(&self.index_url)
            .map_err(|e| ConfigError::InvalidCatalog(format!("index_url is not a valid URL: {}", e)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidCatalog(
                "index_url must use http or https".to_string(),
            ));
        }

        if self.sync_interval_secs == 0 {
            return Err(ConfigError::InvalidCatalog("sync_interval_secs must be greater than 0".to_string()));
        }

        if self.install_timeout_secs == 0 {
            return Err(ConfigError::InvalidCatalog("install_timeout_secs must be greater than 0".to_string()));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkConfig {
    pub request_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub allow_localhost: bool,
    pub user_agent: String,
    pub max_icon_bytes: usize,
    /// Largest native bundle or script accepted from a package URL
    pub max_package_bytes: usize,
}

impl NetworkConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::InvalidNetwork("request_timeout_secs must be greater than 0".to_string()));
        }

        if self.connect_timeout_secs == 0 {
            return Err(ConfigError::InvalidNetwork("connect_timeout_secs must be greater than 0".to_string()));
        }

        if self.user_agent.trim().is_empty() {
            return Err(ConfigError::InvalidNetwork("user_agent cannot be empty".to_string()));
        }

        if self.max_icon_bytes < 8 {
            return Err(ConfigError::InvalidNetwork("max_icon_bytes must be at least 8".to_string()));
        }

        if self.max_package_bytes == 0 {
            return Err(ConfigError::InvalidNetwork("max_package_bytes must be greater than 0".to_string()));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PermissionsConfig {
    /// Capability names granted without a prompt the first time a plugin asks
    pub auto_grant: Vec<String>,
}

impl PermissionsConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for name in &self.auto_grant {
            if Capability::from_name(name).is_none() {
                return Err(ConfigError::InvalidPermissions(format!(
                    "unknown capability in auto_grant: {}",
                    name
                )));
            }
        }
        Ok(())
    }

    pub fn policy(&self) -> PermissionPolicy {
        PermissionPolicy::new(self.auto_grant.iter().filter_map(|n| Capability::from_name(n)))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    pub cache_dir: PathBuf,
}

impl StorageConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.data_dir.as_os_str().is_empty() {
            return Err(ConfigError::InvalidStorage("data_dir cannot be empty".to_string()));
        }

        if self.cache_dir.as_os_str().is_empty() {
            return Err(ConfigError::InvalidStorage("cache_dir cannot be empty".to_string()));
        }

        Ok(())
    }

    pub fn preferences_dir(&self) -> PathBuf {
        self.data_dir.join("preferences")
    }

    pub fn scripts_dir(&self) -> PathBuf {
        self.data_dir.join("scripts")
    }

    pub fn native_dir(&self) -> PathBuf {
        self.data_dir.join("native")
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
    pub output: String,
    pub log_file: Option<PathBuf>,
}

impl LoggingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.level.to_lowercase().as_str()) {
            return Err(ConfigError::InvalidLogging(
                format!("level must be one of: {:?}", valid_levels)
            ));
        }

        let valid_formats = ["json", "text"];
        if !valid_formats.contains(&self.format.as_str()) {
            return Err(ConfigError::InvalidLogging(
                format!("format must be one of: {:?}", valid_formats)
            ));
        }

        let valid_outputs = ["stdout", "file"];
        if !valid_outputs.contains(&self.output.as_str()) {
            return Err(ConfigError::InvalidLogging(
                format!("output must be one of: {:?}", valid_outputs)
            ));
        }

        if self.output == "file" && self.log_file.is_none() {
            return Err(ConfigError::InvalidLogging(
                "log_file must be specified when output is 'file'".to_string()
            ));
        }

        Ok(())
    }
}
