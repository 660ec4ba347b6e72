use crate::models::WardenConfig;
use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use config::{Config, Environment, File, FileFormat};
use std::fs;
use thiserror::Error;

/// Prefix for environment overrides, e.g. `WARDEN_SCHEDULE__RESTART_INTERVAL_SECS`.
pub const ENV_PREFIX: &str = "WARDEN";

/// Fatal configuration problems detected before the supervisor starts.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{what} not found: {path}")]
    MissingPath {
        what: &'static str,
        path: Utf8PathBuf,
    },

    #[error("invalid value for {key}: {reason}")]
    InvalidValue { key: &'static str, reason: String },

    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
}

/// Configuration manager for the warden's YAML settings file.
///
/// Manages the files that live in the configuration directory:
/// - Settings (`Warden.yaml`): server, mods, schedule, updater and announcer sections
/// - Credentials (`Credentials.yaml`): owned by [`FileCredentialStore`](crate::services::FileCredentialStore)
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config_dir: Utf8PathBuf,
    settings_path: Utf8PathBuf,
    credentials_path: Utf8PathBuf,
}

impl ConfigManager {
    /// Create a new ConfigManager with the specified configuration directory.
    ///
    /// The directory is created if it doesn't exist.
    pub fn new<P: AsRef<Utf8Path>>(config_dir: P) -> Result<Self> {
        let config_dir = config_dir.as_ref().to_path_buf();

        if !config_dir.exists() {
            fs::create_dir_all(&config_dir)
                .with_context(|| format!("Failed to create config directory: {}", config_dir))?;
        }

        Ok(Self {
            settings_path: config_dir.join("Warden.yaml"),
            credentials_path: config_dir.join("Credentials.yaml"),
            config_dir,
        })
    }

    /// Load the settings file, layered under `WARDEN_*` environment variables.
    ///
    /// A missing file is not an error; every field falls back to its default.
    pub fn load_config(&self) -> Result<WardenConfig> {
        if !self.settings_path.exists() {
            tracing::warn!(
                "Settings file not found at {}, using defaults",
                self.settings_path
            );
        }

        let config: WardenConfig = Config::builder()
            .add_source(
                File::new(self.settings_path.as_str(), FileFormat::Yaml).required(false),
            )
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(|c| c.try_deserialize::<WardenConfig>())
            .map_err(ConfigError::from)
            .with_context(|| format!("Failed to load settings: {}", self.settings_path))?;

        tracing::info!("Loaded settings from {}", self.settings_path);
        Ok(config)
    }

    /// Save the settings file.
    pub fn save_config(&self, config: &WardenConfig) -> Result<()> {
        let yaml_string =
            serde_yaml_ng::to_string(config).context("Failed to serialize settings to YAML")?;

        fs::write(&self.settings_path, yaml_string)
            .with_context(|| format!("Failed to write settings: {}", self.settings_path))?;

        tracing::info!("Saved settings to {}", self.settings_path);
        Ok(())
    }

    /// Write a default settings file for the operator to fill in, unless one exists.
    ///
    /// Returns `true` if a new file was written.
    pub fn write_default_if_missing(&self) -> Result<bool> {
        if self.settings_path.exists() {
            return Ok(false);
        }

        self.save_config(&WardenConfig::default())?;
        Ok(true)
    }

    /// Get the configuration directory path.
    pub fn config_dir(&self) -> &Utf8Path {
        &self.config_dir
    }

    pub fn settings_path(&self) -> &Utf8Path {
        &self.settings_path
    }

    pub fn credentials_path(&self) -> &Utf8Path {
        &self.credentials_path
    }
}
