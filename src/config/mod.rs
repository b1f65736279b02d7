use crate::models::AppConfig;
use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use config::{Config, Environment, File, FileFormat};
use std::collections::HashMap;
use std::fs;

/// Name of the configuration file inside the configuration directory.
pub const CONFIG_FILE: &str = "console-engine.yaml";

/// Prefix of environment overrides, e.g. `CONSOLE_ENGINE__ENGINE__POLL_DELAY_MS=500`.
pub const ENV_PREFIX: &str = "CONSOLE_ENGINE";

/// Loads and saves `console-engine.yaml`.
///
/// Values are layered: built-in defaults, then the YAML file (optional), then
/// `CONSOLE_ENGINE__<SECTION>__<KEY>` environment variables.
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config_dir: Utf8PathBuf,
    config_path: Utf8PathBuf,
}

impl ConfigManager {
    /// Create a manager rooted at `config_dir`, creating the directory if needed.
    pub fn new<P: AsRef<Utf8Path>>(config_dir: P) -> Result<Self> {
        let config_dir = config_dir.as_ref().to_path_buf();

        if !config_dir.exists() {
            fs::create_dir_all(&config_dir)
                .with_context(|| format!("Failed to create config directory: {}", config_dir))?;
        }

        Ok(Self {
            config_path: config_dir.join(CONFIG_FILE),
            config_dir,
        })
    }

    pub fn config_dir(&self) -> &Utf8Path {
        &self.config_dir
    }

    pub fn config_path(&self) -> &Utf8Path {
        &self.config_path
    }

    /// Load the configuration with overrides from the process environment.
    pub fn load(&self) -> Result<AppConfig> {
        self.load_layered(None)
    }

    /// Load the configuration with overrides from `vars` instead of the
    /// process environment. Keys use the same `CONSOLE_ENGINE__...` form.
    pub fn load_with_overrides(&self, vars: HashMap<String, String>) -> Result<AppConfig> {
        self.load_layered(Some(vars.into_iter().collect()))
    }

    fn load_layered(&self, vars: Option<config::Map<String, String>>) -> Result<AppConfig> {
        if !self.config_path.exists() {
            tracing::warn!(
                "Config file not found at {}, using defaults",
                self.config_path
            );
        }

        let settings = Config::builder()
            .add_source(File::new(self.config_path.as_str(), FileFormat::Yaml).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true)
                    .source(vars),
            )
            .build()
            .with_context(|| format!("Failed to read config: {}", self.config_path))?;

        let config: AppConfig = settings
            .try_deserialize()
            .with_context(|| format!("Failed to parse config: {}", self.config_path))?;

        tracing::info!("Loaded config from {}", self.config_path);
        Ok(config)
    }

    /// Write `config` as YAML, replacing the file.
    pub fn save(&self, config: &AppConfig) -> Result<()> {
        let yaml_string =
            serde_yaml_ng::to_string(config).context("Failed to serialize config to YAML")?;

        fs::write(&self.config_path, yaml_string)
            .with_context(|| format!("Failed to write config: {}", self.config_path))?;

        tracing::info!("Saved config to {}", self.config_path);
        Ok(())
    }
}
