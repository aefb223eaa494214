//! Plugin system configuration

use crate::plugin::PluginConfig;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

/// Game version plugins are checked against by default
pub const GAME_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Top-level configuration for the plugin runtime
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginSystemConfig {
    /// Running game version, used for plugin compatibility checks
    pub game_version: semver::Version,
    /// Directories scanned for data-plugin manifests
    pub plugin_dirs: Vec<PathBuf>,
    /// Plugins that are discovered but never loaded
    pub disabled: BTreeSet<String>,
    pub hot_reload: HotReloadConfig,
    /// Per-plugin config overrides
    pub overrides: BTreeMap<String, PluginConfig>,
    pub logging: LoggingConfig,
}

/// Hot reload settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HotReloadConfig {
    pub enabled: bool,
    /// Check manifests for changes after this many handled inputs
    pub poll_every: u32,
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by `RUST_LOG`
    pub level: String,
    /// Emit JSON lines instead of human readable output
    pub json: bool,
}

impl Default for PluginSystemConfig {
    fn default() -> Self {
        Self {
            game_version: semver::Version::parse(GAME_VERSION).unwrap_or_else(|_| semver::Version::new(0, 1, 0)),
            plugin_dirs: vec![PathBuf::from("plugins")],
            disabled: BTreeSet::new(),
            hot_reload: HotReloadConfig::default(),
            overrides: BTreeMap::new(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for HotReloadConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_every: 1,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl PluginSystemConfig {
    /// Load configuration from file with format detection
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::FileNotFound(format!("{}: {}", path.display(), e)))?;

        let config: PluginSystemConfig = match ConfigFormat::from_extension(path) {
            ConfigFormat::Json => serde_json::from_str(&content)
                .map_err(|e| ConfigError::ParseFailed(format!("JSON parse error: {}", e)))?,
            ConfigFormat::Toml => Self::from_toml_str(&content)?,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::ParseFailed(format!("TOML parse error: {}", e)))
    }

    /// Save configuration to file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = match ConfigFormat::from_extension(path) {
            ConfigFormat::Json => serde_json::to_string_pretty(self)
                .map_err(|e| ConfigError::ParseFailed(format!("JSON serialize error: {}", e)))?,
            ConfigFormat::Toml => toml::to_string_pretty(self)
                .map_err(|e| ConfigError::ParseFailed(format!("TOML serialize error: {}", e)))?,
        };

        std::fs::write(path, content).map_err(|e| ConfigError::FileNotFound(e.to_string()))?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.hot_reload.enabled && self.hot_reload.poll_every == 0 {
            return Err(ConfigError::Invalid("hot_reload.poll_every must be at least 1".to_string()));
        }

        if self.logging.level.trim().is_empty() {
            return Err(ConfigError::Invalid("logging.level cannot be empty".to_string()));
        }

        if let Some(id) = self.overrides.keys().find(|id| id.trim().is_empty()) {
            return Err(ConfigError::Invalid(format!("override table with empty plugin id '{}'", id)));
        }

        Ok(())
    }

    /// Config overrides for one plugin
    pub fn overrides_for(&self, plugin_id: &str) -> PluginConfig {
        self.overrides.get(plugin_id).cloned().unwrap_or_default()
    }

    pub fn is_disabled(&self, plugin_id: &str) -> bool {
        self.disabled.contains(plugin_id)
    }
}

/// Configuration file format detection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Json,
    Toml,
}

impl ConfigFormat {
    pub fn from_extension(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::Json,
            _ => Self::Toml,
        }
    }

    /// Whether the path looks like a manifest or config file
    pub fn is_supported(path: &Path) -> bool {
        matches!(path.extension().and_then(|ext| ext.to_str()), Some("toml") | Some("json"))
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    FileNotFound(String),

    #[error("Failed to parse configuration: {0}")]
    ParseFailed(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
