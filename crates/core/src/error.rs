//! Error types for the QuestForge plugin runtime

use thiserror::Error;

/// Main result type for plugin runtime operations
pub type Result<T> = std::result::Result<T, PluginError>;

/// Problems found in a plugin descriptor or in configuration values for it
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DescriptorError {
    #[error("Plugin id cannot be empty")]
    EmptyId,

    #[error("Plugin '{plugin}' both depends on and conflicts with '{other}'")]
    DependencyConflict { plugin: String, other: String },

    #[error("Default for option '{option}' is invalid: {reason}")]
    InvalidDefault { option: String, reason: String },

    #[error("Value for option '{option}' is invalid: {reason}")]
    InvalidConfigValue { option: String, reason: String },

    #[error("Unknown config option '{0}'")]
    UnknownOption(String),

    #[error("Unknown lifecycle callback '{0}'")]
    UnknownCallback(String),

    #[error("Duplicate plugin id '{0}'")]
    DuplicateId(String),
}

/// Primary error type for plugin loading, dispatch and management
#[derive(Debug, Clone, Error)]
pub enum PluginError {
    #[error("Invalid descriptor for '{plugin}': {source}")]
    Descriptor {
        plugin: String,
        #[source]
        source: DescriptorError,
    },

    #[error("Dependency cycle between: {}", ids.join(", "))]
    Cycle { ids: Vec<String> },

    #[error("Plugin '{plugin}' is missing dependency '{dependency}'")]
    MissingDependency { plugin: String, dependency: String },

    #[error("Plugin '{plugin}' conflicts with '{other}'")]
    Conflict { plugin: String, other: String },

    #[error("Plugin '{plugin}' requires game version {required}, running {running}")]
    IncompatibleGameVersion {
        plugin: String,
        required: semver::VersionReq,
        running: semver::Version,
    },

    #[error("Failed to load plugin '{plugin}': {reason}")]
    Load { plugin: String, reason: String },

    #[error("Failed to reload plugin '{plugin}': {reason}")]
    Reload { plugin: String, reason: String },

    #[error("Command '{command}' is already registered by '{owner}', rejected registration from '{rejected}'")]
    CommandConflict {
        command: String,
        owner: String,
        rejected: String,
    },

    #[error("Handler from '{plugin}' failed during {context}: {message}")]
    Handler {
        plugin: String,
        context: String,
        message: String,
    },

    #[error("Plugin '{0}' not found")]
    NotFound(String),

    #[error("Plugin '{plugin}' is {state}, cannot {action}")]
    InvalidState {
        plugin: String,
        state: crate::plugin::PluginState,
        action: String,
    },

    #[error("IO error: {0}")]
    Io(String),

    #[error("Invalid plugin manifest {path}: {reason}")]
    Manifest { path: String, reason: String },
}

impl PluginError {
    /// Id of the plugin this error is about, when there is exactly one
    pub fn plugin(&self) -> Option<&str> {
        match self {
            Self::Descriptor { plugin, .. }
            | Self::MissingDependency { plugin, .. }
            | Self::Conflict { plugin, .. }
            | Self::IncompatibleGameVersion { plugin, .. }
            | Self::Load { plugin, .. }
            | Self::Reload { plugin, .. }
            | Self::Handler { plugin, .. }
            | Self::InvalidState { plugin, .. } => Some(plugin),
            Self::CommandConflict { rejected, .. } => Some(rejected),
            Self::NotFound(plugin) => Some(plugin),
            Self::Cycle { .. } | Self::Io(_) | Self::Manifest { .. } => None,
        }
    }

    pub(crate) fn descriptor(plugin: impl Into<String>, source: DescriptorError) -> Self {
        Self::Descriptor {
            plugin: plugin.into(),
            source,
        }
    }
}

impl From<std::io::Error> for PluginError {
    fn from(error: std::io::Error) -> Self {
        Self::Io(error.to_string())
    }
}

/// Renders a caught panic payload as text
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("panicked: {}", message)
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("panicked: {}", message)
    } else {
        "panicked".to_string()
    }
}
