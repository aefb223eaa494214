//! Plugin descriptors: identity, relationships and configuration schema

use crate::error::DescriptorError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// Named load priorities. Lower values load earlier.
pub mod priority {
    pub const SYSTEM: i32 = 0;
    pub const CORE: i32 = 25;
    pub const HIGH: i32 = 50;
    pub const NORMAL: i32 = 100;
    pub const LOW: i32 = 150;
    pub const OPTIONAL: i32 = 200;
}

/// Resolved configuration values of a plugin, keyed by option name
pub type PluginConfig = BTreeMap<String, Value>;

/// Static metadata describing a plugin
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginDescriptor {
    /// Unique identifier
    pub id: String,
    /// Human readable name
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_version")]
    pub version: semver::Version,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub description: String,
    /// Plugins that must be loaded and enabled before this one
    #[serde(default)]
    pub dependencies: BTreeSet<String>,
    /// Ordering hints, naming a plugin id or a capability another plugin provides
    #[serde(default)]
    pub soft_dependencies: BTreeSet<String>,
    /// Plugins that may not be active at the same time as this one
    #[serde(default)]
    pub conflicts: BTreeSet<String>,
    /// Capability tags this plugin offers to soft dependents
    #[serde(default)]
    pub provides: BTreeSet<String>,
    #[serde(default = "default_priority")]
    pub priority: i32,
    /// Required game version, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub game_version: Option<semver::VersionReq>,
    #[serde(default)]
    pub supports_hot_reload: bool,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub config_schema: BTreeMap<String, ConfigOption>,
    /// Resolved config values, schema defaults merged with overrides
    #[serde(default)]
    pub config: PluginConfig,
}

fn default_version() -> semver::Version {
    semver::Version::new(1, 0, 0)
}

fn default_priority() -> i32 {
    priority::NORMAL
}

impl PluginDescriptor {
    /// Create a new descriptor with default version 1.0.0 and normal priority
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            version: default_version(),
            author: String::new(),
            description: String::new(),
            dependencies: BTreeSet::new(),
            soft_dependencies: BTreeSet::new(),
            conflicts: BTreeSet::new(),
            provides: BTreeSet::new(),
            priority: priority::NORMAL,
            game_version: None,
            supports_hot_reload: false,
            tags: Vec::new(),
            config_schema: BTreeMap::new(),
            config: PluginConfig::new(),
        }
    }

    pub fn with_version(mut self, version: semver::Version) -> Self {
        self.version = version;
        self
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = author.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Add a hard dependency
    pub fn with_dependency(mut self, id: impl Into<String>) -> Self {
        self.dependencies.insert(id.into());
        self
    }

    /// Add a soft dependency (plugin id or provided capability)
    pub fn with_soft_dependency(mut self, id: impl Into<String>) -> Self {
        self.soft_dependencies.insert(id.into());
        self
    }

    pub fn with_conflict(mut self, id: impl Into<String>) -> Self {
        self.conflicts.insert(id.into());
        self
    }

    pub fn with_provides(mut self, capability: impl Into<String>) -> Self {
        self.provides.insert(capability.into());
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_game_version(mut self, requirement: semver::VersionReq) -> Self {
        self.game_version = Some(requirement);
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Declare a config option; its default becomes the initial value
    pub fn with_config_option(mut self, name: impl Into<String>, option: ConfigOption) -> Self {
        let name = name.into();
        self.config.insert(name.clone(), option.default.clone());
        self.config_schema.insert(name, option);
        self
    }

    pub fn hot_reloadable(mut self) -> Self {
        self.supports_hot_reload = true;
        self
    }

    /// Display name, falling back to the id
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.id
        } else {
            &self.name
        }
    }

    /// Check the descriptor's internal invariants
    pub fn validate(&self) -> Result<(), DescriptorError> {
        if self.id.trim().is_empty() {
            return Err(DescriptorError::EmptyId);
        }

        if let Some(other) = self.dependencies.intersection(&self.conflicts).next() {
            return Err(DescriptorError::DependencyConflict {
                plugin: self.id.clone(),
                other: other.clone(),
            });
        }

        for (name, option) in &self.config_schema {
            option
                .check(&option.default)
                .map_err(|reason| DescriptorError::InvalidDefault {
                    option: name.clone(),
                    reason,
                })?;
        }

        Ok(())
    }

    /// Merge schema defaults with the given overrides, checking every override
    pub fn resolve_config(&self, overrides: &PluginConfig) -> Result<PluginConfig, DescriptorError> {
        let mut resolved: PluginConfig = self
            .config_schema
            .iter()
            .map(|(name, option)| (name.clone(), option.default.clone()))
            .collect();

        for (name, value) in overrides {
            let option = self
                .config_schema
                .get(name)
                .ok_or_else(|| DescriptorError::UnknownOption(name.clone()))?;

            option
                .check(value)
                .map_err(|reason| DescriptorError::InvalidConfigValue {
                    option: name.clone(),
                    reason,
                })?;

            resolved.insert(name.clone(), value.clone());
        }

        Ok(resolved)
    }

    /// Whether this plugin can run on the given game version
    pub fn is_compatible_with(&self, game_version: &semver::Version) -> bool {
        self.game_version
            .as_ref()
            .map(|req| req.matches(game_version))
            .unwrap_or(true)
    }

    /// Whether this descriptor conflicts with the other one, in either direction
    pub fn conflicts_with(&self, other: &PluginDescriptor) -> bool {
        self.conflicts.contains(&other.id) || other.conflicts.contains(&self.id)
    }
}

/// Value type of a config option
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigType {
    Integer,
    Number,
    Boolean,
    String,
}

impl std::fmt::Display for ConfigType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Integer => write!(f, "integer"),
            Self::Number => write!(f, "number"),
            Self::Boolean => write!(f, "boolean"),
            Self::String => write!(f, "string"),
        }
    }
}

/// Schema entry for one config option
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigOption {
    #[serde(rename = "type")]
    pub kind: ConfigType,
    pub default: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(default)]
    pub description: String,
}

impl ConfigOption {
    pub fn integer(default: i64) -> Self {
        Self::new(ConfigType::Integer, Value::from(default))
    }

    pub fn number(default: f64) -> Self {
        Self::new(ConfigType::Number, Value::from(default))
    }

    pub fn boolean(default: bool) -> Self {
        Self::new(ConfigType::Boolean, Value::from(default))
    }

    pub fn string(default: impl Into<String>) -> Self {
        Self::new(ConfigType::String, Value::from(default.into()))
    }

    fn new(kind: ConfigType, default: Value) -> Self {
        Self {
            kind,
            default,
            min: None,
            max: None,
            description: String::new(),
        }
    }

    pub fn with_range(mut self, min: f64, max: f64) -> Self {
        self.min = Some(min);
        self.max = Some(max);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Check a value against the declared type and bounds
    pub fn check(&self, value: &Value) -> Result<(), String> {
        let type_ok = match self.kind {
            ConfigType::Integer => value.is_i64() || value.is_u64(),
            ConfigType::Number => value.is_number(),
            ConfigType::Boolean => value.is_boolean(),
            ConfigType::String => value.is_string(),
        };
        if !type_ok {
            return Err(format!("expected {}, got {}", self.kind, value));
        }

        if let Some(number) = value.as_f64() {
            if let Some(min) = self.min {
                if number < min {
                    return Err(format!("{} is below minimum {}", number, min));
                }
            }
            if let Some(max) = self.max {
                if number > max {
                    return Err(format!("{} is above maximum {}", number, max));
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn descriptor_with_rate() -> PluginDescriptor {
        PluginDescriptor::new("items", "Items")
            .with_config_option("drop_rate", ConfigOption::number(0.01).with_range(0.0, 1.0))
            .with_config_option("custom", ConfigOption::boolean(true))
    }

    #[test]
    fn test_descriptor_defaults() {
        let descriptor = PluginDescriptor::new("core_items", "");
        assert_eq!(descriptor.priority, priority::NORMAL);
        assert_eq!(descriptor.version, semver::Version::new(1, 0, 0));
        assert_eq!(descriptor.display_name(), "core_items");
        assert!(descriptor.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_empty_id() {
        let descriptor = PluginDescriptor::new("  ", "Blank");
        assert_eq!(descriptor.validate(), Err(DescriptorError::EmptyId));
    }

    #[test]
    fn test_validate_rejects_dependency_conflict_overlap() {
        let descriptor = PluginDescriptor::new("a", "A")
            .with_dependency("b")
            .with_conflict("b");
        assert!(matches!(
            descriptor.validate(),
            Err(DescriptorError::DependencyConflict { other, .. }) if other == "b"
        ));
    }

    #[test]
    fn test_validate_rejects_out_of_range_default() {
        let descriptor = PluginDescriptor::new("a", "A")
            .with_config_option("chance", ConfigOption::number(2.0).with_range(0.0, 1.0));
        assert!(matches!(descriptor.validate(), Err(DescriptorError::InvalidDefault { .. })));
    }

    #[test]
    fn test_resolve_config_merges_overrides() {
        let descriptor = descriptor_with_rate();
        let mut overrides = PluginConfig::new();
        overrides.insert("drop_rate".to_string(), json!(0.5));

        let resolved = descriptor.resolve_config(&overrides).unwrap();
        assert_eq!(resolved["drop_rate"], json!(0.5));
        assert_eq!(resolved["custom"], json!(true));
    }

    #[test]
    fn test_resolve_config_rejects_bad_overrides() {
        let descriptor = descriptor_with_rate();

        let mut out_of_range = PluginConfig::new();
        out_of_range.insert("drop_rate".to_string(), json!(1.5));
        assert!(matches!(
            descriptor.resolve_config(&out_of_range),
            Err(DescriptorError::InvalidConfigValue { .. })
        ));

        let mut wrong_type = PluginConfig::new();
        wrong_type.insert("custom".to_string(), json!("yes"));
        assert!(descriptor.resolve_config(&wrong_type).is_err());

        let mut unknown = PluginConfig::new();
        unknown.insert("nope".to_string(), json!(1));
        assert_eq!(
            descriptor.resolve_config(&unknown),
            Err(DescriptorError::UnknownOption("nope".to_string()))
        );
    }

    #[test]
    fn test_integer_option_rejects_fractions() {
        let option = ConfigOption::integer(5).with_range(1.0, 20.0);
        assert!(option.check(&json!(7)).is_ok());
        assert!(option.check(&json!(7.5)).is_err());
        assert!(option.check(&json!(25)).is_err());
    }

    #[test]
    fn test_game_version_compatibility() {
        let descriptor = PluginDescriptor::new("a", "A")
            .with_game_version(semver::VersionReq::parse(">=1.2").unwrap());
        assert!(descriptor.is_compatible_with(&semver::Version::new(1, 3, 0)));
        assert!(!descriptor.is_compatible_with(&semver::Version::new(1, 0, 0)));
    }

    #[test]
    fn test_deserialize_from_toml() {
        let source = r#"
            id = "seasonal"
            name = "Seasonal Events"
            version = "0.2.0"
            dependencies = ["core_items"]
            soft_dependencies = ["extended_locations"]
            priority = 150
            supports_hot_reload = true

            [config_schema.frequency]
            type = "integer"
            default = 5
            min = 1
            max = 20
        "#;
        let descriptor: PluginDescriptor = toml::from_str(source).unwrap();
        assert_eq!(descriptor.version, semver::Version::new(0, 2, 0));
        assert!(descriptor.dependencies.contains("core_items"));
        assert_eq!(descriptor.priority, priority::LOW);
        assert_eq!(descriptor.config_schema["frequency"].kind, ConfigType::Integer);
        assert!(descriptor.validate().is_ok());
    }
}
