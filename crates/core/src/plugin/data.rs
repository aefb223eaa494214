//! Data-only plugins declared in TOML or JSON manifests
//!
//! ```toml
//! [plugin]
//! id = "harvest_festival"
//! name = "Harvest Festival"
//! version = "1.0.0"
//! supports_hot_reload = true
//!
//! [items.pumpkin_pie]
//! name = "Pumpkin Pie"
//! heal = 25
//!
//! [commands.festival]
//! help = "What is happening at the festival"
//! response = "Lanterns line the village square."
//! ```
//!
//! JSON manifests may name the descriptor section `info` instead of `plugin`.

use super::{Plugin, PluginDescriptor};
use crate::commands::CommandSpec;
use crate::config::ConfigFormat;
use crate::content::{ContentKind, ContentMap};
use crate::error::PluginError;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

/// A command that always answers with the same text
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StaticCommand {
    #[serde(default)]
    pub help: String,
    pub response: String,
    #[serde(default)]
    pub aliases: Vec<String>,
}

/// Parsed manifest contents
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Manifest {
    #[serde(alias = "info")]
    pub plugin: PluginDescriptor,
    #[serde(default)]
    pub items: ContentMap,
    #[serde(default)]
    pub npcs: ContentMap,
    #[serde(default)]
    pub locations: ContentMap,
    #[serde(default)]
    pub recipes: ContentMap,
    #[serde(default)]
    pub enemies: ContentMap,
    #[serde(default)]
    pub commands: BTreeMap<String, StaticCommand>,
}

impl Manifest {
    pub fn parse(source: &str, format: ConfigFormat) -> Result<Self, String> {
        match format {
            ConfigFormat::Toml => toml::from_str(source).map_err(|e| format!("TOML parse error: {}", e)),
            ConfigFormat::Json => serde_json::from_str(source).map_err(|e| format!("JSON parse error: {}", e)),
        }
    }

    pub fn load(path: &Path) -> Result<Self, PluginError> {
        let source = std::fs::read_to_string(path)?;
        Self::parse(&source, ConfigFormat::from_extension(path)).map_err(|reason| PluginError::Manifest {
            path: path.display().to_string(),
            reason,
        })
    }

    fn content(&self, kind: ContentKind) -> &ContentMap {
        match kind {
            ContentKind::Item => &self.items,
            ContentKind::Npc => &self.npcs,
            ContentKind::Location => &self.locations,
            ContentKind::Recipe => &self.recipes,
            ContentKind::Enemy => &self.enemies,
        }
    }

    /// Total number of content entries across all kinds
    pub fn content_count(&self) -> usize {
        ContentKind::ALL.iter().map(|kind| self.content(*kind).len()).sum()
    }
}

/// Plugin backed by a [`Manifest`]
pub struct DataPlugin {
    manifest: Manifest,
}

impl DataPlugin {
    pub fn new(manifest: Manifest) -> Self {
        Self { manifest }
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }
}

impl Plugin for DataPlugin {
    fn descriptor(&self) -> &PluginDescriptor {
        &self.manifest.plugin
    }

    fn apply_config(&mut self, config: &super::PluginConfig) -> anyhow::Result<()> {
        self.manifest.plugin.config = config.clone();
        Ok(())
    }

    fn register_commands(&self) -> Vec<CommandSpec> {
        self.manifest
            .commands
            .iter()
            .map(|(name, command)| {
                let response = command.response.clone();
                let spec = CommandSpec::new(name.clone(), command.help.clone(), move |_ctx, _args| Ok(response.clone()))
                    .with_category(self.manifest.plugin.id.clone());
                command.aliases.iter().fold(spec, |spec, alias| spec.with_alias(alias.clone()))
            })
            .collect()
    }

    fn register_items(&self) -> ContentMap {
        self.manifest.items.clone()
    }

    fn register_npcs(&self) -> ContentMap {
        self.manifest.npcs.clone()
    }

    fn register_locations(&self) -> ContentMap {
        self.manifest.locations.clone()
    }

    fn register_recipes(&self) -> ContentMap {
        self.manifest.recipes.clone()
    }

    fn register_enemies(&self) -> ContentMap {
        self.manifest.enemies.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FESTIVAL: &str = r#"
        [plugin]
        id = "harvest_festival"
        name = "Harvest Festival"
        version = "1.2.0"
        soft_dependencies = ["extended_items"]
        supports_hot_reload = true

        [items.pumpkin_pie]
        name = "Pumpkin Pie"
        heal = 25

        [npcs.mayor]
        name = "Mayor Rowan"

        [commands.festival]
        help = "What is happening at the festival"
        response = "Lanterns line the village square."
        aliases = ["fest"]
    "#;

    #[test]
    fn test_parse_toml_manifest() {
        let manifest = Manifest::parse(FESTIVAL, ConfigFormat::Toml).unwrap();
        assert_eq!(manifest.plugin.id, "harvest_festival");
        assert!(manifest.plugin.supports_hot_reload);
        assert_eq!(manifest.items["pumpkin_pie"]["heal"], 25);
        assert_eq!(manifest.content_count(), 2);
    }

    #[test]
    fn test_parse_json_manifest_with_info_section() {
        let source = r#"{
            "info": { "id": "bandits", "name": "Bandits", "version": "0.1.0" },
            "enemies": { "bandit": { "name": "Bandit", "hp": 30 } }
        }"#;
        let manifest = Manifest::parse(source, ConfigFormat::Json).unwrap();
        assert_eq!(manifest.plugin.id, "bandits");
        assert_eq!(manifest.enemies.len(), 1);
    }

    #[test]
    fn test_malformed_manifest() {
        let result = Manifest::parse("[plugin]\nname = \"no id\"", ConfigFormat::Toml);
        assert!(result.unwrap_err().contains("TOML parse error"));
    }

    #[test]
    fn test_data_plugin_registrations() {
        let plugin = DataPlugin::new(Manifest::parse(FESTIVAL, ConfigFormat::Toml).unwrap());
        let commands = plugin.register_commands();
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].aliases, vec!["fest".to_string()]);
        assert_eq!(plugin.register_items().len(), 1);
        assert_eq!(plugin.register_npcs().len(), 1);
        assert!(plugin.register_hooks().is_empty());
    }
}
