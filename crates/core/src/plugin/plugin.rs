//! Core plugin trait and lifecycle state

use super::{PluginConfig, PluginDescriptor};
use crate::commands::CommandSpec;
use crate::content::{ContentKind, ContentMap};
use crate::events::HookSpec;
use crate::game::GameContext;
use anyhow::Result;
use serde::{Deserialize, Serialize};

/// State handed from the old instance to the new one across a hot reload
pub type Snapshot = serde_json::Map<String, serde_json::Value>;

/// Core trait that all QuestForge plugins implement
///
/// Every authoring style (native types, [`super::PluginBuilder`], callback
/// maps, data manifests) ends up behind this trait; the manager never sees
/// anything else.
pub trait Plugin: Send {
    /// Static metadata for this plugin
    fn descriptor(&self) -> &PluginDescriptor;

    /// Called after the plugin is instantiated and configured, before any
    /// of its hooks, commands or content are registered
    fn on_load(&mut self, _game: &mut dyn GameContext) -> Result<()> {
        Ok(())
    }

    /// Called once the plugin's registrations are live
    fn on_enable(&mut self, _game: &mut dyn GameContext) -> Result<()> {
        Ok(())
    }

    /// Called before the plugin's registrations are removed
    fn on_disable(&mut self, _game: &mut dyn GameContext) -> Result<()> {
        Ok(())
    }

    /// Called right before the instance is dropped
    fn on_unload(&mut self, _game: &mut dyn GameContext) -> Result<()> {
        Ok(())
    }

    /// Apply resolved config values
    ///
    /// Values have already been checked against the descriptor's schema.
    fn apply_config(&mut self, _config: &PluginConfig) -> Result<()> {
        Ok(())
    }

    /// Export state that should survive a hot reload
    fn on_before_reload(&mut self, _game: &mut dyn GameContext) -> Result<Snapshot> {
        Ok(Snapshot::new())
    }

    /// Receive the state exported by the previous instance
    fn on_after_reload(&mut self, _game: &mut dyn GameContext, _snapshot: Snapshot) -> Result<()> {
        Ok(())
    }

    fn register_hooks(&self) -> Vec<HookSpec> {
        Vec::new()
    }

    fn register_commands(&self) -> Vec<CommandSpec> {
        Vec::new()
    }

    fn register_items(&self) -> ContentMap {
        ContentMap::new()
    }

    fn register_npcs(&self) -> ContentMap {
        ContentMap::new()
    }

    fn register_locations(&self) -> ContentMap {
        ContentMap::new()
    }

    fn register_recipes(&self) -> ContentMap {
        ContentMap::new()
    }

    fn register_enemies(&self) -> ContentMap {
        ContentMap::new()
    }
}

/// Content of the given kind declared by a plugin
pub fn declared_content(plugin: &dyn Plugin, kind: ContentKind) -> ContentMap {
    match kind {
        ContentKind::Item => plugin.register_items(),
        ContentKind::Npc => plugin.register_npcs(),
        ContentKind::Location => plugin.register_locations(),
        ContentKind::Recipe => plugin.register_recipes(),
        ContentKind::Enemy => plugin.register_enemies(),
    }
}

/// Plugin types that can be constructed from their descriptor alone
pub trait DefinePlugin: Plugin + Sized + 'static {
    fn describe() -> PluginDescriptor;

    fn create(descriptor: PluginDescriptor) -> Result<Self>;
}

/// Plugin state in the lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PluginState {
    /// Descriptor known, never instantiated
    Discovered,
    /// Instantiated and registered but not enabled
    Loaded,
    /// Enabled and active
    Enabled,
    /// Registrations withdrawn, instance kept
    Disabled,
    /// Being replaced by a fresh instance
    Reloading,
    /// Instance dropped
    Unloaded,
    /// Failed to load, enable or reload
    Failed,
}

impl PluginState {
    /// Check if the plugin is active (enabled)
    pub fn is_active(self) -> bool {
        matches!(self, Self::Enabled)
    }

    /// Check if the plugin currently has a live instance
    pub fn is_loaded(self) -> bool {
        matches!(self, Self::Loaded | Self::Enabled | Self::Disabled | Self::Reloading)
    }

    pub fn is_failed(self) -> bool {
        matches!(self, Self::Failed)
    }

    /// Get the next valid states from the current state
    pub fn valid_transitions(self) -> &'static [PluginState] {
        match self {
            Self::Discovered => &[Self::Loaded, Self::Failed],
            Self::Loaded => &[Self::Enabled, Self::Reloading, Self::Unloaded, Self::Failed],
            Self::Enabled => &[Self::Disabled, Self::Reloading, Self::Unloaded, Self::Failed],
            Self::Disabled => &[Self::Enabled, Self::Unloaded, Self::Failed],
            Self::Reloading => &[Self::Loaded, Self::Failed],
            Self::Unloaded => &[Self::Loaded, Self::Failed],
            Self::Failed => &[Self::Loaded, Self::Reloading, Self::Unloaded, Self::Failed],
        }
    }

    /// Check if transition to another state is valid
    pub fn can_transition_to(self, target: PluginState) -> bool {
        self.valid_transitions().contains(&target)
    }
}

impl std::fmt::Display for PluginState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Discovered => write!(f, "Discovered"),
            Self::Loaded => write!(f, "Loaded"),
            Self::Enabled => write!(f, "Enabled"),
            Self::Disabled => write!(f, "Disabled"),
            Self::Reloading => write!(f, "Reloading"),
            Self::Unloaded => write!(f, "Unloaded"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Lantern {
        descriptor: PluginDescriptor,
    }

    impl Plugin for Lantern {
        fn descriptor(&self) -> &PluginDescriptor {
            &self.descriptor
        }

        fn register_items(&self) -> ContentMap {
            let mut items = ContentMap::new();
            items.insert("lantern".to_string(), json!({ "name": "Lantern" }));
            items
        }
    }

    impl DefinePlugin for Lantern {
        fn describe() -> PluginDescriptor {
            PluginDescriptor::new("lantern", "Lantern")
        }

        fn create(descriptor: PluginDescriptor) -> Result<Self> {
            Ok(Self { descriptor })
        }
    }

    #[test]
    fn test_declared_content_by_kind() {
        let plugin = Lantern::create(Lantern::describe()).unwrap();
        assert_eq!(declared_content(&plugin, ContentKind::Item).len(), 1);
        assert!(declared_content(&plugin, ContentKind::Npc).is_empty());
        assert!(plugin.register_hooks().is_empty());
    }

    #[test]
    fn test_state_transitions() {
        assert!(PluginState::Discovered.can_transition_to(PluginState::Loaded));
        assert!(PluginState::Enabled.can_transition_to(PluginState::Reloading));
        assert!(PluginState::Reloading.can_transition_to(PluginState::Loaded));
        assert!(!PluginState::Disabled.can_transition_to(PluginState::Reloading));
        assert!(!PluginState::Discovered.can_transition_to(PluginState::Enabled));
        assert!(!PluginState::Unloaded.can_transition_to(PluginState::Enabled));
    }

    #[test]
    fn test_state_predicates() {
        assert!(PluginState::Enabled.is_active());
        assert!(PluginState::Disabled.is_loaded());
        assert!(!PluginState::Unloaded.is_loaded());
        assert!(PluginState::Failed.is_failed());
        assert_eq!(PluginState::Reloading.to_string(), "Reloading");
    }
}
