//! QuestForge Plugins
//!
//! First-party plugins shipped with the game: command help, combat
//! enhancements, and extended items, NPCs and world content.

pub mod combat;
pub mod help;
pub mod items;
pub mod npcs;
pub mod world;

// Re-export core plugin types for convenience
pub use questforge_core::plugin::{DefinePlugin, NativeUnit, Plugin, PluginDescriptor, PluginState};
pub use questforge_core::{EventType, GameContext, Payload};

// Re-export plugin implementations
pub use combat::EnhancedCombatPlugin;
pub use help::HelpPlugin;
pub use items::ExtendedItemsPlugin;
pub use npcs::ExtendedNpcsPlugin;
pub use world::ExtendedWorldPlugin;

use questforge_core::plugin::PluginConfig;
use serde_json::Value;

/// Units for every bundled plugin
pub fn builtin_units() -> Vec<NativeUnit> {
    vec![
        NativeUnit::of::<HelpPlugin>(),
        NativeUnit::of::<EnhancedCombatPlugin>(),
        NativeUnit::of::<ExtendedItemsPlugin>(),
        NativeUnit::of::<ExtendedNpcsPlugin>(),
        NativeUnit::of::<ExtendedWorldPlugin>(),
    ]
}

pub(crate) fn setting_i64(config: &PluginConfig, key: &str, default: i64) -> i64 {
    config.get(key).and_then(Value::as_i64).unwrap_or(default)
}

pub(crate) fn setting_f64(config: &PluginConfig, key: &str, default: f64) -> f64 {
    config.get(key).and_then(Value::as_f64).unwrap_or(default)
}

pub(crate) fn setting_bool(config: &PluginConfig, key: &str, default: bool) -> bool {
    config.get(key).and_then(Value::as_bool).unwrap_or(default)
}

/// String field of an event payload
pub(crate) fn payload_str<'a>(payload: &'a Payload, key: &str) -> Option<&'a str> {
    payload.get(key).and_then(Value::as_str)
}

/// Parse a command argument into a config value of the same JSON type
pub(crate) fn parse_setting(raw: &str) -> Value {
    match raw.to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" => Value::Bool(true),
        "false" | "no" | "off" => Value::Bool(false),
        _ => raw
            .parse::<i64>()
            .map(Value::from)
            .or_else(|_| raw.parse::<f64>().map(Value::from))
            .unwrap_or_else(|_| Value::from(raw)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_setting() {
        assert_eq!(parse_setting("on"), json!(true));
        assert_eq!(parse_setting("No"), json!(false));
        assert_eq!(parse_setting("12"), json!(12));
        assert_eq!(parse_setting("1.5"), json!(1.5));
        assert_eq!(parse_setting("storm"), json!("storm"));
    }

    #[test]
    fn test_builtin_descriptors_are_valid() {
        let units = builtin_units();
        assert_eq!(units.len(), 5);
        for unit in &units {
            use questforge_core::plugin::PluginUnit;
            assert!(unit.descriptor().validate().is_ok(), "{}", unit.descriptor().id);
        }
    }
}
