//! Plugin system for QuestForge
//!
//! Descriptors, the [`Plugin`] trait every authoring style is adapted to,
//! the units plugins are discovered from, and the [`PluginManager`] that
//! drives their lifecycle.

pub mod builder;
pub mod data;
pub mod descriptor;
pub mod lifecycle;
pub mod manager;
pub mod plugin;
pub mod unit;

// Re-export core types
pub use builder::{from_callback_map, lifecycle_fn, BuiltPlugin, LifecycleFn, PluginBuilder};
pub use data::{DataPlugin, Manifest, StaticCommand};
pub use descriptor::{priority, ConfigOption, ConfigType, PluginConfig, PluginDescriptor};
pub use lifecycle::{PluginHandle, PluginStats};
pub use manager::{LoadReport, ManagerStats, PluginManager};
pub use plugin::{declared_content, DefinePlugin, Plugin, PluginState, Snapshot};
pub use unit::{scan_directory, DiscoverySource, ManifestUnit, NativeUnit, PluginUnit};

/// Plugin system version
pub const PLUGIN_SYSTEM_VERSION: &str = "1.0.0";
