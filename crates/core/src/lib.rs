//! QuestForge plugin runtime
//!
//! Lets independently authored content and behavior modules attach to a
//! running text RPG: dependency-ordered loading, a priority-ordered event
//! bus, slash-command routing, content registration and hot reload, with
//! failures in plugin code contained at every boundary.

pub mod commands;
pub mod config;
pub mod content;
pub mod error;
pub mod events;
pub mod game;
pub mod plugin;
pub mod resolver;
pub mod telemetry;

pub use commands::{
    command_error_handler, command_middleware, parse_input, CommandContext, CommandErrorHandler, CommandInfo,
    CommandMiddleware, CommandOutcome, CommandRouter, CommandSpec,
};
pub use config::{ConfigError, LoggingConfig, PluginSystemConfig};
pub use content::{ContentKind, ContentMap, ContentRegistry, ContentSink, ContentSinks, MemorySink};
pub use error::{DescriptorError, PluginError, Result};
pub use events::{
    event_middleware, hook_handler, EventBus, EventMiddleware, EventReport, EventType, HookContext, HookFilter, HookSpec,
    Payload, Scratch, UNRANKED,
};
pub use game::{GameContext, Player, SimpleGame, Weather, WorldState};
pub use plugin::{
    ConfigOption, DefinePlugin, DiscoverySource, NativeUnit, Plugin, PluginBuilder, PluginConfig, PluginDescriptor,
    PluginManager, PluginState, Snapshot,
};
pub use resolver::{DependencyResolver, Resolution};
