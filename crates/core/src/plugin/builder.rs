//! Functional plugin authoring
//!
//! [`PluginBuilder`] collects a descriptor, lifecycle callbacks, hooks,
//! commands and content, and builds a [`BuiltPlugin`] implementing
//! [`Plugin`]. [`from_callback_map`] does the same from a map of named
//! lifecycle callbacks.

use super::{ConfigOption, Plugin, PluginDescriptor};
use crate::commands::{CommandContext, CommandSpec};
use crate::content::{ContentKind, ContentMap};
use crate::error::DescriptorError;
use crate::events::{EventType, HookContext, HookSpec, Payload};
use crate::game::GameContext;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// A lifecycle callback for functional plugins
pub type LifecycleFn = Arc<dyn Fn(&mut dyn GameContext) -> anyhow::Result<()> + Send + Sync>;

/// Box a closure as a [`LifecycleFn`]
pub fn lifecycle_fn<F>(f: F) -> LifecycleFn
where
    F: Fn(&mut dyn GameContext) -> anyhow::Result<()> + Send + Sync + 'static,
{
    Arc::new(f)
}

#[derive(Clone, Default)]
struct Callbacks {
    on_load: Option<LifecycleFn>,
    on_unload: Option<LifecycleFn>,
    on_enable: Option<LifecycleFn>,
    on_disable: Option<LifecycleFn>,
}

/// Fluent builder for plugins that need no type of their own
#[derive(Clone)]
pub struct PluginBuilder {
    descriptor: PluginDescriptor,
    callbacks: Callbacks,
    hooks: Vec<HookSpec>,
    commands: Vec<CommandSpec>,
    content: BTreeMap<ContentKind, ContentMap>,
}

impl PluginBuilder {
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self::from_descriptor(PluginDescriptor::new(id.clone(), id))
    }

    pub fn from_descriptor(descriptor: PluginDescriptor) -> Self {
        Self {
            descriptor,
            callbacks: Callbacks::default(),
            hooks: Vec::new(),
            commands: Vec::new(),
            content: BTreeMap::new(),
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.descriptor.name = name.into();
        self
    }

    pub fn version(mut self, version: semver::Version) -> Self {
        self.descriptor.version = version;
        self
    }

    pub fn author(mut self, author: impl Into<String>) -> Self {
        self.descriptor.author = author.into();
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.descriptor.description = description.into();
        self
    }

    pub fn depends_on(mut self, id: impl Into<String>) -> Self {
        self.descriptor.dependencies.insert(id.into());
        self
    }

    pub fn soft_depends_on(mut self, id: impl Into<String>) -> Self {
        self.descriptor.soft_dependencies.insert(id.into());
        self
    }

    pub fn conflicts_with(mut self, id: impl Into<String>) -> Self {
        self.descriptor.conflicts.insert(id.into());
        self
    }

    pub fn provides(mut self, capability: impl Into<String>) -> Self {
        self.descriptor.provides.insert(capability.into());
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.descriptor.priority = priority;
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.descriptor.tags.push(tag.into());
        self
    }

    pub fn config_option(mut self, name: impl Into<String>, option: ConfigOption) -> Self {
        self.descriptor = self.descriptor.with_config_option(name, option);
        self
    }

    pub fn hot_reload(mut self) -> Self {
        self.descriptor.supports_hot_reload = true;
        self
    }

    pub fn on_load<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut dyn GameContext) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.callbacks.on_load = Some(Arc::new(f));
        self
    }

    pub fn on_unload<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut dyn GameContext) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.callbacks.on_unload = Some(Arc::new(f));
        self
    }

    pub fn on_enable<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut dyn GameContext) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.callbacks.on_enable = Some(Arc::new(f));
        self
    }

    pub fn on_disable<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut dyn GameContext) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.callbacks.on_disable = Some(Arc::new(f));
        self
    }

    /// React to an event at the given priority
    pub fn hook<F>(mut self, event: EventType, priority: i32, f: F) -> Self
    where
        F: Fn(&mut HookContext<'_>, &Payload) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.hooks.push(HookSpec::new(event, f).with_priority(priority));
        self
    }

    pub fn hook_spec(mut self, spec: HookSpec) -> Self {
        self.hooks.push(spec);
        self
    }

    pub fn command<F>(mut self, name: impl Into<String>, help: impl Into<String>, f: F) -> Self
    where
        F: Fn(&mut CommandContext<'_>, &[String]) -> anyhow::Result<String> + Send + Sync + 'static,
    {
        self.commands.push(CommandSpec::new(name, help, f));
        self
    }

    pub fn command_spec(mut self, spec: CommandSpec) -> Self {
        self.commands.push(spec);
        self
    }

    pub fn content(mut self, kind: ContentKind, id: impl Into<String>, data: Value) -> Self {
        self.content.entry(kind).or_default().insert(id.into(), data);
        self
    }

    pub fn descriptor(&self) -> &PluginDescriptor {
        &self.descriptor
    }

    pub fn build(self) -> BuiltPlugin {
        BuiltPlugin {
            descriptor: self.descriptor,
            callbacks: self.callbacks,
            hooks: self.hooks,
            commands: self.commands,
            content: self.content,
        }
    }
}

/// Plugin assembled from closures and data
pub struct BuiltPlugin {
    descriptor: PluginDescriptor,
    callbacks: Callbacks,
    hooks: Vec<HookSpec>,
    commands: Vec<CommandSpec>,
    content: BTreeMap<ContentKind, ContentMap>,
}

impl BuiltPlugin {
    fn content_of(&self, kind: ContentKind) -> ContentMap {
        self.content.get(&kind).cloned().unwrap_or_default()
    }
}

fn run(callback: &Option<LifecycleFn>, game: &mut dyn GameContext) -> anyhow::Result<()> {
    match callback {
        Some(callback) => callback(game),
        None => Ok(()),
    }
}

impl Plugin for BuiltPlugin {
    fn descriptor(&self) -> &PluginDescriptor {
        &self.descriptor
    }

    fn on_load(&mut self, game: &mut dyn GameContext) -> anyhow::Result<()> {
        run(&self.callbacks.on_load, game)
    }

    fn on_enable(&mut self, game: &mut dyn GameContext) -> anyhow::Result<()> {
        run(&self.callbacks.on_enable, game)
    }

    fn on_disable(&mut self, game: &mut dyn GameContext) -> anyhow::Result<()> {
        run(&self.callbacks.on_disable, game)
    }

    fn on_unload(&mut self, game: &mut dyn GameContext) -> anyhow::Result<()> {
        run(&self.callbacks.on_unload, game)
    }

    fn apply_config(&mut self, config: &super::PluginConfig) -> anyhow::Result<()> {
        self.descriptor.config = config.clone();
        Ok(())
    }

    fn register_hooks(&self) -> Vec<HookSpec> {
        self.hooks.clone()
    }

    fn register_commands(&self) -> Vec<CommandSpec> {
        self.commands.clone()
    }

    fn register_items(&self) -> ContentMap {
        self.content_of(ContentKind::Item)
    }

    fn register_npcs(&self) -> ContentMap {
        self.content_of(ContentKind::Npc)
    }

    fn register_locations(&self) -> ContentMap {
        self.content_of(ContentKind::Location)
    }

    fn register_recipes(&self) -> ContentMap {
        self.content_of(ContentKind::Recipe)
    }

    fn register_enemies(&self) -> ContentMap {
        self.content_of(ContentKind::Enemy)
    }
}

/// Wrap named lifecycle callbacks (`on_load`, `on_unload`, `on_enable`,
/// `on_disable`) as a plugin
pub fn from_callback_map(
    descriptor: PluginDescriptor,
    callbacks: HashMap<String, LifecycleFn>,
) -> Result<PluginBuilder, DescriptorError> {
    let mut builder = PluginBuilder::from_descriptor(descriptor);

    for (name, callback) in callbacks {
        let slot = match name.as_str() {
            "on_load" => &mut builder.callbacks.on_load,
            "on_unload" => &mut builder.callbacks.on_unload,
            "on_enable" => &mut builder.callbacks.on_enable,
            "on_disable" => &mut builder.callbacks.on_disable,
            _ => return Err(DescriptorError::UnknownCallback(name)),
        };
        *slot = Some(callback);
    }

    Ok(builder)
}
