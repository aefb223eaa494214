//! Plugin manager: discovery, ordered loading, hot reload and routing
//!
//! The manager owns the event bus, the command router, the content registry
//! and the per-plugin scratch state, and is the only thing that talks to
//! plugin instances. Everything that runs plugin code goes through
//! [`PluginHandle::invoke`], so a failing plugin is marked `Failed` and its
//! registrations are withdrawn without disturbing the rest.

use super::{
    declared_content, scan_directory, DiscoverySource, PluginConfig, PluginDescriptor, PluginHandle, PluginState,
    PluginUnit, Snapshot,
};
use crate::commands::{
    parse_input, CommandErrorHandler, CommandMiddleware, CommandOutcome, CommandRouter, CommandSpec, CORE_OWNER,
};
use crate::config::PluginSystemConfig;
use crate::content::{ContentKind, ContentMap, ContentRegistry, ContentSinks};
use crate::error::{DescriptorError, PluginError, Result};
use crate::events::{EventBus, EventMiddleware, EventReport, EventStats, EventType, HookSpec, Payload, ScratchStore};
use crate::game::GameContext;
use crate::resolver::DependencyResolver;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;
use std::sync::Arc;

/// Commands the manager answers itself
const BUILTIN_COMMANDS: &[(&str, &str)] = &[
    ("plugins", "List all plugins and their state"),
    ("plugin_info", "Show details about a plugin: /plugin_info <id>"),
    ("enable", "Enable a disabled plugin: /enable <id>"),
    ("disable", "Disable a plugin: /disable <id>"),
    ("reload", "Hot reload a plugin: /reload <id>"),
    ("content", "Show registered content counts"),
    ("plugin_stats", "Show plugin system statistics"),
];

/// Outcome of [`PluginManager::load_all`]
#[derive(Debug, Clone, Default)]
pub struct LoadReport {
    /// Plugins that reached `Enabled`, in load order
    pub loaded: Vec<String>,
    /// Plugins that were rejected or failed, with the reason
    pub failed: Vec<(String, PluginError)>,
    /// Plugins skipped because the configuration disables them
    pub skipped: Vec<String>,
    /// Non-fatal problems, such as rejected command registrations
    pub warnings: Vec<PluginError>,
}

impl LoadReport {
    pub fn success_count(&self) -> usize {
        self.loaded.len()
    }

    pub fn failure_count(&self) -> usize {
        self.failed.len()
    }

    /// Failure reason for one plugin
    pub fn failure(&self, id: &str) -> Option<&PluginError> {
        self.failed.iter().find(|(failed, _)| failed == id).map(|(_, error)| error)
    }

    /// One line per plugin outcome, for display
    pub fn summary(&self) -> String {
        let mut summary = format!(
            "Loaded {} plugin(s), {} failed",
            self.success_count(),
            self.failure_count()
        );
        for (id, error) in &self.failed {
            let _ = write!(summary, "\n  {}: {}", id, error);
        }
        summary
    }
}

/// Plugin manager statistics
#[derive(Debug, Clone, Default)]
pub struct ManagerStats {
    pub total_plugins: usize,
    pub discovered_plugins: usize,
    pub loaded_plugins: usize,
    pub enabled_plugins: usize,
    pub disabled_plugins: usize,
    pub unloaded_plugins: usize,
    pub failed_plugins: usize,
    pub commands: usize,
    pub content: BTreeMap<ContentKind, usize>,
    pub events: EventStats,
}

/// Hooks, commands and content a plugin declared
struct Registrations {
    hooks: Vec<HookSpec>,
    commands: Vec<CommandSpec>,
    content: Vec<(ContentKind, ContentMap)>,
}

fn collect_registrations(plugin: &dyn super::Plugin) -> Registrations {
    Registrations {
        hooks: plugin.register_hooks(),
        commands: plugin.register_commands(),
        content: ContentKind::ALL
            .iter()
            .map(|kind| (*kind, declared_content(plugin, *kind)))
            .collect(),
    }
}

/// Owns every plugin and the registries they attach to
pub struct PluginManager {
    config: PluginSystemConfig,
    handles: HashMap<String, PluginHandle>,
    /// Ids in discovery order
    discovered: Vec<String>,
    /// Ids of live plugins in load order
    load_order: Vec<String>,
    bus: EventBus,
    router: CommandRouter,
    content: ContentRegistry,
    scratch: ScratchStore,
    discovery_errors: Vec<PluginError>,
    inputs_since_poll: u32,
    next_load_rank: u64,
}

impl PluginManager {
    /// Create a new manager writing content into `sinks`
    pub fn new(config: PluginSystemConfig, sinks: ContentSinks) -> Self {
        tracing::info!(
            "Initializing plugin system v{} for game v{}",
            super::PLUGIN_SYSTEM_VERSION,
            config.game_version
        );

        let mut router = CommandRouter::new();
        for (name, help) in BUILTIN_COMMANDS {
            router.reserve(name, help);
        }

        Self {
            config,
            handles: HashMap::new(),
            discovered: Vec::new(),
            load_order: Vec::new(),
            bus: EventBus::new(),
            router,
            content: ContentRegistry::new(sinks),
            scratch: ScratchStore::new(),
            discovery_errors: Vec::new(),
            inputs_since_poll: 0,
            next_load_rank: 0,
        }
    }

    pub fn config(&self) -> &PluginSystemConfig {
        &self.config
    }

    // ---------------------------------------------------------------------
    // Discovery
    // ---------------------------------------------------------------------

    /// Register plugin sources. Returns the descriptors discovered by this call.
    pub fn discover(&mut self, sources: impl IntoIterator<Item = DiscoverySource>) -> Vec<PluginDescriptor> {
        let mut discovered = Vec::new();

        for source in sources {
            let units = match source {
                DiscoverySource::Directory(dir) => {
                    let (units, errors) = scan_directory(&dir);
                    self.discovery_errors.extend(errors);
                    units
                }
                DiscoverySource::Unit(unit) => vec![unit],
            };

            for unit in units {
                if let Some(descriptor) = self.adopt(unit) {
                    discovered.push(descriptor);
                }
            }
        }

        tracing::info!("Discovered {} plugin(s)", discovered.len());
        discovered
    }

    /// Discover from every configured plugin directory plus the given units
    pub fn discover_configured(&mut self, units: Vec<Arc<dyn PluginUnit>>) -> Vec<PluginDescriptor> {
        let sources: Vec<DiscoverySource> = units
            .into_iter()
            .map(DiscoverySource::Unit)
            .chain(self.config.plugin_dirs.iter().cloned().map(DiscoverySource::Directory))
            .collect();
        self.discover(sources)
    }

    fn adopt(&mut self, unit: Arc<dyn PluginUnit>) -> Option<PluginDescriptor> {
        let descriptor = unit.descriptor().clone();

        if let Err(source) = descriptor.validate() {
            tracing::warn!("Skipping plugin from {}: {}", unit.origin(), source);
            self.discovery_errors.push(PluginError::descriptor(descriptor.id.clone(), source));
            return None;
        }

        if let Some(existing) = self.handles.get(&descriptor.id) {
            tracing::warn!(
                "Skipping plugin {} from {}: id already provided by {}",
                descriptor.id,
                unit.origin(),
                existing.origin()
            );
            self.discovery_errors.push(PluginError::descriptor(
                descriptor.id.clone(),
                DescriptorError::DuplicateId(descriptor.id.clone()),
            ));
            return None;
        }

        tracing::debug!("Discovered plugin {} v{} ({})", descriptor.id, descriptor.version, unit.origin());
        self.discovered.push(descriptor.id.clone());
        self.handles.insert(descriptor.id.clone(), PluginHandle::new(unit));
        Some(descriptor)
    }

    /// Problems found while discovering, such as malformed manifests
    pub fn discovery_errors(&self) -> &[PluginError] {
        &self.discovery_errors
    }

    // ---------------------------------------------------------------------
    // Loading
    // ---------------------------------------------------------------------

    /// Resolve and load every discovered plugin that is not live yet
    pub fn load_all(&mut self, game: &mut dyn GameContext) -> LoadReport {
        let mut report = LoadReport::default();

        let mut candidates = Vec::new();
        for id in &self.discovered {
            let Some(handle) = self.handles.get(id) else {
                continue;
            };
            if !matches!(handle.state(), PluginState::Discovered | PluginState::Unloaded) {
                continue;
            }
            if self.config.is_disabled(id) {
                tracing::info!("Plugin {} is disabled by configuration", id);
                report.skipped.push(id.clone());
                continue;
            }
            candidates.push(handle.descriptor().clone());
        }

        let active = self.enabled_descriptors(None);
        let resolution = DependencyResolver::new()
            .with_game_version(self.config.game_version.clone())
            .resolve(&candidates, &active);

        for error in resolution.rejected {
            let ids: Vec<String> = match &error {
                PluginError::Cycle { ids } => ids.clone(),
                other => other.plugin().map(str::to_string).into_iter().collect(),
            };
            for id in ids {
                if let Some(handle) = self.handles.get_mut(&id) {
                    handle.fail(error.clone());
                }
                report.failed.push((id, error.clone()));
            }
        }

        for id in resolution.order {
            match self.load_one(&id, game) {
                Ok(warnings) => {
                    report.warnings.extend(warnings);
                    report.loaded.push(id);
                }
                Err(error) => report.failed.push((id, error)),
            }
        }

        if report.failed.is_empty() {
            tracing::info!("Loaded {} plugin(s)", report.success_count());
        } else {
            tracing::warn!(
                "Loaded {} plugin(s), {} failed",
                report.success_count(),
                report.failure_count()
            );
        }
        report
    }

    /// Load and enable a single discovered, unloaded or failed plugin
    pub fn load(&mut self, id: &str, game: &mut dyn GameContext) -> Result<Vec<PluginError>> {
        let handle = self.handles.get(id).ok_or_else(|| PluginError::NotFound(id.to_string()))?;
        if !matches!(
            handle.state(),
            PluginState::Discovered | PluginState::Unloaded | PluginState::Failed
        ) {
            return Err(PluginError::InvalidState {
                plugin: id.to_string(),
                state: handle.state(),
                action: "load".to_string(),
            });
        }

        let descriptor = handle.descriptor().clone();
        let active = self.enabled_descriptors(Some(id));
        let resolution = DependencyResolver::new()
            .with_game_version(self.config.game_version.clone())
            .resolve(std::slice::from_ref(&descriptor), &active);

        if let Some(error) = resolution.rejected.into_iter().next() {
            if let Some(handle) = self.handles.get_mut(id) {
                handle.fail(error.clone());
            }
            return Err(error);
        }

        self.load_one(id, game)
    }

    /// Descriptors of enabled plugins, other than `except`
    fn enabled_descriptors(&self, except: Option<&str>) -> Vec<&PluginDescriptor> {
        self.handles
            .values()
            .filter(|handle| handle.state() == PluginState::Enabled && Some(handle.id()) != except)
            .map(PluginHandle::descriptor)
            .collect()
    }

    /// Check a plugin's current descriptor against what is enabled right now:
    /// every hard dependency enabled, no conflicts, a matching game version
    fn check_admission(&self, id: &str) -> Result<()> {
        let descriptor = self.descriptor(id).ok_or_else(|| PluginError::NotFound(id.to_string()))?;

        if let Some(dependency) = descriptor
            .dependencies
            .iter()
            .find(|dep| self.state(dep) != Some(PluginState::Enabled))
        {
            return Err(PluginError::MissingDependency {
                plugin: id.to_string(),
                dependency: dependency.clone(),
            });
        }

        let active = self.enabled_descriptors(Some(id));
        let resolution = DependencyResolver::new()
            .with_game_version(self.config.game_version.clone())
            .resolve(std::slice::from_ref(descriptor), &active);
        match resolution.rejected.into_iter().next() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn load_one(&mut self, id: &str, game: &mut dyn GameContext) -> Result<Vec<PluginError>> {
        let descriptor = self
            .handles
            .get(id)
            .map(|handle| handle.descriptor().clone())
            .ok_or_else(|| PluginError::NotFound(id.to_string()))?;

        if let Some(dependency) = descriptor
            .dependencies
            .iter()
            .find(|dep| self.state(dep) != Some(PluginState::Enabled))
        {
            let error = PluginError::MissingDependency {
                plugin: id.to_string(),
                dependency: dependency.clone(),
            };
            self.fail(id, error.clone());
            return Err(error);
        }

        let handle = self.handle_mut(id)?;
        if let Err(reason) = handle.instantiate() {
            let error = PluginError::Load {
                plugin: id.to_string(),
                reason,
            };
            self.fail(id, error.clone());
            return Err(error);
        }

        match self.bring_up(id, game) {
            Ok(warnings) => {
                if !self.load_order.iter().any(|loaded| loaded == id) {
                    self.load_order.push(id.to_string());
                }
                if let Some(handle) = self.handles.get_mut(id) {
                    handle.clear_error();
                    tracing::info!("Loaded plugin: {} v{}", id, handle.descriptor().version);
                }
                self.announce(EventType::PluginLoad, id, game);
                Ok(warnings)
            }
            Err(reason) => {
                let error = PluginError::Load {
                    plugin: id.to_string(),
                    reason,
                };
                self.fail(id, error.clone());
                Err(error)
            }
        }
    }

    /// Configure, load, register and enable a freshly instantiated plugin
    fn bring_up(&mut self, id: &str, game: &mut dyn GameContext) -> std::result::Result<Vec<PluginError>, String> {
        let overrides = self.config.overrides_for(id);
        let handle = self.handles.get_mut(id).ok_or_else(|| format!("plugin '{}' vanished", id))?;

        let resolved = handle
            .descriptor()
            .resolve_config(&overrides)
            .map_err(|e| format!("invalid config: {}", e))?;
        handle.invoke("apply_config", |plugin| plugin.apply_config(&resolved))?;
        handle.descriptor_mut().config = resolved;

        handle.invoke("on_load", |plugin| plugin.on_load(&mut *game))?;
        let registrations = handle.invoke("register", |plugin| Ok(collect_registrations(&*plugin)))?;
        handle.set_state(PluginState::Loaded).map_err(|e| e.to_string())?;

        let warnings = self.attach(id, registrations);

        let handle = self.handles.get_mut(id).ok_or_else(|| format!("plugin '{}' vanished", id))?;
        handle.invoke("on_enable", |plugin| plugin.on_enable(&mut *game))?;
        handle.set_state(PluginState::Enabled).map_err(|e| e.to_string())?;
        Ok(warnings)
    }

    /// Register a plugin's hooks, commands and content
    fn attach(&mut self, id: &str, registrations: Registrations) -> Vec<PluginError> {
        let mut warnings = Vec::new();

        let rank = self.load_rank(id);
        for hook in registrations.hooks {
            self.bus.subscribe_spec(hook, id, rank);
        }

        for command in registrations.commands {
            if let Err(error) = self.router.register(command, id) {
                warnings.push(error);
            }
        }

        let mut content = 0;
        for (kind, entries) in registrations.content {
            content += self.content.register_batch(kind, id, entries);
        }

        tracing::debug!(
            "Attached plugin {}: {} hooks, {} commands, {} content entries",
            id,
            self.bus.owned_by(id),
            self.router.owned_by(id).len(),
            content
        );
        warnings
    }

    /// Withdraw every registration a plugin owns
    fn detach(&mut self, id: &str) {
        let hooks = self.bus.unsubscribe_all(id);
        let commands = self.router.unregister_all(id);
        let content = self.content.withdraw(id);
        if hooks + commands + content > 0 {
            tracing::debug!(
                "Detached plugin {}: {} hooks, {} commands, {} content entries",
                id, hooks, commands, content
            );
        }
    }

    /// Rank used to order this plugin's hooks among equal priorities,
    /// assigned the first time it joins the load order
    fn load_rank(&mut self, id: &str) -> u64 {
        let next = self.next_load_rank;
        let Some(handle) = self.handles.get_mut(id) else {
            return crate::events::UNRANKED;
        };
        match handle.load_rank() {
            Some(rank) => rank,
            None => {
                handle.set_load_rank(Some(next));
                self.next_load_rank += 1;
                next
            }
        }
    }

    fn fail(&mut self, id: &str, error: PluginError) {
        self.detach(id);
        self.load_order.retain(|loaded| loaded != id);
        if let Some(handle) = self.handles.get_mut(id) {
            handle.set_load_rank(None);
            handle.fail(error);
        }
    }

    /// Fail a plugin whose reload went wrong and disable what depends on it
    fn fail_reload(&mut self, id: &str, error: PluginError, game: &mut dyn GameContext) -> PluginError {
        self.fail(id, error.clone());
        for dependent in self.dependents(id) {
            if self.state(&dependent) == Some(PluginState::Enabled) {
                tracing::warn!("Disabling {} because its dependency {} failed to reload", dependent, id);
                if let Err(e) = self.disable(&dependent, game) {
                    tracing::warn!("Could not disable {}: {}", dependent, e);
                }
            }
        }
        error
    }

    fn announce(&mut self, event: EventType, id: &str, game: &mut dyn GameContext) {
        let mut payload = Payload::new();
        payload.insert("plugin_id".to_string(), Value::from(id));
        self.emit_event(event, payload, game);
    }

    fn handle_mut(&mut self, id: &str) -> Result<&mut PluginHandle> {
        self.handles.get_mut(id).ok_or_else(|| PluginError::NotFound(id.to_string()))
    }

    // ---------------------------------------------------------------------
    // Enable / disable / unload
    // ---------------------------------------------------------------------

    /// Live plugins that hard-depend on `id`, most recently loaded first
    fn dependents(&self, id: &str) -> Vec<String> {
        self.load_order
            .iter()
            .rev()
            .filter(|other| {
                self.handles
                    .get(*other)
                    .map(|handle| handle.state().is_loaded() && handle.descriptor().dependencies.contains(id))
                    .unwrap_or(false)
            })
            .cloned()
            .collect()
    }

    /// Re-register a disabled plugin's content and call `on_enable`
    pub fn enable(&mut self, id: &str, game: &mut dyn GameContext) -> Result<()> {
        let handle = self.handles.get(id).ok_or_else(|| PluginError::NotFound(id.to_string()))?;
        if handle.state() != PluginState::Disabled {
            return Err(PluginError::InvalidState {
                plugin: id.to_string(),
                state: handle.state(),
                action: "enable".to_string(),
            });
        }

        if let Some(dependency) = handle
            .descriptor()
            .dependencies
            .iter()
            .find(|dep| self.state(dep) != Some(PluginState::Enabled))
        {
            return Err(PluginError::MissingDependency {
                plugin: id.to_string(),
                dependency: dependency.clone(),
            });
        }

        if let Some(other) = self
            .enabled_descriptors(Some(id))
            .into_iter()
            .find(|other| handle.descriptor().conflicts_with(other))
        {
            return Err(PluginError::Conflict {
                plugin: id.to_string(),
                other: other.id.clone(),
            });
        }

        let handle = self.handle_mut(id)?;
        let registrations = handle.invoke("register", |plugin| Ok(collect_registrations(&*plugin)));
        let registrations = match registrations {
            Ok(registrations) => registrations,
            Err(reason) => {
                let error = PluginError::Load {
                    plugin: id.to_string(),
                    reason,
                };
                self.fail(id, error.clone());
                return Err(error);
            }
        };
        for warning in self.attach(id, registrations) {
            tracing::warn!("{}", warning);
        }

        let handle = self.handle_mut(id)?;
        if let Err(reason) = handle.invoke("on_enable", |plugin| plugin.on_enable(&mut *game)) {
            let error = PluginError::Load {
                plugin: id.to_string(),
                reason,
            };
            self.fail(id, error.clone());
            return Err(error);
        }
        handle.set_state(PluginState::Enabled)?;
        tracing::info!("Enabled plugin: {}", id);
        Ok(())
    }

    /// Call `on_disable` and withdraw the plugin's registrations. Enabled
    /// dependents are disabled first; one that fails to disable is marked
    /// `Failed` and the cascade carries on. Returns every disabled id.
    pub fn disable(&mut self, id: &str, game: &mut dyn GameContext) -> Result<Vec<String>> {
        let state = self.state(id).ok_or_else(|| PluginError::NotFound(id.to_string()))?;
        if state != PluginState::Enabled {
            return Err(PluginError::InvalidState {
                plugin: id.to_string(),
                state,
                action: "disable".to_string(),
            });
        }

        let mut disabled = Vec::new();
        self.disable_cascade(id, game, &mut disabled)?;
        Ok(disabled)
    }

    fn disable_cascade(&mut self, id: &str, game: &mut dyn GameContext, disabled: &mut Vec<String>) -> Result<()> {
        for dependent in self.dependents(id) {
            if self.state(&dependent) == Some(PluginState::Enabled) {
                tracing::info!("Disabling {} because it depends on {}", dependent, id);
                if let Err(error) = self.disable_cascade(&dependent, game, disabled) {
                    tracing::warn!("Dependent {} failed while disabling {}: {}", dependent, id, error);
                }
            }
        }

        let handle = self.handle_mut(id)?;
        let result = handle.invoke("on_disable", |plugin| plugin.on_disable(&mut *game));
        self.detach(id);

        match result {
            Ok(()) => {
                self.handle_mut(id)?.set_state(PluginState::Disabled)?;
                tracing::info!("Disabled plugin: {}", id);
                disabled.push(id.to_string());
                Ok(())
            }
            Err(reason) => {
                let error = PluginError::Handler {
                    plugin: id.to_string(),
                    context: "disable".to_string(),
                    message: reason,
                };
                self.fail(id, error.clone());
                Err(error)
            }
        }
    }

    /// Unload a plugin, unloading its live dependents first
    ///
    /// Registrations are withdrawn even when `on_disable` or `on_unload`
    /// fail; those failures are logged. Returns every unloaded id.
    pub fn unload(&mut self, id: &str, game: &mut dyn GameContext) -> Result<Vec<String>> {
        let state = self.state(id).ok_or_else(|| PluginError::NotFound(id.to_string()))?;
        if !state.is_loaded() && state != PluginState::Failed {
            return Err(PluginError::InvalidState {
                plugin: id.to_string(),
                state,
                action: "unload".to_string(),
            });
        }

        let mut unloaded = Vec::new();
        for dependent in self.dependents(id) {
            if self.state(&dependent).map(PluginState::is_loaded).unwrap_or(false) {
                tracing::info!("Unloading {} because it depends on {}", dependent, id);
                unloaded.extend(self.unload(&dependent, game)?);
            }
        }

        self.tear_down(id, game);
        self.scratch.clear(id);
        self.load_order.retain(|loaded| loaded != id);
        let handle = self.handle_mut(id)?;
        handle.set_load_rank(None);
        handle.set_state(PluginState::Unloaded)?;
        tracing::info!("Unloaded plugin: {}", id);

        self.announce(EventType::PluginUnload, id, game);
        unloaded.push(id.to_string());
        Ok(unloaded)
    }

    /// Run `on_disable` (if enabled) and `on_unload`, then drop every
    /// registration and the instance
    fn tear_down(&mut self, id: &str, game: &mut dyn GameContext) {
        if let Some(handle) = self.handles.get_mut(id) {
            if handle.has_instance() {
                if handle.state() == PluginState::Enabled {
                    if let Err(reason) = handle.invoke("on_disable", |plugin| plugin.on_disable(&mut *game)) {
                        tracing::warn!("Plugin {}: {}", id, reason);
                    }
                }
                if let Err(reason) = handle.invoke("on_unload", |plugin| plugin.on_unload(&mut *game)) {
                    tracing::warn!("Plugin {}: {}", id, reason);
                }
            }
            handle.drop_instance();
        }
        self.detach(id);
    }

    /// Unload every live plugin in reverse load order
    pub fn shutdown(&mut self, game: &mut dyn GameContext) {
        let order: Vec<String> = self.load_order.iter().rev().cloned().collect();
        for id in order {
            if self.state(&id).map(PluginState::is_loaded).unwrap_or(false) {
                if let Err(e) = self.unload(&id, game) {
                    tracing::error!("Failed to unload plugin {} during shutdown: {}", id, e);
                }
            }
        }
        tracing::info!("Plugin system shut down");
    }

    // ---------------------------------------------------------------------
    // Hot reload
    // ---------------------------------------------------------------------

    /// Replace a plugin's instance with a fresh one from its source,
    /// carrying over the snapshot from `on_before_reload`
    ///
    /// Dependents stay loaded. The new descriptor must still have its hard
    /// dependencies enabled and must not conflict with an enabled plugin. A
    /// failure after teardown leaves the plugin `Failed` and disables its
    /// enabled dependents; the previous instance is not restored.
    pub fn reload(&mut self, id: &str, game: &mut dyn GameContext) -> Result<()> {
        let handle = self.handles.get(id).ok_or_else(|| PluginError::NotFound(id.to_string()))?;
        if !handle.descriptor().supports_hot_reload {
            return Err(PluginError::Reload {
                plugin: id.to_string(),
                reason: "plugin does not support hot reload".to_string(),
            });
        }
        let state = handle.state();
        if !matches!(state, PluginState::Loaded | PluginState::Enabled | PluginState::Failed) {
            return Err(PluginError::InvalidState {
                plugin: id.to_string(),
                state,
                action: "reload".to_string(),
            });
        }

        tracing::info!("Reloading plugin: {}", id);

        let handle = self.handle_mut(id)?;
        let snapshot = if handle.has_instance() {
            handle
                .invoke("on_before_reload", |plugin| plugin.on_before_reload(&mut *game))
                .map_err(|reason| PluginError::Reload {
                    plugin: id.to_string(),
                    reason,
                })?
        } else {
            Snapshot::new()
        };

        self.tear_down(id, game);
        self.handle_mut(id)?.set_state(PluginState::Reloading)?;

        let handle = self.handle_mut(id)?;
        if let Err(reason) = handle.instantiate() {
            let error = PluginError::Reload {
                plugin: id.to_string(),
                reason,
            };
            return Err(self.fail_reload(id, error, game));
        }

        if let Err(error) = self.check_admission(id) {
            tracing::warn!("Reloaded plugin {} is no longer admissible: {}", id, error);
            return Err(self.fail_reload(id, error, game));
        }

        let restored = self.bring_up(id, game).and_then(|warnings| {
            for warning in warnings {
                tracing::warn!("{}", warning);
            }
            let handle = self
                .handles
                .get_mut(id)
                .ok_or_else(|| format!("plugin '{}' vanished", id))?;
            handle.invoke("on_after_reload", |plugin| plugin.on_after_reload(&mut *game, snapshot))
        });

        match restored {
            Ok(()) => {
                let handle = self.handle_mut(id)?;
                handle.stats_mut().reload_count += 1;
                handle.clear_error();
                if !self.load_order.iter().any(|loaded| loaded == id) {
                    self.load_order.push(id.to_string());
                }
                tracing::info!("Reloaded plugin: {}", id);
                Ok(())
            }
            Err(reason) => {
                let error = PluginError::Reload {
                    plugin: id.to_string(),
                    reason,
                };
                Err(self.fail_reload(id, error, game))
            }
        }
    }

    /// Hot-reloadable plugins whose source changed since it was last read
    pub fn check_changes(&mut self) -> Vec<String> {
        let mut changed = Vec::new();
        for id in &self.discovered {
            let Some(handle) = self.handles.get_mut(id) else {
                continue;
            };
            if !handle.source_changed() {
                continue;
            }
            let live = handle.state().is_loaded() || handle.state().is_failed();
            if handle.descriptor().supports_hot_reload && live {
                changed.push(id.clone());
            } else {
                tracing::debug!("Source of plugin {} changed; not reloading", id);
                handle.mark_source_seen();
            }
        }
        changed
    }

    /// Reload every changed hot-reloadable plugin
    pub fn reload_changed(&mut self, game: &mut dyn GameContext) -> Vec<(String, Result<()>)> {
        self.check_changes()
            .into_iter()
            .map(|id| {
                let result = self.reload(&id, game);
                if let Some(handle) = self.handles.get_mut(&id) {
                    handle.mark_source_seen();
                }
                (id, result)
            })
            .collect()
    }

    /// Count a handled input and poll for changes when due
    pub fn poll_hot_reload(&mut self, game: &mut dyn GameContext) -> Vec<(String, Result<()>)> {
        if !self.config.hot_reload.enabled {
            return Vec::new();
        }
        self.inputs_since_poll += 1;
        if self.inputs_since_poll < self.config.hot_reload.poll_every {
            return Vec::new();
        }
        self.inputs_since_poll = 0;
        self.reload_changed(game)
    }

    // ---------------------------------------------------------------------
    // Config
    // ---------------------------------------------------------------------

    pub fn plugin_config(&self, id: &str) -> Option<&PluginConfig> {
        self.handles.get(id).map(|handle| &handle.descriptor().config)
    }

    /// Merge overrides into the ones already set, validate the result,
    /// apply it to the live instance and keep it for later loads
    pub fn set_config(&mut self, id: &str, overrides: PluginConfig) -> Result<()> {
        let mut merged = self.config.overrides_for(id);
        merged.extend(overrides);

        let handle = self.handle_mut(id)?;
        let resolved = handle
            .descriptor()
            .resolve_config(&merged)
            .map_err(|source| PluginError::descriptor(id, source))?;

        if handle.has_instance() {
            handle
                .invoke("apply_config", |plugin| plugin.apply_config(&resolved))
                .map_err(|message| PluginError::Handler {
                    plugin: id.to_string(),
                    context: "apply_config".to_string(),
                    message,
                })?;
        }
        handle.descriptor_mut().config = resolved;
        self.config.overrides.insert(id.to_string(), merged);
        Ok(())
    }

    /// Add middleware that sees every event payload before any plugin hook
    pub fn add_event_middleware(&mut self, name: &str, middleware: EventMiddleware) {
        self.bus.add_middleware(name, middleware);
    }

    /// Add middleware that runs before every plugin command
    pub fn add_command_middleware(&mut self, name: &str, middleware: CommandMiddleware) {
        self.router.add_middleware(name, middleware);
    }

    pub fn add_command_error_handler(&mut self, handler: CommandErrorHandler) {
        self.router.add_error_handler(handler);
    }

    // ---------------------------------------------------------------------
    // Events and commands
    // ---------------------------------------------------------------------

    /// Publish an event to every subscribed plugin
    pub fn emit_event(&mut self, event: EventType, payload: Payload, game: &mut dyn GameContext) -> EventReport {
        let report = self.bus.publish(&event, &payload, game, &mut self.scratch);
        if report.failure_count() > 0 {
            tracing::warn!(
                "Event {}: {} of {} handler(s) failed",
                event,
                report.failure_count(),
                report.invoked()
            );
        }
        report
    }

    /// Route a `/`-prefixed input line; anything else is not a command
    pub fn handle_input(&mut self, line: &str, game: &mut dyn GameContext) -> Option<CommandOutcome> {
        let (name, args) = parse_input(line)?;
        Some(self.execute_command(&name, &args, game))
    }

    /// Run a command by name
    pub fn execute_command(&mut self, name: &str, args: &[String], game: &mut dyn GameContext) -> CommandOutcome {
        let name = name.to_lowercase();
        match name.as_str() {
            "plugins" => CommandOutcome::ok(self.describe_plugins(), CORE_OWNER),
            "content" => CommandOutcome::ok(self.describe_content(), CORE_OWNER),
            "plugin_stats" => CommandOutcome::ok(self.describe_stats(), CORE_OWNER),
            "plugin_info" | "enable" | "disable" | "reload" => {
                let Some(id) = args.first() else {
                    return CommandOutcome::failed(format!("Usage: /{} <plugin_id>", name), Some(CORE_OWNER.to_string()));
                };
                self.plugin_command(&name, id, game)
            }
            _ => self.router.dispatch(&name, args, game, &mut self.scratch),
        }
    }

    fn plugin_command(&mut self, name: &str, id: &str, game: &mut dyn GameContext) -> CommandOutcome {
        let result = match name {
            "plugin_info" => self.describe_plugin(id),
            "enable" => self.enable(id, game).map(|()| format!("Enabled plugin: {}", id)),
            "disable" => self
                .disable(id, game)
                .map(|ids| format!("Disabled plugin(s): {}", ids.join(", "))),
            _ => self.reload(id, game).map(|()| format!("Reloaded plugin: {}", id)),
        };

        match result {
            Ok(output) => CommandOutcome::ok(output, CORE_OWNER),
            Err(error) => CommandOutcome::failed(error.to_string(), Some(CORE_OWNER.to_string())),
        }
    }

    fn describe_plugins(&self) -> String {
        if self.discovered.is_empty() {
            return "No plugins discovered.".to_string();
        }

        let mut out = String::from("Plugins:");
        for id in &self.discovered {
            if let Some(handle) = self.handles.get(id) {
                let descriptor = handle.descriptor();
                let _ = write!(
                    out,
                    "\n  {} v{} [{}] - {}",
                    descriptor.id,
                    descriptor.version,
                    handle.state(),
                    descriptor.display_name()
                );
            }
        }
        out
    }

    fn describe_plugin(&self, id: &str) -> Result<String> {
        let handle = self.handles.get(id).ok_or_else(|| PluginError::NotFound(id.to_string()))?;
        let descriptor = handle.descriptor();

        let join = |set: &std::collections::BTreeSet<String>| {
            if set.is_empty() {
                "none".to_string()
            } else {
                set.iter().cloned().collect::<Vec<_>>().join(", ")
            }
        };

        let mut out = format!("{} v{}", descriptor.display_name(), descriptor.version);
        let _ = write!(out, "\n  id: {}", descriptor.id);
        if !descriptor.author.is_empty() {
            let _ = write!(out, "\n  author: {}", descriptor.author);
        }
        if !descriptor.description.is_empty() {
            let _ = write!(out, "\n  {}", descriptor.description);
        }
        let _ = write!(out, "\n  state: {}", handle.state());
        let _ = write!(out, "\n  source: {}", handle.origin());
        let _ = write!(out, "\n  priority: {}", descriptor.priority);
        let _ = write!(out, "\n  dependencies: {}", join(&descriptor.dependencies));
        let _ = write!(out, "\n  soft dependencies: {}", join(&descriptor.soft_dependencies));
        let _ = write!(out, "\n  conflicts: {}", join(&descriptor.conflicts));
        let _ = write!(out, "\n  provides: {}", join(&descriptor.provides));
        let _ = write!(out, "\n  hot reload: {}", if descriptor.supports_hot_reload { "yes" } else { "no" });
        for (name, value) in &descriptor.config {
            let _ = write!(out, "\n  config {} = {}", name, value);
        }

        let commands = self.router.owned_by(id);
        if !commands.is_empty() {
            let _ = write!(out, "\n  commands: /{}", commands.join(", /"));
        }
        let _ = write!(out, "\n  hooks: {}", self.bus.owned_by(id));
        for (kind, count) in self.content.owned_by(id) {
            let _ = write!(out, "\n  {}: {}", kind, count);
        }

        let stats = handle.stats();
        let _ = write!(
            out,
            "\n  loads: {}, reloads: {}, failures: {}",
            stats.load_count, stats.reload_count, stats.failure_count
        );
        if let Some(error) = handle.last_error() {
            let _ = write!(out, "\n  last error: {}", error);
        }
        Ok(out)
    }

    fn describe_content(&self) -> String {
        let mut out = String::from("Registered content:");
        for (kind, count) in self.content.stats() {
            let _ = write!(out, "\n  {}: {}", kind, count);
        }
        out
    }

    fn describe_stats(&self) -> String {
        let stats = self.stats();
        format!(
            "Plugins: {} total, {} enabled, {} disabled, {} failed\nCommands: {}\nEvents: {} published, {} handler calls, {} handler failures",
            stats.total_plugins,
            stats.enabled_plugins,
            stats.disabled_plugins,
            stats.failed_plugins,
            stats.commands,
            stats.events.published,
            stats.events.handler_calls,
            stats.events.handler_failures
        )
    }

    // ---------------------------------------------------------------------
    // Queries
    // ---------------------------------------------------------------------

    pub fn state(&self, id: &str) -> Option<PluginState> {
        self.handles.get(id).map(PluginHandle::state)
    }

    pub fn descriptor(&self, id: &str) -> Option<&PluginDescriptor> {
        self.handles.get(id).map(PluginHandle::descriptor)
    }

    pub fn handle(&self, id: &str) -> Option<&PluginHandle> {
        self.handles.get(id)
    }

    /// Live plugins in load order
    pub fn load_order(&self) -> &[String] {
        &self.load_order
    }

    /// Enabled plugins in load order
    pub fn enabled_plugins(&self) -> Vec<&str> {
        self.load_order
            .iter()
            .filter(|id| self.state(id) == Some(PluginState::Enabled))
            .map(String::as_str)
            .collect()
    }

    pub fn is_enabled(&self, id: &str) -> bool {
        self.state(id) == Some(PluginState::Enabled)
    }

    pub fn events(&self) -> &EventBus {
        &self.bus
    }

    pub fn commands(&self) -> &CommandRouter {
        &self.router
    }

    pub fn content(&self) -> &ContentRegistry {
        &self.content
    }

    /// Scratch state of one plugin, if it has any
    pub fn scratch(&self, id: &str) -> Option<&crate::events::Scratch> {
        self.scratch.get(id)
    }

    pub fn stats(&self) -> ManagerStats {
        let mut stats = ManagerStats {
            total_plugins: self.handles.len(),
            commands: self.router.len(),
            content: self.content.stats(),
            events: self.bus.stats().clone(),
            ..ManagerStats::default()
        };

        for handle in self.handles.values() {
            match handle.state() {
                PluginState::Discovered => stats.discovered_plugins += 1,
                PluginState::Loaded | PluginState::Reloading => stats.loaded_plugins += 1,
                PluginState::Enabled => stats.enabled_plugins += 1,
                PluginState::Disabled => stats.disabled_plugins += 1,
                PluginState::Unloaded => stats.unloaded_plugins += 1,
                PluginState::Failed => stats.failed_plugins += 1,
            }
        }
        stats
    }
}

impl Default for PluginManager {
    fn default() -> Self {
        Self::new(PluginSystemConfig::default(), ContentSinks::in_memory())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::SimpleGame;
    use crate::plugin::{NativeUnit, PluginBuilder};
    use serde_json::json;

    fn manager_with(builders: Vec<PluginBuilder>) -> PluginManager {
        let mut manager = PluginManager::default();
        manager.discover(builders.into_iter().map(|b| NativeUnit::from_builder(b).into()));
        manager
    }

    #[test]
    fn test_builtin_commands_are_reserved() {
        let mut manager = manager_with(vec![
            PluginBuilder::new("sneaky").command("reload", "Not yours", |_ctx, _args| Ok(String::new()))
        ]);
        let mut game = SimpleGame::default();
        let report = manager.load_all(&mut game);

        assert_eq!(report.loaded, vec!["sneaky"]);
        assert_eq!(report.warnings.len(), 1);
        assert!(manager.commands().owned_by("sneaky").is_empty());
    }

    #[test]
    fn test_load_failure_withdraws_partial_registrations() {
        let mut manager = manager_with(vec![PluginBuilder::new("flaky")
            .command("flaky", "", |_ctx, _args| Ok(String::new()))
            .content(ContentKind::Item, "charm", json!({ "name": "Charm" }))
            .on_enable(|_game| Err(anyhow::anyhow!("refused")))]);
        let mut game = SimpleGame::default();
        let report = manager.load_all(&mut game);

        assert!(matches!(report.failure("flaky"), Some(PluginError::Load { .. })));
        assert_eq!(manager.state("flaky"), Some(PluginState::Failed));
        assert!(manager.commands().is_empty());
        assert_eq!(manager.content().get(ContentKind::Item, "charm"), None);
    }

    #[test]
    fn test_config_overrides_reach_plugin() {
        let mut config = PluginSystemConfig::default();
        config.plugin_dirs.clear();
        let mut overrides = PluginConfig::new();
        overrides.insert("rate".to_string(), json!(0.5));
        config.overrides.insert("tuned".to_string(), overrides);

        let mut manager = PluginManager::new(config, ContentSinks::in_memory());
        manager.discover([NativeUnit::from_builder(
            PluginBuilder::new("tuned")
                .config_option("rate", crate::plugin::ConfigOption::number(0.1).with_range(0.0, 1.0)),
        )
        .into()]);
        let mut game = SimpleGame::default();
        manager.load_all(&mut game);

        assert_eq!(manager.plugin_config("tuned").unwrap()["rate"], json!(0.5));

        let mut bad = PluginConfig::new();
        bad.insert("rate".to_string(), json!(3.0));
        assert!(manager.set_config("tuned", bad).is_err());
        assert_eq!(manager.plugin_config("tuned").unwrap()["rate"], json!(0.5));
    }

    #[test]
    fn test_set_config_merges_with_earlier_overrides() {
        let mut manager = manager_with(vec![PluginBuilder::new("tuned")
            .config_option("rate", crate::plugin::ConfigOption::number(0.1))
            .config_option("loud", crate::plugin::ConfigOption::boolean(false))]);
        let mut game = SimpleGame::default();
        manager.load_all(&mut game);

        let mut first = PluginConfig::new();
        first.insert("rate".to_string(), json!(0.5));
        manager.set_config("tuned", first).unwrap();

        let mut second = PluginConfig::new();
        second.insert("loud".to_string(), json!(true));
        manager.set_config("tuned", second).unwrap();

        let config = manager.plugin_config("tuned").unwrap();
        assert_eq!(config["rate"], json!(0.5));
        assert_eq!(config["loud"], json!(true));
    }

    #[test]
    fn test_middleware_passes_through_manager() {
        let mut manager = manager_with(vec![PluginBuilder::new("market")
            .command("trade", "Trade goods", |_ctx, _args| Ok("traded".to_string()))
            .hook(EventType::ItemPickup, 10, |ctx, payload| {
                if payload.get("tagged") == Some(&json!(true)) {
                    ctx.game.add_counter("tagged", 1);
                }
                Ok(())
            })]);
        manager.add_event_middleware(
            "tagger",
            crate::events::event_middleware(|_event, payload| {
                payload.insert("tagged".to_string(), json!(true));
                Ok(())
            }),
        );
        manager.add_command_middleware(
            "closed_market",
            crate::commands::command_middleware(|_game, name, _args| Ok(name != "trade")),
        );
        let mut game = SimpleGame::default();
        manager.load_all(&mut game);

        manager.emit_event(EventType::ItemPickup, Payload::new(), &mut game);
        assert_eq!(game.counter("tagged"), 1);

        let outcome = manager.execute_command("trade", &[], &mut game);
        assert!(!outcome.success);
        assert!(manager.execute_command("plugins", &[], &mut game).success);
    }

    #[test]
    fn test_disabled_by_configuration() {
        let mut config = PluginSystemConfig::default();
        config.disabled.insert("muted".to_string());
        let mut manager = PluginManager::new(config, ContentSinks::in_memory());
        manager.discover([NativeUnit::from_builder(PluginBuilder::new("muted")).into()]);

        let mut game = SimpleGame::default();
        let report = manager.load_all(&mut game);
        assert_eq!(report.skipped, vec!["muted"]);
        assert_eq!(manager.state("muted"), Some(PluginState::Discovered));
    }

    #[test]
    fn test_duplicate_discovery_is_reported() {
        let mut manager = manager_with(vec![PluginBuilder::new("twin"), PluginBuilder::new("twin")]);
        assert_eq!(manager.discovery_errors().len(), 1);
        let mut game = SimpleGame::default();
        assert_eq!(manager.load_all(&mut game).loaded, vec!["twin"]);
    }

    #[test]
    fn test_builtin_plugin_commands() {
        let mut manager = manager_with(vec![PluginBuilder::new("lore").name("Lore")]);
        let mut game = SimpleGame::default();
        manager.load_all(&mut game);

        let outcome = manager.handle_input("/plugins", &mut game).unwrap();
        assert!(outcome.success);
        assert!(outcome.output.contains("lore v1.0.0 [Enabled] - Lore"));

        let outcome = manager.handle_input("/plugin_info lore", &mut game).unwrap();
        assert!(outcome.output.contains("state: Enabled"));

        let outcome = manager.handle_input("/plugin_info", &mut game).unwrap();
        assert!(!outcome.success);

        let outcome = manager.handle_input("/reload lore", &mut game).unwrap();
        assert!(!outcome.success);
        assert!(outcome.output.contains("does not support hot reload"));

        assert!(manager.handle_input("look around", &mut game).is_none());
    }

    #[test]
    fn test_plugin_load_event_is_announced() {
        let mut manager = manager_with(vec![
            PluginBuilder::new("watcher").priority(0).hook(EventType::PluginLoad, 0, |ctx, payload| {
                let id = payload.get("plugin_id").and_then(Value::as_str).unwrap_or_default();
                ctx.game.notify(format!("loaded {}", id));
                Ok(())
            }),
            PluginBuilder::new("later"),
        ]);
        let mut game = SimpleGame::default();
        manager.load_all(&mut game);

        assert!(game.messages().contains(&"loaded later".to_string()));
    }

    #[test]
    fn test_stats() {
        let mut manager = manager_with(vec![
            PluginBuilder::new("ok").command("ping", "", |_ctx, _args| Ok("pong".to_string())),
            PluginBuilder::new("broken").depends_on("nowhere"),
        ]);
        let mut game = SimpleGame::default();
        manager.load_all(&mut game);

        let stats = manager.stats();
        assert_eq!(stats.total_plugins, 2);
        assert_eq!(stats.enabled_plugins, 1);
        assert_eq!(stats.failed_plugins, 1);
        assert_eq!(stats.commands, 1);
    }
}
