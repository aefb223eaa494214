//! Per-plugin lifecycle bookkeeping

use super::{Plugin, PluginDescriptor, PluginState, PluginUnit};
use crate::error::{panic_message, PluginError};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Instant, SystemTime};

/// Plugin statistics
#[derive(Debug, Clone, Default)]
pub struct PluginStats {
    /// Number of times the plugin has been loaded
    pub load_count: u64,
    /// Number of times the plugin has been enabled
    pub enable_count: u64,
    /// Number of successful hot reloads
    pub reload_count: u64,
    /// Number of times the plugin has failed
    pub failure_count: u64,
    /// Time when the plugin was last enabled
    pub last_enabled_time: Option<Instant>,
}

/// Everything the manager tracks about one plugin
pub struct PluginHandle {
    descriptor: PluginDescriptor,
    state: PluginState,
    unit: Arc<dyn PluginUnit>,
    /// Live instance; `None` unless loaded
    instance: Option<Box<dyn Plugin>>,
    stats: PluginStats,
    last_error: Option<PluginError>,
    last_state_change: Instant,
    /// Source modification time at the last instantiation
    seen_modified: Option<SystemTime>,
    /// Position in load order; kept across disable and reload, cleared when
    /// the plugin leaves the load order
    load_rank: Option<u64>,
}

impl PluginHandle {
    pub fn new(unit: Arc<dyn PluginUnit>) -> Self {
        Self {
            descriptor: unit.descriptor().clone(),
            state: PluginState::Discovered,
            seen_modified: unit.last_modified(),
            unit,
            instance: None,
            stats: PluginStats::default(),
            last_error: None,
            last_state_change: Instant::now(),
            load_rank: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.descriptor.id
    }

    pub fn descriptor(&self) -> &PluginDescriptor {
        &self.descriptor
    }

    pub fn state(&self) -> PluginState {
        self.state
    }

    pub fn stats(&self) -> &PluginStats {
        &self.stats
    }

    pub fn last_error(&self) -> Option<&PluginError> {
        self.last_error.as_ref()
    }

    pub fn origin(&self) -> String {
        self.unit.origin()
    }

    /// Time spent in the current state
    pub fn state_age(&self) -> std::time::Duration {
        self.last_state_change.elapsed()
    }

    pub fn load_rank(&self) -> Option<u64> {
        self.load_rank
    }

    pub(crate) fn set_load_rank(&mut self, rank: Option<u64>) {
        self.load_rank = rank;
    }

    pub(crate) fn descriptor_mut(&mut self) -> &mut PluginDescriptor {
        &mut self.descriptor
    }

    pub(crate) fn stats_mut(&mut self) -> &mut PluginStats {
        &mut self.stats
    }

    pub(crate) fn has_instance(&self) -> bool {
        self.instance.is_some()
    }

    /// Create a fresh instance from the unit and adopt its descriptor
    pub(crate) fn instantiate(&mut self) -> Result<(), String> {
        let unit = Arc::clone(&self.unit);
        let instance = match catch_unwind(AssertUnwindSafe(|| unit.instantiate())) {
            Ok(Ok(instance)) => instance,
            Ok(Err(e)) => return Err(format!("{:#}", e)),
            Err(panic) => return Err(panic_message(panic.as_ref())),
        };

        let produced = instance.descriptor();
        if produced.id != self.descriptor.id {
            return Err(format!(
                "source now declares plugin '{}' instead of '{}'",
                produced.id, self.descriptor.id
            ));
        }
        produced.validate().map_err(|e| e.to_string())?;

        self.descriptor = produced.clone();
        self.seen_modified = self.unit.last_modified();
        self.instance = Some(instance);
        Ok(())
    }

    pub(crate) fn drop_instance(&mut self) {
        self.instance = None;
    }

    /// Run plugin code, turning errors and panics into a message
    pub(crate) fn invoke<T>(
        &mut self,
        stage: &str,
        f: impl FnOnce(&mut dyn Plugin) -> anyhow::Result<T>,
    ) -> Result<T, String> {
        let Some(instance) = self.instance.as_mut() else {
            return Err(format!("{} called without a live instance", stage));
        };

        match catch_unwind(AssertUnwindSafe(|| f(instance.as_mut()))) {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(format!("{} failed: {:#}", stage, e)),
            Err(panic) => Err(format!("{} {}", stage, panic_message(panic.as_ref()))),
        }
    }

    /// Set plugin state with validation
    pub(crate) fn set_state(&mut self, new_state: PluginState) -> Result<(), PluginError> {
        if !self.state.can_transition_to(new_state) {
            return Err(PluginError::InvalidState {
                plugin: self.descriptor.id.clone(),
                state: self.state,
                action: format!("move to {}", new_state),
            });
        }

        tracing::debug!("Plugin {} state: {:?} -> {:?}", self.descriptor.id, self.state, new_state);
        self.state = new_state;
        self.last_state_change = Instant::now();

        match new_state {
            PluginState::Loaded => self.stats.load_count += 1,
            PluginState::Enabled => {
                self.stats.enable_count += 1;
                self.stats.last_enabled_time = Some(Instant::now());
            }
            _ => {}
        }
        Ok(())
    }

    /// Mark the plugin failed and drop its instance
    pub(crate) fn fail(&mut self, error: PluginError) {
        tracing::error!("Plugin {} failed: {}", self.descriptor.id, error);
        if self.state != PluginState::Failed {
            tracing::debug!("Plugin {} state: {:?} -> Failed", self.descriptor.id, self.state);
        }
        self.state = PluginState::Failed;
        self.last_state_change = Instant::now();
        self.stats.failure_count += 1;
        self.last_error = Some(error);
        self.instance = None;
    }

    pub(crate) fn clear_error(&mut self) {
        self.last_error = None;
    }

    /// Whether the source changed since the last instantiation
    pub(crate) fn source_changed(&self) -> bool {
        match (self.unit.last_modified(), self.seen_modified) {
            (Some(now), Some(seen)) => now > seen,
            (Some(_), None) => true,
            _ => false,
        }
    }

    pub(crate) fn mark_source_seen(&mut self) {
        self.seen_modified = self.unit.last_modified();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::{NativeUnit, PluginBuilder};

    fn handle(builder: PluginBuilder) -> PluginHandle {
        PluginHandle::new(Arc::new(NativeUnit::from_builder(builder)))
    }

    #[test]
    fn test_new_handle_is_discovered() {
        let handle = handle(PluginBuilder::new("fresh"));
        assert_eq!(handle.state(), PluginState::Discovered);
        assert!(!handle.has_instance());
        assert_eq!(handle.origin(), "native");
    }

    #[test]
    fn test_invalid_transition_is_rejected() {
        let mut handle = handle(PluginBuilder::new("fresh"));
        let err = handle.set_state(PluginState::Enabled).unwrap_err();
        assert!(matches!(err, PluginError::InvalidState { state: PluginState::Discovered, .. }));

        handle.set_state(PluginState::Loaded).unwrap();
        handle.set_state(PluginState::Enabled).unwrap();
        assert_eq!(handle.stats().load_count, 1);
        assert_eq!(handle.stats().enable_count, 1);
    }

    #[test]
    fn test_invoke_contains_panics() {
        let mut handle = handle(PluginBuilder::new("fragile").on_load(|_game| panic!("cracked")));
        handle.instantiate().unwrap();

        let mut game = crate::game::SimpleGame::default();
        let err = handle.invoke("on_load", |p| p.on_load(&mut game)).unwrap_err();
        assert_eq!(err, "on_load panicked: cracked");
    }

    #[test]
    fn test_invoke_without_instance() {
        let mut handle = handle(PluginBuilder::new("idle"));
        assert!(handle.invoke("on_enable", |_p| Ok(())).is_err());
    }

    #[test]
    fn test_fail_drops_instance() {
        let mut handle = handle(PluginBuilder::new("doomed"));
        handle.instantiate().unwrap();
        handle.fail(PluginError::NotFound("x".to_string()));
        assert_eq!(handle.state(), PluginState::Failed);
        assert!(!handle.has_instance());
        assert_eq!(handle.stats().failure_count, 1);
        assert!(handle.last_error().is_some());
    }
}
