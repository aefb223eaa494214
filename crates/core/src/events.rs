//! Synchronous, priority-ordered event bus
//!
//! Handlers run in priority order (higher first). Ties go to the owner that
//! loaded first, then to registration order. Middleware sees every payload
//! before the handlers do, a handler's filter can skip it, and a handler can
//! stop propagation to the rest of the chain.
//!
//! Each handler is isolated: an error or a panic is logged with the owning
//! plugin and reported in the [`EventReport`], and dispatch moves on to the
//! next handler.

use crate::error::{panic_message, PluginError};
use crate::game::GameContext;
use serde_json::Value;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

/// Event payload, an opaque JSON object
pub type Payload = serde_json::Map<String, Value>;

/// Per-plugin transient state
pub type Scratch = serde_json::Map<String, Value>;

/// Default hook priority
pub const DEFAULT_HOOK_PRIORITY: i32 = 100;

/// Load rank of subscribers that are not plugins; they sort after every plugin
pub const UNRANKED: u64 = u64::MAX;

/// Game events plugins can react to
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventType {
    GameStart,
    GameLoad,
    GameSave,
    CombatStart,
    CombatTurn,
    CombatEnd,
    PlayerLevelUp,
    ItemPickup,
    ItemEquip,
    ItemUse,
    LocationEnter,
    LocationLeave,
    NpcInteract,
    QuestComplete,
    WeatherChange,
    TimeChange,
    PlayerMove,
    PluginLoad,
    PluginUnload,
    /// Events defined by plugins for each other
    Custom(String),
}

impl EventType {
    pub const BUILTIN: [EventType; 19] = [
        EventType::GameStart,
        EventType::GameLoad,
        EventType::GameSave,
        EventType::CombatStart,
        EventType::CombatTurn,
        EventType::CombatEnd,
        EventType::PlayerLevelUp,
        EventType::ItemPickup,
        EventType::ItemEquip,
        EventType::ItemUse,
        EventType::LocationEnter,
        EventType::LocationLeave,
        EventType::NpcInteract,
        EventType::QuestComplete,
        EventType::WeatherChange,
        EventType::TimeChange,
        EventType::PlayerMove,
        EventType::PluginLoad,
        EventType::PluginUnload,
    ];

    pub fn as_str(&self) -> &str {
        match self {
            Self::GameStart => "game_start",
            Self::GameLoad => "game_load",
            Self::GameSave => "game_save",
            Self::CombatStart => "combat_start",
            Self::CombatTurn => "combat_turn",
            Self::CombatEnd => "combat_end",
            Self::PlayerLevelUp => "player_level_up",
            Self::ItemPickup => "item_pickup",
            Self::ItemEquip => "item_equip",
            Self::ItemUse => "item_use",
            Self::LocationEnter => "location_enter",
            Self::LocationLeave => "location_leave",
            Self::NpcInteract => "npc_interact",
            Self::QuestComplete => "quest_complete",
            Self::WeatherChange => "weather_change",
            Self::TimeChange => "time_change",
            Self::PlayerMove => "player_move",
            Self::PluginLoad => "plugin_load",
            Self::PluginUnload => "plugin_unload",
            Self::Custom(name) => name,
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EventType {
    type Err = std::convert::Infallible;

    /// Unknown names become [`EventType::Custom`]
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim().to_ascii_lowercase();
        Ok(Self::BUILTIN
            .iter()
            .find(|event| event.as_str() == name)
            .cloned()
            .unwrap_or(Self::Custom(name)))
    }
}

/// What a hook handler sees while it runs
pub struct HookContext<'a> {
    pub game: &'a mut dyn GameContext,
    /// State private to the owning plugin
    pub scratch: &'a mut Scratch,
    pub plugin_id: &'a str,
    pub event: &'a EventType,
    stopped: bool,
}

impl<'a> HookContext<'a> {
    pub fn new(
        game: &'a mut dyn GameContext,
        scratch: &'a mut Scratch,
        plugin_id: &'a str,
        event: &'a EventType,
    ) -> Self {
        Self {
            game,
            scratch,
            plugin_id,
            event,
            stopped: false,
        }
    }

    /// Keep the remaining handlers from seeing this event
    pub fn stop_propagation(&mut self) {
        self.stopped = true;
    }

    pub fn is_propagation_stopped(&self) -> bool {
        self.stopped
    }
}

pub type HookHandler = Arc<dyn Fn(&mut HookContext<'_>, &Payload) -> anyhow::Result<()> + Send + Sync>;

/// Payload predicate; the handler only runs when it returns `true`
pub type HookFilter = Arc<dyn Fn(&Payload) -> bool + Send + Sync>;

/// Runs before any handler and may rewrite the payload
pub type EventMiddleware = Arc<dyn Fn(&EventType, &mut Payload) -> anyhow::Result<()> + Send + Sync>;

/// Box a closure as a [`HookHandler`]
pub fn hook_handler<F>(f: F) -> HookHandler
where
    F: Fn(&mut HookContext<'_>, &Payload) -> anyhow::Result<()> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Box a closure as an [`EventMiddleware`]
pub fn event_middleware<F>(f: F) -> EventMiddleware
where
    F: Fn(&EventType, &mut Payload) -> anyhow::Result<()> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// A hook a plugin asks to have registered
#[derive(Clone)]
pub struct HookSpec {
    pub event: EventType,
    pub priority: i32,
    /// Remove after the first successful call
    pub once: bool,
    pub filter: Option<HookFilter>,
    pub handler: HookHandler,
}

impl HookSpec {
    pub fn new<F>(event: EventType, handler: F) -> Self
    where
        F: Fn(&mut HookContext<'_>, &Payload) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self::from_handler(event, Arc::new(handler))
    }

    pub fn from_handler(event: EventType, handler: HookHandler) -> Self {
        Self {
            event,
            priority: DEFAULT_HOOK_PRIORITY,
            once: false,
            filter: None,
            handler,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn once(mut self) -> Self {
        self.once = true;
        self
    }

    /// Only run for payloads the filter accepts
    pub fn with_filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&Payload) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Arc::new(filter));
        self
    }
}

impl std::fmt::Debug for HookSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookSpec")
            .field("event", &self.event)
            .field("priority", &self.priority)
            .field("once", &self.once)
            .field("filtered", &self.filter.is_some())
            .finish_non_exhaustive()
    }
}

/// Scratch maps for every plugin in the session
#[derive(Debug, Default)]
pub struct ScratchStore {
    maps: HashMap<String, Scratch>,
}

impl ScratchStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_plugin(&mut self, plugin_id: &str) -> &mut Scratch {
        self.maps.entry(plugin_id.to_string()).or_default()
    }

    pub fn get(&self, plugin_id: &str) -> Option<&Scratch> {
        self.maps.get(plugin_id)
    }

    pub fn clear(&mut self, plugin_id: &str) {
        self.maps.remove(plugin_id);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

struct Subscription {
    id: SubscriptionId,
    priority: i32,
    /// Load rank of the owner
    rank: u64,
    owner: String,
    once: bool,
    filter: Option<HookFilter>,
    handler: HookHandler,
}

/// Result of one publish call
#[derive(Debug, Clone)]
pub struct EventReport {
    pub event: EventType,
    /// Owner of each handler that ran, in order, with its outcome
    pub outcomes: Vec<(String, Result<(), PluginError>)>,
    /// Owner of the handler that stopped propagation
    pub stopped_by: Option<String>,
}

impl EventReport {
    pub fn invoked(&self) -> usize {
        self.outcomes.len()
    }

    pub fn failures(&self) -> impl Iterator<Item = &PluginError> {
        self.outcomes.iter().filter_map(|(_, outcome)| outcome.as_ref().err())
    }

    pub fn failure_count(&self) -> usize {
        self.failures().count()
    }
}

/// Event bus counters
#[derive(Debug, Clone, Default)]
pub struct EventStats {
    pub published: u64,
    pub handler_calls: u64,
    pub handler_failures: u64,
    /// Handlers skipped because their filter rejected the payload
    pub filtered: u64,
    pub middleware_failures: u64,
}

/// Publish/subscribe registry
#[derive(Default)]
pub struct EventBus {
    /// Kept sorted by priority descending, then rank and id ascending
    handlers: HashMap<EventType, Vec<Subscription>>,
    middleware: Vec<(String, EventMiddleware)>,
    next_id: u64,
    stats: EventStats,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, event: EventType, handler: HookHandler, priority: i32, owner: &str) -> SubscriptionId {
        self.insert(HookSpec::from_handler(event, handler).with_priority(priority), owner, UNRANKED)
    }

    /// Subscribe a handler that is removed after its first successful call
    pub fn subscribe_once(&mut self, event: EventType, handler: HookHandler, priority: i32, owner: &str) -> SubscriptionId {
        self.insert(HookSpec::from_handler(event, handler).with_priority(priority).once(), owner, UNRANKED)
    }

    /// Register a plugin's hook spec; `rank` is the owner's position in load
    /// order and breaks priority ties
    pub fn subscribe_spec(&mut self, spec: HookSpec, owner: &str, rank: u64) -> SubscriptionId {
        self.insert(spec, owner, rank)
    }

    fn insert(&mut self, spec: HookSpec, owner: &str, rank: u64) -> SubscriptionId {
        self.next_id += 1;
        let id = SubscriptionId(self.next_id);
        let HookSpec {
            event,
            priority,
            once,
            filter,
            handler,
        } = spec;

        let list = self.handlers.entry(event.clone()).or_default();
        // Ids grow monotonically, so the new subscription goes after every
        // tie of equal or lower rank
        let position = list.partition_point(|existing| {
            existing.priority > priority || (existing.priority == priority && existing.rank <= rank)
        });
        list.insert(
            position,
            Subscription {
                id,
                priority,
                rank,
                owner: owner.to_string(),
                once,
                filter,
                handler,
            },
        );

        tracing::trace!("Subscribed {} to {} at priority {}", owner, event, priority);
        id
    }

    /// Add middleware that sees every published payload before the handlers
    pub fn add_middleware(&mut self, name: &str, middleware: EventMiddleware) {
        tracing::debug!("Added event middleware {}", name);
        self.middleware.push((name.to_string(), middleware));
    }

    pub fn middleware_count(&self) -> usize {
        self.middleware.len()
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        for list in self.handlers.values_mut() {
            if let Some(position) = list.iter().position(|sub| sub.id == id) {
                list.remove(position);
                return true;
            }
        }
        false
    }

    /// Remove every handler owned by `owner`
    pub fn unsubscribe_all(&mut self, owner: &str) -> usize {
        let mut removed = 0;
        for list in self.handlers.values_mut() {
            let before = list.len();
            list.retain(|sub| sub.owner != owner);
            removed += before - list.len();
        }
        self.handlers.retain(|_, list| !list.is_empty());

        if removed > 0 {
            tracing::debug!("Removed {} hooks owned by {}", removed, owner);
        }
        removed
    }

    pub fn handler_count(&self, event: &EventType) -> usize {
        self.handlers.get(event).map(Vec::len).unwrap_or(0)
    }

    /// Number of handlers registered by `owner` across all events
    pub fn owned_by(&self, owner: &str) -> usize {
        self.handlers
            .values()
            .flat_map(|list| list.iter())
            .filter(|sub| sub.owner == owner)
            .count()
    }

    pub fn stats(&self) -> &EventStats {
        &self.stats
    }

    /// Run every handler for `event` in order
    pub fn publish(
        &mut self,
        event: &EventType,
        payload: &Payload,
        game: &mut dyn GameContext,
        scratch: &mut ScratchStore,
    ) -> EventReport {
        self.stats.published += 1;

        let mut payload = std::borrow::Cow::Borrowed(payload);
        for (name, middleware) in &self.middleware {
            let data = payload.to_mut();
            let failure = match catch_unwind(AssertUnwindSafe(|| middleware(event, data))) {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(format!("{:#}", e)),
                Err(panic) => Some(panic_message(panic.as_ref())),
            };
            if let Some(message) = failure {
                self.stats.middleware_failures += 1;
                tracing::error!("Event middleware {} failed for {}: {}", name, event, message);
            }
        }
        let payload: &Payload = &payload;

        let chain: Vec<(SubscriptionId, String, bool, Option<HookFilter>, HookHandler)> = self
            .handlers
            .get(event)
            .map(|list| {
                list.iter()
                    .map(|sub| {
                        (
                            sub.id,
                            sub.owner.clone(),
                            sub.once,
                            sub.filter.clone(),
                            Arc::clone(&sub.handler),
                        )
                    })
                    .collect()
            })
            .unwrap_or_default();

        let mut outcomes = Vec::with_capacity(chain.len());
        let mut spent = Vec::new();
        let mut stopped_by = None;

        for (id, owner, once, filter, handler) in chain {
            let mut ctx = HookContext::new(&mut *game, scratch.for_plugin(&owner), &owner, event);

            let ran = catch_unwind(AssertUnwindSafe(|| {
                if let Some(filter) = &filter {
                    if !filter(payload) {
                        return Ok(false);
                    }
                }
                handler(&mut ctx, payload).map(|()| true)
            }));
            let outcome = match ran {
                Ok(Ok(true)) => Ok(()),
                Ok(Ok(false)) => {
                    self.stats.filtered += 1;
                    continue;
                }
                Ok(Err(e)) => Err(format!("{:#}", e)),
                Err(panic) => Err(panic_message(panic.as_ref())),
            };
            let stop = ctx.is_propagation_stopped();

            self.stats.handler_calls += 1;
            let outcome = match outcome {
                Ok(()) => {
                    if once {
                        spent.push(id);
                    }
                    Ok(())
                }
                Err(message) => {
                    self.stats.handler_failures += 1;
                    tracing::error!("Event handler error in {} for {}: {}", owner, event, message);
                    Err(PluginError::Handler {
                        plugin: owner.clone(),
                        context: format!("event {}", event),
                        message,
                    })
                }
            };
            outcomes.push((owner.clone(), outcome));

            if stop {
                tracing::debug!("Plugin {} stopped propagation of {}", owner, event);
                stopped_by = Some(owner);
                break;
            }
        }

        for id in spent {
            self.unsubscribe(id);
        }

        EventReport {
            event: event.clone(),
            outcomes,
            stopped_by,
        }
    }
}
