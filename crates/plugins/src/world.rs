//! Extended world: new locations, hidden secrets, dynamic world events and
//! exploration milestones

use crate::{payload_str, setting_f64, setting_i64};
use anyhow::{Context, Result};
use parking_lot::Mutex;
use questforge_core::plugin::{ConfigOption, DefinePlugin, Plugin, PluginConfig, PluginDescriptor, Snapshot};
use questforge_core::{CommandSpec, ContentMap, EventType, GameContext, HookContext, HookSpec, Payload};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use std::sync::Arc;

struct Location {
    id: &'static str,
    name: &'static str,
    location_type: &'static str,
    level_range: (u32, u32),
    hidden: bool,
    description: &'static str,
}

const LOCATIONS: &[Location] = &[
    Location {
        id: "crystal_caverns",
        name: "Crystal Caverns",
        location_type: "underground",
        level_range: (8, 14),
        hidden: false,
        description: "Glowing crystals light a maze of tunnels.",
    },
    Location {
        id: "underground_lake",
        name: "Underground Lake",
        location_type: "underground",
        level_range: (10, 16),
        hidden: true,
        description: "Still black water hides a sunken wreck.",
    },
    Location {
        id: "floating_islands",
        name: "Floating Islands",
        location_type: "magical",
        level_range: (15, 22),
        hidden: false,
        description: "Islands of rock drift among the clouds.",
    },
    Location {
        id: "enchanted_garden",
        name: "Enchanted Garden",
        location_type: "magical",
        level_range: (5, 10),
        hidden: false,
        description: "Flowers hum softly as you pass.",
    },
    Location {
        id: "mage_tower",
        name: "Mage Tower",
        location_type: "magical",
        level_range: (12, 18),
        hidden: false,
        description: "A spire of blue stone crackling with wards.",
    },
    Location {
        id: "cursed_village",
        name: "Cursed Village",
        location_type: "dark",
        level_range: (10, 15),
        hidden: false,
        description: "Empty streets and shutters that bang without wind.",
    },
    Location {
        id: "demon_portal",
        name: "Demon Portal",
        location_type: "dark",
        level_range: (20, 28),
        hidden: false,
        description: "A wound in the world that smells of sulfur.",
    },
    Location {
        id: "shadow_realm",
        name: "Shadow Realm",
        location_type: "dark",
        level_range: (25, 35),
        hidden: true,
        description: "Colour drains from everything here.",
    },
    Location {
        id: "arena_of_champions",
        name: "Arena of Champions",
        location_type: "special",
        level_range: (10, 30),
        hidden: false,
        description: "The crowd roars for new challengers.",
    },
    Location {
        id: "treasure_vault",
        name: "Treasure Vault",
        location_type: "special",
        level_range: (18, 25),
        hidden: true,
        description: "Gold glitters behind a rune-locked door.",
    },
    Location {
        id: "celestial_observatory",
        name: "Celestial Observatory",
        location_type: "special",
        level_range: (15, 20),
        hidden: false,
        description: "Brass telescopes track the wandering stars.",
    },
    Location {
        id: "hidden_waterfall",
        name: "Hidden Waterfall",
        location_type: "special",
        level_range: (6, 12),
        hidden: true,
        description: "Mist and rainbows behind a curtain of ivy.",
    },
    Location {
        id: "goblin_kingdom",
        name: "Goblin Kingdom",
        location_type: "underground",
        level_range: (7, 13),
        hidden: false,
        description: "Crude banners and the smell of stew.",
    },
];

struct Secret {
    id: &'static str,
    name: &'static str,
    description: &'static str,
    location: &'static str,
    min_level: u32,
    night_only: bool,
    gold: i64,
    items: &'static [&'static str],
}

const SECRETS: &[Secret] = &[
    Secret {
        id: "ancient_cache",
        name: "Forgotten Adventurer's Cache",
        description: "A hidden cache of supplies left by an ancient adventurer.",
        location: "hidden_waterfall",
        min_level: 1,
        night_only: false,
        gold: 500,
        items: &["mega_potion"],
    },
    Secret {
        id: "fairy_ring",
        name: "Secret Fairy Ring",
        description: "A hidden fairy circle that grants blessings.",
        location: "enchanted_garden",
        min_level: 5,
        night_only: true,
        gold: 0,
        items: &["lucky_coin"],
    },
    Secret {
        id: "dragon_treasure",
        name: "Hidden Dragon Hoard",
        description: "A small stash of dragon treasure overlooked by adventurers.",
        location: "treasure_vault",
        min_level: 20,
        night_only: false,
        gold: 5000,
        items: &["dragon_scale"],
    },
    Secret {
        id: "sunken_ship",
        name: "Shipwreck Treasure",
        description: "An ancient shipwreck with valuable cargo.",
        location: "underground_lake",
        min_level: 12,
        night_only: false,
        gold: 3000,
        items: &[],
    },
    Secret {
        id: "crystal_heart",
        name: "Heart of the Caverns",
        description: "The central crystal that powers the entire cavern.",
        location: "crystal_caverns",
        min_level: 10,
        night_only: false,
        gold: 0,
        items: &["magic_crystal"],
    },
    Secret {
        id: "shadow_mirror",
        name: "Mirror of Truth",
        description: "An ancient mirror that shows your true self.",
        location: "shadow_realm",
        min_level: 25,
        night_only: true,
        gold: 0,
        items: &[],
    },
];

struct WorldEvent {
    id: &'static str,
    name: &'static str,
    description: &'static str,
    /// Time changes the event lasts; `None` lasts while its weather holds
    duration: Option<i64>,
    /// Weather that starts the event; random events have none
    weather: Option<&'static str>,
}

const WORLD_EVENTS: &[WorldEvent] = &[
    WorldEvent {
        id: "merchant_caravan",
        name: "Merchant Caravan",
        description: "A caravan of exotic traders has arrived.",
        duration: Some(6),
        weather: None,
    },
    WorldEvent {
        id: "goblin_invasion",
        name: "Goblin Invasion",
        description: "Goblin raiders pour out of the hills.",
        duration: Some(4),
        weather: None,
    },
    WorldEvent {
        id: "harvest_festival",
        name: "Harvest Festival",
        description: "Villages celebrate with food and games.",
        duration: Some(8),
        weather: None,
    },
    WorldEvent {
        id: "dragon_migration",
        name: "Dragon Migration",
        description: "Dragons cross the sky toward the peaks.",
        duration: Some(3),
        weather: None,
    },
    WorldEvent {
        id: "magical_storm",
        name: "Magical Storm",
        description: "Wild magic crackles in the storm clouds.",
        duration: None,
        weather: Some("storm"),
    },
    WorldEvent {
        id: "aurora_borealis",
        name: "Aurora Borealis",
        description: "Ribbons of light fill the snowy sky.",
        duration: None,
        weather: Some("snow"),
    },
];

/// (locations explored, title)
const EXPLORATION_MILESTONES: &[(usize, &str)] = &[
    (5, "Novice Explorer"),
    (10, "Wanderer"),
    (25, "Pathfinder"),
    (50, "Cartographer"),
    (100, "World Traveler"),
];

/// Progress carried across hot reloads
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorldProgress {
    pub discovered_secrets: BTreeSet<String>,
    /// Active event id to remaining time changes, -1 while weather-bound
    pub active_events: BTreeMap<String, i64>,
    pub explored: BTreeSet<String>,
    pub time_changes: u64,
}

struct WorldPluginState {
    event_frequency: i64,
    secret_discovery_chance: f64,
    progress: WorldProgress,
    rng: fastrand::Rng,
}

impl WorldPluginState {
    fn start_event(&mut self, game: &mut dyn GameContext, event: &WorldEvent) {
        let remaining = event.duration.unwrap_or(-1);
        if self.progress.active_events.insert(event.id.to_string(), remaining).is_none() {
            game.notify(format!("World event: {}! {}", event.name, event.description));
        }
    }
}

/// Extended world content and events
pub struct ExtendedWorldPlugin {
    descriptor: PluginDescriptor,
    state: Arc<Mutex<WorldPluginState>>,
}

impl ExtendedWorldPlugin {
    pub fn progress(&self) -> WorldProgress {
        self.state.lock().progress.clone()
    }

    fn hook<F>(&self, event: EventType, f: F) -> HookSpec
    where
        F: Fn(&mut WorldPluginState, &mut HookContext<'_>, &Payload) -> Result<()> + Send + Sync + 'static,
    {
        let state = Arc::clone(&self.state);
        HookSpec::new(event, move |ctx, payload| f(&mut state.lock(), ctx, payload))
    }
}

impl DefinePlugin for ExtendedWorldPlugin {
    fn describe() -> PluginDescriptor {
        PluginDescriptor::new("extended_world", "Extended World")
            .with_version(semver::Version::new(2, 0, 0))
            .with_author("QuestForge Team")
            .with_description("New locations, dynamic world events, secrets and exploration milestones")
            .with_soft_dependency("extended_npcs")
            .with_provides("extended_locations")
            .with_provides("world_events")
            .with_provides("world_secrets")
            .with_tag("world")
            .with_tag("exploration")
            .with_config_option(
                "event_frequency",
                ConfigOption::integer(5)
                    .with_range(1.0, 20.0)
                    .with_description("Time changes between random world events"),
            )
            .with_config_option(
                "secret_discovery_chance",
                ConfigOption::number(0.1).with_range(0.0, 1.0),
            )
            .hot_reloadable()
    }

    fn create(descriptor: PluginDescriptor) -> Result<Self> {
        let state = WorldPluginState {
            event_frequency: setting_i64(&descriptor.config, "event_frequency", 5).max(1),
            secret_discovery_chance: setting_f64(&descriptor.config, "secret_discovery_chance", 0.1),
            progress: WorldProgress::default(),
            rng: fastrand::Rng::new(),
        };
        Ok(Self {
            descriptor,
            state: Arc::new(Mutex::new(state)),
        })
    }
}

impl Plugin for ExtendedWorldPlugin {
    fn descriptor(&self) -> &PluginDescriptor {
        &self.descriptor
    }

    fn apply_config(&mut self, config: &PluginConfig) -> Result<()> {
        let mut state = self.state.lock();
        state.event_frequency = setting_i64(config, "event_frequency", 5).max(1);
        state.secret_discovery_chance = setting_f64(config, "secret_discovery_chance", 0.1);
        Ok(())
    }

    fn on_load(&mut self, _game: &mut dyn GameContext) -> Result<()> {
        tracing::info!("Loading extended world ({} locations, {} secrets)", LOCATIONS.len(), SECRETS.len());
        Ok(())
    }

    fn on_before_reload(&mut self, _game: &mut dyn GameContext) -> Result<Snapshot> {
        let mut snapshot = Snapshot::new();
        snapshot.insert("progress".to_string(), serde_json::to_value(&self.state.lock().progress)?);
        Ok(snapshot)
    }

    fn on_after_reload(&mut self, _game: &mut dyn GameContext, snapshot: Snapshot) -> Result<()> {
        if let Some(progress) = snapshot.get("progress") {
            self.state.lock().progress =
                serde_json::from_value(progress.clone()).context("world progress snapshot is malformed")?;
        }
        Ok(())
    }

    fn register_hooks(&self) -> Vec<HookSpec> {
        vec![
            self.hook(EventType::LocationEnter, on_location_enter),
            self.hook(EventType::TimeChange, on_time_change),
            self.hook(EventType::WeatherChange, on_weather_change),
            HookSpec::new(EventType::PlayerLevelUp, |ctx, payload| {
                let level = payload
                    .get("level")
                    .and_then(Value::as_u64)
                    .unwrap_or_else(|| u64::from(ctx.game.player().level));
                match level {
                    10 => ctx.game.notify("New areas may now be accessible!".to_string()),
                    20 => ctx.game.notify("Legendary locations have been discovered!".to_string()),
                    _ => {}
                }
                Ok(())
            }),
        ]
    }

    fn register_commands(&self) -> Vec<CommandSpec> {
        let secrets = Arc::clone(&self.state);
        let events = Arc::clone(&self.state);
        let exploration = Arc::clone(&self.state);
        vec![
            CommandSpec::new("locations", "List extended locations", |_ctx, _args| Ok(location_list()))
                .with_category("info")
                .with_args(0, Some(0)),
            CommandSpec::new("secrets", "List discovered secrets", move |_ctx, _args| {
                Ok(secret_list(&secrets.lock().progress))
            })
            .with_category("info")
            .with_args(0, Some(0)),
            CommandSpec::new("events", "Show active world events", move |_ctx, _args| {
                Ok(event_list(&events.lock().progress))
            })
            .with_category("info")
            .with_args(0, Some(0)),
            CommandSpec::new("exploration", "Show exploration progress", move |_ctx, _args| {
                Ok(exploration_report(&exploration.lock().progress))
            })
            .with_category("stats")
            .with_args(0, Some(0)),
        ]
    }

    fn register_locations(&self) -> ContentMap {
        LOCATIONS
            .iter()
            .map(|location| {
                (
                    location.id.to_string(),
                    json!({
                        "name": location.name,
                        "location_type": location.location_type,
                        "description": location.description,
                        "level_range": [location.level_range.0, location.level_range.1],
                        "hidden": location.hidden,
                    }),
                )
            })
            .collect()
    }
}

fn on_location_enter(state: &mut WorldPluginState, ctx: &mut HookContext<'_>, payload: &Payload) -> Result<()> {
    let location = payload_str(payload, "location_id")
        .map(str::to_string)
        .unwrap_or_else(|| ctx.game.world().location.clone());

    if state.progress.explored.insert(location.clone()) {
        let explored = state.progress.explored.len();
        if let Some((_, title)) = EXPLORATION_MILESTONES.iter().find(|(count, _)| *count == explored) {
            ctx.game.notify(format!("Exploration milestone: {} ({} locations)", title, explored));
        }
    }

    let level = ctx.game.player().level;
    let night = ctx.game.world().is_night();
    for secret in SECRETS.iter().filter(|secret| secret.location == location) {
        if state.progress.discovered_secrets.contains(secret.id)
            || level < secret.min_level
            || (secret.night_only && !night)
        {
            continue;
        }

        state.progress.discovered_secrets.insert(secret.id.to_string());
        ctx.game.notify(format!("SECRET DISCOVERED: {}. {}", secret.name, secret.description));
        if secret.gold > 0 {
            ctx.game.player_mut().gold += secret.gold;
            ctx.game.notify(format!("Found {} gold!", secret.gold));
        }
        if !secret.items.is_empty() {
            ctx.game
                .player_mut()
                .inventory
                .extend(secret.items.iter().map(|item| item.to_string()));
            ctx.game.notify(format!("Found: {}", secret.items.join(", ")));
        }
    }
    Ok(())
}

fn on_time_change(state: &mut WorldPluginState, ctx: &mut HookContext<'_>, payload: &Payload) -> Result<()> {
    state.progress.time_changes += 1;

    // Timed events count down; weather-bound ones (-1) are left alone
    let mut expired = Vec::new();
    for (id, remaining) in state.progress.active_events.iter_mut() {
        if *remaining > 0 {
            *remaining -= 1;
            if *remaining == 0 {
                expired.push(id.clone());
            }
        }
    }
    for id in expired {
        state.progress.active_events.remove(&id);
        if let Some(event) = WORLD_EVENTS.iter().find(|event| event.id == id) {
            ctx.game.notify(format!("{} has ended.", event.name));
        }
    }

    let hour = payload
        .get("hour")
        .and_then(Value::as_u64)
        .unwrap_or_else(|| u64::from(ctx.game.world().hour));
    if hour == 0 && state.rng.f64() < state.secret_discovery_chance {
        ctx.game
            .notify("The witching hour... secrets may reveal themselves...".to_string());
    }

    if state.progress.time_changes % state.event_frequency as u64 == 0 {
        let candidates: Vec<&WorldEvent> = WORLD_EVENTS
            .iter()
            .filter(|event| event.weather.is_none() && !state.progress.active_events.contains_key(event.id))
            .collect();
        if !candidates.is_empty() {
            let event = candidates[state.rng.usize(..candidates.len())];
            state.start_event(ctx.game, event);
        }
    }
    Ok(())
}

fn on_weather_change(state: &mut WorldPluginState, ctx: &mut HookContext<'_>, payload: &Payload) -> Result<()> {
    let weather = payload_str(payload, "weather")
        .map(str::to_string)
        .unwrap_or_else(|| ctx.game.world().weather.to_string());

    for event in WORLD_EVENTS.iter().filter(|event| event.weather.is_some()) {
        if event.weather == Some(weather.as_str()) {
            state.start_event(ctx.game, event);
        } else if state.progress.active_events.remove(event.id).is_some() {
            ctx.game.notify(format!("{} fades with the weather.", event.name));
        }
    }
    Ok(())
}

fn location_list() -> String {
    let mut by_type: BTreeMap<&str, Vec<&Location>> = BTreeMap::new();
    for location in LOCATIONS {
        by_type.entry(location.location_type).or_default().push(location);
    }

    let mut out = String::from("Extended Locations:");
    for (kind, locations) in &by_type {
        let _ = write!(out, "\n\n[{}]", kind.to_uppercase());
        for location in locations {
            let hidden = if location.hidden { " (Hidden)" } else { "" };
            let _ = write!(
                out,
                "\n  - {}{} (Lv.{}-{})",
                location.name, hidden, location.level_range.0, location.level_range.1
            );
        }
    }
    out
}

fn secret_list(progress: &WorldProgress) -> String {
    let mut out = format!(
        "World Secrets:\nDiscovered: {}/{}",
        progress.discovered_secrets.len(),
        SECRETS.len()
    );
    for secret in SECRETS {
        if progress.discovered_secrets.contains(secret.id) {
            let _ = write!(out, "\n  [x] {} ({})", secret.name, secret.location);
        } else {
            let _ = write!(out, "\n  [?] ??? ({})", secret.location);
        }
    }
    out
}

fn event_list(progress: &WorldProgress) -> String {
    if progress.active_events.is_empty() {
        return "No world events are active.".to_string();
    }

    let mut out = String::from("Active World Events:");
    for (id, remaining) in &progress.active_events {
        let Some(event) = WORLD_EVENTS.iter().find(|event| event.id == id) else {
            continue;
        };
        let duration = if *remaining < 0 {
            "while the weather holds".to_string()
        } else {
            format!("{} more time changes", remaining)
        };
        let _ = write!(out, "\n  {} ({})\n    {}", event.name, duration, event.description);
    }
    out
}

fn exploration_report(progress: &WorldProgress) -> String {
    let explored = progress.explored.len();
    let mut out = format!("Exploration: {} locations visited", explored);
    match EXPLORATION_MILESTONES.iter().rev().find(|(count, _)| *count <= explored) {
        Some((_, title)) => {
            let _ = write!(out, "\nTitle: {}", title);
        }
        None => out.push_str("\nTitle: none yet"),
    }
    if let Some((count, title)) = EXPLORATION_MILESTONES.iter().find(|(count, _)| *count > explored) {
        let _ = write!(out, "\nNext: {} at {} locations", title, count);
    }
    out
}
