//! Enhanced combat plugin for QuestForge implementing combos, variety
//! bonuses, milestone rewards and combat statistics
//!
//! Per-fight state (the running combo, a pending variety bonus) lives in the
//! plugin's scratch map; lifetime statistics live in plugin state and are
//! carried across hot reloads.

use crate::{parse_setting, setting_bool, setting_f64, setting_i64};
use anyhow::{Context, Result};
use parking_lot::Mutex;
use questforge_core::commands::CommandContext;
use questforge_core::events::{HookContext, Scratch};
use questforge_core::plugin::{priority, ConfigOption, DefinePlugin, Plugin, PluginConfig, PluginDescriptor, Snapshot};
use questforge_core::{CommandSpec, ContentMap, EventType, GameContext, HookSpec, Payload};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Combo hits between damage multiplier steps
const COMBO_STEP: i64 = 3;

/// Distinct enemy kinds needed for a variety bonus
const VARIETY_THRESHOLD: usize = 3;

/// Lifetime combat statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CombatStats {
    pub combats_started: u64,
    pub combats_won: u64,
    pub combats_lost: u64,
    pub total_damage_dealt: i64,
    pub total_damage_taken: i64,
    pub critical_hits: u64,
    pub max_combo: i64,
    pub variety_bonuses: u64,
    pub milestones: u64,
}

impl CombatStats {
    pub fn win_rate(&self) -> f64 {
        let total = self.combats_won + self.combats_lost;
        if total == 0 {
            0.0
        } else {
            self.combats_won as f64 / total as f64 * 100.0
        }
    }
}

/// Tunables, resolved from the plugin config
#[derive(Debug, Clone, PartialEq)]
pub struct CombatSettings {
    pub variety_bonus_percent: i64,
    pub combo_multiplier: f64,
    pub milestone_level_interval: i64,
    pub enable_combo_system: bool,
    pub critical_damage_bonus: f64,
}

impl CombatSettings {
    pub fn from_config(config: &PluginConfig) -> Self {
        Self {
            variety_bonus_percent: setting_i64(config, "variety_bonus_percent", 10),
            combo_multiplier: setting_f64(config, "combo_multiplier", 1.1),
            milestone_level_interval: setting_i64(config, "milestone_level_interval", 5).max(1),
            enable_combo_system: setting_bool(config, "enable_combo_system", true),
            critical_damage_bonus: setting_f64(config, "critical_damage_bonus", 0.2),
        }
    }

    /// Damage multiplier for a running combo
    pub fn combo_damage_multiplier(&self, combo: i64) -> f64 {
        if !self.enable_combo_system || combo <= 0 {
            return 1.0;
        }
        self.combo_multiplier.powi((combo / COMBO_STEP) as i32)
    }
}

struct CombatState {
    config: PluginConfig,
    settings: CombatSettings,
    stats: CombatStats,
}

/// Enhanced combat plugin
pub struct EnhancedCombatPlugin {
    descriptor: PluginDescriptor,
    state: Arc<Mutex<CombatState>>,
}

impl EnhancedCombatPlugin {
    pub fn stats(&self) -> CombatStats {
        self.state.lock().stats.clone()
    }

    fn hook<F>(&self, event: EventType, f: F) -> HookSpec
    where
        F: Fn(&mut CombatState, &mut HookContext<'_>, &Payload) -> Result<()> + Send + Sync + 'static,
    {
        let state = Arc::clone(&self.state);
        HookSpec::new(event, move |ctx, payload| f(&mut state.lock(), ctx, payload))
    }

    fn command<F>(&self, name: &str, help: &str, f: F) -> CommandSpec
    where
        F: Fn(&mut CombatState, &mut CommandContext<'_>, &[String]) -> Result<String> + Send + Sync + 'static,
    {
        let state = Arc::clone(&self.state);
        CommandSpec::new(name, help, move |ctx, args| f(&mut state.lock(), ctx, args))
    }
}

impl DefinePlugin for EnhancedCombatPlugin {
    fn describe() -> PluginDescriptor {
        PluginDescriptor::new("enhanced_combat", "Enhanced Combat")
            .with_version(semver::Version::new(2, 0, 0))
            .with_author("QuestForge Team")
            .with_description("Combo system, variety bonuses, milestone rewards and new enemies")
            .with_soft_dependency("extended_items")
            .with_priority(priority::HIGH)
            .with_tag("combat")
            .with_tag("enemies")
            .with_config_option(
                "variety_bonus_percent",
                ConfigOption::integer(10)
                    .with_range(0.0, 100.0)
                    .with_description("Experience bonus for fighting three or more kinds of enemy"),
            )
            .with_config_option(
                "combo_multiplier",
                ConfigOption::number(1.1)
                    .with_range(1.0, 5.0)
                    .with_description("Damage multiplier applied every third consecutive hit"),
            )
            .with_config_option(
                "milestone_level_interval",
                ConfigOption::integer(5).with_range(1.0, 100.0),
            )
            .with_config_option("enable_combo_system", ConfigOption::boolean(true))
            .with_config_option("critical_damage_bonus", ConfigOption::number(0.2).with_range(0.0, 5.0))
            .hot_reloadable()
    }

    fn create(descriptor: PluginDescriptor) -> Result<Self> {
        let state = CombatState {
            settings: CombatSettings::from_config(&descriptor.config),
            config: descriptor.config.clone(),
            stats: CombatStats::default(),
        };
        Ok(Self {
            descriptor,
            state: Arc::new(Mutex::new(state)),
        })
    }
}

impl Plugin for EnhancedCombatPlugin {
    fn descriptor(&self) -> &PluginDescriptor {
        &self.descriptor
    }

    fn apply_config(&mut self, config: &PluginConfig) -> Result<()> {
        let mut state = self.state.lock();
        state.settings = CombatSettings::from_config(config);
        state.config = config.clone();
        Ok(())
    }

    fn on_load(&mut self, _game: &mut dyn GameContext) -> Result<()> {
        tracing::info!("Enhanced combat loaded");
        Ok(())
    }

    fn on_unload(&mut self, _game: &mut dyn GameContext) -> Result<()> {
        let state = self.state.lock();
        tracing::info!(
            "Enhanced combat unloading: {} wins, {} losses",
            state.stats.combats_won,
            state.stats.combats_lost
        );
        Ok(())
    }

    fn on_before_reload(&mut self, _game: &mut dyn GameContext) -> Result<Snapshot> {
        let mut snapshot = Snapshot::new();
        snapshot.insert("stats".to_string(), serde_json::to_value(&self.state.lock().stats)?);
        Ok(snapshot)
    }

    fn on_after_reload(&mut self, _game: &mut dyn GameContext, snapshot: Snapshot) -> Result<()> {
        if let Some(stats) = snapshot.get("stats") {
            self.state.lock().stats =
                serde_json::from_value(stats.clone()).context("combat statistics snapshot is malformed")?;
        }
        Ok(())
    }

    fn register_hooks(&self) -> Vec<HookSpec> {
        vec![
            self.hook(EventType::CombatStart, on_combat_start),
            self.hook(EventType::CombatTurn, on_combat_turn),
            self.hook(EventType::CombatEnd, on_combat_end),
            self.hook(EventType::PlayerLevelUp, on_level_up),
            HookSpec::new(EventType::ItemPickup, |ctx, payload| {
                if payload.get("rarity").and_then(Value::as_str) == Some("Legendary") {
                    let name = payload.get("name").and_then(Value::as_str).unwrap_or("an unknown item");
                    ctx.game.notify(format!("LEGENDARY item found: {}!", name));
                }
                Ok(())
            }),
            HookSpec::new(EventType::ItemEquip, |ctx, payload| {
                let effects: Vec<&str> = payload
                    .get("special_effects")
                    .and_then(Value::as_array)
                    .map(|effects| effects.iter().filter_map(Value::as_str).collect())
                    .unwrap_or_default();
                if !effects.is_empty() {
                    ctx.game.notify(format!("Combat effects: {}", effects.join(", ")));
                }
                Ok(())
            }),
        ]
    }

    fn register_commands(&self) -> Vec<CommandSpec> {
        vec![
            self.command("combat_stats", "Show enhanced combat statistics", combat_stats)
                .with_category("stats")
                .with_args(0, Some(0)),
            self.command("combat_config", "Show or change combat settings", combat_config)
                .with_usage("/combat_config [key] [value]")
                .with_category("config")
                .with_args(0, Some(2)),
            self.command("combo_reset", "Reset the combo counter", |state, ctx, _args| {
                state.stats.max_combo = 0;
                ctx.scratch.insert("combo".to_string(), json!(0));
                Ok("Combo counter reset!".to_string())
            })
            .with_category("debug"),
            self.command("combat_test", "Test damage calculations", combat_test)
                .with_usage("/combat_test <base_damage> [combo_count]")
                .with_category("debug")
                .with_args(1, Some(2)),
        ]
    }

    fn register_enemies(&self) -> ContentMap {
        let mut enemies = ContentMap::new();
        enemies.insert(
            "elite_knight".to_string(),
            json!({
                "name": "Elite Knight",
                "description": "A highly trained warrior in gleaming armor.",
                "base_hp": 200, "base_damage": 30, "rarity": "Rare",
                "abilities": ["shield_bash", "power_strike"],
                "drops": { "gold": [50, 150], "items": ["knight_armor"] }
            }),
        );
        enemies.insert(
            "shadow_assassin".to_string(),
            json!({
                "name": "Shadow Assassin",
                "description": "A deadly killer emerging from darkness.",
                "base_hp": 100, "base_damage": 40, "rarity": "Epic",
                "abilities": ["backstab", "shadow_step", "poison_blade"],
                "weaknesses": { "holy": 1.5 },
                "drops": { "gold": [100, 300], "items": ["assassin_dagger"] }
            }),
        );
        enemies.insert(
            "combat_trainer".to_string(),
            json!({
                "name": "Combat Trainer",
                "description": "An experienced warrior who tests adventurers.",
                "base_hp": 300, "base_damage": 35, "rarity": "Rare",
                "abilities": ["teaching_strike", "defensive_stance"],
                "drops": { "gold": [80, 200] }
            }),
        );
        enemies.insert(
            "berserker".to_string(),
            json!({
                "name": "Berserker",
                "description": "A warrior consumed by battle rage.",
                "base_hp": 250, "base_damage": 50, "rarity": "Epic",
                "abilities": ["berserker_rage", "wild_swing"],
                "weaknesses": { "ice": 1.3 },
                "drops": { "gold": [150, 400], "items": ["berserker_axe"] }
            }),
        );
        enemies.insert(
            "duelist".to_string(),
            json!({
                "name": "Master Duelist",
                "description": "A master of one-on-one combat.",
                "base_hp": 180, "base_damage": 35, "rarity": "Rare",
                "abilities": ["riposte", "precise_thrust", "disarm"],
                "drops": { "gold": [100, 250], "items": ["duelist_rapier"] }
            }),
        );
        enemies
    }

    fn register_items(&self) -> ContentMap {
        let mut items = ContentMap::new();
        items.insert(
            "knight_armor".to_string(),
            json!({
                "name": "Knight's Plate", "item_type": "armor", "rarity": "Rare",
                "value": 800, "slot": "chest", "defense": 25, "level_required": 8
            }),
        );
        items.insert(
            "assassin_dagger".to_string(),
            json!({
                "name": "Assassin's Blade", "item_type": "weapon", "rarity": "Epic",
                "value": 1200, "damage_min": 8, "damage_max": 16, "critical_chance": 0.2,
                "level_required": 10
            }),
        );
        items.insert(
            "berserker_axe".to_string(),
            json!({
                "name": "Berserker's Axe", "item_type": "weapon", "rarity": "Epic",
                "value": 1500, "damage_min": 15, "damage_max": 30,
                "special_effects": ["Damage increases with consecutive hits"],
                "level_required": 12
            }),
        );
        items.insert(
            "duelist_rapier".to_string(),
            json!({
                "name": "Duelist's Rapier", "item_type": "weapon", "rarity": "Rare",
                "value": 900, "damage_min": 10, "damage_max": 18, "critical_chance": 0.18,
                "level_required": 8
            }),
        );
        items.insert(
            "combat_stimulant".to_string(),
            json!({
                "name": "Combat Stimulant", "item_type": "consumable", "rarity": "Uncommon",
                "value": 75, "use_message": "You feel your combat abilities surge!"
            }),
        );
        items
    }
}

fn scratch_i64(scratch: &Scratch, key: &str) -> i64 {
    scratch.get(key).and_then(Value::as_i64).unwrap_or_default()
}

fn on_combat_start(state: &mut CombatState, ctx: &mut HookContext<'_>, payload: &Payload) -> Result<()> {
    state.stats.combats_started += 1;
    if state.settings.enable_combo_system {
        ctx.scratch.insert("combo".to_string(), json!(0));
    }

    let kinds: BTreeSet<&str> = payload
        .get("enemies")
        .and_then(Value::as_array)
        .map(|enemies| enemies.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();
    if kinds.len() >= VARIETY_THRESHOLD {
        let bonus = state.settings.variety_bonus_percent;
        ctx.scratch.insert("variety_bonus".to_string(), json!(bonus));
        state.stats.variety_bonuses += 1;
        ctx.game.notify(format!("Variety Bonus: +{}% experience!", bonus));
    }
    Ok(())
}

fn on_combat_turn(state: &mut CombatState, ctx: &mut HookContext<'_>, payload: &Payload) -> Result<()> {
    let mut damage = payload.get("damage").and_then(Value::as_i64).unwrap_or_default();
    if payload.get("critical").and_then(Value::as_bool).unwrap_or(false) {
        state.stats.critical_hits += 1;
        damage += (damage as f64 * state.settings.critical_damage_bonus).round() as i64;
    }
    state.stats.total_damage_dealt += damage;
    state.stats.total_damage_taken += payload.get("damage_taken").and_then(Value::as_i64).unwrap_or_default();

    if !state.settings.enable_combo_system {
        return Ok(());
    }
    if damage <= 0 {
        // A miss breaks the chain
        ctx.scratch.insert("combo".to_string(), json!(0));
        return Ok(());
    }

    let combo = scratch_i64(ctx.scratch, "combo") + 1;
    ctx.scratch.insert("combo".to_string(), json!(combo));
    if combo % COMBO_STEP == 0 {
        ctx.game.notify(format!(
            "{}-hit combo! Damage x{:.2}!",
            combo,
            state.settings.combo_damage_multiplier(combo)
        ));
    }
    Ok(())
}

fn on_combat_end(state: &mut CombatState, ctx: &mut HookContext<'_>, payload: &Payload) -> Result<()> {
    let victory = payload.get("result").and_then(Value::as_str) == Some("victory");
    if victory {
        state.stats.combats_won += 1;
        if let Some(bonus) = ctx.scratch.remove("variety_bonus").and_then(|bonus| bonus.as_i64()) {
            ctx.game.notify(format!("Variety bonus applied: +{}%", bonus));
        }
    } else {
        state.stats.combats_lost += 1;
        ctx.scratch.remove("variety_bonus");
    }

    if let Some(combo) = ctx.scratch.remove("combo").and_then(|combo| combo.as_i64()) {
        state.stats.max_combo = state.stats.max_combo.max(combo);
    }
    Ok(())
}

fn on_level_up(state: &mut CombatState, ctx: &mut HookContext<'_>, payload: &Payload) -> Result<()> {
    let level = payload
        .get("level")
        .and_then(Value::as_i64)
        .unwrap_or_else(|| i64::from(ctx.game.player().level));
    if level <= 0 || level % state.settings.milestone_level_interval != 0 {
        return Ok(());
    }

    state.stats.milestones += 1;
    let bonuses = ctx
        .scratch
        .entry("milestone_bonuses".to_string())
        .or_insert_with(|| json!({}));
    if let Some(bonuses) = bonuses.as_object_mut() {
        bonuses.insert(
            format!("milestone_{}", level),
            json!({ "critical_chance": 0.02, "damage_bonus": level / 2 }),
        );
    }
    ctx.game.notify(format!("Milestone Level {}! Combat prowess increased!", level));
    Ok(())
}

fn combat_stats(state: &mut CombatState, _ctx: &mut CommandContext<'_>, _args: &[String]) -> Result<String> {
    let stats = &state.stats;
    let settings = &state.settings;
    Ok(format!(
        "Enhanced Combat Statistics:\n  Combats Started: {}\n  Victories: {}\n  Defeats: {}\n  Win Rate: {:.1}%\n  \
         Damage Dealt: {}\n  Damage Taken: {}\n  Critical Hits: {}\n  Max Combo: {}\n  Variety Bonuses: {}\n\n\
         Configuration:\n  Combo System: {}\n  Variety Bonus: {}%\n  Combo Multiplier: {}x",
        stats.combats_started,
        stats.combats_won,
        stats.combats_lost,
        stats.win_rate(),
        stats.total_damage_dealt,
        stats.total_damage_taken,
        stats.critical_hits,
        stats.max_combo,
        stats.variety_bonuses,
        if settings.enable_combo_system { "On" } else { "Off" },
        settings.variety_bonus_percent,
        settings.combo_multiplier
    ))
}

fn combat_config(state: &mut CombatState, ctx: &mut CommandContext<'_>, args: &[String]) -> Result<String> {
    let schema: BTreeMap<String, ConfigOption> = EnhancedCombatPlugin::describe().config_schema;

    match args {
        [] => Ok(state
            .config
            .iter()
            .map(|(key, value)| format!("{} = {}", key, value))
            .collect::<Vec<_>>()
            .join("\n")),
        [key] => match state.config.get(key) {
            Some(value) => Ok(format!("{} = {}", key, value)),
            None => Ok(format!("{} = Not found", key)),
        },
        [key, raw, ..] => {
            let option = schema
                .get(key)
                .with_context(|| format!("unknown combat setting '{}'", key))?;
            let value = parse_setting(raw);
            option
                .check(&value)
                .map_err(|reason| anyhow::anyhow!("invalid value for {}: {}", key, reason))?;

            let old = state.config.insert(key.clone(), value.clone()).unwrap_or(Value::Null);
            state.settings = CombatSettings::from_config(&state.config);
            tracing::info!("Combat setting {} changed by {}: {} -> {}", key, ctx.plugin_id, old, value);
            Ok(format!("Set {}: {} -> {}", key, old, value))
        }
    }
}

fn combat_test(state: &mut CombatState, _ctx: &mut CommandContext<'_>, args: &[String]) -> Result<String> {
    let base: i64 = args[0]
        .parse()
        .with_context(|| format!("invalid base damage '{}'", args[0]))?;
    let combo: i64 = match args.get(1) {
        Some(raw) => raw.parse().with_context(|| format!("invalid combo count '{}'", raw))?,
        None => 0,
    };

    let multiplier = state.settings.combo_damage_multiplier(combo);
    if multiplier == 1.0 {
        return Ok(format!("Combat Test: Base damage {} (no combo bonus)", base));
    }
    Ok(format!(
        "Combat Test:\n  Base Damage: {}\n  Combo: {}\n  Multiplier: {:.2}x\n  Final Damage: {}",
        base,
        combo,
        multiplier,
        (base as f64 * multiplier) as i64
    ))
}
