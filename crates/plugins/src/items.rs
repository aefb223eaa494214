//! Extended items: weapons, armor, consumables, accessories, crafting
//! materials and the recipes that use them

use crate::{payload_str, setting_bool, setting_f64};
use anyhow::{Context, Result};
use parking_lot::Mutex;
use questforge_core::plugin::{ConfigOption, DefinePlugin, Plugin, PluginConfig, PluginDescriptor, Snapshot};
use questforge_core::{CommandSpec, ContentMap, EventType, GameContext, HookContext, HookSpec, Payload};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::Arc;

struct ItemsState {
    legendary_drop_rate: f64,
    enable_custom_items: bool,
    legendary_drops: u64,
    rng: fastrand::Rng,
}

/// Extended item collection
pub struct ExtendedItemsPlugin {
    descriptor: PluginDescriptor,
    state: Arc<Mutex<ItemsState>>,
}

impl ExtendedItemsPlugin {
    /// Every item this plugin defines, regardless of config
    pub fn catalogue() -> ContentMap {
        let mut items = weapons();
        items.extend(armor());
        items.extend(consumables());
        items.extend(accessories());
        items.extend(materials());
        items
    }

    /// Ids of the legendary items that can drop after a victory
    pub fn legendaries() -> Vec<String> {
        Self::catalogue()
            .into_iter()
            .filter(|(_, item)| item.get("rarity").and_then(Value::as_str) == Some("Legendary"))
            .map(|(id, _)| id)
            .collect()
    }

    pub fn legendary_drops(&self) -> u64 {
        self.state.lock().legendary_drops
    }
}

impl DefinePlugin for ExtendedItemsPlugin {
    fn describe() -> PluginDescriptor {
        PluginDescriptor::new("extended_items", "Extended Items")
            .with_version(semver::Version::new(2, 0, 0))
            .with_author("QuestForge Team")
            .with_description("New weapons, armor, consumables, accessories and materials")
            .with_soft_dependency("enhanced_combat")
            .with_provides("extended_items")
            .with_tag("items")
            .with_tag("equipment")
            .with_tag("loot")
            .with_config_option(
                "legendary_drop_rate",
                ConfigOption::number(0.01)
                    .with_range(0.0, 1.0)
                    .with_description("Chance of a legendary drop after each victory"),
            )
            .with_config_option(
                "enable_custom_items",
                ConfigOption::boolean(true).with_description("Register the extended item collection"),
            )
            .hot_reloadable()
    }

    fn create(descriptor: PluginDescriptor) -> Result<Self> {
        let state = ItemsState {
            legendary_drop_rate: setting_f64(&descriptor.config, "legendary_drop_rate", 0.01),
            enable_custom_items: setting_bool(&descriptor.config, "enable_custom_items", true),
            legendary_drops: 0,
            rng: fastrand::Rng::new(),
        };
        Ok(Self {
            descriptor,
            state: Arc::new(Mutex::new(state)),
        })
    }
}

impl Plugin for ExtendedItemsPlugin {
    fn descriptor(&self) -> &PluginDescriptor {
        &self.descriptor
    }

    fn apply_config(&mut self, config: &PluginConfig) -> Result<()> {
        let mut state = self.state.lock();
        state.legendary_drop_rate = setting_f64(config, "legendary_drop_rate", 0.01);
        state.enable_custom_items = setting_bool(config, "enable_custom_items", true);
        Ok(())
    }

    fn on_load(&mut self, _game: &mut dyn GameContext) -> Result<()> {
        tracing::info!("Loading extended item collection ({} items)", Self::catalogue().len());
        Ok(())
    }

    fn on_before_reload(&mut self, _game: &mut dyn GameContext) -> Result<Snapshot> {
        let mut snapshot = Snapshot::new();
        snapshot.insert("legendary_drops".to_string(), json!(self.state.lock().legendary_drops));
        Ok(snapshot)
    }

    fn on_after_reload(&mut self, _game: &mut dyn GameContext, snapshot: Snapshot) -> Result<()> {
        if let Some(drops) = snapshot.get("legendary_drops") {
            self.state.lock().legendary_drops = drops.as_u64().context("legendary drop count must be a number")?;
        }
        Ok(())
    }

    fn register_hooks(&self) -> Vec<HookSpec> {
        let state = Arc::clone(&self.state);
        vec![
            HookSpec::new(EventType::CombatEnd, move |ctx, payload| {
                roll_legendary_drop(&mut state.lock(), ctx, payload)
            }),
            HookSpec::new(EventType::ItemPickup, |ctx, payload| {
                let name = payload_str(payload, "name").unwrap_or("an item");
                match payload_str(payload, "rarity") {
                    Some("Legendary") => ctx.game.notify(format!("Legendary item found: {}!", name)),
                    Some("Epic") => ctx.game.notify(format!("Epic item discovered: {}!", name)),
                    _ => {}
                }
                Ok(())
            }),
            HookSpec::new(EventType::ItemEquip, |ctx, payload| {
                let catalogued = payload_str(payload, "item_id").and_then(|id| {
                    Self::catalogue()
                        .remove(id)
                        .and_then(|item| item.get("special_effects").cloned())
                });
                if let Some(Value::Array(effects)) = catalogued {
                    let effects: Vec<&str> = effects.iter().filter_map(Value::as_str).collect();
                    ctx.game.notify(format!("Special effects: {}", effects.join(", ")));
                }
                Ok(())
            }),
        ]
    }

    fn register_commands(&self) -> Vec<CommandSpec> {
        vec![CommandSpec::new("item_list", "List extended items", |_ctx, _args| Ok(item_list()))
            .with_category("info")
            .with_args(0, Some(0))]
    }

    fn register_items(&self) -> ContentMap {
        if !self.state.lock().enable_custom_items {
            return ContentMap::new();
        }
        Self::catalogue()
    }

    fn register_recipes(&self) -> ContentMap {
        if !self.state.lock().enable_custom_items {
            return ContentMap::new();
        }
        let mut recipes = ContentMap::new();
        recipes.insert(
            "forge_dragon_plate".to_string(),
            json!({
                "name": "Forge Dragon Plate",
                "result": "dragon_plate",
                "ingredients": { "dragon_scale": 5, "magic_crystal": 2 },
                "gold_cost": 2000
            }),
        );
        recipes.insert(
            "brew_elixir_of_power".to_string(),
            json!({
                "name": "Brew Elixir of Power",
                "result": "elixir_of_power",
                "ingredients": { "enchanted_essence": 2, "magic_crystal": 1 },
                "gold_cost": 150
            }),
        );
        recipes.insert(
            "attune_mage_amulet".to_string(),
            json!({
                "name": "Attune Amulet of the Mage",
                "result": "mage_amulet",
                "ingredients": { "magic_crystal": 3, "enchanted_essence": 3 },
                "gold_cost": 800
            }),
        );
        recipes
    }
}

fn roll_legendary_drop(state: &mut ItemsState, ctx: &mut HookContext<'_>, payload: &Payload) -> Result<()> {
    if payload_str(payload, "result") != Some("victory") || !state.enable_custom_items {
        return Ok(());
    }
    if state.rng.f64() >= state.legendary_drop_rate {
        return Ok(());
    }

    let legendaries = ExtendedItemsPlugin::legendaries();
    if legendaries.is_empty() {
        return Ok(());
    }
    let id = &legendaries[state.rng.usize(..legendaries.len())];
    let name = ExtendedItemsPlugin::catalogue()
        .get(id)
        .and_then(|item| item.get("name").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| id.clone());

    state.legendary_drops += 1;
    ctx.game.player_mut().inventory.push(id.clone());
    ctx.game.notify(format!("The fallen foe dropped a legendary item: {}!", name));
    tracing::debug!("Legendary drop {} (total {})", id, state.legendary_drops);
    Ok(())
}

fn item_list() -> String {
    let items = ExtendedItemsPlugin::catalogue();

    let mut by_type: BTreeMap<&str, Vec<(&String, &Value)>> = BTreeMap::new();
    for (id, item) in &items {
        let kind = item.get("item_type").and_then(Value::as_str).unwrap_or("unknown");
        by_type.entry(kind).or_default().push((id, item));
    }

    let mut out = String::from("Extended Items:");
    for (kind, entries) in &by_type {
        let _ = write!(out, "\n\n[{}]", kind.to_uppercase());
        for (id, item) in entries {
            let name = item.get("name").and_then(Value::as_str).unwrap_or(id.as_str());
            let rarity = item.get("rarity").and_then(Value::as_str).unwrap_or("Common");
            let _ = write!(out, "\n  - {} ({})", name, rarity);
        }
    }
    let _ = write!(out, "\n\nTotal: {} items", items.len());
    out
}

fn weapons() -> ContentMap {
    let mut items = ContentMap::new();
    items.insert(
        "thunder_hammer".to_string(),
        json!({
            "name": "Thunder Hammer", "item_type": "weapon", "rarity": "Epic", "value": 3500,
            "description": "A massive hammer that crackles with lightning.",
            "damage_min": 18, "damage_max": 32, "damage_type": "lightning", "two_handed": true,
            "level_required": 12, "special_effects": ["Chain Lightning on critical"]
        }),
    );
    items.insert(
        "void_dagger".to_string(),
        json!({
            "name": "Void Dagger", "item_type": "weapon", "rarity": "Epic", "value": 2800,
            "description": "A blade forged from the emptiness between stars.",
            "damage_min": 10, "damage_max": 20, "damage_type": "dark", "critical_chance": 0.25,
            "level_required": 10, "special_effects": ["Life steal 10%"]
        }),
    );
    items.insert(
        "holy_lance".to_string(),
        json!({
            "name": "Holy Lance", "item_type": "weapon", "rarity": "Legendary", "value": 6000,
            "description": "A lance blessed by the temple's first paladin.",
            "damage_min": 25, "damage_max": 40, "damage_type": "holy", "two_handed": true,
            "level_required": 18, "special_effects": ["Double damage against undead"]
        }),
    );
    items.insert(
        "frost_staff".to_string(),
        json!({
            "name": "Staff of the Frozen North", "item_type": "weapon", "rarity": "Rare", "value": 1800,
            "description": "Frost gathers along its length.",
            "damage_min": 8, "damage_max": 16, "damage_type": "ice", "two_handed": true,
            "level_required": 8, "special_effects": ["Slows enemies on hit"]
        }),
    );
    items.insert(
        "steel_katana".to_string(),
        json!({
            "name": "Steel Katana", "item_type": "weapon", "rarity": "Uncommon", "value": 450,
            "description": "A finely balanced curved blade.",
            "damage_min": 9, "damage_max": 14, "damage_type": "physical", "level_required": 4
        }),
    );
    items
}

fn armor() -> ContentMap {
    let mut items = ContentMap::new();
    items.insert(
        "dragon_plate".to_string(),
        json!({
            "name": "Dragon Plate Armor", "item_type": "armor", "rarity": "Legendary", "value": 8000,
            "description": "Armor forged from the scales of an ancient dragon.",
            "slot": "chest", "defense": 45, "level_required": 20,
            "special_effects": ["Fire resistance 50%"]
        }),
    );
    items.insert(
        "shadow_cloak".to_string(),
        json!({
            "name": "Shadow Cloak", "item_type": "armor", "rarity": "Epic", "value": 2200,
            "description": "Woven from captured twilight.",
            "slot": "back", "defense": 12, "level_required": 10,
            "special_effects": ["+15% dodge chance"]
        }),
    );
    items.insert(
        "crown_of_wisdom".to_string(),
        json!({
            "name": "Crown of Wisdom", "item_type": "armor", "rarity": "Epic", "value": 2500,
            "description": "Worn by the scholar kings of old.",
            "slot": "head", "defense": 8, "level_required": 12,
            "special_effects": ["+20% mana regeneration"]
        }),
    );
    items.insert(
        "leather_vest".to_string(),
        json!({
            "name": "Reinforced Leather Vest", "item_type": "armor", "rarity": "Common", "value": 120,
            "description": "Sturdy leather with riveted plates.",
            "slot": "chest", "defense": 6, "level_required": 1
        }),
    );
    items
}

fn consumables() -> ContentMap {
    let mut items = ContentMap::new();
    items.insert(
        "elixir_of_power".to_string(),
        json!({
            "name": "Elixir of Power", "item_type": "consumable", "rarity": "Rare", "value": 300,
            "effect": { "damage_bonus": 10, "turns": 5 },
            "use_message": "Power surges through your veins!"
        }),
    );
    items.insert(
        "phoenix_feather".to_string(),
        json!({
            "name": "Phoenix Feather", "item_type": "consumable", "rarity": "Legendary", "value": 5000,
            "effect": { "revive": true, "heal_percent": 50 },
            "use_message": "Flames of rebirth wash over you!"
        }),
    );
    items.insert(
        "mega_potion".to_string(),
        json!({
            "name": "Mega Potion", "item_type": "consumable", "rarity": "Uncommon", "value": 150,
            "effect": { "heal": 100 }, "use_message": "You feel greatly restored."
        }),
    );
    items.insert(
        "greater_antidote".to_string(),
        json!({
            "name": "Greater Antidote", "item_type": "consumable", "rarity": "Uncommon", "value": 80,
            "effect": { "cure": ["poison", "disease"] }, "use_message": "The sickness leaves your body."
        }),
    );
    items.insert(
        "travel_ration".to_string(),
        json!({
            "name": "Travel Ration", "item_type": "consumable", "rarity": "Common", "value": 10,
            "effect": { "heal": 15 }, "use_message": "Simple but filling."
        }),
    );
    items
}

fn accessories() -> ContentMap {
    let mut items = ContentMap::new();
    items.insert(
        "ring_of_shadows".to_string(),
        json!({
            "name": "Ring of Shadows", "item_type": "accessory", "rarity": "Epic", "value": 1800,
            "slot": "ring", "special_effects": ["+10% critical chance at night"]
        }),
    );
    items.insert(
        "mage_amulet".to_string(),
        json!({
            "name": "Amulet of the Mage", "item_type": "accessory", "rarity": "Rare", "value": 1200,
            "slot": "neck", "special_effects": ["+15% spell damage"]
        }),
    );
    items.insert(
        "warrior_pendant".to_string(),
        json!({
            "name": "Warrior's Pendant", "item_type": "accessory", "rarity": "Rare", "value": 1000,
            "slot": "neck", "special_effects": ["+5 strength"]
        }),
    );
    items.insert(
        "lucky_coin".to_string(),
        json!({
            "name": "Lucky Coin", "item_type": "accessory", "rarity": "Uncommon", "value": 300,
            "slot": "trinket", "special_effects": ["+10% gold from battles"]
        }),
    );
    items
}

fn materials() -> ContentMap {
    let mut items = ContentMap::new();
    items.insert(
        "dragon_scale".to_string(),
        json!({ "name": "Dragon Scale", "item_type": "material", "rarity": "Epic", "value": 500 }),
    );
    items.insert(
        "magic_crystal".to_string(),
        json!({ "name": "Magic Crystal", "item_type": "material", "rarity": "Rare", "value": 200 }),
    );
    items.insert(
        "enchanted_essence".to_string(),
        json!({ "name": "Enchanted Essence", "item_type": "material", "rarity": "Uncommon", "value": 75 }),
    );
    items
}

#[cfg(test)]
mod tests {
    use super::*;
    use questforge_core::SimpleGame;

    fn plugin_with(config: &[(&str, Value)]) -> ExtendedItemsPlugin {
        let mut descriptor = ExtendedItemsPlugin::describe();
        for (key, value) in config {
            descriptor.config.insert(key.to_string(), value.clone());
        }
        ExtendedItemsPlugin::create(descriptor).unwrap()
    }

    #[test]
    fn test_catalogue_covers_every_category() {
        let items = ExtendedItemsPlugin::catalogue();
        assert_eq!(items.len(), 21);
        for kind in ["weapon", "armor", "consumable", "accessory", "material"] {
            assert!(items.values().any(|item| item["item_type"] == kind), "{}", kind);
        }
    }

    #[test]
    fn test_recipes_use_known_items() {
        let items = ExtendedItemsPlugin::catalogue();
        for (id, recipe) in plugin_with(&[]).register_recipes() {
            let result = recipe["result"].as_str().unwrap();
            assert!(items.contains_key(result), "{} makes unknown {}", id, result);
            for ingredient in recipe["ingredients"].as_object().unwrap().keys() {
                assert!(items.contains_key(ingredient), "{} needs unknown {}", id, ingredient);
            }
        }
    }

    #[test]
    fn test_custom_items_can_be_switched_off() {
        let plugin = plugin_with(&[("enable_custom_items", json!(false))]);
        assert!(plugin.register_items().is_empty());
        assert!(plugin.register_recipes().is_empty());
    }

    #[test]
    fn test_guaranteed_drop_lands_in_inventory() {
        let plugin = plugin_with(&[("legendary_drop_rate", json!(1.0))]);
        let mut game = SimpleGame::default();
        let mut scratch = questforge_core::Scratch::new();
        let event = EventType::CombatEnd;
        let mut ctx = HookContext::new(&mut game, &mut scratch, "extended_items", &event);

        let mut payload = Payload::new();
        payload.insert("result".to_string(), json!("victory"));
        roll_legendary_drop(&mut plugin.state.lock(), &mut ctx, &payload).unwrap();
        payload.insert("result".to_string(), json!("defeat"));
        roll_legendary_drop(&mut plugin.state.lock(), &mut ctx, &payload).unwrap();

        assert_eq!(plugin.legendary_drops(), 1);
        let legendaries = ExtendedItemsPlugin::legendaries();
        assert_eq!(game.player().inventory.len(), 1);
        assert!(legendaries.contains(&game.player().inventory[0]));
    }

    #[test]
    fn test_item_list_groups_by_type() {
        let text = item_list();
        assert!(text.starts_with("Extended Items:"));
        assert!(text.find("[ACCESSORY]").unwrap() < text.find("[WEAPON]").unwrap());
        assert!(text.contains("Thunder Hammer (Epic)"));
        assert!(text.ends_with("Total: 21 items"));
    }
}
