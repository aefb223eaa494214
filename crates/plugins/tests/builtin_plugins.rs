//! The bundled plugins running together inside a plugin manager

use questforge_core::{
    ContentKind, ContentSinks, EventType, Payload, PluginManager, PluginState, PluginSystemConfig, SimpleGame,
};
use questforge_plugins::builtin_units;
use serde_json::{json, Value};

fn payload(value: Value) -> Payload {
    value.as_object().cloned().unwrap_or_default()
}

fn args(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

fn manager_with(overrides: &[(&str, Value)]) -> (PluginManager, SimpleGame) {
    let mut config = PluginSystemConfig::default();
    for (plugin, values) in overrides {
        config.overrides.insert(
            plugin.to_string(),
            values.as_object().map(|m| m.clone().into_iter().collect()).unwrap_or_default(),
        );
    }

    let mut manager = PluginManager::new(config, ContentSinks::in_memory());
    manager.discover_configured(builtin_units().into_iter().map(|unit| unit.into_shared()).collect());
    let mut game = SimpleGame::default();
    let report = manager.load_all(&mut game);
    assert!(report.failed.is_empty(), "{}", report.summary());
    (manager, game)
}

fn quiet_manager() -> (PluginManager, SimpleGame) {
    manager_with(&[("extended_items", json!({ "legendary_drop_rate": 0.0 }))])
}

#[test]
fn test_all_builtins_load_despite_soft_cycles() {
    let (manager, _game) = quiet_manager();
    assert_eq!(
        manager.load_order(),
        ["help_plugin", "extended_items", "enhanced_combat", "extended_world", "extended_npcs"]
    );
    for id in manager.load_order() {
        assert_eq!(manager.state(id), Some(PluginState::Enabled), "{}", id);
    }
}

#[test]
fn test_content_from_every_plugin_is_registered() {
    let (manager, _game) = quiet_manager();
    let content = manager.content();
    assert_eq!(content.owner_of(ContentKind::Item, "thunder_hammer"), Some("extended_items"));
    assert_eq!(content.owner_of(ContentKind::Item, "berserker_axe"), Some("enhanced_combat"));
    assert!(content.get(ContentKind::Enemy, "shadow_assassin").is_some());
    assert!(content.get(ContentKind::Npc, "foreman_gimli").is_some());
    assert!(content.get(ContentKind::Location, "crystal_caverns").is_some());
    assert!(content.get(ContentKind::Recipe, "forge_dragon_plate").is_some());
}

#[test]
fn test_help_lists_plugin_and_builtin_commands() {
    let (mut manager, mut game) = quiet_manager();
    let outcome = manager.handle_input("/help", &mut game).unwrap();
    assert!(outcome.success);
    for command in ["/combat_stats", "/item_list", "/npcs", "/exploration", "/plugins", "/reload"] {
        assert!(outcome.output.contains(command), "missing {}", command);
    }

    let detail = manager.handle_input("/? combat_test", &mut game).unwrap();
    assert!(detail.output.contains("Usage: /combat_test <base_damage> [combo_count]"));
    assert!(detail.output.contains("Provided by: enhanced_combat"));
}

#[test]
fn test_combat_statistics_survive_hot_reload() {
    let (mut manager, mut game) = quiet_manager();

    manager.emit_event(
        EventType::CombatStart,
        payload(json!({ "enemies": ["goblin", "wolf", "bandit"] })),
        &mut game,
    );
    for _ in 0..3 {
        manager.emit_event(EventType::CombatTurn, payload(json!({ "damage": 12 })), &mut game);
    }
    manager.emit_event(EventType::CombatEnd, payload(json!({ "result": "victory" })), &mut game);

    let messages = game.drain_messages();
    assert!(messages.contains(&"Variety Bonus: +10% experience!".to_string()));
    assert!(messages.contains(&"3-hit combo! Damage x1.10!".to_string()));

    manager.reload("enhanced_combat", &mut game).unwrap();
    assert_eq!(manager.handle("enhanced_combat").unwrap().stats().reload_count, 1);

    let stats = manager.execute_command("combat_stats", &[], &mut game);
    assert!(stats.output.contains("Victories: 1"), "{}", stats.output);
    assert!(stats.output.contains("Max Combo: 3"));
    assert!(stats.output.contains("Damage Dealt: 36"));
}

#[test]
fn test_combat_config_is_validated() {
    let (mut manager, mut game) = quiet_manager();

    let rejected = manager.execute_command("combat_config", &args(&["combo_multiplier", "9"]), &mut game);
    assert!(!rejected.success);
    assert!(rejected.output.contains("invalid value for combo_multiplier"));

    let accepted = manager.execute_command("combat_config", &args(&["combo_multiplier", "2.5"]), &mut game);
    assert!(accepted.success, "{}", accepted.output);

    let test = manager.execute_command("combat_test", &args(&["100", "3"]), &mut game);
    assert!(test.output.contains("Multiplier: 2.50x"));
    assert!(test.output.contains("Final Damage: 250"));

    let bad = manager.execute_command("combat_test", &args(&["lots"]), &mut game);
    assert!(!bad.success);
}

#[test]
fn test_guaranteed_legendary_drop() {
    let (mut manager, mut game) = manager_with(&[("extended_items", json!({ "legendary_drop_rate": 1.0 }))]);

    manager.emit_event(EventType::CombatEnd, payload(json!({ "result": "victory" })), &mut game);
    assert_eq!(game.player.inventory.len(), 1);
    let dropped = &game.player.inventory[0];
    assert_eq!(
        manager.content().get(ContentKind::Item, dropped).unwrap()["rarity"],
        "Legendary"
    );

    manager.emit_event(EventType::CombatEnd, payload(json!({ "result": "defeat" })), &mut game);
    assert_eq!(game.player.inventory.len(), 1);
}

#[test]
fn test_npc_friendship_survives_reload_but_not_unload() {
    let (mut manager, mut game) = quiet_manager();

    for _ in 0..3 {
        manager.emit_event(EventType::NpcInteract, payload(json!({ "npc_id": "old_sage_merlin" })), &mut game);
    }
    let before = manager.execute_command("friendship", &args(&["old_sage_merlin"]), &mut game);
    assert_eq!(before.output, "Old Sage Merlin: 15 friendship");

    manager.reload("extended_npcs", &mut game).unwrap();
    let after = manager.execute_command("friendship", &args(&["old_sage_merlin"]), &mut game);
    assert_eq!(after.output, before.output);

    manager.unload("extended_npcs", &mut game).unwrap();
    manager.load("extended_npcs", &mut game).unwrap();
    let fresh = manager.execute_command("friendship", &[], &mut game);
    assert_eq!(fresh.output, "You haven't befriended anyone yet.");
}

#[test]
fn test_soft_dependents_stay_loaded_when_items_unload() {
    let (mut manager, mut game) = quiet_manager();

    let unloaded = manager.unload("extended_items", &mut game).unwrap();
    assert_eq!(unloaded, vec!["extended_items"]);
    assert_eq!(manager.state("enhanced_combat"), Some(PluginState::Enabled));
    assert!(manager.content().get(ContentKind::Item, "thunder_hammer").is_none());
    assert!(manager.content().get(ContentKind::Item, "berserker_axe").is_some());
    assert!(!manager.execute_command("item_list", &[], &mut game).success);
}

#[test]
fn test_world_secret_discovery_through_events() {
    let (mut manager, mut game) = quiet_manager();
    game.player.level = 12;

    manager.emit_event(
        EventType::LocationEnter,
        payload(json!({ "location_id": "crystal_caverns" })),
        &mut game,
    );
    let secrets = manager.execute_command("secrets", &[], &mut game);
    assert!(secrets.output.contains("Discovered: 1/"));
    assert!(secrets.output.contains("[x] Heart of the Caverns"));
    assert!(game.player.inventory.contains(&"magic_crystal".to_string()));
}
