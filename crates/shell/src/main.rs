//! QuestForge shell - a line-based game loop driving the plugin runtime

use anyhow::Context;
use clap::Parser;
use questforge_core::telemetry::init_tracing;
use questforge_core::{
    ContentSinks, EventType, GameContext, Payload, PluginManager, PluginSystemConfig, SimpleGame, Weather,
};
use questforge_plugins::builtin_units;
use serde_json::json;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;

/// QuestForge - a text RPG with hot-reloadable plugins
#[derive(Parser, Debug)]
#[command(name = "questforge")]
#[command(version, about, long_about = None)]
struct Args {
    /// Plugin system config file (TOML or JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Extra directory to scan for manifest plugins
    #[arg(short, long)]
    plugin_dir: Vec<PathBuf>,

    /// Name of the player character
    #[arg(long, default_value = "Hero")]
    player: String,

    /// Emit JSON log lines
    #[arg(long)]
    json_logs: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => PluginSystemConfig::load_from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => PluginSystemConfig::default(),
    };
    config.plugin_dirs.extend(args.plugin_dir.iter().cloned());
    if args.json_logs {
        config.logging.json = true;
    }
    init_tracing(&config.logging)?;

    let mut manager = PluginManager::new(config, ContentSinks::in_memory());
    manager.discover_configured(builtin_units().into_iter().map(|unit| unit.into_shared()).collect());
    for error in manager.discovery_errors() {
        tracing::warn!("{}", error);
    }

    let mut game = SimpleGame::new(args.player);
    let report = manager.load_all(&mut game);
    println!("{}", report.summary());
    manager.emit_event(EventType::GameStart, Payload::new(), &mut game);
    flush_messages(&mut game);

    let stdin = io::stdin();
    prompt()?;
    for line in stdin.lock().lines() {
        let line = line.context("Failed to read input")?;
        let line = line.trim();

        if line.eq_ignore_ascii_case("quit") || line.eq_ignore_ascii_case("exit") {
            break;
        }
        if !line.is_empty() {
            match manager.handle_input(line, &mut game) {
                Some(outcome) => println!("{}", outcome.output),
                None => play(line, &mut manager, &mut game),
            }
        }

        for (id, result) in manager.poll_hot_reload(&mut game) {
            match result {
                Ok(()) => println!("[Plugins] Reloaded {}", id),
                Err(error) => println!("[Plugins] {}", error),
            }
        }
        flush_messages(&mut game);
        prompt()?;
    }

    manager.emit_event(EventType::GameSave, Payload::new(), &mut game);
    manager.shutdown(&mut game);
    flush_messages(&mut game);
    Ok(())
}

fn prompt() -> anyhow::Result<()> {
    print!("> ");
    io::stdout().flush()?;
    Ok(())
}

fn flush_messages(game: &mut SimpleGame) {
    for message in game.drain_messages() {
        println!("{}", message);
    }
}

fn payload(value: serde_json::Value) -> Payload {
    match value {
        serde_json::Value::Object(map) => map,
        _ => Payload::new(),
    }
}

/// Plain game verbs, turned into events for the plugins to react to
fn play(line: &str, manager: &mut PluginManager, game: &mut SimpleGame) {
    let mut words = line.split_whitespace();
    let verb = words.next().unwrap_or_default().to_lowercase();
    let rest: Vec<&str> = words.collect();

    match (verb.as_str(), rest.as_slice()) {
        ("go", [place, ..]) => {
            let from = game.world().location.clone();
            manager.emit_event(EventType::LocationLeave, payload(json!({ "location_id": from })), game);
            game.world_mut().location = place.to_string();
            manager.emit_event(EventType::LocationEnter, payload(json!({ "location_id": place })), game);
            println!("You travel to {}.", place);
        }
        ("talk", [npc, ..]) => {
            manager.emit_event(EventType::NpcInteract, payload(json!({ "npc_id": npc })), game);
        }
        ("wait", _) => {
            let world = game.world_mut();
            world.hour = (world.hour + 1) % 24;
            if world.hour == 0 {
                world.day += 1;
            }
            let hour = world.hour;
            manager.emit_event(EventType::TimeChange, payload(json!({ "hour": hour })), game);
            println!("Time passes. It is now {:02}:00.", hour);
        }
        ("weather", [kind, ..]) => match serde_json::from_value::<Weather>(json!(kind.to_lowercase())) {
            Ok(weather) => {
                game.world_mut().weather = weather;
                manager.emit_event(EventType::WeatherChange, payload(json!({ "weather": weather })), game);
                println!("The weather turns to {}.", weather);
            }
            Err(_) => println!("Unknown weather: {}", kind),
        },
        ("fight", enemies) if !enemies.is_empty() => {
            manager.emit_event(EventType::CombatStart, payload(json!({ "enemies": enemies })), game);
            for _ in enemies {
                manager.emit_event(EventType::CombatTurn, payload(json!({ "damage": 10 })), game);
            }
            manager.emit_event(EventType::CombatEnd, payload(json!({ "result": "victory" })), game);
            println!("You defeat {}.", enemies.join(", "));
        }
        ("levelup", _) => {
            let level = {
                let player = game.player_mut();
                player.level += 1;
                player.level
            };
            manager.emit_event(EventType::PlayerLevelUp, payload(json!({ "level": level })), game);
            println!("You reach level {}!", level);
        }
        _ => println!("You {}. Nothing happens. (Try /help)", line),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use questforge_core::plugin::{ManifestUnit, PluginUnit};
    use std::path::Path;

    fn shipped(file: &str) -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR")).join(file)
    }

    #[test]
    fn test_shipped_config_parses() {
        let config = PluginSystemConfig::load_from_file(shipped("questforge.toml")).unwrap();
        assert_eq!(config.plugin_dirs, vec![PathBuf::from("plugins")]);
        assert_eq!(config.overrides_for("extended_world")["event_frequency"], json!(8));
    }

    #[test]
    fn test_shipped_manifest_parses() {
        let unit = ManifestUnit::open(shipped("plugins/harvest_festival.toml")).unwrap();
        assert_eq!(unit.descriptor().id, "harvest_festival");
        assert!(unit.descriptor().supports_hot_reload);
    }

    #[test]
    fn test_play_turns_verbs_into_events() {
        let mut manager = PluginManager::new(PluginSystemConfig::default(), ContentSinks::in_memory());
        manager.discover_configured(builtin_units().into_iter().map(|unit| unit.into_shared()).collect());
        let mut game = SimpleGame::default();
        manager.load_all(&mut game);

        play("go crystal_caverns", &mut manager, &mut game);
        assert_eq!(game.world().location, "crystal_caverns");

        play("weather storm", &mut manager, &mut game);
        assert_eq!(game.world().weather, Weather::Storm);

        play("levelup", &mut manager, &mut game);
        assert_eq!(game.player().level, 2);

        play("fight goblin wolf bandit", &mut manager, &mut game);
        let stats = manager.execute_command("combat_stats", &[], &mut game);
        assert!(stats.output.contains("Victories: 1"));
    }
}
