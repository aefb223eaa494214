//! Directory discovery and hot reload of manifest plugins

use questforge_core::{
    ContentKind, ContentSinks, DiscoverySource, NativeUnit, PluginBuilder, PluginError, PluginManager, PluginState,
    PluginSystemConfig, SimpleGame,
};
use std::fs;
use std::path::Path;
use std::time::{Duration, SystemTime};
use tempfile::TempDir;

const FESTIVAL: &str = r#"
[plugin]
id = "harvest_festival"
name = "Harvest Festival"
supports_hot_reload = true

[items.pumpkin_pie]
name = "Pumpkin Pie"
heal = 25

[commands.festival]
help = "What is happening at the festival"
response = "Lanterns line the village square."
aliases = ["fest"]
"#;

const FESTIVAL_V2: &str = r#"
[plugin]
id = "harvest_festival"
name = "Harvest Festival"
version = "1.1.0"
supports_hot_reload = true

[items.pumpkin_pie]
name = "Pumpkin Pie"
heal = 40

[npcs.scarecrow]
name = "Talking Scarecrow"

[commands.festival]
help = "What is happening at the festival"
response = "The scarecrow judges the pie contest."
"#;

const RUINS: &str = r#"{
    "plugin": { "id": "old_ruins", "name": "Old Ruins" },
    "locations": { "ruins": { "name": "Crumbling Ruins", "danger": 3 } }
}"#;

/// Rewrite a file and push its mtime forward so the change is visible
/// regardless of filesystem timestamp granularity
fn rewrite(path: &Path, contents: &str) {
    let before = fs::metadata(path).and_then(|m| m.modified()).unwrap_or_else(|_| SystemTime::now());
    fs::write(path, contents).unwrap();
    let file = fs::File::options().write(true).open(path).unwrap();
    file.set_modified(before + Duration::from_secs(30)).unwrap();
}

fn manager_for(dir: &Path, poll_every: u32) -> PluginManager {
    let mut config = PluginSystemConfig::default();
    config.plugin_dirs = vec![dir.to_path_buf()];
    config.hot_reload.poll_every = poll_every;
    let mut manager = PluginManager::new(config, ContentSinks::in_memory());
    manager.discover_configured(Vec::new());
    manager
}

#[test]
fn test_discovers_and_loads_manifests() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("festival.toml"), FESTIVAL).unwrap();
    fs::write(dir.path().join("ruins.json"), RUINS).unwrap();
    fs::write(dir.path().join("half_written.toml"), "[plugin\nid =").unwrap();

    let mut manager = manager_for(dir.path(), 1);
    assert_eq!(manager.discovery_errors().len(), 1);
    assert!(matches!(manager.discovery_errors()[0], PluginError::Manifest { .. }));

    let mut game = SimpleGame::default();
    let report = manager.load_all(&mut game);
    assert_eq!(report.loaded, vec!["harvest_festival", "old_ruins"]);

    let pie = manager.content().get(ContentKind::Item, "pumpkin_pie").unwrap();
    assert_eq!(pie["heal"], 25);
    assert!(manager.content().get(ContentKind::Location, "ruins").is_some());

    let outcome = manager.handle_input("/fest", &mut game).unwrap();
    assert!(outcome.success);
    assert_eq!(outcome.output, "Lanterns line the village square.");
    assert_eq!(outcome.owner.as_deref(), Some("harvest_festival"));
}

#[test]
fn test_changed_manifest_is_hot_reloaded() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("festival.toml");
    fs::write(&path, FESTIVAL).unwrap();

    let mut manager = manager_for(dir.path(), 1);
    let mut game = SimpleGame::default();
    manager.load_all(&mut game);
    assert!(manager.check_changes().is_empty());

    rewrite(&path, FESTIVAL_V2);
    let results = manager.reload_changed(&mut game);
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].0, "harvest_festival");
    assert!(results[0].1.is_ok());

    assert_eq!(manager.state("harvest_festival"), Some(PluginState::Enabled));
    assert_eq!(
        manager.descriptor("harvest_festival").map(|d| d.version.to_string()),
        Some("1.1.0".to_string())
    );
    let pie = manager.content().get(ContentKind::Item, "pumpkin_pie").unwrap();
    assert_eq!(pie["heal"], 40);
    assert!(manager.content().get(ContentKind::Npc, "scarecrow").is_some());

    // Alias dropped by the new manifest
    assert!(!manager.handle_input("/fest", &mut game).unwrap().success);
    let outcome = manager.handle_input("/festival", &mut game).unwrap();
    assert_eq!(outcome.output, "The scarecrow judges the pie contest.");

    assert!(manager.check_changes().is_empty());
}

#[test]
fn test_broken_rewrite_leaves_plugin_failed() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("festival.toml");
    fs::write(&path, FESTIVAL).unwrap();

    let mut manager = manager_for(dir.path(), 1);
    let mut game = SimpleGame::default();
    manager.load_all(&mut game);

    rewrite(&path, "[plugin]\nid = \"harvest_festival\"\nsupports_hot_reload = tru");
    let results = manager.reload_changed(&mut game);
    assert!(matches!(results[0].1, Err(PluginError::Reload { .. })));
    assert_eq!(manager.state("harvest_festival"), Some(PluginState::Failed));
    assert!(manager.content().get(ContentKind::Item, "pumpkin_pie").is_none());

    // Fixing the file brings it back on the next poll
    rewrite(&path, FESTIVAL);
    let results = manager.poll_hot_reload(&mut game);
    assert_eq!(results.len(), 1);
    assert!(results[0].1.is_ok());
    assert_eq!(manager.state("harvest_festival"), Some(PluginState::Enabled));
}

#[test]
fn test_renamed_plugin_id_is_refused() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("festival.toml");
    fs::write(&path, FESTIVAL).unwrap();

    let mut manager = manager_for(dir.path(), 1);
    let mut game = SimpleGame::default();
    manager.load_all(&mut game);

    rewrite(&path, &FESTIVAL.replace("harvest_festival", "winter_festival"));
    let results = manager.reload_changed(&mut game);
    match &results[0].1 {
        Err(PluginError::Reload { reason, .. }) => assert!(reason.contains("winter_festival")),
        other => panic!("unexpected result: {:?}", other),
    }
}

#[test]
fn test_static_manifest_is_not_reloaded() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("ruins.json");
    fs::write(&path, RUINS).unwrap();

    let mut manager = manager_for(dir.path(), 1);
    let mut game = SimpleGame::default();
    manager.load_all(&mut game);

    rewrite(&path, &RUINS.replace("Crumbling Ruins", "Rebuilt Ruins"));
    assert!(manager.check_changes().is_empty());
    let ruins = manager.content().get(ContentKind::Location, "ruins").unwrap();
    assert_eq!(ruins["name"], "Crumbling Ruins");
}

#[test]
fn test_poll_waits_for_interval() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("festival.toml");
    fs::write(&path, FESTIVAL).unwrap();

    let mut manager = manager_for(dir.path(), 3);
    let mut game = SimpleGame::default();
    manager.load_all(&mut game);

    rewrite(&path, FESTIVAL_V2);
    assert!(manager.poll_hot_reload(&mut game).is_empty());
    assert!(manager.poll_hot_reload(&mut game).is_empty());
    assert_eq!(manager.poll_hot_reload(&mut game).len(), 1);
}

#[test]
fn test_duplicate_ids_across_sources() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("a.toml"), FESTIVAL).unwrap();
    fs::write(dir.path().join("b.toml"), FESTIVAL).unwrap();

    let mut manager = PluginManager::default();
    let discovered = manager.discover([DiscoverySource::Directory(dir.path().to_path_buf())]);
    assert_eq!(discovered.len(), 1);
    assert!(matches!(manager.discovery_errors(), [PluginError::Descriptor { .. }]));
    assert!(manager.handle("harvest_festival").unwrap().origin().ends_with("a.toml"));
}

#[test]
fn test_reload_with_new_missing_dependency_fails() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("festival.toml");
    fs::write(&path, FESTIVAL).unwrap();

    let mut manager = manager_for(dir.path(), 1);
    let mut game = SimpleGame::default();
    manager.load_all(&mut game);

    rewrite(
        &path,
        &FESTIVAL.replace("supports_hot_reload = true", "supports_hot_reload = true\ndependencies = [\"missing_base\"]"),
    );
    let results = manager.reload_changed(&mut game);
    assert_eq!(results.len(), 1);
    assert!(matches!(
        &results[0].1,
        Err(PluginError::MissingDependency { dependency, .. }) if dependency == "missing_base"
    ));
    assert_eq!(manager.state("harvest_festival"), Some(PluginState::Failed));
    assert!(manager.content().get(ContentKind::Item, "pumpkin_pie").is_none());
    assert!(!manager.handle_input("/fest", &mut game).unwrap().success);
}

#[test]
fn test_reload_with_new_conflict_fails() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("festival.toml");
    fs::write(&path, FESTIVAL).unwrap();

    let mut manager = manager_for(dir.path(), 1);
    manager.discover([DiscoverySource::from(NativeUnit::from_builder(PluginBuilder::new("classic")))]);
    let mut game = SimpleGame::default();
    let report = manager.load_all(&mut game);
    assert_eq!(report.failure_count(), 0);

    rewrite(
        &path,
        &FESTIVAL.replace("supports_hot_reload = true", "supports_hot_reload = true\nconflicts = [\"classic\"]"),
    );
    let results = manager.reload_changed(&mut game);
    assert!(matches!(
        &results[0].1,
        Err(PluginError::Conflict { other, .. }) if other == "classic"
    ));
    assert_eq!(manager.state("harvest_festival"), Some(PluginState::Failed));
    assert_eq!(manager.state("classic"), Some(PluginState::Enabled));
}
