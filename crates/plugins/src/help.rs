//! Help plugin: command reference built from the live command catalog

use crate::setting_bool;
use questforge_core::commands::{CommandContext, CommandInfo};
use questforge_core::plugin::{priority, ConfigOption, DefinePlugin, Plugin, PluginConfig, PluginDescriptor};
use questforge_core::{CommandSpec, EventType, GameContext, HookSpec};
use anyhow::Result;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Categories in display order; anything else is listed under "other"
const CATEGORIES: &[(&str, &str)] = &[
    ("system", "SYSTEM COMMANDS"),
    ("plugins", "PLUGIN MANAGEMENT"),
    ("stats", "STATISTICS COMMANDS"),
    ("config", "CONFIGURATION COMMANDS"),
    ("debug", "DEBUG COMMANDS"),
    ("info", "INFORMATION COMMANDS"),
    ("other", "OTHER COMMANDS"),
];

/// Command help and plugin load notifications
pub struct HelpPlugin {
    descriptor: PluginDescriptor,
    /// Tell the player when plugins come and go
    announce: Arc<AtomicBool>,
}

impl DefinePlugin for HelpPlugin {
    fn describe() -> PluginDescriptor {
        PluginDescriptor::new("help_plugin", "Help Plugin")
            .with_version(semver::Version::new(2, 0, 0))
            .with_author("QuestForge Team")
            .with_description("Command reference for every plugin command and the runtime's own commands")
            .with_priority(priority::HIGH)
            .with_tag("help")
            .with_tag("utility")
            .with_config_option(
                "announce_plugins",
                ConfigOption::boolean(false).with_description("Notify the player when plugins load or unload"),
            )
    }

    fn create(descriptor: PluginDescriptor) -> Result<Self> {
        Ok(Self {
            descriptor,
            announce: Arc::new(AtomicBool::new(false)),
        })
    }
}

impl Plugin for HelpPlugin {
    fn descriptor(&self) -> &PluginDescriptor {
        &self.descriptor
    }

    fn apply_config(&mut self, config: &PluginConfig) -> Result<()> {
        self.announce.store(setting_bool(config, "announce_plugins", false), Ordering::Relaxed);
        Ok(())
    }

    fn on_enable(&mut self, _game: &mut dyn GameContext) -> Result<()> {
        tracing::info!("Help plugin enabled - use /help to see available commands");
        Ok(())
    }

    fn register_hooks(&self) -> Vec<HookSpec> {
        [(EventType::PluginLoad, "loaded"), (EventType::PluginUnload, "unloaded")]
            .into_iter()
            .map(|(event, verb)| {
                let announce = Arc::clone(&self.announce);
                HookSpec::new(event, move |ctx, payload| {
                    let plugin_id = payload.get("plugin_id").and_then(Value::as_str).unwrap_or("unknown");
                    tracing::debug!("Plugin {}: {}", verb, plugin_id);
                    if announce.load(Ordering::Relaxed) && plugin_id != ctx.plugin_id {
                        ctx.game.notify(format!("[Help] Plugin {}: {}", verb, plugin_id));
                    }
                    Ok(())
                })
            })
            .collect()
    }

    fn register_commands(&self) -> Vec<CommandSpec> {
        vec![CommandSpec::new(
            "help",
            "Show all available commands or detailed help for one command",
            help_command,
        )
        .with_usage("/help [command]")
        .with_category("system")
        .with_alias("commands")
        .with_alias("?")
        .with_args(0, Some(1))]
    }
}

fn help_command(ctx: &mut CommandContext<'_>, args: &[String]) -> Result<String> {
    match args.first() {
        Some(name) => Ok(command_help(ctx.catalog, name)),
        None => Ok(command_overview(ctx.catalog)),
    }
}

/// Find a catalog entry by name or alias
fn lookup<'a>(catalog: &'a [CommandInfo], name: &str) -> Option<&'a CommandInfo> {
    let name = name.trim_start_matches('/').to_lowercase();
    catalog
        .iter()
        .find(|info| info.name == name)
        .or_else(|| catalog.iter().find(|info| info.aliases.iter().any(|alias| *alias == name)))
}

fn command_help(catalog: &[CommandInfo], name: &str) -> String {
    let Some(info) = lookup(catalog, name) else {
        return format!("Unknown command: {}\nUse /help to see all commands.", name);
    };

    let mut out = format!("Command: /{}", info.name);
    let _ = write!(out, "\n  Description: {}", info.help);
    let _ = write!(out, "\n  Usage: {}", info.usage);
    let _ = write!(out, "\n  Category: {}", info.category);
    if !info.aliases.is_empty() {
        let _ = write!(out, "\n  Aliases: {}", info.aliases.join(", "));
    }
    let _ = write!(out, "\n  Provided by: {}", info.owner);
    out
}

fn command_overview(catalog: &[CommandInfo]) -> String {
    if catalog.is_empty() {
        return "No commands available.".to_string();
    }

    let mut grouped: BTreeMap<&str, Vec<&CommandInfo>> = BTreeMap::new();
    for info in catalog {
        let category = CATEGORIES
            .iter()
            .map(|(category, _)| *category)
            .find(|category| *category == info.category)
            .unwrap_or("other");
        grouped.entry(category).or_default().push(info);
    }

    let mut out = String::from("Available commands (use /help <command> for details):");
    for (category, title) in CATEGORIES {
        let Some(commands) = grouped.get(category) else {
            continue;
        };
        let _ = write!(out, "\n\n{}:", title);
        for info in commands {
            let _ = write!(out, "\n  /{:<16} {}", info.name, info.help);
        }
    }
    let _ = write!(out, "\n\nTotal commands available: {}", catalog.len());
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(name: &str, category: &str, aliases: &[&str]) -> CommandInfo {
        CommandInfo {
            name: name.to_string(),
            help: format!("{} help", name),
            usage: format!("/{}", name),
            category: category.to_string(),
            aliases: aliases.iter().map(|a| a.to_string()).collect(),
            owner: "tests".to_string(),
        }
    }

    #[test]
    fn test_overview_groups_by_category() {
        let catalog = vec![
            info("combat_stats", "stats", &[]),
            info("help", "system", &["?"]),
            info("festival", "harvest_festival", &[]),
        ];
        let text = command_overview(&catalog);

        let system = text.find("SYSTEM COMMANDS").unwrap();
        let stats = text.find("STATISTICS COMMANDS").unwrap();
        let other = text.find("OTHER COMMANDS").unwrap();
        assert!(system < stats && stats < other);
        assert!(text.contains("/festival"));
        assert!(text.ends_with("Total commands available: 3"));
    }

    #[test]
    fn test_command_help_resolves_aliases() {
        let catalog = vec![info("help", "system", &["commands", "?"])];
        let text = command_help(&catalog, "?");
        assert!(text.starts_with("Command: /help"));
        assert!(text.contains("Aliases: commands, ?"));

        assert!(command_help(&catalog, "/HELP").starts_with("Command: /help"));
        assert!(command_help(&catalog, "dance").starts_with("Unknown command: dance"));
    }
}
