//! Slash-command routing
//!
//! Names and aliases are case-insensitive and unique across plugins. The
//! first registration of a name wins; later ones are rejected with
//! [`PluginError::CommandConflict`].
//!
//! Middleware runs before every plugin command and can block it. Error
//! handlers are told about every handler that fails.

use crate::error::{panic_message, PluginError};
use crate::events::{Scratch, ScratchStore};
use crate::game::GameContext;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

/// Owner recorded for names reserved by the runtime itself
pub const CORE_OWNER: &str = "core";

/// What a command handler sees while it runs
pub struct CommandContext<'a> {
    pub game: &'a mut dyn GameContext,
    /// State private to the owning plugin
    pub scratch: &'a mut Scratch,
    pub plugin_id: &'a str,
    /// Every command currently routable, sorted by name
    pub catalog: &'a [CommandInfo],
}

pub type CommandHandler = Arc<dyn Fn(&mut CommandContext<'_>, &[String]) -> anyhow::Result<String> + Send + Sync>;

/// Runs before a command with its canonical name and arguments; `Ok(false)`
/// blocks it
pub type CommandMiddleware =
    Arc<dyn Fn(&mut dyn GameContext, &str, &[String]) -> anyhow::Result<bool> + Send + Sync>;

/// Told about a failed command: game, canonical name, arguments, message
pub type CommandErrorHandler = Arc<dyn Fn(&mut dyn GameContext, &str, &[String], &str) + Send + Sync>;

pub fn command_middleware<F>(f: F) -> CommandMiddleware
where
    F: Fn(&mut dyn GameContext, &str, &[String]) -> anyhow::Result<bool> + Send + Sync + 'static,
{
    Arc::new(f)
}

pub fn command_error_handler<F>(f: F) -> CommandErrorHandler
where
    F: Fn(&mut dyn GameContext, &str, &[String], &str) + Send + Sync + 'static,
{
    Arc::new(f)
}

/// A command a plugin asks to have registered
#[derive(Clone)]
pub struct CommandSpec {
    pub name: String,
    pub help: String,
    pub usage: String,
    pub category: String,
    pub aliases: Vec<String>,
    pub min_args: usize,
    pub max_args: Option<usize>,
    pub handler: CommandHandler,
}

impl CommandSpec {
    pub fn new<F>(name: impl Into<String>, help: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&mut CommandContext<'_>, &[String]) -> anyhow::Result<String> + Send + Sync + 'static,
    {
        let name = name.into().trim().to_lowercase();
        Self {
            usage: format!("/{}", name),
            name,
            help: help.into(),
            category: "general".to_string(),
            aliases: Vec::new(),
            min_args: 0,
            max_args: None,
            handler: Arc::new(handler),
        }
    }

    pub fn with_usage(mut self, usage: impl Into<String>) -> Self {
        self.usage = usage.into();
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.push(alias.into().trim().to_lowercase());
        self
    }

    /// Accepted argument count; `None` for no upper bound
    pub fn with_args(mut self, min: usize, max: Option<usize>) -> Self {
        self.min_args = min;
        self.max_args = max;
        self
    }

    /// Lowercase name and aliases, dropping duplicates and self-aliases
    fn normalized(mut self) -> Self {
        self.name = self.name.trim().to_lowercase();
        let mut seen = BTreeSet::new();
        let name = self.name.clone();
        self.aliases = std::mem::take(&mut self.aliases)
            .into_iter()
            .map(|alias| alias.trim().to_lowercase())
            .filter(|alias| !alias.is_empty() && *alias != name && seen.insert(alias.clone()))
            .collect();
        self
    }
}

impl std::fmt::Debug for CommandSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandSpec")
            .field("name", &self.name)
            .field("aliases", &self.aliases)
            .field("min_args", &self.min_args)
            .field("max_args", &self.max_args)
            .finish_non_exhaustive()
    }
}

/// Public description of a routable command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandInfo {
    pub name: String,
    pub help: String,
    pub usage: String,
    pub category: String,
    pub aliases: Vec<String>,
    pub owner: String,
}

/// Result of running a command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutcome {
    pub success: bool,
    pub output: String,
    /// Plugin that handled the command, `None` when nothing matched
    pub owner: Option<String>,
}

impl CommandOutcome {
    pub fn ok(output: impl Into<String>, owner: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            owner: Some(owner.into()),
        }
    }

    pub fn failed(output: impl Into<String>, owner: Option<String>) -> Self {
        Self {
            success: false,
            output: output.into(),
            owner,
        }
    }
}

/// Split `/name arg1 arg2` into a lowercase name and its arguments
pub fn parse_input(line: &str) -> Option<(String, Vec<String>)> {
    let rest = line.trim().strip_prefix('/')?;
    let mut parts = rest.split_whitespace();
    let name = parts.next()?.to_lowercase();
    Some((name, parts.map(str::to_string).collect()))
}

struct Registered {
    spec: CommandSpec,
    owner: String,
}

/// Name table for slash commands
#[derive(Default)]
pub struct CommandRouter {
    commands: BTreeMap<String, Registered>,
    /// Alias to canonical name
    aliases: HashMap<String, String>,
    /// Names handled outside the router, with a short description
    reserved: BTreeMap<String, String>,
    middleware: Vec<(String, CommandMiddleware)>,
    error_handlers: Vec<CommandErrorHandler>,
}

impl CommandRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve a name for the runtime's own commands
    pub fn reserve(&mut self, name: &str, help: &str) {
        self.reserved.insert(name.to_lowercase(), help.to_string());
    }

    pub fn is_reserved(&self, name: &str) -> bool {
        self.reserved.contains_key(&name.to_lowercase())
    }

    /// Current owner of a name or alias
    fn owner_of(&self, name: &str) -> Option<&str> {
        if self.reserved.contains_key(name) {
            return Some(CORE_OWNER);
        }
        self.resolve(name)
            .and_then(|canonical| self.commands.get(canonical))
            .map(|registered| registered.owner.as_str())
    }

    /// Canonical name for a name or alias
    pub fn resolve(&self, name: &str) -> Option<&str> {
        let name = name.to_lowercase();
        if let Some((canonical, _)) = self.commands.get_key_value(&name) {
            return Some(canonical.as_str());
        }
        self.aliases.get(&name).map(String::as_str)
    }

    pub fn register(&mut self, spec: CommandSpec, owner: &str) -> Result<(), PluginError> {
        let spec = spec.normalized();

        let mut names: BTreeSet<&str> = BTreeSet::new();
        names.insert(spec.name.as_str());
        names.extend(spec.aliases.iter().map(String::as_str));

        for name in &names {
            if let Some(existing) = self.owner_of(name) {
                tracing::warn!(
                    "Command '{}' from plugin {} conflicts with existing registration from {}",
                    name, owner, existing
                );
                return Err(PluginError::CommandConflict {
                    command: name.to_string(),
                    owner: existing.to_string(),
                    rejected: owner.to_string(),
                });
            }
        }

        for alias in &spec.aliases {
            self.aliases.insert(alias.clone(), spec.name.clone());
        }

        tracing::debug!("Registered command /{} for plugin {}", spec.name, owner);
        self.commands.insert(
            spec.name.clone(),
            Registered {
                spec,
                owner: owner.to_string(),
            },
        );
        Ok(())
    }

    /// Remove every command owned by `owner`
    pub fn unregister_all(&mut self, owner: &str) -> usize {
        let before = self.commands.len();
        self.commands.retain(|_, registered| registered.owner != owner);
        let commands = &self.commands;
        self.aliases.retain(|_, canonical| commands.contains_key(canonical));
        before - self.commands.len()
    }

    pub fn owned_by(&self, owner: &str) -> Vec<String> {
        self.commands
            .iter()
            .filter(|(_, registered)| registered.owner == owner)
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Add middleware that runs before every plugin command
    pub fn add_middleware(&mut self, name: &str, middleware: CommandMiddleware) {
        tracing::debug!("Added command middleware {}", name);
        self.middleware.push((name.to_string(), middleware));
    }

    /// Add a handler told about every failed plugin command
    pub fn add_error_handler(&mut self, handler: CommandErrorHandler) {
        self.error_handlers.push(handler);
    }

    /// Every command, runtime reserved names included, sorted by name
    pub fn catalog(&self) -> Vec<CommandInfo> {
        let mut catalog: Vec<CommandInfo> = self
            .commands
            .values()
            .map(|registered| CommandInfo {
                name: registered.spec.name.clone(),
                help: registered.spec.help.clone(),
                usage: registered.spec.usage.clone(),
                category: registered.spec.category.clone(),
                aliases: registered.spec.aliases.clone(),
                owner: registered.owner.clone(),
            })
            .chain(self.reserved.iter().map(|(name, help)| CommandInfo {
                name: name.clone(),
                help: help.clone(),
                usage: format!("/{}", name),
                category: "plugins".to_string(),
                aliases: Vec::new(),
                owner: CORE_OWNER.to_string(),
            }))
            .collect();
        catalog.sort_by(|a, b| a.name.cmp(&b.name));
        catalog
    }

    /// Run a plugin command
    pub fn dispatch(
        &self,
        name: &str,
        args: &[String],
        game: &mut dyn GameContext,
        scratch: &mut ScratchStore,
    ) -> CommandOutcome {
        let Some(registered) = self.resolve(name).and_then(|canonical| self.commands.get(canonical)) else {
            return CommandOutcome::failed(format!("Unknown command: {}", name), None);
        };

        let spec = &registered.spec;
        let owner = registered.owner.as_str();

        if args.len() < spec.min_args {
            return CommandOutcome::failed(
                format!("Too few arguments. Usage: {}", spec.usage),
                Some(owner.to_string()),
            );
        }
        if let Some(max) = spec.max_args {
            if args.len() > max {
                return CommandOutcome::failed(
                    format!("Too many arguments. Usage: {}", spec.usage),
                    Some(owner.to_string()),
                );
            }
        }

        for (middleware_name, middleware) in &self.middleware {
            match catch_unwind(AssertUnwindSafe(|| middleware(&mut *game, spec.name.as_str(), args))) {
                Ok(Ok(true)) => {}
                Ok(Ok(false)) => {
                    tracing::info!("Command /{} blocked by middleware {}", spec.name, middleware_name);
                    return CommandOutcome::failed("Command blocked by middleware", Some(owner.to_string()));
                }
                Ok(Err(e)) => tracing::error!("Command middleware {} failed: {:#}", middleware_name, e),
                Err(panic) => tracing::error!("Command middleware {} {}", middleware_name, panic_message(panic.as_ref())),
            }
        }

        let catalog = self.catalog();
        let mut ctx = CommandContext {
            game: &mut *game,
            scratch: scratch.for_plugin(owner),
            plugin_id: owner,
            catalog: &catalog,
        };
        let handler = Arc::clone(&spec.handler);

        let message = match catch_unwind(AssertUnwindSafe(|| handler(&mut ctx, args))) {
            Ok(Ok(output)) => return CommandOutcome::ok(output, owner),
            Ok(Err(e)) => {
                tracing::error!("Command /{} from plugin {} failed: {:#}", spec.name, owner, e);
                e.to_string()
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                tracing::error!("Command /{} from plugin {} {}", spec.name, owner, message);
                message
            }
        };

        for error_handler in &self.error_handlers {
            if catch_unwind(AssertUnwindSafe(|| error_handler(&mut *game, spec.name.as_str(), args, &message))).is_err() {
                tracing::warn!("Command error handler panicked while handling /{}", spec.name);
            }
        }
        CommandOutcome::failed(format!("Command error: {}", message), Some(owner.to_string()))
    }

    /// Help line for one command
    pub fn help_for(&self, name: &str) -> Option<String> {
        let canonical = self.resolve(name)?;
        let spec = &self.commands.get(canonical)?.spec;

        let mut help = format!("{}\n  {}", spec.usage, spec.help);
        if !spec.aliases.is_empty() {
            help.push_str(&format!("\n  Aliases: {}", spec.aliases.join(", ")));
        }
        Some(help)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::SimpleGame;

    fn echo(name: &str) -> CommandSpec {
        CommandSpec::new(name, "Echo arguments", |_ctx, args| Ok(args.join(" ")))
    }

    fn run(router: &CommandRouter, line: &str) -> CommandOutcome {
        let (name, args) = parse_input(line).unwrap();
        let mut game = SimpleGame::default();
        let mut scratch = ScratchStore::new();
        router.dispatch(&name, &args, &mut game, &mut scratch)
    }

    #[test]
    fn test_first_registration_wins() {
        let mut router = CommandRouter::new();
        router
            .register(CommandSpec::new("help", "first", |_ctx, _args| Ok("first".to_string())), "a")
            .unwrap();
        let err = router
            .register(CommandSpec::new("HELP", "second", |_ctx, _args| Ok("second".to_string())), "b")
            .unwrap_err();

        assert!(matches!(
            err,
            PluginError::CommandConflict { ref command, ref owner, ref rejected }
                if command == "help" && owner == "a" && rejected == "b"
        ));
        let outcome = run(&router, "/help");
        assert_eq!(outcome.output, "first");
        assert_eq!(outcome.owner.as_deref(), Some("a"));
    }

    #[test]
    fn test_alias_conflicts_and_resolution() {
        let mut router = CommandRouter::new();
        router.register(echo("say").with_alias("s"), "a").unwrap();
        assert!(router.register(echo("shout").with_alias("S"), "b").is_err());
        assert!(router.register(echo("s"), "b").is_err());

        assert_eq!(router.resolve("S"), Some("say"));
        assert_eq!(run(&router, "/s hi there").output, "hi there");
    }

    #[test]
    fn test_reserved_names_are_rejected() {
        let mut router = CommandRouter::new();
        router.reserve("reload", "Reload a plugin");
        let err = router.register(echo("reload"), "a").unwrap_err();
        assert!(matches!(err, PluginError::CommandConflict { owner, .. } if owner == CORE_OWNER));
    }

    #[test]
    fn test_unknown_command() {
        let router = CommandRouter::new();
        let outcome = run(&router, "/dance");
        assert!(!outcome.success);
        assert_eq!(outcome.output, "Unknown command: dance");
        assert_eq!(outcome.owner, None);
    }

    #[test]
    fn test_argument_bounds() {
        let mut router = CommandRouter::new();
        router
            .register(echo("give").with_usage("/give <item> [count]").with_args(1, Some(2)), "a")
            .unwrap();

        let outcome = run(&router, "/give");
        assert!(!outcome.success);
        assert_eq!(outcome.output, "Too few arguments. Usage: /give <item> [count]");

        assert!(!run(&router, "/give a b c").success);
        assert!(run(&router, "/give potion 2").success);
    }

    #[test]
    fn test_handler_failures_are_contained() {
        let mut router = CommandRouter::new();
        router
            .register(CommandSpec::new("fail", "", |_ctx, _args| Err(anyhow::anyhow!("no mana"))), "a")
            .unwrap();
        router
            .register(CommandSpec::new("crash", "", |_ctx, _args| panic!("boom")), "b")
            .unwrap();

        let outcome = run(&router, "/fail");
        assert!(!outcome.success);
        assert_eq!(outcome.output, "Command error: no mana");

        let outcome = run(&router, "/crash");
        assert!(!outcome.success);
        assert_eq!(outcome.owner.as_deref(), Some("b"));
    }

    #[test]
    fn test_unregister_all_drops_aliases() {
        let mut router = CommandRouter::new();
        router.register(echo("say").with_alias("s"), "a").unwrap();
        router.register(echo("look"), "b").unwrap();

        assert_eq!(router.unregister_all("a"), 1);
        assert_eq!(router.resolve("s"), None);
        assert_eq!(router.len(), 1);
        assert!(router.register(echo("s"), "c").is_ok());
    }

    #[test]
    fn test_catalog_includes_reserved() {
        let mut router = CommandRouter::new();
        router.reserve("plugins", "List plugins");
        router.register(echo("look"), "b").unwrap();

        let names: Vec<String> = router.catalog().into_iter().map(|info| info.name).collect();
        assert_eq!(names, vec!["look", "plugins"]);
    }

    #[test]
    fn test_hand_built_spec_is_normalized() {
        let mut router = CommandRouter::new();
        let mut spec = echo("placeholder");
        spec.name = " Shout ".to_string();
        spec.aliases = vec!["YELL".to_string(), "yell".to_string(), "shout".to_string()];
        router.register(spec, "a").unwrap();

        assert_eq!(router.resolve("SHOUT"), Some("shout"));
        assert_eq!(router.resolve("Yell"), Some("shout"));
        assert_eq!(router.catalog()[0].aliases, vec!["yell"]);
        assert_eq!(run(&router, "/yell hey").output, "hey");
    }

    #[test]
    fn test_middleware_can_block() {
        let mut router = CommandRouter::new();
        router.register(echo("say"), "a").unwrap();
        router.register(echo("look"), "b").unwrap();
        router.add_middleware("broken", command_middleware(|_game, _name, _args| anyhow::bail!("flaky")));
        router.add_middleware(
            "silence",
            command_middleware(|game, name, _args| {
                game.add_counter("checked", 1);
                Ok(name != "say")
            }),
        );

        let outcome = run(&router, "/say hello");
        assert!(!outcome.success);
        assert_eq!(outcome.output, "Command blocked by middleware");
        assert_eq!(outcome.owner.as_deref(), Some("a"));

        assert_eq!(run(&router, "/look around").output, "around");
    }

    #[test]
    fn test_error_handlers_see_failures() {
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let mut router = CommandRouter::new();
        router
            .register(CommandSpec::new("cast", "", |_ctx, _args| Err(anyhow::anyhow!("no mana"))), "a")
            .unwrap();
        router.register(echo("say"), "a").unwrap();
        router.add_error_handler(command_error_handler(|_game, _name, _args, _message| panic!("noisy")));
        let sink = Arc::clone(&seen);
        router.add_error_handler(command_error_handler(move |_game, name, args, message| {
            sink.lock().push(format!("{} {} {}", name, args.join(","), message));
        }));

        let outcome = run(&router, "/cast fireball");
        assert_eq!(outcome.output, "Command error: no mana");
        run(&router, "/say fine");
        assert_eq!(*seen.lock(), vec!["cast fireball no mana"]);
    }

    #[test]
    fn test_parse_input() {
        assert_eq!(
            parse_input("  /Give potion 2 "),
            Some(("give".to_string(), vec!["potion".to_string(), "2".to_string()]))
        );
        assert_eq!(parse_input("go north"), None);
        assert_eq!(parse_input("/"), None);
    }
}
