//! Extended NPC roster: craftsmen, trainers, merchants and quest givers
//! placed around the world
//!
//! Friendship with each NPC grows on every interaction and is kept in the
//! plugin's scratch map, so it survives hot reloads but not an unload.

use crate::payload_str;
use anyhow::Result;
use questforge_core::plugin::{priority, DefinePlugin, Plugin, PluginDescriptor};
use questforge_core::{CommandSpec, ContentMap, EventType, GameContext, HookContext, HookSpec, Payload, Scratch};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fmt::Write as _;

/// Friendship gained per interaction
const FRIENDSHIP_STEP: i64 = 5;

/// Friendship needed for the medium and high greetings
const MEDIUM_FRIENDSHIP: i64 = 50;
const HIGH_FRIENDSHIP: i64 = 100;

struct NpcEntry {
    id: &'static str,
    name: &'static str,
    npc_type: &'static str,
    location: &'static str,
    requires_level: Option<i64>,
    /// Low, medium and high friendship greetings
    greetings: [&'static str; 3],
}

const ROSTER: &[NpcEntry] = &[
    NpcEntry {
        id: "master_blacksmith_bjorn",
        name: "Master Blacksmith Bjorn",
        npc_type: "blacksmith",
        location: "capital_city",
        requires_level: None,
        greetings: [
            "State your business. I've got work to do.",
            "Ah, back again? Let me see what you need.",
            "My friend! Come, let me show you my latest work!",
        ],
    },
    NpcEntry {
        id: "grand_magister_elara",
        name: "Grand Magister Elara",
        npc_type: "trainer",
        location: "capital_city",
        requires_level: None,
        greetings: [
            "The arcane is not for the impatient.",
            "Your aura has grown stronger since we last met.",
            "Welcome, colleague. The library is yours.",
        ],
    },
    NpcEntry {
        id: "arena_master_ragnor",
        name: "Arena Master Ragnor",
        npc_type: "trainer",
        location: "capital_city",
        requires_level: Some(5),
        greetings: [
            "Another hopeful. Let's see if you last a round.",
            "The crowd remembers your name.",
            "Champion! The arena roars for you!",
        ],
    },
    NpcEntry {
        id: "old_sage_merlin",
        name: "Old Sage Merlin",
        npc_type: "quest_giver",
        location: "start_village",
        requires_level: None,
        greetings: [
            "Hmm? Oh, a young adventurer.",
            "The stars spoke of your return.",
            "Sit, my friend. There is much I must tell you.",
        ],
    },
    NpcEntry {
        id: "huntress_lyra",
        name: "Huntress Lyra",
        npc_type: "trainer",
        location: "start_village",
        requires_level: None,
        greetings: [
            "Quiet. You'll scare the game.",
            "Your footsteps are lighter these days.",
            "Ready for a real hunt, partner?",
        ],
    },
    NpcEntry {
        id: "gem_trader_sapphire",
        name: "Sapphire the Gem Trader",
        npc_type: "merchant",
        location: "mining_town",
        requires_level: None,
        greetings: [
            "Looking to buy? Don't touch what you can't afford.",
            "I set aside a few stones you might like.",
            "For you, my finest gems at a friend's price.",
        ],
    },
    NpcEntry {
        id: "foreman_gimli",
        name: "Foreman Gimli",
        npc_type: "quest_giver",
        location: "mining_town",
        requires_level: Some(5),
        greetings: [
            "Mind the tunnels, outsider.",
            "The crew speaks well of you.",
            "Honorary miner! The deep halls are open to you.",
        ],
    },
    NpcEntry {
        id: "wandering_merchant_zephyr",
        name: "Zephyr the Wandering Merchant",
        npc_type: "merchant",
        location: "crossroads",
        requires_level: None,
        greetings: [
            "Wares from every corner of the map!",
            "Ah, my favourite customer on this road.",
            "Old friend! I saved something special for you.",
        ],
    },
    NpcEntry {
        id: "madame_mystique",
        name: "Madame Mystique",
        npc_type: "mysterious",
        location: "crossroads",
        requires_level: Some(10),
        greetings: [
            "The cards foretold a stranger.",
            "Your fate grows more interesting.",
            "The veil parts for you, dear one.",
        ],
    },
    NpcEntry {
        id: "dragon_scholar_ignis",
        name: "Ignis the Dragon Scholar",
        npc_type: "quest_giver",
        location: "dragon_peak",
        requires_level: Some(15),
        greetings: [
            "Careful, the scales here are still warm.",
            "You've survived the peak again. Impressive.",
            "Together we will finish my treatise on dragons!",
        ],
    },
];

impl NpcEntry {
    fn greeting(&self, friendship: i64) -> &'static str {
        match friendship {
            f if f >= HIGH_FRIENDSHIP => self.greetings[2],
            f if f >= MEDIUM_FRIENDSHIP => self.greetings[1],
            _ => self.greetings[0],
        }
    }

    fn to_content(&self) -> Value {
        let mut npc = json!({
            "name": self.name,
            "npc_type": self.npc_type,
            "location": self.location,
            "dialogue": {
                "greeting": {
                    "low_friendship": self.greetings[0],
                    "medium_friendship": self.greetings[1],
                    "high_friendship": self.greetings[2],
                }
            }
        });
        if let (Some(level), Some(fields)) = (self.requires_level, npc.as_object_mut()) {
            fields.insert("requires_level".to_string(), json!(level));
        }
        npc
    }
}

fn find(id: &str) -> Option<&'static NpcEntry> {
    ROSTER.iter().find(|npc| npc.id == id)
}

fn friendship(scratch: &Scratch, npc_id: &str) -> i64 {
    scratch
        .get("friendship")
        .and_then(|levels| levels.get(npc_id))
        .and_then(Value::as_i64)
        .unwrap_or_default()
}

/// Extended NPC roster
pub struct ExtendedNpcsPlugin {
    descriptor: PluginDescriptor,
}

impl DefinePlugin for ExtendedNpcsPlugin {
    fn describe() -> PluginDescriptor {
        PluginDescriptor::new("extended_npcs", "Extended NPCs")
            .with_version(semver::Version::new(2, 0, 0))
            .with_author("QuestForge Team")
            .with_description("New NPCs across the world: master craftsmen, trainers, merchants and quest givers")
            .with_soft_dependency("extended_world")
            .with_provides("extended_npcs")
            // Loads after the locations it populates
            .with_priority(priority::NORMAL + 5)
            .with_tag("npcs")
            .with_tag("characters")
            .hot_reloadable()
    }

    fn create(descriptor: PluginDescriptor) -> Result<Self> {
        Ok(Self { descriptor })
    }
}

impl Plugin for ExtendedNpcsPlugin {
    fn descriptor(&self) -> &PluginDescriptor {
        &self.descriptor
    }

    fn on_load(&mut self, _game: &mut dyn GameContext) -> Result<()> {
        tracing::info!("Loading extended NPC roster ({} NPCs)", ROSTER.len());
        Ok(())
    }

    fn register_hooks(&self) -> Vec<HookSpec> {
        vec![
            HookSpec::new(EventType::NpcInteract, on_npc_interact),
            HookSpec::new(EventType::LocationEnter, on_location_enter).with_priority(priority::LOW),
            HookSpec::new(EventType::PlayerLevelUp, |ctx, payload| {
                let level = payload
                    .get("level")
                    .and_then(Value::as_i64)
                    .unwrap_or_else(|| i64::from(ctx.game.player().level));
                for npc in ROSTER.iter().filter(|npc| npc.requires_level == Some(level)) {
                    ctx.game
                        .notify(format!("A new acquaintance awaits: {} at {}!", npc.name, place_name(npc.location)));
                }
                Ok(())
            }),
        ]
    }

    fn register_commands(&self) -> Vec<CommandSpec> {
        vec![
            CommandSpec::new("npcs", "List extended NPCs", |_ctx, _args| Ok(npc_list()))
                .with_category("info")
                .with_args(0, Some(0)),
            CommandSpec::new("friendship", "Check friendship levels", |ctx, args| {
                Ok(friendship_report(ctx.scratch, args.first().map(String::as_str)))
            })
            .with_usage("/friendship [npc_id]")
            .with_category("info")
            .with_args(0, Some(1)),
        ]
    }

    fn register_npcs(&self) -> ContentMap {
        ROSTER
            .iter()
            .map(|npc| (npc.id.to_string(), npc.to_content()))
            .collect()
    }
}

fn on_npc_interact(ctx: &mut HookContext<'_>, payload: &Payload) -> Result<()> {
    let Some(npc) = payload_str(payload, "npc_id").and_then(find) else {
        return Ok(());
    };

    let level = friendship(ctx.scratch, npc.id);
    ctx.game.notify(format!("{}: \"{}\"", npc.name, npc.greeting(level)));

    let levels = ctx.scratch.entry("friendship".to_string()).or_insert_with(|| json!({}));
    if let Some(levels) = levels.as_object_mut() {
        levels.insert(npc.id.to_string(), json!(level + FRIENDSHIP_STEP));
    }
    Ok(())
}

fn on_location_enter(ctx: &mut HookContext<'_>, payload: &Payload) -> Result<()> {
    let location = payload_str(payload, "location_id")
        .map(str::to_string)
        .unwrap_or_else(|| ctx.game.world().location.clone());

    let here: Vec<&str> = ROSTER
        .iter()
        .filter(|npc| npc.location == location)
        .map(|npc| npc.name)
        .collect();
    if !here.is_empty() {
        ctx.game.notify(format!("NPCs available here: {}", here.join(", ")));
    }
    Ok(())
}

/// "capital_city" -> "Capital City"
fn place_name(location: &str) -> String {
    location
        .split('_')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn npc_list() -> String {
    let mut by_location: BTreeMap<&str, Vec<&NpcEntry>> = BTreeMap::new();
    for npc in ROSTER {
        by_location.entry(npc.location).or_default().push(npc);
    }

    let mut out = String::from("Extended NPCs:");
    for (location, npcs) in &by_location {
        let _ = write!(out, "\n\n{}:", place_name(location));
        for npc in npcs {
            let _ = write!(out, "\n  - {} ({})", npc.name, npc.npc_type);
        }
    }
    out
}

fn friendship_report(scratch: &Scratch, npc_id: Option<&str>) -> String {
    if let Some(id) = npc_id {
        return match find(id) {
            Some(npc) => format!("{}: {} friendship", npc.name, friendship(scratch, npc.id)),
            None => format!("Unknown NPC: {}", id),
        };
    }

    let known: Vec<String> = ROSTER
        .iter()
        .filter_map(|npc| {
            let level = friendship(scratch, npc.id);
            (level > 0).then(|| format!("  {}: {}", npc.name, level))
        })
        .collect();
    if known.is_empty() {
        return "You haven't befriended anyone yet.".to_string();
    }
    format!("Friendship levels:\n{}", known.join("\n"))
}
