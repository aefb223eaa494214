//! Game services the plugin runtime consumes
//!
//! The runtime only needs a narrow view of the running game: the player,
//! the world clock and weather, a set of named counters and a way to show
//! text to the player. [`SimpleGame`] is an in-memory implementation used by
//! the shell and by tests.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Game state visible to plugins
pub trait GameContext {
    fn player(&self) -> &Player;

    fn player_mut(&mut self) -> &mut Player;

    fn world(&self) -> &WorldState;

    fn world_mut(&mut self) -> &mut WorldState;

    /// Read a named counter, zero when unset
    fn counter(&self, key: &str) -> i64;

    fn set_counter(&mut self, key: &str, value: i64);

    /// Add to a named counter and return the new value
    fn add_counter(&mut self, key: &str, delta: i64) -> i64 {
        let value = self.counter(key) + delta;
        self.set_counter(key, value);
        value
    }

    /// Queue a message for the player
    fn notify(&mut self, message: String);
}

/// The player character
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Player {
    pub name: String,
    pub level: u32,
    pub hp: i32,
    pub max_hp: i32,
    pub gold: i64,
    pub inventory: Vec<String>,
}

impl Player {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            level: 1,
            hp: 100,
            max_hp: 100,
            gold: 0,
            inventory: Vec::new(),
        }
    }

    pub fn heal(&mut self, amount: i32) -> i32 {
        let before = self.hp;
        self.hp = (self.hp + amount).min(self.max_hp);
        self.hp - before
    }
}

/// Current weather
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Weather {
    Clear,
    Rain,
    Storm,
    Fog,
    Snow,
}

impl std::fmt::Display for Weather {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Clear => write!(f, "clear"),
            Self::Rain => write!(f, "rain"),
            Self::Storm => write!(f, "storm"),
            Self::Fog => write!(f, "fog"),
            Self::Snow => write!(f, "snow"),
        }
    }
}

/// Location, clock and weather
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldState {
    pub location: String,
    pub day: u32,
    /// Hour of day, 0..24
    pub hour: u8,
    pub weather: Weather,
}

impl WorldState {
    pub fn is_night(&self) -> bool {
        self.hour >= 20 || self.hour < 6
    }
}

impl Default for WorldState {
    fn default() -> Self {
        Self {
            location: "village".to_string(),
            day: 1,
            hour: 8,
            weather: Weather::Clear,
        }
    }
}

/// In-memory game used by the shell and tests
#[derive(Debug, Clone)]
pub struct SimpleGame {
    pub player: Player,
    pub world: WorldState,
    counters: BTreeMap<String, i64>,
    messages: Vec<String>,
}

impl SimpleGame {
    pub fn new(player_name: impl Into<String>) -> Self {
        Self {
            player: Player::new(player_name),
            world: WorldState::default(),
            counters: BTreeMap::new(),
            messages: Vec::new(),
        }
    }

    /// Take all queued player messages
    pub fn drain_messages(&mut self) -> Vec<String> {
        std::mem::take(&mut self.messages)
    }

    pub fn messages(&self) -> &[String] {
        &self.messages
    }
}

impl Default for SimpleGame {
    fn default() -> Self {
        Self::new("Hero")
    }
}

impl GameContext for SimpleGame {
    fn player(&self) -> &Player {
        &self.player
    }

    fn player_mut(&mut self) -> &mut Player {
        &mut self.player
    }

    fn world(&self) -> &WorldState {
        &self.world
    }

    fn world_mut(&mut self) -> &mut WorldState {
        &mut self.world
    }

    fn counter(&self, key: &str) -> i64 {
        self.counters.get(key).copied().unwrap_or(0)
    }

    fn set_counter(&mut self, key: &str, value: i64) {
        self.counters.insert(key.to_string(), value);
    }

    fn notify(&mut self, message: String) {
        tracing::debug!("Notify player: {}", message);
        self.messages.push(message);
    }
}
