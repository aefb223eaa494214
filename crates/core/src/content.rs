//! Content registration: items, NPCs, locations, recipes and enemies
//!
//! Plugins declare content as plain JSON objects. The [`ContentRegistry`]
//! forwards them into injected [`ContentSink`]s with last-write-wins
//! semantics and remembers which plugin wrote what, so that removing a
//! plugin puts back whatever an earlier plugin had registered under the
//! same id.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

/// Content entries keyed by id
pub type ContentMap = BTreeMap<String, Value>;

/// Kinds of content a plugin can contribute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    Item,
    Npc,
    Location,
    Recipe,
    Enemy,
}

impl ContentKind {
    pub const ALL: [ContentKind; 5] = [
        ContentKind::Item,
        ContentKind::Npc,
        ContentKind::Location,
        ContentKind::Recipe,
        ContentKind::Enemy,
    ];

    /// Plural name, as used for manifest sections
    pub fn plural(self) -> &'static str {
        match self {
            Self::Item => "items",
            Self::Npc => "npcs",
            Self::Location => "locations",
            Self::Recipe => "recipes",
            Self::Enemy => "enemies",
        }
    }
}

impl std::fmt::Display for ContentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.plural())
    }
}

/// Destination for one kind of content, owned by the game
pub trait ContentSink: Send {
    /// Insert or replace an entry
    fn register(&mut self, id: &str, data: Value);

    /// Remove an entry, returning whether it existed
    fn unregister(&mut self, id: &str) -> bool;

    fn get(&self, id: &str) -> Option<&Value>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Map-backed sink
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    entries: BTreeMap<String, Value>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ids(&self) -> impl Iterator<Item = &String> {
        self.entries.keys()
    }
}

impl ContentSink for MemorySink {
    fn register(&mut self, id: &str, data: Value) {
        self.entries.insert(id.to_string(), data);
    }

    fn unregister(&mut self, id: &str) -> bool {
        self.entries.remove(id).is_some()
    }

    fn get(&self, id: &str) -> Option<&Value> {
        self.entries.get(id)
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// One sink per content kind
pub struct ContentSinks {
    items: Box<dyn ContentSink>,
    npcs: Box<dyn ContentSink>,
    locations: Box<dyn ContentSink>,
    recipes: Box<dyn ContentSink>,
    enemies: Box<dyn ContentSink>,
}

impl ContentSinks {
    pub fn new(
        items: Box<dyn ContentSink>,
        npcs: Box<dyn ContentSink>,
        locations: Box<dyn ContentSink>,
        recipes: Box<dyn ContentSink>,
        enemies: Box<dyn ContentSink>,
    ) -> Self {
        Self {
            items,
            npcs,
            locations,
            recipes,
            enemies,
        }
    }

    /// Five empty [`MemorySink`]s
    pub fn in_memory() -> Self {
        Self::new(
            Box::new(MemorySink::new()),
            Box::new(MemorySink::new()),
            Box::new(MemorySink::new()),
            Box::new(MemorySink::new()),
            Box::new(MemorySink::new()),
        )
    }

    pub fn sink(&self, kind: ContentKind) -> &dyn ContentSink {
        match kind {
            ContentKind::Item => self.items.as_ref(),
            ContentKind::Npc => self.npcs.as_ref(),
            ContentKind::Location => self.locations.as_ref(),
            ContentKind::Recipe => self.recipes.as_ref(),
            ContentKind::Enemy => self.enemies.as_ref(),
        }
    }

    pub fn sink_mut(&mut self, kind: ContentKind) -> &mut dyn ContentSink {
        match kind {
            ContentKind::Item => self.items.as_mut(),
            ContentKind::Npc => self.npcs.as_mut(),
            ContentKind::Location => self.locations.as_mut(),
            ContentKind::Recipe => self.recipes.as_mut(),
            ContentKind::Enemy => self.enemies.as_mut(),
        }
    }
}

impl Default for ContentSinks {
    fn default() -> Self {
        Self::in_memory()
    }
}

/// Check that a content entry is an object with a name
pub fn validate_entry(data: &Value) -> Result<(), String> {
    let object = data
        .as_object()
        .ok_or_else(|| format!("expected an object, got {}", data))?;

    match object.get("name") {
        Some(Value::String(name)) if !name.is_empty() => Ok(()),
        Some(_) => Err("field 'name' must be a non-empty string".to_string()),
        None => Err("missing field 'name'".to_string()),
    }
}

struct Layer {
    owner: String,
    data: Value,
}

/// Registrations forwarded to the sinks, with per-id ownership layers
pub struct ContentRegistry {
    sinks: ContentSinks,
    /// Bottom to top; the top layer is what the sink currently holds
    layers: HashMap<(ContentKind, String), Vec<Layer>>,
}

impl ContentRegistry {
    pub fn new(sinks: ContentSinks) -> Self {
        Self {
            sinks,
            layers: HashMap::new(),
        }
    }

    /// Register one entry on behalf of `owner`
    pub fn register(&mut self, kind: ContentKind, owner: &str, id: &str, data: Value) -> Result<(), String> {
        validate_entry(&data)?;

        let layers = self.layers.entry((kind, id.to_string())).or_default();
        layers.retain(|layer| layer.owner != owner);

        if let Some(previous) = layers.last() {
            tracing::debug!(
                "Plugin {} overrides {} '{}' registered by {}",
                owner, kind, id, previous.owner
            );
        }

        layers.push(Layer {
            owner: owner.to_string(),
            data: data.clone(),
        });
        self.sinks.sink_mut(kind).register(id, data);
        Ok(())
    }

    /// Register every entry of a map, skipping invalid ones. Returns how many were accepted.
    pub fn register_batch(&mut self, kind: ContentKind, owner: &str, entries: ContentMap) -> usize {
        let mut accepted = 0;
        for (id, data) in entries {
            match self.register(kind, owner, &id, data) {
                Ok(()) => accepted += 1,
                Err(reason) => {
                    tracing::warn!("Skipping invalid {} '{}' from plugin {}: {}", kind, id, owner, reason);
                }
            }
        }
        accepted
    }

    /// Remove everything `owner` registered, restoring earlier layers
    pub fn withdraw(&mut self, owner: &str) -> usize {
        let keys: Vec<(ContentKind, String)> = self
            .layers
            .iter()
            .filter(|(_, layers)| layers.iter().any(|layer| layer.owner == owner))
            .map(|(key, _)| key.clone())
            .collect();

        for (kind, id) in &keys {
            let key = (*kind, id.clone());
            let Some(layers) = self.layers.get_mut(&key) else {
                continue;
            };

            let was_top = layers.last().map(|layer| layer.owner == owner).unwrap_or(false);
            layers.retain(|layer| layer.owner != owner);

            match layers.last() {
                Some(restored) if was_top => {
                    tracing::debug!("Restored {} '{}' from plugin {}", kind, id, restored.owner);
                    self.sinks.sink_mut(*kind).register(id, restored.data.clone());
                }
                Some(_) => {}
                None => {
                    self.sinks.sink_mut(*kind).unregister(id);
                    self.layers.remove(&key);
                }
            }
        }

        keys.len()
    }

    /// Plugin whose data the sink currently holds for this id
    pub fn owner_of(&self, kind: ContentKind, id: &str) -> Option<&str> {
        self.layers
            .get(&(kind, id.to_string()))
            .and_then(|layers| layers.last())
            .map(|layer| layer.owner.as_str())
    }

    pub fn get(&self, kind: ContentKind, id: &str) -> Option<&Value> {
        self.sinks.sink(kind).get(id)
    }

    /// Number of entries currently owned (top layer) by `owner`, per kind
    pub fn owned_by(&self, owner: &str) -> BTreeMap<ContentKind, usize> {
        let mut counts = BTreeMap::new();
        for ((kind, _), layers) in &self.layers {
            if layers.last().map(|layer| layer.owner == owner).unwrap_or(false) {
                *counts.entry(*kind).or_insert(0) += 1;
            }
        }
        counts
    }

    /// Entry count per kind as reported by the sinks
    pub fn stats(&self) -> BTreeMap<ContentKind, usize> {
        ContentKind::ALL
            .iter()
            .map(|kind| (*kind, self.sinks.sink(*kind).len()))
            .collect()
    }

    pub fn sinks(&self) -> &ContentSinks {
        &self.sinks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sword(value: i64) -> Value {
        json!({ "name": "Sword", "value": value })
    }

    #[test]
    fn test_last_write_wins() {
        let mut registry = ContentRegistry::new(ContentSinks::in_memory());
        registry.register(ContentKind::Item, "p1", "sword", sword(10)).unwrap();
        registry.register(ContentKind::Item, "p2", "sword", sword(20)).unwrap();

        assert_eq!(registry.get(ContentKind::Item, "sword"), Some(&sword(20)));
        assert_eq!(registry.owner_of(ContentKind::Item, "sword"), Some("p2"));
    }

    #[test]
    fn test_withdraw_restores_previous_layer() {
        let mut registry = ContentRegistry::new(ContentSinks::in_memory());
        registry.register(ContentKind::Item, "p1", "sword", sword(10)).unwrap();
        registry.register(ContentKind::Item, "p2", "sword", sword(20)).unwrap();
        registry.register(ContentKind::Item, "p2", "axe", json!({ "name": "Axe" })).unwrap();

        assert_eq!(registry.withdraw("p2"), 2);
        assert_eq!(registry.get(ContentKind::Item, "sword"), Some(&sword(10)));
        assert_eq!(registry.get(ContentKind::Item, "axe"), None);
        assert_eq!(registry.owner_of(ContentKind::Item, "sword"), Some("p1"));
    }

    #[test]
    fn test_withdraw_lower_layer_keeps_top() {
        let mut registry = ContentRegistry::new(ContentSinks::in_memory());
        registry.register(ContentKind::Item, "p1", "sword", sword(10)).unwrap();
        registry.register(ContentKind::Item, "p2", "sword", sword(20)).unwrap();

        registry.withdraw("p1");
        assert_eq!(registry.get(ContentKind::Item, "sword"), Some(&sword(20)));

        registry.withdraw("p2");
        assert_eq!(registry.get(ContentKind::Item, "sword"), None);
        assert_eq!(registry.stats()[&ContentKind::Item], 0);
    }

    #[test]
    fn test_invalid_entries_are_skipped() {
        let mut registry = ContentRegistry::new(ContentSinks::in_memory());
        let mut entries = ContentMap::new();
        entries.insert("ok".to_string(), json!({ "name": "Fine" }));
        entries.insert("nameless".to_string(), json!({ "value": 3 }));
        entries.insert("scalar".to_string(), json!(7));

        assert_eq!(registry.register_batch(ContentKind::Npc, "p1", entries), 1);
        assert_eq!(registry.sinks().sink(ContentKind::Npc).len(), 1);
    }

    #[test]
    fn test_owned_by_counts_top_layers() {
        let mut registry = ContentRegistry::new(ContentSinks::in_memory());
        registry.register(ContentKind::Item, "p1", "sword", sword(10)).unwrap();
        registry.register(ContentKind::Location, "p1", "cave", json!({ "name": "Cave" })).unwrap();
        registry.register(ContentKind::Item, "p2", "sword", sword(20)).unwrap();

        let owned = registry.owned_by("p1");
        assert_eq!(owned.get(&ContentKind::Item), None);
        assert_eq!(owned.get(&ContentKind::Location), Some(&1));
    }

    #[test]
    fn test_validate_entry() {
        assert!(validate_entry(&json!({ "name": "Potion" })).is_ok());
        assert!(validate_entry(&json!({ "name": "" })).is_err());
        assert!(validate_entry(&json!("Potion")).is_err());
    }
}
