//! Plugin units: where plugin instances come from
//!
//! A unit knows a plugin's descriptor ahead of instantiation and can create
//! fresh instances on demand, which is what load and hot reload need.
//! [`NativeUnit`] wraps compiled-in factories, [`ManifestUnit`] a data
//! manifest on disk that is re-read on every instantiation.

use super::{BuiltPlugin, DataPlugin, DefinePlugin, Manifest, Plugin, PluginBuilder, PluginDescriptor};
use crate::config::ConfigFormat;
use crate::error::PluginError;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

type Factory = Arc<dyn Fn(PluginDescriptor) -> anyhow::Result<Box<dyn Plugin>> + Send + Sync>;

/// A discoverable plugin source
pub trait PluginUnit: Send + Sync {
    /// Human readable origin, for logs and listings
    fn origin(&self) -> String;

    /// Descriptor as known at discovery time
    fn descriptor(&self) -> &PluginDescriptor;

    /// Create a fresh plugin instance
    fn instantiate(&self) -> anyhow::Result<Box<dyn Plugin>>;

    /// Modification time of the backing source, if it has one
    fn last_modified(&self) -> Option<SystemTime> {
        None
    }
}

/// A compiled-in plugin
pub struct NativeUnit {
    descriptor: PluginDescriptor,
    factory: Factory,
}

impl NativeUnit {
    pub fn new<F>(descriptor: PluginDescriptor, factory: F) -> Self
    where
        F: Fn(PluginDescriptor) -> anyhow::Result<Box<dyn Plugin>> + Send + Sync + 'static,
    {
        Self {
            descriptor,
            factory: Arc::new(factory),
        }
    }

    /// Unit for a plugin type
    pub fn of<P: DefinePlugin>() -> Self {
        Self::new(P::describe(), |descriptor| Ok(Box::new(P::create(descriptor)?) as Box<dyn Plugin>))
    }

    /// Unit building a fresh [`BuiltPlugin`] from the builder each time
    pub fn from_builder(builder: PluginBuilder) -> Self {
        let descriptor = builder.descriptor().clone();
        Self::new(descriptor, move |_| {
            let plugin: BuiltPlugin = builder.clone().build();
            Ok(Box::new(plugin) as Box<dyn Plugin>)
        })
    }

    pub fn into_shared(self) -> Arc<dyn PluginUnit> {
        Arc::new(self)
    }
}

impl PluginUnit for NativeUnit {
    fn origin(&self) -> String {
        "native".to_string()
    }

    fn descriptor(&self) -> &PluginDescriptor {
        &self.descriptor
    }

    fn instantiate(&self) -> anyhow::Result<Box<dyn Plugin>> {
        (self.factory)(self.descriptor.clone())
    }
}

/// A data plugin manifest on disk
pub struct ManifestUnit {
    path: PathBuf,
    descriptor: PluginDescriptor,
}

impl ManifestUnit {
    /// Read and parse the manifest at `path`
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, PluginError> {
        let path = path.into();
        let manifest = Manifest::load(&path)?;
        Ok(Self {
            path,
            descriptor: manifest.plugin,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PluginUnit for ManifestUnit {
    fn origin(&self) -> String {
        self.path.display().to_string()
    }

    fn descriptor(&self) -> &PluginDescriptor {
        &self.descriptor
    }

    fn instantiate(&self) -> anyhow::Result<Box<dyn Plugin>> {
        let manifest = Manifest::load(&self.path)?;
        tracing::debug!(
            "Read manifest {} ({} content entries)",
            self.path.display(),
            manifest.content_count()
        );
        Ok(Box::new(DataPlugin::new(manifest)))
    }

    fn last_modified(&self) -> Option<SystemTime> {
        std::fs::metadata(&self.path).and_then(|meta| meta.modified()).ok()
    }
}

/// Where to look for plugins
#[derive(Clone)]
pub enum DiscoverySource {
    /// Scan a directory for `*.toml` and `*.json` manifests
    Directory(PathBuf),
    /// An explicitly registered unit
    Unit(Arc<dyn PluginUnit>),
}

impl DiscoverySource {
    pub fn unit(unit: impl PluginUnit + 'static) -> Self {
        Self::Unit(Arc::new(unit))
    }
}

impl From<NativeUnit> for DiscoverySource {
    fn from(unit: NativeUnit) -> Self {
        Self::unit(unit)
    }
}

/// Scan a directory, non-recursively and sorted by file name
///
/// Manifests that fail to parse are returned as errors next to the units
/// that did parse.
pub fn scan_directory(dir: &Path) -> (Vec<Arc<dyn PluginUnit>>, Vec<PluginError>) {
    let mut units: Vec<Arc<dyn PluginUnit>> = Vec::new();
    let mut errors = Vec::new();

    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!("Cannot scan plugin directory {}: {}", dir.display(), e);
            errors.push(PluginError::Io(format!("{}: {}", dir.display(), e)));
            return (units, errors);
        }
    };

    let mut paths: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|entry| entry.path()))
        .filter(|path| path.is_file() && ConfigFormat::is_supported(path))
        .collect();
    paths.sort();

    for path in paths {
        match ManifestUnit::open(&path) {
            Ok(unit) => {
                tracing::debug!("Discovered data plugin {} at {}", unit.descriptor().id, path.display());
                units.push(Arc::new(unit));
            }
            Err(e) => {
                tracing::warn!("Skipping malformed plugin manifest {}: {}", path.display(), e);
                errors.push(e);
            }
        }
    }

    (units, errors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_native_unit_from_builder_creates_fresh_instances() {
        let unit = NativeUnit::from_builder(PluginBuilder::new("fresh").name("Fresh"));
        assert_eq!(unit.descriptor().name, "Fresh");
        assert_eq!(unit.origin(), "native");

        let first = unit.instantiate().unwrap();
        let second = unit.instantiate().unwrap();
        assert_eq!(first.descriptor(), second.descriptor());
        assert!(unit.last_modified().is_none());
    }

    #[test]
    fn test_scan_directory() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("b_items.toml"),
            "[plugin]\nid = \"b_items\"\n\n[items.rope]\nname = \"Rope\"\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("a_bandits.json"),
            r#"{ "plugin": { "id": "a_bandits" } }"#,
        )
        .unwrap();
        fs::write(dir.path().join("broken.toml"), "[plugin\nid = ").unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let (units, errors) = scan_directory(dir.path());
        let ids: Vec<&str> = units.iter().map(|u| u.descriptor().id.as_str()).collect();
        assert_eq!(ids, vec!["a_bandits", "b_items"]);
        assert_eq!(errors.len(), 1);
        assert!(matches!(&errors[0], PluginError::Manifest { path, .. } if path.contains("broken.toml")));
    }

    #[test]
    fn test_manifest_unit_rereads_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("lore.toml");
        fs::write(&path, "[plugin]\nid = \"lore\"\n\n[npcs.sage]\nname = \"Sage\"\n").unwrap();

        let unit = ManifestUnit::open(&path).unwrap();
        assert_eq!(unit.instantiate().unwrap().register_npcs().len(), 1);
        assert!(unit.last_modified().is_some());

        fs::write(
            &path,
            "[plugin]\nid = \"lore\"\n\n[npcs.sage]\nname = \"Sage\"\n\n[npcs.bard]\nname = \"Bard\"\n",
        )
        .unwrap();
        assert_eq!(unit.instantiate().unwrap().register_npcs().len(), 2);
    }

    #[test]
    fn test_scan_missing_directory() {
        let (units, errors) = scan_directory(Path::new("/nonexistent/questforge/plugins"));
        assert!(units.is_empty());
        assert_eq!(errors.len(), 1);
    }
}
