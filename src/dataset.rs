//! Datasets and the resource store they are loaded from.
//!
//! Every dataset is described by a `{name}.info.json` resource whose
//! `dataRef` field names the CSV resource holding the actual rows. The
//! registry loads all of them once at startup; nothing is read lazily.

use crate::{Error, Result};
use log::{debug, info};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// The datasets the bundled chart catalogue draws from
pub const DEFAULT_DATASETS: &[&str] = &[
    "energy-consumption-by-source",
    "fossil-fuels-consumption",
    "per-capita-energy-use",
];

/// Source of named text resources
pub trait ResourceStore: Send + Sync {
    /// Read the named resource as a string
    fn read(&self, name: &str) -> Result<String>;
}

/// Reads resources from files under a root directory
#[derive(Debug, Clone)]
pub struct DirResourceStore {
    root: PathBuf,
}

impl DirResourceStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl ResourceStore for DirResourceStore {
    fn read(&self, name: &str) -> Result<String> {
        // Resource names are flat; refuse anything that walks out of the root.
        if name.is_empty() || name.contains("..") || Path::new(name).is_absolute() {
            return Err(Error::ResourceError(format!("Illegal resource name `{}`", name)));
        }
        let path = self.root.join(name);
        let content = std::fs::read_to_string(&path)
            .map_err(|e| {
                Error::ResourceError(format!("Unable to read `{}`: {}", path.display(), e))
            })?;
        Ok(content.trim().to_string())
    }
}

/// In-memory resources, handy for tests and embedding
#[derive(Debug, Clone, Default)]
pub struct MemoryResourceStore {
    entries: HashMap<String, String>,
}

impl MemoryResourceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, content: impl Into<String>) -> &mut Self {
        self.entries.insert(name.into(), content.into());
        self
    }

    /// Register a dataset under `id` with the usual info/data resource pair
    pub fn insert_dataset(&mut self, id: &str, description: &str, csv: &str) -> &mut Self {
        let data_ref = format!("{}.csv", id);
        let info = serde_json::json!({
            "id": id,
            "description": description,
            "dataRef": data_ref,
        });
        self.insert(format!("{}.info.json", id), info.to_string());
        self.insert(data_ref, csv);
        self
    }
}

impl ResourceStore for MemoryResourceStore {
    fn read(&self, name: &str) -> Result<String> {
        self.entries
            .get(name)
            .map(|s| s.trim().to_string())
            .ok_or_else(|| Error::ResourceError(format!("No resource named `{}`", name)))
    }
}

/// The fields of a dataset info file the service relies on
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetInfo {
    pub id: String,
    pub data_ref: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub row_count: Option<u64>,
    #[serde(default)]
    pub source: Option<String>,
}

/// A loaded dataset. Immutable for the life of the process.
#[derive(Debug, Clone)]
pub struct Dataset {
    pub id: String,
    /// The info file, re-serialized compactly
    pub info_json: String,
    pub csv_content: String,
}

impl Dataset {
    /// Load the dataset described by `{name}.info.json` from `store`
    pub fn load(store: &dyn ResourceStore, name: &str) -> Result<Self> {
        let raw = store.read(&format!("{}.info.json", name))?;
        let value: serde_json::Value = serde_json::from_str(&raw)
            .map_err(|e| {
                Error::ResourceError(format!("Dataset info `{}` is not JSON: {}", name, e))
            })?;
        let info: DatasetInfo = serde_json::from_value(value.clone())
            .map_err(|e| {
                Error::ResourceError(format!("Dataset info `{}` is incomplete: {}", name, e))
            })?;
        let csv_content = store.read(&info.data_ref)?;
        debug!("Loaded dataset `{}` ({} bytes of CSV)", info.id, csv_content.len());
        Ok(Self {
            id: info.id,
            info_json: value.to_string(),
            csv_content,
        })
    }
}

/// Datasets keyed by id, built once at startup
#[derive(Debug, Clone, Default)]
pub struct DatasetRegistry {
    datasets: HashMap<String, Dataset>,
}

impl DatasetRegistry {
    /// Load every named dataset; the first failure aborts the whole load.
    pub fn load(store: &dyn ResourceStore, names: &[&str]) -> Result<Self> {
        let mut registry = Self::default();
        for name in names {
            let dataset = Dataset::load(store, name)?;
            if registry.datasets.contains_key(&dataset.id) {
                return Err(Error::ResourceError(format!("Duplicate dataset id `{}`", dataset.id)));
            }
            registry.datasets.insert(dataset.id.clone(), dataset);
        }
        info!("Dataset registry ready with {} dataset(s)", registry.datasets.len());
        Ok(registry)
    }

    pub fn get(&self, id: &str) -> Result<&Dataset> {
        self.datasets
            .get(id)
            .ok_or_else(|| Error::ResourceError(format!("Unknown dataset `{}`", id)))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.datasets.contains_key(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.datasets.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.datasets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.datasets.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> MemoryResourceStore {
        let mut s = MemoryResourceStore::new();
        s.insert_dataset(
            "fossil-fuels-consumption",
            "Fossil fuels",
            "year,value\n1990,10\n2000,20\n",
        );
        s
    }

    #[test]
    fn loads_info_and_data() {
        let registry = DatasetRegistry::load(&store(), &["fossil-fuels-consumption"]).unwrap();
        let ds = registry.get("fossil-fuels-consumption").unwrap();
        assert_eq!(ds.csv_content, "year,value\n1990,10\n2000,20");
        let info: serde_json::Value = serde_json::from_str(&ds.info_json).unwrap();
        assert_eq!(info["description"], "Fossil fuels");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn missing_dataset_aborts_load() {
        let err =
            DatasetRegistry::load(&store(), &["fossil-fuels-consumption", "nope"]).unwrap_err();
        assert!(matches!(err, Error::ResourceError(_)));
    }

    #[test]
    fn missing_data_ref_is_rejected() {
        let mut s = MemoryResourceStore::new();
        s.insert("broken.info.json", r#"{"id":"broken"}"#);
        assert!(Dataset::load(&s, "broken").is_err());
    }

    #[test]
    fn unknown_id_is_a_resource_error() {
        let registry = DatasetRegistry::default();
        assert!(matches!(registry.get("x"), Err(Error::ResourceError(_))));
    }

    #[test]
    fn dir_store_refuses_parent_paths() {
        let s = DirResourceStore::new(std::env::temp_dir());
        assert!(s.read("../etc/passwd").is_err());
        assert!(s.read("").is_err());
    }

    #[test]
    fn dir_store_trims_content() {
        let dir = std::env::temp_dir().join(format!("chartshot-store-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("a.csv"), "x,y\n1,2\n\n").unwrap();
        let s = DirResourceStore::new(&dir);
        assert_eq!(s.read("a.csv").unwrap(), "x,y\n1,2");
        std::fs::remove_dir_all(&dir).ok();
    }
}
