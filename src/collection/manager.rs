use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, error};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

use super::collection::{Collection, CollectionKeys};

/// Version written to, and required from, collection documents
pub const COLLECTIONS_FORMAT_VERSION: u32 = 1;

/// Built-in collections and their include patterns, in registration order
pub const DEFAULT_COLLECTION_PATTERNS: [(&str, &str); 4] = [
    (CollectionKeys::WEIGHTS, "^(?!gradient).*weight"),
    (CollectionKeys::BIASES, "^(?!gradient).*bias"),
    (CollectionKeys::GRADIENTS, "^gradient"),
    (CollectionKeys::LOSSES, "[Ll]oss"),
];

/// Registry of collections keyed by unique name, in insertion order
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionManager {
    collections: Vec<Collection>,
}

impl Default for CollectionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl CollectionManager {
    /// Create a manager holding the built-in collections
    pub fn new() -> Self {
        let mut manager = Self::without_defaults();
        if let Err(e) = manager.register_default_collections() {
            error!("Failed to register built-in collections: {}", e);
        }
        manager
    }

    /// Create a manager with no collections
    pub fn without_defaults() -> Self {
        Self {
            collections: Vec::new(),
        }
    }

    fn register_default_collections(&mut self) -> Result<()> {
        for (name, pattern) in DEFAULT_COLLECTION_PATTERNS {
            self.get_or_create(name).include(pattern)?;
        }
        Ok(())
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.collections.iter().position(|c| c.name() == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// Insert a new empty collection; fails if the name is taken
    pub fn create_collection(&mut self, name: &str) -> Result<&mut Collection> {
        if self.contains(name) {
            return Err(Error::DuplicateCollection(name.to_string()));
        }
        self.collections.push(Collection::new(name));
        let index = self.collections.len() - 1;
        Ok(&mut self.collections[index])
    }

    pub fn get(&self, name: &str) -> Result<&Collection> {
        self.position(name)
            .map(|index| &self.collections[index])
            .ok_or_else(|| Error::CollectionNotFound(name.to_string()))
    }

    /// Look up a collection for mutation, creating it when `create` is set
    pub fn get_mut(&mut self, name: &str, create: bool) -> Result<&mut Collection> {
        match self.position(name) {
            Some(index) => Ok(&mut self.collections[index]),
            None if create => self.create_collection(name),
            None => Err(Error::CollectionNotFound(name.to_string())),
        }
    }

    pub fn get_or_create(&mut self, name: &str) -> &mut Collection {
        let index = match self.position(name) {
            Some(index) => index,
            None => {
                self.collections.push(Collection::new(name));
                self.collections.len() - 1
            }
        };
        &mut self.collections[index]
    }

    pub fn collections(&self) -> &[Collection] {
        &self.collections
    }

    pub fn iter(&self) -> impl Iterator<Item = &Collection> {
        self.collections.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.collections.iter().map(Collection::name).collect()
    }

    pub fn len(&self) -> usize {
        self.collections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.collections.is_empty()
    }

    /// Collections that `tensor_name` belongs to
    pub fn collections_for_tensor(&self, tensor_name: &str) -> Vec<&Collection> {
        self.collections.iter().filter(|c| c.has_tensor(tensor_name)).collect()
    }

    pub fn to_json_string(&self) -> Result<String> {
        let document = CollectionsDocumentRef {
            format_version: COLLECTIONS_FORMAT_VERSION,
            collections: &self.collections,
        };
        Ok(serde_json::to_string_pretty(&document)?)
    }

    /// Write the whole registry; the file is replaced in one rename
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let contents = self.to_json_string()?;
        let tmp = temporary_path(path);
        fs::write(&tmp, contents)?;
        fs::rename(&tmp, path)?;
        debug!("Saved {} collections to {}", self.len(), path.display());
        Ok(())
    }

    /// Build a manager from a saved registry. Nothing is merged with defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let manager = Self::load_from_str(&contents)?;
        debug!("Loaded {} collections from {}", manager.len(), path.display());
        Ok(manager)
    }

    pub fn load_from_str(s: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(s)?;
        let version = value
            .get("format_version")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| Error::UnsupportedFormat("missing format_version".to_string()))?;
        if version != u64::from(COLLECTIONS_FORMAT_VERSION) {
            return Err(Error::UnsupportedFormat(format!(
                "collections format version {} (expected {})",
                version, COLLECTIONS_FORMAT_VERSION
            )));
        }

        let document: CollectionsDocument = serde_json::from_value(value)?;
        let mut seen = HashSet::new();
        for collection in &document.collections {
            if !seen.insert(collection.name()) {
                return Err(Error::DuplicateCollection(collection.name().to_string()));
            }
        }

        Ok(Self {
            collections: document.collections,
        })
    }
}

#[derive(Serialize)]
struct CollectionsDocumentRef<'a> {
    format_version: u32,
    collections: &'a [Collection],
}

#[derive(Deserialize)]
struct CollectionsDocument {
    #[allow(dead_code)]
    format_version: u32,
    #[serde(default)]
    collections: Vec<Collection>,
}

fn temporary_path(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{}.tmp", file_name))
}
