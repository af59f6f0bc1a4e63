use std::path::Path;

use log::info;

use crate::error::Result;

use super::collection::{Collection, CollectionKeys};
use super::manager::CollectionManager;

/// Owns the current collection manager of a training job.
///
/// The convenience functions all act on the owned manager. `load_collections`
/// and `reset_collections` build the replacement first and then swap it in, so
/// the scope never holds a partially loaded manager.
#[derive(Debug, Clone, Default)]
pub struct CollectionScope {
    manager: CollectionManager,
}

impl CollectionScope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_manager(manager: CollectionManager) -> Self {
        Self { manager }
    }

    pub fn get_collection_manager(&self) -> &CollectionManager {
        &self.manager
    }

    pub fn get_collection_manager_mut(&mut self) -> &mut CollectionManager {
        &mut self.manager
    }

    /// Get a collection, creating it if needed
    pub fn get_collection(&mut self, collection_name: &str) -> &mut Collection {
        self.manager.get_or_create(collection_name)
    }

    pub fn get_collections(&self) -> &[Collection] {
        self.manager.collections()
    }

    pub fn add_to_collection<I, S>(&mut self, collection_name: &str, names: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.get_collection(collection_name).add(names);
    }

    pub fn add_to_default_collection<I, S>(&mut self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.add_to_collection(CollectionKeys::DEFAULT, names);
    }

    /// Replace the current manager with one loaded from `path`. On error the current
    /// manager is kept.
    pub fn load_collections(&mut self, path: &Path) -> Result<()> {
        let manager = CollectionManager::load(path)?;
        info!("Loaded collections {:?} from {}", manager.names(), path.display());
        self.manager = manager;
        Ok(())
    }

    /// Replace the current manager with a fresh one holding only the built-in collections
    pub fn reset_collections(&mut self) {
        self.manager = CollectionManager::new();
    }

    pub fn export_collections(&self, path: &Path) -> Result<()> {
        self.manager.save(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_convenience_functions_create_lazily() {
        let mut scope = CollectionScope::new();
        scope.add_to_default_collection(["input_0"]);
        scope.add_to_collection("relu", ["relu0_output", "relu1_output"]);

        let names: Vec<&str> = scope.get_collections().iter().map(|c| c.name()).collect();
        assert_eq!(names, vec!["weights", "biases", "gradients", "losses", "default", "relu"]);
        assert_eq!(scope.get_collection("relu").tensor_names().len(), 2);
    }

    #[test]
    fn test_reset_discards_custom_collections() {
        let mut scope = CollectionScope::new();
        scope.add_to_collection("relu", ["relu0_output"]);
        scope.get_collection("weights").add(["extra"]);

        scope.reset_collections();
        assert_eq!(scope.get_collection_manager(), &CollectionManager::new());
    }

    #[test]
    fn test_failed_load_keeps_current_manager() {
        let dir = tempfile::tempdir().unwrap();
        let bad = dir.path().join("collections.json");
        std::fs::write(&bad, "{ not json").unwrap();

        let mut scope = CollectionScope::new();
        scope.add_to_collection("relu", ["relu0_output"]);
        let before = scope.get_collection_manager().clone();

        assert!(scope.load_collections(&bad).is_err());
        assert!(scope.load_collections(&dir.path().join("missing.json")).is_err());
        assert_eq!(scope.get_collection_manager(), &before);
    }
}
