use std::fmt;

use fancy_regex::Regex;
use log::warn;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Names of the built-in collections
pub struct CollectionKeys;

impl CollectionKeys {
    pub const DEFAULT: &'static str = "default";
    pub const WEIGHTS: &'static str = "weights";
    pub const BIASES: &'static str = "biases";
    pub const GRADIENTS: &'static str = "gradients";
    pub const LOSSES: &'static str = "losses";
}

/// A compiled regex that remembers its source text
#[derive(Clone)]
pub struct Pattern {
    source: String,
    regex: Regex,
}

impl Pattern {
    pub fn new(source: &str) -> Result<Self> {
        let regex = Regex::new(source).map_err(|e| Error::InvalidRegex {
            pattern: source.to_string(),
            message: e.to_string(),
        })?;
        Ok(Self {
            source: source.to_string(),
            regex,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// True if the pattern matches anywhere in `name`
    pub fn is_match(&self, name: &str) -> bool {
        match self.regex.is_match(name) {
            Ok(matched) => matched,
            Err(e) => {
                warn!("Regex {:?} failed on {:?}: {}", self.source, name, e);
                false
            }
        }
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl Eq for Pattern {}

impl fmt::Debug for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Pattern({:?})", self.source)
    }
}

/// Membership rule shared by every collection: an explicit member, or a name
/// matched by some include pattern and by no exclude pattern.
pub fn is_member(name: &str, include: &[Pattern], exclude: &[Pattern], explicit: &[String]) -> bool {
    if explicit.iter().any(|member| member == name) {
        return true;
    }
    include.iter().any(|p| p.is_match(name)) && !exclude.iter().any(|p| p.is_match(name))
}

/// A named group of tensors
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "CollectionRecord", try_from = "CollectionRecord")]
pub struct Collection {
    name: String,
    include_regex: Vec<Pattern>,
    exclude_regex: Vec<Pattern>,
    tensor_names: Vec<String>,
    reduction_config: Option<serde_json::Value>,
    save_config: Option<serde_json::Value>,
}

impl Collection {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            include_regex: Vec::new(),
            exclude_regex: Vec::new(),
            tensor_names: Vec::new(),
            reduction_config: None,
            save_config: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Add an include pattern. Existing names are not re-checked; matching happens on lookup.
    pub fn include(&mut self, pattern: &str) -> Result<()> {
        let pattern = Pattern::new(pattern)?;
        if !self.include_regex.contains(&pattern) {
            self.include_regex.push(pattern);
        }
        Ok(())
    }

    /// Add an exclude pattern. Explicitly added names are never excluded.
    pub fn exclude(&mut self, pattern: &str) -> Result<()> {
        let pattern = Pattern::new(pattern)?;
        if !self.exclude_regex.contains(&pattern) {
            self.exclude_regex.push(pattern);
        }
        Ok(())
    }

    /// Add explicit members regardless of the patterns
    pub fn add<I, S>(&mut self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for name in names {
            self.add_tensor_name(name);
        }
    }

    pub fn add_tensor_name(&mut self, name: impl Into<String>) {
        let name = name.into();
        if !self.tensor_names.contains(&name) {
            self.tensor_names.push(name);
        }
    }

    /// Include the inputs and/or output of a module, named `<module>_input_*` and `<module>_output`
    pub fn add_module_tensors(&mut self, module_name: &str, inputs: bool, outputs: bool) -> Result<()> {
        let module = fancy_regex::escape(module_name);
        if inputs {
            self.include(&format!("{}_input_*", module))?;
        }
        if outputs {
            self.include(&format!("{}_output", module))?;
        }
        Ok(())
    }

    pub fn has_tensor(&self, name: &str) -> bool {
        is_member(name, &self.include_regex, &self.exclude_regex, &self.tensor_names)
    }

    /// Names from `universe` that belong to this collection, in universe order
    pub fn matching_names<'a, I>(&self, universe: I) -> Vec<&'a str>
    where
        I: IntoIterator<Item = &'a str>,
    {
        universe.into_iter().filter(|name| self.has_tensor(name)).collect()
    }

    pub fn include_regex(&self) -> Vec<&str> {
        self.include_regex.iter().map(Pattern::as_str).collect()
    }

    pub fn exclude_regex(&self) -> Vec<&str> {
        self.exclude_regex.iter().map(Pattern::as_str).collect()
    }

    /// Explicit members in insertion order
    pub fn tensor_names(&self) -> &[String] {
        &self.tensor_names
    }

    pub fn reduction_config(&self) -> Option<&serde_json::Value> {
        self.reduction_config.as_ref()
    }

    pub fn set_reduction_config(&mut self, config: Option<serde_json::Value>) {
        self.reduction_config = config;
    }

    pub fn save_config(&self) -> Option<&serde_json::Value> {
        self.save_config.as_ref()
    }

    pub fn set_save_config(&mut self, config: Option<serde_json::Value>) {
        self.save_config = config;
    }
}

// Serialized form of a collection
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CollectionRecord {
    name: String,
    #[serde(default)]
    include_regex: Vec<String>,
    #[serde(default)]
    exclude_regex: Vec<String>,
    #[serde(default)]
    tensor_names: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    reduction_config: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    save_config: Option<serde_json::Value>,
}

impl From<Collection> for CollectionRecord {
    fn from(collection: Collection) -> Self {
        Self {
            name: collection.name,
            include_regex: collection.include_regex.into_iter().map(|p| p.source).collect(),
            exclude_regex: collection.exclude_regex.into_iter().map(|p| p.source).collect(),
            tensor_names: collection.tensor_names,
            reduction_config: collection.reduction_config,
            save_config: collection.save_config,
        }
    }
}

impl TryFrom<CollectionRecord> for Collection {
    type Error = Error;

    fn try_from(record: CollectionRecord) -> Result<Self> {
        let mut collection = Collection::new(record.name);
        for pattern in &record.include_regex {
            collection.include(pattern)?;
        }
        for pattern in &record.exclude_regex {
            collection.exclude(pattern)?;
        }
        collection.add(record.tensor_names);
        collection.reduction_config = record.reduction_config;
        collection.save_config = record.save_config;
        Ok(collection)
    }
}
