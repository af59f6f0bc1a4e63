use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use crate::error::{Error, Result};

use super::cprofile::AggregatedStats;

/// Parses one raw stats payload
pub trait PayloadLoader {
    /// Load a cProfile table that can be merged with others
    fn load_cprofile(&self, path: &Path) -> Result<AggregatedStats>;

    /// Load a pyinstrument call tree as a self-contained document
    fn load_pyinstrument(&self, path: &Path) -> Result<serde_json::Value>;
}

/// Reads payloads written as JSON: pstats tables as `{"functions": [...]}`,
/// pyinstrument sessions as their native JSON rendering.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonPayloadLoader;

impl JsonPayloadLoader {
    fn open(path: &Path) -> Result<BufReader<File>> {
        File::open(path)
            .map(BufReader::new)
            .map_err(|e| Error::PayloadLoad(path.to_path_buf(), format!("Failed to open file: {}", e)))
    }
}

impl PayloadLoader for JsonPayloadLoader {
    fn load_cprofile(&self, path: &Path) -> Result<AggregatedStats> {
        serde_json::from_reader(Self::open(path)?)
            .map_err(|e| Error::PayloadLoad(path.to_path_buf(), format!("Invalid cProfile stats: {}", e)))
    }

    fn load_pyinstrument(&self, path: &Path) -> Result<serde_json::Value> {
        serde_json::from_reader(Self::open(path)?)
            .map_err(|e| Error::PayloadLoad(path.to_path_buf(), format!("Invalid pyinstrument stats: {}", e)))
    }
}
