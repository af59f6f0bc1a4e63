use log::warn;
use serde::Serialize;

use crate::reader::StepProfileStats;

use super::payload::PayloadLoader;

/// One step's pyinstrument call tree. Trees from different steps are never merged.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PyinstrumentStats {
    pub step_stats: StepProfileStats,
    pub document: serde_json::Value,
}

impl PyinstrumentStats {
    pub fn step(&self) -> i64 {
        self.step_stats.step()
    }

    /// Root frame of the call tree, when the document has one
    pub fn root_frame(&self) -> Option<&serde_json::Value> {
        self.document.get("root_frame")
    }

    /// Session duration recorded by pyinstrument, in seconds
    pub fn duration(&self) -> Option<f64> {
        self.document.get("duration").and_then(|d| d.as_f64())
    }
}

/// Parse the payload of every selected step, keeping the order of `selected`.
/// Unloadable payloads are skipped.
pub fn load_pyinstrument_stats(loader: &dyn PayloadLoader, selected: &[StepProfileStats]) -> Vec<PyinstrumentStats> {
    selected
        .iter()
        .filter_map(|step_stats| match loader.load_pyinstrument(step_stats.stats_path()) {
            Ok(document) => Some(PyinstrumentStats {
                step_stats: step_stats.clone(),
                document,
            }),
            Err(e) => {
                warn!("Skipping pyinstrument stats for step {}: {}", step_stats.step(), e);
                None
            }
        })
        .collect()
}
