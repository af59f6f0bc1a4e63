// Stats readers
//
// Enumerate the per-step profile artifacts that currently exist. Every call is a
// full re-enumeration; there is no incremental mode.

mod step_stats;
mod local;
mod remote;

pub use step_stats::{is_valid_node_id, ArtifactName, ProfilerName, StepProfileStats, PRE_STEP_ZERO};
pub use local::LocalPythonStatsReader;
pub use remote::{LocalObjectStore, ObjectInfo, ObjectStore, RemotePythonStatsReader, S3Uri};

use crate::error::Result;

/// Source of step profile metadata
pub trait PythonStatsReader {
    /// Enumerate every available artifact, sorted by step then start time
    fn load_python_profile_stats(&self) -> Result<Vec<StepProfileStats>>;
}

impl<R: PythonStatsReader + ?Sized> PythonStatsReader for Box<R> {
    fn load_python_profile_stats(&self) -> Result<Vec<StepProfileStats>> {
        (**self).load_python_profile_stats()
    }
}
