// Step-level profile metadata
//
// One record per profiled step, decoded from the artifact's file name and its
// node directory. Records are immutable; a refresh replaces the whole list.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

use crate::error::{Error, Result};

/// Step value used for profiling that happened before training step 0
pub const PRE_STEP_ZERO: i64 = -1;

const CPROFILE_EXTENSION: &str = "pstats.json";
const PYINSTRUMENT_EXTENSION: &str = "json";

/// Identity of the profiler that produced an artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ProfilerName {
    /// Flat cumulative call-count tables
    CProfile,
    /// Hierarchical call-tree documents
    Pyinstrument,
}

impl ProfilerName {
    /// File extension used for this profiler's payloads
    pub fn extension(self) -> &'static str {
        match self {
            ProfilerName::CProfile => CPROFILE_EXTENSION,
            ProfilerName::Pyinstrument => PYINSTRUMENT_EXTENSION,
        }
    }
}

/// Fields encoded in an artifact file name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArtifactName {
    pub profiler_name: ProfilerName,
    pub step: i64,
    pub start_time_us: u64,
    pub end_time_us: u64,
}

impl ArtifactName {
    /// Encode as `<profiler>_<step>_<start_us>_<end_us>.<ext>`
    pub fn encode(&self) -> String {
        format!(
            "{}_{}_{}_{}.{}",
            self.profiler_name,
            self.step,
            self.start_time_us,
            self.end_time_us,
            self.profiler_name.extension()
        )
    }

    /// Decode a file name produced by [`ArtifactName::encode`]
    pub fn decode(file_name: &str) -> Result<Self> {
        let invalid = |reason: &str| {
            Error::InvalidArtifactName(format!("{}: {}", file_name, reason))
        };

        // The longer extension has to be checked first since it ends with the shorter one
        let (stem, extension) = if let Some(stem) = file_name.strip_suffix(".pstats.json") {
            (stem, CPROFILE_EXTENSION)
        } else if let Some(stem) = file_name.strip_suffix(".json") {
            (stem, PYINSTRUMENT_EXTENSION)
        } else {
            return Err(invalid("unknown extension"));
        };

        let parts: Vec<&str> = stem.split('_').collect();
        if parts.len() != 4 {
            return Err(invalid("expected <profiler>_<step>_<start_us>_<end_us>"));
        }

        let profiler_name: ProfilerName = parts[0]
            .parse()
            .map_err(|_| invalid("unknown profiler"))?;
        if profiler_name.extension() != extension {
            return Err(invalid("extension does not match profiler"));
        }

        let step: i64 = parts[1].parse().map_err(|_| invalid("step is not an integer"))?;
        let start_time_us: u64 = parts[2].parse().map_err(|_| invalid("start time is not an integer"))?;
        let end_time_us: u64 = parts[3].parse().map_err(|_| invalid("end time is not an integer"))?;

        if step < PRE_STEP_ZERO {
            return Err(invalid("step must be >= -1"));
        }
        if start_time_us > end_time_us {
            return Err(invalid("start time is after end time"));
        }

        Ok(Self {
            profiler_name,
            step,
            start_time_us,
            end_time_us,
        })
    }
}

/// True if `node_id` can be used as a single directory name under a stats root
pub fn is_valid_node_id(node_id: &str) -> bool {
    !node_id.is_empty()
        && node_id != "."
        && node_id != ".."
        && !node_id.contains('/')
        && !node_id.contains('\\')
}

/// Metadata for one profiled step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "StepProfileRecord")]
pub struct StepProfileStats {
    profiler_name: ProfilerName,
    node_id: String,
    step: i64,
    start_time_us: u64,
    end_time_us: u64,
    stats_path: PathBuf,
}

impl StepProfileStats {
    pub fn new(
        profiler_name: ProfilerName,
        node_id: impl Into<String>,
        step: i64,
        start_time_us: u64,
        end_time_us: u64,
        stats_path: impl Into<PathBuf>,
    ) -> Result<Self> {
        let node_id = node_id.into();
        if step < PRE_STEP_ZERO {
            return Err(Error::InvalidArtifactName(format!("step must be >= -1, got {}", step)));
        }
        if start_time_us > end_time_us {
            return Err(Error::InvalidArtifactName(format!(
                "start time {} is after end time {}",
                start_time_us, end_time_us
            )));
        }
        if !is_valid_node_id(&node_id) {
            return Err(Error::InvalidArtifactName(format!("invalid node id {:?}", node_id)));
        }

        Ok(Self {
            profiler_name,
            node_id,
            step,
            start_time_us,
            end_time_us,
            stats_path: stats_path.into(),
        })
    }

    pub fn profiler_name(&self) -> ProfilerName {
        self.profiler_name
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn step(&self) -> i64 {
        self.step
    }

    pub fn start_time_us(&self) -> u64 {
        self.start_time_us
    }

    pub fn end_time_us(&self) -> u64 {
        self.end_time_us
    }

    pub fn stats_path(&self) -> &Path {
        &self.stats_path
    }

    /// Fields as they are encoded in the artifact file name
    pub fn artifact_name(&self) -> ArtifactName {
        ArtifactName {
            profiler_name: self.profiler_name,
            step: self.step,
            start_time_us: self.start_time_us,
            end_time_us: self.end_time_us,
        }
    }

    /// Path of this artifact relative to a stats root
    pub fn relative_path(&self) -> PathBuf {
        Path::new(&self.node_id).join(self.artifact_name().encode())
    }

    /// True iff `start_step <= step <= end_step`
    pub fn in_step_interval(&self, start_step: i64, end_step: i64) -> bool {
        start_step <= self.step && self.step <= end_step
    }

    /// True iff the profiled window overlaps `[start_time_us, end_time_us]`.
    /// Windows that only touch at a boundary count as overlapping.
    pub fn in_time_interval(&self, start_time_us: u64, end_time_us: u64) -> bool {
        self.start_time_us <= end_time_us && self.end_time_us >= start_time_us
    }
}

// Deserialized form; goes through `StepProfileStats::new` so the same checks apply
#[derive(Deserialize)]
struct StepProfileRecord {
    profiler_name: ProfilerName,
    node_id: String,
    step: i64,
    start_time_us: u64,
    end_time_us: u64,
    stats_path: PathBuf,
}

impl TryFrom<StepProfileRecord> for StepProfileStats {
    type Error = Error;

    fn try_from(record: StepProfileRecord) -> Result<Self> {
        Self::new(
            record.profiler_name,
            record.node_id,
            record.step,
            record.start_time_us,
            record.end_time_us,
            record.stats_path,
        )
    }
}
