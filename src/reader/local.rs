use std::collections::HashSet;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};

use crate::config::DEFAULT_WORKER_NAME;
use crate::error::Result;

use super::step_stats::{ArtifactName, ProfilerName, StepProfileStats};
use super::PythonStatsReader;

/// Suffix of files that are still being downloaded
pub(crate) const PARTIAL_SUFFIX: &str = ".part";

/// Reads step stats from a directory that already holds the artifacts.
///
/// Expected layout is `<profile_dir>/<node_id>/<artifact name>`. Artifacts placed
/// directly in `<profile_dir>` are attributed to the default worker.
#[derive(Debug, Clone)]
pub struct LocalPythonStatsReader {
    profile_dir: PathBuf,
    default_node_id: String,
}

impl LocalPythonStatsReader {
    pub fn new(profile_dir: impl Into<PathBuf>) -> Self {
        Self {
            profile_dir: profile_dir.into(),
            default_node_id: DEFAULT_WORKER_NAME.to_string(),
        }
    }

    /// Attribute top-level artifacts to `node_id` instead of the default worker
    pub fn with_default_node_id(mut self, node_id: impl Into<String>) -> Self {
        self.default_node_id = node_id.into();
        self
    }

    pub fn profile_dir(&self) -> &Path {
        &self.profile_dir
    }

    /// Scan the profile directory. A missing directory is an empty result.
    pub fn scan(&self) -> Result<Vec<StepProfileStats>> {
        let entries = match fs::read_dir(&self.profile_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("Profile directory {} does not exist yet", self.profile_dir.display());
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };

        let mut stats = Vec::new();
        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Skipping unreadable entry in {}: {}", self.profile_dir.display(), e);
                    continue;
                }
            };
            let path = entry.path();

            if path.is_dir() {
                let Some(node_id) = path.file_name().and_then(|name| name.to_str()) else {
                    warn!("Skipping node directory with non UTF-8 name: {}", path.display());
                    continue;
                };
                self.scan_node_dir(&path, node_id, &mut stats);
            } else if let Some(record) = parse_artifact(&path, &self.default_node_id) {
                stats.push(record);
            }
        }

        let stats = dedup_and_sort(stats);
        info!("Found {} python profile stats in {}", stats.len(), self.profile_dir.display());
        Ok(stats)
    }

    fn scan_node_dir(&self, node_dir: &Path, node_id: &str, stats: &mut Vec<StepProfileStats>) {
        let entries = match fs::read_dir(node_dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Skipping unreadable node directory {}: {}", node_dir.display(), e);
                return;
            }
        };

        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                warn!("Skipping unexpected directory {}", path.display());
                continue;
            }
            if let Some(record) = parse_artifact(&path, node_id) {
                stats.push(record);
            }
        }
    }
}

impl PythonStatsReader for LocalPythonStatsReader {
    fn load_python_profile_stats(&self) -> Result<Vec<StepProfileStats>> {
        self.scan()
    }
}

fn parse_artifact(path: &Path, node_id: &str) -> Option<StepProfileStats> {
    let Some(file_name) = path.file_name().and_then(|name| name.to_str()) else {
        warn!("Skipping artifact with non UTF-8 name: {}", path.display());
        return None;
    };
    if file_name.ends_with(PARTIAL_SUFFIX) {
        debug!("Skipping partially downloaded artifact {}", path.display());
        return None;
    }

    let parsed = ArtifactName::decode(file_name).and_then(|name| {
        StepProfileStats::new(
            name.profiler_name,
            node_id,
            name.step,
            name.start_time_us,
            name.end_time_us,
            path,
        )
    });

    match parsed {
        Ok(record) => {
            debug!("Found {} stats for step {} at {}", record.profiler_name(), record.step(), path.display());
            Some(record)
        }
        Err(e) => {
            warn!("Skipping malformed artifact {}: {}", path.display(), e);
            None
        }
    }
}

/// Sort by (step, start time) and keep one record per (profiler, node, step)
fn dedup_and_sort(mut stats: Vec<StepProfileStats>) -> Vec<StepProfileStats> {
    stats.sort_by(|a, b| {
        (a.step(), a.start_time_us(), a.profiler_name(), a.node_id(), a.stats_path())
            .cmp(&(b.step(), b.start_time_us(), b.profiler_name(), b.node_id(), b.stats_path()))
    });

    let mut seen: HashSet<(ProfilerName, String, i64)> = HashSet::new();
    stats.retain(|record| {
        let key = (record.profiler_name(), record.node_id().to_string(), record.step());
        if seen.insert(key) {
            true
        } else {
            warn!(
                "Ignoring duplicate {} stats for node {} step {} at {}",
                record.profiler_name(),
                record.node_id(),
                record.step(),
                record.stats_path().display()
            );
            false
        }
    });
    stats
}
