// Python profile analysis
//
// One orchestrator serves every profiler family. The strategy decides which
// artifacts survive a refresh and how the selected steps are post-processed.
// Every public query refreshes first, so results reflect what is on disk now.

use log::info;

use crate::config::AnalysisConfig;
use crate::error::{Error, Result};
use crate::reader::{
    LocalPythonStatsReader, ObjectStore, ProfilerName, PythonStatsReader, RemotePythonStatsReader,
    S3Uri, StepProfileStats, PRE_STEP_ZERO,
};

use super::cprofile::{aggregate_cprofile_stats, CProfileStats};
use super::payload::{JsonPayloadLoader, PayloadLoader};
use super::pyinstrument::{load_pyinstrument_stats, PyinstrumentStats};

pub const CONVERT_TO_MICROSECS: f64 = 1_000_000.0;

/// Which artifacts an analysis looks at and what it returns for interval queries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalysisStrategy {
    /// Every profiler, metadata only
    All,
    /// cProfile artifacts, merged into one table
    CProfile,
    /// pyinstrument artifacts, one call tree per step
    Pyinstrument,
}

impl AnalysisStrategy {
    /// Profiler whose artifacts are kept on refresh, `None` for all
    pub fn profiler_filter(self) -> Option<ProfilerName> {
        match self {
            AnalysisStrategy::All => None,
            AnalysisStrategy::CProfile => Some(ProfilerName::CProfile),
            AnalysisStrategy::Pyinstrument => Some(ProfilerName::Pyinstrument),
        }
    }
}

/// Result of an interval query, shaped by the strategy
#[derive(Debug, Clone, PartialEq)]
pub enum ProfileQueryResult {
    Steps(Vec<StepProfileStats>),
    Aggregated(CProfileStats),
    PerStep(Vec<PyinstrumentStats>),
}

impl ProfileQueryResult {
    /// Number of steps (or contributing payloads for aggregates) in the result
    pub fn len(&self) -> usize {
        match self {
            ProfileQueryResult::Steps(steps) => steps.len(),
            ProfileQueryResult::Aggregated(stats) => stats.sources().len(),
            ProfileQueryResult::PerStep(steps) => steps.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Convert epoch seconds to epoch microseconds, clamping negatives to 0
pub fn seconds_to_micros(seconds: f64) -> u64 {
    (seconds * CONVERT_TO_MICROSECS).round().max(0.0) as u64
}

/// Build the reader described by `config`. Remote locations need an object store,
/// see [`reader_from_config_with_store`].
pub fn reader_from_config(config: &AnalysisConfig) -> Result<Box<dyn PythonStatsReader>> {
    config.validate()?;
    if let Some(s3_path) = &config.s3_path {
        return Err(Error::InvalidConfig(format!(
            "s3_path {} is set but no object store was provided",
            s3_path
        )));
    }

    Ok(Box::new(
        LocalPythonStatsReader::new(&config.local_profile_dir)
            .with_default_node_id(&config.default_worker_name),
    ))
}

/// Build a remote reader when `config.s3_path` is set, a local one otherwise
pub fn reader_from_config_with_store<S: ObjectStore + 'static>(
    config: &AnalysisConfig,
    store: S,
) -> Result<Box<dyn PythonStatsReader>> {
    config.validate()?;
    match &config.s3_path {
        Some(s3_path) => {
            let uri = S3Uri::parse(s3_path)?;
            Ok(Box::new(
                RemotePythonStatsReader::from_s3_uri(&config.local_profile_dir, &uri, store)
                    .with_default_node_id(&config.default_worker_name),
            ))
        }
        None => reader_from_config(config),
    }
}

/// Interval queries over step profile artifacts
pub struct PythonProfileAnalysis {
    python_stats_reader: Box<dyn PythonStatsReader>,
    payload_loader: Box<dyn PayloadLoader>,
    strategy: AnalysisStrategy,
    python_profile_stats: Vec<StepProfileStats>,
}

impl PythonProfileAnalysis {
    /// Analysis over every profiler family, returning metadata
    pub fn new(reader: impl PythonStatsReader + 'static) -> Self {
        Self::with_strategy(Box::new(reader), AnalysisStrategy::All)
    }

    pub fn with_strategy(reader: Box<dyn PythonStatsReader>, strategy: AnalysisStrategy) -> Self {
        Self::with_loader(reader, strategy, Box::new(JsonPayloadLoader))
    }

    pub fn with_loader(
        reader: Box<dyn PythonStatsReader>,
        strategy: AnalysisStrategy,
        payload_loader: Box<dyn PayloadLoader>,
    ) -> Self {
        Self {
            python_stats_reader: reader,
            payload_loader,
            strategy,
            python_profile_stats: Vec::new(),
        }
    }

    /// Local analysis from configuration
    pub fn from_config(config: &AnalysisConfig, strategy: AnalysisStrategy) -> Result<Self> {
        Ok(Self::with_strategy(reader_from_config(config)?, strategy))
    }

    pub fn strategy(&self) -> AnalysisStrategy {
        self.strategy
    }

    /// Records seen by the most recent refresh
    pub fn last_snapshot(&self) -> &[StepProfileStats] {
        &self.python_profile_stats
    }

    pub(crate) fn payload_loader(&self) -> &dyn PayloadLoader {
        self.payload_loader.as_ref()
    }

    /// Replace the snapshot with the reader's current view, filtered by strategy
    fn refresh_python_profile_stats(&mut self) -> Result<()> {
        info!("Refreshing python profile stats.");
        let mut stats = self.python_stats_reader.load_python_profile_stats()?;
        if let Some(profiler) = self.strategy.profiler_filter() {
            stats.retain(|s| s.profiler_name() == profiler);
        }
        self.python_profile_stats = stats;
        Ok(())
    }

    /// Refresh, then keep records whose window overlaps `[start, end]` (epoch seconds)
    pub(crate) fn select_by_time(&mut self, start_time_since_epoch_in_secs: f64, end_time_since_epoch_in_secs: f64) -> Result<Vec<StepProfileStats>> {
        self.refresh_python_profile_stats()?;
        let start_us = seconds_to_micros(start_time_since_epoch_in_secs);
        let end_us = seconds_to_micros(end_time_since_epoch_in_secs);
        if start_us > end_us {
            return Ok(Vec::new());
        }

        Ok(self
            .python_profile_stats
            .iter()
            .filter(|s| s.in_time_interval(start_us, end_us))
            .cloned()
            .collect())
    }

    /// Refresh, then keep records with `start_step <= step <= end_step`
    pub(crate) fn select_by_step(&mut self, start_step: i64, end_step: i64) -> Result<Vec<StepProfileStats>> {
        self.refresh_python_profile_stats()?;
        Ok(self
            .python_profile_stats
            .iter()
            .filter(|s| s.in_step_interval(start_step, end_step))
            .cloned()
            .collect())
    }

    fn post_process(&self, selected: Vec<StepProfileStats>) -> ProfileQueryResult {
        match self.strategy {
            AnalysisStrategy::All => ProfileQueryResult::Steps(selected),
            AnalysisStrategy::CProfile => {
                ProfileQueryResult::Aggregated(aggregate_cprofile_stats(self.payload_loader(), &selected))
            }
            AnalysisStrategy::Pyinstrument => {
                ProfileQueryResult::PerStep(load_pyinstrument_stats(self.payload_loader(), &selected))
            }
        }
    }

    pub fn fetch_profile_stats_by_time(&mut self, start_time_since_epoch_in_secs: f64, end_time_since_epoch_in_secs: f64) -> Result<ProfileQueryResult> {
        let selected = self.select_by_time(start_time_since_epoch_in_secs, end_time_since_epoch_in_secs)?;
        Ok(self.post_process(selected))
    }

    pub fn fetch_profile_stats_by_step(&mut self, start_step: i64, end_step: i64) -> Result<ProfileQueryResult> {
        let selected = self.select_by_step(start_step, end_step)?;
        Ok(self.post_process(selected))
    }

    /// Stats from profiling that happened up to and including step 0
    pub fn fetch_pre_step_zero_profile_stats(&mut self) -> Result<ProfileQueryResult> {
        self.fetch_profile_stats_by_step(PRE_STEP_ZERO, 0)
    }

    /// Metadata for every profiled step the strategy keeps
    pub fn list_profile_stats(&mut self) -> Result<Vec<StepProfileStats>> {
        self.refresh_python_profile_stats()?;
        Ok(self.python_profile_stats.clone())
    }
}

/// Analysis of cProfile artifacts; interval queries merge every selected step
pub struct CProfileAnalysis {
    analysis: PythonProfileAnalysis,
}

impl CProfileAnalysis {
    pub fn new(reader: impl PythonStatsReader + 'static) -> Self {
        Self {
            analysis: PythonProfileAnalysis::with_strategy(Box::new(reader), AnalysisStrategy::CProfile),
        }
    }

    pub fn with_loader(reader: Box<dyn PythonStatsReader>, payload_loader: Box<dyn PayloadLoader>) -> Self {
        Self {
            analysis: PythonProfileAnalysis::with_loader(reader, AnalysisStrategy::CProfile, payload_loader),
        }
    }

    pub fn from_config(config: &AnalysisConfig) -> Result<Self> {
        Ok(Self {
            analysis: PythonProfileAnalysis::from_config(config, AnalysisStrategy::CProfile)?,
        })
    }

    pub fn fetch_profile_stats_by_time(&mut self, start_time_since_epoch_in_secs: f64, end_time_since_epoch_in_secs: f64) -> Result<CProfileStats> {
        let selected = self.analysis.select_by_time(start_time_since_epoch_in_secs, end_time_since_epoch_in_secs)?;
        Ok(aggregate_cprofile_stats(self.analysis.payload_loader(), &selected))
    }

    pub fn fetch_profile_stats_by_step(&mut self, start_step: i64, end_step: i64) -> Result<CProfileStats> {
        let selected = self.analysis.select_by_step(start_step, end_step)?;
        Ok(aggregate_cprofile_stats(self.analysis.payload_loader(), &selected))
    }

    pub fn fetch_pre_step_zero_profile_stats(&mut self) -> Result<CProfileStats> {
        self.fetch_profile_stats_by_step(PRE_STEP_ZERO, 0)
    }

    pub fn list_profile_stats(&mut self) -> Result<Vec<StepProfileStats>> {
        self.analysis.list_profile_stats()
    }
}

/// Analysis of pyinstrument artifacts; interval queries return one tree per step
pub struct PyinstrumentAnalysis {
    analysis: PythonProfileAnalysis,
}

impl PyinstrumentAnalysis {
    pub fn new(reader: impl PythonStatsReader + 'static) -> Self {
        Self {
            analysis: PythonProfileAnalysis::with_strategy(Box::new(reader), AnalysisStrategy::Pyinstrument),
        }
    }

    pub fn with_loader(reader: Box<dyn PythonStatsReader>, payload_loader: Box<dyn PayloadLoader>) -> Self {
        Self {
            analysis: PythonProfileAnalysis::with_loader(reader, AnalysisStrategy::Pyinstrument, payload_loader),
        }
    }

    pub fn from_config(config: &AnalysisConfig) -> Result<Self> {
        Ok(Self {
            analysis: PythonProfileAnalysis::from_config(config, AnalysisStrategy::Pyinstrument)?,
        })
    }

    pub fn fetch_profile_stats_by_time(&mut self, start_time_since_epoch_in_secs: f64, end_time_since_epoch_in_secs: f64) -> Result<Vec<PyinstrumentStats>> {
        let selected = self.analysis.select_by_time(start_time_since_epoch_in_secs, end_time_since_epoch_in_secs)?;
        Ok(load_pyinstrument_stats(self.analysis.payload_loader(), &selected))
    }

    pub fn fetch_profile_stats_by_step(&mut self, start_step: i64, end_step: i64) -> Result<Vec<PyinstrumentStats>> {
        let selected = self.analysis.select_by_step(start_step, end_step)?;
        Ok(load_pyinstrument_stats(self.analysis.payload_loader(), &selected))
    }

    pub fn fetch_pre_step_zero_profile_stats(&mut self) -> Result<Vec<PyinstrumentStats>> {
        self.fetch_profile_stats_by_step(PRE_STEP_ZERO, 0)
    }

    pub fn list_profile_stats(&mut self) -> Result<Vec<StepProfileStats>> {
        self.analysis.list_profile_stats()
    }
}
