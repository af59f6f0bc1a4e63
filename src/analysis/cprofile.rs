// cProfile aggregation
//
// Flat call-count tables from many steps are summed into one table keyed by
// function identity. Summation is per counter, so the result does not depend on
// the order in which steps are added.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::AddAssign;
use std::path::PathBuf;

use log::warn;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

use crate::reader::StepProfileStats;

use super::payload::PayloadLoader;

/// Identity of a profiled function
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FunctionKey {
    pub filename: String,
    pub line: u32,
    pub function: String,
}

impl FunctionKey {
    pub fn new(filename: impl Into<String>, line: u32, function: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            line,
            function: function.into(),
        }
    }

    /// Builtins are recorded with the pseudo file `~` and line 0
    pub fn is_builtin(&self) -> bool {
        self.filename == "~" && self.line == 0
    }
}

impl fmt::Display for FunctionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_builtin() {
            write!(f, "{}", self.function)
        } else {
            write!(f, "{}:{}({})", self.filename, self.line, self.function)
        }
    }
}

/// The four counters cProfile keeps per function and per caller edge
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CallStats {
    /// Calls that were not recursive
    pub primitive_calls: u64,
    /// All calls including recursive ones
    pub total_calls: u64,
    /// Time spent in the function itself, in seconds
    pub total_time: f64,
    /// Time spent in the function and its callees, in seconds
    pub cumulative_time: f64,
}

impl AddAssign for CallStats {
    fn add_assign(&mut self, other: Self) {
        self.primitive_calls += other.primitive_calls;
        self.total_calls += other.total_calls;
        self.total_time += other.total_time;
        self.cumulative_time += other.cumulative_time;
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FunctionStats {
    pub calls: CallStats,
    pub callers: BTreeMap<FunctionKey, CallStats>,
}

impl FunctionStats {
    fn add(&mut self, other: &FunctionStats) {
        self.calls += other.calls;
        for (caller, calls) in &other.callers {
            *self.callers.entry(caller.clone()).or_default() += *calls;
        }
    }
}

/// A cumulative statistics table, mergeable with other tables
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(into = "PstatsDocument", from = "PstatsDocument")]
pub struct AggregatedStats {
    functions: BTreeMap<FunctionKey, FunctionStats>,
}

impl AggregatedStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accumulate another table into this one
    pub fn add(&mut self, other: &AggregatedStats) {
        for (key, stats) in &other.functions {
            self.functions.entry(key.clone()).or_default().add(stats);
        }
    }

    /// Record calls for one function, optionally attributed to a caller
    pub fn record(&mut self, key: FunctionKey, calls: CallStats, caller: Option<(FunctionKey, CallStats)>) {
        let entry = self.functions.entry(key).or_default();
        entry.calls += calls;
        if let Some((caller, caller_calls)) = caller {
            *entry.callers.entry(caller).or_default() += caller_calls;
        }
    }

    pub fn functions(&self) -> &BTreeMap<FunctionKey, FunctionStats> {
        &self.functions
    }

    pub fn get(&self, key: &FunctionKey) -> Option<&FunctionStats> {
        self.functions.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn total_calls(&self) -> u64 {
        self.functions.values().map(|f| f.calls.total_calls).sum()
    }

    pub fn primitive_calls(&self) -> u64 {
        self.functions.values().map(|f| f.calls.primitive_calls).sum()
    }

    pub fn total_time(&self) -> f64 {
        self.functions.values().map(|f| f.calls.total_time).sum()
    }
}

// On-disk shape of a cProfile payload
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct PstatsDocument {
    #[serde(default)]
    functions: Vec<FunctionRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FunctionRecord {
    #[serde(flatten)]
    key: FunctionKey,
    #[serde(flatten)]
    calls: CallStats,
    #[serde(default)]
    callers: Vec<CallerRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CallerRecord {
    #[serde(flatten)]
    key: FunctionKey,
    #[serde(flatten)]
    calls: CallStats,
}

impl From<AggregatedStats> for PstatsDocument {
    fn from(stats: AggregatedStats) -> Self {
        let functions = stats
            .functions
            .into_iter()
            .map(|(key, stats)| FunctionRecord {
                key,
                calls: stats.calls,
                callers: stats
                    .callers
                    .into_iter()
                    .map(|(key, calls)| CallerRecord { key, calls })
                    .collect(),
            })
            .collect();
        Self { functions }
    }
}

impl From<PstatsDocument> for AggregatedStats {
    fn from(document: PstatsDocument) -> Self {
        let mut stats = AggregatedStats::new();
        for record in document.functions {
            let entry = stats.functions.entry(record.key).or_default();
            entry.calls += record.calls;
            for caller in record.callers {
                *entry.callers.entry(caller.key).or_default() += caller.calls;
            }
        }
        stats
    }
}

/// Keys for ordering per-function stats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum SortKey {
    TotalCalls,
    PrimitiveCalls,
    TotalTime,
    CumulativeTime,
    PerCallTime,
    PerCallCumulativeTime,
    Name,
}

/// Parsed view of one function in an aggregate
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CProfileFunctionStats {
    pub key: FunctionKey,
    pub function_name: String,
    pub primitive_calls: u64,
    pub total_calls: u64,
    pub total_time: f64,
    pub cumulative_time: f64,
    /// `total_time / total_calls`, 0 when never called
    pub per_call_time: f64,
    /// `cumulative_time / primitive_calls`, 0 when never called
    pub per_call_cumulative_time: f64,
    pub callers: Vec<FunctionKey>,
}

impl CProfileFunctionStats {
    fn new(key: &FunctionKey, stats: &FunctionStats) -> Self {
        let calls = stats.calls;
        let per_call_time = if calls.total_calls == 0 {
            0.0
        } else {
            calls.total_time / calls.total_calls as f64
        };
        let per_call_cumulative_time = if calls.primitive_calls == 0 {
            0.0
        } else {
            calls.cumulative_time / calls.primitive_calls as f64
        };

        Self {
            key: key.clone(),
            function_name: key.to_string(),
            primitive_calls: calls.primitive_calls,
            total_calls: calls.total_calls,
            total_time: calls.total_time,
            cumulative_time: calls.cumulative_time,
            per_call_time,
            per_call_cumulative_time,
            callers: stats.callers.keys().cloned().collect(),
        }
    }
}

/// Result of a cProfile interval query
#[derive(Debug, Clone, PartialEq)]
pub struct CProfileStats {
    stats: AggregatedStats,
    function_stats: Vec<CProfileFunctionStats>,
    sources: Vec<PathBuf>,
}

impl CProfileStats {
    pub fn new(stats: AggregatedStats, sources: Vec<PathBuf>) -> Self {
        let function_stats = stats
            .functions()
            .iter()
            .map(|(key, function)| CProfileFunctionStats::new(key, function))
            .collect();
        Self {
            stats,
            function_stats,
            sources,
        }
    }

    /// The merged table
    pub fn stats(&self) -> &AggregatedStats {
        &self.stats
    }

    /// One entry per function, ordered by function identity
    pub fn function_stats(&self) -> &[CProfileFunctionStats] {
        &self.function_stats
    }

    /// Payloads that contributed to the aggregate
    pub fn sources(&self) -> &[PathBuf] {
        &self.sources
    }

    pub fn is_empty(&self) -> bool {
        self.stats.is_empty()
    }

    /// Look up a function by its display name, e.g. `train.py:12(step)`
    pub fn find_function(&self, function_name: &str) -> Option<&CProfileFunctionStats> {
        self.function_stats.iter().find(|f| f.function_name == function_name)
    }

    /// The `n` largest functions by `sort_key` (smallest name first for `SortKey::Name`)
    pub fn top_n(&self, sort_key: SortKey, n: usize) -> Vec<&CProfileFunctionStats> {
        let mut sorted: Vec<&CProfileFunctionStats> = self.function_stats.iter().collect();
        sorted.sort_by(|a, b| {
            let ordering = match sort_key {
                SortKey::TotalCalls => b.total_calls.cmp(&a.total_calls),
                SortKey::PrimitiveCalls => b.primitive_calls.cmp(&a.primitive_calls),
                SortKey::TotalTime => b.total_time.total_cmp(&a.total_time),
                SortKey::CumulativeTime => b.cumulative_time.total_cmp(&a.cumulative_time),
                SortKey::PerCallTime => b.per_call_time.total_cmp(&a.per_call_time),
                SortKey::PerCallCumulativeTime => {
                    b.per_call_cumulative_time.total_cmp(&a.per_call_cumulative_time)
                }
                SortKey::Name => std::cmp::Ordering::Equal,
            };
            ordering.then_with(|| a.function_name.cmp(&b.function_name))
        });
        sorted.truncate(n);
        sorted
    }
}

/// Load and merge the payload of every selected step. Unloadable payloads are skipped.
pub fn aggregate_cprofile_stats(loader: &dyn PayloadLoader, selected: &[StepProfileStats]) -> CProfileStats {
    let mut aggregate = AggregatedStats::new();
    let mut sources = Vec::with_capacity(selected.len());

    for step_stats in selected {
        match loader.load_cprofile(step_stats.stats_path()) {
            Ok(stats) => {
                aggregate.add(&stats);
                sources.push(step_stats.stats_path().to_path_buf());
            }
            Err(e) => warn!("Skipping cProfile stats for step {}: {}", step_stats.step(), e),
        }
    }

    CProfileStats::new(aggregate, sources)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn calls(cc: u64, nc: u64, tt: f64, ct: f64) -> CallStats {
        CallStats {
            primitive_calls: cc,
            total_calls: nc,
            total_time: tt,
            cumulative_time: ct,
        }
    }

    fn table(entries: &[(&str, CallStats)]) -> AggregatedStats {
        let mut stats = AggregatedStats::new();
        for (name, c) in entries {
            stats.record(FunctionKey::new("train.py", 1, *name), *c, None);
        }
        stats
    }

    #[test]
    fn test_add_sums_counters_per_function() {
        let mut a = table(&[("step", calls(1, 1, 0.5, 1.0)), ("forward", calls(2, 3, 0.25, 0.25))]);
        let b = table(&[("step", calls(1, 2, 0.5, 1.0)), ("backward", calls(1, 1, 0.125, 0.125))]);
        a.add(&b);

        let step = a.get(&FunctionKey::new("train.py", 1, "step")).unwrap();
        assert_eq!(step.calls, calls(2, 3, 1.0, 2.0));
        assert_eq!(a.len(), 3);
        assert_eq!(a.total_calls(), 3 + 3 + 1);
        assert_eq!(a.primitive_calls(), 2 + 2 + 1);
    }

    #[test]
    fn test_add_is_order_independent() {
        let a = table(&[("f", calls(1, 1, 0.5, 0.5))]);
        let b = table(&[("f", calls(2, 2, 0.25, 0.75)), ("g", calls(1, 1, 1.0, 1.0))]);

        let mut ab = AggregatedStats::new();
        ab.add(&a);
        ab.add(&b);
        let mut ba = AggregatedStats::new();
        ba.add(&b);
        ba.add(&a);

        assert_eq!(ab, ba);
    }

    #[test]
    fn test_callers_are_merged() {
        let callee = FunctionKey::new("model.py", 10, "matmul");
        let caller = FunctionKey::new("model.py", 3, "forward");
        let mut a = AggregatedStats::new();
        a.record(callee.clone(), calls(1, 1, 0.5, 0.5), Some((caller.clone(), calls(1, 1, 0.5, 0.5))));
        let b = a.clone();
        a.add(&b);

        let merged = a.get(&callee).unwrap();
        assert_eq!(merged.callers[&caller], calls(2, 2, 1.0, 1.0));
    }

    #[test]
    fn test_document_round_trip_and_duplicate_entries() {
        let json = r#"{"functions": [
            {"filename": "~", "line": 0, "function": "<built-in method time.sleep>",
             "primitive_calls": 1, "total_calls": 1, "total_time": 0.5, "cumulative_time": 0.5},
            {"filename": "~", "line": 0, "function": "<built-in method time.sleep>",
             "primitive_calls": 2, "total_calls": 2, "total_time": 0.5, "cumulative_time": 0.5,
             "callers": [{"filename": "a.py", "line": 2, "function": "f",
                          "primitive_calls": 2, "total_calls": 2, "total_time": 0.5, "cumulative_time": 0.5}]}
        ]}"#;
        let stats: AggregatedStats = serde_json::from_str(json).unwrap();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats.total_calls(), 3);

        let reparsed: AggregatedStats = serde_json::from_str(&serde_json::to_string(&stats).unwrap()).unwrap();
        assert_eq!(reparsed, stats);
    }

    #[test]
    fn test_function_stats_view_and_top_n() {
        let mut stats = table(&[("slow", calls(1, 1, 2.0, 2.0)), ("busy", calls(4, 8, 1.0, 3.0))]);
        stats.record(FunctionKey::new("~", 0, "<built-in method len>"), calls(0, 0, 0.0, 0.0), None);
        let result = CProfileStats::new(stats, Vec::new());

        let busy = result.find_function("train.py:1(busy)").unwrap();
        assert_eq!(busy.per_call_time, 0.125);
        assert_eq!(busy.per_call_cumulative_time, 0.75);

        let builtin = result.find_function("<built-in method len>").unwrap();
        assert_eq!(builtin.per_call_time, 0.0);

        let top = result.top_n(SortKey::TotalTime, 2);
        assert_eq!(top[0].function_name, "train.py:1(slow)");
        assert_eq!(top[1].function_name, "train.py:1(busy)");

        let top = result.top_n(SortKey::TotalCalls, 1);
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].function_name, "train.py:1(busy)");
    }

    #[test]
    fn test_sort_key_parses_from_str() {
        assert_eq!("cumulative_time".parse::<SortKey>().unwrap(), SortKey::CumulativeTime);
        assert_eq!(SortKey::PerCallTime.to_string(), "per_call_time");
    }
}
