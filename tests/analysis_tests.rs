use std::fs;
use std::path::Path;

use anyhow::Result;
use serde_json::json;

use trainprof::{
    analysis::{AggregatedStats, CallStats, FunctionKey},
    reader::ArtifactName,
    CProfileAnalysis, LocalObjectStore, LocalPythonStatsReader, ProfileQueryResult, ProfilerName,
    PyinstrumentAnalysis, PythonProfileAnalysis, RemotePythonStatsReader,
};

// Helper to write one artifact under `<root>/<node>/`
fn write_artifact(root: &Path, node: &str, name: ArtifactName, contents: &str) {
    let dir = root.join(node);
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join(name.encode()), contents).unwrap();
}

fn cprofile_name(step: i64, start_s: u64, end_s: u64) -> ArtifactName {
    ArtifactName {
        profiler_name: ProfilerName::CProfile,
        step,
        start_time_us: start_s * 1_000_000,
        end_time_us: end_s * 1_000_000,
    }
}

fn pyinstrument_name(step: i64, start_s: u64, end_s: u64) -> ArtifactName {
    ArtifactName {
        profiler_name: ProfilerName::Pyinstrument,
        ..cprofile_name(step, start_s, end_s)
    }
}

// A pstats table where `step` ran `calls` times for 0.25s each
fn pstats_json(calls: u64) -> String {
    let mut stats = AggregatedStats::new();
    stats.record(
        FunctionKey::new("train.py", 42, "train_step"),
        CallStats {
            primitive_calls: calls,
            total_calls: calls,
            total_time: 0.25 * calls as f64,
            cumulative_time: 0.5 * calls as f64,
        },
        None,
    );
    stats.record(
        FunctionKey::new("~", 0, "<built-in method time.sleep>"),
        CallStats { primitive_calls: 1, total_calls: 1, total_time: 0.125, cumulative_time: 0.125 },
        Some((
            FunctionKey::new("train.py", 42, "train_step"),
            CallStats { primitive_calls: 1, total_calls: 1, total_time: 0.125, cumulative_time: 0.125 },
        )),
    );
    serde_json::to_string(&stats).unwrap()
}

// A profile run with setup profiling, three training steps, and one pyinstrument step
fn populate(root: &Path) {
    write_artifact(root, "worker_0", cprofile_name(-1, 100, 110), &pstats_json(1));
    write_artifact(root, "worker_0", cprofile_name(0, 110, 120), &pstats_json(2));
    write_artifact(root, "worker_0", cprofile_name(1, 120, 130), &pstats_json(3));
    write_artifact(root, "worker_0", cprofile_name(2, 130, 140), &pstats_json(4));
    write_artifact(
        root,
        "worker_0",
        pyinstrument_name(3, 140, 150),
        &json!({"duration": 10.0, "root_frame": {"function": "train", "children": []}}).to_string(),
    );
}

#[test]
fn test_list_and_step_queries() -> Result<()> {
    let dir = tempfile::tempdir()?;
    populate(dir.path());

    let mut analysis = PythonProfileAnalysis::new(LocalPythonStatsReader::new(dir.path()));
    let all = analysis.list_profile_stats()?;
    assert_eq!(all.len(), 5);

    let ProfileQueryResult::Steps(selected) = analysis.fetch_profile_stats_by_step(1, 3)? else {
        panic!("metadata strategy returns steps");
    };
    let steps: Vec<i64> = selected.iter().map(|s| s.step()).collect();
    assert_eq!(steps, vec![1, 2, 3]);
    assert!(selected.iter().all(|s| all.contains(s)));
    Ok(())
}

#[test]
fn test_cprofile_aggregation_over_steps() -> Result<()> {
    let dir = tempfile::tempdir()?;
    populate(dir.path());

    let mut analysis = CProfileAnalysis::new(LocalPythonStatsReader::new(dir.path()));
    let stats = analysis.fetch_profile_stats_by_step(0, 2)?;

    assert_eq!(stats.sources().len(), 3);
    let train_step = stats.find_function("train.py:42(train_step)").unwrap();
    assert_eq!(train_step.total_calls, 2 + 3 + 4);
    assert_eq!(train_step.total_time, 0.25 * 9.0);

    let sleep = stats.find_function("<built-in method time.sleep>").unwrap();
    assert_eq!(sleep.total_calls, 3);
    assert_eq!(sleep.callers, vec![FunctionKey::new("train.py", 42, "train_step")]);
    Ok(())
}

#[test]
fn test_cprofile_aggregation_is_idempotent() -> Result<()> {
    let dir = tempfile::tempdir()?;
    populate(dir.path());

    let mut analysis = CProfileAnalysis::new(LocalPythonStatsReader::new(dir.path()));
    let first = analysis.fetch_profile_stats_by_time(105.0, 135.0)?;
    let second = analysis.fetch_profile_stats_by_time(105.0, 135.0)?;
    assert_eq!(first, second);
    assert_eq!(first.sources().len(), 4);
    Ok(())
}

#[test]
fn test_cprofile_aggregation_over_nothing_is_empty() -> Result<()> {
    let dir = tempfile::tempdir()?;
    populate(dir.path());

    let mut analysis = CProfileAnalysis::new(LocalPythonStatsReader::new(dir.path()));
    let stats = analysis.fetch_profile_stats_by_step(100, 200)?;
    assert!(stats.is_empty());
    assert!(stats.function_stats().is_empty());
    assert_eq!(stats.stats().total_calls(), 0);

    let mut empty = CProfileAnalysis::new(LocalPythonStatsReader::new(dir.path().join("nothing")));
    assert!(empty.fetch_pre_step_zero_profile_stats()?.is_empty());
    Ok(())
}

#[test]
fn test_pre_step_zero_cprofile() -> Result<()> {
    let dir = tempfile::tempdir()?;
    populate(dir.path());

    let mut analysis = CProfileAnalysis::new(LocalPythonStatsReader::new(dir.path()));
    let pre = analysis.fetch_pre_step_zero_profile_stats()?;
    assert_eq!(pre, analysis.fetch_profile_stats_by_step(-1, 0)?);
    assert_eq!(pre.find_function("train.py:42(train_step)").unwrap().total_calls, 3);
    Ok(())
}

#[test]
fn test_corrupt_payload_is_skipped() -> Result<()> {
    let dir = tempfile::tempdir()?;
    populate(dir.path());
    write_artifact(dir.path(), "worker_0", cprofile_name(5, 150, 160), "not json");

    let mut analysis = CProfileAnalysis::new(LocalPythonStatsReader::new(dir.path()));
    let stats = analysis.fetch_profile_stats_by_step(2, 5)?;
    assert_eq!(stats.sources().len(), 1);
    assert_eq!(stats.find_function("train.py:42(train_step)").unwrap().total_calls, 4);
    Ok(())
}

#[test]
fn test_pyinstrument_returns_one_document_per_step() -> Result<()> {
    let dir = tempfile::tempdir()?;
    populate(dir.path());
    write_artifact(
        dir.path(),
        "worker_0",
        pyinstrument_name(4, 150, 160),
        &json!({"duration": 5.0, "root_frame": {"function": "eval"}}).to_string(),
    );

    let mut analysis = PyinstrumentAnalysis::new(LocalPythonStatsReader::new(dir.path()));
    let stats = analysis.fetch_profile_stats_by_step(0, 10)?;

    assert_eq!(stats.len(), 2);
    assert_eq!(stats[0].step(), 3);
    assert_eq!(stats[0].duration(), Some(10.0));
    assert_eq!(stats[1].root_frame().unwrap()["function"], "eval");

    let by_time = analysis.fetch_profile_stats_by_time(155.0, 200.0)?;
    assert_eq!(by_time.len(), 1);
    assert_eq!(by_time[0].step(), 4);
    Ok(())
}

#[test]
fn test_new_artifacts_are_seen_by_later_queries() -> Result<()> {
    let dir = tempfile::tempdir()?;
    populate(dir.path());

    let mut before = PythonProfileAnalysis::new(LocalPythonStatsReader::new(dir.path()));
    let listed_before = before.list_profile_stats()?;

    write_artifact(dir.path(), "worker_0", cprofile_name(3, 140, 150), &pstats_json(1));

    let mut after = PythonProfileAnalysis::new(LocalPythonStatsReader::new(dir.path()));
    let listed_after = after.list_profile_stats()?;
    assert_eq!(listed_after.len(), listed_before.len() + 1);
    assert_eq!(before.list_profile_stats()?, listed_after);
    Ok(())
}

#[test]
fn test_remote_reader_mirrors_then_scans() -> Result<()> {
    let bucket = tempfile::tempdir()?;
    let staging = tempfile::tempdir()?;
    populate(&bucket.path().join("job-1/python_stats"));

    let reader = RemotePythonStatsReader::new(
        staging.path(),
        "job-1/python_stats",
        LocalObjectStore::new(bucket.path()),
    );
    let mut analysis = CProfileAnalysis::new(reader);
    let stats = analysis.fetch_profile_stats_by_step(-1, 10)?;

    assert_eq!(stats.sources().len(), 4);
    assert!(staging.path().join("worker_0").join(cprofile_name(2, 130, 140).encode()).exists());
    Ok(())
}
