// Export module for analysis results
// Renders aggregated cProfile stats as JSON, CSV or a Markdown report

use std::fs::{create_dir_all, File};
use std::io::Write;
use std::path::Path;

use strum_macros::{Display, EnumString};

use crate::error::Result;

use super::cprofile::{CProfileStats, SortKey};

/// Output formats for aggregated stats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum ExportFormat {
    Json,
    Csv,
    Markdown,
}

/// Export per-function stats, ordered by `sort_key`
pub fn export_function_stats(stats: &CProfileStats, format: ExportFormat, sort_key: SortKey) -> Result<Vec<u8>> {
    let functions = stats.top_n(sort_key, usize::MAX);

    match format {
        ExportFormat::Json => Ok(serde_json::to_vec_pretty(&functions)?),
        ExportFormat::Csv => {
            let mut writer = csv::Writer::from_writer(Vec::new());
            writer.write_record([
                "function",
                "primitive_calls",
                "total_calls",
                "total_time",
                "per_call_time",
                "cumulative_time",
                "per_call_cumulative_time",
            ])?;
            for function in &functions {
                writer.write_record([
                    function.function_name.clone(),
                    function.primitive_calls.to_string(),
                    function.total_calls.to_string(),
                    format!("{:.6}", function.total_time),
                    format!("{:.6}", function.per_call_time),
                    format!("{:.6}", function.cumulative_time),
                    format!("{:.6}", function.per_call_cumulative_time),
                ])?;
            }
            Ok(writer.into_inner().map_err(|e| e.into_error())?)
        }
        ExportFormat::Markdown => {
            let mut output = Vec::new();

            writeln!(&mut output, "# Python Profile Report\n")?;
            writeln!(&mut output, "## Summary\n")?;
            writeln!(&mut output, "- **Steps aggregated**: {}", stats.sources().len())?;
            writeln!(&mut output, "- **Functions**: {}", functions.len())?;
            writeln!(&mut output, "- **Total calls**: {} ({} primitive)",
                stats.stats().total_calls(), stats.stats().primitive_calls())?;
            writeln!(&mut output, "- **Total time**: {:.3} s", stats.stats().total_time())?;

            writeln!(&mut output, "\n## Functions by {}\n", sort_key)?;
            writeln!(&mut output, "| Function | Calls | Total time (s) | Per call (s) | Cumulative (s) |")?;
            writeln!(&mut output, "|----------|-------|----------------|--------------|----------------|")?;
            for function in &functions {
                let calls = if function.primitive_calls == function.total_calls {
                    function.total_calls.to_string()
                } else {
                    format!("{}/{}", function.total_calls, function.primitive_calls)
                };
                writeln!(&mut output, "| `{}` | {} | {:.6} | {:.6} | {:.6} |",
                    function.function_name, calls, function.total_time,
                    function.per_call_time, function.cumulative_time)?;
            }

            Ok(output)
        }
    }
}

/// Export to a file, creating parent directories as needed
pub fn write_function_stats(stats: &CProfileStats, format: ExportFormat, sort_key: SortKey, output_path: &Path) -> Result<()> {
    if let Some(parent) = output_path.parent() {
        create_dir_all(parent)?;
    }

    let bytes = export_function_stats(stats, format, sort_key)?;
    let mut file = File::create(output_path)?;
    file.write_all(&bytes)?;
    Ok(())
}
