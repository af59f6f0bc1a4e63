// Analysis module
//
// Interval queries over step profile artifacts, the cProfile merge, per-step
// pyinstrument loading, and report export.

mod python_profile;
mod cprofile;
mod pyinstrument;
mod payload;
mod export;

pub use python_profile::{
    AnalysisStrategy, ProfileQueryResult,
    PythonProfileAnalysis, CProfileAnalysis, PyinstrumentAnalysis,
    reader_from_config, reader_from_config_with_store,
    seconds_to_micros, CONVERT_TO_MICROSECS,
};
pub use cprofile::{
    FunctionKey, CallStats, FunctionStats, AggregatedStats,
    CProfileFunctionStats, CProfileStats, SortKey,
    aggregate_cprofile_stats,
};
pub use pyinstrument::{PyinstrumentStats, load_pyinstrument_stats};
pub use payload::{PayloadLoader, JsonPayloadLoader};
pub use export::{ExportFormat, export_function_stats, write_function_stats};
