pub mod error;
pub mod config;
pub mod reader;
pub mod analysis;
pub mod collection;

// Re-export commonly used types
pub use error::{Error, Result};
pub use config::AnalysisConfig;
pub use reader::{
    StepProfileStats, ProfilerName, PythonStatsReader,
    LocalPythonStatsReader, RemotePythonStatsReader, ObjectStore, LocalObjectStore, S3Uri,
};
pub use analysis::{
    PythonProfileAnalysis, CProfileAnalysis, PyinstrumentAnalysis,
    AnalysisStrategy, ProfileQueryResult, CProfileStats, PyinstrumentStats,
    PayloadLoader, JsonPayloadLoader, ExportFormat, SortKey,
};
pub use collection::{Collection, CollectionKeys, CollectionManager, CollectionScope};
