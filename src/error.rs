use thiserror::Error;
use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("Invalid artifact name: {0}")]
    InvalidArtifactName(String),

    #[error("Invalid regex {pattern:?}: {message}")]
    InvalidRegex { pattern: String, message: String },

    #[error("Collection already exists: {0}")]
    DuplicateCollection(String),

    #[error("Collection not found: {0}")]
    CollectionNotFound(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Invalid S3 URI: {0}")]
    InvalidS3Uri(String),

    #[error("Object store error: {0}")]
    ObjectStore(String),

    #[error("Failed to load stats payload from {0}: {1}")]
    PayloadLoad(PathBuf, String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}
