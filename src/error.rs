use thiserror::Error;

/// Errors surfaced by the retrieval engine.
///
/// `Validation` and `Configuration` are raised before any I/O and are always
/// fatal to the request. `BundleInconsistency` indicates a corrupt or
/// mismatched dataset and is never silently repaired. An empty result set is
/// not an error anywhere in this crate.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error(
        "bundle inconsistency for {repository}::{branch}: {missing} id(s) referenced by the \
         dependency graph are absent from the loaded bundle (sample: {sample:?})"
    )]
    BundleInconsistency {
        repository: String,
        branch: String,
        missing: usize,
        sample: Vec<String>,
    },

    #[error("index error: {0}")]
    Index(String),

    #[error("request cancelled")]
    Cancelled,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl EngineError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn index(msg: impl Into<String>) -> Self {
        Self::Index(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
