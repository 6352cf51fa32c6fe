//! Error types for the merge and graph layers.

use std::path::PathBuf;

use crate::identity::GlobalUnitId;

/// Top-level error enum for the library.
///
/// Binaries wrap this in `anyhow`; the library itself never panics on bad
/// input. `UnknownAttribute`, `EdgeNotFound` and `EdgeType` are recoverable
/// by the caller and leave graph state untouched.
#[derive(Debug, thiserror::Error)]
pub enum MergeError {
    #[error("dataset path does not exist or is not a directory: {path}")]
    InputPath { path: PathBuf },

    #[error("alignment failed: {0}")]
    Alignment(String),

    #[error("dataset '{dataset}' is missing required input: {what}")]
    MissingInput { dataset: String, what: String },

    #[error("unknown {kind} attribute '{name}'")]
    UnknownAttribute { kind: &'static str, name: String },

    #[error("no edge between units {a} and {b} (multiplicity key {key:?})")]
    EdgeNotFound {
        a: GlobalUnitId,
        b: GlobalUnitId,
        key: Option<usize>,
    },

    #[error("unknown edge type filter '{0}' (expected one of '+', '-', 'ci', 'main')")]
    EdgeType(String),

    #[error("unit {id} is not in the graph")]
    NodeNotFound { id: GlobalUnitId },

    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    #[error("identity encoding failed: {0}")]
    Identity(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("store error: {0}")]
    Store(String),
}

pub type MergeResult<T> = Result<T, MergeError>;

/// Attaches context to fallible store operations without leaking the zoo of
/// `zarrs` error types into the public API.
pub(crate) trait StoreResultExt<T> {
    fn store_ctx(self, what: &str) -> MergeResult<T>;
}

impl<T, E: std::fmt::Display> StoreResultExt<T> for Result<T, E> {
    fn store_ctx(self, what: &str) -> MergeResult<T> {
        self.map_err(|e| MergeError::Store(format!("{what}: {e}")))
    }
}
