use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while configuring, loading or solving an allocation.
///
/// Infeasibility is not an error: it is reported through
/// [`Outcome::Infeasible`](crate::Outcome::Infeasible).
#[derive(Debug, Error)]
pub enum AllocationError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("malformed instance (line {line}): {message}")]
    InstanceFormat { line: usize, message: String },

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("relaxation solve failed: {0}")]
    Relaxation(String),

    #[error("cost matrix row {row} has {found} entries, expected {expected}")]
    RaggedCosts {
        row: usize,
        expected: usize,
        found: usize,
    },

    #[error("cost matrix needs at least one source and one target")]
    EmptyCosts,
}

pub type Result<T> = std::result::Result<T, AllocationError>;
