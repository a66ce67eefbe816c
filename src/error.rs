//! Error types shared by every component of the crate.

use thiserror::Error;

use crate::graph::CellId;

/// The result type used across the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can go wrong while building, evaluating or training a
/// network.
///
/// None of these are transient: evaluating the same graph with the same
/// inputs reproduces them, so callers should not retry.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum Error {
    /// A vector or matrix did not have the expected length.
    #[error("size mismatch for {what}: got {got}, expected {expected}")]
    Shape {
        what: &'static str,
        got: usize,
        expected: usize,
    },

    /// Operations were called out of order, e.g. `backward` without a
    /// preceding `forward`.
    #[error("sequencing error: {0}")]
    Sequencing(String),

    /// The connection would close a cycle through a non-recurrent cell.
    #[error("connecting {from} -> {to} would create a cycle")]
    Cycle { from: CellId, to: CellId },

    /// The operation is not allowed in the current lifecycle state.
    #[error("invalid state: {0}")]
    State(String),

    /// The id does not belong to this graph.
    #[error("unknown cell {0}")]
    UnknownCell(CellId),

    /// Invalid training or topology configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The worker pool could not be created.
    #[error("failed to build worker pool: {0}")]
    Pool(String),
}

impl From<rayon::ThreadPoolBuildError> for Error {
    fn from(err: rayon::ThreadPoolBuildError) -> Self {
        Error::Pool(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Config(err.to_string())
    }
}

/// Returns a `Shape` error unless `got == expected`.
pub(crate) fn check_len(what: &'static str, got: usize, expected: usize) -> Result<()> {
    if got == expected {
        Ok(())
    } else {
        Err(Error::Shape {
            what,
            got,
            expected,
        })
    }
}
