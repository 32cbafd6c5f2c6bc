use thiserror::Error;

/// Root error type for motif construction, sampling and search.
///
/// Slow convergence is never an error: searches always terminate with the
/// best result found so far.
#[derive(Error, Debug)]
pub enum MotifError {
    /// Bad topology, sub-type, activation/aggregation list, parameter count,
    /// or a supplied parameter outside its signed box.
    #[error("invalid motif spec: {0}")]
    InvalidMotifSpec(String),

    /// Unknown norm/compute name, malformed grid, empty pool, channel mismatch.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Persistence layer I/O failure.
    #[cfg(feature = "std")]
    #[error("storage error: {0}")]
    Storage(#[from] std::io::Error),

    /// Artifact payload could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl MotifError {
    pub(crate) fn spec(msg: impl Into<String>) -> Self {
        MotifError::InvalidMotifSpec(msg.into())
    }

    pub(crate) fn arg(msg: impl Into<String>) -> Self {
        MotifError::InvalidArgument(msg.into())
    }
}

pub type MotifResult<T> = Result<T, MotifError>;
