use thiserror::Error;

/// Error types for the prift library.
#[derive(Error, Debug)]
pub enum PriftError {
    /// Invalid input data or configuration value.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Error indicating a mismatch in array or matrix dimensions.
    #[error("Dimension mismatch: {0}")]
    DimensionMismatch(String),

    /// Every measurement uncertainty in the active window is zero.
    #[error("Degenerate weights: {0}")]
    DegenerateWeights(String),

    /// Error indicating a singular system was encountered.
    #[error("Singular system encountered")]
    SingularSystem,

    /// Error indicating an iterative method failed to converge.
    #[error("Failed to converge: {0}")]
    ConvergenceFailure(String),

    /// Error during computational processing.
    #[error("Computation error: {0}")]
    ComputationError(String),

    /// Computation was cancelled before producing a result.
    #[error("Computation cancelled")]
    Cancelled,

    /// I/O error wrapper.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Malformed state-file content.
    #[error("Parse error: {0}")]
    ParseError(String),

    /// Generic error for cases that don't fit the other categories.
    #[error("Error: {0}")]
    Other(String),
}

/// Result type alias for prift operations.
pub type Result<T> = std::result::Result<T, PriftError>;

/// Extensions for converting from other error types.
impl From<String> for PriftError {
    fn from(s: String) -> Self {
        PriftError::Other(s)
    }
}

impl From<&str> for PriftError {
    fn from(s: &str) -> Self {
        PriftError::Other(s.to_string())
    }
}
