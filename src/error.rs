use thiserror::Error;

/// Error types for the simfit-rs library.
#[derive(Error, Debug)]
pub enum SimFitError {
    /// Error indicating a mismatch in vector or matrix dimensions.
    #[error("Dimension mismatch: {0}")]
    DimensionMismatch(String),

    /// Two measurements cannot be resampled against each other.
    #[error("Incompatible measurement format: {0}")]
    IncompatibleFormat(String),

    /// Error indicating a singular or rank-deficient matrix was encountered.
    #[error("Singular matrix: {0}")]
    SingularMatrix(String),

    /// Error for invalid parameter definitions or values.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Invalid state in the algorithm or a collaborator contract violation.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// I/O error wrapper.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl From<crate::parameters::parameter::ParameterError> for SimFitError {
    fn from(err: crate::parameters::parameter::ParameterError) -> Self {
        SimFitError::InvalidParameter(format!("{}", err))
    }
}

/// Result type alias for simfit-rs operations.
pub type Result<T> = std::result::Result<T, SimFitError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SimFitError::DimensionMismatch("expected 3, got 2".to_string());
        assert!(format!("{}", err).contains("expected 3, got 2"));

        let err = SimFitError::IncompatibleFormat("probe positions differ".to_string());
        assert!(format!("{}", err).contains("probe positions differ"));
    }

    #[test]
    fn test_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: SimFitError = io_err.into();

        match err {
            SimFitError::IoError(_) => (),
            _ => panic!("Expected IoError variant"),
        }
    }
}
