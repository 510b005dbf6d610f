use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AkfError {
    #[error("initial state could not be built: {0}")]
    Initialization(String),

    #[error("inconsistent observation at position {pos}: residual {residual} with zero variance")]
    Inconsistent { pos: usize, residual: f64 },

    #[error("the diffuse constraints were never collapsed")]
    NotCollapsed,

    #[error("diffuse effects are not identifiable from the data")]
    NotIdentifiable,

    #[error("not enough informative observations: got {nobs}, need more than {nd}")]
    InsufficientData { nobs: usize, nd: usize },

    #[error("dimension mismatch: {0}")]
    DimensionMismatch(String),

    #[error("parameter length mismatch: expected {expected}, got {got}")]
    ParamLengthMismatch { expected: usize, got: usize },

    #[error("non-stationary AR polynomial")]
    NonStationary,

    #[error("non-invertible MA polynomial")]
    NonInvertible,

    #[error("optimization failed: {0}")]
    OptimizationFailed(String),

    #[error("data error: {0}")]
    DataError(String),
}

pub type Result<T> = std::result::Result<T, AkfError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inconsistent_message() {
        let err = AkfError::Inconsistent { pos: 3, residual: 0.5 };
        assert_eq!(
            err.to_string(),
            "inconsistent observation at position 3: residual 0.5 with zero variance"
        );
    }

    #[test]
    fn test_insufficient_data_message() {
        let err = AkfError::InsufficientData { nobs: 2, nd: 2 };
        assert_eq!(
            err.to_string(),
            "not enough informative observations: got 2, need more than 2"
        );
    }

    #[test]
    fn test_error_is_send_and_sync() {
        fn assert_impl<T: Send + Sync + std::error::Error>() {}
        assert_impl::<AkfError>();
    }
}
