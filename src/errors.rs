use thiserror::Error;

/// A result type for GP regression operations
pub type Result<T> = std::result::Result<T, GpError>;

/// An error when building or using a [`GaussianProcess`](crate::GaussianProcess) model
#[derive(Error, Debug)]
pub enum GpError {
    /// When a component selector name is not in the registry
    #[error("Unknown component: {0}")]
    UnknownComponent(String),
    /// When data or hyperparameter dimensions disagree
    #[error("Dimension mismatch: {0}")]
    DimensionMismatch(String),
    /// When a factorization fails to produce a usable factor.
    /// Recoverable from the optimizer's point of view: the candidate
    /// hyperparameters should be rejected, not the process aborted.
    #[error("Numerical instability: {0}")]
    NumericalInstability(String),
    /// When linear algebra computation fails
    #[error(transparent)]
    LinalgError(#[from] linfa_linalg::LinalgError),
    /// When an error is due to a bad value
    #[error("InvalidValue error: {0}")]
    InvalidValue(String),
}
