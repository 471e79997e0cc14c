use thiserror::Error;

/// A result type for GP interpolation and hyperparameter calibration
pub type Result<T> = std::result::Result<T, GpError>;

/// An error when building, fitting or calibrating a [`GaussianProcessModel`](crate::GaussianProcessModel)
#[derive(Error, Debug)]
pub enum GpError {
    /// When a configuration section is malformed or missing
    #[error("Configuration error: {0}")]
    ConfigError(String),
    /// When training inputs and outputs do not match or hold non finite values
    #[error("Data shape error: {0}")]
    DataShapeError(String),
    /// When fixed values, bounds or sampler settings are inconsistent
    #[error("Constraint error: {0}")]
    ConstraintError(String),
    /// When the covariance matrix cannot be factorized
    #[error("Numerical error: {0}")]
    NumericalError(String),
    /// When the ensemble sampler keeps rejecting every proposal
    #[error("Sampler divergence: {0}")]
    SamplerDivergence(String),
    /// When linear algebra computation fails
    #[error(transparent)]
    LinalgError(#[from] linfa_linalg::LinalgError),
    /// When reading or writing fails
    #[error("IO error")]
    IoError(#[from] std::io::Error),
    /// When error due to a bad value
    #[error("InvalidValue error: {0}")]
    InvalidValueError(String),
}
