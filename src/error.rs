use crate::linalg::faer_ndarray::FaerLinalgError;
use thiserror::Error;

/// Every failure a fit can surface. Fitting stops at the first one.
#[derive(Error, Debug)]
pub enum BSplineError {
    #[error(
        "Sample domain in dimension {dim} is invalid: [{min}, {max}]. It must be finite with min < max."
    )]
    InvalidDomain { dim: usize, min: f64, max: f64 },

    #[error("Dimension mismatch: {0}")]
    DimensionMismatch(String),

    #[error("Invalid smoothing parameter: {0}")]
    InvalidSmoothingParameter(String),

    #[error(
        "Normal equations of size {size} are singular or too ill-conditioned (reciprocal condition estimate {rcond:.3e}); supply a positive alpha or enable the pseudo-inverse fallback."
    )]
    SingularSystem { size: usize, rcond: f64 },

    #[error(
        "Dimension {dim} has {found} distinct abscissae but a degree {degree} spline needs at least {required}."
    )]
    InsufficientData {
        dim: usize,
        degree: usize,
        required: usize,
        found: usize,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Linear algebra failure: {0}")]
    Linalg(#[from] FaerLinalgError),
}
