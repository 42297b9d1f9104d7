use crate::error::BSplineError;
use serde::{Deserialize, Serialize};

/// Regularization selector for a fit.
///
/// `None` solves the plain least-squares problem, `Identity` adds a ridge
/// penalty `alpha * I`, and `PSpline` penalizes finite differences of
/// neighbouring coefficients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SmoothingMode {
    #[default]
    None,
    Identity,
    PSpline,
}

/// Placement policy for interior knots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum KnotSpacing {
    /// Interior knots evenly spaced across `[min, max]` when a basis count
    /// is given; without one, knots are placed as for `AsSampled`.
    #[default]
    Equidistant,
    /// Interior knots at moving averages of the distinct sampled abscissae,
    /// giving one basis function per distinct abscissa.
    AsSampled,
}

/// What the solver does when the normal equations cannot be factored to
/// tolerance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SingularFallback {
    #[default]
    Fail,
    /// Minimum-norm solution from a truncated eigendecomposition.
    PseudoInverse,
}

/// One observation: an abscissa of length `d` and its observed value.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub x: Vec<f64>,
    pub y: f64,
}

impl Sample {
    pub fn new(x: Vec<f64>, y: f64) -> Self {
        Self { x, y }
    }

    pub fn scalar(x: f64, y: f64) -> Self {
        Self { x: vec![x], y }
    }
}

pub fn default_penalty_order() -> usize {
    2
}

pub fn default_rcond_tolerance() -> f64 {
    1e-12
}

/// Everything a fit needs besides the data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitConfiguration {
    /// Spline degree per independent variable; its length fixes the dimension.
    pub degrees: Vec<usize>,
    #[serde(default)]
    pub smoothing: SmoothingMode,
    #[serde(default)]
    pub alpha: f64,
    /// Difference order of the P-spline penalty.
    #[serde(default = "default_penalty_order")]
    pub penalty_order: usize,
    #[serde(default)]
    pub knot_spacing: KnotSpacing,
    /// Basis functions per dimension. `None` uses one per distinct abscissa.
    #[serde(default)]
    pub num_basis_functions: Option<Vec<usize>>,
    #[serde(default)]
    pub singular_fallback: SingularFallback,
    #[serde(default = "default_rcond_tolerance")]
    pub rcond_tolerance: f64,
}

impl FitConfiguration {
    pub fn new(degrees: Vec<usize>) -> Self {
        Self {
            degrees,
            smoothing: SmoothingMode::None,
            alpha: 0.0,
            penalty_order: default_penalty_order(),
            knot_spacing: KnotSpacing::Equidistant,
            num_basis_functions: None,
            singular_fallback: SingularFallback::Fail,
            rcond_tolerance: default_rcond_tolerance(),
        }
    }

    pub fn with_smoothing(mut self, smoothing: SmoothingMode, alpha: f64) -> Self {
        self.smoothing = smoothing;
        self.alpha = alpha;
        self
    }

    pub fn num_dims(&self) -> usize {
        self.degrees.len()
    }

    /// Checks the configuration on its own, before any data is looked at.
    pub fn validate(&self) -> Result<(), BSplineError> {
        if self.degrees.is_empty() {
            return Err(BSplineError::InvalidConfiguration(
                "at least one independent variable (degree entry) is required".to_string(),
            ));
        }
        if !self.alpha.is_finite() || self.alpha < 0.0 {
            return Err(BSplineError::InvalidSmoothingParameter(format!(
                "alpha must be finite and non-negative, got {}",
                self.alpha
            )));
        }
        if self.smoothing == SmoothingMode::PSpline && self.penalty_order == 0 {
            return Err(BSplineError::InvalidSmoothingParameter(
                "P-spline difference order must be at least 1".to_string(),
            ));
        }
        if !self.rcond_tolerance.is_finite() || self.rcond_tolerance < 0.0 {
            return Err(BSplineError::InvalidConfiguration(format!(
                "rcond tolerance must be finite and non-negative, got {}",
                self.rcond_tolerance
            )));
        }
        if let Some(counts) = &self.num_basis_functions {
            if counts.len() != self.degrees.len() {
                return Err(BSplineError::DimensionMismatch(format!(
                    "{} basis-function counts given for {} dimensions",
                    counts.len(),
                    self.degrees.len()
                )));
            }
            for (dim, (&count, &degree)) in counts.iter().zip(&self.degrees).enumerate() {
                if count < degree + 1 {
                    return Err(BSplineError::InvalidConfiguration(format!(
                        "dimension {dim}: {count} basis functions requested but degree {degree} needs at least {}",
                        degree + 1
                    )));
                }
            }
        }
        Ok(())
    }
}
