use crate::error::BSplineError;
use crate::linalg::utils::{add_ridge_in_place, add_scaled_in_place};
use crate::types::SmoothingMode;
use ndarray::parallel::prelude::*;
use ndarray::{Array2, Axis, s};

/// Resolved regularization term `R` added to `AᵗWA`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Penalty {
    None,
    /// `alpha * I`.
    Ridge { alpha: f64 },
    /// `alpha * Σ_d I ⊗ … ⊗ DₖᵗDₖ ⊗ … ⊗ I`.
    Difference { alpha: f64, order: usize },
}

impl Penalty {
    /// Resolves a smoothing mode. A zero `alpha` with a penalizing mode has no
    /// effect and is treated as `None`.
    pub fn from_mode(
        mode: SmoothingMode,
        alpha: f64,
        order: usize,
    ) -> Result<Self, BSplineError> {
        if !alpha.is_finite() || alpha < 0.0 {
            return Err(BSplineError::InvalidSmoothingParameter(format!(
                "alpha must be finite and non-negative, got {alpha}"
            )));
        }
        match mode {
            SmoothingMode::None => Ok(Self::None),
            SmoothingMode::Identity | SmoothingMode::PSpline if alpha == 0.0 => {
                log::warn!("smoothing mode {mode:?} requested with alpha = 0; fitting without a penalty");
                Ok(Self::None)
            }
            SmoothingMode::Identity => Ok(Self::Ridge { alpha }),
            SmoothingMode::PSpline => {
                if order == 0 {
                    return Err(BSplineError::InvalidSmoothingParameter(
                        "P-spline difference order must be at least 1".to_string(),
                    ));
                }
                Ok(Self::Difference { alpha, order })
            }
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    /// Dense `(N, N)` penalty for a tensor basis with `num_basis[d]` functions
    /// per dimension.
    pub fn matrix(&self, num_basis: &[usize]) -> Result<Array2<f64>, BSplineError> {
        let total: usize = num_basis.iter().product();
        let mut out = Array2::<f64>::zeros((total, total));
        self.add_to(&mut out, num_basis)?;
        Ok(out)
    }

    /// `gram += R`.
    pub fn add_to(&self, gram: &mut Array2<f64>, num_basis: &[usize]) -> Result<(), BSplineError> {
        let total: usize = num_basis.iter().product();
        if gram.dim() != (total, total) {
            return Err(BSplineError::DimensionMismatch(format!(
                "penalty of size {total} cannot be added to a {}x{} system",
                gram.nrows(),
                gram.ncols()
            )));
        }
        match *self {
            Self::None => {}
            Self::Ridge { alpha } => add_ridge_in_place(gram, alpha),
            Self::Difference { alpha, order } => {
                let penalty = tensor_difference_penalty(num_basis, order)?;
                add_scaled_in_place(gram, &penalty, alpha);
            }
        }
        Ok(())
    }
}

/// `(n-k) × n` matrix of k-th order forward differences.
pub fn difference_operator(n: usize, order: usize) -> Result<Array2<f64>, BSplineError> {
    if order == 0 || order >= n {
        return Err(BSplineError::InvalidSmoothingParameter(format!(
            "difference order {order} requires more than {order} coefficients, basis has {n}"
        )));
    }
    let mut d = Array2::<f64>::eye(n);
    for _ in 0..order {
        d = &d.slice(s![1.., ..]) - &d.slice(s![..-1, ..]);
    }
    Ok(d)
}

/// `DₖᵗDₖ` for a single dimension.
pub fn difference_penalty(n: usize, order: usize) -> Result<Array2<f64>, BSplineError> {
    let d = difference_operator(n, order)?;
    Ok(d.t().dot(&d))
}

/// Sum over dimensions of the univariate difference penalty lifted into the
/// tensor basis, using the same column ordering as the design matrix.
pub fn tensor_difference_penalty(
    num_basis: &[usize],
    order: usize,
) -> Result<Array2<f64>, BSplineError> {
    if num_basis.is_empty() {
        return Err(BSplineError::DimensionMismatch(
            "penalty requires at least one dimension".to_string(),
        ));
    }
    let total: usize = num_basis.iter().product();
    let mut sum = Array2::<f64>::zeros((total, total));
    for (dim, &n) in num_basis.iter().enumerate() {
        let marginal = difference_penalty(n, order).map_err(|_| {
            BSplineError::InvalidSmoothingParameter(format!(
                "difference order {order} is too large for dimension {dim} with {n} basis functions"
            ))
        })?;
        let before: usize = num_basis[..dim].iter().product();
        let after: usize = num_basis[dim + 1..].iter().product();
        let lifted = kronecker_product(
            &kronecker_product(&Array2::eye(before), &marginal),
            &Array2::eye(after),
        );
        sum += &lifted;
    }
    Ok(sum)
}

/// Kronecker product `A ⊗ B`.
pub fn kronecker_product(a: &Array2<f64>, b: &Array2<f64>) -> Array2<f64> {
    let (a_rows, a_cols) = a.dim();
    let (b_rows, b_cols) = b.dim();
    let mut result = Array2::zeros((a_rows * b_rows, a_cols * b_cols));
    if result.is_empty() {
        return result;
    }

    result
        .axis_chunks_iter_mut(Axis(0), b_rows)
        .into_par_iter()
        .enumerate()
        .for_each(|(i, mut row_block)| {
            let a_row = a.row(i);
            for (j, mut block) in row_block.axis_chunks_iter_mut(Axis(1), b_cols).into_iter().enumerate() {
                let a_val = a_row[j];
                if a_val == 0.0 {
                    continue;
                }
                block.zip_mut_with(b, |dest, &src| *dest = a_val * src);
            }
        });

    result
}
