use crate::error::BSplineError;
use crate::linalg::faer_ndarray::{FaerCholesky, FaerEigh};
use crate::types::{SingularFallback, default_rcond_tolerance};
use faer::Side;
use ndarray::{Array1, Array2, Axis};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolverOptions {
    pub fallback: SingularFallback,
    /// Systems whose reciprocal condition estimate falls below this are singular.
    pub rcond_tolerance: f64,
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            fallback: SingularFallback::Fail,
            rcond_tolerance: default_rcond_tolerance(),
        }
    }
}

/// Reciprocal condition estimate of `LLᵗ` from the diagonal of `L`.
///
/// `κ(LLᵗ) >= (max Lᵢᵢ / min Lᵢᵢ)²`, so this overestimates the true
/// reciprocal condition number and only flags systems that are certainly bad.
fn rcond_from_factor_diag(diag: &Array1<f64>) -> f64 {
    let mut min = f64::INFINITY;
    let mut max = 0.0_f64;
    for &v in diag.iter() {
        let v = v.abs();
        min = min.min(v);
        max = max.max(v);
    }
    if max == 0.0 || !min.is_finite() {
        return 0.0;
    }
    let ratio = min / max;
    ratio * ratio
}

/// Solves the symmetric positive (semi-)definite system `lhs · c = rhs`.
///
/// Cholesky is tried first. A failed factorization or a reciprocal condition
/// estimate below `options.rcond_tolerance` is reported as
/// [`BSplineError::SingularSystem`] unless the pseudo-inverse fallback is on.
pub fn solve_normal_equations(
    lhs: &Array2<f64>,
    rhs: &Array1<f64>,
    options: &SolverOptions,
) -> Result<Array1<f64>, BSplineError> {
    let n = lhs.nrows();
    if lhs.ncols() != n || rhs.len() != n {
        return Err(BSplineError::DimensionMismatch(format!(
            "system matrix is {}x{} but right-hand side has length {}",
            lhs.nrows(),
            lhs.ncols(),
            rhs.len()
        )));
    }
    if lhs.iter().chain(rhs.iter()).any(|v| !v.is_finite()) {
        return Err(BSplineError::InvalidInput(
            "normal equations contain non-finite entries".to_string(),
        ));
    }

    let rcond = match lhs.cholesky(Side::Lower) {
        Ok(factor) => {
            let rcond = rcond_from_factor_diag(&factor.diag());
            if rcond >= options.rcond_tolerance {
                log::debug!("cholesky solve of size {n}, rcond estimate {rcond:.3e}");
                return Ok(factor.solve_vec(rhs));
            }
            rcond
        }
        Err(err) => {
            log::debug!("cholesky of size {n} failed: {err}");
            0.0
        }
    };

    match options.fallback {
        SingularFallback::Fail => Err(BSplineError::SingularSystem { size: n, rcond }),
        SingularFallback::PseudoInverse => {
            log::warn!(
                "normal equations of size {n} are singular (rcond estimate {rcond:.3e}); using the minimum-norm solution"
            );
            pseudo_inverse_solve(lhs, rhs, options.rcond_tolerance)
        }
    }
}

/// Minimum-norm solution from the eigendecomposition, discarding eigenvalues
/// below `tolerance * λ_max`.
fn pseudo_inverse_solve(
    lhs: &Array2<f64>,
    rhs: &Array1<f64>,
    tolerance: f64,
) -> Result<Array1<f64>, BSplineError> {
    let n = lhs.nrows();
    let (eigenvalues, eigenvectors) = lhs.eigh(Side::Lower)?;
    let lambda_max = eigenvalues.iter().fold(0.0_f64, |acc, &v| acc.max(v.abs()));
    let cutoff = lambda_max * tolerance.max(n as f64 * f64::EPSILON);

    let mut solution = Array1::<f64>::zeros(n);
    let mut kept = 0usize;
    for (lambda, u) in eigenvalues.iter().zip(eigenvectors.axis_iter(Axis(1))) {
        if *lambda <= cutoff {
            continue;
        }
        kept += 1;
        solution.scaled_add(u.dot(rhs) / lambda, &u);
    }
    log::debug!("pseudo-inverse kept {kept} of {n} eigenpairs");
    Ok(solution)
}
