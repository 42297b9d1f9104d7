use crate::design::assemble_design_matrix;
use crate::error::BSplineError;
use crate::knots::{KnotVector, build_knot_vectors};
use crate::linalg::utils::{KahanSum, symmetrize_in_place};
use crate::model::BSplineModel;
use crate::penalty::Penalty;
use crate::solver::{SolverOptions, solve_normal_equations};
use crate::types::{
    FitConfiguration, KnotSpacing, Sample, SingularFallback, SmoothingMode, default_penalty_order,
    default_rcond_tolerance,
};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};

/// Fluent front end over [`fit_bspline`].
///
/// Degrees are fixed at construction, one per independent variable. Unless a
/// basis count is set, each dimension gets one basis function per distinct
/// sampled abscissa.
#[derive(Debug, Clone)]
pub struct BSplineBuilder {
    degrees: Vec<usize>,
    knot_spacing: KnotSpacing,
    num_basis_functions: Option<Vec<usize>>,
    penalty_order: usize,
    singular_fallback: SingularFallback,
    rcond_tolerance: f64,
}

impl BSplineBuilder {
    /// `degrees[i]` is the spline degree along dimension `i`.
    pub fn new(degrees: Vec<usize>) -> Self {
        Self {
            degrees,
            knot_spacing: KnotSpacing::Equidistant,
            num_basis_functions: None,
            penalty_order: default_penalty_order(),
            singular_fallback: SingularFallback::Fail,
            rcond_tolerance: default_rcond_tolerance(),
        }
    }

    pub fn knot_spacing(mut self, spacing: KnotSpacing) -> Self {
        self.knot_spacing = spacing;
        self
    }

    pub fn num_basis_functions(mut self, counts: Vec<usize>) -> Self {
        self.num_basis_functions = Some(counts);
        self
    }

    pub fn penalty_order(mut self, order: usize) -> Self {
        self.penalty_order = order;
        self
    }

    pub fn singular_fallback(mut self, fallback: SingularFallback) -> Self {
        self.singular_fallback = fallback;
        self
    }

    pub fn rcond_tolerance(mut self, tolerance: f64) -> Self {
        self.rcond_tolerance = tolerance;
        self
    }

    pub fn configuration(&self, smoothing: SmoothingMode, alpha: f64) -> FitConfiguration {
        FitConfiguration {
            degrees: self.degrees.clone(),
            smoothing,
            alpha,
            penalty_order: self.penalty_order,
            knot_spacing: self.knot_spacing,
            num_basis_functions: self.num_basis_functions.clone(),
            singular_fallback: self.singular_fallback,
            rcond_tolerance: self.rcond_tolerance,
        }
    }

    /// Fits to `x` (one row per sample) and `y`.
    pub fn fit(
        &self,
        x: ArrayView2<'_, f64>,
        y: ArrayView1<'_, f64>,
        smoothing: SmoothingMode,
        alpha: f64,
    ) -> Result<BSplineModel, BSplineError> {
        fit_bspline(x, y, None, &self.configuration(smoothing, alpha))
    }

    /// Weighted least squares; `weights` must be finite and non-negative.
    pub fn fit_weighted(
        &self,
        x: ArrayView2<'_, f64>,
        y: ArrayView1<'_, f64>,
        weights: ArrayView1<'_, f64>,
        smoothing: SmoothingMode,
        alpha: f64,
    ) -> Result<BSplineModel, BSplineError> {
        fit_bspline(x, y, Some(weights), &self.configuration(smoothing, alpha))
    }

    pub fn fit_samples(
        &self,
        samples: &[Sample],
        smoothing: SmoothingMode,
        alpha: f64,
    ) -> Result<BSplineModel, BSplineError> {
        let (x, y) = samples_to_arrays(samples, self.degrees.len())?;
        self.fit(x.view(), y.view(), smoothing, alpha)
    }
}

fn samples_to_arrays(
    samples: &[Sample],
    num_dims: usize,
) -> Result<(Array2<f64>, Array1<f64>), BSplineError> {
    let mut flat = Vec::with_capacity(samples.len() * num_dims);
    for (i, sample) in samples.iter().enumerate() {
        if sample.x.len() != num_dims {
            return Err(BSplineError::DimensionMismatch(format!(
                "sample {i} has {} coordinates but {num_dims} dimensions are configured",
                sample.x.len()
            )));
        }
        flat.extend_from_slice(&sample.x);
    }
    let x = Array2::from_shape_vec((samples.len(), num_dims), flat)
        .map_err(|e| BSplineError::DimensionMismatch(e.to_string()))?;
    let y = samples.iter().map(|s| s.y).collect();
    Ok((x, y))
}

fn validate_data(
    x: ArrayView2<'_, f64>,
    y: ArrayView1<'_, f64>,
    weights: Option<ArrayView1<'_, f64>>,
    num_dims: usize,
) -> Result<(), BSplineError> {
    if x.ncols() != num_dims {
        return Err(BSplineError::DimensionMismatch(format!(
            "samples have {} abscissa columns but {num_dims} degrees were configured",
            x.ncols()
        )));
    }
    if x.nrows() != y.len() {
        return Err(BSplineError::DimensionMismatch(format!(
            "{} abscissae but {} observed values",
            x.nrows(),
            y.len()
        )));
    }
    if let Some(i) = y.iter().position(|v| !v.is_finite()) {
        return Err(BSplineError::InvalidInput(format!(
            "observed value {i} is not finite"
        )));
    }
    if let Some(w) = weights {
        if w.len() != y.len() {
            return Err(BSplineError::DimensionMismatch(format!(
                "{} weights for {} samples",
                w.len(),
                y.len()
            )));
        }
        if let Some(i) = w.iter().position(|v| !v.is_finite() || *v < 0.0) {
            return Err(BSplineError::InvalidInput(format!(
                "weight {i} must be finite and non-negative, got {}",
                w[i]
            )));
        }
    }
    Ok(())
}

/// Fits a tensor-product B-spline by penalized least squares:
/// knots, design matrix, `AᵗWA + R`, solve, model. Stops at the first failure.
pub fn fit_bspline(
    x: ArrayView2<'_, f64>,
    y: ArrayView1<'_, f64>,
    weights: Option<ArrayView1<'_, f64>>,
    config: &FitConfiguration,
) -> Result<BSplineModel, BSplineError> {
    config.validate()?;
    validate_data(x, y, weights, config.num_dims())?;
    let penalty = Penalty::from_mode(config.smoothing, config.alpha, config.penalty_order)?;

    let knot_vectors = build_knot_vectors(
        x,
        &config.degrees,
        config.knot_spacing,
        config.num_basis_functions.as_deref(),
    )?;
    let num_basis: Vec<usize> = knot_vectors
        .iter()
        .map(KnotVector::num_basis_functions)
        .collect();
    log::debug!(
        "fitting {} samples in {} dimensions, basis sizes {:?}, penalty {:?}",
        y.len(),
        config.num_dims(),
        num_basis,
        penalty
    );

    let design = assemble_design_matrix(x, &knot_vectors)?;
    let mut lhs = design.weighted_gram(weights);
    let rhs = design.weighted_transpose_vector_multiply(y, weights);
    penalty.add_to(&mut lhs, &num_basis)?;
    symmetrize_in_place(&mut lhs);

    let options = SolverOptions {
        fallback: config.singular_fallback,
        rcond_tolerance: config.rcond_tolerance,
    };
    let coefficients = solve_normal_equations(&lhs, &rhs, &options)?;

    let fitted = design.matrix_vector_multiply(&coefficients);
    let mut rss = KahanSum::default();
    for (f, obs) in fitted.iter().zip(y.iter()) {
        rss.add((obs - f) * (obs - f));
    }
    log::debug!("fit complete: {} coefficients, rss {:.6e}", coefficients.len(), rss.sum());

    BSplineModel::new(knot_vectors, coefficients)
}

fn as_sampled(num_dims: usize, degree: usize) -> BSplineBuilder {
    BSplineBuilder::new(vec![degree; num_dims]).knot_spacing(KnotSpacing::AsSampled)
}

/// Unpenalized fit with one basis function per distinct abscissa, passing
/// through every sample.
pub fn bspline_interpolator(
    x: ArrayView2<'_, f64>,
    y: ArrayView1<'_, f64>,
    degree: usize,
) -> Result<BSplineModel, BSplineError> {
    as_sampled(x.ncols(), degree).fit(x, y, SmoothingMode::None, 0.0)
}

/// Ridge-penalized fit on as-sampled knots.
pub fn bspline_smoother(
    x: ArrayView2<'_, f64>,
    y: ArrayView1<'_, f64>,
    degree: usize,
    alpha: f64,
) -> Result<BSplineModel, BSplineError> {
    as_sampled(x.ncols(), degree).fit(x, y, SmoothingMode::Identity, alpha)
}

/// Second-order difference-penalized fit on as-sampled knots.
pub fn pspline_smoother(
    x: ArrayView2<'_, f64>,
    y: ArrayView1<'_, f64>,
    degree: usize,
    alpha: f64,
) -> Result<BSplineModel, BSplineError> {
    as_sampled(x.ncols(), degree).fit(x, y, SmoothingMode::PSpline, alpha)
}
