use crate::design::{RowWorkspace, TensorLayout, fill_tensor_row};
use crate::error::BSplineError;
use crate::knots::KnotVector;
use crate::linalg::utils::{KahanSum, quadratic_form};
use crate::penalty::tensor_difference_penalty;
use ndarray::parallel::prelude::*;
use ndarray::{Array1, ArrayView1, ArrayView2, Axis};

const PAR_EVAL_THRESHOLD: usize = 256;

/// A fitted tensor-product B-spline.
///
/// Immutable once built; safe to share across threads for concurrent
/// evaluation.
#[derive(Debug, Clone)]
pub struct BSplineModel {
    knot_vectors: Vec<KnotVector>,
    coefficients: Array1<f64>,
    layout: TensorLayout,
}

impl BSplineModel {
    pub(crate) fn new(
        knot_vectors: Vec<KnotVector>,
        coefficients: Array1<f64>,
    ) -> Result<Self, BSplineError> {
        let layout = TensorLayout::new(&knot_vectors)?;
        if coefficients.len() != layout.total {
            return Err(BSplineError::DimensionMismatch(format!(
                "{} coefficients for a tensor basis of size {}",
                coefficients.len(),
                layout.total
            )));
        }
        Ok(Self {
            knot_vectors,
            coefficients,
            layout,
        })
    }

    pub fn num_dims(&self) -> usize {
        self.knot_vectors.len()
    }

    pub fn degrees(&self) -> Vec<usize> {
        self.knot_vectors.iter().map(KnotVector::degree).collect()
    }

    pub fn knot_vectors(&self) -> &[KnotVector] {
        &self.knot_vectors
    }

    pub fn coefficients(&self) -> ArrayView1<'_, f64> {
        self.coefficients.view()
    }

    /// Basis functions per dimension; their product is the coefficient count.
    pub fn num_basis_functions(&self) -> &[usize] {
        &self.layout.num_basis
    }

    /// Per-dimension `(min, max)` of the knot domain.
    pub fn domain(&self) -> Vec<(f64, f64)> {
        self.knot_vectors.iter().map(KnotVector::domain).collect()
    }

    fn check_point(&self, len: usize) -> Result<(), BSplineError> {
        if len != self.num_dims() {
            return Err(BSplineError::DimensionMismatch(format!(
                "point has {len} coordinates but the model has {} dimensions",
                self.num_dims()
            )));
        }
        Ok(())
    }

    fn evaluate_with(
        &self,
        point: ArrayView1<'_, f64>,
        orders: &[usize],
        ws: &mut RowWorkspace,
    ) -> f64 {
        if point.iter().any(|v| v.is_nan()) {
            return f64::NAN;
        }
        let mut acc = KahanSum::default();
        fill_tensor_row(
            point,
            &self.knot_vectors,
            orders,
            &self.layout,
            ws,
            |col, value| acc.add(value * self.coefficients[col]),
        );
        acc.sum()
    }

    /// Value at `x`. Coordinates outside the knot domain are clamped to it.
    pub fn evaluate(&self, x: &[f64]) -> Result<f64, BSplineError> {
        let orders = vec![0; self.num_dims()];
        self.derivative(x, &orders)
    }

    /// Shorthand for univariate models.
    pub fn evaluate_scalar(&self, x: f64) -> Result<f64, BSplineError> {
        self.evaluate(&[x])
    }

    /// Values at each row of `points`.
    pub fn evaluate_many(&self, points: ArrayView2<'_, f64>) -> Result<Array1<f64>, BSplineError> {
        self.check_point(points.ncols())?;
        let orders = vec![0; self.num_dims()];
        let values: Vec<f64> = if points.nrows() >= PAR_EVAL_THRESHOLD {
            points
                .axis_iter(Axis(0))
                .into_par_iter()
                .map_init(
                    || RowWorkspace::new(&self.knot_vectors),
                    |ws, row| self.evaluate_with(row, &orders, ws),
                )
                .collect()
        } else {
            let mut ws = RowWorkspace::new(&self.knot_vectors);
            points
                .axis_iter(Axis(0))
                .map(|row| self.evaluate_with(row, &orders, &mut ws))
                .collect()
        };
        Ok(Array1::from_vec(values))
    }

    /// Mixed partial derivative with `orders[d]` derivatives in dimension `d`,
    /// taken at the clamped point. Orders above a dimension's degree give zero.
    pub fn derivative(&self, x: &[f64], orders: &[usize]) -> Result<f64, BSplineError> {
        self.check_point(x.len())?;
        if orders.len() != self.num_dims() {
            return Err(BSplineError::DimensionMismatch(format!(
                "{} derivative orders given for {} dimensions",
                orders.len(),
                self.num_dims()
            )));
        }
        let mut ws = RowWorkspace::new(&self.knot_vectors);
        Ok(self.evaluate_with(ArrayView1::from(x), orders, &mut ws))
    }

    /// First partial derivatives at `x`, one per dimension.
    pub fn gradient(&self, x: &[f64]) -> Result<Array1<f64>, BSplineError> {
        self.check_point(x.len())?;
        let dims = self.num_dims();
        let mut ws = RowWorkspace::new(&self.knot_vectors);
        let mut orders = vec![0; dims];
        let mut grad = Array1::<f64>::zeros(dims);
        for dim in 0..dims {
            orders[dim] = 1;
            grad[dim] = self.evaluate_with(ArrayView1::from(x), &orders, &mut ws);
            orders[dim] = 0;
        }
        Ok(grad)
    }

    /// `cᵗ P c` for the tensor difference penalty of the given order; in one
    /// dimension the sum of squared `order`-th coefficient differences.
    pub fn roughness(&self, order: usize) -> Result<f64, BSplineError> {
        let penalty = tensor_difference_penalty(&self.layout.num_basis, order)?;
        Ok(quadratic_form(&penalty, &self.coefficients))
    }
}
