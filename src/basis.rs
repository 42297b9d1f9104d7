//! B-spline basis evaluation.
//!
//! Only the `degree + 1` functions that are nonzero on the knot span
//! containing `x` are ever computed. Callers receive them in a small buffer
//! together with the global index of the first one.

use crate::knots::KnotVector;
use ndarray::Array1;

/// Reusable buffers for span-local evaluation. One per thread.
#[derive(Clone, Debug)]
pub struct BasisScratch {
    left: Vec<f64>,
    right: Vec<f64>,
    lower: Vec<f64>,
    next: Vec<f64>,
}

impl BasisScratch {
    pub fn new(degree: usize) -> Self {
        let len = degree + 1;
        Self {
            left: vec![0.0; len],
            right: vec![0.0; len],
            lower: vec![0.0; len],
            next: vec![0.0; len],
        }
    }

    #[inline]
    fn ensure_degree(&mut self, degree: usize) {
        let len = degree + 1;
        if self.left.len() < len {
            self.left.resize(len, 0.0);
            self.right.resize(len, 0.0);
            self.lower.resize(len, 0.0);
            self.next.resize(len, 0.0);
        }
    }
}

/// Index `mu` of the knot span `[t_mu, t_{mu+1})` used to evaluate at `x`.
///
/// Binary search over the breakpoints. Points left of the domain use the
/// first non-empty span, points at or right of the right boundary use the
/// last one, so the result always lies in `degree..num_basis`.
#[inline]
pub fn find_span(knots: &[f64], degree: usize, x: f64) -> usize {
    let num_basis = knots.len() - degree - 1;
    if x.is_nan() || x < knots[degree] {
        return degree;
    }
    if x >= knots[num_basis] {
        return num_basis - 1;
    }
    knots[..=num_basis].partition_point(|&t| t <= x) - 1
}

/// Cox–de Boor triangle (Piegl & Tiller A2.2) for the degree-`q` functions
/// nonzero on span `mu`: `out[j] = B_{mu-q+j, q}(x)`.
#[inline]
fn cox_de_boor_on_span(
    x: f64,
    q: usize,
    knots: &[f64],
    mu: usize,
    out: &mut [f64],
    left: &mut [f64],
    right: &mut [f64],
) {
    out[0] = 1.0;
    for d in 1..=q {
        left[d] = x - knots[mu + 1 - d];
        right[d] = knots[mu + d] - x;
        let mut saved = 0.0;
        for r in 0..d {
            // A zero-length support contributes nothing.
            let den = right[r + 1] + left[d - r];
            let temp = if den > 0.0 { out[r] / den } else { 0.0 };
            out[r] = saved + right[r + 1] * temp;
            saved = left[d - r] * temp;
        }
        out[d] = saved;
    }
}

/// Writes the `degree + 1` basis values that can be nonzero at `x` into
/// `values` and returns the index of the first one.
///
/// `x` is not clamped; outside the domain the boundary polynomial piece is
/// evaluated.
#[inline]
pub fn evaluate_nonzero(
    x: f64,
    knots: &KnotVector,
    values: &mut [f64],
    scratch: &mut BasisScratch,
) -> usize {
    let degree = knots.degree();
    let t = knots.as_slice();
    debug_assert_eq!(values.len(), degree + 1);
    scratch.ensure_degree(degree);
    let mu = find_span(t, degree, x);
    cox_de_boor_on_span(
        x,
        degree,
        t,
        mu,
        values,
        &mut scratch.left,
        &mut scratch.right,
    );
    mu - degree
}

/// Like [`evaluate_nonzero`] but for the `order`-th derivative.
///
/// Starts from the degree `p - order` values on the same span and applies
/// `B'_{i,q} = q (B_{i,q-1} / (t_{i+q} - t_i) - B_{i+1,q-1} / (t_{i+q+1} - t_{i+1}))`
/// once per order. Orders above the degree give zeros.
pub fn evaluate_derivative_nonzero(
    x: f64,
    knots: &KnotVector,
    order: usize,
    values: &mut [f64],
    scratch: &mut BasisScratch,
) -> usize {
    if order == 0 {
        return evaluate_nonzero(x, knots, values, scratch);
    }
    let degree = knots.degree();
    let t = knots.as_slice();
    debug_assert_eq!(values.len(), degree + 1);
    scratch.ensure_degree(degree);
    let mu = find_span(t, degree, x);
    if order > degree {
        values.fill(0.0);
        return mu - degree;
    }

    let base = degree - order;
    let BasisScratch {
        left,
        right,
        lower,
        next,
    } = scratch;
    cox_de_boor_on_span(x, base, t, mu, &mut lower[..=base], left, right);

    for q in (base + 1)..=degree {
        // `lower[j]` holds the (q-1)-degree quantity for function `mu - q + 1 + j`.
        let qf = q as f64;
        for j in 0..=q {
            let i = mu - q + j;
            let left_val = if j >= 1 { lower[j - 1] } else { 0.0 };
            let right_val = if j < q { lower[j] } else { 0.0 };
            let den_left = t[i + q] - t[i];
            let den_right = t[i + q + 1] - t[i + 1];
            let left_term = if den_left > 0.0 { left_val / den_left } else { 0.0 };
            let right_term = if den_right > 0.0 {
                right_val / den_right
            } else {
                0.0
            };
            next[j] = qf * (left_term - right_term);
        }
        std::mem::swap(lower, next);
    }

    values.copy_from_slice(&lower[..=degree]);
    mu - degree
}

/// All basis functions at `x` as a dense vector. Intended for small bases.
pub fn evaluate_all(x: f64, knots: &KnotVector) -> Array1<f64> {
    evaluate_all_derivative(x, knots, 0)
}

/// All `order`-th basis derivatives at `x` as a dense vector.
pub fn evaluate_all_derivative(x: f64, knots: &KnotVector, order: usize) -> Array1<f64> {
    let degree = knots.degree();
    let mut out = Array1::zeros(knots.num_basis_functions());
    let mut values = vec![0.0; degree + 1];
    let mut scratch = BasisScratch::new(degree);
    let start = evaluate_derivative_nonzero(x, knots, order, &mut values, &mut scratch);
    for (offset, &v) in values.iter().enumerate() {
        out[start + offset] = v;
    }
    out
}
