use crate::basis::{BasisScratch, evaluate_derivative_nonzero};
use crate::error::BSplineError;
use crate::knots::KnotVector;
use crate::matrix::DesignMatrix;
use faer::sparse::{SparseColMat, Triplet};
use ndarray::parallel::prelude::*;
use ndarray::{Array2, ArrayView1, ArrayView2, Axis};
use rayon::prelude::ParallelSlice;

const PAR_THRESHOLD: usize = 256;
const CHUNK_SIZE: usize = 1024;

/// Flattened tensor-product indexing: the last dimension varies fastest, so
/// column `sum_d idx_d * stride_d` matches `B_0 ⊗ B_1 ⊗ ... ⊗ B_{d-1}`.
#[derive(Debug, Clone)]
pub(crate) struct TensorLayout {
    pub(crate) num_basis: Vec<usize>,
    pub(crate) supports: Vec<usize>,
    pub(crate) strides: Vec<usize>,
    pub(crate) total: usize,
}

impl TensorLayout {
    pub(crate) fn new(knot_vectors: &[KnotVector]) -> Result<Self, BSplineError> {
        if knot_vectors.is_empty() {
            return Err(BSplineError::DimensionMismatch(
                "tensor basis requires at least one dimension".to_string(),
            ));
        }
        let num_basis: Vec<usize> = knot_vectors
            .iter()
            .map(KnotVector::num_basis_functions)
            .collect();
        let supports = knot_vectors.iter().map(|k| k.degree() + 1).collect();
        let mut strides = vec![1usize; num_basis.len()];
        let mut acc = 1usize;
        for i in (0..num_basis.len()).rev() {
            strides[i] = acc;
            acc = acc.checked_mul(num_basis[i]).ok_or_else(|| {
                BSplineError::InvalidConfiguration("tensor basis too large".to_string())
            })?;
        }
        Ok(Self {
            num_basis,
            supports,
            strides,
            total: acc,
        })
    }

    pub(crate) fn nonzeros_per_row(&self) -> usize {
        self.supports.iter().product()
    }
}

/// Per-thread buffers for one tensor row.
pub(crate) struct RowWorkspace {
    scratch: Vec<BasisScratch>,
    values: Vec<Vec<f64>>,
    starts: Vec<usize>,
    indices: Vec<usize>,
}

impl RowWorkspace {
    pub(crate) fn new(knot_vectors: &[KnotVector]) -> Self {
        Self {
            scratch: knot_vectors
                .iter()
                .map(|k| BasisScratch::new(k.degree()))
                .collect(),
            values: knot_vectors
                .iter()
                .map(|k| vec![0.0; k.degree() + 1])
                .collect(),
            starts: vec![0; knot_vectors.len()],
            indices: vec![0; knot_vectors.len()],
        }
    }
}

/// Evaluates the nonzero tensor-product basis entries at `point` and passes
/// each `(column, value)` to `write_entry`.
///
/// Coordinates are clamped to each knot domain first, so design rows and
/// model evaluation see the same basis.
pub(crate) fn fill_tensor_row<F>(
    point: ArrayView1<'_, f64>,
    knot_vectors: &[KnotVector],
    orders: &[usize],
    layout: &TensorLayout,
    ws: &mut RowWorkspace,
    mut write_entry: F,
) where
    F: FnMut(usize, f64),
{
    let dims = knot_vectors.len();
    for dim in 0..dims {
        let knots = &knot_vectors[dim];
        let x = knots.clamp(point[dim]);
        ws.starts[dim] = evaluate_derivative_nonzero(
            x,
            knots,
            orders[dim],
            &mut ws.values[dim],
            &mut ws.scratch[dim],
        );
    }

    ws.indices.fill(0);
    loop {
        let mut product = 1.0f64;
        let mut col = 0usize;
        for dim in 0..dims {
            product *= ws.values[dim][ws.indices[dim]];
            if product == 0.0 {
                break;
            }
            col += (ws.starts[dim] + ws.indices[dim]) * layout.strides[dim];
        }
        if product != 0.0 {
            write_entry(col, product);
        }

        let mut carried = true;
        for dim in (0..dims).rev() {
            ws.indices[dim] += 1;
            if ws.indices[dim] < layout.supports[dim] {
                carried = false;
                break;
            }
            ws.indices[dim] = 0;
        }
        if carried {
            break;
        }
    }
}

/// Sparse storage pays off once fewer than a fifth of each row is populated.
pub fn should_use_sparse_design(num_cols: usize, nonzeros_per_row: usize) -> bool {
    if num_cols == 0 {
        return false;
    }
    let density = nonzeros_per_row as f64 / num_cols as f64;
    density < 0.20 && num_cols > 32
}

fn validate_points(
    points: ArrayView2<'_, f64>,
    knot_vectors: &[KnotVector],
    orders: &[usize],
) -> Result<(), BSplineError> {
    if points.ncols() != knot_vectors.len() {
        return Err(BSplineError::DimensionMismatch(format!(
            "points have {} coordinates but the basis has {} dimensions",
            points.ncols(),
            knot_vectors.len()
        )));
    }
    if orders.len() != knot_vectors.len() {
        return Err(BSplineError::DimensionMismatch(format!(
            "{} derivative orders given for {} dimensions",
            orders.len(),
            knot_vectors.len()
        )));
    }
    Ok(())
}

fn assemble_dense(
    points: ArrayView2<'_, f64>,
    knot_vectors: &[KnotVector],
    orders: &[usize],
    layout: &TensorLayout,
) -> Array2<f64> {
    let nrows = points.nrows();
    let mut design = Array2::<f64>::zeros((nrows, layout.total));

    if nrows >= PAR_THRESHOLD {
        design
            .axis_iter_mut(Axis(0))
            .into_par_iter()
            .enumerate()
            .for_each_init(
                || RowWorkspace::new(knot_vectors),
                |ws, (row_idx, mut row)| {
                    fill_tensor_row(
                        points.row(row_idx),
                        knot_vectors,
                        orders,
                        layout,
                        ws,
                        |col, value| row[col] = value,
                    );
                },
            );
    } else {
        let mut ws = RowWorkspace::new(knot_vectors);
        for (row_idx, mut row) in design.axis_iter_mut(Axis(0)).enumerate() {
            fill_tensor_row(
                points.row(row_idx),
                knot_vectors,
                orders,
                layout,
                &mut ws,
                |col, value| row[col] = value,
            );
        }
    }
    design
}

fn assemble_sparse(
    points: ArrayView2<'_, f64>,
    knot_vectors: &[KnotVector],
    orders: &[usize],
    layout: &TensorLayout,
) -> Result<SparseColMat<usize, f64>, BSplineError> {
    let nrows = points.nrows();
    let per_row = layout.nonzeros_per_row();

    let triplets: Vec<Triplet<usize, usize, f64>> = if nrows >= PAR_THRESHOLD {
        let row_indices: Vec<usize> = (0..nrows).collect();
        let chunks: Vec<Vec<Triplet<usize, usize, f64>>> = row_indices
            .par_chunks(CHUNK_SIZE)
            .map_init(
                || RowWorkspace::new(knot_vectors),
                |ws, chunk| {
                    let mut local = Vec::with_capacity(chunk.len() * per_row);
                    for &row_idx in chunk {
                        fill_tensor_row(
                            points.row(row_idx),
                            knot_vectors,
                            orders,
                            layout,
                            ws,
                            |col, value| local.push(Triplet::new(row_idx, col, value)),
                        );
                    }
                    local
                },
            )
            .collect();
        chunks.into_iter().flatten().collect()
    } else {
        let mut ws = RowWorkspace::new(knot_vectors);
        let mut triplets = Vec::with_capacity(nrows.saturating_mul(per_row));
        for row_idx in 0..nrows {
            fill_tensor_row(
                points.row(row_idx),
                knot_vectors,
                orders,
                layout,
                &mut ws,
                |col, value| triplets.push(Triplet::new(row_idx, col, value)),
            );
        }
        triplets
    };

    SparseColMat::try_new_from_triplets(nrows, layout.total, &triplets)
        .map_err(|err| BSplineError::InvalidInput(format!("sparse design assembly failed: {err:?}")))
}

/// Builds the `n × N` design matrix of basis-function values at `points`
/// (one row per sample, one column per tensor-product basis function).
pub fn assemble_design_matrix(
    points: ArrayView2<'_, f64>,
    knot_vectors: &[KnotVector],
) -> Result<DesignMatrix, BSplineError> {
    let orders = vec![0; knot_vectors.len()];
    assemble_derivative_design_matrix(points, knot_vectors, &orders)
}

/// Design matrix of mixed partial derivatives, `orders[d]` in dimension `d`.
pub fn assemble_derivative_design_matrix(
    points: ArrayView2<'_, f64>,
    knot_vectors: &[KnotVector],
    orders: &[usize],
) -> Result<DesignMatrix, BSplineError> {
    validate_points(points, knot_vectors, orders)?;
    let layout = TensorLayout::new(knot_vectors)?;
    let sparse = should_use_sparse_design(layout.total, layout.nonzeros_per_row());
    log::debug!(
        "assembling {} x {} design ({} nonzeros per row, {} storage)",
        points.nrows(),
        layout.total,
        layout.nonzeros_per_row(),
        if sparse { "sparse" } else { "dense" }
    );
    if sparse {
        Ok(assemble_sparse(points, knot_vectors, orders, &layout)?.into())
    } else {
        Ok(assemble_dense(points, knot_vectors, orders, &layout).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::basis::evaluate_all;
    use approx::assert_abs_diff_eq;
    use ndarray::{Array, array};

    fn uniform(degree: usize, interior: usize) -> KnotVector {
        KnotVector::clamped_uniform(0.0, 1.0, degree, interior).unwrap()
    }

    #[test]
    fn univariate_rows_hold_local_basis_values() {
        let knots = vec![uniform(2, 4)];
        let points = array![[0.0], [0.13], [0.5], [0.77], [1.0]];
        let design = assemble_design_matrix(points.view(), &knots).unwrap().to_dense();
        assert_eq!(design.dim(), (5, 7));
        for (i, point) in points.axis_iter(Axis(0)).enumerate() {
            let expected = evaluate_all(point[0], &knots[0]);
            assert_abs_diff_eq!(design.row(i), expected.view(), epsilon = 1e-14);
            let nnz = design.row(i).iter().filter(|v| **v != 0.0).count();
            assert!(nnz <= 3);
            assert_abs_diff_eq!(design.row(i).sum(), 1.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn tensor_rows_are_kronecker_products() {
        let knots = vec![uniform(1, 2), uniform(2, 1)];
        let points = array![[0.2, 0.9], [0.55, 0.1], [1.0, 0.0]];
        let design = assemble_design_matrix(points.view(), &knots).unwrap().to_dense();
        assert_eq!(design.ncols(), 4 * 4);
        for (i, point) in points.axis_iter(Axis(0)).enumerate() {
            let b0 = evaluate_all(point[0], &knots[0]);
            let b1 = evaluate_all(point[1], &knots[1]);
            for a in 0..b0.len() {
                for b in 0..b1.len() {
                    assert_abs_diff_eq!(design[[i, a * b1.len() + b]], b0[a] * b1[b], epsilon = 1e-14);
                }
            }
        }
    }

    #[test]
    fn out_of_domain_points_are_clamped() {
        let knots = vec![uniform(3, 3)];
        let points = array![[-5.0], [0.0], [1.0], [7.0]];
        let design = assemble_design_matrix(points.view(), &knots).unwrap().to_dense();
        assert_abs_diff_eq!(design.row(0), design.row(1), epsilon = 0.0);
        assert_abs_diff_eq!(design.row(2), design.row(3), epsilon = 0.0);
    }

    #[test]
    fn wide_bases_switch_to_sparse_storage_with_identical_values() {
        let knots = vec![uniform(3, 60)];
        let points = Array::linspace(0.0, 1.0, 300).insert_axis(Axis(1));
        let design = assemble_design_matrix(points.view(), &knots).unwrap();
        assert!(design.is_sparse());

        let layout = TensorLayout::new(&knots).unwrap();
        let dense = assemble_dense(points.view(), &knots, &[0], &layout);
        assert_abs_diff_eq!(design.to_dense(), dense, epsilon = 0.0);
    }

    #[test]
    fn parallel_and_serial_assembly_agree() {
        let knots = vec![uniform(2, 3), uniform(1, 2)];
        let n = 600;
        let points = Array2::from_shape_fn((n, 2), |(i, j)| {
            let t = i as f64 / (n - 1) as f64;
            if j == 0 { t } else { (7.0 * t).fract() }
        });
        let layout = TensorLayout::new(&knots).unwrap();
        let parallel = assemble_dense(points.view(), &knots, &[0, 0], &layout);
        let serial_rows = assemble_dense(points.slice(ndarray::s![..200, ..]), &knots, &[0, 0], &layout);
        assert_abs_diff_eq!(
            parallel.slice(ndarray::s![..200, ..]),
            serial_rows.view(),
            epsilon = 0.0
        );
        let sparse = assemble_sparse(points.view(), &knots, &[0, 0], &layout).unwrap();
        assert_abs_diff_eq!(DesignMatrix::Sparse(sparse).to_dense(), parallel, epsilon = 0.0);
    }

    #[test]
    fn derivative_design_rows_sum_to_zero() {
        let knots = vec![uniform(3, 5)];
        let points = array![[0.1], [0.45], [0.8]];
        let design = assemble_derivative_design_matrix(points.view(), &knots, &[1])
            .unwrap()
            .to_dense();
        for row in design.axis_iter(Axis(0)) {
            assert_abs_diff_eq!(row.sum(), 0.0, epsilon = 1e-10);
        }
    }

    #[test]
    fn dimension_mismatch_is_reported() {
        let knots = vec![uniform(1, 2)];
        let points = array![[0.1, 0.2]];
        assert!(matches!(
            assemble_design_matrix(points.view(), &knots),
            Err(BSplineError::DimensionMismatch(_))
        ));
        assert!(matches!(
            assemble_derivative_design_matrix(array![[0.1]].view(), &knots, &[1, 0]),
            Err(BSplineError::DimensionMismatch(_))
        ));
    }
}
