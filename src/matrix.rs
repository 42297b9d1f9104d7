use crate::linalg::faer_ndarray::{fast_ata, fast_atv};
use faer::sparse::SparseColMat;
use ndarray::{Array1, Array2, ArrayView1, Axis};

/// Visits every stored `(row, col, value)` of a compressed-column matrix.
#[inline]
fn for_each_stored(matrix: &SparseColMat<usize, f64>, mut visit: impl FnMut(usize, usize, f64)) {
    let (symbolic, values) = matrix.parts();
    let col_ptr = symbolic.col_ptr();
    let row_idx = symbolic.row_idx();
    for (col, bounds) in col_ptr.windows(2).enumerate() {
        for idx in bounds[0]..bounds[1] {
            visit(row_idx[idx], col, values[idx]);
        }
    }
}

#[inline]
fn weight_at(weights: Option<ArrayView1<'_, f64>>, row: usize) -> f64 {
    weights.map_or(1.0, |w| w[row])
}

/// Design matrix in the storage the assembler picked for it.
///
/// Tensor-product B-spline rows carry at most `(p+1)^d` nonzeros, so wide
/// bases are kept in compressed-column form and never densified while
/// forming the normal equations.
#[derive(Clone)]
pub enum DesignMatrix {
    Dense(Array2<f64>),
    Sparse(SparseColMat<usize, f64>),
}

impl DesignMatrix {
    pub fn nrows(&self) -> usize {
        match self {
            Self::Dense(matrix) => matrix.nrows(),
            Self::Sparse(matrix) => matrix.nrows(),
        }
    }

    pub fn ncols(&self) -> usize {
        match self {
            Self::Dense(matrix) => matrix.ncols(),
            Self::Sparse(matrix) => matrix.ncols(),
        }
    }

    pub fn is_sparse(&self) -> bool {
        matches!(self, Self::Sparse(_))
    }

    pub fn to_dense(&self) -> Array2<f64> {
        match self {
            Self::Dense(matrix) => matrix.clone(),
            Self::Sparse(matrix) => {
                let mut out = Array2::<f64>::zeros((matrix.nrows(), matrix.ncols()));
                for_each_stored(matrix, |row, col, v| out[[row, col]] = v);
                out
            }
        }
    }

    pub fn matrix_vector_multiply(&self, vector: &Array1<f64>) -> Array1<f64> {
        match self {
            Self::Dense(matrix) => matrix.dot(vector),
            Self::Sparse(matrix) => {
                let mut output = Array1::<f64>::zeros(matrix.nrows());
                for_each_stored(matrix, |row, col, v| output[row] += v * vector[col]);
                output
            }
        }
    }

    /// `AᵗWy`, with `W = I` when `weights` is `None`.
    pub fn weighted_transpose_vector_multiply(
        &self,
        vector: ArrayView1<'_, f64>,
        weights: Option<ArrayView1<'_, f64>>,
    ) -> Array1<f64> {
        match self {
            Self::Dense(matrix) => match weights {
                Some(w) => fast_atv(matrix, &(&vector * &w)),
                None => fast_atv(matrix, &vector),
            },
            Self::Sparse(matrix) => {
                let mut output = Array1::<f64>::zeros(matrix.ncols());
                for_each_stored(matrix, |row, col, v| {
                    output[col] += v * weight_at(weights, row) * vector[row];
                });
                output
            }
        }
    }

    /// `AᵗWA` as a dense `(N, N)` matrix.
    pub fn weighted_gram(&self, weights: Option<ArrayView1<'_, f64>>) -> Array2<f64> {
        match self {
            Self::Dense(matrix) => match weights {
                Some(w) => {
                    let mut scaled = matrix.clone();
                    for (mut row, &wi) in scaled.axis_iter_mut(Axis(0)).zip(w.iter()) {
                        row *= wi.sqrt();
                    }
                    fast_ata(&scaled)
                }
                None => fast_ata(matrix),
            },
            Self::Sparse(matrix) => {
                let ncols = matrix.ncols();
                let mut gram = Array2::<f64>::zeros((ncols, ncols));
                for (row, entries) in sparse_rows(matrix).into_iter().enumerate() {
                    let w = weight_at(weights, row);
                    if w == 0.0 {
                        continue;
                    }
                    for &(j, vj) in &entries {
                        let wj = w * vj;
                        for &(k, vk) in &entries {
                            gram[[j, k]] += wj * vk;
                        }
                    }
                }
                gram
            }
        }
    }
}

/// Row-wise `(column, value)` lists of a compressed-column matrix.
fn sparse_rows(matrix: &SparseColMat<usize, f64>) -> Vec<Vec<(usize, f64)>> {
    let mut rows: Vec<Vec<(usize, f64)>> = vec![Vec::new(); matrix.nrows()];
    for_each_stored(matrix, |row, col, v| rows[row].push((col, v)));
    rows
}

impl From<Array2<f64>> for DesignMatrix {
    fn from(value: Array2<f64>) -> Self {
        Self::Dense(value)
    }
}

impl From<SparseColMat<usize, f64>> for DesignMatrix {
    fn from(value: SparseColMat<usize, f64>) -> Self {
        Self::Sparse(value)
    }
}
