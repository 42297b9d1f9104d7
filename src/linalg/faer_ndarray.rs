//! Bridge between `ndarray` storage and `faer` kernels.
//!
//! Fitting code holds its matrices as `ndarray` arrays; factorizations and
//! large products are delegated to `faer` through borrowed views.

use faer::diag::DiagRef;
use faer::linalg::matmul::matmul;
use faer::linalg::solvers::{self, Solve};
use faer::{Accum, Mat, MatMut, MatRef, Par, Side, get_global_parallelism};
use ndarray::{Array1, Array2, ArrayBase, Axis, Data, Ix1, Ix2};
use std::marker::PhantomData;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FaerLinalgError {
    #[error("Self-adjoint eigendecomposition failed: {0:?}")]
    SelfAdjointEigen(solvers::EvdError),
    #[error("Cholesky factorization failed: {0:?}")]
    Cholesky(solvers::LltError),
}

/// Products below this many multiply-adds stay on `ndarray::dot`.
const GEMM_MIN_WORK: usize = 64 * 64;
const GEMM_MIN_DIM: usize = 32;

#[inline]
fn prefers_gemm(m: usize, n: usize, k: usize) -> bool {
    (m >= GEMM_MIN_DIM || n >= GEMM_MIN_DIM || k >= GEMM_MIN_DIM)
        && m.saturating_mul(n).saturating_mul(k) >= GEMM_MIN_WORK
}

#[inline]
fn gemm_parallelism(rows: usize, cols: usize) -> Par {
    if rows.min(cols) < 128 {
        Par::Seq
    } else {
        get_global_parallelism()
    }
}

/// Borrowed `faer` view of an ndarray matrix or column vector.
///
/// Arrays whose strides faer cannot address directly (zero or negative) are
/// copied into an owned standard-layout buffer held by the view.
pub struct FaerView<'a> {
    ptr: *const f64,
    rows: usize,
    cols: usize,
    row_stride: isize,
    col_stride: isize,
    _copy: Option<Array2<f64>>,
    _borrow: PhantomData<&'a f64>,
}

impl<'a> FaerView<'a> {
    pub fn matrix<S: Data<Elem = f64>>(array: &'a ArrayBase<S, Ix2>) -> Self {
        let strides = array.strides();
        if strides[0] > 0 && strides[1] > 0 {
            let (rows, cols) = array.dim();
            return Self {
                ptr: array.as_ptr(),
                rows,
                cols,
                row_stride: strides[0],
                col_stride: strides[1],
                _copy: None,
                _borrow: PhantomData,
            };
        }
        Self::copied(array.to_owned())
    }

    pub fn column<S: Data<Elem = f64>>(vector: &'a ArrayBase<S, Ix1>) -> Self {
        let stride = vector.strides()[0];
        if stride > 0 {
            return Self {
                ptr: vector.as_ptr(),
                rows: vector.len(),
                cols: 1,
                row_stride: stride,
                col_stride: 1,
                _copy: None,
                _borrow: PhantomData,
            };
        }
        Self::copied(vector.to_owned().insert_axis(Axis(1)))
    }

    fn copied(owned: Array2<f64>) -> Self {
        // Moving the array keeps its heap buffer in place, so `ptr` stays valid.
        let (rows, cols) = owned.dim();
        let strides = owned.strides();
        Self {
            ptr: owned.as_ptr(),
            rows,
            cols,
            row_stride: strides[0],
            col_stride: strides[1],
            _copy: Some(owned),
            _borrow: PhantomData,
        }
    }

    #[inline]
    pub fn as_ref(&self) -> MatRef<'_, f64> {
        // SAFETY: pointer, shape and strides describe either an array borrowed
        // for 'a or the buffer owned by `_copy`.
        unsafe {
            MatRef::from_raw_parts(
                self.ptr,
                self.rows,
                self.cols,
                self.row_stride,
                self.col_stride,
            )
        }
    }
}

fn column_mut(array: &mut Array1<f64>) -> MatMut<'_, f64> {
    let len = array.len();
    let stride = array.strides()[0];
    // SAFETY: the view mutably borrows `array` for its whole lifetime.
    unsafe { MatMut::from_raw_parts_mut(array.as_mut_ptr(), len, 1, stride, 1) }
}

fn mat_to_array(mat: MatRef<'_, f64>) -> Array2<f64> {
    Array2::from_shape_fn((mat.nrows(), mat.ncols()), |(i, j)| mat[(i, j)])
}

fn diag_to_array(diag: DiagRef<'_, f64>) -> Array1<f64> {
    let col = diag.column_vector();
    Array1::from_shape_fn(col.nrows(), |i| col[i])
}

/// `AᵗA` for a dense `(n, p)` matrix.
pub fn fast_ata<S: Data<Elem = f64>>(a: &ArrayBase<S, Ix2>) -> Array2<f64> {
    let (n, p) = a.dim();
    if !prefers_gemm(p, p, n) {
        return a.t().dot(a);
    }
    let view = FaerView::matrix(a);
    let a_ref = view.as_ref();
    let mut gram = Mat::<f64>::zeros(p, p);
    matmul(
        gram.as_mut(),
        Accum::Replace,
        a_ref.transpose(),
        a_ref,
        1.0,
        gemm_parallelism(n, p),
    );
    mat_to_array(gram.as_ref())
}

/// `Aᵗv` for a dense `(n, p)` matrix and a length-`n` vector.
pub fn fast_atv<S1: Data<Elem = f64>, S2: Data<Elem = f64>>(
    a: &ArrayBase<S1, Ix2>,
    v: &ArrayBase<S2, Ix1>,
) -> Array1<f64> {
    let (n, p) = a.dim();
    debug_assert_eq!(n, v.len());
    if !prefers_gemm(p, 1, n) {
        return a.t().dot(v);
    }
    let a_view = FaerView::matrix(a);
    let v_view = FaerView::column(v);
    let mut out = Array1::<f64>::zeros(p);
    matmul(
        column_mut(&mut out),
        Accum::Replace,
        a_view.as_ref().transpose(),
        v_view.as_ref(),
        1.0,
        gemm_parallelism(n, p),
    );
    out
}

/// Symmetric eigendecomposition returning `(eigenvalues, eigenvectors)`,
/// eigenvectors in columns.
pub trait FaerEigh {
    fn eigh(&self, side: Side) -> Result<(Array1<f64>, Array2<f64>), FaerLinalgError>;
}

impl<S: Data<Elem = f64>> FaerEigh for ArrayBase<S, Ix2> {
    fn eigh(&self, side: Side) -> Result<(Array1<f64>, Array2<f64>), FaerLinalgError> {
        let view = FaerView::matrix(self);
        let evd = view
            .as_ref()
            .self_adjoint_eigen(side)
            .map_err(FaerLinalgError::SelfAdjointEigen)?;
        Ok((diag_to_array(evd.S()), mat_to_array(evd.U())))
    }
}

/// Owned `LLᵗ` factorization.
pub struct FaerCholeskyFactor {
    llt: solvers::Llt<f64>,
}

impl FaerCholeskyFactor {
    pub fn solve_vec(&self, rhs: &Array1<f64>) -> Array1<f64> {
        let mut solution = rhs.to_owned();
        self.llt.solve_in_place(column_mut(&mut solution));
        solution
    }

    /// Diagonal of `L`.
    pub fn diag(&self) -> Array1<f64> {
        diag_to_array(self.llt.L().diagonal())
    }
}

pub trait FaerCholesky {
    fn cholesky(&self, side: Side) -> Result<FaerCholeskyFactor, FaerLinalgError>;
}

impl<S: Data<Elem = f64>> FaerCholesky for ArrayBase<S, Ix2> {
    fn cholesky(&self, side: Side) -> Result<FaerCholeskyFactor, FaerLinalgError> {
        let view = FaerView::matrix(self);
        let llt = view.as_ref().llt(side).map_err(FaerLinalgError::Cholesky)?;
        Ok(FaerCholeskyFactor { llt })
    }
}
