#![deny(dead_code)]
#![deny(unused_imports)]

//! Penalized least-squares B-spline regression.
//!
//! A fit runs knot placement, tensor-product basis assembly, an optional
//! ridge or P-spline penalty and a Cholesky solve of the normal equations,
//! producing an immutable [`BSplineModel`].

pub mod basis;
pub mod builder;
pub mod design;
pub mod error;
pub mod knots;
pub mod linalg;
pub mod matrix;
pub mod model;
pub mod penalty;
pub mod solver;
pub mod types;

pub use builder::{
    BSplineBuilder, bspline_interpolator, bspline_smoother, fit_bspline, pspline_smoother,
};
pub use design::{assemble_derivative_design_matrix, assemble_design_matrix};
pub use error::BSplineError;
pub use knots::{KnotVector, build_knot_vectors};
pub use matrix::DesignMatrix;
pub use model::BSplineModel;
pub use penalty::Penalty;
pub use solver::{SolverOptions, solve_normal_equations};
pub use types::{FitConfiguration, KnotSpacing, Sample, SingularFallback, SmoothingMode};
