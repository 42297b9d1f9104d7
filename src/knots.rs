use crate::error::BSplineError;
use crate::types::KnotSpacing;
use ndarray::{ArrayView1, ArrayView2, Axis};

/// A clamped knot vector together with the degree it was built for.
///
/// The first and last breakpoints are repeated `degree + 1` times and the
/// interior breakpoints are strictly increasing, so every non-boundary span
/// has positive length.
#[derive(Debug, Clone, PartialEq)]
pub struct KnotVector {
    knots: Vec<f64>,
    degree: usize,
}

impl KnotVector {
    /// Validates an explicit knot sequence.
    pub fn new(knots: Vec<f64>, degree: usize) -> Result<Self, BSplineError> {
        let boundary = degree + 1;
        if knots.len() < 2 * boundary {
            return Err(BSplineError::InvalidInput(format!(
                "a clamped degree {degree} knot vector needs at least {} knots, got {}",
                2 * boundary,
                knots.len()
            )));
        }
        if knots.iter().any(|k| !k.is_finite()) {
            return Err(BSplineError::InvalidInput(
                "knot vector contains non-finite values".to_string(),
            ));
        }
        let last = knots.len() - 1;
        let (lo, hi) = (knots[0], knots[last]);
        if lo >= hi {
            return Err(BSplineError::InvalidDomain {
                dim: 0,
                min: lo,
                max: hi,
            });
        }
        if knots[..boundary].iter().any(|&k| k != lo) || knots[last + 1 - boundary..].iter().any(|&k| k != hi) {
            return Err(BSplineError::InvalidInput(format!(
                "boundary knots must be repeated exactly {boundary} times"
            )));
        }
        // From the last clamped start knot to the first clamped end knot the
        // sequence must strictly increase.
        for i in boundary..=(last + 1 - boundary) {
            if knots[i - 1] >= knots[i] {
                return Err(BSplineError::InvalidInput(format!(
                    "knots {} and {} are not strictly increasing ({} >= {})",
                    i - 1,
                    i,
                    knots[i - 1],
                    knots[i]
                )));
            }
        }
        Ok(Self { knots, degree })
    }

    /// Clamped knot vector with `num_interior` evenly spaced interior knots.
    pub fn clamped_uniform(
        min: f64,
        max: f64,
        degree: usize,
        num_interior: usize,
    ) -> Result<Self, BSplineError> {
        if !min.is_finite() || !max.is_finite() || min >= max {
            return Err(BSplineError::InvalidDomain { dim: 0, min, max });
        }
        let h = (max - min) / (num_interior as f64 + 1.0);
        let mut knots = Vec::with_capacity(num_interior + 2 * (degree + 1));
        knots.extend(std::iter::repeat_n(min, degree + 1));
        for i in 1..=num_interior {
            knots.push(min + i as f64 * h);
        }
        knots.extend(std::iter::repeat_n(max, degree + 1));
        Self::new(knots, degree)
    }

    /// Data-driven knots: each interior knot is the mean of `degree + 2`
    /// consecutive distinct abscissae, which yields exactly one basis
    /// function per distinct abscissa.
    pub fn moving_average(values: &[f64], degree: usize) -> Result<Self, BSplineError> {
        let unique = distinct_sorted(values, 0)?;
        let n = unique.len();
        if n < degree + 1 {
            return Err(BSplineError::InsufficientData {
                dim: 0,
                degree,
                required: degree + 1,
                found: n,
            });
        }
        let window = degree + 2;
        let num_interior = n - degree - 1;
        let mut knots = Vec::with_capacity(n + degree + 1);
        knots.extend(std::iter::repeat_n(unique[0], degree + 1));
        for i in 0..num_interior {
            let sum: f64 = unique[i..i + window].iter().sum();
            knots.push(sum / window as f64);
        }
        knots.extend(std::iter::repeat_n(unique[n - 1], degree + 1));
        Self::new(knots, degree)
    }

    pub fn degree(&self) -> usize {
        self.degree
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.knots
    }

    pub fn view(&self) -> ArrayView1<'_, f64> {
        ArrayView1::from(self.knots.as_slice())
    }

    pub fn num_knots(&self) -> usize {
        self.knots.len()
    }

    pub fn num_basis_functions(&self) -> usize {
        self.knots.len() - self.degree - 1
    }

    pub fn num_interior_knots(&self) -> usize {
        self.knots.len() - 2 * (self.degree + 1)
    }

    /// `(min, max)` of the clamped domain.
    pub fn domain(&self) -> (f64, f64) {
        (self.knots[0], self.knots[self.knots.len() - 1])
    }

    /// Projects `x` onto the clamped domain. NaN passes through.
    #[inline]
    pub fn clamp(&self, x: f64) -> f64 {
        let (lo, hi) = self.domain();
        if x < lo {
            lo
        } else if x > hi {
            hi
        } else {
            x
        }
    }
}

/// Sorted distinct values of one abscissa column. Rejects empty or
/// non-finite input as an invalid domain for `dim`.
pub(crate) fn distinct_sorted(values: &[f64], dim: usize) -> Result<Vec<f64>, BSplineError> {
    if values.is_empty() {
        return Err(BSplineError::InvalidDomain {
            dim,
            min: f64::NAN,
            max: f64::NAN,
        });
    }
    if let Some(&bad) = values.iter().find(|v| !v.is_finite()) {
        return Err(BSplineError::InvalidDomain {
            dim,
            min: bad,
            max: bad,
        });
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    sorted.dedup();
    Ok(sorted)
}

fn relabel_dim(err: BSplineError, dim: usize) -> BSplineError {
    match err {
        BSplineError::InvalidDomain { min, max, .. } => BSplineError::InvalidDomain { dim, min, max },
        BSplineError::InsufficientData {
            degree,
            required,
            found,
            ..
        } => BSplineError::InsufficientData {
            dim,
            degree,
            required,
            found,
        },
        other => other,
    }
}

/// Builds one knot vector per column of `points` (rows are samples).
///
/// Uniform spacing applies only to explicit `num_basis` counts. With
/// `num_basis` absent, each dimension gets one basis function per distinct
/// abscissa and its knots are placed from the data, so an unpenalized fit
/// passes through every sample.
pub fn build_knot_vectors(
    points: ArrayView2<'_, f64>,
    degrees: &[usize],
    spacing: KnotSpacing,
    num_basis: Option<&[usize]>,
) -> Result<Vec<KnotVector>, BSplineError> {
    if points.ncols() != degrees.len() {
        return Err(BSplineError::DimensionMismatch(format!(
            "samples have {} abscissa columns but {} degrees were configured",
            points.ncols(),
            degrees.len()
        )));
    }
    if let Some(counts) = num_basis
        && counts.len() != degrees.len()
    {
        return Err(BSplineError::DimensionMismatch(format!(
            "{} basis-function counts given for {} dimensions",
            counts.len(),
            degrees.len()
        )));
    }

    let mut vectors = Vec::with_capacity(degrees.len());
    for (dim, column) in points.axis_iter(Axis(1)).enumerate() {
        let degree = degrees[dim];
        let column: Vec<f64> = column.iter().copied().collect();
        let unique = distinct_sorted(&column, dim)?;
        let (min, max) = (unique[0], unique[unique.len() - 1]);
        if min >= max {
            return Err(BSplineError::InvalidDomain { dim, min, max });
        }

        let knots = match (spacing, num_basis) {
            (KnotSpacing::Equidistant, Some(counts)) => {
                let count = counts[dim];
                if count < degree + 1 {
                    return Err(BSplineError::InvalidConfiguration(format!(
                        "dimension {dim}: {count} basis functions requested but degree {degree} needs at least {}",
                        degree + 1
                    )));
                }
                KnotVector::clamped_uniform(min, max, degree, count - degree - 1)
                    .map_err(|e| relabel_dim(e, dim))?
            }
            (_, counts) => {
                if counts.is_some() {
                    log::warn!(
                        "dimension {dim}: as-sampled knot spacing ignores the requested basis-function count"
                    );
                }
                // Every basis function gets a distinct abscissa inside its support.
                KnotVector::moving_average(&unique, degree).map_err(|e| relabel_dim(e, dim))?
            }
        };
        log::debug!(
            "dimension {dim}: degree {degree}, {} knots, {} basis functions on [{min}, {max}]",
            knots.num_knots(),
            knots.num_basis_functions()
        );
        vectors.push(knots);
    }
    Ok(vectors)
}
