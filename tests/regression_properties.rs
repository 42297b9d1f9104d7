use approx::assert_abs_diff_eq;
use ndarray::{Array, Array1, Array2, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use spline_regression::{
    BSplineBuilder, BSplineError, KnotSpacing, SingularFallback, SmoothingMode, build_knot_vectors,
};

fn column(values: &Array1<f64>) -> Array2<f64> {
    values.clone().insert_axis(Axis(1))
}

fn noisy_quadratic(n: usize, seed: u64) -> (Array1<f64>, Array1<f64>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let noise = Normal::new(0.0, 0.8).unwrap();
    let x = Array::linspace(0.0, 10.0, n);
    let y = x.mapv(|v: f64| 1.0 + 0.5 * v + 0.1 * v * v + noise.sample(&mut rng));
    (x, y)
}

/// Uniform grid with every interior node shifted by up to 30% of the spacing.
fn jittered_grid(n: usize, lo: f64, hi: f64, rng: &mut StdRng) -> Array1<f64> {
    let h = (hi - lo) / (n - 1) as f64;
    Array1::from_shape_fn(n, |i| {
        let base = lo + i as f64 * h;
        if i == 0 || i == n - 1 {
            base
        } else {
            base + rng.random_range(-0.3..0.3) * h
        }
    })
}

#[test]
fn ten_point_scenario_interpolates_and_pspline_is_smoother() {
    let (x, y) = noisy_quadratic(10, 7);
    let points = column(&x);
    let builder = BSplineBuilder::new(vec![1]);

    let interpolant = builder
        .fit(points.view(), y.view(), SmoothingMode::None, 0.0)
        .unwrap();
    for (&xi, &yi) in x.iter().zip(y.iter()) {
        assert_abs_diff_eq!(interpolant.evaluate_scalar(xi).unwrap(), yi, epsilon = 1e-7);
    }

    let smooth = builder
        .fit(points.view(), y.view(), SmoothingMode::PSpline, 0.1)
        .unwrap();
    assert_eq!(smooth.num_basis_functions(), interpolant.num_basis_functions());
    let rough_none = interpolant.roughness(2).unwrap();
    let rough_pspline = smooth.roughness(2).unwrap();
    assert!(
        rough_pspline < rough_none,
        "P-spline roughness {rough_pspline} should be below interpolant roughness {rough_none}"
    );
}

#[test]
fn unpenalized_fits_interpolate_scattered_abscissae() {
    let mut rng = StdRng::seed_from_u64(42);
    for degree in 1..=3 {
        let x = jittered_grid(25, -2.0, 3.0, &mut rng);
        let y = x.mapv(|v: f64| (1.3 * v).sin() + 0.2 * v);
        let model = BSplineBuilder::new(vec![degree])
            .knot_spacing(KnotSpacing::AsSampled)
            .fit(column(&x).view(), y.view(), SmoothingMode::None, 0.0)
            .unwrap();
        for (&xi, &yi) in x.iter().zip(y.iter()) {
            assert_abs_diff_eq!(model.evaluate_scalar(xi).unwrap(), yi, epsilon = 1e-6);
        }
    }
}

#[test]
fn default_configuration_interpolates_irregular_abscissae() {
    let irregular = [
        vec![0.0, 0.7, 1.1, 2.9, 3.3, 4.0, 6.5, 7.0, 9.2, 10.0],
        vec![0.0, 0.1, 0.2, 0.3, 0.4, 5.0, 9.0, 10.0],
    ];
    for xs in irregular {
        let x = Array1::from_vec(xs);
        let y = x.mapv(|v: f64| (1.3 * v).sin() + 0.2 * v);
        for degree in 1..=3 {
            let model = BSplineBuilder::new(vec![degree])
                .fit(column(&x).view(), y.view(), SmoothingMode::None, 0.0)
                .unwrap_or_else(|e| panic!("degree {degree} on {x}: {e}"));
            assert_eq!(model.num_basis_functions(), &[x.len()]);
            for (&xi, &yi) in x.iter().zip(y.iter()) {
                assert_abs_diff_eq!(model.evaluate_scalar(xi).unwrap(), yi, epsilon = 1e-7);
            }
        }
    }
}

#[test]
fn ridge_shrinks_coefficients_as_alpha_grows() {
    let (x, y) = noisy_quadratic(40, 11);
    let points = column(&x);
    let builder = BSplineBuilder::new(vec![3]).num_basis_functions(vec![12]);
    let mut previous = f64::INFINITY;
    for alpha in [1e-4, 1e-2, 1.0, 10.0, 1e3] {
        let model = builder
            .fit(points.view(), y.view(), SmoothingMode::Identity, alpha)
            .unwrap();
        let norm = model.coefficients().dot(&model.coefficients());
        assert!(
            norm < previous,
            "coefficient norm {norm} did not shrink below {previous} at alpha {alpha}"
        );
        previous = norm;
    }

    let limit = builder
        .fit(points.view(), y.view(), SmoothingMode::Identity, 1e12)
        .unwrap();
    let norm = limit.coefficients().dot(&limit.coefficients());
    assert!(norm < 1e-12, "coefficient norm {norm} at alpha 1e12 should vanish");
}

#[test]
fn heavy_second_order_penalty_converges_to_least_squares_line() {
    let mut rng = StdRng::seed_from_u64(3);
    let noise = Normal::new(0.0, 0.3).unwrap();
    let x = Array::linspace(0.0, 5.0, 30);
    let y = x.mapv(|v: f64| 2.0 * v - 1.0 + noise.sample(&mut rng));

    // Ordinary least-squares line.
    let n = x.len() as f64;
    let mean_x = x.sum() / n;
    let mean_y = y.sum() / n;
    let sxy: f64 = x.iter().zip(y.iter()).map(|(a, b)| (a - mean_x) * (b - mean_y)).sum();
    let sxx: f64 = x.iter().map(|a| (a - mean_x) * (a - mean_x)).sum();
    let slope = sxy / sxx;
    let intercept = mean_y - slope * mean_x;

    // With degree 1 the Greville abscissae are the knots themselves, so the
    // penalty null space is exactly the set of straight lines.
    let model = BSplineBuilder::new(vec![1])
        .fit(column(&x).view(), y.view(), SmoothingMode::PSpline, 1e8)
        .unwrap();
    for &xi in Array::linspace(0.0, 5.0, 17).iter() {
        assert_abs_diff_eq!(
            model.evaluate_scalar(xi).unwrap(),
            intercept + slope * xi,
            epsilon = 1e-3
        );
    }

    // For higher degrees the limit has linear coefficients.
    let cubic = BSplineBuilder::new(vec![3])
        .fit(column(&x).view(), y.view(), SmoothingMode::PSpline, 1e8)
        .unwrap();
    let loose = BSplineBuilder::new(vec![3])
        .fit(column(&x).view(), y.view(), SmoothingMode::PSpline, 1e-2)
        .unwrap();
    assert!(cubic.roughness(2).unwrap() < 1e-6);
    assert!(cubic.roughness(2).unwrap() < loose.roughness(2).unwrap());
}

#[test]
fn knot_vectors_are_clamped_and_sized_for_every_configuration() {
    let mut rng = StdRng::seed_from_u64(99);
    for degree in 0..=4 {
        for spacing in [KnotSpacing::Equidistant, KnotSpacing::AsSampled] {
            let x = jittered_grid(15, -1.0, 4.0, &mut rng);
            let vectors =
                build_knot_vectors(column(&x).view(), &[degree], spacing, None).unwrap();
            let kv = &vectors[0];
            let knots = kv.as_slice();
            assert_eq!(kv.num_basis_functions(), x.len());
            assert_eq!(knots.len(), kv.num_basis_functions() + degree + 1);
            assert!(knots.windows(2).all(|w| w[0] <= w[1]));
            assert!(knots[..=degree].iter().all(|&k| k == knots[0]));
            assert!(knots[knots.len() - degree - 1..].iter().all(|&k| k == knots[knots.len() - 1]));
            assert_eq!(kv.domain(), (x[0], x[x.len() - 1]));
        }
    }
}

#[test]
fn repeated_fits_are_bit_identical() {
    let (x, y) = noisy_quadratic(300, 5);
    let points = column(&x);
    let builder = BSplineBuilder::new(vec![3]).num_basis_functions(vec![40]);
    let first = builder
        .fit(points.view(), y.view(), SmoothingMode::PSpline, 0.5)
        .unwrap();
    let second = builder
        .fit(points.view(), y.view(), SmoothingMode::PSpline, 0.5)
        .unwrap();
    assert_eq!(first.coefficients(), second.coefficients());
}

#[test]
fn evaluation_outside_the_domain_uses_the_boundary_value() {
    let (x, y) = noisy_quadratic(10, 1);
    let model = BSplineBuilder::new(vec![3])
        .fit(column(&x).view(), y.view(), SmoothingMode::Identity, 0.05)
        .unwrap();
    assert_eq!(model.evaluate_scalar(-5.0).unwrap(), model.evaluate_scalar(0.0).unwrap());
    assert_eq!(model.evaluate_scalar(1e6).unwrap(), model.evaluate_scalar(10.0).unwrap());
    assert_eq!(model.gradient(&[-1.0]).unwrap(), model.gradient(&[0.0]).unwrap());
}

#[test]
fn derivatives_of_reproduced_cubic_are_exact() {
    let x = Array::linspace(-1.0, 1.0, 30);
    let y = x.mapv(|v: f64| v * v * v - 2.0 * v * v + 0.5);
    let model = BSplineBuilder::new(vec![3])
        .num_basis_functions(vec![6])
        .fit(column(&x).view(), y.view(), SmoothingMode::None, 0.0)
        .unwrap();
    for &xi in Array::linspace(-0.9, 0.9, 11).iter() {
        let grad = model.gradient(&[xi]).unwrap();
        assert_abs_diff_eq!(grad[0], 3.0 * xi * xi - 4.0 * xi, epsilon = 1e-8);
        assert_abs_diff_eq!(model.derivative(&[xi], &[2]).unwrap(), 6.0 * xi - 4.0, epsilon = 1e-7);
        assert_abs_diff_eq!(model.derivative(&[xi], &[3]).unwrap(), 6.0, epsilon = 1e-6);
        assert_eq!(model.derivative(&[xi], &[4]).unwrap(), 0.0);
    }
}

#[test]
fn zero_weight_removes_an_outlier() {
    let x = Array::linspace(0.0, 1.0, 20);
    let mut y = x.mapv(|v: f64| 3.0 * v + 1.0);
    y[7] = 50.0;
    let mut weights = Array1::<f64>::ones(20);
    weights[7] = 0.0;
    let model = BSplineBuilder::new(vec![3])
        .num_basis_functions(vec![5])
        .fit_weighted(column(&x).view(), y.view(), weights.view(), SmoothingMode::None, 0.0)
        .unwrap();
    for &xi in Array::linspace(0.0, 1.0, 9).iter() {
        assert_abs_diff_eq!(model.evaluate_scalar(xi).unwrap(), 3.0 * xi + 1.0, epsilon = 1e-9);
    }
}

#[test]
fn uniform_weights_rescale_the_penalty() {
    let (x, y) = noisy_quadratic(25, 17);
    let points = column(&x);
    let builder = BSplineBuilder::new(vec![3]).num_basis_functions(vec![9]);
    let doubled = Array1::from_elem(25, 2.0);
    let weighted = builder
        .fit_weighted(points.view(), y.view(), doubled.view(), SmoothingMode::Identity, 0.2)
        .unwrap();
    let plain = builder
        .fit(points.view(), y.view(), SmoothingMode::Identity, 0.1)
        .unwrap();
    assert_abs_diff_eq!(weighted.coefficients(), plain.coefficients(), epsilon = 1e-9);
}

#[test]
fn underdetermined_system_is_singular_unless_regularized() {
    // Eight cubic basis functions but only three distinct abscissae.
    let x = Array1::from_vec(vec![0.0, 0.0, 0.5, 0.5, 1.0, 1.0]);
    let y = Array1::from_vec(vec![1.0, 1.0, 2.0, 2.0, 0.5, 0.5]);
    let points = column(&x);
    let builder = BSplineBuilder::new(vec![3]).num_basis_functions(vec![8]);

    let err = builder
        .fit(points.view(), y.view(), SmoothingMode::None, 0.0)
        .unwrap_err();
    assert!(matches!(err, BSplineError::SingularSystem { size: 8, .. }));

    let ridge = builder
        .fit(points.view(), y.view(), SmoothingMode::Identity, 1e-3)
        .unwrap();
    assert!(ridge.evaluate_scalar(0.5).unwrap().is_finite());

    let pinv = builder
        .clone()
        .singular_fallback(SingularFallback::PseudoInverse)
        .fit(points.view(), y.view(), SmoothingMode::None, 0.0)
        .unwrap();
    for (&xi, &yi) in x.iter().zip(y.iter()) {
        assert_abs_diff_eq!(pinv.evaluate_scalar(xi).unwrap(), yi, epsilon = 1e-6);
    }
}

#[test]
fn concurrent_evaluation_matches_serial() {
    let (x, y) = noisy_quadratic(60, 23);
    let model = BSplineBuilder::new(vec![3])
        .fit(column(&x).view(), y.view(), SmoothingMode::PSpline, 0.3)
        .unwrap();
    let queries = Array::linspace(-1.0, 11.0, 400);
    let serial: Vec<f64> = queries
        .iter()
        .map(|&q| model.evaluate_scalar(q).unwrap())
        .collect();

    let shared = &model;
    let inputs = &queries;
    std::thread::scope(|scope| {
        let handles: Vec<_> = (0..4)
            .map(|_| {
                scope.spawn(move || {
                    inputs
                        .iter()
                        .map(|&q| shared.evaluate_scalar(q).unwrap())
                        .collect::<Vec<f64>>()
                })
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), serial);
        }
    });

    let batch = model.evaluate_many(column(&queries).view()).unwrap();
    assert_eq!(batch.to_vec(), serial);
}
