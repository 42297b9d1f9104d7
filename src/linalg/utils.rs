use ndarray::{Array1, Array2};

#[derive(Default, Clone, Copy)]
pub(crate) struct KahanSum {
    sum: f64,
    c: f64,
}

impl KahanSum {
    pub(crate) fn add(&mut self, value: f64) {
        let y = value - self.c;
        let t = self.sum + y;
        self.c = (t - self.sum) - y;
        self.sum = t;
    }

    pub(crate) fn sum(self) -> f64 {
        self.sum
    }
}

pub(crate) fn add_ridge_in_place(matrix: &mut Array2<f64>, ridge: f64) {
    if ridge <= 0.0 {
        return;
    }
    for i in 0..matrix.nrows() {
        matrix[[i, i]] += ridge;
    }
}

/// `target += scale * source`, skipping the pass entirely when `scale` is zero.
pub(crate) fn add_scaled_in_place(target: &mut Array2<f64>, source: &Array2<f64>, scale: f64) {
    if scale == 0.0 {
        return;
    }
    target.scaled_add(scale, source);
}

/// Averages `m` with its transpose; accumulated Gram matrices drift by a few ulps.
pub(crate) fn symmetrize_in_place(matrix: &mut Array2<f64>) {
    let n = matrix.nrows();
    for i in 0..n {
        for j in (i + 1)..n {
            let avg = 0.5 * (matrix[[i, j]] + matrix[[j, i]]);
            matrix[[i, j]] = avg;
            matrix[[j, i]] = avg;
        }
    }
}

/// Quadratic form `vᵗ M v`, compensated.
pub(crate) fn quadratic_form(matrix: &Array2<f64>, v: &Array1<f64>) -> f64 {
    let mv = matrix.dot(v);
    let mut acc = KahanSum::default();
    for (a, b) in v.iter().zip(mv.iter()) {
        acc.add(a * b);
    }
    acc.sum()
}
