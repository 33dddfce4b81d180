//! Cubic smoothing spline (Reinsch).
//!
//! Minimises `Σ (y_i − f(x_i))² + λ ∫ f''(t)² dt` over natural cubic
//! splines with knots at the data. `λ = 0` interpolates; large `λ` tends to
//! the least-squares line.

/// A fitted natural cubic spline: knot positions, fitted values and second
/// derivatives at the knots (zero at both ends).
#[derive(Debug, Clone, PartialEq)]
pub struct SmoothingSpline {
    x: Vec<f64>,
    g: Vec<f64>,
    gamma: Vec<f64>,
}

impl SmoothingSpline {
    /// Fit a spline to points with strictly increasing `x`. Returns `None`
    /// for empty, mismatched or unordered input.
    pub fn fit(x: &[f64], y: &[f64], lambda: f64) -> Option<SmoothingSpline> {
        let n = x.len();
        if n == 0 || n != y.len() || x.windows(2).any(|w| !(w[1] > w[0])) {
            return None;
        }
        let lambda = lambda.max(0.0);
        if n < 3 {
            return Some(SmoothingSpline {
                x: x.to_vec(),
                g: y.to_vec(),
                gamma: vec![0.0; n],
            });
        }

        let h: Vec<f64> = x.windows(2).map(|w| w[1] - w[0]).collect();
        let m = n - 2;

        // Q is n × m with three non-zeros per column j: rows j, j+1, j+2
        let q = |j: usize| -> [f64; 3] {
            [1.0 / h[j], -1.0 / h[j] - 1.0 / h[j + 1], 1.0 / h[j + 1]]
        };

        // A = R + λ QᵀQ (symmetric, banded width 2)
        let mut a = vec![vec![0.0; m]; m];
        for j in 0..m {
            a[j][j] = (h[j] + h[j + 1]) / 3.0;
            if j + 1 < m {
                a[j][j + 1] = h[j + 1] / 6.0;
                a[j + 1][j] = h[j + 1] / 6.0;
            }
        }
        for j in 0..m {
            let qj = q(j);
            for k in j..m.min(j + 3) {
                let qk = q(k);
                // column k has rows k..k+2, column j rows j..j+2
                let dot: f64 = (0..3)
                    .filter_map(|r| {
                        let row = j + r;
                        (row >= k && row < k + 3).then(|| qj[r] * qk[row - k])
                    })
                    .sum();
                a[j][k] += lambda * dot;
                if k != j {
                    a[k][j] += lambda * dot;
                }
            }
        }

        let qty: Vec<f64> = (0..m)
            .map(|j| {
                let qj = q(j);
                qj[0] * y[j] + qj[1] * y[j + 1] + qj[2] * y[j + 2]
            })
            .collect();
        let interior = solve_spd(a, qty)?;

        let mut g = y.to_vec();
        for (j, gj) in interior.iter().enumerate() {
            let qj = q(j);
            for r in 0..3 {
                g[j + r] -= lambda * qj[r] * gj;
            }
        }
        let mut gamma = vec![0.0; n];
        gamma[1..=m].copy_from_slice(&interior);
        Some(SmoothingSpline {
            x: x.to_vec(),
            g,
            gamma,
        })
    }

    /// Fitted values at the knots.
    pub fn fitted(&self) -> &[f64] {
        &self.g
    }

    /// Value at `t`, extended linearly beyond the outer knots.
    pub fn evaluate(&self, t: f64) -> f64 {
        let n = self.x.len();
        if n == 1 {
            return self.g[0];
        }
        if t < self.x[0] {
            let h = self.x[1] - self.x[0];
            let slope = (self.g[1] - self.g[0]) / h
                - h * (2.0 * self.gamma[0] + self.gamma[1]) / 6.0;
            return self.g[0] + (t - self.x[0]) * slope;
        }
        if t > self.x[n - 1] {
            let h = self.x[n - 1] - self.x[n - 2];
            let slope = (self.g[n - 1] - self.g[n - 2]) / h
                + h * (self.gamma[n - 2] + 2.0 * self.gamma[n - 1]) / 6.0;
            return self.g[n - 1] + (t - self.x[n - 1]) * slope;
        }
        let i = match self.x.partition_point(|&k| k <= t) {
            0 => 0,
            p => (p - 1).min(n - 2),
        };
        let h = self.x[i + 1] - self.x[i];
        let (a, b) = (self.x[i + 1] - t, t - self.x[i]);
        self.gamma[i] * a.powi(3) / (6.0 * h)
            + self.gamma[i + 1] * b.powi(3) / (6.0 * h)
            + (self.g[i] - self.gamma[i] * h * h / 6.0) * a / h
            + (self.g[i + 1] - self.gamma[i + 1] * h * h / 6.0) * b / h
    }

    /// `samples` evenly spaced points across the knot span.
    pub fn curve(&self, samples: usize) -> Vec<(f64, f64)> {
        let (first, last) = (self.x[0], self.x[self.x.len() - 1]);
        if samples < 2 || first == last {
            return vec![(first, self.evaluate(first))];
        }
        (0..samples)
            .map(|i| {
                let t = first + (last - first) * i as f64 / (samples - 1) as f64;
                (t, self.evaluate(t))
            })
            .collect()
    }
}

/// Solve `A x = b` for symmetric positive-definite `A` by Cholesky.
fn solve_spd(mut a: Vec<Vec<f64>>, b: Vec<f64>) -> Option<Vec<f64>> {
    let n = b.len();
    for j in 0..n {
        let diag = a[j][j] - (0..j).map(|k| a[j][k] * a[j][k]).sum::<f64>();
        if !(diag > 0.0) {
            return None;
        }
        let diag = diag.sqrt();
        a[j][j] = diag;
        for i in j + 1..n {
            let off = a[i][j] - (0..j).map(|k| a[i][k] * a[j][k]).sum::<f64>();
            a[i][j] = off / diag;
        }
    }
    let mut z = vec![0.0; n];
    for i in 0..n {
        z[i] = (b[i] - (0..i).map(|k| a[i][k] * z[k]).sum::<f64>()) / a[i][i];
    }
    let mut x = vec![0.0; n];
    for i in (0..n).rev() {
        x[i] = (z[i] - (i + 1..n).map(|k| a[k][i] * x[k]).sum::<f64>()) / a[i][i];
    }
    Some(x)
}
