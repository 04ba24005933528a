// common.rs
use nalgebra::{DMatrix, DVector, Dyn, LU};

use crate::modes::{Band, ToleranceMode, Tolerances};

pub const EPS: f64 = f64::EPSILON;
pub const MAX_ORDER: usize = 5;
pub const NEWTON_MAXITER: usize = 4;
pub const MIN_FACTOR: f64 = 0.2;
pub const MAX_FACTOR: f64 = 10.0;
/// Newton convergence failures on one step before giving up.
pub const MAX_FAILURES: usize = 10;

/// Root-mean-square norm.
pub fn norm(x: &[f64]) -> f64 {
    if x.is_empty() {
        return 0.0;
    }
    let sum_sq: f64 = x.iter().map(|&xi| xi * xi).sum();
    (sum_sq / x.len() as f64).sqrt()
}

/// `norm(x / scale)`
pub fn weighted_norm(x: &[f64], scale: &[f64]) -> f64 {
    let weighted: Vec<f64> = x.iter().zip(scale).map(|(&xi, &si)| xi / si).collect();
    norm(&weighted)
}

/// Error weights `atol_i + rtol_i * |y_i|`.
pub fn error_scale(mode: ToleranceMode, tol: &Tolerances, y: &[f64]) -> Vec<f64> {
    y.iter()
        .enumerate()
        .map(|(i, &yi)| {
            let (rtol, atol) = mode.pair(tol, i);
            atol + rtol * yi.abs()
        })
        .collect()
}

pub fn newton_tol(rtol_min: f64) -> f64 {
    (10.0 * EPS / rtol_min).max(0.03_f64.min(rtol_min.sqrt()))
}

/// Smallest representable step away from `t`, times ten.
pub fn min_step_at(t: f64) -> f64 {
    let spacing = if t == 0.0 { f64::MIN_POSITIVE } else { t.abs() * EPS };
    10.0 * spacing
}

/// Hairer/Wanner style estimate of a first step for an order-1 method.
pub fn select_initial_step(
    fun: impl Fn(f64, &[f64]) -> Vec<f64>,
    t0: f64,
    y0: &[f64],
    t_bound: f64,
    max_step: f64,
    f0: &[f64],
    scale: &[f64],
) -> f64 {
    if y0.is_empty() {
        return f64::INFINITY;
    }

    let interval_length = (t_bound - t0).abs();
    if interval_length == 0.0 {
        return 0.0;
    }

    let order = 1.0;
    let d0 = weighted_norm(y0, scale);
    let d1 = weighted_norm(f0, scale);

    let h0 = if d0 < 1e-5 || d1 < 1e-5 { 1e-6 } else { 0.01 * d0 / d1 };
    let h0 = h0.min(interval_length);

    let y1: Vec<f64> = y0.iter().zip(f0).map(|(&yi, &fi)| yi + h0 * fi).collect();
    let f1 = fun(t0 + h0, &y1);

    let diff: Vec<f64> = f1.iter().zip(f0).map(|(f1i, f0i)| f1i - f0i).collect();
    let d2 = weighted_norm(&diff, scale) / h0;

    let h1 = if d1 <= 1e-15 && d2 <= 1e-15 {
        (1e-6_f64).max(h0 * 1e-3)
    } else {
        (0.01 / d1.max(d2)).powf(1.0 / (order + 1.0))
    };

    (100.0 * h0).min(h1).min(interval_length).min(max_step)
}

pub fn compute_r(order: usize, factor: f64) -> DMatrix<f64> {
    let mut m = DMatrix::zeros(order + 1, order + 1);
    for i in 1..=order {
        for j in 1..=order {
            m[(i, j)] = (i as f64 - 1.0 - factor * j as f64) / i as f64;
        }
    }
    m.row_mut(0).fill(1.0);

    // cumulative product down each column
    for i in 1..=order {
        for j in 0..=order {
            m[(i, j)] *= m[(i - 1, j)];
        }
    }
    m
}

/// Rescales the backward-difference array for a step-size change by `factor`.
pub fn change_d(d: &mut [Vec<f64>], order: usize, factor: f64) {
    let ru = compute_r(order, factor) * compute_r(order, 1.0);
    let n = d[0].len();
    let d_matrix = DMatrix::from_fn(order + 1, n, |i, j| d[i][j]);
    let result = ru.transpose() * d_matrix;

    for (i, row) in d.iter_mut().take(order + 1).enumerate() {
        for (j, v) in row.iter_mut().enumerate() {
            *v = result[(i, j)];
        }
    }
}

/// Forward-difference Jacobian, one column per perturbed component.
///
/// Column `j` is perturbed by `sqrt(EPS) * max(|y_j|, scale_j)`, so a
/// component far below its neighbours still gets an increment on its own
/// magnitude.
pub fn num_jac(
    fun: impl Fn(f64, &[f64]) -> Vec<f64>,
    t: f64,
    y: &[f64],
    f: &[f64],
    scale: &[f64],
) -> DMatrix<f64> {
    let n = y.len();
    let mut jac = DMatrix::zeros(n, n);
    let mut y_plus = y.to_vec();

    for j in 0..n {
        let mut h = EPS.sqrt() * y[j].abs().max(scale[j]);
        if h == 0.0 {
            h = EPS.sqrt();
        }
        y_plus[j] = y[j] + h;
        let f_plus = fun(t, &y_plus);
        y_plus[j] = y[j];

        for i in 0..n {
            jac[(i, j)] = (f_plus[i] - f[i]) / h;
        }
    }

    jac
}

/// Expands a packed band `packed[(i - j + mu, j)] = df_i/dy_j` to a dense matrix.
pub fn unpack_band(packed: &DMatrix<f64>, band: Band, n: usize) -> Option<DMatrix<f64>> {
    if packed.nrows() != band.width() || packed.ncols() != n {
        return None;
    }
    let mut dense = DMatrix::zeros(n, n);
    for j in 0..n {
        let first = j.saturating_sub(band.upper);
        let last = (j + band.lower).min(n - 1);
        for i in first..=last {
            dense[(i, j)] = packed[(i + band.upper - j, j)];
        }
    }
    Some(dense)
}

/// Zeroes every entry outside the band.
pub fn mask_to_band(jac: &mut DMatrix<f64>, band: Band) {
    let (rows, cols) = jac.shape();
    for j in 0..cols {
        for i in 0..rows {
            if i + band.upper < j || i > j + band.lower {
                jac[(i, j)] = 0.0;
            }
        }
    }
}

/// LU factors of the Newton iteration matrix `I - c J`.
pub struct LuFactor {
    lu: LU<f64, Dyn, Dyn>,
}

impl LuFactor {
    /// `None` when the matrix is singular.
    pub fn new(matrix: DMatrix<f64>) -> Option<Self> {
        let lu = matrix.lu();
        lu.is_invertible().then_some(Self { lu })
    }

    pub fn solve(&self, b: &[f64]) -> Option<Vec<f64>> {
        let b_vec = DVector::from_column_slice(b);
        self.lu.solve(&b_vec).map(|solution| solution.as_slice().to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modes::Tolerance;
    use approx::assert_relative_eq;

    #[test]
    fn test_norm_is_rms() {
        assert_relative_eq!(norm(&[3.0, 4.0]), (12.5_f64).sqrt());
        assert_eq!(norm(&[]), 0.0);
    }

    #[test]
    fn test_error_scale_vector_atol() {
        let tol = Tolerances {
            rtol: Tolerance::Scalar(1e-4),
            atol: Tolerance::Vector(vec![1e-6, 1e-10, 1e-6]),
        };
        let scale = error_scale(ToleranceMode::ScalarVector, &tol, &[1.0, 0.0, -2.0]);
        assert_relative_eq!(scale[0], 1e-4 + 1e-6);
        assert_relative_eq!(scale[1], 1e-10);
        assert_relative_eq!(scale[2], 2e-4 + 1e-6);
    }

    #[test]
    fn test_change_d_identity_factor() {
        let mut d = vec![vec![1.0, 2.0], vec![0.5, -0.5], vec![0.1, 0.2]];
        let before = d.clone();
        change_d(&mut d, 2, 1.0);
        for (row, old) in d.iter().zip(&before) {
            for (a, b) in row.iter().zip(old) {
                assert_relative_eq!(a, b, epsilon = 1e-14);
            }
        }
    }

    #[test]
    fn test_change_d_halves_first_difference() {
        // order 1: D[1] = h y'; halving h halves it, D[0] is unchanged.
        let mut d = vec![vec![1.0], vec![0.4]];
        change_d(&mut d, 1, 0.5);
        assert_relative_eq!(d[0][0], 1.0, epsilon = 1e-14);
        assert_relative_eq!(d[1][0], 0.2, epsilon = 1e-14);
    }

    #[test]
    fn test_num_jac_linear_system() {
        let fun = |_t: f64, y: &[f64]| vec![2.0 * y[0] + y[1], -3.0 * y[1]];
        let y = [1.0, 2.0];
        let f = fun(0.0, &y);
        let jac = num_jac(fun, 0.0, &y, &f, &[1e-6, 1e-6]);
        assert_relative_eq!(jac[(0, 0)], 2.0, epsilon = 1e-6);
        assert_relative_eq!(jac[(0, 1)], 1.0, epsilon = 1e-6);
        assert_relative_eq!(jac[(1, 0)], 0.0, epsilon = 1e-6);
        assert_relative_eq!(jac[(1, 1)], -3.0, epsilon = 1e-6);
    }

    #[test]
    fn test_num_jac_tiny_component() {
        // d/dy1 of -3e7 y1^2 at y1 = 1e-13 is -6e-6; the increment must
        // follow y1's own scale, not the size of y0
        let fun = |_t: f64, y: &[f64]| vec![-0.04 * y[0], -3e7 * y[1] * y[1]];
        let y = [0.5, 1e-13];
        let f = fun(0.0, &y);
        let jac = num_jac(fun, 0.0, &y, &f, &[1e-4 * 0.5 + 1e-6, 1e-10]);
        assert_relative_eq!(jac[(0, 0)], -0.04, max_relative = 1e-6);
        assert_relative_eq!(jac[(1, 1)], -6e-6, max_relative = 1e-3);
    }

    #[test]
    fn test_num_jac_zero_state_and_weight() {
        let fun = |_t: f64, y: &[f64]| vec![2.0 * y[0]];
        let jac = num_jac(fun, 0.0, &[0.0], &[0.0], &[0.0]);
        assert_relative_eq!(jac[(0, 0)], 2.0, epsilon = 1e-6);
    }

    #[test]
    fn test_unpack_tridiagonal_band() {
        let band = Band { lower: 1, upper: 1 };
        // rows: super-diagonal, diagonal, sub-diagonal
        let packed = DMatrix::from_row_slice(3, 3, &[
            0.0, 1.0, 2.0, //
            4.0, 5.0, 6.0, //
            7.0, 8.0, 0.0,
        ]);
        let dense = unpack_band(&packed, band, 3).unwrap();
        let expected = DMatrix::from_row_slice(3, 3, &[
            4.0, 1.0, 0.0, //
            7.0, 5.0, 2.0, //
            0.0, 8.0, 6.0,
        ]);
        assert_eq!(dense, expected);
        assert!(unpack_band(&DMatrix::zeros(2, 3), band, 3).is_none());
    }

    #[test]
    fn test_mask_to_band() {
        let mut jac = DMatrix::from_element(3, 3, 1.0);
        mask_to_band(&mut jac, Band { lower: 1, upper: 0 });
        assert_eq!(jac, DMatrix::from_row_slice(3, 3, &[1.0, 0.0, 0.0, 1.0, 1.0, 0.0, 0.0, 1.0, 1.0]));
    }

    #[test]
    fn test_lu_rejects_singular() {
        assert!(LuFactor::new(DMatrix::zeros(2, 2)).is_none());
        let lu = LuFactor::new(DMatrix::from_row_slice(2, 2, &[2.0, 0.0, 0.0, 4.0])).unwrap();
        assert_eq!(lu.solve(&[2.0, 2.0]).unwrap(), vec![1.0, 0.5]);
    }
}
