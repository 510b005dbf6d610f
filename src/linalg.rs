//! Small numerical helpers on top of `nalgebra`.
//!
//! Everything heavy (QR, LU, Cholesky, triangular solves) comes from
//! `nalgebra`; this module only adds the incremental Givens triangularization
//! used by the Q-augmentation and the symmetric clean-up applied after every
//! covariance update.

use nalgebra::DMatrix;

/// Below this (relative) magnitude, variances are clamped and symmetric
/// entries are hard-zeroed.
pub const MACHINE_ZERO: f64 = 1e3 * f64::EPSILON;

/// Tolerance for residual consistency at zero predicted variance, and the
/// slack (relative to the diagonal) of the covariance checks.
pub const STATE_ZERO: f64 = 1e-9;

/// Relative tolerance used to detect the numerical rank of a triangular factor
/// and the legality of a collapse.
pub const RANK_TOLERANCE: f64 = 1e-9;

/// Rotates column `extra` of `q` into the lower triangular block `q[0..n, 0..n]`.
///
/// Uses Givens rotations on the column pairs `(i, extra)`, so that
/// `L L' + w w'` is preserved, where `L` is the leading block and `w` the
/// incoming column. On return column `extra` is zero and the diagonal of `L`
/// is non-negative.
pub fn givens_triangularize(q: &mut DMatrix<f64>, extra: usize) {
    let n = q.nrows().min(extra);
    for i in 0..n {
        let beta = q[(i, extra)];
        if beta == 0.0 {
            continue;
        }
        let alpha = q[(i, i)];
        let rho = alpha.hypot(beta);
        let c = alpha / rho;
        let s = beta / rho;
        q[(i, i)] = rho;
        q[(i, extra)] = 0.0;
        for j in (i + 1)..q.nrows() {
            let x = q[(j, i)];
            let y = q[(j, extra)];
            q[(j, i)] = c * x + s * y;
            q[(j, extra)] = c * y - s * x;
        }
    }
}

/// Threshold under which entries of `m` are considered numerical noise.
fn noise_threshold(m: &DMatrix<f64>) -> f64 {
    let scale = m
        .diagonal()
        .iter()
        .fold(1.0_f64, |acc, &x| acc.max(x.abs()));
    MACHINE_ZERO * scale
}

/// Re-symmetrizes `m` and hard-zeroes the entries below the noise threshold.
pub fn clean_symmetric(m: &mut DMatrix<f64>) {
    let n = m.nrows();
    if n == 0 {
        return;
    }
    let eps = noise_threshold(m);
    for j in 0..n {
        for i in j..n {
            let mut x = 0.5 * (m[(i, j)] + m[(j, i)]);
            if x.abs() < eps {
                x = 0.0;
            }
            m[(i, j)] = x;
            m[(j, i)] = x;
        }
    }
}

/// `true` when `m` is symmetric to `tol` and has a non-negative diagonal.
pub fn is_valid_covariance(m: &DMatrix<f64>, tol: f64) -> bool {
    let n = m.nrows();
    if m.ncols() != n {
        return false;
    }
    for j in 0..n {
        if m[(j, j)] < -tol {
            return false;
        }
        for i in (j + 1)..n {
            if (m[(i, j)] - m[(j, i)]).abs() > tol {
                return false;
            }
        }
    }
    true
}

/// Sum of `log |m_ii|` over the leading `n` diagonal entries.
pub fn sum_log_abs_diagonal(m: &DMatrix<f64>, n: usize) -> f64 {
    (0..n).map(|i| m[(i, i)].abs().ln()).sum()
}

/// Indices of the diagonal entries of a triangular factor that are
/// numerically non-zero, relative to the largest one.
pub fn numerical_rank_indices(m: &DMatrix<f64>, n: usize) -> Vec<usize> {
    let max = (0..n).fold(0.0_f64, |acc, i| acc.max(m[(i, i)].abs()));
    if max == 0.0 {
        return vec![];
    }
    (0..n)
        .filter(|&i| m[(i, i)].abs() > RANK_TOLERANCE * max)
        .collect()
}
