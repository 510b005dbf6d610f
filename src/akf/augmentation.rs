use nalgebra::{DMatrix, DVector};

use super::prediction_error::AugmentedPredictionError;
use super::state::AugmentedState;
use crate::linalg::{clean_symmetric, givens_triangularize, sum_log_abs_diagonal, RANK_TOLERANCE};

/// Sufficient statistics of the diffuse effects, kept as a triangular factor.
///
/// The leading `(k0+1) x (k0+1)` block `L` of `q` satisfies
/// `L L' = [X r]' [X r]`, where the rows of `X` are the normalized diffuse
/// prediction errors `E_t / sqrt(v_t)` and `r` holds `e_t / sqrt(v_t)`.
/// Column `k0+1` is scratch space for the incoming observation.
///
/// ```text
///     | A   0 |
/// L = |       |      A: k0 x k0, b: k0, c: scalar
///     | b'  c |
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct QAugmentation {
    q: DMatrix<f64>,
    k0: usize,
    log_det: f64,
    nobs: usize,
}

impl QAugmentation {
    pub fn new(k0: usize) -> Self {
        Self {
            q: DMatrix::zeros(k0 + 1, k0 + 2),
            k0,
            log_det: 0.0,
            nobs: 0,
        }
    }

    /// Number of diffuse effects.
    pub fn diffuse_dim(&self) -> usize {
        self.k0
    }

    /// Rotates one prediction error into the factor.
    ///
    /// `ndropped` is the number of diffuse columns the error was computed
    /// without; its entries go after them. Missing and degenerate errors
    /// carry no information and are skipped.
    pub fn update(&mut self, pe: &AugmentedPredictionError, ndropped: usize) {
        if !pe.is_informative() {
            return;
        }
        let k0 = self.k0;
        let col = k0 + 1;
        let s = pe.v.sqrt();
        self.q.column_mut(col).fill(0.0);
        for (j, ej) in pe.ed.iter().enumerate() {
            self.q[(ndropped + j, col)] = ej / s;
        }
        self.q[(k0, col)] = pe.e / s;
        givens_triangularize(&mut self.q, col);
        self.log_det += pe.v.ln();
        self.nobs += 1;
    }

    /// Top-left `k0 x k0` block.
    pub fn a(&self) -> DMatrix<f64> {
        self.q.view((0, 0), (self.k0, self.k0)).into_owned()
    }

    /// First `k0` entries of the residual row.
    pub fn b(&self) -> DVector<f64> {
        DVector::from_iterator(self.k0, (0..self.k0).map(|j| self.q[(self.k0, j)]))
    }

    pub fn c(&self) -> f64 {
        self.q[(self.k0, self.k0)]
    }

    /// Collapsing is legal once every diagonal entry of `a()` is significant
    /// relative to its row.
    ///
    /// Row `i` of `a()` has the norm of the `i`-th accumulated regressor, so
    /// the test does not depend on the scale of the data.
    pub fn can_collapse(&self) -> bool {
        (0..self.k0).all(|i| {
            let d = self.q[(i, i)];
            let norm = self.q.view((i, 0), (1, i + 1)).norm();
            d > 0.0 && d > RANK_TOLERANCE * norm
        })
    }

    /// `a'^-1`, when `a()` is invertible.
    pub fn inverse_transposed_factor(&self) -> Option<DMatrix<f64>> {
        if self.k0 == 0 {
            return Some(DMatrix::zeros(0, 0));
        }
        if !self.can_collapse() {
            return None;
        }
        self.a()
            .transpose()
            .solve_upper_triangular(&DMatrix::identity(self.k0, self.k0))
    }

    /// GLS estimate of the diffuse effects: `-a'^-1 b`.
    pub fn delta(&self) -> Option<DVector<f64>> {
        if self.k0 == 0 {
            return Some(DVector::zeros(0));
        }
        if !self.can_collapse() {
            return None;
        }
        self.a().transpose().solve_upper_triangular(&(-self.b()))
    }

    /// Covariance of the diffuse effects: `(a a')^-1`.
    pub fn delta_covariance(&self) -> Option<DMatrix<f64>> {
        let s = self.inverse_transposed_factor()?;
        let mut sigma = &s * s.transpose();
        clean_symmetric(&mut sigma);
        Some(sigma)
    }

    /// Folds the active diffuse constraints of `state` into its mean and
    /// covariance. Returns `false` (and leaves `state` untouched) when
    /// collapsing is not legal yet.
    pub fn collapse(&self, state: &mut AugmentedState) -> bool {
        if !state.is_diffuse() || state.ndropped() != 0 || !self.can_collapse() {
            return false;
        }
        // X = B a'^-1, computed as X' = a^-1 B'
        let bt = state.constraints().transpose();
        let xt = match self.a().solve_lower_triangular(&bt) {
            Some(xt) => xt,
            None => return false,
        };
        // a <- a - X b
        let shift = xt.tr_mul(&self.b());
        state.a -= shift;
        // P <- P + X X'
        state.p += xt.tr_mul(&xt);
        clean_symmetric(&mut state.p);
        state.drop_constraints();
        true
    }

    /// Sum of squared normalized residuals, after projection on the diffuse effects.
    pub fn ssq(&self) -> f64 {
        let c = self.c();
        c * c
    }

    /// Sum of `log v` over the informative observations.
    pub fn log_determinant(&self) -> f64 {
        self.log_det
    }

    /// `log |a a'|`
    pub fn diffuse_correction(&self) -> f64 {
        2.0 * sum_log_abs_diagonal(&self.q, self.k0)
    }

    /// Number of informative observations.
    pub fn nobs(&self) -> usize {
        self.nobs
    }
}
