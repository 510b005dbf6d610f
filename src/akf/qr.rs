use nalgebra::{DMatrix, DVector};
use tracing::{debug, warn};

use super::filter::AugmentedFilter;
use super::results::{FilteringResults, Recording};
use super::smoother::{AugmentedSmoother, SmoothingResults};
use crate::error::{AkfError, Result};
use crate::kalman::kalman_filter;
use crate::likelihood::{DiffuseLikelihood, MarginalLikelihood, ProfileLikelihood};
use crate::linalg::{clean_symmetric, numerical_rank_indices, sum_log_abs_diagonal};
use crate::ssf::{Observations, StateSpaceModel};

/// Least-squares estimate of the diffuse effects.
///
/// The model is filtered with the ordinary Kalman filter (diffuse effects set
/// to zero) and the diffuse effects become GLS regressors:
///
/// ```text
///   e_t / sqrt(f_t) = X~_t delta + noise
/// ```
///
/// where `X~` are the forecasts `Z T..T B0` whitened by the same filter.
/// Regressors that are numerically dependent on earlier ones are dropped: the
/// estimate then works with the retained columns only, and the dropped
/// effects are reported as zero.
#[derive(Debug, Clone)]
pub struct QrEstimate {
    k0: usize,
    /// columns of `B0` kept in the regression
    retained: Vec<usize>,
    /// R of the QR of the retained whitened regressors
    r: DMatrix<f64>,
    /// Q' y~ restricted to the retained regressors
    z: DVector<f64>,
    /// norm of the least-squares residual
    rho: f64,
    /// R of the QR of the retained raw regressors
    raw_r: DMatrix<f64>,
    log_det: f64,
    nobs: usize,
    residuals: Vec<f64>,
}

impl QrEstimate {
    pub fn diffuse_dim(&self) -> usize {
        self.k0
    }

    /// Number of independent diffuse regressors.
    pub fn rank(&self) -> usize {
        self.retained.len()
    }

    /// Indices of the diffuse effects kept in the regression.
    pub fn retained(&self) -> &[usize] {
        &self.retained
    }

    /// Number of informative observations.
    pub fn nobs(&self) -> usize {
        self.nobs
    }

    fn retained_delta(&self) -> Result<DVector<f64>> {
        if self.rank() == 0 {
            return Ok(DVector::zeros(0));
        }
        self.r
            .solve_upper_triangular(&self.z)
            .ok_or(AkfError::NotIdentifiable)
    }

    /// delta = R^-1 z on the retained effects, zero elsewhere.
    pub fn delta(&self) -> Result<DVector<f64>> {
        let sub = self.retained_delta()?;
        let mut delta = DVector::zeros(self.k0);
        for (&j, v) in self.retained.iter().zip(sub.iter()) {
            delta[j] = *v;
        }
        Ok(delta)
    }

    /// (R'R)^-1 = R^-1 R^-T on the retained effects, zero elsewhere.
    pub fn unscaled_covariance(&self) -> Result<DMatrix<f64>> {
        let k = self.rank();
        let mut cov = DMatrix::zeros(self.k0, self.k0);
        if k == 0 {
            return Ok(cov);
        }
        let rinv = self
            .r
            .solve_upper_triangular(&DMatrix::identity(k, k))
            .ok_or(AkfError::NotIdentifiable)?;
        let sub = &rinv * rinv.transpose();
        for (a, &i) in self.retained.iter().enumerate() {
            for (b, &j) in self.retained.iter().enumerate() {
                cov[(i, j)] = sub[(a, b)];
            }
        }
        clean_symmetric(&mut cov);
        Ok(cov)
    }

    pub fn ssq(&self) -> f64 {
        self.rho * self.rho
    }

    pub fn log_determinant(&self) -> f64 {
        self.log_det
    }

    /// 2 sum log |R_ii|
    pub fn diffuse_correction(&self) -> f64 {
        2.0 * sum_log_abs_diagonal(&self.r, self.rank())
    }

    /// `e/sqrt(f) - X~ delta` on the informative observations.
    pub fn residuals(&self) -> &[f64] {
        &self.residuals
    }

    /// Log-determinant of the retained raw regressors' cross-product.
    /// Returns `(correction, rank)`.
    pub fn marginal_correction(&self) -> (f64, usize) {
        let corr = 2.0 * sum_log_abs_diagonal(&self.raw_r, self.rank());
        (corr, self.rank())
    }

    pub fn diffuse_likelihood(&self, scaling_factor: bool, residuals: bool) -> Result<DiffuseLikelihood> {
        DiffuseLikelihood::new(
            self.nobs,
            self.rank(),
            self.ssq(),
            self.log_det,
            self.diffuse_correction(),
            scaling_factor,
            if residuals { self.residuals.clone() } else { vec![] },
        )
    }

    pub fn marginal_likelihood(
        &self,
        scaling_factor: bool,
        residuals: bool,
    ) -> Result<MarginalLikelihood> {
        let (corr, rank) = self.marginal_correction();
        Ok(MarginalLikelihood::new(
            self.diffuse_likelihood(scaling_factor, residuals)?,
            corr,
            rank,
        ))
    }

    pub fn profile_likelihood(
        &self,
        scaling_factor: bool,
        residuals: bool,
    ) -> Result<ProfileLikelihood> {
        let likelihood = DiffuseLikelihood::new(
            self.nobs,
            0,
            self.ssq(),
            self.log_det,
            0.0,
            scaling_factor,
            if residuals { self.residuals.clone() } else { vec![] },
        )?;
        let s2 = self.ssq() / (self.nobs - self.rank()) as f64;
        let cov = self.unscaled_covariance()? * s2;
        Ok(ProfileLikelihood::new(likelihood, self.delta()?, cov))
    }
}

/// Copies the columns `cols` of `m`, followed by column `last` when given.
fn select_columns(m: &DMatrix<f64>, cols: &[usize], last: Option<usize>) -> DMatrix<f64> {
    let all: Vec<usize> = cols.iter().copied().chain(last).collect();
    DMatrix::from_fn(m.nrows(), all.len(), |i, j| m[(i, all[j])])
}

/// Regression-based estimator of the diffuse effects.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QrFilter;

impl QrFilter {
    pub fn new() -> Self {
        Self
    }

    pub fn process<M, D>(&self, model: &M, data: &D) -> Result<QrEstimate>
    where
        M: StateSpaceModel + ?Sized,
        D: Observations + ?Sized,
    {
        let d = model.state_dim();
        let k0 = model.diffuse_dim();
        let innovations = kalman_filter(model, data)?;

        let b0 = model.diffuse_constraints();
        if b0.nrows() != d || b0.ncols() != k0 {
            return Err(AkfError::Initialization(format!(
                "B0 must be {}x{}, got {}x{}",
                d,
                k0,
                b0.nrows(),
                b0.ncols()
            )));
        }

        // Raw forecasts G_t = T..T B0 and their whitening filter W_t, both
        // propagated alongside the stored innovations.
        let mut g = b0;
        let mut w = DMatrix::<f64>::zeros(d, k0);
        let m = innovations.iter().filter(|i| i.is_informative()).count();
        let mut raw = DMatrix::<f64>::zeros(m, k0);
        let mut xy = DMatrix::<f64>::zeros(m, k0 + 1);
        let mut log_det = 0.0;
        let mut row = 0;
        for (t, inn) in innovations.iter().enumerate() {
            if inn.is_informative() {
                let x = model.loading_columns(t, &g);
                // eps = x - Z W
                let eps = &x - model.loading_columns(t, &w);
                let s = inn.f.sqrt();
                for j in 0..k0 {
                    raw[(row, j)] = x[j];
                    xy[(row, j)] = eps[j] / s;
                }
                xy[(row, k0)] = inn.e / s;
                w.ger(1.0 / inn.f, &inn.gain, &eps, 1.0);
                log_det += inn.f.ln();
                row += 1;
            }
            model.transition_columns(t, &mut g);
            model.transition_columns(t, &mut w);
        }

        if m <= k0 {
            return Err(AkfError::InsufficientData { nobs: m, nd: k0 });
        }

        // Without pivoting, |R_jj| is the part of column j orthogonal to the
        // earlier columns, so the significant diagonal picks a basis.
        let retained = if k0 > 0 {
            numerical_rank_indices(&xy.columns(0, k0).into_owned().qr().r(), k0)
        } else {
            vec![]
        };
        let rank = retained.len();
        if rank < k0 {
            warn!(rank, k0, "diffuse regressors are rank deficient");
        }

        let sub = select_columns(&xy, &retained, Some(k0));
        let rfull = sub.clone().qr().r();
        let r = rfull.view((0, 0), (rank, rank)).into_owned();
        let z = DVector::from_iterator(rank, (0..rank).map(|i| rfull[(i, rank)]));
        let rho = rfull[(rank, rank)].abs();
        let raw_r = if rank > 0 {
            select_columns(&raw, &retained, None).qr().r()
        } else {
            DMatrix::zeros(0, 0)
        };

        let mut estimate = QrEstimate {
            k0,
            retained,
            r,
            z,
            rho,
            raw_r,
            log_det,
            nobs: m,
            residuals: vec![],
        };
        let delta = estimate.retained_delta()?;
        let fitted = sub.columns(0, rank) * &delta;
        estimate.residuals = (0..m).map(|i| sub[(i, rank)] - fitted[i]).collect();

        debug!(nobs = m, k0, rank, ssq = estimate.ssq(), "qr filter done");
        Ok(estimate)
    }
}

/// Smoother using the least-squares diffuse effects of a [`QrFilter`] on a
/// non-collapsed augmented filter run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QrSmoother {
    variance_tracking: bool,
    rescale_variance: bool,
}

impl QrSmoother {
    pub fn new(variance_tracking: bool) -> Self {
        Self {
            variance_tracking,
            rescale_variance: false,
        }
    }

    pub fn with_rescaled_variance(mut self, rescale: bool) -> Self {
        self.rescale_variance = rescale;
        self
    }

    pub fn process<M, D>(&self, model: &M, data: &D) -> Result<SmoothingResults>
    where
        M: StateSpaceModel + ?Sized,
        D: Observations + ?Sized,
    {
        let estimate = QrFilter::new().process(model, data)?;
        let mut results = FilteringResults::new(Recording::Full);
        AugmentedFilter::new(false).process(model, data, &mut results)?;
        AugmentedSmoother::new(self.variance_tracking)
            .with_rescaled_variance(self.rescale_variance)
            .process_with_effects(
                model,
                &results,
                estimate.delta()?,
                estimate.unscaled_covariance()?,
            )
    }
}
