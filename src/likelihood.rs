//! Likelihood records produced by the diffuse filters.

use std::f64::consts::PI;

use nalgebra::{DMatrix, DVector};

use crate::akf::QAugmentation;
use crate::error::{AkfError, Result};

/// Exact diffuse log-likelihood, kept in decomposed form.
///
/// With `n = nobs - nd`:
///
/// ```text
///   scaling on : ll = -0.5 * (n ln(2pi) + n (1 + ln(ssq / n)) + ldet + dcorr)
///   scaling off: ll = -0.5 * (n ln(2pi) + ssq + ldet + dcorr)
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct DiffuseLikelihood {
    nobs: usize,
    nd: usize,
    ssq: f64,
    log_determinant: f64,
    diffuse_correction: f64,
    scaling_factor: bool,
    residuals: Vec<f64>,
}

impl DiffuseLikelihood {
    pub fn new(
        nobs: usize,
        nd: usize,
        ssq: f64,
        log_determinant: f64,
        diffuse_correction: f64,
        scaling_factor: bool,
        residuals: Vec<f64>,
    ) -> Result<Self> {
        if nobs <= nd {
            return Err(AkfError::InsufficientData { nobs, nd });
        }
        Ok(Self {
            nobs,
            nd,
            ssq,
            log_determinant,
            diffuse_correction,
            scaling_factor,
            residuals,
        })
    }

    /// Likelihood from the final accumulator of an augmented filter run.
    pub fn from_accumulator(
        q: &QAugmentation,
        scaling_factor: bool,
        residuals: Vec<f64>,
    ) -> Result<Self> {
        if !q.can_collapse() {
            return Err(AkfError::NotIdentifiable);
        }
        Self::new(
            q.nobs(),
            q.diffuse_dim(),
            q.ssq(),
            q.log_determinant(),
            q.diffuse_correction(),
            scaling_factor,
            residuals,
        )
    }

    pub fn nobs(&self) -> usize {
        self.nobs
    }

    pub fn nd(&self) -> usize {
        self.nd
    }

    /// nobs - nd
    pub fn effective_nobs(&self) -> usize {
        self.nobs - self.nd
    }

    pub fn ssq(&self) -> f64 {
        self.ssq
    }

    pub fn log_determinant(&self) -> f64 {
        self.log_determinant
    }

    pub fn diffuse_correction(&self) -> f64 {
        self.diffuse_correction
    }

    pub fn is_scaled(&self) -> bool {
        self.scaling_factor
    }

    pub fn residuals(&self) -> &[f64] {
        &self.residuals
    }

    pub fn log_likelihood(&self) -> f64 {
        let n = self.effective_nobs() as f64;
        let core = if self.scaling_factor {
            n * (1.0 + (self.ssq / n).ln())
        } else {
            self.ssq
        };
        -0.5 * (n * (2.0 * PI).ln() + core + self.log_determinant + self.diffuse_correction)
    }

    /// ML estimate of the scale, 1 when the scale is not concentrated out.
    pub fn sigma2(&self) -> f64 {
        if self.scaling_factor {
            self.ssq / self.effective_nobs() as f64
        } else {
            1.0
        }
    }

    /// -2 ll + 2 k, counting the concentrated scale as a parameter.
    pub fn aic(&self, nparams: usize) -> f64 {
        -2.0 * self.log_likelihood() + 2.0 * self.parameter_count(nparams)
    }

    /// -2 ll + k ln(n)
    pub fn bic(&self, nparams: usize) -> f64 {
        -2.0 * self.log_likelihood()
            + self.parameter_count(nparams) * (self.effective_nobs() as f64).ln()
    }

    fn parameter_count(&self, nparams: usize) -> f64 {
        (nparams + usize::from(self.scaling_factor)) as f64
    }
}

/// Diffuse likelihood corrected by the log-determinant of the raw diffuse
/// regressors, which makes it invariant to their scaling.
#[derive(Debug, Clone, PartialEq)]
pub struct MarginalLikelihood {
    diffuse: DiffuseLikelihood,
    marginal_correction: f64,
    rank: usize,
}

impl MarginalLikelihood {
    pub fn new(diffuse: DiffuseLikelihood, marginal_correction: f64, rank: usize) -> Self {
        Self {
            diffuse,
            marginal_correction,
            rank,
        }
    }

    pub fn diffuse(&self) -> &DiffuseLikelihood {
        &self.diffuse
    }

    pub fn marginal_correction(&self) -> f64 {
        self.marginal_correction
    }

    /// Numerical rank of the raw diffuse regressors.
    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn log_likelihood(&self) -> f64 {
        self.diffuse.log_likelihood() + 0.5 * self.marginal_correction
    }

    pub fn sigma2(&self) -> f64 {
        self.diffuse.sigma2()
    }
}

/// Likelihood with the diffuse effects treated as fixed unknown coefficients.
#[derive(Debug, Clone, PartialEq)]
pub struct ProfileLikelihood {
    likelihood: DiffuseLikelihood,
    coefficients: DVector<f64>,
    covariance: DMatrix<f64>,
}

impl ProfileLikelihood {
    /// `likelihood` must be built with `nd = 0` and no diffuse correction.
    pub fn new(likelihood: DiffuseLikelihood, coefficients: DVector<f64>, covariance: DMatrix<f64>) -> Self {
        Self {
            likelihood,
            coefficients,
            covariance,
        }
    }

    pub fn likelihood(&self) -> &DiffuseLikelihood {
        &self.likelihood
    }

    pub fn log_likelihood(&self) -> f64 {
        self.likelihood.log_likelihood()
    }

    pub fn sigma2(&self) -> f64 {
        self.likelihood.sigma2()
    }

    /// Estimated diffuse effects.
    pub fn coefficients(&self) -> &DVector<f64> {
        &self.coefficients
    }

    /// s2 (R'R)^-1, with s2 = ssq / (nobs - k0).
    pub fn coefficient_covariance(&self) -> &DMatrix<f64> {
        &self.covariance
    }

    pub fn residuals(&self) -> &[f64] {
        self.likelihood.residuals()
    }
}
