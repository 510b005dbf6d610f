//! State-space model and observation contracts consumed by the filters.
//!
//! Observation equation:  y_t = Z_t * alpha_t + eps_t,      eps_t ~ N(0, H_t)
//! State equation:        alpha_{t+1} = T_t * alpha_t + eta_t, eta_t ~ N(0, V_t)
//! Initial state:         alpha_0 = a0 + B0 * delta + w,    w ~ N(0, Pf0)
//!
//! `delta` is the vector of diffuse effects (infinite prior variance). The
//! filters only talk to a model through the operators of [`StateSpaceModel`],
//! so structured models never need to materialize their dense matrices.

use std::collections::BTreeMap;

use nalgebra::{DMatrix, DVector};

use crate::error::{AkfError, Result};
use crate::linalg::{is_valid_covariance, STATE_ZERO};

/// Univariate state-space model contract.
pub trait StateSpaceModel {
    /// Dimension `d` of the state vector.
    fn state_dim(&self) -> usize;

    /// Number `k0` of diffuse effects.
    fn diffuse_dim(&self) -> usize;

    /// Initial mean `a0`.
    fn initial_state(&self) -> DVector<f64>;

    /// Covariance `Pf0` of the non-diffuse part of the initial state.
    fn initial_covariance(&self) -> Result<DMatrix<f64>>;

    /// Diffuse-constraint basis `B0` (d x k0).
    fn diffuse_constraints(&self) -> DMatrix<f64>;

    /// x <- T(pos) x
    fn transition(&self, pos: usize, x: &mut DVector<f64>);

    /// x <- T(pos)' x
    fn transition_transpose(&self, pos: usize, x: &mut DVector<f64>);

    /// P <- P + V(pos)
    fn add_innovation_covariance(&self, pos: usize, p: &mut DMatrix<f64>);

    /// Z(pos) x
    fn loading_dot(&self, pos: usize, x: &DVector<f64>) -> f64;

    /// x <- x + alpha Z(pos)'
    fn add_loading(&self, pos: usize, alpha: f64, x: &mut DVector<f64>);

    /// Measurement noise variance H(pos).
    fn measurement_variance(&self, _pos: usize) -> f64 {
        0.0
    }

    /// Z(pos)' as a dense vector.
    fn loading(&self, pos: usize) -> DVector<f64> {
        let mut z = DVector::zeros(self.state_dim());
        self.add_loading(pos, 1.0, &mut z);
        z
    }

    /// Applies T(pos) to every column of `m`.
    fn transition_columns(&self, pos: usize, m: &mut DMatrix<f64>) {
        for j in 0..m.ncols() {
            let mut col = m.column(j).into_owned();
            self.transition(pos, &mut col);
            m.set_column(j, &col);
        }
    }

    /// Applies T(pos)' to every column of `m`.
    fn transition_transpose_columns(&self, pos: usize, m: &mut DMatrix<f64>) {
        for j in 0..m.ncols() {
            let mut col = m.column(j).into_owned();
            self.transition_transpose(pos, &mut col);
            m.set_column(j, &col);
        }
    }

    /// P <- T P T' for a symmetric P.
    fn transition_covariance(&self, pos: usize, p: &mut DMatrix<f64>) {
        self.transition_columns(pos, p);
        p.transpose_mut();
        self.transition_columns(pos, p);
    }

    /// N <- T' N T for a symmetric N.
    fn transition_transpose_congruence(&self, pos: usize, n: &mut DMatrix<f64>) {
        self.transition_transpose_columns(pos, n);
        n.transpose_mut();
        self.transition_transpose_columns(pos, n);
    }

    /// Z(pos) m, one entry per column of `m`.
    fn loading_columns(&self, pos: usize, m: &DMatrix<f64>) -> DVector<f64> {
        DVector::from_iterator(
            m.ncols(),
            (0..m.ncols()).map(|j| self.loading_dot(pos, &m.column(j).into_owned())),
        )
    }

    /// P Z(pos)'
    fn covariance_loading(&self, pos: usize, p: &DMatrix<f64>) -> DVector<f64> {
        p * self.loading(pos)
    }
}

/// Source of univariate observations. Missing values are reported per position.
pub trait Observations {
    fn len(&self) -> usize;

    fn value(&self, pos: usize) -> f64;

    fn is_missing(&self, pos: usize) -> bool {
        !self.value(pos).is_finite()
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of non-missing observations.
    fn observed_count(&self) -> usize {
        (0..self.len()).filter(|&t| !self.is_missing(t)).count()
    }
}

impl Observations for [f64] {
    fn len(&self) -> usize {
        <[f64]>::len(self)
    }

    fn value(&self, pos: usize) -> f64 {
        self[pos]
    }
}

impl Observations for Vec<f64> {
    fn len(&self) -> usize {
        self.as_slice().len()
    }

    fn value(&self, pos: usize) -> f64 {
        self[pos]
    }
}

/// Owned series where NaN marks a missing observation.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeSeries {
    values: Vec<f64>,
}

impl TimeSeries {
    pub fn new(values: Vec<f64>) -> Self {
        Self { values }
    }

    pub fn from_slice(values: &[f64]) -> Self {
        Self {
            values: values.to_vec(),
        }
    }

    /// Marks position `pos` as missing.
    pub fn set_missing(&mut self, pos: usize) {
        self.values[pos] = f64::NAN;
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }
}

impl Observations for TimeSeries {
    fn len(&self) -> usize {
        self.values.len()
    }

    fn value(&self, pos: usize) -> f64 {
        self.values[pos]
    }
}

/// Checks that `p` is a square, symmetric, positive semi-definite matrix.
pub fn validate_covariance(p: &DMatrix<f64>, dim: usize) -> Result<()> {
    if p.nrows() != dim || p.ncols() != dim {
        return Err(AkfError::Initialization(format!(
            "covariance must be {}x{}, got {}x{}",
            dim,
            dim,
            p.nrows(),
            p.ncols()
        )));
    }
    if dim == 0 {
        return Ok(());
    }
    if p.iter().any(|v| !v.is_finite()) {
        return Err(AkfError::Initialization(
            "covariance contains non-finite values".into(),
        ));
    }
    let scale = p.diagonal().iter().fold(1.0_f64, |acc, &x| acc.max(x.abs()));
    if !is_valid_covariance(p, STATE_ZERO * scale) {
        return Err(AkfError::Initialization(
            "covariance is not symmetric with a non-negative diagonal".into(),
        ));
    }
    let min_eig = p
        .clone()
        .symmetric_eigenvalues()
        .iter()
        .fold(f64::INFINITY, |acc, &x| acc.min(x));
    if min_eig < -STATE_ZERO * scale {
        return Err(AkfError::Initialization(format!(
            "covariance is not positive semi-definite (min eigenvalue {:e})",
            min_eig
        )));
    }
    Ok(())
}

/// Time-invariant state-space model with dense system matrices.
#[derive(Debug, Clone)]
pub struct DenseModel {
    pub transition: DMatrix<f64>,
    pub loading: DVector<f64>,
    pub innovation_cov: DMatrix<f64>,
    pub measurement_var: f64,
    pub initial_state: DVector<f64>,
    pub initial_cov: DMatrix<f64>,
    pub diffuse: DMatrix<f64>,
    measurement_overrides: BTreeMap<usize, f64>,
}

impl DenseModel {
    /// Builds a model with a zero, fully known initial state.
    pub fn new(
        transition: DMatrix<f64>,
        loading: DVector<f64>,
        innovation_cov: DMatrix<f64>,
        measurement_var: f64,
    ) -> Result<Self> {
        let d = transition.nrows();
        if d == 0 || transition.ncols() != d {
            return Err(AkfError::DimensionMismatch(format!(
                "T must be square and non-empty, got {}x{}",
                transition.nrows(),
                transition.ncols()
            )));
        }
        if loading.len() != d {
            return Err(AkfError::DimensionMismatch(format!(
                "Z must have length {}, got {}",
                d,
                loading.len()
            )));
        }
        if innovation_cov.nrows() != d || innovation_cov.ncols() != d {
            return Err(AkfError::DimensionMismatch(format!(
                "V must be {}x{}, got {}x{}",
                d,
                d,
                innovation_cov.nrows(),
                innovation_cov.ncols()
            )));
        }
        if measurement_var < 0.0 {
            return Err(AkfError::DataError(format!(
                "measurement variance must be non-negative, got {}",
                measurement_var
            )));
        }
        Ok(Self {
            transition,
            loading,
            innovation_cov,
            measurement_var,
            initial_state: DVector::zeros(d),
            initial_cov: DMatrix::zeros(d, d),
            diffuse: DMatrix::zeros(d, 0),
            measurement_overrides: BTreeMap::new(),
        })
    }

    pub fn with_initial_state(mut self, a0: DVector<f64>) -> Result<Self> {
        if a0.len() != self.loading.len() {
            return Err(AkfError::DimensionMismatch(format!(
                "a0 must have length {}, got {}",
                self.loading.len(),
                a0.len()
            )));
        }
        self.initial_state = a0;
        Ok(self)
    }

    pub fn with_initial_covariance(mut self, p0: DMatrix<f64>) -> Result<Self> {
        let d = self.loading.len();
        if p0.nrows() != d || p0.ncols() != d {
            return Err(AkfError::DimensionMismatch(format!(
                "Pf0 must be {}x{}, got {}x{}",
                d,
                d,
                p0.nrows(),
                p0.ncols()
            )));
        }
        self.initial_cov = p0;
        Ok(self)
    }

    pub fn with_diffuse_constraints(mut self, b0: DMatrix<f64>) -> Result<Self> {
        if b0.nrows() != self.loading.len() {
            return Err(AkfError::DimensionMismatch(format!(
                "B0 must have {} rows, got {}",
                self.loading.len(),
                b0.nrows()
            )));
        }
        self.diffuse = b0;
        Ok(self)
    }

    /// Overrides the measurement variance at a single position.
    pub fn with_measurement_variance_at(mut self, pos: usize, var: f64) -> Self {
        self.measurement_overrides.insert(pos, var);
        self
    }

    /// Local level: y_t = mu_t + eps_t, mu_{t+1} = mu_t + eta_t, mu_0 diffuse.
    pub fn local_level(level_var: f64, noise_var: f64) -> Self {
        Self {
            transition: DMatrix::identity(1, 1),
            loading: DVector::from_element(1, 1.0),
            innovation_cov: DMatrix::from_element(1, 1, level_var),
            measurement_var: noise_var,
            initial_state: DVector::zeros(1),
            initial_cov: DMatrix::zeros(1, 1),
            diffuse: DMatrix::identity(1, 1),
            measurement_overrides: BTreeMap::new(),
        }
    }

    /// Local linear trend with diffuse level and slope.
    pub fn local_linear_trend(level_var: f64, slope_var: f64, noise_var: f64) -> Self {
        let mut v = DMatrix::zeros(2, 2);
        v[(0, 0)] = level_var;
        v[(1, 1)] = slope_var;
        Self {
            transition: DMatrix::from_row_slice(2, 2, &[1.0, 1.0, 0.0, 1.0]),
            loading: DVector::from_column_slice(&[1.0, 0.0]),
            innovation_cov: v,
            measurement_var: noise_var,
            initial_state: DVector::zeros(2),
            initial_cov: DMatrix::zeros(2, 2),
            diffuse: DMatrix::identity(2, 2),
            measurement_overrides: BTreeMap::new(),
        }
    }
}

impl StateSpaceModel for DenseModel {
    fn state_dim(&self) -> usize {
        self.loading.len()
    }

    fn diffuse_dim(&self) -> usize {
        self.diffuse.ncols()
    }

    fn initial_state(&self) -> DVector<f64> {
        self.initial_state.clone()
    }

    fn initial_covariance(&self) -> Result<DMatrix<f64>> {
        validate_covariance(&self.initial_cov, self.state_dim())?;
        Ok(self.initial_cov.clone())
    }

    fn diffuse_constraints(&self) -> DMatrix<f64> {
        self.diffuse.clone()
    }

    fn transition(&self, _pos: usize, x: &mut DVector<f64>) {
        *x = &self.transition * &*x;
    }

    fn transition_transpose(&self, _pos: usize, x: &mut DVector<f64>) {
        *x = self.transition.tr_mul(x);
    }

    fn add_innovation_covariance(&self, _pos: usize, p: &mut DMatrix<f64>) {
        *p += &self.innovation_cov;
    }

    fn loading_dot(&self, _pos: usize, x: &DVector<f64>) -> f64 {
        self.loading.dot(x)
    }

    fn add_loading(&self, _pos: usize, alpha: f64, x: &mut DVector<f64>) {
        x.axpy(alpha, &self.loading, 1.0);
    }

    fn measurement_variance(&self, pos: usize) -> f64 {
        self.measurement_overrides
            .get(&pos)
            .copied()
            .unwrap_or(self.measurement_var)
    }

    fn transition_columns(&self, _pos: usize, m: &mut DMatrix<f64>) {
        *m = &self.transition * &*m;
    }

    fn transition_transpose_columns(&self, _pos: usize, m: &mut DMatrix<f64>) {
        *m = self.transition.tr_mul(m);
    }

    fn loading(&self, _pos: usize) -> DVector<f64> {
        self.loading.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_level_dimensions() {
        let m = DenseModel::local_level(0.5, 1.0);
        assert_eq!(m.state_dim(), 1);
        assert_eq!(m.diffuse_dim(), 1);
        assert!((m.measurement_variance(7) - 1.0).abs() < 1e-15);
    }

    #[test]
    fn test_transition_covariance_matches_dense_product() {
        let m = DenseModel::local_linear_trend(0.1, 0.2, 1.0);
        let p = DMatrix::from_row_slice(2, 2, &[2.0, 0.5, 0.5, 1.0]);
        let mut q = p.clone();
        m.transition_covariance(0, &mut q);
        let expected = &m.transition * &p * m.transition.transpose();
        for (a, b) in q.iter().zip(expected.iter()) {
            assert!((a - b).abs() < 1e-12);
        }

        let mut n = p.clone();
        m.transition_transpose_congruence(0, &mut n);
        let expected = m.transition.transpose() * &p * &m.transition;
        for (a, b) in n.iter().zip(expected.iter()) {
            assert!((a - b).abs() < 1e-12);
        }
    }

    #[test]
    fn test_measurement_override() {
        let m = DenseModel::local_level(0.5, 1.0).with_measurement_variance_at(3, 0.0);
        assert_eq!(m.measurement_variance(3), 0.0);
        assert_eq!(m.measurement_variance(2), 1.0);
    }

    #[test]
    fn test_invalid_initial_covariance() {
        let m = DenseModel::local_level(0.5, 1.0)
            .with_initial_covariance(DMatrix::from_element(1, 1, -1.0))
            .unwrap();
        assert!(matches!(
            m.initial_covariance(),
            Err(AkfError::Initialization(_))
        ));
    }

    #[test]
    fn test_dimension_checks() {
        let t = DMatrix::identity(2, 2);
        let z = DVector::from_element(3, 1.0);
        assert!(DenseModel::new(t, z, DMatrix::zeros(2, 2), 1.0).is_err());
    }

    #[test]
    fn test_missing_values() {
        let mut s = TimeSeries::from_slice(&[1.0, 2.0, 3.0]);
        s.set_missing(1);
        assert!(s.is_missing(1));
        assert!(!s.is_missing(0));
        assert_eq!(s.observed_count(), 2);

        let raw = vec![1.0, f64::NAN];
        assert_eq!(raw.observed_count(), 1);
    }
}
