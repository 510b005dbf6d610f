//! Univariate treatment of multivariate models with diagonal measurement noise.
//!
//! A period `t` with `p` series becomes `p` consecutive univariate positions
//! `t * p + i`. The state only moves after the last series of a period, so the
//! univariate engine (filters, smoothers, likelihoods) runs unchanged.

use nalgebra::{DMatrix, DVector};

use crate::error::{AkfError, Result};
use crate::ssf::{validate_covariance, Observations, StateSpaceModel};

/// Multivariate state-space model with `p` series and independent
/// measurement errors.
pub trait MultivariateModel {
    fn state_dim(&self) -> usize;

    fn diffuse_dim(&self) -> usize;

    /// Number `p` of series.
    fn series_count(&self) -> usize;

    fn initial_state(&self) -> DVector<f64>;

    fn initial_covariance(&self) -> Result<DMatrix<f64>>;

    fn diffuse_constraints(&self) -> DMatrix<f64>;

    /// x <- T(t) x
    fn transition(&self, t: usize, x: &mut DVector<f64>);

    /// x <- T(t)' x
    fn transition_transpose(&self, t: usize, x: &mut DVector<f64>);

    /// P <- P + V(t)
    fn add_innovation_covariance(&self, t: usize, p: &mut DMatrix<f64>);

    /// Z_i(t) x for series `i`.
    fn loading_dot(&self, t: usize, i: usize, x: &DVector<f64>) -> f64;

    /// x <- x + alpha Z_i(t)'
    fn add_loading(&self, t: usize, i: usize, alpha: f64, x: &mut DVector<f64>);

    /// Measurement variance of series `i`.
    fn measurement_variance(&self, _t: usize, _i: usize) -> f64 {
        0.0
    }
}

/// Univariate view of a [`MultivariateModel`].
#[derive(Debug)]
pub struct UnivariateModel<'a, M: ?Sized> {
    model: &'a M,
}

impl<'a, M: MultivariateModel + ?Sized> UnivariateModel<'a, M> {
    pub fn new(model: &'a M) -> Self {
        Self { model }
    }

    pub fn series_count(&self) -> usize {
        self.model.series_count()
    }

    /// Period and series of a univariate position.
    pub fn locate(&self, pos: usize) -> (usize, usize) {
        let p = self.model.series_count().max(1);
        (pos / p, pos % p)
    }

    fn ends_period(&self, pos: usize) -> bool {
        let (_, i) = self.locate(pos);
        i + 1 >= self.model.series_count()
    }
}

impl<M: MultivariateModel + ?Sized> StateSpaceModel for UnivariateModel<'_, M> {
    fn state_dim(&self) -> usize {
        self.model.state_dim()
    }

    fn diffuse_dim(&self) -> usize {
        self.model.diffuse_dim()
    }

    fn initial_state(&self) -> DVector<f64> {
        self.model.initial_state()
    }

    fn initial_covariance(&self) -> Result<DMatrix<f64>> {
        self.model.initial_covariance()
    }

    fn diffuse_constraints(&self) -> DMatrix<f64> {
        self.model.diffuse_constraints()
    }

    fn transition(&self, pos: usize, x: &mut DVector<f64>) {
        if self.ends_period(pos) {
            self.model.transition(self.locate(pos).0, x);
        }
    }

    fn transition_transpose(&self, pos: usize, x: &mut DVector<f64>) {
        if self.ends_period(pos) {
            self.model.transition_transpose(self.locate(pos).0, x);
        }
    }

    fn add_innovation_covariance(&self, pos: usize, p: &mut DMatrix<f64>) {
        if self.ends_period(pos) {
            self.model.add_innovation_covariance(self.locate(pos).0, p);
        }
    }

    fn loading_dot(&self, pos: usize, x: &DVector<f64>) -> f64 {
        let (t, i) = self.locate(pos);
        self.model.loading_dot(t, i, x)
    }

    fn add_loading(&self, pos: usize, alpha: f64, x: &mut DVector<f64>) {
        let (t, i) = self.locate(pos);
        self.model.add_loading(t, i, alpha, x)
    }

    fn measurement_variance(&self, pos: usize) -> f64 {
        let (t, i) = self.locate(pos);
        self.model.measurement_variance(t, i)
    }

    fn transition_columns(&self, pos: usize, m: &mut DMatrix<f64>) {
        if !self.ends_period(pos) {
            return;
        }
        let t = self.locate(pos).0;
        for j in 0..m.ncols() {
            let mut col = m.column(j).into_owned();
            self.model.transition(t, &mut col);
            m.set_column(j, &col);
        }
    }

    fn transition_transpose_columns(&self, pos: usize, m: &mut DMatrix<f64>) {
        if !self.ends_period(pos) {
            return;
        }
        let t = self.locate(pos).0;
        for j in 0..m.ncols() {
            let mut col = m.column(j).into_owned();
            self.model.transition_transpose(t, &mut col);
            m.set_column(j, &col);
        }
    }
}

/// `n x p` data matrix read period by period. NaN marks a missing value.
#[derive(Debug, Clone, PartialEq)]
pub struct UnivariateData {
    data: DMatrix<f64>,
}

impl UnivariateData {
    pub fn new(data: DMatrix<f64>) -> Self {
        Self { data }
    }

    /// Builds the matrix from one row per period.
    pub fn from_rows(rows: &[Vec<f64>]) -> Result<Self> {
        let p = rows.first().map_or(0, Vec::len);
        if let Some(bad) = rows.iter().find(|r| r.len() != p) {
            return Err(AkfError::DimensionMismatch(format!(
                "every period must hold {} values, got {}",
                p,
                bad.len()
            )));
        }
        let data = DMatrix::from_fn(rows.len(), p, |t, i| rows[t][i]);
        Ok(Self { data })
    }

    pub fn periods(&self) -> usize {
        self.data.nrows()
    }

    pub fn series_count(&self) -> usize {
        self.data.ncols()
    }

    pub fn matrix(&self) -> &DMatrix<f64> {
        &self.data
    }
}

impl Observations for UnivariateData {
    fn len(&self) -> usize {
        self.data.len()
    }

    fn value(&self, pos: usize) -> f64 {
        let p = self.data.ncols();
        self.data[(pos / p, pos % p)]
    }
}

/// Time-invariant multivariate model: loadings `Z` (p x d), diagonal noise `H`.
#[derive(Debug, Clone)]
pub struct DenseMultivariateModel {
    pub transition: DMatrix<f64>,
    pub loadings: DMatrix<f64>,
    pub innovation_cov: DMatrix<f64>,
    pub measurement_vars: DVector<f64>,
    pub initial_state: DVector<f64>,
    pub initial_cov: DMatrix<f64>,
    pub diffuse: DMatrix<f64>,
}

impl DenseMultivariateModel {
    pub fn new(
        transition: DMatrix<f64>,
        loadings: DMatrix<f64>,
        innovation_cov: DMatrix<f64>,
        measurement_vars: DVector<f64>,
    ) -> Result<Self> {
        let d = transition.nrows();
        if d == 0 || transition.ncols() != d {
            return Err(AkfError::DimensionMismatch(format!(
                "T must be square and non-empty, got {}x{}",
                transition.nrows(),
                transition.ncols()
            )));
        }
        if loadings.ncols() != d || loadings.nrows() == 0 {
            return Err(AkfError::DimensionMismatch(format!(
                "Z must be p x {}, got {}x{}",
                d,
                loadings.nrows(),
                loadings.ncols()
            )));
        }
        if innovation_cov.shape() != (d, d) {
            return Err(AkfError::DimensionMismatch(format!(
                "V must be {}x{}",
                d, d
            )));
        }
        if measurement_vars.len() != loadings.nrows() {
            return Err(AkfError::DimensionMismatch(format!(
                "H must hold {} variances, got {}",
                loadings.nrows(),
                measurement_vars.len()
            )));
        }
        if measurement_vars.iter().any(|&h| h < 0.0) {
            return Err(AkfError::DataError(
                "measurement variances must be non-negative".into(),
            ));
        }
        Ok(Self {
            transition,
            loadings,
            innovation_cov,
            measurement_vars,
            initial_state: DVector::zeros(d),
            initial_cov: DMatrix::zeros(d, d),
            diffuse: DMatrix::zeros(d, 0),
        })
    }

    pub fn with_initial_covariance(mut self, p0: DMatrix<f64>) -> Result<Self> {
        validate_covariance(&p0, self.transition.nrows())?;
        self.initial_cov = p0;
        Ok(self)
    }

    pub fn with_diffuse_constraints(mut self, b0: DMatrix<f64>) -> Result<Self> {
        if b0.nrows() != self.transition.nrows() {
            return Err(AkfError::DimensionMismatch(format!(
                "B0 must have {} rows, got {}",
                self.transition.nrows(),
                b0.nrows()
            )));
        }
        self.diffuse = b0;
        Ok(self)
    }
}

impl MultivariateModel for DenseMultivariateModel {
    fn state_dim(&self) -> usize {
        self.transition.nrows()
    }

    fn diffuse_dim(&self) -> usize {
        self.diffuse.ncols()
    }

    fn series_count(&self) -> usize {
        self.loadings.nrows()
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

    fn transition(&self, _t: usize, x: &mut DVector<f64>) {
        *x = &self.transition * &*x;
    }

    fn transition_transpose(&self, _t: usize, x: &mut DVector<f64>) {
        *x = self.transition.tr_mul(x);
    }

    fn add_innovation_covariance(&self, _t: usize, p: &mut DMatrix<f64>) {
        *p += &self.innovation_cov;
    }

    fn loading_dot(&self, _t: usize, i: usize, x: &DVector<f64>) -> f64 {
        self.loadings.row(i).transpose().dot(x)
    }

    fn add_loading(&self, _t: usize, i: usize, alpha: f64, x: &mut DVector<f64>) {
        x.axpy(alpha, &self.loadings.row(i).transpose(), 1.0);
    }

    fn measurement_variance(&self, _t: usize, i: usize) -> f64 {
        self.measurement_vars[i]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ssf::DenseModel;
    use crate::toolkit;

    const Y: [f64; 8] = [1.0, 1.4, 2.1, 2.9, 3.2, 4.5, 5.1, 5.3];

    fn local_level(series: usize) -> DenseMultivariateModel {
        DenseMultivariateModel::new(
            DMatrix::identity(1, 1),
            DMatrix::from_element(series, 1, 1.0),
            DMatrix::from_element(1, 1, 0.5),
            DVector::from_element(series, 1.0),
        )
        .unwrap()
        .with_diffuse_constraints(DMatrix::identity(1, 1))
        .unwrap()
    }

    #[test]
    fn test_single_series_reproduces_univariate() {
        let mv = local_level(1);
        let model = UnivariateModel::new(&mv);
        let data = UnivariateData::new(DMatrix::from_column_slice(8, 1, &Y));
        let uni = DenseModel::local_level(0.5, 1.0);

        for collapsing in [true, false] {
            let a = toolkit::likelihood_computer(collapsing, true, false)(&model, &data).unwrap();
            let b = toolkit::likelihood_computer(collapsing, true, false)(&uni, &Y[..]).unwrap();
            assert!((a.log_likelihood() - b.log_likelihood()).abs() < 1e-12);
        }

        let sa = toolkit::smooth(&model, &data, true, false, true).unwrap();
        let sb = toolkit::smooth(&uni, &Y[..], true, false, true).unwrap();
        for t in 0..Y.len() {
            assert!((sa.state(t).unwrap()[0] - sb.state(t).unwrap()[0]).abs() < 1e-12);
            assert!((sa.variance(t).unwrap()[(0, 0)] - sb.variance(t).unwrap()[(0, 0)]).abs() < 1e-12);
        }
    }

    #[test]
    fn test_unobserved_series_is_ignored() {
        let mv = local_level(2);
        let model = UnivariateModel::new(&mv);
        let rows: Vec<Vec<f64>> = Y.iter().map(|&y| vec![y, f64::NAN]).collect();
        let data = UnivariateData::from_rows(&rows).unwrap();
        assert_eq!(data.len(), 16);
        assert_eq!(data.observed_count(), 8);
        let uni = DenseModel::local_level(0.5, 1.0);

        let a = toolkit::likelihood_computer(true, true, false)(&model, &data).unwrap();
        let b = toolkit::likelihood_computer(true, true, false)(&uni, &Y[..]).unwrap();
        assert!((a.log_likelihood() - b.log_likelihood()).abs() < 1e-12);

        let sa = toolkit::smooth(&model, &data, false, false, true).unwrap();
        let sb = toolkit::smooth(&uni, &Y[..], false, false, true).unwrap();
        for t in 0..Y.len() {
            assert!((sa.state(2 * t).unwrap()[0] - sb.state(t).unwrap()[0]).abs() < 1e-10);
        }
    }

    #[test]
    fn test_positions() {
        let mv = local_level(3);
        let model = UnivariateModel::new(&mv);
        assert_eq!(model.locate(7), (2, 1));
        let mut x = DVector::from_element(1, 2.0);
        model.transition(7, &mut x);
        assert_eq!(x[0], 2.0);
        let mut p = DMatrix::zeros(1, 1);
        model.add_innovation_covariance(7, &mut p);
        assert_eq!(p[(0, 0)], 0.0);
        model.add_innovation_covariance(8, &mut p);
        assert_eq!(p[(0, 0)], 0.5);
    }

    #[test]
    fn test_dimension_errors() {
        assert!(matches!(
            UnivariateData::from_rows(&[vec![1.0, 2.0], vec![3.0]]),
            Err(AkfError::DimensionMismatch(_))
        ));
        assert!(matches!(
            DenseMultivariateModel::new(
                DMatrix::identity(2, 2),
                DMatrix::zeros(1, 2),
                DMatrix::zeros(2, 2),
                DVector::zeros(2),
            ),
            Err(AkfError::DimensionMismatch(_))
        ));
    }
}
