use nalgebra::{DMatrix, DVector};

use crate::error::Result;
use crate::ssf::StateSpaceModel;

/// Default kappa for the approximate diffuse initialization.
pub fn default_kappa() -> f64 {
    1e6
}

/// Approximate diffuse view of a model.
///
/// The diffuse effects get a large but finite prior variance:
/// `P0 = Pf0 + kappa * B0 * B0'`, and the model is seen as having no diffuse
/// part at all. Useful to cross-check the exact diffuse engine.
#[derive(Debug)]
pub struct ApproximateDiffuse<'a, M: ?Sized> {
    model: &'a M,
    kappa: f64,
}

impl<'a, M: StateSpaceModel + ?Sized> ApproximateDiffuse<'a, M> {
    pub fn new(model: &'a M, kappa: f64) -> Self {
        Self { model, kappa }
    }

    pub fn with_default_kappa(model: &'a M) -> Self {
        Self::new(model, default_kappa())
    }

    pub fn kappa(&self) -> f64 {
        self.kappa
    }
}

impl<M: StateSpaceModel + ?Sized> StateSpaceModel for ApproximateDiffuse<'_, M> {
    fn state_dim(&self) -> usize {
        self.model.state_dim()
    }

    fn diffuse_dim(&self) -> usize {
        0
    }

    fn initial_state(&self) -> DVector<f64> {
        self.model.initial_state()
    }

    fn initial_covariance(&self) -> Result<DMatrix<f64>> {
        let mut p0 = self.model.initial_covariance()?;
        let b0 = self.model.diffuse_constraints();
        p0 += &b0 * b0.transpose() * self.kappa;
        Ok(p0)
    }

    fn diffuse_constraints(&self) -> DMatrix<f64> {
        DMatrix::zeros(self.state_dim(), 0)
    }

    fn transition(&self, pos: usize, x: &mut DVector<f64>) {
        self.model.transition(pos, x)
    }

    fn transition_transpose(&self, pos: usize, x: &mut DVector<f64>) {
        self.model.transition_transpose(pos, x)
    }

    fn add_innovation_covariance(&self, pos: usize, p: &mut DMatrix<f64>) {
        self.model.add_innovation_covariance(pos, p)
    }

    fn loading_dot(&self, pos: usize, x: &DVector<f64>) -> f64 {
        self.model.loading_dot(pos, x)
    }

    fn add_loading(&self, pos: usize, alpha: f64, x: &mut DVector<f64>) {
        self.model.add_loading(pos, alpha, x)
    }

    fn measurement_variance(&self, pos: usize) -> f64 {
        self.model.measurement_variance(pos)
    }

    fn transition_columns(&self, pos: usize, m: &mut DMatrix<f64>) {
        self.model.transition_columns(pos, m)
    }

    fn transition_transpose_columns(&self, pos: usize, m: &mut DMatrix<f64>) {
        self.model.transition_transpose_columns(pos, m)
    }

    fn loading(&self, pos: usize) -> DVector<f64> {
        self.model.loading(pos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ssf::DenseModel;

    #[test]
    fn test_approximate_diffuse_covariance() {
        let m = DenseModel::local_linear_trend(0.1, 0.01, 1.0);
        let a = ApproximateDiffuse::with_default_kappa(&m);
        assert_eq!(a.diffuse_dim(), 0);
        assert_eq!(a.diffuse_constraints().ncols(), 0);
        let p0 = a.initial_covariance().unwrap();
        assert!((p0[(0, 0)] - 1e6).abs() < 1e-4);
        assert!((p0[(1, 1)] - 1e6).abs() < 1e-4);
        assert_eq!(p0[(0, 1)], 0.0);
        assert_eq!(a.measurement_variance(0), 1.0);
    }

    #[test]
    fn test_default_kappa() {
        assert!((default_kappa() - 1e6).abs() < 1e-10);
    }
}
