use nalgebra::DVector;

use super::state::AugmentedState;
use crate::linalg::MACHINE_ZERO;
use crate::ssf::StateSpaceModel;

/// Prediction error of one observation against an augmented state.
#[derive(Debug, Clone, PartialEq)]
pub struct AugmentedPredictionError {
    /// e = y - Z a
    pub e: f64,
    /// v = Z P Z' + H, clamped to 0 below `MACHINE_ZERO`
    pub v: f64,
    /// E = -Z B over the active diffuse columns
    pub ed: DVector<f64>,
    /// M = P Z'
    pub m: DVector<f64>,
    pub missing: bool,
}

impl AugmentedPredictionError {
    pub fn missing(dim: usize, ndiffuse: usize) -> Self {
        Self {
            e: 0.0,
            v: 0.0,
            ed: DVector::zeros(ndiffuse),
            m: DVector::zeros(dim),
            missing: true,
        }
    }

    pub fn compute<M: StateSpaceModel + ?Sized>(
        model: &M,
        pos: usize,
        y: f64,
        state: &AugmentedState,
    ) -> Self {
        let m = model.covariance_loading(pos, &state.p);
        let mut v = model.loading_dot(pos, &m) + model.measurement_variance(pos);
        if v < MACHINE_ZERO {
            v = 0.0;
        }
        let e = y - model.loading_dot(pos, &state.a);
        let b = state.constraints().into_owned();
        let ed = -model.loading_columns(pos, &b);
        Self {
            e,
            v,
            ed,
            m,
            missing: false,
        }
    }

    /// Observed with a strictly positive variance.
    pub fn is_informative(&self) -> bool {
        !self.missing && self.v > 0.0
    }

    /// e / sqrt(v), when the error carries information.
    pub fn standardized(&self) -> Option<f64> {
        if self.is_informative() {
            Some(self.e / self.v.sqrt())
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ssf::DenseModel;

    #[test]
    fn test_first_local_level_error() {
        let m = DenseModel::local_level(0.5, 2.0);
        let s = AugmentedState::from_model(&m).unwrap();
        let pe = AugmentedPredictionError::compute(&m, 0, 3.0, &s);
        assert!((pe.e - 3.0).abs() < 1e-15);
        assert!((pe.v - 2.0).abs() < 1e-15);
        assert!((pe.ed[0] + 1.0).abs() < 1e-15);
        assert_eq!(pe.m[0], 0.0);
        assert!((pe.standardized().unwrap() - 3.0 / 2.0_f64.sqrt()).abs() < 1e-15);
    }

    #[test]
    fn test_tiny_variance_is_clamped() {
        let m = DenseModel::local_level(0.0, 1e-20);
        let s = AugmentedState::from_model(&m).unwrap();
        let pe = AugmentedPredictionError::compute(&m, 0, 1.0, &s);
        assert_eq!(pe.v, 0.0);
        assert!(!pe.is_informative());
        assert!(pe.standardized().is_none());
    }

    #[test]
    fn test_missing_error() {
        let pe = AugmentedPredictionError::missing(3, 2);
        assert!(pe.missing);
        assert_eq!(pe.ed.len(), 2);
        assert!(pe.standardized().is_none());
    }
}
