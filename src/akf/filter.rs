use tracing::{debug, trace};

use super::augmentation::QAugmentation;
use super::prediction_error::AugmentedPredictionError;
use super::results::FilteringResults;
use super::state::AugmentedState;
use crate::error::Result;
use crate::ssf::{Observations, StateSpaceModel};

/// Forward recursion of the diffuse augmented Kalman filter.
///
/// At each position `t`:
///   1. collapse check (when enabled and the state is still diffuse)
///   2. forecast saved: a_t, P_t, B_t
///   3. prediction error: e = y - Z a, E = -Z B, v = Z P Z' + H, M = P Z'
///   4. accumulator and state update
///   5. transition: a <- T a, P <- T P T' + V, B <- T B
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AugmentedFilter {
    collapsing: bool,
}

impl Default for AugmentedFilter {
    fn default() -> Self {
        Self { collapsing: true }
    }
}

impl AugmentedFilter {
    pub fn new(collapsing: bool) -> Self {
        Self { collapsing }
    }

    pub fn is_collapsing(&self) -> bool {
        self.collapsing
    }

    pub fn process<M, D>(&self, model: &M, data: &D, results: &mut FilteringResults) -> Result<()>
    where
        M: StateSpaceModel + ?Sized,
        D: Observations + ?Sized,
    {
        let mut state = AugmentedState::from_model(model)?;
        let mut q = QAugmentation::new(state.diffuse_dim());
        let d = state.dim();

        for t in 0..data.len() {
            if self.collapsing && state.is_diffuse() && q.can_collapse() {
                let before = state.clone();
                if q.collapse(&mut state) {
                    debug!(pos = t, k0 = q.diffuse_dim(), "diffuse constraints collapsed");
                    results.save_collapse(t, before);
                }
            }
            results.save_forecast(t, &state);

            let pe = if data.is_missing(t) {
                AugmentedPredictionError::missing(d, state.active_diffuse_dim())
            } else {
                AugmentedPredictionError::compute(model, t, data.value(t), &state)
            };
            trace!(pos = t, e = pe.e, v = pe.v, missing = pe.missing, "prediction error");

            q.update(&pe, state.ndropped());
            state.update(t, &pe)?;
            results.save_error(t, pe);
            state.next(t, model);
        }

        debug!(
            n = data.len(),
            nobs = q.nobs(),
            collapsing = ?results.collapsing(),
            "augmented filter done"
        );
        results.finish(q, state);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::akf::results::Recording;
    use crate::error::AkfError;
    use crate::ssf::{DenseModel, TimeSeries};
    use nalgebra::{DMatrix, DVector};

    const LEVEL: [f64; 4] = [3.0, 3.1, 2.9, 3.2];

    #[test]
    fn test_local_level_collapses_after_first_observation() {
        let m = DenseModel::local_level(0.5, 1.0);
        let mut r = FilteringResults::new(Recording::Full);
        AugmentedFilter::new(true)
            .process(&m, &LEVEL[..], &mut r)
            .unwrap();
        assert_eq!(r.collapsing(), Some(1));
        assert_eq!(r.len(), 4);
        let s1 = r.state(1).unwrap();
        assert!((s1.a[0] - 3.0).abs() < 1e-12);
        assert!((s1.p[(0, 0)] - 1.5).abs() < 1e-12);
        assert_eq!(s1.b.ncols(), 0);
        assert_eq!(r.residuals().len(), 3);
    }

    #[test]
    fn test_no_collapse_keeps_constraints() {
        let m = DenseModel::local_level(0.5, 1.0);
        let mut r = FilteringResults::new(Recording::Full);
        AugmentedFilter::new(false)
            .process(&m, &LEVEL[..], &mut r)
            .unwrap();
        assert_eq!(r.collapsing(), None);
        assert!(r.final_state().unwrap().is_diffuse());
        assert!(r.residuals().is_empty());
        assert_eq!(r.accumulator().unwrap().nobs(), 4);
    }

    #[test]
    fn test_same_accumulator_statistics_both_ways() {
        let m = DenseModel::local_linear_trend(0.3, 0.05, 1.0);
        let y = [1.0, 1.4, 2.1, 2.9, 3.2, 4.5, 5.1];
        let mut a = FilteringResults::new(Recording::Light);
        let mut b = FilteringResults::new(Recording::Light);
        AugmentedFilter::new(true).process(&m, &y[..], &mut a).unwrap();
        AugmentedFilter::new(false).process(&m, &y[..], &mut b).unwrap();
        let qa = a.accumulator().unwrap();
        let qb = b.accumulator().unwrap();
        assert_eq!(a.collapsing(), Some(2));
        let lla = qa.ssq().ln() * 5.0 + qa.log_determinant() + qa.diffuse_correction();
        let llb = qb.ssq().ln() * 5.0 + qb.log_determinant() + qb.diffuse_correction();
        assert!((lla - llb).abs() < 1e-9 * llb.abs().max(1.0));
    }

    #[test]
    fn test_missing_observation_is_pure_prediction() {
        let m = DenseModel::local_level(0.5, 1.0);
        let mut y = TimeSeries::from_slice(&LEVEL);
        y.set_missing(2);
        let mut r = FilteringResults::new(Recording::Full);
        AugmentedFilter::new(true).process(&m, &y, &mut r).unwrap();
        let s2 = r.state(2).unwrap();
        let s3 = r.state(3).unwrap();
        assert!(r.error(2).unwrap().missing);
        assert!((s3.a[0] - s2.a[0]).abs() < 1e-15);
        assert!((s3.p[(0, 0)] - s2.p[(0, 0)] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_inconsistent_observation() {
        // Known constant observed without noise, next to an unobserved diffuse level.
        let m = DenseModel::new(
            DMatrix::identity(2, 2),
            DVector::from_column_slice(&[0.0, 1.0]),
            DMatrix::zeros(2, 2),
            0.0,
        )
        .unwrap()
        .with_initial_state(DVector::from_column_slice(&[0.0, 2.0]))
        .unwrap()
        .with_diffuse_constraints(DMatrix::from_column_slice(2, 1, &[1.0, 0.0]))
        .unwrap();
        let mut r = FilteringResults::new(Recording::Light);
        let err = AugmentedFilter::new(true)
            .process(&m, &[2.0, 2.0, 2.5][..], &mut r)
            .unwrap_err();
        match err {
            AkfError::Inconsistent { pos, residual } => {
                assert_eq!(pos, 2);
                assert!((residual - 0.5).abs() < 1e-12);
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_invalid_initialization() {
        let m = DenseModel::local_level(0.5, 1.0)
            .with_initial_covariance(DMatrix::from_element(1, 1, -2.0))
            .unwrap();
        let mut r = FilteringResults::new(Recording::Light);
        assert!(matches!(
            AugmentedFilter::new(true).process(&m, &LEVEL[..], &mut r),
            Err(AkfError::Initialization(_))
        ));
    }
}
