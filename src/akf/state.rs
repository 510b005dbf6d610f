use nalgebra::{DMatrix, DMatrixView, DVector};

use super::prediction_error::AugmentedPredictionError;
use crate::error::{AkfError, Result};
use crate::linalg::{clean_symmetric, STATE_ZERO};
use crate::ssf::StateSpaceModel;

/// One-step-ahead state of the augmented filter.
///
/// The state is `alpha = a + B * delta + w` with `w ~ N(0, P)`. Columns of `B`
/// before `ndropped` have been folded into `a`/`P` by a collapse and are no
/// longer tracked.
#[derive(Debug, Clone, PartialEq)]
pub struct AugmentedState {
    pub a: DVector<f64>,
    pub p: DMatrix<f64>,
    b: DMatrix<f64>,
    ndropped: usize,
}

impl AugmentedState {
    pub fn new(a: DVector<f64>, p: DMatrix<f64>, b: DMatrix<f64>) -> Result<Self> {
        let d = a.len();
        if p.nrows() != d || p.ncols() != d {
            return Err(AkfError::Initialization(format!(
                "P must be {}x{}, got {}x{}",
                d,
                d,
                p.nrows(),
                p.ncols()
            )));
        }
        if b.nrows() != d {
            return Err(AkfError::Initialization(format!(
                "B must have {} rows, got {}",
                d,
                b.nrows()
            )));
        }
        Ok(Self {
            a,
            p,
            b,
            ndropped: 0,
        })
    }

    /// Initial state `(a0, Pf0, B0)` of `model`.
    pub fn from_model<M: StateSpaceModel + ?Sized>(model: &M) -> Result<Self> {
        let d = model.state_dim();
        let a0 = model.initial_state();
        if a0.len() != d {
            return Err(AkfError::Initialization(format!(
                "a0 must have length {}, got {}",
                d,
                a0.len()
            )));
        }
        let b0 = model.diffuse_constraints();
        if b0.ncols() != model.diffuse_dim() {
            return Err(AkfError::Initialization(format!(
                "B0 must have {} columns, got {}",
                model.diffuse_dim(),
                b0.ncols()
            )));
        }
        Self::new(a0, model.initial_covariance()?, b0)
    }

    pub fn dim(&self) -> usize {
        self.a.len()
    }

    /// Number of diffuse effects the state was created with (`k0`).
    pub fn diffuse_dim(&self) -> usize {
        self.b.ncols()
    }

    pub fn ndropped(&self) -> usize {
        self.ndropped
    }

    /// Number of diffuse columns still carried by the state.
    pub fn active_diffuse_dim(&self) -> usize {
        self.b.ncols() - self.ndropped
    }

    pub fn is_diffuse(&self) -> bool {
        self.active_diffuse_dim() > 0
    }

    /// Active diffuse constraints `B[:, ndropped..]`.
    pub fn constraints(&self) -> DMatrixView<'_, f64> {
        self.b.columns(self.ndropped, self.active_diffuse_dim())
    }

    /// Marks every diffuse column as resolved.
    pub fn drop_constraints(&mut self) {
        self.ndropped = self.b.ncols();
    }

    /// Measurement update with the prediction error computed on this state.
    ///
    /// A zero-variance error is only accepted when its residual is zero, in
    /// which case the state is left untouched.
    pub fn update(&mut self, pos: usize, pe: &AugmentedPredictionError) -> Result<()> {
        if pe.missing {
            return Ok(());
        }
        if pe.v == 0.0 {
            if pe.e.abs() >= STATE_ZERO {
                return Err(AkfError::Inconsistent {
                    pos,
                    residual: pe.e,
                });
            }
            return Ok(());
        }
        let v = pe.v;
        // a <- a + M e / v
        self.a.axpy(pe.e / v, &pe.m, 1.0);
        // B[:, j] <- B[:, j] + M E_j / v
        let start = self.ndropped;
        for (j, ej) in pe.ed.iter().enumerate() {
            self.b.column_mut(start + j).axpy(ej / v, &pe.m, 1.0);
        }
        // P <- P - M M' / v
        self.p.ger(-1.0 / v, &pe.m, &pe.m, 1.0);
        clean_symmetric(&mut self.p);
        Ok(())
    }

    /// Transition to the next period: `a <- T a`, `P <- T P T' + V`, `B <- T B`.
    pub fn next<M: StateSpaceModel + ?Sized>(&mut self, pos: usize, model: &M) {
        model.transition(pos, &mut self.a);
        model.transition_covariance(pos, &mut self.p);
        model.add_innovation_covariance(pos, &mut self.p);
        clean_symmetric(&mut self.p);
        if self.is_diffuse() {
            let mut active = self.constraints().into_owned();
            model.transition_columns(pos, &mut active);
            let start = self.ndropped;
            self.b
                .columns_mut(start, active.ncols())
                .copy_from(&active);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ssf::DenseModel;

    #[test]
    fn test_from_model_local_trend() {
        let m = DenseModel::local_linear_trend(0.1, 0.01, 1.0);
        let s = AugmentedState::from_model(&m).unwrap();
        assert_eq!(s.dim(), 2);
        assert_eq!(s.diffuse_dim(), 2);
        assert!(s.is_diffuse());
        assert_eq!(s.constraints().into_owned(), DMatrix::identity(2, 2));
    }

    #[test]
    fn test_next_moves_constraints() {
        let m = DenseModel::local_linear_trend(0.1, 0.01, 1.0);
        let mut s = AugmentedState::from_model(&m).unwrap();
        s.next(0, &m);
        // T B0 = T
        assert_eq!(s.constraints().into_owned(), m.transition);
        assert!((s.p[(0, 0)] - 0.1).abs() < 1e-15);
        assert!((s.p[(1, 1)] - 0.01).abs() < 1e-15);
    }

    #[test]
    fn test_dropped_constraints_are_inactive() {
        let m = DenseModel::local_level(0.5, 1.0);
        let mut s = AugmentedState::from_model(&m).unwrap();
        s.drop_constraints();
        assert!(!s.is_diffuse());
        assert_eq!(s.constraints().ncols(), 0);
        s.next(0, &m);
        assert!((s.p[(0, 0)] - 0.5).abs() < 1e-15);
    }

    #[test]
    fn test_degenerate_update() {
        let m = DenseModel::local_level(0.5, 1.0);
        let mut s = AugmentedState::from_model(&m).unwrap();
        let pe = AugmentedPredictionError {
            e: 0.25,
            v: 0.0,
            ed: DVector::from_element(1, -1.0),
            m: DVector::zeros(1),
            missing: false,
        };
        assert_eq!(
            s.update(4, &pe),
            Err(AkfError::Inconsistent {
                pos: 4,
                residual: 0.25
            })
        );

        let quiet = AugmentedPredictionError { e: 0.0, ..pe };
        let before = s.clone();
        s.update(4, &quiet).unwrap();
        assert_eq!(s, before);
    }
}
