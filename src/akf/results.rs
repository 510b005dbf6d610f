use nalgebra::{DMatrix, DVector};

use super::augmentation::QAugmentation;
use super::prediction_error::AugmentedPredictionError;
use super::state::AugmentedState;
use crate::error::{AkfError, Result};

/// How much of the forward pass a [`FilteringResults`] keeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Recording {
    /// Collapse position, final accumulator/state and post-collapse residuals.
    #[default]
    Light,
    /// Everything in `Light` plus per-step forecasts and prediction errors,
    /// as needed by the smoothers.
    Full,
}

/// Forecast `(a, P, B)` at one time step, `B` restricted to its active columns.
#[derive(Debug, Clone, PartialEq)]
pub struct StateSnapshot {
    pub a: DVector<f64>,
    pub p: DMatrix<f64>,
    pub b: DMatrix<f64>,
}

impl StateSnapshot {
    fn of(state: &AugmentedState) -> Self {
        Self {
            a: state.a.clone(),
            p: state.p.clone(),
            b: state.constraints().into_owned(),
        }
    }
}

/// Output of the augmented filter, appended to step by step.
#[derive(Debug, Clone)]
pub struct FilteringResults {
    recording: Recording,
    states: Vec<StateSnapshot>,
    errors: Vec<AugmentedPredictionError>,
    residuals: Vec<f64>,
    collapsing: Option<usize>,
    pre_collapse: Option<AugmentedState>,
    accumulator: Option<QAugmentation>,
    final_state: Option<AugmentedState>,
    len: usize,
}

impl FilteringResults {
    pub fn new(recording: Recording) -> Self {
        Self {
            recording,
            states: Vec::new(),
            errors: Vec::new(),
            residuals: Vec::new(),
            collapsing: None,
            pre_collapse: None,
            accumulator: None,
            final_state: None,
            len: 0,
        }
    }

    pub fn recording(&self) -> Recording {
        self.recording
    }

    pub fn is_full(&self) -> bool {
        self.recording == Recording::Full
    }

    pub fn save_forecast(&mut self, _pos: usize, state: &AugmentedState) {
        if self.is_full() {
            self.states.push(StateSnapshot::of(state));
        }
    }

    pub fn save_error(&mut self, _pos: usize, pe: AugmentedPredictionError) {
        // Residuals of the ordinary (non-diffuse) regime only.
        if pe.ed.is_empty() {
            if let Some(r) = pe.standardized() {
                self.residuals.push(r);
            }
        }
        if self.is_full() {
            self.errors.push(pe);
        }
        self.len += 1;
    }

    /// Records a collapse at `pos`; `before` is the state just before it.
    pub fn save_collapse(&mut self, pos: usize, before: AugmentedState) {
        self.collapsing = Some(pos);
        self.pre_collapse = Some(before);
    }

    pub fn finish(&mut self, accumulator: QAugmentation, final_state: AugmentedState) {
        self.accumulator = Some(accumulator);
        self.final_state = Some(final_state);
    }

    /// Number of processed time steps.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Position of the collapse, if any.
    pub fn collapsing(&self) -> Option<usize> {
        self.collapsing
    }

    /// State just before the collapse.
    pub fn pre_collapse_state(&self) -> Result<&AugmentedState> {
        self.pre_collapse.as_ref().ok_or(AkfError::NotCollapsed)
    }

    pub fn accumulator(&self) -> Option<&QAugmentation> {
        self.accumulator.as_ref()
    }

    /// One-step-ahead state after the last observation.
    pub fn final_state(&self) -> Option<&AugmentedState> {
        self.final_state.as_ref()
    }

    /// Forecast at `pos` (only with [`Recording::Full`]).
    pub fn state(&self, pos: usize) -> Option<&StateSnapshot> {
        self.states.get(pos)
    }

    /// Prediction error at `pos` (only with [`Recording::Full`]).
    pub fn error(&self, pos: usize) -> Option<&AugmentedPredictionError> {
        self.errors.get(pos)
    }

    /// Standardized innovations `e / sqrt(v)` observed without diffuse effects.
    pub fn residuals(&self) -> &[f64] {
        &self.residuals
    }

    pub(crate) fn snapshot(&self, pos: usize) -> Result<(&StateSnapshot, &AugmentedPredictionError)> {
        match (self.states.get(pos), self.errors.get(pos)) {
            (Some(s), Some(e)) => Ok((s, e)),
            _ => Err(AkfError::DataError(format!(
                "no filtering snapshot at position {}; smoothing needs Recording::Full",
                pos
            ))),
        }
    }
}
