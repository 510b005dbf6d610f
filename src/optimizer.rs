//! Maximum diffuse-likelihood estimation of SARIMA coefficients.
//!
//! The innovation variance is concentrated out; Nelder-Mead searches the
//! Monahan/Jones-transformed ARMA coefficients.

use argmin::core::{CostFunction, Executor, IterState, State, TerminationReason};
use argmin::solver::neldermead::NelderMead;
use tracing::debug;

use crate::error::{AkfError, Result};
use crate::likelihood::DiffuseLikelihood;
use crate::params::ArimaParams;
use crate::state_space::ArimaModel;
use crate::toolkit;
use crate::types::{EstimationConfig, FitResult};

/// Cost returned for parameters where the likelihood cannot be evaluated.
const PENALTY: f64 = f64::MAX / 2.0;

/// Diffuse likelihood of `y` under the ARIMA model with coefficients `params`
/// (constrained, flat layout `[ar | ma | sar | sma]`).
pub fn evaluate(y: &[f64], config: &EstimationConfig, params: &[f64]) -> Result<DiffuseLikelihood> {
    let params = ArimaParams::from_flat(params, &config.order)?;
    let model = ArimaModel::new(&config.order, &params)?;
    toolkit::diffuse_likelihood(&model, y, &config.akf)
}

/// Negative log-likelihood over unconstrained coefficients.
struct ArimaObjective<'a> {
    y: &'a [f64],
    config: &'a EstimationConfig,
}

impl ArimaObjective<'_> {
    fn loglike(&self, x: &[f64]) -> Result<f64> {
        let params = ArimaParams::from_unconstrained(
            x,
            &self.config.order,
            self.config.enforce_stationarity,
            self.config.enforce_invertibility,
        )?;
        let ll = evaluate(self.y, self.config, &params.to_flat())?.log_likelihood();
        if ll.is_finite() {
            Ok(ll)
        } else {
            Err(AkfError::OptimizationFailed(
                "non-finite log-likelihood".into(),
            ))
        }
    }
}

impl CostFunction for ArimaObjective<'_> {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, param: &Vec<f64>) -> std::result::Result<f64, argmin::core::Error> {
        Ok(self.loglike(param).map_or(PENALTY, |ll| -ll))
    }
}

/// Initial simplex: the start point plus one vertex per coordinate.
fn initial_simplex(start: &[f64]) -> Vec<Vec<f64>> {
    let mut simplex = Vec::with_capacity(start.len() + 1);
    simplex.push(start.to_vec());
    for i in 0..start.len() {
        let mut vertex = start.to_vec();
        vertex[i] += if vertex[i].abs() > 1e-8 {
            0.1 * vertex[i]
        } else {
            0.1
        };
        simplex.push(vertex);
    }
    simplex
}

/// Fits the ARMA coefficients of `config.order` to `y` (NaN = missing).
///
/// `start` holds constrained coefficients; all zeros when absent. Models
/// without coefficients are evaluated once.
pub fn fit(y: &[f64], config: &EstimationConfig, start: Option<&[f64]>) -> Result<FitResult> {
    let order = &config.order;
    let k = order.n_coefficients();
    let observed = y.iter().filter(|v| v.is_finite()).count();
    let min_obs = order.k_states_diff() + k + 1;
    if observed <= min_obs {
        return Err(AkfError::DataError(format!(
            "not enough observations: {} <= {} for the model order",
            observed, min_obs
        )));
    }

    let start = match start {
        Some(s) => ArimaParams::from_flat(s, order)?,
        None => ArimaParams::from_flat(&vec![0.0; k], order)?,
    };
    let x0 = start.to_unconstrained(config.enforce_stationarity, config.enforce_invertibility);

    let (best, n_iter, converged) = if k == 0 || config.max_iter == 0 {
        (x0, 0, k == 0)
    } else {
        let solver = NelderMead::new(initial_simplex(&x0))
            .with_sd_tolerance(config.tolerance)
            .map_err(|e| AkfError::OptimizationFailed(e.to_string()))?;
        let objective = ArimaObjective { y, config };
        let result = Executor::new(objective, solver)
            .configure(|state: IterState<Vec<f64>, (), (), (), (), f64>| {
                state.max_iters(config.max_iter)
            })
            .run()
            .map_err(|e| AkfError::OptimizationFailed(e.to_string()))?;

        let state = result.state();
        let best = state
            .get_best_param()
            .cloned()
            .ok_or_else(|| AkfError::OptimizationFailed("no best parameter found".into()))?;
        let converged = state.get_termination_reason() == Some(&TerminationReason::SolverConverged);
        debug!(
            n_iter = state.get_iter(),
            cost = state.get_best_cost(),
            converged,
            "nelder-mead finished"
        );
        (best, state.get_iter(), converged)
    };

    let params = ArimaParams::from_unconstrained(
        &best,
        order,
        config.enforce_stationarity,
        config.enforce_invertibility,
    )?
    .to_flat();
    let ll = evaluate(y, config, &params)?;

    Ok(FitResult {
        params,
        loglike: ll.log_likelihood(),
        sigma2: ll.sigma2(),
        n_obs: ll.effective_nobs(),
        n_params: k + usize::from(config.akf.scaling_factor),
        n_iter,
        converged,
        aic: 0.0,
        bic: 0.0,
    }
    .with_information_criteria())
}
