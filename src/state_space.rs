use nalgebra::{DMatrix, DVector};

use crate::error::{AkfError, Result};
use crate::params::ArimaParams;
use crate::polynomial::{reduced_ar, reduced_ma};
use crate::ssf::{validate_covariance, StateSpaceModel};
use crate::types::ArimaOrder;

/// Harvey-representation SARIMA model with an exact diffuse initialization.
///
/// State equation:  alpha_{t+1} = T * alpha_t + R * eta_t,  eta_t ~ N(0, sigma2)
/// Observation:     y_t          = Z' * alpha_t
///
/// The state is `[differencing states (sd) | ARMA block (ko)]`. The
/// differencing states hold past values of the series and are diffuse
/// (`B0 = [I_sd; 0]`); the ARMA block starts from its stationary
/// distribution.
#[derive(Debug, Clone)]
pub struct ArimaModel {
    order: ArimaOrder,
    transition: DMatrix<f64>,
    design: DVector<f64>,
    selection: DVector<f64>,
    sigma2: f64,
    initial_cov: DMatrix<f64>,
}

impl ArimaModel {
    /// Builds the model with unit innovation variance.
    ///
    /// Supports SARIMA(p,d,q)(P,D,Q,s) with D <= 1. A non-stationary AR part
    /// is rejected with [`AkfError::NonStationary`].
    pub fn new(order: &ArimaOrder, params: &ArimaParams) -> Result<Self> {
        Self::with_variance(order, params, 1.0)
    }

    pub fn with_variance(order: &ArimaOrder, params: &ArimaParams, sigma2: f64) -> Result<Self> {
        if order.dd > 1 {
            return Err(AkfError::DataError(
                "seasonal differencing D > 1 is not supported".into(),
            ));
        }
        if (order.dd > 0 || order.pp > 0 || order.qq > 0) && order.s < 2 {
            return Err(AkfError::DataError(format!(
                "seasonal terms require a seasonal period s >= 2, got s={}",
                order.s
            )));
        }
        if sigma2.is_nan() || sigma2 <= 0.0 {
            return Err(AkfError::DataError(format!(
                "innovation variance must be positive, got {}",
                sigma2
            )));
        }
        let expected = [order.p, order.q, order.pp, order.qq];
        let got = [params.ar.len(), params.ma.len(), params.sar.len(), params.sma.len()];
        if expected != got {
            return Err(AkfError::ParamLengthMismatch {
                expected: order.n_coefficients(),
                got: got.iter().sum(),
            });
        }

        let transition = build_transition(order, params);
        let design = build_design(order);
        let selection = build_selection(order, params);
        let initial_cov = stationary_covariance(order, &transition, &selection, sigma2)?;

        Ok(Self {
            order: *order,
            transition,
            design,
            selection,
            sigma2,
            initial_cov,
        })
    }

    pub fn order(&self) -> &ArimaOrder {
        &self.order
    }

    pub fn transition_matrix(&self) -> &DMatrix<f64> {
        &self.transition
    }

    pub fn design(&self) -> &DVector<f64> {
        &self.design
    }

    pub fn selection(&self) -> &DVector<f64> {
        &self.selection
    }

    pub fn sigma2(&self) -> f64 {
        self.sigma2
    }
}

/// Build the transition matrix T.
///
/// Structure for SARIMA(p,d,q)(P,D,Q,s):
/// 1. Regular diff block [0..d, 0..d]: upper triangular ones
/// 2. Seasonal diff blocks: D layers of s x s cyclic shift
/// 3. Cross-diff: regular diff states -> last seasonal state
/// 4. Diff -> ARMA: regular diff + first seasonal of each layer -> ARMA
/// 5. ARMA companion [sd..sd+ko, sd..sd+ko]
fn build_transition(order: &ArimaOrder, params: &ArimaParams) -> DMatrix<f64> {
    let k_states = order.k_states();
    let d = order.d;
    let dd = order.dd;
    let s = order.s;
    let sd = order.k_states_diff();
    let ko = order.k_order();

    let mut t = DMatrix::<f64>::zeros(k_states, k_states);

    for i in 0..d {
        for j in i..d {
            t[(i, j)] = 1.0;
        }
    }

    for layer in 0..dd {
        let base = d + layer * s;
        t[(base, base + s - 1)] = 1.0;
        for i in 0..(s - 1) {
            t[(base + i + 1, base + i)] = 1.0;
        }
    }

    if dd > 0 {
        let last_seasonal = d + s * dd - 1;
        for i in 0..d {
            t[(i, last_seasonal)] = 1.0;
        }
    }

    for i in 0..d {
        t[(i, sd)] = 1.0;
    }
    for layer in 0..dd {
        t[(d + layer * s, sd)] = 1.0;
    }

    // companion: first column -phi(L)[1..], superdiagonal ones
    let red_ar = reduced_ar(params, order);
    for i in 0..ko {
        if let Some(c) = red_ar.get(i + 1) {
            t[(sd + i, sd)] = -c;
        }
    }
    for i in 0..ko.saturating_sub(1) {
        t[(sd + i, sd + i + 1)] = 1.0;
    }
    t
}

/// Z[i] = 1 on the regular diff states, on the last state of each seasonal
/// layer and on the first ARMA state.
fn build_design(order: &ArimaOrder) -> DVector<f64> {
    let d = order.d;
    let s = order.s;
    let sd = order.k_states_diff();
    let mut z = DVector::<f64>::zeros(order.k_states());
    for i in 0..d {
        z[i] = 1.0;
    }
    for layer in 0..order.dd {
        z[d + (layer + 1) * s - 1] = 1.0;
    }
    z[sd] = 1.0;
    z
}

/// R[sd + i] = theta(L)[i] on the ARMA block.
fn build_selection(order: &ArimaOrder, params: &ArimaParams) -> DVector<f64> {
    let sd = order.k_states_diff();
    let mut r = DVector::<f64>::zeros(order.k_states());
    for (i, &c) in reduced_ma(params, order)
        .iter()
        .enumerate()
        .take(order.k_order())
    {
        r[sd + i] = c;
    }
    r
}

/// Initial covariance: zero on the diffuse states, the stationary covariance
/// of the ARMA block elsewhere.
///
/// The ARMA block solves the discrete Lyapunov equation
/// `P = T P T' + sigma2 R R'` through `vec(P) = (I - T (x) T)^-1 vec(sigma2 R R')`.
fn stationary_covariance(
    order: &ArimaOrder,
    transition: &DMatrix<f64>,
    selection: &DVector<f64>,
    sigma2: f64,
) -> Result<DMatrix<f64>> {
    let sd = order.k_states_diff();
    let ko = order.k_order();
    let t = transition.view((sd, sd), (ko, ko)).into_owned();
    let r = selection.rows(sd, ko).into_owned();
    let q = &r * r.transpose() * sigma2;

    let lhs = DMatrix::<f64>::identity(ko * ko, ko * ko) - t.kronecker(&t);
    let rhs = DVector::from_column_slice(q.as_slice());
    let vec_p = lhs.lu().solve(&rhs).ok_or(AkfError::NonStationary)?;
    let mut p_arma = DMatrix::from_column_slice(ko, ko, vec_p.as_slice());
    p_arma = (&p_arma + p_arma.transpose()) * 0.5;
    validate_covariance(&p_arma, ko).map_err(|_| AkfError::NonStationary)?;

    let mut p0 = DMatrix::<f64>::zeros(order.k_states(), order.k_states());
    p0.view_mut((sd, sd), (ko, ko)).copy_from(&p_arma);
    Ok(p0)
}

impl StateSpaceModel for ArimaModel {
    fn state_dim(&self) -> usize {
        self.design.len()
    }

    fn diffuse_dim(&self) -> usize {
        self.order.k_states_diff()
    }

    fn initial_state(&self) -> DVector<f64> {
        DVector::zeros(self.state_dim())
    }

    fn initial_covariance(&self) -> Result<DMatrix<f64>> {
        Ok(self.initial_cov.clone())
    }

    fn diffuse_constraints(&self) -> DMatrix<f64> {
        let sd = self.order.k_states_diff();
        let mut b = DMatrix::zeros(self.state_dim(), sd);
        b.view_mut((0, 0), (sd, sd)).fill_with_identity();
        b
    }

    fn transition(&self, _pos: usize, x: &mut DVector<f64>) {
        *x = &self.transition * &*x;
    }

    fn transition_transpose(&self, _pos: usize, x: &mut DVector<f64>) {
        *x = self.transition.tr_mul(x);
    }

    fn add_innovation_covariance(&self, _pos: usize, p: &mut DMatrix<f64>) {
        p.ger(self.sigma2, &self.selection, &self.selection, 1.0);
    }

    fn loading_dot(&self, _pos: usize, x: &DVector<f64>) -> f64 {
        self.design.dot(x)
    }

    fn add_loading(&self, _pos: usize, alpha: f64, x: &mut DVector<f64>) {
        x.axpy(alpha, &self.design, 1.0);
    }

    fn transition_columns(&self, _pos: usize, m: &mut DMatrix<f64>) {
        *m = &self.transition * &*m;
    }

    fn transition_transpose_columns(&self, _pos: usize, m: &mut DMatrix<f64>) {
        *m = self.transition.tr_mul(m);
    }

    fn loading(&self, _pos: usize) -> DVector<f64> {
        self.design.clone()
    }
}
