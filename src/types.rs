/// SARIMA(p,d,q)(P,D,Q)s orders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArimaOrder {
    pub p: usize,  // AR order
    pub d: usize,  // differencing order
    pub q: usize,  // MA order
    pub pp: usize, // seasonal AR order (P)
    pub dd: usize, // seasonal differencing order (D)
    pub qq: usize, // seasonal MA order (Q)
    pub s: usize,  // seasonal period
}

impl ArimaOrder {
    pub fn new(p: usize, d: usize, q: usize, pp: usize, dd: usize, qq: usize, s: usize) -> Self {
        Self {
            p,
            d,
            q,
            pp,
            dd,
            qq,
            s,
        }
    }

    /// Non-seasonal ARIMA(p,d,q).
    pub fn arima(p: usize, d: usize, q: usize) -> Self {
        Self::new(p, d, q, 0, 0, 0, 0)
    }

    /// Degree of the expanded AR polynomial.
    pub fn k_ar(&self) -> usize {
        self.pp * self.s + self.p
    }

    /// Degree of the expanded MA polynomial.
    pub fn k_ma(&self) -> usize {
        self.qq * self.s + self.q
    }

    /// Size of the ARMA block of the state.
    pub fn k_order(&self) -> usize {
        self.k_ar().max(self.k_ma() + 1)
    }

    /// Number of diffuse differencing states.
    pub fn k_states_diff(&self) -> usize {
        self.dd * self.s + self.d
    }

    pub fn k_states(&self) -> usize {
        self.k_states_diff() + self.k_order()
    }

    /// Length of the flat coefficient vector.
    pub fn n_coefficients(&self) -> usize {
        self.p + self.q + self.pp + self.qq
    }
}

impl Default for ArimaOrder {
    fn default() -> Self {
        Self::arima(1, 0, 0)
    }
}

/// Flags selecting how the diffuse filters run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AkfConfig {
    /// Collapse the diffuse constraints as soon as possible (otherwise the QR
    /// path is used for likelihoods and smoothing).
    pub collapsing: bool,
    /// Keep per-step filtering snapshots / smoothed variances.
    pub keep_all: bool,
    /// Concentrate the scale out of the likelihood.
    pub scaling_factor: bool,
    /// Keep the standardized residuals in likelihood records.
    pub residuals: bool,
    /// Multiply smoothed covariances by the ML scale.
    pub rescale_variance: bool,
}

impl Default for AkfConfig {
    fn default() -> Self {
        Self {
            collapsing: true,
            keep_all: false,
            scaling_factor: true,
            residuals: false,
            rescale_variance: false,
        }
    }
}

/// Maximum-likelihood estimation settings.
#[derive(Debug, Clone, PartialEq)]
pub struct EstimationConfig {
    pub order: ArimaOrder,
    pub akf: AkfConfig,
    pub enforce_stationarity: bool,
    pub enforce_invertibility: bool,
    pub max_iter: u64,
    /// Nelder-Mead stops when the standard deviation of the simplex costs
    /// falls below this value.
    pub tolerance: f64,
}

impl Default for EstimationConfig {
    fn default() -> Self {
        Self {
            order: ArimaOrder::default(),
            akf: AkfConfig::default(),
            enforce_stationarity: true,
            enforce_invertibility: true,
            max_iter: 500,
            tolerance: 1e-8,
        }
    }
}

/// Fit result returned by the optimizer.
#[derive(Debug, Clone)]
pub struct FitResult {
    /// Constrained ARMA coefficients `[ar | ma | sar | sma]`.
    pub params: Vec<f64>,
    pub loglike: f64,
    /// Concentrated innovation variance.
    pub sigma2: f64,
    /// Informative observations minus diffuse effects.
    pub n_obs: usize,
    /// Estimated parameters, the concentrated scale included.
    pub n_params: usize,
    pub n_iter: u64,
    pub converged: bool,
    pub aic: f64,
    pub bic: f64,
}

impl FitResult {
    /// Fills `aic` and `bic` from `loglike`, `n_params` and `n_obs`.
    pub fn with_information_criteria(mut self) -> Self {
        let k = self.n_params as f64;
        self.aic = -2.0 * self.loglike + 2.0 * k;
        self.bic = -2.0 * self.loglike + k * (self.n_obs as f64).ln();
        self
    }
}
