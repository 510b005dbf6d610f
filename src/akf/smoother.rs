use nalgebra::{DMatrix, DVector};
use tracing::debug;

use super::prediction_error::AugmentedPredictionError;
use super::results::{FilteringResults, StateSnapshot};
use crate::error::{AkfError, Result};
use crate::linalg::clean_symmetric;
use crate::ssf::StateSpaceModel;

/// Output of the augmented smoother, indexed by time.
#[derive(Debug, Clone)]
pub struct SmoothingResults {
    variance_tracking: bool,
    states: Vec<DVector<f64>>,
    variances: Vec<DMatrix<f64>>,
    smoothations: Vec<f64>,
    corrected_smoothations: Vec<f64>,
    smoothation_variances: Vec<f64>,
    delta: DVector<f64>,
    psi: DMatrix<f64>,
    collapsing: Option<usize>,
    scale: f64,
}

impl SmoothingResults {
    fn with_capacity(n: usize, variance_tracking: bool) -> Self {
        Self {
            variance_tracking,
            states: Vec::with_capacity(n),
            variances: Vec::with_capacity(if variance_tracking { n } else { 0 }),
            smoothations: Vec::with_capacity(n),
            corrected_smoothations: Vec::with_capacity(n),
            smoothation_variances: Vec::with_capacity(n),
            delta: DVector::zeros(0),
            psi: DMatrix::zeros(0, 0),
            collapsing: None,
            scale: 1.0,
        }
    }

    fn push(
        &mut self,
        state: DVector<f64>,
        variance: Option<DMatrix<f64>>,
        u: f64,
        uc: f64,
        uvar: f64,
    ) {
        self.states.push(state);
        if let Some(v) = variance {
            self.variances.push(v);
        }
        self.smoothations.push(u);
        self.corrected_smoothations.push(uc);
        self.smoothation_variances.push(uvar);
    }

    /// Entries were pushed backward in time.
    fn reverse(&mut self) {
        self.states.reverse();
        self.variances.reverse();
        self.smoothations.reverse();
        self.corrected_smoothations.reverse();
        self.smoothation_variances.reverse();
    }

    fn rescale(&mut self, factor: f64) {
        for v in self.variances.iter_mut() {
            *v *= factor;
        }
        for v in self.smoothation_variances.iter_mut() {
            *v *= factor;
        }
        self.psi *= factor;
        self.scale = factor;
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn is_variance_tracking(&self) -> bool {
        self.variance_tracking
    }

    /// Smoothed state at `pos`.
    pub fn state(&self, pos: usize) -> Option<&DVector<f64>> {
        self.states.get(pos)
    }

    /// Smoothed state covariance at `pos` (variance tracking only).
    pub fn variance(&self, pos: usize) -> Option<&DMatrix<f64>> {
        self.variances.get(pos)
    }

    /// Smoothed values of the `i`-th state component.
    pub fn component(&self, i: usize) -> Vec<f64> {
        self.states.iter().map(|s| s[i]).collect()
    }

    /// Smoothed variances of the `i`-th state component (variance tracking only).
    pub fn component_variance(&self, i: usize) -> Vec<f64> {
        self.variances.iter().map(|v| v[(i, i)]).collect()
    }

    /// Smoothations conditional on zero diffuse effects (NaN when missing).
    pub fn smoothations(&self) -> &[f64] {
        &self.smoothations
    }

    /// Smoothations corrected by the estimated diffuse effects.
    pub fn corrected_smoothations(&self) -> &[f64] {
        &self.corrected_smoothations
    }

    /// Conditional variances of the smoothations.
    pub fn smoothation_variances(&self) -> &[f64] {
        &self.smoothation_variances
    }

    /// Smoothed diffuse effects.
    pub fn delta(&self) -> &DVector<f64> {
        &self.delta
    }

    /// Covariance of the smoothed diffuse effects.
    pub fn delta_covariance(&self) -> &DMatrix<f64> {
        &self.psi
    }

    pub fn collapsing(&self) -> Option<usize> {
        self.collapsing
    }

    /// Factor applied to the covariances (1 unless rescaled).
    pub fn scale(&self) -> f64 {
        self.scale
    }
}

/// Backward recursion state.
struct Recursion {
    r: DVector<f64>,
    n: DMatrix<f64>,
    /// dr/d(delta), seeded with 0
    rd: DMatrix<f64>,
    /// cross covariance term
    k: DMatrix<f64>,
}

/// Backward recursion over the output of an [`AugmentedFilter`](super::AugmentedFilter).
///
/// Positions after the collapse use the ordinary fixed-interval smoother;
/// the diffuse positions add the contribution of the estimated diffuse
/// effects through `G_t = B_t + P_t R_{t-1}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AugmentedSmoother {
    variance_tracking: bool,
    rescale_variance: bool,
}

impl Default for AugmentedSmoother {
    fn default() -> Self {
        Self::new(true)
    }
}

impl AugmentedSmoother {
    pub fn new(variance_tracking: bool) -> Self {
        Self {
            variance_tracking,
            rescale_variance: false,
        }
    }

    /// Multiplies every covariance by the ML scale `ssq / (nobs - nd)`.
    pub fn with_rescaled_variance(mut self, rescale: bool) -> Self {
        self.rescale_variance = rescale;
        self
    }

    pub fn process<M>(&self, model: &M, results: &FilteringResults) -> Result<SmoothingResults>
    where
        M: StateSpaceModel + ?Sized,
    {
        let acc = results.accumulator().ok_or_else(|| {
            AkfError::DataError("the filter has not processed any data".into())
        })?;
        let n = results.len();
        let d = model.state_dim();
        let k0 = acc.diffuse_dim();
        let t_star = match results.collapsing() {
            Some(t) => t,
            None if k0 == 0 => 0,
            None => n,
        };

        let mut out = SmoothingResults::with_capacity(n, self.variance_tracking);
        let mut rec = Recursion {
            r: DVector::zeros(d),
            n: DMatrix::zeros(d, d),
            rd: DMatrix::zeros(d, 0),
            k: DMatrix::zeros(d, 0),
        };
        for t in (t_star..n).rev() {
            self.ordinary_step(model, results, t, &mut rec, &mut out)?;
        }

        let (delta, psi) = if k0 == 0 {
            (DVector::zeros(0), DMatrix::zeros(0, 0))
        } else {
            // S = a'^-1, Sigma = S S', delta* = -S b
            let s = acc
                .inverse_transposed_factor()
                .ok_or(AkfError::NotIdentifiable)?;
            let mut sigma = &s * s.transpose();
            clean_symmetric(&mut sigma);
            let delta_star = -(&s * acc.b());
            match results.pre_collapse_state() {
                Ok(pre) => {
                    let b = pre.constraints().into_owned();
                    // Sigma B'
                    let sbt = &sigma * b.transpose();
                    let delta = delta_star + &sbt * &rec.r;
                    // K = N B Sigma
                    let nbs = &rec.n * sbt.transpose();
                    let mut psi = &sigma - &sbt * &nbs;
                    clean_symmetric(&mut psi);
                    rec.k = nbs;
                    (delta, psi)
                }
                Err(_) => {
                    rec.k = DMatrix::zeros(d, k0);
                    (delta_star, sigma)
                }
            }
        };
        rec.rd = DMatrix::zeros(d, k0);

        for t in (0..t_star).rev() {
            self.diffuse_step(model, results, t, &mut rec, &delta, &psi, &mut out)?;
        }
        self.finish(out, results, delta, psi)
    }

    /// Smooths a non-collapsed filter run with externally estimated diffuse
    /// effects `delta` and their covariance `psi`.
    pub fn process_with_effects<M>(
        &self,
        model: &M,
        results: &FilteringResults,
        delta: DVector<f64>,
        psi: DMatrix<f64>,
    ) -> Result<SmoothingResults>
    where
        M: StateSpaceModel + ?Sized,
    {
        if results.collapsing().is_some() {
            return Err(AkfError::DataError(
                "diffuse effects can only be supplied for a non-collapsed filter run".into(),
            ));
        }
        let k0 = model.diffuse_dim();
        if delta.len() != k0 || psi.nrows() != k0 || psi.ncols() != k0 {
            return Err(AkfError::DimensionMismatch(format!(
                "diffuse effects must have dimension {}, got {} and {}x{}",
                k0,
                delta.len(),
                psi.nrows(),
                psi.ncols()
            )));
        }
        let n = results.len();
        let d = model.state_dim();
        let mut out = SmoothingResults::with_capacity(n, self.variance_tracking);
        let mut rec = Recursion {
            r: DVector::zeros(d),
            n: DMatrix::zeros(d, d),
            rd: DMatrix::zeros(d, k0),
            k: DMatrix::zeros(d, k0),
        };
        for t in (0..n).rev() {
            self.diffuse_step(model, results, t, &mut rec, &delta, &psi, &mut out)?;
        }
        self.finish(out, results, delta, psi)
    }

    fn finish(
        &self,
        mut out: SmoothingResults,
        results: &FilteringResults,
        delta: DVector<f64>,
        psi: DMatrix<f64>,
    ) -> Result<SmoothingResults> {
        out.reverse();
        out.delta = delta;
        out.psi = psi;
        out.collapsing = results.collapsing();
        if self.rescale_variance {
            let acc = results.accumulator().ok_or_else(|| {
                AkfError::DataError("the filter has not processed any data".into())
            })?;
            let nd = acc.diffuse_dim();
            if acc.nobs() <= nd {
                return Err(AkfError::InsufficientData {
                    nobs: acc.nobs(),
                    nd,
                });
            }
            out.rescale(acc.ssq() / (acc.nobs() - nd) as f64);
        }
        debug!(
            n = out.len(),
            collapsing = ?out.collapsing,
            scale = out.scale,
            "augmented smoother done"
        );
        Ok(out)
    }

    fn ordinary_step<M>(
        &self,
        model: &M,
        results: &FilteringResults,
        t: usize,
        rec: &mut Recursion,
        out: &mut SmoothingResults,
    ) -> Result<()>
    where
        M: StateSpaceModel + ?Sized,
    {
        let (snap, pe) = results.snapshot(t)?;
        // T' r, T' N T
        let mut tr = rec.r.clone();
        model.transition_transpose(t, &mut tr);
        let mut ntil = rec.n.clone();
        model.transition_transpose_congruence(t, &mut ntil);

        let (u, uvar) = if pe.is_informative() {
            let v = pe.v;
            let u = (pe.e - pe.m.dot(&tr)) / v;
            model.add_loading(t, u, &mut tr);
            let (n, uvar) = information_update(&ntil, &model.loading(t), pe);
            rec.n = n;
            (u, uvar)
        } else {
            rec.n = ntil;
            (f64::NAN, f64::NAN)
        };
        rec.r = tr;

        let state = &snap.a + &snap.p * &rec.r;
        let variance = if self.variance_tracking {
            let mut var = &snap.p - &snap.p * &rec.n * &snap.p;
            finalize_covariance(&mut var);
            Some(var)
        } else {
            None
        };
        out.push(state, variance, u, u, uvar);
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn diffuse_step<M>(
        &self,
        model: &M,
        results: &FilteringResults,
        t: usize,
        rec: &mut Recursion,
        delta: &DVector<f64>,
        psi: &DMatrix<f64>,
        out: &mut SmoothingResults,
    ) -> Result<()>
    where
        M: StateSpaceModel + ?Sized,
    {
        let (snap, pe) = results.snapshot(t)?;
        let mut tr = rec.r.clone();
        model.transition_transpose(t, &mut tr);
        let mut ntil = rec.n.clone();
        model.transition_transpose_congruence(t, &mut ntil);
        let mut trd = rec.rd.clone();
        model.transition_transpose_columns(t, &mut trd);
        let mut tk = rec.k.clone();
        model.transition_transpose_columns(t, &mut tk);

        let (u, uc, uvar) = if pe.is_informative() {
            let v = pe.v;
            let z = model.loading(t);
            // u = (e - M' T' r) / v, U = (E - M' T' R) / v
            let u = (pe.e - pe.m.dot(&tr)) / v;
            let ud = (&pe.ed - trd.tr_mul(&pe.m)) / v;
            tr.axpy(u, &z, 1.0);
            trd.ger(1.0, &z, &ud, 1.0);
            // K <- L' K = T'K - Z' (M' T'K) / v
            let mk = tk.tr_mul(&pe.m);
            tk.ger(-1.0 / v, &z, &mk, 1.0);
            let (n, uvar) = information_update(&ntil, &z, pe);
            rec.n = n;
            (u, u + ud.dot(delta), uvar)
        } else {
            rec.n = ntil;
            (f64::NAN, f64::NAN, f64::NAN)
        };
        rec.r = tr;
        rec.rd = trd;
        rec.k = tk;

        // G = B + P R
        let g = &snap.b + &snap.p * &rec.rd;
        let state = &snap.a + &snap.p * &rec.r + &g * delta;
        let variance = if self.variance_tracking {
            Some(diffuse_variance(snap, rec, &g, psi))
        } else {
            None
        };
        out.push(state, variance, u, uc, uvar);
        Ok(())
    }
}

/// N_{t-1} = L' N L + Z'Z / v with L = T (I - M Z / v), written with
/// `ntil = T' N T`. Also returns the variance of the smoothation,
/// `1/v + M' ntil M / v^2`.
fn information_update(
    ntil: &DMatrix<f64>,
    z: &DVector<f64>,
    pe: &AugmentedPredictionError,
) -> (DMatrix<f64>, f64) {
    let v = pe.v;
    let nm = ntil * &pe.m;
    let uvar = 1.0 / v + pe.m.dot(&nm) / (v * v);
    let mut n = ntil.clone();
    n.ger(-1.0 / v, z, &nm, 1.0);
    n.ger(-1.0 / v, &nm, z, 1.0);
    n.ger(uvar, z, z, 1.0);
    clean_symmetric(&mut n);
    (n, uvar)
}

/// P - P N P + G Psi G' - (P K G' + G K' P)
fn diffuse_variance(
    snap: &StateSnapshot,
    rec: &Recursion,
    g: &DMatrix<f64>,
    psi: &DMatrix<f64>,
) -> DMatrix<f64> {
    let p = &snap.p;
    let mut var = p - p * &rec.n * p + g * psi * g.transpose();
    let pkg = p * &rec.k * g.transpose();
    var -= &pkg;
    var -= pkg.transpose();
    finalize_covariance(&mut var);
    var
}

fn finalize_covariance(var: &mut DMatrix<f64>) {
    clean_symmetric(var);
    for i in 0..var.nrows() {
        if var[(i, i)] < 0.0 {
            var[(i, i)] = 0.0;
        }
    }
}
