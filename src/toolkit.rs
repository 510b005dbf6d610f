//! Entry points composing the filters, smoothers and likelihood records.

use tracing::debug;

use crate::akf::{
    AugmentedFilter, AugmentedSmoother, FilteringResults, QrFilter, QrSmoother, Recording,
    SmoothingResults,
};
use crate::error::{AkfError, Result};
use crate::likelihood::{DiffuseLikelihood, MarginalLikelihood, ProfileLikelihood};
use crate::ssf::{Observations, StateSpaceModel};
use crate::types::AkfConfig;

/// Runs the augmented filter.
///
/// `keep_all` keeps every forecast and prediction error (needed for smoothing).
#[tracing::instrument(level = "debug", skip(model, data), fields(n = data.len()))]
pub fn filter<M, D>(model: &M, data: &D, keep_all: bool, collapsing: bool) -> Result<FilteringResults>
where
    M: StateSpaceModel + ?Sized,
    D: Observations + ?Sized,
{
    let recording = if keep_all {
        Recording::Full
    } else {
        Recording::Light
    };
    let mut results = FilteringResults::new(recording);
    AugmentedFilter::new(collapsing).process(model, data, &mut results)?;
    Ok(results)
}

/// Smooths `data`. `keep_all` turns on variance tracking; without collapsing
/// the diffuse effects come from the QR estimator.
#[tracing::instrument(level = "debug", skip(model, data), fields(n = data.len()))]
pub fn smooth<M, D>(
    model: &M,
    data: &D,
    keep_all: bool,
    rescale_variance: bool,
    collapsing: bool,
) -> Result<SmoothingResults>
where
    M: StateSpaceModel + ?Sized,
    D: Observations + ?Sized,
{
    if collapsing {
        let results = filter(model, data, true, true)?;
        AugmentedSmoother::new(keep_all)
            .with_rescaled_variance(rescale_variance)
            .process(model, &results)
    } else {
        QrSmoother::new(keep_all)
            .with_rescaled_variance(rescale_variance)
            .process(model, data)
    }
}

/// Builds a diffuse likelihood function.
///
/// The collapsing path reads the accumulator of the collapsing filter and
/// reports the standardized innovations observed after the collapse; the QR
/// path reports the least-squares residuals.
pub fn likelihood_computer<M, D>(
    collapsing: bool,
    scaling_factor: bool,
    residuals: bool,
) -> impl Fn(&M, &D) -> Result<DiffuseLikelihood>
where
    M: StateSpaceModel + ?Sized,
    D: Observations + ?Sized,
{
    move |model: &M, data: &D| {
        let ll = if collapsing {
            let results = filter(model, data, false, true)?;
            let acc = results.accumulator().ok_or_else(|| {
                AkfError::DataError("the filter has not processed any data".into())
            })?;
            let res = if residuals {
                results.residuals().to_vec()
            } else {
                vec![]
            };
            DiffuseLikelihood::from_accumulator(acc, scaling_factor, res)?
        } else {
            QrFilter::new()
                .process(model, data)?
                .diffuse_likelihood(scaling_factor, residuals)?
        };
        debug!(
            collapsing,
            nobs = ll.nobs(),
            nd = ll.nd(),
            loglike = ll.log_likelihood(),
            "diffuse likelihood"
        );
        Ok(ll)
    }
}

/// Builds a marginal likelihood function (QR path).
pub fn marginal_likelihood_computer<M, D>(
    scaling_factor: bool,
    residuals: bool,
) -> impl Fn(&M, &D) -> Result<MarginalLikelihood>
where
    M: StateSpaceModel + ?Sized,
    D: Observations + ?Sized,
{
    move |model: &M, data: &D| {
        QrFilter::new()
            .process(model, data)?
            .marginal_likelihood(scaling_factor, residuals)
    }
}

/// Builds a profile likelihood function (QR path).
pub fn profile_likelihood_computer<M, D>(
    scaling_factor: bool,
    residuals: bool,
) -> impl Fn(&M, &D) -> Result<ProfileLikelihood>
where
    M: StateSpaceModel + ?Sized,
    D: Observations + ?Sized,
{
    move |model: &M, data: &D| {
        QrFilter::new()
            .process(model, data)?
            .profile_likelihood(scaling_factor, residuals)
    }
}

/// Diffuse likelihood with the flags of `config`.
pub fn diffuse_likelihood<M, D>(model: &M, data: &D, config: &AkfConfig) -> Result<DiffuseLikelihood>
where
    M: StateSpaceModel + ?Sized,
    D: Observations + ?Sized,
{
    likelihood_computer::<M, D>(config.collapsing, config.scaling_factor, config.residuals)(
        model, data,
    )
}

/// Smoothing with the flags of `config`.
pub fn smooth_with<M, D>(model: &M, data: &D, config: &AkfConfig) -> Result<SmoothingResults>
where
    M: StateSpaceModel + ?Sized,
    D: Observations + ?Sized,
{
    smooth(
        model,
        data,
        config.keep_all,
        config.rescale_variance,
        config.collapsing,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ssf::DenseModel;

    const Y: [f64; 8] = [1.0, 1.4, 2.1, 2.9, 3.2, 4.5, 5.1, 5.3];

    #[test]
    fn test_collapsing_and_qr_likelihoods_agree() {
        let m = DenseModel::local_linear_trend(0.3, 0.05, 1.0);
        for scaling in [true, false] {
            let a = likelihood_computer(true, scaling, false)(&m, &Y[..]).unwrap();
            let b = likelihood_computer(false, scaling, false)(&m, &Y[..]).unwrap();
            let (la, lb) = (a.log_likelihood(), b.log_likelihood());
            assert!((la - lb).abs() < 1e-6 * lb.abs(), "{} vs {}", la, lb);
            assert_eq!(a.nobs(), b.nobs());
            assert_eq!(a.nd(), 2);
        }
    }

    #[test]
    fn test_residuals() {
        let m = DenseModel::local_level(0.5, 1.0);
        let a = likelihood_computer(true, true, true)(&m, &Y[..]).unwrap();
        assert_eq!(a.residuals().len(), 7);
        let b = likelihood_computer(false, true, true)(&m, &Y[..]).unwrap();
        assert_eq!(b.residuals().len(), 8);
        // both sets of residuals carry the same sum of squares
        let sa: f64 = a.residuals().iter().map(|r| r * r).sum();
        let sb: f64 = b.residuals().iter().map(|r| r * r).sum();
        assert!((sa - sb).abs() < 1e-9);
        let none = likelihood_computer(true, true, false)(&m, &Y[..]).unwrap();
        assert!(none.residuals().is_empty());
    }

    #[test]
    fn test_profile_and_marginal() {
        let m = DenseModel::local_level(0.5, 1.0);
        let diffuse = likelihood_computer(false, true, false)(&m, &Y[..]).unwrap();
        let marginal = marginal_likelihood_computer(true, false)(&m, &Y[..]).unwrap();
        let profile = profile_likelihood_computer(true, false)(&m, &Y[..]).unwrap();
        assert!((marginal.diffuse().log_likelihood() - diffuse.log_likelihood()).abs() < 1e-12);
        // all-ones raw regressor: R0 = sqrt(8)
        assert!((marginal.marginal_correction() - 8.0_f64.ln()).abs() < 1e-10);
        assert_eq!(profile.likelihood().nobs(), 8);
        assert_eq!(profile.likelihood().nd(), 0);
        assert_eq!(profile.coefficients().len(), 1);
        assert!(profile.coefficient_covariance()[(0, 0)] > 0.0);
    }

    #[test]
    fn test_smooth_paths_agree() {
        let m = DenseModel::local_linear_trend(0.3, 0.05, 1.0);
        let a = smooth(&m, &Y[..], true, true, true).unwrap();
        let b = smooth(&m, &Y[..], true, true, false).unwrap();
        assert!((a.scale() - b.scale()).abs() < 1e-9);
        for t in 0..Y.len() {
            assert!((a.state(t).unwrap()[0] - b.state(t).unwrap()[0]).abs() < 1e-8);
            assert!((a.variance(t).unwrap()[(0, 0)] - b.variance(t).unwrap()[(0, 0)]).abs() < 1e-8);
        }
    }

    #[test]
    fn test_config_entry_points() {
        let m = DenseModel::local_level(0.5, 1.0);
        let config = AkfConfig {
            keep_all: true,
            ..Default::default()
        };
        let ll = diffuse_likelihood(&m, &Y[..], &config).unwrap();
        assert!(ll.is_scaled());
        let s = smooth_with(&m, &Y[..], &config).unwrap();
        assert!(s.is_variance_tracking());
        assert_eq!(s.collapsing(), Some(1));
    }
}
