//! Rayon-parallel likelihoods and fits over many series.
//!
//! Every series gets its own model and filter; nothing is shared between
//! workers except the read-only configuration.

use rayon::prelude::*;

use crate::error::Result;
use crate::likelihood::DiffuseLikelihood;
use crate::optimizer;
use crate::types::{EstimationConfig, FitResult};

/// Diffuse likelihood of each series under the same coefficients.
pub fn batch_loglike(
    series: &[Vec<f64>],
    config: &EstimationConfig,
    params: &[f64],
) -> Vec<Result<DiffuseLikelihood>> {
    series
        .par_iter()
        .map(|y| optimizer::evaluate(y, config, params))
        .collect()
}

/// Fits each series independently under the same order and settings.
pub fn batch_fit(series: &[Vec<f64>], config: &EstimationConfig) -> Vec<Result<FitResult>> {
    series
        .par_iter()
        .map(|y| optimizer::fit(y, config, None))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AkfError;
    use crate::types::ArimaOrder;

    fn series() -> Vec<Vec<f64>> {
        (0..4)
            .map(|k| {
                (0..60)
                    .map(|t| ((t * (k + 2)) as f64 * 0.37).sin() + 0.05 * t as f64)
                    .collect()
            })
            .collect()
    }

    #[test]
    fn test_batch_loglike_matches_sequential() {
        let config = EstimationConfig {
            order: ArimaOrder::arima(1, 1, 0),
            ..Default::default()
        };
        let data = series();
        let batch = batch_loglike(&data, &config, &[0.3]);
        assert_eq!(batch.len(), data.len());
        for (y, res) in data.iter().zip(batch) {
            let seq = optimizer::evaluate(y, &config, &[0.3]).unwrap();
            assert_eq!(res.unwrap().log_likelihood(), seq.log_likelihood());
        }
    }

    #[test]
    fn test_batch_keeps_per_series_errors() {
        let config = EstimationConfig::default();
        let mut data = series();
        data[2] = vec![1.0];
        let fits = batch_fit(&data, &config);
        assert!(fits[0].is_ok());
        assert!(matches!(fits[2], Err(AkfError::DataError(_))));
        for (y, res) in data.iter().zip(&fits).filter(|(_, r)| r.is_ok()) {
            let seq = optimizer::fit(y, &config, None).unwrap();
            let got = res.as_ref().unwrap();
            assert_eq!(got.params, seq.params);
            assert_eq!(got.loglike, seq.loglike);
        }
    }
}
