use crate::error::{AkfError, Result};
use crate::types::ArimaOrder;

/// ARMA coefficients of a SARIMA model.
///
/// Flat layout: `[ar(p) | ma(q) | sar(P) | sma(Q)]`. The innovation variance is
/// always concentrated out and never part of the vector.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ArimaParams {
    pub ar: Vec<f64>,
    pub ma: Vec<f64>,
    pub sar: Vec<f64>,
    pub sma: Vec<f64>,
}

impl ArimaParams {
    /// Unpack a flat parameter vector.
    pub fn from_flat(flat: &[f64], order: &ArimaOrder) -> Result<Self> {
        let expected = order.n_coefficients();
        if flat.len() != expected {
            return Err(AkfError::ParamLengthMismatch {
                expected,
                got: flat.len(),
            });
        }
        let (ar, rest) = flat.split_at(order.p);
        let (ma, rest) = rest.split_at(order.q);
        let (sar, sma) = rest.split_at(order.pp);
        Ok(Self {
            ar: ar.to_vec(),
            ma: ma.to_vec(),
            sar: sar.to_vec(),
            sma: sma.to_vec(),
        })
    }

    pub fn to_flat(&self) -> Vec<f64> {
        [&self.ar[..], &self.ma[..], &self.sar[..], &self.sma[..]].concat()
    }

    /// Map an unconstrained optimizer vector to coefficients, forcing each
    /// AR block stationary and each MA block invertible when requested.
    pub fn from_unconstrained(
        x: &[f64],
        order: &ArimaOrder,
        enforce_stationarity: bool,
        enforce_invertibility: bool,
    ) -> Result<Self> {
        let mut params = Self::from_flat(x, order)?;
        if enforce_stationarity {
            params.ar = constrain_stationary(&params.ar);
            params.sar = constrain_stationary(&params.sar);
        }
        if enforce_invertibility {
            params.ma = constrain_invertible(&params.ma);
            params.sma = constrain_invertible(&params.sma);
        }
        Ok(params)
    }

    /// Inverse of [`ArimaParams::from_unconstrained`].
    pub fn to_unconstrained(&self, enforce_stationarity: bool, enforce_invertibility: bool) -> Vec<f64> {
        let mut out = self.clone();
        if enforce_stationarity {
            out.ar = unconstrain_stationary(&self.ar);
            out.sar = unconstrain_stationary(&self.sar);
        }
        if enforce_invertibility {
            out.ma = unconstrain_invertible(&self.ma);
            out.sma = unconstrain_invertible(&self.sma);
        }
        out.to_flat()
    }
}

// Monahan (1984) / Jones (1980) reparameterization: unconstrained values are
// mapped to partial autocorrelations in (-1, 1), then to AR coefficients by
// the Durbin-Levinson recursion.

/// Unconstrained values -> coefficients of a stationary AR polynomial
/// `1 - phi_1 L - ... - phi_n L^n`.
pub fn constrain_stationary(unconstrained: &[f64]) -> Vec<f64> {
    let mut phi: Vec<f64> = Vec::with_capacity(unconstrained.len());
    for &x in unconstrained {
        let r = x / (1.0 + x * x).sqrt();
        let prev = phi.clone();
        for (i, coef) in phi.iter_mut().enumerate() {
            *coef = prev[i] - r * prev[prev.len() - 1 - i];
        }
        phi.push(r);
    }
    phi
}

/// Stationary AR coefficients -> unconstrained values.
pub fn unconstrain_stationary(constrained: &[f64]) -> Vec<f64> {
    let n = constrained.len();
    let mut phi = constrained.to_vec();
    let mut out = vec![0.0; n];
    for k in (0..n).rev() {
        let r = phi[k];
        let denom = (1.0 - r * r).max(1e-15);
        out[k] = r / denom.sqrt();
        let prev = phi[..k].to_vec();
        for i in 0..k {
            phi[i] = (prev[i] + r * prev[k - 1 - i]) / denom;
        }
        phi.truncate(k);
    }
    out
}

/// Unconstrained values -> invertible MA coefficients `1 + theta_1 L + ...`.
pub fn constrain_invertible(unconstrained: &[f64]) -> Vec<f64> {
    constrain_stationary(unconstrained)
        .into_iter()
        .map(|x| -x)
        .collect()
}

pub fn unconstrain_invertible(constrained: &[f64]) -> Vec<f64> {
    let negated: Vec<f64> = constrained.iter().map(|&x| -x).collect();
    unconstrain_stationary(&negated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::polynomial::make_ar_poly;

    #[test]
    fn test_from_flat_to_flat() {
        let order = ArimaOrder::new(2, 1, 1, 1, 0, 1, 12);
        let flat = vec![0.5, -0.3, 0.2, 0.4, -0.1];
        let params = ArimaParams::from_flat(&flat, &order).unwrap();
        assert_eq!(params.ar, vec![0.5, -0.3]);
        assert_eq!(params.ma, vec![0.2]);
        assert_eq!(params.sar, vec![0.4]);
        assert_eq!(params.sma, vec![-0.1]);
        assert_eq!(params.to_flat(), flat);
    }

    #[test]
    fn test_from_flat_length_mismatch() {
        let order = ArimaOrder::arima(1, 0, 0);
        assert_eq!(
            ArimaParams::from_flat(&[0.5, 0.3], &order).unwrap_err(),
            AkfError::ParamLengthMismatch {
                expected: 1,
                got: 2
            }
        );
    }

    #[test]
    fn test_constrain_ar1() {
        let phi = constrain_stationary(&[1.0]);
        assert!((phi[0] - 1.0 / 2.0_f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_constrained_ar2_is_stationary() {
        // AR(2) stationarity triangle: |phi2| < 1, phi2 + phi1 < 1, phi2 - phi1 < 1
        for x in [[3.0, -2.0], [-5.0, 4.0], [0.2, 10.0]] {
            let phi = constrain_stationary(&x);
            assert!(phi[1].abs() < 1.0);
            assert!(phi[1] + phi[0] < 1.0);
            assert!(phi[1] - phi[0] < 1.0);
            let poly = make_ar_poly(&phi, 2);
            assert_eq!(poly.len(), 3);
        }
    }

    #[test]
    fn test_stationary_roundtrip() {
        for original in [vec![0.5], vec![0.5, -0.3], vec![1.0, -0.5, 0.2]] {
            let back = unconstrain_stationary(&constrain_stationary(&original));
            for (a, b) in original.iter().zip(back.iter()) {
                assert!((a - b).abs() < 1e-10, "roundtrip failed: {} vs {}", a, b);
            }
        }
    }

    #[test]
    fn test_invertible_roundtrip() {
        let original = vec![0.4, -0.2];
        let back = unconstrain_invertible(&constrain_invertible(&original));
        for (a, b) in original.iter().zip(back.iter()) {
            assert!((a - b).abs() < 1e-10);
        }
    }

    #[test]
    fn test_unconstrained_mapping() {
        let order = ArimaOrder::arima(1, 1, 1);
        let params = ArimaParams::from_unconstrained(&[0.3, -0.4], &order, true, true).unwrap();
        let x = params.to_unconstrained(true, true);
        assert!((x[0] - 0.3).abs() < 1e-10);
        assert!((x[1] + 0.4).abs() < 1e-10);
        let raw = ArimaParams::from_unconstrained(&[0.3, -0.4], &order, false, false).unwrap();
        assert_eq!(raw.to_flat(), vec![0.3, -0.4]);
    }
}
