use crate::params::ArimaParams;
use crate::types::ArimaOrder;

/// Product of two polynomials stored by ascending powers.
pub fn polymul(a: &[f64], b: &[f64]) -> Vec<f64> {
    if a.is_empty() || b.is_empty() {
        return Vec::new();
    }
    (0..a.len() + b.len() - 1)
        .map(|k| {
            let lo = k.saturating_sub(b.len() - 1);
            let hi = k.min(a.len() - 1);
            (lo..=hi).map(|i| a[i] * b[k - i]).sum()
        })
        .collect()
}

/// Lag polynomial `1 + sign * (c_1 L^s + c_2 L^(2s) + ...)`.
fn lag_poly(coeffs: &[f64], s: usize, sign: f64) -> Vec<f64> {
    if coeffs.is_empty() || s == 0 {
        return vec![1.0];
    }
    let mut poly = vec![0.0; coeffs.len() * s + 1];
    poly[0] = 1.0;
    for (k, c) in coeffs.iter().enumerate() {
        poly[(k + 1) * s] = sign * c;
    }
    poly
}

/// AR polynomial: 1 - phi_1*L - ... - phi_p*L^p
pub fn make_ar_poly(coeffs: &[f64], p: usize) -> Vec<f64> {
    let mut poly = lag_poly(&coeffs[..coeffs.len().min(p)], 1, -1.0);
    poly.resize(p + 1, 0.0);
    poly
}

/// MA polynomial: 1 + theta_1*L + ... + theta_q*L^q
pub fn make_ma_poly(coeffs: &[f64], q: usize) -> Vec<f64> {
    let mut poly = lag_poly(&coeffs[..coeffs.len().min(q)], 1, 1.0);
    poly.resize(q + 1, 0.0);
    poly
}

/// `1 - Phi_1 L^s - Phi_2 L^(2s) - ...`
pub fn make_seasonal_ar_poly(coeffs: &[f64], s: usize) -> Vec<f64> {
    lag_poly(coeffs, s, -1.0)
}

/// `1 + Theta_1 L^s + Theta_2 L^(2s) + ...`
pub fn make_seasonal_ma_poly(coeffs: &[f64], s: usize) -> Vec<f64> {
    lag_poly(coeffs, s, 1.0)
}

/// Expanded AR polynomial: phi(L) * Phi(L^s).
pub fn reduced_ar(params: &ArimaParams, order: &ArimaOrder) -> Vec<f64> {
    polymul(
        &make_ar_poly(&params.ar, order.p),
        &make_seasonal_ar_poly(&params.sar, order.s),
    )
}

/// Expanded MA polynomial: theta(L) * Theta(L^s).
pub fn reduced_ma(params: &ArimaParams, order: &ArimaOrder) -> Vec<f64> {
    polymul(
        &make_ma_poly(&params.ma, order.q),
        &make_seasonal_ma_poly(&params.sma, order.s),
    )
}

/// Differencing polynomial: (1 - L)^d * (1 - L^s)^D.
pub fn differencing_poly(order: &ArimaOrder) -> Vec<f64> {
    let mut poly = vec![1.0];
    for _ in 0..order.d {
        poly = polymul(&poly, &[1.0, -1.0]);
    }
    for _ in 0..order.dd {
        poly = polymul(&poly, &lag_poly(&[1.0], order.s, -1.0));
    }
    poly
}

/// Applies a lag polynomial to `y`, dropping the first `poly.len() - 1` values.
pub fn apply_poly(poly: &[f64], y: &[f64]) -> Vec<f64> {
    let k = poly.len().saturating_sub(1);
    (k..y.len())
        .map(|t| poly.iter().enumerate().map(|(i, c)| c * y[t - i]).sum())
        .collect()
}
