//! Closed-form Black–Scholes price and delta for European options.
//!
//! Pure functions; `r` and `sigma` are annualized, `tau` is in years.
//! Degenerate inputs (non-positive S, K, sigma or tau) fall back to the
//! intrinsic value and a boundary delta chosen by moneyness.

use std::f64::consts::{PI, SQRT_2};

/// Standard normal probability density φ(x).
#[inline]
pub fn norm_pdf(x: f64) -> f64 {
    (-0.5 * x * x).exp() / (2.0 * PI).sqrt()
}

/// Standard normal cumulative distribution Φ(x).
#[inline]
pub fn norm_cdf(x: f64) -> f64 {
    0.5 * (1.0 + libm::erf(x / SQRT_2))
}

#[inline]
fn d1(s: f64, k: f64, r: f64, sigma: f64, tau: f64) -> f64 {
    ((s / k).ln() + (r + 0.5 * sigma * sigma) * tau) / (sigma * tau.sqrt())
}

/// European option price.
pub fn price(s: f64, k: f64, r: f64, sigma: f64, tau: f64, is_call: bool) -> f64 {
    if s <= 0.0 || k <= 0.0 || sigma <= 0.0 || tau <= 0.0 {
        return if is_call { (s - k).max(0.0) } else { (k - s).max(0.0) };
    }
    let d1 = d1(s, k, r, sigma, tau);
    let d2 = d1 - sigma * tau.sqrt();
    if is_call {
        s * norm_cdf(d1) - k * (-r * tau).exp() * norm_cdf(d2)
    } else {
        k * (-r * tau).exp() * norm_cdf(-d2) - s * norm_cdf(-d1)
    }
}

/// Option delta: Φ(d1) for a call, Φ(d1) − 1 for a put.
pub fn delta(s: f64, k: f64, r: f64, sigma: f64, tau: f64, is_call: bool) -> f64 {
    if s <= 0.0 || k <= 0.0 || sigma <= 0.0 || tau <= 0.0 {
        return if is_call {
            if s > k { 1.0 } else { 0.0 }
        } else if s > k {
            0.0
        } else {
            -1.0
        };
    }
    let nd1 = norm_cdf(d1(s, k, r, sigma, tau));
    if is_call {
        nd1
    } else {
        nd1 - 1.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cdf_symmetry() {
        assert!((norm_cdf(0.0) - 0.5).abs() < 1e-12);
        for x in [0.5, 1.0, 2.0] {
            assert!((norm_cdf(x) + norm_cdf(-x) - 1.0).abs() < 1e-12);
        }
    }

    #[test]
    fn atm_call_reference_value() {
        // S=100, K=100, r=0, sigma=20%, tau=1y: C = 7.9656 (textbook value)
        let c = price(100.0, 100.0, 0.0, 0.2, 1.0, true);
        assert!((c - 7.9656).abs() < 1e-3, "got {c}");
    }

    #[test]
    fn put_call_parity() {
        let (s, k, r, sigma, tau) = (105.0, 100.0, 0.03, 0.25, 0.5);
        let c = price(s, k, r, sigma, tau, true);
        let p = price(s, k, r, sigma, tau, false);
        let parity = c - p - (s - k * (-r * tau).exp());
        assert!(parity.abs() < 1e-10, "parity violation: {parity}");
    }

    #[test]
    fn delta_bounds() {
        let d_call = delta(100.0, 100.0, 0.0, 0.2, 1.0, true);
        assert!(d_call > 0.0 && d_call < 1.0);
        let d_put = delta(100.0, 100.0, 0.0, 0.2, 1.0, false);
        assert!(d_put > -1.0 && d_put < 0.0);
        assert!((d_call - d_put - 1.0).abs() < 1e-12);
    }

    #[test]
    fn degenerate_inputs_fall_back_to_intrinsic() {
        assert_eq!(price(110.0, 100.0, 0.0, 0.2, 0.0, true), 10.0);
        assert_eq!(price(90.0, 100.0, 0.0, 0.2, 0.0, true), 0.0);
        assert_eq!(price(90.0, 100.0, 0.0, 0.2, 0.0, false), 10.0);
        assert_eq!(price(100.0, 100.0, 0.0, 0.0, 1.0, true), 0.0);

        assert_eq!(delta(110.0, 100.0, 0.0, 0.0, 1.0, true), 1.0);
        assert_eq!(delta(90.0, 100.0, 0.0, 0.0, 1.0, true), 0.0);
        assert_eq!(delta(110.0, 100.0, 0.0, 0.0, 1.0, false), 0.0);
        assert_eq!(delta(90.0, 100.0, 0.0, 0.0, 1.0, false), -1.0);
    }

    #[test]
    fn deep_itm_call_approaches_forward() {
        let c = price(200.0, 100.0, 0.0, 0.2, 1.0, true);
        assert!(c > 99.0 && c < 101.0);
        assert!(delta(200.0, 100.0, 0.0, 0.2, 1.0, true) > 0.99);
    }
}
