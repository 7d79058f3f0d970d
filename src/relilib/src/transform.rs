// Standard normal transforms: probability, u-value, exceedance, return period
use std::{error::Error, fmt};

use mathru::statistics::distrib::{Continuous, Normal};

// Beyond this u-value probabilities saturate instead of running into
// infinities; every method treats it as the edge of u-space.
pub const U_MAX: f64 = 8.2;

#[derive(Debug, Clone, PartialEq)]
pub struct ProbabilityRangeError;
impl Error for ProbabilityRangeError {}
impl fmt::Display for ProbabilityRangeError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Probability out of (0, 1) range")
    }
}

fn r1(z: f64) -> f64 {
    let z2 = z.powi(2);
    let z3 = z.powi(3);
    let z4 = z.powi(4);
    let z5 = z.powi(5);
    let num = -7.784894002430293E-3 * z5
        - 3.223964580411365E-1 * z4
        - 2.400758277161838 * z3
        - 2.549732539343734 * z2
        + 4.374664141464968 * z
        + 2.938163982698783;
    let denom = 7.784695709041462E-3 * z4
        + 3.224671290700398E-1 * z3
        + 2.445134137142996 * z2
        + 3.754408661907416 * z
        + 1.0;
    num / denom
}

fn r2(z: f64) -> f64 {
    let z2 = z.powi(2);
    let z3 = z.powi(3);
    let z4 = z.powi(4);
    let z5 = z.powi(5);
    let num = -3.969683028665376E1 * z5
        + 2.209460984245205E2 * z4
        - 2.759285104469687E2 * z3
        + 1.383577518672690E2 * z2
        - 3.066479806614716E1 * z
        + 2.506628277459239;
    let denom = -5.447609879822406E1 * z5
        + 1.615858368580409E2 * z4
        - 1.556989798598866E2 * z3
        + 6.680131188771972E1 * z2
        - 1.328068155288572E1 * z
        + 1.0;
    num / denom
}

pub fn normal_cdf(u: f64) -> f64 {
    if u <= -2.0 * U_MAX {
        return 0.0;
    }
    if u >= 2.0 * U_MAX {
        return 1.0;
    }
    Normal::new(0.0, 1.0).cdf(u)
}

pub fn normal_pdf(u: f64) -> f64 {
    const SQRT_2PI: f64 = 2.5066282746310002;
    (-0.5 * u * u).exp() / SQRT_2PI
}

// Acklam's rational approximation, polished with one Halley step so
// round trips through the CDF hold to ~1e-10 in the bulk.
fn norminv(p: f64) -> Result<f64, ProbabilityRangeError> {
    if !(0.0..=1.0).contains(&p) || p.is_nan() {
        return Err(ProbabilityRangeError);
    }
    let u = match p {
        x if x < 0.02425 => r1((-2.0 * x.ln()).sqrt()),
        x if x <= 0.97575 => (x - 0.5) * r2((x - 0.5).powi(2)),
        x => -r1((-2.0 * (1.0 - x).ln()).sqrt()),
    };
    let e = normal_cdf(u) - p;
    let d = e / normal_pdf(u);
    Ok(u - d / (1.0 + u * d / 2.0))
}

/// u-value from non-exceedance probability, saturated at +/- U_MAX.
pub fn u_from_p(p: f64) -> f64 {
    let pmin = q_from_u(U_MAX);
    match norminv(p.clamp(pmin, 1.0 - pmin)) {
        Ok(u) => u.clamp(-U_MAX, U_MAX),
        Err(_) => f64::NAN,
    }
}

/// Non-exceedance probability at u.
pub fn p_from_u(u: f64) -> f64 {
    normal_cdf(u.clamp(-U_MAX, U_MAX))
}

/// Exceedance probability at u; computed in the lower tail for accuracy.
pub fn q_from_u(u: f64) -> f64 {
    normal_cdf(-u.clamp(-U_MAX, U_MAX))
}

/// u-value from exceedance probability.
pub fn u_from_q(q: f64) -> f64 {
    -u_from_p(q)
}

/// Return period from u: T = 1 / exceedance.
pub fn t_from_u(u: f64) -> f64 {
    q_from_u(u).recip()
}

/// u-value from return period. Periods at or below one event saturate low.
pub fn u_from_t(t: f64) -> f64 {
    if t <= 1.0 {
        -U_MAX
    } else {
        u_from_q(t.recip())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inverse_matches_reference() {
        // Reference quantiles from the standard normal table
        assert!((u_from_p(0.5) - 0.0).abs() < 1e-12);
        assert!((u_from_p(0.975) - 1.959963984540054).abs() < 1e-10);
        assert!((u_from_p(0.84134474606854293) - 1.0).abs() < 1e-10);
        assert!((u_from_p(1e-6) - -4.753424308822899).abs() < 1e-9);
    }

    #[test]
    fn round_trip_bulk() {
        // p loses resolution near 1, so the p round trip stays in the
        // bulk; the upper tail is covered through q below
        for i in 0..=60 {
            let u = -6.0 + 0.2 * i as f64;
            let back = u_from_p(p_from_u(u));
            assert!((back - u).abs() < 1e-6, "u={} back={}", u, back);
        }
        for i in 0..=20 {
            let u = 4.0 + 0.2 * i as f64;
            let back = u_from_q(q_from_u(u));
            assert!((back - u).abs() < 1e-6, "u={} back={}", u, back);
        }
    }

    #[test]
    fn p_plus_q_is_one() {
        for u in [-8.0, -3.3, -0.5, 0.0, 1.7, 4.2, 8.0] {
            assert!((p_from_u(u) + q_from_u(u) - 1.0).abs() < 1e-15);
        }
    }

    #[test]
    fn tails_stay_finite() {
        assert!(u_from_p(0.0).is_finite());
        assert!(u_from_p(1.0).is_finite());
        assert!(p_from_u(50.0).is_finite());
        assert!(t_from_u(50.0).is_finite());
        assert_eq!(u_from_t(0.5), -U_MAX);
    }

    #[test]
    fn return_period_round_trip() {
        for t in [2.0, 10.0, 100.0, 10_000.0] {
            let u = u_from_t(t);
            assert!((t_from_u(u) - t).abs() / t < 1e-8);
        }
    }
}
