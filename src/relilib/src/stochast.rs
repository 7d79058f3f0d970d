// Stochastic variable distributions and u/x conversions
use serde::{Deserialize, Serialize};

use roots::find_root_brent;

use crate::error::ReliabilityError;
use crate::transform::{normal_pdf, p_from_u, u_from_p, U_MAX};

const EULER: f64 = 0.5772156649015329;
const SQRT_2PI: f64 = 2.5066282746310002;
const NUMERIC_N: usize = 1001;

pub fn linspace(start: f64, stop: f64, n: usize) -> Vec<f64> {
    // Vector of evenly spaced values
    let mut out: Vec<f64> = Vec::with_capacity(n);
    let step = (stop - start) / (n as f64 - 1.0);
    for i in 0..n {
        out.push(start + i as f64 * step);
    }
    out
}

pub fn trapz_integral(v: &[f64], dx: f64) -> f64 {
    // Trapezoidal integration
    let n = v.len();
    if n > 2 {
        let mut i: f64 = v[1..n - 1].iter().sum::<f64>() * 2.0;
        i += v[0];
        i += v[n - 1];
        i * dx / 2.0
    } else {
        0.0
    }
}

pub fn interpolate(x: f64, xs: &[f64], ys: &[f64]) -> f64 {
    // Linear interpolation, clamped at the curve ends
    if x <= xs[0] {
        return ys[0];
    }
    if x >= xs[xs.len() - 1] {
        return ys[ys.len() - 1];
    }
    let i = xs.iter().position(|v| *v > x).unwrap_or(xs.len() - 1);
    ys[i - 1] + (x - xs[i - 1]) * (ys[i] - ys[i - 1]) / (xs[i] - xs[i - 1])
}

/// Which parameter to hold when placing x at a given u.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
pub enum ConstantParameter {
    Deviation,
    VariationCoefficient,
}

// Distributions are a tagged enum; truncation and inversion wrap an
// inner distribution instead of multiplying concrete types.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub enum Stochast {
    Normal {
        mean: f64,
        deviation: f64,
    },
    LogNormal {
        mean: f64,
        deviation: f64,
        #[serde(default)]
        shift: f64,
    },
    Uniform {
        minimum: f64,
        maximum: f64,
    },
    Gumbel {
        location: f64,
        scale: f64,
    },
    Discrete {
        values: Vec<f64>,
        weights: Vec<f64>,
        #[serde(skip)]
        cumulative: Vec<f64>,
    },
    Deterministic {
        value: f64,
    },
    Qualitative {
        value: f64,
    },
    CdfCurve {
        xs: Vec<f64>,
        ps: Vec<f64>,
    },
    Truncated {
        inner: Box<Stochast>,
        minimum: f64,
        maximum: f64,
    },
    Inverted {
        inner: Box<Stochast>,
    },
}

impl Stochast {
    pub fn standard_normal() -> Stochast {
        Stochast::Normal {
            mean: 0.0,
            deviation: 1.0,
        }
    }

    pub fn check(&self) -> Result<(), ReliabilityError> {
        match self {
            Stochast::Normal { deviation, .. } => {
                if *deviation >= 0.0 {
                    Ok(())
                } else {
                    Err(ReliabilityError::InvalidDistribution(String::from(
                        "Normal deviation must be non-negative",
                    )))
                }
            }
            Stochast::LogNormal {
                mean,
                deviation,
                shift,
            } => {
                if *deviation < 0.0 {
                    Err(ReliabilityError::InvalidDistribution(String::from(
                        "LogNormal deviation must be non-negative",
                    )))
                } else if *mean <= *shift {
                    Err(ReliabilityError::InvalidDistribution(String::from(
                        "LogNormal mean must exceed its shift",
                    )))
                } else {
                    Ok(())
                }
            }
            Stochast::Uniform { minimum, maximum } => {
                if minimum <= maximum {
                    Ok(())
                } else {
                    Err(ReliabilityError::InvalidDistribution(String::from(
                        "Uniform minimum must not exceed maximum",
                    )))
                }
            }
            Stochast::Gumbel { scale, .. } => {
                if *scale >= 0.0 {
                    Ok(())
                } else {
                    Err(ReliabilityError::InvalidDistribution(String::from(
                        "Gumbel scale must be non-negative",
                    )))
                }
            }
            Stochast::Discrete {
                values, weights, ..
            } => {
                if values.is_empty() || values.len() != weights.len() {
                    Err(ReliabilityError::InvalidDistribution(String::from(
                        "Discrete values and weights must be non-empty and equal length",
                    )))
                } else if weights.iter().any(|w| *w < 0.0) {
                    Err(ReliabilityError::InvalidDistribution(String::from(
                        "Discrete weights must be non-negative",
                    )))
                } else {
                    Ok(())
                }
            }
            Stochast::CdfCurve { xs, ps } => {
                let monotone = xs.windows(2).all(|w| w[0] <= w[1])
                    && ps.windows(2).all(|w| w[0] <= w[1]);
                if xs.len() < 2 || xs.len() != ps.len() || !monotone {
                    Err(ReliabilityError::InvalidDistribution(String::from(
                        "CdfCurve must be a monotone curve of at least two points",
                    )))
                } else {
                    Ok(())
                }
            }
            Stochast::Truncated {
                inner,
                minimum,
                maximum,
            } => {
                if minimum > maximum {
                    Err(ReliabilityError::InvalidDistribution(String::from(
                        "Truncation minimum must not exceed maximum",
                    )))
                } else {
                    inner.check()
                }
            }
            Stochast::Inverted { inner } => inner.check(),
            Stochast::Deterministic { .. } | Stochast::Qualitative { .. } => Ok(()),
        }
    }

    /// Precompute derived quantities. Must run once per calculation
    /// before any u/x conversion.
    pub fn initialize_for_run(&mut self) -> Result<(), ReliabilityError> {
        self.check()?;
        match self {
            Stochast::Discrete {
                values,
                weights,
                cumulative,
            } => {
                let total: f64 = weights.iter().sum();
                if total <= 0.0 {
                    return Err(ReliabilityError::InvalidDistribution(String::from(
                        "Discrete weights must sum to a positive value",
                    )));
                }
                // cdf and x_from_u scan in value order
                let mut pairs: Vec<(f64, f64)> =
                    values.iter().copied().zip(weights.iter().copied()).collect();
                pairs.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
                *values = pairs.iter().map(|(v, _)| *v).collect();
                *weights = pairs.iter().map(|(_, w)| *w).collect();
                cumulative.clear();
                let mut acc = 0.0;
                for w in weights.iter() {
                    acc += w / total;
                    cumulative.push(acc);
                }
                // Guard against accumulated rounding at the top
                if let Some(last) = cumulative.last_mut() {
                    *last = 1.0;
                }
                Ok(())
            }
            Stochast::Truncated { inner, .. } | Stochast::Inverted { inner } => {
                inner.initialize_for_run()
            }
            _ => Ok(()),
        }
    }

    /// False iff the distribution degenerates to a point mass.
    pub fn is_varying(&self) -> bool {
        match self {
            Stochast::Normal { deviation, .. } => *deviation > 0.0,
            Stochast::LogNormal { deviation, .. } => *deviation > 0.0,
            Stochast::Uniform { minimum, maximum } => minimum < maximum,
            Stochast::Gumbel { scale, .. } => *scale > 0.0,
            Stochast::Discrete { values, .. } => {
                values.iter().any(|v| (v - values[0]).abs() > 0.0)
            }
            Stochast::Deterministic { .. } | Stochast::Qualitative { .. } => false,
            Stochast::CdfCurve { xs, .. } => xs[xs.len() - 1] > xs[0],
            Stochast::Truncated {
                inner,
                minimum,
                maximum,
            } => minimum < maximum && inner.is_varying(),
            Stochast::Inverted { inner } => inner.is_varying(),
        }
    }

    pub fn mean(&self) -> f64 {
        match self {
            Stochast::Normal { mean, .. } => *mean,
            Stochast::LogNormal { mean, .. } => *mean,
            Stochast::Uniform { minimum, maximum } => (minimum + maximum) / 2.0,
            Stochast::Gumbel { location, scale } => location + EULER * scale,
            Stochast::Discrete {
                values, weights, ..
            } => {
                let total: f64 = weights.iter().sum();
                values
                    .iter()
                    .zip(weights.iter())
                    .map(|(v, w)| v * w)
                    .sum::<f64>()
                    / total
            }
            Stochast::Deterministic { value } | Stochast::Qualitative { value } => *value,
            Stochast::CdfCurve { .. } | Stochast::Truncated { .. } => self.numeric_moments().0,
            Stochast::Inverted { inner } => inner.mean(),
        }
    }

    pub fn deviation(&self) -> f64 {
        match self {
            Stochast::Normal { deviation, .. } => *deviation,
            Stochast::LogNormal { deviation, .. } => *deviation,
            Stochast::Uniform { minimum, maximum } => (maximum - minimum) / 12f64.sqrt(),
            Stochast::Gumbel { scale, .. } => {
                std::f64::consts::PI * scale / 6f64.sqrt()
            }
            Stochast::Discrete {
                values, weights, ..
            } => {
                let total: f64 = weights.iter().sum();
                let mean = self.mean();
                (values
                    .iter()
                    .zip(weights.iter())
                    .map(|(v, w)| w * (v - mean).powi(2))
                    .sum::<f64>()
                    / total)
                    .sqrt()
            }
            Stochast::Deterministic { .. } | Stochast::Qualitative { .. } => 0.0,
            Stochast::CdfCurve { .. } | Stochast::Truncated { .. } => self.numeric_moments().1,
            Stochast::Inverted { inner } => inner.deviation(),
        }
    }

    // Mean and deviation from the quantile curve; used where no
    // closed form exists (CdfCurve, Truncated).
    fn numeric_moments(&self) -> (f64, f64) {
        let ps = linspace(0.5 / NUMERIC_N as f64, 1.0 - 0.5 / NUMERIC_N as f64, NUMERIC_N);
        let xs: Vec<f64> = ps.iter().map(|p| self.x_from_u(u_from_p(*p))).collect();
        let mean = xs.iter().sum::<f64>() / NUMERIC_N as f64;
        let var = xs.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / NUMERIC_N as f64;
        (mean, var.sqrt())
    }

    fn lognormal_params(mean: f64, deviation: f64, shift: f64) -> (f64, f64) {
        let m = mean - shift;
        let sigma2 = (1.0 + (deviation / m).powi(2)).ln();
        let mu = m.ln() - sigma2 / 2.0;
        (mu, sigma2.sqrt())
    }

    /// Physical value at standard-normal coordinate u.
    pub fn x_from_u(&self, u: f64) -> f64 {
        match self {
            Stochast::Normal { mean, deviation } => mean + deviation * u,
            Stochast::LogNormal {
                mean,
                deviation,
                shift,
            } => {
                if *deviation == 0.0 {
                    return *mean;
                }
                let (mu, sigma) = Stochast::lognormal_params(*mean, *deviation, *shift);
                shift + (mu + sigma * u).exp()
            }
            Stochast::Uniform { minimum, maximum } => {
                minimum + (maximum - minimum) * p_from_u(u)
            }
            Stochast::Gumbel { location, scale } => {
                let p = p_from_u(u);
                location - scale * (-p.ln()).ln()
            }
            Stochast::Discrete {
                values, cumulative, ..
            } => {
                debug_assert!(
                    !cumulative.is_empty(),
                    "initialize_for_run must precede x_from_u"
                );
                let p = p_from_u(u);
                let idx = cumulative
                    .iter()
                    .position(|c| *c >= p)
                    .unwrap_or(values.len() - 1);
                values[idx]
            }
            Stochast::Deterministic { value } | Stochast::Qualitative { value } => *value,
            Stochast::CdfCurve { xs, ps } => interpolate(p_from_u(u), ps, xs),
            Stochast::Truncated {
                inner,
                minimum,
                maximum,
            } => {
                let plo = inner.cdf(*minimum);
                let phi = inner.cdf(*maximum);
                let p = plo + p_from_u(u) * (phi - plo);
                inner.x_from_u(u_from_p(p)).clamp(*minimum, *maximum)
            }
            Stochast::Inverted { inner } => 2.0 * inner.mean() - inner.x_from_u(-u),
        }
    }

    /// Standard-normal coordinate of physical value x.
    pub fn u_from_x(&self, x: f64) -> f64 {
        match self {
            Stochast::Normal { mean, deviation } => {
                if *deviation == 0.0 {
                    0.0
                } else {
                    (x - mean) / deviation
                }
            }
            Stochast::LogNormal {
                mean,
                deviation,
                shift,
            } => {
                if *deviation == 0.0 || x <= *shift {
                    return if x <= *shift { -U_MAX } else { 0.0 };
                }
                let (mu, sigma) = Stochast::lognormal_params(*mean, *deviation, *shift);
                ((x - shift).ln() - mu) / sigma
            }
            Stochast::Deterministic { .. } | Stochast::Qualitative { .. } => 0.0,
            _ => u_from_p(self.cdf(x)),
        }
    }

    pub fn cdf(&self, x: f64) -> f64 {
        match self {
            Stochast::Normal { mean, deviation } => {
                if *deviation == 0.0 {
                    if x < *mean {
                        0.0
                    } else {
                        1.0
                    }
                } else {
                    p_from_u((x - mean) / deviation)
                }
            }
            Stochast::LogNormal {
                mean,
                deviation,
                shift,
            } => {
                if x <= *shift {
                    return 0.0;
                }
                let (mu, sigma) = Stochast::lognormal_params(*mean, *deviation, *shift);
                p_from_u(((x - shift).ln() - mu) / sigma)
            }
            Stochast::Uniform { minimum, maximum } => {
                ((x - minimum) / (maximum - minimum)).clamp(0.0, 1.0)
            }
            Stochast::Gumbel { location, scale } => {
                (-(-(x - location) / scale).exp()).exp()
            }
            Stochast::Discrete {
                values, cumulative, ..
            } => {
                let mut p = 0.0;
                for (v, c) in values.iter().zip(cumulative.iter()) {
                    if *v <= x {
                        p = *c;
                    }
                }
                p
            }
            Stochast::Deterministic { value } | Stochast::Qualitative { value } => {
                if x < *value {
                    0.0
                } else {
                    1.0
                }
            }
            Stochast::CdfCurve { xs, ps } => interpolate(x, xs, ps),
            Stochast::Truncated {
                inner,
                minimum,
                maximum,
            } => {
                if x < *minimum {
                    0.0
                } else if x >= *maximum {
                    1.0
                } else {
                    let plo = inner.cdf(*minimum);
                    let phi = inner.cdf(*maximum);
                    (inner.cdf(x) - plo) / (phi - plo)
                }
            }
            Stochast::Inverted { inner } => 1.0 - inner.cdf(2.0 * inner.mean() - x),
        }
    }

    pub fn pdf(&self, x: f64) -> f64 {
        match self {
            Stochast::Normal { mean, deviation } => {
                if *deviation == 0.0 {
                    0.0
                } else {
                    normal_pdf((x - mean) / deviation) / deviation
                }
            }
            Stochast::LogNormal {
                mean,
                deviation,
                shift,
            } => {
                if x <= *shift {
                    return 0.0;
                }
                let (mu, sigma) = Stochast::lognormal_params(*mean, *deviation, *shift);
                let z = ((x - shift).ln() - mu) / sigma;
                (-0.5 * z * z).exp() / ((x - shift) * sigma * SQRT_2PI)
            }
            Stochast::Uniform { minimum, maximum } => {
                if x < *minimum || x > *maximum {
                    0.0
                } else {
                    (maximum - minimum).recip()
                }
            }
            Stochast::Gumbel { location, scale } => {
                let z = (x - location) / scale;
                (-(z + (-z).exp())).exp() / scale
            }
            Stochast::Discrete {
                values, weights, ..
            } => {
                // Point masses: report the probability weight at x
                let total: f64 = weights.iter().sum();
                values
                    .iter()
                    .zip(weights.iter())
                    .find(|(v, _)| (**v - x).abs() < 1e-12)
                    .map(|(_, w)| w / total)
                    .unwrap_or(0.0)
            }
            Stochast::Deterministic { .. } | Stochast::Qualitative { .. } => 0.0,
            Stochast::CdfCurve { xs, ps } => {
                let h = (xs[xs.len() - 1] - xs[0]) / 1e4;
                (interpolate(x + h, xs, ps) - interpolate(x - h, xs, ps)) / (2.0 * h)
            }
            Stochast::Truncated {
                inner,
                minimum,
                maximum,
            } => {
                if x < *minimum || x > *maximum {
                    0.0
                } else {
                    let mass = inner.cdf(*maximum) - inner.cdf(*minimum);
                    inner.pdf(x) / mass
                }
            }
            Stochast::Inverted { inner } => inner.pdf(2.0 * inner.mean() - x),
        }
    }

    pub fn set_mean_and_deviation(
        &mut self,
        new_mean: f64,
        new_deviation: f64,
    ) -> Result<(), ReliabilityError> {
        match self {
            Stochast::Normal { mean, deviation }
            | Stochast::LogNormal {
                mean, deviation, ..
            } => {
                *mean = new_mean;
                *deviation = new_deviation;
            }
            Stochast::Uniform { minimum, maximum } => {
                let half = new_deviation * 3f64.sqrt();
                *minimum = new_mean - half;
                *maximum = new_mean + half;
            }
            Stochast::Gumbel { location, scale } => {
                *scale = new_deviation * 6f64.sqrt() / std::f64::consts::PI;
                *location = new_mean - EULER * *scale;
            }
            Stochast::Deterministic { value } => {
                *value = new_mean;
            }
            other => {
                return Err(ReliabilityError::Unsupported {
                    family: other.family(),
                    operation: "set_mean_and_deviation",
                })
            }
        }
        self.check()
    }

    pub fn family(&self) -> &'static str {
        match self {
            Stochast::Normal { .. } => "Normal",
            Stochast::LogNormal { .. } => "LogNormal",
            Stochast::Uniform { .. } => "Uniform",
            Stochast::Gumbel { .. } => "Gumbel",
            Stochast::Discrete { .. } => "Discrete",
            Stochast::Deterministic { .. } => "Deterministic",
            Stochast::Qualitative { .. } => "Qualitative",
            Stochast::CdfCurve { .. } => "CdfCurve",
            Stochast::Truncated { .. } => "Truncated",
            Stochast::Inverted { .. } => "Inverted",
        }
    }

    /// Shift the distribution so that physical value x sits exactly at
    /// standard-normal coordinate u, holding either the deviation or
    /// the variation coefficient. Closed form for Normal; bounded
    /// Brent root-find over the mean elsewhere.
    pub fn set_x_at_u(
        &mut self,
        x: f64,
        u: f64,
        constant: ConstantParameter,
    ) -> Result<(), ReliabilityError> {
        match self {
            Stochast::Normal { mean, deviation } => {
                match constant {
                    ConstantParameter::Deviation => {
                        *mean = x - u * *deviation;
                    }
                    ConstantParameter::VariationCoefficient => {
                        let v = *deviation / *mean;
                        let denom = 1.0 + u * v;
                        if denom.abs() < 1e-12 {
                            return Err(ReliabilityError::InvalidDistribution(String::from(
                                "Variation coefficient places x at a degenerate mean",
                            )));
                        }
                        *mean = x / denom;
                        *deviation = v * *mean;
                    }
                }
                Ok(())
            }
            Stochast::Deterministic { value } => {
                *value = x;
                Ok(())
            }
            _ => self.solve_mean_for_x_at_u(x, u, constant),
        }
    }

    fn solve_mean_for_x_at_u(
        &mut self,
        x: f64,
        u: f64,
        constant: ConstantParameter,
    ) -> Result<(), ReliabilityError> {
        let mean0 = self.mean();
        let dev0 = self.deviation();
        let varcoef = dev0 / mean0;

        let trial = |m: f64| -> f64 {
            let mut cand = self.clone();
            let dev = match constant {
                ConstantParameter::Deviation => dev0,
                ConstantParameter::VariationCoefficient => varcoef * m,
            };
            match cand.set_mean_and_deviation(m, dev.abs()) {
                Ok(()) => cand.x_from_u(u) - x,
                Err(_) => f64::NAN,
            }
        };

        // Expand the bracket around the current mean until the
        // residual changes sign, within a fixed doubling budget.
        let span0 = dev0.abs().max(mean0.abs() * 0.5).max(1.0);
        let mut span = span0;
        let mut bracket: Option<(f64, f64)> = None;
        for _ in 0..40 {
            let lo = mean0 - span;
            let hi = mean0 + span;
            let flo = trial(lo);
            let fhi = trial(hi);
            if flo.is_finite() && fhi.is_finite() && flo * fhi < 0.0 {
                bracket = Some((lo, hi));
                break;
            }
            span *= 2.0;
        }
        let (lo, hi) = bracket.ok_or(ReliabilityError::RootBracketing {
            subject: format!("{} set_x_at_u", self.family()),
            low: mean0 - span,
            high: mean0 + span,
        })?;

        let m = find_root_brent(lo, hi, trial, &mut 1e-10f64).map_err(|_| {
            ReliabilityError::RootBracketing {
                subject: format!("{} set_x_at_u", self.family()),
                low: lo,
                high: hi,
            }
        })?;
        let dev = match constant {
            ConstantParameter::Deviation => dev0,
            ConstantParameter::VariationCoefficient => (varcoef * m).abs(),
        };
        self.set_mean_and_deviation(m, dev)
    }

    /// Fit parameters from samples by the method of moments (empirical
    /// curves for Discrete and CdfCurve).
    pub fn fit(&mut self, samples: &[f64]) -> Result<(), ReliabilityError> {
        if samples.is_empty() {
            return Err(ReliabilityError::InvalidDistribution(String::from(
                "Cannot fit to an empty sample set",
            )));
        }
        let n = samples.len() as f64;
        let mean = samples.iter().sum::<f64>() / n;
        let dev = if samples.len() > 1 {
            (samples.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / (n - 1.0)).sqrt()
        } else {
            0.0
        };
        match self {
            Stochast::Uniform { minimum, maximum } => {
                *minimum = samples.iter().cloned().fold(f64::INFINITY, f64::min);
                *maximum = samples.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
                Ok(())
            }
            Stochast::Discrete {
                values,
                weights,
                cumulative,
            } => {
                let mut sorted = samples.to_vec();
                sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
                values.clear();
                weights.clear();
                cumulative.clear();
                for s in sorted {
                    match values.last() {
                        Some(last) if (last - s).abs() < 1e-12 => {
                            *weights.last_mut().unwrap() += 1.0;
                        }
                        _ => {
                            values.push(s);
                            weights.push(1.0);
                        }
                    }
                }
                Ok(())
            }
            Stochast::CdfCurve { xs, ps } => {
                let mut sorted = samples.to_vec();
                sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
                *ps = (0..sorted.len())
                    .map(|i| (i + 1) as f64 / (sorted.len() + 1) as f64)
                    .collect();
                *xs = sorted;
                Ok(())
            }
            Stochast::Inverted { inner } => inner.fit(samples),
            Stochast::Qualitative { .. } | Stochast::Truncated { .. } => {
                Err(ReliabilityError::Unsupported {
                    family: self.family(),
                    operation: "fit",
                })
            }
            _ => self.set_mean_and_deviation(mean, dev),
        }
    }
}
