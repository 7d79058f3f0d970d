// Correlation between stochasts: dense Cholesky matrix or copula pairs
use serde::{Deserialize, Serialize};

use mathru::algebra::linear::matrix::{CholeskyDecomposition, General};
use roots::find_root_brent;

use crate::transform::{p_from_u, u_from_p};
use crate::validation::ValidationReport;

/// Dense symmetric correlation matrix over the full stochast ordering.
/// The Cholesky factor is computed lazily and cached; mutating an
/// entry invalidates the cache.
#[derive(Clone, Debug)]
pub struct CorrelationMatrix {
    n: usize,
    values: General<f64>,
    factor: Option<General<f64>>,
}

impl CorrelationMatrix {
    pub fn identity(n: usize) -> Self {
        Self {
            n,
            values: General::one(n),
            factor: None,
        }
    }

    pub fn size(&self) -> usize {
        self.n
    }

    pub fn set_correlation(&mut self, i: usize, j: usize, rho: f64) {
        let sub = General::new(1, 1, vec![rho]);
        self.values = self.values.clone().set_slice(&sub, i, j);
        self.values = self.values.clone().set_slice(&sub, j, i);
        self.factor = None;
    }

    pub fn get_correlation(&self, i: usize, j: usize) -> f64 {
        self.values[[i, j]]
    }

    pub fn is_identity(&self) -> bool {
        for i in 0..self.n {
            for j in 0..self.n {
                let expect = if i == j { 1.0 } else { 0.0 };
                if (self.values[[i, j]] - expect).abs() > 0.0 {
                    return false;
                }
            }
        }
        true
    }

    fn cholesky(&mut self) -> Option<&General<f64>> {
        if self.factor.is_none() {
            self.factor = self
                .values
                .clone()
                .dec_cholesky()
                .ok()
                .map(|dec| General::from(dec.l()))
                .filter(|l| {
                    // A silently failed decomposition surfaces as NaN
                    (0..self.n).all(|i| (0..self.n).all(|j| l[[i, j]].is_finite()))
                });
        }
        self.factor.as_ref()
    }

    /// Failed decomposition is a reported finding, not a panic; the
    /// caller may still run with the identity fallback.
    pub fn validate(&mut self, report: &mut ValidationReport) {
        for i in 0..self.n {
            for j in 0..i {
                let rho = self.values[[i, j]];
                if rho.abs() > 1.0 {
                    report.error(
                        "correlation",
                        format!("Coefficient ({}, {}) = {} outside [-1, 1]", i, j, rho),
                    );
                }
            }
        }
        if self.cholesky().is_none() {
            report.error(
                "correlation",
                String::from("Correlation matrix is not positive definite"),
            );
        }
    }

    /// Multiply the independent u-vector by the Cholesky factor.
    /// Falls back to the uncorrelated vector when decomposition fails.
    pub fn apply(&mut self, u: &[f64]) -> Vec<f64> {
        debug_assert_eq!(u.len(), self.n);
        match self.cholesky() {
            Some(l) => {
                let mut out = vec![0.0; u.len()];
                for (i, o) in out.iter_mut().enumerate() {
                    for (j, uj) in u.iter().enumerate().take(i + 1) {
                        *o += l[[i, j]] * uj;
                    }
                }
                out
            }
            None => u.to_vec(),
        }
    }
}

/// Bivariate copulas; each conditions the second coordinate on the
/// first, in place.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub enum Copula {
    Gaussian { rho: f64 },
    Frank { theta: f64 },
    Clayton { theta: f64 },
    Gumbel { theta: f64 },
    DiagonalBand { beta: f64 },
}

impl Copula {
    pub fn is_valid(&self) -> bool {
        match self {
            Copula::Gaussian { rho } => rho.abs() <= 1.0,
            Copula::Frank { theta } => *theta != 0.0,
            Copula::Clayton { theta } => *theta >= -1.0 && *theta != 0.0,
            Copula::Gumbel { theta } => *theta >= 1.0,
            Copula::DiagonalBand { beta } => *beta > 0.0 && *beta <= 1.0,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Copula::Gaussian { rho } => format!("Gaussian(rho={})", rho),
            Copula::Frank { theta } => format!("Frank(theta={})", theta),
            Copula::Clayton { theta } => format!("Clayton(theta={})", theta),
            Copula::Gumbel { theta } => format!("Gumbel(theta={})", theta),
            Copula::DiagonalBand { beta } => format!("DiagonalBand(beta={})", beta),
        }
    }

    /// Replace the independent coordinate b with the conditioned one,
    /// given the already-realized coordinate a.
    pub fn update_uspace(&self, a: f64, b: &mut f64) {
        const P_EPS: f64 = 1e-12;
        match self {
            Copula::Gaussian { rho } => {
                *b = rho * a + (1.0 - rho * rho).max(0.0).sqrt() * *b;
            }
            Copula::Frank { theta } => {
                let u1 = p_from_u(a).clamp(P_EPS, 1.0 - P_EPS);
                let v = p_from_u(*b).clamp(P_EPS, 1.0 - P_EPS);
                // Conditional inverse of the Frank copula
                let et = (-theta).exp();
                let eu = (-theta * u1).exp();
                let p2 = -(1.0 + v * (1.0 - et) / (v * (eu - 1.0) - eu)).ln() / theta;
                *b = u_from_p(p2.clamp(P_EPS, 1.0 - P_EPS));
            }
            Copula::Clayton { theta } => {
                let u1 = p_from_u(a).clamp(P_EPS, 1.0 - P_EPS);
                let v = p_from_u(*b).clamp(P_EPS, 1.0 - P_EPS);
                let p2 = (1.0 + u1.powf(-theta) * (v.powf(-theta / (1.0 + theta)) - 1.0))
                    .powf(-theta.recip());
                *b = u_from_p(p2.clamp(P_EPS, 1.0 - P_EPS));
            }
            Copula::Gumbel { theta } => {
                let u1 = p_from_u(a).clamp(P_EPS, 1.0 - P_EPS);
                let v = p_from_u(*b).clamp(P_EPS, 1.0 - P_EPS);
                // No closed-form conditional inverse; bracketed Brent
                // on the h-function over the unit interval.
                let h = |p2: f64| -> f64 {
                    let lu = -u1.ln();
                    let lv = -p2.ln();
                    let s = lu.powf(*theta) + lv.powf(*theta);
                    let c = (-s.powf(theta.recip())).exp();
                    c * s.powf(theta.recip() - 1.0) * lu.powf(theta - 1.0) / u1
                };
                let p2 = find_root_brent(P_EPS, 1.0 - P_EPS, |x| h(x) - v, &mut 1e-10f64)
                    .unwrap_or(v);
                *b = u_from_p(p2.clamp(P_EPS, 1.0 - P_EPS));
            }
            Copula::DiagonalBand { beta } => {
                let u1 = p_from_u(a);
                let v = p_from_u(*b);
                // Second coordinate uniform on a band around the first,
                // reflected at the unit-interval edges. beta = 1 is
                // full dependence, beta -> 0 widens to independence.
                let half = 1.0 - beta;
                let mut p2 = if half <= 0.0 {
                    u1
                } else {
                    u1 + (2.0 * v - 1.0) * half
                };
                if p2 < 0.0 {
                    p2 = -p2;
                }
                if p2 > 1.0 {
                    p2 = 2.0 - p2;
                }
                *b = u_from_p(p2.clamp(P_EPS, 1.0 - P_EPS));
            }
        }
    }
}

/// One registered dependency: `second` is conditioned on `first`.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct CopulaPair {
    pub first: usize,
    pub second: usize,
    pub copula: Copula,
}

/// Ordered copula pairs; application order is registration order.
#[derive(Clone, Debug, Default)]
pub struct CopulaSet {
    pairs: Vec<CopulaPair>,
}

impl CopulaSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, first: usize, second: usize, copula: Copula) {
        self.pairs.push(CopulaPair {
            first,
            second,
            copula,
        });
    }

    pub fn pairs(&self) -> &[CopulaPair] {
        &self.pairs
    }

    pub fn validate(&self, n: usize, report: &mut ValidationReport) {
        for pair in &self.pairs {
            if !pair.copula.is_valid() {
                report.error(
                    "correlation",
                    format!("Invalid copula parameter: {}", pair.copula.describe()),
                );
            }
            if pair.first >= n || pair.second >= n || pair.first == pair.second {
                report.error(
                    "correlation",
                    format!(
                        "Copula pair ({}, {}) out of range for {} stochasts",
                        pair.first, pair.second, n
                    ),
                );
            }
        }
    }

    pub fn apply(&self, u: &[f64]) -> Vec<f64> {
        let mut out = u.to_vec();
        for pair in &self.pairs {
            let a = out[pair.first];
            let mut b = out[pair.second];
            pair.copula.update_uspace(a, &mut b);
            out[pair.second] = b;
        }
        out
    }
}

/// Dependency structure over the full stochast vector.
#[derive(Clone, Debug)]
pub enum CorrelationModel {
    Independent,
    Matrix(CorrelationMatrix),
    Copulas(CopulaSet),
}

impl CorrelationModel {
    pub fn apply(&mut self, u: &[f64]) -> Vec<f64> {
        match self {
            CorrelationModel::Independent => u.to_vec(),
            CorrelationModel::Matrix(m) => m.apply(u),
            CorrelationModel::Copulas(c) => c.apply(u),
        }
    }

    pub fn validate(&mut self, n: usize, report: &mut ValidationReport) {
        match self {
            CorrelationModel::Independent => {}
            CorrelationModel::Matrix(m) => {
                if m.size() != n {
                    report.error(
                        "correlation",
                        format!("Matrix size {} does not match {} stochasts", m.size(), n),
                    );
                } else {
                    m.validate(report);
                }
            }
            CorrelationModel::Copulas(c) => c.validate(n, report),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_applies_unchanged() {
        let mut m = CorrelationMatrix::identity(3);
        assert!(m.is_identity());
        let u = vec![0.5, -1.0, 2.0];
        assert_eq!(m.apply(&u), u);
    }

    #[test]
    fn cholesky_pair_mixing() {
        let mut m = CorrelationMatrix::identity(2);
        m.set_correlation(0, 1, 0.6);
        let out = m.apply(&[1.0, 1.0]);
        assert!((out[0] - 1.0).abs() < 1e-12);
        // Row two of the factor: [rho, sqrt(1 - rho^2)]
        assert!((out[1] - (0.6 + 0.8)).abs() < 1e-9);
    }

    #[test]
    fn non_positive_definite_is_reported() {
        let mut m = CorrelationMatrix::identity(3);
        m.set_correlation(0, 1, 0.99);
        m.set_correlation(1, 2, 0.99);
        m.set_correlation(0, 2, -0.99);
        let mut report = ValidationReport::new();
        m.validate(&mut report);
        assert!(!report.is_valid());
        // Still usable: falls back to the uncorrelated vector
        let u = vec![1.0, 2.0, 3.0];
        assert_eq!(m.apply(&u), u);
    }

    #[test]
    fn copula_parameter_validity() {
        assert!(!Copula::Gaussian { rho: 1.5 }.is_valid());
        assert!(!Copula::Frank { theta: 0.0 }.is_valid());
        assert!(!Copula::Clayton { theta: -2.0 }.is_valid());
        assert!(!Copula::Clayton { theta: 0.0 }.is_valid());
        assert!(!Copula::Gumbel { theta: 0.5 }.is_valid());
        assert!(Copula::Gumbel { theta: 1.0 }.is_valid());
        assert!(!Copula::DiagonalBand { beta: 0.0 }.is_valid());
    }

    #[test]
    fn gaussian_copula_matches_cholesky() {
        let cop = Copula::Gaussian { rho: 0.6 };
        let mut b = 1.0;
        cop.update_uspace(1.0, &mut b);
        assert!((b - 1.4).abs() < 1e-12);
    }

    #[test]
    fn conditional_inverse_preserves_unit_interval() {
        for cop in [
            Copula::Frank { theta: 3.0 },
            Copula::Clayton { theta: 2.0 },
            Copula::Gumbel { theta: 1.5 },
            Copula::DiagonalBand { beta: 0.7 },
        ] {
            for (a, b0) in [(0.0, 0.0), (-2.0, 1.0), (1.5, -1.5), (3.0, 2.0)] {
                let mut b = b0;
                cop.update_uspace(a, &mut b);
                assert!(b.is_finite(), "{}: a={} b0={}", cop.describe(), a, b0);
            }
        }
    }

    #[test]
    fn copula_order_matters() {
        let mut set = CopulaSet::new();
        set.add(0, 1, Copula::Gaussian { rho: 0.9 });
        set.add(1, 2, Copula::Gaussian { rho: 0.9 });
        let out = set.apply(&[1.0, 0.0, 0.0]);
        // Chained conditioning: the third coordinate inherits from the
        // updated second, not the original
        assert!((out[1] - 0.9).abs() < 1e-12);
        assert!((out[2] - 0.81).abs() < 1e-12);
    }
}
