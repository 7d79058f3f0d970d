// Common interface for the reliability methods
use crate::result::DesignPoint;
use crate::runner::ModelRunner;

/// A reliability calculation method. Implementations own their
/// settings; the runner supplies the model and the u/x conversion.
pub trait ReliabilityMethod {
    fn name(&self) -> &'static str;
    fn design_point(&mut self, runner: &mut ModelRunner) -> DesignPoint;
}

/// Coefficient of variation of an estimated failure probability from
/// `n` independent samples.
pub fn variation_coefficient(pf: f64, n: usize) -> f64 {
    if pf <= 0.0 || n == 0 {
        f64::INFINITY
    } else {
        ((1.0 - pf) / (pf * n as f64)).sqrt()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variation_coefficient_shrinks_with_samples() {
        let a = variation_coefficient(0.01, 1000);
        let b = variation_coefficient(0.01, 10_000);
        assert!(b < a);
        assert!((a - (0.99f64 / 10.0).sqrt()).abs() < 1e-12);
    }

    #[test]
    fn degenerate_estimates_are_infinite() {
        assert!(variation_coefficient(0.0, 1000).is_infinite());
        assert!(variation_coefficient(0.5, 0).is_infinite());
    }
}
