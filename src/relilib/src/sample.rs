// A sample point: reduced u-vector plus its limit-state evaluation
#[derive(Clone, Debug)]
pub struct Sample {
    /// Standard-normal coordinates, varying stochasts only
    pub u: Vec<f64>,
    /// Physical values over the full stochast ordering; filled by the
    /// model runner before the Z-callback sees the sample
    pub x: Vec<f64>,
    /// Limit-state value, NaN until evaluated
    pub z: f64,
    pub iteration: usize,
    pub weight: f64,
    /// Opaque correlation key a callback may set for bookkeeping
    pub tag: Option<String>,
}

impl Sample {
    pub fn new(u: Vec<f64>) -> Self {
        Self {
            u,
            x: Vec::new(),
            z: f64::NAN,
            iteration: 0,
            weight: 1.0,
            tag: None,
        }
    }

    pub fn at_iteration(u: Vec<f64>, iteration: usize) -> Self {
        Self {
            iteration,
            ..Self::new(u)
        }
    }

    /// Reliability index of this point under isotropic standard-normal
    /// geometry: the Euclidean length of the u-vector.
    pub fn beta(&self) -> f64 {
        self.u.iter().map(|v| v * v).sum::<f64>().sqrt()
    }

    pub fn is_evaluated(&self) -> bool {
        !self.z.is_nan()
    }

    /// Failure is conventionally Z < 0.
    pub fn is_failed(&self) -> bool {
        self.z < 0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn beta_is_euclidean_length() {
        let s = Sample::new(vec![3.0, 4.0]);
        assert!((s.beta() - 5.0).abs() < 1e-12);
        assert!(!s.is_evaluated());
        assert!(!s.is_failed());
    }

    #[test]
    fn failure_sign_convention() {
        let mut s = Sample::new(vec![0.0]);
        s.z = -0.1;
        assert!(s.is_evaluated());
        assert!(s.is_failed());
    }
}
